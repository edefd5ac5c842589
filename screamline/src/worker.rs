//! Event delivery: sources of change events and the worker that runs triggers.
//!
//! Deliveries of a polled batch are grouped by document. Each group runs as
//! one tokio task in stream order, so a create and a later delete of the same
//! document never overtake each other; different documents proceed
//! concurrently. Once the batch finishes, every delivery is acknowledged
//! whatever its outcome. Handlers log their own failures and redelivery only
//! happens for batches interrupted before acknowledgement.

use std::{
    collections::HashMap,
    future::Future,
    sync::atomic::{AtomicBool, AtomicU64, Ordering},
    time::Duration,
};

use async_trait::async_trait;
use log::{debug, error, info, warn};
use redis::{
    AsyncCommands,
    aio::ConnectionManager,
    streams::{StreamAutoClaimOptions, StreamAutoClaimReply, StreamId, StreamReadOptions, StreamReadReply},
};
use serde::{Deserialize, Serialize};
use tokio::{
    sync::{Mutex, broadcast},
    task::JoinSet,
};

use crate::{
    errors::StoreError,
    events::{ChangeEvent, TriggerKey},
    triggers::{TriggerOutcome, Triggers},
    types::Collection,
};

const STREAM_EVENT_FIELD: &str = "event";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerSettings {
    #[serde(default = "default_consumer_group")]
    pub consumer_group: String,
    #[serde(default = "default_consumer_name")]
    pub consumer_name: String,
    /// Maximum events pulled per batch.
    #[serde(default = "default_read_count")]
    pub read_count: usize,
    /// How long one poll blocks waiting for new events.
    #[serde(default = "default_block_ms")]
    pub block_ms: usize,
    /// Pause after a failed poll before trying again.
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    /// Pending entries idle this long are claimed from other consumers at startup.
    #[serde(default = "default_claim_min_idle_ms")]
    pub claim_min_idle_ms: u64,
}

fn default_consumer_group() -> String {
    "triggers".to_string()
}

fn default_consumer_name() -> String {
    "worker-1".to_string()
}

fn default_read_count() -> usize {
    64
}

fn default_block_ms() -> usize {
    5000
}

fn default_retry_delay_ms() -> u64 {
    1000
}

fn default_claim_min_idle_ms() -> u64 {
    60_000
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            consumer_group: default_consumer_group(),
            consumer_name: default_consumer_name(),
            read_count: default_read_count(),
            block_ms: default_block_ms(),
            retry_delay_ms: default_retry_delay_ms(),
            claim_min_idle_ms: default_claim_min_idle_ms(),
        }
    }
}

/// One event handed to the worker, with the id used to acknowledge it.
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    pub id: String,
    pub event: ChangeEvent,
}

#[async_trait]
pub trait EventSource: Send + Sync {
    /// Waits for the next deliveries.
    ///
    /// `Ok(None)` means the source is exhausted; an empty batch means nothing
    /// arrived before the poll timed out.
    async fn next_batch(&self) -> Result<Option<Vec<Delivery>>, StoreError>;

    async fn ack(&self, ids: &[String]) -> Result<(), StoreError>;
}

/// Consumer-group reader over the change stream written by [`crate::store::RedisStore`].
///
/// Recovery runs before any new entry is read. First `XAUTOCLAIM` takes over
/// entries that any consumer of the group left pending for at least
/// `claim_min_idle_ms`, which covers workers that died or were renamed. Then
/// the entries pending for this consumer are re-read. After that the reader
/// switches to new entries.
pub struct RedisEventStream {
    conn: ConnectionManager,
    stream_key: String,
    settings: WorkerSettings,
    /// `XAUTOCLAIM` start id; `None` once the pending list has been swept.
    claim_cursor: Mutex<Option<String>>,
    recovering: AtomicBool,
}

impl RedisEventStream {
    /// `conn` should be dedicated to this stream: a blocking read stalls
    /// every other command multiplexed on the same connection.
    pub fn new(conn: ConnectionManager, stream_key: impl Into<String>, settings: WorkerSettings) -> Self {
        Self {
            conn,
            stream_key: stream_key.into(),
            settings,
            claim_cursor: Mutex::new(Some("0-0".to_string())),
            recovering: AtomicBool::new(true),
        }
    }

    pub async fn connect(url: &str, stream_key: impl Into<String>, settings: WorkerSettings) -> Result<Self, StoreError> {
        let client = redis::Client::open(url)?;
        let conn = ConnectionManager::new(client).await?;
        Ok(Self::new(conn, stream_key, settings))
    }

    /// Creates the consumer group (and the stream) when missing.
    pub async fn ensure_group(&self) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let created: Result<(), redis::RedisError> = conn
            .xgroup_create_mkstream(&self.stream_key, &self.settings.consumer_group, "0")
            .await;
        match created {
            Ok(()) => {
                info!("created consumer group {} on {}", self.settings.consumer_group, self.stream_key);
                Ok(())
            }
            Err(err) if err.code() == Some("BUSYGROUP") => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    /// Claims the next page of idle pending entries, or `None` once the sweep is done.
    async fn claim_idle(&self) -> Result<Option<Vec<StreamId>>, StoreError> {
        let mut cursor = self.claim_cursor.lock().await;
        let Some(start) = cursor.clone() else {
            return Ok(None);
        };

        let mut conn = self.conn.clone();
        let options = StreamAutoClaimOptions::default().count(self.settings.read_count);
        let reply: StreamAutoClaimReply = conn
            .xautoclaim_options(
                &self.stream_key,
                &self.settings.consumer_group,
                &self.settings.consumer_name,
                self.settings.claim_min_idle_ms,
                &start,
                options,
            )
            .await?;

        if !reply.deleted_ids.is_empty() {
            warn!(
                "{} pending entries of {} were trimmed before delivery",
                reply.deleted_ids.len(),
                self.stream_key
            );
        }
        if !reply.claimed.is_empty() {
            info!(
                "claimed {} idle pending entries on {} for {}",
                reply.claimed.len(),
                self.stream_key,
                self.settings.consumer_name
            );
        }
        *cursor = if reply.next_stream_id == "0-0" {
            None
        } else {
            Some(reply.next_stream_id)
        };
        Ok(Some(reply.claimed))
    }

    async fn read_group(&self) -> Result<Vec<StreamId>, StoreError> {
        let recovering = self.recovering.load(Ordering::Relaxed);
        let mut options = StreamReadOptions::default()
            .group(&self.settings.consumer_group, &self.settings.consumer_name)
            .count(self.settings.read_count);
        if !recovering {
            options = options.block(self.settings.block_ms);
        }
        let start = if recovering { "0" } else { ">" };

        let mut conn = self.conn.clone();
        let reply: Option<StreamReadReply> = conn.xread_options(&[&self.stream_key], &[start], &options).await?;
        let entries: Vec<StreamId> = reply
            .map(|reply| reply.keys.into_iter().flat_map(|key| key.ids).collect())
            .unwrap_or_default();

        if recovering && entries.is_empty() {
            debug!("no pending entries left on {}", self.stream_key);
            self.recovering.store(false, Ordering::Relaxed);
        }
        Ok(entries)
    }
}

#[async_trait]
impl EventSource for RedisEventStream {
    async fn next_batch(&self) -> Result<Option<Vec<Delivery>>, StoreError> {
        let entries = match self.claim_idle().await? {
            Some(claimed) => claimed,
            None => self.read_group().await?,
        };

        let mut deliveries = Vec::with_capacity(entries.len());
        let mut poison = Vec::new();
        for entry in entries {
            let parsed = entry
                .get::<String>(STREAM_EVENT_FIELD)
                .map(|raw| serde_json::from_str::<ChangeEvent>(&raw));
            match parsed {
                Some(Ok(event)) => deliveries.push(Delivery { id: entry.id, event }),
                Some(Err(err)) => {
                    error!("dropping malformed stream entry {}: {err}", entry.id);
                    poison.push(entry.id);
                }
                None => {
                    error!("dropping stream entry {} without an event field", entry.id);
                    poison.push(entry.id);
                }
            }
        }
        if !poison.is_empty() {
            self.ack(&poison).await?;
        }
        Ok(Some(deliveries))
    }

    async fn ack(&self, ids: &[String]) -> Result<(), StoreError> {
        if ids.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn.clone();
        let _: u64 = conn.xack(&self.stream_key, &self.settings.consumer_group, ids).await?;
        Ok(())
    }
}

/// Feeds a [`crate::store::MemoryStore`] change broadcast to a worker.
pub struct MemoryEventFeed {
    receiver: Mutex<broadcast::Receiver<ChangeEvent>>,
    max_batch: usize,
    sequence: AtomicU64,
}

impl MemoryEventFeed {
    pub fn new(receiver: broadcast::Receiver<ChangeEvent>) -> Self {
        Self::with_max_batch(receiver, default_read_count())
    }

    pub fn with_max_batch(receiver: broadcast::Receiver<ChangeEvent>, max_batch: usize) -> Self {
        Self {
            receiver: Mutex::new(receiver),
            max_batch: max_batch.max(1),
            sequence: AtomicU64::new(0),
        }
    }

    fn delivery(&self, event: ChangeEvent) -> Delivery {
        let seq = self.sequence.fetch_add(1, Ordering::Relaxed);
        Delivery {
            id: format!("mem-{seq}"),
            event,
        }
    }

    /// Drains whatever is buffered right now without waiting.
    pub async fn drain(&self) -> Vec<Delivery> {
        let mut receiver = self.receiver.lock().await;
        let mut deliveries = Vec::new();
        loop {
            match receiver.try_recv() {
                Ok(event) => deliveries.push(self.delivery(event)),
                Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                    warn!("memory event feed lagged; {skipped} events lost");
                }
                Err(_) => break,
            }
        }
        deliveries
    }
}

#[async_trait]
impl EventSource for MemoryEventFeed {
    async fn next_batch(&self) -> Result<Option<Vec<Delivery>>, StoreError> {
        let mut receiver = self.receiver.lock().await;
        let first = loop {
            match receiver.recv().await {
                Ok(event) => break event,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("memory event feed lagged; {skipped} events lost");
                }
                Err(broadcast::error::RecvError::Closed) => return Ok(None),
            }
        };

        let mut deliveries = vec![self.delivery(first)];
        while deliveries.len() < self.max_batch {
            match receiver.try_recv() {
                Ok(event) => deliveries.push(self.delivery(event)),
                Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                    warn!("memory event feed lagged; {skipped} events lost");
                }
                Err(_) => break,
            }
        }
        Ok(Some(deliveries))
    }

    async fn ack(&self, _ids: &[String]) -> Result<(), StoreError> {
        Ok(())
    }
}

/// Result of one dispatched event.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProcessedEvent {
    pub delivery_id: String,
    pub trigger: String,
    pub document_id: String,
    pub outcome: TriggerOutcome,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WorkerStats {
    pub batches: u64,
    pub events: u64,
    pub failures: u64,
    pub ignored: u64,
}

impl WorkerStats {
    fn record(&mut self, processed: &[ProcessedEvent]) {
        self.batches += 1;
        for event in processed {
            self.events += 1;
            match event.outcome {
                TriggerOutcome::Failed { .. } => self.failures += 1,
                TriggerOutcome::Ignored => self.ignored += 1,
                _ => {}
            }
        }
    }
}

/// Splits a batch into per-document runs, keeping delivery order inside each run.
fn group_by_document(deliveries: Vec<Delivery>) -> Vec<Vec<Delivery>> {
    let mut slots: HashMap<(Collection, String), usize> = HashMap::new();
    let mut groups: Vec<Vec<Delivery>> = Vec::new();
    for delivery in deliveries {
        let key = (delivery.event.collection, delivery.event.document_id.clone());
        match slots.get(&key) {
            Some(&slot) => groups[slot].push(delivery),
            None => {
                slots.insert(key, groups.len());
                groups.push(vec![delivery]);
            }
        }
    }
    groups
}

pub struct Worker<E> {
    source: E,
    triggers: Triggers,
    retry_delay: Duration,
}

impl<E: EventSource> Worker<E> {
    pub fn new(source: E, triggers: Triggers) -> Self {
        Self {
            source,
            triggers,
            retry_delay: Duration::from_millis(default_retry_delay_ms()),
        }
    }

    pub fn with_retry_delay(mut self, retry_delay: Duration) -> Self {
        self.retry_delay = retry_delay;
        self
    }

    pub fn source(&self) -> &E {
        &self.source
    }

    /// Dispatches the batch one task per document, then acknowledges every delivery.
    pub async fn process(&self, deliveries: Vec<Delivery>) -> Result<Vec<ProcessedEvent>, StoreError> {
        let ids: Vec<String> = deliveries.iter().map(|delivery| delivery.id.clone()).collect();
        let mut tasks = JoinSet::new();
        for group in group_by_document(deliveries) {
            let triggers = self.triggers.clone();
            tasks.spawn(async move {
                let mut processed = Vec::with_capacity(group.len());
                for delivery in group {
                    let key: TriggerKey = delivery.event.key();
                    let outcome = triggers.dispatch(&delivery.event).await;
                    processed.push(ProcessedEvent {
                        delivery_id: delivery.id,
                        trigger: key.to_string(),
                        document_id: delivery.event.document_id,
                        outcome,
                    });
                }
                processed
            });
        }

        let mut processed = Vec::with_capacity(ids.len());
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(events) => processed.extend(events),
                Err(err) => error!("trigger task aborted: {err}"),
            }
        }

        self.source.ack(&ids).await?;
        Ok(processed)
    }

    /// Polls the source once and processes what it returned.
    pub async fn poll_once(&self) -> Result<Option<Vec<ProcessedEvent>>, StoreError> {
        let Some(deliveries) = self.source.next_batch().await? else {
            return Ok(None);
        };
        if deliveries.is_empty() {
            return Ok(Some(Vec::new()));
        }
        debug!("processing {} change event(s)", deliveries.len());
        self.process(deliveries).await.map(Some)
    }

    /// Processes events until `shutdown` resolves or the source is exhausted.
    pub async fn run_until<F>(&self, shutdown: F) -> WorkerStats
    where
        F: Future<Output = ()>,
    {
        let mut stats = WorkerStats::default();
        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("worker shutting down");
                    break;
                }
                polled = self.poll_once() => match polled {
                    Ok(Some(processed)) => {
                        if !processed.is_empty() {
                            stats.record(&processed);
                        }
                    }
                    Ok(None) => {
                        info!("event source exhausted");
                        break;
                    }
                    Err(err) => {
                        error!("polling change events failed: {err}");
                        tokio::time::sleep(self.retry_delay).await;
                    }
                },
            }
        }
        stats
    }
}
