use std::{
    collections::{BTreeMap, HashMap},
    sync::{
        RwLock, RwLockReadGuard, RwLockWriteGuard,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
};

use async_trait::async_trait;
use log::debug;
use tokio::sync::broadcast;

use super::{BatchOp, Document, DocumentStore, Query, WriteBatch};
use crate::{
    errors::StoreError,
    events::ChangeEvent,
    types::{Collection, DocPath, Fields},
};

/// Change events buffered per subscriber before the slowest one starts lagging.
pub const DEFAULT_EVENT_CAPACITY: usize = 1024;

type Collections = HashMap<Collection, BTreeMap<String, Fields>>;

/// In-process document store.
///
/// Commits hold one write lock for the whole batch, so a batch is observed
/// either entirely or not at all. Every effective write is published as a
/// [`ChangeEvent`] to subscribers after the lock is released.
pub struct MemoryStore {
    collections: RwLock<Collections>,
    events: broadcast::Sender<ChangeEvent>,
    writes: AtomicU64,
    commits: AtomicU64,
    fail_commits: AtomicBool,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::with_event_capacity(DEFAULT_EVENT_CAPACITY)
    }

    #[must_use]
    pub fn with_event_capacity(capacity: usize) -> Self {
        let (events, _) = broadcast::channel(capacity);
        Self {
            collections: RwLock::new(HashMap::new()),
            events,
            writes: AtomicU64::new(0),
            commits: AtomicU64::new(0),
            fail_commits: AtomicBool::new(false),
        }
    }

    /// Receive every change committed after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        self.events.subscribe()
    }

    /// Number of document writes applied so far (sets, updates and effective deletes).
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }

    /// Number of batches committed so far.
    pub fn commit_count(&self) -> u64 {
        self.commits.load(Ordering::Relaxed)
    }

    /// Make every subsequent commit fail with [`StoreError::CommitFailed`].
    pub fn fail_commits(&self, fail: bool) {
        self.fail_commits.store(fail, Ordering::Relaxed);
    }

    /// Every document of a collection ordered by id.
    pub fn documents(&self, collection: Collection) -> Result<Vec<Document>, StoreError> {
        let guard = self.read()?;
        Ok(guard
            .get(&collection)
            .map(|docs| {
                docs.iter()
                    .map(|(id, fields)| Document::new(DocPath::new(collection, id.clone()), fields.clone()))
                    .collect()
            })
            .unwrap_or_default())
    }

    /// Write a document without emitting a change event, for seeding fixtures.
    pub fn seed(&self, path: DocPath, fields: Fields) -> Result<(), StoreError> {
        let mut guard = self.write()?;
        guard.entry(path.collection).or_default().insert(path.id, fields);
        Ok(())
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Collections>, StoreError> {
        self.collections.read().map_err(|_| StoreError::Other {
            message: "memory store lock poisoned".into(),
        })
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Collections>, StoreError> {
        self.collections.write().map_err(|_| StoreError::Other {
            message: "memory store lock poisoned".into(),
        })
    }

    fn apply(collections: &mut Collections, batch: WriteBatch) -> Result<Vec<ChangeEvent>, StoreError> {
        let exists = |collections: &Collections, path: &DocPath| {
            collections
                .get(&path.collection)
                .is_some_and(|docs| docs.contains_key(&path.id))
        };

        for path in batch.preconditions() {
            if !exists(collections, path) {
                return Err(StoreError::PreconditionFailed { path: path.to_string() });
            }
        }
        for op in batch.ops() {
            if let BatchOp::Update { path, .. } = op
                && !exists(collections, path)
            {
                return Err(StoreError::NotFound { path: path.to_string() });
            }
        }

        let mut changes = Vec::with_capacity(batch.len());
        for op in batch.ops {
            match op {
                BatchOp::Set { path, fields } => {
                    let docs = collections.entry(path.collection).or_default();
                    match docs.insert(path.id.clone(), fields.clone()) {
                        Some(before) => changes.push(ChangeEvent::updated(path, before, fields)),
                        None => changes.push(ChangeEvent::created(path, fields)),
                    }
                }
                BatchOp::Update { path, fields } => {
                    let docs = collections.entry(path.collection).or_default();
                    // Removed by an earlier op of this batch.
                    let Some(current) = docs.get_mut(&path.id) else {
                        continue;
                    };
                    let before = current.clone();
                    current.extend(fields);
                    let after = current.clone();
                    changes.push(ChangeEvent::updated(path, before, after));
                }
                BatchOp::Delete { path } => {
                    if let Some(before) = collections
                        .get_mut(&path.collection)
                        .and_then(|docs| docs.remove(&path.id))
                    {
                        changes.push(ChangeEvent::deleted(path, before));
                    }
                }
            }
        }
        Ok(changes)
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn get(&self, path: &DocPath) -> Result<Option<Document>, StoreError> {
        let guard = self.read()?;
        Ok(guard
            .get(&path.collection)
            .and_then(|docs| docs.get(&path.id))
            .map(|fields| Document::new(path.clone(), fields.clone())))
    }

    async fn query(&self, query: &Query) -> Result<Vec<Document>, StoreError> {
        let matched = {
            let guard = self.read()?;
            guard
                .get(&query.collection)
                .map(|docs| {
                    docs.iter()
                        .filter(|(_, fields)| query.matches(fields))
                        .map(|(id, fields)| Document::new(DocPath::new(query.collection, id.clone()), fields.clone()))
                        .collect::<Vec<_>>()
                })
                .unwrap_or_default()
        };
        Ok(query.finish(matched))
    }

    async fn commit(&self, batch: WriteBatch) -> Result<(), StoreError> {
        if self.fail_commits.load(Ordering::Relaxed) {
            return Err(StoreError::CommitFailed {
                message: "commit rejected by memory store".into(),
            });
        }
        if batch.is_empty() {
            return Ok(());
        }

        let changes = {
            let mut guard = self.write()?;
            Self::apply(&mut guard, batch)?
        };

        self.commits.fetch_add(1, Ordering::Relaxed);
        self.writes.fetch_add(changes.len() as u64, Ordering::Relaxed);
        for change in changes {
            // No subscribers is fine; the change is still committed.
            if self.events.send(change).is_err() {
                debug!("memory store change dropped: no subscribers");
            }
        }
        Ok(())
    }
}
