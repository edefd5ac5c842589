use std::borrow::Cow;

use async_trait::async_trait;
use log::debug;
use redis::{AsyncCommands, aio::ConnectionManager, cmd};
use serde_json::{Value, json};

use super::{BatchOp, Document, DocumentStore, Query, WriteBatch, index_token, scripts::BATCH_COMMIT_SCRIPT};
use crate::{
    errors::StoreError,
    keys::KeyContext,
    types::{Collection, DocPath, Fields},
};

const SCAN_COUNT: usize = 1000;
const MGET_CHUNK: usize = 500;

/// Approximate number of change events kept in the stream.
pub const DEFAULT_STREAM_MAX_LEN: usize = 100_000;

/// Document store on plain Redis.
///
/// Documents are JSON strings under `prefix:service:collection:id`. The
/// fields listed by [`Collection::indexed_fields`] are mirrored into
/// equality-index sets so `query` can avoid a scan. Commits run as a single
/// Lua script, which Redis executes atomically, and append every effective
/// write to the change stream consumed by [`crate::worker::RedisEventStream`].
///
/// Each append trims the stream to about `stream_max_len` entries, oldest
/// first. Entries a lagging consumer group has not read yet are trimmed just
/// the same, so the cap has to exceed the worst expected backlog.
#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
    prefix: String,
    service: String,
    stream_max_len: Option<usize>,
}

impl RedisStore {
    pub fn new(conn: ConnectionManager, prefix: impl Into<String>, service: impl Into<String>) -> Self {
        Self {
            conn,
            prefix: prefix.into(),
            service: service.into(),
            stream_max_len: Some(DEFAULT_STREAM_MAX_LEN),
        }
    }

    /// Caps the change stream at roughly `max_len` entries; `None` keeps every entry.
    pub fn with_stream_max_len(mut self, max_len: Option<usize>) -> Self {
        self.stream_max_len = max_len.filter(|len| *len > 0);
        self
    }

    pub fn stream_max_len(&self) -> Option<usize> {
        self.stream_max_len
    }

    pub async fn connect(url: &str, prefix: impl Into<String>, service: impl Into<String>) -> Result<Self, StoreError> {
        let client = redis::Client::open(url)?;
        let conn = ConnectionManager::new(client).await?;
        Ok(Self::new(conn, prefix, service))
    }

    pub fn key_context(&self) -> KeyContext<'_> {
        KeyContext::new(&self.prefix, &self.service)
    }

    /// A handle on the underlying connection, shared with the event consumer.
    pub fn connection(&self) -> ConnectionManager {
        self.conn.clone()
    }

    pub fn events_key(&self) -> String {
        self.key_context().events()
    }

    /// Scan patterns covering every key this store writes.
    pub fn key_patterns(&self) -> Vec<String> {
        let keys = self.key_context();
        let mut patterns: Vec<String> = Collection::ALL
            .into_iter()
            .map(|collection| keys.collection_pattern(collection))
            .collect();
        patterns.push(keys.events());
        patterns
    }

    async fn candidate_ids(&self, query: &Query) -> Result<Vec<String>, StoreError> {
        let keys = self.key_context();
        let mut conn = self.conn.clone();

        if let Some(filter) = &query.filter
            && query.collection.is_indexed(&filter.field)
        {
            let index_key = keys.index(query.collection, &filter.field, &index_token(&filter.value));
            let ids: Vec<String> = conn.smembers(&index_key).await?;
            return Ok(ids);
        }

        let pattern = keys.collection_pattern(query.collection);
        let document_prefix = format!("{}:{}:{}:", self.prefix, self.service, query.collection);
        let index_prefix = keys.index_prefix(query.collection);
        let mut cursor: u64 = 0;
        let mut ids = Vec::new();
        loop {
            let (next_cursor, batch): (u64, Vec<String>) = cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(SCAN_COUNT)
                .query_async(&mut conn)
                .await?;
            ids.extend(
                batch
                    .iter()
                    .filter(|key| !key.starts_with(&index_prefix))
                    .filter_map(|key| key.strip_prefix(&document_prefix))
                    .map(str::to_string),
            );
            cursor = next_cursor;
            if cursor == 0 {
                break;
            }
        }
        Ok(ids)
    }

    fn commit_payload(&self, batch: &WriteBatch) -> Value {
        let keys = self.key_context();
        let preconditions: Vec<Value> = batch
            .preconditions()
            .iter()
            .map(|path| {
                json!({
                    "key": keys.document(path.collection, &path.id),
                    "path": path.to_string(),
                })
            })
            .collect();
        let ops: Vec<Value> = batch
            .ops()
            .iter()
            .map(|op| {
                let path = op.path();
                let mut entry = json!({
                    "collection": path.collection.as_str(),
                    "id": path.id,
                    "path": path.to_string(),
                    "key": keys.document(path.collection, &path.id),
                    "index_prefix": keys.index_prefix(path.collection),
                    "indexed": path.collection.indexed_fields(),
                });
                let (name, fields) = match op {
                    BatchOp::Set { fields, .. } => ("set", Some(fields)),
                    BatchOp::Update { fields, .. } => ("update", Some(fields)),
                    BatchOp::Delete { .. } => ("delete", None),
                };
                entry["op"] = Value::from(name);
                if let Some(fields) = fields {
                    entry["fields"] = Value::Object(fields.clone());
                }
                entry
            })
            .collect();

        json!({
            "preconditions": preconditions,
            "ops": ops,
            "events_key": keys.events(),
            "stream_max_len": self.stream_max_len,
        })
    }
}

fn parse_fields(path: &DocPath, raw: &str) -> Result<Fields, StoreError> {
    match serde_json::from_str::<Value>(raw)? {
        Value::Object(fields) => Ok(fields),
        other => Err(StoreError::Other {
            message: Cow::Owned(format!("document {path} is not a JSON object: {other}")),
        }),
    }
}

#[async_trait]
impl DocumentStore for RedisStore {
    async fn get(&self, path: &DocPath) -> Result<Option<Document>, StoreError> {
        let key = self.key_context().document(path.collection, &path.id);
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn.get(&key).await?;
        match raw {
            Some(json) => Ok(Some(Document::new(path.clone(), parse_fields(path, &json)?))),
            None => Ok(None),
        }
    }

    async fn query(&self, query: &Query) -> Result<Vec<Document>, StoreError> {
        let ids = self.candidate_ids(query).await?;
        let mut conn = self.conn.clone();
        let mut documents = Vec::with_capacity(ids.len());

        for chunk in ids.chunks(MGET_CHUNK) {
            let keys: Vec<String> = chunk
                .iter()
                .map(|id| self.key_context().document(query.collection, id))
                .collect();
            let raws: Vec<Option<String>> = cmd("MGET").arg(&keys).query_async(&mut conn).await?;
            for (id, raw) in chunk.iter().zip(raws) {
                // Index entries can briefly outlive a document deleted outside a commit.
                let Some(raw) = raw else {
                    debug!("skipping stale index entry {}/{id}", query.collection);
                    continue;
                };
                let path = DocPath::new(query.collection, id.clone());
                let fields = parse_fields(&path, &raw)?;
                if query.matches(&fields) {
                    documents.push(Document::new(path, fields));
                }
            }
        }

        Ok(query.finish(documents))
    }

    async fn commit(&self, batch: WriteBatch) -> Result<(), StoreError> {
        if batch.is_empty() {
            return Ok(());
        }
        let payload = serde_json::to_string(&self.commit_payload(&batch))?;
        let mut conn = self.conn.clone();

        let mut invocation = BATCH_COMMIT_SCRIPT.prepare_invoke();
        invocation.arg(payload);
        let raw: String = invocation.invoke_async(&mut conn).await?;

        let value: Value = serde_json::from_str(&raw)?;
        let Some(code) = value.get("error").and_then(Value::as_str) else {
            debug!(
                "committed {} ops ({} applied)",
                batch.len(),
                value.get("applied").and_then(Value::as_u64).unwrap_or_default()
            );
            return Ok(());
        };
        let path = value
            .get("path")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        match code {
            "precondition_failed" => Err(StoreError::PreconditionFailed { path }),
            "not_found" => Err(StoreError::NotFound { path }),
            other => Err(StoreError::CommitFailed {
                message: Cow::Owned(format!("{other} at {path}")),
            }),
        }
    }
}
