//! Document store contract consumed by the triggers and actions.
//!
//! A store offers per-document reads, equality queries and atomic batches of
//! `set`/`update`/`delete` operations. Single-document writes are one-op
//! batches, so every write goes through [`DocumentStore::commit`] and every
//! implementation has exactly one place where atomicity and change events are
//! decided.
//!
//! Two implementations ship with the crate:
//! - [`MemoryStore`] for tests and embedding, with a broadcast change feed
//! - [`RedisStore`] backed by a Lua commit script and a Redis stream of changes

mod memory;
mod redis_store;
mod scripts;

pub use memory::MemoryStore;
pub use redis_store::{DEFAULT_STREAM_MAX_LEN, RedisStore};

use std::cmp::Ordering;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    errors::StoreError,
    types::{Collection, DocPath, Fields, Record},
};

/// A stored document: its path plus the persisted fields.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub path: DocPath,
    pub fields: Fields,
}

impl Document {
    pub fn new(path: DocPath, fields: Fields) -> Self {
        Self { path, fields }
    }

    pub fn id(&self) -> &str {
        &self.path.id
    }

    pub fn get_str(&self, field: &str) -> Option<&str> {
        self.fields.get(field).and_then(Value::as_str)
    }

    pub fn decode<T: Record>(&self) -> Result<T, StoreError> {
        if self.path.collection != T::COLLECTION {
            return Err(StoreError::InvalidRequest {
                message: format!("cannot decode {} as a {} record", self.path, T::COLLECTION),
            });
        }
        T::from_fields(&self.path.id, &self.fields)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    pub field: String,
    pub value: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderBy {
    pub field: String,
    pub order: SortOrder,
}

/// Equality query over one collection, optionally ordered and limited.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub collection: Collection,
    pub filter: Option<Filter>,
    pub order_by: Option<OrderBy>,
    pub limit: Option<usize>,
}

impl Query {
    pub fn collection(collection: Collection) -> Self {
        Self {
            collection,
            filter: None,
            order_by: None,
            limit: None,
        }
    }

    pub fn where_eq(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filter = Some(Filter {
            field: field.into(),
            value: value.into(),
        });
        self
    }

    pub fn order_by(mut self, field: impl Into<String>, order: SortOrder) -> Self {
        self.order_by = Some(OrderBy {
            field: field.into(),
            order,
        });
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn matches(&self, fields: &Fields) -> bool {
        match &self.filter {
            Some(filter) => fields.get(&filter.field) == Some(&filter.value),
            None => true,
        }
    }

    /// Sorts and truncates documents that already passed [`Query::matches`].
    pub fn finish(&self, mut documents: Vec<Document>) -> Vec<Document> {
        match &self.order_by {
            Some(order_by) => documents.sort_by(|left, right| {
                let ordering = compare_values(left.fields.get(&order_by.field), right.fields.get(&order_by.field))
                    .then_with(|| left.path.id.cmp(&right.path.id));
                match order_by.order {
                    SortOrder::Asc => ordering,
                    SortOrder::Desc => ordering.reverse(),
                }
            }),
            None => documents.sort_by(|left, right| left.path.id.cmp(&right.path.id)),
        }
        if let Some(limit) = self.limit {
            documents.truncate(limit);
        }
        documents
    }
}

/// Orders field values: missing/null first, then booleans, numbers, strings.
/// Strings that both parse as RFC 3339 timestamps compare chronologically.
fn compare_values(left: Option<&Value>, right: Option<&Value>) -> Ordering {
    fn rank(value: Option<&Value>) -> u8 {
        match value {
            None | Some(Value::Null) => 0,
            Some(Value::Bool(_)) => 1,
            Some(Value::Number(_)) => 2,
            Some(Value::String(_)) => 3,
            Some(_) => 4,
        }
    }

    match (left, right) {
        (Some(Value::Bool(a)), Some(Value::Bool(b))) => a.cmp(b),
        (Some(Value::Number(a)), Some(Value::Number(b))) => {
            let a = a.as_f64().unwrap_or_default();
            let b = b.as_f64().unwrap_or_default();
            a.partial_cmp(&b).unwrap_or(Ordering::Equal)
        }
        (Some(Value::String(a)), Some(Value::String(b))) => {
            match (a.parse::<DateTime<Utc>>(), b.parse::<DateTime<Utc>>()) {
                (Ok(a), Ok(b)) => a.cmp(&b),
                _ => a.cmp(b),
            }
        }
        _ => rank(left).cmp(&rank(right)),
    }
}

/// Token under which a field value is stored in an equality index.
pub fn index_token(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// One staged write.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum BatchOp {
    /// Create or replace the whole document.
    Set { path: DocPath, fields: Fields },
    /// Merge fields into an existing document; the batch fails if it is absent.
    Update { path: DocPath, fields: Fields },
    /// Remove the document; absent documents are a no-op.
    Delete { path: DocPath },
}

impl BatchOp {
    pub fn path(&self) -> &DocPath {
        match self {
            BatchOp::Set { path, .. } | BatchOp::Update { path, .. } | BatchOp::Delete { path } => path,
        }
    }
}

/// Staged writes committed all-or-nothing by [`DocumentStore::commit`].
///
/// Building a batch performs no I/O; dropping it without committing has no
/// effect on the store.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct WriteBatch {
    ops: Vec<BatchOp>,
    preconditions: Vec<DocPath>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, path: DocPath, fields: Fields) -> &mut Self {
        self.ops.push(BatchOp::Set { path, fields });
        self
    }

    pub fn set_record<T: Record>(&mut self, record: &T) -> Result<&mut Self, StoreError> {
        let fields = record.to_fields()?;
        Ok(self.set(record.path(), fields))
    }

    pub fn update(&mut self, path: DocPath, fields: Fields) -> &mut Self {
        self.ops.push(BatchOp::Update { path, fields });
        self
    }

    pub fn delete(&mut self, path: DocPath) -> &mut Self {
        self.ops.push(BatchOp::Delete { path });
        self
    }

    /// Abort the whole batch at commit time unless `path` exists.
    pub fn require_exists(&mut self, path: DocPath) -> &mut Self {
        self.preconditions.push(path);
        self
    }

    pub fn ops(&self) -> &[BatchOp] {
        &self.ops
    }

    pub fn preconditions(&self) -> &[DocPath] {
        &self.preconditions
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Splits into batches of at most `max_ops` operations, in order.
    /// Every chunk keeps the preconditions.
    pub fn into_chunks(self, max_ops: usize) -> Vec<WriteBatch> {
        let max_ops = max_ops.max(1);
        if self.ops.len() <= max_ops {
            return vec![self];
        }
        let preconditions = self.preconditions;
        self.ops
            .chunks(max_ops)
            .map(|chunk| WriteBatch {
                ops: chunk.to_vec(),
                preconditions: preconditions.clone(),
            })
            .collect()
    }
}

/// Store client injected into every controller.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn get(&self, path: &DocPath) -> Result<Option<Document>, StoreError>;

    async fn query(&self, query: &Query) -> Result<Vec<Document>, StoreError>;

    /// Apply every staged operation atomically, or none of them.
    async fn commit(&self, batch: WriteBatch) -> Result<(), StoreError>;

    fn batch(&self) -> WriteBatch {
        WriteBatch::new()
    }

    async fn set(&self, path: &DocPath, fields: Fields) -> Result<(), StoreError> {
        let mut batch = self.batch();
        batch.set(path.clone(), fields);
        self.commit(batch).await
    }

    async fn update(&self, path: &DocPath, fields: Fields) -> Result<(), StoreError> {
        let mut batch = self.batch();
        batch.update(path.clone(), fields);
        self.commit(batch).await
    }

    async fn delete(&self, path: &DocPath) -> Result<(), StoreError> {
        let mut batch = self.batch();
        batch.delete(path.clone());
        self.commit(batch).await
    }
}

/// Typed helpers over any [`DocumentStore`].
#[async_trait]
pub trait RecordStoreExt: DocumentStore {
    async fn get_record<T>(&self, id: &str) -> Result<Option<T>, StoreError>
    where
        T: Record + Send,
    {
        match self.get(&DocPath::new(T::COLLECTION, id)).await? {
            Some(document) => Ok(Some(document.decode()?)),
            None => Ok(None),
        }
    }

    async fn query_records<T>(&self, query: &Query) -> Result<Vec<T>, StoreError>
    where
        T: Record + Send,
    {
        self.query(query).await?.iter().map(Document::decode).collect()
    }

    async fn set_record<T>(&self, record: &T) -> Result<(), StoreError>
    where
        T: Record + Sync,
    {
        self.set(&record.path(), record.to_fields()?).await
    }
}

impl<S: DocumentStore + ?Sized> RecordStoreExt for S {}
