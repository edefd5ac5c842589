//! Screamline core library.
//!
//! Change-event triggers that keep derived state of a scream feed consistent
//! with its source documents: notifications for likes and comments, cascade
//! removal of a deleted scream's dependents, and propagation of profile
//! images onto denormalized scream fields.

pub mod actions;
pub mod errors;
pub mod events;
pub mod id;
pub mod keys;
pub mod store;
pub mod triggers;
pub mod types;
pub mod worker;

pub use errors::*;
pub use events::{ChangeEvent, ChangeKind, TriggerKey};
pub use store::{
    DEFAULT_STREAM_MAX_LEN, Document, DocumentStore, MemoryStore, Query, RecordStoreExt, RedisStore, SortOrder, WriteBatch,
};
pub use triggers::{TriggerOutcome, TriggerSettings, Triggers};
pub use types::{Collection, Comment, DocPath, Fields, Like, Notification, NotificationType, Record, Scream, User};
pub use worker::{EventSource, MemoryEventFeed, RedisEventStream, Worker, WorkerSettings};

pub use redis;
pub use redis::aio::ConnectionManager;

/// Deletes every key matching any of `patterns`, e.g. [`RedisStore::key_patterns`].
///
/// Uses SCAN + DEL so a large namespace never blocks Redis.
pub async fn cleanup_keys(conn: &mut ConnectionManager, patterns: &[String]) -> Result<u64, StoreError> {
    const SCAN_COUNT: usize = 1000;
    let mut removed: u64 = 0;

    for pattern in patterns {
        let mut cursor: u64 = 0;
        loop {
            let (next_cursor, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(pattern)
                .arg("COUNT")
                .arg(SCAN_COUNT)
                .query_async(conn)
                .await?;
            if !keys.is_empty() {
                let deleted: u64 = redis::cmd("DEL").arg(&keys).query_async(conn).await?;
                removed += deleted;
            }
            cursor = next_cursor;
            if cursor == 0 {
                break;
            }
        }
    }

    Ok(removed)
}
