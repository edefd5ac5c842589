use std::sync::Arc;

use log::{info, warn};

use super::{TriggerOutcome, TriggerSettings, commit_chunked};
use crate::{
    errors::StoreError,
    store::{DocumentStore, Query, WriteBatch},
    types::Collection,
};

/// Collections holding documents that reference a scream by `screamId`,
/// in the order they are queried.
const DEPENDENT_COLLECTIONS: [Collection; 3] = [Collection::Comments, Collection::Likes, Collection::Notifications];

/// Removes every comment, like and notification of a deleted scream.
#[derive(Clone)]
pub struct CascadeDeletion {
    store: Arc<dyn DocumentStore>,
    settings: TriggerSettings,
}

impl CascadeDeletion {
    pub fn new(store: Arc<dyn DocumentStore>, settings: TriggerSettings) -> Self {
        Self { store, settings }
    }

    /// Stages a delete for every dependent of `scream_id`. Performs reads only.
    pub async fn plan(&self, scream_id: &str) -> Result<WriteBatch, StoreError> {
        let mut batch = self.store.batch();
        for collection in DEPENDENT_COLLECTIONS {
            let dependents = self
                .store
                .query(&Query::collection(collection).where_eq("screamId", scream_id))
                .await?;
            for document in dependents {
                batch.delete(document.path);
            }
        }
        Ok(batch)
    }

    /// Handles `screams.deleted`.
    ///
    /// Plans within `max_batch_writes` commit atomically; larger ones commit
    /// chunk by chunk and stop at the first failed chunk. Running it again
    /// finishes the job.
    pub async fn handle_scream_delete(&self, scream_id: &str) -> TriggerOutcome {
        let batch = match self.plan(scream_id).await {
            Ok(batch) => batch,
            Err(err) => return TriggerOutcome::failed(&format!("collecting dependents of scream {scream_id}"), &err),
        };
        let deleted = batch.len();
        if batch.is_empty() {
            info!("scream {scream_id} deleted with no dependents");
            return TriggerOutcome::CascadeCompleted {
                scream_id: scream_id.to_string(),
                deleted: 0,
                chunks: 0,
            };
        }

        match commit_chunked(self.store.as_ref(), batch, self.settings.max_batch_writes).await {
            Ok(chunks) => {
                info!("scream {scream_id} cascade removed {deleted} dependents in {chunks} batch(es)");
                TriggerOutcome::CascadeCompleted {
                    scream_id: scream_id.to_string(),
                    deleted,
                    chunks,
                }
            }
            Err(failure) => {
                if failure.committed > 0 {
                    warn!(
                        "scream {scream_id} cascade partially applied: {}/{} batches committed",
                        failure.committed, failure.total
                    );
                }
                TriggerOutcome::failed(&format!("cascade for scream {scream_id}"), &failure.source)
            }
        }
    }
}
