use std::sync::Arc;

use log::{debug, info, warn};
use serde_json::Value;

use super::{TriggerOutcome, TriggerSettings, commit_chunked};
use crate::{
    errors::StoreError,
    store::{DocumentStore, Query, WriteBatch},
    types::{Collection, Fields, UserImage},
};

/// Keeps `screams.userImage` in step with `users.imageUrl`.
#[derive(Clone)]
pub struct ImagePropagation {
    store: Arc<dyn DocumentStore>,
    settings: TriggerSettings,
}

impl ImagePropagation {
    pub fn new(store: Arc<dyn DocumentStore>, settings: TriggerSettings) -> Self {
        Self { store, settings }
    }

    /// Stages `userImage = image_url` on every scream authored by `handle`.
    pub async fn plan(&self, handle: &str, image_url: &str) -> Result<WriteBatch, StoreError> {
        let screams = self
            .store
            .query(&Query::collection(Collection::Screams).where_eq("userHandle", handle))
            .await?;
        let mut batch = self.store.batch();
        for scream in screams {
            let mut fields = Fields::new();
            fields.insert("userImage".into(), Value::from(image_url));
            batch.update(scream.path, fields);
        }
        Ok(batch)
    }

    /// Handles `users.updated`. Edits that keep `imageUrl` perform no I/O.
    ///
    /// A snapshot after the change without any `imageUrl` has nothing to copy
    /// and counts as unchanged.
    pub async fn handle_user_update(&self, before: &UserImage, after: &UserImage) -> TriggerOutcome {
        let Some(image_url) = after.image_url.as_deref() else {
            debug!("user {} updated without an imageUrl", after.handle);
            return TriggerOutcome::ImageUnchanged;
        };
        if before.image_url.as_deref() == Some(image_url) {
            debug!("user {} updated without an image change", before.handle);
            return TriggerOutcome::ImageUnchanged;
        }
        info!("user {} changed image", after.handle);
        self.propagate(&after.handle, image_url).await
    }

    /// Rewrites the image on all of `handle`'s screams regardless of what changed.
    pub async fn propagate(&self, handle: &str, image_url: &str) -> TriggerOutcome {
        let batch = match self.plan(handle, image_url).await {
            Ok(batch) => batch,
            Err(err) => return TriggerOutcome::failed(&format!("listing screams of {handle}"), &err),
        };
        let screams = batch.len();
        if batch.is_empty() {
            return TriggerOutcome::ImagePropagated {
                handle: handle.to_string(),
                screams: 0,
            };
        }

        match commit_chunked(self.store.as_ref(), batch, self.settings.max_batch_writes).await {
            Ok(_) => {
                info!("user {handle} image copied to {screams} scream(s)");
                TriggerOutcome::ImagePropagated {
                    handle: handle.to_string(),
                    screams,
                }
            }
            Err(failure) => {
                if failure.committed > 0 {
                    warn!(
                        "user {handle} image partially propagated: {}/{} batches committed",
                        failure.committed, failure.total
                    );
                }
                TriggerOutcome::failed(&format!("propagating image of {handle}"), &failure.source)
            }
        }
    }
}
