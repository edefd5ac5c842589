use std::sync::Arc;

use chrono::Utc;
use log::{debug, info};

use super::{TriggerOutcome, TriggerSettings};
use crate::{
    errors::StoreError,
    store::{DocumentStore, RecordStoreExt, WriteBatch},
    types::{ActivityRef, Collection, DocPath, Notification, NotificationType, Record, ScreamOwner},
};

/// What a like or comment creation should do to the notifications collection.
#[derive(Debug, Clone, PartialEq)]
pub enum FanoutPlan {
    Write { batch: WriteBatch, notification: Notification },
    SelfAction,
    ScreamMissing { scream_id: String },
}

/// Derives one notification per like or comment, keyed by the activity id.
///
/// The deterministic id makes redelivery harmless: a retried creation
/// overwrites the same document with the same content.
#[derive(Clone)]
pub struct NotificationFanout {
    store: Arc<dyn DocumentStore>,
    settings: TriggerSettings,
}

impl NotificationFanout {
    pub fn new(store: Arc<dyn DocumentStore>, settings: TriggerSettings) -> Self {
        Self { store, settings }
    }

    pub async fn plan_create(&self, kind: NotificationType, activity: &ActivityRef) -> Result<FanoutPlan, StoreError> {
        let Some(scream) = self.store.get_record::<ScreamOwner>(&activity.scream_id).await? else {
            return Ok(FanoutPlan::ScreamMissing {
                scream_id: activity.scream_id.clone(),
            });
        };
        if scream.user_handle == activity.user_handle {
            return Ok(FanoutPlan::SelfAction);
        }

        let notification = Notification {
            id: activity.id.clone(),
            recipient: scream.user_handle.clone(),
            sender: activity.user_handle.clone(),
            kind,
            scream_id: scream.id.clone(),
            created_at: Utc::now(),
            read: false,
        };
        let mut batch = self.store.batch();
        if self.settings.guard_notification_writes {
            batch.require_exists(scream.path());
        }
        batch.set_record(&notification)?;
        Ok(FanoutPlan::Write { batch, notification })
    }

    /// Handles `likes.created` and `comments.created`.
    pub async fn handle_create(&self, kind: NotificationType, activity: &ActivityRef) -> TriggerOutcome {
        let plan = match self.plan_create(kind, activity).await {
            Ok(plan) => plan,
            Err(err) => return TriggerOutcome::failed(&format!("reading scream for {kind} {}", activity.id), &err),
        };

        match plan {
            FanoutPlan::ScreamMissing { scream_id } => {
                debug!("{kind} {} references missing scream {scream_id}; no notification", activity.id);
                TriggerOutcome::ScreamMissing { scream_id }
            }
            FanoutPlan::SelfAction => {
                debug!("{kind} {} by scream owner {}; no notification", activity.id, activity.user_handle);
                TriggerOutcome::SelfActionSkipped
            }
            FanoutPlan::Write { batch, notification } => match self.store.commit(batch).await {
                Ok(()) => {
                    info!(
                        "notification {} ({kind}) {} -> {} on scream {}",
                        notification.id, notification.sender, notification.recipient, notification.scream_id
                    );
                    TriggerOutcome::NotificationCreated { id: notification.id }
                }
                Err(StoreError::PreconditionFailed { .. }) => {
                    debug!(
                        "scream {} deleted before notification {} was written",
                        notification.scream_id, notification.id
                    );
                    TriggerOutcome::ScreamMissing {
                        scream_id: notification.scream_id,
                    }
                }
                Err(err) => TriggerOutcome::failed(&format!("writing notification {}", notification.id), &err),
            },
        }
    }

    /// Handles `likes.deleted`. A missing notification counts as deleted.
    pub async fn handle_delete(&self, activity: &ActivityRef) -> TriggerOutcome {
        let path = DocPath::new(Collection::Notifications, activity.id.clone());
        match self.store.delete(&path).await {
            Ok(()) => {
                info!("notification {} removed after unlike", activity.id);
                TriggerOutcome::NotificationDeleted {
                    id: activity.id.clone(),
                }
            }
            Err(err) => TriggerOutcome::failed(&format!("deleting {path}"), &err),
        }
    }
}
