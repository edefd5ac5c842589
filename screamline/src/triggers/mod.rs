//! Reactive consistency triggers.
//!
//! Each controller reacts to one class of document change, reads what it needs
//! from the injected [`DocumentStore`], stages its writes into a
//! [`WriteBatch`] and commits once. Nothing is written before that final
//! commit, so an invocation aborted midway leaves no trace, and every
//! controller is safe to run again for the same event.
//!
//! | event                | controller                |
//! |----------------------|---------------------------|
//! | `likes.created`      | [`NotificationFanout`]    |
//! | `comments.created`   | [`NotificationFanout`]    |
//! | `likes.deleted`      | [`NotificationFanout`]    |
//! | `screams.deleted`    | [`CascadeDeletion`]       |
//! | `users.updated`      | [`ImagePropagation`]      |
//!
//! Failures are logged and reported as [`TriggerOutcome::Failed`]; nothing is
//! re-raised because an event has no caller to report to.

mod cascade;
mod images;
mod notifications;

pub use cascade::CascadeDeletion;
pub use images::ImagePropagation;
pub use notifications::{FanoutPlan, NotificationFanout};

use std::sync::Arc;

use log::{debug, error, warn};
use serde::{Deserialize, Serialize};

use crate::{
    errors::StoreError,
    events::{ChangeEvent, ChangeKind, TriggerKey},
    store::{DocumentStore, WriteBatch},
    types::{ActivityRef, Collection, Comment, Like, NotificationType, UserImage},
};

/// Largest batch most document stores accept in one commit.
pub const DEFAULT_MAX_BATCH_WRITES: usize = 500;

/// Events with a registered handler; anything else is ignored.
pub const HANDLED_EVENTS: [TriggerKey; 5] = [
    TriggerKey::new(Collection::Likes, ChangeKind::Created),
    TriggerKey::new(Collection::Likes, ChangeKind::Deleted),
    TriggerKey::new(Collection::Comments, ChangeKind::Created),
    TriggerKey::new(Collection::Screams, ChangeKind::Deleted),
    TriggerKey::new(Collection::Users, ChangeKind::Updated),
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerSettings {
    /// Cap on operations per committed batch; larger plans commit in chunks.
    #[serde(default = "default_max_batch_writes")]
    pub max_batch_writes: usize,
    /// Commit notifications only if their scream still exists at commit time.
    #[serde(default)]
    pub guard_notification_writes: bool,
}

fn default_max_batch_writes() -> usize {
    DEFAULT_MAX_BATCH_WRITES
}

impl Default for TriggerSettings {
    fn default() -> Self {
        Self {
            max_batch_writes: default_max_batch_writes(),
            guard_notification_writes: false,
        }
    }
}

/// What a trigger invocation did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TriggerOutcome {
    NotificationCreated { id: String },
    NotificationDeleted { id: String },
    /// The actor owns the scream; self actions never notify.
    SelfActionSkipped,
    /// The referenced scream does not exist (orphaned like or comment).
    ScreamMissing { scream_id: String },
    CascadeCompleted { scream_id: String, deleted: usize, chunks: usize },
    ImageUnchanged,
    ImagePropagated { handle: String, screams: usize },
    /// No handler for this collection and change kind.
    Ignored,
    /// `transient` marks store outages and rejected commits, which a later
    /// replay of the same event can fix.
    Failed { reason: String, transient: bool },
}

impl TriggerOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, TriggerOutcome::Failed { .. })
    }

    pub fn label(&self) -> &'static str {
        match self {
            TriggerOutcome::NotificationCreated { .. } => "notification_created",
            TriggerOutcome::NotificationDeleted { .. } => "notification_deleted",
            TriggerOutcome::SelfActionSkipped => "self_action_skipped",
            TriggerOutcome::ScreamMissing { .. } => "scream_missing",
            TriggerOutcome::CascadeCompleted { .. } => "cascade_completed",
            TriggerOutcome::ImageUnchanged => "image_unchanged",
            TriggerOutcome::ImagePropagated { .. } => "image_propagated",
            TriggerOutcome::Ignored => "ignored",
            TriggerOutcome::Failed { .. } => "failed",
        }
    }

    pub(crate) fn failed(context: &str, err: &StoreError) -> Self {
        let transient = err.is_transient();
        if transient {
            warn!("{context}: {err}");
        } else {
            error!("{context}: {err}");
        }
        TriggerOutcome::Failed {
            reason: format!("{context}: {err}"),
            transient,
        }
    }
}

/// Commits `batch` in chunks of at most `max_ops`, stopping at the first failure.
///
/// Returns the number of chunks committed. A plan that fits in one chunk is
/// committed as a single atomic batch.
pub(crate) async fn commit_chunked(
    store: &dyn DocumentStore,
    batch: WriteBatch,
    max_ops: usize,
) -> Result<usize, ChunkFailure> {
    let chunks = batch.into_chunks(max_ops);
    let total = chunks.len();
    for (committed, chunk) in chunks.into_iter().enumerate() {
        let ops = chunk.len();
        if let Err(source) = store.commit(chunk).await {
            return Err(ChunkFailure {
                committed,
                total,
                source,
            });
        }
        debug!("committed chunk {}/{total} ({ops} ops)", committed + 1);
    }
    Ok(total)
}

#[derive(Debug)]
pub(crate) struct ChunkFailure {
    pub committed: usize,
    pub total: usize,
    pub source: StoreError,
}

/// Routes change events to the controllers.
#[derive(Clone)]
pub struct Triggers {
    notifications: NotificationFanout,
    cascade: CascadeDeletion,
    images: ImagePropagation,
}

impl Triggers {
    pub fn new(store: Arc<dyn DocumentStore>, settings: TriggerSettings) -> Self {
        Self {
            notifications: NotificationFanout::new(store.clone(), settings.clone()),
            cascade: CascadeDeletion::new(store.clone(), settings.clone()),
            images: ImagePropagation::new(store, settings),
        }
    }

    pub fn handles(key: TriggerKey) -> bool {
        HANDLED_EVENTS.contains(&key)
    }

    pub fn notifications(&self) -> &NotificationFanout {
        &self.notifications
    }

    pub fn cascade(&self) -> &CascadeDeletion {
        &self.cascade
    }

    pub fn images(&self) -> &ImagePropagation {
        &self.images
    }

    /// Runs the handler registered for the event, if any. Never fails.
    pub async fn dispatch(&self, event: &ChangeEvent) -> TriggerOutcome {
        let key = event.key();
        match (event.collection, event.kind) {
            (Collection::Likes, ChangeKind::Created) => match event.after_as::<Like>() {
                Ok(like) => {
                    self.notifications
                        .handle_create(NotificationType::Like, &ActivityRef::from(&like))
                        .await
                }
                Err(err) => TriggerOutcome::failed(&format!("decoding {key} {}", event.path()), &err),
            },
            (Collection::Comments, ChangeKind::Created) => match event.after_as::<Comment>() {
                Ok(comment) => {
                    self.notifications
                        .handle_create(NotificationType::Comment, &ActivityRef::from(&comment))
                        .await
                }
                Err(err) => TriggerOutcome::failed(&format!("decoding {key} {}", event.path()), &err),
            },
            (Collection::Likes, ChangeKind::Deleted) => match event.before_as::<Like>() {
                Ok(like) => self.notifications.handle_delete(&ActivityRef::from(&like)).await,
                Err(err) => TriggerOutcome::failed(&format!("decoding {key} {}", event.path()), &err),
            },
            (Collection::Screams, ChangeKind::Deleted) => self.cascade.handle_scream_delete(&event.document_id).await,
            (Collection::Users, ChangeKind::Updated) => {
                match (event.before_as::<UserImage>(), event.after_as::<UserImage>()) {
                    (Ok(before), Ok(after)) => self.images.handle_user_update(&before, &after).await,
                    (Err(err), _) | (_, Err(err)) => {
                        TriggerOutcome::failed(&format!("decoding {key} {}", event.path()), &err)
                    }
                }
            }
            _ => {
                debug!("no trigger for {key} {}", event.path());
                TriggerOutcome::Ignored
            }
        }
    }
}
