#![allow(dead_code)]

pub(crate) use chrono::{Duration, Utc};
pub(crate) use screamline::{
    ChangeEvent, Collection, Comment, DocPath, DocumentStore, Fields, Like, MemoryEventFeed, MemoryStore, Notification,
    NotificationType, Query, Record, RecordStoreExt, Scream, TriggerOutcome, TriggerSettings, Triggers, User, Worker,
    actions::{self, Identity},
    errors::{ActionError, StoreError},
    types::ActivityRef,
    worker::ProcessedEvent,
};
pub(crate) use serde_json::Value;
pub(crate) use std::sync::Arc;

pub(crate) struct Fixture {
    pub(crate) store: Arc<MemoryStore>,
    pub(crate) triggers: Triggers,
}

impl Fixture {
    pub(crate) fn new() -> Self {
        Self::with_settings(TriggerSettings::default())
    }

    pub(crate) fn with_settings(settings: TriggerSettings) -> Self {
        let store = Arc::new(MemoryStore::new());
        let triggers = Triggers::new(store.clone(), settings);
        Self { store, triggers }
    }

    pub(crate) fn seed_user(&self, handle: &str, image_url: &str) -> User {
        let user = user(handle, image_url);
        self.store
            .seed(user.path(), user.to_fields().expect("user fields"))
            .expect("seed user");
        user
    }

    pub(crate) fn seed_scream(&self, id: &str, owner: &str) -> Scream {
        let scream = Scream {
            id: id.to_string(),
            user_handle: owner.to_string(),
            body: format!("scream {id}"),
            created_at: Utc::now(),
            user_image: format!("https://img/{owner}-old.png"),
            like_count: 0,
            comment_count: 0,
        };
        self.store
            .seed(scream.path(), scream.to_fields().expect("scream fields"))
            .expect("seed scream");
        scream
    }

    pub(crate) fn seed_referencing(&self, collection: Collection, id: &str, scream_id: &str) {
        let mut fields = Fields::new();
        fields.insert("screamId".into(), Value::from(scream_id));
        fields.insert("userHandle".into(), Value::from("someone"));
        self.store
            .seed(DocPath::new(collection, id), fields)
            .expect("seed dependent");
    }

    pub(crate) async fn referencing(&self, collection: Collection, scream_id: &str) -> usize {
        self.store
            .query(&Query::collection(collection).where_eq("screamId", scream_id))
            .await
            .expect("query dependents")
            .len()
    }

    pub(crate) async fn notification(&self, id: &str) -> Option<Notification> {
        self.store.get_record::<Notification>(id).await.expect("get notification")
    }

    pub(crate) async fn scream(&self, id: &str) -> Option<Scream> {
        self.store.get_record::<Scream>(id).await.expect("get scream")
    }
}

pub(crate) fn user(handle: &str, image_url: &str) -> User {
    User {
        handle: handle.to_string(),
        email: format!("{handle}@example.com"),
        created_at: Utc::now(),
        image_url: image_url.to_string(),
        user_id: format!("uid-{handle}"),
        bio: None,
        website: None,
        location: None,
    }
}

pub(crate) fn like(id: &str, scream_id: &str, handle: &str) -> Like {
    Like {
        id: id.to_string(),
        scream_id: scream_id.to_string(),
        user_handle: handle.to_string(),
    }
}

pub(crate) fn comment(id: &str, scream_id: &str, handle: &str) -> Comment {
    Comment {
        id: id.to_string(),
        scream_id: scream_id.to_string(),
        user_handle: handle.to_string(),
        body: "nice".to_string(),
        created_at: Utc::now(),
    }
}

pub(crate) fn created<T: Record>(record: &T) -> ChangeEvent {
    ChangeEvent::created(record.path(), record.to_fields().expect("fields"))
}

pub(crate) fn deleted<T: Record>(record: &T) -> ChangeEvent {
    ChangeEvent::deleted(record.path(), record.to_fields().expect("fields"))
}

pub(crate) fn updated(before: &User, after: &User) -> ChangeEvent {
    ChangeEvent::updated(
        before.path(),
        before.to_fields().expect("before fields"),
        after.to_fields().expect("after fields"),
    )
}

/// Runs the worker over buffered events until no new change is produced.
pub(crate) async fn settle(worker: &Worker<MemoryEventFeed>) -> Vec<ProcessedEvent> {
    let mut processed = Vec::new();
    loop {
        let deliveries = worker.source().drain().await;
        if deliveries.is_empty() {
            return processed;
        }
        processed.extend(worker.process(deliveries).await.expect("process batch"));
    }
}
