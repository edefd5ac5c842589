use std::time::Duration as StdDuration;

use async_trait::async_trait;
use screamline::{WriteBatch, worker::Delivery};

use super::support::*;

/// Memory store whose reads lag, so a handler that reads first finishes late.
struct SlowReads {
    inner: Arc<MemoryStore>,
    delay: StdDuration,
}

#[async_trait]
impl DocumentStore for SlowReads {
    async fn get(&self, path: &DocPath) -> Result<Option<screamline::Document>, StoreError> {
        tokio::time::sleep(self.delay).await;
        self.inner.get(path).await
    }

    async fn query(&self, query: &Query) -> Result<Vec<screamline::Document>, StoreError> {
        self.inner.query(query).await
    }

    async fn commit(&self, batch: WriteBatch) -> Result<(), StoreError> {
        self.inner.commit(batch).await
    }
}

fn worker(fx: &Fixture) -> Worker<MemoryEventFeed> {
    Worker::new(MemoryEventFeed::new(fx.store.subscribe()), fx.triggers.clone())
}

fn outcomes<'a>(processed: &'a [ProcessedEvent], trigger: &str) -> Vec<&'a TriggerOutcome> {
    processed
        .iter()
        .filter(|event| event.trigger == trigger)
        .map(|event| &event.outcome)
        .collect()
}

#[tokio::test]
async fn like_then_delete_flows_through_the_worker() {
    let fx = Fixture::new();
    let worker = worker(&fx);
    fx.seed_user("alice", "https://img/alice.png");
    fx.seed_user("bob", "https://img/bob.png");
    let alice = Identity::new("alice", "uid-alice");
    let bob = Identity::new("bob", "uid-bob");

    let scream = actions::post_scream(fx.store.as_ref(), &alice, "hello").await.unwrap();
    actions::like_scream(fx.store.as_ref(), &bob, &scream.id).await.unwrap();
    actions::comment_on_scream(fx.store.as_ref(), &bob, &scream.id, "hi")
        .await
        .unwrap();
    let processed = settle(&worker).await;

    assert!(processed.iter().all(|event| !event.outcome.is_failure()));
    assert_eq!(outcomes(&processed, "likes.created").len(), 1);
    let notifications = fx.store.documents(Collection::Notifications).unwrap();
    assert_eq!(notifications.len(), 2);
    assert!(notifications.iter().all(|doc| doc.get_str("recipient") == Some("alice")));

    actions::delete_scream(fx.store.as_ref(), &alice, &scream.id).await.unwrap();
    let processed = settle(&worker).await;

    assert!(matches!(
        outcomes(&processed, "screams.deleted")[..],
        [TriggerOutcome::CascadeCompleted { deleted: 4, .. }]
    ));
    assert!(fx.store.documents(Collection::Notifications).unwrap().is_empty());
    assert!(fx.store.documents(Collection::Likes).unwrap().is_empty());
    assert!(fx.store.documents(Collection::Comments).unwrap().is_empty());
}

#[tokio::test]
async fn unlike_removes_the_notification_through_the_worker() {
    let fx = Fixture::new();
    let worker = worker(&fx);
    fx.seed_user("bob", "https://img/bob.png");
    fx.seed_scream("S1", "alice");
    let bob = Identity::new("bob", "uid-bob");

    actions::like_scream(fx.store.as_ref(), &bob, "S1").await.unwrap();
    settle(&worker).await;
    assert_eq!(fx.store.documents(Collection::Notifications).unwrap().len(), 1);

    actions::unlike_scream(fx.store.as_ref(), &bob, "S1").await.unwrap();
    let processed = settle(&worker).await;

    assert!(matches!(
        outcomes(&processed, "likes.deleted")[..],
        [TriggerOutcome::NotificationDeleted { .. }]
    ));
    assert!(fx.store.documents(Collection::Notifications).unwrap().is_empty());
}

#[tokio::test]
async fn image_change_flows_through_the_worker() {
    let fx = Fixture::new();
    let worker = worker(&fx);
    fx.seed_user("alice", "https://img/alice-old.png");
    fx.seed_scream("S1", "alice");
    fx.seed_scream("S2", "alice");
    let alice = Identity::new("alice", "uid-alice");

    actions::set_user_image(fx.store.as_ref(), &alice, "https://img/alice-new.png")
        .await
        .unwrap();
    let processed = settle(&worker).await;

    assert_eq!(
        outcomes(&processed, "users.updated"),
        vec![&TriggerOutcome::ImagePropagated {
            handle: "alice".to_string(),
            screams: 2
        }]
    );
    assert_eq!(outcomes(&processed, "screams.updated"), vec![&TriggerOutcome::Ignored; 2]);
    assert_eq!(fx.scream("S2").await.unwrap().user_image, "https://img/alice-new.png");
}

#[tokio::test]
async fn duplicate_deliveries_in_one_batch_converge() {
    let fx = Fixture::new();
    let worker = worker(&fx);
    fx.seed_scream("S1", "alice");
    let event = created(&like("L1", "S1", "bob"));
    let deliveries = (0..4)
        .map(|idx| screamline::worker::Delivery {
            id: format!("dup-{idx}"),
            event: event.clone(),
        })
        .collect();

    let processed = worker.process(deliveries).await.unwrap();

    assert_eq!(processed.len(), 4);
    assert!(processed.iter().all(|event| !event.outcome.is_failure()));
    let notifications = fx.store.documents(Collection::Notifications).unwrap();
    assert_eq!(notifications.len(), 1);
    assert_eq!(notifications[0].id(), "L1");
}

#[tokio::test]
async fn run_until_stops_on_shutdown() {
    let fx = Fixture::new();
    let worker = worker(&fx).with_retry_delay(StdDuration::from_millis(10));
    fx.seed_scream("S1", "alice");
    fx.store.set_record(&like("L1", "S1", "bob")).await.unwrap();

    let stats = worker.run_until(tokio::time::sleep(StdDuration::from_millis(100))).await;

    assert_eq!(stats.failures, 0);
    assert!(stats.events >= 2, "like plus the notification it produced");
    assert!(fx.notification("L1").await.is_some());
}

#[tokio::test]
async fn like_and_unlike_in_one_batch_run_in_order() {
    let store = Arc::new(MemoryStore::new());
    let slow: Arc<dyn DocumentStore> = Arc::new(SlowReads {
        inner: store.clone(),
        delay: StdDuration::from_millis(20),
    });
    let worker = Worker::new(
        MemoryEventFeed::new(store.subscribe()),
        Triggers::new(slow, TriggerSettings::default()),
    );
    let fx = Fixture {
        triggers: Triggers::new(store.clone(), TriggerSettings::default()),
        store,
    };
    fx.seed_scream("S1", "alice");
    let liked = like("L1", "S1", "bob");
    let deliveries = vec![
        Delivery {
            id: "1-0".to_string(),
            event: created(&liked),
        },
        Delivery {
            id: "2-0".to_string(),
            event: deleted(&liked),
        },
    ];

    let processed = worker.process(deliveries).await.unwrap();

    let order: Vec<_> = processed.iter().map(|event| event.trigger.as_str()).collect();
    assert_eq!(order, vec!["likes.created", "likes.deleted"]);
    assert!(fx.notification("L1").await.is_none(), "unlike must leave no notification");
}

#[tokio::test]
async fn different_documents_share_a_batch() {
    let fx = Fixture::new();
    let worker = worker(&fx);
    fx.seed_scream("S1", "alice");
    let deliveries = ["L1", "L2", "L3"]
        .into_iter()
        .enumerate()
        .map(|(idx, id)| Delivery {
            id: format!("{idx}-0"),
            event: created(&like(id, "S1", "bob")),
        })
        .collect();

    let processed = worker.process(deliveries).await.unwrap();

    assert_eq!(processed.len(), 3);
    assert_eq!(fx.store.documents(Collection::Notifications).unwrap().len(), 3);
}
