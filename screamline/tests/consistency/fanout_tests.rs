use super::support::*;

#[tokio::test]
async fn like_on_someone_elses_scream_notifies_owner() {
    let fx = Fixture::new();
    fx.seed_scream("S1", "alice");

    let outcome = fx.triggers.dispatch(&created(&like("L1", "S1", "bob"))).await;
    assert_eq!(outcome, TriggerOutcome::NotificationCreated { id: "L1".to_string() });

    let notification = fx.notification("L1").await.expect("notification written");
    assert_eq!(notification.recipient, "alice");
    assert_eq!(notification.sender, "bob");
    assert_eq!(notification.kind, NotificationType::Like);
    assert_eq!(notification.scream_id, "S1");
    assert!(!notification.read);
}

#[tokio::test]
async fn redelivered_like_leaves_a_single_notification() {
    let fx = Fixture::new();
    fx.seed_scream("S1", "alice");
    let event = created(&like("L1", "S1", "bob"));

    fx.triggers.dispatch(&event).await;
    fx.triggers.dispatch(&event).await;

    let notifications = fx.store.documents(Collection::Notifications).unwrap();
    assert_eq!(notifications.len(), 1);
    assert_eq!(notifications[0].id(), "L1");
    assert_eq!(notifications[0].get_str("type"), Some("like"));
}

#[tokio::test]
async fn concurrent_redelivery_is_idempotent() {
    let fx = Fixture::new();
    fx.seed_scream("S1", "alice");
    let event = created(&comment("C1", "S1", "bob"));

    let (first, second) = tokio::join!(fx.triggers.dispatch(&event), fx.triggers.dispatch(&event));
    assert!(!first.is_failure() && !second.is_failure());
    assert_eq!(fx.store.documents(Collection::Notifications).unwrap().len(), 1);
}

#[tokio::test]
async fn owner_liking_own_scream_writes_nothing() {
    let fx = Fixture::new();
    fx.seed_scream("S1", "alice");

    let outcome = fx.triggers.dispatch(&created(&like("L1", "S1", "alice"))).await;
    assert_eq!(outcome, TriggerOutcome::SelfActionSkipped);
    assert!(fx.notification("L1").await.is_none());
    assert_eq!(fx.store.write_count(), 0);
}

#[tokio::test]
async fn like_on_missing_scream_is_an_orphan_no_op() {
    let fx = Fixture::new();

    let outcome = fx.triggers.dispatch(&created(&like("L1", "gone", "bob"))).await;
    assert_eq!(
        outcome,
        TriggerOutcome::ScreamMissing {
            scream_id: "gone".to_string()
        }
    );
    assert_eq!(fx.store.write_count(), 0);
}

#[tokio::test]
async fn comment_notification_has_comment_type() {
    let fx = Fixture::new();
    fx.seed_scream("S1", "alice");

    fx.triggers.dispatch(&created(&comment("C1", "S1", "bob"))).await;

    let notification = fx.notification("C1").await.expect("notification written");
    assert_eq!(notification.kind, NotificationType::Comment);
    assert_eq!(notification.recipient, "alice");
}

#[tokio::test]
async fn unlike_removes_notification_and_repeats_harmlessly() {
    let fx = Fixture::new();
    fx.seed_scream("S1", "alice");
    let like = like("L1", "S1", "bob");
    fx.triggers.dispatch(&created(&like)).await;
    assert!(fx.notification("L1").await.is_some());

    let first = fx.triggers.dispatch(&deleted(&like)).await;
    let second = fx.triggers.dispatch(&deleted(&like)).await;

    assert_eq!(first, TriggerOutcome::NotificationDeleted { id: "L1".to_string() });
    assert_eq!(second, first);
    assert!(fx.notification("L1").await.is_none());
}

#[tokio::test]
async fn unlike_of_self_like_succeeds_without_notification() {
    let fx = Fixture::new();
    fx.seed_scream("S1", "alice");

    let outcome = fx.triggers.dispatch(&deleted(&like("L1", "S1", "alice"))).await;
    assert!(!outcome.is_failure());
    assert_eq!(fx.store.write_count(), 0);
}

#[tokio::test]
async fn failed_write_is_reported_and_leaves_no_notification() {
    let fx = Fixture::new();
    fx.seed_scream("S1", "alice");
    fx.store.fail_commits(true);

    let outcome = fx.triggers.dispatch(&created(&like("L1", "S1", "bob"))).await;
    assert!(outcome.is_failure());

    fx.store.fail_commits(false);
    assert!(fx.notification("L1").await.is_none());
}

#[tokio::test]
async fn guarded_write_skips_when_scream_vanishes_before_commit() {
    let fx = Fixture::with_settings(TriggerSettings {
        guard_notification_writes: true,
        ..TriggerSettings::default()
    });
    fx.seed_scream("S1", "alice");
    let activity = ActivityRef::from(&like("L1", "S1", "bob"));

    let plan = fx
        .triggers
        .notifications()
        .plan_create(NotificationType::Like, &activity)
        .await
        .expect("plan");
    let screamline::triggers::FanoutPlan::Write { batch, .. } = plan else {
        panic!("expected a write plan");
    };

    fx.store.delete(&DocPath::new(Collection::Screams, "S1")).await.unwrap();
    let err = fx.store.commit(batch).await.expect_err("scream is gone");
    assert!(matches!(err, StoreError::PreconditionFailed { .. }));
    assert!(fx.notification("L1").await.is_none());
}

#[tokio::test]
async fn unguarded_write_can_leave_dangling_notification() {
    // The accepted race: a plan made before the scream disappears still commits.
    let fx = Fixture::new();
    fx.seed_scream("S1", "alice");
    let activity = ActivityRef::from(&like("L1", "S1", "bob"));

    let plan = fx
        .triggers
        .notifications()
        .plan_create(NotificationType::Like, &activity)
        .await
        .expect("plan");
    let screamline::triggers::FanoutPlan::Write { batch, .. } = plan else {
        panic!("expected a write plan");
    };

    fx.store.delete(&DocPath::new(Collection::Screams, "S1")).await.unwrap();
    fx.store.commit(batch).await.expect("commit");
    assert!(fx.notification("L1").await.is_some());
}
