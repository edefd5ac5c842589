use super::support::*;

fn seed_scream_with_activity(fx: &Fixture, scream_id: &str) {
    fx.seed_scream(scream_id, "alice");
    fx.seed_referencing(Collection::Comments, &format!("C-{scream_id}"), scream_id);
    fx.seed_referencing(Collection::Likes, &format!("L-{scream_id}"), scream_id);
    fx.seed_referencing(Collection::Notifications, &format!("L-{scream_id}"), scream_id);
}

async fn delete_scream(fx: &Fixture, scream_id: &str) -> TriggerOutcome {
    let scream = fx.scream(scream_id).await.expect("scream exists");
    fx.store.delete(&scream.path()).await.unwrap();
    fx.triggers.dispatch(&deleted(&scream)).await
}

#[tokio::test]
async fn deleting_scream_removes_every_dependent() {
    let fx = Fixture::new();
    seed_scream_with_activity(&fx, "S1");

    let outcome = delete_scream(&fx, "S1").await;
    assert_eq!(
        outcome,
        TriggerOutcome::CascadeCompleted {
            scream_id: "S1".to_string(),
            deleted: 3,
            chunks: 1
        }
    );
    for collection in [Collection::Comments, Collection::Likes, Collection::Notifications] {
        assert_eq!(fx.referencing(collection, "S1").await, 0, "{collection} left behind");
    }
    assert_eq!(fx.store.commit_count(), 2, "scream delete plus one cascade batch");
}

#[tokio::test]
async fn other_screams_keep_their_dependents() {
    let fx = Fixture::new();
    seed_scream_with_activity(&fx, "S1");
    seed_scream_with_activity(&fx, "S2");

    delete_scream(&fx, "S1").await;

    assert!(fx.scream("S2").await.is_some());
    for collection in [Collection::Comments, Collection::Likes, Collection::Notifications] {
        assert_eq!(fx.referencing(collection, "S2").await, 1);
    }
}

#[tokio::test]
async fn failed_commit_leaves_all_dependents() {
    let fx = Fixture::new();
    seed_scream_with_activity(&fx, "S1");
    let scream = fx.scream("S1").await.unwrap();
    fx.store.delete(&scream.path()).await.unwrap();

    fx.store.fail_commits(true);
    let outcome = fx.triggers.dispatch(&deleted(&scream)).await;
    fx.store.fail_commits(false);

    assert!(outcome.is_failure());
    for collection in [Collection::Comments, Collection::Likes, Collection::Notifications] {
        assert_eq!(fx.referencing(collection, "S1").await, 1);
    }
}

#[tokio::test]
async fn rerun_after_failure_finishes_the_job() {
    let fx = Fixture::new();
    seed_scream_with_activity(&fx, "S1");
    let scream = fx.scream("S1").await.unwrap();
    fx.store.delete(&scream.path()).await.unwrap();

    fx.store.fail_commits(true);
    assert!(fx.triggers.dispatch(&deleted(&scream)).await.is_failure());
    fx.store.fail_commits(false);

    let outcome = fx.triggers.dispatch(&deleted(&scream)).await;
    assert!(matches!(outcome, TriggerOutcome::CascadeCompleted { deleted: 3, .. }));
    assert_eq!(fx.referencing(Collection::Likes, "S1").await, 0);
}

#[tokio::test]
async fn redelivered_delete_finds_nothing_left() {
    let fx = Fixture::new();
    seed_scream_with_activity(&fx, "S1");
    let scream = fx.scream("S1").await.unwrap();
    fx.store.delete(&scream.path()).await.unwrap();

    fx.triggers.dispatch(&deleted(&scream)).await;
    let commits = fx.store.commit_count();
    let again = fx.triggers.dispatch(&deleted(&scream)).await;

    assert_eq!(
        again,
        TriggerOutcome::CascadeCompleted {
            scream_id: "S1".to_string(),
            deleted: 0,
            chunks: 0
        }
    );
    assert_eq!(fx.store.commit_count(), commits);
}

#[tokio::test]
async fn large_cascades_commit_in_chunks() {
    let fx = Fixture::with_settings(TriggerSettings {
        max_batch_writes: 2,
        ..TriggerSettings::default()
    });
    fx.seed_scream("S1", "alice");
    for idx in 0..3 {
        fx.seed_referencing(Collection::Comments, &format!("C{idx}"), "S1");
    }
    for idx in 0..2 {
        fx.seed_referencing(Collection::Likes, &format!("L{idx}"), "S1");
    }

    let outcome = delete_scream(&fx, "S1").await;
    assert_eq!(
        outcome,
        TriggerOutcome::CascadeCompleted {
            scream_id: "S1".to_string(),
            deleted: 5,
            chunks: 3
        }
    );
    assert_eq!(fx.referencing(Collection::Comments, "S1").await, 0);
    assert_eq!(fx.referencing(Collection::Likes, "S1").await, 0);
}
