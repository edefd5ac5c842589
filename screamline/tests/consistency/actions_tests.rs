use super::support::*;
use screamline::actions::UserDetails;

fn bob() -> Identity {
    Identity::new("bob", "uid-bob")
}

#[tokio::test]
async fn liking_twice_is_rejected() {
    let fx = Fixture::new();
    fx.seed_scream("S1", "alice");

    let scream = actions::like_scream(fx.store.as_ref(), &bob(), "S1").await.unwrap();
    assert_eq!(scream.like_count, 1);

    let err = actions::like_scream(fx.store.as_ref(), &bob(), "S1")
        .await
        .expect_err("second like");
    assert!(matches!(err, ActionError::AlreadyLiked { .. }));
    assert_eq!(fx.scream("S1").await.unwrap().like_count, 1);
    assert_eq!(fx.referencing(Collection::Likes, "S1").await, 1);
}

#[tokio::test]
async fn like_and_counter_commit_together() {
    let fx = Fixture::new();
    fx.seed_scream("S1", "alice");

    actions::like_scream(fx.store.as_ref(), &bob(), "S1").await.unwrap();

    assert_eq!(fx.store.commit_count(), 1);
    assert_eq!(fx.store.write_count(), 2);
}

#[tokio::test]
async fn unlike_without_like_is_rejected() {
    let fx = Fixture::new();
    fx.seed_scream("S1", "alice");

    let err = actions::unlike_scream(fx.store.as_ref(), &bob(), "S1")
        .await
        .expect_err("nothing to unlike");
    assert!(matches!(err, ActionError::NotLiked { .. }));
}

#[tokio::test]
async fn unlike_decrements_counter() {
    let fx = Fixture::new();
    fx.seed_scream("S1", "alice");
    actions::like_scream(fx.store.as_ref(), &bob(), "S1").await.unwrap();

    let scream = actions::unlike_scream(fx.store.as_ref(), &bob(), "S1").await.unwrap();
    assert_eq!(scream.like_count, 0);
    assert_eq!(fx.scream("S1").await.unwrap().like_count, 0);
    assert_eq!(fx.referencing(Collection::Likes, "S1").await, 0);
}

#[tokio::test]
async fn actions_on_missing_scream_are_not_found() {
    let fx = Fixture::new();

    let like = actions::like_scream(fx.store.as_ref(), &bob(), "nope").await;
    let comment = actions::comment_on_scream(fx.store.as_ref(), &bob(), "nope", "hey").await;
    assert!(matches!(like, Err(ActionError::NotFound { .. })));
    assert!(matches!(comment, Err(ActionError::NotFound { .. })));
    assert_eq!(fx.store.write_count(), 0);
}

#[tokio::test]
async fn comment_bumps_comment_count() {
    let fx = Fixture::new();
    fx.seed_scream("S1", "alice");

    let comment = actions::comment_on_scream(fx.store.as_ref(), &bob(), "S1", "loud")
        .await
        .unwrap();

    assert_eq!(comment.scream_id, "S1");
    assert_eq!(comment.user_handle, "bob");
    assert_eq!(fx.scream("S1").await.unwrap().comment_count, 1);
}

#[tokio::test]
async fn only_the_owner_may_delete_a_scream() {
    let fx = Fixture::new();
    fx.seed_scream("S1", "alice");

    let err = actions::delete_scream(fx.store.as_ref(), &bob(), "S1")
        .await
        .expect_err("bob does not own S1");
    assert!(matches!(err, ActionError::Forbidden { .. }));
    assert!(fx.scream("S1").await.is_some());

    actions::delete_scream(fx.store.as_ref(), &Identity::new("alice", "uid-alice"), "S1")
        .await
        .unwrap();
    assert!(fx.scream("S1").await.is_none());
}

#[tokio::test]
async fn posted_scream_carries_author_image() {
    let fx = Fixture::new();
    fx.seed_user("alice", "https://img/alice.png");

    let scream = actions::post_scream(fx.store.as_ref(), &Identity::new("alice", "uid-alice"), "hello")
        .await
        .unwrap();

    assert_eq!(scream.user_image, "https://img/alice.png");
    assert_eq!(fx.scream(&scream.id).await.unwrap().body, "hello");
}

#[tokio::test]
async fn mark_read_updates_each_notification() {
    let fx = Fixture::new();
    fx.seed_scream("S1", "alice");
    fx.triggers.dispatch(&created(&like("L1", "S1", "bob"))).await;
    fx.triggers.dispatch(&created(&comment("C1", "S1", "bob"))).await;

    actions::mark_notifications_read(fx.store.as_ref(), &["L1".to_string(), "C1".to_string()])
        .await
        .unwrap();

    assert!(fx.notification("L1").await.unwrap().read);
    assert!(fx.notification("C1").await.unwrap().read);
}

#[tokio::test]
async fn mark_read_of_unknown_notification_changes_nothing() {
    let fx = Fixture::new();
    fx.seed_scream("S1", "alice");
    fx.triggers.dispatch(&created(&like("L1", "S1", "bob"))).await;

    let result = actions::mark_notifications_read(fx.store.as_ref(), &["L1".to_string(), "gone".to_string()]).await;

    assert!(matches!(result, Err(ActionError::Store(StoreError::NotFound { .. }))));
    assert!(!fx.notification("L1").await.unwrap().read);
}

#[tokio::test]
async fn details_update_keeps_unset_fields() {
    let fx = Fixture::new();
    fx.seed_user("bob", "https://img/bob.png");

    actions::update_user_details(
        fx.store.as_ref(),
        &bob(),
        &UserDetails {
            bio: Some("hi".to_string()),
            ..UserDetails::default()
        },
    )
    .await
    .unwrap();
    actions::update_user_details(
        fx.store.as_ref(),
        &bob(),
        &UserDetails {
            location: Some("Lagos".to_string()),
            ..UserDetails::default()
        },
    )
    .await
    .unwrap();

    let user = fx.store.get_record::<User>("bob").await.unwrap().unwrap();
    assert_eq!(user.bio.as_deref(), Some("hi"));
    assert_eq!(user.location.as_deref(), Some("Lagos"));
    assert_eq!(user.website, None);
}

#[tokio::test]
async fn user_details_lists_newest_screams_first() {
    let fx = Fixture::new();
    fx.seed_user("alice", "https://img/alice.png");
    let now = Utc::now();
    for (id, age) in [("old", 10), ("new", 0), ("mid", 5)] {
        let mut scream = fx.seed_scream(id, "alice");
        scream.created_at = now - Duration::minutes(age);
        fx.store.seed(scream.path(), scream.to_fields().unwrap()).unwrap();
    }
    fx.seed_scream("other", "bob");

    let profile = actions::user_details(fx.store.as_ref(), "alice").await.unwrap();

    let ids: Vec<_> = profile.screams.iter().map(|scream| scream.id.as_str()).collect();
    assert_eq!(ids, vec!["new", "mid", "old"]);
    assert_eq!(profile.user.handle, "alice");
}

#[tokio::test]
async fn authenticated_user_sees_own_likes_and_notifications() {
    let fx = Fixture::new();
    fx.seed_user("alice", "https://img/alice.png");
    fx.seed_scream("S1", "alice");
    fx.seed_scream("S2", "bob");
    fx.triggers.dispatch(&created(&like("L1", "S1", "bob"))).await;
    fx.store.set_record(&like("L2", "S2", "alice")).await.unwrap();

    let me = actions::authenticated_user(fx.store.as_ref(), &Identity::new("alice", "uid-alice"))
        .await
        .unwrap();

    assert_eq!(me.credentials.handle, "alice");
    assert_eq!(me.likes.len(), 1);
    assert_eq!(me.likes[0].scream_id, "S2");
    assert_eq!(me.notifications.len(), 1);
    assert_eq!(me.notifications[0].sender, "bob");
}

#[tokio::test]
async fn unknown_user_is_not_found() {
    let fx = Fixture::new();
    let result = actions::user_details(fx.store.as_ref(), "ghost").await;
    assert!(matches!(result, Err(ActionError::NotFound { .. })));
}
