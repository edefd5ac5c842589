//! Source-of-truth writes performed on behalf of an authenticated user.
//!
//! These are the writes whose change events drive the triggers. Request
//! parsing, authentication and input validation belong to the HTTP layer;
//! every function here receives an already-resolved [`Identity`].

use chrono::Utc;
use log::info;
use serde::Serialize;
use serde_json::Value;

use crate::{
    errors::ActionError,
    id::generate_document_id,
    store::{DocumentStore, Query, RecordStoreExt, SortOrder},
    types::{Collection, Comment, DocPath, Fields, Like, Notification, Record, Scream, User},
};

/// The caller as resolved by the authentication verifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub handle: String,
    pub user_id: String,
}

impl Identity {
    pub fn new(handle: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            handle: handle.into(),
            user_id: user_id.into(),
        }
    }
}

/// Optional profile fields; `None` leaves the stored value untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserDetails {
    pub bio: Option<String>,
    pub website: Option<String>,
    pub location: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UserProfile {
    pub user: User,
    pub screams: Vec<Scream>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuthenticatedUser {
    pub credentials: User,
    pub likes: Vec<Like>,
    pub notifications: Vec<Notification>,
}

async fn require_scream(store: &dyn DocumentStore, scream_id: &str) -> Result<Scream, ActionError> {
    store
        .get_record::<Scream>(scream_id)
        .await?
        .ok_or_else(|| ActionError::not_found(format!("scream {scream_id}")))
}

async fn require_user(store: &dyn DocumentStore, handle: &str) -> Result<User, ActionError> {
    store
        .get_record::<User>(handle)
        .await?
        .ok_or_else(|| ActionError::not_found(format!("user {handle}")))
}

fn single_field(field: &str, value: impl Into<Value>) -> Fields {
    let mut fields = Fields::new();
    fields.insert(field.to_string(), value.into());
    fields
}

/// Posts a scream carrying the author's current image.
pub async fn post_scream(store: &dyn DocumentStore, actor: &Identity, body: &str) -> Result<Scream, ActionError> {
    let author = require_user(store, &actor.handle).await?;
    let scream = Scream {
        id: generate_document_id(),
        user_handle: actor.handle.clone(),
        body: body.to_string(),
        created_at: Utc::now(),
        user_image: author.image_url,
        like_count: 0,
        comment_count: 0,
    };
    store.set_record(&scream).await?;
    info!("{} posted scream {}", actor.handle, scream.id);
    Ok(scream)
}

/// Likes a scream once; the like and the counter move in one batch.
pub async fn like_scream(store: &dyn DocumentStore, actor: &Identity, scream_id: &str) -> Result<Scream, ActionError> {
    let mut scream = require_scream(store, scream_id).await?;
    if find_like(store, actor, scream_id).await?.is_some() {
        return Err(ActionError::AlreadyLiked {
            scream_id: scream_id.to_string(),
            handle: actor.handle.clone(),
        });
    }

    let like = Like {
        id: generate_document_id(),
        scream_id: scream_id.to_string(),
        user_handle: actor.handle.clone(),
    };
    scream.like_count += 1;

    let mut batch = store.batch();
    batch.set_record(&like)?;
    batch.update(scream.path(), single_field("likeCount", scream.like_count));
    store.commit(batch).await?;
    Ok(scream)
}

pub async fn unlike_scream(store: &dyn DocumentStore, actor: &Identity, scream_id: &str) -> Result<Scream, ActionError> {
    let mut scream = require_scream(store, scream_id).await?;
    let Some(like) = find_like(store, actor, scream_id).await? else {
        return Err(ActionError::NotLiked {
            scream_id: scream_id.to_string(),
            handle: actor.handle.clone(),
        });
    };
    scream.like_count = (scream.like_count - 1).max(0);

    let mut batch = store.batch();
    batch.delete(like.path());
    batch.update(scream.path(), single_field("likeCount", scream.like_count));
    store.commit(batch).await?;
    Ok(scream)
}

async fn find_like(store: &dyn DocumentStore, actor: &Identity, scream_id: &str) -> Result<Option<Like>, ActionError> {
    let likes: Vec<Like> = store
        .query_records(&Query::collection(Collection::Likes).where_eq("screamId", scream_id))
        .await?;
    Ok(likes.into_iter().find(|like| like.user_handle == actor.handle))
}

pub async fn comment_on_scream(
    store: &dyn DocumentStore,
    actor: &Identity,
    scream_id: &str,
    body: &str,
) -> Result<Comment, ActionError> {
    let scream = require_scream(store, scream_id).await?;
    let comment = Comment {
        id: generate_document_id(),
        scream_id: scream_id.to_string(),
        user_handle: actor.handle.clone(),
        body: body.to_string(),
        created_at: Utc::now(),
    };

    let mut batch = store.batch();
    batch.set_record(&comment)?;
    batch.update(scream.path(), single_field("commentCount", scream.comment_count + 1));
    store.commit(batch).await?;
    Ok(comment)
}

/// Deletes the actor's own scream; dependents are left to the cascade trigger.
pub async fn delete_scream(store: &dyn DocumentStore, actor: &Identity, scream_id: &str) -> Result<(), ActionError> {
    let scream = require_scream(store, scream_id).await?;
    if scream.user_handle != actor.handle {
        return Err(ActionError::Forbidden {
            handle: actor.handle.clone(),
            path: scream.path().to_string(),
        });
    }
    store.delete(&scream.path()).await?;
    info!("{} deleted scream {scream_id}", actor.handle);
    Ok(())
}

/// Points the actor's profile at an uploaded image.
pub async fn set_user_image(store: &dyn DocumentStore, actor: &Identity, image_url: &str) -> Result<(), ActionError> {
    let path = DocPath::new(Collection::Users, actor.handle.clone());
    store.update(&path, single_field("imageUrl", image_url)).await?;
    Ok(())
}

pub async fn update_user_details(
    store: &dyn DocumentStore,
    actor: &Identity,
    details: &UserDetails,
) -> Result<(), ActionError> {
    let mut fields = Fields::new();
    for (field, value) in [
        ("bio", &details.bio),
        ("website", &details.website),
        ("location", &details.location),
    ] {
        if let Some(value) = value {
            fields.insert(field.to_string(), Value::from(value.as_str()));
        }
    }
    if fields.is_empty() {
        return Ok(());
    }
    let path = DocPath::new(Collection::Users, actor.handle.clone());
    store.update(&path, fields).await?;
    Ok(())
}

/// Marks the given notifications read in one batch.
pub async fn mark_notifications_read(store: &dyn DocumentStore, ids: &[String]) -> Result<(), ActionError> {
    let mut batch = store.batch();
    for id in ids {
        batch.update(
            DocPath::new(Collection::Notifications, id.clone()),
            single_field("read", true),
        );
    }
    store.commit(batch).await?;
    Ok(())
}

/// Public profile: the user and their screams, newest first.
pub async fn user_details(store: &dyn DocumentStore, handle: &str) -> Result<UserProfile, ActionError> {
    let user = require_user(store, handle).await?;
    let screams = store
        .query_records(
            &Query::collection(Collection::Screams)
                .where_eq("userHandle", handle)
                .order_by("createdAt", SortOrder::Desc),
        )
        .await?;
    Ok(UserProfile { user, screams })
}

/// The actor's own credentials, likes and notifications (newest first).
pub async fn authenticated_user(store: &dyn DocumentStore, actor: &Identity) -> Result<AuthenticatedUser, ActionError> {
    let credentials = require_user(store, &actor.handle).await?;
    let likes = store
        .query_records(&Query::collection(Collection::Likes).where_eq("userHandle", actor.handle.as_str()))
        .await?;
    let notifications = store
        .query_records(
            &Query::collection(Collection::Notifications)
                .where_eq("recipient", actor.handle.as_str())
                .order_by("createdAt", SortOrder::Desc),
        )
        .await?;
    Ok(AuthenticatedUser {
        credentials,
        likes,
        notifications,
    })
}
