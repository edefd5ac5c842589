use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::{Map, Value};

use crate::errors::StoreError;

/// Field map of a stored document. Keys are the persisted (camelCase) names.
pub type Fields = Map<String, Value>;

/// Named collections of the social schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Collection {
    Users,
    Screams,
    Likes,
    Comments,
    Notifications,
}

impl Collection {
    pub const ALL: [Collection; 5] = [
        Collection::Users,
        Collection::Screams,
        Collection::Likes,
        Collection::Comments,
        Collection::Notifications,
    ];

    #[inline]
    pub const fn as_str(self) -> &'static str {
        match self {
            Collection::Users => "users",
            Collection::Screams => "screams",
            Collection::Likes => "likes",
            Collection::Comments => "comments",
            Collection::Notifications => "notifications",
        }
    }

    /// Fields backed by an equality index in stores that need one.
    pub const fn indexed_fields(self) -> &'static [&'static str] {
        match self {
            Collection::Users => &["userId"],
            Collection::Screams => &["userHandle"],
            Collection::Likes => &["screamId", "userHandle"],
            Collection::Comments => &["screamId", "userHandle"],
            Collection::Notifications => &["screamId", "recipient"],
        }
    }

    pub fn is_indexed(self, field: &str) -> bool {
        self.indexed_fields().contains(&field)
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Collection {
    type Err = StoreError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Collection::ALL
            .into_iter()
            .find(|collection| collection.as_str() == value)
            .ok_or_else(|| StoreError::InvalidRequest {
                message: format!("unknown collection '{value}'"),
            })
    }
}

/// Address of a single document: `collection/id`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DocPath {
    pub collection: Collection,
    pub id: String,
}

impl DocPath {
    pub fn new(collection: Collection, id: impl Into<String>) -> Self {
        Self {
            collection,
            id: id.into(),
        }
    }
}

impl fmt::Display for DocPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.collection, self.id)
    }
}

impl FromStr for DocPath {
    type Err = StoreError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim_matches('/');
        let (collection, id) = trimmed.split_once('/').ok_or_else(|| StoreError::InvalidRequest {
            message: format!("document path '{value}' must look like collection/id"),
        })?;
        if id.is_empty() || id.contains('/') {
            return Err(StoreError::InvalidRequest {
                message: format!("document path '{value}' has an invalid id"),
            });
        }
        Ok(DocPath::new(collection.parse()?, id))
    }
}

/// A typed document living in one collection.
///
/// The document id is the store key, so records skip it during
/// serialization and get it back through [`Record::assign_id`].
pub trait Record: Serialize + DeserializeOwned {
    const COLLECTION: Collection;

    fn id(&self) -> &str;

    fn assign_id(&mut self, id: String);

    fn path(&self) -> DocPath {
        DocPath::new(Self::COLLECTION, self.id())
    }

    fn to_fields(&self) -> Result<Fields, StoreError> {
        match serde_json::to_value(self)? {
            Value::Object(map) => Ok(map),
            other => Err(StoreError::InvalidRequest {
                message: format!("{} record serialized to non-object {other}", Self::COLLECTION),
            }),
        }
    }

    fn from_fields(id: &str, fields: &Fields) -> Result<Self, StoreError> {
        let mut record: Self = serde_json::from_value(Value::Object(fields.clone()))?;
        record.assign_id(id.to_string());
        Ok(record)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub handle: String,
    pub email: String,
    pub created_at: DateTime<Utc>,
    pub image_url: String,
    pub user_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bio: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub website: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
}

impl Record for User {
    const COLLECTION: Collection = Collection::Users;

    fn id(&self) -> &str {
        &self.handle
    }

    // Users are keyed by handle, which is also stored as a field.
    fn assign_id(&mut self, id: String) {
        if self.handle.is_empty() {
            self.handle = id;
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Scream {
    #[serde(skip)]
    pub id: String,
    pub user_handle: String,
    pub body: String,
    pub created_at: DateTime<Utc>,
    pub user_image: String,
    #[serde(default)]
    pub like_count: i64,
    #[serde(default)]
    pub comment_count: i64,
}

impl Record for Scream {
    const COLLECTION: Collection = Collection::Screams;

    fn id(&self) -> &str {
        &self.id
    }

    fn assign_id(&mut self, id: String) {
        self.id = id;
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Like {
    #[serde(skip)]
    pub id: String,
    pub scream_id: String,
    pub user_handle: String,
}

impl Record for Like {
    const COLLECTION: Collection = Collection::Likes;

    fn id(&self) -> &str {
        &self.id
    }

    fn assign_id(&mut self, id: String) {
        self.id = id;
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Comment {
    #[serde(skip)]
    pub id: String,
    pub scream_id: String,
    pub user_handle: String,
    pub body: String,
    pub created_at: DateTime<Utc>,
}

impl Record for Comment {
    const COLLECTION: Collection = Collection::Comments;

    fn id(&self) -> &str {
        &self.id
    }

    fn assign_id(&mut self, id: String) {
        self.id = id;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationType {
    Like,
    Comment,
}

impl NotificationType {
    #[inline]
    pub const fn as_str(self) -> &'static str {
        match self {
            NotificationType::Like => "like",
            NotificationType::Comment => "comment",
        }
    }
}

impl fmt::Display for NotificationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Notification derived from a like or comment; shares its id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    #[serde(skip)]
    pub id: String,
    pub recipient: String,
    pub sender: String,
    #[serde(rename = "type")]
    pub kind: NotificationType,
    pub scream_id: String,
    pub created_at: DateTime<Utc>,
    pub read: bool,
}

impl Record for Notification {
    const COLLECTION: Collection = Collection::Notifications;

    fn id(&self) -> &str {
        &self.id
    }

    fn assign_id(&mut self, id: String) {
        self.id = id;
    }
}

/// The part of a like or comment the fan-out controller needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivityRef {
    pub id: String,
    pub scream_id: String,
    pub user_handle: String,
}

impl From<&Like> for ActivityRef {
    fn from(like: &Like) -> Self {
        Self {
            id: like.id.clone(),
            scream_id: like.scream_id.clone(),
            user_handle: like.user_handle.clone(),
        }
    }
}

impl From<&Comment> for ActivityRef {
    fn from(comment: &Comment) -> Self {
        Self {
            id: comment.id.clone(),
            scream_id: comment.scream_id.clone(),
            user_handle: comment.user_handle.clone(),
        }
    }
}

/// Owner view of a scream: only `userHandle` has to be present.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScreamOwner {
    #[serde(skip)]
    pub id: String,
    pub user_handle: String,
}

impl Record for ScreamOwner {
    const COLLECTION: Collection = Collection::Screams;

    fn id(&self) -> &str {
        &self.id
    }

    fn assign_id(&mut self, id: String) {
        self.id = id;
    }
}

/// Image view of a user snapshot. Documents without `imageUrl` decode to `None`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserImage {
    #[serde(skip)]
    pub handle: String,
    #[serde(default)]
    pub image_url: Option<String>,
}

impl Record for UserImage {
    const COLLECTION: Collection = Collection::Users;

    fn id(&self) -> &str {
        &self.handle
    }

    fn assign_id(&mut self, id: String) {
        self.handle = id;
    }
}

impl From<&User> for UserImage {
    fn from(user: &User) -> Self {
        Self {
            handle: user.handle.clone(),
            image_url: Some(user.image_url.clone()),
        }
    }
}
