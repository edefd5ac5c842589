//! Document change events delivered to the trigger layer.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{
    errors::StoreError,
    types::{Collection, DocPath, Fields, Record},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Created,
    Updated,
    Deleted,
}

impl ChangeKind {
    #[inline]
    pub const fn as_str(self) -> &'static str {
        match self {
            ChangeKind::Created => "created",
            ChangeKind::Updated => "updated",
            ChangeKind::Deleted => "deleted",
        }
    }
}

/// Routing key for trigger handlers: which collection, which kind of change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TriggerKey {
    pub collection: Collection,
    pub kind: ChangeKind,
}

impl TriggerKey {
    pub const fn new(collection: Collection, kind: ChangeKind) -> Self {
        Self { collection, kind }
    }
}

impl fmt::Display for TriggerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.collection, self.kind.as_str())
    }
}

/// One committed change to one document.
///
/// `before` is absent for creations, `after` is absent for deletions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeEvent {
    pub collection: Collection,
    pub document_id: String,
    pub kind: ChangeKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub before: Option<Fields>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub after: Option<Fields>,
}

impl ChangeEvent {
    pub fn created(path: DocPath, after: Fields) -> Self {
        Self {
            collection: path.collection,
            document_id: path.id,
            kind: ChangeKind::Created,
            before: None,
            after: Some(after),
        }
    }

    pub fn updated(path: DocPath, before: Fields, after: Fields) -> Self {
        Self {
            collection: path.collection,
            document_id: path.id,
            kind: ChangeKind::Updated,
            before: Some(before),
            after: Some(after),
        }
    }

    pub fn deleted(path: DocPath, before: Fields) -> Self {
        Self {
            collection: path.collection,
            document_id: path.id,
            kind: ChangeKind::Deleted,
            before: Some(before),
            after: None,
        }
    }

    pub fn key(&self) -> TriggerKey {
        TriggerKey::new(self.collection, self.kind)
    }

    pub fn path(&self) -> DocPath {
        DocPath::new(self.collection, self.document_id.clone())
    }

    /// Decodes the pre-change snapshot as a typed record.
    pub fn before_as<T: Record>(&self) -> Result<T, StoreError> {
        self.snapshot_as(self.before.as_ref(), "before")
    }

    /// Decodes the post-change snapshot as a typed record.
    pub fn after_as<T: Record>(&self) -> Result<T, StoreError> {
        self.snapshot_as(self.after.as_ref(), "after")
    }

    fn snapshot_as<T: Record>(&self, snapshot: Option<&Fields>, side: &str) -> Result<T, StoreError> {
        if self.collection != T::COLLECTION {
            return Err(StoreError::InvalidRequest {
                message: format!("{} event cannot carry a {} record", self.key(), T::COLLECTION),
            });
        }
        let fields = snapshot.ok_or_else(|| StoreError::InvalidRequest {
            message: format!("{} event for {} has no {side} snapshot", self.key(), self.path()),
        })?;
        T::from_fields(&self.document_id, fields)
    }
}
