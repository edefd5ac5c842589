use std::borrow::Cow;

use thiserror::Error;

/// Top-level error type returned by document stores.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The backing store could not be reached or rejected the command.
    #[error("store unavailable: {0}")]
    Unavailable(#[from] redis::RedisError),

    /// `update` targeted a document that does not exist.
    #[error("document not found: {path}")]
    NotFound { path: String },

    /// A `require_exists` guard on a batch did not hold at commit time.
    #[error("precondition failed: {path} does not exist")]
    PreconditionFailed { path: String },

    /// The batch was rejected as a whole; nothing was applied.
    #[error("commit failed: {message}")]
    CommitFailed { message: Cow<'static, str> },

    /// A document could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Invalid input supplied to a store operation.
    #[error("invalid request: {message}")]
    InvalidRequest { message: String },

    #[error("{message}")]
    Other { message: Cow<'static, str> },
}

impl StoreError {
    /// Transient failures worth retrying at the platform level.
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Unavailable(_) | StoreError::CommitFailed { .. })
    }
}

/// Errors returned by the source-of-truth actions in [`crate::actions`].
#[derive(Debug, Error)]
pub enum ActionError {
    #[error("{what} not found")]
    NotFound { what: String },

    #[error("scream {scream_id} already liked by {handle}")]
    AlreadyLiked { scream_id: String, handle: String },

    #[error("scream {scream_id} is not liked by {handle}")]
    NotLiked { scream_id: String, handle: String },

    #[error("{handle} may not modify {path}")]
    Forbidden { handle: String, path: String },

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ActionError {
    pub(crate) fn not_found(what: impl Into<String>) -> Self {
        ActionError::NotFound { what: what.into() }
    }
}
