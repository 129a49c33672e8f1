// ABOUTME: Error taxonomy shared by the storage engine and collection layer.
// ABOUTME: Maps each failure onto a stable ErrorCode used in the structured OpResult envelope.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised by the storage engine and the background services.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid document name: {0:?}")]
    InvalidName(String),

    #[error("storage layout unavailable: {0}")]
    Layout(String),

    #[error("recovery failed: {0}")]
    Recovery(String),
}

/// Errors returned by collection operations.
#[derive(Debug, Error)]
pub enum CollectionError {
    #[error("record not found: {0}")]
    NotFound(String),

    #[error("duplicate of existing record {existing_id} (matched on {rule})")]
    Duplicate {
        rule: &'static str,
        existing_id: String,
        existing_label: String,
    },

    #[error("invalid patch: {0}")]
    InvalidPatch(String),

    #[error("storage error: {0}")]
    Storage(#[from] StoreError),

    #[error("collection {0} failed to load and is read-only until it is repaired and reloaded")]
    ReadOnly(String),

    #[error("collection actor channel closed")]
    ChannelClosed,
}

impl CollectionError {
    pub fn code(&self) -> ErrorCode {
        match self {
            CollectionError::NotFound(_) => ErrorCode::NotFound,
            CollectionError::Duplicate { .. } => ErrorCode::DuplicateConflict,
            CollectionError::InvalidPatch(_) => ErrorCode::InvalidInput,
            CollectionError::Storage(e) => e.code(),
            CollectionError::ReadOnly(_) | CollectionError::ChannelClosed => ErrorCode::Unavailable,
        }
    }

    pub fn is_duplicate(&self) -> bool {
        matches!(self, CollectionError::Duplicate { .. })
    }
}

impl From<serde_json::Error> for CollectionError {
    fn from(err: serde_json::Error) -> Self {
        CollectionError::Storage(StoreError::Parse(err))
    }
}

impl StoreError {
    pub fn code(&self) -> ErrorCode {
        match self {
            StoreError::Io(_) => ErrorCode::IoFailure,
            StoreError::Parse(_) => ErrorCode::ParseFailure,
            StoreError::InvalidName(_) => ErrorCode::InvalidInput,
            StoreError::Layout(_) => ErrorCode::IoFailure,
            StoreError::Recovery(_) => ErrorCode::RecoveryFailure,
        }
    }
}

/// Stable, serializable classification of a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    IoFailure,
    ParseFailure,
    NotFound,
    DuplicateConflict,
    RecoveryFailure,
    InvalidInput,
    Unavailable,
}
