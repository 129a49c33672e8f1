// ABOUTME: Structured `{success, data, error, code}` envelope for collaborators that speak JSON.
// ABOUTME: Converts from collection Results so callers never see a raised failure.

use serde::{Deserialize, Serialize};

use crate::error::{CollectionError, ErrorCode};

/// Outcome of a collection operation in the shape the hosting application
/// serializes to its clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpResult<T> {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<ErrorCode>,
}

impl<T> OpResult<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            code: None,
        }
    }

    pub fn failed(error: &CollectionError) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.to_string()),
            code: Some(error.code()),
        }
    }
}

impl<T> From<Result<T, CollectionError>> for OpResult<T> {
    fn from(result: Result<T, CollectionError>) -> Self {
        match result {
            Ok(data) => OpResult::ok(data),
            Err(e) => OpResult::failed(&e),
        }
    }
}
