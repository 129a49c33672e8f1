// ABOUTME: On-disk document envelope: metadata (timestamp, version, checksum) wrapping a JSON payload.
// ABOUTME: Parses both the wrapped shape and legacy bare payloads, and verifies stored checksums.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::checksum::payload_checksum;

/// Format version written into every document's metadata.
pub const DOCUMENT_VERSION: &str = "1.0";

/// Metadata recomputed on every successful write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentMetadata {
    pub timestamp: DateTime<Utc>,
    pub version: String,
    pub checksum: String,
}

impl DocumentMetadata {
    /// Build metadata for `payload` as written at `timestamp`.
    pub fn for_payload(payload: &Value, timestamp: DateTime<Utc>) -> Result<Self, serde_json::Error> {
        Ok(Self {
            timestamp,
            version: DOCUMENT_VERSION.to_string(),
            checksum: payload_checksum(payload)?,
        })
    }
}

/// The serialized form of a primary document: `{ "metadata": ..., "data": ... }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub metadata: DocumentMetadata,
    pub data: Value,
}

impl Envelope {
    pub fn new(data: Value, timestamp: DateTime<Utc>) -> Result<Self, serde_json::Error> {
        let metadata = DocumentMetadata::for_payload(&data, timestamp)?;
        Ok(Self { metadata, data })
    }
}

/// Metadata as found on disk. Older writers used `_metadata` and may omit
/// fields, so everything is optional here.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct StoredMetadata {
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub checksum: Option<String>,
}

/// Result of comparing a stored checksum to the payload it describes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Integrity {
    Verified,
    Mismatch { stored: String, computed: String },
    /// Legacy bare payload or metadata without a checksum.
    Unverified,
}

impl Integrity {
    pub fn is_mismatch(&self) -> bool {
        matches!(self, Integrity::Mismatch { .. })
    }
}

/// A document decoded from disk, in either the wrapped or the legacy shape.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedDocument {
    pub data: Value,
    pub metadata: Option<StoredMetadata>,
}

impl ParsedDocument {
    /// Parse raw file contents. Wrapped documents are recognized by an object
    /// carrying `data` alongside a `metadata` (or legacy `_metadata`) object;
    /// anything else is treated as a bare legacy payload.
    pub fn parse(raw: &str) -> Result<Self, serde_json::Error> {
        let value: Value = serde_json::from_str(raw)?;
        Ok(Self::from_value(value))
    }

    pub fn from_value(value: Value) -> Self {
        if let Value::Object(mut map) = value {
            let meta_key = ["metadata", "_metadata"]
                .into_iter()
                .find(|key| map.get(*key).is_some_and(Value::is_object));

            if let Some(key) = meta_key
                && map.get("data").is_some_and(|d| !d.is_null())
            {
                let metadata = map
                    .remove(key)
                    .and_then(|m| serde_json::from_value::<StoredMetadata>(m).ok())
                    .unwrap_or_default();
                let data = map.remove("data").unwrap_or(Value::Null);
                return Self {
                    data,
                    metadata: Some(metadata),
                };
            }

            return Self {
                data: Value::Object(map),
                metadata: None,
            };
        }

        Self {
            data: value,
            metadata: None,
        }
    }

    pub fn is_legacy(&self) -> bool {
        self.metadata.is_none()
    }

    /// Recompute the checksum over `data` and compare it with the stored one.
    pub fn verify(&self) -> Integrity {
        let Some(stored) = self.metadata.as_ref().and_then(|m| m.checksum.clone()) else {
            return Integrity::Unverified;
        };
        match payload_checksum(&self.data) {
            Ok(computed) if computed == stored => Integrity::Verified,
            Ok(computed) => Integrity::Mismatch { stored, computed },
            // Serializing an in-memory Value does not fail in practice.
            Err(_) => Integrity::Unverified,
        }
    }
}

/// The container shape a collection's payload is expected to have.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PayloadShape {
    Array,
    Object,
}

impl PayloadShape {
    pub fn matches(&self, value: &Value) -> bool {
        match self {
            PayloadShape::Array => value.is_array(),
            PayloadShape::Object => value.is_object(),
        }
    }

    /// The empty payload a fresh document of this shape starts with.
    pub fn empty(&self) -> Value {
        match self {
            PayloadShape::Array => Value::Array(Vec::new()),
            PayloadShape::Object => Value::Object(serde_json::Map::new()),
        }
    }
}
