// ABOUTME: The Entity trait implemented by every record type stored in a collection.
// ABOUTME: Supplies the document name, identity, timestamps and duplicate policy for a record type.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::de::{DeserializeOwned, Error as _};
use serde::{Deserialize, Deserializer, Serialize};

use crate::duplicate::DuplicatePolicy;

/// A record type persisted as one element of a collection document.
pub trait Entity: Clone + fmt::Debug + Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Name of the primary document holding this collection, without `.json`.
    const COLLECTION: &'static str;

    fn id(&self) -> &str;

    fn set_id(&mut self, id: String);

    fn set_created_at(&mut self, at: DateTime<Utc>);

    fn set_updated_at(&mut self, at: DateTime<Utc>);

    /// Ordered duplicate-detection rules applied by `add`.
    fn duplicate_policy() -> DuplicatePolicy<Self> {
        DuplicatePolicy::id_only()
    }

    /// Human-readable name used in logs and conflict messages.
    fn label(&self) -> String {
        self.id().to_string()
    }
}

/// Serde helper for `skip_serializing_if` on boolean flags.
pub(crate) fn is_false(value: &bool) -> bool {
    !*value
}

/// Reads an explicit `null` as the type's default.
pub(crate) fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Accepts a number, a numeric string such as `"4.5"`, or `null`.
pub(crate) fn number_or_numeric_string<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Loose {
        Number(f64),
        Text(String),
    }

    match Option::<Loose>::deserialize(deserializer)? {
        None => Ok(None),
        Some(Loose::Number(n)) => Ok(Some(n)),
        Some(Loose::Text(text)) => text
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| D::Error::custom(format!("expected a number, found {text:?}"))),
    }
}
