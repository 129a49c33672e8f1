// ABOUTME: Defines the Builder record (an exhibition stand builder listed in the marketplace).
// ABOUTME: Carries import provenance flags and the four-rule duplicate policy used on add.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::duplicate::{DuplicatePolicy, DuplicateRule, normalized};
use crate::entity::{Entity, is_false, null_as_default, number_or_numeric_string};

/// Source tag written on records pulled from the external business directory.
pub const IMPORT_SOURCE: &str = "google_places_api";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Location {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContactInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub primary_email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Directory listing identifiers captured at import time.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListingData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub place_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_id: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Builder {
    #[serde(default)]
    pub id: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub company_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headquarters: Option<Location>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contact_info: Option<ContactInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gmb_data: Option<ListingData>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gmb_id: Option<String>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub imported: bool,
    #[serde(default, rename = "gmbImported", skip_serializing_if = "is_false")]
    pub gmb_imported: bool,
    #[serde(default, rename = "importedFromGMB", skip_serializing_if = "is_false")]
    pub imported_from_gmb: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub preserve_data: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub verified: bool,
    #[serde(
        default,
        deserialize_with = "number_or_numeric_string",
        skip_serializing_if = "Option::is_none"
    )]
    pub rating: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Builder {
    pub fn new(id: impl Into<String>, company_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            company_name: company_name.into(),
            ..Self::default()
        }
    }

    pub fn located(mut self, city: &str, country: &str) -> Self {
        self.headquarters = Some(Location {
            city: Some(city.to_string()),
            country: Some(country.to_string()),
            ..Location::default()
        });
        self
    }

    pub fn with_email(mut self, email: &str) -> Self {
        self.contact_info = Some(ContactInfo {
            primary_email: Some(email.to_string()),
            ..ContactInfo::default()
        });
        self
    }

    pub fn with_external_id(mut self, external_id: &str) -> Self {
        self.gmb_id = Some(external_id.to_string());
        self
    }

    pub fn mark_imported(mut self) -> Self {
        self.imported = true;
        self.source = Some(IMPORT_SOURCE.to_string());
        self
    }

    /// Identifier of the directory listing this builder was imported from:
    /// the listing's place id, then its original id, then the flat `gmbId`.
    pub fn external_id(&self) -> Option<String> {
        let listing = self.gmb_data.as_ref();
        [
            listing.and_then(|l| l.place_id.as_deref()),
            listing.and_then(|l| l.original_id.as_deref()),
            self.gmb_id.as_deref(),
        ]
        .into_iter()
        .flatten()
        .map(str::trim)
        .find(|id| !id.is_empty())
        .map(str::to_string)
    }

    /// True when any provenance field marks this record as externally imported.
    pub fn is_externally_imported(&self) -> bool {
        self.imported
            || self.gmb_imported
            || self.imported_from_gmb
            || self.source.as_deref() == Some(IMPORT_SOURCE)
    }

    /// Records kept in emergency snapshots: imported ones plus anything an
    /// operator explicitly asked to preserve.
    pub fn is_protected(&self) -> bool {
        self.is_externally_imported() || self.preserve_data
    }

    pub fn city(&self) -> Option<&str> {
        self.headquarters.as_ref().and_then(|h| h.city.as_deref())
    }

    pub fn country(&self) -> Option<&str> {
        self.headquarters.as_ref().and_then(|h| h.country.as_deref())
    }

    pub fn email(&self) -> Option<&str> {
        self.contact_info
            .as_ref()
            .and_then(|c| c.primary_email.as_deref())
    }

    /// `name_city_country`, lowercased. Only defined for records without an
    /// external identifier; those are matched by the external id rule instead.
    fn composite_key(&self) -> Option<String> {
        if self.external_id().is_some() {
            return None;
        }
        let name = normalized(Some(&self.company_name))?;
        let city = normalized(self.city()).unwrap_or_default();
        let country = normalized(self.country()).unwrap_or_default();
        Some(format!("{name}_{city}_{country}"))
    }
}

impl Entity for Builder {
    const COLLECTION: &'static str = "builders";

    fn id(&self) -> &str {
        &self.id
    }

    fn set_id(&mut self, id: String) {
        self.id = id;
    }

    fn set_created_at(&mut self, at: DateTime<Utc>) {
        self.created_at = Some(at);
    }

    fn set_updated_at(&mut self, at: DateTime<Utc>) {
        self.updated_at = Some(at);
    }

    fn duplicate_policy() -> DuplicatePolicy<Self> {
        DuplicatePolicy::id_only()
            .with_rule(DuplicateRule::new("externalId", Builder::external_id))
            .with_rule(DuplicateRule::new("nameCityCountry", Builder::composite_key))
            .with_rule(DuplicateRule::new("email", |b: &Builder| {
                normalized(b.email())
            }))
    }

    fn label(&self) -> String {
        if self.company_name.is_empty() {
            self.id.clone()
        } else {
            self.company_name.clone()
        }
    }
}

/// Aggregate figures over the builder collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuilderStats {
    pub total_builders: usize,
    pub total_countries: usize,
    pub total_cities: usize,
    pub verified_builders: usize,
    pub imported_builders: usize,
    pub average_rating: f64,
}

impl BuilderStats {
    pub fn from_builders(builders: &[Builder]) -> Self {
        let countries: HashSet<&str> = builders.iter().filter_map(Builder::country).collect();
        let cities: HashSet<&str> = builders.iter().filter_map(Builder::city).collect();
        let rating_sum: f64 = builders.iter().filter_map(|b| b.rating).sum();
        let average = if builders.is_empty() {
            0.0
        } else {
            rating_sum / builders.len() as f64
        };

        Self {
            total_builders: builders.len(),
            total_countries: countries.len(),
            total_cities: cities.len(),
            verified_builders: builders.iter().filter(|b| b.verified).count(),
            imported_builders: builders.iter().filter(|b| b.is_externally_imported()).count(),
            average_rating: (average * 10.0).round() / 10.0,
        }
    }
}
