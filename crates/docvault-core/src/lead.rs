// ABOUTME: Defines the Lead record, a quote request or inquiry routed to builders.
// ABOUTME: Leads deduplicate on id only; unknown fields are preserved through `extra`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::entity::Entity;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Lead {
    #[serde(default)]
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub company: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub builder_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Lead {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            status: Some("new".to_string()),
            ..Self::default()
        }
    }
}

impl Entity for Lead {
    const COLLECTION: &'static str = "leads";

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

    fn label(&self) -> String {
        self.name.clone().unwrap_or_else(|| self.id.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_fields_survive_round_trip() {
        let raw = r#"{"id":"l1","email":"a@b.c","budget":{"min":1000,"max":5000},"tradeShow":"CES"}"#;
        let lead: Lead = serde_json::from_str(raw).unwrap();
        assert_eq!(lead.id, "l1");
        assert_eq!(lead.extra["tradeShow"], "CES");

        let back = serde_json::to_value(&lead).unwrap();
        assert_eq!(back["budget"]["max"], 5000);
        assert_eq!(back["email"], "a@b.c");
        assert!(back.get("createdAt").is_none());
    }

    #[test]
    fn new_lead_starts_in_new_status() {
        let lead = Lead::new("l9");
        assert_eq!(lead.status.as_deref(), Some("new"));
        assert_eq!(lead.label(), "l9");
    }
}
