// ABOUTME: Activity log entries and user sessions recorded by the admin surface.
// ABOUTME: Includes severity rules, database-change descriptors and aggregate statistics.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::entity::Entity;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    #[default]
    Info,
    Warning,
    Error,
    Success,
}

impl Severity {
    /// Default severity for a logged action.
    pub fn for_action(action: &str) -> Self {
        match action {
            "login" => Severity::Success,
            "failed_login" => Severity::Error,
            "delete" => Severity::Warning,
            _ => Severity::Info,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DbOperation {
    Create,
    Read,
    Update,
    Delete,
}

impl DbOperation {
    pub fn severity(&self) -> Severity {
        match self {
            DbOperation::Delete => Severity::Warning,
            DbOperation::Update => Severity::Info,
            DbOperation::Create | DbOperation::Read => Severity::Success,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DbOperation::Create => "CREATE",
            DbOperation::Read => "READ",
            DbOperation::Update => "UPDATE",
            DbOperation::Delete => "DELETE",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DbChange {
    pub table: String,
    pub operation: DbOperation,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub record_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub changes: Option<Map<String, Value>>,
}

/// One audit entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityLog {
    #[serde(default)]
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub user: String,
    pub action: String,
    pub resource: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    #[serde(default)]
    pub severity: Severity,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub db_change: Option<DbChange>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

/// Fields supplied by the caller when recording an activity; id and
/// timestamp are assigned by the log.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NewActivity {
    pub user: String,
    pub action: String,
    pub resource: String,
    pub details: Option<String>,
    pub ip: Option<String>,
    pub user_agent: Option<String>,
    pub severity: Option<Severity>,
    pub session_id: Option<String>,
    pub db_change: Option<DbChange>,
}

impl NewActivity {
    pub fn new(user: impl Into<String>, action: impl Into<String>, resource: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            action: action.into(),
            resource: resource.into(),
            ..Self::default()
        }
    }

    pub fn into_log(self, id: String, at: DateTime<Utc>) -> ActivityLog {
        let severity = self
            .severity
            .unwrap_or_else(|| Severity::for_action(&self.action));
        ActivityLog {
            id,
            timestamp: at,
            user: self.user,
            action: self.action,
            resource: self.resource,
            details: self.details,
            ip: self.ip,
            user_agent: self.user_agent,
            severity,
            session_id: self.session_id,
            db_change: self.db_change,
            created_at: None,
            updated_at: None,
        }
    }
}

impl Entity for ActivityLog {
    const COLLECTION: &'static str = "activity_logs";

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
        format!("{} {}", self.action, self.resource)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageVisit {
    pub url: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserSession {
    #[serde(default)]
    pub id: String,
    pub user_id: String,
    pub user: String,
    pub login_time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logout_time: Option<DateTime<Utc>>,
    pub last_activity_time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    #[serde(default)]
    pub is_active: bool,
    #[serde(default)]
    pub pages_visited: Vec<PageVisit>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl UserSession {
    pub fn open(
        id: String,
        user_id: impl Into<String>,
        user: impl Into<String>,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            user_id: user_id.into(),
            user: user.into(),
            login_time: at,
            logout_time: None,
            last_activity_time: at,
            ip: None,
            user_agent: None,
            is_active: true,
            pages_visited: Vec::new(),
            created_at: None,
            updated_at: None,
        }
    }

    /// Seconds between login and logout, if the session has ended.
    pub fn duration_secs(&self) -> Option<f64> {
        self.logout_time
            .map(|out| (out - self.login_time).num_milliseconds() as f64 / 1000.0)
    }
}

impl Entity for UserSession {
    const COLLECTION: &'static str = "user_sessions";

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
        format!("{} ({})", self.user, self.id)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeverityCounts {
    pub info: usize,
    pub warning: usize,
    pub error: usize,
    pub success: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityStats {
    pub total_logs: usize,
    pub unique_actions: usize,
    pub unique_users: usize,
    pub severities: SeverityCounts,
    pub total_sessions: usize,
    pub active_sessions: usize,
    /// Mean duration of ended sessions, in whole seconds.
    pub avg_session_duration: u64,
}

impl ActivityStats {
    pub fn compute(logs: &[ActivityLog], sessions: &[UserSession]) -> Self {
        let actions: HashSet<&str> = logs.iter().map(|l| l.action.as_str()).collect();
        let users: HashSet<&str> = logs.iter().map(|l| l.user.as_str()).collect();

        let mut severities = SeverityCounts::default();
        for log in logs {
            match log.severity {
                Severity::Info => severities.info += 1,
                Severity::Warning => severities.warning += 1,
                Severity::Error => severities.error += 1,
                Severity::Success => severities.success += 1,
            }
        }

        let durations: Vec<f64> = sessions.iter().filter_map(UserSession::duration_secs).collect();
        let avg = durations.iter().sum::<f64>() / durations.len().max(1) as f64;

        Self {
            total_logs: logs.len(),
            unique_actions: actions.len(),
            unique_users: users.len(),
            severities,
            total_sessions: sessions.len(),
            active_sessions: sessions.iter().filter(|s| s.is_active).count(),
            avg_session_duration: avg.round().max(0.0) as u64,
        }
    }
}
