// ABOUTME: Activity log service over the activity_logs and user_sessions collections.
// ABOUTME: Records audit entries and session lifecycles and aggregates them into statistics.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use docvault_core::activity::{DbChange, PageVisit};
use docvault_core::{
    ActivityLog, ActivityStats, Clock, CollectionError, DbOperation, NewActivity, UserSession,
};
use serde_json::{Map, Value};
use ulid::Ulid;

use crate::collection::Collection;

#[derive(Clone)]
pub struct ActivityLogService {
    logs: Collection<ActivityLog>,
    sessions: Collection<UserSession>,
    clock: Arc<dyn Clock>,
}

impl ActivityLogService {
    pub fn new(
        logs: Collection<ActivityLog>,
        sessions: Collection<UserSession>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            logs,
            sessions,
            clock,
        }
    }

    pub fn log_collection(&self) -> &Collection<ActivityLog> {
        &self.logs
    }

    pub fn session_collection(&self) -> &Collection<UserSession> {
        &self.sessions
    }

    pub async fn add_log(&self, activity: NewActivity) -> Result<ActivityLog, CollectionError> {
        let log = activity.into_log(Ulid::new().to_string(), self.clock.now());
        self.logs.add(log).await
    }

    /// Record a change to another collection. Severity follows the operation.
    pub async fn log_db_change(
        &self,
        user: &str,
        table: &str,
        operation: DbOperation,
        record_id: Option<&str>,
        changes: Option<Map<String, Value>>,
    ) -> Result<ActivityLog, CollectionError> {
        let mut activity = NewActivity::new(user, format!("DB_{}", operation.as_str()), table);
        activity.details = Some(match record_id {
            Some(id) => format!("{} {} record {}", operation.as_str(), table, id),
            None => format!("{} {}", operation.as_str(), table),
        });
        activity.severity = Some(operation.severity());
        activity.db_change = Some(DbChange {
            table: table.to_string(),
            operation,
            record_id: record_id.map(str::to_string),
            changes,
        });
        self.add_log(activity).await
    }

    /// Logs newest first, optionally truncated to `limit` entries.
    pub async fn logs(&self, limit: Option<usize>) -> Result<Vec<ActivityLog>, CollectionError> {
        let mut logs = newest_first(self.logs.list().await?);
        if let Some(limit) = limit {
            logs.truncate(limit);
        }
        Ok(logs)
    }

    pub async fn logs_by_user(&self, user: &str) -> Result<Vec<ActivityLog>, CollectionError> {
        let logs = self.logs(None).await?;
        Ok(logs.into_iter().filter(|l| l.user == user).collect())
    }

    pub async fn logs_by_action(&self, action: &str) -> Result<Vec<ActivityLog>, CollectionError> {
        let logs = self.logs(None).await?;
        Ok(logs.into_iter().filter(|l| l.action == action).collect())
    }

    /// Logs with `from <= timestamp <= to`, newest first.
    pub async fn logs_in_range(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<ActivityLog>, CollectionError> {
        let logs = self.logs(None).await?;
        Ok(logs
            .into_iter()
            .filter(|l| l.timestamp >= from && l.timestamp <= to)
            .collect())
    }

    pub async fn delete_log(&self, id: &str) -> Result<ActivityLog, CollectionError> {
        self.logs.delete(id).await
    }

    pub async fn clear_logs(&self) -> Result<usize, CollectionError> {
        self.logs.clear().await
    }

    pub async fn create_session(
        &self,
        user_id: &str,
        user: &str,
        ip: Option<String>,
        user_agent: Option<String>,
    ) -> Result<UserSession, CollectionError> {
        let mut session = UserSession::open(Ulid::new().to_string(), user_id, user, self.clock.now());
        session.ip = ip;
        session.user_agent = user_agent;
        self.sessions.add(session).await
    }

    /// Mark the session as still in use.
    pub async fn update_session(&self, id: &str) -> Result<UserSession, CollectionError> {
        let now = self.clock.now();
        self.sessions
            .modify(id, move |s| s.last_activity_time = now)
            .await
    }

    /// Close the session and return its length in seconds. Ending an already
    /// closed session keeps the first logout time.
    pub async fn end_session(&self, id: &str) -> Result<f64, CollectionError> {
        let now = self.clock.now();
        let session = self
            .sessions
            .modify(id, move |s| {
                if s.logout_time.is_none() {
                    s.logout_time = Some(now);
                }
                s.last_activity_time = now;
                s.is_active = false;
            })
            .await?;
        Ok(session.duration_secs().unwrap_or_default())
    }

    pub async fn add_page_visit(
        &self,
        id: &str,
        url: &str,
        duration: Option<f64>,
    ) -> Result<UserSession, CollectionError> {
        let now = self.clock.now();
        let visit = PageVisit {
            url: url.to_string(),
            timestamp: now,
            duration,
        };
        self.sessions
            .modify(id, move |s| {
                s.pages_visited.push(visit);
                s.last_activity_time = now;
            })
            .await
    }

    pub async fn session(&self, id: &str) -> Result<UserSession, CollectionError> {
        self.sessions.get(id).await
    }

    pub async fn active_sessions(&self) -> Result<Vec<UserSession>, CollectionError> {
        let sessions = self.sessions.list().await?;
        Ok(sessions.into_iter().filter(|s| s.is_active).collect())
    }

    pub async fn sessions_by_user(&self, user_id: &str) -> Result<Vec<UserSession>, CollectionError> {
        let sessions = self.sessions.list().await?;
        Ok(sessions.into_iter().filter(|s| s.user_id == user_id).collect())
    }

    pub async fn stats(&self) -> Result<ActivityStats, CollectionError> {
        let logs = self.logs.list().await?;
        let sessions = self.sessions.list().await?;
        Ok(ActivityStats::compute(&logs, &sessions))
    }
}

/// Stored order is append order, so reversing before a stable sort keeps
/// later entries first among equal timestamps.
fn newest_first(mut logs: Vec<ActivityLog>) -> Vec<ActivityLog> {
    logs.reverse();
    logs.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
    logs
}
