// ABOUTME: Injectable wall clock so snapshot names and health timestamps are deterministic in tests.
// ABOUTME: Also owns the sortable timestamp format used for snapshot and emergency backup names.

use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};

/// Source of the current time.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// The real clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now += by;
    }

    pub fn set(&self, to: DateTime<Utc>) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now = to;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Render `at` as a filesystem-safe stamp that sorts lexicographically in
/// time order, e.g. `2026-10-18T09-30-00-000Z`.
pub fn file_stamp(at: DateTime<Utc>) -> String {
    at.format("%Y-%m-%dT%H-%M-%S-%3fZ").to_string()
}

/// Inverse of [`file_stamp`]. Returns None for names that do not carry a stamp.
pub fn parse_file_stamp(stamp: &str) -> Option<DateTime<Utc>> {
    let trimmed = stamp.get(..24)?;
    chrono::NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%dT%H-%M-%S-%3fZ")
        .ok()
        .map(|naive| naive.and_utc())
}
