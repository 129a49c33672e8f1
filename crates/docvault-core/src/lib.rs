// ABOUTME: Core library for docvault, containing document envelopes, record types and report types.
// ABOUTME: This crate does no IO; the store crate builds the engine and services on top of it.

pub mod activity;
pub mod builder;
pub mod checksum;
pub mod clock;
pub mod document;
pub mod duplicate;
pub mod entity;
pub mod error;
pub mod health;
pub mod lead;
pub mod protection;
pub mod result;
pub mod settings;
pub mod snapshot;

pub use activity::{ActivityLog, ActivityStats, DbChange, DbOperation, NewActivity, Severity, UserSession};
pub use builder::{Builder, BuilderStats, IMPORT_SOURCE};
pub use checksum::{checksum, payload_checksum};
pub use clock::{Clock, ManualClock, SystemClock};
pub use document::{DocumentMetadata, Envelope, Integrity, ParsedDocument, PayloadShape};
pub use duplicate::{Conflict, DuplicatePolicy, DuplicateRule};
pub use entity::Entity;
pub use error::{CollectionError, ErrorCode, StoreError};
pub use health::{CriticalDocument, HealthStatus, LayoutReport, RecoverySummary};
pub use lead::Lead;
pub use result::OpResult;
pub use settings::Settings;
pub use snapshot::{BackupManifest, BackupReport, BackupStatus};
