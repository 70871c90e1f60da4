//! Robot tutor study backend
//!
//! Reconciles per-participant interaction logs into a canonical dataset,
//! assigns experimental conditions under concurrent arrival, derives
//! performance and compensation metrics, and runs between-arm hypothesis
//! tests. The CLI in `main.rs` and the integration tests consume this library.

pub mod assignment;
pub mod config;
pub mod dataset;
pub mod demographics;
pub mod hypothesis;
pub mod ingest;
pub mod metrics;
pub mod models;
pub mod pipeline;
pub mod report;
pub mod session;
pub mod store;

pub use assignment::{AssignmentConfig, ConditionAssignor};
pub use config::StudyConfig;
pub use models::{Condition, ParticipantId, ParticipantStatus};
pub use pipeline::{analyze, analyze_store, AnalysisOutput};
pub use session::{RecordedEvents, StudySession};
pub use store::{MemoryParticipantStore, ParticipantStore, SqliteParticipantStore, StoreError};
