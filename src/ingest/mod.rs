//! Ingestion: raw participant logs in, typed event records out.

pub mod events;
pub mod feeds;
pub mod parser;
pub mod sanitize;

pub use events::{
    assigned_condition, embedded_survey, trial_condition, EventPayload, EventPhase, EventRecord,
    TrialRecord,
};
pub use feeds::{
    load_feed_files, raw_events_from_datastring, read_question_feed, read_trial_feed, FeedError,
    FeedStats,
};
pub use parser::{parse_log, parse_record, ParseReport, ParsedLog, SkipReason, SkippedRecord};
