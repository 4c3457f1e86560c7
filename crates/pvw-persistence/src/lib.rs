//! ---
//! ems_section: "03-persistence-logging"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Event log and status record storage shared with the producer."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
//! File-resident stores shared between the simulation producer and the
//! dashboard: the append-only event log and the single status record.
#![warn(missing_docs)]

use std::path::PathBuf;

/// Result alias used throughout the persistence crate.
pub type Result<T> = std::result::Result<T, PersistenceError>;

/// Error type for the persistence subsystem.
#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    /// The store file is missing or cannot be opened.
    #[error("store unavailable at {path}: {source}")]
    Unavailable {
        /// Path of the store that could not be opened.
        path: PathBuf,
        /// Underlying open failure.
        #[source]
        source: std::io::Error,
    },
    /// The store exists but its committed content does not parse.
    #[error("store corrupt at {path}: {reason}")]
    Corrupt {
        /// Path of the offending store.
        path: PathBuf,
        /// Parser diagnostic, including the line number for line-delimited logs.
        reason: String,
    },
    /// Wrapper for IO errors encountered while reading/writing persistence files.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// Wrapper for JSON serialization issues.
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl PersistenceError {
    /// Short, stable label used for metrics and log fields.
    pub fn reason(&self) -> &'static str {
        match self {
            PersistenceError::Unavailable { .. } => "unavailable",
            PersistenceError::Corrupt { .. } => "corrupt",
            PersistenceError::Io(_) => "io",
            PersistenceError::Json(_) => "serialization",
        }
    }
}

pub mod event_log;
pub mod record;
pub mod status;

pub use event_log::{read_all, EventLogTail, EventLogWriter, TailBatch, LOG_FORMAT_VERSION};
pub use record::{
    DataRecord, EventRecord, ForecastBatch, ForecastPoint, PredictionRecord, TelemetryReading,
};
pub use status::{OperatingMode, StatusRecord, StatusStore};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_reason_labels() {
        let err = PersistenceError::Corrupt {
            path: PathBuf::from("data/terminal_log.jsonl"),
            reason: "line 3: expected value".into(),
        };
        assert_eq!(err.reason(), "corrupt");
        assert_eq!(
            format!("{err}"),
            "store corrupt at data/terminal_log.jsonl: line 3: expected value"
        );
    }
}
