//! ---
//! ems_section: "03-persistence-logging"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Event log and status record storage shared with the producer."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::fs::{self, File};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::record::now_rfc3339;
use crate::{PersistenceError, Result};

/// Operating mode reported by the simulation producer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperatingMode {
    /// No producer has run yet; the dashboard shows placeholder values.
    #[default]
    Demo,
    /// The producer is loading its inputs.
    Starting,
    /// The producer is appending records.
    Active,
    /// The producer replayed all of its input.
    Completed,
    /// The producer stopped on an input error.
    Error,
}

/// Last-known aggregate status, overwritten in place by the producer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusRecord {
    /// Operating mode.
    #[serde(default)]
    pub status: OperatingMode,
    /// Cumulative model accuracy (0-100).
    #[serde(default)]
    pub model_accuracy: f64,
    /// Prediction batches issued in the current day.
    #[serde(default)]
    pub predictions_today: u64,
    /// Time of the producer's last update.
    #[serde(default = "now_rfc3339")]
    pub last_update: String,
    /// Human readable progress note.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Input window used by the forecaster.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sequence_length: Option<u32>,
    /// Number of points in each forecast batch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prediction_horizon: Option<u32>,
}

impl StatusRecord {
    /// Record used when no producer has written a status yet.
    pub fn initial() -> Self {
        Self {
            status: OperatingMode::Demo,
            model_accuracy: 0.0,
            predictions_today: 0,
            last_update: now_rfc3339(),
            message: None,
            sequence_length: None,
            prediction_horizon: None,
        }
    }

    /// Status with the given mode and message, stamped now.
    pub fn with_mode(mode: OperatingMode, message: impl Into<String>) -> Self {
        Self {
            status: mode,
            message: Some(message.into()),
            ..Self::initial()
        }
    }
}

impl Default for StatusRecord {
    fn default() -> Self {
        Self::initial()
    }
}

/// Single-record store backed by one JSON file.
#[derive(Debug, Clone)]
pub struct StatusStore {
    path: PathBuf,
}

impl StatusStore {
    /// Bind the store to a file path; the file need not exist.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the current status; a missing or blank file yields [`StatusRecord::initial`].
    pub fn load(&self) -> Result<StatusRecord> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(StatusRecord::initial()),
            Err(source) => {
                return Err(PersistenceError::Unavailable {
                    path: self.path.clone(),
                    source,
                })
            }
        };
        if bytes.iter().all(|b| b.is_ascii_whitespace()) {
            return Ok(StatusRecord::initial());
        }
        serde_json::from_slice(&bytes).map_err(|err| PersistenceError::Corrupt {
            path: self.path.clone(),
            reason: err.to_string(),
        })
    }

    /// Overwrite the status atomically (temp file, then rename).
    pub fn store(&self, status: &StatusRecord) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let mut staging = self.path.clone().into_os_string();
        staging.push(".tmp");
        let staging = PathBuf::from(staging);

        let mut file = File::create(&staging)?;
        file.write_all(&serde_json::to_vec_pretty(status)?)?;
        file.sync_all()?;
        fs::rename(&staging, &self.path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn missing_file_yields_initial_status() {
        let dir = tempdir().unwrap();
        let store = StatusStore::new(dir.path().join("status.json"));
        let status = store.load().unwrap();
        assert_eq!(status.status, OperatingMode::Demo);
        assert_eq!(status.model_accuracy, 0.0);
        assert_eq!(status.predictions_today, 0);
        assert!(!status.last_update.is_empty());
    }

    #[test]
    fn store_then_load() {
        let dir = tempdir().unwrap();
        let store = StatusStore::new(dir.path().join("nested").join("status.json"));
        let mut status = StatusRecord::with_mode(OperatingMode::Active, "Processing row 4/96");
        status.model_accuracy = 75.0;
        status.predictions_today = 4;
        store.store(&status).unwrap();

        assert_eq!(store.load().unwrap(), status);
        assert!(!dir.path().join("nested").join("status.json.tmp").exists());
    }

    #[test]
    fn accepts_producer_document_with_extra_fields() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("status.json");
        fs::write(
            &path,
            r#"{
                "status": "completed",
                "message": "Simulation completed. Processed 96 rows.",
                "timestamp": "2025-06-30T18:00:00",
                "last_update": "2025-06-30T18:00:00",
                "model_accuracy": 87.5,
                "predictions_today": 87,
                "sequence_length": 96,
                "prediction_horizon": 4
            }"#,
        )
        .unwrap();

        let status = StatusStore::new(&path).load().unwrap();
        assert_eq!(status.status, OperatingMode::Completed);
        assert_eq!(status.predictions_today, 87);
        assert_eq!(status.prediction_horizon, Some(4));
        assert_eq!(status.last_update, "2025-06-30T18:00:00");
    }

    #[test]
    fn garbage_is_corrupt() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("status.json");
        fs::write(&path, "{\"status\": ").unwrap();
        let err = StatusStore::new(&path).load().unwrap_err();
        assert_eq!(err.reason(), "corrupt");
    }
}
