//! ---
//! ems_section: "02-telemetry-aggregation"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Telemetry aggregation over the append-only event log."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Instant;

use parking_lot::Mutex;
use pvw_common::StorageConfig;
use pvw_metrics::DashboardMetrics;
use pvw_persistence::{PersistenceError, StatusStore};
use tracing::{debug, warn};

use crate::index::LogIndex;
use crate::snapshot::DashboardSnapshot;
use crate::window::WindowEntry;

const REASON_NO_DATA: &str = "no_data";

/// Fail-open read API over the event log and the status record.
///
/// Safe to share between request handlers; queries serialise on an internal
/// index but never wait on the simulation process.
#[derive(Debug)]
pub struct TelemetryAggregator {
    log_path: PathBuf,
    status: StatusStore,
    index: Mutex<LogIndex>,
    metrics: Option<DashboardMetrics>,
}

impl TelemetryAggregator {
    pub fn new(storage: &StorageConfig, metrics: Option<DashboardMetrics>) -> Self {
        Self::from_paths(
            storage.event_log_path(),
            storage.status_path(),
            storage.window_size,
            metrics,
        )
    }

    pub fn from_paths(
        event_log: impl Into<PathBuf>,
        status_file: impl Into<PathBuf>,
        window_size: usize,
        metrics: Option<DashboardMetrics>,
    ) -> Self {
        let log_path = event_log.into();
        Self {
            index: Mutex::new(LogIndex::new(log_path.clone(), window_size.max(1))),
            log_path,
            status: StatusStore::new(status_file),
            metrics,
        }
    }

    pub fn event_log_path(&self) -> &Path {
        &self.log_path
    }

    pub fn status_path(&self) -> &Path {
        self.status.path()
    }

    /// Current dashboard state, or the demo snapshot when no telemetry can be read.
    pub fn snapshot(&self) -> DashboardSnapshot {
        self.record_query("snapshot");

        let mut index = self.index.lock();
        if let Err(err) = self.refresh(&mut index) {
            self.fallback(&err);
            return DashboardSnapshot::demo();
        }
        let Some(data) = index.last_data() else {
            debug!(path = %self.log_path.display(), "event log holds no telemetry yet");
            self.record_fallback(REASON_NO_DATA);
            return DashboardSnapshot::demo();
        };

        let status = match self.status.load() {
            Ok(status) => status,
            Err(err) => {
                self.fallback(&err);
                return DashboardSnapshot::demo();
            }
        };
        DashboardSnapshot::compose(data, index.last_prediction(), &status)
    }

    /// The most recent records in append order, or nothing when the log cannot be read.
    pub fn recent_window(&self) -> Vec<WindowEntry> {
        self.record_query("window");

        let mut index = self.index.lock();
        if let Err(err) = self.refresh(&mut index) {
            self.fallback(&err);
            return Vec::new();
        }
        index.recent().map(WindowEntry::from).collect()
    }

    fn refresh(&self, index: &mut LogIndex) -> Result<(), PersistenceError> {
        let started = Instant::now();
        let result = index.refresh();
        if let Some(metrics) = &self.metrics {
            metrics.observe_read(started.elapsed().as_secs_f64());
        }
        if result.is_err() {
            index.invalidate();
        }
        result
    }

    fn fallback(&self, err: &PersistenceError) {
        match err {
            PersistenceError::Unavailable { source, .. }
                if source.kind() == ErrorKind::NotFound =>
            {
                debug!(error = %err, "store not present; serving fallback")
            }
            _ => warn!(
                error = %err,
                reason = err.reason(),
                "store read failed; serving fallback"
            ),
        }
        self.record_fallback(err.reason());
    }

    fn record_query(&self, kind: &str) {
        if let Some(metrics) = &self.metrics {
            metrics.record_query(kind);
        }
    }

    fn record_fallback(&self, reason: &str) {
        if let Some(metrics) = &self.metrics {
            metrics.record_fallback(reason);
        }
    }
}
