//! ---
//! ems_section: "02-telemetry-aggregation"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Telemetry aggregation over the append-only event log."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::collections::VecDeque;
use std::path::PathBuf;

use pvw_persistence::{DataRecord, EventLogTail, EventRecord, PredictionRecord, Result};

/// Running summary of the event log, advanced by the records appended since
/// the previous refresh.
#[derive(Debug)]
pub(crate) struct LogIndex {
    tail: EventLogTail,
    last_data: Option<DataRecord>,
    last_prediction: Option<PredictionRecord>,
    recent: VecDeque<EventRecord>,
    capacity: usize,
}

impl LogIndex {
    pub(crate) fn new(path: impl Into<PathBuf>, capacity: usize) -> Self {
        Self {
            tail: EventLogTail::new(path),
            last_data: None,
            last_prediction: None,
            recent: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Fold newly committed records into the summary.
    pub(crate) fn refresh(&mut self) -> Result<()> {
        let batch = self.tail.poll()?;
        if batch.reset {
            self.clear();
        }
        for record in batch.records {
            self.apply(record);
        }
        Ok(())
    }

    /// Drop everything and reread the log on the next refresh.
    pub(crate) fn invalidate(&mut self) {
        self.tail.rewind();
        self.clear();
    }

    pub(crate) fn last_data(&self) -> Option<&DataRecord> {
        self.last_data.as_ref()
    }

    pub(crate) fn last_prediction(&self) -> Option<&PredictionRecord> {
        self.last_prediction.as_ref()
    }

    pub(crate) fn recent(&self) -> impl Iterator<Item = &EventRecord> {
        self.recent.iter()
    }

    fn apply(&mut self, record: EventRecord) {
        match &record {
            EventRecord::Data(data) => self.last_data = Some(data.clone()),
            EventRecord::Prediction(prediction) => {
                self.last_prediction = Some(prediction.clone())
            }
        }
        if self.recent.len() == self.capacity {
            self.recent.pop_front();
        }
        self.recent.push_back(record);
    }

    fn clear(&mut self) {
        self.last_data = None;
        self.last_prediction = None;
        self.recent.clear();
    }
}
