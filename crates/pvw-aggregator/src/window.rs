//! ---
//! ems_section: "02-telemetry-aggregation"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Telemetry aggregation over the append-only event log."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use pvw_persistence::{EventRecord, ForecastPoint};
use serde::{Deserialize, Serialize};

use crate::snapshot::Scalars;

/// Telemetry sample as rendered in the history window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindowReading {
    pub timestamp: String,
    #[serde(flatten)]
    pub scalars: Scalars,
}

/// One event log record reshaped for the terminal-style history view.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum WindowEntry {
    Data {
        #[serde(rename = "rowNumber")]
        row_number: u64,
        timestamp: String,
        data: WindowReading,
    },
    Prediction {
        timestamp: String,
        /// Serialised as `null`; prediction entries carry no telemetry.
        #[serde(default)]
        data: (),
        predictions: Vec<ForecastPoint>,
    },
}

impl From<&EventRecord> for WindowEntry {
    fn from(record: &EventRecord) -> Self {
        match record {
            EventRecord::Data(data) => WindowEntry::Data {
                row_number: data.data.row_number,
                timestamp: data.data.timestamp.clone(),
                data: WindowReading {
                    timestamp: data.data.timestamp.clone(),
                    scalars: Scalars::from(&data.data),
                },
            },
            EventRecord::Prediction(prediction) => WindowEntry::Prediction {
                timestamp: prediction.timestamp.clone(),
                data: (),
                predictions: prediction.data.predictions.clone(),
            },
        }
    }
}
