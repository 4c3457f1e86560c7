//! ---
//! ems_section: "03-persistence-logging"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Event log and status record storage shared with the producer."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
//! Typed records carried by the event log.
//!
//! The wire shape follows what the simulation producer writes:
//! `{"type": "data" | "prediction", "timestamp": ..., "data": {...}}`.
//! Timestamps are kept exactly as the producer formatted them; the log is
//! ordered by append order only.

use chrono::Utc;
use serde::{Deserialize, Serialize};

/// One entry of the append-only log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum EventRecord {
    /// A telemetry sample read from the inverter.
    Data(DataRecord),
    /// A batch of forecast points issued by the producer.
    Prediction(PredictionRecord),
}

impl EventRecord {
    /// Wrap a telemetry reading, stamping it with the current time.
    pub fn data(reading: TelemetryReading) -> Self {
        EventRecord::Data(DataRecord {
            timestamp: now_rfc3339(),
            data: reading,
        })
    }

    /// Wrap a forecast batch, stamping it with the current time.
    pub fn prediction(batch: ForecastBatch) -> Self {
        EventRecord::Prediction(PredictionRecord {
            timestamp: now_rfc3339(),
            data: batch,
        })
    }

    /// Wire tag of the record kind.
    pub fn kind(&self) -> &'static str {
        match self {
            EventRecord::Data(_) => "data",
            EventRecord::Prediction(_) => "prediction",
        }
    }
}

/// Telemetry record envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataRecord {
    /// Time the producer logged the record.
    pub timestamp: String,
    /// Scalar telemetry fields.
    pub data: TelemetryReading,
}

/// Scalar inverter telemetry for one sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryReading {
    /// Sequence number of the sample within the producer's input.
    #[serde(rename = "rowNumber", default)]
    pub row_number: u64,
    /// Sample time as reported by the inverter.
    pub timestamp: String,
    /// Instantaneous AC output power (W).
    pub real_power: f64,
    /// Energy produced today (kWh).
    pub daily_prod: f64,
    /// AC current (A).
    pub ac_current: f64,
    /// AC voltage (V).
    pub ac_voltage: f64,
    /// Inverter temperature (°C).
    pub temp_inverter: f64,
    /// Lifetime energy produced (kWh).
    pub cumulative_prod: f64,
    /// AC output frequency (Hz).
    pub ac_freq: f64,
}

/// Forecast record envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionRecord {
    /// Time the producer logged the record.
    pub timestamp: String,
    /// Forecast points and batch-level metadata.
    pub data: ForecastBatch,
}

/// Ordered forecast points issued together.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ForecastBatch {
    /// Individual forecast points in issue order.
    #[serde(default)]
    pub predictions: Vec<ForecastPoint>,
    /// Forecasting method applied to the whole batch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    /// Batch confidence (0-100).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    /// Number of samples the forecaster looked at.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sequence_length: Option<u32>,
}

/// A single forecast value for a future instant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastPoint {
    /// One-based position in the batch.
    #[serde(
        rename = "predictionNumber",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub prediction_number: Option<u32>,
    /// Instant the forecast applies to.
    pub timestamp: String,
    /// Forecast power (W).
    pub predicted_power: f64,
    /// Method label, when the producer supplies one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    /// Confidence percentage (0-100), when the producer supplies one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
}

impl ForecastPoint {
    /// Bare forecast point without method or confidence.
    pub fn new(timestamp: impl Into<String>, predicted_power: f64) -> Self {
        Self {
            prediction_number: None,
            timestamp: timestamp.into(),
            predicted_power,
            method: None,
            confidence: None,
        }
    }
}

pub(crate) fn now_rfc3339() -> String {
    Utc::now().to_rfc3339()
}
