//! ---
//! ems_section: "02-telemetry-aggregation"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Telemetry aggregation over the append-only event log."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use chrono::Utc;
use pvw_persistence::{
    DataRecord, ForecastPoint, OperatingMode, PredictionRecord, StatusRecord, TelemetryReading,
};
use serde::{Deserialize, Serialize};

/// Method label shown for forecast points that carry none.
pub const UNKNOWN_METHOD: &str = "Unknown";

/// Scalar telemetry fields shown on the dashboard.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Scalars {
    pub real_power: f64,
    pub daily_prod: f64,
    pub ac_current: f64,
    pub ac_voltage: f64,
    pub temp_inverter: f64,
    pub cumulative_prod: f64,
    pub ac_freq: f64,
}

/// Placeholder values rendered while no telemetry is available.
pub const DEMO_SCALARS: Scalars = Scalars {
    real_power: 160.0,
    daily_prod: 2.5,
    ac_current: 2.8,
    ac_voltage: 230.0,
    temp_inverter: 46.0,
    cumulative_prod: 4750.0,
    ac_freq: 50.01,
};

impl From<&TelemetryReading> for Scalars {
    fn from(reading: &TelemetryReading) -> Self {
        Self {
            real_power: reading.real_power,
            daily_prod: reading.daily_prod,
            ac_current: reading.ac_current,
            ac_voltage: reading.ac_voltage,
            temp_inverter: reading.temp_inverter,
            cumulative_prod: reading.cumulative_prod,
            ac_freq: reading.ac_freq,
        }
    }
}

/// Forecast point with presentation defaults applied.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionView {
    pub timestamp: String,
    pub predicted_power: f64,
    pub method: String,
    pub confidence: f64,
}

impl From<&ForecastPoint> for PredictionView {
    fn from(point: &ForecastPoint) -> Self {
        Self {
            timestamp: point.timestamp.clone(),
            predicted_power: point.predicted_power,
            method: point
                .method
                .as_deref()
                .filter(|method| !method.is_empty())
                .unwrap_or(UNKNOWN_METHOD)
                .to_owned(),
            confidence: point.confidence.unwrap_or(0.0),
        }
    }
}

/// Derived "current state" view served to dashboard clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DashboardSnapshot {
    pub timestamp: String,
    #[serde(flatten)]
    pub scalars: Scalars,
    pub predictions: Vec<PredictionView>,
    pub status: OperatingMode,
    pub last_update: String,
    pub model_accuracy: f64,
    pub predictions_today: u64,
}

impl DashboardSnapshot {
    /// The fixed placeholder snapshot used by every fallback path.
    pub fn demo() -> Self {
        let now = Utc::now().to_rfc3339();
        Self {
            timestamp: now.clone(),
            scalars: DEMO_SCALARS,
            predictions: Vec::new(),
            status: OperatingMode::Demo,
            last_update: now,
            model_accuracy: 0.0,
            predictions_today: 0,
        }
    }

    /// Combine the latest telemetry, the latest forecast batch, and the status record.
    pub fn compose(
        data: &DataRecord,
        prediction: Option<&PredictionRecord>,
        status: &StatusRecord,
    ) -> Self {
        let predictions = prediction
            .map(|record| {
                record
                    .data
                    .predictions
                    .iter()
                    .map(PredictionView::from)
                    .collect()
            })
            .unwrap_or_default();
        Self {
            timestamp: data.data.timestamp.clone(),
            scalars: Scalars::from(&data.data),
            predictions,
            status: status.status,
            last_update: status.last_update.clone(),
            model_accuracy: status.model_accuracy,
            predictions_today: status.predictions_today,
        }
    }

    /// Whether this snapshot carries the placeholder values.
    pub fn is_demo(&self) -> bool {
        self.status == OperatingMode::Demo
            && self.scalars == DEMO_SCALARS
            && self.predictions.is_empty()
    }
}
