//! ---
//! ems_section: "11-simulation"
//! ems_subsection: "01-bootstrap"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Trend-based placeholder forecaster."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use chrono::{Duration, NaiveDateTime};
use pvw_persistence::{ForecastBatch, ForecastPoint};

use crate::source::TIMESTAMP_FORMAT;

pub const METHOD: &str = "Trend-based";
pub const CONFIDENCE: f64 = 60.0;
/// Samples required before the first batch is issued.
pub const MIN_SAMPLES: usize = 10;
/// Samples the trend is fitted over.
pub const TREND_WINDOW: usize = 20;
pub const STEP_MINUTES: i64 = 15;
/// One day of quarter-hour steps.
pub const MAX_HORIZON: usize = 96;

/// Linear extrapolation of recent power values.
#[derive(Debug, Clone)]
pub struct TrendForecaster {
    horizon: usize,
}

impl TrendForecaster {
    pub fn new(horizon: usize) -> Self {
        Self {
            horizon: horizon.clamp(1, MAX_HORIZON),
        }
    }

    /// Forecast from `history` (oldest first), anchored at `now`.
    ///
    /// Returns `None` until [`MIN_SAMPLES`] values are available.
    pub fn forecast(&self, history: &[f64], now: NaiveDateTime) -> Option<ForecastBatch> {
        if history.len() < MIN_SAMPLES {
            return None;
        }
        let recent = &history[history.len().saturating_sub(TREND_WINDOW)..];
        let current = *recent.last()?;
        let slope = slope(recent);

        let predictions = (1..=self.horizon)
            .map_while(|step| {
                let offset = Duration::try_minutes(STEP_MINUTES * i64::try_from(step).ok()?)?;
                let at = now.checked_add_signed(offset)?;
                let mut point = ForecastPoint::new(
                    at.format(TIMESTAMP_FORMAT).to_string(),
                    (current + slope * step as f64).max(0.0),
                );
                point.prediction_number = u32::try_from(step).ok();
                point.method = Some(METHOD.to_owned());
                point.confidence = Some(CONFIDENCE);
                Some(point)
            })
            .collect();

        Some(ForecastBatch {
            predictions,
            method: Some(METHOD.to_owned()),
            confidence: Some(CONFIDENCE),
            sequence_length: u32::try_from(history.len()).ok(),
        })
    }
}

/// Least-squares slope against sample index.
fn slope(values: &[f64]) -> f64 {
    let n = values.len() as f64;
    if values.len() < 2 {
        return 0.0;
    }
    let mean_x = (n - 1.0) / 2.0;
    let mean_y = values.iter().sum::<f64>() / n;
    let (num, den) = values
        .iter()
        .enumerate()
        .fold((0.0, 0.0), |(num, den), (i, y)| {
            let dx = i as f64 - mean_x;
            (num + dx * (y - mean_y), den + dx * dx)
        });
    if den == 0.0 {
        0.0
    } else {
        num / den
    }
}
