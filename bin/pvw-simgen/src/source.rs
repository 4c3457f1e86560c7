//! ---
//! ems_section: "11-simulation"
//! ems_subsection: "01-bootstrap"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Telemetry row sources for the simulation producer."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::f64::consts::PI;
use std::fs::File;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime};
use csv::ReaderBuilder;
use serde::Deserialize;
use tracing::warn;

/// Display format used for row and forecast timestamps.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// One inverter sample as exported by the monitoring portal.
#[derive(Debug, Clone, PartialEq)]
pub struct InverterRow {
    pub timestamp: NaiveDateTime,
    pub real_power: f64,
    pub daily_prod: f64,
    pub ac_current: f64,
    pub ac_voltage: f64,
    pub temp_inverter: f64,
    pub cumulative_prod: f64,
    pub ac_freq: f64,
}

#[derive(Debug, Deserialize)]
struct RawRow {
    timestamp: String,
    real_power: Option<f64>,
    daily_prod: Option<f64>,
    ac_current: Option<f64>,
    ac_voltage: Option<f64>,
    temp_inverter: Option<f64>,
    cumulative_prod: Option<f64>,
    ac_freq: Option<f64>,
}

impl RawRow {
    fn into_row(self) -> Option<InverterRow> {
        Some(InverterRow {
            timestamp: parse_timestamp(&self.timestamp)?,
            real_power: self.real_power?,
            daily_prod: self.daily_prod?,
            ac_current: self.ac_current?,
            ac_voltage: self.ac_voltage?,
            temp_inverter: self.temp_inverter?,
            cumulative_prod: self.cumulative_prod?,
            ac_freq: self.ac_freq?,
        })
    }
}

pub fn parse_timestamp(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    NaiveDateTime::parse_from_str(raw, TIMESTAMP_FORMAT)
        .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f"))
        .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y/%m/%d %H:%M:%S"))
        .ok()
        .or_else(|| DateTime::parse_from_rfc3339(raw).ok().map(|dt| dt.naive_local()))
}

/// Load a CSV export, dropping incomplete rows and ordering by time.
pub fn load_csv(path: &Path) -> Result<Vec<InverterRow>> {
    let file = File::open(path)
        .with_context(|| format!("unable to open telemetry csv {}", path.display()))?;
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_reader(file);

    let mut rows = Vec::new();
    let mut dropped = 0usize;
    for (index, raw) in reader.deserialize::<RawRow>().enumerate() {
        let raw = raw.with_context(|| {
            format!("invalid telemetry row {} in {}", index + 1, path.display())
        })?;
        match raw.into_row() {
            Some(row) => rows.push(row),
            None => dropped += 1,
        }
    }
    if dropped > 0 {
        warn!(dropped, path = %path.display(), "skipped incomplete telemetry rows");
    }
    rows.sort_by_key(|row| row.timestamp);
    Ok(rows)
}

/// Deterministic clear-sky day sampled every 15 minutes starting at midnight.
pub fn synthetic_day(samples: usize) -> Vec<InverterRow> {
    let start = NaiveDate::from_ymd_opt(2025, 6, 30)
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .unwrap_or_default();
    let step_hours = 0.25;
    let peak_w = 9_500.0;

    let mut daily_kwh = 0.0;
    let mut cumulative_kwh = 4_700.0;
    (0..samples)
        .map(|i| {
            let hour = (i as f64 * step_hours) % 24.0;
            // Sunlight between 05:00 and 21:00.
            let phase = (hour - 5.0) / 16.0;
            let sun = if (0.0..=1.0).contains(&phase) {
                (phase * PI).sin()
            } else {
                0.0
            };
            let real_power = (peak_w * sun * sun).round();
            let energy = real_power / 1000.0 * step_hours;
            if hour == 0.0 {
                daily_kwh = 0.0;
            }
            daily_kwh += energy;
            cumulative_kwh += energy;
            let ac_voltage = 230.0 + 2.0 * sun;
            InverterRow {
                timestamp: start + Duration::minutes(15 * i as i64),
                real_power,
                daily_prod: round2(daily_kwh),
                ac_current: round2(real_power / ac_voltage / 3.0),
                ac_voltage: round2(ac_voltage),
                temp_inverter: round2(25.0 + 25.0 * sun),
                cumulative_prod: round2(cumulative_kwh),
                ac_freq: 50.0 + if i % 2 == 0 { 0.01 } else { -0.01 },
            }
        })
        .collect()
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn csv_rows_are_cleaned_and_sorted() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            "timestamp,real_power,daily_prod,ac_current,ac_voltage,temp_inverter,cumulative_prod,ac_freq"
        )
        .unwrap();
        writeln!(file, "2025-06-30 10:15:00,1200,3.5,1.7,231.0,40.1,4712.2,50.01").unwrap();
        writeln!(file, "2025-06-30 10:00:00,1100,3.2,1.6,230.5,39.8,4711.9,49.99").unwrap();
        writeln!(file, "2025-06-30 10:30:00,,3.8,1.8,231.2,40.4,4712.5,50.00").unwrap();
        file.flush().unwrap();

        let rows = load_csv(file.path()).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].real_power, 1100.0);
        assert_eq!(rows[1].real_power, 1200.0);
    }

    #[test]
    fn synthetic_day_is_dark_at_night_and_peaks_midday() {
        let rows = synthetic_day(96);
        assert_eq!(rows.len(), 96);
        assert_eq!(rows[0].real_power, 0.0);
        let peak = rows
            .iter()
            .max_by(|a, b| a.real_power.total_cmp(&b.real_power))
            .unwrap();
        assert_eq!(peak.timestamp.format("%H:%M").to_string(), "13:00");
        assert!(rows
            .windows(2)
            .all(|pair| pair[1].cumulative_prod >= pair[0].cumulative_prod));
    }

    #[test]
    fn timestamps_accept_common_layouts() {
        assert!(parse_timestamp("2025-06-30 10:00:00").is_some());
        assert!(parse_timestamp("2025-06-30T10:00:00").is_some());
        assert!(parse_timestamp("2025-06-30T10:00:00+02:00").is_some());
        assert!(parse_timestamp("yesterday").is_none());
    }
}
