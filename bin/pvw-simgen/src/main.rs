//! ---
//! ems_section: "11-simulation"
//! ems_subsection: "01-bootstrap"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Reference producer replaying inverter telemetry into the stores."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
//! Appends one `data` record per telemetry row to the event log, follows it
//! with a trend `prediction` record once enough history is buffered, and
//! rewrites the status record after every row.
use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use pvw_common::init_stderr;
use pvw_persistence::{
    EventLogWriter, EventRecord, OperatingMode, StatusRecord, StatusStore, TelemetryReading,
};
use tracing::{error, info};

mod forecast;
mod source;

use forecast::{TrendForecaster, CONFIDENCE, MAX_HORIZON, TREND_WINDOW};
use source::{InverterRow, TIMESTAMP_FORMAT};

const DEFAULT_SYNTHETIC_ROWS: usize = 96;
/// Batches above this confidence count as successful for the accuracy figure.
const SUCCESS_CONFIDENCE: f64 = 50.0;

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Replay inverter telemetry into the PV-Watch event log",
    long_about = None
)]
struct Cli {
    /// Inverter CSV export to replay
    #[arg(long, value_name = "FILE", conflicts_with = "synthetic")]
    csv: Option<PathBuf>,

    /// Number of synthetic 15-minute rows to generate when no CSV is given
    #[arg(long, value_name = "ROWS")]
    synthetic: Option<usize>,

    /// Delay between rows in milliseconds
    #[arg(long, default_value_t = 1000)]
    interval_ms: u64,

    /// Forecast points per prediction batch (at most 96)
    #[arg(long, default_value_t = 4)]
    horizon: usize,

    /// Event log to append to
    #[arg(long, env = "PVW_EVENT_LOG", default_value = "data/terminal_log.jsonl")]
    event_log: PathBuf,

    /// Status record to overwrite
    #[arg(long, env = "PVW_STATUS_FILE", default_value = "data/status.json")]
    status_file: PathBuf,
}

#[derive(Debug, Clone)]
struct ReplaySettings {
    event_log: PathBuf,
    status_file: PathBuf,
    interval: Duration,
    horizon: usize,
}

#[derive(Debug, Default, Clone, Copy, PartialEq)]
struct ReplaySummary {
    rows: usize,
    batches: u64,
    accuracy: f64,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_stderr("info");

    let settings = ReplaySettings {
        event_log: cli.event_log.clone(),
        status_file: cli.status_file.clone(),
        interval: Duration::from_millis(cli.interval_ms),
        horizon: cli.horizon.clamp(1, MAX_HORIZON),
    };
    let status = StatusStore::new(&settings.status_file);
    status.store(&status_with(
        OperatingMode::Starting,
        "Initializing solar monitoring simulation",
        &settings,
    ))?;

    let rows = match load_rows(&cli) {
        Ok(rows) => rows,
        Err(err) => {
            error!(error = %err, "failed to load telemetry");
            status.store(&status_with(OperatingMode::Error, err.to_string(), &settings))?;
            return Err(err);
        }
    };

    let summary = replay(&rows, &settings)?;
    info!(
        rows = summary.rows,
        batches = summary.batches,
        accuracy = summary.accuracy,
        "simulation completed"
    );
    Ok(())
}

fn load_rows(cli: &Cli) -> Result<Vec<InverterRow>> {
    let rows = match &cli.csv {
        Some(path) => {
            info!(path = %path.display(), "loading telemetry export");
            source::load_csv(path)?
        }
        None => source::synthetic_day(cli.synthetic.unwrap_or(DEFAULT_SYNTHETIC_ROWS)),
    };
    if rows.is_empty() {
        return Err(anyhow!("no usable telemetry rows"));
    }
    Ok(rows)
}

fn replay(rows: &[InverterRow], settings: &ReplaySettings) -> Result<ReplaySummary> {
    let mut writer = EventLogWriter::open(&settings.event_log).with_context(|| {
        format!("failed to open event log {}", settings.event_log.display())
    })?;
    let status = StatusStore::new(&settings.status_file);
    let forecaster = TrendForecaster::new(settings.horizon);

    status.store(&status_with(
        OperatingMode::Active,
        "Solar monitoring simulation is running",
        settings,
    ))?;
    info!(
        rows = rows.len(),
        event_log = %settings.event_log.display(),
        "starting replay"
    );

    let mut history: Vec<f64> = Vec::with_capacity(rows.len());
    let mut batches = 0u64;
    let mut successful = 0u64;
    for (index, row) in rows.iter().enumerate() {
        let row_number = index as u64 + 1;
        writer.append(&EventRecord::data(reading(row_number, row)))?;
        info!(
            row = row_number,
            timestamp = %row.timestamp.format(TIMESTAMP_FORMAT),
            real_power = row.real_power,
            "telemetry row appended"
        );

        history.push(row.real_power);
        if let Some(batch) = forecaster.forecast(&history, row.timestamp) {
            batches += 1;
            if batch.confidence.unwrap_or(0.0) > SUCCESS_CONFIDENCE {
                successful += 1;
            }
            info!(
                row = row_number,
                points = batch.predictions.len(),
                window = history.len().min(TREND_WINDOW),
                confidence = CONFIDENCE,
                "forecast batch appended"
            );
            writer.append(&EventRecord::prediction(batch))?;
        }

        let mut update = status_with(
            OperatingMode::Active,
            format!("Processing row {row_number}/{}", rows.len()),
            settings,
        );
        update.model_accuracy = accuracy(successful, batches);
        update.predictions_today = batches;
        status.store(&update)?;

        if !settings.interval.is_zero() && index + 1 < rows.len() {
            thread::sleep(settings.interval);
        }
    }

    let summary = ReplaySummary {
        rows: rows.len(),
        batches,
        accuracy: accuracy(successful, batches),
    };
    let mut done = status_with(
        OperatingMode::Completed,
        format!("Simulation completed. Processed {} rows.", rows.len()),
        settings,
    );
    done.model_accuracy = summary.accuracy;
    done.predictions_today = batches;
    status.store(&done)?;
    Ok(summary)
}

fn reading(row_number: u64, row: &InverterRow) -> TelemetryReading {
    TelemetryReading {
        row_number,
        timestamp: row.timestamp.format(TIMESTAMP_FORMAT).to_string(),
        real_power: row.real_power,
        daily_prod: row.daily_prod,
        ac_current: row.ac_current,
        ac_voltage: row.ac_voltage,
        temp_inverter: row.temp_inverter,
        cumulative_prod: row.cumulative_prod,
        ac_freq: row.ac_freq,
    }
}

fn status_with(
    mode: OperatingMode,
    message: impl Into<String>,
    settings: &ReplaySettings,
) -> StatusRecord {
    let mut status = StatusRecord::with_mode(mode, message);
    status.sequence_length = u32::try_from(TREND_WINDOW).ok();
    status.prediction_horizon = u32::try_from(settings.horizon).ok();
    status
}

fn accuracy(successful: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        successful as f64 / total as f64 * 100.0
    }
}
