//! ---
//! ems_section: "02-telemetry-aggregation"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Telemetry aggregation over the append-only event log."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::fs;
use std::path::Path;

use pvw_aggregator::{TelemetryAggregator, WindowEntry, DEMO_SCALARS};
use pvw_common::StorageConfig;
use pvw_persistence::{
    EventLogWriter, EventRecord, ForecastBatch, ForecastPoint, OperatingMode, StatusRecord,
    StatusStore, TelemetryReading,
};
use serde_json::json;
use tempfile::{tempdir, TempDir};

fn reading(row: u64, real_power: f64) -> TelemetryReading {
    TelemetryReading {
        row_number: row,
        timestamp: format!("2025-06-30 10:{:02}:00", row % 60),
        real_power,
        daily_prod: 1.2,
        ac_current: 2.1,
        ac_voltage: 231.5,
        temp_inverter: 41.0,
        cumulative_prod: 4712.4,
        ac_freq: 49.98,
    }
}

fn forecast(points: &[(&str, f64)]) -> ForecastBatch {
    ForecastBatch {
        predictions: points
            .iter()
            .map(|(ts, power)| ForecastPoint::new(*ts, *power))
            .collect(),
        ..ForecastBatch::default()
    }
}

struct Fixture {
    dir: TempDir,
    storage: StorageConfig,
}

impl Fixture {
    fn new() -> Self {
        let dir = tempdir().unwrap();
        let storage = StorageConfig::in_dir(dir.path());
        Self { dir, storage }
    }

    fn writer(&self) -> EventLogWriter {
        EventLogWriter::open(&self.storage.event_log_path()).unwrap()
    }

    fn aggregator(&self) -> TelemetryAggregator {
        TelemetryAggregator::new(&self.storage, None)
    }

    fn write_status(&self, status: &StatusRecord) {
        StatusStore::new(self.storage.status_path())
            .store(status)
            .unwrap();
    }

    fn log_path(&self) -> std::path::PathBuf {
        self.storage.event_log_path()
    }

    fn root(&self) -> &Path {
        self.dir.path()
    }
}

fn data_rows(window: &[WindowEntry]) -> Vec<u64> {
    window
        .iter()
        .filter_map(|entry| match entry {
            WindowEntry::Data { row_number, .. } => Some(*row_number),
            WindowEntry::Prediction { .. } => None,
        })
        .collect()
}

#[test]
fn absent_log_yields_demo_snapshot_and_empty_window() {
    let fixture = Fixture::new();
    let aggregator = fixture.aggregator();

    let snapshot = aggregator.snapshot();
    assert!(snapshot.is_demo());
    assert_eq!(snapshot.scalars.real_power, 160.0);
    assert_eq!(snapshot.scalars.ac_voltage, 230.0);
    assert_eq!(snapshot.scalars.ac_freq, 50.01);
    assert_eq!(snapshot.status, OperatingMode::Demo);
    assert!(snapshot.predictions.is_empty());
    assert!(aggregator.recent_window().is_empty());
}

#[test]
fn log_without_telemetry_yields_demo_snapshot() {
    let fixture = Fixture::new();
    let mut writer = fixture.writer();
    writer
        .append(&EventRecord::prediction(forecast(&[("t1", 50.0)])))
        .unwrap();

    let aggregator = fixture.aggregator();
    assert!(aggregator.snapshot().is_demo());
    assert_eq!(aggregator.recent_window().len(), 1);
}

#[test]
fn snapshot_uses_last_data_and_last_prediction_by_append_order() {
    let fixture = Fixture::new();
    let mut writer = fixture.writer();
    writer.append(&EventRecord::data(reading(1, 120.0))).unwrap();
    writer
        .append(&EventRecord::prediction(forecast(&[("t1", 50.0), ("t2", 55.0)])))
        .unwrap();
    writer.append(&EventRecord::data(reading(2, 160.0))).unwrap();

    let mut status = StatusRecord::with_mode(OperatingMode::Active, "running");
    status.model_accuracy = 75.0;
    status.predictions_today = 3;
    fixture.write_status(&status);

    let snapshot = fixture.aggregator().snapshot();
    assert_eq!(snapshot.scalars.real_power, 160.0);
    assert_eq!(snapshot.timestamp, reading(2, 0.0).timestamp);
    let points: Vec<_> = snapshot
        .predictions
        .iter()
        .map(|p| (p.timestamp.as_str(), p.predicted_power))
        .collect();
    assert_eq!(points, vec![("t1", 50.0), ("t2", 55.0)]);
    assert!(snapshot.predictions.iter().all(|p| p.method == "Unknown"));
    assert!(snapshot.predictions.iter().all(|p| p.confidence == 0.0));
    assert_eq!(snapshot.status, OperatingMode::Active);
    assert_eq!(snapshot.model_accuracy, 75.0);
    assert_eq!(snapshot.predictions_today, 3);
}

#[test]
fn interleaved_predictions_do_not_shadow_latest_telemetry() {
    let fixture = Fixture::new();
    let mut writer = fixture.writer();
    for row in 1..=5 {
        writer
            .append(&EventRecord::data(reading(row, row as f64 * 10.0)))
            .unwrap();
        writer
            .append(&EventRecord::prediction(forecast(&[("t", row as f64)])))
            .unwrap();
        writer
            .append(&EventRecord::prediction(forecast(&[("u", row as f64 + 0.5)])))
            .unwrap();
    }

    let snapshot = fixture.aggregator().snapshot();
    assert_eq!(snapshot.scalars.real_power, 50.0);
    assert_eq!(snapshot.predictions.len(), 1);
    assert_eq!(snapshot.predictions[0].predicted_power, 5.5);
}

#[test]
fn decorated_predictions_keep_supplied_labels() {
    let fixture = Fixture::new();
    let mut writer = fixture.writer();
    writer.append(&EventRecord::data(reading(1, 80.0))).unwrap();
    let mut point = ForecastPoint::new("t1", 90.0);
    point.method = Some("Trend-based".to_owned());
    point.confidence = Some(60.0);
    writer
        .append(&EventRecord::prediction(ForecastBatch {
            predictions: vec![point],
            ..ForecastBatch::default()
        }))
        .unwrap();

    let snapshot = fixture.aggregator().snapshot();
    assert_eq!(snapshot.predictions[0].method, "Trend-based");
    assert_eq!(snapshot.predictions[0].confidence, 60.0);
}

#[test]
fn window_returns_all_entries_of_a_short_log() {
    let fixture = Fixture::new();
    let mut writer = fixture.writer();
    for row in 1..=4 {
        writer.append(&EventRecord::data(reading(row, 1.0))).unwrap();
    }
    writer
        .append(&EventRecord::prediction(forecast(&[("t1", 2.0)])))
        .unwrap();

    let window = fixture.aggregator().recent_window();
    assert_eq!(window.len(), 5);
    assert_eq!(data_rows(&window), vec![1, 2, 3, 4]);
    assert!(matches!(window[4], WindowEntry::Prediction { .. }));
}

#[test]
fn window_returns_last_ten_entries_in_append_order() {
    let fixture = Fixture::new();
    let mut writer = fixture.writer();
    for row in 1..=25 {
        writer.append(&EventRecord::data(reading(row, 1.0))).unwrap();
    }

    let aggregator = fixture.aggregator();
    let window = aggregator.recent_window();
    assert_eq!(data_rows(&window), (16..=25).collect::<Vec<_>>());

    for row in 26..=28 {
        writer.append(&EventRecord::data(reading(row, 1.0))).unwrap();
    }
    let window = aggregator.recent_window();
    assert_eq!(data_rows(&window), (19..=28).collect::<Vec<_>>());
}

#[test]
fn window_entries_use_presentation_shape() {
    let fixture = Fixture::new();
    let mut writer = fixture.writer();
    writer.append(&EventRecord::data(reading(7, 140.0))).unwrap();
    writer
        .append(&EventRecord::prediction(forecast(&[("t1", 50.0)])))
        .unwrap();

    let window = serde_json::to_value(fixture.aggregator().recent_window()).unwrap();
    assert_eq!(window[0]["type"], json!("data"));
    assert_eq!(window[0]["rowNumber"], json!(7));
    assert_eq!(window[0]["data"]["real_power"], json!(140.0));
    assert_eq!(window[0]["data"]["ac_freq"], json!(49.98));
    assert_eq!(window[1]["type"], json!("prediction"));
    assert_eq!(window[1]["predictions"][0]["predicted_power"], json!(50.0));
    let prediction = window[1].as_object().unwrap();
    assert!(prediction.contains_key("data"));
    assert!(prediction["data"].is_null());
}

#[test]
fn appends_between_queries_are_picked_up() {
    let fixture = Fixture::new();
    let mut writer = fixture.writer();
    writer.append(&EventRecord::data(reading(1, 10.0))).unwrap();

    let aggregator = fixture.aggregator();
    assert_eq!(aggregator.snapshot().scalars.real_power, 10.0);

    writer.append(&EventRecord::data(reading(2, 20.0))).unwrap();
    writer
        .append(&EventRecord::prediction(forecast(&[("t9", 99.0)])))
        .unwrap();
    let snapshot = aggregator.snapshot();
    assert_eq!(snapshot.scalars.real_power, 20.0);
    assert_eq!(snapshot.predictions[0].predicted_power, 99.0);
}

#[test]
fn corrupt_log_falls_back_and_recovers_once_replaced() {
    let fixture = Fixture::new();
    let mut writer = fixture.writer();
    writer.append(&EventRecord::data(reading(1, 10.0))).unwrap();
    drop(writer);
    let mut contents = fs::read_to_string(fixture.log_path()).unwrap();
    contents.push_str("{\"type\":\"data\",\"timestamp\":\n");
    fs::write(fixture.log_path(), contents).unwrap();

    let aggregator = fixture.aggregator();
    assert!(aggregator.snapshot().is_demo());
    assert!(aggregator.recent_window().is_empty());

    fs::remove_file(fixture.log_path()).unwrap();
    let mut writer = fixture.writer();
    writer.append(&EventRecord::data(reading(2, 33.0))).unwrap();
    assert_eq!(aggregator.snapshot().scalars.real_power, 33.0);
    assert_eq!(data_rows(&aggregator.recent_window()), vec![2]);
}

#[test]
fn corrupt_status_falls_back_to_demo() {
    let fixture = Fixture::new();
    let mut writer = fixture.writer();
    writer.append(&EventRecord::data(reading(1, 10.0))).unwrap();
    fs::write(fixture.storage.status_path(), "{ not json").unwrap();

    let aggregator = fixture.aggregator();
    let snapshot = aggregator.snapshot();
    assert!(snapshot.is_demo());
    assert_eq!(snapshot.scalars, DEMO_SCALARS);
    // The log itself is fine, so the window is still served.
    assert_eq!(aggregator.recent_window().len(), 1);
}

#[test]
fn missing_status_uses_initial_record() {
    let fixture = Fixture::new();
    let mut writer = fixture.writer();
    writer.append(&EventRecord::data(reading(1, 10.0))).unwrap();

    let snapshot = fixture.aggregator().snapshot();
    assert_eq!(snapshot.scalars.real_power, 10.0);
    assert_eq!(snapshot.status, OperatingMode::Demo);
    assert_eq!(snapshot.predictions_today, 0);
}

#[test]
fn legacy_array_log_is_served() {
    let fixture = Fixture::new();
    let records = vec![
        EventRecord::data(reading(1, 10.0)),
        EventRecord::prediction(forecast(&[("t1", 50.0)])),
        EventRecord::data(reading(2, 160.0)),
    ];
    fs::create_dir_all(fixture.root()).unwrap();
    fs::write(
        fixture.log_path(),
        serde_json::to_vec_pretty(&records).unwrap(),
    )
    .unwrap();

    let aggregator = fixture.aggregator();
    let snapshot = aggregator.snapshot();
    assert_eq!(snapshot.scalars.real_power, 160.0);
    assert_eq!(snapshot.predictions.len(), 1);
    assert_eq!(data_rows(&aggregator.recent_window()), vec![1, 2]);
}

#[test]
fn custom_window_size_is_honoured() {
    let fixture = Fixture::new();
    let mut writer = fixture.writer();
    for row in 1..=6 {
        writer.append(&EventRecord::data(reading(row, 1.0))).unwrap();
    }
    let aggregator = TelemetryAggregator::from_paths(
        fixture.log_path(),
        fixture.storage.status_path(),
        3,
        None,
    );
    assert_eq!(data_rows(&aggregator.recent_window()), vec![4, 5, 6]);
}
