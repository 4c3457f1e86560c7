//! ---
//! ems_section: "15-testing-qa-runbook"
//! ems_subsection: "integration-tests"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "End-to-end tests from a supervised producer to the dashboard API."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
#![cfg(unix)]

use std::sync::Arc;
use std::time::Duration;

use pvw_aggregator::TelemetryAggregator;
use pvw_api::{spawn_api_server, ApiServer, ApiState};
use pvw_common::{SimulationConfig, StorageConfig};
use pvw_supervisor::{SimulationCommand, SimulationSupervisor, MSG_STARTED};
use serde_json::Value;
use tempfile::{tempdir, TempDir};

const DATA_LINE: &str = r#"{"type":"data","timestamp":"2025-06-30T12:00:05Z","data":{"rowNumber":1,"timestamp":"2025-06-30 12:00:00","real_power":1500.0,"daily_prod":4.2,"ac_current":6.5,"ac_voltage":231.0,"temp_inverter":41.0,"cumulative_prod":4801.5,"ac_freq":50.0}}"#;
const PREDICTION_LINE: &str = r#"{"type":"prediction","timestamp":"2025-06-30T12:00:06Z","data":{"predictions":[{"predictionNumber":1,"timestamp":"2025-06-30 12:15:00","predicted_power":1620.0,"method":"Trend-based","confidence":60.0},{"timestamp":"2025-06-30 12:30:00","predicted_power":1700.0}]}}"#;
const STATUS_DOC: &str = r#"{"status":"active","model_accuracy":100.0,"predictions_today":1,"last_update":"2025-06-30T12:00:06Z"}"#;

struct Stack {
    dir: TempDir,
    supervisor: SimulationSupervisor,
    server: ApiServer,
    client: reqwest::Client,
}

impl Stack {
    /// Wire the daemon components the way `pvwd run` does, with a shell
    /// script standing in for the producer.
    fn start(script: &str) -> Self {
        let dir = tempdir().unwrap();
        let storage = StorageConfig::in_dir(dir.path().join("data"));
        let simulation = SimulationConfig {
            program: "/bin/sh".into(),
            args: vec!["-c".to_owned(), script.to_owned()],
            ..SimulationConfig::default()
        };

        let aggregator = Arc::new(TelemetryAggregator::new(&storage, None));
        let supervisor = SimulationSupervisor::new(
            SimulationCommand::from_config(&simulation, &storage),
            64,
            None,
        );
        let state = Arc::new(ApiState::new(
            aggregator,
            supervisor.clone(),
            "0.1.0-e2e",
            Duration::from_secs(5),
        ));
        let server = spawn_api_server(state, "127.0.0.1:0".parse().unwrap(), None).unwrap();
        Self {
            dir,
            supervisor,
            server,
            client: reqwest::Client::new(),
        }
    }

    async fn get(&self, path: &str) -> Value {
        self.client
            .get(format!("http://{}{}", self.server.addr(), path))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap()
    }

    async fn post(&self, path: &str) -> Value {
        self.client
            .post(format!("http://{}{}", self.server.addr(), path))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap()
    }

    async fn dashboard_until(&self, mut ready: impl FnMut(&Value) -> bool) -> Value {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
        loop {
            let body = self.get("/api/dashboard-data").await;
            if ready(&body) {
                return body;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "dashboard never reached the expected state: {body}"
            );
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }
}

fn producer_script(then: &str) -> String {
    format!(
        "printf '%s\\n' '{DATA_LINE}' >> \"$PVW_EVENT_LOG\"\n\
         printf '%s\\n' '{PREDICTION_LINE}' >> \"$PVW_EVENT_LOG\"\n\
         printf '%s' '{STATUS_DOC}' > \"$PVW_STATUS_FILE\"\n\
         echo producer ready\n\
         {then}\n"
    )
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn supervised_producer_feeds_the_dashboard() {
    let stack = Stack::start(&producer_script("sleep 30"));

    let before = stack.get("/api/dashboard-data").await;
    assert_eq!(before["status"], "demo");
    assert_eq!(before["real_power"], 160.0);

    let started = stack.post("/api/start-simulation").await;
    assert_eq!(started["success"], true);
    assert_eq!(started["message"], MSG_STARTED);

    let snapshot = stack
        .dashboard_until(|body| body["status"] == "active")
        .await;
    assert_eq!(snapshot["real_power"], 1500.0);
    assert_eq!(snapshot["cumulative_prod"], 4801.5);
    assert_eq!(snapshot["timestamp"], "2025-06-30 12:00:00");
    assert_eq!(snapshot["model_accuracy"], 100.0);
    assert_eq!(snapshot["predictions_today"], 1);
    let predictions = snapshot["predictions"].as_array().unwrap();
    assert_eq!(predictions.len(), 2);
    assert_eq!(predictions[0]["method"], "Trend-based");
    assert_eq!(predictions[1]["method"], "Unknown");
    assert_eq!(predictions[1]["confidence"], 0.0);

    let stream = stack.get("/api/realtime-stream").await;
    let window = stream["data"].as_array().unwrap();
    assert_eq!(window.len(), 2);
    assert_eq!(window[0]["type"], "data");
    assert_eq!(window[0]["rowNumber"], 1);
    assert_eq!(window[1]["type"], "prediction");

    let report = stack.get("/api/simulation").await;
    assert_eq!(report["running"], true);

    let stopped = stack.post("/api/stop-simulation").await;
    assert_eq!(stopped["success"], true);
    assert!(stack.dir.path().join("data/terminal_log.jsonl").is_file());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn finished_producer_can_be_started_again() {
    let stack = Stack::start(&producer_script("exit 0"));

    assert_eq!(stack.post("/api/start-simulation").await["success"], true);
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    while stack.supervisor.is_running() {
        assert!(tokio::time::Instant::now() < deadline, "producer never exited");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    let report = stack.get("/api/simulation").await;
    assert_eq!(report["running"], false);
    assert_eq!(report["last_exit"]["code"], 0);

    assert_eq!(stack.post("/api/start-simulation").await["success"], true);
    let snapshot = stack
        .dashboard_until(|body| body["status"] == "active")
        .await;
    // Each run appended its own data record; the latest one wins.
    assert_eq!(snapshot["real_power"], 1500.0);
    let stream = stack.get("/api/realtime-stream").await;
    assert!(stream["data"].as_array().unwrap().len() >= 2);

    stack.supervisor.stop();
}
