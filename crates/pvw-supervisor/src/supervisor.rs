//! ---
//! ems_section: "04-simulation-supervision"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Start/stop control and exit observation of the simulation process."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use pvw_metrics::SimulationMetrics;
use serde::{Deserialize, Serialize};
use tokio::process::Child;
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

use crate::command::SimulationCommand;
use crate::output::{forward_output, OutputBuffer, OutputLine, OutputStream};

pub const MSG_STARTED: &str = "simulation started";
pub const MSG_ALREADY_RUNNING: &str = "already running";
pub const MSG_STOPPED: &str = "simulation stopped";
pub const MSG_NOT_RUNNING: &str = "no simulation is currently running";
const SPAWN_FAILURE_PREFIX: &str = "failed to start simulation";

/// Structured result of a start or stop request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlOutcome {
    pub success: bool,
    pub message: String,
}

impl ControlOutcome {
    fn accepted(message: &str) -> Self {
        Self {
            success: true,
            message: message.to_owned(),
        }
    }

    fn rejected(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }
}

/// Lifecycle state of the process slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum SimulationState {
    Absent,
    Running {
        pid: Option<u32>,
        started_at: DateTime<Utc>,
    },
}

/// How the most recent simulation process ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExitRecord {
    /// Exit code; `None` when the process was ended by a signal.
    pub code: Option<i32>,
    pub success: bool,
    pub at: DateTime<Utc>,
}

/// Diagnostic view served to operators.
#[derive(Debug, Clone, Serialize)]
pub struct SimulationReport {
    pub running: bool,
    pub pid: Option<u32>,
    pub started_at: Option<DateTime<Utc>>,
    pub last_exit: Option<ExitRecord>,
    pub output: Vec<OutputLine>,
}

#[derive(Debug)]
struct ActiveSimulation {
    generation: u64,
    pid: Option<u32>,
    started_at: DateTime<Utc>,
    terminate: oneshot::Sender<()>,
}

impl ActiveSimulation {
    /// Ask the exit observer, which owns the child, to end the process.
    fn terminate(self) {
        // A closed channel means the observer already reaped the child.
        let _ = self.terminate.send(());
    }
}

#[derive(Debug)]
struct Shared {
    command: SimulationCommand,
    slot: Mutex<Option<ActiveSimulation>>,
    generation: AtomicU64,
    /// Capture of the current or most recent run; replaced on every start.
    output: Mutex<Arc<OutputBuffer>>,
    output_lines: usize,
    last_exit: Mutex<Option<ExitRecord>>,
    metrics: Option<SimulationMetrics>,
}

impl Shared {
    fn record_control(&self, action: &str, outcome: &str) {
        if let Some(metrics) = &self.metrics {
            metrics.record_control(action, outcome);
        }
    }

    fn set_running(&self, running: bool) {
        if let Some(metrics) = &self.metrics {
            metrics.set_running(running);
        }
    }
}

/// Owner of the single simulation process slot.
///
/// Cloning yields another handle onto the same slot. `start` and `stop` do
/// their check-and-set under one lock, so concurrent callers never produce
/// two live processes.
#[derive(Debug, Clone)]
pub struct SimulationSupervisor {
    shared: Arc<Shared>,
}

impl SimulationSupervisor {
    pub fn new(
        command: SimulationCommand,
        output_lines: usize,
        metrics: Option<SimulationMetrics>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                command,
                slot: Mutex::new(None),
                generation: AtomicU64::new(0),
                output: Mutex::new(Arc::new(OutputBuffer::new(output_lines))),
                output_lines,
                last_exit: Mutex::new(None),
                metrics,
            }),
        }
    }

    pub fn command(&self) -> &SimulationCommand {
        &self.shared.command
    }

    /// Spawn the simulation unless one is already live.
    ///
    /// Must be called from within a Tokio runtime; the output readers and the
    /// exit observer run as tasks on it. Returns once the process is spawned.
    pub fn start(&self) -> ControlOutcome {
        let shared = &self.shared;
        let mut slot = shared.slot.lock();
        if slot.is_some() {
            debug!("start requested while a simulation is live");
            shared.record_control("start", "already_running");
            return ControlOutcome::rejected(MSG_ALREADY_RUNNING);
        }

        let runtime = match Handle::try_current() {
            Ok(runtime) => runtime,
            Err(err) => return self.spawn_failed(&err),
        };
        if let Err(err) = shared.command.prepare() {
            return self.spawn_failed(&err);
        }
        let mut child = match shared.command.to_command().spawn() {
            Ok(child) => child,
            Err(err) => return self.spawn_failed(&err),
        };

        let generation = shared.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let pid = child.id();
        let started_at = Utc::now();

        // Readers of an earlier run keep their own buffer, which nobody serves.
        let output = Arc::new(OutputBuffer::new(shared.output_lines));
        *shared.output.lock() = Arc::clone(&output);
        if let Some(stdout) = child.stdout.take() {
            runtime.spawn(forward_output(
                stdout,
                OutputStream::Stdout,
                Arc::clone(&output),
                pid,
            ));
        }
        if let Some(stderr) = child.stderr.take() {
            runtime.spawn(forward_output(stderr, OutputStream::Stderr, output, pid));
        }
        let (terminate_tx, terminate_rx) = oneshot::channel();
        runtime.spawn(observe_exit(
            Arc::clone(shared),
            child,
            generation,
            terminate_rx,
        ));

        *slot = Some(ActiveSimulation {
            generation,
            pid,
            started_at,
            terminate: terminate_tx,
        });
        shared.set_running(true);
        drop(slot);

        shared.record_control("start", "started");
        info!(
            pid,
            generation,
            program = %shared.command.program().display(),
            "simulation started"
        );
        ControlOutcome::accepted(MSG_STARTED)
    }

    /// Signal the live simulation to terminate and release the slot at once.
    pub fn stop(&self) -> ControlOutcome {
        let shared = &self.shared;
        let mut slot = shared.slot.lock();
        let Some(active) = slot.take() else {
            drop(slot);
            debug!("stop requested with no simulation live");
            shared.record_control("stop", "not_running");
            return ControlOutcome::rejected(MSG_NOT_RUNNING);
        };
        shared.set_running(false);
        drop(slot);

        let pid = active.pid;
        let generation = active.generation;
        active.terminate();
        shared.record_control("stop", "stopped");
        info!(pid, generation, "simulation stopped");
        ControlOutcome::accepted(MSG_STOPPED)
    }

    pub fn state(&self) -> SimulationState {
        match self.shared.slot.lock().as_ref() {
            Some(active) => SimulationState::Running {
                pid: active.pid,
                started_at: active.started_at,
            },
            None => SimulationState::Absent,
        }
    }

    pub fn is_running(&self) -> bool {
        self.shared.slot.lock().is_some()
    }

    /// Captured output of the current or most recent run.
    pub fn output(&self) -> Vec<OutputLine> {
        let output = Arc::clone(&self.shared.output.lock());
        output.lines()
    }

    pub fn last_exit(&self) -> Option<ExitRecord> {
        self.shared.last_exit.lock().clone()
    }

    pub fn report(&self) -> SimulationReport {
        let (pid, started_at) = match self.state() {
            SimulationState::Running { pid, started_at } => (pid, Some(started_at)),
            SimulationState::Absent => (None, None),
        };
        SimulationReport {
            running: started_at.is_some(),
            pid,
            started_at,
            last_exit: self.last_exit(),
            output: self.output(),
        }
    }

    fn spawn_failed(&self, err: &dyn std::fmt::Display) -> ControlOutcome {
        error!(
            program = %self.shared.command.program().display(),
            error = %err,
            "failed to start simulation"
        );
        self.shared.record_control("start", "spawn_failed");
        ControlOutcome::rejected(format!("{SPAWN_FAILURE_PREFIX}: {err}"))
    }
}

async fn observe_exit(
    shared: Arc<Shared>,
    mut child: Child,
    generation: u64,
    mut terminate_rx: oneshot::Receiver<()>,
) {
    let status = tokio::select! {
        status = child.wait() => status,
        Ok(()) = &mut terminate_rx => {
            send_terminate(&mut child, generation);
            child.wait().await
        }
    };

    let record = match status {
        Ok(status) => ExitRecord {
            code: status.code(),
            success: status.success(),
            at: Utc::now(),
        },
        Err(err) => {
            warn!(generation, error = %err, "failed to observe simulation exit");
            ExitRecord {
                code: None,
                success: false,
                at: Utc::now(),
            }
        }
    };
    if record.success {
        info!(generation, code = record.code, "simulation exited");
    } else {
        warn!(generation, code = record.code, "simulation exited unsuccessfully");
    }
    if let Some(metrics) = &shared.metrics {
        metrics.record_exit(if record.success { "success" } else { "failure" });
    }
    *shared.last_exit.lock() = Some(record);

    let mut slot = shared.slot.lock();
    if slot.as_ref().map(|active| active.generation) == Some(generation) {
        *slot = None;
        shared.set_running(false);
        drop(slot);
        debug!(generation, "simulation handle released by exit observer");
    }
}

/// SIGTERM on unix, falling back to a kill.
///
/// `child` is not reaped until it is polled again, so its pid cannot have
/// been reused yet.
fn send_terminate(child: &mut Child, generation: u64) {
    #[cfg(unix)]
    {
        if let Some(pid) = child.id().and_then(|pid| libc::pid_t::try_from(pid).ok()) {
            // SAFETY: kill(2) takes plain integers and touches no memory of ours.
            if unsafe { libc::kill(pid, libc::SIGTERM) } == 0 {
                return;
            }
            warn!(
                pid,
                generation,
                error = %std::io::Error::last_os_error(),
                "SIGTERM failed; killing simulation"
            );
        }
    }
    if let Err(err) = child.start_kill() {
        warn!(generation, error = %err, "failed to kill simulation");
    }
}
