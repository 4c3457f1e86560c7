//! ---
//! ems_section: "04-simulation-supervision"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Simulation process supervision."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
//! Starts, tracks and stops at most one external simulation process.
//!
//! The process is the only writer of the event log and status stores while
//! it runs; the supervisor merely owns its lifecycle and captures its output
//! for diagnostics.

pub mod command;
pub mod output;
pub mod supervisor;

pub use command::{SimulationCommand, ENV_EVENT_LOG, ENV_STATUS_FILE};
pub use output::{OutputBuffer, OutputLine, OutputStream};
pub use supervisor::{
    ControlOutcome, ExitRecord, SimulationReport, SimulationState, SimulationSupervisor,
    MSG_ALREADY_RUNNING, MSG_NOT_RUNNING, MSG_STARTED, MSG_STOPPED,
};
