//! ---
//! ems_section: "02-telemetry-aggregation"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Telemetry aggregation over the append-only event log."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
//! Read side of the dashboard.
//!
//! [`TelemetryAggregator`] reconstructs the current system state and a short
//! history window from the event log and the status record. It never fails:
//! any store problem is answered with [`DashboardSnapshot::demo`] or an empty
//! window.

pub mod aggregator;
mod index;
pub mod snapshot;
pub mod window;

pub use aggregator::TelemetryAggregator;
pub use snapshot::{DashboardSnapshot, PredictionView, Scalars, DEMO_SCALARS};
pub use window::{WindowEntry, WindowReading};
