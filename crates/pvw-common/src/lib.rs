//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Configuration and logging shared across PV-Watch crates."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
//! Shared primitives for the PV-Watch workspace.
//! This crate exposes configuration loading and logging setup consumed by the
//! daemon, the reference producer, and the service crates.

pub mod config;
pub mod logging;

pub use config::{
    ApiConfig, AppConfig, LoadedAppConfig, LoggingConfig, MetricsConfig, SimulationConfig,
    StorageConfig,
};
pub use logging::{init_stderr, init_tracing, LogFormat};
