//! ---
//! ems_section: "04-simulation-supervision"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Launch description of the external simulation process."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use pvw_common::{SimulationConfig, StorageConfig};
use tokio::process::Command;

/// Environment variable naming the event log the producer appends to.
pub const ENV_EVENT_LOG: &str = "PVW_EVENT_LOG";
/// Environment variable naming the status file the producer overwrites.
pub const ENV_STATUS_FILE: &str = "PVW_STATUS_FILE";

/// Program, arguments and environment of the simulation producer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimulationCommand {
    program: PathBuf,
    args: Vec<String>,
    working_dir: Option<PathBuf>,
    env: Vec<(String, String)>,
    output_dirs: Vec<PathBuf>,
}

impl SimulationCommand {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            working_dir: None,
            env: Vec::new(),
            output_dirs: Vec::new(),
        }
    }

    /// Build the command from configuration, pointing the producer at the stores.
    pub fn from_config(simulation: &SimulationConfig, storage: &StorageConfig) -> Self {
        let event_log = storage.event_log_path();
        let status_file = storage.status_path();

        let mut command = Self::new(&simulation.program).args(simulation.args.iter().cloned());
        if let Some(dir) = &simulation.working_dir {
            command = command.current_dir(dir);
        }
        for (key, value) in &simulation.env {
            command = command.env(key, value);
        }
        command
            .env(ENV_EVENT_LOG, event_log.display().to_string())
            .env(ENV_STATUS_FILE, status_file.display().to_string())
            .ensure_parent_of(&event_log)
            .ensure_parent_of(&status_file)
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Set an environment variable; a later value for the same key wins.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let key = key.into();
        self.env.retain(|(existing, _)| *existing != key);
        self.env.push((key, value.into()));
        self
    }

    /// Create the parent directory of `path` before every launch.
    pub fn ensure_parent_of(mut self, path: &Path) -> Self {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            if !self.output_dirs.iter().any(|dir| dir == parent) {
                self.output_dirs.push(parent.to_path_buf());
            }
        }
        self
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    pub fn get_args(&self) -> &[String] {
        &self.args
    }

    pub fn get_env(&self, key: &str) -> Option<&str> {
        self.env
            .iter()
            .find(|(existing, _)| existing == key)
            .map(|(_, value)| value.as_str())
    }

    pub(crate) fn prepare(&self) -> io::Result<()> {
        for dir in &self.output_dirs {
            fs::create_dir_all(dir)?;
        }
        Ok(())
    }

    pub(crate) fn to_command(&self) -> Command {
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .envs(self.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.working_dir {
            command.current_dir(dir);
        }
        command
    }
}
