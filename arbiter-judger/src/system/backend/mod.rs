//! Interchangeable ways to confine and account one process.

mod local;
mod observer;
mod systemd;

pub use self::local::LocalBackend;
pub use self::observer::ObserverBackend;
pub use self::systemd::SystemdBackend;

use super::identity::Identity;
use crate::limits::Limits;
use crate::result::CommandResult;

use arbiter_sandbox::{ProbeKind, Sandboxed, SandboxOutput};

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Local,
    Library,
    Observer,
    Systemd,
}

impl Default for BackendKind {
    fn default() -> Self {
        BackendKind::Local
    }
}

#[derive(Debug, Clone)]
pub struct StreamSpec {
    pub path: PathBuf,
    pub append: bool,
    pub max_bytes: Option<u64>,
}

/// A fully resolved command, ready to be handed to a backend.
#[derive(Debug, Clone)]
pub struct ExecRequest {
    pub bin: PathBuf,
    pub args: Vec<String>,
    pub work_path: PathBuf,
    pub environment: BTreeMap<String, String>,
    pub stdin: PathBuf,
    pub stdout: StreamSpec,
    pub stderr: StreamSpec,
    pub user: Option<String>,
    pub group: Option<String>,
    /// `None` when no switch is requested or the switch was skipped.
    pub identity: Option<Identity>,
    pub limits: Limits,
    pub safe: bool,
    pub superuser: bool,
}

pub trait ExecutionBackend: Send {
    fn name(&self) -> &'static str;

    /// Runs the request to completion and records usage into `result`.
    fn execute(&self, request: &ExecRequest, result: &mut CommandResult) -> Result<()>;

    /// Starts the request without waiting, for background commands.
    fn spawn(&self, request: &ExecRequest) -> Result<Sandboxed> {
        let args = local::sandbox_args(request, ProbeKind::Procfs);
        arbiter_sandbox::spawn(&args)
    }

    fn supports_gpu(&self) -> bool {
        false
    }
}

/// Copies what the sandbox observed into the result.
pub fn apply_output(output: &SandboxOutput, result: &mut CommandResult) {
    result.set_returncode(output.returncode());
    result.update_cpu_time(Duration::from_millis(output.cpu_time));
    result.update_real_time(Duration::from_millis(output.real_time));
    result.update_memory(output.memory);
}
