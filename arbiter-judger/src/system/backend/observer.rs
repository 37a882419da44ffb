use super::local::sandbox_args;
use super::{apply_output, ExecRequest, ExecutionBackend};
use crate::result::CommandResult;

use arbiter_sandbox::{ProbeKind, SandboxOutput};

use std::io::Write;
use std::path::PathBuf;
use std::process::{Command, Stdio};

use anyhow::{Context as _, Result};
use tracing::{debug, error};

/// Delegates spawning and enforcement to the `arbiter-sandbox` helper binary.
pub struct ObserverBackend {
    helper: PathBuf,
}

impl ObserverBackend {
    pub fn new(helper: impl Into<PathBuf>) -> Self {
        Self {
            helper: helper.into(),
        }
    }
}

impl ExecutionBackend for ObserverBackend {
    fn name(&self) -> &'static str {
        "observer"
    }

    fn execute(&self, request: &ExecRequest, result: &mut CommandResult) -> Result<()> {
        let args = sandbox_args(request, ProbeKind::Procfs);
        let input = serde_json::to_vec(&args)?;

        let mut child = Command::new(&self.helper)
            .env("ARBITER_SANDBOX_ARGPASS", "JSON")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .with_context(|| format!("failed to spawn helper: {}", self.helper.display()))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(&input)?;
        }

        let output = child.wait_with_output()?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            error!(status = ?output.status, %stderr, "helper failed");
            anyhow::bail!("sandbox helper failed: {}", output.status);
        }

        let output: SandboxOutput =
            serde_json::from_slice(&output.stdout).context("invalid helper output")?;
        debug!(?output, "helper finished");
        apply_output(&output, result);
        Ok(())
    }
}
