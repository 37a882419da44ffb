use super::{apply_output, ExecRequest, ExecutionBackend};
use crate::result::CommandResult;

use arbiter_sandbox::{ProbeKind, SandboxArgs};
use arbiter_utils::math::roundup_div;

use std::ffi::OsString;

use anyhow::Result;
use tracing::debug;

/// Maps a request onto the sandbox arguments. Shared by every backend that
/// runs the sandbox in-process or through its helper binary.
pub fn sandbox_args(request: &ExecRequest, probe: ProbeKind) -> SandboxArgs {
    let limits = &request.limits;
    let millis = |d: std::time::Duration| d.as_millis() as u64;

    let cpu_time = limits.cpu_time().map(millis);
    let pids = match limits.pids() {
        Some(p) if request.safe => Some(p.min(1)),
        Some(p) => Some(p),
        None if request.safe => Some(1),
        None => None,
    };

    SandboxArgs {
        bin: request.bin.clone(),
        args: request.args.iter().map(OsString::from).collect(),
        env: request
            .environment
            .iter()
            .map(|(k, v)| OsString::from(format!("{}={}", k, v)))
            .collect(),
        cwd: Some(request.work_path.clone()),
        stdin: Some(request.stdin.clone()),
        stdout: Some(request.stdout.path.clone()),
        stdout_append: request.stdout.append,
        stdout_max_bytes: request.stdout.max_bytes,
        stderr: Some(request.stderr.path.clone()),
        stderr_append: request.stderr.append,
        stderr_max_bytes: request.stderr.max_bytes,
        uid: request.identity.as_ref().map(|id| id.uid),
        gid: request.identity.as_ref().map(|id| id.gid),
        groups: request
            .identity
            .as_ref()
            .map(|id| id.groups.clone())
            .unwrap_or_default(),
        rlimit_cpu: cpu_time.map(|ms| roundup_div(ms + 1000, 1000)),
        rlimit_data: limits.memory(),
        rlimit_nproc: if request.safe { Some(1) } else { None },
        cores: limits.cores(),
        limit_cpu_time: cpu_time,
        limit_real_time: limits.real_time().map(millis),
        limit_memory: limits.memory(),
        limit_pids: pids,
        probe,
        sample_interval: arbiter_sandbox::DEFAULT_SAMPLE_INTERVAL,
    }
}

/// Forks and monitors in-process. `Procfs` parses `/proc` by hand,
/// `Sysinfo` asks the process-introspection library.
pub struct LocalBackend {
    probe: ProbeKind,
}

impl LocalBackend {
    pub fn new() -> Self {
        Self {
            probe: ProbeKind::Procfs,
        }
    }

    /// Samples through `sysinfo`, which reports process run time in whole
    /// seconds. Real-time ceilings are therefore coarse under this backend.
    pub fn library() -> Self {
        Self {
            probe: ProbeKind::Sysinfo,
        }
    }
}

impl Default for LocalBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl ExecutionBackend for LocalBackend {
    fn name(&self) -> &'static str {
        match self.probe {
            ProbeKind::Procfs => "local",
            ProbeKind::Sysinfo => "library",
        }
    }

    fn execute(&self, request: &ExecRequest, result: &mut CommandResult) -> Result<()> {
        let args = sandbox_args(request, self.probe);
        let output = arbiter_sandbox::run(&args)?;
        debug!(?output, "sandbox finished");
        apply_output(&output, result);
        Ok(())
    }

    fn spawn(&self, request: &ExecRequest) -> Result<arbiter_sandbox::Sandboxed> {
        arbiter_sandbox::spawn(&sandbox_args(request, self.probe))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::limits::Limits;
    use crate::system::backend::StreamSpec;

    use std::path::PathBuf;
    use std::time::Duration;

    fn request(limits: Limits, safe: bool) -> ExecRequest {
        let stream = StreamSpec {
            path: PathBuf::from("/dev/null"),
            append: false,
            max_bytes: None,
        };
        ExecRequest {
            bin: PathBuf::from("/bin/true"),
            args: vec!["x".to_owned()],
            work_path: PathBuf::from("/tmp"),
            environment: Default::default(),
            stdin: PathBuf::from("/dev/null"),
            stdout: stream.clone(),
            stderr: stream,
            user: None,
            group: None,
            identity: None,
            limits,
            safe,
            superuser: false,
        }
    }

    #[test]
    fn rlimits_from_limits() {
        let limits = Limits::default()
            .with_cpu_time(Duration::from_millis(2500))
            .with_memory(64 << 20)
            .with_pids(8);
        let args = sandbox_args(&request(limits, false), ProbeKind::Procfs);
        assert_eq!(args.rlimit_cpu, Some(4));
        assert_eq!(args.limit_cpu_time, Some(2500));
        assert_eq!(args.rlimit_data, Some(64 << 20));
        assert_eq!(args.limit_pids, Some(8));
        assert_eq!(args.rlimit_nproc, None);

        let args = sandbox_args(&request(Limits::default(), true), ProbeKind::Procfs);
        assert_eq!(args.rlimit_cpu, None);
        assert_eq!(args.rlimit_nproc, Some(1));
        assert_eq!(args.limit_pids, Some(1));
    }
}
