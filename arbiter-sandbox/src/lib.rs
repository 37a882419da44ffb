#![deny(clippy::all)]

mod child;
mod monitor;
mod parent;
mod pipe;
mod probe;
mod procfs;
mod signal;
mod sysinfo_probe;

pub mod output;

pub use self::monitor::{Breach, Usage};
pub use self::probe::{ProbeKind, ProcInfo};

use self::child::Prepared;
use self::monitor::{Ceilings, Monitor};

use std::ffi::OsString;
use std::fs::File;
use std::io;
use std::os::unix::io::FromRawFd;
use std::path::PathBuf;
use std::str::FromStr;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use anyhow::{Context as _, Result};
use log::{debug, warn};
use nix::fcntl::OFlag;
use nix::unistd::{self, Pid};
use serde::{Deserialize, Serialize};
use structopt::StructOpt;

pub const DEFAULT_SAMPLE_INTERVAL: u64 = 50; // milliseconds

#[derive(Debug, Default, Clone, Serialize, Deserialize, StructOpt)]
#[serde(default)]
pub struct SandboxArgs {
    pub bin: PathBuf,

    pub args: Vec<OsString>,

    #[structopt(long)]
    pub env: Vec<OsString>,

    #[structopt(long)]
    pub cwd: Option<PathBuf>,

    #[structopt(long)]
    pub stdin: Option<PathBuf>,

    #[structopt(long)]
    pub stdout: Option<PathBuf>,

    #[structopt(long)]
    pub stdout_append: bool,

    #[structopt(long)]
    pub stdout_max_bytes: Option<u64>,

    #[structopt(long)]
    pub stderr: Option<PathBuf>,

    #[structopt(long)]
    pub stderr_append: bool,

    #[structopt(long)]
    pub stderr_max_bytes: Option<u64>,

    #[structopt(long)]
    pub uid: Option<u32>,

    #[structopt(long)]
    pub gid: Option<u32>,

    #[structopt(long)]
    pub groups: Vec<u32>,

    #[structopt(long)]
    pub rlimit_cpu: Option<u64>, // seconds

    #[structopt(long)]
    pub rlimit_data: Option<u64>, // bytes

    #[structopt(long)]
    pub rlimit_nproc: Option<u64>,

    #[structopt(long)]
    pub cores: Option<u32>,

    #[structopt(long)]
    pub limit_cpu_time: Option<u64>, // milliseconds

    #[structopt(long)]
    pub limit_real_time: Option<u64>, // milliseconds

    #[structopt(long)]
    pub limit_memory: Option<u64>, // bytes

    #[structopt(long)]
    pub limit_pids: Option<u32>,

    #[structopt(long, default_value = "procfs")]
    pub probe: ProbeKind,

    #[structopt(long, default_value = "50")]
    pub sample_interval: u64, // milliseconds
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxOutput {
    pub code: i32,
    pub signal: i32,
    pub status: i32,

    pub real_time: u64, // milliseconds
    pub cpu_time: u64,  // milliseconds
    pub memory: u64,    // bytes

    pub breach: Option<Breach>,
}

impl SandboxOutput {
    pub fn is_success(&self) -> bool {
        let exited = libc::WIFEXITED(self.status);
        exited && self.code == 0
    }

    /// Exit code, or the negated signal number when the process was killed.
    pub fn returncode(&self) -> i32 {
        if libc::WIFSIGNALED(self.status) {
            -self.signal
        } else {
            self.code
        }
    }
}

impl FromStr for ProbeKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "procfs" => Ok(ProbeKind::Procfs),
            "sysinfo" => Ok(ProbeKind::Sysinfo),
            _ => Err(anyhow::format_err!("unknown probe: {}", s)),
        }
    }
}

fn libc_call(f: impl FnOnce() -> i32) -> io::Result<u32> {
    let ret = f();
    if ret < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(ret as u32)
}

/// A confined process that has been started and is being sampled.
pub struct Sandboxed {
    pid: Pid,
    t0: Instant,
    monitor: Monitor,
    copiers: Vec<JoinHandle<io::Result<u64>>>,
}

impl Sandboxed {
    pub fn pid(&self) -> u32 {
        self.pid.as_raw() as u32
    }

    /// Terminates the whole process tree. The caller still has to `wait`.
    pub fn terminate(&self) {
        signal::terminate_tree(self.pid);
    }

    pub fn wait(self) -> Result<SandboxOutput> {
        let (status, rusage) = parent::wait4(self.pid).context("failed to wait4")?;
        let real_duration = self.t0.elapsed();

        signal::kill_group(self.pid);
        let usage = self.monitor.join();

        for copier in self.copiers {
            match copier.join() {
                Ok(Ok(bytes)) => debug!("copied {} bytes", bytes),
                Ok(Err(err)) => warn!("failed to copy output: {}", err),
                Err(_) => warn!("output copier panicked"),
            }
        }

        Ok(parent::collect_output(status, &rusage, real_duration, &usage))
    }
}

pub fn spawn(args: &SandboxArgs) -> Result<Sandboxed> {
    if !args.bin.exists() {
        anyhow::bail!("binary file does not exist: path = {}", args.bin.display());
    }

    let mut prepared = Prepared::new(args).context("failed to prepare child")?;

    let mut copier_plans = Vec::new();
    if let Some(max_bytes) = args.stdout_max_bytes {
        if let Some(ref path) = args.stdout {
            let dest = output::open_output(path, args.stdout_append)
                .with_context(|| format!("failed to open stdout: {}", path.display()))?;
            let (rx, tx) = unistd::pipe2(OFlag::O_CLOEXEC).context("failed to create pipe")?;
            prepared.stdout = child::Redirect::Fd(tx);
            copier_plans.push((rx, tx, dest, max_bytes));
        }
    }
    if let Some(max_bytes) = args.stderr_max_bytes {
        if let Some(ref path) = args.stderr {
            let dest = output::open_output(path, args.stderr_append)
                .with_context(|| format!("failed to open stderr: {}", path.display()))?;
            let (rx, tx) = unistd::pipe2(OFlag::O_CLOEXEC).context("failed to create pipe")?;
            prepared.stderr = child::Redirect::Fd(tx);
            copier_plans.push((rx, tx, dest, max_bytes));
        }
    }

    let (pipe_tx, pipe_rx) = pipe::create().context("failed to create pipe")?;

    let t0 = Instant::now();
    match unsafe { unistd::fork() }.context("failed to fork")? {
        unistd::ForkResult::Parent { child } => {
            drop(pipe_tx);
            debug!("child_pid = {}", child);

            let mut copiers = Vec::with_capacity(copier_plans.len());
            for (rx, tx, dest, max_bytes) in copier_plans {
                let _ = unistd::close(tx);
                let source = unsafe { File::from_raw_fd(rx) };
                copiers.push(output::spawn_copier(source, dest, Some(max_bytes)));
            }

            let child_result = pipe_rx.read_result();

            let child_result = match child_result {
                Ok(r) => r,
                Err(err) => Err(anyhow::Error::new(err).context("failed to read child result")),
            };

            if let Err(err) = child_result {
                let _ = parent::wait4(child);
                for copier in copiers {
                    let _ = copier.join();
                }
                return Err(err.context("child process failed"));
            }

            let interval = match args.sample_interval {
                0 => DEFAULT_SAMPLE_INTERVAL,
                ms => ms,
            };
            let monitor = Monitor::start(
                child,
                Ceilings::from_args(args),
                args.probe,
                Duration::from_millis(interval),
            );

            Ok(Sandboxed {
                pid: child,
                t0,
                monitor,
                copiers,
            })
        }
        unistd::ForkResult::Child => {
            drop(pipe_rx);
            for (rx, _, _, _) in &copier_plans {
                let _ = unistd::close(*rx);
            }
            let result = child::run_child(&prepared);
            if let Err(err) = result {
                let _ = pipe_tx.write_error(err);
            }
            unsafe { libc::_exit(101) };
        }
    }
}

pub fn run(args: &SandboxArgs) -> Result<SandboxOutput> {
    spawn(args)?.wait()
}

/// Terminates a process tree rooted at `pid` that was not started by this process.
pub fn terminate(pid: u32) {
    signal::terminate_tree(Pid::from_raw(pid as i32));
}

