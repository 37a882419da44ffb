use super::{ExecRequest, ExecutionBackend};
use crate::limits::Limits;
use crate::result::CommandResult;

use arbiter_sandbox::output::{open_output, spawn_copier};
use arbiter_utils::os_cmd::OsCmd;

use std::collections::HashMap;
use std::fs::File;
use std::os::unix::process::ExitStatusExt;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use anyhow::{Context as _, Result};
use rand::Rng;
use tracing::{debug, warn};

const UNSET_ENVIRONMENT: &str = "INVOCATION_ID LC_CTYPE LC_NUMERIC LC_TIME LC_COLLATE \
    LC_MONETARY LC_MESSAGES LC_PAPER LC_NAME LC_ADDRESS LC_TELEPHONE LC_MEASUREMENT \
    LC_IDENTIFICATION LC_ALL";

/// Runs each command in a transient accounted unit of the service manager.
pub struct SystemdBackend {
    user_mode: Option<bool>,
    poll_interval: Duration,
}

impl SystemdBackend {
    /// `user_mode = None` picks the user manager unless running as root.
    pub fn new(user_mode: Option<bool>, poll_interval: Duration) -> Self {
        Self {
            user_mode,
            poll_interval,
        }
    }

    fn user_mode(&self, superuser: bool) -> bool {
        self.user_mode.unwrap_or(!superuser)
    }
}

fn unit_name() -> String {
    let mut rng = rand::thread_rng();
    let suffix: String = (0..16)
        .map(|_| char::from(rng.gen_range(b'a'..=b'z')))
        .collect();
    format!("arbiter-unit-{}.service", suffix)
}

fn systemctl(user_mode: bool) -> OsCmd {
    let mut cmd = OsCmd::new("systemctl");
    cmd.arg_if(user_mode, "--user");
    cmd
}

pub fn parse_show(stdout: &[u8]) -> HashMap<String, String> {
    String::from_utf8_lossy(stdout)
        .lines()
        .filter_map(|line| {
            let mut kv = line.splitn(2, '=');
            let key = kv.next()?;
            let value = kv.next()?;
            Some((key.to_owned(), value.trim().to_owned()))
        })
        .collect()
}

#[derive(Debug, Default)]
struct UnitUsage {
    cpu_time: Duration,
    real_time: Duration,
    memory: u64,
}

impl UnitUsage {
    fn absorb(&mut self, props: &HashMap<String, String>) {
        if let Some(mem) = props.get("MemoryCurrent").and_then(|v| v.parse::<u64>().ok()) {
            self.memory = self.memory.max(mem);
        }
        if let Some(ns) = props.get("CPUUsageNSec").and_then(|v| v.parse::<u64>().ok()) {
            self.cpu_time = self.cpu_time.max(Duration::from_nanos(ns));
        }
    }
}

/// One `Environment=` assignment, quoted so that the value survives unit
/// property parsing verbatim.
fn environment_property(key: &str, value: &str) -> String {
    let mut out = String::with_capacity(key.len() + value.len() + 3);
    out.push('"');
    for c in key.chars().chain(std::iter::once('=')).chain(value.chars()) {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '%' => out.push_str("%%"),
            _ => out.push(c),
        }
    }
    out.push('"');
    out
}

fn build_command(request: &ExecRequest, unit: &str, user_mode: bool) -> OsCmd {
    let mut cmd = OsCmd::new("systemd-run");
    cmd.arg_if(user_mode, "--user");
    cmd.arg("--unit").arg(unit);
    cmd.args(&["--remain-after-exit", "--quiet", "--pipe"]);
    cmd.property("CPUAccounting", "true");
    cmd.property("MemoryAccounting", "true");
    cmd.property("WorkingDirectory", request.work_path.display());

    let limits = &request.limits;
    if let Some(memory) = limits.memory() {
        cmd.property("MemoryMax", memory);
    }
    if let Some(pids) = limits.pids() {
        cmd.property("TasksMax", pids);
    } else if request.safe {
        cmd.property("TasksMax", 1);
    }
    if let Some(cores) = limits.cores() {
        let list: Vec<String> = (0..cores.max(1)).map(|c| c.to_string()).collect();
        cmd.property("CPUAffinity", list.join(" "));
    }

    if let Some(ref id) = request.identity {
        cmd.property("User", id.uid);
        cmd.property("Group", id.gid);
        if !id.groups.is_empty() {
            let list: Vec<String> = id.groups.iter().map(ToString::to_string).collect();
            cmd.property("SupplementaryGroups", list.join(" "));
        }
    }

    if request.superuser {
        cmd.property("PassEnvironment", "");
        cmd.property("UnsetEnvironment", UNSET_ENVIRONMENT);
        for (k, v) in &request.environment {
            cmd.property("Environment", environment_property(k, v));
        }
    } else {
        cmd.arg("env").arg("-i");
        for (k, v) in &request.environment {
            cmd.arg(format!("{}={}", k, v));
        }
    }

    cmd.arg(request.bin.as_os_str());
    cmd.args(&request.args);
    cmd
}

fn monitor_unit(
    unit: String,
    user_mode: bool,
    limits: Limits,
    interval: Duration,
    done: Arc<AtomicBool>,
) -> JoinHandle<UnitUsage> {
    thread::spawn(move || {
        let t0 = Instant::now();
        let mut usage = UnitUsage::default();
        let mut show = systemctl(user_mode);
        show.arg("show").arg(&unit);

        let query = || match show.to_command().stderr(Stdio::null()).output() {
            Ok(out) => Some(parse_show(&out.stdout)),
            Err(err) => {
                warn!(%err, "failed to query unit");
                None
            }
        };

        let mut exited = false;
        while !done.load(Ordering::SeqCst) {
            let props = match query() {
                Some(p) => p,
                None => break,
            };
            usage.absorb(&props);
            usage.real_time = t0.elapsed();

            let state = (
                props.get("ActiveState").map(String::as_str),
                props.get("SubState").map(String::as_str),
            );
            if let (Some("active"), Some("exited")) | (Some("failed"), Some("failed")) = state {
                exited = true;
                break;
            }

            let over_cpu = limits.cpu_time().map_or(false, |c| usage.cpu_time > c);
            let over_real = limits.real_time().map_or(false, |c| usage.real_time > c);
            let over_mem = limits.memory().map_or(false, |c| usage.memory > c);
            if over_cpu || over_real || over_mem {
                debug!(unit = %unit, ?usage, "unit exceeded its limits");
                let mut stop = systemctl(user_mode);
                stop.arg("stop").arg(&unit);
                let _ = stop.to_command().stdout(Stdio::null()).stderr(Stdio::null()).status();
                break;
            }

            thread::sleep(interval);
        }

        // The unit remains after exit, so its final accounting is still readable.
        if !exited {
            if let Some(props) = query() {
                usage.absorb(&props);
            }
        }
        usage.real_time = usage.real_time.max(t0.elapsed());
        usage
    })
}

impl ExecutionBackend for SystemdBackend {
    fn name(&self) -> &'static str {
        "systemd"
    }

    fn execute(&self, request: &ExecRequest, result: &mut CommandResult) -> Result<()> {
        let user_mode = self.user_mode(request.superuser);
        let unit = unit_name();
        let cmd = build_command(request, &unit, user_mode);
        debug!(%cmd, "starting unit");

        let _cleanup = scopeguard::guard(unit.clone(), move |unit| {
            for action in &["reset-failed", "stop"] {
                let mut c = systemctl(user_mode);
                c.arg(*action).arg(&unit);
                let _ = c.to_command().stdout(Stdio::null()).stderr(Stdio::null()).status();
            }
        });

        let stdin = File::open(&request.stdin)
            .with_context(|| format!("failed to open stdin: {}", request.stdin.display()))?;
        let stdout = open_output(&request.stdout.path, request.stdout.append)?;
        let stderr = open_output(&request.stderr.path, request.stderr.append)?;

        let mut process = cmd.to_command();
        process.stdin(stdin);
        let mut pending = Vec::new();
        match request.stdout.max_bytes {
            Some(max) => {
                process.stdout(Stdio::piped());
                pending.push((1, stdout, max));
            }
            None => {
                process.stdout(stdout);
            }
        }
        match request.stderr.max_bytes {
            Some(max) => {
                process.stderr(Stdio::piped());
                pending.push((2, stderr, max));
            }
            None => {
                process.stderr(stderr);
            }
        }

        let mut child = process.spawn().context("failed to run systemd-run")?;
        let mut copiers = Vec::new();
        for (fd, dest, max) in pending {
            if fd == 1 {
                if let Some(src) = child.stdout.take() {
                    copiers.push(spawn_copier(src, dest, Some(max)));
                }
            } else if let Some(src) = child.stderr.take() {
                copiers.push(spawn_copier(src, dest, Some(max)));
            }
        }

        let done = Arc::new(AtomicBool::new(false));
        let monitor = monitor_unit(
            unit,
            user_mode,
            request.limits,
            self.poll_interval,
            done.clone(),
        );

        let status = child.wait()?;
        done.store(true, Ordering::SeqCst);

        let usage = match monitor.join() {
            Ok(u) => u,
            Err(_) => {
                warn!("unit monitor panicked");
                UnitUsage::default()
            }
        };
        for copier in copiers {
            match copier.join() {
                Ok(Ok(_)) => {}
                Ok(Err(err)) => warn!(%err, "failed to copy output"),
                Err(_) => warn!("output copier panicked"),
            }
        }

        let returncode = match status.code() {
            Some(code) => code,
            None => -status.signal().unwrap_or(0),
        };
        result.set_returncode(returncode);
        result.update_cpu_time(usage.cpu_time);
        result.update_real_time(usage.real_time);
        result.update_memory(usage.memory);
        Ok(())
    }
}
