use crate::probe::{self, Probe, ProbeKind};
use crate::signal;
use crate::SandboxArgs;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{debug, warn};
use nix::unistd::Pid;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Breach {
    CpuTime,
    RealTime,
    Memory,
    Pids,
}

#[derive(Debug, Default, Clone)]
pub struct Usage {
    pub cpu_time: Duration,
    pub real_time: Duration,
    pub memory: u64, // bytes
    pub breach: Option<Breach>,
}

#[derive(Debug, Default, Clone)]
pub struct Ceilings {
    pub cpu_time: Option<Duration>,
    pub real_time: Option<Duration>,
    pub memory: Option<u64>, // bytes
    pub pids: Option<u32>,
}

impl Ceilings {
    pub fn from_args(args: &SandboxArgs) -> Self {
        Self {
            cpu_time: args.limit_cpu_time.map(Duration::from_millis),
            real_time: args.limit_real_time.map(Duration::from_millis),
            memory: args.limit_memory,
            pids: args.limit_pids,
        }
    }

    fn check(&self, usage: &Usage, pids: u32) -> Option<Breach> {
        if self.cpu_time.map_or(false, |c| usage.cpu_time > c) {
            return Some(Breach::CpuTime);
        }
        if self.real_time.map_or(false, |c| usage.real_time > c) {
            return Some(Breach::RealTime);
        }
        if self.memory.map_or(false, |c| usage.memory > c) {
            return Some(Breach::Memory);
        }
        if self.pids.map_or(false, |c| pids > c) {
            return Some(Breach::Pids);
        }
        None
    }
}

/// Samples a process tree on a background thread until its root exits.
pub struct Monitor {
    stop: Arc<AtomicBool>,
    handle: JoinHandle<Usage>,
}

impl Monitor {
    pub fn start(root: Pid, ceilings: Ceilings, kind: ProbeKind, interval: Duration) -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&stop);
        let handle = thread::spawn(move || {
            let mut probe = probe::new_probe(kind);
            sample_loop(&mut *probe, root, &ceilings, interval, &flag)
        });
        Self { stop, handle }
    }

    pub fn join(self) -> Usage {
        self.stop.store(true, Ordering::Relaxed);
        match self.handle.join() {
            Ok(usage) => usage,
            Err(_) => {
                warn!("monitor thread panicked");
                Usage::default()
            }
        }
    }
}

fn sample_loop(
    probe: &mut dyn Probe,
    root: Pid,
    ceilings: &Ceilings,
    interval: Duration,
    stop: &AtomicBool,
) -> Usage {
    let root_pid = root.as_raw();
    let mut usage = Usage::default();
    let mut real_times: HashMap<i32, Duration> = HashMap::new();
    let mut cpu_times: HashMap<i32, Duration> = HashMap::new();

    while !stop.load(Ordering::Relaxed) {
        probe.refresh();

        let root_info = match probe.info(root_pid) {
            Some(info) if !info.is_zombie() => info,
            _ => break,
        };

        let descendants = probe.descendants(root_pid);
        let mut rss = root_info.rss;
        record(&mut real_times, &mut cpu_times, root_pid, &root_info);
        for &pid in &descendants {
            if let Some(info) = probe.info(pid) {
                rss += info.rss;
                record(&mut real_times, &mut cpu_times, pid, &info);
            }
        }

        usage.memory = usage.memory.max(rss);
        usage.cpu_time = usage.cpu_time.max(cpu_times.values().sum());
        usage.real_time = usage
            .real_time
            .max(real_times.values().copied().max().unwrap_or_default());

        let pids = 1 + descendants.len() as u32;
        if usage.breach.is_none() {
            if let Some(breach) = ceilings.check(&usage, pids) {
                debug!("limit breached: {:?}, usage = {:?}", breach, usage);
                usage.breach = Some(breach);
                signal::kill_tree(root, probe);
                break;
            }
        }

        thread::sleep(interval);
    }

    usage
}

fn record(
    real_times: &mut HashMap<i32, Duration>,
    cpu_times: &mut HashMap<i32, Duration>,
    pid: i32,
    info: &probe::ProcInfo,
) {
    let real = real_times.entry(pid).or_default();
    *real = (*real).max(info.real_time);
    let cpu = cpu_times.entry(pid).or_default();
    *cpu = (*cpu).max(info.cpu_time);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ceilings_are_strict() {
        let ceilings = Ceilings {
            cpu_time: Some(Duration::from_millis(1000)),
            memory: Some(1024),
            pids: Some(2),
            ..Ceilings::default()
        };
        let mut usage = Usage {
            cpu_time: Duration::from_millis(1000),
            memory: 1024,
            ..Usage::default()
        };
        assert_eq!(ceilings.check(&usage, 2), None);

        usage.memory = 1025;
        assert_eq!(ceilings.check(&usage, 2), Some(Breach::Memory));

        usage.cpu_time = Duration::from_millis(1001);
        assert_eq!(ceilings.check(&usage, 3), Some(Breach::CpuTime));

        usage = Usage::default();
        assert_eq!(ceilings.check(&usage, 3), Some(Breach::Pids));
    }
}
