use crate::probe::{ProcInfo, Probe};

use std::collections::HashMap;
use std::time::Duration;

use sysinfo::{Pid, ProcessStatus, ProcessesToUpdate, System};

/// Accounting through `sysinfo`. Threads are listed as tasks there and are
/// skipped, so each process is counted once. Real time has a resolution of
/// one second, so real-time ceilings are enforced coarsely.
pub struct SysinfoProbe {
    system: System,
}

impl Default for SysinfoProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl SysinfoProbe {
    pub fn new() -> Self {
        Self {
            system: System::new(),
        }
    }
}

impl Probe for SysinfoProbe {
    fn refresh(&mut self) {
        self.system.refresh_processes(ProcessesToUpdate::All, true);
    }

    fn info(&mut self, pid: i32) -> Option<ProcInfo> {
        let process = self.system.process(Pid::from_u32(pid as u32))?;
        if process.thread_kind().is_some() {
            return None;
        }
        let state = match process.status() {
            ProcessStatus::Zombie => 'Z',
            ProcessStatus::Run => 'R',
            ProcessStatus::Stop => 'T',
            _ => 'S',
        };
        Some(ProcInfo {
            ppid: process.parent().map_or(0, |p| p.as_u32() as i32),
            state,
            rss: process.memory(),
            cpu_time: Duration::from_millis(process.accumulated_cpu_time()),
            real_time: Duration::from_secs(process.run_time()),
        })
    }

    fn children_map(&mut self) -> HashMap<i32, Vec<i32>> {
        let mut map: HashMap<i32, Vec<i32>> = HashMap::new();
        for (pid, process) in self.system.processes() {
            if process.thread_kind().is_some() {
                continue;
            }
            if let Some(parent) = process.parent() {
                map.entry(parent.as_u32() as i32)
                    .or_default()
                    .push(pid.as_u32() as i32);
            }
        }
        map
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::procfs::ProcfsProbe;

    use std::fs;
    use std::process::Command;
    use std::sync::{Arc, Barrier};
    use std::thread;

    fn own_tasks() -> Vec<i32> {
        fs::read_dir("/proc/self/task")
            .unwrap()
            .filter_map(|e| e.ok()?.file_name().to_str()?.parse().ok())
            .collect()
    }

    #[test]
    fn threads_are_not_processes() {
        let barrier = Arc::new(Barrier::new(5));
        let workers: Vec<_> = (0..4)
            .map(|_| {
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    barrier.wait();
                })
            })
            .collect();
        barrier.wait();

        let mut child = Command::new("sleep").arg("5").spawn().unwrap();
        let me = std::process::id() as i32;
        let tasks = own_tasks();
        assert!(tasks.len() >= 5);

        let mut sysinfo = SysinfoProbe::new();
        sysinfo.refresh();
        let from_sysinfo = sysinfo.descendants(me);
        let from_procfs = ProcfsProbe::new().descendants(me);

        child.kill().unwrap();
        child.wait().unwrap();
        barrier.wait();
        for w in workers {
            w.join().unwrap();
        }

        for tid in tasks.iter().filter(|&&t| t != me) {
            assert!(!from_sysinfo.contains(tid), "thread {} counted as a process", tid);
            assert!(!from_procfs.contains(tid));
        }
        assert!(from_sysinfo.contains(&(child.id() as i32)));
        assert!(from_procfs.contains(&(child.id() as i32)));
    }
}
