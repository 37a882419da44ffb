use crate::probe::{ProcInfo, Probe};

use std::collections::HashMap;
use std::fs;
use std::time::Duration;

pub struct ProcfsProbe {
    clk_tck: u64,
    page_size: u64,
}

impl Default for ProcfsProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcfsProbe {
    pub fn new() -> Self {
        let clk_tck = match unsafe { libc::sysconf(libc::_SC_CLK_TCK) } {
            n if n > 0 => n as u64,
            _ => 100,
        };
        let page_size = match unsafe { libc::sysconf(libc::_SC_PAGESIZE) } {
            n if n > 0 => n as u64,
            _ => 4096,
        };
        Self { clk_tck, page_size }
    }

    fn ticks(&self, ticks: u64) -> Duration {
        Duration::from_millis(ticks * 1000 / self.clk_tck)
    }
}

#[derive(Debug, PartialEq, Eq)]
pub struct Stat {
    pub state: char,
    pub ppid: i32,
    pub utime: u64, // ticks
    pub stime: u64, // ticks
    pub starttime: u64, // ticks since boot
}

/// Parses `/proc/<pid>/stat`. The command name may contain spaces and parentheses.
pub fn parse_stat(content: &str) -> Option<Stat> {
    let rest = &content[content.rfind(')')? + 1..];
    let fields: Vec<&str> = rest.split_whitespace().collect();
    Some(Stat {
        state: fields.first()?.chars().next()?,
        ppid: fields.get(1)?.parse().ok()?,
        utime: fields.get(11)?.parse().ok()?,
        stime: fields.get(12)?.parse().ok()?,
        starttime: fields.get(19)?.parse().ok()?,
    })
}

pub fn parse_statm_resident(content: &str) -> Option<u64> {
    content.split_whitespace().nth(1)?.parse().ok()
}

fn uptime() -> Option<f64> {
    let content = fs::read_to_string("/proc/uptime").ok()?;
    content.split_whitespace().next()?.parse().ok()
}

impl Probe for ProcfsProbe {
    fn info(&mut self, pid: i32) -> Option<ProcInfo> {
        let stat = fs::read_to_string(format!("/proc/{}/stat", pid)).ok()?;
        let stat = parse_stat(&stat)?;

        let rss = fs::read_to_string(format!("/proc/{}/statm", pid))
            .ok()
            .and_then(|s| parse_statm_resident(&s))
            .unwrap_or(0)
            * self.page_size;

        let started = stat.starttime as f64 / self.clk_tck as f64;
        let real_time = match uptime() {
            Some(up) if up > started => Duration::from_secs_f64(up - started),
            _ => Duration::from_secs(0),
        };

        Some(ProcInfo {
            ppid: stat.ppid,
            state: stat.state,
            rss,
            cpu_time: self.ticks(stat.utime + stat.stime),
            real_time,
        })
    }

    fn children_map(&mut self) -> HashMap<i32, Vec<i32>> {
        let mut map: HashMap<i32, Vec<i32>> = HashMap::new();
        let entries = match fs::read_dir("/proc") {
            Ok(e) => e,
            Err(_) => return map,
        };
        for entry in entries.flatten() {
            let pid: i32 = match entry.file_name().to_str().and_then(|s| s.parse().ok()) {
                Some(pid) => pid,
                None => continue,
            };
            let stat = match fs::read_to_string(entry.path().join("stat")) {
                Ok(s) => s,
                Err(_) => continue,
            };
            if let Some(stat) = parse_stat(&stat) {
                map.entry(stat.ppid).or_default().push(pid);
            }
        }
        map
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stat_with_odd_comm() {
        let content = "1234 (a b) c)) S 1 1234 1234 0 -1 4194560 100 0 0 0 \
                       7 3 0 0 20 0 1 0 5000 1000000 200 18446744073709551615";
        let stat = parse_stat(content).unwrap();
        assert_eq!(
            stat,
            Stat {
                state: 'S',
                ppid: 1,
                utime: 7,
                stime: 3,
                starttime: 5000,
            }
        );
        assert!(parse_stat("1234 (x) S 1").is_none());
    }

    #[test]
    fn statm() {
        assert_eq!(parse_statm_resident("2000 350 100 1 0 200 0"), Some(350));
        assert_eq!(parse_statm_resident(""), None);
    }

    #[test]
    fn own_process() {
        let mut probe = ProcfsProbe::new();
        let me = std::process::id() as i32;
        let info = probe.info(me).unwrap();
        assert!(info.rss > 0);
        assert!(!info.is_zombie());
        assert!(probe.children_map().get(&info.ppid).unwrap().contains(&me));
    }
}
