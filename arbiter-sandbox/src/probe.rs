use crate::procfs::ProcfsProbe;
use crate::sysinfo_probe::SysinfoProbe;

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProbeKind {
    Procfs,
    Sysinfo,
}

impl Default for ProbeKind {
    fn default() -> Self {
        ProbeKind::Procfs
    }
}

#[derive(Debug, Clone)]
pub struct ProcInfo {
    pub ppid: i32,
    pub state: char,
    pub rss: u64, // bytes
    pub cpu_time: Duration,
    pub real_time: Duration,
}

impl ProcInfo {
    pub fn is_zombie(&self) -> bool {
        self.state == 'Z'
    }
}

/// A source of process accounting.
pub trait Probe: Send {
    fn refresh(&mut self) {}

    fn info(&mut self, pid: i32) -> Option<ProcInfo>;

    fn children_map(&mut self) -> HashMap<i32, Vec<i32>>;

    fn descendants(&mut self, pid: i32) -> Vec<i32> {
        let map = self.children_map();
        let mut ans = Vec::new();
        let mut queue: VecDeque<i32> = VecDeque::new();
        queue.push_back(pid);
        while let Some(p) = queue.pop_front() {
            if let Some(children) = map.get(&p) {
                for &c in children {
                    if c != pid && !ans.contains(&c) {
                        ans.push(c);
                        queue.push_back(c);
                    }
                }
            }
        }
        ans
    }
}

pub fn new_probe(kind: ProbeKind) -> Box<dyn Probe> {
    match kind {
        ProbeKind::Procfs => Box::new(ProcfsProbe::new()),
        ProbeKind::Sysinfo => Box::new(SysinfoProbe::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FakeProbe(HashMap<i32, Vec<i32>>);

    impl Probe for FakeProbe {
        fn info(&mut self, _: i32) -> Option<ProcInfo> {
            None
        }

        fn children_map(&mut self) -> HashMap<i32, Vec<i32>> {
            self.0.clone()
        }
    }

    #[test]
    fn breadth_first_descendants() {
        let mut map = HashMap::new();
        map.insert(1, vec![2, 3]);
        map.insert(2, vec![4]);
        map.insert(4, vec![5]);
        map.insert(9, vec![10]);
        let mut probe = FakeProbe(map);
        assert_eq!(probe.descendants(1), vec![2, 3, 4, 5]);
        assert_eq!(probe.descendants(5), Vec::<i32>::new());
    }
}
