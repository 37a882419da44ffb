use crate::probe::Probe;
use crate::procfs::ProcfsProbe;

use std::thread;
use std::time::Duration;

use log::debug;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;

pub fn send_signal(pid: Pid, signal: Signal) -> nix::Result<()> {
    let result = signal::kill(pid, signal);
    debug!(
        "kill pid = {}, signal = {}, result = {:?}",
        pid, signal, result
    );
    result
}

pub fn killall(pids: &[Pid]) {
    for &pid in pids {
        let _ = send_signal(pid, Signal::SIGSTOP);
    }

    for &pid in pids {
        let _ = send_signal(pid, Signal::SIGKILL);
    }
}

/// SIGTERM first, then stop-and-kill whatever is still alive.
pub fn kill_tree(root: Pid, probe: &mut dyn Probe) {
    probe.refresh();
    let _ = send_signal(root, Signal::SIGTERM);
    for pid in probe.descendants(root.as_raw()) {
        let _ = send_signal(Pid::from_raw(pid), Signal::SIGTERM);
    }

    thread::sleep(Duration::from_millis(100));

    for _ in 0..50 {
        probe.refresh();
        let mut alive: Vec<Pid> = probe
            .descendants(root.as_raw())
            .into_iter()
            .filter(|&pid| probe.info(pid).map_or(false, |info| !info.is_zombie()))
            .map(Pid::from_raw)
            .collect();
        if probe.info(root.as_raw()).map_or(false, |info| !info.is_zombie()) {
            alive.push(root);
        }
        if alive.is_empty() {
            return;
        }
        killall(&alive);
        thread::sleep(Duration::from_millis(10));
    }
}

pub fn terminate_tree(root: Pid) {
    let mut probe = ProcfsProbe::new();
    kill_tree(root, &mut probe);
}

pub fn kill_group(pgid: Pid) {
    let _ = signal::killpg(pgid, Signal::SIGKILL);
}
