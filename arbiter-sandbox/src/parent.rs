use crate::monitor::Usage;
use crate::{libc_call, SandboxOutput};

use std::io;
use std::mem::MaybeUninit;
use std::time::Duration;

use log::debug;
use nix::unistd::Pid;

pub fn wait4(child_pid: Pid) -> io::Result<(i32, libc::rusage)> {
    let pid = child_pid.as_raw();
    let mut status: i32 = 0;
    let mut rusage: MaybeUninit<libc::rusage> = MaybeUninit::zeroed();

    loop {
        let ret = libc_call(|| unsafe { libc::wait4(pid, &mut status, 0, rusage.as_mut_ptr()) });

        match ret {
            Ok(ret) if ret > 0 => {
                debug!("wait4 ret = {}, status = {}", ret, status);
                break;
            }
            Ok(_) => continue,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(err),
        }
    }

    unsafe { Ok((status, rusage.assume_init())) }
}

fn timeval_to_duration(tv: &libc::timeval) -> Duration {
    Duration::from_secs(tv.tv_sec as u64) + Duration::from_micros(tv.tv_usec as u64)
}

pub fn collect_output(
    status: i32,
    rusage: &libc::rusage,
    real_duration: Duration,
    usage: &Usage,
) -> SandboxOutput {
    let code = libc::WEXITSTATUS(status);
    let signal = if libc::WIFSIGNALED(status) {
        libc::WTERMSIG(status)
    } else {
        0
    };

    let rusage_cpu = timeval_to_duration(&rusage.ru_utime) + timeval_to_duration(&rusage.ru_stime);
    let rusage_memory = rusage.ru_maxrss as u64 * 1024; // KiB => bytes

    debug!("status = {}, code = {}, signal = {}", status, code, signal);
    debug!("rusage cpu = {:?}, maxrss = {}", rusage_cpu, rusage_memory);
    debug!("sampled usage = {:?}", usage);

    SandboxOutput {
        code,
        signal,
        status,
        real_time: usage.real_time.max(real_duration).as_millis() as u64,
        cpu_time: usage.cpu_time.max(rusage_cpu).as_millis() as u64,
        memory: usage.memory.max(rusage_memory),
        breach: usage.breach,
    }
}
