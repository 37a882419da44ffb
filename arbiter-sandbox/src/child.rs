use crate::{libc_call, SandboxArgs};

use std::convert::Infallible as Never;
use std::ffi::{CStr, CString};
use std::os::unix::ffi::OsStrExt;
use std::os::unix::io::RawFd;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use fcntl::OFlag;
use nix::fcntl;
use nix::sched::{self, CpuSet};
use nix::sys::stat::Mode;
use nix::unistd::{self, Gid, Pid, Uid};
use rlimit::Resource;

pub enum Redirect {
    Inherit,
    Read(CString),
    Write { path: CString, append: bool },
    Fd(RawFd),
}

/// Everything the child needs, allocated before `fork`.
pub struct Prepared {
    bin: CString,
    argv: Vec<CString>,
    envp: Vec<CString>,
    cwd: Option<CString>,
    pub stdin: Redirect,
    pub stdout: Redirect,
    pub stderr: Redirect,
    uid: Option<Uid>,
    gid: Option<Gid>,
    groups: Vec<Gid>,
    rlimit_cpu: Option<u64>,
    rlimit_data: Option<u64>,
    rlimit_nproc: Option<u64>,
    cores: Option<u32>,
}

fn c_path(path: &Path) -> Result<CString> {
    CString::new(path.as_os_str().as_bytes())
        .with_context(|| format!("path contains a nul byte: {}", path.display()))
}

impl Prepared {
    pub fn new(args: &SandboxArgs) -> Result<Self> {
        let bin = c_path(&args.bin)?;

        let mut argv = Vec::with_capacity(args.args.len() + 1);
        argv.push(bin.clone());
        for a in &args.args {
            argv.push(CString::new(a.as_bytes())?);
        }

        let envp = args
            .env
            .iter()
            .map(|e| CString::new(e.as_bytes()))
            .collect::<Result<Vec<_>, _>>()?;

        let output = |path: &Option<PathBuf>, append: bool| -> Result<Redirect> {
            Ok(match path {
                Some(p) => Redirect::Write {
                    path: c_path(p)?,
                    append,
                },
                None => Redirect::Inherit,
            })
        };

        Ok(Self {
            bin,
            argv,
            envp,
            cwd: args.cwd.as_deref().map(c_path).transpose()?,
            stdin: match args.stdin {
                Some(ref p) => Redirect::Read(c_path(p)?),
                None => Redirect::Inherit,
            },
            stdout: output(&args.stdout, args.stdout_append)?,
            stderr: output(&args.stderr, args.stderr_append)?,
            uid: args.uid.map(Uid::from_raw),
            gid: args.gid.map(Gid::from_raw),
            groups: args.groups.iter().copied().map(Gid::from_raw).collect(),
            rlimit_cpu: args.rlimit_cpu,
            rlimit_data: args.rlimit_data,
            rlimit_nproc: args.rlimit_nproc,
            cores: args.cores,
        })
    }
}

pub fn run_child(p: &Prepared) -> Result<Never> {
    libc_call(|| unsafe { libc::prctl(libc::PR_SET_PDEATHSIG, libc::SIGKILL) })?;

    unistd::setpgid(Pid::from_raw(0), Pid::from_raw(0)).context("failed to set process group")?;

    redirect(&p.stdin, libc::STDIN_FILENO).context("failed to redirect stdin")?;
    redirect(&p.stdout, libc::STDOUT_FILENO).context("failed to redirect stdout")?;
    redirect(&p.stderr, libc::STDERR_FILENO).context("failed to redirect stderr")?;

    Resource::CORE.set(0, 0)?;

    if let Some(rlimit_cpu) = p.rlimit_cpu {
        Resource::CPU.set(rlimit_cpu, rlimit_cpu)?;
    }

    if let Some(rlimit_data) = p.rlimit_data {
        Resource::DATA.set(rlimit_data, rlimit_data)?;
    }

    if let Some(rlimit_nproc) = p.rlimit_nproc {
        Resource::NPROC.set(rlimit_nproc, rlimit_nproc)?;
    }

    if let Some(cores) = p.cores {
        let mut cpu_set = CpuSet::new();
        for core in 0..cores.max(1) as usize {
            cpu_set.set(core)?;
        }
        sched::sched_setaffinity(Pid::from_raw(0), &cpu_set).context("failed to set affinity")?;
    }

    if let Some(ref cwd) = p.cwd {
        unistd::chdir(cwd.as_c_str()).context("failed to change directory")?;
    }

    if let Some(gid) = p.gid {
        let groups = if p.groups.is_empty() {
            vec![gid]
        } else {
            p.groups.clone()
        };
        unistd::setgroups(&groups).context("failed to set groups")?;
        unistd::setgid(gid).context("failed to set gid")?;
    }

    if let Some(uid) = p.uid {
        unistd::setuid(uid).context("failed to set uid")?;
    }

    execve(&p.bin, &p.argv, &p.envp)
}

fn redirect(r: &Redirect, target: RawFd) -> nix::Result<()> {
    let fd = match r {
        Redirect::Inherit => return Ok(()),
        Redirect::Fd(fd) => {
            unistd::dup2(*fd, target)?;
            unistd::close(*fd)?;
            return Ok(());
        }
        Redirect::Read(path) => fcntl::open(
            path.as_c_str(),
            OFlag::O_RDONLY | OFlag::O_CLOEXEC,
            Mode::empty(),
        )?,
        Redirect::Write { path, append } => {
            let mode = if *append {
                OFlag::O_APPEND
            } else {
                OFlag::O_TRUNC
            };
            fcntl::open(
                path.as_c_str(),
                OFlag::O_WRONLY | OFlag::O_CREAT | OFlag::O_CLOEXEC | mode,
                Mode::from_bits_truncate(0o644),
            )?
        }
    };
    unistd::dup2(fd, target)?;
    unistd::close(fd)?;
    Ok(())
}

fn execve(bin: &CStr, argv: &[CString], envp: &[CString]) -> Result<Never> {
    match unistd::execve(bin, argv, envp) {
        Ok(never) => match never {},
        Err(err) => Err(err).with_context(|| format!("failed to execve: bin = {:?}", bin)),
    }
}
