mod common;

use std::fs;
use std::time::{Duration, Instant};

use arbiter_sandbox::{Breach, SandboxArgs};

#[test]
fn exit_codes() {
    common::init();

    let args = SandboxArgs {
        bin: "/bin/true".into(),
        ..SandboxArgs::default()
    };
    let output = common::run(&args).unwrap();
    assert!(output.is_success());
    assert_eq!(output.returncode(), 0);
    assert!(output.breach.is_none());

    let output = common::run(&common::sh("exit 3")).unwrap();
    assert!(!output.is_success());
    assert_eq!(output.returncode(), 3);
}

#[test]
fn signaled() {
    common::init();

    let output = common::run(&common::sh("kill -9 $$")).unwrap();
    assert_eq!(output.signal, 9);
    assert_eq!(output.returncode(), -9);
}

#[test]
fn missing_binary() {
    common::init();

    let args = SandboxArgs {
        bin: "/definitely/not/here".into(),
        ..SandboxArgs::default()
    };
    assert!(common::run(&args).is_err());
}

#[test]
fn cpu_ceiling() {
    common::init();

    let mut args = common::sh("while :; do :; done");
    args.limit_cpu_time = Some(300);
    args.rlimit_cpu = Some(5);

    let t0 = Instant::now();
    let output = common::run(&args).unwrap();
    assert_eq!(output.breach, Some(Breach::CpuTime));
    assert!(output.cpu_time > 300);
    assert!(!output.is_success());
    assert!(t0.elapsed() < Duration::from_secs(5));
}

#[test]
fn real_time_ceiling() {
    common::init();

    let mut args = common::sh("sleep 10");
    args.limit_real_time = Some(200);

    let output = common::run(&args).unwrap();
    assert_eq!(output.breach, Some(Breach::RealTime));
    assert!(output.real_time < 5000);
}

#[test]
fn memory_ceiling() {
    common::init();

    let mut args = common::sh("tail /dev/zero; true");
    args.limit_memory = Some(64 << 20);
    args.limit_real_time = Some(20_000);

    let t0 = Instant::now();
    let output = common::run(&args).unwrap();
    assert_eq!(output.breach, Some(Breach::Memory));
    assert!(output.memory > 64 << 20);
    assert!(!output.is_success());
    assert!(t0.elapsed() < Duration::from_secs(10));
}

#[test]
fn memory_is_summed_over_the_tree() {
    common::init();

    // Each holder stays well under the per-process data limit.
    let mut args = common::sh(
        "for i in 1 2 3 4 5 6 7 8; do (x=$(yes | head -c 8388608); sleep 10) & done; wait",
    );
    args.rlimit_data = Some(40 << 20);
    args.limit_memory = Some(40 << 20);
    args.limit_real_time = Some(20_000);

    let t0 = Instant::now();
    let output = common::run(&args).unwrap();
    assert_eq!(output.breach, Some(Breach::Memory));
    assert!(output.memory > 40 << 20);
    assert!(t0.elapsed() < Duration::from_secs(10));
}

#[test]
fn redirects_and_env() {
    common::init();

    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("input.txt");
    let stdout = dir.path().join("stdout.txt");
    fs::write(&input, "hello\n").unwrap();

    let mut args = common::sh("cat; echo $GREETING; pwd");
    args.env.push("GREETING=hi".into());
    args.cwd = Some(dir.path().to_owned());
    args.stdin = Some(input);
    args.stdout = Some(stdout.clone());

    let output = common::run(&args).unwrap();
    assert!(output.is_success());

    let content = fs::read_to_string(&stdout).unwrap();
    let lines: Vec<&str> = content.lines().collect();
    assert_eq!(lines[0], "hello");
    assert_eq!(lines[1], "hi");
    assert_eq!(fs::canonicalize(lines[2]).unwrap(), fs::canonicalize(dir.path()).unwrap());

    args.stdout_append = true;
    common::run(&args).unwrap();
    assert_eq!(fs::read_to_string(&stdout).unwrap().lines().count(), 6);
}

#[test]
fn capped_output() {
    common::init();

    let dir = tempfile::tempdir().unwrap();
    let stdout = dir.path().join("stdout.txt");

    let mut args = common::sh("i=0; while [ $i -lt 1000 ]; do echo 0123456789; i=$((i+1)); done");
    args.stdout = Some(stdout.clone());
    args.stdout_max_bytes = Some(100);

    let output = common::run(&args).unwrap();
    assert!(output.is_success());
    assert_eq!(fs::metadata(&stdout).unwrap().len(), 100);
}

#[test]
fn spawn_and_terminate() {
    common::init();

    let mut args = common::sh("sleep 30 & sleep 30; wait");
    args.probe = arbiter_sandbox::ProbeKind::Sysinfo;
    let sandboxed = arbiter_sandbox::spawn(&args).unwrap();
    assert!(sandboxed.pid() > 0);

    std::thread::sleep(Duration::from_millis(200));
    let t0 = Instant::now();
    sandboxed.terminate();
    let output = sandboxed.wait().unwrap();
    assert!(!output.is_success());
    assert!(t0.elapsed() < Duration::from_secs(10));
}
