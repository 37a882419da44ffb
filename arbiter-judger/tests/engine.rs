mod common;

use arbiter_judger::args::{Arg, DependentExpr};
use arbiter_judger::paths::{InputPath, OutputPath, OutputStream, SandboxPath};
use arbiter_judger::predicates::Postcondition;
use arbiter_judger::system::backend::LocalBackend;
use arbiter_judger::system::identity::IdentityPolicy;
use arbiter_judger::task::Step;
use arbiter_judger::tasks::{CollectLogsTask, DiffOptions, DiffTask, RunTask};
use arbiter_judger::{Checking, Command, JudgeError, Limits, System};
use arbiter_protocol::Status;

use std::time::{Duration, Instant};

#[test]
fn cpu_spin_is_tle() {
    let (_dir, mut system) = common::system();

    let limits = Limits::default().with_cpu_time(Duration::from_secs(2));
    let mut task = RunTask::tool("sh")
        .options(|o| o.limits(limits).result_on_time(Some(Status::Tle)))
        .arg("-c")
        .arg("while :; do :; done");

    let t0 = Instant::now();
    let result = system.run_task("spin", &mut task).unwrap();
    assert_eq!(result.status(), Status::Tle);
    assert!(t0.elapsed() < Duration::from_secs(5));
}

#[test]
fn hard_limit_kill_is_tle() {
    let (_dir, system) = common::system();
    let mut system =
        system.with_hard_limits(Limits::default().with_cpu_time(Duration::from_secs(1)));

    let limits = Limits::default().with_cpu_time(Duration::from_secs(60));
    let mut task = RunTask::tool("sh")
        .options(|o| o.limits(limits).result_on_time(Some(Status::Tle)))
        .arg("-c")
        .arg("while :; do :; done");

    let t0 = Instant::now();
    let result = system.run_task("spin", &mut task).unwrap();
    assert_eq!(result.status(), Status::Tle);
    assert!(t0.elapsed() < Duration::from_secs(10));
}

/// Eight shells holding 8 MiB each: every one fits, together they do not.
const MEMORY_HOLDERS: &str =
    "for i in 1 2 3 4 5 6 7 8; do (x=$(yes | head -c 8388608); sleep 10) & done; wait";

#[test]
fn tree_memory_is_mem() {
    let (_dir, mut system) = common::system();

    let limits = Limits::default()
        .with_memory(40 << 20)
        .with_real_time(Duration::from_secs(20));
    let mut task = RunTask::tool("sh")
        .options(|o| o.limits(limits).result_on_memory(Some(Status::Mem)))
        .arg("-c")
        .arg(MEMORY_HOLDERS);

    let t0 = Instant::now();
    let result = system.run_task("hog", &mut task).unwrap();
    assert_eq!(result.status(), Status::Mem);
    assert!(t0.elapsed() < Duration::from_secs(10));
}

#[test]
fn obligatory_steps_run_after_failure() {
    let (_dir, mut system) = common::system();
    common::write(&system, "hint.txt", "1\n");
    common::write(&system, "answer.txt", "2\n");

    let hint = SandboxPath::parse_output("hint.txt").unwrap();
    let answer = SandboxPath::parse_output("answer.txt").unwrap();

    let mut checking = Checking::new();
    checking
        .add_step("a", Step::task(DiffTask::new(hint, answer, DiffOptions::default()).unwrap()))
        .unwrap();
    checking
        .add_step("between", Step::command(Command::program("true")))
        .unwrap();
    checking
        .add_step("b", Step::task(CollectLogsTask::standard().unwrap()))
        .unwrap();

    let results = checking.run(&mut system).unwrap();
    assert_eq!(results.status(), Status::Ans);
    assert!(results.get("between").is_none());
    assert!(results.get("b").is_some());
    assert!(system.output_directory().join("log.zip").is_file());
}

#[test]
fn unregistered_input_is_refused() {
    let (_dir, mut system) = common::system();
    let secret = SandboxPath::parse_input("/etc/passwd").unwrap();

    for name in &["first", "second"] {
        let cmd = Command::program("cat").stdin(secret.clone());
        let err = system.run_command(name, cmd).unwrap_err();
        let err = err.downcast_ref::<JudgeError>().unwrap();
        assert!(matches!(err, JudgeError::Prerequirement { .. }), "{:?}", err);
    }

    system.add_path(&InputPath::new("/etc/passwd").unwrap());
    let result = system
        .run_command("third", Command::program("cat").stdin(secret))
        .unwrap()
        .unwrap();
    assert_eq!(result.returncode(), 0);
}

#[test]
fn inputs_cannot_climb_out() {
    let (_dir, mut system) = common::system();
    let inputs = tempfile::tempdir().unwrap();
    system.add_path(&InputPath::new(inputs.path()).unwrap());

    let escape = inputs.path().join("../../etc/passwd");
    assert!(matches!(
        SandboxPath::parse_input(&escape),
        Err(JudgeError::InvalidPath { .. })
    ));

    let passwd = SandboxPath::parse_input("/etc/passwd").unwrap();
    let work = OutputPath::root();
    assert!(!system.validators(&work).file_exists(&passwd));
    let err = system
        .run_command("cat", Command::program("cat").stdin(passwd))
        .unwrap_err();
    assert!(matches!(
        err.downcast_ref::<JudgeError>(),
        Some(JudgeError::Prerequirement { .. })
    ));
}

#[test]
fn host_accounts_need_provisioning() {
    let (_dir, mut system) = common::system();

    let err = system
        .run_command("as_root", Command::program("true").user("root"))
        .unwrap_err();
    assert!(matches!(
        err.downcast_ref::<JudgeError>(),
        Some(JudgeError::Prerequirement { .. })
    ));

    let err = system
        .run_command("as_group", Command::program("true").group("root"))
        .unwrap_err();
    assert!(matches!(
        err.downcast_ref::<JudgeError>(),
        Some(JudgeError::Prerequirement { .. })
    ));
}

#[test]
fn variables_resolve_late() {
    let (_dir, mut system) = common::system();

    let greeting = DependentExpr::new(&["who"], |v| format!("hello {}", v[0]));
    let cmd = Command::program("sh")
        .args(vec!["-c", "printf %s \"$1\"", "sh"])
        .arg(Arg::Var(greeting))
        .stdout(OutputStream::to_path(OutputPath::new("greeting.txt").unwrap()));

    let err = system.run_command("early", cmd.clone()).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<JudgeError>(),
        Some(JudgeError::UnresolvedVariable { .. })
    ));

    system.set_variable("who", "world");
    let result = system.run_command("late", cmd).unwrap().unwrap();
    assert_eq!(result.status(), None);
    assert_eq!(common::read(&system, "greeting.txt"), "hello world");
}

#[test]
fn postconditions_are_stable() {
    let (_dir, mut system) = common::system();

    let cmd = Command::program("sh")
        .arg("-c")
        .arg("echo oops >&2; exit 2")
        .postcondition(Postcondition::EmptyError, Status::Rte)
        .postcondition(Postcondition::ReturnCode(vec![0]), Status::Int);
    let result = system.run_command("fail", cmd.clone()).unwrap().unwrap();
    assert_eq!(result.returncode(), 2);
    assert_eq!(result.status(), Some(Status::Rte));

    let work = OutputPath::root();
    let validators = system.validators(&work);
    for _ in 0..3 {
        assert_eq!(cmd.verify_postconditions(&validators, &result), Some(Status::Rte));
    }
}

#[test]
fn background_is_stopped() {
    let (_dir, mut system) = common::system();

    let started = system
        .start_background("sleeper", Command::program("sleep").arg("30"))
        .unwrap();
    assert!(started.is_some());
    assert_eq!(system.background_names(), vec!["sleeper".to_owned()]);

    let dup = system.start_background("sleeper", Command::program("sleep").arg("30"));
    assert!(dup.is_err());

    let t0 = Instant::now();
    let result = system.stop_background("sleeper").unwrap();
    assert!(result.returncode() < 0);
    assert!(t0.elapsed() < Duration::from_secs(10));
    assert!(system.background_names().is_empty());

    let err = system.stop_background("sleeper").unwrap_err();
    assert!(matches!(
        err.downcast_ref::<JudgeError>(),
        Some(JudgeError::BackgroundNotFound { .. })
    ));
}

#[test]
fn transcript_is_written() {
    let (_dir, mut system) = common::system();

    system
        .run_command("hello", Command::program("echo").arg("hi"))
        .unwrap();
    let transcript = common::read(&system, "log/001_hello_cmd.txt");
    assert!(transcript.contains("Resolved command line:"));
    assert!(transcript.contains("Result:"));
    assert_eq!(common::read(&system, "log/001_hello_stdout.txt"), "hi\n");
}

#[test]
fn identity_switch_is_explicit() {
    if common::is_root() {
        return;
    }
    common::init();
    let dir = tempfile::tempdir().unwrap();
    let mut system = System::new(dir.path(), Box::new(LocalBackend::new()))
        .unwrap()
        .with_identity_policy(IdentityPolicy::Require);
    system.add_user("nobody", None);

    let err = system
        .run_command("as_nobody", Command::program("true").user("nobody"))
        .unwrap_err();
    assert!(matches!(
        err.downcast_ref::<JudgeError>(),
        Some(JudgeError::IdentityUnavailable { .. })
    ));

    let mut system = system.with_identity_policy(IdentityPolicy::SkipUnprivileged);
    let result = system
        .run_command("anyway", Command::program("true").user("nobody"))
        .unwrap()
        .unwrap();
    assert_eq!(result.returncode(), 0);
}

#[test]
fn hard_limits_tighten() {
    let (_dir, system) = common::system();
    let system = system.with_hard_limits(Limits::default().with_memory(1 << 20));

    let limits = system.update_limits(Limits::default().with_memory(1 << 30));
    assert_eq!(limits.memory(), Some(1 << 20));

    let limits = system.update_limits(Limits::default().with_pids(4));
    assert_eq!(limits.pids(), Some(4));
    assert_eq!(limits.memory(), Some(1 << 20));
}
