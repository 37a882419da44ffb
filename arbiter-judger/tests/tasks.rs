mod common;

use arbiter_judger::command::Ownership;
use arbiter_judger::config::Config;
use arbiter_judger::paths::{InputPath, OutputPath, OutputStream, SandboxPath};
use arbiter_judger::result::ResultValue;
use arbiter_judger::system::backend::LocalBackend;
use arbiter_judger::tasks::{
    BuildTask, CollectLogsTask, DiffOptions, DiffTask, PrepareTask, RulesTask, RunTask,
};
use arbiter_judger::{pipeline, Command, System};
use arbiter_protocol::Status;

use std::fs::{self, File};
use std::io::Write;
use std::path::Path;

use zip::write::FileOptions;
use zip::{ZipArchive, ZipWriter};

fn unprivileged_build() -> BuildTask {
    BuildTask::solution()
        .unwrap()
        .options(|o| o.user(None).group(None))
        .config(|mut c| {
            c.ownership = Ownership::default();
            c
        })
}

fn output(path: &str) -> SandboxPath {
    SandboxPath::parse_output(path).unwrap()
}

#[test]
fn build_without_sources_is_cme() {
    let (_dir, mut system) = common::system();
    common::write(&system, "solution/src/README.txt", "nothing to build\n");

    let mut task = unprivileged_build();
    let result = system.run_task("build", &mut task).unwrap();
    assert_eq!(result.status(), Status::Cme);
    assert!(!system.output_directory().join("solution/exec").exists());
}

#[test]
fn script_is_wrapped() {
    let (_dir, mut system) = common::system();
    common::write(&system, "solution/src/run.sh", "echo hi\n");

    let mut task = unprivileged_build();
    let result = system.run_task("build", &mut task).unwrap();
    assert_eq!(result.status(), Status::Ok);
    assert!(matches!(result.get("strategy"), Some(ResultValue::Text(s)) if s == "script"));

    let mut run = RunTask::solution(OutputPath::new("solution/exec").unwrap())
        .options(|o| o.user(None).group(None))
        .stdout(OutputStream::to_path(output("out.txt")));
    let result = system.run_task("run", &mut run).unwrap();
    assert_eq!(result.status(), Status::Ok);
    assert_eq!(common::read(&system, "out.txt"), "hi\n");
}

#[test]
fn gcc_build() {
    let (_dir, mut system) = common::system();
    if system.which("gcc").is_none() {
        return;
    }
    let source = include_str!("../demo/main.c");
    common::write(&system, "solution/src/main.c", source);
    common::write(&system, "1.in", "20 22\n");

    let mut task = unprivileged_build();
    let result = system.run_task("build", &mut task).unwrap();
    assert_eq!(result.status(), Status::Ok);

    let mut run = RunTask::solution(OutputPath::new("solution/exec").unwrap())
        .options(|o| o.user(None).group(None))
        .stdin(output("1.in"))
        .stdout(OutputStream::to_path(output("1.out")));
    let result = system.run_task("run", &mut run).unwrap();
    assert_eq!(result.status(), Status::Ok);
    assert_eq!(common::read(&system, "1.out"), "42\n");
}

#[test]
fn diff_normalizes() {
    let (_dir, mut system) = common::system();
    common::write(&system, "hint.txt", "3");
    common::write(&system, "answer.txt", "3\n");
    common::write(&system, "upper.txt", "Hi");
    common::write(&system, "lower.txt", "hi");

    let mut same = DiffTask::new(output("hint.txt"), output("answer.txt"), DiffOptions::default())
        .unwrap();
    assert_eq!(system.run_task("same", &mut same).unwrap().status(), Status::Ok);

    let mut case = DiffTask::new(output("upper.txt"), output("lower.txt"), DiffOptions::default())
        .unwrap();
    let result = system.run_task("case", &mut case).unwrap();
    assert_eq!(result.status(), Status::Ans);
    assert!(result.get("mismatch").is_some());

    let mut missing =
        DiffTask::new(output("hint.txt"), output("nowhere.txt"), DiffOptions::default())
            .unwrap();
    assert_eq!(system.run_task("missing", &mut missing).unwrap().status(), Status::Ans);
}

#[test]
fn logs_skip_empty_files() {
    let (_dir, mut system) = common::system();
    common::write(&system, "log/a.txt", "something\n");
    common::write(&system, "log/b.txt", "");

    let mut task = CollectLogsTask::standard().unwrap();
    let result = system.run_task("logs", &mut task).unwrap();
    assert_eq!(result.status(), Status::Ok);

    let file = File::open(system.output_directory().join("log.zip")).unwrap();
    let archive = ZipArchive::new(file).unwrap();
    let names: Vec<&str> = archive.file_names().collect();
    assert_eq!(names, vec!["log/a.txt"]);
}

#[test]
fn rules_are_enforced() {
    let (_dir, mut system) = common::system();
    common::write(&system, "solution/src/main.c", "int main() { goto end; end: return 0; }\n");

    let mut ok = RulesTask::solution_source().unwrap().rules("printf<=0").unwrap();
    assert_eq!(system.run_task("ok", &mut ok).unwrap().status(), Status::Ok);

    let mut goto = RulesTask::solution_source().unwrap().rules("goto<=0").unwrap();
    assert_eq!(system.run_task("goto", &mut goto).unwrap().status(), Status::Rul);

    let mut size = RulesTask::solution_source().unwrap().max_size(4);
    let result = system.run_task("size", &mut size).unwrap();
    assert_eq!(result.status(), Status::Rul);
    assert!(matches!(result.get("size"), Some(ResultValue::Integer(n)) if *n > 4));
}

#[test]
fn prepare_copies_and_extracts() {
    let (_dir, mut system) = common::system();
    let inputs = tempfile::tempdir().unwrap();

    let source = inputs.path().join("main.py");
    fs::write(&source, "print('hi')\n").unwrap();
    let archive = inputs.path().join("checker.zip");
    {
        let mut zip = ZipWriter::new(File::create(&archive).unwrap());
        zip.start_file("check.sh", FileOptions::default()).unwrap();
        zip.write_all(b"exit 0\n").unwrap();
        zip.finish().unwrap();
    }
    let broken = inputs.path().join("broken.zip");
    fs::write(&broken, "not a zip").unwrap();

    let register = |system: &mut System, path: &Path| {
        let path = InputPath::new(path).unwrap();
        system.add_path(&path);
        SandboxPath::from(path)
    };
    let source = register(&mut system, &source);
    let archive = register(&mut system, &archive);
    let broken = register(&mut system, &broken);

    let mut task = PrepareTask::solution(source).unwrap().owner(None, None);
    assert_eq!(system.run_task("prepare", &mut task).unwrap().status(), Status::Ok);
    assert_eq!(common::read(&system, "solution/src/main.py"), "print('hi')\n");

    let mut task = PrepareTask::tool("checker", archive).unwrap().owner(None, None);
    assert_eq!(system.run_task("checker", &mut task).unwrap().status(), Status::Ok);
    assert_eq!(common::read(&system, "tools/src/checker/check.sh"), "exit 0\n");

    let mut task = PrepareTask::tool("broken", broken).unwrap().owner(None, None);
    let result = system.run_task("broken", &mut task).unwrap();
    assert_eq!(result.status(), Status::Int);
    assert!(result.get("error").is_some());
}

#[test]
fn library_backend_reports_exit_code() {
    common::init();
    let dir = tempfile::tempdir().unwrap();
    let mut system = System::new(dir.path(), Box::new(LocalBackend::library())).unwrap();
    assert_eq!(system.backend_name(), "library");

    let result = system
        .run_command("exit", Command::program("sh").arg("-c").arg("exit 3"))
        .unwrap()
        .unwrap();
    assert_eq!(result.returncode(), 3);
    assert_eq!(result.status(), None);
}

#[test]
fn demo_is_accepted() {
    common::init();
    if common::is_root() {
        return;
    }
    let (_probe_dir, probe) = common::system();
    if probe.which("gcc").is_none() {
        return;
    }

    let dir = tempfile::tempdir().unwrap();
    let demo = Path::new(env!("CARGO_MANIFEST_DIR")).join("demo");
    let src = format!(
        r#"
        [system]
        output_directory = "{}"
        identity_switch = "skip-unprivileged"

        [judge]
        solution = "{}"
        input = "{}"
        hint = "{}"
        time_limit = "2s"
        memory_limit = "256M"
        rules = "goto<=0"
        "#,
        dir.path().display(),
        demo.join("main.c").display(),
        demo.join("1.in").display(),
        demo.join("1.out").display(),
    );
    let config: Config = toml::from_str(&src).unwrap();

    let results = pipeline::run(&config).unwrap();
    assert_eq!(results.status(), Status::Ok);
    assert!(results.get("run").is_some());
    assert!(dir.path().join("log.zip").is_file());
    assert_eq!(fs::read_to_string(dir.path().join("test/answer")).unwrap(), "3\n");
}
