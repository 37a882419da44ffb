//! The bundled single-test judge: provision, build, run, compare.

use crate::checking::Checking;
use crate::config::{Config, Judge};
use crate::limits::Limits;
use crate::paths::{InputPath, OutputPath, OutputStream, SandboxPath};
use crate::result::ResultDict;
use crate::system::System;
use crate::task::Step;
use crate::tasks::{
    BuildTask, CollectLogsTask, DiffOptions, DiffTask, PrepareTask, RulesTask, RunTask,
    StopBackgroundTask, SystemPrepareTask,
};

use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context as _, Result};
use tracing::info;

const ANSWER: &str = "test/answer";

fn input(path: &Path) -> Result<InputPath> {
    let path = fs::canonicalize(path)
        .with_context(|| format!("failed to locate input: {}", path.display()))?;
    Ok(InputPath::new(path)?)
}

fn run_limits(judge: &Judge) -> Limits {
    let mut limits = Limits::default();
    if let Some(t) = judge.time_limit {
        limits = limits
            .with_cpu_time(t)
            .with_real_time(t + Duration::from_secs(1));
    }
    if let Some(m) = judge.memory_limit {
        limits = limits.with_memory(m);
    }
    limits
}

/// Registers the judge inputs and lays out the steps.
pub fn steps(system: &mut System, judge: &Judge) -> Result<Checking> {
    let solution = input(&judge.solution)?;
    let test_input = input(&judge.input)?;
    let hint = input(&judge.hint)?;
    for path in &[&solution, &test_input, &hint] {
        system.add_path(path);
    }

    let answer = SandboxPath::from(OutputPath::new(ANSWER)?);
    let executable = OutputPath::new("solution/exec")?;
    let limits = run_limits(judge);

    let mut rules = RulesTask::solution_source()?;
    if let Some(max_size) = judge.max_size {
        rules = rules.max_size(max_size);
    }
    if let Some(ref descriptions) = judge.rules {
        rules = rules.rules(descriptions)?;
    }

    let run = RunTask::solution(executable)
        .options(|o| o.limits(limits))
        .stdin(test_input)
        .stdout(OutputStream::to_path(answer.clone()));

    let diff = DiffTask::new(
        hint.into(),
        answer,
        DiffOptions {
            case_sensitive: judge.case_sensitive,
            space_sensitive: judge.space_sensitive,
            ..DiffOptions::default()
        },
    )?;

    let mut checking = Checking::new();
    checking.add_steps(vec![
        ("system", Step::task(SystemPrepareTask::standard()?)),
        ("prepare", Step::task(PrepareTask::solution(solution.into())?)),
        ("rules", Step::task(rules)),
        ("build", Step::task(BuildTask::solution()?)),
        ("run", Step::task(run)),
        ("diff", Step::task(diff)),
        ("background", Step::task(StopBackgroundTask::all())),
        ("logs", Step::task(CollectLogsTask::standard()?)),
    ])?;
    Ok(checking)
}

pub fn run(config: &Config) -> Result<ResultDict> {
    let mut system = System::from_config(config)?;
    info!(backend = system.backend_name(), "judging");
    let checking = steps(&mut system, &config.judge)?;
    checking.run(&mut system)
}
