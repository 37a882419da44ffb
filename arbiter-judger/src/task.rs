//! Composite steps.

use crate::args::Arg;
use crate::command::Command;
use crate::error::JudgeError;
use crate::limits::Limits;
use crate::paths::OutputPath;
use crate::predicates::{Postcondition, Prerequirement};
use crate::result::{ResultDict, ResultValue};
use crate::system::System;

use arbiter_protocol::Status;

use std::collections::BTreeMap;
use std::fmt;

use anyhow::Result;

pub const EXEC_USER: &str = "arbiter-exec";
pub const BUILD_USER: &str = "arbiter-build";
pub const TEST_USER: &str = "arbiter-test";
pub const RUN_GROUP: &str = "arbiter-run";

/// Defaults a task hands down to the commands it issues, plus the statuses
/// it reports for failed, slow and memory hungry commands.
#[derive(Debug, Clone)]
pub struct TaskOptions {
    pub work_directory: Option<OutputPath>,
    pub environment: BTreeMap<String, Option<Arg>>,
    pub user: Option<String>,
    pub group: Option<String>,
    pub limits: Option<Limits>,
    pub verbose: Option<bool>,
    pub default_logs: Option<bool>,
    pub safe: Option<bool>,
    pub result_on_error: Option<Status>,
    pub result_on_time: Option<Status>,
    pub result_on_memory: Option<Status>,
    pub record_result: bool,
    pub obligatory: bool,
}

impl Default for TaskOptions {
    fn default() -> Self {
        Self {
            work_directory: None,
            environment: BTreeMap::new(),
            user: None,
            group: None,
            limits: None,
            verbose: None,
            default_logs: None,
            safe: None,
            result_on_error: None,
            result_on_time: None,
            result_on_memory: None,
            record_result: true,
            obligatory: false,
        }
    }
}

impl TaskOptions {
    /// Runs as the unprivileged execution user and reports RTE, TLE and MEM.
    pub fn solution() -> Self {
        Self {
            user: Some(EXEC_USER.to_owned()),
            group: Some(EXEC_USER.to_owned()),
            result_on_error: Some(Status::Rte),
            result_on_time: Some(Status::Tle),
            result_on_memory: Some(Status::Mem),
            ..Self::default()
        }
    }

    /// Judge tooling, every failure is an internal error.
    pub fn tool() -> Self {
        Self {
            result_on_error: Some(Status::Int),
            result_on_time: Some(Status::Int),
            result_on_memory: Some(Status::Int),
            ..Self::default()
        }
    }

    pub fn work_directory(mut self, dir: OutputPath) -> Self {
        self.work_directory = Some(dir);
        self
    }

    pub fn user(mut self, user: Option<&str>) -> Self {
        self.user = user.map(ToOwned::to_owned);
        self
    }

    pub fn group(mut self, group: Option<&str>) -> Self {
        self.group = group.map(ToOwned::to_owned);
        self
    }

    pub fn limits(mut self, limits: Limits) -> Self {
        self.limits = Some(limits);
        self
    }

    pub fn env(mut self, key: &str, value: impl Into<Arg>) -> Self {
        self.environment.insert(key.to_owned(), Some(value.into()));
        self
    }

    pub fn result_on_error(mut self, status: Option<Status>) -> Self {
        self.result_on_error = status;
        self
    }

    pub fn result_on_time(mut self, status: Option<Status>) -> Self {
        self.result_on_time = status;
        self
    }

    pub fn result_on_memory(mut self, status: Option<Status>) -> Self {
        self.result_on_memory = status;
        self
    }

    pub fn record_result(mut self, record: bool) -> Self {
        self.record_result = record;
        self
    }

    pub fn obligatory(mut self, obligatory: bool) -> Self {
        self.obligatory = obligatory;
        self
    }

    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = Some(verbose);
        self
    }
}

/// State every task carries.
#[derive(Debug, Clone, Default)]
pub struct TaskBase {
    name: Option<String>,
    pub options: TaskOptions,
    result: ResultDict,
    commands: Vec<String>,
}

impl TaskBase {
    pub fn new(options: TaskOptions) -> Self {
        Self {
            options,
            ..Self::default()
        }
    }

    pub fn bind(&mut self, name: &str) {
        self.name = Some(name.to_owned());
    }

    pub fn name(&self) -> Result<&str, JudgeError> {
        self.name.as_deref().ok_or(JudgeError::NotBound { what: "task" })
    }

    pub fn result(&self) -> &ResultDict {
        &self.result
    }

    /// Names of the commands issued so far.
    pub fn commands(&self) -> &[String] {
        &self.commands
    }

    pub fn set_status(&mut self, status: Status) {
        self.result.set_status(status);
    }

    pub fn record(&mut self, key: &str, value: impl Into<ResultValue>) -> Result<(), JudgeError> {
        self.result.set(key, value)
    }

    pub fn work_directory(&self) -> OutputPath {
        self.options.work_directory.clone().unwrap_or_default()
    }

    pub fn prerequirements(&self) -> Vec<Prerequirement> {
        let mut list = vec![Prerequirement::DirectoryExists(self.work_directory().into())];
        if let Some(ref user) = self.options.user {
            list.push(Prerequirement::UserExists(user.clone()));
        }
        if let Some(ref group) = self.options.group {
            list.push(Prerequirement::GroupExists(group.clone()));
        }
        list
    }

    /// Fills in whatever the command leaves unset.
    pub fn apply_defaults(&self, mut cmd: Command) -> Command {
        let o = &self.options;
        if cmd.work_directory.is_none() {
            cmd.work_directory = o.work_directory.clone();
        }
        for (k, v) in &o.environment {
            cmd.environment.entry(k.clone()).or_insert_with(|| v.clone());
        }
        if cmd.user.is_none() {
            cmd.user = o.user.clone();
        }
        if cmd.group.is_none() {
            cmd.group = o.group.clone();
        }
        if cmd.limits.is_none() {
            cmd.limits = o.limits;
        }
        cmd.verbose = cmd.verbose.or(o.verbose);
        cmd.default_logs = cmd.default_logs.or(o.default_logs);
        cmd.safe = cmd.safe.or(o.safe);
        cmd
    }

    /// Appends time, memory and exit code checks, in that order. `limits`
    /// are the ones the command actually runs under, hard limits included.
    pub fn command_postconditions(&self, mut cmd: Command, limits: Limits) -> Command {
        if let Some(status) = self.options.result_on_time {
            if limits.cpu_time().is_some() || limits.real_time().is_some() {
                cmd = cmd.postcondition(
                    Postcondition::TimeLimit {
                        cpu_time: limits.cpu_time(),
                        real_time: limits.real_time(),
                        gpu_time: limits.gpu_time(),
                    },
                    status,
                );
            }
        }
        if let Some(status) = self.options.result_on_memory {
            if limits.memory().is_some() {
                cmd = cmd.postcondition(
                    Postcondition::MemoryLimit {
                        memory: limits.memory(),
                        gpu_memory: limits.gpu_memory(),
                    },
                    status,
                );
            }
        }
        if let Some(status) = self.options.result_on_error {
            cmd = cmd.postcondition(Postcondition::ReturnCode(Vec::new()), status);
        }
        cmd
    }

    /// Runs `cmd` as `<task>_<sub>` and records its result under `sub`.
    /// Returns the failure status, if any.
    pub fn run_command(
        &mut self,
        system: &mut System,
        sub: &str,
        cmd: Command,
    ) -> Result<Option<Status>> {
        let name = format!("{}_{}", self.name()?, sub);
        let cmd = self.apply_defaults(cmd);
        let applied = system.update_limits(cmd.get_limits());
        let cmd = self.command_postconditions(cmd, applied);
        let result = system.run_command(&name, cmd)?;
        self.commands.push(name);
        let result = match result {
            Some(r) => r,
            None => return Ok(None),
        };
        let status = result.status().filter(|s| !s.is_ok());
        self.record(sub, result)?;
        Ok(status)
    }
}

pub trait Task: fmt::Debug {
    fn base(&self) -> &TaskBase;

    fn base_mut(&mut self) -> &mut TaskBase;

    fn prerequirements(&self) -> Vec<Prerequirement> {
        self.base().prerequirements()
    }

    fn execute(&mut self, system: &mut System) -> Result<()>;
}

/// Anything a [`crate::Checking`] sequence can run.
#[derive(Debug)]
pub enum Step {
    Command(Command),
    Task(Box<dyn Task>),
}

impl Step {
    pub fn command(cmd: Command) -> Self {
        Step::Command(cmd)
    }

    pub fn task(task: impl Task + 'static) -> Self {
        Step::Task(Box::new(task))
    }

    pub fn is_obligatory(&self) -> bool {
        match self {
            Step::Command(c) => c.is_obligatory(),
            Step::Task(t) => t.base().options.obligatory,
        }
    }
}

impl From<Command> for Step {
    fn from(cmd: Command) -> Self {
        Step::Command(cmd)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::time::Duration;

    #[test]
    fn defaults_do_not_override() {
        let base = TaskBase::new(
            TaskOptions::solution()
                .work_directory(OutputPath::new("test").unwrap())
                .env("LANG", "C"),
        );
        let cmd = Command::program("cat").user("root").env("LANG", "pl_PL");
        let cmd = base.apply_defaults(cmd);
        assert_eq!(cmd.get_user(), Some("root"));
        assert_eq!(cmd.get_group(), Some(EXEC_USER));
        assert_eq!(cmd.get_work_directory().to_string(), "test");
        assert_eq!(cmd.environment["LANG"].as_ref().unwrap().to_string(), "pl_PL");
    }

    #[test]
    fn postconditions_follow_limits() {
        let base = TaskBase::new(TaskOptions::solution());
        let cmd = base.command_postconditions(Command::program("true"), Limits::default());
        let statuses: Vec<Status> = cmd.postconditions().iter().map(|(_, s)| *s).collect();
        assert_eq!(statuses, vec![Status::Rte]);

        let limits = Limits::default()
            .with_cpu_time(Duration::from_secs(1))
            .with_memory(1 << 20);
        let cmd = base.command_postconditions(Command::program("true"), limits);
        let statuses: Vec<Status> = cmd.postconditions().iter().map(|(_, s)| *s).collect();
        assert_eq!(statuses, vec![Status::Tle, Status::Mem, Status::Rte]);
    }
}
