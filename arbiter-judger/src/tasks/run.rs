use crate::args::Arg;
use crate::command::{Command, Program};
use crate::paths::{OutputStream, SandboxPath};
use crate::system::System;
use crate::task::{Task, TaskBase, TaskOptions};

use anyhow::Result;

/// Runs one program with the task's failure vocabulary.
#[derive(Debug)]
pub struct RunTask {
    base: TaskBase,
    program: Program,
    args: Vec<Arg>,
    stdin: Option<SandboxPath>,
    stdout: OutputStream,
    stderr: OutputStream,
}

impl RunTask {
    pub fn new(options: TaskOptions, program: Program) -> Self {
        Self {
            base: TaskBase::new(options),
            program,
            args: Vec::new(),
            stdin: None,
            stdout: OutputStream::default(),
            stderr: OutputStream::default(),
        }
    }

    /// A submitted executable: RTE, TLE and MEM as the execution user.
    pub fn solution(executable: impl Into<SandboxPath>) -> Self {
        Self::new(TaskOptions::solution(), Program::Sandbox(executable.into()))
    }

    /// A judge tool found on the program path.
    pub fn tool(program: &str) -> Self {
        Self::new(TaskOptions::tool(), Program::Host(program.to_owned()))
    }

    pub fn options(mut self, f: impl FnOnce(TaskOptions) -> TaskOptions) -> Self {
        self.base.options = f(self.base.options);
        self
    }

    pub fn arg(mut self, arg: impl Into<Arg>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn stdin(mut self, path: impl Into<SandboxPath>) -> Self {
        self.stdin = Some(path.into());
        self
    }

    pub fn stdout(mut self, stream: OutputStream) -> Self {
        self.stdout = stream;
        self
    }

    pub fn stderr(mut self, stream: OutputStream) -> Self {
        self.stderr = stream;
        self
    }
}

impl Task for RunTask {
    fn base(&self) -> &TaskBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut TaskBase {
        &mut self.base
    }

    fn execute(&mut self, system: &mut System) -> Result<()> {
        let mut cmd = match self.program {
            Program::Host(ref name) => Command::program(name),
            Program::Sandbox(ref path) => Command::executable(path.clone()),
        };
        cmd = cmd
            .args(self.args.iter().cloned())
            .stdout(self.stdout.clone())
            .stderr(self.stderr.clone());
        if let Some(ref stdin) = self.stdin {
            cmd = cmd.stdin(stdin.clone());
        }
        if let Some(status) = self.base.run_command(system, "run", cmd)? {
            self.base.set_status(status);
        }
        Ok(())
    }
}
