//! Descriptions of single program invocations.
//!
//! A [`Command`] never runs itself, [`crate::System::run_command`] interprets it.

mod build;
mod system;

pub use self::build::{CMakeConfig, GccConfig, MakeConfig};
pub use self::system::{
    chown_dir, directory_add, group_add, group_del, install, user_add, user_del, Ownership,
};

use crate::args::Arg;
use crate::error::JudgeError;
use crate::limits::Limits;
use crate::paths::{OutputPath, OutputStream, SandboxPath, StreamTarget};
use crate::predicates::{Postcondition, Prerequirement, Validators};
use crate::result::CommandResult;

use arbiter_protocol::Status;

use std::collections::BTreeMap;
use std::fmt::Write as _;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Program {
    /// Looked up on the sanctioned program path.
    Host(String),
    Sandbox(SandboxPath),
}

#[derive(Debug, Clone, Default)]
pub struct Command {
    pub(crate) name: Option<String>,
    pub(crate) sequence: Option<u32>,

    pub(crate) program: Option<Program>,
    pub(crate) args: Vec<Arg>,
    pub(crate) verbose_args: Vec<Arg>,
    pub(crate) quiet_args: Vec<Arg>,

    pub(crate) work_directory: Option<OutputPath>,
    pub(crate) environment: BTreeMap<String, Option<Arg>>,
    pub(crate) user: Option<String>,
    pub(crate) group: Option<String>,
    pub(crate) limits: Option<Limits>,

    pub(crate) stdin: Option<SandboxPath>,
    pub(crate) stdout: OutputStream,
    pub(crate) stderr: OutputStream,

    pub(crate) verbose: Option<bool>,
    pub(crate) default_logs: Option<bool>,
    pub(crate) safe: Option<bool>,
    pub(crate) obligatory: bool,
    pub(crate) background: bool,

    pub(crate) prerequirements: Vec<Prerequirement>,
    pub(crate) postconditions: Vec<(Postcondition, Status)>,
}

impl Command {
    pub fn program(name: &str) -> Self {
        Self {
            program: Some(Program::Host(name.to_owned())),
            ..Self::default()
        }
    }

    pub fn executable(path: impl Into<SandboxPath>) -> Self {
        Self {
            program: Some(Program::Sandbox(path.into())),
            ..Self::default()
        }
    }

    /// Runs nothing and records no result.
    pub fn noop() -> Self {
        Self::default()
    }

    pub fn is_noop(&self) -> bool {
        self.program.is_none()
    }

    pub fn arg(mut self, arg: impl Into<Arg>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, A>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: Into<Arg>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Appended only when the command is verbose.
    pub fn verbose_arg(mut self, arg: impl Into<Arg>) -> Self {
        self.verbose_args.push(arg.into());
        self
    }

    /// Appended only when the command is not verbose.
    pub fn quiet_arg(mut self, arg: impl Into<Arg>) -> Self {
        self.quiet_args.push(arg.into());
        self
    }

    pub fn work_directory(mut self, dir: OutputPath) -> Self {
        self.work_directory = Some(dir);
        self
    }

    pub fn env(mut self, key: &str, value: impl Into<Arg>) -> Self {
        self.environment.insert(key.to_owned(), Some(value.into()));
        self
    }

    pub fn unset_env(mut self, key: &str) -> Self {
        self.environment.insert(key.to_owned(), None);
        self
    }

    pub fn user(mut self, user: &str) -> Self {
        self.user = Some(user.to_owned());
        self
    }

    pub fn group(mut self, group: &str) -> Self {
        self.group = Some(group.to_owned());
        self
    }

    pub fn limits(mut self, limits: Limits) -> Self {
        self.limits = Some(limits);
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

    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = Some(verbose);
        self
    }

    pub fn default_logs(mut self, default_logs: bool) -> Self {
        self.default_logs = Some(default_logs);
        self
    }

    /// A safe command may not fork.
    pub fn safe(mut self, safe: bool) -> Self {
        self.safe = Some(safe);
        self
    }

    pub fn obligatory(mut self, obligatory: bool) -> Self {
        self.obligatory = obligatory;
        self
    }

    /// The process outlives the command, see [`crate::System::stop_background`].
    pub fn background(mut self, background: bool) -> Self {
        self.background = background;
        self
    }

    pub fn prerequirement(mut self, p: Prerequirement) -> Self {
        self.prerequirements.push(p);
        self
    }

    pub fn postcondition(mut self, p: Postcondition, status: Status) -> Self {
        self.postconditions.push((p, status));
        self
    }

    pub fn bind(&mut self, name: &str, sequence: u32) {
        self.name = Some(name.to_owned());
        self.sequence = Some(sequence);
    }

    pub fn name(&self) -> Result<&str, JudgeError> {
        self.name
            .as_deref()
            .ok_or(JudgeError::NotBound { what: "command" })
    }

    pub fn is_verbose(&self) -> bool {
        self.verbose.unwrap_or(false)
    }

    pub fn has_default_logs(&self) -> bool {
        self.default_logs.unwrap_or(true)
    }

    pub fn is_safe(&self) -> bool {
        self.safe.unwrap_or(false)
    }

    pub fn is_obligatory(&self) -> bool {
        self.obligatory
    }

    pub fn is_background(&self) -> bool {
        self.background
    }

    pub fn get_work_directory(&self) -> OutputPath {
        self.work_directory.clone().unwrap_or_default()
    }

    pub fn get_user(&self) -> Option<&str> {
        self.user.as_deref()
    }

    pub fn get_group(&self) -> Option<&str> {
        self.group.as_deref()
    }

    pub fn get_limits(&self) -> Limits {
        self.limits.unwrap_or_default()
    }

    pub fn get_program(&self) -> Option<&Program> {
        self.program.as_ref()
    }

    /// Arguments after the program, with the verbosity-dependent ones applied.
    pub fn declared_args(&self) -> Vec<&Arg> {
        let extra = if self.is_verbose() {
            &self.verbose_args
        } else {
            &self.quiet_args
        };
        self.args.iter().chain(extra.iter()).collect()
    }

    /// Implicit checks followed by the declared ones.
    pub fn prerequirements(&self) -> Vec<Prerequirement> {
        let mut list = vec![Prerequirement::DirectoryExists(
            self.get_work_directory().into(),
        )];
        if let Some(ref user) = self.user {
            list.push(Prerequirement::UserExists(user.clone()));
        }
        if let Some(ref group) = self.group {
            list.push(Prerequirement::GroupExists(group.clone()));
        }
        if let Some(ref stdin) = self.stdin {
            list.push(Prerequirement::FileExists(stdin.clone()));
        }
        match self.program {
            Some(Program::Host(ref name)) => {
                list.push(Prerequirement::SystemProgramExists(name.clone()))
            }
            Some(Program::Sandbox(ref path)) => {
                list.push(Prerequirement::ProgramExists(path.clone()))
            }
            None => {}
        }
        list.extend(self.prerequirements.iter().cloned());
        list
    }

    pub fn postconditions(&self) -> &[(Postcondition, Status)] {
        &self.postconditions
    }

    /// `log/<sequence>_<name>_<stream>.txt`, or `None` without default logs.
    pub fn log_path(&self, stream: &str) -> Option<OutputPath> {
        if !self.has_default_logs() {
            return None;
        }
        let name = self.name.as_deref()?;
        let sequence = self.sequence?;
        let file = format!("{:03}_{}_{}.txt", sequence, name, stream);
        OutputPath::new("log").and_then(|log| log.join(file)).ok()
    }

    /// Status paired with the first failing postcondition, in declaration order.
    pub fn verify_postconditions(
        &self,
        validators: &Validators<'_>,
        result: &CommandResult,
    ) -> Option<Status> {
        self.postconditions
            .iter()
            .find(|(p, _)| !p.check(validators, result))
            .map(|(_, status)| *status)
    }

    /// The command line as declared, with redirections.
    pub fn declared_line(&self) -> String {
        let mut line = match self.program {
            Some(Program::Host(ref name)) => name.clone(),
            Some(Program::Sandbox(ref path)) => path.to_string(),
            None => return "(no-op)".to_owned(),
        };
        for arg in self.declared_args() {
            let _ = write!(line, " {}", arg);
        }
        if let Some(ref stdin) = self.stdin {
            let _ = write!(line, " < {}", stdin);
        }
        let streams = [("", &self.stdout, "stdout"), ("2", &self.stderr, "stderr")];
        for (fd, stream, label) in streams.iter() {
            let op = if stream.append { ">>" } else { ">" };
            let target = match stream.target {
                StreamTarget::Discard => "/dev/null".to_owned(),
                StreamTarget::DefaultLog => match self.log_path(label) {
                    Some(p) => format!("OUT/{}", p),
                    None => "/dev/null".to_owned(),
                },
                StreamTarget::Path(ref p) => p.to_string(),
            };
            let _ = write!(line, " {}{} {}", fd, op, target);
            if let Some(max) = stream.max_bytes {
                let _ = write!(line, "[{}]", max);
            }
        }
        line
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_paths() {
        let mut cmd = Command::program("true");
        assert!(cmd.name().is_err());
        assert!(cmd.log_path("stdout").is_none());

        cmd.bind("build_01_compile", 7);
        assert_eq!(cmd.name().unwrap(), "build_01_compile");
        assert_eq!(
            cmd.log_path("stderr").unwrap().to_string(),
            "log/007_build_01_compile_stderr.txt"
        );

        let cmd = cmd.default_logs(false);
        assert!(cmd.log_path("stderr").is_none());
    }

    #[test]
    fn implicit_prerequirements() {
        let cmd = Command::executable(SandboxPath::parse_output("solution/exec").unwrap())
            .user("arbiter-exec")
            .stdin(SandboxPath::parse("/data/input").unwrap())
            .prerequirement(Prerequirement::SystemProgramExists("cat".to_owned()));

        let list: Vec<String> = cmd.prerequirements().iter().map(ToString::to_string).collect();
        assert_eq!(
            list,
            vec![
                "directory exists: OUT/.",
                "user exists: arbiter-exec",
                "file exists: /data/input",
                "program exists: OUT/solution/exec",
                "system program exists: cat",
            ]
        );
    }

    #[test]
    fn verbosity_selects_args() {
        let cmd = Command::program("make")
            .quiet_arg("--silent")
            .verbose_arg("--debug")
            .stdout(OutputStream::discard())
            .stderr(OutputStream::discard().max_bytes(10));
        assert_eq!(cmd.declared_line(), "make --silent > /dev/null 2> /dev/null[10]");
        let cmd = cmd.verbose(true);
        assert_eq!(cmd.declared_line(), "make --debug > /dev/null 2> /dev/null[10]");
    }
}
