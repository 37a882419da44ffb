//! The engine: interprets commands and tasks against one output root.

pub mod backend;
pub mod identity;
pub mod state;
mod transcript;

use self::backend::{BackendKind, ExecRequest, ExecutionBackend, StreamSpec};
use self::backend::{LocalBackend, ObserverBackend, SystemdBackend};
use self::identity::{Identity, IdentityPolicy};
use self::state::SystemState;
use self::transcript::Transcript;

use crate::args::Arg;
use crate::command::{Command, Program};
use crate::config::Config;
use crate::error::JudgeError;
use crate::limits::Limits;
use crate::paths::{InputPath, OutputPath, OutputStream, SandboxPath, StreamTarget};
use crate::predicates::Validators;
use crate::result::{CommandResult, Invocation, ResultDict, ResultValue};
use crate::task::{Step, Task};

use arbiter_sandbox::Sandboxed;
use arbiter_utils::os_cmd::quote;

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context as _, Result};
use tracing::{debug, error, info, warn};

struct BackgroundHandle {
    process: Sandboxed,
    result: CommandResult,
    transcript: Transcript,
}

pub struct System {
    state: SystemState,
    backend: Box<dyn ExecutionBackend>,
    identity_policy: IdentityPolicy,
    hard_limits: Limits,
    sequence: u32,
    background: BTreeMap<String, BackgroundHandle>,
}

fn dev_null() -> PathBuf {
    PathBuf::from("/dev/null")
}

impl System {
    pub fn new(
        output_directory: impl AsRef<Path>,
        backend: Box<dyn ExecutionBackend>,
    ) -> Result<Self> {
        let output_directory = output_directory.as_ref();
        fs::create_dir_all(output_directory).with_context(|| {
            format!("failed to create output directory: {}", output_directory.display())
        })?;
        let output_directory = output_directory.canonicalize()?;
        info!(backend = backend.name(), output = %output_directory.display(), "system is ready");
        Ok(Self {
            state: SystemState::new(output_directory),
            backend,
            identity_policy: IdentityPolicy::default(),
            hard_limits: Limits::default(),
            sequence: 0,
            background: BTreeMap::new(),
        })
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        let section = &config.system;
        let backend: Box<dyn ExecutionBackend> = match section.backend {
            BackendKind::Local => Box::new(LocalBackend::new()),
            BackendKind::Library => Box::new(LocalBackend::library()),
            BackendKind::Observer => Box::new(ObserverBackend::new(config.observer.helper.clone())),
            BackendKind::Systemd => Box::new(SystemdBackend::new(
                config.systemd.user_mode,
                Duration::from_millis(config.systemd.poll_interval_ms),
            )),
        };
        let mut system = System::new(&section.output_directory, backend)?
            .with_identity_policy(section.identity_switch)
            .with_hard_limits(config.hard_limit.to_limits())
            .with_environment(section.environment.clone());
        for path in &section.paths {
            system.add_path(&InputPath::new(path)?);
        }
        Ok(system)
    }

    pub fn with_identity_policy(mut self, policy: IdentityPolicy) -> Self {
        self.identity_policy = policy;
        self
    }

    /// Ceilings every command is tightened to.
    pub fn with_hard_limits(mut self, limits: Limits) -> Self {
        self.hard_limits = limits;
        self
    }

    pub fn with_environment(mut self, environment: BTreeMap<String, String>) -> Self {
        self.state.set_base_environment(environment);
        self
    }

    pub fn output_directory(&self) -> &Path {
        self.state.output_directory()
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    pub fn is_superuser(&self) -> bool {
        identity::is_superuser()
    }

    pub fn add_user(&mut self, user: &str, home: Option<&OutputPath>) {
        let home = home.map(|h| self.state.resolve_output(h));
        self.state.add_user(user, home);
    }

    pub fn add_group(&mut self, group: &str) {
        self.state.add_group(group);
    }

    pub fn has_user(&self, user: &str) -> bool {
        self.state.has_user(user)
    }

    pub fn has_group(&self, group: &str) -> bool {
        self.state.has_group(group)
    }

    pub fn add_path(&mut self, path: &InputPath) {
        self.state.add_path(path);
    }

    pub fn set_variable(&mut self, name: &str, value: impl Into<String>) {
        self.state.set_variable(name, value);
    }

    pub fn validators<'a>(&'a self, work_directory: &'a OutputPath) -> Validators<'a> {
        Validators::new(&self.state, work_directory)
    }

    pub fn update_limits(&self, limits: Limits) -> Limits {
        limits.merged(&self.hard_limits)
    }

    pub fn resolve_path(&self, path: &SandboxPath, work_directory: &OutputPath) -> PathBuf {
        self.state.resolve_path(path, work_directory)
    }

    pub fn resolve_output(&self, path: &OutputPath) -> PathBuf {
        self.state.resolve_output(path)
    }

    pub fn resolve(&self, arg: &Arg, work_directory: &OutputPath) -> Result<String, JudgeError> {
        match arg {
            Arg::Text(s) => Ok(s.clone()),
            Arg::Path(p) => Ok(self.resolve_path(p, work_directory).display().to_string()),
            Arg::Concat(parts) => {
                let mut out = String::new();
                for part in parts {
                    out.push_str(&self.resolve(part, work_directory)?);
                }
                Ok(out)
            }
            Arg::Var(expr) => expr.evaluate(self.state.variables()),
        }
    }

    pub fn find_files(&self, root: &Path) -> io::Result<Vec<PathBuf>> {
        self.state.find_files(root)
    }

    pub fn file_contents(&self, path: &Path) -> io::Result<String> {
        self.state.file_contents(path)
    }

    pub fn which(&self, program: &str) -> Option<PathBuf> {
        self.state.which(program)
    }

    fn next_sequence(&mut self) -> u32 {
        self.sequence += 1;
        self.sequence
    }

    fn check_prerequirements(&self, step: &str, cmd: &Command, work: &OutputPath) -> Result<()> {
        let v = self.validators(work);
        for p in cmd.prerequirements() {
            if !p.check(&v) {
                error!(step, requirement = %p, "prerequirement failed");
                return Err(JudgeError::Prerequirement {
                    step: step.to_owned(),
                    requirement: p.to_string(),
                }
                .into());
            }
        }
        Ok(())
    }

    fn command_environment(
        &self,
        cmd: &Command,
        work: &OutputPath,
        work_path: &Path,
    ) -> Result<BTreeMap<String, String>, JudgeError> {
        let mut env = self.state.environment();
        env.insert("PWD".to_owned(), work_path.display().to_string());
        env.insert("SHELL".to_owned(), "/bin/bash".to_owned());
        if let Some(user) = cmd.get_user() {
            for key in &["USER", "USERNAME", "LOGNAME"] {
                env.insert((*key).to_owned(), user.to_owned());
            }
            let home = match self.state.user_home(user) {
                Some(h) => Some(h.to_owned()),
                None => identity::home_of(user),
            };
            if let Some(home) = home {
                let home = home.display().to_string();
                env.insert("HOME".to_owned(), home.clone());
                env.insert("XDG_RUNTIME_DIR".to_owned(), home);
            }
        }
        for (key, value) in &cmd.environment {
            match value {
                Some(arg) => {
                    env.insert(key.clone(), self.resolve(arg, work)?);
                }
                None => {
                    env.remove(key);
                }
            }
        }
        Ok(env)
    }

    fn stream_spec(
        &self,
        cmd: &Command,
        stream: &OutputStream,
        label: &str,
        work: &OutputPath,
    ) -> Result<StreamSpec> {
        let path = match stream.target {
            StreamTarget::Discard => dev_null(),
            StreamTarget::DefaultLog => match cmd.log_path(label) {
                Some(p) => self.state.resolve_output(&p),
                None => dev_null(),
            },
            StreamTarget::Path(SandboxPath::Input(ref p)) if !p.is_dev_null() => {
                return Err(JudgeError::InvalidPath {
                    path: p.as_path().to_owned(),
                    expected: "output",
                }
                .into())
            }
            StreamTarget::Path(ref p) => self.state.resolve_path(p, work),
        };
        if path != dev_null() {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
        }
        Ok(StreamSpec {
            path,
            append: stream.append,
            max_bytes: stream.max_bytes,
        })
    }

    fn identity_for(&self, cmd: &Command, superuser: bool) -> Result<Option<Identity>> {
        let (user, group) = (cmd.get_user(), cmd.get_group());
        let wanted = match user.or(group) {
            Some(w) => w,
            None => return Ok(None),
        };
        if !superuser {
            match self.identity_policy {
                IdentityPolicy::Require => {
                    return Err(JudgeError::IdentityUnavailable {
                        user: wanted.to_owned(),
                    }
                    .into())
                }
                IdentityPolicy::SkipUnprivileged => {
                    warn!(user = wanted, "not a superuser, running without identity switch");
                    return Ok(None);
                }
            }
        }
        identity::lookup(user, group)
    }

    /// Runs one command. A command without a program is a no-op and yields `None`.
    pub fn run_command(&mut self, name: &str, mut cmd: Command) -> Result<Option<CommandResult>> {
        let sequence = self.next_sequence();
        cmd.bind(name, sequence);
        let _span = tracing::debug_span!("command", name, sequence).entered();

        let work = cmd.get_work_directory();
        self.check_prerequirements(name, &cmd, &work)?;

        let bin = match cmd.get_program() {
            None => {
                debug!("no-op command");
                return Ok(None);
            }
            Some(Program::Host(program)) => {
                self.state
                    .which(program)
                    .ok_or_else(|| JudgeError::Prerequirement {
                        step: name.to_owned(),
                        requirement: format!("system program exists: {}", program),
                    })?
            }
            Some(Program::Sandbox(path)) => self.resolve_path(path, &work),
        };

        let args = cmd
            .declared_args()
            .into_iter()
            .map(|a| self.resolve(a, &work))
            .collect::<Result<Vec<_>, _>>()?;

        let work_path = self.state.resolve_output(&work);
        let environment = self.command_environment(&cmd, &work, &work_path)?;
        let stdin = match cmd.stdin {
            Some(ref p) => self.resolve_path(p, &work),
            None => dev_null(),
        };
        let stdout = self.stream_spec(&cmd, &cmd.stdout, "stdout", &work)?;
        let stderr = self.stream_spec(&cmd, &cmd.stderr, "stderr", &work)?;

        let superuser = identity::is_superuser();
        let identity = self.identity_for(&cmd, superuser)?;
        let limits = self.update_limits(cmd.get_limits());
        if !self.backend.supports_gpu()
            && (limits.gpu_time().is_some() || limits.gpu_memory().is_some())
        {
            debug!(backend = self.backend.name(), "gpu ceilings are not enforced");
        }

        let mut argv = vec![bin.display().to_string()];
        argv.extend(args.iter().cloned());
        let resolved_line = resolved_line(&argv, &stdin, &stdout, &stderr);

        let request = ExecRequest {
            bin,
            args,
            work_path: work_path.clone(),
            environment: environment.clone(),
            stdin: stdin.clone(),
            stdout,
            stderr,
            user: cmd.get_user().map(ToOwned::to_owned),
            group: cmd.get_group().map(ToOwned::to_owned),
            identity,
            limits,
            safe: cmd.is_safe(),
            superuser,
        };

        let mut result = CommandResult::new(Invocation {
            args: argv,
            work_directory: Some(work_path),
            environment,
            user: request.user.clone(),
            group: request.group.clone(),
            limits,
            stdin: Some(stdin),
            stdout: Some(request.stdout.path.clone()),
            stderr: Some(request.stderr.path.clone()),
        });

        let mut transcript = match cmd.log_path("cmd") {
            Some(p) => match Transcript::create(&self.state.resolve_output(&p)) {
                Ok(t) => t,
                Err(err) => {
                    warn!(%err, "failed to create transcript");
                    Transcript::disabled()
                }
            },
            None => Transcript::disabled(),
        };
        transcript.write_command(&cmd, &resolved_line);

        info!(line = %resolved_line, "running");

        if cmd.is_background() {
            if self.background.contains_key(name) {
                return Err(JudgeError::DuplicateKey {
                    key: name.to_owned(),
                }
                .into());
            }
            let process = self.backend.spawn(&request)?;
            debug!(pid = process.pid(), "started in background");
            self.background.insert(
                name.to_owned(),
                BackgroundHandle {
                    process,
                    result: result.clone(),
                    transcript,
                },
            );
            return Ok(Some(result));
        }

        self.backend.execute(&request, &mut result)?;

        let status = cmd.verify_postconditions(&self.validators(&work), &result);
        if let Some(status) = status {
            info!(status = status.as_str(), "postcondition failed");
            result.set_status(status);
        }
        transcript.write_result(&result);
        Ok(Some(result))
    }

    pub fn run_task(&mut self, name: &str, task: &mut dyn Task) -> Result<ResultDict> {
        let _span = tracing::debug_span!("task", name).entered();
        task.base_mut().bind(name);

        let work = task.base().work_directory();
        {
            let v = self.validators(&work);
            for p in task.prerequirements() {
                if !p.check(&v) {
                    error!(requirement = %p, "prerequirement failed");
                    return Err(JudgeError::Prerequirement {
                        step: name.to_owned(),
                        requirement: p.to_string(),
                    }
                    .into());
                }
            }
        }

        task.execute(self)?;
        let result = task.base().result().clone();
        info!(status = result.status().as_str(), "task finished");
        Ok(result)
    }

    /// Runs a step and returns what should be recorded for it.
    pub fn run_step(&mut self, name: &str, step: Step) -> Result<Option<ResultValue>> {
        match step {
            Step::Command(cmd) => Ok(self.run_command(name, cmd)?.map(ResultValue::from)),
            Step::Task(mut task) => {
                let result = self.run_task(name, task.as_mut())?;
                let record = task.base().options.record_result || !result.status().is_ok();
                Ok(if record { Some(result.into()) } else { None })
            }
        }
    }

    /// Runs steps in order. After the first failure, or the first error, only
    /// obligatory steps still run. The first error is returned once they are done.
    pub fn run_steps(&mut self, steps: Vec<(String, Step)>) -> Result<ResultDict> {
        let mut results = ResultDict::new();
        let mut failed = false;
        let mut first_error: Option<anyhow::Error> = None;

        for (name, step) in steps {
            if (failed || first_error.is_some()) && !step.is_obligatory() {
                debug!(step = %name, "skipped");
                continue;
            }
            match self.run_step(&name, step) {
                Ok(Some(value)) => {
                    failed |= !value.status().is_ok();
                    results.set(name, value)?;
                }
                Ok(None) => {}
                Err(err) => {
                    error!(step = %name, "step failed:\n{:?}", err);
                    if first_error.is_none() {
                        first_error = Some(err);
                    }
                }
            }
        }

        match first_error {
            Some(err) => Err(err),
            None => Ok(results),
        }
    }

    pub fn start_background(
        &mut self,
        name: &str,
        cmd: Command,
    ) -> Result<Option<CommandResult>> {
        self.run_command(name, cmd.background(true))
    }

    pub fn background_names(&self) -> Vec<String> {
        self.background.keys().cloned().collect()
    }

    /// Terminates and reaps a background process.
    pub fn stop_background(&mut self, name: &str) -> Result<CommandResult> {
        let handle = self
            .background
            .remove(name)
            .ok_or_else(|| JudgeError::BackgroundNotFound {
                name: name.to_owned(),
            })?;
        handle.process.terminate();
        finish_background(name, handle)
    }

    /// Terminates every background process, then reaps them all.
    pub fn clear_background(&mut self) -> Result<Vec<(String, CommandResult)>> {
        let handles = std::mem::take(&mut self.background);
        for handle in handles.values() {
            handle.process.terminate();
        }
        let mut results = Vec::with_capacity(handles.len());
        for (name, handle) in handles {
            let result = finish_background(&name, handle)?;
            results.push((name, result));
        }
        Ok(results)
    }
}

fn finish_background(name: &str, handle: BackgroundHandle) -> Result<CommandResult> {
    let BackgroundHandle {
        process,
        mut result,
        mut transcript,
    } = handle;
    let output = process.wait()?;
    debug!(name, ?output, "background process reaped");
    backend::apply_output(&output, &mut result);
    transcript.write_result(&result);
    Ok(result)
}

fn resolved_line(
    argv: &[String],
    stdin: &Path,
    stdout: &StreamSpec,
    stderr: &StreamSpec,
) -> String {
    let mut words: Vec<String> = argv.iter().map(|a| quote(a.as_bytes())).collect();
    words.push(format!("< {}", quote(stdin.as_os_str().as_bytes())));
    for (fd, spec) in &[("", stdout), ("2", stderr)] {
        let op = if spec.append { ">>" } else { ">" };
        let mut word = format!("{}{} {}", fd, op, quote(spec.path.as_os_str().as_bytes()));
        if let Some(max) = spec.max_bytes {
            word.push_str(&format!("[{}]", max));
        }
        words.push(word);
    }
    words.join(" ")
}
