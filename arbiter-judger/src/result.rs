use crate::error::JudgeError;
use crate::limits::Limits;

use arbiter_protocol::report::{CommandReport, DictReport, Report};
use arbiter_protocol::Status;
use arbiter_utils::units::{unparse_memory, unparse_time};

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use tracing::warn;

/// What was actually run, after resolution.
#[derive(Debug, Clone, Default)]
pub struct Invocation {
    pub args: Vec<String>,
    pub work_directory: Option<PathBuf>,
    pub environment: BTreeMap<String, String>,
    pub user: Option<String>,
    pub group: Option<String>,
    pub limits: Limits,
    pub stdin: Option<PathBuf>,
    pub stdout: Option<PathBuf>,
    pub stderr: Option<PathBuf>,
}

/// Outcome of one command.
///
/// Usage fields only ever grow. The status is final once set.
#[derive(Debug, Clone, Default)]
pub struct CommandResult {
    pub invocation: Invocation,
    returncode: i32,
    cpu_time: Duration,
    real_time: Duration,
    memory: u64, // bytes
    gpu_time: Duration,
    gpu_memory: u64, // bytes
    status: Option<Status>,
}

impl CommandResult {
    pub fn new(invocation: Invocation) -> Self {
        Self {
            invocation,
            ..Self::default()
        }
    }

    pub fn returncode(&self) -> i32 {
        self.returncode
    }

    pub fn set_returncode(&mut self, returncode: i32) {
        self.returncode = returncode;
    }

    pub fn cpu_time(&self) -> Duration {
        self.cpu_time
    }

    pub fn real_time(&self) -> Duration {
        self.real_time
    }

    pub fn memory(&self) -> u64 {
        self.memory
    }

    pub fn gpu_time(&self) -> Duration {
        self.gpu_time
    }

    pub fn gpu_memory(&self) -> u64 {
        self.gpu_memory
    }

    pub fn update_cpu_time(&mut self, value: Duration) {
        self.cpu_time = self.cpu_time.max(value);
    }

    pub fn update_real_time(&mut self, value: Duration) {
        self.real_time = self.real_time.max(value);
    }

    pub fn update_memory(&mut self, value: u64) {
        self.memory = self.memory.max(value);
    }

    pub fn update_gpu_time(&mut self, value: Duration) {
        self.gpu_time = self.gpu_time.max(value);
    }

    pub fn update_gpu_memory(&mut self, value: u64) {
        self.gpu_memory = self.gpu_memory.max(value);
    }

    pub fn status(&self) -> Option<Status> {
        self.status
    }

    pub fn set_status(&mut self, status: Status) {
        match self.status {
            None => self.status = Some(status),
            Some(prev) if prev == status => {}
            Some(prev) => warn!(?prev, ?status, "result status is already set"),
        }
    }

    pub fn to_report(&self) -> CommandReport {
        let inv = &self.invocation;
        let display = |p: &Option<PathBuf>| p.as_ref().map(|p| p.display().to_string());
        CommandReport {
            status: self.status,
            args: inv.args.clone(),
            returncode: self.returncode,
            user: inv.user.clone(),
            group: inv.group.clone(),
            work_directory: display(&inv.work_directory),
            environment: inv.environment.clone(),
            limits: inv.limits.to_map(),
            stdin: display(&inv.stdin),
            stdout: display(&inv.stdout),
            stderr: display(&inv.stderr),
            cpu_time: unparse_time(self.cpu_time),
            real_time: unparse_time(self.real_time),
            memory: unparse_memory(self.memory),
            gpu_time: unparse_time(self.gpu_time),
            gpu_memory: unparse_memory(self.gpu_memory),
        }
    }
}

#[derive(Debug, Clone)]
pub enum ResultValue {
    Command(Box<CommandResult>),
    Dict(ResultDict),
    Text(String),
    Integer(i64),
    Float(f64),
    Path(PathBuf),
}

impl ResultValue {
    pub fn status(&self) -> Status {
        match self {
            ResultValue::Command(r) => r.status().unwrap_or(Status::Ok),
            ResultValue::Dict(d) => d.status(),
            _ => Status::Ok,
        }
    }

    pub fn to_report(&self) -> Report {
        match self {
            ResultValue::Command(r) => Report::Command(Box::new(r.to_report())),
            ResultValue::Dict(d) => Report::Dict(d.to_report()),
            ResultValue::Text(s) => Report::Text(s.clone()),
            ResultValue::Integer(n) => Report::Integer(*n),
            ResultValue::Float(x) => Report::Float(*x),
            ResultValue::Path(p) => Report::Text(p.display().to_string()),
        }
    }
}

impl From<CommandResult> for ResultValue {
    fn from(r: CommandResult) -> Self {
        ResultValue::Command(Box::new(r))
    }
}

impl From<ResultDict> for ResultValue {
    fn from(d: ResultDict) -> Self {
        ResultValue::Dict(d)
    }
}

impl From<String> for ResultValue {
    fn from(s: String) -> Self {
        ResultValue::Text(s)
    }
}

impl From<&str> for ResultValue {
    fn from(s: &str) -> Self {
        ResultValue::Text(s.to_owned())
    }
}

impl From<i64> for ResultValue {
    fn from(n: i64) -> Self {
        ResultValue::Integer(n)
    }
}

impl From<f64> for ResultValue {
    fn from(x: f64) -> Self {
        ResultValue::Float(x)
    }
}

impl From<PathBuf> for ResultValue {
    fn from(p: PathBuf) -> Self {
        ResultValue::Path(p)
    }
}

/// Ordered collection of named sub-results.
#[derive(Debug, Clone, Default)]
pub struct ResultDict {
    status: Option<Status>,
    entries: Vec<(String, ResultValue)>,
}

impl ResultDict {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(
        &mut self,
        key: impl Into<String>,
        value: impl Into<ResultValue>,
    ) -> Result<(), JudgeError> {
        let key = key.into();
        if key == "status" || self.get(&key).is_some() {
            return Err(JudgeError::DuplicateKey { key });
        }
        self.entries.push((key, value.into()));
        Ok(())
    }

    pub fn get(&self, key: &str) -> Option<&ResultValue> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn set_status(&mut self, status: Status) {
        self.status = Some(status);
    }

    /// The explicit status if one was assigned, else the first non-OK member.
    pub fn status(&self) -> Status {
        if let Some(status) = self.status {
            return status;
        }
        self.entries
            .iter()
            .map(|(_, v)| v.status())
            .find(|s| !s.is_ok())
            .unwrap_or(Status::Ok)
    }

    pub fn to_report(&self) -> DictReport {
        DictReport {
            status: Some(self.status()),
            entries: self
                .entries
                .iter()
                .map(|(k, v)| (k.clone(), v.to_report()))
                .collect(),
        }
    }
}
