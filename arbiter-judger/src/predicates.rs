//! Checks that gate a command before it runs and classify it afterwards.

use crate::paths::{InputPath, OutputPath, SandboxPath};
use crate::result::CommandResult;
use crate::system::state::{is_executable, SystemState};

use std::fmt;
use std::fs;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::time::Duration;

use regex::Regex;
use tracing::debug;

/// Read-only view of the system bound to the active work directory.
pub struct Validators<'a> {
    state: &'a SystemState,
    work_directory: &'a OutputPath,
}

impl<'a> Validators<'a> {
    pub fn new(state: &'a SystemState, work_directory: &'a OutputPath) -> Self {
        Self {
            state,
            work_directory,
        }
    }

    fn resolve(&self, path: &SandboxPath) -> PathBuf {
        self.state.resolve_path(path, self.work_directory)
    }

    /// Unregistered input paths are invisible even if they exist on disk.
    pub fn file_exists(&self, path: &SandboxPath) -> bool {
        if let SandboxPath::Input(p) = path {
            if !self.state.is_registered(p) {
                return false;
            }
            if p.is_dev_null() {
                return true;
            }
        }
        self.resolve(path).is_file()
    }

    pub fn directory_exists(&self, path: &SandboxPath) -> bool {
        if let SandboxPath::Input(p) = path {
            if !self.state.is_registered(p) {
                return false;
            }
        }
        self.resolve(path).is_dir()
    }

    pub fn program_exists(&self, path: &SandboxPath) -> bool {
        self.file_exists(path) && is_executable(&self.resolve(path))
    }

    pub fn system_program_exists(&self, program: &str) -> bool {
        self.state.which(program).is_some()
    }

    pub fn path_registered(&self, path: &InputPath) -> bool {
        self.state.is_registered(path)
    }

    /// Only accounts the system provisioned count, host accounts do not.
    pub fn user_exists(&self, user: &str) -> bool {
        self.state.has_user(user)
    }

    pub fn group_exists(&self, group: &str) -> bool {
        self.state.has_group(group)
    }

    /// Missing files count as empty.
    pub fn file_empty(&self, path: &Path) -> bool {
        fs::metadata(path).map_or(true, |m| m.len() == 0)
    }

    /// No line of the file matches any of `patterns`.
    pub fn file_does_not_match(&self, path: &Path, patterns: &[Regex]) -> bool {
        let file = match fs::File::open(path) {
            Ok(f) => f,
            Err(_) => return true,
        };
        for line in BufReader::new(file).split(b'\n') {
            let line = match line {
                Ok(l) => l,
                Err(_) => return true,
            };
            let line = String::from_utf8_lossy(&line);
            let line = line.strip_suffix('\r').unwrap_or(&line);
            if patterns.iter().any(|re| re.is_match(line)) {
                return false;
            }
        }
        true
    }

    /// Named capability checks. Unknown names, including GPU checks on
    /// backends without GPU support, are permissive.
    pub fn capability(&self, name: &str, argument: &str) -> bool {
        match name {
            "program_exists" | "system_program_exists" => self.system_program_exists(argument),
            "user_exists" => self.user_exists(argument),
            "group_exists" => self.group_exists(argument),
            "file_exists" => SandboxPath::parse(argument).map_or(false, |p| self.file_exists(&p)),
            "directory_exists" => {
                SandboxPath::parse(argument).map_or(false, |p| self.directory_exists(&p))
            }
            _ => {
                debug!(name, argument, "unknown validator, assuming it holds");
                true
            }
        }
    }
}

#[derive(Debug, Clone)]
pub enum Prerequirement {
    FileExists(SandboxPath),
    DirectoryExists(SandboxPath),
    ProgramExists(SandboxPath),
    SystemProgramExists(String),
    InputRegistered(InputPath),
    UserExists(String),
    GroupExists(String),
    Capability { validator: String, argument: String },
}

impl Prerequirement {
    pub fn check(&self, v: &Validators<'_>) -> bool {
        match self {
            Prerequirement::FileExists(p) => v.file_exists(p),
            Prerequirement::DirectoryExists(p) => v.directory_exists(p),
            Prerequirement::ProgramExists(p) => v.program_exists(p),
            Prerequirement::SystemProgramExists(name) => v.system_program_exists(name),
            Prerequirement::InputRegistered(p) => v.path_registered(p),
            Prerequirement::UserExists(user) => v.user_exists(user),
            Prerequirement::GroupExists(group) => v.group_exists(group),
            Prerequirement::Capability {
                validator,
                argument,
            } => v.capability(validator, argument),
        }
    }
}

impl fmt::Display for Prerequirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Prerequirement::FileExists(p) => write!(f, "file exists: {}", p),
            Prerequirement::DirectoryExists(p) => write!(f, "directory exists: {}", p),
            Prerequirement::ProgramExists(p) => write!(f, "program exists: {}", p),
            Prerequirement::SystemProgramExists(name) => {
                write!(f, "system program exists: {}", name)
            }
            Prerequirement::InputRegistered(p) => write!(f, "input registered: {}", p),
            Prerequirement::UserExists(user) => write!(f, "user exists: {}", user),
            Prerequirement::GroupExists(group) => write!(f, "group exists: {}", group),
            Prerequirement::Capability {
                validator,
                argument,
            } => write!(f, "{}({})", validator, argument),
        }
    }
}

#[derive(Debug, Clone)]
pub enum Postcondition {
    /// An empty list means `[0]`.
    ReturnCode(Vec<i32>),
    TimeLimit {
        cpu_time: Option<Duration>,
        real_time: Option<Duration>,
        gpu_time: Option<Duration>,
    },
    MemoryLimit {
        memory: Option<u64>,
        gpu_memory: Option<u64>,
    },
    EmptyError,
    /// Anchored patterns, see [`Postcondition::parsed_error`].
    ParsedError(Vec<Regex>),
}

impl Postcondition {
    /// Fails when some stderr line matches one of `patterns` as a whole.
    pub fn parsed_error<S: AsRef<str>>(patterns: &[S]) -> Result<Self, regex::Error> {
        let anchored = patterns
            .iter()
            .map(|p| Regex::new(&format!("^(?:{})$", p.as_ref())))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Postcondition::ParsedError(anchored))
    }
}

fn under<T: PartialOrd>(used: T, ceiling: Option<T>) -> bool {
    ceiling.map_or(true, |c| used < c)
}

impl Postcondition {
    pub fn check(&self, v: &Validators<'_>, result: &CommandResult) -> bool {
        match self {
            Postcondition::ReturnCode(allowed) => {
                if allowed.is_empty() {
                    result.returncode() == 0
                } else {
                    allowed.contains(&result.returncode())
                }
            }
            Postcondition::TimeLimit {
                cpu_time,
                real_time,
                gpu_time,
            } => {
                under(result.cpu_time(), *cpu_time)
                    && under(result.real_time(), *real_time)
                    && under(result.gpu_time(), *gpu_time)
            }
            Postcondition::MemoryLimit { memory, gpu_memory } => {
                under(result.memory(), *memory) && under(result.gpu_memory(), *gpu_memory)
            }
            Postcondition::EmptyError => match result.invocation.stderr {
                Some(ref p) => v.file_empty(p),
                None => true,
            },
            Postcondition::ParsedError(patterns) => match result.invocation.stderr {
                Some(ref p) => v.file_does_not_match(p, patterns),
                None => true,
            },
        }
    }
}

impl fmt::Display for Postcondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Postcondition::ReturnCode(allowed) if allowed.is_empty() => {
                f.write_str("return code in [0]")
            }
            Postcondition::ReturnCode(allowed) => write!(f, "return code in {:?}", allowed),
            Postcondition::TimeLimit {
                cpu_time,
                real_time,
                gpu_time,
            } => write!(
                f,
                "time under cpu={:?} real={:?} gpu={:?}",
                cpu_time, real_time, gpu_time
            ),
            Postcondition::MemoryLimit { memory, gpu_memory } => {
                write!(f, "memory under {:?} gpu={:?}", memory, gpu_memory)
            }
            Postcondition::EmptyError => f.write_str("stderr is empty"),
            Postcondition::ParsedError(patterns) => {
                let patterns: Vec<&str> = patterns.iter().map(Regex::as_str).collect();
                write!(f, "stderr does not match {:?}", patterns)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::result::Invocation;

    use std::io::Write;

    fn state() -> SystemState {
        SystemState::new(std::env::temp_dir())
    }

    #[test]
    fn unregistered_inputs_are_invisible() {
        let mut state = state();
        let root = OutputPath::root();
        let hosts = SandboxPath::parse("/etc/hosts").unwrap();
        let input = InputPath::new("/etc/hosts").unwrap();

        assert!(!Validators::new(&state, &root).file_exists(&hosts));
        state.add_path(&input);
        let v = Validators::new(&state, &root);
        assert_eq!(v.file_exists(&hosts), Path::new("/etc/hosts").is_file());
        assert!(v.file_exists(&SandboxPath::Input(InputPath::dev_null())));
    }

    #[test]
    fn unknown_capability_is_permissive() {
        let state = state();
        let root = OutputPath::root();
        let v = Validators::new(&state, &root);
        assert!(v.capability("gpu_exists", "0"));
        assert!(v.capability("no_such_check", ""));
        assert!(!v.capability("user_exists", "arbiter-no-such-user"));
    }

    #[test]
    fn host_accounts_are_not_provisioned() {
        let mut state = state();
        let root = OutputPath::root();
        assert!(!Validators::new(&state, &root).user_exists("root"));
        assert!(!Validators::new(&state, &root).group_exists("root"));

        state.add_user("root", None);
        state.add_group("root");
        let v = Validators::new(&state, &root);
        assert!(v.user_exists("root"));
        assert!(v.group_exists("root"));
    }

    #[test]
    fn postconditions_are_pure() {
        let state = state();
        let root = OutputPath::root();
        let v = Validators::new(&state, &root);

        let mut result = CommandResult::new(Invocation::default());
        result.set_returncode(1);
        result.update_cpu_time(Duration::from_secs(2));
        result.update_memory(1024);

        let conditions = [
            Postcondition::ReturnCode(vec![]),
            Postcondition::ReturnCode(vec![0, 1]),
            Postcondition::TimeLimit {
                cpu_time: Some(Duration::from_secs(2)),
                real_time: None,
                gpu_time: None,
            },
            Postcondition::MemoryLimit {
                memory: Some(2048),
                gpu_memory: None,
            },
        ];
        let expected = [false, true, false, true];
        for _ in 0..2 {
            for (cond, &ok) in conditions.iter().zip(expected.iter()) {
                assert_eq!(cond.check(&v, &result), ok, "{}", cond);
            }
        }
    }

    #[test]
    fn stderr_patterns() {
        let state = state();
        let root = OutputPath::root();
        let v = Validators::new(&state, &root);

        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "warning: unused variable").unwrap();
        writeln!(file, "ERROR 42").unwrap();
        let path = file.path().to_owned();

        let mut result = CommandResult::new(Invocation {
            stderr: Some(path.clone()),
            ..Invocation::default()
        });
        result.set_returncode(0);

        let full = Postcondition::parsed_error(&["ERROR [0-9]+"]).unwrap();
        let partial = Postcondition::parsed_error(&["ERROR"]).unwrap();
        assert!(!full.check(&v, &result));
        assert!(partial.check(&v, &result));
        assert!(!Postcondition::EmptyError.check(&v, &result));

        let missing = CommandResult::new(Invocation {
            stderr: Some(PathBuf::from("/nonexistent/stderr.txt")),
            ..Invocation::default()
        });
        assert!(Postcondition::EmptyError.check(&v, &missing));
        assert!(full.check(&v, &missing));
    }
}
