use super::secure_directory;

use crate::args::Arg;
use crate::command::{install, CMakeConfig, Command, GccConfig, MakeConfig, Ownership};
use crate::paths::{OutputPath, SandboxPath};
use crate::system::state::is_executable;
use crate::system::System;
use crate::task::{Task, TaskBase, TaskOptions, BUILD_USER, RUN_GROUP, TEST_USER};

use arbiter_protocol::Status;
use arbiter_utils::os_cmd::quote;

use std::fs;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use anyhow::{Context as _, Result};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    CMake,
    Make,
    Compiler,
    Script,
}

impl Strategy {
    /// Priority order.
    pub const ALL: [Strategy; 4] = [
        Strategy::CMake,
        Strategy::Make,
        Strategy::Compiler,
        Strategy::Script,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Strategy::CMake => "cmake",
            Strategy::Make => "make",
            Strategy::Compiler => "compiler",
            Strategy::Script => "script",
        }
    }

    fn index(self) -> usize {
        Self::ALL.iter().position(|&s| s == self).unwrap_or(0) + 1
    }
}

#[derive(Debug, Clone)]
pub struct BuildConfig {
    pub source_directory: OutputPath,
    pub build_directory: OutputPath,
    pub execution_script: OutputPath,
    pub build_target: Option<String>,
    pub standard: Option<String>,
    pub static_link: bool,
    pub libraries: Vec<String>,
    pub version: Option<String>,
    /// Applied to the build directory once the build succeeds.
    pub ownership: Ownership,
    pub result_on_unknown: Option<Status>,
    pub strategies: Vec<Strategy>,
}

impl BuildConfig {
    pub fn new(
        source_directory: OutputPath,
        build_directory: OutputPath,
        script: OutputPath,
    ) -> Self {
        Self {
            source_directory,
            build_directory,
            execution_script: script,
            build_target: None,
            standard: None,
            static_link: false,
            libraries: Vec::new(),
            version: None,
            ownership: Ownership::default(),
            result_on_unknown: None,
            strategies: Strategy::ALL.to_vec(),
        }
    }
}

#[derive(Debug)]
enum Plan {
    CMake,
    Make,
    Compiler { cxx: bool, sources: Vec<SandboxPath> },
    Script { interpreter: &'static str, source: OutputPath },
}

impl Plan {
    fn strategy(&self) -> Strategy {
        match self {
            Plan::CMake => Strategy::CMake,
            Plan::Make => Strategy::Make,
            Plan::Compiler { .. } => Strategy::Compiler,
            Plan::Script { .. } => Strategy::Script,
        }
    }
}

fn has_extension(path: &Path, extensions: &[&str]) -> bool {
    match path.extension().and_then(|e| e.to_str()) {
        Some(ext) => extensions.iter().any(|e| ext.eq_ignore_ascii_case(e)),
        None => false,
    }
}

/// Builds a source directory with the first strategy that applies and
/// leaves a `#!/bin/sh` wrapper at the execution script path.
#[derive(Debug)]
pub struct BuildTask {
    base: TaskBase,
    config: BuildConfig,
}

impl BuildTask {
    pub fn new(options: TaskOptions, config: BuildConfig) -> Self {
        Self {
            base: TaskBase::new(options),
            config,
        }
    }

    /// Builds `solution/src` into `solution/build` as the build user. Failures are CME.
    pub fn solution() -> Result<Self> {
        let mut config = BuildConfig::new(
            OutputPath::new("solution/src")?,
            OutputPath::new("solution/build")?,
            OutputPath::new("solution/exec")?,
        );
        config.ownership = Ownership::new(Some(BUILD_USER), Some(RUN_GROUP), None);
        let options = TaskOptions::default()
            .user(Some(BUILD_USER))
            .group(Some(BUILD_USER))
            .result_on_error(Some(Status::Cme))
            .result_on_time(Some(Status::Cme))
            .result_on_memory(Some(Status::Cme));
        Ok(Self::new(options, config))
    }

    /// Builds `tools/src/<name>` into `tools/build/<name>`. Failures are INT.
    pub fn tool(name: &str) -> Result<Self> {
        let mut config = BuildConfig::new(
            OutputPath::new("tools/src")?.join(name)?,
            OutputPath::new("tools/build")?.join(name)?,
            OutputPath::new("tools")?.join(name)?,
        );
        config.ownership = Ownership::new(Some(TEST_USER), Some(TEST_USER), None);
        config.result_on_unknown = Some(Status::Int);
        let options = TaskOptions::tool()
            .user(Some(TEST_USER))
            .group(Some(TEST_USER));
        Ok(Self::new(options, config))
    }

    pub fn options(mut self, f: impl FnOnce(TaskOptions) -> TaskOptions) -> Self {
        self.base.options = f(self.base.options);
        self
    }

    pub fn config(mut self, f: impl FnOnce(BuildConfig) -> BuildConfig) -> Self {
        self.config = f(self.config);
        self
    }

    fn source_files(&self, system: &System) -> Result<Vec<PathBuf>> {
        let root = system.resolve_output(&self.config.source_directory);
        if !root.is_dir() {
            return Ok(Vec::new());
        }
        Ok(system.find_files(&root)?)
    }

    fn to_output(&self, system: &System, path: &Path) -> Result<OutputPath> {
        let relative = path
            .strip_prefix(system.output_directory())
            .with_context(|| format!("not under the output root: {}", path.display()))?;
        Ok(OutputPath::new(relative)?)
    }

    fn plan(&self, system: &System, strategy: Strategy) -> Result<Option<Plan>> {
        let source = system.resolve_output(&self.config.source_directory);
        let plan = match strategy {
            Strategy::CMake => {
                Some(Plan::CMake).filter(|_| source.join("CMakeLists.txt").is_file())
            }
            Strategy::Make => Some(Plan::Make).filter(|_| source.join("Makefile").is_file()),
            Strategy::Compiler => {
                let files = self.source_files(system)?;
                let cxx: Vec<&PathBuf> =
                    files.iter().filter(|f| has_extension(f, &["cpp", "cc"])).collect();
                let c: Vec<&PathBuf> = files.iter().filter(|f| has_extension(f, &["c"])).collect();
                let (cxx, chosen) = if !cxx.is_empty() { (true, cxx) } else { (false, c) };
                if chosen.is_empty() {
                    None
                } else {
                    let sources = chosen
                        .into_iter()
                        .map(|f| self.to_output(system, f).map(SandboxPath::from))
                        .collect::<Result<Vec<_>>>()?;
                    Some(Plan::Compiler { cxx, sources })
                }
            }
            Strategy::Script => {
                let files = self.source_files(system)?;
                if files.len() != 1 {
                    None
                } else {
                    let file = &files[0];
                    let interpreter = if has_extension(file, &["sh"]) {
                        Some("bash")
                    } else if has_extension(file, &["py"]) {
                        Some("python3")
                    } else {
                        None
                    };
                    match interpreter {
                        Some(interpreter) => Some(Plan::Script {
                            interpreter,
                            source: self.to_output(system, file)?,
                        }),
                        None => None,
                    }
                }
            }
        };
        Ok(plan)
    }

    /// Runs `<task>_NN_<step>`, NN being the strategy's place in the priority order.
    fn step(
        &mut self,
        system: &mut System,
        strategy: Strategy,
        step: &str,
        cmd: Command,
    ) -> Result<Option<Status>> {
        let sub = format!("{:02}_{}", strategy.index(), step);
        self.base.run_command(system, &sub, cmd)
    }

    /// The target if it is executable, else the most recently modified executable.
    fn find_binary(&self, system: &System) -> Result<Option<PathBuf>> {
        let build = system.resolve_output(&self.config.build_directory);
        if let Some(ref target) = self.config.build_target {
            let path = build.join(target);
            if is_executable(&path) {
                return Ok(Some(path));
            }
        }
        let mut newest: Option<(SystemTime, PathBuf)> = None;
        for file in system.find_files(&build)? {
            if !is_executable(&file) {
                continue;
            }
            let modified = fs::metadata(&file)?.modified()?;
            match newest {
                Some((t, _)) if t >= modified => {}
                _ => newest = Some((modified, file)),
            }
        }
        Ok(newest.map(|(_, p)| p))
    }

    fn build(&mut self, system: &mut System, plan: Plan) -> Result<Result<Vec<String>, Status>> {
        let strategy = plan.strategy();
        let build_directory = self.config.build_directory.clone();
        let target = self.config.build_target.clone();

        let status = match plan {
            Plan::CMake => {
                let cmake = CMakeConfig {
                    source_directory: self.config.source_directory.clone(),
                    build_directory: build_directory.clone(),
                };
                let make = MakeConfig {
                    build_directory: build_directory.clone(),
                    target,
                };
                match self.step(system, strategy, "cmake", cmake.command()?)? {
                    Some(s) => Some(s),
                    None => self.step(system, strategy, "make", make.command()?)?,
                }
            }
            Plan::Make => {
                let copy = Command::program("cp")
                    .arg("-a")
                    .arg(Arg::Concat(vec![
                        Arg::Path(self.config.source_directory.clone().into()),
                        Arg::Text("/.".to_owned()),
                    ]))
                    .arg(Arg::Path(build_directory.clone().into()));
                let make = MakeConfig {
                    build_directory: build_directory.clone(),
                    target,
                };
                match self.step(system, strategy, "copy", copy)? {
                    Some(s) => Some(s),
                    None => self.step(system, strategy, "make", make.command()?)?,
                }
            }
            Plan::Compiler { cxx, sources } => {
                let gcc = GccConfig {
                    cxx,
                    version: self.config.version.clone(),
                    standard: self.config.standard.clone(),
                    static_link: self.config.static_link,
                    libraries: self.config.libraries.clone(),
                    build_directory: build_directory.clone(),
                    build_target: target.unwrap_or_else(|| "a.out".to_owned()),
                    ..GccConfig::default()
                };
                self.step(system, strategy, "compile", gcc.command(&sources))?
            }
            Plan::Script {
                interpreter,
                source,
            } => {
                let name = source.file_name().unwrap_or("script").to_owned();
                let installed = build_directory.join(&name)?;
                let ownership = Ownership::new(None, None, Some(0o755));
                let cmd = install(system.is_superuser(), source.into(), &installed, &ownership);
                if let Some(s) = self.step(system, strategy, "install", cmd)? {
                    return Ok(Err(s));
                }
                let script = system.resolve_output(&installed).display().to_string();
                return Ok(Ok(vec![interpreter.to_owned(), script]));
            }
        };
        if let Some(s) = status {
            return Ok(Err(s));
        }

        match self.find_binary(system)? {
            Some(binary) => Ok(Ok(vec![binary.display().to_string()])),
            None => {
                warn!("build produced no executable");
                let status = self.base.options.result_on_error.unwrap_or(Status::Cme);
                Ok(Err(status))
            }
        }
    }

    fn write_execution_script(&mut self, system: &System, line: &[String]) -> Result<()> {
        let path = system.resolve_output(&self.config.execution_script);
        let words: Vec<String> = line.iter().map(|w| quote(w.as_bytes())).collect();
        let body = format!("#!/bin/sh\nexec {} \"$@\"\n", words.join(" "));
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, body)
            .with_context(|| format!("failed to write execution script: {}", path.display()))?;
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755))?;
        debug!(path = %path.display(), "execution script written");
        self.base.record("execution_script", path)?;
        Ok(())
    }

    fn post_build(&mut self, system: &mut System) -> Result<Option<Status>> {
        let ownership = self.config.ownership.clone();
        secure_directory(
            &mut self.base,
            system,
            &self.config.build_directory,
            ownership.user.as_deref(),
            ownership.group.as_deref(),
        )
    }
}

impl Task for BuildTask {
    fn base(&self) -> &TaskBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut TaskBase {
        &mut self.base
    }

    fn execute(&mut self, system: &mut System) -> Result<()> {
        let mut chosen = None;
        for strategy in self.config.strategies.clone() {
            if let Some(plan) = self.plan(system, strategy)? {
                chosen = Some(plan);
                break;
            }
        }

        let plan = match chosen {
            Some(plan) => plan,
            None => {
                let status = self
                    .config
                    .result_on_unknown
                    .or(self.base.options.result_on_error)
                    .unwrap_or(Status::Cme);
                info!(
                    source = %self.config.source_directory,
                    status = status.as_str(),
                    "no build strategy applies"
                );
                self.base.set_status(status);
                return Ok(());
            }
        };

        info!(strategy = plan.strategy().as_str(), "building");
        self.base.record("strategy", plan.strategy().as_str())?;
        let build = system.resolve_output(&self.config.build_directory);
        fs::create_dir_all(&build)
            .with_context(|| format!("failed to create build directory: {}", build.display()))?;

        let line = match self.build(system, plan)? {
            Ok(line) => line,
            Err(status) => {
                self.base.set_status(status);
                return Ok(());
            }
        };
        self.write_execution_script(system, &line)?;
        if let Some(status) = self.post_build(system)? {
            self.base.set_status(status);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strategy_order() {
        let names: Vec<&str> = Strategy::ALL.iter().map(|s| s.as_str()).collect();
        assert_eq!(names, vec!["cmake", "make", "compiler", "script"]);
        assert_eq!(Strategy::CMake.index(), 1);
        assert_eq!(Strategy::Script.index(), 4);
    }

    #[test]
    fn extensions() {
        assert!(has_extension(Path::new("a/main.CPP"), &["cpp", "cc"]));
        assert!(has_extension(Path::new("x.Py"), &["py"]));
        assert!(!has_extension(Path::new("Makefile"), &["c"]));
    }

    #[test]
    fn presets() {
        let task = BuildTask::tool("checker").unwrap();
        assert_eq!(task.config.source_directory.to_string(), "tools/src/checker");
        assert_eq!(task.config.execution_script.to_string(), "tools/checker");
        assert_eq!(task.config.result_on_unknown, Some(Status::Int));

        let task = BuildTask::solution().unwrap();
        assert_eq!(task.base.options.result_on_error, Some(Status::Cme));
        assert_eq!(task.config.result_on_unknown, None);
    }
}
