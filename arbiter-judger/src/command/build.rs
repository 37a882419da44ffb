use super::Command;

use crate::args::Arg;
use crate::error::JudgeError;
use crate::paths::{OutputPath, RelativePath, SandboxPath};
use crate::predicates::Prerequirement;

/// A single gcc or g++ invocation producing `a.out` in the build directory.
#[derive(Debug, Clone)]
pub struct GccConfig {
    pub cxx: bool,
    pub version: Option<String>,
    pub standard: Option<String>,
    pub static_link: bool,
    pub build_arguments: Vec<String>,
    pub verbose_arguments: Vec<String>,
    pub libraries: Vec<String>,
    pub build_directory: OutputPath,
    pub build_target: String,
}

impl Default for GccConfig {
    fn default() -> Self {
        Self {
            cxx: false,
            version: None,
            standard: None,
            static_link: false,
            build_arguments: vec!["-Wall".to_owned(), "-O2".to_owned()],
            verbose_arguments: vec!["-Wextra".to_owned(), "-Wpedantic".to_owned()],
            libraries: Vec::new(),
            build_directory: OutputPath::root(),
            build_target: "a.out".to_owned(),
        }
    }
}

impl GccConfig {
    pub fn program(&self) -> String {
        let base = if self.cxx { "g++" } else { "gcc" };
        match self.version {
            Some(ref v) => format!("{}-{}", base, v),
            None => base.to_owned(),
        }
    }

    pub fn command(&self, sources: &[SandboxPath]) -> Command {
        let mut cmd =
            Command::program(&self.program()).work_directory(self.build_directory.clone());
        if let Some(ref std) = self.standard {
            cmd = cmd.arg(format!("-std={}", std));
        }
        if self.static_link {
            cmd = cmd.arg("-static");
        }
        cmd = cmd.args(self.build_arguments.iter().map(String::as_str));
        for arg in &self.verbose_arguments {
            cmd = cmd.verbose_arg(arg.as_str());
        }
        for source in sources {
            cmd = cmd
                .arg(Arg::Path(source.clone()))
                .prerequirement(Prerequirement::FileExists(source.clone()));
        }
        for lib in &self.libraries {
            cmd = cmd.arg(format!("-l{}", lib));
        }
        cmd.arg("-o").arg(self.build_target.as_str())
    }

    /// The artifact, relative to the output root.
    pub fn execution_command(&self) -> Result<OutputPath, JudgeError> {
        self.build_directory.join(&self.build_target)
    }
}

#[derive(Debug, Clone, Default)]
pub struct MakeConfig {
    pub build_directory: OutputPath,
    pub target: Option<String>,
}

impl MakeConfig {
    pub fn command(&self) -> Result<Command, JudgeError> {
        let makefile = RelativePath::new("Makefile")?;
        let mut cmd = Command::program("make")
            .work_directory(self.build_directory.clone())
            .quiet_arg("--silent")
            .arg("--makefile")
            .arg(Arg::Path(makefile.clone().into()))
            .prerequirement(Prerequirement::FileExists(makefile.into()));
        if let Some(ref target) = self.target {
            cmd = cmd.arg(target.as_str());
        }
        Ok(cmd)
    }
}

#[derive(Debug, Clone, Default)]
pub struct CMakeConfig {
    pub source_directory: OutputPath,
    pub build_directory: OutputPath,
}

impl CMakeConfig {
    pub fn command(&self) -> Result<Command, JudgeError> {
        let lists = self.source_directory.join("CMakeLists.txt")?;
        Ok(Command::program("cmake")
            .work_directory(self.build_directory.clone())
            .arg(Arg::Path(self.source_directory.clone().into()))
            .prerequirement(Prerequirement::FileExists(lists.into())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gcc_arguments() {
        let config = GccConfig {
            cxx: true,
            version: Some("10".to_owned()),
            standard: Some("c++17".to_owned()),
            static_link: true,
            libraries: vec!["m".to_owned()],
            build_directory: OutputPath::new("solution/build").unwrap(),
            ..GccConfig::default()
        };
        let src = SandboxPath::parse_output("solution/src/main.cpp").unwrap();
        let cmd = config.command(&[src]);
        let args: Vec<String> = cmd.declared_args().iter().map(ToString::to_string).collect();
        assert_eq!(cmd.get_program(), Some(&crate::command::Program::Host("g++-10".to_owned())));
        assert_eq!(
            args,
            vec![
                "-std=c++17",
                "-static",
                "-Wall",
                "-O2",
                "OUT/solution/src/main.cpp",
                "-lm",
                "-o",
                "a.out"
            ]
        );
        assert_eq!(
            config.execution_command().unwrap().to_string(),
            "solution/build/a.out"
        );
    }
}
