//! Path triage.
//!
//! An [`InputPath`] is an absolute host path that must be registered before a
//! command may read it. An [`OutputPath`] lives under the output root. A
//! [`RelativePath`] is resolved against the work directory of the command
//! that uses it.

use crate::error::JudgeError;

use std::fmt;
use std::path::{Component, Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct InputPath(PathBuf);

impl InputPath {
    /// Absolute and free of `..`, so registration checks see the real target.
    pub fn new(path: impl Into<PathBuf>) -> Result<Self, JudgeError> {
        let path = path.into();
        let climbs = path.components().any(|c| c == Component::ParentDir);
        if !path.is_absolute() || climbs {
            return Err(JudgeError::InvalidPath {
                path,
                expected: "input",
            });
        }
        Ok(Self(path.components().collect()))
    }

    pub fn dev_null() -> Self {
        Self(PathBuf::from("/dev/null"))
    }

    pub fn is_dev_null(&self) -> bool {
        self.0 == Path::new("/dev/null")
    }

    pub fn as_path(&self) -> &Path {
        &self.0
    }

    pub fn file_name(&self) -> Option<&str> {
        self.0.file_name().and_then(|s| s.to_str())
    }

    pub fn extension(&self) -> Option<&str> {
        self.0.extension().and_then(|s| s.to_str())
    }
}

/// Lexically normalizes a relative path, refusing to climb above its root.
fn normalize(path: &Path, expected: &'static str) -> Result<PathBuf, JudgeError> {
    let invalid = || JudgeError::InvalidPath {
        path: path.to_owned(),
        expected,
    };
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::Normal(c) => out.push(c),
            Component::ParentDir => {
                if !out.pop() {
                    return Err(invalid());
                }
            }
            Component::RootDir | Component::Prefix(_) => return Err(invalid()),
        }
    }
    Ok(out)
}

macro_rules! rooted_path {
    ($name:ident, $expected:literal) => {
        #[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name(PathBuf);

        impl $name {
            pub fn new(path: impl AsRef<Path>) -> Result<Self, JudgeError> {
                normalize(path.as_ref(), $expected).map(Self)
            }

            pub fn root() -> Self {
                Self(PathBuf::new())
            }

            pub fn is_root(&self) -> bool {
                self.0.as_os_str().is_empty()
            }

            pub fn join(&self, tail: impl AsRef<Path>) -> Result<Self, JudgeError> {
                Self::new(self.0.join(tail))
            }

            pub fn parent(&self) -> Self {
                match self.0.parent() {
                    Some(p) => Self(p.to_owned()),
                    None => Self::root(),
                }
            }

            pub fn file_name(&self) -> Option<&str> {
                self.0.file_name().and_then(|s| s.to_str())
            }

            pub fn extension(&self) -> Option<&str> {
                self.0.extension().and_then(|s| s.to_str())
            }

            pub fn as_path(&self) -> &Path {
                if self.is_root() {
                    Path::new(".")
                } else {
                    &self.0
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.as_path().display())
            }
        }
    };
}

rooted_path!(OutputPath, "output");
rooted_path!(RelativePath, "relative");

impl fmt::Display for InputPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.display())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SandboxPath {
    Input(InputPath),
    Output(OutputPath),
    Relative(RelativePath),
}

impl SandboxPath {
    /// Absolute paths are inputs, anything else lives under the output root.
    pub fn parse(s: impl AsRef<Path>) -> Result<Self, JudgeError> {
        let path = s.as_ref();
        if path.is_absolute() {
            Self::parse_input(path)
        } else {
            Self::parse_output(path)
        }
    }

    pub fn parse_input(s: impl AsRef<Path>) -> Result<Self, JudgeError> {
        InputPath::new(s.as_ref()).map(SandboxPath::Input)
    }

    pub fn parse_output(s: impl AsRef<Path>) -> Result<Self, JudgeError> {
        OutputPath::new(s).map(SandboxPath::Output)
    }

    pub fn parse_relative(s: impl AsRef<Path>) -> Result<Self, JudgeError> {
        RelativePath::new(s).map(SandboxPath::Relative)
    }

    pub fn file_name(&self) -> Option<&str> {
        match self {
            SandboxPath::Input(p) => p.file_name(),
            SandboxPath::Output(p) => p.file_name(),
            SandboxPath::Relative(p) => p.file_name(),
        }
    }

    pub fn extension(&self) -> Option<&str> {
        match self {
            SandboxPath::Input(p) => p.extension(),
            SandboxPath::Output(p) => p.extension(),
            SandboxPath::Relative(p) => p.extension(),
        }
    }
}

impl From<InputPath> for SandboxPath {
    fn from(p: InputPath) -> Self {
        SandboxPath::Input(p)
    }
}

impl From<OutputPath> for SandboxPath {
    fn from(p: OutputPath) -> Self {
        SandboxPath::Output(p)
    }
}

impl From<RelativePath> for SandboxPath {
    fn from(p: RelativePath) -> Self {
        SandboxPath::Relative(p)
    }
}

impl fmt::Display for SandboxPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SandboxPath::Input(p) => write!(f, "{}", p),
            SandboxPath::Output(p) => write!(f, "OUT/{}", p),
            SandboxPath::Relative(p) => write!(f, "./{}", p),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamTarget {
    Discard,
    DefaultLog,
    Path(SandboxPath),
}

/// Where stdout or stderr of a command goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputStream {
    pub target: StreamTarget,
    pub append: bool,
    pub max_bytes: Option<u64>,
}

impl Default for OutputStream {
    fn default() -> Self {
        Self {
            target: StreamTarget::DefaultLog,
            append: false,
            max_bytes: None,
        }
    }
}

impl OutputStream {
    pub fn discard() -> Self {
        Self {
            target: StreamTarget::Discard,
            ..Self::default()
        }
    }

    pub fn to_path(path: impl Into<SandboxPath>) -> Self {
        Self {
            target: StreamTarget::Path(path.into()),
            ..Self::default()
        }
    }

    pub fn append(mut self, append: bool) -> Self {
        self.append = append;
        self
    }

    pub fn max_bytes(mut self, max_bytes: u64) -> Self {
        self.max_bytes = Some(max_bytes);
        self
    }
}
