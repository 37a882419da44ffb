use crate::error::JudgeError;
use crate::paths::SandboxPath;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

type ExprFn = dyn Fn(&[&str]) -> String + Send + Sync;

/// A fragment computed from system variables when the command line is resolved.
#[derive(Clone)]
pub struct DependentExpr {
    names: Vec<String>,
    func: Arc<ExprFn>,
}

impl DependentExpr {
    pub fn new<F>(names: &[&str], func: F) -> Self
    where
        F: Fn(&[&str]) -> String + Send + Sync + 'static,
    {
        Self {
            names: names.iter().map(|s| (*s).to_owned()).collect(),
            func: Arc::new(func),
        }
    }

    /// The value of a single variable.
    pub fn var(name: &str) -> Self {
        Self::new(&[name], |values| values[0].to_owned())
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn evaluate(&self, variables: &HashMap<String, String>) -> Result<String, JudgeError> {
        let mut values = Vec::with_capacity(self.names.len());
        for name in &self.names {
            match variables.get(name) {
                Some(v) => values.push(v.as_str()),
                None => return Err(JudgeError::UnresolvedVariable { name: name.clone() }),
            }
        }
        Ok((self.func)(&values))
    }
}

impl fmt::Debug for DependentExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DependentExpr")
            .field("names", &self.names)
            .finish()
    }
}

/// One argv element before resolution.
#[derive(Debug, Clone)]
pub enum Arg {
    Text(String),
    Path(SandboxPath),
    Concat(Vec<Arg>),
    Var(DependentExpr),
}

impl fmt::Display for Arg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Arg::Text(s) => f.write_str(s),
            Arg::Path(p) => write!(f, "{}", p),
            Arg::Concat(parts) => {
                for part in parts {
                    write!(f, "{}", part)?;
                }
                Ok(())
            }
            Arg::Var(e) => write!(f, "${{{}}}", e.names.join(",")),
        }
    }
}

impl From<&str> for Arg {
    fn from(s: &str) -> Self {
        Arg::Text(s.to_owned())
    }
}

impl From<String> for Arg {
    fn from(s: String) -> Self {
        Arg::Text(s)
    }
}

impl From<SandboxPath> for Arg {
    fn from(p: SandboxPath) -> Self {
        Arg::Path(p)
    }
}

impl From<DependentExpr> for Arg {
    fn from(e: DependentExpr) -> Self {
        Arg::Var(e)
    }
}
