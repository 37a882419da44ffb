use std::ffi::{OsStr, OsString};
use std::fmt;
use std::os::unix::ffi::OsStrExt;
use std::path::PathBuf;
use std::process::Command;

/// An argv builder shared by every place that has to spell out a host command line.
#[derive(Debug, Clone)]
pub struct OsCmd {
    pub bin: PathBuf,
    pub args: Vec<OsString>,
    pub env: Vec<OsString>,
}

impl OsCmd {
    pub fn new(bin: impl Into<PathBuf>) -> Self {
        Self {
            bin: bin.into(),
            args: Vec::new(),
            env: Vec::new(),
        }
    }

    pub fn arg(&mut self, a: impl Into<OsString>) -> &mut Self {
        self.args.push(a.into());
        self
    }

    pub fn arg_if(&mut self, cond: bool, a: impl Into<OsString>) -> &mut Self {
        if cond {
            self.arg(a)
        } else {
            self
        }
    }

    pub fn args<I, A>(&mut self, args: I) -> &mut Self
    where
        I: IntoIterator<Item = A>,
        A: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Appends `-p <key>=<value>` pairs, the property syntax of the service manager.
    pub fn property(&mut self, key: &str, value: impl fmt::Display) -> &mut Self {
        self.arg("-p").arg(format!("{}={}", key, value))
    }

    pub fn add_env(&mut self, k: impl Into<OsString>, v: impl AsRef<OsStr>) -> &mut Self {
        let mut e: OsString = k.into();
        e.push(OsStr::from_bytes(b"="));
        e.push(v.as_ref());
        self.env.push(e);
        self
    }

    pub fn to_command(&self) -> Command {
        let mut cmd = Command::new(&self.bin);
        cmd.args(&self.args);
        for e in &self.env {
            let bytes = e.as_bytes();
            match bytes.iter().position(|&b| b == b'=') {
                Some(idx) => {
                    cmd.env(OsStr::from_bytes(&bytes[..idx]), OsStr::from_bytes(&bytes[idx + 1..]))
                }
                None => cmd.env(e, ""),
            };
        }
        cmd
    }
}

impl fmt::Display for OsCmd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", quote(self.bin.as_os_str().as_bytes()))?;
        for a in &self.args {
            write!(f, " {}", quote(a.as_bytes()))?;
        }
        Ok(())
    }
}

/// Quotes a word for `/bin/sh`.
pub fn quote(word: &[u8]) -> String {
    let is_safe = |b: &u8| b.is_ascii_alphanumeric() || b"@%+=:,./-_".contains(b);

    let s = String::from_utf8_lossy(word);
    if !word.is_empty() && word.iter().all(is_safe) {
        return s.into_owned();
    }
    format!("'{}'", s.replace('\'', r#"'"'"'"#))
}
