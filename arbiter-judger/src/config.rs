use crate::limits::Limits;
use crate::system::backend::BackendKind;
use crate::system::identity::IdentityPolicy;

use arbiter_utils::units::{serde_memory, serde_time};

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context as _, Result};
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use validator::Validate;

#[derive(Debug, Clone, Validate, Serialize, Deserialize)]
pub struct Config {
    #[validate]
    pub system: SystemSection,

    #[serde(default)]
    #[validate]
    pub hard_limit: HardLimit,

    #[serde(default)]
    pub observer: Observer,

    #[serde(default)]
    #[validate]
    pub systemd: Systemd,

    #[validate]
    pub judge: Judge,
}

#[derive(Debug, Clone, Validate, Serialize, Deserialize)]
pub struct SystemSection {
    #[validate(length(min = 1))]
    pub output_directory: String,

    #[serde(default)]
    pub backend: BackendKind,

    #[serde(default)]
    pub identity_switch: IdentityPolicy,

    /// Host paths commands may read.
    #[serde(default)]
    pub paths: Vec<PathBuf>,

    #[serde(default)]
    pub environment: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, Validate, Serialize, Deserialize)]
pub struct HardLimit {
    #[serde(default, with = "serde_time")]
    pub cpu_time: Option<Duration>,

    #[serde(default, with = "serde_time")]
    pub real_time: Option<Duration>,

    #[serde(default, with = "serde_memory")]
    pub memory: Option<u64>, // bytes

    #[validate(range(min = 1))]
    pub pids: Option<u32>,

    #[validate(range(min = 1))]
    pub cores: Option<u32>,
}

impl HardLimit {
    pub fn to_limits(&self) -> Limits {
        let mut limits = Limits::default();
        limits.set_cpu_time(self.cpu_time);
        limits.set_real_time(self.real_time);
        limits.set_memory(self.memory);
        limits.set_pids(self.pids);
        limits.set_cores(self.cores);
        limits
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Observer {
    pub helper: PathBuf,
}

impl Default for Observer {
    fn default() -> Self {
        Self {
            helper: PathBuf::from("arbiter-sandbox"),
        }
    }
}

#[derive(Debug, Clone, Validate, Serialize, Deserialize)]
#[serde(default)]
pub struct Systemd {
    /// Talk to the user manager. Defaults to doing so when not root.
    pub user_mode: Option<bool>,

    #[validate(range(min = 10, max = 10000))]
    pub poll_interval_ms: u64,
}

impl Default for Systemd {
    fn default() -> Self {
        Self {
            user_mode: None,
            poll_interval_ms: 100,
        }
    }
}

#[derive(Debug, Clone, Validate, Serialize, Deserialize)]
pub struct Judge {
    pub solution: PathBuf,
    pub input: PathBuf,
    pub hint: PathBuf,

    #[serde(default, with = "serde_time")]
    pub time_limit: Option<Duration>,

    #[serde(default, with = "serde_memory")]
    pub memory_limit: Option<u64>, // bytes

    #[serde(default, with = "serde_memory")]
    pub max_size: Option<u64>, // bytes

    #[serde(default = "default_true")]
    pub case_sensitive: bool,

    #[serde(default)]
    pub space_sensitive: bool,

    /// Comma separated count rules over the submitted sources.
    #[serde(default)]
    pub rules: Option<String>,
}

fn default_true() -> bool {
    true
}

static GLOBAL_CONFIG: OnceCell<Config> = OnceCell::new();

impl Config {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Config> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("failed to read config: {}", path.display()))?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn init_from_file(path: impl AsRef<Path>) -> Result<&'static Config> {
        let config = Self::from_file(path)?;
        Ok(GLOBAL_CONFIG.get_or_init(|| config))
    }

    pub fn global() -> Option<&'static Config> {
        GLOBAL_CONFIG.get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_minimal() {
        let src = r#"
            [system]
            output_directory = "/tmp/arbiter"
            identity_switch = "skip-unprivileged"

            [hard_limit]
            cpu_time = "10s"
            memory = "1G"

            [judge]
            solution = "main.c"
            input = "1.in"
            hint = "1.out"
            time_limit = "500m"
        "#;
        let config: Config = toml::from_str(src).unwrap();
        config.validate().unwrap();
        assert_eq!(config.system.backend, BackendKind::Local);
        assert_eq!(config.system.identity_switch, IdentityPolicy::SkipUnprivileged);
        assert_eq!(config.systemd.poll_interval_ms, 100);
        assert_eq!(config.judge.time_limit, Some(Duration::from_millis(500)));
        assert!(config.judge.case_sensitive);

        let limits = config.hard_limit.to_limits();
        assert_eq!(limits.cpu_time(), Some(Duration::from_secs(10)));
        assert_eq!(limits.memory(), Some(1 << 30));
        assert_eq!(limits.pids(), None);
    }

    #[test]
    fn reject_poll_interval() {
        let src = r#"
            [system]
            output_directory = "/tmp/arbiter"

            [systemd]
            poll_interval_ms = 1

            [judge]
            solution = "main.c"
            input = "1.in"
            hint = "1.out"
        "#;
        let config: Config = toml::from_str(src).unwrap();
        assert!(config.validate().is_err());
    }
}
