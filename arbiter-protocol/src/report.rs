//! Serializable result tree handed to graders.

use crate::status::Status;

use std::collections::BTreeMap;

use serde::ser::{Serialize, SerializeMap, Serializer};

#[derive(Debug, Clone, serde::Serialize)]
pub struct CommandReport {
    pub status: Option<Status>,
    pub args: Vec<String>,
    pub returncode: i32,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub work_directory: Option<String>,

    pub environment: BTreeMap<String, String>,
    pub limits: BTreeMap<String, String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub stdin: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stdout: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stderr: Option<String>,

    pub cpu_time: String,
    pub real_time: String,
    pub memory: String,
    pub gpu_time: String,
    pub gpu_memory: String,
}

#[derive(Debug, Clone, serde::Serialize)]
#[serde(untagged)]
pub enum Report {
    Command(Box<CommandReport>),
    Dict(DictReport),
    Text(String),
    Integer(i64),
    Float(f64),
}

/// An ordered mapping, serialized with `status` first and the entries in insertion order.
#[derive(Debug, Clone, Default)]
pub struct DictReport {
    pub status: Option<Status>,
    pub entries: Vec<(String, Report)>,
}

impl Report {
    pub fn status(&self) -> Option<Status> {
        match self {
            Report::Command(c) => c.status,
            Report::Dict(d) => d.status,
            _ => None,
        }
    }
}

impl DictReport {
    pub fn get(&self, key: &str) -> Option<&Report> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn to_json_pretty(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

impl Serialize for DictReport {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len() + 1))?;
        map.serialize_entry("status", &self.status)?;
        for (key, value) in &self.entries {
            map.serialize_entry(key, value)?;
        }
        map.end()
    }
}
