use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Outcome vocabulary consumed by external graders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Status {
    Ok,
    /// runtime error or bad exit code
    Rte,
    /// time limit
    Tle,
    /// memory limit
    Mem,
    /// build error
    Cme,
    /// wrong answer
    Ans,
    /// submission rule violation
    Rul,
    /// unrecognized source type
    Ext,
    /// internal or tooling error
    Int,
    /// error reported by a tool
    Error,
}

impl Status {
    pub const ALL: [Status; 10] = [
        Status::Ok,
        Status::Rte,
        Status::Tle,
        Status::Mem,
        Status::Cme,
        Status::Ans,
        Status::Rul,
        Status::Ext,
        Status::Int,
        Status::Error,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Status::Ok => "OK",
            Status::Rte => "RTE",
            Status::Tle => "TLE",
            Status::Mem => "MEM",
            Status::Cme => "CME",
            Status::Ans => "ANS",
            Status::Rul => "RUL",
            Status::Ext => "EXT",
            Status::Int => "INT",
            Status::Error => "ERROR",
        }
    }

    pub fn is_ok(self) -> bool {
        self == Status::Ok
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown status code: {0:?}")]
pub struct ParseStatusError(String);

impl FromStr for Status {
    type Err = ParseStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Status::ALL
            .iter()
            .copied()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| ParseStatusError(s.to_owned()))
    }
}
