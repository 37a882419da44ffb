use crate::status::Status;

use std::fmt;

use serde::{Deserialize, Serialize};

#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCode {
    UnknownError = 1000,
    NotSupported = 1001,
    InvalidStep = 1002,
    PrerequirementFailed = 1003,
    BackendFailure = 1004,
}

impl ErrorCode {
    pub fn as_status(self) -> Status {
        match self {
            ErrorCode::NotSupported => Status::Ext,
            ErrorCode::UnknownError
            | ErrorCode::InvalidStep
            | ErrorCode::PrerequirementFailed
            | ErrorCode::BackendFailure => Status::Int,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, thiserror::Error)]
pub struct ErrorInfo {
    pub code: ErrorCode,
    pub message: Option<String>,
}

impl fmt::Display for ErrorInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        <Self as fmt::Debug>::fmt(self, f)
    }
}
