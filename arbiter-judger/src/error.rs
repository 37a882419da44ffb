use arbiter_protocol::error::ErrorCode;

use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum JudgeError {
    #[error("prerequirement of {step} failed: {requirement}")]
    Prerequirement { step: String, requirement: String },

    #[error("invalid {expected} path: {}", path.display())]
    InvalidPath {
        path: PathBuf,
        expected: &'static str,
    },

    #[error("duplicate key: {key}")]
    DuplicateKey { key: String },

    #[error("unresolved variable: {name}")]
    UnresolvedVariable { name: String },

    #[error("{what} is not bound to a name")]
    NotBound { what: &'static str },

    #[error("cannot switch identity to {user} without privileges")]
    IdentityUnavailable { user: String },

    #[error("background process not found: {name}")]
    BackgroundNotFound { name: String },

    #[error("step is not supported: {what}")]
    NotSupported { what: String },
}

impl JudgeError {
    pub fn error_code(&self) -> ErrorCode {
        match self {
            JudgeError::Prerequirement { .. } => ErrorCode::PrerequirementFailed,
            JudgeError::InvalidPath { .. }
            | JudgeError::DuplicateKey { .. }
            | JudgeError::UnresolvedVariable { .. }
            | JudgeError::NotBound { .. }
            | JudgeError::BackgroundNotFound { .. } => ErrorCode::InvalidStep,
            JudgeError::IdentityUnavailable { .. } => ErrorCode::BackendFailure,
            JudgeError::NotSupported { .. } => ErrorCode::NotSupported,
        }
    }
}

/// Maps any error chain to the code reported to graders.
pub fn error_code_of(err: &anyhow::Error) -> ErrorCode {
    match err.downcast_ref::<JudgeError>() {
        Some(e) => e.error_code(),
        None => ErrorCode::UnknownError,
    }
}
