//! Error types shared by the RAC pipeline
//!
//! Only configuration problems reach callers as hard errors. Invocation and
//! tool failures are carried up to the repository, which logs them and
//! degrades to empty results.

use std::time::Duration;
use thiserror::Error;

/// Failure to obtain any output from the `rac` executable
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum InvocationError {
    #[error("rac executable not found: {0}")]
    NotFound(String),

    #[error("permission denied running {0}")]
    PermissionDenied(String),

    #[error("rac did not finish within {0:?}")]
    Timeout(Duration),

    #[error("failed to spawn rac: {0}")]
    Spawn(String),
}

/// Failure of a single record-kind fetch
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
    #[error(transparent)]
    Invocation(#[from] InvocationError),

    /// rac ran but exited non-zero; `message` is its decoded stderr
    #[error("rac exited with code {code}: {message}")]
    Tool { code: i32, message: String },
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("rac.host must not be empty")]
    EmptyHost,

    #[error("{field} must be a non-zero port")]
    ZeroPort { field: &'static str },

    #[error("{field} must be greater than zero")]
    ZeroTimeout { field: &'static str },

    #[error("{field} must not be negative (got {value})")]
    NegativeMinutes { field: &'static str, value: i64 },

    #[error("{field} must be at most one year in minutes (got {value})")]
    MinutesTooLarge { field: &'static str, value: i64 },

    #[error("invalid value {value:?} for environment variable {name}")]
    InvalidEnv { name: &'static str, value: String },
}
