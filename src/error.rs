//! Error and result-code types shared by every scheme operation.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Closed result-code set reported to the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultCode {
    Ok,
    Unauthorized,
    Parameter,
    NotFound,
    Error,
}

impl std::fmt::Display for ResultCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResultCode::Ok => write!(f, "ok"),
            ResultCode::Unauthorized => write!(f, "unauthorized"),
            ResultCode::Parameter => write!(f, "parameter"),
            ResultCode::NotFound => write!(f, "not_found"),
            ResultCode::Error => write!(f, "error"),
        }
    }
}

/// Errors produced by the certificate scheme.
///
/// The message carried by [`SchemeError::Unauthorized`] is meant for logs
/// only; callers facing end users should surface [`SchemeError::code`].
#[derive(Debug, Error)]
pub enum SchemeError {
    /// Malformed input, invalid configuration, duplicate registration or a
    /// command the current storage mode does not support.
    #[error("Invalid parameter: {0}")]
    Parameter(String),

    /// Authentication failed.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// A lookup that expected an existing registry row found none.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Failure reported by the storage or user-directory collaborator.
    #[error("Storage error: {0:#}")]
    Storage(#[source] anyhow::Error),

    /// Crypto or validation-engine failure not attributable to the input.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl SchemeError {
    /// Result code for this error.
    pub fn code(&self) -> ResultCode {
        match self {
            SchemeError::Parameter(_) => ResultCode::Parameter,
            SchemeError::Unauthorized(_) => ResultCode::Unauthorized,
            SchemeError::NotFound(_) => ResultCode::NotFound,
            SchemeError::Storage(_) | SchemeError::Internal(_) => ResultCode::Error,
        }
    }

    /// Re-map a registry miss on a caller-supplied identifier.
    pub fn not_found_as_parameter(self) -> Self {
        match self {
            SchemeError::NotFound(msg) => SchemeError::Parameter(msg),
            other => other,
        }
    }

    pub(crate) fn unauthorized(reason: impl Into<String>) -> Self {
        SchemeError::Unauthorized(reason.into())
    }
}

/// Result alias for scheme operations.
pub type SchemeResult<T> = Result<T, SchemeError>;

/// Map any scheme result to its result code.
pub fn result_code<T>(result: &SchemeResult<T>) -> ResultCode {
    match result {
        Ok(_) => ResultCode::Ok,
        Err(e) => e.code(),
    }
}
