#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

use thiserror::Error;

/// Error code constants for type-safe error handling
pub mod code {
    pub const CLI_ERROR: &str = "CLI_ERROR";
    pub const EXISTS: &str = "EXISTS";
    pub const NOTFOUND: &str = "NOTFOUND";
    pub const INVALID: &str = "INVALID";
    pub const CONFLICT: &str = "CONFLICT";
    pub const BUSY: &str = "BUSY";
    pub const UNAUTHORIZED: &str = "UNAUTHORIZED";
    pub const DEPENDENCY: &str = "DEPENDENCY";
    pub const TIMEOUT: &str = "TIMEOUT";
    pub const INTERNAL: &str = "INTERNAL";
}

#[derive(Error, Debug)]
pub enum ForemanError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Store error: {0}")]
    StoreError(String),

    #[error("Record lock busy: {0}")]
    LockBusy(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Not authorized: {0}")]
    Unauthorized(String),

    #[error("External tool not installed: {0}")]
    ToolMissing(String),

    #[error("Operation timed out: {0}")]
    Timeout(String),

    #[error("Planner error: {0}")]
    PlanError(String),

    #[error("Escalation requested: {0}")]
    Escalated(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ForemanError {
    /// Returns the protocol error code for this error
    pub fn code(&self) -> &'static str {
        match self {
            ForemanError::ConfigError(_) => code::INVALID,
            ForemanError::StoreError(_) => code::INTERNAL,
            ForemanError::LockBusy(_) => code::BUSY,
            ForemanError::NotFound(_) => code::NOTFOUND,
            ForemanError::Conflict(_) => code::CONFLICT,
            ForemanError::Unauthorized(_) => code::UNAUTHORIZED,
            ForemanError::ToolMissing(_) => code::DEPENDENCY,
            ForemanError::Timeout(_) => code::TIMEOUT,
            ForemanError::PlanError(_) => code::INVALID,
            ForemanError::Escalated(_) => code::CONFLICT,
            ForemanError::IoError(_) => code::DEPENDENCY,
            ForemanError::SerializationError(_) => code::INVALID,
            ForemanError::Internal(_) => code::INTERNAL,
        }
    }

    /// Returns the process exit code for this error.
    ///
    /// The shell contract is narrow: 0 success, 1 fatal, 2 escalation
    /// requested, so a launching script can tell "rerun later" apart
    /// from "broken".
    pub fn exit_code(&self) -> i32 {
        match self {
            ForemanError::Escalated(_) => 2,
            _ => 1,
        }
    }
}

pub type Result<T> = std::result::Result<T, ForemanError>;

#[cfg(test)]
mod tests {
    use super::{code, ForemanError};

    #[test]
    fn escalation_is_the_only_exit_code_two() {
        assert_eq!(
            ForemanError::Escalated("guidance".to_string()).exit_code(),
            2
        );
        assert_eq!(ForemanError::ConfigError("x".to_string()).exit_code(), 1);
        assert_eq!(ForemanError::Internal("x".to_string()).exit_code(), 1);
        assert_eq!(
            ForemanError::IoError(std::io::Error::other("boom")).exit_code(),
            1
        );
    }

    #[test]
    fn protocol_codes_are_stable() {
        assert_eq!(
            ForemanError::NotFound("t".to_string()).code(),
            code::NOTFOUND
        );
        assert_eq!(
            ForemanError::Conflict("t".to_string()).code(),
            code::CONFLICT
        );
        assert_eq!(ForemanError::LockBusy("t".to_string()).code(), code::BUSY);
        assert_eq!(
            ForemanError::Unauthorized("t".to_string()).code(),
            code::UNAUTHORIZED
        );
        assert_eq!(
            ForemanError::ToolMissing("semgrep".to_string()).code(),
            code::DEPENDENCY
        );
    }
}
