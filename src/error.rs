//! Fatal errors raised while preparing a scan.
//!
//! Everything here aborts the run before a single connection is attempted.
//! Failures of individual connection attempts are not errors; they are
//! reported as an [`Outcome`](crate::scanner::Outcome).
use thiserror::Error;

/// Errors that stop a run before the scan engine is started.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ScanError {
    /// The target specification resolved to no address at all.
    #[error("invalid target: {0}")]
    InvalidTarget(String),

    /// The port specification matched no syntax or left no valid port.
    #[error("invalid ports: {0}")]
    InvalidPortSpec(String),

    /// The configuration file exists but could not be read or parsed.
    #[error("invalid configuration file: {0}")]
    Config(String),
}
