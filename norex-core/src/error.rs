//! Error types for the Norex core
//!
//! Each concern gets its own enum so callers can tell a command that never
//! started apart from a rejected request or a missing log file. A non-zero
//! exit is *not* an error anywhere in this crate: it is a normal
//! [`CommandResult`](crate::runner::CommandResult).

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::model::ServiceId;

/// The external command could not be run to completion
#[derive(Debug, Error)]
pub enum RunnerError {
    /// Binary missing, permission denied, etc.
    #[error("failed to spawn `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
    /// Command did not finish within its deadline and was killed
    #[error("`{command}` timed out after {timeout:?}")]
    Timeout { command: String, timeout: Duration },
}

/// A requested action did not pass the allow-list
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ActionError {
    #[error("command not allowed: {command}")]
    Rejected { command: String },
    #[error("invalid runtime reference: {reference:?}")]
    InvalidRuntimeRef { reference: String },
}

/// Audit log access errors
#[derive(Debug, Error)]
pub enum AuditError {
    #[error("log I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid log file name: {name:?}")]
    InvalidName { name: String },
    #[error("log file not found: {name}")]
    NotFound { name: String },
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("service id must not be empty")]
    EmptyServiceId,
    #[error("service '{service}' has no container name")]
    EmptyContainer { service: ServiceId },
    #[error("duplicate service id '{service}'")]
    DuplicateService { service: ServiceId },
    #[error("container '{container}' is used by more than one service")]
    DuplicateContainer { container: String },
    #[error("service '{service}': {source}")]
    InvalidContainer {
        service: ServiceId,
        #[source]
        source: ActionError,
    },
    #[error("{field} must be greater than zero")]
    ZeroDuration { field: &'static str },
    #[error("no config file found, searched: {searched:?}")]
    NotFound { searched: Vec<PathBuf> },
}

/// Errors surfaced through the [`Bridge`](crate::bridge::Bridge) invocation surface
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("unknown service: {id}")]
    UnknownService { id: ServiceId },
    #[error(transparent)]
    Action(#[from] ActionError),
    #[error(transparent)]
    Runner(#[from] RunnerError),
    #[error(transparent)]
    Audit(#[from] AuditError),
    #[error("path not found: {name}")]
    PathNotFound { name: String },
    #[error("container {container} not found")]
    ContainerLogs { container: String },
}
