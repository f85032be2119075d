//! Error types for TinyHive.

use std::time::Duration;

use thiserror::Error;

use crate::agent::{TaskExecutionError, WorkerFailure};
use crate::engine::JobId;
use crate::registry::AgentId;
use crate::trust::Denial;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid parent: {0} is not a live master")]
    InvalidParent(AgentId),

    #[error("Communication denied: {0}")]
    CommunicationDenied(Box<Denial>),

    #[error("RPC '{method}' timed out after {}ms (correlation {correlation_id})", .timeout.as_millis())]
    RpcTimeout {
        method: String,
        correlation_id: String,
        timeout: Duration,
    },

    #[error("RPC '{method}' failed: {message}")]
    RpcFailed { method: String, message: String },

    #[error("Task execution failed: {0}")]
    TaskExecution(#[from] TaskExecutionError),

    #[error("Map phase failed: {failed} workers failed")]
    MapPhaseFailed {
        failed: usize,
        failures: Vec<WorkerFailure>,
    },

    #[error("Unknown agent: {0}")]
    UnknownAgent(AgentId),

    /// Failure raised by a caller's reduce function, passed through as-is.
    #[error(transparent)]
    Reduce(anyhow::Error),

    #[error("Job {0} cancelled")]
    Cancelled(JobId),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// The denial detail, when this is a trust-boundary rejection.
    pub fn denial(&self) -> Option<&Denial> {
        match self {
            Error::CommunicationDenied(denial) => Some(denial.as_ref()),
            _ => None,
        }
    }
}
