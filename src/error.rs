//! Error taxonomy for the armflow core
//!
//! Edit-time faults (registry edits, document import, validation) are returned
//! synchronously to the caller. Step-level faults never cross the step boundary
//! as raw errors: the sequencer logs them and records the step as failed.

use thiserror::Error;

/// Errors raised by the workflow core
#[derive(Debug, Error, Clone, PartialEq)]
pub enum WorkflowError {
    #[error("step not found: {0}")]
    StepNotFound(String),

    #[error("invalid position {position} (valid range 0..={max})")]
    InvalidPosition { position: usize, max: usize },

    #[error("invalid step spec: {0}")]
    InvalidSpec(String),

    #[error("device not connected: {0}")]
    DeviceNotConnected(String),

    #[error("device busy: {0}")]
    DeviceBusy(String),

    #[error("parallel step '{step}' fans out to more than one sub-step on device '{device}'")]
    DeviceConflict { step: String, device: String },

    #[error("action failed for step '{step}': {reason}")]
    ActionFailed { step: String, reason: String },

    #[error("wait failed for step '{step}': {reason}")]
    WaitTimeoutOrFailed { step: String, reason: String },

    #[error("malformed workflow document: {0}")]
    MalformedDocument(String),

    #[error("workflow has no steps")]
    WorkflowEmpty,

    #[error("run cancelled")]
    Cancelled,

    #[error("run exceeded {0} step executions")]
    ExecutionLimit(usize),

    #[error("workflow not registered: {0}")]
    WorkflowNotRegistered(String),

    #[error("storage error: {0}")]
    Storage(String),
}

impl From<std::io::Error> for WorkflowError {
    fn from(err: std::io::Error) -> Self {
        WorkflowError::Storage(err.to_string())
    }
}

/// Faults reported by device transports
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DeviceError {
    /// The handle does not expose the requested capability
    #[error("capability not supported: {0}")]
    Unsupported(&'static str),

    #[error("device disconnected")]
    Disconnected,

    #[error("transport error: {0}")]
    Transport(String),
}

pub type Result<T, E = WorkflowError> = std::result::Result<T, E>;
