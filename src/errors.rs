/*!
 * Error types for the gcc-relay workflow.
 *
 * `GatewayError` describes what went wrong at the service boundary, while
 * `WorkflowError` is the taxonomy the orchestrator reports to its callers.
 * Both use the thiserror crate for ergonomic error definitions.
 */

use std::io;

use thiserror::Error;

use crate::model::RunState;

/// Errors raised by a service gateway implementation
#[derive(Error, Debug)]
pub enum GatewayError {
    /// Connectivity failure, timeout or broken response stream
    #[error("Transport error: {0}")]
    Transport(String),

    /// Credentials were rejected or the session expired
    #[error("Authentication error: {0}")]
    Authentication(String),

    /// The call reached the service but it reported a business-level failure
    #[error("Service responded with error: {status} - {message}")]
    Service {
        /// Status reported by the service
        status: u16,
        /// Error message from the service
        message: String,
    },

    /// The response could not be decoded
    #[error("Failed to parse service response: {0}")]
    Parse(String),

    /// Local file access needed by the gateway failed
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl From<reqwest::Error> for GatewayError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_decode() {
            Self::Parse(error.to_string())
        } else {
            Self::Transport(error.to_string())
        }
    }
}

/// Errors surfaced by the upload/submit/poll/retrieve workflow
#[derive(Error, Debug)]
pub enum WorkflowError {
    /// Malformed input, detected before any network call
    #[error("Validation error: {0}")]
    Validation(String),

    /// Connectivity or authentication failure at the gateway
    #[error("Transport error while {context}: {message}")]
    Transport { context: String, message: String },

    /// The service rejected the request
    #[error("Service error while {context}: {message}")]
    Service { context: String, message: String },

    /// Filesystem failure on the source or destination side
    #[error("Local I/O error while {context}: {source}")]
    LocalIo {
        context: String,
        #[source]
        source: io::Error,
    },

    /// A task never reached a terminal state within the polling budget
    #[error("Task [{task_id}] of job [{job_id}] did not reach a terminal state after {polls} poll(s)")]
    Timeout {
        task_id: String,
        job_id: String,
        polls: u32,
    },

    /// The surrounding process asked the run to stop
    #[error("Run cancelled")]
    Cancelled,

    #[error("Invalid state transition from {from} to {to}")]
    InvalidTransition { from: RunState, to: RunState },
}

impl WorkflowError {
    /// Map a gateway failure onto the workflow taxonomy, keeping the stage context
    pub fn from_gateway(context: impl Into<String>, error: GatewayError) -> Self {
        let context = context.into();
        match error {
            GatewayError::Transport(message) | GatewayError::Authentication(message) => {
                Self::Transport { context, message }
            }
            GatewayError::Service { status, message } => Self::Service {
                context,
                message: format!("{} - {}", status, message),
            },
            GatewayError::Parse(message) => Self::Service { context, message },
            GatewayError::Io(source) => Self::LocalIo { context, source },
        }
    }

    /// Whether the error was raised before talking to the service
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }
}
