//! Task failure taxonomy
//!
//! Every admitted task settles exactly once; these are the failure
//! shapes a settlement can carry. The display strings are stable and
//! user-visible.

use spindle_protocol::Fault;

/// Why a task failed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TaskError {
    /// The task's abort signal fired.
    #[error("task aborted")]
    Aborted,

    /// The task's timeout elapsed while it was executing.
    #[error("task timed out after {0}ms")]
    TimedOut(u64),

    /// The pool was draining when the task was admitted, or the task was
    /// still queued when shutdown began.
    #[error("pool closing")]
    Closing,

    /// The scheduler was already gone when the task was submitted.
    #[error("pool is shutting down")]
    ShutDown,

    /// The overflow queue was full at admission.
    #[error("pool queue full")]
    QueueFull,

    /// The action itself failed (including unresolvable paths).
    #[error("{message}")]
    Action {
        message: String,
        stack: Option<String>,
    },

    /// The worker's transport failed while the task was in flight.
    #[error("{0}")]
    Worker(String),
}

impl TaskError {
    /// Wrap a worker-side fault.
    pub fn action(fault: Fault) -> Self {
        TaskError::Action {
            message: fault.message,
            stack: fault.stack,
        }
    }

    /// Wrap a transport failure, substituting the stable fallback when
    /// the transport reported no message.
    pub fn worker(message: Option<String>) -> Self {
        TaskError::Worker(
            message
                .filter(|m| !m.is_empty())
                .unwrap_or_else(|| "worker error".to_string()),
        )
    }
}
