//! Frames exchanged between the pool and a worker
//!
//! Every frame carries the task's correlation id. The pool posts
//! `Request` and `Release`; the worker answers with `Retained`, `Event`,
//! `Result`, or `Error`.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::payload::Payload;

/// A protocol frame.
#[derive(Debug)]
pub enum Frame {
    /// Invoke the action at `path` with `args`.
    Request {
        id: Uuid,
        path: String,
        args: Vec<Payload>,
    },
    /// Ask the worker to end a retained task.
    Release { id: Uuid },
    /// The worker acknowledges that the task is retained.
    Retained { id: Uuid },
    /// A task-scoped event emitted by the executing action.
    Event {
        id: Uuid,
        event: String,
        data: Payload,
    },
    /// Successful settlement.
    Result { id: Uuid, result: Payload },
    /// Failed settlement.
    Error { id: Uuid, error: Fault },
}

impl Frame {
    /// The correlation id this frame belongs to.
    pub fn id(&self) -> Uuid {
        match self {
            Frame::Request { id, .. }
            | Frame::Release { id }
            | Frame::Retained { id }
            | Frame::Event { id, .. }
            | Frame::Result { id, .. }
            | Frame::Error { id, .. } => *id,
        }
    }
}

/// A worker-side failure description carried by [`Frame::Error`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Fault {
    /// Human-readable failure message.
    pub message: String,

    /// Worker-side backtrace, when one was captured.
    pub stack: Option<String>,
}

impl Fault {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            stack: None,
        }
    }

    pub fn with_stack(mut self, stack: impl Into<String>) -> Self {
        self.stack = Some(stack.into());
        self
    }
}

impl std::fmt::Display for Fault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for Fault {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_id() {
        let id = Uuid::now_v7();
        let frame = Frame::Request {
            id,
            path: "math.add".into(),
            args: vec![],
        };
        assert_eq!(frame.id(), id);

        let frame = Frame::Release { id };
        assert_eq!(frame.id(), id);
    }

    #[test]
    fn test_fault_display() {
        let fault = Fault::new("boom");
        assert_eq!(fault.to_string(), "boom");
        assert!(fault.stack.is_none());

        let fault = Fault::new("boom").with_stack("at line 1");
        assert_eq!(fault.stack.as_deref(), Some("at line 1"));
    }

    #[test]
    fn test_fault_serialization() {
        let fault = Fault::new("bad input").with_stack("trace");
        let json = serde_json::to_string(&fault).unwrap();
        let parsed: Fault = serde_json::from_str(&json).unwrap();
        assert_eq!(fault, parsed);
    }
}
