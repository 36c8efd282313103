//! Action trees
//!
//! The worker side registers a nested tree of named async callables.
//! At startup the dispatcher flattens the tree into a dotted-path table;
//! registering the same path twice keeps the later entry.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};

use spindle_protocol::{Fault, Payload};

use crate::context::ActionContext;

/// What an action invocation produces.
pub type ActionResult = Result<Payload, ActionError>;

/// A registered action callable.
pub type ActionFn =
    Arc<dyn Fn(ActionContext, Vec<Payload>) -> BoxFuture<'static, ActionResult> + Send + Sync>;

/// An action failure.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ActionError {
    /// Failure message, reported to the caller verbatim.
    pub message: String,

    /// Optional backtrace-ish detail.
    pub stack: Option<String>,
}

impl ActionError {
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

impl fmt::Display for ActionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for ActionError {}

impl From<ActionError> for Fault {
    fn from(error: ActionError) -> Self {
        Fault {
            message: error.message,
            stack: error.stack,
        }
    }
}

impl From<&str> for ActionError {
    fn from(message: &str) -> Self {
        ActionError::new(message)
    }
}

impl From<String> for ActionError {
    fn from(message: String) -> Self {
        ActionError::new(message)
    }
}

enum ActionNode {
    Leaf(ActionFn),
    Scope(Actions),
}

/// A nested tree of named actions.
///
/// # Example
///
/// ```ignore
/// let actions = Actions::new()
///     .action("add", |_cx, args| async move {
///         let sum: i64 = args.iter().filter_map(Payload::as_int).sum();
///         Ok(Payload::Int(sum))
///     })
///     .scope(
///         "math",
///         Actions::new().action("mul", |_cx, args| async move { /* ... */ }),
///     );
/// ```
#[derive(Default, Clone)]
pub struct Actions {
    entries: Vec<(String, ActionNode)>,
}

impl Clone for ActionNode {
    fn clone(&self) -> Self {
        match self {
            ActionNode::Leaf(f) => ActionNode::Leaf(Arc::clone(f)),
            ActionNode::Scope(inner) => ActionNode::Scope(inner.clone()),
        }
    }
}

impl Actions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an action leaf.
    pub fn action<F, Fut>(mut self, name: impl Into<String>, action: F) -> Self
    where
        F: Fn(ActionContext, Vec<Payload>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ActionResult> + Send + 'static,
    {
        let action: ActionFn = Arc::new(move |cx, args| Box::pin(action(cx, args)));
        self.entries.push((name.into(), ActionNode::Leaf(action)));
        self
    }

    /// Nest a named scope of actions.
    pub fn scope(mut self, name: impl Into<String>, actions: Actions) -> Self {
        self.entries.push((name.into(), ActionNode::Scope(actions)));
        self
    }

    /// Flatten the tree into a dotted-path table. Last write wins on
    /// colliding paths.
    pub fn flatten(&self) -> HashMap<String, ActionFn> {
        let mut table = HashMap::new();
        self.flatten_into("", &mut table);
        table
    }

    fn flatten_into(&self, prefix: &str, table: &mut HashMap<String, ActionFn>) {
        for (name, node) in &self.entries {
            let path = if prefix.is_empty() {
                name.clone()
            } else {
                format!("{prefix}.{name}")
            };
            match node {
                ActionNode::Leaf(action) => {
                    table.insert(path, Arc::clone(action));
                }
                ActionNode::Scope(inner) => inner.flatten_into(&path, table),
            }
        }
    }

    /// Number of registered leaves across the whole tree.
    pub fn len(&self) -> usize {
        self.flatten().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl fmt::Debug for Actions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut paths: Vec<_> = self.flatten().into_keys().collect();
        paths.sort();
        f.debug_struct("Actions").field("paths", &paths).finish()
    }
}
