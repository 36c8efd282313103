//! Per-invocation context
//!
//! Every request gets a fresh [`ActionContext`]. It is the action's view
//! of the protocol: event dispatch, retention, and early release. The
//! context clones cheaply so an action can move it into tasks it spawns.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use futures::future::BoxFuture;
use std::future::Future;
use uuid::Uuid;

use spindle_protocol::{collect_transferables, Frame, Payload, PortSender};

use crate::actions::ActionResult;

/// Cleanup registered by a retained action, run when the pool releases
/// the task. Its return value settles the task.
pub(crate) type CleanupFn = Box<dyn FnOnce() -> BoxFuture<'static, ActionResult> + Send>;

/// The context handed to an executing action.
///
/// # Example
///
/// ```ignore
/// |cx: ActionContext, args| async move {
///     cx.retain_with(|| async { Ok("drained".into()) });
///     for i in 0..3 {
///         cx.dispatch("progress", Payload::map([("i", i.into())]));
///     }
///     Ok(Payload::Null)
/// }
/// ```
#[derive(Clone)]
pub struct ActionContext {
    inner: Arc<ContextInner>,
}

struct ContextInner {
    task_id: Uuid,
    port: PortSender,
    retained: AtomicBool,
    released: AtomicBool,
    cleanup: Mutex<Option<CleanupFn>>,
}

impl ActionContext {
    pub(crate) fn new(task_id: Uuid, port: PortSender) -> Self {
        Self {
            inner: Arc::new(ContextInner {
                task_id,
                port,
                retained: AtomicBool::new(false),
                released: AtomicBool::new(false),
                cleanup: Mutex::new(None),
            }),
        }
    }

    /// The correlation id of the invocation this context belongs to.
    pub fn task_id(&self) -> Uuid {
        self.inner.task_id
    }

    /// Emit a task-scoped event to the caller's handle. Transferables
    /// inside `data` move with the frame.
    pub fn dispatch(&self, event: impl Into<String>, data: Payload) {
        let transfer = collect_transferables(&data);
        let _ = self.inner.port.post(
            Frame::Event {
                id: self.inner.task_id,
                event: event.into(),
                data,
            },
            transfer,
        );
    }

    /// Mark the invocation long-lived. The dispatcher acknowledges
    /// retention once the action's initial phase returns, and the
    /// action's return value is ignored; the task settles later through
    /// [`ActionContext::release`] or a pool-side release.
    pub fn retain(&self) {
        self.inner.retained.store(true, Ordering::SeqCst);
    }

    /// Like [`ActionContext::retain`], registering a cleanup that runs
    /// when the pool releases the task. The cleanup's return value
    /// settles the task.
    pub fn retain_with<F, Fut>(&self, cleanup: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ActionResult> + Send + 'static,
    {
        self.retain();
        *self.inner.cleanup.lock().unwrap() = Some(Box::new(move || Box::pin(cleanup())));
    }

    /// Settle the task early with `result`. Later settlement attempts
    /// (including the action's own return value) are ignored.
    pub fn release(&self, result: Payload) {
        if self.inner.released.swap(true, Ordering::SeqCst) {
            return;
        }
        let transfer = collect_transferables(&result);
        let _ = self.inner.port.post(
            Frame::Result {
                id: self.inner.task_id,
                result,
            },
            transfer,
        );
    }

    pub(crate) fn is_retained(&self) -> bool {
        self.inner.retained.load(Ordering::SeqCst)
    }

    pub(crate) fn is_released(&self) -> bool {
        self.inner.released.load(Ordering::SeqCst)
    }

    pub(crate) fn take_cleanup(&self) -> Option<CleanupFn> {
        self.inner.cleanup.lock().unwrap().take()
    }
}

impl std::fmt::Debug for ActionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActionContext")
            .field("task_id", &self.inner.task_id)
            .field("retained", &self.is_retained())
            .field("released", &self.is_released())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use spindle_protocol::port_pair;

    #[tokio::test]
    async fn test_dispatch_posts_event_frame() {
        let (port, far) = port_pair();
        let (_tx, mut rx) = far.split();
        let id = Uuid::now_v7();
        let cx = ActionContext::new(id, port.sender());

        cx.dispatch("progress", Payload::Int(1));

        let envelope = rx.recv().await.unwrap();
        match envelope.frame {
            Frame::Event { id: got, event, data } => {
                assert_eq!(got, id);
                assert_eq!(event, "progress");
                assert_eq!(data.as_int(), Some(1));
            }
            other => panic!("expected event frame, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_dispatch_discovers_transferables() {
        let (port, far) = port_pair();
        let (_tx, mut rx) = far.split();
        let cx = ActionContext::new(Uuid::now_v7(), port.sender());

        let buffer = spindle_protocol::BufferHandle::new(vec![1, 2]);
        let buffer_id = buffer.id();
        cx.dispatch("chunk", Payload::map([("bytes", buffer.into())]));

        let envelope = rx.recv().await.unwrap();
        assert_eq!(envelope.transfer, vec![buffer_id]);
    }

    #[test]
    fn test_retain_flags() {
        let (port, _far) = port_pair();
        let cx = ActionContext::new(Uuid::now_v7(), port.sender());
        assert!(!cx.is_retained());

        cx.retain();
        assert!(cx.is_retained());
        assert!(cx.take_cleanup().is_none());
    }

    #[tokio::test]
    async fn test_retain_with_registers_cleanup() {
        let (port, _far) = port_pair();
        let cx = ActionContext::new(Uuid::now_v7(), port.sender());

        cx.retain_with(|| async { Ok(Payload::Int(7)) });
        assert!(cx.is_retained());

        let cleanup = cx.take_cleanup().unwrap();
        assert_eq!(cleanup().await.unwrap().as_int(), Some(7));
        assert!(cx.take_cleanup().is_none());
    }

    #[tokio::test]
    async fn test_release_settles_once() {
        let (port, far) = port_pair();
        let (_tx, mut rx) = far.split();
        let cx = ActionContext::new(Uuid::now_v7(), port.sender());

        cx.release(Payload::Int(1));
        cx.release(Payload::Int(2));
        assert!(cx.is_released());

        let envelope = rx.recv().await.unwrap();
        assert!(matches!(envelope.frame, Frame::Result { result, .. } if result.as_int() == Some(1)));

        // The second release was swallowed.
        drop(cx);
        drop(port);
        assert!(rx.recv().await.is_none());
    }
}
