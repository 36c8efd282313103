//! Task handles
//!
//! A [`TaskHandle`] is returned to the caller the moment a task is
//! submitted, before any worker has seen it. It is a future over the
//! task's single settlement and the sink for the task's event stream.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

use spindle_protocol::Payload;

use crate::error::TaskError;
use crate::scheduler::Msg;

/// A task's single settlement.
pub type Settlement = Result<Payload, TaskError>;

/// An event callback registered on a task handle.
pub type EventCallback = Box<dyn Fn(&Payload) + Send>;

/// The per-task event subscription table, shared between the handle and
/// the scheduler.
pub(crate) struct ListenerTable {
    inner: Mutex<HashMap<String, Vec<EventCallback>>>,
}

impl ListenerTable {
    pub(crate) fn new() -> Self {
        Self {
            inner: Mutex::new(HashMap::new()),
        }
    }

    pub(crate) fn add(&self, event: String, callback: EventCallback) {
        self.inner
            .lock()
            .unwrap()
            .entry(event)
            .or_default()
            .push(callback);
    }

    /// Fan an event out to the callbacks registered right now, in
    /// insertion order. Duplicate registrations fire once each.
    pub(crate) fn dispatch(&self, event: &str, data: &Payload) {
        let table = self.inner.lock().unwrap();
        if let Some(callbacks) = table.get(event) {
            for callback in callbacks {
                callback(data);
            }
        }
    }
}

/// The future-like object returned by a task submission.
///
/// Awaiting the handle yields the task's settlement. Events the worker
/// emits while the task runs are fanned out to [`TaskHandle::on`]
/// subscribers; events arriving after settlement are dropped.
///
/// # Example
///
/// ```ignore
/// let result = pool
///     .call("stream", vec![3.into()])
///     .on("progress", |data| println!("{:?}", data))
///     .await?;
/// ```
pub struct TaskHandle {
    id: Uuid,
    rx: oneshot::Receiver<Settlement>,
    listeners: Arc<ListenerTable>,
    control: mpsc::UnboundedSender<Msg>,
}

impl TaskHandle {
    pub(crate) fn new(
        id: Uuid,
        rx: oneshot::Receiver<Settlement>,
        listeners: Arc<ListenerTable>,
        control: mpsc::UnboundedSender<Msg>,
    ) -> Self {
        Self {
            id,
            rx,
            listeners,
            control,
        }
    }

    /// The task's correlation id.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Subscribe to a task event. Chainable; registering the same
    /// callback twice makes it fire twice.
    pub fn on<F>(self, event: impl Into<String>, callback: F) -> Self
    where
        F: Fn(&Payload) + Send + 'static,
    {
        self.listeners.add(event.into(), Box::new(callback));
        self
    }

    /// Ask the scheduler to release this task if the worker reported it
    /// retained. A no-op for non-retained tasks.
    pub fn release(&self) {
        let _ = self.control.send(Msg::ReleaseRequested { task: self.id });
    }
}

impl Future for TaskHandle {
    type Output = Settlement;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx).poll(cx).map(|settled| match settled {
            Ok(settlement) => settlement,
            // The scheduler went away without settling; only possible
            // once the pool has fully stopped.
            Err(_) => Err(TaskError::ShutDown),
        })
    }
}

impl std::fmt::Debug for TaskHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskHandle").field("id", &self.id).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn test_handle() -> (TaskHandle, oneshot::Sender<Settlement>) {
        let (tx, rx) = oneshot::channel();
        let (control, _) = mpsc::unbounded_channel();
        let handle = TaskHandle::new(Uuid::now_v7(), rx, Arc::new(ListenerTable::new()), control);
        (handle, tx)
    }

    #[tokio::test]
    async fn test_settles_with_value() {
        let (handle, tx) = test_handle();
        tx.send(Ok(Payload::Int(5))).unwrap();
        assert_eq!(handle.await.unwrap().as_int(), Some(5));
    }

    #[tokio::test]
    async fn test_settles_with_error() {
        let (handle, tx) = test_handle();
        tx.send(Err(TaskError::Aborted)).unwrap();
        assert_eq!(handle.await.unwrap_err(), TaskError::Aborted);
    }

    #[tokio::test]
    async fn test_dropped_sender_reads_as_shutdown() {
        let (handle, tx) = test_handle();
        drop(tx);
        assert_eq!(handle.await.unwrap_err(), TaskError::ShutDown);
    }

    #[test]
    fn test_listeners_fire_in_insertion_order() {
        let table = ListenerTable::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        let first = order.clone();
        table.add(
            "progress".into(),
            Box::new(move |_| first.lock().unwrap().push(1)),
        );
        let second = order.clone();
        table.add(
            "progress".into(),
            Box::new(move |_| second.lock().unwrap().push(2)),
        );

        table.dispatch("progress", &Payload::Null);
        assert_eq!(*order.lock().unwrap(), vec![1, 2]);
    }

    #[test]
    fn test_duplicate_subscription_fires_twice() {
        let table = ListenerTable::new();
        let hits = Arc::new(AtomicUsize::new(0));

        for _ in 0..2 {
            let hits = hits.clone();
            table.add(
                "tick".into(),
                Box::new(move |_| {
                    hits.fetch_add(1, Ordering::SeqCst);
                }),
            );
        }

        table.dispatch("tick", &Payload::Null);
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_unknown_event_is_silent() {
        let table = ListenerTable::new();
        table.dispatch("nobody-listens", &Payload::Null);
    }
}
