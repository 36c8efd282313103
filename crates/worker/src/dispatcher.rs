//! The worker-side dispatcher
//!
//! Serves one port: resolves request paths over the flattened action
//! table, runs actions, and answers every request with exactly one of
//! retained / result / error. Holds no scheduling state; the pool never
//! has more than one request in flight per worker.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use futures::FutureExt;
use tokio::task::JoinSet;
use tracing::{debug, info, instrument};
use uuid::Uuid;

use spindle_protocol::{collect_transferables, Fault, Frame, Payload, PortSender, WirePort};

use crate::actions::{ActionFn, Actions};
use crate::context::{ActionContext, CleanupFn};

/// Cleanups registered by retained invocations, keyed by task id.
type RetainedMap = Arc<Mutex<HashMap<Uuid, CleanupFn>>>;

/// Serve the given port until it closes.
///
/// Each request runs inside a `JoinSet`, so dropping the dispatcher
/// (worker termination) aborts whatever is executing.
#[instrument(skip_all)]
pub async fn serve(port: WirePort, actions: &Actions) {
    let table = actions.flatten();
    let (sender, mut receiver) = port.split();
    let retained: RetainedMap = Arc::new(Mutex::new(HashMap::new()));
    let mut running = JoinSet::new();

    info!(actions = table.len(), "worker dispatcher started");

    loop {
        tokio::select! {
            envelope = receiver.recv() => {
                let Some(envelope) = envelope else { break };
                match envelope.frame {
                    Frame::Request { id, path, args } => {
                        handle_request(&table, &sender, &retained, &mut running, id, path, args);
                    }
                    Frame::Release { id } => {
                        handle_release(&sender, &retained, &mut running, id);
                    }
                    other => {
                        debug!(task = %other.id(), "ignoring unexpected inbound frame");
                    }
                }
            }
            Some(finished) = running.join_next(), if !running.is_empty() => {
                if let Err(join_error) = finished {
                    debug!(%join_error, "action task ended abnormally");
                }
            }
        }
    }

    debug!("worker dispatcher stopped");
}

fn handle_request(
    table: &HashMap<String, ActionFn>,
    sender: &PortSender,
    retained: &RetainedMap,
    running: &mut JoinSet<()>,
    id: Uuid,
    path: String,
    args: Vec<Payload>,
) {
    let Some(action) = table.get(&path) else {
        debug!(task = %id, %path, "request for unknown path");
        let _ = sender.post(
            Frame::Error {
                id,
                error: Fault::new(format!("path does not exist '{path}'")),
            },
            Vec::new(),
        );
        return;
    };

    let action = Arc::clone(action);
    let sender = sender.clone();
    let retained = Arc::clone(retained);
    running.spawn(async move {
        let cx = ActionContext::new(id, sender.clone());
        let outcome = std::panic::AssertUnwindSafe(action(cx.clone(), args))
            .catch_unwind()
            .await;

        if cx.is_released() {
            // The action already settled the task through release();
            // whatever it returned is ignored.
            return;
        }

        match outcome {
            Ok(Ok(result)) => {
                if cx.is_retained() {
                    if let Some(cleanup) = cx.take_cleanup() {
                        retained.lock().unwrap().insert(id, cleanup);
                    }
                    let _ = sender.post(Frame::Retained { id }, Vec::new());
                } else {
                    let transfer = collect_transferables(&result);
                    let _ = sender.post(Frame::Result { id, result }, transfer);
                }
            }
            Ok(Err(error)) => {
                let _ = sender.post(
                    Frame::Error {
                        id,
                        error: error.into(),
                    },
                    Vec::new(),
                );
            }
            Err(panic) => {
                let _ = sender.post(
                    Frame::Error {
                        id,
                        error: Fault::new(panic_message(panic.as_ref())),
                    },
                    Vec::new(),
                );
            }
        }
    });
}

fn handle_release(
    sender: &PortSender,
    retained: &RetainedMap,
    running: &mut JoinSet<()>,
    id: Uuid,
) {
    let cleanup = retained.lock().unwrap().remove(&id);
    let sender = sender.clone();
    running.spawn(async move {
        match cleanup {
            Some(cleanup) => match cleanup().await {
                Ok(result) => {
                    let transfer = collect_transferables(&result);
                    let _ = sender.post(Frame::Result { id, result }, transfer);
                }
                Err(error) => {
                    let _ = sender.post(
                        Frame::Error {
                            id,
                            error: error.into(),
                        },
                        Vec::new(),
                    );
                }
            },
            None => {
                let _ = sender.post(
                    Frame::Result {
                        id,
                        result: Payload::Null,
                    },
                    Vec::new(),
                );
            }
        }
    });
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "worker action panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::ActionError;
    use spindle_protocol::port_pair;

    /// Drive a dispatcher over a raw port and return the pool-side end.
    fn serve_actions(actions: Actions) -> (PortSender, spindle_protocol::PortReceiver) {
        let (near, far) = port_pair();
        tokio::spawn(async move { serve(far, &actions).await });
        near.split()
    }

    fn request(id: Uuid, path: &str, args: Vec<Payload>) -> Frame {
        Frame::Request {
            id,
            path: path.into(),
            args,
        }
    }

    #[tokio::test]
    async fn test_resolves_and_replies() {
        let actions = Actions::new().action("double", |_cx, args| async move {
            let n = args.first().and_then(Payload::as_int).unwrap_or(0);
            Ok(Payload::Int(n * 2))
        });
        let (tx, mut rx) = serve_actions(actions);

        let id = Uuid::now_v7();
        tx.post(request(id, "double", vec![21.into()]), vec![]).unwrap();

        let reply = rx.recv().await.unwrap().frame;
        assert!(matches!(reply, Frame::Result { id: got, result } if got == id && result.as_int() == Some(42)));
    }

    #[tokio::test]
    async fn test_unknown_path_replies_error() {
        let (tx, mut rx) = serve_actions(Actions::new());

        let id = Uuid::now_v7();
        tx.post(request(id, "ghost.path", vec![]), vec![]).unwrap();

        let reply = rx.recv().await.unwrap().frame;
        match reply {
            Frame::Error { error, .. } => {
                assert_eq!(error.message, "path does not exist 'ghost.path'");
            }
            other => panic!("expected error frame, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_action_error_becomes_error_frame() {
        let actions = Actions::new().action("bad", |_cx, _args| async {
            Err(ActionError::new("invalid input").with_stack("bad()"))
        });
        let (tx, mut rx) = serve_actions(actions);

        tx.post(request(Uuid::now_v7(), "bad", vec![]), vec![]).unwrap();

        let reply = rx.recv().await.unwrap().frame;
        match reply {
            Frame::Error { error, .. } => {
                assert_eq!(error.message, "invalid input");
                assert_eq!(error.stack.as_deref(), Some("bad()"));
            }
            other => panic!("expected error frame, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_panic_becomes_error_frame() {
        let actions = Actions::new().action("explode", |_cx, _args| async {
            panic!("blew up");
        });
        let (tx, mut rx) = serve_actions(actions);

        tx.post(request(Uuid::now_v7(), "explode", vec![]), vec![])
            .unwrap();

        let reply = rx.recv().await.unwrap().frame;
        assert!(matches!(reply, Frame::Error { error, .. } if error.message == "blew up"));
    }

    #[tokio::test]
    async fn test_retained_flow_with_cleanup() {
        let actions = Actions::new().action("watch", |cx: ActionContext, _args| async move {
            cx.retain_with(|| async { Ok(Payload::Text("drained".into())) });
            Ok(Payload::Null)
        });
        let (tx, mut rx) = serve_actions(actions);

        let id = Uuid::now_v7();
        tx.post(request(id, "watch", vec![]), vec![]).unwrap();

        let reply = rx.recv().await.unwrap().frame;
        assert!(matches!(reply, Frame::Retained { id: got } if got == id));

        tx.post(Frame::Release { id }, vec![]).unwrap();
        let reply = rx.recv().await.unwrap().frame;
        assert!(matches!(reply, Frame::Result { result, .. } if result.as_str() == Some("drained")));
    }

    #[tokio::test]
    async fn test_release_without_cleanup_replies_null() {
        let actions = Actions::new().action("hold", |cx: ActionContext, _args| async move {
            cx.retain();
            Ok(Payload::Null)
        });
        let (tx, mut rx) = serve_actions(actions);

        let id = Uuid::now_v7();
        tx.post(request(id, "hold", vec![]), vec![]).unwrap();
        assert!(matches!(
            rx.recv().await.unwrap().frame,
            Frame::Retained { .. }
        ));

        tx.post(Frame::Release { id }, vec![]).unwrap();
        let reply = rx.recv().await.unwrap().frame;
        assert!(matches!(reply, Frame::Result { result, .. } if matches!(result, Payload::Null)));
    }

    #[tokio::test]
    async fn test_release_of_unknown_task_replies_null() {
        let (tx, mut rx) = serve_actions(Actions::new());

        let id = Uuid::now_v7();
        tx.post(Frame::Release { id }, vec![]).unwrap();

        let reply = rx.recv().await.unwrap().frame;
        assert!(matches!(reply, Frame::Result { id: got, result } if got == id && matches!(result, Payload::Null)));
    }

    #[tokio::test]
    async fn test_early_release_ignores_return_value() {
        let actions = Actions::new().action("stream", |cx: ActionContext, args| async move {
            let n = args.first().and_then(Payload::as_int).unwrap_or(0);
            cx.retain();
            for i in 0..n {
                cx.dispatch("progress", Payload::map([("i", i.into())]));
            }
            cx.release(Payload::Int(n));
            Ok(Payload::Text("ignored".into()))
        });
        let (tx, mut rx) = serve_actions(actions);

        let id = Uuid::now_v7();
        tx.post(request(id, "stream", vec![3.into()]), vec![]).unwrap();

        let mut seen = Vec::new();
        loop {
            let frame = rx.recv().await.unwrap().frame;
            match frame {
                Frame::Event { event, data, .. } => {
                    assert_eq!(event, "progress");
                    seen.push(data.get("i").and_then(Payload::as_int).unwrap());
                }
                Frame::Result { result, .. } => {
                    assert_eq!(result.as_int(), Some(3));
                    break;
                }
                other => panic!("unexpected frame {other:?}"),
            }
        }
        assert_eq!(seen, vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn test_result_transferables_are_reported() {
        let actions = Actions::new().action("alloc", |_cx, _args| async move {
            let buffer = spindle_protocol::BufferHandle::new(vec![0u8; 8]);
            Ok(Payload::map([("data", buffer.into())]))
        });
        let (tx, mut rx) = serve_actions(actions);

        tx.post(request(Uuid::now_v7(), "alloc", vec![]), vec![])
            .unwrap();

        let envelope = rx.recv().await.unwrap();
        assert_eq!(envelope.transfer.len(), 1);
    }
}
