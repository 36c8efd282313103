//! The pool facade
//!
//! [`Pool`] is the callable surface over the scheduler actor: routes
//! build a dotted action path segment by segment and submit tasks, and
//! the pool exposes stats and graceful shutdown.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use tracing::instrument;
use uuid::Uuid;

use spindle_protocol::Payload;

use crate::abort::AbortSignal;
use crate::config::PoolConfig;
use crate::error::TaskError;
use crate::handle::{ListenerTable, TaskHandle};
use crate::scheduler::{self, Msg, Submission};
use crate::worker::WorkerLauncher;

/// A point-in-time snapshot of the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PoolStats {
    /// Live workers.
    pub workers: usize,
    /// Workers currently bound to a task (retained included).
    pub busy: usize,
    /// Workers in the ready list.
    pub idle: usize,
    /// Tasks waiting for a worker.
    pub queued: usize,
    /// Tasks settled by a worker reply since launch.
    pub completed: u64,
}

/// Per-task scheduling options.
#[derive(Debug, Clone, Default)]
pub struct ScheduleOptions {
    /// External cancellation signal.
    pub signal: Option<AbortSignal>,
    /// Execution timeout; zero or absent disables.
    pub timeout: Option<Duration>,
}

impl ScheduleOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_signal(mut self, signal: AbortSignal) -> Self {
        self.signal = Some(signal);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// A worker pool.
///
/// # Example
///
/// ```ignore
/// use spindle_pool::{Pool, PoolConfig};
///
/// let pool = Pool::launch(launcher, PoolConfig::default().with_limit(2));
///
/// let five = pool
///     .route()
///     .path("math")
///     .path("add")
///     .call(vec![2.into(), 3.into()])
///     .await?;
///
/// pool.shutdown().await;
/// ```
#[derive(Debug, Clone)]
pub struct Pool {
    control: mpsc::UnboundedSender<Msg>,
}

impl Pool {
    /// Launch a pool over the given worker launcher.
    ///
    /// Workers are created lazily up to the configured limit, except
    /// that a pool with idle eviction disabled pre-warms to the limit.
    pub fn launch(launcher: impl WorkerLauncher, config: PoolConfig) -> Self {
        let control = scheduler::spawn(config, Arc::new(launcher));
        Self { control }
    }

    /// Start a route with default options.
    pub fn route(&self) -> Route<'_> {
        self.route_with(ScheduleOptions::default())
    }

    /// Start a route with explicit schedule options.
    pub fn route_with(&self, options: ScheduleOptions) -> Route<'_> {
        Route {
            pool: self,
            options,
            path: String::new(),
        }
    }

    /// Submit a task at a dotted path with default options.
    pub fn call(&self, path: &str, args: Vec<Payload>) -> TaskHandle {
        self.route().path(path).call(args)
    }

    /// Snapshot the pool's counters.
    pub async fn stats(&self) -> PoolStats {
        let (tx, rx) = oneshot::channel();
        if self.control.send(Msg::Stats { reply: tx }).is_err() {
            return PoolStats::default();
        }
        rx.await.unwrap_or_default()
    }

    /// Drain and stop the pool.
    ///
    /// Queued tasks fail with `pool closing`, retained tasks are asked
    /// to release, and executing tasks run to completion. Resolves once
    /// every worker is terminated. Idempotent; concurrent callers all
    /// resolve.
    #[instrument(skip(self))]
    pub async fn shutdown(&self) {
        let (tx, rx) = oneshot::channel();
        if self.control.send(Msg::Shutdown { reply: tx }).is_err() {
            // The scheduler already exited; nothing left to drain.
            return;
        }
        let _ = rx.await;
    }
}

/// An accumulating action path plus schedule options.
///
/// Each [`Route::path`] call appends a dotted segment; [`Route::call`]
/// consumes the route and submits the task, so an accumulated path can
/// never leak into a later invocation. Building a route without calling
/// it has no effect on the pool.
#[derive(Debug)]
pub struct Route<'a> {
    pool: &'a Pool,
    options: ScheduleOptions,
    path: String,
}

impl Route<'_> {
    /// Append a path segment. Dotted segments are allowed, so
    /// `.path("math.add")` and `.path("math").path("add")` are the same
    /// route.
    pub fn path(mut self, segment: &str) -> Self {
        if !self.path.is_empty() {
            self.path.push('.');
        }
        self.path.push_str(segment);
        self
    }

    /// Submit the task. The handle returns immediately, already wired
    /// to receive events, and settles when the task does.
    pub fn call(self, args: Vec<Payload>) -> TaskHandle {
        let id = Uuid::now_v7();
        let (settle_tx, settle_rx) = oneshot::channel();
        let listeners = Arc::new(ListenerTable::new());
        let handle = TaskHandle::new(
            id,
            settle_rx,
            Arc::clone(&listeners),
            self.pool.control.clone(),
        );

        let submission = Submission {
            id,
            path: self.path,
            args,
            settle: settle_tx,
            listeners,
            signal: self.options.signal,
            timeout: self.options.timeout.filter(|t| !t.is_zero()),
        };

        if let Err(unsent) = self.pool.control.send(Msg::Submit(submission)) {
            // The scheduler is gone; settle the handle locally so the
            // caller still gets exactly one settlement.
            if let Msg::Submit(submission) = unsent.0 {
                let _ = submission.settle.send(Err(TaskError::ShutDown));
            }
        }

        handle
    }
}
