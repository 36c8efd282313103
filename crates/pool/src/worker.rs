//! Worker lifecycle seam
//!
//! The scheduler creates workers through a [`WorkerLauncher`] and owns
//! them as [`WorkerRecord`]s. How a worker actually runs (an in-runtime
//! task, a dedicated thread) is the launcher's business; the scheduler
//! only ever sees the port and a [`WorkerHost`] it can terminate.

use tokio::task::JoinHandle;

use spindle_protocol::{PortSender, WirePort};

/// A freshly launched worker: the pool-side port end and the handle that
/// terminates it.
pub struct LaunchedWorker {
    pub port: WirePort,
    pub host: WorkerHost,
}

/// Creates workers on demand.
///
/// The pool calls `launch` lazily as admissions need workers, and again
/// when a crashed or terminated worker must be replaced. Implementations
/// must hand every launched worker a fresh port pair.
pub trait WorkerLauncher: Send + Sync + 'static {
    fn launch(&self) -> LaunchedWorker;
}

/// Terminates one worker's execution context.
///
/// Termination is abort-based: an in-runtime worker is cancelled at its
/// next await point, and a dedicated-thread worker exits once its port
/// closes. A busy-looping action cannot be preempted; its late frames
/// are ignored by correlation id.
pub struct WorkerHost {
    kind: HostKind,
}

enum HostKind {
    Task(JoinHandle<()>),
    Thread(std::thread::JoinHandle<()>),
    Detached,
}

impl WorkerHost {
    /// A worker running as a task on the current runtime.
    pub fn from_task(handle: JoinHandle<()>) -> Self {
        Self {
            kind: HostKind::Task(handle),
        }
    }

    /// A worker running on its own OS thread.
    pub fn from_thread(handle: std::thread::JoinHandle<()>) -> Self {
        Self {
            kind: HostKind::Thread(handle),
        }
    }

    /// A worker with no handle to terminate (it already failed to start,
    /// or something else owns its lifetime).
    pub fn detached() -> Self {
        Self {
            kind: HostKind::Detached,
        }
    }

    /// Stop the worker. In-runtime workers are aborted; thread workers
    /// are left to exit on their own once the pool drops its port end.
    pub fn terminate(self) {
        match self.kind {
            HostKind::Task(handle) => handle.abort(),
            HostKind::Thread(_) | HostKind::Detached => {}
        }
    }
}

impl std::fmt::Debug for WorkerHost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match self.kind {
            HostKind::Task(_) => "task",
            HostKind::Thread(_) => "thread",
            HostKind::Detached => "detached",
        };
        f.debug_struct("WorkerHost").field("kind", &kind).finish()
    }
}

/// Scheduler-side bookkeeping for one live worker.
pub(crate) struct WorkerRecord {
    pub sender: PortSender,
    pub host: WorkerHost,
    /// Forwards inbound frames into the scheduler mailbox.
    pub pump: JoinHandle<()>,
    /// Armed only while the worker sits in the available list and the
    /// pool has a nonzero idle timeout.
    pub idle_timer: Option<JoinHandle<()>>,
}

impl WorkerRecord {
    pub fn cancel_idle_timer(&mut self) {
        if let Some(timer) = self.idle_timer.take() {
            timer.abort();
        }
    }

    pub fn terminate(mut self) {
        self.cancel_idle_timer();
        self.pump.abort();
        self.host.terminate();
    }
}
