//! The pool scheduler
//!
//! A single actor task owns every piece of scheduler state: the live
//! workers, the LIFO available list, the pending map, the task table,
//! and the overflow queue. Everything that happens to the pool arrives
//! as a [`Msg`] in its mailbox; each message is handled to completion
//! before the next, so no field is ever observed half-updated and no
//! lock guards scheduler state.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use spindle_protocol::{collect_from_args, Frame, Payload};

use crate::abort::AbortSignal;
use crate::config::PoolConfig;
use crate::error::TaskError;
use crate::handle::{ListenerTable, Settlement};
use crate::pool::PoolStats;
use crate::worker::{WorkerLauncher, WorkerRecord};

/// Everything the facade knows about a task at submission time.
pub(crate) struct Submission {
    pub id: Uuid,
    pub path: String,
    pub args: Vec<Payload>,
    pub settle: oneshot::Sender<Settlement>,
    pub listeners: Arc<ListenerTable>,
    pub signal: Option<AbortSignal>,
    pub timeout: Option<Duration>,
}

/// The scheduler mailbox.
pub(crate) enum Msg {
    Submit(Submission),
    Frame { worker: Uuid, frame: Frame },
    WorkerGone { worker: Uuid, message: Option<String> },
    Abort { task: Uuid },
    TimedOut { task: Uuid },
    IdleExpired { worker: Uuid },
    ReleaseRequested { task: Uuid },
    Stats { reply: oneshot::Sender<PoolStats> },
    Shutdown { reply: oneshot::Sender<()> },
}

/// One admitted task, from admission to settlement.
struct TaskRecord {
    id: Uuid,
    path: String,
    /// Taken when the request frame is posted.
    args: Option<Vec<Payload>>,
    settle: Option<oneshot::Sender<Settlement>>,
    listeners: Arc<ListenerTable>,
    signal: Option<AbortSignal>,
    timeout: Option<Duration>,
    timeout_timer: Option<JoinHandle<()>>,
    abort_watch: Option<JoinHandle<()>>,
    retained: bool,
    /// Set while executing, cleared on settlement.
    worker: Option<Uuid>,
}

impl TaskRecord {
    fn new(submission: Submission) -> Self {
        Self {
            id: submission.id,
            path: submission.path,
            args: Some(submission.args),
            settle: Some(submission.settle),
            listeners: submission.listeners,
            signal: submission.signal,
            timeout: submission.timeout,
            timeout_timer: None,
            abort_watch: None,
            retained: false,
            worker: None,
        }
    }

    fn cancel_timers(&mut self) {
        if let Some(timer) = self.timeout_timer.take() {
            timer.abort();
        }
        if let Some(watch) = self.abort_watch.take() {
            watch.abort();
        }
    }

    /// Deliver the single settlement. Later calls are no-ops.
    fn settle(&mut self, outcome: Settlement) {
        if let Some(tx) = self.settle.take() {
            let _ = tx.send(outcome);
        }
    }
}

impl Drop for TaskRecord {
    fn drop(&mut self) {
        self.cancel_timers();
    }
}

/// Spawn the scheduler actor and return its mailbox.
pub(crate) fn spawn(config: PoolConfig, launcher: Arc<dyn WorkerLauncher>) -> mpsc::UnboundedSender<Msg> {
    let (tx, rx) = mpsc::unbounded_channel();
    let scheduler = Scheduler::new(config, launcher, tx.clone());
    tokio::spawn(scheduler.run(rx));
    tx
}

struct Scheduler {
    config: PoolConfig,
    launcher: Arc<dyn WorkerLauncher>,
    /// Self-handle for timers, pumps, and abort watchers.
    tx: mpsc::UnboundedSender<Msg>,
    workers: HashMap<Uuid, WorkerRecord>,
    /// LIFO: the most recently used worker is reused first, so the cold
    /// tail is what idle eviction reaps.
    available: Vec<Uuid>,
    /// worker id -> executing task id (includes retained tasks).
    pending: HashMap<Uuid, Uuid>,
    /// task id -> record, for executing and retained tasks.
    tasks: HashMap<Uuid, TaskRecord>,
    /// FIFO overflow queue.
    queue: VecDeque<TaskRecord>,
    completed: u64,
    shutting_down: bool,
    drain: Vec<oneshot::Sender<()>>,
    stopped: bool,
}

impl Scheduler {
    fn new(
        config: PoolConfig,
        launcher: Arc<dyn WorkerLauncher>,
        tx: mpsc::UnboundedSender<Msg>,
    ) -> Self {
        Self {
            config,
            launcher,
            tx,
            workers: HashMap::new(),
            available: Vec::new(),
            pending: HashMap::new(),
            tasks: HashMap::new(),
            queue: VecDeque::new(),
            completed: 0,
            shutting_down: false,
            drain: Vec::new(),
            stopped: false,
        }
    }

    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<Msg>) {
        if self.config.prewarm() {
            info!(limit = self.config.limit, "pre-warming worker pool");
            while self.workers.len() < self.config.limit {
                let worker = self.spawn_worker();
                self.available.push(worker);
            }
        }

        while let Some(msg) = rx.recv().await {
            self.handle(msg);
            if self.stopped {
                break;
            }
        }

        debug!("scheduler exited");
    }

    fn handle(&mut self, msg: Msg) {
        match msg {
            Msg::Submit(submission) => self.on_submit(submission),
            Msg::Frame { worker, frame } => self.on_frame(worker, frame),
            Msg::WorkerGone { worker, message } => self.on_worker_gone(worker, message),
            Msg::Abort { task } => self.on_abort(task),
            Msg::TimedOut { task } => self.on_timed_out(task),
            Msg::IdleExpired { worker } => self.on_idle_expired(worker),
            Msg::ReleaseRequested { task } => self.on_release_requested(task),
            Msg::Stats { reply } => {
                let _ = reply.send(self.stats());
            }
            Msg::Shutdown { reply } => self.on_shutdown(reply),
        }
    }

    // ------------------------------------------------------------------
    // Admission
    // ------------------------------------------------------------------

    fn on_submit(&mut self, submission: Submission) {
        let mut task = TaskRecord::new(submission);

        if self.shutting_down {
            task.settle(Err(TaskError::Closing));
            return;
        }

        if let Some(signal) = task.signal.as_ref() {
            if signal.is_aborted() {
                debug!(task = %task.id, "admission refused, signal already aborted");
                task.settle(Err(TaskError::Aborted));
                return;
            }
        }

        task.abort_watch = self.watch_signal(&task);
        self.dispatch_or_enqueue(task);
    }

    fn watch_signal(&self, task: &TaskRecord) -> Option<JoinHandle<()>> {
        let signal = task.signal.as_ref()?.clone();
        let tx = self.tx.clone();
        let id = task.id;
        Some(tokio::spawn(async move {
            signal.aborted().await;
            let _ = tx.send(Msg::Abort { task: id });
        }))
    }

    fn dispatch_or_enqueue(&mut self, task: TaskRecord) {
        match self.checkout_worker() {
            Some(worker) => self.dispatch(worker, task),
            None => {
                if self.queue.len() >= self.config.queue_capacity {
                    let mut task = task;
                    warn!(task = %task.id, capacity = self.config.queue_capacity, "overflow queue full");
                    task.settle(Err(TaskError::QueueFull));
                    return;
                }
                debug!(task = %task.id, depth = self.queue.len() + 1, "task queued");
                self.queue.push_back(task);
            }
        }
    }

    /// Pop the hottest ready worker, or create one below the limit.
    fn checkout_worker(&mut self) -> Option<Uuid> {
        while let Some(worker) = self.available.pop() {
            if let Some(record) = self.workers.get_mut(&worker) {
                record.cancel_idle_timer();
                return Some(worker);
            }
            // Stale id left by a worker that died while idle.
        }
        if self.workers.len() < self.config.limit {
            return Some(self.spawn_worker());
        }
        None
    }

    fn spawn_worker(&mut self) -> Uuid {
        let id = Uuid::now_v7();
        let launched = self.launcher.launch();
        let (sender, mut receiver) = launched.port.split();

        let tx = self.tx.clone();
        let pump = tokio::spawn(async move {
            while let Some(envelope) = receiver.recv().await {
                if tx
                    .send(Msg::Frame {
                        worker: id,
                        frame: envelope.frame,
                    })
                    .is_err()
                {
                    return;
                }
            }
            let _ = tx.send(Msg::WorkerGone {
                worker: id,
                message: None,
            });
        });

        self.workers.insert(
            id,
            WorkerRecord {
                sender,
                host: launched.host,
                pump,
                idle_timer: None,
            },
        );
        debug!(worker = %id, live = self.workers.len(), "worker started");
        id
    }

    fn dispatch(&mut self, worker: Uuid, mut task: TaskRecord) {
        let id = task.id;
        let args = task.args.take().unwrap_or_default();
        let transfer = collect_from_args(&args);

        if let Some(timeout) = task.timeout {
            let tx = self.tx.clone();
            task.timeout_timer = Some(tokio::spawn(async move {
                tokio::time::sleep(timeout).await;
                let _ = tx.send(Msg::TimedOut { task: id });
            }));
        }

        task.worker = Some(worker);
        self.pending.insert(worker, id);
        let path = task.path.clone();
        self.tasks.insert(id, task);

        debug!(task = %id, worker = %worker, %path, "task dispatched");
        let posted = match self.workers.get(&worker) {
            Some(record) => record.sender.post(Frame::Request { id, path, args }, transfer),
            None => Err(spindle_protocol::PortError::closed()),
        };
        if let Err(err) = posted {
            // Dispatch failure is handled like a crash: the worker is
            // unusable and the task fails with the transport's message.
            self.on_worker_gone(worker, Some(err.message));
        }
    }

    /// Hand workers to queued tasks until one side runs out.
    fn drive_queue(&mut self) {
        loop {
            if self.queue.is_empty() {
                return;
            }
            let Some(worker) = self.checkout_worker() else {
                return;
            };
            match self.queue.pop_front() {
                Some(task) => self.dispatch(worker, task),
                None => {
                    self.make_available(worker);
                    return;
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Replies
    // ------------------------------------------------------------------

    fn on_frame(&mut self, worker: Uuid, frame: Frame) {
        match frame {
            Frame::Event { id, event, data } => match self.tasks.get(&id) {
                Some(task) => task.listeners.dispatch(&event, &data),
                None => debug!(task = %id, %event, "event for unknown task dropped"),
            },
            Frame::Retained { id } => match self.tasks.get_mut(&id) {
                Some(task) => {
                    task.retained = true;
                    if let Some(timer) = task.timeout_timer.take() {
                        timer.abort();
                    }
                    debug!(task = %id, worker = %worker, "task retained");
                }
                None => debug!(task = %id, "retained ack for unknown task dropped"),
            },
            Frame::Result { id, result } => self.on_settled(id, Ok(result)),
            Frame::Error { id, error } => self.on_settled(id, Err(TaskError::action(error))),
            Frame::Request { id, .. } | Frame::Release { id } => {
                debug!(task = %id, worker = %worker, "unexpected frame from worker ignored");
            }
        }
    }

    fn on_settled(&mut self, id: Uuid, outcome: Settlement) {
        let Some(mut task) = self.tasks.remove(&id) else {
            debug!(task = %id, "reply for unknown task dropped");
            return;
        };
        task.cancel_timers();
        if let Some(worker) = task.worker.take() {
            self.pending.remove(&worker);
            self.make_available(worker);
        }
        self.completed += 1;
        task.settle(outcome);
        self.check_drain();
        self.drive_queue();
    }

    fn make_available(&mut self, worker: Uuid) {
        if !self.workers.contains_key(&worker) {
            return;
        }
        self.available.push(worker);
        if self.shutting_down || self.config.idle_timeout.is_zero() {
            return;
        }
        let timeout = self.config.idle_timeout;
        let tx = self.tx.clone();
        let timer = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            let _ = tx.send(Msg::IdleExpired { worker });
        });
        if let Some(record) = self.workers.get_mut(&worker) {
            record.cancel_idle_timer();
            record.idle_timer = Some(timer);
        } else {
            timer.abort();
        }
    }

    // ------------------------------------------------------------------
    // Timeout, abort, crash, idle eviction
    // ------------------------------------------------------------------

    fn on_timed_out(&mut self, id: Uuid) {
        // Stale timers (task already settled, or retained in the
        // meantime) fall through here.
        match self.tasks.get(&id) {
            Some(task) if !task.retained => {}
            _ => return,
        }
        let Some(mut task) = self.tasks.remove(&id) else {
            return;
        };
        task.cancel_timers();
        let millis = task.timeout.map(|d| d.as_millis() as u64).unwrap_or(0);
        warn!(task = %id, millis, "task timed out");

        if let Some(worker) = task.worker.take() {
            self.pending.remove(&worker);
            self.discard_worker(worker);
            // The worker's state is unknowable; replace it immediately
            // so the slot the timeout budget implies stays available.
            self.spawn_replacement();
        }

        task.settle(Err(TaskError::TimedOut(millis)));
        self.check_drain();
        self.drive_queue();
    }

    fn on_abort(&mut self, id: Uuid) {
        if let Some(mut task) = self.tasks.remove(&id) {
            task.cancel_timers();
            info!(task = %id, "executing task aborted");
            if let Some(worker) = task.worker.take() {
                self.pending.remove(&worker);
                self.discard_worker(worker);
                self.spawn_replacement();
            }
            task.settle(Err(TaskError::Aborted));
            self.check_drain();
            self.drive_queue();
            return;
        }

        // Still queued: settle and remove the record, so it stops
        // occupying a capacity slot.
        if let Some(position) = self.queue.iter().position(|task| task.id == id) {
            if let Some(mut task) = self.queue.remove(position) {
                debug!(task = %id, "queued task aborted");
                task.cancel_timers();
                task.settle(Err(TaskError::Aborted));
            }
        }
    }

    fn on_worker_gone(&mut self, worker: Uuid, message: Option<String>) {
        let Some(record) = self.workers.remove(&worker) else {
            // Already discarded; the pump noticed the same death.
            return;
        };
        record.terminate();
        self.available.retain(|w| *w != worker);

        if let Some(id) = self.pending.remove(&worker) {
            if let Some(mut task) = self.tasks.remove(&id) {
                task.cancel_timers();
                let err = TaskError::worker(message);
                error!(worker = %worker, task = %id, %err, "worker lost while executing");
                task.settle(Err(err));
            }
        } else {
            debug!(worker = %worker, "idle worker lost");
        }

        // No eager replacement after a crash; the next admission creates
        // one lazily.
        self.check_drain();
        self.drive_queue();
    }

    fn on_idle_expired(&mut self, worker: Uuid) {
        if self.shutting_down || self.pending.contains_key(&worker) {
            return;
        }
        if !self.available.contains(&worker) {
            return;
        }
        debug!(worker = %worker, "idle worker evicted");
        self.discard_worker(worker);
    }

    fn discard_worker(&mut self, worker: Uuid) {
        if let Some(record) = self.workers.remove(&worker) {
            record.terminate();
        }
        self.available.retain(|w| *w != worker);
        self.pending.remove(&worker);
    }

    fn spawn_replacement(&mut self) {
        if self.shutting_down || self.workers.len() >= self.config.limit {
            return;
        }
        let worker = self.spawn_worker();
        self.make_available(worker);
    }

    // ------------------------------------------------------------------
    // Retained release
    // ------------------------------------------------------------------

    fn on_release_requested(&mut self, id: Uuid) {
        let Some(task) = self.tasks.get(&id) else {
            return;
        };
        if !task.retained {
            return;
        }
        let Some(worker) = task.worker else {
            return;
        };
        if let Some(record) = self.workers.get(&worker) {
            debug!(task = %id, worker = %worker, "release posted");
            let _ = record.sender.post(Frame::Release { id }, Vec::new());
        }
    }

    // ------------------------------------------------------------------
    // Stats and shutdown
    // ------------------------------------------------------------------

    fn stats(&self) -> PoolStats {
        PoolStats {
            workers: self.workers.len(),
            busy: self.pending.len(),
            idle: self.available.len(),
            queued: self.queue.len(),
            completed: self.completed,
        }
    }

    fn on_shutdown(&mut self, reply: oneshot::Sender<()>) {
        self.drain.push(reply);

        if !self.shutting_down {
            self.shutting_down = true;
            info!(
                executing = self.pending.len(),
                queued = self.queue.len(),
                "pool shutting down"
            );

            for record in self.workers.values_mut() {
                record.cancel_idle_timer();
            }

            for mut task in std::mem::take(&mut self.queue) {
                task.cancel_timers();
                task.settle(Err(TaskError::Closing));
            }

            // Retained tasks get a release frame and are allowed to
            // complete; plain executing tasks run to completion.
            for (worker, id) in self.pending.iter() {
                let retained = self.tasks.get(id).is_some_and(|t| t.retained);
                if retained {
                    if let Some(record) = self.workers.get(worker) {
                        let _ = record.sender.post(Frame::Release { id: *id }, Vec::new());
                    }
                }
            }
        }

        self.check_drain();
    }

    fn check_drain(&mut self) {
        if !self.shutting_down || !self.pending.is_empty() {
            return;
        }
        for (_, record) in self.workers.drain() {
            record.terminate();
        }
        self.available.clear();
        self.tasks.clear();
        self.queue.clear();
        for tx in self.drain.drain(..) {
            let _ = tx.send(());
        }
        self.stopped = true;
        info!(completed = self.completed, "pool stopped");
    }
}
