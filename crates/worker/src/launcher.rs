//! Worker launching
//!
//! [`ActionLauncher`] turns an action tree into pool workers. Where a
//! worker runs is decided by probing the environment: a multi-thread
//! runtime hosts workers as abortable tasks, anything else gets a
//! dedicated OS thread with its own single-thread runtime.

use tokio::runtime::{Handle, RuntimeFlavor};
use tracing::{debug, error};

use spindle_pool::{LaunchedWorker, Pool, PoolConfig, WorkerHost, WorkerLauncher};
use spindle_protocol::port_pair;

use crate::actions::Actions;
use crate::dispatcher;

/// How workers are hosted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SpawnMode {
    /// Probe the runtime at launch time.
    #[default]
    Auto,
    /// Spawn workers as tasks on the current runtime.
    Runtime,
    /// Give every worker a dedicated OS thread.
    Thread,
}

/// Launches dispatcher workers over a shared action tree.
pub struct ActionLauncher {
    actions: Actions,
    mode: SpawnMode,
}

impl ActionLauncher {
    pub fn new(actions: Actions) -> Self {
        Self {
            actions,
            mode: SpawnMode::Auto,
        }
    }

    /// Override the spawn-mode probe.
    pub fn with_mode(mut self, mode: SpawnMode) -> Self {
        self.mode = mode;
        self
    }

    fn resolve_mode(&self) -> SpawnMode {
        match self.mode {
            SpawnMode::Auto => match Handle::try_current() {
                Ok(handle) if handle.runtime_flavor() == RuntimeFlavor::MultiThread => {
                    SpawnMode::Runtime
                }
                _ => SpawnMode::Thread,
            },
            mode => mode,
        }
    }
}

impl WorkerLauncher for ActionLauncher {
    fn launch(&self) -> LaunchedWorker {
        let (near, far) = port_pair();
        let actions = self.actions.clone();
        let mode = self.resolve_mode();
        debug!(?mode, "launching worker");

        let host = match mode {
            SpawnMode::Runtime | SpawnMode::Auto => WorkerHost::from_task(tokio::spawn(
                async move { dispatcher::serve(far, &actions).await },
            )),
            SpawnMode::Thread => {
                let spawned = std::thread::Builder::new()
                    .name("spindle-worker".into())
                    .spawn(move || {
                        let runtime = tokio::runtime::Builder::new_current_thread()
                            .enable_time()
                            .build();
                        match runtime {
                            Ok(runtime) => runtime.block_on(dispatcher::serve(far, &actions)),
                            Err(err) => error!(%err, "worker runtime failed to build"),
                        }
                    });
                match spawned {
                    Ok(handle) => WorkerHost::from_thread(handle),
                    Err(err) => {
                        // The closure (and with it the worker's port end)
                        // is already gone; the pool will observe the
                        // closed port as a crash.
                        error!(%err, "failed to spawn worker thread");
                        WorkerHost::detached()
                    }
                }
            }
        };

        LaunchedWorker { port: near, host }
    }
}

/// Launch a pool serving the given action tree.
///
/// The worker-side half of the runtime in one call:
///
/// ```ignore
/// let pool = spindle_worker::launch(actions, PoolConfig::default().with_limit(2));
/// let five = pool.call("add", vec![2.into(), 3.into()]).await?;
/// ```
pub fn launch(actions: Actions, config: PoolConfig) -> Pool {
    Pool::launch(ActionLauncher::new(actions), config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_defaults_to_auto() {
        let launcher = ActionLauncher::new(Actions::new());
        assert_eq!(launcher.mode, SpawnMode::Auto);

        let launcher = launcher.with_mode(SpawnMode::Thread);
        assert_eq!(launcher.mode, SpawnMode::Thread);
    }

    #[tokio::test]
    async fn test_auto_on_current_thread_runtime_picks_thread() {
        let launcher = ActionLauncher::new(Actions::new());
        assert_eq!(launcher.resolve_mode(), SpawnMode::Thread);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_auto_on_multi_thread_runtime_picks_runtime() {
        let launcher = ActionLauncher::new(Actions::new());
        assert_eq!(launcher.resolve_mode(), SpawnMode::Runtime);
    }
}
