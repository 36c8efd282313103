//! # Spindle worker runtime
//!
//! The worker-side half of the spindle worker-pool runtime: a nested
//! action tree, the per-invocation context (`dispatch` / `retain` /
//! `release`), the dispatcher that serves a port, and the launcher that
//! hosts workers for a pool.
//!
//! ## Example
//!
//! ```ignore
//! use spindle_pool::PoolConfig;
//! use spindle_protocol::Payload;
//! use spindle_worker::Actions;
//!
//! let actions = Actions::new()
//!     .action("add", |_cx, args| async move {
//!         let sum: i64 = args.iter().filter_map(Payload::as_int).sum();
//!         Ok(Payload::Int(sum))
//!     })
//!     .action("stream", |cx, args| async move {
//!         let n = args.first().and_then(Payload::as_int).unwrap_or(0);
//!         cx.retain();
//!         for i in 0..n {
//!             cx.dispatch("progress", Payload::map([("i", i.into())]));
//!         }
//!         cx.release(Payload::Int(n));
//!         Ok(Payload::Null)
//!     });
//!
//! let pool = spindle_worker::launch(actions, PoolConfig::default().with_limit(2));
//! ```

pub mod actions;
pub mod context;
pub mod dispatcher;
pub mod launcher;

pub use actions::{ActionError, ActionFn, ActionResult, Actions};
pub use context::ActionContext;
pub use launcher::{launch, ActionLauncher, SpawnMode};
