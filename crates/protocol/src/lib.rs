//! # Spindle wire protocol
//!
//! The frames, payload values, and port plumbing shared by the pool side
//! and the worker side of a spindle deployment.
//!
//! ## Layout
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                        Pool side                          │
//! │   (scheduler posts Request/Release, receives replies)    │
//! └──────────────────────────────────────────────────────────┘
//!                            │ WirePort
//!                            ▼
//! ┌──────────────────────────────────────────────────────────┐
//! │                       Worker side                         │
//! │  (dispatcher receives Request/Release, posts             │
//! │   Retained/Event/Result/Error)                            │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! The transport moves [`Payload`] graphs natively; nothing here encodes
//! or decodes them. Transferable leaves (byte buffers, auxiliary ports)
//! move with the frame and become unusable on the posting side.

pub mod frame;
pub mod payload;
pub mod port;
pub mod transfer;

pub use frame::{Fault, Frame};
pub use payload::{BufferHandle, Payload, PortHandle};
pub use port::{port_pair, Envelope, PortError, PortReceiver, PortSender, WirePort};
pub use transfer::{collect_from_args, collect_transferables};
