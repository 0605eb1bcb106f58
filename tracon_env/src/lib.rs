//! TRACON Environment Abstraction Layer
//!
//! This crate provides the "Sans-IO" abstraction that lets a TRACON session
//! run against the host clock and a real socket, or against a manually
//! driven clock and a scripted peer.
//!
//! # Core Concept: The Reactor Pattern
//!
//! The session core never touches I/O directly. It intercepts:
//! - Time (`now()`, `sleep()`)
//! - Network (`LineTransport::drain()`, `LineTransport::send()`)
//! - Randomness (`derive_rng_seed()`)
//!
//! By deriving all entropy from a single 64-bit seed, a training run can be
//! replayed exactly from its seed number.
//!
//! # Example
//!
//! ```ignore
//! use tracon_env::{ChannelTransport, LineTransport, TokioContext};
//!
//! let ctx = TokioContext::shared();
//! let (reader, writer) = socket.into_split();
//! let mut transport = ChannelTransport::connect(ctx, BufReader::new(reader), writer, 1024);
//!
//! loop {
//!     for line in transport.drain() {
//!         dispatch(line);
//!     }
//!     ctx.sleep(Duration::from_millis(33)).await;
//! }
//! ```

mod context;
mod error;
mod manual;
mod network;
mod tokio_impl;
mod types;

pub use context::SessionContext;
pub use error::EnvError;
pub use manual::ManualContext;
pub use network::{
    spawn_line_reader, spawn_line_writer, ChannelTransport, LineTransport, RemoteEnd,
    DEFAULT_CHANNEL_CAPACITY,
};
pub use tokio_impl::TokioContext;
pub use types::WireLine;
