//! # sockplex-core
//!
//! Leaf types shared by the sockplex reactor and its coserver workers.
//!
//! This crate performs no I/O.
//!
//! ## Modules
//!
//! - `id` - Connection, server and coserver identifiers
//! - `buffer` - Bounded receive/send buffers
//! - `flood` - Flood protection policy and meter
//! - `boundary` - Request boundary rules (delimiter / fixed length)
//! - `wire` - Coserver line protocol and lookup kinds
//! - `error` - Error types

pub mod id;
pub mod buffer;
pub mod flood;
pub mod boundary;
pub mod wire;
pub mod error;

// Re-exports for convenience
pub use id::{ConnId, CoserverKey, ServerKey};
pub use buffer::IoBuffer;
pub use flood::{FloodMeter, FloodPolicy, KickReason};
pub use boundary::{Boundary, Unit};
pub use wire::{CoserverKind, RequestId};
pub use error::{is_transient_io, Error, Result};
