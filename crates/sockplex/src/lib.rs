//! # sockplex - Connection Multiplexing Reactor
//!
//! A single-threaded poll(2) reactor that drives many heterogeneous
//! connections (TCP listeners and streams, UDP/ICMP/raw sockets, pipes)
//! through per-connection protocol handlers, plus coserver workers that
//! run blocking lookups (reverse DNS, DNS, ident) off the reactor thread.
//!
//! ## Quick Start
//!
//! ```ignore
//! use sockplex::{PortConfig, Reactor, ReactorConfig};
//!
//! let mut reactor = Reactor::new(ReactorConfig::from_env())?;
//! let echo = reactor.add_server(Box::new(EchoServer))?;
//! reactor.bind(&PortConfig::tcp("0.0.0.0:4242".parse()?), &[echo])?;
//! reactor.spawn_coserver(CoserverKind::ReverseDns)?;
//! reactor.run()?;
//! reactor.finalize();
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │              Servers (detect, connect, notify)              │
//! │           Handlers (check_request, idle, kicked)            │
//! └─────────────────────────────────────────────────────────────┘
//!                              │ Context
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                         Reactor                             │
//! │      poll set → read/write dispatch → tick → sweep          │
//! └─────────────────────────────────────────────────────────────┘
//!          │                                        │
//!          ▼                                        ▼
//!    ┌───────────────────┐               ┌─────────────────────┐
//!    │     Registry      │               │     Coservers       │
//!    │ slots, generations│◄── proxy ─────│ thread / process    │
//!    │  dispatch list    │   pipe conns  │ workers, pending ids│
//!    └───────────────────┘               └─────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - `config` - Reactor configuration with environment overrides
//! - `connection` - Connection state and buffers
//! - `registry` - Generation-checked connection table
//! - `handler` - Per-connection callbacks and [`Context`]
//! - `framing` - Boundary-driven request splitting
//! - `server` - Server types and instances
//! - `port` - Listening ports and access control
//! - `coserver` - Offload workers
//! - `reactor` - The event loop
//! - `admin` - Snapshots for admin consoles

cfg_if::cfg_if! {
    if #[cfg(unix)] {
        mod sys;
    } else {
        compile_error!("sockplex supports unix targets only");
    }
}

pub mod admin;
pub mod config;
pub mod connection;
pub mod coserver;
pub mod env;
pub mod framing;
pub mod handler;
pub mod port;
pub mod reactor;
pub mod registry;
pub mod server;
pub mod transport;

// Re-exports for convenience
pub use admin::ConnStats;
pub use config::ReactorConfig;
pub use connection::{ConnState, Connection};
pub use coserver::{
    CoserverStats, Coservers, ProcessLauncher, Resolver, ThreadLauncher, WorkerLauncher,
};
pub use handler::{Context, CoserverCallback, Handler};
pub use port::PortConfig;
pub use reactor::Reactor;
pub use registry::Registry;
pub use server::{Detection, Packet, Server, ServerType, Servers};
pub use transport::{ProtoFamily, Transport};

pub use sockplex_core::{
    Boundary, ConnId, CoserverKey, CoserverKind, Error, FloodPolicy, KickReason, RequestId,
    Result, ServerKey,
};
