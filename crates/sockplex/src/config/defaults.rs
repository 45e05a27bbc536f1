//! Library defaults for [`ReactorConfig`](super::ReactorConfig).

/// Connection table size
pub const MAX_CONNECTIONS: usize = 4096;

/// Periodic tick (idle countdowns, flood decay, server notify)
pub const TICK_MS: u64 = 1000;

pub const RECV_BUFFER: usize = 8192;
pub const SEND_BUFFER: usize = 8192;

/// Flood points before a connection is kicked
pub const FLOOD_LIMIT: u32 = 100;
/// Points forgiven per tick
pub const FLOOD_DECAY: u32 = 1;
/// Received bytes per extra flood point
pub const FLOOD_BYTES_PER_POINT: u32 = 50;

/// Back-off after a transient write/accept failure
pub const RELAX_MS: u64 = 1000;

/// Accepts per listener per cycle
pub const ACCEPT_BATCH: usize = 16;

/// Proxy buffer size for coserver connections
pub const COSERVER_BUFFER: usize = 65536;
