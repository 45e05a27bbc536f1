//! Reactor configuration
//!
//! Library defaults with runtime environment overrides.
//!
//! # Example
//!
//! ```rust,ignore
//! use sockplex::config::ReactorConfig;
//!
//! // Defaults with SOCKPLEX_* overrides
//! let config = ReactorConfig::from_env();
//!
//! // Or customize programmatically
//! let config = ReactorConfig::new()
//!     .max_connections(256)
//!     .tick_interval(Duration::from_millis(250));
//! ```

pub mod defaults;

use std::path::PathBuf;
use std::time::Duration;

use sockplex_core::FloodPolicy;
use thiserror::Error;
use tracing::info;

use crate::env::{env_get, env_get_opt};

/// Reactor configuration with builder pattern.
#[derive(Debug, Clone)]
pub struct ReactorConfig {
    /// Connection table size
    pub max_connections: usize,
    /// Period of idle countdowns, flood decay and server notify
    pub tick_interval: Duration,
    /// Initial receive buffer limit per connection
    pub recv_buffer_size: usize,
    /// Initial send buffer limit per connection
    pub send_buffer_size: usize,
    pub flood: FloodPolicy,
    /// Back-off after a transient write or accept failure
    pub relax_interval: Duration,
    /// Accepts per listener per cycle
    pub accept_batch: usize,
    /// Buffer limit of coserver proxy connections
    pub coserver_buffer_size: usize,
    /// External coserver program; `None` runs workers on threads
    pub coserver_program: Option<PathBuf>,
}

impl Default for ReactorConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

impl ReactorConfig {
    /// Create config from defaults with environment overrides.
    ///
    /// Environment variables (all optional):
    /// - `SOCKPLEX_MAX_CONNECTIONS` - Connection table size
    /// - `SOCKPLEX_TICK_MS` - Tick interval in milliseconds
    /// - `SOCKPLEX_RECV_BUFFER` / `SOCKPLEX_SEND_BUFFER` - Buffer limits
    /// - `SOCKPLEX_FLOOD_LIMIT` - Flood points before a kick
    /// - `SOCKPLEX_FLOOD_DECAY` - Points forgiven per tick
    /// - `SOCKPLEX_FLOOD_BYTES_PER_POINT` - Bytes per extra point
    /// - `SOCKPLEX_RELAX_MS` - Back-off after transient failures
    /// - `SOCKPLEX_ACCEPT_BATCH` - Accepts per listener per cycle
    /// - `SOCKPLEX_COSERVER_BUFFER` - Coserver proxy buffer limit
    /// - `SOCKPLEX_COSERVER_PROGRAM` - Run coservers as this program
    pub fn from_env() -> Self {
        Self {
            max_connections: env_get("SOCKPLEX_MAX_CONNECTIONS", defaults::MAX_CONNECTIONS),
            tick_interval: Duration::from_millis(env_get("SOCKPLEX_TICK_MS", defaults::TICK_MS)),
            recv_buffer_size: env_get("SOCKPLEX_RECV_BUFFER", defaults::RECV_BUFFER),
            send_buffer_size: env_get("SOCKPLEX_SEND_BUFFER", defaults::SEND_BUFFER),
            flood: FloodPolicy {
                limit: env_get("SOCKPLEX_FLOOD_LIMIT", defaults::FLOOD_LIMIT),
                decay_per_tick: env_get("SOCKPLEX_FLOOD_DECAY", defaults::FLOOD_DECAY),
                bytes_per_point: env_get(
                    "SOCKPLEX_FLOOD_BYTES_PER_POINT",
                    defaults::FLOOD_BYTES_PER_POINT,
                ),
            },
            relax_interval: Duration::from_millis(env_get("SOCKPLEX_RELAX_MS", defaults::RELAX_MS)),
            accept_batch: env_get("SOCKPLEX_ACCEPT_BATCH", defaults::ACCEPT_BATCH),
            coserver_buffer_size: env_get("SOCKPLEX_COSERVER_BUFFER", defaults::COSERVER_BUFFER),
            coserver_program: env_get_opt("SOCKPLEX_COSERVER_PROGRAM"),
        }
    }

    /// Create config with explicit defaults (no env override).
    pub fn new() -> Self {
        Self {
            max_connections: defaults::MAX_CONNECTIONS,
            tick_interval: Duration::from_millis(defaults::TICK_MS),
            recv_buffer_size: defaults::RECV_BUFFER,
            send_buffer_size: defaults::SEND_BUFFER,
            flood: FloodPolicy {
                limit: defaults::FLOOD_LIMIT,
                decay_per_tick: defaults::FLOOD_DECAY,
                bytes_per_point: defaults::FLOOD_BYTES_PER_POINT,
            },
            relax_interval: Duration::from_millis(defaults::RELAX_MS),
            accept_batch: defaults::ACCEPT_BATCH,
            coserver_buffer_size: defaults::COSERVER_BUFFER,
            coserver_program: None,
        }
    }

    // Builder methods

    pub fn max_connections(mut self, n: usize) -> Self {
        self.max_connections = n;
        self
    }

    pub fn tick_interval(mut self, d: Duration) -> Self {
        self.tick_interval = d;
        self
    }

    pub fn recv_buffer_size(mut self, size: usize) -> Self {
        self.recv_buffer_size = size;
        self
    }

    pub fn send_buffer_size(mut self, size: usize) -> Self {
        self.send_buffer_size = size;
        self
    }

    pub fn flood(mut self, policy: FloodPolicy) -> Self {
        self.flood = policy;
        self
    }

    pub fn relax_interval(mut self, d: Duration) -> Self {
        self.relax_interval = d;
        self
    }

    pub fn accept_batch(mut self, n: usize) -> Self {
        self.accept_batch = n;
        self
    }

    pub fn coserver_buffer_size(mut self, size: usize) -> Self {
        self.coserver_buffer_size = size;
        self
    }

    pub fn coserver_program(mut self, program: Option<PathBuf>) -> Self {
        self.coserver_program = program;
        self
    }

    /// Validate configuration and return errors if invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_connections == 0 {
            return Err(ConfigError::InvalidValue("max_connections must be > 0"));
        }
        if self.max_connections >= u32::MAX as usize {
            return Err(ConfigError::InvalidValue("max_connections must fit a u32 index"));
        }
        if self.tick_interval.is_zero() {
            return Err(ConfigError::InvalidValue("tick_interval must be > 0"));
        }
        if self.recv_buffer_size == 0 || self.send_buffer_size == 0 {
            return Err(ConfigError::InvalidValue("buffer sizes must be > 0"));
        }
        if self.flood.bytes_per_point == 0 {
            return Err(ConfigError::InvalidValue("flood bytes_per_point must be > 0"));
        }
        if self.accept_batch == 0 {
            return Err(ConfigError::InvalidValue("accept_batch must be > 0"));
        }
        if self.coserver_buffer_size < 2 {
            return Err(ConfigError::InvalidValue("coserver_buffer_size must hold a line"));
        }
        Ok(())
    }

    /// Log the effective configuration.
    pub fn log(&self) {
        info!(
            max_connections = self.max_connections,
            tick = ?self.tick_interval,
            recv_buffer = self.recv_buffer_size,
            send_buffer = self.send_buffer_size,
            flood_limit = self.flood.limit,
            flood_decay = self.flood.decay_per_tick,
            flood_bytes_per_point = self.flood.bytes_per_point,
            relax = ?self.relax_interval,
            accept_batch = self.accept_batch,
            coserver_buffer = self.coserver_buffer_size,
            coserver_program = ?self.coserver_program,
            "reactor configuration"
        );
    }
}

/// Configuration error
#[derive(Debug, Clone, Error)]
pub enum ConfigError {
    #[error("invalid config: {0}")]
    InvalidValue(&'static str),
}

impl From<ConfigError> for sockplex_core::Error {
    fn from(e: ConfigError) -> Self {
        sockplex_core::Error::Config(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_is_valid() {
        let config = ReactorConfig::new();
        assert_eq!(config.max_connections, defaults::MAX_CONNECTIONS);
        assert_eq!(config.tick_interval, Duration::from_secs(1));
        assert!(config.coserver_program.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder() {
        let config = ReactorConfig::new()
            .max_connections(8)
            .tick_interval(Duration::from_millis(5))
            .accept_batch(2)
            .coserver_program(Some(PathBuf::from("/bin/true")));

        assert_eq!(config.max_connections, 8);
        assert_eq!(config.tick_interval, Duration::from_millis(5));
        assert_eq!(config.accept_batch, 2);
        assert_eq!(config.coserver_program, Some(PathBuf::from("/bin/true")));
    }

    #[test]
    fn test_validation() {
        assert!(ReactorConfig::new().max_connections(0).validate().is_err());
        assert!(ReactorConfig::new().tick_interval(Duration::ZERO).validate().is_err());
        assert!(ReactorConfig::new().recv_buffer_size(0).validate().is_err());
        let policy = FloodPolicy {
            bytes_per_point: 0,
            ..FloodPolicy::default()
        };
        assert!(ReactorConfig::new().flood(policy).validate().is_err());
    }

    #[test]
    fn test_from_env_override() {
        std::env::set_var("SOCKPLEX_ACCEPT_BATCH", "3");
        let config = ReactorConfig::from_env();
        std::env::remove_var("SOCKPLEX_ACCEPT_BATCH");
        assert_eq!(config.accept_batch, 3);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_error_converts() {
        let err: sockplex_core::Error = ConfigError::InvalidValue("x").into();
        assert_eq!(err.to_string(), "invalid configuration: invalid config: x");
    }
}
