//! Tunables of the TCP binding.
use std::time::Duration;

use crate::protocol::DEFAULT_MAX_FRAME;

/// Size of the per-connection channel buffers.
pub const DEFAULT_BUFFER_SIZE: usize = 64 * 1024;

/// Client side settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportConfig {
    /// Channel buffer size and data frame chunk size.
    pub buffer_size: usize,
    /// Largest frame or fixed body accepted.
    pub max_frame: usize,
    /// Connections kept open to one peer at most.
    pub max_connections: usize,
    /// How long a caller waits for a free connection.
    pub pool_wait: Duration,
    pub connect_timeout: Duration,
    /// `None` blocks forever.
    pub read_timeout: Option<Duration>,
    /// Attempts made to open one connection before giving up.
    pub connect_attempts: u32,
    /// Delay after the first failed attempt; doubles on each further failure.
    pub backoff: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            buffer_size: DEFAULT_BUFFER_SIZE,
            max_frame: DEFAULT_MAX_FRAME,
            max_connections: 4,
            pool_wait: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(5),
            read_timeout: Some(Duration::from_secs(60)),
            connect_attempts: 3,
            backoff: Duration::from_millis(200),
        }
    }
}

/// Server side settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// Worker threads, one per connection being served.
    pub workers: usize,
    pub buffer_size: usize,
    pub max_frame: usize,
    /// Idle connections are dropped after this long.
    pub read_timeout: Option<Duration>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            workers: 8,
            buffer_size: DEFAULT_BUFFER_SIZE,
            max_frame: DEFAULT_MAX_FRAME,
            read_timeout: Some(Duration::from_secs(300)),
        }
    }
}
