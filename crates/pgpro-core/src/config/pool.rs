//! Pool sizing and timeouts.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Settings shared by every execution pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolSettings {
    /// How long a session waits for a free connection, in milliseconds.
    #[serde(default = "default_acquire_timeout_ms")]
    pub acquire_timeout_ms: u64,

    /// Timeout for opening a new upstream connection, in milliseconds.
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

impl PoolSettings {
    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.acquire_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            acquire_timeout_ms: default_acquire_timeout_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
        }
    }
}

/// Settings for the raw passthrough connections to the primary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PassthroughSettings {
    /// Idle raw connections kept around for reuse.
    #[serde(default = "default_max_idle")]
    pub max_idle: usize,

    /// A relayed response ends when nothing arrives for this long, in
    /// milliseconds, unless a ReadyForQuery ends it first.
    #[serde(default = "default_response_idle_ms")]
    pub response_idle_ms: u64,
}

impl PassthroughSettings {
    pub fn response_idle(&self) -> Duration {
        Duration::from_millis(self.response_idle_ms)
    }
}

impl Default for PassthroughSettings {
    fn default() -> Self {
        Self {
            max_idle: default_max_idle(),
            response_idle_ms: default_response_idle_ms(),
        }
    }
}

fn default_acquire_timeout_ms() -> u64 {
    5_000
}

fn default_connect_timeout_ms() -> u64 {
    5_000
}

fn default_max_idle() -> usize {
    4
}

fn default_response_idle_ms() -> u64 {
    250
}
