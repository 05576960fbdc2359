//! Runtime configuration for the server and the client loop.
//!
//! Binaries fill these from command-line flags; everything else takes them
//! by value and calls `validate` once at startup.

use crate::protocol::max_snapshot_entities;
use crate::{WorldBounds, DEFAULT_WORLD_HEIGHT, DEFAULT_WORLD_WIDTH};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("world size must be non-zero, got {width}x{height}")]
    EmptyWorld { width: u32, height: u32 },
    #[error("{name} must be greater than zero")]
    Zero { name: &'static str },
    #[error("sweep interval {sweep:?} exceeds session timeout {timeout:?}")]
    SweepSlowerThanTimeout { sweep: Duration, timeout: Duration },
    #[error("max_sessions {max_sessions} exceeds {limit}, the most a snapshot datagram can hold")]
    TooManySessions { max_sessions: usize, limit: usize },
}

/// Server-side world and session settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorldConfig {
    pub world_width: u32,
    pub world_height: u32,
    /// Sessions silent for longer than this are expired by the sweep.
    pub session_timeout: Duration,
    pub sweep_interval: Duration,
    pub max_sessions: usize,
}

impl Default for WorldConfig {
    fn default() -> Self {
        Self {
            world_width: DEFAULT_WORLD_WIDTH,
            world_height: DEFAULT_WORLD_HEIGHT,
            session_timeout: Duration::from_secs(5),
            sweep_interval: Duration::from_secs(1),
            max_sessions: 48,
        }
    }
}

impl WorldConfig {
    pub fn bounds(&self) -> WorldBounds {
        WorldBounds::new(self.world_width, self.world_height)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.world_width == 0 || self.world_height == 0 {
            return Err(ConfigError::EmptyWorld {
                width: self.world_width,
                height: self.world_height,
            });
        }
        if self.session_timeout.is_zero() {
            return Err(ConfigError::Zero {
                name: "session_timeout",
            });
        }
        if self.sweep_interval.is_zero() {
            return Err(ConfigError::Zero {
                name: "sweep_interval",
            });
        }
        if self.max_sessions == 0 {
            return Err(ConfigError::Zero {
                name: "max_sessions",
            });
        }
        if self.sweep_interval > self.session_timeout {
            return Err(ConfigError::SweepSlowerThanTimeout {
                sweep: self.sweep_interval,
                timeout: self.session_timeout,
            });
        }
        let limit = max_snapshot_entities();
        if self.max_sessions > limit {
            return Err(ConfigError::TooManySessions {
                max_sessions: self.max_sessions,
                limit,
            });
        }
        Ok(())
    }
}

/// Client loop pacing and network settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    pub display_rate_hz: u32,
    /// Moves happen once every `move_divisor_k` display ticks.
    pub move_divisor_k: u32,
    pub request_timeout: Duration,
    /// Consecutive timeouts before the user is warned about connectivity.
    pub max_consecutive_timeouts: u32,
    pub auto_move_default: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            display_rate_hz: 10,
            move_divisor_k: 3,
            request_timeout: Duration::from_millis(80),
            max_consecutive_timeouts: 10,
            auto_move_default: false,
        }
    }
}

impl ClientConfig {
    pub fn tick_period(&self) -> Duration {
        Duration::from_secs(1) / self.display_rate_hz.max(1)
    }

    pub fn push_interval(&self) -> Duration {
        self.tick_period() * self.move_divisor_k
    }

    /// Shortest server session timeout that tolerates normal jitter for this pacing.
    pub fn min_safe_session_timeout(&self) -> Duration {
        self.push_interval().max(self.tick_period()) * 5
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.display_rate_hz == 0 {
            return Err(ConfigError::Zero {
                name: "display_rate_hz",
            });
        }
        if self.move_divisor_k == 0 {
            return Err(ConfigError::Zero {
                name: "move_divisor_k",
            });
        }
        if self.request_timeout.is_zero() {
            return Err(ConfigError::Zero {
                name: "request_timeout",
            });
        }
        if self.max_consecutive_timeouts == 0 {
            return Err(ConfigError::Zero {
                name: "max_consecutive_timeouts",
            });
        }
        Ok(())
    }
}
