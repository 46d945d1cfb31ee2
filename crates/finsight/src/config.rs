use std::{env, time::Duration};

use thiserror::Error;

/// Errors raised when validating configuration values.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Debounce window must be positive")]
    InvalidDebounce,
    #[error("Reconnect base delay must be positive")]
    InvalidReconnectDelay,
    #[error("Reconnect max delay ({max_ms}ms) is below the base delay ({base_ms}ms)")]
    ReconnectDelayOrder { base_ms: u64, max_ms: u64 },
    #[error("Feed channel capacity must be at least 1")]
    InvalidChannelCapacity,
}

/// Runtime configuration loaded from environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Window over which change events are coalesced (default: 300)
    pub debounce_ms: u64,
    /// Reconnection attempts before the feed is declared lost (default: 5)
    pub reconnect_max_retries: u32,
    /// First reconnection backoff in milliseconds (default: 250)
    pub reconnect_base_delay_ms: u64,
    /// Backoff ceiling in milliseconds (default: 5,000)
    pub reconnect_max_delay_ms: u64,
    /// Buffered events per feed connection before it lags (default: 100)
    pub feed_channel_capacity: usize,
    /// Redis connection URL (default: "redis://localhost:6379")
    /// Note: Only used when the `redis` feature is enabled.
    pub redis_url: String,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Environment variables:
    /// - `FINSIGHT_DEBOUNCE_MS` - Debounce window in milliseconds (default: 300)
    /// - `FINSIGHT_RECONNECT_MAX_RETRIES` - Reconnection attempts (default: 5)
    /// - `FINSIGHT_RECONNECT_BASE_DELAY_MS` - First backoff delay (default: 250)
    /// - `FINSIGHT_RECONNECT_MAX_DELAY_MS` - Backoff ceiling (default: 5,000)
    /// - `FINSIGHT_FEED_CHANNEL_CAPACITY` - Per-connection buffer (default: 100)
    /// - `REDIS_URL` - Redis connection URL (default: "redis://localhost:6379")
    pub fn from_env() -> Self {
        Self {
            debounce_ms: parse_env("FINSIGHT_DEBOUNCE_MS").unwrap_or(300),
            reconnect_max_retries: parse_env("FINSIGHT_RECONNECT_MAX_RETRIES").unwrap_or(5),
            reconnect_base_delay_ms: parse_env("FINSIGHT_RECONNECT_BASE_DELAY_MS").unwrap_or(250),
            reconnect_max_delay_ms: parse_env("FINSIGHT_RECONNECT_MAX_DELAY_MS").unwrap_or(5_000),
            feed_channel_capacity: parse_env("FINSIGHT_FEED_CHANNEL_CAPACITY").unwrap_or(100),
            redis_url: env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://localhost:6379".to_string()),
        }
    }

    /// Checks that every tuning knob has a usable value.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.debounce_ms == 0 {
            return Err(ConfigError::InvalidDebounce);
        }
        if self.feed_channel_capacity == 0 {
            return Err(ConfigError::InvalidChannelCapacity);
        }
        ReconnectPolicy::new(
            self.reconnect_max_retries,
            Duration::from_millis(self.reconnect_base_delay_ms),
            Duration::from_millis(self.reconnect_max_delay_ms),
        )?;
        Ok(())
    }

    /// Get the debounce window as a Duration.
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    /// Get the reconnection backoff policy.
    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        ReconnectPolicy {
            max_retries: self.reconnect_max_retries,
            base_delay: Duration::from_millis(self.reconnect_base_delay_ms),
            max_delay: Duration::from_millis(self.reconnect_max_delay_ms),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::from_env()
    }
}

fn parse_env<T: std::str::FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|v| v.parse().ok())
}

/// Exponential backoff for feed reconnection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl ReconnectPolicy {
    /// Create and validate a policy.
    pub fn new(max_retries: u32, base_delay: Duration, max_delay: Duration) -> Result<Self, ConfigError> {
        if base_delay.is_zero() {
            return Err(ConfigError::InvalidReconnectDelay);
        }
        if max_delay < base_delay {
            return Err(ConfigError::ReconnectDelayOrder {
                base_ms: base_delay.as_millis() as u64,
                max_ms: max_delay.as_millis() as u64,
            });
        }
        Ok(Self {
            max_retries,
            base_delay,
            max_delay,
        })
    }

    /// Delay before reconnection attempt `attempt` (1-based), doubling each
    /// time up to `max_delay`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.base_delay
            .saturating_mul(1u32 << exponent)
            .min(self.max_delay)
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_millis(5_000),
        }
    }
}
