use std::time::Duration;

/// Reconnect timing for the sync channel.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReconnectPolicy {
    /// Base delay in milliseconds for exponential backoff.
    pub base_delay_ms: u64,

    /// Maximum delay in milliseconds. Caps the exponential growth.
    pub max_delay_ms: u64,

    /// Multiplier for exponential backoff.
    pub backoff_multiplier: f64,

    /// Attempts after which the connection is abandoned.
    pub max_attempts: u32,

    /// Pause between a credential refresh and the reopen.
    pub auth_retry_delay_ms: u64,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base_delay_ms: 3_000,
            max_delay_ms: 30_000,
            backoff_multiplier: 1.5,
            max_attempts: 5,
            auth_retry_delay_ms: 1_000,
        }
    }
}

impl ReconnectPolicy {
    pub fn with_delays(max_attempts: u32, base_delay_ms: u64, max_delay_ms: u64) -> Self {
        Self {
            max_attempts,
            base_delay_ms,
            max_delay_ms,
            ..Default::default()
        }
    }

    /// Delay before reconnect attempt `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponential = self.base_delay_ms as f64 * self.backoff_multiplier.powi(attempt as i32);
        Duration::from_millis((exponential as u64).min(self.max_delay_ms))
    }

    pub fn auth_retry_delay(&self) -> Duration {
        Duration::from_millis(self.auth_retry_delay_ms)
    }
}
