#![expect(
    clippy::module_name_repetitions,
    reason = "Configuration types intentionally mirror the module name for clarity"
)]

use std::time::Duration;

use backoff::backoff::Backoff;

const DEFAULT_HEARTBEAT_INTERVAL_DURATION: Duration = Duration::from_secs(10);
const DEFAULT_HEARTBEAT_TIMEOUT_DURATION: Duration = Duration::from_secs(30);
const DEFAULT_MAX_ATTEMPTS: u32 = 5;
const DEFAULT_BASE_DELAY_DURATION: Duration = Duration::from_secs(1);
const DEFAULT_BACKOFF_MULTIPLIER: u32 = 2;
const DEFAULT_MAX_BACKOFF_DURATION: Duration = Duration::from_secs(60);

/// Configuration for WebSocket client behavior.
#[non_exhaustive]
#[derive(Debug, Clone)]
pub struct Config {
    /// Interval for sending WebSocket Ping frames while the connection is open
    pub heartbeat_interval: Duration,
    /// Maximum time to wait for a Pong before considering the transport dead
    pub heartbeat_timeout: Duration,
    /// Reconnection strategy configuration
    pub reconnect: ReconnectConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL_DURATION,
            heartbeat_timeout: DEFAULT_HEARTBEAT_TIMEOUT_DURATION,
            reconnect: ReconnectConfig::default(),
        }
    }
}

/// Configuration for automatic reconnection after abnormal closures.
///
/// The delay before attempt `n` (counting from 1) is
/// `base_delay * multiplier^n`, capped at `max_backoff`. With the defaults this
/// yields 2s, 4s, 8s, 16s and 32s before giving up.
#[non_exhaustive]
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Consecutive abnormal closures tolerated before giving up
    pub max_attempts: u32,
    /// Delay unit multiplied by `multiplier^attempt`
    pub base_delay: Duration,
    /// Growth factor between consecutive attempts
    pub multiplier: u32,
    /// Upper bound for any single delay
    pub max_backoff: Duration,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: DEFAULT_BASE_DELAY_DURATION,
            multiplier: DEFAULT_BACKOFF_MULTIPLIER,
            max_backoff: DEFAULT_MAX_BACKOFF_DURATION,
        }
    }
}

impl ReconnectConfig {
    /// Delay to wait before reconnection attempt number `attempt` (1-based).
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay
            .saturating_mul(self.multiplier.saturating_pow(attempt))
            .min(self.max_backoff)
    }
}

/// Deterministic, bounded exponential backoff.
///
/// Every call to [`Backoff::next_backoff`] counts one attempt. Once
/// `max_attempts` attempts have been handed out it returns `None`, which the
/// connection treats as "give up". [`Backoff::reset`] is called when a
/// transport opens successfully.
#[derive(Debug, Clone)]
pub struct ReconnectBackoff {
    config: ReconnectConfig,
    attempt: u32,
}

impl ReconnectBackoff {
    #[must_use]
    pub fn new(config: ReconnectConfig) -> Self {
        Self { config, attempt: 0 }
    }

    /// Number of attempts handed out since the last reset.
    #[must_use]
    pub fn attempt(&self) -> u32 {
        self.attempt
    }
}

impl From<ReconnectConfig> for ReconnectBackoff {
    fn from(config: ReconnectConfig) -> Self {
        Self::new(config)
    }
}

impl Backoff for ReconnectBackoff {
    fn reset(&mut self) {
        self.attempt = 0;
    }

    fn next_backoff(&mut self) -> Option<Duration> {
        if self.attempt >= self.config.max_attempts {
            return None;
        }

        self.attempt += 1;
        Some(self.config.delay_for(self.attempt))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_sequence() {
        let mut backoff = ReconnectBackoff::from(ReconnectConfig::default());

        let delays: Vec<_> = std::iter::from_fn(|| backoff.next_backoff()).collect();

        assert_eq!(
            delays,
            [2, 4, 8, 16, 32].map(Duration::from_secs).to_vec(),
            "default schedule doubles from two seconds"
        );
        assert_eq!(backoff.attempt(), 5);
        assert_eq!(backoff.next_backoff(), None);
    }

    #[test]
    fn backoff_respects_max() {
        let config = ReconnectConfig {
            max_attempts: 10,
            base_delay: Duration::from_secs(1),
            multiplier: 3,
            max_backoff: Duration::from_secs(20),
        };
        let mut backoff = ReconnectBackoff::new(config);

        let delays: Vec<_> = std::iter::from_fn(|| backoff.next_backoff()).collect();

        assert_eq!(delays.len(), 10);
        assert_eq!(delays[0], Duration::from_secs(3));
        assert_eq!(delays[1], Duration::from_secs(9));
        assert!(
            delays[2..].iter().all(|d| *d == Duration::from_secs(20)),
            "later delays are capped"
        );
    }

    #[test]
    fn reset_restarts_schedule() {
        let mut backoff = ReconnectBackoff::from(ReconnectConfig::default());
        _ = backoff.next_backoff();
        _ = backoff.next_backoff();

        backoff.reset();

        assert_eq!(backoff.attempt(), 0);
        assert_eq!(backoff.next_backoff(), Some(Duration::from_secs(2)));
    }

    #[test]
    fn zero_attempts_never_retries() {
        let config = ReconnectConfig {
            max_attempts: 0,
            ..ReconnectConfig::default()
        };
        let mut backoff = ReconnectBackoff::new(config);

        assert_eq!(backoff.next_backoff(), None);
    }

    #[test]
    fn default_heartbeat_is_ten_seconds() {
        let config = Config::default();
        assert_eq!(config.heartbeat_interval, Duration::from_secs(10));
    }
}
