//! Configuration for stores, transactions and sync.

use std::time::Duration;

/// Default number of STM attempts.
pub const DEFAULT_STM_ATTEMPTS: u32 = 5;

/// STM never gives up after fewer attempts than this.
pub const MIN_STM_ATTEMPTS: u32 = 3;

/// Configuration for optimistic transaction retries.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first.
    pub max_attempts: u32,
    /// Delay before the second attempt.
    pub initial_delay: Duration,
    /// Upper bound on any single delay.
    pub max_delay: Duration,
    /// Multiplier for exponential backoff.
    pub backoff_multiplier: f64,
    /// Whether to add up to 25% random jitter to delays.
    pub add_jitter: bool,
}

impl RetryConfig {
    /// Creates a retry configuration.
    ///
    /// `max_attempts` is raised to [`MIN_STM_ATTEMPTS`] if lower.
    #[must_use]
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(MIN_STM_ATTEMPTS),
            initial_delay: Duration::from_millis(5),
            max_delay: Duration::from_millis(200),
            backoff_multiplier: 2.0,
            add_jitter: true,
        }
    }

    /// Sets the initial delay.
    #[must_use]
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Sets the maximum delay.
    #[must_use]
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Sets the backoff multiplier.
    #[must_use]
    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Enables or disables jitter.
    #[must_use]
    pub fn with_jitter(mut self, enabled: bool) -> Self {
        self.add_jitter = enabled;
        self
    }

    /// Returns the number of attempts actually made.
    #[must_use]
    pub fn attempts(&self) -> u32 {
        self.max_attempts.max(MIN_STM_ATTEMPTS)
    }

    /// Calculates the delay before a given attempt (0-indexed).
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let base = self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(exponent);
        let delay_secs = base.min(self.max_delay.as_secs_f64());

        if self.add_jitter {
            let jitter = delay_secs * 0.25 * rand::random::<f64>();
            Duration::from_secs_f64(delay_secs + jitter)
        } else {
            Duration::from_secs_f64(delay_secs)
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::new(DEFAULT_STM_ATTEMPTS)
    }
}

/// Configuration for watch-driven cache sync.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    /// How often a sync loop checks for cancellation while idle.
    pub poll_interval: Duration,
    /// Default bound for revision and initial-sync waits.
    pub wait_timeout: Duration,
}

impl SyncConfig {
    /// Sets the cancellation poll interval.
    #[must_use]
    pub const fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Sets the default wait timeout.
    #[must_use]
    pub const fn with_wait_timeout(mut self, timeout: Duration) -> Self {
        self.wait_timeout = timeout;
        self
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(50),
            wait_timeout: Duration::from_secs(10),
        }
    }
}

/// Combined configuration for an object store and its sync.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StoreConfig {
    /// STM retry behaviour.
    pub stm: RetryConfig,
    /// Sync behaviour.
    pub sync: SyncConfig,
}

impl StoreConfig {
    /// Creates a configuration with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the STM retry configuration.
    #[must_use]
    pub fn with_stm(mut self, stm: RetryConfig) -> Self {
        self.stm = stm;
        self
    }

    /// Sets the sync configuration.
    #[must_use]
    pub fn with_sync(mut self, sync: SyncConfig) -> Self {
        self.sync = sync;
        self
    }
}
