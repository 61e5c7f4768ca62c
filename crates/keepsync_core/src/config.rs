//! Offline configuration.

use crate::filter::Filter;
use crate::retention::{RetentionPolicy, SortKey};
use std::time::Duration;

/// Entity type holding user documents.
pub const DEFAULT_IDENTITY_TYPE: &str = "users";

/// Global configuration for offline continuity.
///
/// The `filter`, `sort` and `limit` fields form the default retention
/// policy, used for every type kept through `keep_all` and as the base for
/// explicit `keep` calls.
#[derive(Debug, Clone)]
pub struct OfflineConfig {
    /// Default filter.
    pub filter: Filter,
    /// Default sort key.
    pub sort: SortKey,
    /// Default per-type document limit (`None` = unbounded).
    pub limit: Option<usize>,
    /// Keep every entity type with the default policy.
    pub keep_all: bool,
    /// Replay queued operations automatically on reconnect.
    pub auto_sync: bool,
    /// Entity type whose documents represent authenticated identities.
    pub identity_type: String,
    /// Backoff for corrective deletes.
    pub retry: RetryConfig,
}

impl OfflineConfig {
    /// Creates a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the default filter.
    #[must_use]
    pub fn with_filter(mut self, filter: Filter) -> Self {
        self.filter = filter;
        self
    }

    /// Sets the default sort key.
    #[must_use]
    pub fn with_sort(mut self, sort: SortKey) -> Self {
        self.sort = sort;
        self
    }

    /// Sets the default document limit.
    #[must_use]
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Removes the default document limit.
    #[must_use]
    pub fn unbounded(mut self) -> Self {
        self.limit = None;
        self
    }

    /// Sets whether every entity type is kept.
    #[must_use]
    pub fn with_keep_all(mut self, keep_all: bool) -> Self {
        self.keep_all = keep_all;
        self
    }

    /// Sets whether queued operations replay automatically.
    #[must_use]
    pub fn with_auto_sync(mut self, auto_sync: bool) -> Self {
        self.auto_sync = auto_sync;
        self
    }

    /// Sets the identity entity type.
    #[must_use]
    pub fn with_identity_type(mut self, name: impl Into<String>) -> Self {
        self.identity_type = name.into();
        self
    }

    /// Sets the retry configuration.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Returns the default retention policy.
    #[must_use]
    pub fn default_policy(&self) -> RetentionPolicy {
        RetentionPolicy {
            filter: self.filter.clone(),
            sort: self.sort.clone(),
            limit: self.limit,
        }
    }

    /// Returns a policy with `filter` and the default sort and limit.
    #[must_use]
    pub fn policy(&self, filter: Filter) -> RetentionPolicy {
        RetentionPolicy {
            filter,
            ..self.default_policy()
        }
    }
}

impl Default for OfflineConfig {
    fn default() -> Self {
        Self {
            filter: Filter::All,
            sort: SortKey::descending("updatedAt"),
            limit: Some(100),
            keep_all: true,
            auto_sync: true,
            identity_type: DEFAULT_IDENTITY_TYPE.to_string(),
            retry: RetryConfig::default(),
        }
    }
}

/// Configuration for retry behavior.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first one.
    pub max_attempts: u32,
    /// Delay before the second attempt.
    pub initial_delay: Duration,
    /// Maximum delay between attempts.
    pub max_delay: Duration,
    /// Multiplier for exponential backoff.
    pub backoff_multiplier: f64,
    /// Whether to add jitter to delays.
    pub add_jitter: bool,
}

impl RetryConfig {
    /// Creates a retry configuration with `max_attempts` attempts.
    #[must_use]
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            add_jitter: false,
        }
    }

    /// Creates a configuration with a single attempt.
    #[must_use]
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            backoff_multiplier: 1.0,
            add_jitter: false,
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
    pub fn with_jitter(mut self, add_jitter: bool) -> Self {
        self.add_jitter = add_jitter;
        self
    }

    /// Calculates the delay before a given attempt (0-indexed).
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let base_delay = self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(exponent);
        let delay_secs = base_delay.min(self.max_delay.as_secs_f64());

        if self.add_jitter {
            // Up to 25% extra.
            let jitter = delay_secs * 0.25 * rand_jitter();
            Duration::from_secs_f64(delay_secs + jitter)
        } else {
            Duration::from_secs_f64(delay_secs)
        }
    }

    /// Runs `op` until it succeeds or the attempts are exhausted, sleeping
    /// between attempts.
    ///
    /// # Errors
    ///
    /// Returns the last error once every attempt has failed.
    pub fn run<T, E>(&self, mut op: impl FnMut(u32) -> Result<T, E>) -> Result<T, (u32, E)> {
        let attempts = self.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            match op(attempt) {
                Ok(value) => return Ok(value),
                Err(err) if attempt + 1 >= attempts => return Err((attempts, err)),
                Err(_) => {
                    attempt += 1;
                    std::thread::sleep(self.delay_for_attempt(attempt));
                }
            }
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::new(3)
    }
}

fn rand_jitter() -> f64 {
    use std::time::SystemTime;
    let nanos = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_nanos();
    f64::from(nanos % 1000) / 1000.0
}
