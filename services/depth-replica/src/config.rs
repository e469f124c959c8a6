//! Supervisor configuration
//!
//! Defaults suit a single venue feed at normal update rates. Every field can
//! be overridden from the environment through [`SupervisorConfig::from_env`];
//! unparsable values are ignored and leave the default in place.

use std::time::Duration;

/// How the supervisor retries snapshot loads.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Consecutive failed Init attempts before giving up. `None` retries
    /// forever.
    pub max_sync_attempts: Option<u32>,
    /// First retry delay.
    pub base_delay: Duration,
    /// Cap on the retry delay.
    pub max_delay: Duration,
    /// Jitter as a fraction of each delay.
    pub jitter_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_sync_attempts: Some(5),
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(30),
            jitter_factor: 0.1,
        }
    }
}

impl RetryPolicy {
    /// Whether `attempts` consecutive failures exhaust the policy.
    pub fn exhausted(&self, attempts: u32) -> bool {
        self.max_sync_attempts.is_some_and(|max| attempts >= max)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SupervisorConfig {
    /// Silence on the diff stream longer than this forces a reconnect.
    pub inactivity_timeout: Duration,
    /// Bound on one snapshot fetch; a fetch that takes longer counts as a
    /// failed Init attempt.
    pub snapshot_timeout: Duration,
    pub retry: RetryPolicy,
    /// Bound of the supervisor command queue.
    pub command_capacity: usize,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            inactivity_timeout: Duration::from_secs(30),
            snapshot_timeout: Duration::from_secs(10),
            retry: RetryPolicy::default(),
            command_capacity: 16,
        }
    }
}

impl SupervisorConfig {
    /// Load from environment variables on top of the defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load from an arbitrary key lookup on top of the defaults.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = Self::default();
        let millis = |key: &str| {
            lookup(key)
                .and_then(|v| v.trim().parse::<u64>().ok())
                .map(Duration::from_millis)
        };

        if let Some(timeout) = millis("DEPTH_INACTIVITY_TIMEOUT_MS") {
            if !timeout.is_zero() {
                cfg.inactivity_timeout = timeout;
            }
        }
        if let Some(timeout) = millis("DEPTH_SNAPSHOT_TIMEOUT_MS") {
            if !timeout.is_zero() {
                cfg.snapshot_timeout = timeout;
            }
        }
        if let Some(v) = lookup("DEPTH_MAX_SYNC_ATTEMPTS") {
            if let Ok(n) = v.trim().parse::<u32>() {
                cfg.retry.max_sync_attempts = if n == 0 { None } else { Some(n) };
            }
        }
        if let Some(base) = millis("DEPTH_RETRY_BASE_MS") {
            cfg.retry.base_delay = base;
        }
        if let Some(max) = millis("DEPTH_RETRY_MAX_MS") {
            cfg.retry.max_delay = max;
        }
        if let Some(v) = lookup("DEPTH_RETRY_JITTER") {
            if let Ok(f) = v.trim().parse::<f64>() {
                if (0.0..=1.0).contains(&f) {
                    cfg.retry.jitter_factor = f;
                }
            }
        }
        if let Some(v) = lookup("DEPTH_COMMAND_CAPACITY") {
            if let Ok(n) = v.trim().parse::<usize>() {
                if n > 0 {
                    cfg.command_capacity = n;
                }
            }
        }

        cfg
    }
}
