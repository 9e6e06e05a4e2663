use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use std::sync::Arc;

use super::clock::Clock;
use crate::config::LoginAttemptConfig;

/// Per-username count of failed logins inside a sliding window. Only
/// failures are recorded, so a caller with good credentials is never
/// throttled by its own successes.
#[derive(Clone)]
pub struct LoginAttempts {
    enabled: bool,
    max_attempts: usize,
    window: Duration,
    failures: Arc<DashMap<String, Vec<DateTime<Utc>>>>,
    clock: Arc<dyn Clock>,
}

impl LoginAttempts {
    pub fn new(config: &LoginAttemptConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            enabled: config.enabled,
            max_attempts: config.max_attempts.max(1) as usize,
            window: Duration::seconds(config.window_seconds.max(1) as i64),
            failures: Arc::new(DashMap::new()),
            clock,
        }
    }

    /// Checks `username` against the quota without recording anything.
    /// `Err` carries the seconds until the oldest failure leaves the window.
    pub fn check(&self, username: &str) -> Result<(), u64> {
        if !self.enabled {
            return Ok(());
        }

        let now = self.clock.now();
        let Some(mut entry) = self.failures.get_mut(&username.to_lowercase()) else {
            return Ok(());
        };
        entry.retain(|at| now - *at < self.window);

        if entry.len() < self.max_attempts {
            return Ok(());
        }

        let oldest = entry.iter().min().copied().unwrap_or(now);
        let wait = (oldest + self.window - now).num_seconds();
        Err(wait.max(1) as u64)
    }

    pub fn record_failure(&self, username: &str) {
        if !self.enabled {
            return;
        }

        let now = self.clock.now();
        let mut entry = self.failures.entry(username.to_lowercase()).or_default();
        entry.retain(|at| now - *at < self.window);
        entry.push(now);
    }
}
