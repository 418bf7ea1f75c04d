//! Inter-round timing.
//!
//! # Polling Strategy
//!
//! - **Poll interval**: 1 second by default (override with
//!   `STATUS_WATCH_POLL_INTERVAL_MS`)
//! - **Jitter**: 0-20% added per watch so many watches don't poll in lockstep
//! - **Initial stagger**: up to half an interval, based on the watch id hash,
//!   to spread load when many watches resume at once

use std::hash::{Hash, Hasher};
use std::time::Duration;

use crate::types::WatchId;

const DEFAULT_POLL_INTERVAL_MS: u64 = 1000;

const DEFAULT_JITTER_PERCENT: u8 = 20;

pub const POLL_INTERVAL_ENV: &str = "STATUS_WATCH_POLL_INTERVAL_MS";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollConfig {
    /// Base delay between the end of one round and the start of the next.
    pub poll_interval: Duration,

    /// Jitter percentage added to the interval (0-100).
    pub jitter_percent: u8,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl PollConfig {
    pub fn new() -> Self {
        PollConfig {
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            jitter_percent: DEFAULT_JITTER_PERCENT,
        }
    }

    /// Fixed interval with no jitter. Mostly useful in tests.
    pub fn fixed(interval: Duration) -> Self {
        PollConfig {
            poll_interval: interval,
            jitter_percent: 0,
        }
    }

    /// Reads `STATUS_WATCH_POLL_INTERVAL_MS`; unset or unparsable values fall
    /// back to the default.
    pub fn from_env() -> Self {
        Self::from_env_value(std::env::var(POLL_INTERVAL_ENV).ok().as_deref())
    }

    fn from_env_value(value: Option<&str>) -> Self {
        let poll_ms = value
            .and_then(|s| s.trim().parse::<u64>().ok())
            .filter(|ms| *ms > 0)
            .unwrap_or(DEFAULT_POLL_INTERVAL_MS);

        PollConfig {
            poll_interval: Duration::from_millis(poll_ms),
            ..Self::new()
        }
    }

    /// Interval with a deterministic per-watch jitter:
    /// `interval * (1 + (hash(watch) % jitter_percent) / 100)`.
    pub fn poll_interval_with_jitter(&self, watch: &WatchId) -> Duration {
        self.poll_interval.mul_f64(self.jitter_factor(watch))
    }

    /// Delay before a watch's first round: `hash(watch) % (interval / 2)`.
    pub fn initial_poll_delay(&self, watch: &WatchId) -> Duration {
        let max_delay_ms = (self.poll_interval.as_millis() / 2) as u64;
        Duration::from_millis(watch_hash(watch) % max_delay_ms.max(1))
    }

    fn jitter_factor(&self, watch: &WatchId) -> f64 {
        if self.jitter_percent == 0 {
            return 1.0;
        }
        let jitter = (watch_hash(watch) % self.jitter_percent as u64) as f64 / 100.0;
        1.0 + jitter
    }
}

fn watch_hash(watch: &WatchId) -> u64 {
    let mut hasher = std::hash::DefaultHasher::new();
    watch.hash(&mut hasher);
    hasher.finish()
}
