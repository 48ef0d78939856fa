use std::{
    collections::HashMap,
    sync::Mutex,
    time::{Duration, Instant},
};

use crate::domain::repositories::rate_limits::{RateLimitDecision, RateLimitStore};

const PRUNE_THRESHOLD: usize = 10_000;

#[derive(Debug, Clone, Copy)]
struct Window {
    count: u32,
    resets_at: Instant,
}

/// Process-local fixed windows. Counts are per instance; a horizontally scaled
/// deployment needs a shared store behind the same trait.
#[derive(Debug, Default)]
pub struct InMemoryRateLimitStore {
    windows: Mutex<HashMap<String, Window>>,
}

impl InMemoryRateLimitStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn ceil_secs(duration: Duration) -> u64 {
    duration.as_millis().div_ceil(1000) as u64
}

impl RateLimitStore for InMemoryRateLimitStore {
    fn check_and_increment(&self, key: &str, max: u32, window: Duration) -> RateLimitDecision {
        let now = Instant::now();
        let mut windows = self
            .windows
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        if windows.len() >= PRUNE_THRESHOLD {
            windows.retain(|_, entry| entry.resets_at > now);
        }

        let entry = windows.entry(key.to_string()).or_insert(Window {
            count: 0,
            resets_at: now + window,
        });

        if entry.resets_at <= now {
            entry.count = 0;
            entry.resets_at = now + window;
        }

        let retry_after_secs = ceil_secs(entry.resets_at.saturating_duration_since(now));

        if entry.count >= max {
            return RateLimitDecision {
                allowed: false,
                retry_after_secs: retry_after_secs.max(1),
            };
        }

        entry.count += 1;
        RateLimitDecision {
            allowed: true,
            retry_after_secs,
        }
    }
}
