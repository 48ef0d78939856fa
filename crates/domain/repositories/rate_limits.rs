use std::time::Duration;

use mockall::automock;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub retry_after_secs: u64,
}

/// Fixed-window counter keyed by caller identity. A coarse abuse guard, not a correctness
/// mechanism: implementations may lose counts on restart.
#[automock]
pub trait RateLimitStore: Send + Sync {
    fn check_and_increment(&self, key: &str, max: u32, window: Duration) -> RateLimitDecision;
}
