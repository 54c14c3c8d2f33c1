//! Rate limiting module to prevent abuse
//!
//! Fixed-window counters per (user, action class). Fixed windows allow up to
//! 2x the configured budget across a window boundary; that is acceptable for
//! abuse mitigation and kept deliberately simpler than a sliding window.

use std::collections::HashMap;
use std::time::Duration;

use log::debug;
// Paused-clock aware; behaves like std::time::Instant outside a runtime
use tokio::time::Instant;

/// Independently budgeted classes of client actions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionClass {
    Message,
    Reaction,
    Typing,
}

impl ActionClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionClass::Message => "message",
            ActionClass::Reaction => "reaction",
            ActionClass::Typing => "typing",
        }
    }
}

struct Window {
    started_at: Instant,
    count: u32,
}

/// Fixed-window rate limiter keyed by (user id, action class)
pub struct RateLimiter {
    windows: HashMap<(String, ActionClass), Window>,
    limits: HashMap<ActionClass, u32>,
    window_size: Duration,
}

impl RateLimiter {
    pub fn new(messages_per_minute: u32, reactions_per_minute: u32, typing_per_minute: u32) -> Self {
        let mut limits = HashMap::new();
        limits.insert(ActionClass::Message, messages_per_minute);
        limits.insert(ActionClass::Reaction, reactions_per_minute);
        limits.insert(ActionClass::Typing, typing_per_minute);
        Self {
            windows: HashMap::new(),
            limits,
            window_size: Duration::from_secs(60),
        }
    }

    /// Try to consume one unit of budget for the given user and class.
    ///
    /// Returns false without mutating the counter once the limit is hit, so
    /// repeated calls within an exhausted window keep returning false.
    pub fn try_consume(&mut self, user_id: &str, class: ActionClass) -> bool {
        let limit = *self.limits.get(&class).unwrap_or(&0);
        if limit == 0 {
            return false;
        }

        let now = Instant::now();
        let window = self
            .windows
            .entry((user_id.to_string(), class))
            .or_insert(Window { started_at: now, count: 0 });

        if now.duration_since(window.started_at) >= self.window_size {
            window.started_at = now;
            window.count = 0;
        }

        if window.count >= limit {
            debug!("Rate limit hit: user={} class={}", user_id, class.as_str());
            return false;
        }

        window.count += 1;
        true
    }

    /// Drop counters whose window expired long ago to bound memory.
    /// Runs in O(active counters); called from a periodic sweep task.
    pub fn sweep(&mut self) -> usize {
        let now = Instant::now();
        let horizon = self.window_size * 2;
        let before = self.windows.len();
        self.windows
            .retain(|_, window| now.duration_since(window.started_at) < horizon);
        before - self.windows.len()
    }

    pub fn tracked_counters(&self) -> usize {
        self.windows.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_budget_consumed_then_denied() {
        let mut limiter = RateLimiter::new(30, 60, 120);
        for _ in 0..30 {
            assert!(limiter.try_consume("alice", ActionClass::Message));
        }
        // The 31st and every later call in the same window are denied
        assert!(!limiter.try_consume("alice", ActionClass::Message));
        assert!(!limiter.try_consume("alice", ActionClass::Message));
    }

    #[test]
    fn test_classes_have_independent_budgets() {
        let mut limiter = RateLimiter::new(1, 1, 1);
        assert!(limiter.try_consume("alice", ActionClass::Message));
        assert!(!limiter.try_consume("alice", ActionClass::Message));
        assert!(limiter.try_consume("alice", ActionClass::Reaction));
        assert!(limiter.try_consume("alice", ActionClass::Typing));
    }

    #[test]
    fn test_users_are_isolated() {
        let mut limiter = RateLimiter::new(1, 1, 1);
        assert!(limiter.try_consume("alice", ActionClass::Message));
        assert!(!limiter.try_consume("alice", ActionClass::Message));
        assert!(limiter.try_consume("bob", ActionClass::Message));
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_reset_restores_budget() {
        let mut limiter = RateLimiter::new(1, 1, 1);
        assert!(limiter.try_consume("alice", ActionClass::Message));
        assert!(!limiter.try_consume("alice", ActionClass::Message));

        // Crossing the window boundary starts a fresh budget
        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(limiter.try_consume("alice", ActionClass::Message));
        assert!(!limiter.try_consume("alice", ActionClass::Message));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_drops_expired_counters() {
        let mut limiter = RateLimiter::new(1, 1, 1);
        limiter.try_consume("alice", ActionClass::Message);
        assert_eq!(limiter.tracked_counters(), 1);

        // Entries younger than two windows survive
        tokio::time::advance(Duration::from_secs(60)).await;
        assert_eq!(limiter.sweep(), 0);
        assert_eq!(limiter.tracked_counters(), 1);

        tokio::time::advance(Duration::from_secs(61)).await;
        assert_eq!(limiter.sweep(), 1);
        assert_eq!(limiter.tracked_counters(), 0);
    }
}
