use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

/// Outcome of a local window check.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LocalDecision {
    pub allowed: bool,
    pub remaining: u64,
    pub reset_at_ms: u64,
    pub retry_after_ms: Option<u64>,
}

#[derive(Default)]
struct KeyState {
    /// Admission timestamps inside the current window, oldest first.
    entries: VecDeque<u64>,
    /// Set on denial; requests before this instant are refused outright.
    blocked_until_ms: Option<u64>,
}

/// In-process fallback limiter for when the shared store is unreachable
/// and the operator has chosen fail-closed. Same window arithmetic as the
/// store-backed path, but scoped to this process: in a multi-instance
/// deployment each instance enforces the limit independently, so the
/// effective global limit is larger. That looseness is accepted for a
/// degraded mode.
#[derive(Clone)]
pub struct LocalOnlyLimiter {
    state: Arc<Mutex<HashMap<String, KeyState>>>,
}

impl LocalOnlyLimiter {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Check one request against a weighted sliding window.
    /// A request is denied when admitting it would push
    /// `entries * cost` past `limit`.
    pub fn check(
        &self,
        key: &str,
        limit: u64,
        window_ms: u64,
        block_ms: u64,
        cost: u64,
    ) -> LocalDecision {
        self.check_at(key, limit, window_ms, block_ms, cost, now_ms())
    }

    pub fn check_at(
        &self,
        key: &str,
        limit: u64,
        window_ms: u64,
        block_ms: u64,
        cost: u64,
        now_ms: u64,
    ) -> LocalDecision {
        let cost = cost.max(1);
        let mut map = self.state.lock().unwrap();
        let state = map.entry(key.to_string()).or_default();

        if let Some(until) = state.blocked_until_ms {
            if now_ms < until {
                return LocalDecision {
                    allowed: false,
                    remaining: 0,
                    reset_at_ms: until,
                    retry_after_ms: Some(until - now_ms),
                };
            }
            state.blocked_until_ms = None;
        }

        let window_start = now_ms.saturating_sub(window_ms);
        while matches!(state.entries.front(), Some(&ts) if ts <= window_start) {
            state.entries.pop_front();
        }

        state.entries.push_back(now_ms);
        let weighted = state.entries.len() as u64 * cost;
        if weighted > limit {
            state.entries.pop_back();
            let until = now_ms + block_ms;
            state.blocked_until_ms = Some(until);
            return LocalDecision {
                allowed: false,
                remaining: 0,
                reset_at_ms: until,
                retry_after_ms: Some(block_ms),
            };
        }

        let oldest = state.entries.front().copied().unwrap_or(now_ms);
        LocalDecision {
            allowed: true,
            remaining: (limit - weighted) / cost,
            reset_at_ms: oldest + window_ms,
            retry_after_ms: None,
        }
    }

    /// Forget everything recorded for a key. Safe to call repeatedly and
    /// for keys that were never seen.
    pub fn reset(&self, key: &str) {
        self.state.lock().unwrap().remove(key);
    }

    /// Drop empty windows and expired blocks so the map does not grow
    /// without bound.
    pub fn prune(&self, now_ms: u64, window_ms: u64) {
        let window_start = now_ms.saturating_sub(window_ms);
        let mut map = self.state.lock().unwrap();
        map.retain(|_, state| {
            while matches!(state.entries.front(), Some(&ts) if ts <= window_start) {
                state.entries.pop_front();
            }
            if matches!(state.blocked_until_ms, Some(until) if until <= now_ms) {
                state.blocked_until_ms = None;
            }
            !state.entries.is_empty() || state.blocked_until_ms.is_some()
        });
    }

    #[cfg(test)]
    fn tracked_keys(&self) -> usize {
        self.state.lock().unwrap().len()
    }
}

impl Default for LocalOnlyLimiter {
    fn default() -> Self {
        Self::new()
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: u64 = 1_700_000_000_000;
    const MINUTE: u64 = 60_000;

    #[test]
    fn test_limit_boundary() {
        let limiter = LocalOnlyLimiter::new();
        for i in 0..100 {
            let d = limiter.check_at("u1:read", 100, MINUTE, MINUTE, 1, BASE + i * 100);
            assert!(d.allowed, "request {} should be admitted", i + 1);
        }
        let d = limiter.check_at("u1:read", 100, MINUTE, MINUTE, 1, BASE + 10_000);
        assert!(!d.allowed);
        assert_eq!(d.remaining, 0);
        assert!(d.retry_after_ms.is_some());
    }

    #[test]
    fn test_window_slides() {
        let limiter = LocalOnlyLimiter::new();
        for i in 0..5 {
            assert!(limiter.check_at("u2:w", 5, MINUTE, 1000, 1, BASE + i).allowed);
        }
        assert!(!limiter.check_at("u2:w", 5, MINUTE, 1000, 1, BASE + 10).allowed);
        // After the block lapses and the old entries fall out of the
        // window, requests are admitted again.
        let later = BASE + MINUTE + 1000;
        assert!(limiter.check_at("u2:w", 5, MINUTE, 1000, 1, later).allowed);
    }

    #[test]
    fn test_denied_request_not_counted() {
        let limiter = LocalOnlyLimiter::new();
        for i in 0..3 {
            assert!(limiter.check_at("u3:w", 3, MINUTE, 500, 1, BASE + i).allowed);
        }
        assert!(!limiter.check_at("u3:w", 3, MINUTE, 500, 1, BASE + 10).allowed);
        // The denial set a block but did not consume a slot: once the block
        // expires, the window still holds exactly 3 entries until they age out.
        let after_block = BASE + 600;
        let d = limiter.check_at("u3:w", 3, MINUTE, 500, 1, after_block);
        assert!(!d.allowed);
    }

    #[test]
    fn test_cost_weighting() {
        let limiter = LocalOnlyLimiter::new();
        for i in 0..3 {
            let d = limiter.check_at("u4:w", 10, MINUTE, 1000, 3, BASE + i);
            assert!(d.allowed, "weighted request {} should fit", i + 1);
        }
        // A fourth costs 12 of 10.
        assert!(!limiter.check_at("u4:w", 10, MINUTE, 1000, 3, BASE + 10).allowed);
    }

    #[test]
    fn test_remaining_counts_down() {
        let limiter = LocalOnlyLimiter::new();
        let d = limiter.check_at("u5:w", 10, MINUTE, 1000, 2, BASE);
        assert_eq!(d.remaining, 4);
        let d = limiter.check_at("u5:w", 10, MINUTE, 1000, 2, BASE + 1);
        assert_eq!(d.remaining, 3);
    }

    #[test]
    fn test_block_denies_until_expiry() {
        let limiter = LocalOnlyLimiter::new();
        assert!(limiter.check_at("u6:w", 1, MINUTE, 5000, 1, BASE).allowed);
        assert!(!limiter.check_at("u6:w", 1, MINUTE, 5000, 1, BASE + 1).allowed);
        let d = limiter.check_at("u6:w", 1, MINUTE, 5000, 1, BASE + 2000);
        assert!(!d.allowed);
        assert_eq!(d.retry_after_ms, Some(3001));
    }

    #[test]
    fn test_reset_is_idempotent() {
        let limiter = LocalOnlyLimiter::new();
        assert!(limiter.check_at("u7:w", 1, MINUTE, 5000, 1, BASE).allowed);
        assert!(!limiter.check_at("u7:w", 1, MINUTE, 5000, 1, BASE + 1).allowed);
        limiter.reset("u7:w");
        limiter.reset("u7:w");
        limiter.reset("never-seen");
        assert!(limiter.check_at("u7:w", 1, MINUTE, 5000, 1, BASE + 2).allowed);
    }

    #[test]
    fn test_keys_are_independent() {
        let limiter = LocalOnlyLimiter::new();
        assert!(limiter.check_at("a", 1, MINUTE, 5000, 1, BASE).allowed);
        assert!(!limiter.check_at("a", 1, MINUTE, 5000, 1, BASE + 1).allowed);
        assert!(limiter.check_at("b", 1, MINUTE, 5000, 1, BASE + 2).allowed);
    }

    #[test]
    fn test_prune_drops_stale_state() {
        let limiter = LocalOnlyLimiter::new();
        limiter.check_at("x", 10, MINUTE, 1000, 1, BASE);
        limiter.check_at("y", 10, MINUTE, 1000, 1, BASE);
        assert_eq!(limiter.tracked_keys(), 2);
        limiter.prune(BASE + 2 * MINUTE, MINUTE);
        assert_eq!(limiter.tracked_keys(), 0);
    }
}
