use governor::{
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter,
};
use std::collections::HashMap;
use std::num::NonZeroU32;
use std::sync::{Arc, Mutex};

const DEFAULT_PER_MINUTE: u32 = 300;

/// Process-local pre-filter in front of the admission engine. A caller
/// hammering faster than the flat quota is refused before any store
/// round-trip happens, which keeps floods from turning into store load.
#[derive(Clone)]
pub struct FloodGuard {
    per_minute: NonZeroU32,
    limiters: Arc<Mutex<HashMap<String, RateLimiter<NotKeyed, InMemoryState, DefaultClock>>>>,
}

impl FloodGuard {
    pub fn new(per_minute: u32) -> Self {
        let per_minute = NonZeroU32::new(per_minute.max(1))
            .unwrap_or(NonZeroU32::new(DEFAULT_PER_MINUTE).unwrap());
        Self {
            per_minute,
            limiters: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn from_env() -> Self {
        let per_minute = std::env::var("FLOOD_GUARD_PER_MINUTE")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_PER_MINUTE);
        Self::new(per_minute)
    }

    /// True when the caller is still under the flat per-minute quota.
    pub fn admit(&self, identity: &str) -> bool {
        let mut limiters = self.limiters.lock().unwrap();
        let limiter = limiters
            .entry(identity.to_string())
            .or_insert_with(|| RateLimiter::direct(Quota::per_minute(self.per_minute)));
        limiter.check().is_ok()
    }

    /// Drop tracked callers so the map does not grow without bound.
    /// Losing state just refills quotas, which is safe.
    pub fn clear(&self) {
        self.limiters.lock().unwrap().clear();
    }

    pub fn tracked(&self) -> usize {
        self.limiters.lock().unwrap().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quota_enforced() {
        let guard = FloodGuard::new(10);
        for i in 0..10 {
            assert!(guard.admit("caller"), "request {} should pass", i + 1);
        }
        assert!(!guard.admit("caller"));
    }

    #[test]
    fn test_callers_independent() {
        let guard = FloodGuard::new(5);
        for _ in 0..5 {
            assert!(guard.admit("a"));
        }
        assert!(!guard.admit("a"));
        assert!(guard.admit("b"));
    }

    #[test]
    fn test_zero_quota_coerced_to_one() {
        let guard = FloodGuard::new(0);
        assert!(guard.admit("x"));
        assert!(!guard.admit("x"));
    }

    #[test]
    fn test_clear_refills() {
        let guard = FloodGuard::new(1);
        assert!(guard.admit("a"));
        assert!(!guard.admit("a"));
        guard.clear();
        assert_eq!(guard.tracked(), 0);
        assert!(guard.admit("a"));
    }
}
