use crate::directory::{now_secs, DirectoryClient};
use crate::engine::abuse::{AbuseTracker, IncidentType, RestrictionType};
use crate::engine::actions::{metadata_of, ActionCategory, ActionMetadata, ActionType, Severity};
use crate::engine::adaptive::AdaptiveRateLimiter;
use crate::engine::local_limiter::LocalOnlyLimiter;
use crate::engine::metrics_collector::MetricsCollector;
use crate::engine::patterns::{PatternDetector, RequestContext, SuggestedAction};
use crate::engine::trust::{TrustLevel, TrustScorer};
use crate::redis_client::RedisClient;
use anyhow::{Result, anyhow};
use serde::{Deserialize, Serialize};
use std::time::Instant;

const ADMIN_CACHE_TTL: u64 = 3600;
const PATTERN_BLOCK_SECS: u64 = 3600;
const BAN_RETRY_SECS: u64 = 86_400;

/// Per-type window parameters. Data, not code: tuning means editing this
/// table, never the admission flow.
#[derive(Debug, Clone, Copy)]
pub struct WindowRule {
    pub limit: u64,
    pub window_secs: u64,
    pub block_secs: u64,
}

pub fn window_rule(action_type: ActionType) -> WindowRule {
    match action_type {
        ActionType::Read => WindowRule { limit: 100, window_secs: 60, block_secs: 60 },
        ActionType::Write => WindowRule { limit: 20, window_secs: 60, block_secs: 300 },
        ActionType::Sensitive => WindowRule { limit: 10, window_secs: 300, block_secs: 900 },
        ActionType::Critical => WindowRule { limit: 5, window_secs: 3600, block_secs: 3600 },
        ActionType::Admin => WindowRule { limit: 50, window_secs: 60, block_secs: 600 },
    }
}

/// Trust discounts the per-request cost: a fully trusted caller pays half.
pub fn effective_cost(base_cost: u32, trust_score: f64) -> u64 {
    let discounted = (base_cost as f64 * (1.0 - trust_score * 0.5)).ceil() as u64;
    discounted.max(1)
}

/// A window must always fit at least one request. Without this clamp an
/// action whose cost exceeds its window limit (registration, password
/// reset) would deny even the very first attempt and then block the caller.
pub fn admissible_limit(limit: u64, cost: u64) -> u64 {
    limit.max(cost)
}

/// Machine-readable denial class; drives the HTTP status at the boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DenyKind {
    /// Window quota exhausted on this request.
    RateLimited,
    /// A standing block marker from an earlier quota breach.
    Blocked,
    /// Behavioral pattern block.
    PatternBlock,
    /// Active restriction from the abuse ladder.
    Restricted,
    /// Account-level ban.
    Banned,
    /// Action reserved for administrators.
    AdminOnly,
}

impl DenyKind {
    /// Quota exhaustion retries after a wait (429); everything else is a
    /// hard refusal (403).
    pub fn is_forbidden(self) -> bool {
        !matches!(self, DenyKind::RateLimited | DenyKind::Blocked)
    }

    /// Marker string persisted with the block key so a later hit on the
    /// same marker maps back to the right class.
    pub fn marker(self) -> &'static str {
        match self {
            DenyKind::PatternBlock => "pattern_block",
            _ => "rate_limited",
        }
    }

    pub fn from_marker(marker: &str) -> Self {
        match marker {
            "pattern_block" => DenyKind::PatternBlock,
            _ => DenyKind::Blocked,
        }
    }
}

/// What happens when the shared store is unreachable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailMode {
    /// Admit everything, log loudly. The default: availability first.
    Open,
    /// Fall back to the per-process limiter.
    Closed,
}

impl FailMode {
    pub fn from_env() -> Self {
        match std::env::var("FAIL_MODE").as_deref() {
            Ok("closed") => FailMode::Closed,
            _ => FailMode::Open,
        }
    }
}

/// The decision handed back to the boundary layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitResult {
    pub allowed: bool,
    pub limit: u64,
    pub remaining: u64,
    /// Unix seconds the current window (or block) lapses.
    pub reset_at: u64,
    /// Seconds to wait before retrying; only set on denial.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub trust_level: TrustLevel,
    pub action_cost: u64,
    pub verification_required: bool,
    /// True when this decision was made without the shared store.
    pub degraded: bool,
    /// Set on denial; None while allowed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deny_kind: Option<DenyKind>,
}

impl RateLimitResult {
    fn deny(
        limit: u64,
        reset_at: u64,
        retry_after: u64,
        reason: String,
        trust_level: TrustLevel,
        cost: u64,
        kind: DenyKind,
    ) -> Self {
        Self {
            allowed: false,
            limit,
            remaining: 0,
            reset_at,
            retry_after: Some(retry_after),
            reason: Some(reason),
            trust_level,
            action_cost: cost,
            verification_required: false,
            degraded: false,
            deny_kind: Some(kind),
        }
    }
}

/// Read-only view for the status endpoint. Looking never consumes quota.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitStatus {
    pub action: ActionCategory,
    pub limit: u64,
    pub used: u64,
    pub remaining: u64,
    pub window_secs: u64,
    pub blocked: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub block_expires_in: Option<u64>,
    pub trust_level: TrustLevel,
}

/// The admission engine. One `check` call blends the static action table,
/// the caller's trust, behavioral detection, adaptive scaling and the
/// shared sliding window into a single allow/deny decision.
#[derive(Clone)]
pub struct RateLimiter {
    redis: RedisClient,
    directory: DirectoryClient,
    trust: TrustScorer,
    patterns: PatternDetector,
    adaptive: AdaptiveRateLimiter,
    abuse: AbuseTracker,
    metrics: MetricsCollector,
    local: LocalOnlyLimiter,
    fail_mode: FailMode,
}

impl RateLimiter {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        redis: RedisClient,
        directory: DirectoryClient,
        trust: TrustScorer,
        patterns: PatternDetector,
        adaptive: AdaptiveRateLimiter,
        abuse: AbuseTracker,
        metrics: MetricsCollector,
        fail_mode: FailMode,
    ) -> Self {
        Self {
            redis,
            directory,
            trust,
            patterns,
            adaptive,
            abuse,
            metrics,
            local: LocalOnlyLimiter::new(),
            fail_mode,
        }
    }

    fn window_key(action: ActionCategory, identity: &str) -> String {
        format!("ratelimit:{}:{}", action.as_str(), identity)
    }

    fn block_key(action: ActionCategory, identity: &str) -> String {
        format!("ratelimit:block:{}:{}", action.as_str(), identity)
    }

    fn admin_key(identity: &str) -> String {
        format!("admin:{}", identity)
    }

    /// Decide whether one request is admitted.
    pub async fn check(
        &self,
        identity: &str,
        action: ActionCategory,
        ctx: &RequestContext,
    ) -> RateLimitResult {
        let started = Instant::now();
        let meta = metadata_of(action);

        let result = match self.check_inner(identity, &meta, ctx).await {
            Ok(result) => result,
            Err(e) => {
                eprintln!("Admission check degraded for {}: {}", identity, e);
                let degraded = self.degraded_decision(identity, &meta);
                self.record_outcome(identity, action, &degraded, true, started);
                return degraded;
            }
        };

        self.record_outcome(identity, action, &result, false, started);
        self.log_and_learn(identity, action, &result, ctx);
        result
    }

    async fn check_inner(
        &self,
        identity: &str,
        meta: &ActionMetadata,
        ctx: &RequestContext,
    ) -> Result<RateLimitResult> {
        let now = now_secs();
        let rule = window_rule(meta.action_type);

        // Admins bypass admission entirely; the flag is cached an hour.
        if self.is_admin_cached(identity).await? {
            return Ok(RateLimitResult {
                allowed: true,
                limit: rule.limit,
                remaining: rule.limit,
                reset_at: now + rule.window_secs,
                retry_after: None,
                reason: Some("admin bypass".to_string()),
                trust_level: TrustLevel::Premium,
                action_cost: 0,
                verification_required: false,
                degraded: false,
                deny_kind: None,
            });
        }
        if meta.admin_only {
            return Ok(RateLimitResult::deny(
                rule.limit,
                now + rule.window_secs,
                rule.window_secs,
                "admin-only action".to_string(),
                TrustLevel::New,
                meta.cost as u64,
                DenyKind::AdminOnly,
            ));
        }

        let trust = self.trust.score(identity).await?;
        let cost = effective_cost(meta.cost, trust.score);

        if trust.is_banned_profile() {
            return Ok(RateLimitResult::deny(
                rule.limit,
                now + BAN_RETRY_SECS,
                BAN_RETRY_SECS,
                "account banned".to_string(),
                trust.level,
                cost,
                DenyKind::Banned,
            ));
        }

        // Standing restrictions from the abuse ladder.
        let mut throttled = false;
        let mut verification_required = false;
        for restriction in self.abuse.active_restrictions(identity).await? {
            let remaining = restriction
                .expires_at
                .map(|at| at.saturating_sub(now))
                .unwrap_or(BAN_RETRY_SECS);
            match restriction.restriction_type {
                RestrictionType::Ban | RestrictionType::Block => {
                    return Ok(RateLimitResult::deny(
                        rule.limit,
                        now + remaining,
                        remaining,
                        format!("restricted: {}", restriction.reason),
                        trust.level,
                        cost,
                        DenyKind::Restricted,
                    ));
                }
                RestrictionType::Throttle => throttled = true,
                RestrictionType::Challenge => verification_required = true,
            }
        }
        if meta.requires_verification && trust.level == TrustLevel::New {
            verification_required = true;
        }

        // An earlier denial may have left a block marker; its stored value
        // says which kind of denial produced it.
        let block_key = Self::block_key(meta.category, identity);
        if let Some(marker) = self
            .redis
            .get(&block_key)
            .await
            .map_err(|e| anyhow!("Failed to check block marker: {}", e))?
        {
            let ttl = self.redis.ttl(&block_key).await.unwrap_or(-1).max(1) as u64;
            return Ok(RateLimitResult::deny(
                rule.limit,
                now + ttl,
                ttl,
                "temporarily blocked after earlier limit breach".to_string(),
                trust.level,
                cost,
                DenyKind::from_marker(&marker),
            ));
        }

        let detection = self.patterns.detect(identity, meta, ctx).await?;
        if detection.detected {
            self.metrics.record_patterns(&detection.patterns).await;
        }
        if detection.detected && detection.severity == Severity::Critical {
            self.redis
                .set_ex(&block_key, DenyKind::PatternBlock.marker(), PATTERN_BLOCK_SECS)
                .await
                .map_err(|e| anyhow!("Failed to set pattern block: {}", e))?;
            let tracker = self.abuse.clone();
            let owner = identity.to_string();
            let category = meta.category;
            let patterns = detection.patterns.clone();
            let severity = detection.severity;
            tokio::spawn(async move {
                if let Err(e) = tracker
                    .record_incident(
                        &owner,
                        IncidentType::PatternDetected,
                        severity,
                        category,
                        &patterns,
                        "critical behavioral pattern",
                    )
                    .await
                {
                    eprintln!("Failed to record pattern incident for {}: {}", owner, e);
                }
            });
            let reason = match detection.suggested_action {
                SuggestedAction::Ban => "abusive pattern detected; access suspended",
                _ => "critical behavioral pattern detected",
            };
            return Ok(RateLimitResult::deny(
                rule.limit,
                now + PATTERN_BLOCK_SECS,
                PATTERN_BLOCK_SECS,
                reason.to_string(),
                trust.level,
                cost,
                DenyKind::PatternBlock,
            ));
        }

        // Scale the base limit by trust, then by the adaptive factors.
        let trust_scaled =
            (rule.limit as f64 * trust.level.rate_limit_multiplier()).round() as u64;
        let pattern_ref = if detection.detected { Some(&detection) } else { None };
        let adaptive = self
            .adaptive
            .calculate(identity, trust_scaled, trust.score, pattern_ref)
            .await?;
        let mut limit = adaptive.adjusted_limit;
        if throttled {
            limit = (limit / 2).max(1);
        }
        let limit = admissible_limit(limit, cost);

        let block_secs = if trust.level.halves_block_duration() {
            rule.block_secs / 2
        } else {
            rule.block_secs
        };

        let now_ms = now * 1000;
        let member = format!("{}:{}", now_ms, uuid::Uuid::new_v4().simple());
        let window_key = Self::window_key(meta.category, identity);
        let count = self
            .redis
            .window_admit(
                &window_key,
                (now_ms - rule.window_secs * 1000) as f64,
                now_ms as f64,
                &member,
                rule.window_secs as i64,
            )
            .await
            .map_err(|e| anyhow!("Failed to run admission window: {}", e))? as u64;

        if count * cost > limit {
            // The denied request does not consume quota.
            let _ = self.redis.zrem(&window_key, &member).await;
            self.redis
                .set_ex(&block_key, DenyKind::RateLimited.marker(), block_secs)
                .await
                .map_err(|e| anyhow!("Failed to set block marker: {}", e))?;

            let tracker = self.abuse.clone();
            let owner = identity.to_string();
            let category = meta.category;
            let severity = meta.severity;
            tokio::spawn(async move {
                if let Err(e) = tracker
                    .record_incident(
                        &owner,
                        IncidentType::RateLimitExceeded,
                        severity,
                        category,
                        &[],
                        "rate limit exceeded",
                    )
                    .await
                {
                    eprintln!("Failed to record limit incident for {}: {}", owner, e);
                }
            });

            let mut reason = "rate limit exceeded".to_string();
            if let Some(rec) = adaptive.recommendation {
                reason = format!("{} ({})", reason, rec);
            }
            return Ok(RateLimitResult::deny(
                limit,
                now + block_secs,
                block_secs,
                reason,
                trust.level,
                cost,
                DenyKind::RateLimited,
            ));
        }

        Ok(RateLimitResult {
            allowed: true,
            limit,
            remaining: limit.saturating_sub(count * cost) / cost,
            reset_at: now + rule.window_secs,
            retry_after: None,
            reason: adaptive.recommendation,
            trust_level: trust.level,
            action_cost: cost,
            verification_required,
            degraded: false,
            deny_kind: None,
        })
    }

    /// Store unreachable: either wave everything through or fall back to
    /// the per-process window.
    fn degraded_decision(&self, identity: &str, meta: &ActionMetadata) -> RateLimitResult {
        let now = now_secs();
        let rule = window_rule(meta.action_type);
        match self.fail_mode {
            FailMode::Open => RateLimitResult {
                allowed: true,
                limit: rule.limit,
                remaining: rule.limit,
                reset_at: now + rule.window_secs,
                retry_after: None,
                reason: Some("store unavailable; admitted fail-open".to_string()),
                trust_level: TrustLevel::New,
                action_cost: meta.cost as u64,
                verification_required: false,
                degraded: true,
                deny_kind: None,
            },
            FailMode::Closed => {
                let key = format!("{}:{}", meta.category.as_str(), identity);
                let limit = admissible_limit(rule.limit, meta.cost as u64);
                let decision = self.local.check(
                    &key,
                    limit,
                    rule.window_secs * 1000,
                    rule.block_secs * 1000,
                    meta.cost as u64,
                );
                RateLimitResult {
                    allowed: decision.allowed,
                    limit,
                    remaining: decision.remaining,
                    reset_at: decision.reset_at_ms / 1000,
                    retry_after: decision.retry_after_ms.map(|ms| ms.div_ceil(1000)),
                    reason: Some("store unavailable; local window enforced".to_string()),
                    trust_level: TrustLevel::New,
                    action_cost: meta.cost as u64,
                    verification_required: false,
                    degraded: true,
                    deny_kind: if decision.allowed {
                        None
                    } else {
                        Some(DenyKind::RateLimited)
                    },
                }
            }
        }
    }

    fn record_outcome(
        &self,
        identity: &str,
        action: ActionCategory,
        result: &RateLimitResult,
        errored: bool,
        started: Instant,
    ) {
        let metrics = self.metrics.clone();
        let owner = identity.to_string();
        let allowed = result.allowed;
        let elapsed_ms = started.elapsed().as_millis() as u64;
        tokio::spawn(async move {
            metrics
                .record_request(&owner, action, allowed, errored, elapsed_ms)
                .await;
        });
    }

    /// Post-decision bookkeeping off the hot path: behavior log plus the
    /// learning counters. The learning label mirrors the decision itself.
    fn log_and_learn(
        &self,
        identity: &str,
        action: ActionCategory,
        result: &RateLimitResult,
        ctx: &RequestContext,
    ) {
        let patterns = self.patterns.clone();
        let adaptive = self.adaptive.clone();
        let owner = identity.to_string();
        let allowed = result.allowed;
        let ctx = ctx.clone();
        tokio::spawn(async move {
            if let Err(e) = patterns.log_behavior(&owner, action, allowed, &ctx).await {
                eprintln!("Failed to log behavior for {}: {}", owner, e);
            }
            if let Err(e) = adaptive.learn(action, allowed, allowed).await {
                eprintln!("Failed to update learning counters for {}: {}", owner, e);
            }
        });
    }

    async fn is_admin_cached(&self, identity: &str) -> Result<bool> {
        let cache_key = Self::admin_key(identity);
        match self.redis.get(&cache_key).await {
            Ok(Some(flag)) => return Ok(flag == "1"),
            Ok(None) => {}
            Err(e) => return Err(anyhow!("Failed to read admin cache: {}", e)),
        }
        let is_admin = self.directory.is_admin(identity).await?;
        let _ = self
            .redis
            .set_ex(&cache_key, if is_admin { "1" } else { "0" }, ADMIN_CACHE_TTL)
            .await;
        Ok(is_admin)
    }

    /// Wipe windows and block markers for one action, or all of them.
    /// Safe to repeat; resetting untouched state is a no-op.
    pub async fn reset(&self, identity: &str, action: Option<ActionCategory>) -> Result<()> {
        let targets: Vec<ActionCategory> = match action {
            Some(a) => vec![a],
            None => ActionCategory::all().to_vec(),
        };
        for category in targets {
            self.redis
                .del(&Self::window_key(category, identity))
                .await
                .map_err(|e| anyhow!("Failed to reset window: {}", e))?;
            self.redis
                .del(&Self::block_key(category, identity))
                .await
                .map_err(|e| anyhow!("Failed to reset block marker: {}", e))?;
            self.local
                .reset(&format!("{}:{}", category.as_str(), identity));
        }
        eprintln!(
            "Rate limit reset for {} ({})",
            identity,
            action.map(|a| a.as_str()).unwrap_or("all actions")
        );
        Ok(())
    }

    /// Read-only usage view. Never inserts a window entry. The reported
    /// limit applies the same trust and adaptive scaling as admission;
    /// only a live pattern penalty (which requires running detection on a
    /// concrete request) can make the enforced limit lower than shown.
    pub async fn status(
        &self,
        identity: &str,
        action: ActionCategory,
    ) -> Result<RateLimitStatus> {
        let meta = metadata_of(action);
        let rule = window_rule(meta.action_type);
        let trust = self.trust.score(identity).await?;
        let cost = effective_cost(meta.cost, trust.score);
        let trust_scaled =
            (rule.limit as f64 * trust.level.rate_limit_multiplier()).round() as u64;
        let adaptive = self
            .adaptive
            .calculate(identity, trust_scaled, trust.score, None)
            .await?;
        let limit = admissible_limit(adaptive.adjusted_limit, cost);

        let now_ms = now_secs() * 1000;
        let window_start = (now_ms - rule.window_secs * 1000) as f64;
        let count = self
            .redis
            .zcount(&Self::window_key(action, identity), window_start, f64::MAX)
            .await
            .map_err(|e| anyhow!("Failed to count window entries: {}", e))? as u64;

        let block_key = Self::block_key(action, identity);
        let block_ttl = match self.redis.ttl(&block_key).await {
            Ok(ttl) if ttl > 0 => Some(ttl as u64),
            _ => None,
        };

        Ok(RateLimitStatus {
            action,
            limit,
            used: count * cost,
            remaining: limit.saturating_sub(count * cost) / cost,
            window_secs: rule.window_secs,
            blocked: block_ttl.is_some(),
            block_expires_in: block_ttl,
            trust_level: trust.level,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_window_table() {
        let read = window_rule(ActionType::Read);
        assert_eq!((read.limit, read.window_secs, read.block_secs), (100, 60, 60));
        let write = window_rule(ActionType::Write);
        assert_eq!((write.limit, write.window_secs, write.block_secs), (20, 60, 300));
        let sensitive = window_rule(ActionType::Sensitive);
        assert_eq!(
            (sensitive.limit, sensitive.window_secs, sensitive.block_secs),
            (10, 300, 900)
        );
        let critical = window_rule(ActionType::Critical);
        assert_eq!(
            (critical.limit, critical.window_secs, critical.block_secs),
            (5, 3600, 3600)
        );
        let admin = window_rule(ActionType::Admin);
        assert_eq!((admin.limit, admin.window_secs, admin.block_secs), (50, 60, 600));
    }

    #[test]
    fn test_cost_discount() {
        // Zero trust pays full price, full trust pays half, never below 1.
        assert_eq!(effective_cost(4, 0.0), 4);
        assert_eq!(effective_cost(4, 1.0), 2);
        assert_eq!(effective_cost(1, 1.0), 1);
        assert_eq!(effective_cost(5, 0.5), 4); // ceil(5 * 0.75)
    }

    #[test]
    fn test_cost_never_zero() {
        for base in 1..=10u32 {
            for trust in [0.0, 0.25, 0.5, 0.75, 1.0] {
                assert!(effective_cost(base, trust) >= 1);
            }
        }
    }

    #[test]
    fn test_deny_at_strictly_over_limit() {
        // The boundary request that exactly fills the window is admitted;
        // only the next one over is denied.
        let limit = 100u64;
        let cost = 1u64;
        assert!(100 * cost <= limit);
        assert!(101 * cost > limit);
    }

    #[test]
    fn test_limit_always_fits_one_request() {
        assert_eq!(admissible_limit(5, 8), 8);
        assert_eq!(admissible_limit(5, 10), 10);
        assert_eq!(admissible_limit(100, 1), 100);
        assert_eq!(admissible_limit(5, 5), 5);
    }

    #[test]
    fn test_new_user_can_register_once() {
        // Registration costs more than the raw critical-window limit at
        // zero trust; the clamp still admits the first attempt, and the
        // second is denied as over-quota.
        for category in [ActionCategory::AuthRegister, ActionCategory::AuthPasswordReset] {
            let meta = metadata_of(category);
            let rule = window_rule(meta.action_type);
            let cost = effective_cost(meta.cost, 0.0);
            assert!(cost > rule.limit, "{:?} must exercise the clamp", category);
            let limit = admissible_limit(rule.limit, cost);

            let local = LocalOnlyLimiter::new();
            let key = format!("{}:u:new", category.as_str());
            let window_ms = rule.window_secs * 1000;
            let block_ms = rule.block_secs * 1000;
            let first = local.check_at(&key, limit, window_ms, block_ms, cost, 1_000);
            assert!(first.allowed, "first {:?} attempt must be admitted", category);
            let second = local.check_at(&key, limit, window_ms, block_ms, cost, 2_000);
            assert!(!second.allowed);
        }
    }

    #[test]
    fn test_deny_kind_status_split() {
        assert!(!DenyKind::RateLimited.is_forbidden());
        assert!(!DenyKind::Blocked.is_forbidden());
        assert!(DenyKind::PatternBlock.is_forbidden());
        assert!(DenyKind::Restricted.is_forbidden());
        assert!(DenyKind::Banned.is_forbidden());
        assert!(DenyKind::AdminOnly.is_forbidden());
    }

    #[test]
    fn test_block_marker_classifies_denial() {
        assert_eq!(
            DenyKind::from_marker(DenyKind::PatternBlock.marker()),
            DenyKind::PatternBlock
        );
        assert_eq!(
            DenyKind::from_marker(DenyKind::RateLimited.marker()),
            DenyKind::Blocked
        );
        // Markers written before the scheme existed fall back to a plain
        // retryable block.
        assert_eq!(DenyKind::from_marker("rate limit exceeded"), DenyKind::Blocked);
    }

    #[test]
    fn test_fail_mode_parsing() {
        std::env::remove_var("FAIL_MODE");
        assert_eq!(FailMode::from_env(), FailMode::Open);
        std::env::set_var("FAIL_MODE", "closed");
        assert_eq!(FailMode::from_env(), FailMode::Closed);
        std::env::set_var("FAIL_MODE", "open");
        assert_eq!(FailMode::from_env(), FailMode::Open);
        std::env::remove_var("FAIL_MODE");
    }
}
