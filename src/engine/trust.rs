use crate::directory::{now_secs, DirectoryClient, UserRecord};
use crate::engine::actions::Severity;
use crate::redis_client::RedisClient;
use anyhow::{Result, anyhow};
use serde::{Deserialize, Serialize};

const TRUST_CACHE_TTL: u64 = 3600;
const VIOLATION_TTL: i64 = 2_592_000; // 30 days, matching the longest recency penalty
const TRUST_RECORD_VERSION: u32 = 1;

/// Reputation bands. Higher bands earn larger rate-limit multipliers and
/// shorter block durations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TrustLevel {
    New,
    Basic,
    Verified,
    Trusted,
    Premium,
}

impl TrustLevel {
    pub fn from_score(score: f64) -> Self {
        if score >= 0.9 {
            TrustLevel::Premium
        } else if score >= 0.7 {
            TrustLevel::Trusted
        } else if score >= 0.5 {
            TrustLevel::Verified
        } else if score >= 0.2 {
            TrustLevel::Basic
        } else {
            TrustLevel::New
        }
    }

    /// Multiplier applied to base window limits for this level.
    pub fn rate_limit_multiplier(&self) -> f64 {
        match self {
            TrustLevel::Premium => 5.0,
            TrustLevel::Trusted => 3.0,
            TrustLevel::Verified => 2.0,
            TrustLevel::Basic => 1.5,
            TrustLevel::New => 1.0,
        }
    }

    /// Trusted regulars get their block durations halved.
    pub fn halves_block_duration(&self) -> bool {
        matches!(self, TrustLevel::Trusted | TrustLevel::Premium)
    }
}

/// One named contribution to a trust score, kept for explainability.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrustFactor {
    pub name: String,
    pub value: f64,
}

/// Computed reputation for one identity. Cached for an hour; recomputed on
/// miss or after a high-severity violation invalidates the cache.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrustScore {
    pub version: u32,
    pub identity_id: String,
    pub score: f64,
    pub level: TrustLevel,
    pub factors: Vec<TrustFactor>,
    pub calculated_at: u64,
    pub next_review: u64,
}

impl TrustScore {
    /// The conservative default used when score computation fails: treat the
    /// caller as a brand-new identity rather than failing the request.
    pub fn default_new(identity: &str, now: u64) -> Self {
        Self {
            version: TRUST_RECORD_VERSION,
            identity_id: identity.to_string(),
            score: 0.0,
            level: TrustLevel::New,
            factors: vec![],
            calculated_at: now,
            next_review: now + TRUST_CACHE_TTL,
        }
    }

    pub fn is_banned_profile(&self) -> bool {
        self.factors.iter().any(|f| f.name == "banned")
    }
}

/// Violation counters the scorer keeps in the shared store, separate from the
/// directory's long-lived account fields.
#[derive(Debug, Clone, Copy, Default)]
pub struct ViolationState {
    pub count: u64,
    pub last_at: Option<u64>,
}

fn push_factor(factors: &mut Vec<TrustFactor>, name: &str, value: f64) {
    if value != 0.0 {
        factors.push(TrustFactor {
            name: name.to_string(),
            value,
        });
    }
}

/// Pure scoring model. Additive, each term capped, clamped to [0,1].
pub fn compute_score(record: &UserRecord, violations: ViolationState, now: u64) -> TrustScore {
    let mut factors = Vec::new();

    // Hard short-circuits first: a banned identity is always 0 and an
    // admin/privileged role is always fully trusted.
    if record.banned {
        push_factor(&mut factors, "banned", -1.0);
        return finish(record, 0.0, factors, now);
    }
    if record.admin {
        push_factor(&mut factors, "admin_role", 1.0);
        return finish(record, 1.0, factors, now);
    }

    let mut score = 0.0;

    let age_days = record.account_age_days(now);
    let age_term = if age_days >= 365 {
        0.20
    } else if age_days >= 90 {
        0.15
    } else if age_days >= 30 {
        0.10
    } else if age_days >= 7 {
        0.05
    } else {
        0.0
    };
    score += age_term;
    push_factor(&mut factors, "account_age", age_term);

    if record.email_verified {
        score += 0.15;
        push_factor(&mut factors, "email_verified", 0.15);
    }
    if record.phone_verified {
        score += 0.10;
        push_factor(&mut factors, "phone_verified", 0.10);
    }

    // Content quality: engagement received weighted over raw activity.
    let engagement = (record.likes_received + record.comments_received) as f64;
    let engagement_rate = (engagement / 100.0).min(1.0);
    let activity_rate = (record.contributions() as f64 / 50.0).min(1.0);
    let quality_term = (engagement_rate * 0.7 + activity_rate * 0.3) * 0.20;
    score += quality_term;
    push_factor(&mut factors, "content_quality", quality_term);

    let contributions = record.contributions();
    let contribution_term = if contributions >= 100 {
        0.15
    } else if contributions >= 50 {
        0.10
    } else if contributions >= 10 {
        0.05
    } else {
        0.0
    };
    score += contribution_term;
    push_factor(&mut factors, "contribution_count", contribution_term);

    // Like ratio against reports: heavy reporting drags the ratio down.
    let likes = record.likes_received as f64;
    let like_ratio = if likes > 0.0 {
        likes / (likes + 10.0 * record.report_count as f64)
    } else {
        0.0
    };
    let like_term = (like_ratio * 0.5).min(0.10);
    score += like_term;
    push_factor(&mut factors, "like_ratio", like_term);

    if record.premium {
        score += 0.10;
        push_factor(&mut factors, "premium", 0.10);
    }

    let violation_penalty = violations.count as f64 * 0.10;
    score -= violation_penalty;
    push_factor(&mut factors, "violations", -violation_penalty);

    let report_penalty = record.report_count as f64 * 0.05;
    score -= report_penalty;
    push_factor(&mut factors, "reports", -report_penalty);

    if let Some(last) = violations.last_at {
        let age_secs = now.saturating_sub(last);
        let recency_penalty = if age_secs <= 7 * 86400 {
            0.20
        } else if age_secs <= 30 * 86400 {
            0.10
        } else {
            0.0
        };
        score -= recency_penalty;
        push_factor(&mut factors, "recent_violation", -recency_penalty);
    }

    finish(record, score.clamp(0.0, 1.0), factors, now)
}

fn finish(record: &UserRecord, score: f64, factors: Vec<TrustFactor>, now: u64) -> TrustScore {
    // Summing the float terms can land a hair under a band boundary
    // (0.8999999999999999 instead of 0.9). Four decimals is more precision
    // than any term in the model carries.
    let score = (score * 10_000.0).round() / 10_000.0;
    TrustScore {
        version: TRUST_RECORD_VERSION,
        identity_id: record.identity_id.clone(),
        score,
        level: TrustLevel::from_score(score),
        factors,
        calculated_at: now,
        next_review: now + TRUST_CACHE_TTL,
    }
}

/// Computes and caches per-identity trust scores.
#[derive(Clone)]
pub struct TrustScorer {
    redis: RedisClient,
    directory: DirectoryClient,
}

impl TrustScorer {
    pub fn new(redis: RedisClient, directory: DirectoryClient) -> Self {
        Self { redis, directory }
    }

    fn cache_key(identity: &str) -> String {
        format!("trust:{}", identity)
    }

    fn violations_key(identity: &str) -> String {
        format!("trust:violations:{}", identity)
    }

    fn last_violation_key(identity: &str) -> String {
        format!("trust:lastviolation:{}", identity)
    }

    /// Score an identity, serving the cached value when fresh.
    pub async fn score(&self, identity: &str) -> Result<TrustScore> {
        let now = now_secs();

        if let Ok(Some(cached)) = self.redis.get(&Self::cache_key(identity)).await {
            if let Ok(score) = serde_json::from_str::<TrustScore>(&cached) {
                // Reject stale schema versions rather than trusting them.
                if score.version == TRUST_RECORD_VERSION && score.next_review > now {
                    return Ok(score);
                }
            }
        }

        let record = self
            .directory
            .fetch(identity)
            .await
            .map_err(|e| anyhow!("Failed to load user record for trust scoring: {}", e))?;
        let violations = self.violation_state(identity).await?;

        let score = compute_score(&record, violations, now);

        if let Ok(json) = serde_json::to_string(&score) {
            if let Err(e) = self.redis.set_ex(&Self::cache_key(identity), &json, TRUST_CACHE_TTL).await {
                eprintln!("Failed to cache trust score for {}: {}", identity, e);
            }
        }

        Ok(score)
    }

    /// Read the violation counters the scorer maintains in the shared store.
    pub async fn violation_state(&self, identity: &str) -> Result<ViolationState> {
        let count = match self.redis.get(&Self::violations_key(identity)).await {
            Ok(Some(v)) => v.parse().unwrap_or(0),
            Ok(None) => 0,
            Err(e) => return Err(anyhow!("Failed to read violation counter: {}", e)),
        };
        let last_at = match self.redis.get(&Self::last_violation_key(identity)).await {
            Ok(Some(v)) => v.parse().ok(),
            Ok(None) => None,
            Err(e) => return Err(anyhow!("Failed to read last violation timestamp: {}", e)),
        };
        Ok(ViolationState { count, last_at })
    }

    /// Record a violation. High/critical severity invalidates the cached
    /// score immediately so the next check sees the penalty.
    pub async fn record_violation(
        &self,
        identity: &str,
        violation_type: &str,
        severity: Severity,
    ) -> Result<()> {
        let count = self
            .redis
            .incr(&Self::violations_key(identity))
            .await
            .map_err(|e| anyhow!("Failed to increment violations: {}", e))?;
        self.redis
            .expire(&Self::violations_key(identity), VIOLATION_TTL)
            .await
            .map_err(|e| anyhow!("Failed to expire violation counter: {}", e))?;
        self.redis
            .set_ex(
                &Self::last_violation_key(identity),
                &now_secs().to_string(),
                VIOLATION_TTL as u64,
            )
            .await
            .map_err(|e| anyhow!("Failed to stamp last violation: {}", e))?;

        if matches!(severity, Severity::High | Severity::Critical) {
            self.invalidate(identity).await?;
        }

        eprintln!(
            "Violation recorded for {}: type={} severity={:?} total={}",
            identity, violation_type, severity, count
        );
        Ok(())
    }

    /// Drop the cached score, forcing recomputation on the next check.
    pub async fn invalidate(&self, identity: &str) -> Result<()> {
        self.redis
            .del(&Self::cache_key(identity))
            .await
            .map_err(|e| anyhow!("Failed to invalidate trust cache: {}", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_record() -> UserRecord {
        UserRecord {
            identity_id: "user-1".to_string(),
            created_at: NOW - 400 * 86400,
            email_verified: true,
            phone_verified: true,
            post_count: 120,
            comment_count: 30,
            likes_received: 200,
            comments_received: 40,
            ..UserRecord::default()
        }
    }

    const NOW: u64 = 1_700_000_000;

    #[test]
    fn test_banned_identity_scores_zero() {
        let mut record = base_record();
        record.banned = true;
        let score = compute_score(&record, ViolationState::default(), NOW);
        assert_eq!(score.score, 0.0);
        assert_eq!(score.level, TrustLevel::New);
        assert!(score.is_banned_profile());
    }

    #[test]
    fn test_admin_scores_one() {
        let mut record = base_record();
        record.admin = true;
        let score = compute_score(&record, ViolationState::default(), NOW);
        assert_eq!(score.score, 1.0);
        assert_eq!(score.level, TrustLevel::Premium);
    }

    #[test]
    fn test_established_verified_account_is_premium_band() {
        // Age 0.20 + email 0.15 + phone 0.10 + quality 0.20 + contributions
        // 0.15 + like ratio 0.10 = 0.90
        let record = base_record();
        let score = compute_score(&record, ViolationState::default(), NOW);
        assert!(score.score >= 0.9, "got {}", score.score);
        assert_eq!(score.score, 0.9);
        assert_eq!(score.level, TrustLevel::Premium);
    }

    #[test]
    fn test_every_violation_count_lowers_score() {
        // The counter is fed by every recorded incident, whatever its
        // severity, so each count costs its tenth of a point.
        let record = base_record();
        let clean = compute_score(&record, ViolationState::default(), NOW).score;
        let one =
            compute_score(&record, ViolationState { count: 1, last_at: None }, NOW).score;
        let two =
            compute_score(&record, ViolationState { count: 2, last_at: None }, NOW).score;
        assert!(one < clean);
        assert!(two < one);
        assert!((clean - one - 0.1).abs() < 1e-9);
    }

    #[test]
    fn test_fresh_anonymous_identity_is_new() {
        let record = UserRecord {
            identity_id: "anon".to_string(),
            ..UserRecord::default()
        };
        let score = compute_score(&record, ViolationState::default(), NOW);
        assert!(score.score < 0.2);
        assert_eq!(score.level, TrustLevel::New);
    }

    #[test]
    fn test_age_tiers_are_monotone() {
        let mut last = 0.0;
        for days in [0u64, 7, 30, 90, 365] {
            let record = UserRecord {
                identity_id: "u".to_string(),
                created_at: NOW - days * 86400,
                ..UserRecord::default()
            };
            let score = compute_score(&record, ViolationState::default(), NOW).score;
            assert!(score >= last, "age {} days lowered the score", days);
            last = score;
        }
    }

    #[test]
    fn test_contribution_count_is_monotone() {
        let mut last = 0.0;
        for posts in [0u64, 5, 10, 49, 50, 99, 100, 500] {
            let record = UserRecord {
                identity_id: "u".to_string(),
                post_count: posts,
                ..UserRecord::default()
            };
            let score = compute_score(&record, ViolationState::default(), NOW).score;
            assert!(score >= last, "posts {} lowered the score", posts);
            last = score;
        }
    }

    #[test]
    fn test_verification_never_decreases_score() {
        let record = base_record();
        let unverified = UserRecord {
            email_verified: false,
            phone_verified: false,
            ..record.clone()
        };
        let with = compute_score(&record, ViolationState::default(), NOW).score;
        let without = compute_score(&unverified, ViolationState::default(), NOW).score;
        assert!(with >= without);
    }

    #[test]
    fn test_recent_violation_penalty_bands() {
        let record = base_record();
        let clean = compute_score(&record, ViolationState::default(), NOW).score;
        let week = compute_score(
            &record,
            ViolationState { count: 1, last_at: Some(NOW - 3 * 86400) },
            NOW,
        )
        .score;
        let month = compute_score(
            &record,
            ViolationState { count: 1, last_at: Some(NOW - 20 * 86400) },
            NOW,
        )
        .score;
        let old = compute_score(
            &record,
            ViolationState { count: 1, last_at: Some(NOW - 60 * 86400) },
            NOW,
        )
        .score;
        assert!(week < month, "7-day penalty should exceed 30-day penalty");
        assert!(month < old, "30-day penalty should exceed stale penalty");
        assert!(old < clean, "any violation carries the per-count penalty");
    }

    #[test]
    fn test_score_is_clamped() {
        let record = base_record();
        let buried = compute_score(
            &record,
            ViolationState { count: 50, last_at: Some(NOW - 1000) },
            NOW,
        );
        assert_eq!(buried.score, 0.0);
        assert_eq!(buried.level, TrustLevel::New);
    }

    #[test]
    fn test_level_thresholds_and_multipliers() {
        assert_eq!(TrustLevel::from_score(0.95), TrustLevel::Premium);
        assert_eq!(TrustLevel::from_score(0.9), TrustLevel::Premium);
        assert_eq!(TrustLevel::from_score(0.75), TrustLevel::Trusted);
        assert_eq!(TrustLevel::from_score(0.5), TrustLevel::Verified);
        assert_eq!(TrustLevel::from_score(0.3), TrustLevel::Basic);
        assert_eq!(TrustLevel::from_score(0.1), TrustLevel::New);

        assert_eq!(TrustLevel::Premium.rate_limit_multiplier(), 5.0);
        assert_eq!(TrustLevel::Trusted.rate_limit_multiplier(), 3.0);
        assert_eq!(TrustLevel::Verified.rate_limit_multiplier(), 2.0);
        assert_eq!(TrustLevel::Basic.rate_limit_multiplier(), 1.5);
        assert_eq!(TrustLevel::New.rate_limit_multiplier(), 1.0);

        assert!(TrustLevel::Premium.halves_block_duration());
        assert!(TrustLevel::Trusted.halves_block_duration());
        assert!(!TrustLevel::Verified.halves_block_duration());
    }
}
