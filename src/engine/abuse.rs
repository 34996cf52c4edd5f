use crate::directory::{now_secs, DirectoryClient};
use crate::engine::actions::{ActionCategory, Severity};
use crate::engine::patterns::PatternType;
use crate::engine::trust::TrustScorer;
use crate::redis_client::RedisClient;
use anyhow::{Result, anyhow};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

const INCIDENT_TTL: i64 = 604_800; // incidents age out after 7 days
const PROFILE_CACHE_TTL: u64 = 300;
const DECAY_HALF_LIFE_DAYS: f64 = 7.0;
const PERMANENT_TTL: u64 = 315_360_000; // ~10 years, effectively permanent
const INCIDENT_VERSION: u32 = 1;
const RESTRICTION_VERSION: u32 = 1;

/// What kind of event produced an incident.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IncidentType {
    RateLimitExceeded,
    PatternDetected,
    ContentViolation,
    Manual,
}

impl IncidentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            IncidentType::RateLimitExceeded => "rate_limit_exceeded",
            IncidentType::PatternDetected => "pattern_detected",
            IncidentType::ContentViolation => "content_violation",
            IncidentType::Manual => "manual",
        }
    }
}

/// Escalation ladder outcome for one incident.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseAction {
    None,
    Warning,
    Throttle,
    Challenge,
    TemporaryBlock,
    PermanentBan,
}

/// Where an identity currently sits in the enforcement state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AbuseStatus {
    Normal,
    Watching,
    Throttled,
    Blocked,
    Banned,
}

/// Kinds of active restriction. At most one of each per identity; a new
/// restriction of the same type overwrites, never accumulates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RestrictionType {
    Throttle,
    Challenge,
    Block,
    Ban,
}

impl RestrictionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RestrictionType::Throttle => "throttle",
            RestrictionType::Challenge => "challenge",
            RestrictionType::Block => "block",
            RestrictionType::Ban => "ban",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        RestrictionType::all().iter().copied().find(|t| t.as_str() == s)
    }

    pub fn all() -> &'static [RestrictionType] {
        &[
            RestrictionType::Throttle,
            RestrictionType::Challenge,
            RestrictionType::Block,
            RestrictionType::Ban,
        ]
    }
}

/// Append-only incident record, kept 7 days.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AbuseIncident {
    pub version: u32,
    pub id: String,
    pub identity_id: String,
    pub incident_type: IncidentType,
    pub severity: Severity,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub patterns: Vec<PatternType>,
    pub action: ActionCategory,
    pub timestamp: u64,
    pub response_action: ResponseAction,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<u64>,
}

/// One active restriction, stored under `restriction:{id}:{type}` with a
/// TTL matching its lifetime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestrictionInfo {
    pub version: u32,
    pub restriction_type: RestrictionType,
    pub reason: String,
    pub started_at: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<u64>,
    pub details: String,
}

/// Derived view over an identity's incidents and restrictions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserAbuseProfile {
    pub identity_id: String,
    pub incident_count: usize,
    pub total_score: f64,
    pub current_status: AbuseStatus,
    pub restrictions: Vec<RestrictionType>,
    pub last_incident: Option<u64>,
    pub next_review: u64,
}

/// Summary counts for the admin surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AbuseMetrics {
    pub identity_id: String,
    pub total_score: f64,
    pub incidents_by_type: HashMap<String, u64>,
    pub incidents_by_severity: HashMap<String, u64>,
    /// 0-5, floor(total/20) capped.
    pub escalation_level: u8,
}

pub fn severity_points(severity: Severity) -> f64 {
    match severity {
        Severity::Low => 1.0,
        Severity::Medium => 5.0,
        Severity::High => 10.0,
        Severity::Critical => 20.0,
    }
}

/// An incident's present-day contribution: points halved every 7 days.
pub fn decayed_points(points: f64, age_seconds: u64) -> f64 {
    let age_days = age_seconds as f64 / 86400.0;
    points * 0.5_f64.powf(age_days / DECAY_HALF_LIFE_DAYS)
}

/// Sum the decayed contributions of stored incidents.
pub fn decayed_total(incidents: &[AbuseIncident], now: u64) -> f64 {
    incidents
        .iter()
        .map(|i| decayed_points(severity_points(i.severity), now.saturating_sub(i.timestamp)))
        .sum()
}

/// Pick the response for a new incident given the decayed running score.
/// Pattern-specific overrides outrank both severity and the ladder.
pub fn determine_response_action(
    severity: Severity,
    patterns: &[PatternType],
    total_score: f64,
) -> ResponseAction {
    if patterns.contains(&PatternType::CredentialStuffing) {
        return ResponseAction::PermanentBan;
    }
    if patterns.contains(&PatternType::DistributedAttack) {
        return ResponseAction::TemporaryBlock;
    }
    if severity == Severity::Critical {
        return if total_score >= 100.0 {
            ResponseAction::PermanentBan
        } else {
            ResponseAction::TemporaryBlock
        };
    }
    if total_score >= 100.0 {
        ResponseAction::PermanentBan
    } else if total_score >= 50.0 {
        ResponseAction::TemporaryBlock
    } else if total_score >= 25.0 {
        ResponseAction::Challenge
    } else if total_score >= 15.0 {
        ResponseAction::Throttle
    } else if total_score >= 5.0 {
        ResponseAction::Warning
    } else {
        ResponseAction::None
    }
}

/// Records incidents, maintains the decaying abuse score and applies the
/// escalation ladder.
#[derive(Clone)]
pub struct AbuseTracker {
    redis: RedisClient,
    directory: DirectoryClient,
    trust: TrustScorer,
}

impl AbuseTracker {
    pub fn new(redis: RedisClient, directory: DirectoryClient, trust: TrustScorer) -> Self {
        Self { redis, directory, trust }
    }

    fn incidents_key(identity: &str) -> String {
        format!("incidents:{}", identity)
    }

    fn restriction_key(identity: &str, rtype: RestrictionType) -> String {
        format!("restriction:{}:{}", identity, rtype.as_str())
    }

    fn profile_key(identity: &str) -> String {
        format!("abuse:profile:{}", identity)
    }

    fn warnings_key(identity: &str) -> String {
        format!("abuse:warnings:{}", identity)
    }

    /// Record an incident, escalate if warranted, and return the stored
    /// record including the applied response.
    pub async fn record_incident(
        &self,
        identity: &str,
        incident_type: IncidentType,
        severity: Severity,
        action: ActionCategory,
        patterns: &[PatternType],
        reason: &str,
    ) -> Result<AbuseIncident> {
        let now = now_secs();
        let existing = self.load_incidents(identity).await?;
        let total_score =
            decayed_total(&existing, now) + severity_points(severity);
        let response = determine_response_action(severity, patterns, total_score);

        let mut incident = AbuseIncident {
            version: INCIDENT_VERSION,
            id: uuid::Uuid::new_v4().to_string(),
            identity_id: identity.to_string(),
            incident_type,
            severity,
            patterns: patterns.to_vec(),
            action,
            timestamp: now,
            response_action: response,
            expires_at: None,
        };

        incident.expires_at = self.apply_response_action(identity, response, reason, now).await?;

        let json = serde_json::to_string(&incident)
            .map_err(|e| anyhow!("Failed to serialize incident: {}", e))?;
        let key = Self::incidents_key(identity);
        self.redis
            .zadd(&key, now as f64, &json)
            .await
            .map_err(|e| anyhow!("Failed to store incident: {}", e))?;
        let cutoff = now.saturating_sub(INCIDENT_TTL as u64);
        self.redis
            .zrembyscore(&key, 0.0, cutoff as f64)
            .await
            .map_err(|e| anyhow!("Failed to prune incidents: {}", e))?;
        self.redis
            .expire(&key, INCIDENT_TTL)
            .await
            .map_err(|e| anyhow!("Failed to expire incidents: {}", e))?;

        // Every incident counts against trust; the scorer decides how hard
        // the severity weighs and whether the cached score is invalidated.
        if let Err(e) = self
            .trust
            .record_violation(identity, incident_type.as_str(), severity)
            .await
        {
            eprintln!("Failed to record trust violation for {}: {}", identity, e);
        }

        // New incident invalidates the cached profile view.
        let _ = self.redis.del(&Self::profile_key(identity)).await;

        eprintln!(
            "Abuse incident for {}: type={} severity={:?} score={:.1} response={:?}",
            identity,
            incident_type.as_str(),
            severity,
            total_score,
            response
        );
        Ok(incident)
    }

    /// Persist the restriction matching a response action. Returns its
    /// expiry, if any.
    async fn apply_response_action(
        &self,
        identity: &str,
        response: ResponseAction,
        reason: &str,
        now: u64,
    ) -> Result<Option<u64>> {
        let write = |rtype: RestrictionType, ttl: Option<u64>, details: &str| {
            let info = RestrictionInfo {
                version: RESTRICTION_VERSION,
                restriction_type: rtype,
                reason: reason.to_string(),
                started_at: now,
                expires_at: ttl.map(|t| now + t),
                details: details.to_string(),
            };
            (rtype, ttl, info)
        };

        let stored = match response {
            ResponseAction::None => return Ok(None),
            ResponseAction::Warning => {
                // Warnings only count; nothing is enforced yet.
                self.redis
                    .incr(&Self::warnings_key(identity))
                    .await
                    .map_err(|e| anyhow!("Failed to count warning: {}", e))?;
                self.redis
                    .expire(&Self::warnings_key(identity), INCIDENT_TTL)
                    .await
                    .map_err(|e| anyhow!("Failed to expire warning counter: {}", e))?;
                return Ok(Some(now + INCIDENT_TTL as u64));
            }
            ResponseAction::Throttle => write(
                RestrictionType::Throttle,
                Some(1800),
                "rate_multiplier=0.5",
            ),
            ResponseAction::Challenge => write(
                RestrictionType::Challenge,
                Some(3600),
                "secondary verification required",
            ),
            ResponseAction::TemporaryBlock => write(
                RestrictionType::Block,
                Some(86400),
                "all requests denied for 24h",
            ),
            ResponseAction::PermanentBan => write(
                RestrictionType::Ban,
                None,
                "permanent ban",
            ),
        };

        let (rtype, ttl, info) = stored;
        let json = serde_json::to_string(&info)
            .map_err(|e| anyhow!("Failed to serialize restriction: {}", e))?;
        self.redis
            .set_ex(
                &Self::restriction_key(identity, rtype),
                &json,
                ttl.unwrap_or(PERMANENT_TTL),
            )
            .await
            .map_err(|e| anyhow!("Failed to persist restriction: {}", e))?;

        // Blocks and bans are mirrored into the directory's ban flag so the
        // rest of the application sees them too.
        match rtype {
            RestrictionType::Block => {
                self.directory
                    .set_ban_flag(identity, reason, Some(now + 86400))
                    .await?;
            }
            RestrictionType::Ban => {
                self.directory.set_ban_flag(identity, reason, None).await?;
            }
            _ => {}
        }

        Ok(info.expires_at)
    }

    async fn load_incidents(&self, identity: &str) -> Result<Vec<AbuseIncident>> {
        let raw = self
            .redis
            .zrange_withscores(&Self::incidents_key(identity), 0, -1)
            .await
            .map_err(|e| anyhow!("Failed to read incidents: {}", e))?;
        Ok(raw
            .into_iter()
            .filter_map(|(member, _)| serde_json::from_str::<AbuseIncident>(&member).ok())
            .filter(|i| i.version == INCIDENT_VERSION)
            .collect())
    }

    /// Current decayed abuse score.
    pub async fn total_score(&self, identity: &str) -> Result<f64> {
        let incidents = self.load_incidents(identity).await?;
        Ok(decayed_total(&incidents, now_secs()))
    }

    /// Every restriction currently in force for an identity.
    pub async fn active_restrictions(
        &self,
        identity: &str,
    ) -> Result<Vec<RestrictionInfo>> {
        let mut active = Vec::new();
        for &rtype in RestrictionType::all() {
            if let Some(json) = self
                .redis
                .get(&Self::restriction_key(identity, rtype))
                .await
                .map_err(|e| anyhow!("Failed to read restriction: {}", e))?
            {
                if let Ok(info) = serde_json::from_str::<RestrictionInfo>(&json) {
                    if info.version == RESTRICTION_VERSION {
                        active.push(info);
                    }
                }
            }
        }
        Ok(active)
    }

    /// Cached profile view; recomputed after invalidation or expiry.
    pub async fn profile(&self, identity: &str) -> Result<UserAbuseProfile> {
        if let Ok(Some(cached)) = self.redis.get(&Self::profile_key(identity)).await {
            if let Ok(profile) = serde_json::from_str::<UserAbuseProfile>(&cached) {
                return Ok(profile);
            }
        }

        let now = now_secs();
        let incidents = self.load_incidents(identity).await?;
        let total_score = decayed_total(&incidents, now);
        let restrictions: Vec<RestrictionType> = self
            .active_restrictions(identity)
            .await?
            .iter()
            .map(|r| r.restriction_type)
            .collect();

        let current_status = if restrictions.contains(&RestrictionType::Ban) {
            AbuseStatus::Banned
        } else if restrictions.contains(&RestrictionType::Block) {
            AbuseStatus::Blocked
        } else if restrictions.contains(&RestrictionType::Throttle)
            || restrictions.contains(&RestrictionType::Challenge)
        {
            AbuseStatus::Throttled
        } else if total_score >= 5.0 {
            AbuseStatus::Watching
        } else {
            AbuseStatus::Normal
        };

        let profile = UserAbuseProfile {
            identity_id: identity.to_string(),
            incident_count: incidents.len(),
            total_score,
            current_status,
            restrictions,
            last_incident: incidents.iter().map(|i| i.timestamp).max(),
            next_review: now + PROFILE_CACHE_TTL,
        };

        if let Ok(json) = serde_json::to_string(&profile) {
            let _ = self
                .redis
                .set_ex(&Self::profile_key(identity), &json, PROFILE_CACHE_TTL)
                .await;
        }
        Ok(profile)
    }

    /// Remove one restriction type, or all of them. Lifting a block or ban
    /// also clears the directory ban flag.
    pub async fn clear_restriction(
        &self,
        identity: &str,
        rtype: Option<RestrictionType>,
    ) -> Result<()> {
        let targets: Vec<RestrictionType> = match rtype {
            Some(t) => vec![t],
            None => RestrictionType::all().to_vec(),
        };
        for t in targets {
            self.redis
                .del(&Self::restriction_key(identity, t))
                .await
                .map_err(|e| anyhow!("Failed to clear restriction: {}", e))?;
            if matches!(t, RestrictionType::Block | RestrictionType::Ban) {
                self.directory.clear_ban_flag(identity).await?;
            }
        }
        let _ = self.redis.del(&Self::profile_key(identity)).await;
        Ok(())
    }

    /// Incident counts by type and severity plus the 0-5 escalation level.
    pub async fn abuse_metrics(&self, identity: &str) -> Result<AbuseMetrics> {
        let now = now_secs();
        let incidents = self.load_incidents(identity).await?;
        let total_score = decayed_total(&incidents, now);

        let mut by_type: HashMap<String, u64> = HashMap::new();
        let mut by_severity: HashMap<String, u64> = HashMap::new();
        for incident in &incidents {
            *by_type.entry(incident.incident_type.as_str().to_string()).or_default() += 1;
            *by_severity
                .entry(format!("{:?}", incident.severity).to_lowercase())
                .or_default() += 1;
        }

        Ok(AbuseMetrics {
            identity_id: identity.to_string(),
            total_score,
            incidents_by_type: by_type,
            incidents_by_severity: by_severity,
            escalation_level: ((total_score / 20.0).floor() as u8).min(5),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_points() {
        assert_eq!(severity_points(Severity::Low), 1.0);
        assert_eq!(severity_points(Severity::Medium), 5.0);
        assert_eq!(severity_points(Severity::High), 10.0);
        assert_eq!(severity_points(Severity::Critical), 20.0);
    }

    #[test]
    fn test_decay_halves_at_seven_days() {
        let week = decayed_points(20.0, 7 * 86400);
        assert!((week - 10.0).abs() < 1e-6);
    }

    #[test]
    fn test_decay_negligible_after_thirty_days() {
        let month = decayed_points(20.0, 30 * 86400);
        // 0.5^(30/7) leaves about 5% of the original weight.
        assert!(month / 20.0 < 0.06, "got {}", month / 20.0);
    }

    #[test]
    fn test_fresh_incident_keeps_full_points() {
        assert_eq!(decayed_points(10.0, 0), 10.0);
    }

    fn incident(severity: Severity, timestamp: u64) -> AbuseIncident {
        AbuseIncident {
            version: INCIDENT_VERSION,
            id: "i".to_string(),
            identity_id: "u".to_string(),
            incident_type: IncidentType::PatternDetected,
            severity,
            patterns: vec![],
            action: ActionCategory::PostCreate,
            timestamp,
            response_action: ResponseAction::None,
            expires_at: None,
        }
    }

    #[test]
    fn test_decayed_total_sums_contributions() {
        let now = 1_700_000_000;
        let incidents = vec![
            incident(Severity::High, now),
            incident(Severity::High, now - 7 * 86400),
        ];
        let total = decayed_total(&incidents, now);
        assert!((total - 15.0).abs() < 1e-6);
    }

    #[test]
    fn test_response_ladder() {
        assert_eq!(determine_response_action(Severity::Low, &[], 1.0), ResponseAction::None);
        assert_eq!(determine_response_action(Severity::Low, &[], 6.0), ResponseAction::Warning);
        assert_eq!(determine_response_action(Severity::Medium, &[], 16.0), ResponseAction::Throttle);
        assert_eq!(determine_response_action(Severity::Medium, &[], 30.0), ResponseAction::Challenge);
        assert_eq!(
            determine_response_action(Severity::High, &[], 60.0),
            ResponseAction::TemporaryBlock
        );
        assert_eq!(
            determine_response_action(Severity::High, &[], 120.0),
            ResponseAction::PermanentBan
        );
    }

    #[test]
    fn test_critical_severity_blocks_even_at_low_score() {
        assert_eq!(
            determine_response_action(Severity::Critical, &[], 20.0),
            ResponseAction::TemporaryBlock
        );
        assert_eq!(
            determine_response_action(Severity::Critical, &[], 150.0),
            ResponseAction::PermanentBan
        );
    }

    #[test]
    fn test_pattern_overrides_outrank_ladder() {
        assert_eq!(
            determine_response_action(Severity::Low, &[PatternType::CredentialStuffing], 0.0),
            ResponseAction::PermanentBan
        );
        assert_eq!(
            determine_response_action(Severity::Low, &[PatternType::DistributedAttack], 0.0),
            ResponseAction::TemporaryBlock
        );
    }

    #[test]
    fn test_accumulated_score_sixty_escalates_to_block() {
        // Two highs and a critical, all fresh: 10 + 10 + 20 leaves the
        // ladder in TemporaryBlock territory once the running total hits 50.
        let now = 1_700_000_000;
        let incidents = vec![
            incident(Severity::High, now - 60),
            incident(Severity::High, now - 30),
            incident(Severity::Critical, now - 10),
            incident(Severity::Critical, now - 5),
        ];
        let total = decayed_total(&incidents, now);
        assert!(total >= 50.0, "got {}", total);
        assert_eq!(
            determine_response_action(Severity::Medium, &[], total),
            ResponseAction::TemporaryBlock
        );
    }

    #[test]
    fn test_escalation_level_cap() {
        for (score, expected) in [(0.0, 0u8), (19.0, 0), (20.0, 1), (45.0, 2), (100.0, 5), (400.0, 5)] {
            let level = ((score as f64 / 20.0).floor() as u8).min(5);
            assert_eq!(level, expected, "score {}", score);
        }
    }
}
