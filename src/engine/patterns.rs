use crate::engine::actions::{ActionCategory, ActionMetadata, Severity};
use crate::redis_client::RedisClient;
use anyhow::{Result, anyhow};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::{SystemTime, UNIX_EPOCH};

const BEHAVIOR_LOG_TTL: i64 = 3600; // entries survive one hour
const DETECTION_WINDOW_MS: u64 = 300_000; // heuristics look at the last 5 minutes
const FAILURE_COUNTER_TTL: i64 = 300;
const BEHAVIOR_ENTRY_VERSION: u32 = 1;
const SPAM_LOOKBACK: usize = 10;
const SPAM_SIMILARITY_THRESHOLD: f64 = 0.8;

/// Named behavioral heuristics. Each is evaluated independently; the
/// detector reports every one that fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PatternType {
    RapidFire,
    SequentialFailure,
    SuspiciousTiming,
    Automation,
    ContentSpam,
    Scraping,
    CredentialStuffing,
    DistributedAttack,
}

impl PatternType {
    /// Fixed confidence weight. Credential stuffing and distributed attacks
    /// weigh heaviest; scraping alone is the weakest signal.
    pub fn weight(&self) -> f64 {
        match self {
            PatternType::CredentialStuffing => 0.95,
            PatternType::DistributedAttack => 0.90,
            PatternType::SequentialFailure => 0.85,
            PatternType::RapidFire => 0.80,
            PatternType::Automation => 0.75,
            PatternType::ContentSpam => 0.70,
            PatternType::SuspiciousTiming => 0.65,
            PatternType::Scraping => 0.50,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PatternType::RapidFire => "rapid_fire",
            PatternType::SequentialFailure => "sequential_failure",
            PatternType::SuspiciousTiming => "suspicious_timing",
            PatternType::Automation => "automation",
            PatternType::ContentSpam => "content_spam",
            PatternType::Scraping => "scraping",
            PatternType::CredentialStuffing => "credential_stuffing",
            PatternType::DistributedAttack => "distributed_attack",
        }
    }
}

/// What the detector recommends the limiter do about a detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SuggestedAction {
    Allow,
    Challenge,
    Block,
    Ban,
}

/// One heuristic's finding, with a 0-1 strength score.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatternEvidence {
    pub pattern: PatternType,
    pub score: f64,
    pub detail: String,
}

/// Result of a per-check behavioral analysis. Ephemeral.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatternDetectionResult {
    pub detected: bool,
    pub patterns: Vec<PatternType>,
    pub confidence: f64,
    pub severity: Severity,
    pub suggested_action: SuggestedAction,
    pub evidence: Vec<PatternEvidence>,
}

impl PatternDetectionResult {
    pub fn clean() -> Self {
        Self {
            detected: false,
            patterns: vec![],
            confidence: 0.0,
            severity: Severity::Low,
            suggested_action: SuggestedAction::Allow,
            evidence: vec![],
        }
    }
}

/// Per-request context the boundary layer hands to the detector.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    /// Submitted content body (write actions), truncated by the caller.
    pub content: Option<String>,
}

/// One line of the behavior log, stored as JSON in a timestamp-scored set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BehaviorEntry {
    pub version: u32,
    /// Uniqueness nonce: identical requests must not collapse into one
    /// sorted-set member.
    pub nonce: String,
    pub ts_ms: u64,
    pub action: ActionCategory,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

/// Aggregates over the trailing detection window.
#[derive(Debug, Clone, Default)]
pub struct BehaviorMetrics {
    pub request_count: usize,
    pub failure_count: usize,
    pub success_rate: f64,
    pub min_interval_ms: Option<u64>,
    pub avg_interval_ms: Option<f64>,
    pub intervals_ms: Vec<u64>,
    pub distinct_actions: usize,
    pub distinct_ips: usize,
    pub user_agents: Vec<String>,
    pub read_like_count: usize,
    pub hour_histogram: [u32; 24],
    /// Elapsed time between first and last request in the window.
    pub span_ms: u64,
}

impl BehaviorMetrics {
    pub fn from_entries(entries: &[BehaviorEntry]) -> Self {
        let mut metrics = BehaviorMetrics::default();
        if entries.is_empty() {
            return metrics;
        }

        let mut sorted: Vec<&BehaviorEntry> = entries.iter().collect();
        sorted.sort_by_key(|e| e.ts_ms);

        metrics.request_count = sorted.len();
        metrics.failure_count = sorted.iter().filter(|e| !e.success).count();
        metrics.success_rate =
            (metrics.request_count - metrics.failure_count) as f64 / metrics.request_count as f64;

        let mut actions = HashSet::new();
        let mut ips = HashSet::new();
        let mut agents = HashSet::new();
        for entry in &sorted {
            actions.insert(entry.action);
            if let Some(ip) = &entry.ip {
                ips.insert(ip.clone());
            }
            if let Some(ua) = &entry.user_agent {
                agents.insert(ua.clone());
            }
            if crate::engine::actions::metadata_of(entry.action).is_read_like() {
                metrics.read_like_count += 1;
            }
            let hour = ((entry.ts_ms / 1000 / 3600) % 24) as usize;
            metrics.hour_histogram[hour] += 1;
        }
        metrics.distinct_actions = actions.len();
        metrics.distinct_ips = ips.len();
        metrics.user_agents = agents.into_iter().collect();

        for pair in sorted.windows(2) {
            let gap = pair[1].ts_ms - pair[0].ts_ms;
            metrics.intervals_ms.push(gap);
        }
        if !metrics.intervals_ms.is_empty() {
            metrics.min_interval_ms = metrics.intervals_ms.iter().copied().min();
            metrics.avg_interval_ms = Some(
                metrics.intervals_ms.iter().sum::<u64>() as f64 / metrics.intervals_ms.len() as f64,
            );
        }
        metrics.span_ms = sorted.last().unwrap().ts_ms - sorted.first().unwrap().ts_ms;
        metrics
    }

    /// Requests per second across the observed span.
    pub fn requests_per_second(&self) -> f64 {
        if self.span_ms == 0 {
            return self.request_count as f64;
        }
        self.request_count as f64 / (self.span_ms as f64 / 1000.0)
    }

    /// 1.0 means perfectly constant inter-arrival spacing.
    pub fn timing_regularity(&self) -> f64 {
        if self.intervals_ms.len() < 2 {
            return 0.0;
        }
        let mean = self.intervals_ms.iter().sum::<u64>() as f64 / self.intervals_ms.len() as f64;
        if mean <= 0.0 {
            return 1.0;
        }
        let variance = self
            .intervals_ms
            .iter()
            .map(|&i| {
                let d = i as f64 - mean;
                d * d
            })
            .sum::<f64>()
            / self.intervals_ms.len() as f64;
        let cv = variance.sqrt() / mean;
        (1.0 - cv).clamp(0.0, 1.0)
    }
}

static BOT_AGENT_MARKERS: Lazy<Vec<&'static str>> = Lazy::new(|| {
    vec![
        "bot", "crawler", "spider", "scrapy", "curl", "wget", "python-requests",
        "python-urllib", "go-http-client", "okhttp", "java/", "httpclient",
        "headless", "phantomjs", "selenium", "puppeteer", "playwright",
    ]
});

/// Positional character similarity between two strings, 0-1.
/// Cheap stand-in for a real diff: matching characters at matching offsets
/// over the longer length.
pub fn content_similarity(a: &str, b: &str) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    let a_chars: Vec<char> = a.chars().collect();
    let b_chars: Vec<char> = b.chars().collect();
    let longest = a_chars.len().max(b_chars.len());
    if longest == 0 {
        return 1.0;
    }
    let matching = a_chars
        .iter()
        .zip(b_chars.iter())
        .filter(|(x, y)| x == y)
        .count();
    matching as f64 / longest as f64
}

fn check_rapid_fire(metrics: &BehaviorMetrics) -> Option<PatternEvidence> {
    let high_volume = metrics.request_count >= 20;
    let burst_interval = metrics.min_interval_ms.map(|i| i < 100).unwrap_or(false);
    if !high_volume && !(burst_interval && metrics.request_count >= 5) {
        return None;
    }
    let mut score: f64 = 0.5;
    if metrics.requests_per_second() >= 10.0 {
        score += 0.3;
    }
    if burst_interval {
        score += 0.2;
    }
    Some(PatternEvidence {
        pattern: PatternType::RapidFire,
        score: score.min(1.0),
        detail: format!(
            "{} requests in window at {:.1} req/s (min interval {:?}ms)",
            metrics.request_count,
            metrics.requests_per_second(),
            metrics.min_interval_ms
        ),
    })
}

fn check_sequential_failure(metrics: &BehaviorMetrics) -> Option<PatternEvidence> {
    let failure_rate = 1.0 - metrics.success_rate;
    if metrics.failure_count >= 5 && failure_rate >= 0.8 {
        return Some(PatternEvidence {
            pattern: PatternType::SequentialFailure,
            score: failure_rate,
            detail: format!(
                "{} failures at {:.0}% failure rate",
                metrics.failure_count,
                failure_rate * 100.0
            ),
        });
    }
    None
}

fn check_suspicious_timing(metrics: &BehaviorMetrics) -> Option<PatternEvidence> {
    if metrics.request_count < 5 {
        return None;
    }
    let regularity = metrics.timing_regularity();
    if regularity >= 0.95 {
        return Some(PatternEvidence {
            pattern: PatternType::SuspiciousTiming,
            score: regularity,
            detail: format!("inter-arrival regularity {:.3}", regularity),
        });
    }
    None
}

fn check_automation(metrics: &BehaviorMetrics, ctx: &RequestContext) -> Option<PatternEvidence> {
    let mut agents: Vec<&str> = metrics.user_agents.iter().map(|s| s.as_str()).collect();
    if let Some(ua) = ctx.user_agent.as_deref() {
        agents.push(ua);
    }
    for agent in agents {
        let lowered = agent.to_lowercase();
        if let Some(marker) = BOT_AGENT_MARKERS.iter().find(|m| lowered.contains(*m)) {
            return Some(PatternEvidence {
                pattern: PatternType::Automation,
                score: 0.9,
                detail: format!("user agent matches '{}'", marker),
            });
        }
    }
    // Sleep-loop clients land within 100ms of exact 1-second multiples.
    if metrics.intervals_ms.len() >= 4 {
        let near_second = metrics
            .intervals_ms
            .iter()
            .filter(|&&i| {
                let rem = i % 1000;
                i >= 900 && (rem <= 100 || rem >= 900)
            })
            .count();
        if near_second * 10 >= metrics.intervals_ms.len() * 9 {
            return Some(PatternEvidence {
                pattern: PatternType::Automation,
                score: 0.7,
                detail: format!(
                    "{}/{} intervals within 100ms of a whole second",
                    near_second,
                    metrics.intervals_ms.len()
                ),
            });
        }
    }
    None
}

fn check_content_spam(
    meta: &ActionMetadata,
    entries: &[BehaviorEntry],
    ctx: &RequestContext,
) -> Option<PatternEvidence> {
    use crate::engine::actions::ActionType;
    if meta.action_type == ActionType::Read {
        return None;
    }
    let content = ctx.content.as_deref()?;
    if content.is_empty() {
        return None;
    }
    let mut recent: Vec<&BehaviorEntry> = entries.iter().filter(|e| e.content.is_some()).collect();
    recent.sort_by_key(|e| std::cmp::Reverse(e.ts_ms));
    for entry in recent.iter().take(SPAM_LOOKBACK) {
        let prior = entry.content.as_deref().unwrap_or_default();
        let similarity = content_similarity(content, prior);
        if similarity >= SPAM_SIMILARITY_THRESHOLD {
            return Some(PatternEvidence {
                pattern: PatternType::ContentSpam,
                score: similarity,
                detail: format!("{:.0}% similar to a recent submission", similarity * 100.0),
            });
        }
    }
    None
}

fn check_scraping(meta: &ActionMetadata, metrics: &BehaviorMetrics) -> Option<PatternEvidence> {
    if !meta.is_read_like() || metrics.request_count < 10 {
        return None;
    }
    let read_share = metrics.read_like_count as f64 / metrics.request_count as f64;
    if read_share >= 0.95 {
        return Some(PatternEvidence {
            pattern: PatternType::Scraping,
            score: read_share,
            detail: format!(
                "{:.0}% of {} requests are read/list/search",
                read_share * 100.0,
                metrics.request_count
            ),
        });
    }
    None
}

fn check_credential_stuffing(
    meta: &ActionMetadata,
    metrics: &BehaviorMetrics,
) -> Option<PatternEvidence> {
    let failure_rate = 1.0 - metrics.success_rate;
    if meta.is_auth_surface() && metrics.failure_count >= 5 && failure_rate >= 0.8 {
        return Some(PatternEvidence {
            pattern: PatternType::CredentialStuffing,
            score: failure_rate,
            detail: format!(
                "{} auth failures at {:.0}% failure rate",
                metrics.failure_count,
                failure_rate * 100.0
            ),
        });
    }
    None
}

fn check_distributed_attack(metrics: &BehaviorMetrics) -> Option<PatternEvidence> {
    if metrics.distinct_ips >= 5 && metrics.request_count >= 20 {
        return Some(PatternEvidence {
            pattern: PatternType::DistributedAttack,
            score: ((metrics.distinct_ips as f64) / 10.0).clamp(0.5, 1.0),
            detail: format!(
                "{} distinct source IPs across {} requests",
                metrics.distinct_ips, metrics.request_count
            ),
        });
    }
    None
}

/// Fold independent evidence into one verdict.
pub fn analyze_patterns(
    evidence: Vec<PatternEvidence>,
    metrics: &BehaviorMetrics,
) -> PatternDetectionResult {
    if evidence.is_empty() {
        return PatternDetectionResult::clean();
    }

    let weight_sum: f64 = evidence.iter().map(|e| e.pattern.weight()).sum();
    let confidence: f64 = evidence
        .iter()
        .map(|e| e.pattern.weight() * e.score)
        .sum::<f64>()
        / weight_sum;

    let patterns: Vec<PatternType> = evidence.iter().map(|e| e.pattern).collect();
    let has_stuffing = patterns.contains(&PatternType::CredentialStuffing);
    let has_sequential = patterns.contains(&PatternType::SequentialFailure);

    let severity = if confidence >= 0.9 || has_stuffing {
        Severity::Critical
    } else if confidence >= 0.7 || has_sequential {
        Severity::High
    } else if confidence >= 0.5 {
        Severity::Medium
    } else {
        Severity::Low
    };

    let suggested_action = match severity {
        Severity::Critical => {
            if metrics.failure_count > 10 {
                SuggestedAction::Ban
            } else {
                SuggestedAction::Block
            }
        }
        Severity::High => SuggestedAction::Block,
        Severity::Medium => SuggestedAction::Challenge,
        Severity::Low => SuggestedAction::Allow,
    };

    PatternDetectionResult {
        detected: true,
        patterns,
        confidence,
        severity,
        suggested_action,
        evidence,
    }
}

/// Evaluate every heuristic against a window of behavior. Pure; the
/// detector service feeds it from the store.
pub fn evaluate(
    meta: &ActionMetadata,
    entries: &[BehaviorEntry],
    ctx: &RequestContext,
) -> PatternDetectionResult {
    let metrics = BehaviorMetrics::from_entries(entries);
    let mut evidence = Vec::new();
    if let Some(e) = check_rapid_fire(&metrics) {
        evidence.push(e);
    }
    if let Some(e) = check_credential_stuffing(meta, &metrics) {
        evidence.push(e);
    } else if let Some(e) = check_sequential_failure(&metrics) {
        evidence.push(e);
    }
    if let Some(e) = check_suspicious_timing(&metrics) {
        evidence.push(e);
    }
    if let Some(e) = check_automation(&metrics, ctx) {
        evidence.push(e);
    }
    if let Some(e) = check_content_spam(meta, entries, ctx) {
        evidence.push(e);
    }
    if let Some(e) = check_scraping(meta, &metrics) {
        evidence.push(e);
    }
    if let Some(e) = check_distributed_attack(&metrics) {
        evidence.push(e);
    }
    analyze_patterns(evidence, &metrics)
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Behavioral anomaly detector over the shared-store request log.
#[derive(Clone)]
pub struct PatternDetector {
    redis: RedisClient,
}

impl PatternDetector {
    pub fn new(redis: RedisClient) -> Self {
        Self { redis }
    }

    fn log_key(identity: &str) -> String {
        format!("behavior:{}", identity)
    }

    fn failure_key(identity: &str) -> String {
        format!("behavior:fail:{}", identity)
    }

    /// Pull the trailing 5-minute window and run every heuristic.
    pub async fn detect(
        &self,
        identity: &str,
        meta: &ActionMetadata,
        ctx: &RequestContext,
    ) -> Result<PatternDetectionResult> {
        let now = now_ms();
        let window_start = now.saturating_sub(DETECTION_WINDOW_MS);

        let raw = self
            .redis
            .zrange_withscores(&Self::log_key(identity), 0, -1)
            .await
            .map_err(|e| anyhow!("Failed to read behavior log: {}", e))?;

        let entries: Vec<BehaviorEntry> = raw
            .into_iter()
            .filter(|(_, score)| *score >= window_start as f64)
            .filter_map(|(member, _)| serde_json::from_str::<BehaviorEntry>(&member).ok())
            .filter(|entry| entry.version == BEHAVIOR_ENTRY_VERSION)
            .collect();

        Ok(evaluate(meta, &entries, ctx))
    }

    /// Append one request to the behavior log and bump the short failure
    /// counter. The log is pruned to an hour on every write.
    pub async fn log_behavior(
        &self,
        identity: &str,
        action: ActionCategory,
        success: bool,
        ctx: &RequestContext,
    ) -> Result<()> {
        let now = now_ms();
        let entry = BehaviorEntry {
            version: BEHAVIOR_ENTRY_VERSION,
            nonce: uuid::Uuid::new_v4().simple().to_string(),
            ts_ms: now,
            action,
            success,
            ip: ctx.ip_address.clone(),
            user_agent: ctx.user_agent.clone(),
            content: ctx.content.as_ref().map(|c| c.chars().take(256).collect()),
        };
        let json = serde_json::to_string(&entry)
            .map_err(|e| anyhow!("Failed to serialize behavior entry: {}", e))?;

        let key = Self::log_key(identity);
        self.redis
            .zadd(&key, now as f64, &json)
            .await
            .map_err(|e| anyhow!("Failed to append behavior log: {}", e))?;
        let cutoff = now.saturating_sub(BEHAVIOR_LOG_TTL as u64 * 1000);
        self.redis
            .zrembyscore(&key, 0.0, cutoff as f64)
            .await
            .map_err(|e| anyhow!("Failed to prune behavior log: {}", e))?;
        self.redis
            .expire(&key, BEHAVIOR_LOG_TTL)
            .await
            .map_err(|e| anyhow!("Failed to expire behavior log: {}", e))?;

        if !success {
            let fail_key = Self::failure_key(identity);
            self.redis
                .incr(&fail_key)
                .await
                .map_err(|e| anyhow!("Failed to bump failure counter: {}", e))?;
            self.redis
                .expire(&fail_key, FAILURE_COUNTER_TTL)
                .await
                .map_err(|e| anyhow!("Failed to expire failure counter: {}", e))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::actions::{metadata_of, ActionCategory};

    const BASE_MS: u64 = 1_700_000_000_000;

    fn entry(ts_ms: u64, action: ActionCategory, success: bool) -> BehaviorEntry {
        BehaviorEntry {
            version: BEHAVIOR_ENTRY_VERSION,
            nonce: format!("n{}", ts_ms),
            ts_ms,
            action,
            success,
            ip: Some("10.0.0.1".to_string()),
            user_agent: Some("Mozilla/5.0".to_string()),
            content: None,
        }
    }

    #[test]
    fn test_rapid_fire_on_25_requests_in_10_seconds() {
        // Scenario: 25 requests over 10s, jittered spacing so only volume
        // (not timing regularity) can fire.
        let jitter = [0u64, 130, 217, 35, 301, 88, 150, 42, 260, 95];
        let entries: Vec<BehaviorEntry> = (0..25)
            .map(|i| {
                entry(
                    BASE_MS + i * 400 + jitter[(i % 10) as usize],
                    ActionCategory::PostRead,
                    true,
                )
            })
            .collect();
        let meta = metadata_of(ActionCategory::PostCreate);
        let result = evaluate(&meta, &entries, &RequestContext::default());
        assert!(result.detected);
        assert!(result.patterns.contains(&PatternType::RapidFire));
        assert!(result.severity >= Severity::Medium);
        assert!(matches!(
            result.suggested_action,
            SuggestedAction::Challenge | SuggestedAction::Block
        ));
    }

    #[test]
    fn test_rapid_fire_sub_100ms_bursts() {
        let entries: Vec<BehaviorEntry> = (0..6)
            .map(|i| entry(BASE_MS + i * 40, ActionCategory::PostCreate, true))
            .collect();
        let meta = metadata_of(ActionCategory::PostCreate);
        let result = evaluate(&meta, &entries, &RequestContext::default());
        assert!(result.patterns.contains(&PatternType::RapidFire));
    }

    #[test]
    fn test_sequential_failure_five_straight_failures() {
        // Scenario: 5 consecutive failures inside a minute.
        let entries: Vec<BehaviorEntry> = (0..5)
            .map(|i| entry(BASE_MS + i * 8000, ActionCategory::PostCreate, false))
            .collect();
        let meta = metadata_of(ActionCategory::PostCreate);
        let result = evaluate(&meta, &entries, &RequestContext::default());
        assert!(result.patterns.contains(&PatternType::SequentialFailure));
        assert!(result.severity >= Severity::High);
    }

    #[test]
    fn test_auth_failures_classified_as_credential_stuffing() {
        let entries: Vec<BehaviorEntry> = (0..8)
            .map(|i| entry(BASE_MS + i * 3500, ActionCategory::AuthLogin, false))
            .collect();
        let meta = metadata_of(ActionCategory::AuthLogin);
        let result = evaluate(&meta, &entries, &RequestContext::default());
        assert!(result.patterns.contains(&PatternType::CredentialStuffing));
        assert!(!result.patterns.contains(&PatternType::SequentialFailure));
        assert_eq!(result.severity, Severity::Critical);
    }

    #[test]
    fn test_suspicious_timing_on_constant_spacing() {
        let entries: Vec<BehaviorEntry> = (0..8)
            .map(|i| entry(BASE_MS + i * 5000, ActionCategory::PostRead, true))
            .collect();
        let meta = metadata_of(ActionCategory::PostCreate);
        let result = evaluate(&meta, &entries, &RequestContext::default());
        assert!(result.patterns.contains(&PatternType::SuspiciousTiming));
    }

    #[test]
    fn test_automation_via_user_agent() {
        let meta = metadata_of(ActionCategory::PostRead);
        let ctx = RequestContext {
            user_agent: Some("python-requests/2.31".to_string()),
            ..RequestContext::default()
        };
        let entries: Vec<BehaviorEntry> =
            (0..3).map(|i| entry(BASE_MS + i * 997, ActionCategory::PostRead, true)).collect();
        let result = evaluate(&meta, &entries, &ctx);
        assert!(result.patterns.contains(&PatternType::Automation));
    }

    #[test]
    fn test_content_spam_on_near_duplicates() {
        let mut entries: Vec<BehaviorEntry> = (0..3)
            .map(|i| entry(BASE_MS + i * 7001, ActionCategory::PostCreate, true))
            .collect();
        entries[1].content = Some("Buy cheap widgets now at widgets dot example".to_string());
        let meta = metadata_of(ActionCategory::PostCreate);
        let ctx = RequestContext {
            content: Some("Buy cheap widgets now at widgets dot example".to_string()),
            ..RequestContext::default()
        };
        let result = evaluate(&meta, &entries, &ctx);
        assert!(result.patterns.contains(&PatternType::ContentSpam));
    }

    #[test]
    fn test_scraping_needs_read_dominance_and_volume() {
        let jitter = [0u64, 811, 223, 617, 150, 432, 55, 710, 305, 128];
        let entries: Vec<BehaviorEntry> = (0..15)
            .map(|i| {
                entry(
                    BASE_MS + i * 2000 + jitter[(i % 10) as usize],
                    ActionCategory::PostList,
                    true,
                )
            })
            .collect();
        let meta = metadata_of(ActionCategory::PostList);
        let result = evaluate(&meta, &entries, &RequestContext::default());
        assert!(result.patterns.contains(&PatternType::Scraping));

        // Same volume against a write action never reports scraping.
        let meta = metadata_of(ActionCategory::PostCreate);
        let result = evaluate(&meta, &entries, &RequestContext::default());
        assert!(!result.patterns.contains(&PatternType::Scraping));
    }

    #[test]
    fn test_distributed_attack_on_many_ips() {
        let entries: Vec<BehaviorEntry> = (0..24)
            .map(|i| {
                let mut e = entry(BASE_MS + i * 1371, ActionCategory::AuthLogin, true);
                e.ip = Some(format!("10.0.0.{}", i % 8));
                e
            })
            .collect();
        let meta = metadata_of(ActionCategory::AuthLogin);
        let result = evaluate(&meta, &entries, &RequestContext::default());
        assert!(result.patterns.contains(&PatternType::DistributedAttack));
    }

    #[test]
    fn test_quiet_browsing_stays_clean() {
        let jitter = [0u64, 3100, 911, 2417, 1533];
        let entries: Vec<BehaviorEntry> = (0..4)
            .map(|i| {
                entry(
                    BASE_MS + i * 20_000 + jitter[(i % 5) as usize],
                    ActionCategory::PostRead,
                    true,
                )
            })
            .collect();
        let meta = metadata_of(ActionCategory::PostRead);
        let result = evaluate(&meta, &entries, &RequestContext::default());
        assert!(!result.detected);
        assert_eq!(result.suggested_action, SuggestedAction::Allow);
    }

    #[test]
    fn test_confidence_is_weighted_average() {
        let evidence = vec![
            PatternEvidence {
                pattern: PatternType::CredentialStuffing,
                score: 1.0,
                detail: String::new(),
            },
            PatternEvidence {
                pattern: PatternType::Scraping,
                score: 0.5,
                detail: String::new(),
            },
        ];
        let metrics = BehaviorMetrics::default();
        let result = analyze_patterns(evidence, &metrics);
        let expected = (0.95 * 1.0 + 0.50 * 0.5) / (0.95 + 0.50);
        assert!((result.confidence - expected).abs() < 1e-9);
        assert_eq!(result.severity, Severity::Critical);
    }

    #[test]
    fn test_ban_requires_heavy_failures() {
        let mut metrics = BehaviorMetrics::default();
        metrics.failure_count = 12;
        let evidence = vec![PatternEvidence {
            pattern: PatternType::CredentialStuffing,
            score: 1.0,
            detail: String::new(),
        }];
        let result = analyze_patterns(evidence, &metrics);
        assert_eq!(result.suggested_action, SuggestedAction::Ban);

        let mut metrics = BehaviorMetrics::default();
        metrics.failure_count = 6;
        let evidence = vec![PatternEvidence {
            pattern: PatternType::CredentialStuffing,
            score: 1.0,
            detail: String::new(),
        }];
        let result = analyze_patterns(evidence, &metrics);
        assert_eq!(result.suggested_action, SuggestedAction::Block);
    }

    #[test]
    fn test_content_similarity() {
        assert_eq!(content_similarity("abc", "abc"), 1.0);
        assert_eq!(content_similarity("abcd", "abXd"), 0.75);
        assert!(content_similarity("hello world", "goodbye moon") < 0.3);
        assert_eq!(content_similarity("", ""), 1.0);
    }
}
