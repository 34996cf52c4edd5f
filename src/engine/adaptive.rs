use crate::engine::actions::{ActionCategory, Severity};
use crate::engine::patterns::PatternDetectionResult;
use crate::redis_client::RedisClient;
use anyhow::{Result, anyhow};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

const LEARNING_TTL: i64 = 604_800; // 7 days
const LEARNING_MIN_SAMPLES: i64 = 1000;
const LEARNING_F1_FLOOR: f64 = 0.8;
const ADJUSTMENT_VERSION: u32 = 1;

/// Tuning knobs for the adaptive layer. Data, not code, so deployments can
/// retune without touching the factor logic.
#[derive(Debug, Clone)]
pub struct AdaptiveConfig {
    /// Trust bonus ceiling: at trust 1.0 the limit is multiplied by this.
    pub trust_bonus_max: f64,
    /// Factors below this magnitude are treated as noise and skipped.
    pub noise_threshold: f64,
    /// Process memory budget used to derive the load factor.
    pub memory_budget_bytes: u64,
}

impl Default for AdaptiveConfig {
    fn default() -> Self {
        Self {
            trust_bonus_max: 2.0,
            noise_threshold: 0.05,
            memory_budget_bytes: 512 * 1024 * 1024,
        }
    }
}

/// Hour-indexed limit multipliers. Evening peak hours tighten limits,
/// overnight hours relax them.
pub const TIME_OF_DAY_MULTIPLIERS: [f64; 24] = [
    1.3, 1.3, 1.3, 1.2, 1.2, 1.2, // 00-05 overnight
    1.0, 1.0, 1.0, 1.0, 1.0, 1.0, // 06-11 morning
    1.0, 1.0, 1.0, 1.0, 1.0, 1.0, // 12-17 afternoon
    0.8, 0.8, 0.8, 0.8, 0.8, // 18-22 evening peak
    1.0, // 23
];

/// One contextual factor that moved the multiplier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdaptiveFactor {
    pub name: String,
    /// Signed adjustment; the multiplier picks up (1 + adjustment).
    pub adjustment: f64,
}

/// Outcome of an adaptive limit computation. Ephemeral.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdaptiveResult {
    pub adjusted_limit: u64,
    pub original_limit: u64,
    pub multiplier: f64,
    pub factors: Vec<AdaptiveFactor>,
    pub recommendation: Option<String>,
}

/// Everything the pure factor computation needs, gathered up front so the
/// arithmetic itself has no I/O.
#[derive(Debug, Clone, Default)]
pub struct AdaptiveInputs {
    pub trust_score: f64,
    /// Process heap usage as a fraction of the configured budget.
    pub heap_usage: f64,
    pub pattern_severity: Option<Severity>,
    pub hour_of_day: usize,
    pub user_total_requests: u64,
    pub user_blocked_requests: u64,
    pub global_total_requests: u64,
    pub global_blocked_requests: u64,
    pub global_error_requests: u64,
}

/// Compute the blended multiplier. Each factor contributes only when its
/// magnitude clears the noise threshold.
pub fn compute_multiplier(inputs: &AdaptiveInputs, config: &AdaptiveConfig) -> (f64, Vec<AdaptiveFactor>, Option<String>) {
    let mut multiplier = 1.0;
    let mut factors = Vec::new();
    let mut recommendation = None;

    let mut apply = |name: &str, adjustment: f64, multiplier: &mut f64, factors: &mut Vec<AdaptiveFactor>| {
        if adjustment.abs() > config.noise_threshold {
            *multiplier *= 1.0 + adjustment;
            factors.push(AdaptiveFactor {
                name: name.to_string(),
                adjustment,
            });
        }
    };

    // Trust bonus. Low trust already shrinks limits upstream, so this factor
    // only ever widens them.
    let trust_bonus = (inputs.trust_score * config.trust_bonus_max - 1.0).max(0.0);
    apply("trust_bonus", trust_bonus, &mut multiplier, &mut factors);

    // Load shedding: above 80% of the memory budget the penalty scales
    // linearly to -0.5 at 100%.
    if inputs.heap_usage > 0.8 {
        let over = ((inputs.heap_usage - 0.8) / 0.2).min(1.0);
        apply("system_load", -0.5 * over, &mut multiplier, &mut factors);
    }

    if let Some(severity) = inputs.pattern_severity {
        let penalty = match severity {
            Severity::Low => -0.1,
            Severity::Medium => -0.3,
            Severity::High => -0.5,
            Severity::Critical => -0.8,
        };
        apply("pattern_penalty", penalty, &mut multiplier, &mut factors);
        recommendation = Some("behavioral anomaly detected; limits tightened".to_string());
    }

    let tod = TIME_OF_DAY_MULTIPLIERS[inputs.hour_of_day % 24] - 1.0;
    apply("time_of_day", tod, &mut multiplier, &mut factors);

    // Per-identity history: chronic offenders get squeezed, consistently
    // clean high-volume users get headroom.
    if inputs.user_total_requests > 0 {
        let block_rate = inputs.user_blocked_requests as f64 / inputs.user_total_requests as f64;
        if block_rate > 0.2 {
            apply("user_history", -0.3, &mut multiplier, &mut factors);
        } else if block_rate < 0.05 && inputs.user_total_requests >= 100 {
            apply("user_history", 0.2, &mut multiplier, &mut factors);
        }
    }

    if inputs.global_total_requests > 0 {
        let global_block_rate =
            inputs.global_blocked_requests as f64 / inputs.global_total_requests as f64;
        let global_error_rate =
            inputs.global_error_requests as f64 / inputs.global_total_requests as f64;
        if global_block_rate > 0.3 {
            apply("global_state", -0.4, &mut multiplier, &mut factors);
            recommendation = Some("global block rate elevated; system under attack".to_string());
        } else if global_error_rate > 0.05 {
            apply("global_state", -0.2, &mut multiplier, &mut factors);
        }
    }

    (multiplier, factors, recommendation)
}

/// Clamp and round the scaled limit: never below 1, never above 5x base.
pub fn apply_limit(base_limit: u64, multiplier: f64) -> u64 {
    let scaled = (base_limit as f64 * multiplier).round() as i64;
    scaled.clamp(1, (base_limit * 5) as i64) as u64
}

/// Confusion-matrix counters for one action's admission outcomes.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct LearningCounts {
    pub allowed_legitimate: i64,
    pub allowed_abusive: i64,
    pub denied_legitimate: i64,
    pub denied_abusive: i64,
}

impl LearningCounts {
    pub fn total(&self) -> i64 {
        self.allowed_legitimate + self.allowed_abusive + self.denied_legitimate + self.denied_abusive
    }

    /// Denial is the positive class: of everything denied, how much was
    /// actually abusive.
    pub fn precision(&self) -> f64 {
        let denied = self.denied_abusive + self.denied_legitimate;
        if denied == 0 {
            return 0.0;
        }
        self.denied_abusive as f64 / denied as f64
    }

    /// Of everything abusive, how much was denied.
    pub fn recall(&self) -> f64 {
        let abusive = self.denied_abusive + self.allowed_abusive;
        if abusive == 0 {
            return 0.0;
        }
        self.denied_abusive as f64 / abusive as f64
    }

    pub fn f1(&self) -> f64 {
        let p = self.precision();
        let r = self.recall();
        if p + r == 0.0 {
            return 0.0;
        }
        2.0 * p * r / (p + r)
    }
}

/// Persisted threshold-adjustment suggestion. Written when the F1 score
/// drops below the floor; surfaced in the admin metrics view but not fed
/// back into window configuration (see DESIGN.md).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThresholdAdjustment {
    pub version: u32,
    pub action: ActionCategory,
    /// Signed fraction, e.g. 0.2 means "raise thresholds 20%".
    pub adjustment: f64,
    pub f1: f64,
    pub precision: f64,
    pub recall: f64,
    pub computed_at: u64,
}

/// Reads the current process RSS as a fraction of the configured budget.
/// Without procfs this reports 0.0 and the load factor never engages.
pub fn process_heap_usage(budget_bytes: u64) -> f64 {
    if budget_bytes == 0 {
        return 0.0;
    }
    let status = match std::fs::read_to_string("/proc/self/status") {
        Ok(s) => s,
        Err(_) => return 0.0,
    };
    for line in status.lines() {
        if let Some(rest) = line.strip_prefix("VmRSS:") {
            let kib: u64 = rest
                .trim()
                .trim_end_matches("kB")
                .trim()
                .parse()
                .unwrap_or(0);
            return (kib * 1024) as f64 / budget_bytes as f64;
        }
    }
    0.0
}

/// Scales base limits by contextual factors and accumulates admission
/// feedback for offline threshold review.
#[derive(Clone)]
pub struct AdaptiveRateLimiter {
    redis: RedisClient,
    config: AdaptiveConfig,
}

impl AdaptiveRateLimiter {
    pub fn new(redis: RedisClient, config: AdaptiveConfig) -> Self {
        Self { redis, config }
    }

    fn learning_key(action: ActionCategory) -> String {
        format!("learning:{}", action.as_str())
    }

    fn adjustment_key(action: ActionCategory) -> String {
        format!("learning:adjust:{}", action.as_str())
    }

    /// Blend trust, load, pattern, time, history and global state into an
    /// adjusted limit for this check.
    pub async fn calculate(
        &self,
        identity: &str,
        base_limit: u64,
        trust_score: f64,
        pattern: Option<&PatternDetectionResult>,
    ) -> Result<AdaptiveResult> {
        let now = crate::directory::now_secs();
        let hour_of_day = ((now / 3600) % 24) as usize;

        let user = self
            .redis
            .hgetall(&format!("metrics:user:{}", identity))
            .await
            .unwrap_or_default();
        let global = self
            .redis
            .hgetall("metrics:global")
            .await
            .unwrap_or_default();

        let field = |map: &HashMap<String, String>, name: &str| -> u64 {
            map.get(name).and_then(|v| v.parse().ok()).unwrap_or(0)
        };

        let inputs = AdaptiveInputs {
            trust_score,
            heap_usage: process_heap_usage(self.config.memory_budget_bytes),
            pattern_severity: pattern.filter(|p| p.detected).map(|p| p.severity),
            hour_of_day,
            user_total_requests: field(&user, "total"),
            user_blocked_requests: field(&user, "blocked"),
            global_total_requests: field(&global, "total"),
            global_blocked_requests: field(&global, "blocked"),
            global_error_requests: field(&global, "errors"),
        };

        let (multiplier, factors, recommendation) = compute_multiplier(&inputs, &self.config);
        Ok(AdaptiveResult {
            adjusted_limit: apply_limit(base_limit, multiplier),
            original_limit: base_limit,
            multiplier,
            factors,
            recommendation,
        })
    }

    /// Accumulate one admission outcome into the per-action confusion
    /// matrix. The "legitimate" label here is the decision's own outcome,
    /// not verified ground truth, so the resulting F1 is self-referential.
    pub async fn learn(
        &self,
        action: ActionCategory,
        allowed: bool,
        legitimate: bool,
    ) -> Result<()> {
        let field = match (allowed, legitimate) {
            (true, true) => "allowed_legitimate",
            (true, false) => "allowed_abusive",
            (false, true) => "denied_legitimate",
            (false, false) => "denied_abusive",
        };
        let key = Self::learning_key(action);
        self.redis
            .hincrby(&key, field, 1)
            .await
            .map_err(|e| anyhow!("Failed to update learning counters: {}", e))?;
        self.redis
            .expire(&key, LEARNING_TTL)
            .await
            .map_err(|e| anyhow!("Failed to expire learning counters: {}", e))?;

        let counts = self.learning_counts(action).await?;
        if counts.total() >= LEARNING_MIN_SAMPLES {
            let f1 = counts.f1();
            if f1 < LEARNING_F1_FLOOR {
                // Precision lagging recall means denials are too eager:
                // suggest loosening. Otherwise suggest tightening.
                let adjustment = if counts.precision() < counts.recall() { 0.2 } else { -0.2 };
                let suggestion = ThresholdAdjustment {
                    version: ADJUSTMENT_VERSION,
                    action,
                    adjustment,
                    f1,
                    precision: counts.precision(),
                    recall: counts.recall(),
                    computed_at: crate::directory::now_secs(),
                };
                let json = serde_json::to_string(&suggestion)
                    .map_err(|e| anyhow!("Failed to serialize threshold adjustment: {}", e))?;
                self.redis
                    .set_ex(&Self::adjustment_key(action), &json, LEARNING_TTL as u64)
                    .await
                    .map_err(|e| anyhow!("Failed to persist threshold adjustment: {}", e))?;
            }
        }
        Ok(())
    }

    /// Read back the confusion matrix for one action.
    pub async fn learning_counts(&self, action: ActionCategory) -> Result<LearningCounts> {
        let map = self
            .redis
            .hgetall(&Self::learning_key(action))
            .await
            .map_err(|e| anyhow!("Failed to read learning counters: {}", e))?;
        let field = |name: &str| -> i64 { map.get(name).and_then(|v| v.parse().ok()).unwrap_or(0) };
        Ok(LearningCounts {
            allowed_legitimate: field("allowed_legitimate"),
            allowed_abusive: field("allowed_abusive"),
            denied_legitimate: field("denied_legitimate"),
            denied_abusive: field("denied_abusive"),
        })
    }

    /// The persisted suggestion for an action, if one has been produced.
    pub async fn pending_adjustment(
        &self,
        action: ActionCategory,
    ) -> Result<Option<ThresholdAdjustment>> {
        match self.redis.get(&Self::adjustment_key(action)).await {
            Ok(Some(json)) => Ok(serde_json::from_str(&json)
                .ok()
                .filter(|a: &ThresholdAdjustment| a.version == ADJUSTMENT_VERSION)),
            Ok(None) => Ok(None),
            Err(e) => Err(anyhow!("Failed to read threshold adjustment: {}", e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_neutral_inputs_leave_multiplier_alone() {
        let inputs = AdaptiveInputs {
            trust_score: 0.5,
            hour_of_day: 10,
            ..AdaptiveInputs::default()
        };
        let (multiplier, factors, _) = compute_multiplier(&inputs, &AdaptiveConfig::default());
        assert_eq!(multiplier, 1.0);
        assert!(factors.is_empty());
    }

    #[test]
    fn test_trust_bonus_widens_limits() {
        let inputs = AdaptiveInputs {
            trust_score: 0.95,
            hour_of_day: 10,
            ..AdaptiveInputs::default()
        };
        let (multiplier, factors, _) = compute_multiplier(&inputs, &AdaptiveConfig::default());
        assert!((multiplier - 1.9).abs() < 1e-9);
        assert_eq!(factors.len(), 1);
        assert_eq!(factors[0].name, "trust_bonus");
    }

    #[test]
    fn test_low_trust_never_penalizes_here() {
        // Trust already scales the base limit upstream; the adaptive factor
        // is bonus-only.
        let inputs = AdaptiveInputs {
            trust_score: 0.0,
            hour_of_day: 10,
            ..AdaptiveInputs::default()
        };
        let (multiplier, _, _) = compute_multiplier(&inputs, &AdaptiveConfig::default());
        assert_eq!(multiplier, 1.0);
    }

    #[test]
    fn test_pattern_penalty_scales_with_severity() {
        let config = AdaptiveConfig::default();
        let base = AdaptiveInputs {
            trust_score: 0.5,
            hour_of_day: 10,
            ..AdaptiveInputs::default()
        };
        let mut last = f64::MAX;
        for severity in [Severity::Low, Severity::Medium, Severity::High, Severity::Critical] {
            let inputs = AdaptiveInputs {
                pattern_severity: Some(severity),
                ..base.clone()
            };
            let (multiplier, _, recommendation) = compute_multiplier(&inputs, &config);
            assert!(multiplier < last, "{:?} should tighten more", severity);
            assert!(recommendation.is_some());
            last = multiplier;
        }
    }

    #[test]
    fn test_evening_peak_tightens_overnight_relaxes() {
        let config = AdaptiveConfig::default();
        let evening = AdaptiveInputs {
            trust_score: 0.5,
            hour_of_day: 19,
            ..AdaptiveInputs::default()
        };
        let overnight = AdaptiveInputs {
            trust_score: 0.5,
            hour_of_day: 2,
            ..AdaptiveInputs::default()
        };
        assert!(compute_multiplier(&evening, &config).0 < 1.0);
        assert!(compute_multiplier(&overnight, &config).0 > 1.0);
    }

    #[test]
    fn test_user_history_factor() {
        let config = AdaptiveConfig::default();
        let offender = AdaptiveInputs {
            trust_score: 0.5,
            hour_of_day: 10,
            user_total_requests: 100,
            user_blocked_requests: 30,
            ..AdaptiveInputs::default()
        };
        assert!(compute_multiplier(&offender, &config).0 < 1.0);

        let clean = AdaptiveInputs {
            trust_score: 0.5,
            hour_of_day: 10,
            user_total_requests: 500,
            user_blocked_requests: 2,
            ..AdaptiveInputs::default()
        };
        assert!(compute_multiplier(&clean, &config).0 > 1.0);

        // Clean but low-volume history earns nothing yet.
        let sparse = AdaptiveInputs {
            trust_score: 0.5,
            hour_of_day: 10,
            user_total_requests: 50,
            user_blocked_requests: 0,
            ..AdaptiveInputs::default()
        };
        assert_eq!(compute_multiplier(&sparse, &config).0, 1.0);
    }

    #[test]
    fn test_global_under_attack_penalty() {
        let config = AdaptiveConfig::default();
        let inputs = AdaptiveInputs {
            trust_score: 0.5,
            hour_of_day: 10,
            global_total_requests: 1000,
            global_blocked_requests: 400,
            ..AdaptiveInputs::default()
        };
        let (multiplier, _, recommendation) = compute_multiplier(&inputs, &config);
        assert!((multiplier - 0.6).abs() < 1e-9);
        assert!(recommendation.unwrap().contains("under attack"));
    }

    #[test]
    fn test_system_load_penalty_is_linear_above_80_percent() {
        let config = AdaptiveConfig::default();
        let at_90 = AdaptiveInputs {
            trust_score: 0.5,
            hour_of_day: 10,
            heap_usage: 0.9,
            ..AdaptiveInputs::default()
        };
        let (multiplier, _, _) = compute_multiplier(&at_90, &config);
        assert!((multiplier - 0.75).abs() < 1e-9);

        let at_full = AdaptiveInputs {
            heap_usage: 1.0,
            ..at_90
        };
        let (multiplier, _, _) = compute_multiplier(&at_full, &config);
        assert!((multiplier - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_apply_limit_clamps() {
        assert_eq!(apply_limit(100, 1.5), 150);
        assert_eq!(apply_limit(100, 0.0001), 1);
        assert_eq!(apply_limit(100, 10.0), 500);
        assert_eq!(apply_limit(1, 0.2), 1);
    }

    #[test]
    fn test_learning_counts_f1() {
        let counts = LearningCounts {
            allowed_legitimate: 800,
            allowed_abusive: 50,
            denied_legitimate: 50,
            denied_abusive: 100,
        };
        assert_eq!(counts.total(), 1000);
        assert!((counts.precision() - 100.0 / 150.0).abs() < 1e-9);
        assert!((counts.recall() - 100.0 / 150.0).abs() < 1e-9);
        assert!(counts.f1() < LEARNING_F1_FLOOR);

        let sharp = LearningCounts {
            allowed_legitimate: 900,
            allowed_abusive: 5,
            denied_legitimate: 5,
            denied_abusive: 90,
        };
        assert!(sharp.f1() > LEARNING_F1_FLOOR);
    }

    #[test]
    fn test_zero_counts_do_not_divide_by_zero() {
        let counts = LearningCounts::default();
        assert_eq!(counts.precision(), 0.0);
        assert_eq!(counts.recall(), 0.0);
        assert_eq!(counts.f1(), 0.0);
    }
}
