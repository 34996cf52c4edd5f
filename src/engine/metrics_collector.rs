use crate::directory::now_secs;
use crate::engine::actions::ActionCategory;
use crate::engine::patterns::PatternType;
use crate::redis_client::RedisClient;
use anyhow::{Result, anyhow};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

pub const FLUSH_INTERVAL: Duration = Duration::from_secs(300);
const MINUTE_TTL: i64 = 3600;
const HOUR_TTL: i64 = 172_800;
const ACTION_TTL: i64 = 86_400;
const USER_TTL: i64 = 86_400;
const RT_TTL: i64 = 3600;
const RT_KEY: &str = "metrics:rt";
const PATTERNS_KEY: &str = "metrics:patterns";
const TOP_USERS_KEY: &str = "metrics:top:users";
const TOP_N: isize = 10;

/// Aggregated view returned by the metrics endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub total_requests: u64,
    pub blocked_requests: u64,
    pub error_requests: u64,
    pub block_rate: f64,
    pub current_minute: u64,
    pub current_hour: u64,
    pub per_action: HashMap<String, ActionStats>,
    /// Detection counts per behavioral pattern name.
    pub pattern_counts: HashMap<String, u64>,
    pub response_time_p95_ms: Option<u64>,
    pub response_time_p99_ms: Option<u64>,
    pub top_identities: Vec<(String, u64)>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ActionStats {
    pub total: u64,
    pub blocked: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemHealth {
    pub store_reachable: bool,
    pub heap_usage: f64,
    pub status: String,
}

/// Daily operational report assembled from the stored counters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsReport {
    pub generated_at: String,
    pub snapshot: MetricsSnapshot,
    pub health: SystemHealth,
    pub notes: Vec<String>,
}

#[derive(Default)]
struct CounterBuffer {
    /// (hash key, field) -> pending increment.
    counters: HashMap<(String, String), i64>,
    /// (observed at ms, duration ms) samples for the latency set.
    response_times: Vec<(u64, u64)>,
}

impl CounterBuffer {
    fn bump(&mut self, key: String, field: &str) {
        *self.counters.entry((key, field.to_string())).or_default() += 1;
    }

    fn record_decision(
        &mut self,
        identity: &str,
        action: ActionCategory,
        allowed: bool,
        errored: bool,
        now: u64,
        response_time_ms: u64,
    ) {
        self.bump("metrics:global".to_string(), "total");
        self.bump(MetricsCollector::minute_key(now), "total");
        self.bump(MetricsCollector::hour_key(now), "total");
        self.bump(MetricsCollector::action_key(action), "total");
        self.bump(MetricsCollector::user_key(identity), "total");
        if !allowed {
            self.bump("metrics:global".to_string(), "blocked");
            self.bump(MetricsCollector::minute_key(now), "blocked");
            self.bump(MetricsCollector::hour_key(now), "blocked");
            self.bump(MetricsCollector::action_key(action), "blocked");
            self.bump(MetricsCollector::user_key(identity), "blocked");
        }
        if errored {
            self.bump("metrics:global".to_string(), "errors");
        }
        self.response_times
            .push((now * 1000 + response_time_ms % 1000, response_time_ms));
    }

    fn record_patterns(&mut self, patterns: &[PatternType]) {
        for pattern in patterns {
            self.bump(PATTERNS_KEY.to_string(), pattern.as_str());
        }
    }

    #[cfg(test)]
    fn pending(&self, key: &str, field: &str) -> i64 {
        self.counters
            .get(&(key.to_string(), field.to_string()))
            .copied()
            .unwrap_or(0)
    }
}

/// Buffered counter sink. Hot-path recording is an in-process mutation;
/// a background task flushes to the shared store every five minutes, so
/// counters lag reality by up to one flush interval.
#[derive(Clone)]
pub struct MetricsCollector {
    redis: RedisClient,
    buffer: Arc<Mutex<CounterBuffer>>,
    memory_budget_bytes: u64,
}

impl MetricsCollector {
    pub fn new(redis: RedisClient, memory_budget_bytes: u64) -> Self {
        Self {
            redis,
            buffer: Arc::new(Mutex::new(CounterBuffer::default())),
            memory_budget_bytes,
        }
    }

    fn minute_key(now: u64) -> String {
        format!("metrics:minute:{}", now / 60)
    }

    fn hour_key(now: u64) -> String {
        format!("metrics:hour:{}", now / 3600)
    }

    fn action_key(action: ActionCategory) -> String {
        format!("metrics:action:{}", action.as_str())
    }

    fn user_key(identity: &str) -> String {
        format!("metrics:user:{}", identity)
    }

    /// Record one admission decision. Cheap: mutates the buffer and emits
    /// process-local metrics, no store round-trip.
    pub async fn record_request(
        &self,
        identity: &str,
        action: ActionCategory,
        allowed: bool,
        errored: bool,
        response_time_ms: u64,
    ) {
        let now = now_secs();
        self.buffer
            .lock()
            .await
            .record_decision(identity, action, allowed, errored, now, response_time_ms);

        metrics::counter!("admission_requests_total", 1, "action" => action.as_str());
        if !allowed {
            metrics::counter!("admission_blocked_total", 1, "action" => action.as_str());
        }
        if errored {
            metrics::counter!("admission_store_errors_total", 1);
        }
        metrics::histogram!("admission_decision_ms", response_time_ms as f64);
    }

    /// Count one detection per fired pattern. Buffered like the decision
    /// counters and flushed to the `metrics:patterns` hash.
    pub async fn record_patterns(&self, patterns: &[PatternType]) {
        if patterns.is_empty() {
            return;
        }
        self.buffer.lock().await.record_patterns(patterns);
        for pattern in patterns {
            metrics::counter!("patterns_detected_total", 1, "pattern" => pattern.as_str());
        }
    }

    /// Push everything buffered since the last flush into the store.
    pub async fn flush(&self) -> Result<()> {
        let (counters, response_times) = {
            let mut buffer = self.buffer.lock().await;
            (
                std::mem::take(&mut buffer.counters),
                std::mem::take(&mut buffer.response_times),
            )
        };
        if counters.is_empty() && response_times.is_empty() {
            return Ok(());
        }

        for ((key, field), delta) in counters {
            self.redis
                .hincrby(&key, &field, delta)
                .await
                .map_err(|e| anyhow!("Failed to flush counter {}: {}", key, e))?;
            let ttl = if key.starts_with("metrics:minute:") {
                Some(MINUTE_TTL)
            } else if key.starts_with("metrics:hour:") {
                Some(HOUR_TTL)
            } else if key.starts_with("metrics:action:") {
                Some(ACTION_TTL)
            } else if key.starts_with("metrics:user:") {
                Some(USER_TTL)
            } else {
                None // global hash never expires
            };
            if let Some(ttl) = ttl {
                let _ = self.redis.expire(&key, ttl).await;
            }
            if field == "total" {
                if let Some(identity) = key.strip_prefix("metrics:user:") {
                    let _ = self.redis.zincr(TOP_USERS_KEY, identity, delta as f64).await;
                }
            }
        }
        let _ = self.redis.expire(TOP_USERS_KEY, USER_TTL).await;

        let cutoff_ms = (now_secs().saturating_sub(RT_TTL as u64)) * 1000;
        for (ts_ms, rt_ms) in response_times {
            let member = format!("{}:{}", uuid::Uuid::new_v4().simple(), rt_ms);
            self.redis
                .zadd(RT_KEY, ts_ms as f64, &member)
                .await
                .map_err(|e| anyhow!("Failed to record response time: {}", e))?;
        }
        let _ = self.redis.zrembyscore(RT_KEY, 0.0, cutoff_ms as f64).await;
        let _ = self.redis.expire(RT_KEY, RT_TTL).await;
        Ok(())
    }

    /// Periodic flush loop; spawn once at startup.
    pub async fn run_flush_task(self) {
        let mut ticker = tokio::time::interval(FLUSH_INTERVAL);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if let Err(e) = self.flush().await {
                eprintln!("Metrics flush failed: {}", e);
            }
        }
    }

    async fn hash_field(&self, key: &str, field: &str) -> u64 {
        self.redis
            .hget(key, field)
            .await
            .ok()
            .flatten()
            .and_then(|v| v.parse().ok())
            .unwrap_or(0)
    }

    async fn percentiles(&self) -> (Option<u64>, Option<u64>) {
        let raw = match self.redis.zrange_withscores(RT_KEY, 0, -1).await {
            Ok(raw) => raw,
            Err(_) => return (None, None),
        };
        let cutoff_ms = (now_secs().saturating_sub(RT_TTL as u64)) * 1000;
        let mut samples: Vec<u64> = raw
            .into_iter()
            .filter(|(_, score)| *score >= cutoff_ms as f64)
            .filter_map(|(member, _)| {
                member.rsplit(':').next().and_then(|v| v.parse().ok())
            })
            .collect();
        if samples.is_empty() {
            return (None, None);
        }
        samples.sort_unstable();
        let pick = |p: f64| {
            let idx = ((samples.len() as f64 * p).ceil() as usize).saturating_sub(1);
            samples[idx.min(samples.len() - 1)]
        };
        (Some(pick(0.95)), Some(pick(0.99)))
    }

    /// Aggregate the stored counters into one snapshot.
    pub async fn get_metrics(&self) -> Result<MetricsSnapshot> {
        let now = now_secs();
        let global = self
            .redis
            .hgetall("metrics:global")
            .await
            .map_err(|e| anyhow!("Failed to read global metrics: {}", e))?;
        let field = |name: &str| -> u64 {
            global.get(name).and_then(|v| v.parse().ok()).unwrap_or(0)
        };
        let total = field("total");
        let blocked = field("blocked");

        let mut per_action = HashMap::new();
        for &category in ActionCategory::all() {
            let key = Self::action_key(category);
            let action_total = self.hash_field(&key, "total").await;
            if action_total == 0 {
                continue;
            }
            per_action.insert(
                category.as_str().to_string(),
                ActionStats {
                    total: action_total,
                    blocked: self.hash_field(&key, "blocked").await,
                },
            );
        }

        let pattern_counts: HashMap<String, u64> = self
            .redis
            .hgetall(PATTERNS_KEY)
            .await
            .unwrap_or_default()
            .into_iter()
            .filter_map(|(name, value)| value.parse().ok().map(|v| (name, v)))
            .collect();

        let top_raw = self
            .redis
            .zrange_withscores(TOP_USERS_KEY, -TOP_N, -1)
            .await
            .unwrap_or_default();
        let mut top_identities: Vec<(String, u64)> = top_raw
            .into_iter()
            .map(|(member, score)| (member, score as u64))
            .collect();
        top_identities.reverse();

        let (p95, p99) = self.percentiles().await;

        Ok(MetricsSnapshot {
            total_requests: total,
            blocked_requests: blocked,
            error_requests: field("errors"),
            block_rate: if total > 0 { blocked as f64 / total as f64 } else { 0.0 },
            current_minute: self.hash_field(&Self::minute_key(now), "total").await,
            current_hour: self.hash_field(&Self::hour_key(now), "total").await,
            per_action,
            pattern_counts,
            response_time_p95_ms: p95,
            response_time_p99_ms: p99,
            top_identities,
        })
    }

    pub async fn system_health(&self) -> SystemHealth {
        let store_reachable = self.redis.ping().await.unwrap_or(false);
        let heap_usage = crate::engine::adaptive::process_heap_usage(self.memory_budget_bytes);
        let status = if !store_reachable {
            "degraded"
        } else if heap_usage > 0.9 {
            "overloaded"
        } else {
            "ok"
        };
        SystemHealth {
            store_reachable,
            heap_usage,
            status: status.to_string(),
        }
    }

    pub async fn generate_report(&self) -> Result<MetricsReport> {
        let snapshot = self.get_metrics().await?;
        let health = self.system_health().await;

        let mut notes = Vec::new();
        if snapshot.block_rate > 0.3 {
            notes.push("block rate above 30%; possible coordinated abuse".to_string());
        }
        if let Some(p99) = snapshot.response_time_p99_ms {
            if p99 > 250 {
                notes.push(format!("p99 decision latency elevated: {}ms", p99));
            }
        }
        if health.status != "ok" {
            notes.push(format!("system health: {}", health.status));
        }

        Ok(MetricsReport {
            generated_at: chrono::Utc::now().to_rfc3339(),
            snapshot,
            health,
            notes,
        })
    }
}
