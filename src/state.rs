use crate::directory::DirectoryClient;
use crate::engine::abuse::AbuseTracker;
use crate::engine::adaptive::{AdaptiveConfig, AdaptiveRateLimiter};
use crate::engine::limiter::{FailMode, RateLimiter};
use crate::engine::metrics_collector::MetricsCollector;
use crate::engine::patterns::PatternDetector;
use crate::engine::trust::TrustScorer;
use crate::redis_client::RedisClient;
use crate::security::{FloodGuard, IdentityResolver};
use anyhow::Result;
use metrics_exporter_prometheus::PrometheusHandle;

#[derive(Clone)]
pub struct AppState {
    pub redis: RedisClient,
    pub directory: DirectoryClient,
    pub trust: TrustScorer,
    pub patterns: PatternDetector,
    pub adaptive: AdaptiveRateLimiter,
    pub abuse: AbuseTracker,
    pub metrics: MetricsCollector,
    pub limiter: RateLimiter,
    pub identity: IdentityResolver,
    pub flood: FloodGuard,
    pub prometheus: PrometheusHandle,
}

impl AppState {
    /// Wire every service around one shared Redis connection manager.
    pub async fn new(
        redis_url: &str,
        server_secret: String,
        fail_mode: FailMode,
        memory_budget_bytes: u64,
        prometheus: PrometheusHandle,
    ) -> Result<Self> {
        let redis = RedisClient::new(redis_url).await?;
        let directory = DirectoryClient::new(redis.clone());
        let trust = TrustScorer::new(redis.clone(), directory.clone());
        let patterns = PatternDetector::new(redis.clone());
        let adaptive_config = AdaptiveConfig {
            memory_budget_bytes,
            ..AdaptiveConfig::default()
        };
        let adaptive = AdaptiveRateLimiter::new(redis.clone(), adaptive_config);
        let abuse = AbuseTracker::new(redis.clone(), directory.clone(), trust.clone());
        let metrics = MetricsCollector::new(redis.clone(), memory_budget_bytes);
        let limiter = RateLimiter::new(
            redis.clone(),
            directory.clone(),
            trust.clone(),
            patterns.clone(),
            adaptive.clone(),
            abuse.clone(),
            metrics.clone(),
            fail_mode,
        );
        let identity = IdentityResolver::new(server_secret);
        let flood = FloodGuard::from_env();

        Ok(Self {
            redis,
            directory,
            trust,
            patterns,
            adaptive,
            abuse,
            metrics,
            limiter,
            identity,
            flood,
            prometheus,
        })
    }
}
