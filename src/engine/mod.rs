pub mod actions;
pub mod trust;
pub mod patterns;
pub mod adaptive;
pub mod limiter;
pub mod abuse;
pub mod metrics_collector;
pub mod local_limiter;

pub use actions::{ActionCategory, ActionMetadata, ActionType, Severity};
pub use limiter::{DenyKind, RateLimiter, RateLimitResult};
pub use trust::{TrustLevel, TrustScore, TrustScorer};
