use serde::{Deserialize, Serialize};

/// Body returned with a 429 denial. Retry-After carries the same value
/// as a header; the body exists for clients that only read JSON.
#[derive(Debug, Serialize)]
pub struct RateLimitError {
    pub error: String,
    pub message: String,
    pub retry_after: u64,
    pub retry_after_seconds: u64,
}

impl RateLimitError {
    pub fn new(retry_after_seconds: u64, reason: &str) -> Self {
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        Self {
            error: "rate_limited".to_string(),
            message: reason.to_string(),
            retry_after: now + retry_after_seconds,
            retry_after_seconds,
        }
    }
}

/// Body returned with a 403 when access is refused outright rather than
/// merely throttled.
#[derive(Debug, Serialize)]
pub struct AccessDeniedError {
    pub error: String,
    pub reason: String,
}

impl AccessDeniedError {
    pub fn new(reason: &str) -> Self {
        Self {
            error: "access_denied".to_string(),
            reason: reason.to_string(),
        }
    }
}

/// Explicit admission check for callers that are not fronted by the
/// middleware (queue consumers, internal services).
#[derive(Debug, Deserialize)]
pub struct DecideRequest {
    /// Identity to check; defaults to the caller's own resolved identity.
    pub identity: Option<String>,
    /// Snake_case action category name.
    pub action: String,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    /// Submitted content, for spam similarity analysis.
    pub content: Option<String>,
}

/// Post-execution outcome report; failures feed the sequential-failure
/// and credential-stuffing heuristics.
#[derive(Debug, Deserialize)]
pub struct OutcomeRequest {
    pub identity: Option<String>,
    pub action: String,
    pub success: bool,
    pub content: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ResetRequest {
    pub identity: String,
    /// Specific action to reset; omitted means all actions.
    pub action: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ClearRestrictionRequest {
    pub identity: String,
    /// One of throttle/challenge/block/ban; omitted means all.
    pub restriction: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct OkResponse {
    pub success: bool,
    pub message: String,
}

impl OkResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }
}
