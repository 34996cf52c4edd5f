use axum::{
    extract::{ConnectInfo, Request, State},
    http::{HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::net::SocketAddr;

use crate::engine::actions::{classify, metadata_of, ActionMetadata};
use crate::engine::patterns::RequestContext;
use crate::engine::{DenyKind, RateLimitResult};
use crate::models::{AccessDeniedError, RateLimitError};
use crate::security::identity::IdentityKind;
use crate::state::AppState;

/// Paths that must answer even when the caller is throttled.
const EXEMPT_PATHS: &[&str] = &["/health", "/metrics"];

/// Admission middleware: resolves the caller, applies the flood guard,
/// classifies the route and asks the engine for a decision. Denials are
/// answered here; admitted requests carry the decision in extensions and
/// get X-RateLimit headers stamped on the response.
pub async fn admission_middleware(
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Response {
    let path = req.uri().path().to_string();
    if EXEMPT_PATHS.contains(&path.as_str()) {
        return next.run(req).await;
    }

    let caller = state.identity.resolve(req.headers(), &addr.ip().to_string());

    // Flat per-process quota before any store round-trip.
    if !state.flood.admit(&caller.id) {
        return (
            StatusCode::TOO_MANY_REQUESTS,
            Json(json!(RateLimitError::new(60, "request flood"))),
        )
            .into_response();
    }

    let category = classify(req.method().as_str(), &path);
    let meta = metadata_of(category);
    if missing_auth(&meta, caller.kind) {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!(AccessDeniedError::new("authentication required"))),
        )
            .into_response();
    }

    let ctx = RequestContext {
        ip_address: Some(caller.ip_address.clone()),
        user_agent: caller.user_agent.clone(),
        content: None,
    };

    let decision = state.limiter.check(&caller.id, category, &ctx).await;
    if !decision.allowed {
        return denial_response(&decision);
    }

    req.extensions_mut().insert(caller);
    req.extensions_mut().insert(decision.clone());
    let mut response = next.run(req).await;
    stamp_headers(&mut response, &decision);
    response
}

/// Actions touching authenticated state need a real credential; an
/// IP-composite identity is not one.
fn missing_auth(meta: &ActionMetadata, kind: IdentityKind) -> bool {
    meta.requires_auth && kind == IdentityKind::Ip
}

fn denial_response(decision: &RateLimitResult) -> Response {
    let reason = decision.reason.as_deref().unwrap_or("rate limit exceeded");
    let forbidden = decision
        .deny_kind
        .map(DenyKind::is_forbidden)
        .unwrap_or(false);

    let mut response = if forbidden {
        (
            StatusCode::FORBIDDEN,
            Json(json!(AccessDeniedError::new(reason))),
        )
            .into_response()
    } else {
        (
            StatusCode::TOO_MANY_REQUESTS,
            Json(json!(RateLimitError::new(
                decision.retry_after.unwrap_or(60),
                reason
            ))),
        )
            .into_response()
    };
    stamp_headers(&mut response, decision);
    if let Some(retry_after) = decision.retry_after {
        if let Ok(value) = HeaderValue::from_str(&retry_after.to_string()) {
            response.headers_mut().insert("Retry-After", value);
        }
    }
    response
}

fn stamp_headers(response: &mut Response, decision: &RateLimitResult) {
    let headers = response.headers_mut();
    let mut set = |name: &'static str, value: String| {
        if let Ok(value) = HeaderValue::from_str(&value) {
            headers.insert(name, value);
        }
    };
    set("X-RateLimit-Limit", decision.limit.to_string());
    set("X-RateLimit-Remaining", decision.remaining.to_string());
    set("X-RateLimit-Reset", decision.reset_at.to_string());
    if decision.verification_required {
        set("X-Verification-Required", "true".to_string());
    }
    if decision.degraded {
        set("X-RateLimit-Degraded", "true".to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::actions::ActionCategory;
    use crate::engine::TrustLevel;

    fn denied(kind: DenyKind) -> RateLimitResult {
        RateLimitResult {
            allowed: false,
            limit: 10,
            remaining: 0,
            reset_at: 1_700_000_060,
            retry_after: Some(60),
            reason: Some("denied".to_string()),
            trust_level: TrustLevel::New,
            action_cost: 1,
            verification_required: false,
            degraded: false,
            deny_kind: Some(kind),
        }
    }

    #[test]
    fn test_quota_denials_answer_429() {
        for kind in [DenyKind::RateLimited, DenyKind::Blocked] {
            let response = denial_response(&denied(kind));
            assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS, "{:?}", kind);
            assert!(response.headers().contains_key("Retry-After"));
        }
    }

    #[test]
    fn test_hard_denials_answer_403() {
        for kind in [
            DenyKind::PatternBlock,
            DenyKind::Restricted,
            DenyKind::Banned,
            DenyKind::AdminOnly,
        ] {
            let response = denial_response(&denied(kind));
            assert_eq!(response.status(), StatusCode::FORBIDDEN, "{:?}", kind);
        }
    }

    #[test]
    fn test_authenticated_writes_need_credentials() {
        let create = metadata_of(ActionCategory::PostCreate);
        let read = metadata_of(ActionCategory::PostRead);
        assert!(missing_auth(&create, IdentityKind::Ip));
        assert!(!missing_auth(&create, IdentityKind::Bearer));
        assert!(!missing_auth(&create, IdentityKind::Session));
        assert!(!missing_auth(&read, IdentityKind::Ip));
    }
}
