use axum::{
    extract::{Path, State},
    http::StatusCode,
    Extension, Json,
};
use serde_json::json;

use crate::engine::abuse::RestrictionType;
use crate::engine::actions::ActionCategory;
use crate::engine::limiter::RateLimitStatus;
use crate::engine::patterns::RequestContext;
use crate::engine::RateLimitResult;
use crate::models::{
    ClearRestrictionRequest, DecideRequest, OkResponse, OutcomeRequest, ResetRequest,
};
use crate::security::CallerIdentity;
use crate::state::AppState;

type ApiError = (StatusCode, Json<serde_json::Value>);

fn bad_request(message: &str) -> ApiError {
    (StatusCode::BAD_REQUEST, Json(json!({ "error": message })))
}

fn internal_error(e: anyhow::Error) -> ApiError {
    eprintln!("Handler error: {}", e);
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "error": "internal error" })),
    )
}

fn parse_action(name: &str) -> Result<ActionCategory, ApiError> {
    ActionCategory::parse(name).ok_or_else(|| bad_request("unknown action category"))
}

/// Explicit admission check for callers not fronted by the middleware.
pub async fn decide(
    State(state): State<AppState>,
    Extension(caller): Extension<CallerIdentity>,
    Json(request): Json<DecideRequest>,
) -> Result<Json<RateLimitResult>, ApiError> {
    let action = parse_action(&request.action)?;
    let identity = request.identity.unwrap_or_else(|| caller.id.clone());
    let ctx = RequestContext {
        ip_address: request.ip_address.or(Some(caller.ip_address.clone())),
        user_agent: request.user_agent.or_else(|| caller.user_agent.clone()),
        content: request.content,
    };
    Ok(Json(state.limiter.check(&identity, action, &ctx).await))
}

/// Post-execution outcome report. Failures feed the failure-rate
/// heuristics; content feeds spam similarity.
pub async fn outcome(
    State(state): State<AppState>,
    Extension(caller): Extension<CallerIdentity>,
    Json(request): Json<OutcomeRequest>,
) -> Result<Json<OkResponse>, ApiError> {
    let action = parse_action(&request.action)?;
    let identity = request.identity.unwrap_or_else(|| caller.id.clone());
    let ctx = RequestContext {
        ip_address: Some(caller.ip_address.clone()),
        user_agent: caller.user_agent.clone(),
        content: request.content,
    };
    state
        .patterns
        .log_behavior(&identity, action, request.success, &ctx)
        .await
        .map_err(internal_error)?;
    Ok(Json(OkResponse::new("outcome recorded")))
}

/// Caller's own usage for one action. Read-only, costs nothing.
pub async fn my_status(
    State(state): State<AppState>,
    Extension(caller): Extension<CallerIdentity>,
    Path(action): Path<String>,
) -> Result<Json<RateLimitStatus>, ApiError> {
    let action = parse_action(&action)?;
    let status = state
        .limiter
        .status(&caller.id, action)
        .await
        .map_err(internal_error)?;
    Ok(Json(status))
}

pub async fn admin_status(
    State(state): State<AppState>,
    Path((identity, action)): Path<(String, String)>,
) -> Result<Json<RateLimitStatus>, ApiError> {
    let action = parse_action(&action)?;
    let status = state
        .limiter
        .status(&identity, action)
        .await
        .map_err(internal_error)?;
    Ok(Json(status))
}

pub async fn admin_reset(
    State(state): State<AppState>,
    Json(request): Json<ResetRequest>,
) -> Result<Json<OkResponse>, ApiError> {
    let action = match &request.action {
        Some(name) => Some(parse_action(name)?),
        None => None,
    };
    state
        .limiter
        .reset(&request.identity, action)
        .await
        .map_err(internal_error)?;
    Ok(Json(OkResponse::new("rate limits reset")))
}

pub async fn admin_trust(
    State(state): State<AppState>,
    Path(identity): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let score = state.trust.score(&identity).await.map_err(internal_error)?;
    Ok(Json(json!(score)))
}

/// Combined abuse view: profile, metrics and active restrictions.
pub async fn admin_abuse(
    State(state): State<AppState>,
    Path(identity): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let profile = state.abuse.profile(&identity).await.map_err(internal_error)?;
    let metrics = state
        .abuse
        .abuse_metrics(&identity)
        .await
        .map_err(internal_error)?;
    let restrictions = state
        .abuse
        .active_restrictions(&identity)
        .await
        .map_err(internal_error)?;
    Ok(Json(json!({
        "profile": profile,
        "metrics": metrics,
        "restrictions": restrictions,
    })))
}

pub async fn admin_clear_restriction(
    State(state): State<AppState>,
    Json(request): Json<ClearRestrictionRequest>,
) -> Result<Json<OkResponse>, ApiError> {
    let restriction = match &request.restriction {
        Some(name) => Some(
            RestrictionType::parse(name).ok_or_else(|| bad_request("unknown restriction type"))?,
        ),
        None => None,
    };
    state
        .abuse
        .clear_restriction(&request.identity, restriction)
        .await
        .map_err(internal_error)?;
    Ok(Json(OkResponse::new("restriction cleared")))
}

pub async fn admin_metrics(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let snapshot = state.metrics.get_metrics().await.map_err(internal_error)?;
    Ok(Json(json!(snapshot)))
}

pub async fn admin_report(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let report = state
        .metrics
        .generate_report()
        .await
        .map_err(internal_error)?;
    Ok(Json(json!(report)))
}

/// Confusion-matrix counters and any pending threshold suggestion for
/// one action.
pub async fn admin_learning(
    State(state): State<AppState>,
    Path(action): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let action = parse_action(&action)?;
    let counts = state
        .adaptive
        .learning_counts(action)
        .await
        .map_err(internal_error)?;
    let pending = state
        .adaptive
        .pending_adjustment(action)
        .await
        .map_err(internal_error)?;
    Ok(Json(json!({
        "action": action.as_str(),
        "counts": counts,
        "precision": counts.precision(),
        "recall": counts.recall(),
        "f1": counts.f1(),
        "pending_adjustment": pending,
    })))
}

/// Prometheus exposition text.
pub async fn metrics_prometheus(State(state): State<AppState>) -> String {
    state.prometheus.render()
}

pub async fn health_check(State(state): State<AppState>) -> Json<serde_json::Value> {
    let health = state.metrics.system_health().await;
    Json(json!(health))
}
