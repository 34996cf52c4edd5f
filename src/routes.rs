use axum::{
    middleware,
    routing::{get, post},
    Router,
};

use crate::{handlers, security::middleware::admission_middleware, state::AppState};

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/v1/decide", post(handlers::decide))
        .route("/v1/outcome", post(handlers::outcome))
        .route("/v1/status/:action", get(handlers::my_status))
        // Admin surface: classified as admin actions, so the admission
        // middleware refuses non-admin callers before these run.
        .route("/api/admin/status/:identity/:action", get(handlers::admin_status))
        .route("/api/admin/reset", post(handlers::admin_reset))
        .route("/api/admin/trust/:identity", get(handlers::admin_trust))
        .route("/api/admin/abuse/:identity", get(handlers::admin_abuse))
        .route("/api/admin/restrictions/clear", post(handlers::admin_clear_restriction))
        .route("/api/admin/metrics", get(handlers::admin_metrics))
        .route("/api/admin/report", get(handlers::admin_report))
        .route("/api/admin/learning/:action", get(handlers::admin_learning))
        .route("/metrics", get(handlers::metrics_prometheus))
        .route("/health", get(handlers::health_check))
        .layer(middleware::from_fn_with_state(state.clone(), admission_middleware))
        .with_state(state)
}
