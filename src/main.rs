mod directory;
mod engine;
mod handlers;
mod models;
mod redis_client;
mod routes;
mod security;
mod state;

use dotenvy::dotenv;
use engine::limiter::FailMode;
use metrics_exporter_prometheus::PrometheusBuilder;
use std::env;
use tower_http::cors::CorsLayer;

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    dotenv().ok();

    let redis_url =
        env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string());

    let server_secret = env::var("SERVER_SECRET").unwrap_or_else(|_| {
        eprintln!("WARNING: SERVER_SECRET not set in .env, using default (NOT SECURE for production)");
        "change-this-secret-in-production".to_string()
    });

    let fail_mode = FailMode::from_env();
    let memory_budget_bytes = env::var("MEMORY_BUDGET_MB")
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(512)
        * 1024
        * 1024;

    let prometheus = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| anyhow::anyhow!("Failed to install metrics recorder: {}", e))?;

    println!("🔐 Initializing admission engine (fail mode: {:?})...", fail_mode);
    let state = state::AppState::new(
        &redis_url,
        server_secret,
        fail_mode,
        memory_budget_bytes,
        prometheus,
    )
    .await?;
    println!("✅ Admission engine initialized");

    tokio::spawn(state.metrics.clone().run_flush_task());

    let app = routes::create_router(state).layer(CorsLayer::permissive());

    let bind_addr = env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:3001".to_string());
    println!("🚀 Server running on http://{}", bind_addr);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .await?;

    Ok(())
}
