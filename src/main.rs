//! Salon Monitor - Classroom Attendance Camserver
//!
//! Main entry point for the salon monitor application.

use salon_monitor::state::{AppConfig, AppState};
use salon_monitor::web_api;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "salon_monitor=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Salon Monitor v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let config = AppConfig::default();
    tracing::info!(
        backend_url = %config.backend_url,
        face_api_url = %config.face_api_url,
        match_tolerance = config.match_tolerance,
        sync_interval_secs = config.sync_interval_secs,
        "Configuration loaded"
    );

    // Wire up components
    let state = AppState::new(config.clone());

    // Reachability checks are informational: the reconciler retries on its
    // own schedule, so an unreachable backend at boot is not fatal
    if !state.backend.health_check().await.unwrap_or(false) {
        tracing::warn!(url = %config.backend_url, "Attendance backend unreachable at startup");
    }
    if !state.face.health_check().await.unwrap_or(false) {
        tracing::warn!(url = %config.face_api_url, "Face detection service unreachable at startup");
    }

    // Start periodic reconciliation (first pass runs immediately)
    let _sync_handle = state.sync.clone().start_periodic_sync();

    // CORS for the admin frontend
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = web_api::create_router(state.clone())
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    let addr = format!("{}:{}", config.host, config.port);
    tracing::info!(addr = %addr, "Web API listening");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
