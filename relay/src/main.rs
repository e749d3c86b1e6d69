use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use axum::routing::{any, get};
use axum::Router;
use tower_http::trace::TraceLayer;
use tracing::info;

mod config;
mod headers;
mod http_adapter;
mod landing;
mod registry;
mod session;
mod subdomain;
mod tunnel;

use config::Config;
use registry::Registry;

#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<Registry>,
    pub config: Arc<Config>,
    pub started_at: Instant,
}

impl AppState {
    pub fn uptime_seconds(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env();

    if config.production {
        tracing_subscriber::fmt().json().with_env_filter(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "tunnel_relay=info".to_string()),
        ).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "tunnel_relay=debug".to_string()),
        ).init();
    }

    let state = AppState {
        registry: Arc::new(Registry::new()),
        config: Arc::new(config.clone()),
        started_at: Instant::now(),
    };

    let app = Router::new()
        .route("/tunnel", get(session::ws_handler))
        .route("/health", get(health_handler))
        .route("/stats", get(stats_handler))
        .route("/t", any(http_adapter::path_handler_missing_subdomain))
        .route("/t/", any(http_adapter::path_handler_missing_subdomain))
        .route("/t/:subdomain", any(http_adapter::path_handler_root))
        .route("/t/:subdomain/*rest", any(http_adapter::path_handler))
        .fallback(any(http_adapter::host_fallback_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    info!(%addr, domain = %config.domain, "tunnel relay starting");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

async fn health_handler(
    axum::extract::State(state): axum::extract::State<AppState>,
) -> axum::Json<serde_json::Value> {
    axum::Json(serde_json::json!({
        "status": "ok",
        "uptime": state.uptime_seconds(),
        "domain": state.config.domain,
        "env": state.config.node_env,
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
}

async fn stats_handler(
    axum::extract::State(state): axum::extract::State<AppState>,
) -> axum::Json<serde_json::Value> {
    let stats = state.registry.stats();
    axum::Json(serde_json::json!({
        "activeTunnels": stats.active_tunnels,
        "tunnels": stats.tunnels,
        "domain": state.config.domain,
        "uptime": state.uptime_seconds(),
    }))
}
