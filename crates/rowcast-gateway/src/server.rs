//! Gateway server — shared state, router and listener.

use axum::Router;
use axum::routing::{get, post};
use chrono_tz::Tz;
use rowcast_core::config::{GatewayConfig, RowcastConfig};
use rowcast_core::traits::MessageTransport;
use rowcast_scheduler::DispatchEngine;
use std::sync::Arc;
use std::time::Instant;
use tower_http::trace::TraceLayer;

use crate::routes;

/// State shared by every handler.
pub struct AppState {
    pub engine: Arc<DispatchEngine>,
    pub transport: Arc<dyn MessageTransport>,
    pub config: GatewayConfig,
    pub tz: Tz,
    pub due_window_minutes: i64,
    pub start_time: Instant,
}

impl AppState {
    pub fn new(engine: Arc<DispatchEngine>, config: &RowcastConfig) -> rowcast_core::Result<Self> {
        Ok(Self {
            transport: Arc::clone(engine.dispatcher().transport()),
            engine,
            config: config.gateway.clone(),
            tz: config.dispatch.tz()?,
            due_window_minutes: config.dispatch.due_window_minutes,
            start_time: Instant::now(),
        })
    }
}

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(routes::banner))
        .route("/health", get(routes::health_check))
        .route("/send-now", post(routes::send_now))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Bind and serve until Ctrl-C.
pub async fn start_server(state: Arc<AppState>) -> anyhow::Result<()> {
    let addr = format!("{}:{}", state.config.host, state.config.port);
    if state.config.api_token.is_none() {
        tracing::warn!("API_TOKEN is not set; /send-now will refuse every request");
    }

    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("🚀 Rowcast gateway listening on http://{addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Shutting down gateway");
        })
        .await?;
    Ok(())
}
