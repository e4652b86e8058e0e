//! API route handlers for the gateway.

use axum::Json;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use rowcast_core::error::RowcastError;
use rowcast_core::types::DispatchMode;
use std::sync::Arc;

use super::server::AppState;

/// Error body `{ "error": ... }` with a status code.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

impl From<RowcastError> for ApiError {
    fn from(err: RowcastError) -> Self {
        let status = match err {
            RowcastError::TransportNotReady(_) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self::new(status, err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(serde_json::json!({ "error": self.message }))).into_response()
    }
}

/// Plain-text banner.
pub async fn banner() -> &'static str {
    "Rowcast dispatch API is running. POST /send-now to trigger message sending."
}

/// Health check endpoint.
pub async fn health_check(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "service": "rowcast-gateway",
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_secs": state.start_time.elapsed().as_secs(),
        "transport": state.transport.name(),
        "sheet": state.engine.sheet(),
        "running": state.engine.is_running(),
    }))
}

fn authorize(state: &AppState, headers: &HeaderMap) -> Result<(), ApiError> {
    let Some(expected) = state.config.api_token.as_deref() else {
        return Err(ApiError::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "API_TOKEN not set",
        ));
    };
    let token = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(|rest| rest.split(' ').next().unwrap_or_default())
        .ok_or_else(|| {
            ApiError::new(StatusCode::UNAUTHORIZED, "Missing or invalid Authorization header")
        })?;
    if token.as_bytes() != expected.as_bytes() {
        return Err(ApiError::new(StatusCode::FORBIDDEN, "Invalid API token"));
    }
    Ok(())
}

/// `POST /send-now` — run one dispatch pass.
pub async fn send_now(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<serde_json::Value>, ApiError> {
    authorize(&state, &headers)?;

    let request: serde_json::Value = if body.iter().all(u8::is_ascii_whitespace) {
        serde_json::Value::Null
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| ApiError::new(StatusCode::BAD_REQUEST, format!("Invalid JSON body: {e}")))?
    };
    let mode = DispatchMode::from_request(request["mode"].as_str());

    if !state.transport.is_ready().await {
        return Err(RowcastError::TransportNotReady(format!(
            "{} session not ready",
            state.transport.name()
        ))
        .into());
    }

    let run = state
        .engine
        .run(mode, state.tz, state.due_window_minutes)
        .await
        .map_err(|e| {
            tracing::error!("Error in /send-now: {e}");
            ApiError::from(e)
        })?;

    Ok(Json(serde_json::json!({
        "success": true,
        "mode": mode,
        "result": run,
    })))
}
