//! HTTP server for command submission and status.
//!
//! | Route             | Purpose                                           |
//! |-------------------|---------------------------------------------------|
//! | `POST /command`   | Send `{"message": string}` to the peer and wait   |
//! | `GET /status`     | Liveness: `{"status":"running","timestamp":ms}`   |
//! | `GET /components` | Current component status snapshot                 |
//! | `GET /events`     | SSE stream of unsolicited peer frames             |

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, info_span, warn, Instrument};

use super::sse;
use crate::errors::bind_error_code;
use crate::shutdown::Listener;
use crate::state::GatewayState;
use crate::status::Component;
use crate::AppError;

/// `POST /command` request body.
#[derive(Debug, Deserialize)]
pub struct CommandRequest {
    /// Command string forwarded to the peer.
    pub message: String,
}

/// `POST /command` response body.
#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct CommandReply {
    /// Whether the peer answered successfully.
    pub success: bool,
    /// Peer response on success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<Value>,
    /// Failure description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CommandReply {
    fn success(response: Value) -> Self {
        Self {
            success: true,
            response: Some(response),
            error: None,
        }
    }

    fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            response: None,
            error: Some(message.into()),
        }
    }
}

/// Build the adapter's router over shared state.
pub fn router(state: Arc<GatewayState>) -> Router {
    Router::new()
        .route("/command", post(command))
        .route("/status", get(status))
        .route("/components", get(components))
        .route("/events", get(sse::events))
        .with_state(state)
}

/// Bind `127.0.0.1:<http_port>` and serve until `ct` fires.
///
/// Returns the bound port and the listener task. A bind failure marks
/// `http` as `Error:<code>` and returns `None`; the other adapters are not
/// affected.
pub async fn start_http(
    state: Arc<GatewayState>,
    ct: CancellationToken,
) -> Option<(u16, Listener)> {
    let bind = SocketAddr::from(([127, 0, 0, 1], state.config.http_port));

    let listener = match tokio::net::TcpListener::bind(bind).await {
        Ok(listener) => listener,
        Err(err) => {
            state
                .status
                .mark_error(Component::Http, bind_error_code(&err));
            let err = AppError::Bind(format!("{bind}: {err}"));
            error!(%err, "failed to bind HTTP adapter");
            return None;
        }
    };

    let port = listener
        .local_addr()
        .map_or(state.config.http_port, |addr| addr.port());
    state.status.mark_ok(Component::Http);
    info!(port, "HTTP adapter listening");

    let app = router(state);
    let task = tokio::spawn(
        async move {
            let served = axum::serve(listener, app)
                .with_graceful_shutdown(async move { ct.cancelled().await })
                .await;
            if let Err(err) = served {
                let err = AppError::Http(err.to_string());
                error!(%err, "HTTP server error");
            }
            info!("HTTP adapter shut down");
        }
        .instrument(info_span!("http_server", port)),
    );

    Some((port, Listener::new(Component::Http, task)))
}

async fn command(
    State(state): State<Arc<GatewayState>>,
    body: std::result::Result<Json<CommandRequest>, JsonRejection>,
) -> (StatusCode, Json<CommandReply>) {
    let Json(request) = match body {
        Ok(body) => body,
        Err(rejection) => {
            warn!(%rejection, "rejected malformed command body");
            return (
                StatusCode::BAD_REQUEST,
                Json(CommandReply::error(format!(
                    "expected {{\"message\": string}}: {rejection}"
                ))),
            );
        }
    };

    match state.correlator.dispatch(request.message).await {
        Ok(response) => (StatusCode::OK, Json(CommandReply::success(response))),
        Err(err) => {
            warn!(%err, "command failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(CommandReply::error(err.to_string())),
            )
        }
    }
}

async fn status() -> Json<Value> {
    Json(serde_json::json!({
        "status": "running",
        "timestamp": chrono::Utc::now().timestamp_millis(),
    }))
}

async fn components(State(state): State<Arc<GatewayState>>) -> Json<Value> {
    Json(serde_json::json!({ "components": state.status.snapshot() }))
}
