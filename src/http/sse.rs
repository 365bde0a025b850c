//! `GET /events`: Server-Sent Events stream of unsolicited peer frames.
//!
//! A new connection registers a [`Subscription`] with the
//! [`BroadcastRouter`](super::broadcast::BroadcastRouter), receives one
//! `connection` event, then one `message` event per unsolicited frame.
//! Keep-alive comments are sent on the configured interval. The
//! subscription is dropped, and thereby deregistered, when the client
//! disconnects and axum drops the response stream.

use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use futures_util::stream::{self, Stream, StreamExt};
use tracing::info;

use super::broadcast::Subscription;
use crate::state::GatewayState;

/// Comment text used for keep-alive lines.
pub const KEEP_ALIVE_TEXT: &str = "keep-alive";

/// Handler for `GET /events`.
pub async fn events(
    State(state): State<Arc<GatewayState>>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let subscription = state.broadcaster.subscribe();
    info!(
        subscribers = state.broadcaster.subscriber_count(),
        "SSE client connected"
    );

    let connected = Event::default().event("connection").data(
        serde_json::json!({
            "status": "connected",
            "timestamp": chrono::Utc::now().timestamp_millis(),
        })
        .to_string(),
    );

    let initial = stream::once(async move { Ok::<_, Infallible>(connected) });
    let updates = stream::unfold(subscription, |mut subscription: Subscription| async move {
        let Some(data) = subscription.recv().await else {
            return None;
        };
        Some((
            Ok::<_, Infallible>(Event::default().event("message").data(&*data)),
            subscription,
        ))
    });

    Sse::new(initial.chain(updates)).keep_alive(
        KeepAlive::new()
            .interval(state.config.sse_keep_alive())
            .text(KEEP_ALIVE_TEXT),
    )
}
