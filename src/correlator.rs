//! Request/reply correlation over the peer channel.
//!
//! Every outbound command carries a fresh UUID `requestId`. The peer may
//! answer in any order; [`RequestCorrelator::on_frame`] matches each reply to
//! its pending request by id. Frames that answer nothing are forwarded to
//! the [`BroadcastRouter`].
//!
//! Each pending request moves through exactly one transition:
//!
//! ```text
//! Pending(deadline) ──► Completed   (commandResponse)
//!                   ├─► Rejected    (commandError)
//!                   ├─► TimedOut    (deadline elapsed)
//!                   └─► Closed      (peer channel ended)
//! ```
//!
//! The entry is removed from the table under its lock by whichever event
//! comes first, so later events for the same id find nothing to complete.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::oneshot;
use tracing::{debug, info_span, warn, Instrument};
use uuid::Uuid;

use crate::http::broadcast::BroadcastRouter;
use crate::peer::writer::PeerSender;
use crate::{AppError, Result};

/// Outbound `commandWithResponse` envelope.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CommandEnvelope {
    /// Always `commandWithResponse`.
    #[serde(rename = "type")]
    pub kind: String,
    /// Correlation id echoed by the peer's reply.
    pub request_id: String,
    /// Command string, passed through uninterpreted.
    pub payload: String,
}

impl CommandEnvelope {
    /// Wire value of the envelope `type` field.
    pub const TYPE: &'static str = "commandWithResponse";

    /// Build an envelope for `payload` under `request_id`.
    #[must_use]
    pub fn new(request_id: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            kind: Self::TYPE.to_owned(),
            request_id: request_id.into(),
            payload: payload.into(),
        }
    }
}

/// Inbound reply `type` for a successful command.
pub const RESPONSE_TYPE: &str = "commandResponse";

/// Inbound reply `type` for a failed command.
pub const ERROR_TYPE: &str = "commandError";

/// Terminal state of a pending request.
#[derive(Debug)]
enum Resolution {
    Completed(Value),
    Rejected(String),
    TimedOut,
    Closed(String),
}

/// One in-flight request.
#[derive(Debug)]
struct PendingRequest {
    tx: oneshot::Sender<Resolution>,
    created_at: Instant,
    deadline: Instant,
}

#[derive(Debug, Default)]
struct PendingTable {
    entries: HashMap<String, PendingRequest>,
    /// Set once the peer channel is gone; new requests fail immediately.
    closed: Option<String>,
}

/// Matches asynchronous peer replies to outstanding requests.
#[derive(Debug)]
pub struct RequestCorrelator {
    peer: PeerSender,
    broadcaster: Arc<BroadcastRouter>,
    table: Mutex<PendingTable>,
    default_timeout: Duration,
}

/// Removes a request's entry if the waiting future is dropped early.
struct EntryGuard<'a> {
    correlator: &'a RequestCorrelator,
    request_id: &'a str,
    armed: bool,
}

impl Drop for EntryGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.correlator.take(self.request_id);
        }
    }
}

impl RequestCorrelator {
    /// Create a correlator writing through `peer` and forwarding unsolicited
    /// frames to `broadcaster`.
    #[must_use]
    pub fn new(
        peer: PeerSender,
        broadcaster: Arc<BroadcastRouter>,
        default_timeout: Duration,
    ) -> Self {
        Self {
            peer,
            broadcaster,
            table: Mutex::new(PendingTable::default()),
            default_timeout,
        }
    }

    /// Deadline applied by [`dispatch`](Self::dispatch).
    #[must_use]
    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    /// Send `command` to the peer and wait for its reply.
    ///
    /// # Errors
    ///
    /// - [`AppError::Peer`] with the peer's error text on `commandError`.
    /// - [`AppError::Timeout`] naming the request id and `timeout` when no
    ///   reply arrives in time. The deadline also covers queueing the
    ///   command behind a backlogged peer writer.
    /// - [`AppError::ChannelClosed`] when the peer channel is or becomes
    ///   unavailable.
    /// - [`AppError::Framing`] when the command cannot be framed.
    pub async fn send_and_wait(&self, command: &str, timeout: Duration) -> Result<Value> {
        let request_id = Uuid::new_v4().to_string();
        let span = info_span!("request", request_id = %request_id);
        self.round_trip(&request_id, command, timeout)
            .instrument(span)
            .await
    }

    async fn round_trip(&self, request_id: &str, command: &str, timeout: Duration) -> Result<Value> {
        let mut rx = self.register(request_id, timeout)?;
        let mut guard = EntryGuard {
            correlator: self,
            request_id,
            armed: true,
        };

        // One deadline covers both queueing the frame and waiting for the reply.
        let deadline = tokio::time::Instant::now() + timeout;
        let envelope = CommandEnvelope::new(request_id, command);
        match tokio::time::timeout_at(deadline, self.peer.send(&envelope)).await {
            Ok(sent) => sent?,
            Err(_elapsed) => {
                warn!("peer writer backlogged, command was never sent");
                return resolution_into_result(Resolution::TimedOut, request_id, timeout);
            }
        }
        debug!("command sent to peer");

        let waited = tokio::time::timeout_at(deadline, &mut rx).await;
        let resolution = match waited {
            Ok(Ok(resolution)) => resolution,
            Ok(Err(_)) => Resolution::Closed("request dropped".into()),
            Err(_elapsed) => {
                if self.take(request_id).is_some() {
                    Resolution::TimedOut
                } else {
                    // A reply won the race with the deadline.
                    rx.await
                        .unwrap_or_else(|_| Resolution::Closed("request dropped".into()))
                }
            }
        };
        guard.armed = false;

        resolution_into_result(resolution, request_id, timeout)
    }

    /// Send `command` with the default deadline on a detached task.
    ///
    /// The request runs to completion even if the caller stops waiting; its
    /// result is then discarded.
    ///
    /// # Errors
    ///
    /// Same as [`send_and_wait`](Self::send_and_wait).
    pub async fn dispatch(self: &Arc<Self>, command: String) -> Result<Value> {
        let correlator = Arc::clone(self);
        let timeout = self.default_timeout;
        tokio::spawn(async move { correlator.send_and_wait(&command, timeout).await })
            .await
            .map_err(|err| AppError::ChannelClosed(format!("request task failed: {err}")))?
    }

    /// Send an unsolicited frame to the peer.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::ChannelClosed`] if the writer has stopped, or
    /// [`AppError::Framing`] if the value cannot be framed.
    pub async fn notify(&self, value: &Value) -> Result<()> {
        self.peer.send(value).await
    }

    /// Route one inbound frame.
    ///
    /// A `commandResponse` or `commandError` whose `requestId` matches a live
    /// request completes it. Everything else, including late replies for
    /// requests that already timed out, goes to the broadcaster untouched.
    pub fn on_frame(&self, frame: Value) {
        let is_reply = matches!(
            frame.get("type").and_then(Value::as_str),
            Some(RESPONSE_TYPE | ERROR_TYPE)
        );
        let pending = if is_reply {
            frame
                .get("requestId")
                .and_then(Value::as_str)
                .and_then(|id| self.take(id).map(|entry| (id.to_owned(), entry)))
        } else {
            None
        };

        let Some((request_id, entry)) = pending else {
            let delivered = self.broadcaster.publish(&frame);
            debug!(delivered, "unsolicited peer frame broadcast");
            return;
        };

        let resolution = match frame.get("type").and_then(Value::as_str) {
            Some(RESPONSE_TYPE) => {
                Resolution::Completed(frame.get("response").cloned().unwrap_or(Value::Null))
            }
            _ => Resolution::Rejected(error_text(frame.get("error"))),
        };

        debug!(
            request_id = %request_id,
            elapsed_ms = entry.created_at.elapsed().as_millis(),
            overdue = Instant::now() > entry.deadline,
            "peer reply matched"
        );
        if entry.tx.send(resolution).is_err() {
            debug!(request_id = %request_id, "reply arrived after the caller stopped waiting");
        }
    }

    /// Reject every pending request and refuse new ones.
    ///
    /// Returns the number of requests rejected. Later calls keep the first
    /// reason and reject nothing.
    pub fn close_all(&self, reason: &str) -> usize {
        let drained: Vec<(String, PendingRequest)> = {
            let mut table = self.lock();
            if table.closed.is_none() {
                table.closed = Some(reason.to_owned());
            }
            table.entries.drain().collect()
        };

        let count = drained.len();
        for (_, entry) in drained {
            let _ = entry.tx.send(Resolution::Closed(reason.to_owned()));
        }
        if count > 0 {
            warn!(count, reason, "rejected pending requests on channel close");
        }
        count
    }

    /// Whether the peer channel has been closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.lock().closed.is_some()
    }

    /// Number of requests awaiting a reply.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.lock().entries.len()
    }

    fn register(&self, request_id: &str, timeout: Duration) -> Result<oneshot::Receiver<Resolution>> {
        let mut table = self.lock();
        if let Some(ref reason) = table.closed {
            return Err(AppError::ChannelClosed(reason.clone()));
        }

        let (tx, rx) = oneshot::channel();
        let now = Instant::now();
        table.entries.insert(
            request_id.to_owned(),
            PendingRequest {
                tx,
                created_at: now,
                deadline: now + timeout,
            },
        );
        Ok(rx)
    }

    fn take(&self, request_id: &str) -> Option<PendingRequest> {
        self.lock().entries.remove(request_id)
    }

    fn lock(&self) -> MutexGuard<'_, PendingTable> {
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn resolution_into_result(resolution: Resolution, request_id: &str, timeout: Duration) -> Result<Value> {
    match resolution {
        Resolution::Completed(value) => Ok(value),
        Resolution::Rejected(text) => Err(AppError::Peer(text)),
        Resolution::TimedOut => {
            warn!(request_id, ?timeout, "request timed out");
            Err(AppError::Timeout(format!(
                "request {request_id} timed out after {timeout:?}"
            )))
        }
        Resolution::Closed(reason) => Err(AppError::ChannelClosed(reason)),
    }
}

/// Render a `commandError` payload as text.
fn error_text(error: Option<&Value>) -> String {
    match error {
        Some(Value::String(text)) => text.clone(),
        Some(Value::Null) | None => "peer reported an error".to_owned(),
        Some(other) => other.to_string(),
    }
}
