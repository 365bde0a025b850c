//! Local IPC server for command submission.
//!
//! Listens on the well-known socket path for the configured `ipc_name`.
//! There is no framing on this transport: each connection accumulates bytes
//! until the whole buffer parses as one JSON value.
//!
//! ## Protocol
//!
//! Request (one JSON object, any chunking, trailing newline optional):
//! ```json
//! {"message": "tabs list"}
//! ```
//!
//! Response (one JSON object per line):
//! ```json
//! {"message": "<peer response>"}
//! {"message": "[ERROR] timeout: request … timed out after 15s"}
//! ```

use std::sync::Arc;

use bytes::BytesMut;
use interprocess::local_socket::tokio::{prelude::*, Stream};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, info_span, warn, Instrument};

use super::socket::{bind, socket_path, spawn_accept_loop};
use crate::errors::bind_error_code;
use crate::reply::{reply_text, ERROR_PREFIX};
use crate::shutdown::Listener;
use crate::state::GatewayState;
use crate::status::Component;
use crate::AppError;

/// Outbound IPC reply.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct IpcReply {
    /// Peer response text, or `[ERROR] <reason>`.
    pub message: String,
}

impl IpcReply {
    fn error(reason: impl std::fmt::Display) -> Self {
        Self {
            message: format!("{ERROR_PREFIX} {reason}"),
        }
    }
}

/// Result of parsing a connection buffer.
#[derive(Debug, PartialEq, Eq)]
enum ParsedRequest {
    /// Not yet a complete JSON value.
    Incomplete,
    /// Complete JSON without a string `message` field.
    Invalid,
    /// A command to forward to the peer.
    Command(String),
}

fn parse_request(buf: &[u8]) -> ParsedRequest {
    let Ok(value) = serde_json::from_slice::<Value>(buf) else {
        return ParsedRequest::Incomplete;
    };

    match value.get("message") {
        Some(Value::String(message)) => ParsedRequest::Command(message.clone()),
        _ => ParsedRequest::Invalid,
    }
}

/// Bind the IPC socket and start accepting connections.
///
/// A bind failure marks `ipc` as `Error:<code>` and returns `None`.
pub fn start_ipc(state: Arc<GatewayState>, ct: CancellationToken) -> Option<Listener> {
    let path = socket_path(&state.config.ipc_name);

    let listener = match bind(&path) {
        Ok(listener) => listener,
        Err(err) => {
            state.status.mark_error(Component::Ipc, bind_error_code(&err));
            let err = AppError::Bind(format!("{}: {err}", path.display()));
            error!(%err, "failed to bind IPC adapter");
            return None;
        }
    };

    state.status.mark_ok(Component::Ipc);
    info!(path = %path.display(), "IPC adapter listening");

    let task = spawn_accept_loop(listener, "ipc", ct, move |stream| {
        handle_connection(stream, Arc::clone(&state))
    });

    Some(Listener::new(Component::Ipc, task).with_socket_path(path))
}

/// Handle a single IPC client connection.
async fn handle_connection(stream: Stream, state: Arc<GatewayState>) {
    let span = info_span!("ipc_conn");
    async move {
        let (mut reader, mut writer) = stream.split();
        let max = state.config.limits.ipc_max_buffer_bytes;
        let mut buffer = BytesMut::with_capacity(4096);

        loop {
            match reader.read_buf(&mut buffer).await {
                Ok(0) => break, // EOF
                Ok(_) => {}
                Err(err) => {
                    let err = AppError::Ipc(format!("read failed: {err}"));
                    warn!(%err, "ipc connection error");
                    break;
                }
            }

            let reply = match parse_request(&buffer) {
                ParsedRequest::Incomplete if buffer.len() > max => {
                    warn!(len = buffer.len(), max, "ipc request exceeds buffer limit");
                    let reply = IpcReply::error(format!("request exceeds {max} bytes"));
                    if let Err(err) = write_reply(&mut writer, &reply).await {
                        warn!(%err, "failed to write ipc response");
                    }
                    break;
                }
                ParsedRequest::Incomplete => continue,
                ParsedRequest::Invalid => {
                    IpcReply::error(r#"invalid request: expected {"message": string}"#)
                }
                ParsedRequest::Command(message) => IpcReply {
                    message: reply_text(&state.correlator.dispatch(message).await),
                },
            };
            buffer.clear();

            if let Err(err) = write_reply(&mut writer, &reply).await {
                warn!(%err, "failed to write ipc response");
                break;
            }
        }

        info!("IPC connection closed");
    }
    .instrument(span)
    .await;
}

async fn write_reply<W>(writer: &mut W, reply: &IpcReply) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut line = serde_json::to_string(reply)
        .unwrap_or_else(|_| r#"{"message":"[ERROR] serialization failed"}"#.to_owned());
    line.push('\n');
    writer.write_all(line.as_bytes()).await?;
    writer.flush().await
}
