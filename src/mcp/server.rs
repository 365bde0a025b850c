//! Local socket listener for the line surface.

use std::sync::Arc;

use interprocess::local_socket::tokio::{prelude::*, Stream};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, info_span, warn, Instrument};

use super::lines::serve_lines;
use crate::errors::bind_error_code;
use crate::ipc::socket::{bind, socket_path, spawn_accept_loop};
use crate::shutdown::Listener;
use crate::state::GatewayState;
use crate::status::Component;
use crate::AppError;

/// Bind the line-surface socket (`<ipc_name>-mcp`) and start accepting
/// sessions.
///
/// A bind failure marks `mcp` as `Error:<code>` and returns `None`.
pub fn start_mcp(state: Arc<GatewayState>, ct: CancellationToken) -> Option<Listener> {
    let path = socket_path(&state.config.mcp_ipc_name());

    let listener = match bind(&path) {
        Ok(listener) => listener,
        Err(err) => {
            state.status.mark_error(Component::Mcp, bind_error_code(&err));
            let err = AppError::Bind(format!("{}: {err}", path.display()));
            error!(%err, "failed to bind line surface");
            return None;
        }
    };

    state.status.mark_ok(Component::Mcp);
    info!(path = %path.display(), "line surface listening");

    let session_ct = ct.clone();
    let task = spawn_accept_loop(listener, "mcp", ct, move |stream| {
        handle_session(stream, Arc::clone(&state), session_ct.child_token())
    });

    Some(Listener::new(Component::Mcp, task).with_socket_path(path))
}

async fn handle_session(stream: Stream, state: Arc<GatewayState>, ct: CancellationToken) {
    let (reader, writer) = stream.split();
    let max_line_bytes = state.config.limits.mcp_max_line_bytes;
    let correlator = Arc::clone(&state.correlator);

    if let Err(err) = serve_lines(correlator, reader, writer, max_line_bytes, ct)
        .instrument(info_span!("mcp_session"))
        .await
    {
        warn!(%err, "line session failed");
    }
}
