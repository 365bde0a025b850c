//! Coordinated, bounded teardown of every adapter.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, info_span, warn, Instrument};

use crate::http::broadcast::BroadcastRouter;
use crate::ipc::socket::remove_socket_file;
use crate::status::Component;

/// A running listener task, optionally backed by a socket file.
#[derive(Debug)]
pub struct Listener {
    component: Component,
    task: JoinHandle<()>,
    socket_path: Option<PathBuf>,
}

impl Listener {
    /// Wrap the task serving `component`.
    #[must_use]
    pub fn new(component: Component, task: JoinHandle<()>) -> Self {
        Self {
            component,
            task,
            socket_path: None,
        }
    }

    /// Attach the socket file to delete at shutdown.
    #[must_use]
    pub fn with_socket_path(mut self, path: PathBuf) -> Self {
        self.socket_path = Some(path);
        self
    }

    /// Component served by this listener.
    #[must_use]
    pub fn component(&self) -> Component {
        self.component
    }

    /// Socket file backing this listener, if any.
    #[must_use]
    pub fn socket_path(&self) -> Option<&PathBuf> {
        self.socket_path.as_ref()
    }
}

/// How the shutdown ended.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ShutdownOutcome {
    /// Every listener closed within the grace period.
    Graceful,
    /// The grace period elapsed first.
    Forced,
}

impl ShutdownOutcome {
    /// Process exit code for this outcome.
    #[must_use]
    pub fn exit_code(self) -> i32 {
        match self {
            Self::Graceful => 0,
            Self::Forced => 1,
        }
    }
}

/// Stops every adapter and waits, up to a grace period, for listeners to
/// close.
#[derive(Debug)]
pub struct ShutdownCoordinator {
    cancel: CancellationToken,
    broadcaster: Arc<BroadcastRouter>,
    listeners: Vec<Listener>,
    grace: Duration,
}

impl ShutdownCoordinator {
    /// Create a coordinator driving `cancel`.
    #[must_use]
    pub fn new(cancel: CancellationToken, broadcaster: Arc<BroadcastRouter>, grace: Duration) -> Self {
        Self {
            cancel,
            broadcaster,
            listeners: Vec::new(),
            grace,
        }
    }

    /// Track a listener to wait for at shutdown.
    pub fn register(&mut self, listener: Listener) {
        self.listeners.push(listener);
    }

    /// Number of tracked listeners.
    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    /// Run the teardown sequence.
    ///
    /// 1. Cancel the shared token so every accept loop stops.
    /// 2. Close all SSE subscribers.
    /// 3. Wait for the listener tasks, bounded by the grace period.
    /// 4. Delete socket files, whichever way step 3 ended.
    pub async fn shutdown(self) -> ShutdownOutcome {
        let span = info_span!("shutdown", listeners = self.listeners.len());
        async move {
            self.cancel.cancel();

            let closed = self.broadcaster.close_all();
            info!(closed, "SSE subscribers closed");

            let mut socket_paths = Vec::new();
            let mut waits = Vec::with_capacity(self.listeners.len());
            for listener in self.listeners {
                socket_paths.extend(listener.socket_path);
                let component = listener.component;
                let task = listener.task;
                waits.push(async move {
                    if let Err(err) = task.await {
                        warn!(component = component.as_str(), %err, "listener task failed");
                    }
                    info!(component = component.as_str(), "listener closed");
                });
            }

            let outcome = match tokio::time::timeout(self.grace, join_all(waits)).await {
                Ok(_) => ShutdownOutcome::Graceful,
                Err(_) => {
                    warn!(grace = ?self.grace, "listeners did not close in time, forcing exit");
                    ShutdownOutcome::Forced
                }
            };

            for path in &socket_paths {
                remove_socket_file(path);
            }

            info!(?outcome, "shutdown complete");
            outcome
        }
        .instrument(span)
        .await
    }
}
