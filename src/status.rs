//! Per-component readiness and the startup handshake with the peer.

use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::{Serialize, Serializer};
use tracing::{info, warn};

use crate::state::GatewayState;
use crate::Result;

/// Components whose readiness is reported to the peer.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Component {
    /// HTTP/SSE adapter.
    Http,
    /// Local socket / named pipe adapter.
    Ipc,
    /// Line RPC adapter.
    Mcp,
    /// Inbound peer channel listener.
    NativeMessaging,
}

impl Component {
    /// Every component, in reporting order.
    pub const ALL: [Self; 4] = [Self::Http, Self::Ipc, Self::Mcp, Self::NativeMessaging];

    /// Wire name used in status snapshots.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Http => "http",
            Self::Ipc => "ipc",
            Self::Mcp => "mcp",
            Self::NativeMessaging => "nativeMessaging",
        }
    }
}

/// Readiness of one component.
///
/// Serializes as `pending`, `OK`, or `Error:<reason>`.
#[derive(Debug, Clone, Eq, PartialEq, Default)]
pub enum ComponentStatus {
    /// Bind not attempted or not finished.
    #[default]
    Pending,
    /// Bound and serving.
    Ok,
    /// Bind failed; terminal.
    Error(String),
}

impl ComponentStatus {
    /// Whether the component left `pending`.
    #[must_use]
    pub fn is_settled(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

impl Display for ComponentStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => f.write_str("pending"),
            Self::Ok => f.write_str("OK"),
            Self::Error(reason) => write!(f, "Error:{reason}"),
        }
    }
}

impl Serialize for ComponentStatus {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Process-wide component status table.
///
/// Each component moves from `pending` exactly once, to `OK` or to
/// `Error:<reason>`. Later transitions are ignored.
#[derive(Debug)]
pub struct StatusRegistry {
    components: Mutex<BTreeMap<Component, ComponentStatus>>,
}

impl Default for StatusRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusRegistry {
    /// Create a registry with every component `pending`.
    #[must_use]
    pub fn new() -> Self {
        let components = Component::ALL
            .into_iter()
            .map(|c| (c, ComponentStatus::Pending))
            .collect();
        Self {
            components: Mutex::new(components),
        }
    }

    /// Mark `component` as bound. Returns `false` if it had already settled.
    pub fn mark_ok(&self, component: Component) -> bool {
        self.transition(component, ComponentStatus::Ok)
    }

    /// Mark `component` as failed. Returns `false` if it had already settled.
    pub fn mark_error(&self, component: Component, reason: impl Into<String>) -> bool {
        self.transition(component, ComponentStatus::Error(reason.into()))
    }

    /// Current status of `component`.
    #[must_use]
    pub fn get(&self, component: Component) -> ComponentStatus {
        self.lock().get(&component).cloned().unwrap_or_default()
    }

    /// Snapshot keyed by wire name.
    #[must_use]
    pub fn snapshot(&self) -> BTreeMap<&'static str, ComponentStatus> {
        self.lock()
            .iter()
            .map(|(component, status)| (component.as_str(), status.clone()))
            .collect()
    }

    fn transition(&self, component: Component, next: ComponentStatus) -> bool {
        let mut components = self.lock();
        let current = components.entry(component).or_default();
        if current.is_settled() {
            warn!(
                component = component.as_str(),
                current = %current,
                ignored = %next,
                "component status already settled"
            );
            return false;
        }
        info!(component = component.as_str(), status = %next, "component status changed");
        *current = next;
        true
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<Component, ComponentStatus>> {
        self.components
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

/// Unsolicited `ready` frame sent to the peer once startup settles.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadyFrame {
    /// Always `ready`.
    pub status: &'static str,
    /// Gateway process id.
    pub pid: u32,
    /// Gateway name.
    pub server: &'static str,
    /// Gateway version.
    pub version: &'static str,
    /// Component status snapshot.
    pub components: BTreeMap<&'static str, ComponentStatus>,
    /// Bound HTTP port, or the configured one if binding failed.
    pub http_port: u16,
    /// Human-readable summary.
    pub message: String,
}

impl ReadyFrame {
    /// Build the frame from the registry's current state.
    #[must_use]
    pub fn from_registry(registry: &StatusRegistry, http_port: u16) -> Self {
        let components = registry.snapshot();
        let failed = components
            .values()
            .filter(|s| matches!(s, ComponentStatus::Error(_)))
            .count();
        let message = if failed == 0 {
            "browser bridge ready".to_owned()
        } else {
            format!("browser bridge ready with {failed} degraded component(s)")
        };

        Self {
            status: "ready",
            pid: std::process::id(),
            server: env!("CARGO_PKG_NAME"),
            version: env!("CARGO_PKG_VERSION"),
            components,
            http_port,
            message,
        }
    }
}

/// Send the `ready` frame to the peer.
///
/// Call once the peer listener is attached and every bind attempt has
/// settled; pending components are reported as they are.
///
/// # Errors
///
/// Returns `AppError::ChannelClosed` if the peer writer has stopped.
pub async fn announce_ready(state: &GatewayState, http_port: u16) -> Result<()> {
    let frame = ReadyFrame::from_registry(&state.status, http_port);
    let value = serde_json::to_value(&frame)?;
    state.correlator.notify(&value).await?;
    info!(http_port, message = %frame.message, "ready frame sent to peer");
    Ok(())
}
