//! Shared gateway state handed to every adapter.

use std::sync::Arc;

use crate::config::GlobalConfig;
use crate::correlator::RequestCorrelator;
use crate::http::broadcast::BroadcastRouter;
use crate::peer::writer::PeerSender;
use crate::status::StatusRegistry;

/// Process-wide state, constructed once at startup.
///
/// Tests build independent instances around in-memory streams.
#[derive(Debug)]
pub struct GatewayState {
    /// Effective configuration.
    pub config: Arc<GlobalConfig>,
    /// Pending-request table and reply routing.
    pub correlator: Arc<RequestCorrelator>,
    /// Live SSE subscribers.
    pub broadcaster: Arc<BroadcastRouter>,
    /// Per-component readiness.
    pub status: Arc<StatusRegistry>,
}

impl GatewayState {
    /// Wire the shared components around an outbound peer handle.
    #[must_use]
    pub fn new(config: GlobalConfig, peer: PeerSender) -> Self {
        let broadcaster = Arc::new(BroadcastRouter::new());
        let correlator = Arc::new(RequestCorrelator::new(
            peer,
            Arc::clone(&broadcaster),
            config.request_timeout(),
        ));

        Self {
            config: Arc::new(config),
            correlator,
            broadcaster,
            status: Arc::new(StatusRegistry::new()),
        }
    }
}
