//! Error types shared across the gateway.

use std::fmt::{Display, Formatter};
use std::io;

/// Shared application result type.
pub type Result<T> = std::result::Result<T, AppError>;

/// Application error enumeration covering all gateway failure modes.
#[derive(Debug)]
pub enum AppError {
    /// Configuration parsing or validation failure.
    Config(String),
    /// Malformed or truncated frame on the peer channel. Fatal to the channel.
    Framing(String),
    /// Invalid JSON in a single message. The message is discarded.
    Parse(String),
    /// No reply arrived within the request deadline.
    Timeout(String),
    /// The peer answered with an explicit `commandError`.
    Peer(String),
    /// A listener could not bind its port or socket path.
    Bind(String),
    /// The peer stream ended; no further requests can be served.
    ChannelClosed(String),
    /// Local socket / named pipe failure.
    Ipc(String),
    /// HTTP server failure after a successful bind.
    Http(String),
    /// File-system or I/O operation failure.
    Io(String),
}

impl AppError {
    /// Whether the error only affects the request that produced it.
    #[must_use]
    pub fn is_per_request(&self) -> bool {
        matches!(self, Self::Parse(_) | Self::Timeout(_) | Self::Peer(_))
    }
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::Framing(msg) => write!(f, "framing: {msg}"),
            Self::Parse(msg) => write!(f, "parse: {msg}"),
            Self::Timeout(msg) => write!(f, "timeout: {msg}"),
            Self::Peer(msg) => write!(f, "peer: {msg}"),
            Self::Bind(msg) => write!(f, "bind: {msg}"),
            Self::ChannelClosed(msg) => write!(f, "channel closed: {msg}"),
            Self::Ipc(msg) => write!(f, "ipc: {msg}"),
            Self::Http(msg) => write!(f, "http: {msg}"),
            Self::Io(msg) => write!(f, "io: {msg}"),
        }
    }
}

impl std::error::Error for AppError {}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("invalid config: {err}"))
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        Self::Parse(err.to_string())
    }
}

impl From<io::Error> for AppError {
    fn from(err: io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

/// Short, errno-style code for a bind failure, used in `Error:<code>` statuses.
#[must_use]
pub fn bind_error_code(err: &io::Error) -> String {
    match err.kind() {
        io::ErrorKind::AddrInUse => "EADDRINUSE".to_owned(),
        io::ErrorKind::AddrNotAvailable => "EADDRNOTAVAIL".to_owned(),
        io::ErrorKind::PermissionDenied => "EACCES".to_owned(),
        io::ErrorKind::NotFound => "ENOENT".to_owned(),
        other => format!("{other:?}"),
    }
}
