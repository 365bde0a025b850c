//! Global configuration parsing, defaults, and environment overrides.

use std::env;
use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::{AppError, Result};

/// Environment variable overriding [`GlobalConfig::http_port`].
pub const PORT_ENV_VAR: &str = "BROWSER_BRIDGE_PORT";

/// Timeout values (seconds) for request correlation and lifecycle.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct TimeoutConfig {
    /// Deadline for a single command round-trip to the peer.
    #[serde(default = "default_request_seconds")]
    pub request_seconds: u64,
    /// Grace period for listeners to close before a forced exit.
    #[serde(default = "default_shutdown_grace_seconds")]
    pub shutdown_grace_seconds: u64,
    /// Interval between SSE keep-alive comments.
    #[serde(default = "default_sse_keep_alive_seconds")]
    pub sse_keep_alive_seconds: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            request_seconds: default_request_seconds(),
            shutdown_grace_seconds: default_shutdown_grace_seconds(),
            sse_keep_alive_seconds: default_sse_keep_alive_seconds(),
        }
    }
}

/// Size limits protecting the gateway from unbounded buffering.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct LimitConfig {
    /// Largest inbound peer frame accepted, in bytes.
    #[serde(default = "default_max_inbound_frame_bytes")]
    pub max_inbound_frame_bytes: usize,
    /// Largest IPC request buffered per connection, in bytes.
    #[serde(default = "default_ipc_max_buffer_bytes")]
    pub ipc_max_buffer_bytes: usize,
    /// Longest line accepted on the MCP line surface, in bytes.
    #[serde(default = "default_mcp_max_line_bytes")]
    pub mcp_max_line_bytes: usize,
}

impl Default for LimitConfig {
    fn default() -> Self {
        Self {
            max_inbound_frame_bytes: default_max_inbound_frame_bytes(),
            ipc_max_buffer_bytes: default_ipc_max_buffer_bytes(),
            mcp_max_line_bytes: default_mcp_max_line_bytes(),
        }
    }
}

fn default_request_seconds() -> u64 {
    15
}

fn default_shutdown_grace_seconds() -> u64 {
    5
}

fn default_sse_keep_alive_seconds() -> u64 {
    30
}

fn default_max_inbound_frame_bytes() -> usize {
    64 * 1_048_576
}

fn default_ipc_max_buffer_bytes() -> usize {
    1_048_576
}

fn default_mcp_max_line_bytes() -> usize {
    1_048_576
}

fn default_http_port() -> u16 {
    3025
}

fn default_ipc_name() -> String {
    "browser-bridge".into()
}

/// Global configuration, optionally parsed from a TOML file.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct GlobalConfig {
    /// TCP port for the HTTP/SSE adapter (bound on `127.0.0.1`).
    #[serde(default = "default_http_port")]
    pub http_port: u16,
    /// Base name of the IPC socket / named pipe.
    #[serde(default = "default_ipc_name")]
    pub ipc_name: String,
    /// Timeout configuration.
    #[serde(default)]
    pub timeouts: TimeoutConfig,
    /// Buffer and frame size limits.
    #[serde(default)]
    pub limits: LimitConfig,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            http_port: default_http_port(),
            ipc_name: default_ipc_name(),
            timeouts: TimeoutConfig::default(),
            limits: LimitConfig::default(),
        }
    }
}

impl GlobalConfig {
    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read or contains
    /// invalid TOML, or if validation fails.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Apply the [`PORT_ENV_VAR`] override, if set.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the variable is not a valid port number.
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        match env::var(PORT_ENV_VAR) {
            Ok(raw) if !raw.trim().is_empty() => {
                self.http_port = raw.trim().parse().map_err(|err| {
                    AppError::Config(format!("{PORT_ENV_VAR} must be a port number: {err}"))
                })?;
            }
            _ => {}
        }
        Ok(())
    }

    /// Name of the local socket serving the MCP line surface.
    #[must_use]
    pub fn mcp_ipc_name(&self) -> String {
        format!("{}-mcp", self.ipc_name)
    }

    /// Default per-request deadline.
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.timeouts.request_seconds)
    }

    /// Grace period for shutdown before forcing exit.
    #[must_use]
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.timeouts.shutdown_grace_seconds)
    }

    /// Interval between SSE keep-alive comments.
    #[must_use]
    pub fn sse_keep_alive(&self) -> Duration {
        Duration::from_secs(self.timeouts.sse_keep_alive_seconds)
    }

    fn validate(&self) -> Result<()> {
        if self.timeouts.request_seconds == 0 {
            return Err(AppError::Config(
                "timeouts.request_seconds must be greater than zero".into(),
            ));
        }

        if self.timeouts.sse_keep_alive_seconds == 0 {
            return Err(AppError::Config(
                "timeouts.sse_keep_alive_seconds must be greater than zero".into(),
            ));
        }

        if self.ipc_name.trim().is_empty() {
            return Err(AppError::Config("ipc_name must not be empty".into()));
        }

        if self
            .ipc_name
            .chars()
            .any(|c| c == '/' || c == '\\' || c.is_whitespace())
        {
            return Err(AppError::Config(format!(
                "ipc_name '{}' must not contain path separators or whitespace",
                self.ipc_name
            )));
        }

        if self.limits.max_inbound_frame_bytes == 0
            || self.limits.ipc_max_buffer_bytes == 0
            || self.limits.mcp_max_line_bytes == 0
        {
            return Err(AppError::Config("limits must be greater than zero".into()));
        }

        Ok(())
    }
}
