#![forbid(unsafe_code)]

//! Native messaging gateway between a browser extension and local clients.

pub mod config;
pub mod correlator;
pub mod errors;
pub mod http;
pub mod ipc;
pub mod mcp;
pub mod peer;
pub mod reply;
pub mod shutdown;
pub mod state;
pub mod status;

pub use config::GlobalConfig;
pub use errors::{AppError, Result};
pub use state::GatewayState;
