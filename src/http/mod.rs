//! HTTP adapter: command submission, liveness, and the SSE push stream.

pub mod broadcast;
pub mod server;
pub mod sse;
