//! Local IPC adapter.
//!
//! Provides a named pipe (Windows) or Unix domain socket (Linux/macOS)
//! server accepting one JSON command object at a time.

pub mod server;
pub mod socket;
