//! Line-oriented command surface.
//!
//! One command per input line, one reply per output line. Replies are
//! written in completion order, not submission order.
//!
//! Standard input/output carry the native messaging channel, so this surface
//! is served on its own local socket (`<ipc_name>-mcp`), one line session per
//! connection.

pub mod lines;
pub mod server;
