//! Text rendering of command outcomes for the IPC and line surfaces.

use serde_json::Value;

use crate::Result;

/// Prefix marking a failed command in text replies.
pub const ERROR_PREFIX: &str = "[ERROR]";

/// Render an outcome as reply text.
///
/// String responses are returned verbatim, other JSON values compactly
/// serialized, and errors as `[ERROR] <reason>`.
#[must_use]
pub fn reply_text(outcome: &Result<Value>) -> String {
    match outcome {
        Ok(Value::String(text)) => text.clone(),
        Ok(other) => other.to_string(),
        Err(err) => format!("{ERROR_PREFIX} {err}"),
    }
}

/// Render an outcome as exactly one line, without the terminator.
///
/// Like [`reply_text`], except a string response containing a line break is
/// emitted JSON-quoted so it cannot spill onto a second line.
#[must_use]
pub fn reply_line(outcome: &Result<Value>) -> String {
    match outcome {
        Ok(Value::String(text)) if text.contains(['\n', '\r']) => {
            Value::String(text.clone()).to_string()
        }
        Err(err) => format!("{ERROR_PREFIX} {}", single_line(&err.to_string())),
        _ => reply_text(outcome),
    }
}

fn single_line(text: &str) -> String {
    text.split(['\n', '\r'])
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}
