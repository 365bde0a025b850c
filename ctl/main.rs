#![forbid(unsafe_code)]

//! `browser-bridge-ctl`: local CLI companion for `browser-bridge`.
//!
//! Connects to the IPC socket, sends one command to the browser extension
//! and prints the reply.

use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;

use clap::Parser;
use interprocess::local_socket::{traits::Stream as _, GenericFilePath, Stream, ToFsName};

#[derive(Debug, Parser)]
#[command(
    name = "browser-bridge-ctl",
    about = "Send a command to the browser extension through browser-bridge",
    version,
    long_about = None
)]
struct Cli {
    /// IPC socket name (must match the server's `ipc_name` config).
    #[arg(long, default_value = "browser-bridge")]
    ipc_name: String,

    /// Command words, joined with spaces (for example `tabs list`).
    #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
    command: Vec<String>,
}

/// Prefix the server uses for failed commands.
const ERROR_PREFIX: &str = "[ERROR]";

fn main() {
    let args = Cli::parse();
    let request_json = serde_json::json!({ "message": args.command.join(" ") });

    match send_ipc_command(&args.ipc_name, &request_json) {
        Ok(response) => {
            let message = response
                .get("message")
                .and_then(serde_json::Value::as_str)
                .unwrap_or_default();
            if let Some(reason) = message.strip_prefix(ERROR_PREFIX) {
                eprintln!("Error:{reason}");
                std::process::exit(1);
            }
            println!("{message}");
        }
        Err(err) => {
            eprintln!("Failed to connect to server: {err}");
            eprintln!("Is browser-bridge running with ipc_name '{}'?", args.ipc_name);
            std::process::exit(1);
        }
    }
}

/// Well-known socket path; mirrors the server's naming convention.
fn socket_path(name: &str) -> PathBuf {
    if cfg!(windows) {
        PathBuf::from(format!(r"\\.\pipe\{name}"))
    } else {
        std::env::temp_dir().join(format!("{name}.sock"))
    }
}

/// Connect to the IPC socket, send a JSON command, and read the response.
fn send_ipc_command(
    ipc_name: &str,
    request: &serde_json::Value,
) -> std::result::Result<serde_json::Value, Box<dyn std::error::Error>> {
    let name = socket_path(ipc_name).to_fs_name::<GenericFilePath>()?;
    let mut stream = Stream::connect(name)?;

    let mut request_line = serde_json::to_string(request)?;
    request_line.push('\n');
    stream.write_all(request_line.as_bytes())?;
    stream.flush()?;

    let mut reader = BufReader::new(&stream);
    let mut response_line = String::new();
    reader.read_line(&mut response_line)?;

    let response: serde_json::Value = serde_json::from_str(response_line.trim())?;
    Ok(response)
}
