#![forbid(unsafe_code)]

//! `browser-bridge`: native messaging host binary.
//!
//! Launched by the browser with stdin/stdout wired to the extension.
//! Bootstraps configuration, attaches the peer channel, starts the HTTP,
//! IPC and line-surface adapters, announces readiness, and shuts down on a
//! signal or when the extension disconnects.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use browser_bridge::config::GlobalConfig;
use browser_bridge::http::server::start_http;
use browser_bridge::ipc::server::start_ipc;
use browser_bridge::mcp::server::start_mcp;
use browser_bridge::peer::{reader, writer};
use browser_bridge::shutdown::ShutdownCoordinator;
use browser_bridge::status::{announce_ready, Component};
use browser_bridge::{AppError, GatewayState, Result};

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "browser-bridge", about = "Native messaging gateway", version, long_about = None)]
struct Cli {
    /// Path to an optional TOML configuration file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Log output format (text or json). Logs are written to stderr.
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Override the HTTP port (takes precedence over the environment).
    #[arg(long)]
    port: Option<u16>,

    /// Parent window handle passed by Chrome on Windows.
    #[arg(long, hide = true)]
    parent_window: Option<String>,

    /// Caller origin and any other arguments supplied by the browser.
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    origin: Vec<String>,
}

/// Why the gateway stopped serving.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
enum StopReason {
    Signal,
    PeerClosed,
    PeerFailed,
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.log_format)?;
    info!("browser-bridge bootstrap");

    let code = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?
        .block_on(run(args))?;

    // The blocking stdin reader would otherwise hold the runtime open.
    std::process::exit(code);
}

async fn run(args: Cli) -> Result<i32> {
    // ── Load configuration ──────────────────────────────
    let mut config = match args.config {
        Some(ref path) => GlobalConfig::load_from_path(path)?,
        None => GlobalConfig::default(),
    };
    config.apply_env_overrides()?;
    if let Some(port) = args.port {
        config.http_port = port;
    }
    info!(
        origin = ?args.origin,
        parent_window = ?args.parent_window,
        http_port = config.http_port,
        ipc_name = %config.ipc_name,
        "configuration loaded"
    );

    // ── Attach the peer channel ─────────────────────────
    let ct = CancellationToken::new();
    let (peer, writer_handle) = writer::spawn_writer(tokio::io::stdout(), ct.clone());
    let state = Arc::new(GatewayState::new(config, peer));

    let mut reader_handle = tokio::spawn(reader::run_reader(
        tokio::io::stdin(),
        Arc::clone(&state.correlator),
        state.config.limits.max_inbound_frame_bytes,
        ct.clone(),
    ));
    state.status.mark_ok(Component::NativeMessaging);

    // ── Start adapters ──────────────────────────────────
    let mut coordinator = ShutdownCoordinator::new(
        ct.clone(),
        Arc::clone(&state.broadcaster),
        state.config.shutdown_grace(),
    );

    let http = start_http(Arc::clone(&state), ct.clone()).await;
    let http_port = http.as_ref().map_or(state.config.http_port, |(port, _)| *port);
    if let Some((_, listener)) = http {
        coordinator.register(listener);
    }
    for listener in [
        start_ipc(Arc::clone(&state), ct.clone()),
        start_mcp(Arc::clone(&state), ct.clone()),
    ]
    .into_iter()
    .flatten()
    {
        coordinator.register(listener);
    }

    // ── Readiness handshake ─────────────────────────────
    if let Err(err) = announce_ready(&state, http_port).await {
        error!(%err, "failed to send ready frame");
    }

    // ── Wait for a stop condition ───────────────────────
    let reason = tokio::select! {
        () = shutdown_signal() => {
            info!("shutdown signal received");
            StopReason::Signal
        }
        joined = &mut reader_handle => match joined {
            Ok(Ok(())) => {
                info!("peer channel closed");
                StopReason::PeerClosed
            }
            Ok(Err(err)) => {
                error!(%err, "peer channel failed");
                StopReason::PeerFailed
            }
            Err(err) => {
                error!(%err, "peer reader task panicked");
                StopReason::PeerFailed
            }
        },
    };

    // ── Graceful shutdown ───────────────────────────────
    let outcome = coordinator.shutdown().await;
    if !reader_handle.is_finished() {
        reader_handle.abort();
    }
    if let Ok(Err(err)) = writer_handle.await {
        warn!(%err, "peer writer ended with error");
    }

    let code = match (outcome.exit_code(), reason) {
        (0, StopReason::PeerFailed) => 1,
        (code, _) => code,
    };
    info!(?reason, ?outcome, code, "browser-bridge shut down");
    Ok(code)
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(err) => {
                warn!(%err, "failed to register SIGTERM handler, using ctrl-c only");
                let _ = ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(err) = ctrl_c.await {
            error!(%err, "ctrl-c signal handler failed");
        }
    }
}

fn init_tracing(log_format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    // stdout carries the peer frame stream.
    let subscriber = fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr);

    match log_format {
        LogFormat::Text => subscriber
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
        LogFormat::Json => subscriber
            .json()
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
    }

    Ok(())
}
