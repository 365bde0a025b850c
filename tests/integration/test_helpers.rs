//! Shared helpers for integration tests.
//!
//! [`spawn_gateway`] wires a [`GatewayState`] to an in-memory peer channel
//! made of two duplex pipes. The returned [`FakePeer`] plays the browser
//! extension: it reads the gateway's frames and writes replies back.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use interprocess::local_socket::tokio::{prelude::*, Stream};
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream};
use tokio::task::JoinHandle;
use tokio_util::codec::FramedRead;
use tokio_util::sync::CancellationToken;

use browser_bridge::config::{LimitConfig, TimeoutConfig};
use browser_bridge::correlator::CommandEnvelope;
use browser_bridge::ipc::socket::{socket_name, socket_path};
use browser_bridge::peer::codec::{encode_frame, PeerCodec};
use browser_bridge::peer::{reader::run_reader, writer::spawn_writer};
use browser_bridge::{GatewayState, GlobalConfig};

/// Upper bound on any single wait in these tests.
pub const WAIT: Duration = Duration::from_secs(5);

/// Config with an ephemeral HTTP port, unique socket names and short
/// timeouts.
pub fn test_config() -> GlobalConfig {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    GlobalConfig {
        http_port: 0,
        ipc_name: format!("bb-test-{}", &suffix[..12]),
        timeouts: TimeoutConfig {
            request_seconds: 2,
            shutdown_grace_seconds: 2,
            sse_keep_alive_seconds: 30,
        },
        limits: LimitConfig::default(),
    }
}

/// A gateway whose peer channel is in memory.
pub struct TestGateway {
    pub state: Arc<GatewayState>,
    pub cancel: CancellationToken,
    pub reader: JoinHandle<browser_bridge::Result<()>>,
}

/// The browser-extension side of the in-memory peer channel.
pub struct FakePeer {
    frames: FramedRead<DuplexStream, PeerCodec>,
    to_gateway: DuplexStream,
}

/// Start a gateway core (writer, reader, shared state) without adapters.
pub fn spawn_gateway(config: GlobalConfig) -> (TestGateway, FakePeer) {
    let (gateway_out, peer_in) = tokio::io::duplex(256 * 1024);
    let (peer_out, gateway_in) = tokio::io::duplex(256 * 1024);
    let cancel = CancellationToken::new();

    let (sender, _writer) = spawn_writer(gateway_out, cancel.clone());
    let state = Arc::new(GatewayState::new(config, sender));
    let reader = tokio::spawn(run_reader(
        gateway_in,
        Arc::clone(&state.correlator),
        state.config.limits.max_inbound_frame_bytes,
        cancel.clone(),
    ));

    let gateway = TestGateway {
        state,
        cancel,
        reader,
    };
    let peer = FakePeer {
        frames: FramedRead::new(peer_in, PeerCodec::new()),
        to_gateway: peer_out,
    };
    (gateway, peer)
}

impl FakePeer {
    /// Next frame written by the gateway.
    pub async fn next_frame(&mut self) -> Value {
        tokio::time::timeout(WAIT, self.frames.next())
            .await
            .expect("frame in time")
            .expect("gateway stream open")
            .expect("well-formed frame")
    }

    /// Next `commandWithResponse`, skipping any other frames.
    pub async fn next_command(&mut self) -> CommandEnvelope {
        loop {
            let frame = self.next_frame().await;
            if frame["type"] == CommandEnvelope::TYPE {
                return serde_json::from_value(frame).expect("command envelope");
            }
        }
    }

    /// Write one frame to the gateway.
    pub async fn send(&mut self, value: &Value) {
        let frame = encode_frame(value).expect("encode");
        self.send_raw(&frame).await;
    }

    /// Write raw bytes to the gateway.
    pub async fn send_raw(&mut self, bytes: &[u8]) {
        self.to_gateway.write_all(bytes).await.expect("write");
        self.to_gateway.flush().await.expect("flush");
    }

    pub async fn reply(&mut self, request_id: &str, response: Value) {
        self.send(&json!({
            "type": "commandResponse",
            "requestId": request_id,
            "response": response,
        }))
        .await;
    }

    pub async fn reply_error(&mut self, request_id: &str, error: &str) {
        self.send(&json!({
            "type": "commandError",
            "requestId": request_id,
            "error": error,
        }))
        .await;
    }

    /// Answer every command with `responder` until the gateway stops writing.
    pub fn serve<F>(mut self, responder: F) -> JoinHandle<()>
    where
        F: Fn(&str) -> std::result::Result<Value, String> + Send + 'static,
    {
        tokio::spawn(async move {
            while let Some(Ok(frame)) = self.frames.next().await {
                if frame["type"] != CommandEnvelope::TYPE {
                    continue;
                }
                let command: CommandEnvelope =
                    serde_json::from_value(frame).expect("command envelope");
                match responder(&command.payload) {
                    Ok(response) => self.reply(&command.request_id, response).await,
                    Err(error) => self.reply_error(&command.request_id, &error).await,
                }
            }
        })
    }

    /// Close the peer's outbound pipe; the gateway sees end of stream.
    pub fn hang_up(self) -> FramedRead<DuplexStream, PeerCodec> {
        drop(self.to_gateway);
        self.frames
    }
}

/// The `ping <x>` -> `pong <x>` responder used by several scenarios.
pub fn ping_pong(command: &str) -> std::result::Result<Value, String> {
    match command.strip_prefix("ping ") {
        Some(rest) => Ok(json!(format!("pong {rest}"))),
        None => Err(format!("unknown command: {command}")),
    }
}

/// Socket path of the IPC adapter for `config`.
pub fn ipc_path(config: &GlobalConfig) -> PathBuf {
    socket_path(&config.ipc_name)
}

/// Connect to the local socket at `path`.
pub async fn connect(path: &std::path::Path) -> Stream {
    let name = socket_name(path).expect("socket name");
    tokio::time::timeout(WAIT, Stream::connect(name))
        .await
        .expect("connect in time")
        .expect("connect")
}

/// Write `chunks` to the socket at `path`, pausing between them, and read
/// one reply line.
pub async fn ipc_exchange(path: &std::path::Path, chunks: &[&[u8]]) -> Value {
    let stream = connect(path).await;
    let (recv, mut send) = stream.split();

    for chunk in chunks {
        send.write_all(chunk).await.expect("write chunk");
        send.flush().await.expect("flush");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    let mut line = String::new();
    tokio::time::timeout(WAIT, BufReader::new(recv).read_line(&mut line))
        .await
        .expect("reply in time")
        .expect("read reply");
    serde_json::from_str(line.trim_end()).expect("reply json")
}
