//! Peer writer task.
//!
//! The outbound half of the peer channel has exactly one owner: the task
//! started by [`spawn_writer`]. Every other component holds a cloneable
//! [`PeerSender`], which encodes a complete frame up front and hands the
//! bytes to the writer over an mpsc channel. Frames therefore reach the
//! stream whole and in the order the writer receives them, never
//! interleaved.

use bytes::Bytes;
use serde::Serialize;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::peer::codec::encode_frame;
use crate::{AppError, Result};

/// Outbound frames buffered ahead of the writer.
const WRITE_QUEUE_DEPTH: usize = 256;

/// Cloneable handle for sending frames to the peer.
#[derive(Debug, Clone)]
pub struct PeerSender {
    tx: mpsc::Sender<Bytes>,
}

impl PeerSender {
    /// Encode `message` as one frame and queue it for the writer.
    ///
    /// # Errors
    ///
    /// - [`AppError::Framing`] if the message cannot be encoded (for example
    ///   it exceeds the outbound size limit).
    /// - [`AppError::ChannelClosed`] if the writer task has stopped.
    pub async fn send<T: Serialize + ?Sized>(&self, message: &T) -> Result<()> {
        let frame = encode_frame(message)?;
        self.tx
            .send(frame)
            .await
            .map_err(|_| AppError::ChannelClosed("peer writer stopped".into()))
    }
}

/// Start the writer task over `writer` and return the sender handle.
///
/// The task exits when `cancel` fires, when every [`PeerSender`] has been
/// dropped, or when a write fails. A failed write is returned as
/// [`AppError::ChannelClosed`] from the join handle.
pub fn spawn_writer<W>(writer: W, cancel: CancellationToken) -> (PeerSender, JoinHandle<Result<()>>)
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, rx) = mpsc::channel(WRITE_QUEUE_DEPTH);
    let handle = tokio::spawn(run_writer(writer, rx, cancel));
    (PeerSender { tx }, handle)
}

async fn run_writer<W>(
    mut writer: W,
    mut frame_rx: mpsc::Receiver<Bytes>,
    cancel: CancellationToken,
) -> Result<()>
where
    W: AsyncWrite + Unpin + Send,
{
    loop {
        tokio::select! {
            biased;

            () = cancel.cancelled() => {
                debug!("peer writer: cancellation received, stopping");
                break;
            }

            frame = frame_rx.recv() => {
                let Some(frame) = frame else {
                    debug!("peer writer: all senders dropped, stopping");
                    break;
                };

                if let Err(err) = write_frame(&mut writer, &frame).await {
                    warn!(%err, "peer writer: write failed");
                    return Err(AppError::ChannelClosed(format!("write failed: {err}")));
                }
            }
        }
    }

    Ok(())
}

async fn write_frame<W>(writer: &mut W, frame: &[u8]) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(frame).await?;
    writer.flush().await
}
