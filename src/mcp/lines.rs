//! Line session: read commands, run them concurrently, write replies.
//!
//! Input lines are framed by [`LinesCodec`] with a maximum length. Each
//! non-blank line is dispatched on its own task; finished tasks push their
//! reply line into an mpsc channel drained by a single writer task, so
//! replies never interleave and appear as soon as they are ready.

use std::sync::Arc;

use futures_util::StreamExt;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio_util::codec::{FramedRead, LinesCodec, LinesCodecError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::correlator::RequestCorrelator;
use crate::reply::{reply_line, ERROR_PREFIX};
use crate::{AppError, Result};

/// Reply lines buffered ahead of the writer.
const OUTPUT_QUEUE_DEPTH: usize = 64;

/// Serve one line session until input ends or `cancel` fires.
///
/// On end of input the session waits for every in-flight command to
/// report before returning. On cancellation it returns immediately.
///
/// # Errors
///
/// Returns [`AppError::Io`] if reading input fails.
pub async fn serve_lines<R, W>(
    correlator: Arc<RequestCorrelator>,
    reader: R,
    writer: W,
    max_line_bytes: usize,
    cancel: CancellationToken,
) -> Result<()>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (line_tx, line_rx) = mpsc::channel::<String>(OUTPUT_QUEUE_DEPTH);
    let writer_task = tokio::spawn(write_lines(writer, line_rx));
    let mut lines = FramedRead::new(reader, LinesCodec::new_with_max_length(max_line_bytes));

    let result = loop {
        tokio::select! {
            biased;

            () = cancel.cancelled() => {
                debug!("line session: cancellation received, stopping");
                writer_task.abort();
                return Ok(());
            }

            item = lines.next() => {
                match item {
                    None => break Ok(()),
                    Some(Ok(line)) => {
                        let command = line.trim_end_matches('\r');
                        if command.trim().is_empty() {
                            continue;
                        }
                        spawn_command(&correlator, command.to_owned(), line_tx.clone());
                    }
                    Some(Err(LinesCodecError::MaxLineLengthExceeded)) => {
                        warn!(max_line_bytes, "line session: input line too long");
                        let _ = line_tx
                            .send(format!("{ERROR_PREFIX} line exceeds {max_line_bytes} bytes"))
                            .await;
                        break Ok(());
                    }
                    Some(Err(LinesCodecError::Io(err))) => {
                        warn!(%err, "line session: read error");
                        break Err(AppError::Io(err.to_string()));
                    }
                }
            }
        }
    };

    // The writer ends once every in-flight command has dropped its sender.
    drop(line_tx);
    if let Err(err) = writer_task.await {
        warn!(%err, "line session: writer task failed");
    }
    info!("line session ended");
    result
}

fn spawn_command(correlator: &Arc<RequestCorrelator>, command: String, out: mpsc::Sender<String>) {
    let correlator = Arc::clone(correlator);
    tokio::spawn(async move {
        let outcome = correlator.dispatch(command).await;
        if out.send(reply_line(&outcome)).await.is_err() {
            debug!("line session closed before reply could be written");
        }
    });
}

async fn write_lines<W>(mut writer: W, mut line_rx: mpsc::Receiver<String>)
where
    W: AsyncWrite + Unpin,
{
    while let Some(mut line) = line_rx.recv().await {
        line.push('\n');
        if let Err(err) = write_line(&mut writer, &line).await {
            warn!(%err, "line session: write failed");
            return;
        }
    }
}

async fn write_line<W>(writer: &mut W, line: &str) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(line.as_bytes()).await?;
    writer.flush().await
}
