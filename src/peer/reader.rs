//! Peer reader task.
//!
//! Drives a [`FramedRead`] over the inbound half of the peer channel using
//! [`PeerCodec`] and hands every decoded frame to
//! [`RequestCorrelator::on_frame`]. Frames with invalid JSON are dropped
//! inside the codec; framing errors and end of stream end the task.
//!
//! Whatever ends the task, every outstanding request is rejected before it
//! returns, and later requests fail immediately.

use std::sync::Arc;

use futures_util::StreamExt;
use tokio::io::AsyncRead;
use tokio_util::codec::FramedRead;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::correlator::RequestCorrelator;
use crate::peer::codec::PeerCodec;
use crate::Result;

/// Read frames from `reader` until end of stream, a framing error, or
/// cancellation.
///
/// # Errors
///
/// Returns [`AppError::Framing`](crate::AppError::Framing) when the stream
/// carries an oversize frame or ends mid-frame, and
/// [`AppError::Io`](crate::AppError::Io) on read failures. A clean end of
/// stream and cancellation both return `Ok(())`.
pub async fn run_reader<R>(
    reader: R,
    correlator: Arc<RequestCorrelator>,
    max_frame_len: usize,
    cancel: CancellationToken,
) -> Result<()>
where
    R: AsyncRead + Unpin + Send,
{
    let mut framed = FramedRead::new(reader, PeerCodec::with_max_frame_len(max_frame_len));

    loop {
        tokio::select! {
            biased;

            () = cancel.cancelled() => {
                debug!("peer reader: cancellation received, stopping");
                correlator.close_all("gateway shutting down");
                return Ok(());
            }

            item = framed.next() => {
                match item {
                    None => {
                        info!("peer reader: peer closed the channel");
                        correlator.close_all("peer closed the channel");
                        return Ok(());
                    }
                    Some(Ok(frame)) => correlator.on_frame(frame),
                    Some(Err(err)) => {
                        error!(%err, "peer reader: fatal channel error");
                        correlator.close_all(&err.to_string());
                        return Err(err);
                    }
                }
            }
        }
    }
}
