//! Byte-stream transport.
//!
//! Runs the channel over any AsyncRead/AsyncWrite pair (stdio, pipes,
//! sockets) using length-delimited JSON frames. A background reader task
//! turns frames into message events and end-of-stream into a peer close.
//! A frame that is not a wire document is logged and skipped; only an I/O
//! or framing failure ends the stream.
//! Stream hosts have no per-message completion, so messages carry a no-op
//! deferral; the activation deferral is surfaced through [`StreamHandle`].

use std::sync::Arc;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{Mutex, mpsc};
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;

use super::{Activation, ChannelError, ChannelEvent, ChannelSender, InboundMessage};
use crate::bridge::codec::WireCodec;
use crate::bridge::protocol::WireDocument;
use crate::deferral::{Deferral, DeferralWaiter};

pub struct StreamSender<W> {
    writer: Mutex<FramedWrite<W, WireCodec>>,
}

#[async_trait]
impl<W> ChannelSender for StreamSender<W>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    async fn send(&self, document: WireDocument) -> Result<(), ChannelError> {
        let mut writer = self.writer.lock().await;
        writer.send(document).await?;
        Ok(())
    }
}

/// Host-side controls for a stream activation.
pub struct StreamHandle {
    released: DeferralWaiter,
    cancel: CancellationToken,
}

impl StreamHandle {
    /// Resolves once the bridge has released the activation.
    pub async fn released(&mut self) {
        self.released.completed().await;
    }

    pub fn is_released(&mut self) -> bool {
        self.released.is_completed()
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }
}

/// Build an activation over a reader/writer pair. Must be called inside a runtime.
pub fn activation<R, W>(reader: R, writer: W) -> (Activation, StreamHandle)
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let (deferral, released) = Deferral::new();
    let cancel = CancellationToken::new();

    let reader = FramedRead::new(reader, WireCodec::new());
    tokio::spawn(read_frames(reader, events_tx, cancel.clone()));

    let sender = StreamSender {
        writer: Mutex::new(FramedWrite::new(writer, WireCodec::new())),
    };
    let activation = Activation {
        sender: Arc::new(sender),
        events: events_rx,
        deferral,
        cancel: cancel.clone(),
    };
    (activation, StreamHandle { released, cancel })
}

async fn read_frames<R>(
    mut reader: FramedRead<R, WireCodec>,
    events: mpsc::UnboundedSender<ChannelEvent>,
    cancel: CancellationToken,
) where
    R: AsyncRead + Unpin,
{
    let mut skipped = 0usize;
    let status = loop {
        let frame = tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            _ = events.closed() => return,
            frame = reader.next() => frame,
        };

        match frame {
            Some(Ok(Ok(document))) => {
                let message = InboundMessage::new(document, Deferral::noop());
                if events.send(ChannelEvent::Message(message)).is_err() {
                    return;
                }
            }
            Some(Ok(Err(malformed))) => {
                skipped += 1;
                tracing::warn!(error = %malformed, skipped, "Skipping malformed frame");
            }
            Some(Err(e)) => {
                tracing::warn!(error = %e, "Stream read failed");
                break format!("read error: {e}");
            }
            None => {
                tracing::debug!("Stream reached end of input");
                break "eof".to_string();
            }
        }
    };

    let _ = events.send(ChannelEvent::PeerClosed { status });
}
