//! Host channel seam.
//!
//! The host hands the bridge an [`Activation`]: a sender for outbound
//! documents, a stream of channel events, the activation deferral that
//! keeps the process alive, and a cancellation signal. Adapters:
//! - **memory**: in-process peer, used by embedders' tests
//! - **stream**: length-delimited JSON frames over AsyncRead/AsyncWrite

pub mod memory;
pub mod stream;

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::bridge::protocol::WireDocument;
use crate::deferral::Deferral;

#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("channel closed")]
    Closed,
    #[error("transport error: {0}")]
    Io(#[from] std::io::Error),
    #[error("{0}")]
    Other(String),
}

/// The host's asynchronous send primitive. Must accept concurrent callers.
#[async_trait]
pub trait ChannelSender: Send + Sync + 'static {
    async fn send(&self, document: WireDocument) -> Result<(), ChannelError>;
}

/// One "message received" signal from the host.
#[derive(Debug)]
pub struct InboundMessage {
    pub document: WireDocument,
    /// Completed once the bridge has finished with this message.
    pub deferral: Deferral,
}

impl InboundMessage {
    pub fn new(document: WireDocument, deferral: Deferral) -> Self {
        Self { document, deferral }
    }
}

#[derive(Debug)]
pub enum ChannelEvent {
    Message(InboundMessage),
    PeerClosed { status: String },
}

/// A new channel delivered by the host.
pub struct Activation {
    pub sender: Arc<dyn ChannelSender>,
    pub events: mpsc::UnboundedReceiver<ChannelEvent>,
    /// Held for the connection's lifetime; completed exactly once on close.
    pub deferral: Deferral,
    /// Host-initiated cancellation (background task cancelled).
    pub cancel: CancellationToken,
}
