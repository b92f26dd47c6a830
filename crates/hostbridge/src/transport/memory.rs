//! In-process transport.
//!
//! `channel()` returns an activation for the bridge plus a [`MemoryPeer`]
//! standing in for the host and the companion: it delivers inbound
//! documents, observes what the bridge sends, and signals close or cancel.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::{Activation, ChannelError, ChannelEvent, ChannelSender, InboundMessage};
use crate::bridge::protocol::{DecodeError, Envelope, WireDocument};
use crate::deferral::{Deferral, DeferralWaiter};

/// Outbound half handed to the bridge.
pub struct MemorySender {
    tx: mpsc::UnboundedSender<WireDocument>,
}

#[async_trait]
impl ChannelSender for MemorySender {
    async fn send(&self, document: WireDocument) -> Result<(), ChannelError> {
        self.tx.send(document).map_err(|_| ChannelError::Closed)
    }
}

struct DiscardingSender;

#[async_trait]
impl ChannelSender for DiscardingSender {
    async fn send(&self, _document: WireDocument) -> Result<(), ChannelError> {
        Ok(())
    }
}

/// A sender that accepts and drops every document.
pub fn discarding_sender() -> Arc<dyn ChannelSender> {
    Arc::new(DiscardingSender)
}

pub struct MemoryPeer {
    events: mpsc::UnboundedSender<ChannelEvent>,
    outbound: mpsc::UnboundedReceiver<WireDocument>,
    activation: DeferralWaiter,
    cancel: CancellationToken,
}

pub fn channel() -> (Activation, MemoryPeer) {
    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
    let (deferral, waiter) = Deferral::new();
    let cancel = CancellationToken::new();

    let activation = Activation {
        sender: Arc::new(MemorySender { tx: outbound_tx }),
        events: events_rx,
        deferral,
        cancel: cancel.clone(),
    };
    let peer = MemoryPeer {
        events: events_tx,
        outbound: outbound_rx,
        activation: waiter,
        cancel,
    };
    (activation, peer)
}

impl MemoryPeer {
    /// Deliver a raw document. The waiter resolves once the bridge is done with it.
    pub fn deliver(&self, document: WireDocument) -> DeferralWaiter {
        let (deferral, waiter) = Deferral::new();
        // A closed bridge drops the event, which completes its deferral.
        let _ = self
            .events
            .send(ChannelEvent::Message(InboundMessage::new(document, deferral)));
        waiter
    }

    pub fn deliver_envelope(&self, envelope: &Envelope) -> DeferralWaiter {
        self.deliver(envelope.encode())
    }

    /// Signal that the remote side closed the channel.
    pub fn close(&self, status: impl Into<String>) {
        let _ = self.events.send(ChannelEvent::PeerClosed {
            status: status.into(),
        });
    }

    /// Cancel the host's background task.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub async fn recv(&mut self) -> Option<WireDocument> {
        self.outbound.recv().await
    }

    pub async fn recv_envelope(&mut self) -> Option<Result<Envelope, DecodeError>> {
        self.recv().await.map(|doc| Envelope::decode(&doc))
    }

    pub fn try_recv(&mut self) -> Option<WireDocument> {
        self.outbound.try_recv().ok()
    }

    /// Waiter for the activation deferral.
    pub fn activation(&mut self) -> &mut DeferralWaiter {
        &mut self.activation
    }
}
