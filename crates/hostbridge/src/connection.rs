//! Connection lifecycle.
//!
//! A `Connection` wraps one activation's channel. It is Connected from
//! creation until the first `close`, then Closed for good; a new activation
//! yields a new Connection. Closing completes the activation deferral and
//! every per-message deferral still pending, exactly once each.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

use dashmap::DashMap;
use tokio_util::sync::CancellationToken;

use crate::bridge::protocol::{Document, Envelope};
use crate::deferral::Deferral;
use crate::transport::{ChannelError, ChannelSender};

/// Unique identifier for a connection, used in logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(uuid::Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Unconnected,
    Connected,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// The peer closed the channel.
    PeerClosed,
    /// The host cancelled the background task.
    Cancelled,
    /// The host dropped the event stream without a close signal.
    ChannelDropped,
    /// Closed locally through the bridge.
    Shutdown,
}

impl CloseReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PeerClosed => "peer_closed",
            Self::Cancelled => "cancelled",
            Self::ChannelDropped => "channel_dropped",
            Self::Shutdown => "shutdown",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SendError {
    #[error("no active connection")]
    NotConnected,
    #[error("connection is closed")]
    Closed,
    #[error("channel send failed: {0}")]
    Transport(#[from] ChannelError),
}

struct ConnectionInner {
    id: ConnectionId,
    sender: Arc<dyn ChannelSender>,
    activation: Deferral,
    closed: AtomicBool,
    close_reason: OnceLock<CloseReason>,
    closed_token: CancellationToken,
    pending: DashMap<u64, Arc<Deferral>>,
    next_message: AtomicU64,
}

#[derive(Clone)]
pub struct Connection {
    inner: Arc<ConnectionInner>,
}

impl Connection {
    pub(crate) fn open(sender: Arc<dyn ChannelSender>, activation: Deferral) -> Self {
        Self {
            inner: Arc::new(ConnectionInner {
                id: ConnectionId::new(),
                sender,
                activation,
                closed: AtomicBool::new(false),
                close_reason: OnceLock::new(),
                closed_token: CancellationToken::new(),
                pending: DashMap::new(),
                next_message: AtomicU64::new(0),
            }),
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.inner.id
    }

    pub fn state(&self) -> ConnectionState {
        if self.is_closed() {
            ConnectionState::Closed
        } else {
            ConnectionState::Connected
        }
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    pub fn close_reason(&self) -> Option<CloseReason> {
        self.inner.close_reason.get().copied()
    }

    /// Resolves once the connection is closed.
    pub async fn closed(&self) {
        self.inner.closed_token.cancelled().await;
    }

    /// Number of inbound messages whose deferral is still held.
    pub fn pending_messages(&self) -> usize {
        self.inner.pending.len()
    }

    /// Encode and hand an envelope to the channel. Not retried.
    pub async fn send(&self, envelope: &Envelope) -> Result<(), SendError> {
        if self.is_closed() {
            return Err(SendError::Closed);
        }

        let document = envelope.encode();
        tracing::trace!(
            connection = %self.inner.id,
            operation = %envelope.operation(),
            correlation_id = envelope.correlation_id(),
            "Sending envelope"
        );

        self.inner.sender.send(document).await.map_err(|e| {
            tracing::warn!(connection = %self.inner.id, error = %e, "Channel send failed");
            SendError::from(e)
        })
    }

    pub async fn send_call(
        &self,
        method: &str,
        correlation_id: &str,
        input: Document,
        ui_affinity: bool,
    ) -> Result<(), SendError> {
        self.send(&Envelope::call(method, correlation_id, input, ui_affinity))
            .await
    }

    pub async fn send_return(
        &self,
        correlation_id: &str,
        output: Option<Document>,
        error: &str,
    ) -> Result<(), SendError> {
        self.send(&Envelope::reply(correlation_id, output, error))
            .await
    }

    /// Close the connection. Only the first call has any effect; returns
    /// whether this call performed the transition.
    pub fn close(&self, reason: CloseReason) -> bool {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            tracing::trace!(
                connection = %self.inner.id,
                reason = reason.as_str(),
                "Connection already closed"
            );
            return false;
        }
        let _ = self.inner.close_reason.set(reason);

        // Inserts after this snapshot see the flag and complete themselves.
        let pending: Vec<Arc<Deferral>> = self
            .inner
            .pending
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        tracing::info!(
            connection = %self.inner.id,
            reason = reason.as_str(),
            pending = pending.len(),
            "Connection closed"
        );
        for deferral in pending {
            deferral.complete();
        }

        self.inner.activation.complete();
        self.inner.closed_token.cancel();
        true
    }

    /// Hold a per-message deferral until the returned guard drops.
    pub(crate) fn track(&self, deferral: Deferral) -> PendingMessage {
        let key = self.inner.next_message.fetch_add(1, Ordering::Relaxed);
        let deferral = Arc::new(deferral);
        self.inner.pending.insert(key, Arc::clone(&deferral));
        // A close racing the insert may have drained `pending` before it.
        if self.inner.closed.load(Ordering::SeqCst) {
            self.inner.pending.remove(&key);
            deferral.complete();
        }
        PendingMessage {
            key,
            deferral,
            connection: self.clone(),
        }
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.inner.id)
            .field("state", &self.state())
            .field("pending", &self.pending_messages())
            .finish()
    }
}

/// Guard for one inbound message - completes its deferral on drop.
pub(crate) struct PendingMessage {
    key: u64,
    deferral: Arc<Deferral>,
    connection: Connection,
}

impl Drop for PendingMessage {
    fn drop(&mut self) {
        self.connection.inner.pending.remove(&self.key);
        self.deferral.complete();
    }
}
