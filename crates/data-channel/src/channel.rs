//! The channel-provider contract consumed by sessions.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use roomdrop_protocol::TransferMessage;
use tokio::sync::mpsc;

use crate::error::DataChannelError;

/// Process-unique identifier of one channel endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChannelId(pub u64);

static NEXT_CHANNEL_ID: AtomicU64 = AtomicU64::new(1);

impl ChannelId {
    /// Allocates a fresh identifier.
    pub fn next() -> Self {
        ChannelId(NEXT_CHANNEL_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ch-{}", self.0)
    }
}

/// Delivery guarantees requested when dialing a peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectOptions {
    pub reliable: bool,
    pub ordered: bool,
}

impl ConnectOptions {
    /// What the transfer protocol requires.
    pub const RELIABLE_ORDERED: ConnectOptions = ConnectOptions {
        reliable: true,
        ordered: true,
    };
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self::RELIABLE_ORDERED
    }
}

/// Classification of provider-level failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderErrorKind {
    /// The dialed room does not exist or its sender is offline.
    PeerUnavailable,
    /// Anything else (identifier taken, bind failure, timeouts).
    Other,
}

/// A reliable, ordered, bidirectional message pipe to one remote peer.
///
/// `send` never blocks: messages queue inside the provider and
/// [`buffered_amount`](Channel::buffered_amount) reports how many payload
/// bytes are still waiting to go out.
pub trait Channel: Send + Sync + fmt::Debug {
    fn id(&self) -> ChannelId;

    /// Identifier of the remote peer.
    fn peer(&self) -> &str;

    /// Queues a message. Fails with [`DataChannelError::Closed`] once closed.
    fn send(&self, message: TransferMessage) -> Result<(), DataChannelError>;

    /// Payload bytes queued but not yet handed to the transport.
    fn buffered_amount(&self) -> usize;

    fn is_open(&self) -> bool;

    /// Closes both directions. Emits `ChannelClosed` at most once.
    fn close(&self);
}

/// Shared handle to a channel endpoint.
pub type ChannelHandle = Arc<dyn Channel>;

/// Everything a provider reports back to its owner.
#[derive(Debug)]
pub enum ProviderEvent {
    /// Registration confirmed under `id`.
    Registered { id: String },
    /// Registration or dialing failed.
    Error {
        kind: ProviderErrorKind,
        message: String,
    },
    /// A remote peer dialed us. An `Open` event for the same channel follows.
    IncomingChannel(ChannelHandle),
    /// The channel is ready to carry messages.
    ChannelOpen { channel: ChannelId, peer: String },
    /// A message arrived.
    Data {
        channel: ChannelId,
        message: TransferMessage,
    },
    /// The channel closed, gracefully or not.
    ChannelClosed { channel: ChannelId },
    /// The transport failed; a `ChannelClosed` follows.
    ChannelError { channel: ChannelId, message: String },
}

pub type EventSender = mpsc::UnboundedSender<ProviderEvent>;
pub type EventReceiver = mpsc::UnboundedReceiver<ProviderEvent>;

/// Registers peers and opens channels between them.
///
/// Both calls return immediately; outcomes arrive later as
/// [`ProviderEvent`]s on the sender passed to `register`.
pub trait ChannelProvider: Send + Sync {
    /// Registers this peer under `id` and directs all events to `events`.
    fn register(&self, id: &str, events: EventSender) -> Result<(), DataChannelError>;

    /// Dials `remote`. The returned channel opens later (`ChannelOpen`) or
    /// the failure is reported as an `Error` event.
    fn connect_to(
        &self,
        remote: &str,
        options: ConnectOptions,
    ) -> Result<ChannelHandle, DataChannelError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_ids_are_unique() {
        let a = ChannelId::next();
        let b = ChannelId::next();
        assert_ne!(a, b);
        assert!(b > a);
    }

    #[test]
    fn default_options_are_reliable_and_ordered() {
        let opts = ConnectOptions::default();
        assert!(opts.reliable);
        assert!(opts.ordered);
    }

    #[test]
    fn channel_id_display() {
        assert_eq!(ChannelId(7).to_string(), "ch-7");
    }
}
