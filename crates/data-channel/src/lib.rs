//! Channel providers for roomdrop.
//!
//! A provider registers a peer under an identifier, dials other peers and
//! hands back [`Channel`]s: reliable, ordered message pipes that expose a
//! `buffered_amount` gauge for the sender's flow control. Everything a
//! provider observes (registration, inbound channels, data, close) is
//! reported as a [`ProviderEvent`] on the sender given to `register`.
//!
//! Two providers ship here:
//! - [`memory::MemoryBroker`]: in-process rendezvous, used for loopback
//!   and tests, optionally throttled to simulate a slow link.
//! - [`tcp::TcpProvider`]: direct TCP, see [`wire`] for the frame format.

pub mod channel;
pub mod client;
mod connection;
pub mod error;
pub mod memory;
pub mod server;
pub mod tcp;
pub mod wire;

pub use channel::{
    Channel, ChannelHandle, ChannelId, ChannelProvider, ConnectOptions, EventReceiver,
    EventSender, ProviderErrorKind, ProviderEvent,
};
pub use connection::TcpChannel;
pub use error::DataChannelError;
pub use memory::{MemoryBroker, MemoryProvider};
pub use tcp::TcpProvider;

use std::time::Duration;

/// TCP read/write buffer size (256 KB).
pub const TCP_BUFFER_SIZE: usize = 256 * 1024;

/// Timeout for the TCP connection attempt.
pub const TCP_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Timeout for the room-code handshake.
pub const TCP_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);
