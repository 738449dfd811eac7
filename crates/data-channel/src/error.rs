//! Error types for the data channel.

/// Errors produced by channel providers and channels.
#[derive(Debug, thiserror::Error)]
pub enum DataChannelError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("peer unavailable: {0}")]
    PeerUnavailable(String),

    #[error("provider is not registered")]
    NotRegistered,

    #[error("channel is closed")]
    Closed,

    #[error("connection timed out")]
    Timeout,

    #[error("unsupported operation: {0}")]
    Unsupported(String),

    #[error("protocol error: {0}")]
    Protocol(String),
}
