use roomdrop_data_channel::DataChannelError;
use roomdrop_transfer::TransferError;

/// Errors returned by session operations.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("peer not connected")]
    NotConnected,

    #[error("peer not found: check the room code {0} and that the sender is online")]
    PeerNotFound(String),

    #[error("session failed: {0}")]
    Failed(String),

    #[error("only the sending peer can send files")]
    NotSender,

    #[error("a file is already being sent")]
    Busy,

    #[error("session has ended")]
    Closed,

    #[error("send task failed: {0}")]
    TaskFailed(String),

    #[error("transfer error: {0}")]
    Transfer(#[from] TransferError),

    #[error("channel error: {0}")]
    Channel(#[from] DataChannelError),
}
