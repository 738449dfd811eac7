//! Wire-level vocabulary shared by both roomdrop peers.
//!
//! A file crosses the channel as `Meta`, zero or more `Chunk`s and a
//! closing `End` (see [`messages::TransferMessage`]). Sessions are named by
//! a six-character [`room::RoomCode`].

pub mod constants;
pub mod messages;
pub mod room;

pub use constants::MessageKind;
pub use messages::{FileMeta, TransferMessage};
pub use room::{RoomCode, RoomLink};

/// Errors produced while parsing protocol values.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("invalid room code: {0}")]
    InvalidRoomCode(String),

    #[error("invalid room link: {0}")]
    InvalidRoomLink(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
