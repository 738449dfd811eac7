//! Chunked file transfer over a roomdrop channel.
//!
//! The sending side ([`send_file`]) frames a file as `Meta`, `Chunk*`, `End`
//! and paces itself against the channel's buffered-bytes gauge. The
//! receiving side ([`ReceiveAssembler`]) rebuilds each file and appends it
//! to a [`CompletedFileRegistry`].

mod mime;
mod progress;
mod receive;
mod registry;
mod send;
mod validation;

use std::time::Duration;

use roomdrop_data_channel::DataChannelError;
use roomdrop_protocol::constants::{
    BACKPRESSURE_COOLDOWN, CHUNK_SIZE, COMPLETION_DELAY, HIGH_WATER_MARK, LARGE_FILE_THRESHOLD,
};

pub use mime::{mime_from_name, mime_from_path};
pub use progress::{ProgressCallback, ProgressReporter, TransferProgress, format_bytes};
pub use receive::{AssemblerState, ProtocolViolation, ReceiveAssembler, Received};
pub use registry::{CompletedFile, CompletedFileRegistry};
pub use send::{FileSource, Pacing, SendOutcome, pacing, preflight, send_file};
pub use validation::validate_file_name;

/// Tunables of the transfer pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferConfig {
    /// Bytes per `Chunk` message.
    pub chunk_size: usize,
    /// Buffered bytes above which the sender defers.
    pub high_water_mark: usize,
    /// How long to defer once above the high-water mark.
    pub cooldown: Duration,
    /// Pause after a finished send before the next file may start.
    pub completion_delay: Duration,
    /// Files above this size need explicit confirmation.
    pub large_file_threshold: u64,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            chunk_size: CHUNK_SIZE,
            high_water_mark: HIGH_WATER_MARK,
            cooldown: BACKPRESSURE_COOLDOWN,
            completion_delay: COMPLETION_DELAY,
            large_file_threshold: LARGE_FILE_THRESHOLD,
        }
    }
}

impl TransferConfig {
    /// Rejects settings the pipeline cannot run with.
    pub fn validate(&self) -> Result<(), TransferError> {
        if self.chunk_size == 0 {
            return Err(TransferError::InvalidConfig(
                "chunk_size must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// Errors produced by the transfer crate.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("channel error: {0}")]
    Channel(#[from] DataChannelError),

    #[error("peer not connected")]
    ChannelNotOpen,

    #[error("file is {size} bytes, above the {threshold} byte threshold; confirmation required")]
    LargeFileNotConfirmed { size: u64, threshold: u64 },

    #[error("invalid file name: {0}")]
    InvalidName(String),

    #[error("no completed file at index {0}")]
    NoSuchFile(usize),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_protocol_constants() {
        let config = TransferConfig::default();
        assert_eq!(config.chunk_size, 64 * 1024);
        assert_eq!(config.high_water_mark, 10 * 1024 * 1024);
        assert_eq!(config.cooldown, Duration::from_millis(100));
        assert_eq!(config.completion_delay, Duration::from_secs(1));
        assert_eq!(config.large_file_threshold, 1 << 30);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn zero_chunk_size_rejected() {
        let config = TransferConfig {
            chunk_size: 0,
            ..TransferConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(TransferError::InvalidConfig(_))
        ));
    }
}
