use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Size of one file slice sent as a single `chunk` message (64 KiB).
pub const CHUNK_SIZE: usize = 64 * 1024;

/// Buffered outbound bytes above which the sender stops and waits (10 MiB).
pub const HIGH_WATER_MARK: usize = 10 * 1024 * 1024;

/// How long the sender backs off once the high-water mark is exceeded.
pub const BACKPRESSURE_COOLDOWN: Duration = Duration::from_millis(100);

/// Pause between a finished send and the "ready for another file" state.
pub const COMPLETION_DELAY: Duration = Duration::from_secs(1);

/// Files larger than this need explicit confirmation before sending (1 GiB).
pub const LARGE_FILE_THRESHOLD: u64 = 1024 * 1024 * 1024;

/// Length of a room code in characters.
pub const ROOM_CODE_LEN: usize = 6;

/// Alphabet room codes are drawn from.
pub const ROOM_CODE_ALPHABET: &[u8] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ";

/// MIME type used when none is known.
pub const DEFAULT_MIME_TYPE: &str = "application/octet-stream";

/// Discriminator carried in the `type` field of every transfer message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Meta,
    Chunk,
    End,
}

impl MessageKind {
    /// Returns the wire name (`meta`, `chunk`, `end`).
    pub fn as_str(self) -> &'static str {
        match self {
            MessageKind::Meta => "meta",
            MessageKind::Chunk => "chunk",
            MessageKind::End => "end",
        }
    }
}

impl std::fmt::Display for MessageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_kind_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&MessageKind::Chunk).unwrap(),
            "\"chunk\""
        );
        let parsed: MessageKind = serde_json::from_str("\"end\"").unwrap();
        assert_eq!(parsed, MessageKind::End);
    }

    #[test]
    fn alphabet_is_uppercase_alphanumeric() {
        assert_eq!(ROOM_CODE_ALPHABET.len(), 36);
        assert!(
            ROOM_CODE_ALPHABET
                .iter()
                .all(|b| b.is_ascii_digit() || b.is_ascii_uppercase())
        );
    }
}
