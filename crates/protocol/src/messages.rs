use serde::{Deserialize, Serialize};

use crate::constants::{DEFAULT_MIME_TYPE, MessageKind};

/// Describes the file that is about to be streamed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileMeta {
    pub name: String,
    pub size: u64,
    #[serde(default = "default_mime_type")]
    pub mime_type: String,
}

impl FileMeta {
    /// Creates metadata, normalizing an empty MIME type to the default.
    pub fn new(name: impl Into<String>, size: u64, mime_type: impl Into<String>) -> Self {
        let mime_type = mime_type.into();
        Self {
            name: name.into(),
            size,
            mime_type: if mime_type.trim().is_empty() {
                DEFAULT_MIME_TYPE.to_string()
            } else {
                mime_type
            },
        }
    }

    /// Number of `chunk` messages needed for this file at `chunk_size`.
    pub fn chunk_count(&self, chunk_size: usize) -> u64 {
        if chunk_size == 0 {
            return 0;
        }
        self.size.div_ceil(chunk_size as u64)
    }
}

fn default_mime_type() -> String {
    DEFAULT_MIME_TYPE.to_string()
}

/// One message of the per-file transfer sequence.
///
/// For every file the receiver observes exactly one `Meta`, then the
/// `Chunk`s in slicing order, then exactly one `End`.
///
/// In JSON the variant is carried in a `type` field and chunk data is
/// base64-encoded. Binary transports frame the chunk bytes raw.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum TransferMessage {
    Meta(FileMeta),
    Chunk {
        #[serde(with = "base64_bytes")]
        data: Vec<u8>,
    },
    End,
}

impl TransferMessage {
    /// Creates a `chunk` message.
    pub fn chunk(data: impl Into<Vec<u8>>) -> Self {
        TransferMessage::Chunk { data: data.into() }
    }

    /// Returns the wire discriminator of this message.
    pub fn kind(&self) -> MessageKind {
        match self {
            TransferMessage::Meta(_) => MessageKind::Meta,
            TransferMessage::Chunk { .. } => MessageKind::Chunk,
            TransferMessage::End => MessageKind::End,
        }
    }

    /// Payload bytes carried by the message (chunk data only).
    pub fn payload_len(&self) -> usize {
        match self {
            TransferMessage::Chunk { data } => data.len(),
            _ => 0,
        }
    }

    /// Serializes to the self-describing JSON record.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Parses a self-describing JSON record.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

/// Serde helper for encoding `Vec<u8>` as base64 in JSON.
mod base64_bytes {
    use base64::{Engine, engine::general_purpose::STANDARD};
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(data: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        STANDARD.encode(data).serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        STANDARD.decode(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn meta_json_shape() {
        let msg = TransferMessage::Meta(FileMeta::new("photo.jpg", 1234, "image/jpeg"));
        let json: serde_json::Value = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "meta");
        assert_eq!(json["name"], "photo.jpg");
        assert_eq!(json["size"], 1234);
        assert_eq!(json["mimeType"], "image/jpeg");
    }

    #[test]
    fn chunk_data_is_base64() {
        let msg = TransferMessage::chunk(b"Hello".to_vec());
        let json = msg.to_json().unwrap();
        assert!(json.contains("\"type\":\"chunk\""));
        assert!(json.contains("SGVsbG8="));
        assert_eq!(TransferMessage::from_json(&json).unwrap(), msg);
    }

    #[test]
    fn end_has_only_type() {
        let json = TransferMessage::End.to_json().unwrap();
        assert_eq!(json, r#"{"type":"end"}"#);
        assert_eq!(
            TransferMessage::from_json(r#"{"type":"end"}"#).unwrap(),
            TransferMessage::End
        );
    }

    #[test]
    fn meta_without_mime_gets_default() {
        let msg = TransferMessage::from_json(r#"{"type":"meta","name":"a","size":3}"#).unwrap();
        match msg {
            TransferMessage::Meta(meta) => assert_eq!(meta.mime_type, DEFAULT_MIME_TYPE),
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn empty_mime_is_normalized() {
        let meta = FileMeta::new("notes", 10, "  ");
        assert_eq!(meta.mime_type, DEFAULT_MIME_TYPE);
    }

    #[test]
    fn unknown_type_rejected() {
        assert!(TransferMessage::from_json(r#"{"type":"resume"}"#).is_err());
    }

    #[test]
    fn chunk_count_rounds_up() {
        let chunk = 64 * 1024;
        assert_eq!(FileMeta::new("a", 0, "").chunk_count(chunk), 0);
        assert_eq!(FileMeta::new("a", 1, "").chunk_count(chunk), 1);
        assert_eq!(FileMeta::new("a", chunk as u64, "").chunk_count(chunk), 1);
        assert_eq!(FileMeta::new("a", chunk as u64 + 1, "").chunk_count(chunk), 2);
    }

    #[test]
    fn kind_and_payload_len() {
        assert_eq!(TransferMessage::End.kind(), MessageKind::End);
        assert_eq!(TransferMessage::chunk(vec![0u8; 7]).payload_len(), 7);
        assert_eq!(
            TransferMessage::Meta(FileMeta::new("a", 9, "")).payload_len(),
            0
        );
    }
}
