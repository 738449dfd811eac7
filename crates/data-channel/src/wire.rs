//! TCP wire format for roomdrop channels.
//!
//! # Wire format
//!
//! ```text
//! HANDSHAKE (dialer -> listener):
//!   [6 bytes: room code ASCII]
//!   [1 byte: id_len][id_len bytes: dialer identifier UTF-8]
//! STATUS (listener -> dialer):  [1 byte: 0x01=accepted, 0x00=peer unavailable]
//!
//! FRAMES (both directions):
//!   [1 byte: tag][4 bytes BE: payload_len][payload_len bytes]
//!   tag 0x01 meta   payload = JSON {"type":"meta","name","size","mimeType"}
//!   tag 0x02 chunk  payload = raw file bytes
//!   tag 0x03 end    payload = empty
//! ```

use roomdrop_protocol::constants::ROOM_CODE_LEN;
use roomdrop_protocol::TransferMessage;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::DataChannelError;

/// Handshake response: room matched, channel accepted.
pub const STATUS_ACCEPTED: u8 = 0x01;

/// Handshake response: no such room on this listener.
pub const STATUS_UNAVAILABLE: u8 = 0x00;

pub const TAG_META: u8 = 0x01;
pub const TAG_CHUNK: u8 = 0x02;
pub const TAG_END: u8 = 0x03;

/// Largest payload accepted in a single frame (16 MiB).
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// Writes one transfer message as a frame.
pub async fn write_message<W: AsyncWrite + Unpin>(
    writer: &mut W,
    message: &TransferMessage,
) -> Result<(), DataChannelError> {
    match message {
        TransferMessage::Meta(_) => {
            let json = message
                .to_json()
                .map_err(|e| DataChannelError::Protocol(format!("encoding meta: {e}")))?;
            write_frame(writer, TAG_META, json.as_bytes()).await
        }
        TransferMessage::Chunk { data } => write_frame(writer, TAG_CHUNK, data).await,
        TransferMessage::End => write_frame(writer, TAG_END, &[]).await,
    }
}

async fn write_frame<W: AsyncWrite + Unpin>(
    writer: &mut W,
    tag: u8,
    payload: &[u8],
) -> Result<(), DataChannelError> {
    if payload.len() > MAX_FRAME_LEN {
        return Err(DataChannelError::Protocol(format!(
            "frame too large: {} bytes (max {MAX_FRAME_LEN})",
            payload.len()
        )));
    }
    writer.write_u8(tag).await?;
    writer.write_u32(payload.len() as u32).await?;
    writer.write_all(payload).await?;
    Ok(())
}

/// Reads the next message.
///
/// Returns `None` if the stream ends cleanly at a frame boundary.
pub async fn read_message<R: AsyncRead + Unpin>(
    reader: &mut R,
) -> Result<Option<TransferMessage>, DataChannelError> {
    let tag = match reader.read_u8().await {
        Ok(tag) => tag,
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    let len = reader.read_u32().await? as usize;
    if len > MAX_FRAME_LEN {
        return Err(DataChannelError::Protocol(format!(
            "frame too large: {len} bytes (max {MAX_FRAME_LEN})"
        )));
    }

    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await?;

    let message = match tag {
        TAG_META => {
            let json = std::str::from_utf8(&payload)
                .map_err(|e| DataChannelError::Protocol(format!("invalid meta frame: {e}")))?;
            match TransferMessage::from_json(json) {
                Ok(meta @ TransferMessage::Meta(_)) => meta,
                Ok(other) => {
                    return Err(DataChannelError::Protocol(format!(
                        "meta frame carries a {} record",
                        other.kind()
                    )));
                }
                Err(e) => {
                    return Err(DataChannelError::Protocol(format!("invalid meta frame: {e}")));
                }
            }
        }
        TAG_CHUNK => TransferMessage::Chunk { data: payload },
        TAG_END => {
            if !payload.is_empty() {
                return Err(DataChannelError::Protocol(format!(
                    "end frame carries {len} unexpected bytes"
                )));
            }
            TransferMessage::End
        }
        other => {
            return Err(DataChannelError::Protocol(format!(
                "unknown frame tag 0x{other:02x}"
            )));
        }
    };
    Ok(Some(message))
}

/// Writes the dialer's handshake: target room code plus own identifier.
pub async fn write_handshake<W: AsyncWrite + Unpin>(
    writer: &mut W,
    room_code: &str,
    dialer_id: &str,
) -> Result<(), DataChannelError> {
    if room_code.len() != ROOM_CODE_LEN {
        return Err(DataChannelError::Protocol(format!(
            "room code must be {ROOM_CODE_LEN} bytes, got {}",
            room_code.len()
        )));
    }
    let id = dialer_id.as_bytes();
    if id.is_empty() || id.len() > u8::MAX as usize {
        return Err(DataChannelError::Protocol(format!(
            "identifier must be 1..=255 bytes, got {}",
            id.len()
        )));
    }
    writer.write_all(room_code.as_bytes()).await?;
    writer.write_u8(id.len() as u8).await?;
    writer.write_all(id).await?;
    writer.flush().await?;
    Ok(())
}

/// Reads a handshake, returning `(room_code, dialer_id)`.
pub async fn read_handshake<R: AsyncRead + Unpin>(
    reader: &mut R,
) -> Result<(String, String), DataChannelError> {
    let mut code = [0u8; ROOM_CODE_LEN];
    reader.read_exact(&mut code).await?;
    let code = String::from_utf8(code.to_vec())
        .map_err(|e| DataChannelError::Protocol(format!("invalid room code encoding: {e}")))?;

    let id_len = reader.read_u8().await? as usize;
    if id_len == 0 {
        return Err(DataChannelError::Protocol("empty dialer identifier".into()));
    }
    let mut id = vec![0u8; id_len];
    reader.read_exact(&mut id).await?;
    let id = String::from_utf8(id)
        .map_err(|e| DataChannelError::Protocol(format!("invalid identifier encoding: {e}")))?;

    Ok((code, id))
}

/// Writes the handshake status byte.
pub async fn write_status<W: AsyncWrite + Unpin>(
    writer: &mut W,
    accepted: bool,
) -> Result<(), DataChannelError> {
    writer
        .write_u8(if accepted {
            STATUS_ACCEPTED
        } else {
            STATUS_UNAVAILABLE
        })
        .await?;
    writer.flush().await?;
    Ok(())
}

/// Reads the handshake status byte.
pub async fn read_status<R: AsyncRead + Unpin>(reader: &mut R) -> Result<bool, DataChannelError> {
    let byte = reader.read_u8().await?;
    Ok(byte == STATUS_ACCEPTED)
}

#[cfg(test)]
mod tests {
    use roomdrop_protocol::FileMeta;

    use super::*;

    #[tokio::test]
    async fn meta_frame_layout() {
        let meta = FileMeta::new("a.txt", 3, "text/plain");
        let mut buf = Vec::new();
        write_message(&mut buf, &TransferMessage::Meta(meta.clone()))
            .await
            .unwrap();
        assert_eq!(buf[0], TAG_META);
        let len = u32::from_be_bytes([buf[1], buf[2], buf[3], buf[4]]) as usize;
        assert_eq!(len, buf.len() - 5);
        let json: serde_json::Value = serde_json::from_slice(&buf[5..]).unwrap();
        assert_eq!(json["type"], "meta");
        assert_eq!(json["mimeType"], "text/plain");

        let mut cursor = &buf[..];
        let parsed = read_message(&mut cursor).await.unwrap().unwrap();
        assert_eq!(parsed, TransferMessage::Meta(meta));
    }

    #[tokio::test]
    async fn chunk_payload_is_raw() {
        let mut buf = Vec::new();
        write_message(&mut buf, &TransferMessage::chunk(b"abc".to_vec()))
            .await
            .unwrap();
        assert_eq!(buf, vec![TAG_CHUNK, 0, 0, 0, 3, b'a', b'b', b'c']);
    }

    #[tokio::test]
    async fn full_file_sequence_then_eof() {
        let messages = vec![
            TransferMessage::Meta(FileMeta::new("f.bin", 4, "")),
            TransferMessage::chunk(vec![1, 2]),
            TransferMessage::chunk(vec![3, 4]),
            TransferMessage::End,
        ];
        let mut buf = Vec::new();
        for m in &messages {
            write_message(&mut buf, m).await.unwrap();
        }

        let mut cursor = &buf[..];
        for expected in &messages {
            let got = read_message(&mut cursor).await.unwrap().unwrap();
            assert_eq!(&got, expected);
        }
        assert!(read_message(&mut cursor).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn truncated_frame_is_error() {
        let buf = vec![TAG_CHUNK, 0, 0, 0, 10, 1, 2];
        let mut cursor = &buf[..];
        assert!(read_message(&mut cursor).await.is_err());
    }

    #[tokio::test]
    async fn meta_frame_must_hold_a_meta_record() {
        let json = br#"{"type":"end"}"#;
        let mut buf = vec![TAG_META];
        buf.extend_from_slice(&(json.len() as u32).to_be_bytes());
        buf.extend_from_slice(json);

        let mut cursor = &buf[..];
        assert!(matches!(
            read_message(&mut cursor).await,
            Err(DataChannelError::Protocol(_))
        ));
    }

    #[tokio::test]
    async fn unknown_tag_rejected() {
        let buf = vec![0x7f, 0, 0, 0, 0];
        let mut cursor = &buf[..];
        assert!(matches!(
            read_message(&mut cursor).await,
            Err(DataChannelError::Protocol(_))
        ));
    }

    #[tokio::test]
    async fn oversized_length_rejected() {
        let len = (MAX_FRAME_LEN as u32 + 1).to_be_bytes();
        let buf = vec![TAG_CHUNK, len[0], len[1], len[2], len[3]];
        let mut cursor = &buf[..];
        assert!(matches!(
            read_message(&mut cursor).await,
            Err(DataChannelError::Protocol(_))
        ));
    }

    #[tokio::test]
    async fn handshake_roundtrip() {
        let mut buf = Vec::new();
        write_handshake(&mut buf, "X7K2QP", "guest-42").await.unwrap();
        let mut cursor = &buf[..];
        let (code, id) = read_handshake(&mut cursor).await.unwrap();
        assert_eq!(code, "X7K2QP");
        assert_eq!(id, "guest-42");
    }

    #[tokio::test]
    async fn handshake_rejects_bad_code_length() {
        let mut buf = Vec::new();
        assert!(write_handshake(&mut buf, "SHORT", "guest").await.is_err());
    }

    #[tokio::test]
    async fn status_bytes() {
        let mut buf = Vec::new();
        write_status(&mut buf, true).await.unwrap();
        write_status(&mut buf, false).await.unwrap();
        assert_eq!(buf, vec![STATUS_ACCEPTED, STATUS_UNAVAILABLE]);

        let mut cursor = &buf[..];
        assert!(read_status(&mut cursor).await.unwrap());
        assert!(!read_status(&mut cursor).await.unwrap());
    }
}
