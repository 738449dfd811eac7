//! Sending side: frames one file as `Meta`, `Chunk*`, `End` and paces the
//! chunks against the channel's buffered-bytes gauge.

use std::fmt;
use std::path::Path;
use std::time::Duration;

use roomdrop_data_channel::{Channel, DataChannelError};
use roomdrop_protocol::{FileMeta, TransferMessage};
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::{debug, info, trace, warn};

use crate::mime::{mime_from_name, mime_from_path};
use crate::progress::ProgressReporter;
use crate::{TransferConfig, TransferError};

/// What to do before queuing the next chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pacing {
    /// Yield to the scheduler, then send.
    Immediate,
    /// The channel is saturated; check again after this long.
    Cooldown(Duration),
}

/// Pacing decision for a channel holding `buffered` unsent bytes.
pub fn pacing(buffered: usize, config: &TransferConfig) -> Pacing {
    if buffered > config.high_water_mark {
        Pacing::Cooldown(config.cooldown)
    } else {
        Pacing::Immediate
    }
}

/// How a send ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// `End` was queued after all `bytes`.
    Completed { bytes: u64 },
    /// The channel closed first; `sent` bytes had been queued.
    Aborted { sent: u64 },
}

/// A file to send: its metadata plus a reader positioned at byte 0.
pub struct FileSource {
    meta: FileMeta,
    reader: Box<dyn AsyncRead + Send + Unpin>,
}

impl fmt::Debug for FileSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileSource")
            .field("meta", &self.meta)
            .finish_non_exhaustive()
    }
}

impl FileSource {
    /// Wraps any reader. It must yield exactly `meta.size` bytes.
    pub fn new(meta: FileMeta, reader: impl AsyncRead + Send + Unpin + 'static) -> Self {
        Self {
            meta,
            reader: Box::new(reader),
        }
    }

    /// In-memory file. The MIME type is inferred from `name` when not given.
    pub fn from_bytes(name: impl Into<String>, bytes: Vec<u8>, mime_type: Option<&str>) -> Self {
        let name = name.into();
        let mime = mime_type.unwrap_or_else(|| mime_from_name(&name));
        let meta = FileMeta::new(name.clone(), bytes.len() as u64, mime);
        Self::new(meta, std::io::Cursor::new(bytes))
    }

    /// Opens a file on disk. The MIME type is inferred from its extension.
    pub async fn open(path: &Path) -> Result<Self, TransferError> {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| TransferError::InvalidName(path.display().to_string()))?;
        let file = tokio::fs::File::open(path).await?;
        let metadata = file.metadata().await?;
        if !metadata.is_file() {
            return Err(TransferError::InvalidName(format!(
                "not a regular file: {}",
                path.display()
            )));
        }
        let meta = FileMeta::new(name, metadata.len(), mime_from_path(path));
        Ok(Self::new(meta, file))
    }

    pub fn meta(&self) -> &FileMeta {
        &self.meta
    }
}

/// Checks that a send may start.
///
/// Refuses when the channel is not open, and for files above the
/// large-file threshold unless `confirmed`.
pub fn preflight(
    channel: &dyn Channel,
    meta: &FileMeta,
    config: &TransferConfig,
    confirmed: bool,
) -> Result<(), TransferError> {
    if !channel.is_open() {
        return Err(TransferError::ChannelNotOpen);
    }
    if meta.size > config.large_file_threshold && !confirmed {
        return Err(TransferError::LargeFileNotConfirmed {
            size: meta.size,
            threshold: config.large_file_threshold,
        });
    }
    Ok(())
}

/// Streams one file over `channel`.
///
/// Chunk N+1 is read only after chunk N was queued. If the channel closes
/// mid-file the send stops quietly and reports [`SendOutcome::Aborted`];
/// no `End` is sent for a partial file.
pub async fn send_file(
    channel: &dyn Channel,
    mut source: FileSource,
    config: &TransferConfig,
    progress: &ProgressReporter,
) -> Result<SendOutcome, TransferError> {
    config.validate()?;
    let meta = source.meta.clone();
    let total = meta.size;

    if !queue(channel, TransferMessage::Meta(meta.clone()))? {
        debug!(name = %meta.name, "channel not open, nothing sent");
        return Ok(SendOutcome::Aborted { sent: 0 });
    }
    info!(
        name = %meta.name,
        size = total,
        chunks = meta.chunk_count(config.chunk_size),
        "sending file"
    );
    progress.start(total);

    let mut offset: u64 = 0;
    while offset < total {
        if !channel.is_open() {
            warn!(name = %meta.name, sent = offset, "channel closed mid-file");
            return Ok(SendOutcome::Aborted { sent: offset });
        }
        match pacing(channel.buffered_amount(), config) {
            Pacing::Cooldown(wait) => {
                trace!(buffered = channel.buffered_amount(), "backpressure, cooling down");
                tokio::time::sleep(wait).await;
                continue;
            }
            Pacing::Immediate => tokio::task::yield_now().await,
        }

        let len = (total - offset).min(config.chunk_size as u64) as usize;
        let mut data = vec![0u8; len];
        source.reader.read_exact(&mut data).await?;
        if !queue(channel, TransferMessage::Chunk { data })? {
            warn!(name = %meta.name, sent = offset, "channel closed mid-file");
            return Ok(SendOutcome::Aborted { sent: offset });
        }
        offset += len as u64;
        progress.advance_to(offset);
    }

    if !queue(channel, TransferMessage::End)? {
        return Ok(SendOutcome::Aborted { sent: offset });
    }
    progress.finish();
    info!(name = %meta.name, size = total, "file sent");
    Ok(SendOutcome::Completed { bytes: total })
}

/// Queues a message. `Ok(false)` means the channel is closed.
fn queue(channel: &dyn Channel, message: TransferMessage) -> Result<bool, TransferError> {
    match channel.send(message) {
        Ok(()) => Ok(true),
        Err(DataChannelError::Closed) => Ok(false),
        Err(e) => Err(e.into()),
    }
}
