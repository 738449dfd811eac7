//! Rebuilds files from the `Meta`, `Chunk*`, `End` message stream.

use roomdrop_protocol::{FileMeta, TransferMessage};
use tracing::{debug, info, warn};

use crate::progress::{ProgressReporter, TransferProgress};
use crate::registry::{CompletedFile, CompletedFileRegistry};

/// Upper bound on the buffer reserved up front from `meta.size`.
const MAX_PREALLOC: u64 = 64 * 1024 * 1024;

/// Where the assembler is within the current file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssemblerState {
    WaitingForMeta,
    Accumulating,
}

/// A message that does not fit the per-file message order.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolViolation {
    #[error("chunk received before any file metadata")]
    ChunkWithoutMeta,

    #[error("end received before any file metadata")]
    EndWithoutMeta,

    #[error("{name}: received {received} bytes, more than the announced {expected}")]
    Overflow {
        name: String,
        expected: u64,
        received: u64,
    },

    #[error("{name}: ended after {received} of {expected} bytes")]
    SizeMismatch {
        name: String,
        expected: u64,
        received: u64,
    },
}

/// Outcome of feeding one message to the assembler.
#[derive(Debug, Clone, PartialEq)]
pub enum Received {
    /// A new file started. `interrupted` names a partial file that was
    /// dropped to make room for it.
    Started {
        meta: FileMeta,
        interrupted: Option<String>,
    },
    /// Bytes were appended to the current file.
    Progress(TransferProgress),
    /// The file is complete and stored in the registry at `index`.
    Completed { index: usize },
    /// The message was discarded.
    Discarded(ProtocolViolation),
}

struct Incoming {
    meta: FileMeta,
    buf: Vec<u8>,
}

/// Receive-side accumulator. Owns the registry of completed files.
pub struct ReceiveAssembler {
    current: Option<Incoming>,
    registry: CompletedFileRegistry,
    progress: ProgressReporter,
}

impl Default for ReceiveAssembler {
    fn default() -> Self {
        Self::new()
    }
}

impl ReceiveAssembler {
    pub fn new() -> Self {
        Self {
            current: None,
            registry: CompletedFileRegistry::new(),
            progress: ProgressReporter::new(),
        }
    }

    pub fn state(&self) -> AssemblerState {
        if self.current.is_some() {
            AssemblerState::Accumulating
        } else {
            AssemblerState::WaitingForMeta
        }
    }

    pub fn registry(&self) -> &CompletedFileRegistry {
        &self.registry
    }

    pub fn progress(&self) -> &ProgressReporter {
        &self.progress
    }

    /// Feeds one message.
    pub fn handle(&mut self, message: TransferMessage) -> Received {
        match message {
            TransferMessage::Meta(meta) => self.on_meta(meta),
            TransferMessage::Chunk { data } => self.on_chunk(data),
            TransferMessage::End => self.on_end(),
        }
    }

    fn on_meta(&mut self, meta: FileMeta) -> Received {
        let interrupted = self.current.take().map(|partial| {
            warn!(
                name = %partial.meta.name,
                received = partial.buf.len(),
                expected = partial.meta.size,
                "new file started before the previous one ended; discarding partial"
            );
            partial.meta.name
        });

        info!(name = %meta.name, size = meta.size, mime = %meta.mime_type, "receiving file");
        let capacity = meta.size.min(MAX_PREALLOC) as usize;
        self.current = Some(Incoming {
            meta: meta.clone(),
            buf: Vec::with_capacity(capacity),
        });
        self.progress.start(meta.size);
        Received::Started { meta, interrupted }
    }

    fn on_chunk(&mut self, data: Vec<u8>) -> Received {
        let Some(incoming) = self.current.as_mut() else {
            return self.violation(ProtocolViolation::ChunkWithoutMeta);
        };

        let received = incoming.buf.len() as u64 + data.len() as u64;
        if received > incoming.meta.size {
            let violation = ProtocolViolation::Overflow {
                name: incoming.meta.name.clone(),
                expected: incoming.meta.size,
                received,
            };
            self.current = None;
            self.progress.reset();
            return self.violation(violation);
        }

        incoming.buf.extend_from_slice(&data);
        self.progress.advance_to(received);
        Received::Progress(self.progress.current())
    }

    fn on_end(&mut self) -> Received {
        let Some(incoming) = self.current.take() else {
            return self.violation(ProtocolViolation::EndWithoutMeta);
        };

        let received = incoming.buf.len() as u64;
        if received != incoming.meta.size {
            self.progress.reset();
            return self.violation(ProtocolViolation::SizeMismatch {
                name: incoming.meta.name,
                expected: incoming.meta.size,
                received,
            });
        }

        self.progress.finish();
        let file = CompletedFile::new(incoming.meta, incoming.buf);
        debug!(name = %file.name(), size = file.size(), "file complete");
        let index = self.registry.push(file);
        Received::Completed { index }
    }

    fn violation(&self, violation: ProtocolViolation) -> Received {
        warn!(%violation, "discarding message");
        Received::Discarded(violation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(name: &str, size: u64) -> TransferMessage {
        TransferMessage::Meta(FileMeta::new(name, size, "application/octet-stream"))
    }

    fn feed_file(
        assembler: &mut ReceiveAssembler,
        name: &str,
        bytes: &[u8],
        chunk: usize,
    ) -> Received {
        assembler.handle(meta(name, bytes.len() as u64));
        for piece in bytes.chunks(chunk) {
            assembler.handle(TransferMessage::chunk(piece.to_vec()));
        }
        assembler.handle(TransferMessage::End)
    }

    #[test]
    fn reassembles_in_order() {
        let mut assembler = ReceiveAssembler::new();
        let data: Vec<u8> = (0..1000u32).map(|i| (i % 251) as u8).collect();

        let outcome = feed_file(&mut assembler, "data.bin", &data, 64);
        assert_eq!(outcome, Received::Completed { index: 0 });
        assert_eq!(assembler.state(), AssemblerState::WaitingForMeta);

        let file = assembler.registry().get(0).unwrap();
        assert_eq!(file.bytes(), &data[..]);
        assert_eq!(file.size(), 1000);
        assert_eq!(file.name(), "data.bin");
    }

    #[test]
    fn zero_byte_file() {
        let mut assembler = ReceiveAssembler::new();
        assembler.handle(meta("empty", 0));
        assert_eq!(assembler.progress().current().percent(), 0.0);
        assert_eq!(
            assembler.handle(TransferMessage::End),
            Received::Completed { index: 0 }
        );
        let file = assembler.registry().get(0).unwrap();
        assert!(file.bytes().is_empty());
        assert_eq!(assembler.progress().current().percent(), 100.0);
    }

    #[test]
    fn progress_is_monotonic_and_reaches_100() {
        let mut assembler = ReceiveAssembler::new();
        assembler.handle(meta("p.bin", 300));
        let mut last = 0.0;
        for _ in 0..3 {
            match assembler.handle(TransferMessage::chunk(vec![0u8; 100])) {
                Received::Progress(p) => {
                    assert!(p.percent() >= last);
                    last = p.percent();
                }
                other => panic!("unexpected {other:?}"),
            }
        }
        assert_eq!(last, 100.0);
    }

    #[test]
    fn chunk_or_end_without_meta_is_discarded() {
        let mut assembler = ReceiveAssembler::new();
        assert_eq!(
            assembler.handle(TransferMessage::chunk(vec![1, 2])),
            Received::Discarded(ProtocolViolation::ChunkWithoutMeta)
        );
        assert_eq!(
            assembler.handle(TransferMessage::End),
            Received::Discarded(ProtocolViolation::EndWithoutMeta)
        );
        assert!(assembler.registry().is_empty());
    }

    #[test]
    fn short_file_never_completes() {
        let mut assembler = ReceiveAssembler::new();
        assembler.handle(meta("short.bin", 10));
        assembler.handle(TransferMessage::chunk(vec![0u8; 4]));
        assert!(matches!(
            assembler.handle(TransferMessage::End),
            Received::Discarded(ProtocolViolation::SizeMismatch {
                expected: 10,
                received: 4,
                ..
            })
        ));
        assert!(assembler.registry().is_empty());
        assert_eq!(assembler.state(), AssemblerState::WaitingForMeta);
    }

    #[test]
    fn overflow_discards_partial() {
        let mut assembler = ReceiveAssembler::new();
        assembler.handle(meta("tiny", 3));
        assert!(matches!(
            assembler.handle(TransferMessage::chunk(vec![0u8; 4])),
            Received::Discarded(ProtocolViolation::Overflow { .. })
        ));
        assert_eq!(assembler.state(), AssemblerState::WaitingForMeta);
        assert!(matches!(
            assembler.handle(TransferMessage::End),
            Received::Discarded(ProtocolViolation::EndWithoutMeta)
        ));
    }

    #[test]
    fn meta_mid_file_restarts() {
        let mut assembler = ReceiveAssembler::new();
        assembler.handle(meta("first", 10));
        assembler.handle(TransferMessage::chunk(vec![1u8; 5]));

        match assembler.handle(meta("second", 2)) {
            Received::Started { meta, interrupted } => {
                assert_eq!(meta.name, "second");
                assert_eq!(interrupted.as_deref(), Some("first"));
            }
            other => panic!("unexpected {other:?}"),
        }
        assembler.handle(TransferMessage::chunk(vec![9, 9]));
        assembler.handle(TransferMessage::End);

        assert_eq!(assembler.registry().len(), 1);
        assert_eq!(assembler.registry().get(0).unwrap().bytes(), &[9, 9]);
    }

    #[test]
    fn sequential_files_stay_separate() {
        let mut assembler = ReceiveAssembler::new();
        feed_file(&mut assembler, "a.txt", b"alpha", 2);
        feed_file(&mut assembler, "b.txt", b"bravo!", 4);
        feed_file(&mut assembler, "c.txt", b"", 4);

        let files: Vec<_> = assembler
            .registry()
            .iter()
            .map(|f| (f.name().to_string(), f.bytes().to_vec()))
            .collect();
        assert_eq!(
            files,
            vec![
                ("a.txt".to_string(), b"alpha".to_vec()),
                ("b.txt".to_string(), b"bravo!".to_vec()),
                ("c.txt".to_string(), Vec::new()),
            ]
        );
    }

    #[test]
    fn huge_announced_size_does_not_preallocate_everything() {
        let mut assembler = ReceiveAssembler::new();
        assembler.handle(meta("huge.iso", u64::MAX));
        assert_eq!(assembler.state(), AssemblerState::Accumulating);
    }
}
