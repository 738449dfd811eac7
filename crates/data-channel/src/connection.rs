//! A framed TCP stream exposed as a [`Channel`].
//!
//! The channel exists before its socket: [`TcpChannel::pending`] hands out
//! a handle right away and [`TcpChannel::attach`] starts the pumps once the
//! handshake has succeeded. Outbound messages go through an unbounded queue
//! drained by a write pump; a read pump turns inbound frames into
//! `Data` events. A local close still flushes the queue before the stream
//! is shut down, and `ChannelClosed` follows the flush.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use roomdrop_protocol::TransferMessage;
use tokio::io::{AsyncWriteExt, BufReader, BufWriter};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::TCP_BUFFER_SIZE;
use crate::channel::{Channel, ChannelId, EventSender, ProviderEvent};
use crate::error::DataChannelError;
use crate::wire::{read_message, write_message};

/// State shared between the handle and its pump tasks.
#[derive(Debug)]
struct Shared {
    id: ChannelId,
    open: AtomicBool,
    /// Set once `ChannelClosed` has been emitted.
    announced: AtomicBool,
    /// Set once a write pump owns the close announcement.
    pumping: AtomicBool,
    buffered: AtomicUsize,
    cancel: CancellationToken,
    events: EventSender,
}

impl Shared {
    /// Stops reading and refuses new sends. A running write pump still
    /// flushes what is queued and announces the close when done.
    fn close(&self) {
        self.open.store(false, Ordering::SeqCst);
        self.cancel.cancel();
        if !self.pumping.load(Ordering::SeqCst) {
            self.announce_closed();
        }
    }

    fn fail(&self, message: String) {
        if !self.cancel.is_cancelled() {
            warn!(channel = %self.id, error = %message, "TCP channel failed");
            let _ = self.events.send(ProviderEvent::ChannelError {
                channel: self.id,
                message,
            });
        }
        self.close();
    }

    fn announce_closed(&self) {
        if !self.announced.swap(true, Ordering::SeqCst) {
            debug!(channel = %self.id, "TCP channel closed");
            let _ = self
                .events
                .send(ProviderEvent::ChannelClosed { channel: self.id });
        }
    }
}

/// Channel endpoint backed by a TCP connection.
#[derive(Debug)]
pub struct TcpChannel {
    shared: Arc<Shared>,
    peer: String,
    outbox: mpsc::UnboundedSender<TransferMessage>,
    inbox: Mutex<Option<mpsc::UnboundedReceiver<TransferMessage>>>,
}

impl TcpChannel {
    /// Creates a channel that is not yet connected.
    pub(crate) fn pending(
        peer: impl Into<String>,
        events: EventSender,
        cancel: CancellationToken,
    ) -> Arc<Self> {
        let (outbox, inbox) = mpsc::unbounded_channel();
        Arc::new(Self {
            shared: Arc::new(Shared {
                id: ChannelId::next(),
                open: AtomicBool::new(false),
                announced: AtomicBool::new(false),
                pumping: AtomicBool::new(false),
                buffered: AtomicUsize::new(0),
                cancel,
                events,
            }),
            peer: peer.into(),
            outbox,
            inbox: Mutex::new(Some(inbox)),
        })
    }

    /// Binds the channel to a handshaken connection and starts its pumps.
    ///
    /// `incoming` channels announce themselves with `IncomingChannel`
    /// before `ChannelOpen`.
    pub(crate) fn attach(
        self: &Arc<Self>,
        reader: BufReader<OwnedReadHalf>,
        writer: OwnedWriteHalf,
        incoming: bool,
    ) {
        let Some(inbox) = self
            .inbox
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        else {
            warn!(channel = %self.shared.id, "channel already attached");
            return;
        };
        self.shared.pumping.store(true, Ordering::SeqCst);
        if self.shared.cancel.is_cancelled() {
            self.shared.announce_closed();
            return;
        }

        self.shared.open.store(true, Ordering::SeqCst);
        if incoming {
            let _ = self
                .shared
                .events
                .send(ProviderEvent::IncomingChannel(self.clone()));
        }
        let _ = self.shared.events.send(ProviderEvent::ChannelOpen {
            channel: self.shared.id,
            peer: self.peer.clone(),
        });
        debug!(channel = %self.shared.id, peer = %self.peer, incoming, "TCP channel open");

        tokio::spawn(write_pump(self.shared.clone(), inbox, writer));
        tokio::spawn(read_pump(self.shared.clone(), reader));
    }
}

impl Channel for TcpChannel {
    fn id(&self) -> ChannelId {
        self.shared.id
    }

    fn peer(&self) -> &str {
        &self.peer
    }

    fn send(&self, message: TransferMessage) -> Result<(), DataChannelError> {
        if !self.is_open() {
            return Err(DataChannelError::Closed);
        }
        let len = message.payload_len();
        self.shared.buffered.fetch_add(len, Ordering::SeqCst);
        self.outbox.send(message).map_err(|_| {
            self.shared.buffered.fetch_sub(len, Ordering::SeqCst);
            DataChannelError::Closed
        })
    }

    fn buffered_amount(&self) -> usize {
        self.shared.buffered.load(Ordering::SeqCst)
    }

    fn is_open(&self) -> bool {
        self.shared.open.load(Ordering::SeqCst)
    }

    fn close(&self) {
        self.shared.close();
    }
}

async fn write_pump(
    shared: Arc<Shared>,
    mut inbox: mpsc::UnboundedReceiver<TransferMessage>,
    writer: OwnedWriteHalf,
) {
    let mut writer = BufWriter::with_capacity(TCP_BUFFER_SIZE, writer);

    loop {
        let first = tokio::select! {
            biased;
            next = inbox.recv() => match next {
                Some(message) => message,
                // Every handle dropped: finish the stream.
                None => break,
            },
            // Only reached with an empty queue, so a close never drops data.
            _ = shared.cancel.cancelled() => break,
        };

        if let Err(e) = write_batch(&shared, first, &mut inbox, &mut writer).await {
            shared.fail(format!("write failed: {e}"));
            shared.announce_closed();
            return;
        }
    }

    let _ = writer.shutdown().await;
    shared.announce_closed();
}

/// Writes `first` and everything already queued behind it, then flushes.
async fn write_batch(
    shared: &Shared,
    first: TransferMessage,
    inbox: &mut mpsc::UnboundedReceiver<TransferMessage>,
    writer: &mut BufWriter<OwnedWriteHalf>,
) -> Result<(), DataChannelError> {
    let mut next = Some(first);
    while let Some(message) = next {
        let len = message.payload_len();
        let result = write_message(writer, &message).await;
        shared.buffered.fetch_sub(len, Ordering::SeqCst);
        result?;
        next = inbox.try_recv().ok();
    }
    writer.flush().await?;
    Ok(())
}

async fn read_pump(shared: Arc<Shared>, mut reader: BufReader<OwnedReadHalf>) {
    loop {
        let next = tokio::select! {
            biased;
            _ = shared.cancel.cancelled() => break,
            next = read_message(&mut reader) => next,
        };

        match next {
            Ok(Some(message)) => {
                let _ = shared.events.send(ProviderEvent::Data {
                    channel: shared.id,
                    message,
                });
            }
            Ok(None) => {
                debug!(channel = %shared.id, "peer finished the stream");
                break;
            }
            Err(e) => {
                shared.fail(format!("read failed: {e}"));
                return;
            }
        }
    }
    shared.close();
}
