//! In-process channel provider.
//!
//! A [`MemoryBroker`] plays the role of the rendezvous service: peers
//! register identifiers with it and dial each other by identifier. Each
//! channel endpoint owns a delivery pump task, so `send` returns at once
//! and messages reach the remote event stream in order. A throttled broker
//! delays delivery by payload size, which makes `buffered_amount` grow the
//! way it does on a slow network link.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use roomdrop_protocol::TransferMessage;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::channel::{
    Channel, ChannelHandle, ChannelId, ChannelProvider, ConnectOptions, EventSender,
    ProviderErrorKind, ProviderEvent,
};
use crate::error::DataChannelError;

/// Shared rendezvous point for in-process peers. Cheap to clone.
#[derive(Clone, Default)]
pub struct MemoryBroker {
    inner: Arc<Mutex<BrokerInner>>,
}

#[derive(Default)]
struct BrokerInner {
    peers: HashMap<String, EventSender>,
    /// Delivery rate in bytes per second (`None` = unthrottled).
    throttle: Option<u64>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a broker whose channels deliver at most `bytes_per_second`.
    pub fn throttled(bytes_per_second: u64) -> Self {
        let broker = Self::default();
        broker.lock().throttle = Some(bytes_per_second.max(1));
        broker
    }

    /// Creates a provider for one peer.
    pub fn provider(&self) -> MemoryProvider {
        MemoryProvider {
            broker: self.clone(),
            local: Mutex::new(None),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BrokerInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A single peer's view of a [`MemoryBroker`].
pub struct MemoryProvider {
    broker: MemoryBroker,
    local: Mutex<Option<(String, EventSender)>>,
}

impl MemoryProvider {
    fn local(&self) -> Option<(String, EventSender)> {
        self.local
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl ChannelProvider for MemoryProvider {
    fn register(&self, id: &str, events: EventSender) -> Result<(), DataChannelError> {
        {
            let mut inner = self.broker.lock();
            if inner.peers.get(id).is_some_and(|tx| !tx.is_closed()) {
                warn!(peer = %id, "identifier already registered");
                let _ = events.send(ProviderEvent::Error {
                    kind: ProviderErrorKind::Other,
                    message: format!("identifier {id} is already taken"),
                });
                return Ok(());
            }
            inner.peers.insert(id.to_string(), events.clone());
        }

        *self.local.lock().unwrap_or_else(PoisonError::into_inner) =
            Some((id.to_string(), events.clone()));
        debug!(peer = %id, "registered with memory broker");
        let _ = events.send(ProviderEvent::Registered { id: id.to_string() });
        Ok(())
    }

    fn connect_to(
        &self,
        remote: &str,
        options: ConnectOptions,
    ) -> Result<ChannelHandle, DataChannelError> {
        let (local_id, local_events) = self.local().ok_or(DataChannelError::NotRegistered)?;
        if options != ConnectOptions::RELIABLE_ORDERED {
            debug!(?options, "memory channels are always reliable and ordered");
        }

        let (remote_events, throttle) = {
            let inner = self.broker.lock();
            let tx = inner
                .peers
                .get(remote)
                .filter(|tx| !tx.is_closed())
                .cloned();
            (tx, inner.throttle)
        };

        let Some(remote_events) = remote_events else {
            debug!(peer = %remote, "dialed peer is not registered");
            let _ = local_events.send(ProviderEvent::Error {
                kind: ProviderErrorKind::PeerUnavailable,
                message: format!("could not connect to peer {remote}"),
            });
            return Ok(Arc::new(MemoryChannel::detached(remote)));
        };

        let (local, far) = MemoryChannel::pair(
            (&local_id, local_events.clone()),
            (remote, remote_events.clone()),
            throttle,
        );

        let _ = remote_events.send(ProviderEvent::IncomingChannel(far.clone()));
        let _ = remote_events.send(ProviderEvent::ChannelOpen {
            channel: far.id,
            peer: local_id.clone(),
        });
        let _ = local_events.send(ProviderEvent::ChannelOpen {
            channel: local.id,
            peer: remote.to_string(),
        });
        debug!(from = %local_id, to = %remote, channel = %local.id, "memory channel opened");
        Ok(local)
    }
}

impl Drop for MemoryProvider {
    fn drop(&mut self) {
        if let Some((id, events)) = self.local() {
            let mut inner = self.broker.lock();
            if inner
                .peers
                .get(&id)
                .is_some_and(|tx| tx.same_channel(&events))
            {
                inner.peers.remove(&id);
            }
        }
    }
}

/// State shared by the two endpoints of one memory channel.
///
/// Closing stops new sends at once; `ChannelClosed` reaches both ends only
/// after both delivery pumps have flushed what was already queued.
#[derive(Debug)]
struct Link {
    open: AtomicBool,
    closed: AtomicBool,
    pumps: AtomicUsize,
    closing: CancellationToken,
    ends: Vec<(ChannelId, EventSender)>,
}

impl Link {
    fn close(&self) {
        self.open.store(false, Ordering::SeqCst);
        self.closing.cancel();
        if self.pumps.load(Ordering::SeqCst) == 0 {
            self.announce_closed();
        }
    }

    fn pump_finished(&self) {
        if self.pumps.fetch_sub(1, Ordering::SeqCst) == 1 && self.closing.is_cancelled() {
            self.announce_closed();
        }
    }

    fn announce_closed(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            for (id, tx) in &self.ends {
                let _ = tx.send(ProviderEvent::ChannelClosed { channel: *id });
            }
        }
    }
}

/// One endpoint of an in-process channel.
#[derive(Debug)]
pub struct MemoryChannel {
    id: ChannelId,
    peer: String,
    link: Arc<Link>,
    outbox: Option<mpsc::UnboundedSender<TransferMessage>>,
    buffered: Arc<AtomicUsize>,
}

impl MemoryChannel {
    fn pair(
        a: (&str, EventSender),
        b: (&str, EventSender),
        throttle: Option<u64>,
    ) -> (Arc<Self>, Arc<Self>) {
        let a_id = ChannelId::next();
        let b_id = ChannelId::next();
        let link = Arc::new(Link {
            open: AtomicBool::new(true),
            closed: AtomicBool::new(false),
            pumps: AtomicUsize::new(2),
            closing: CancellationToken::new(),
            ends: vec![(a_id, a.1.clone()), (b_id, b.1.clone())],
        });

        let a_end = Self::endpoint(a_id, b.0, Arc::clone(&link), (b_id, b.1), throttle);
        let b_end = Self::endpoint(b_id, a.0, link, (a_id, a.1), throttle);
        (a_end, b_end)
    }

    fn endpoint(
        id: ChannelId,
        peer: &str,
        link: Arc<Link>,
        remote: (ChannelId, EventSender),
        throttle: Option<u64>,
    ) -> Arc<Self> {
        let (tx, rx) = mpsc::unbounded_channel();
        let buffered = Arc::new(AtomicUsize::new(0));
        tokio::spawn(deliver(
            rx,
            Arc::clone(&link),
            remote,
            Arc::clone(&buffered),
            throttle,
        ));
        Arc::new(Self {
            id,
            peer: peer.to_string(),
            link,
            outbox: Some(tx),
            buffered,
        })
    }

    /// A channel to a peer that was never reached. Never opens.
    fn detached(peer: &str) -> Self {
        Self {
            id: ChannelId::next(),
            peer: peer.to_string(),
            link: Arc::new(Link {
                open: AtomicBool::new(false),
                closed: AtomicBool::new(true),
                pumps: AtomicUsize::new(0),
                closing: CancellationToken::new(),
                ends: Vec::new(),
            }),
            outbox: None,
            buffered: Arc::new(AtomicUsize::new(0)),
        }
    }
}

impl Channel for MemoryChannel {
    fn id(&self) -> ChannelId {
        self.id
    }

    fn peer(&self) -> &str {
        &self.peer
    }

    fn send(&self, message: TransferMessage) -> Result<(), DataChannelError> {
        if !self.is_open() {
            return Err(DataChannelError::Closed);
        }
        let outbox = self.outbox.as_ref().ok_or(DataChannelError::Closed)?;
        let len = message.payload_len();
        self.buffered.fetch_add(len, Ordering::SeqCst);
        outbox.send(message).map_err(|_| {
            self.buffered.fetch_sub(len, Ordering::SeqCst);
            DataChannelError::Closed
        })
    }

    fn buffered_amount(&self) -> usize {
        self.buffered.load(Ordering::SeqCst)
    }

    fn is_open(&self) -> bool {
        self.link.open.load(Ordering::SeqCst)
    }

    fn close(&self) {
        self.link.close();
    }
}

/// Moves queued messages to the remote event stream, in order.
///
/// Once the link is closing the pump keeps going until the queue is empty.
async fn deliver(
    mut rx: mpsc::UnboundedReceiver<TransferMessage>,
    link: Arc<Link>,
    remote: (ChannelId, EventSender),
    buffered: Arc<AtomicUsize>,
    throttle: Option<u64>,
) {
    let (remote_id, remote_events) = remote;
    loop {
        let message = tokio::select! {
            biased;
            next = rx.recv() => match next {
                Some(message) => message,
                None => break,
            },
            _ = link.closing.cancelled() => break,
        };

        let len = message.payload_len();
        if let Some(rate) = throttle
            && len > 0
        {
            tokio::time::sleep(Duration::from_secs_f64(len as f64 / rate as f64)).await;
        }
        buffered.fetch_sub(len, Ordering::SeqCst);

        if remote_events
            .send(ProviderEvent::Data {
                channel: remote_id,
                message,
            })
            .is_err()
        {
            link.close();
            break;
        }
    }
    link.pump_finished();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::EventReceiver;

    fn register(provider: &MemoryProvider, id: &str) -> EventReceiver {
        let (tx, mut rx) = mpsc::unbounded_channel();
        provider.register(id, tx).unwrap();
        match rx.try_recv().unwrap() {
            ProviderEvent::Registered { id: got } => assert_eq!(got, id),
            other => panic!("expected Registered, got {other:?}"),
        }
        rx
    }

    #[tokio::test]
    async fn connect_and_deliver_in_order() {
        let broker = MemoryBroker::new();
        let sender = broker.provider();
        let receiver = broker.provider();
        let mut sender_rx = register(&sender, "ROOM01");
        let mut receiver_rx = register(&receiver, "guest-1");

        let channel = receiver
            .connect_to("ROOM01", ConnectOptions::default())
            .unwrap();
        assert!(channel.is_open());
        assert_eq!(channel.peer(), "ROOM01");

        let incoming = match sender_rx.recv().await.unwrap() {
            ProviderEvent::IncomingChannel(ch) => ch,
            other => panic!("expected IncomingChannel, got {other:?}"),
        };
        assert_eq!(incoming.peer(), "guest-1");
        assert!(matches!(
            sender_rx.recv().await.unwrap(),
            ProviderEvent::ChannelOpen { peer, .. } if peer == "guest-1"
        ));
        assert!(matches!(
            receiver_rx.recv().await.unwrap(),
            ProviderEvent::ChannelOpen { peer, .. } if peer == "ROOM01"
        ));

        for i in 0..5u8 {
            incoming.send(TransferMessage::chunk(vec![i; 3])).unwrap();
        }
        for i in 0..5u8 {
            match receiver_rx.recv().await.unwrap() {
                ProviderEvent::Data { channel: id, message } => {
                    assert_eq!(id, channel.id());
                    assert_eq!(message, TransferMessage::chunk(vec![i; 3]));
                }
                other => panic!("expected Data, got {other:?}"),
            }
        }
        assert_eq!(incoming.buffered_amount(), 0);
    }

    #[tokio::test]
    async fn unknown_peer_reports_unavailable() {
        let broker = MemoryBroker::new();
        let receiver = broker.provider();
        let mut rx = register(&receiver, "guest-1");

        let channel = receiver
            .connect_to("NOPE00", ConnectOptions::default())
            .unwrap();
        assert!(!channel.is_open());
        assert!(matches!(
            channel.send(TransferMessage::End),
            Err(DataChannelError::Closed)
        ));
        assert!(matches!(
            rx.recv().await.unwrap(),
            ProviderEvent::Error {
                kind: ProviderErrorKind::PeerUnavailable,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn duplicate_identifier_rejected() {
        let broker = MemoryBroker::new();
        let first = broker.provider();
        let _first_rx = register(&first, "ROOM01");

        let second = broker.provider();
        let (tx, mut rx) = mpsc::unbounded_channel();
        second.register("ROOM01", tx).unwrap();
        assert!(matches!(
            rx.recv().await.unwrap(),
            ProviderEvent::Error {
                kind: ProviderErrorKind::Other,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn dropping_provider_frees_identifier() {
        let broker = MemoryBroker::new();
        let first = broker.provider();
        let _rx = register(&first, "ROOM01");
        drop(first);

        let second = broker.provider();
        let _second_rx = register(&second, "ROOM01");
    }

    #[tokio::test]
    async fn connect_without_register_fails() {
        let broker = MemoryBroker::new();
        let provider = broker.provider();
        assert!(matches!(
            provider.connect_to("ROOM01", ConnectOptions::default()),
            Err(DataChannelError::NotRegistered)
        ));
    }

    #[tokio::test]
    async fn close_notifies_both_ends_once() {
        let broker = MemoryBroker::new();
        let sender = broker.provider();
        let receiver = broker.provider();
        let mut sender_rx = register(&sender, "ROOM01");
        let mut receiver_rx = register(&receiver, "guest-1");

        let channel = receiver
            .connect_to("ROOM01", ConnectOptions::default())
            .unwrap();
        // IncomingChannel + ChannelOpen, ChannelOpen.
        sender_rx.recv().await.unwrap();
        sender_rx.recv().await.unwrap();
        receiver_rx.recv().await.unwrap();

        channel.close();
        channel.close();
        assert!(!channel.is_open());
        assert!(matches!(
            receiver_rx.recv().await.unwrap(),
            ProviderEvent::ChannelClosed { .. }
        ));
        assert!(matches!(
            sender_rx.recv().await.unwrap(),
            ProviderEvent::ChannelClosed { .. }
        ));
        assert!(receiver_rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn throttled_channel_buffers() {
        let broker = MemoryBroker::throttled(1024);
        let sender = broker.provider();
        let receiver = broker.provider();
        let mut sender_rx = register(&sender, "ROOM01");
        let _receiver_rx = register(&receiver, "guest-1");

        receiver
            .connect_to("ROOM01", ConnectOptions::default())
            .unwrap();
        let incoming = match sender_rx.recv().await.unwrap() {
            ProviderEvent::IncomingChannel(ch) => ch,
            other => panic!("expected IncomingChannel, got {other:?}"),
        };

        for _ in 0..4 {
            incoming.send(TransferMessage::chunk(vec![0u8; 1024])).unwrap();
        }
        assert_eq!(incoming.buffered_amount(), 4096);

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(incoming.buffered_amount(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn close_flushes_queued_messages_first() {
        let broker = MemoryBroker::throttled(1024);
        let sender = broker.provider();
        let receiver = broker.provider();
        let mut sender_rx = register(&sender, "ROOM01");
        let mut receiver_rx = register(&receiver, "guest-1");

        receiver
            .connect_to("ROOM01", ConnectOptions::default())
            .unwrap();
        let incoming = match sender_rx.recv().await.unwrap() {
            ProviderEvent::IncomingChannel(ch) => ch,
            other => panic!("expected IncomingChannel, got {other:?}"),
        };
        sender_rx.recv().await.unwrap();
        receiver_rx.recv().await.unwrap();

        for i in 0..3u8 {
            incoming.send(TransferMessage::chunk(vec![i; 1024])).unwrap();
        }
        incoming.send(TransferMessage::End).unwrap();
        incoming.close();
        assert!(!incoming.is_open());
        assert!(incoming.send(TransferMessage::End).is_err());

        for i in 0..3u8 {
            match receiver_rx.recv().await.unwrap() {
                ProviderEvent::Data { message, .. } => {
                    assert_eq!(message, TransferMessage::chunk(vec![i; 1024]));
                }
                other => panic!("expected Data, got {other:?}"),
            }
        }
        assert!(matches!(
            receiver_rx.recv().await.unwrap(),
            ProviderEvent::Data {
                message: TransferMessage::End,
                ..
            }
        ));
        assert!(matches!(
            receiver_rx.recv().await.unwrap(),
            ProviderEvent::ChannelClosed { .. }
        ));
        assert!(matches!(
            sender_rx.recv().await.unwrap(),
            ProviderEvent::ChannelClosed { .. }
        ));
        assert_eq!(incoming.buffered_amount(), 0);
    }
}
