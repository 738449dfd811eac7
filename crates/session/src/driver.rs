//! Async driver: runs a [`SessionMachine`] against a channel provider.
//!
//! One task per session `select!`s over provider events, user commands,
//! the in-flight send and the post-send completion delay. Everything the
//! machine asks for is carried out here; everything it should know about
//! is fed back as a [`SessionEvent`].

use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};

use roomdrop_data_channel::{
    ChannelHandle, ChannelId, ChannelProvider, ConnectOptions, EventReceiver, EventSender,
    ProviderErrorKind, ProviderEvent,
};
use roomdrop_protocol::RoomCode;
use roomdrop_transfer::{
    CompletedFile, FileSource, ProgressReporter, ReceiveAssembler, Received, SendOutcome,
    TransferConfig, TransferError, TransferProgress, preflight, send_file,
};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::{JoinError, JoinHandle};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::SessionError;
use crate::machine::SessionMachine;
use crate::types::{Effect, Failure, Notice, Role, SessionEvent, SessionSnapshot, SessionState};

type Reply<T> = oneshot::Sender<Result<T, SessionError>>;

enum Command {
    SendFile {
        source: FileSource,
        confirmed: bool,
        reply: Reply<SendOutcome>,
    },
    Files {
        reply: oneshot::Sender<Vec<CompletedFile>>,
    },
    Save {
        index: usize,
        dir: PathBuf,
        reply: Reply<PathBuf>,
    },
    SaveAll {
        dir: PathBuf,
        reply: Reply<Vec<PathBuf>>,
    },
    Close,
}

/// Handle to a running session. Dropping it ends the session.
pub struct SessionHandle {
    commands: mpsc::Sender<Command>,
    snapshot: watch::Receiver<SessionSnapshot>,
    notices: Mutex<Option<mpsc::UnboundedReceiver<Notice>>>,
    send_progress: watch::Receiver<TransferProgress>,
    receive_progress: watch::Receiver<TransferProgress>,
}

impl SessionHandle {
    /// Starts a session on `provider`.
    ///
    /// Without a `room` this peer is the sender and mints a fresh room
    /// code; with one it is the receiver and dials that room.
    pub fn start<P>(provider: P, room: Option<RoomCode>, config: TransferConfig) -> Self
    where
        P: ChannelProvider + 'static,
    {
        let own_id = match &room {
            Some(_) => uuid::Uuid::new_v4().to_string(),
            None => RoomCode::generate().to_string(),
        };

        let (commands_tx, commands_rx) = mpsc::channel(16);
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (notices_tx, notices_rx) = mpsc::unbounded_channel();
        let machine = SessionMachine::new();
        let (snapshot_tx, snapshot_rx) = watch::channel(machine.snapshot());

        let assembler = ReceiveAssembler::new();
        let receive_progress = assembler.progress().subscribe();
        let send_progress = Arc::new(ProgressReporter::new());
        let send_progress_rx = send_progress.subscribe();

        let driver = Driver {
            provider,
            machine,
            config,
            events_tx,
            channels: HashMap::new(),
            assembler,
            send_progress,
            sending: None,
            ready_at: None,
            snapshot_tx,
            notices: notices_tx,
        };
        tokio::spawn(driver.run(own_id, room, commands_rx, events_rx));

        Self {
            commands: commands_tx,
            snapshot: snapshot_rx,
            notices: Mutex::new(Some(notices_rx)),
            send_progress: send_progress_rx,
            receive_progress,
        }
    }

    /// Current state of the session.
    pub fn snapshot(&self) -> SessionSnapshot {
        self.snapshot.borrow().clone()
    }

    /// Watches state changes.
    pub fn watch(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshot.clone()
    }

    /// Takes the notice stream. Can only be called once.
    pub fn take_notices(&self) -> Option<mpsc::UnboundedReceiver<Notice>> {
        self.notices
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    pub fn send_progress(&self) -> watch::Receiver<TransferProgress> {
        self.send_progress.clone()
    }

    pub fn receive_progress(&self) -> watch::Receiver<TransferProgress> {
        self.receive_progress.clone()
    }

    /// Waits for the data channel to open.
    pub async fn wait_connected(&self) -> Result<SessionSnapshot, SessionError> {
        let snapshot = self
            .wait_for(|s| {
                s.state == SessionState::Connected
                    || s.state == SessionState::Disconnected
                    || s.failure.is_some()
            })
            .await?;
        match (&snapshot.failure, snapshot.state) {
            (Some(failure), _) => Err(failure_error(failure)),
            (None, SessionState::Connected) => Ok(snapshot),
            _ => Err(SessionError::NotConnected),
        }
    }

    /// Waits until another file may be sent.
    pub async fn wait_ready(&self) -> Result<(), SessionError> {
        let snapshot = self
            .wait_for(|s| s.ready_to_send() || s.state == SessionState::Disconnected)
            .await?;
        if snapshot.ready_to_send() {
            Ok(())
        } else {
            Err(SessionError::NotConnected)
        }
    }

    /// Waits for the session to end.
    pub async fn wait_disconnected(&self) -> SessionSnapshot {
        match self
            .wait_for(|s| s.state == SessionState::Disconnected)
            .await
        {
            Ok(snapshot) => snapshot,
            Err(_) => self.snapshot(),
        }
    }

    /// Sends one file and returns once it has been queued in full (or the
    /// channel closed). Files above the large-file threshold need
    /// `confirmed`.
    pub async fn send_file(
        &self,
        source: FileSource,
        confirmed: bool,
    ) -> Result<SendOutcome, SessionError> {
        self.request(|reply| Command::SendFile {
            source,
            confirmed,
            reply,
        })
        .await?
    }

    /// Completed files received so far, in arrival order.
    pub async fn files(&self) -> Result<Vec<CompletedFile>, SessionError> {
        self.request(|reply| Command::Files { reply }).await
    }

    /// Writes received file `index` into `dir`.
    pub async fn save(&self, index: usize, dir: impl Into<PathBuf>) -> Result<PathBuf, SessionError> {
        let dir = dir.into();
        self.request(|reply| Command::Save { index, dir, reply })
            .await?
    }

    /// Writes every received file into `dir`.
    pub async fn save_all(&self, dir: impl Into<PathBuf>) -> Result<Vec<PathBuf>, SessionError> {
        let dir = dir.into();
        self.request(|reply| Command::SaveAll { dir, reply })
            .await?
    }

    /// Closes the data channel. The session then ends as `Disconnected`.
    pub async fn close(&self) {
        let _ = self.commands.send(Command::Close).await;
    }

    async fn request<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, SessionError> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(command(tx))
            .await
            .map_err(|_| SessionError::Closed)?;
        rx.await.map_err(|_| SessionError::Closed)
    }

    async fn wait_for(
        &self,
        predicate: impl FnMut(&SessionSnapshot) -> bool,
    ) -> Result<SessionSnapshot, SessionError> {
        let mut rx = self.snapshot.clone();
        let snapshot = rx
            .wait_for(predicate)
            .await
            .map_err(|_| SessionError::Closed)?;
        Ok(snapshot.clone())
    }
}

fn failure_error(failure: &Failure) -> SessionError {
    match failure {
        Failure::PeerNotFound { code } => SessionError::PeerNotFound(code.clone()),
        Failure::Provider { message } => SessionError::Failed(message.clone()),
    }
}

struct InFlight {
    name: String,
    task: JoinHandle<Result<SendOutcome, TransferError>>,
    reply: Reply<SendOutcome>,
}

struct Driver<P> {
    provider: P,
    machine: SessionMachine,
    config: TransferConfig,
    events_tx: EventSender,
    channels: HashMap<ChannelId, ChannelHandle>,
    assembler: ReceiveAssembler,
    send_progress: Arc<ProgressReporter>,
    sending: Option<InFlight>,
    ready_at: Option<Instant>,
    snapshot_tx: watch::Sender<SessionSnapshot>,
    notices: mpsc::UnboundedSender<Notice>,
}

impl<P: ChannelProvider> Driver<P> {
    async fn run(
        mut self,
        own_id: String,
        room: Option<RoomCode>,
        mut commands: mpsc::Receiver<Command>,
        mut events: EventReceiver,
    ) {
        self.dispatch(SessionEvent::Start { own_id, room });

        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => self.on_command(command),
                    None => break,
                },
                Some(event) = events.recv() => self.on_provider_event(event),
                result = join_send(&mut self.sending) => self.on_send_done(result),
                () = sleep_until(self.ready_at) => {
                    self.ready_at = None;
                    self.dispatch(SessionEvent::ReadyElapsed);
                }
            }
        }

        debug!("session handle dropped, shutting down");
        for (_, channel) in self.channels.drain() {
            channel.close();
        }
    }

    fn on_command(&mut self, command: Command) {
        match command {
            Command::SendFile {
                source,
                confirmed,
                reply,
            } => {
                let name = source.meta().name.clone();
                match self.start_send(source, confirmed) {
                    Ok(task) => self.sending = Some(InFlight { name, task, reply }),
                    Err(e) => {
                        let _ = reply.send(Err(e));
                    }
                }
            }
            Command::Files { reply } => {
                let _ = reply.send(self.assembler.registry().iter().cloned().collect());
            }
            // Disk writes run off the driver task so provider events keep flowing.
            Command::Save { index, dir, reply } => {
                let registry = self.assembler.registry().clone();
                tokio::spawn(async move {
                    let result = registry.save(index, &dir).await;
                    let _ = reply.send(result.map_err(SessionError::from));
                });
            }
            Command::SaveAll { dir, reply } => {
                let registry = self.assembler.registry().clone();
                tokio::spawn(async move {
                    let result = registry.save_all(&dir).await;
                    let _ = reply.send(result.map_err(SessionError::from));
                });
            }
            Command::Close => {
                if let Some(channel) = self
                    .machine
                    .active_channel()
                    .and_then(|id| self.channels.get(&id))
                {
                    info!(channel = %channel.id(), "closing session");
                    channel.close();
                }
            }
        }
    }

    fn start_send(
        &mut self,
        source: FileSource,
        confirmed: bool,
    ) -> Result<JoinHandle<Result<SendOutcome, TransferError>>, SessionError> {
        if self.machine.role() != Some(Role::Sender) {
            return Err(SessionError::NotSender);
        }
        if self.machine.state() != SessionState::Connected {
            return Err(SessionError::NotConnected);
        }
        if self.sending.is_some() || !self.machine.can_send() {
            return Err(SessionError::Busy);
        }
        let channel = self
            .machine
            .active_channel()
            .and_then(|id| self.channels.get(&id))
            .cloned()
            .ok_or(SessionError::NotConnected)?;

        let meta = source.meta().clone();
        preflight(&*channel, &meta, &self.config, confirmed)?;

        self.dispatch(SessionEvent::SendStarted { meta });

        let config = self.config.clone();
        let progress = Arc::clone(&self.send_progress);
        Ok(tokio::spawn(async move {
            send_file(&*channel, source, &config, &progress).await
        }))
    }

    fn on_send_done(&mut self, result: Result<Result<SendOutcome, TransferError>, JoinError>) {
        let Some(inflight) = self.sending.take() else {
            return;
        };
        let name = inflight.name;
        let reply = match result {
            Ok(Ok(outcome)) => {
                self.dispatch(SessionEvent::SendFinished { name, outcome });
                Ok(outcome)
            }
            Ok(Err(e)) => {
                warn!(name = %name, error = %e, "send failed");
                self.dispatch(SessionEvent::SendFailed {
                    name,
                    message: e.to_string(),
                });
                Err(SessionError::Transfer(e))
            }
            Err(e) => {
                warn!(name = %name, error = %e, "send task failed");
                self.dispatch(SessionEvent::SendFailed {
                    name,
                    message: e.to_string(),
                });
                Err(SessionError::TaskFailed(e.to_string()))
            }
        };
        let _ = inflight.reply.send(reply);
    }

    fn on_provider_event(&mut self, event: ProviderEvent) {
        let event = match event {
            ProviderEvent::Registered { id } => SessionEvent::Registered { id },
            ProviderEvent::Error { kind, message } => SessionEvent::ProviderError { kind, message },
            ProviderEvent::IncomingChannel(handle) => {
                let channel = handle.id();
                self.channels.insert(channel, handle);
                SessionEvent::IncomingChannel { channel }
            }
            ProviderEvent::ChannelOpen { channel, peer } => {
                SessionEvent::ChannelOpened { channel, peer }
            }
            ProviderEvent::Data { channel, message } => SessionEvent::Message { channel, message },
            ProviderEvent::ChannelClosed { channel } => {
                self.channels.remove(&channel);
                SessionEvent::ChannelClosed { channel }
            }
            ProviderEvent::ChannelError { channel, message } => {
                SessionEvent::ChannelError { channel, message }
            }
        };
        self.dispatch(event);
    }

    /// Runs `event` and every follow-up event it causes through the
    /// machine, then publishes the new snapshot.
    fn dispatch(&mut self, event: SessionEvent) {
        let mut queue = VecDeque::from([event]);
        while let Some(event) = queue.pop_front() {
            for effect in self.machine.handle(event) {
                self.execute(effect, &mut queue);
            }
        }
        self.snapshot_tx.send_replace(self.machine.snapshot());
    }

    fn execute(&mut self, effect: Effect, queue: &mut VecDeque<SessionEvent>) {
        match effect {
            Effect::Register { id } => {
                if let Err(e) = self.provider.register(&id, self.events_tx.clone()) {
                    queue.push_back(SessionEvent::ProviderError {
                        kind: ProviderErrorKind::Other,
                        message: e.to_string(),
                    });
                }
            }
            Effect::Connect { remote } => {
                match self
                    .provider
                    .connect_to(&remote, ConnectOptions::RELIABLE_ORDERED)
                {
                    Ok(handle) => {
                        let channel = handle.id();
                        self.channels.insert(channel, handle);
                        queue.push_back(SessionEvent::Dialed { channel });
                    }
                    Err(e) => queue.push_back(SessionEvent::ProviderError {
                        kind: ProviderErrorKind::Other,
                        message: e.to_string(),
                    }),
                }
            }
            Effect::Close { channel } => {
                if let Some(handle) = self.channels.remove(&channel) {
                    debug!(%channel, "closing channel");
                    handle.close();
                }
            }
            Effect::Assemble { message } => match self.assembler.handle(message) {
                Received::Started { meta, .. } => {
                    queue.push_back(SessionEvent::FileStarted { meta });
                }
                Received::Completed { index } => {
                    if let Some(file) = self.assembler.registry().get(index).cloned() {
                        info!(name = %file.name(), size = file.size(), index, "file received");
                        queue.push_back(SessionEvent::FileCompleted { index, file });
                    }
                }
                Received::Progress(_) | Received::Discarded(_) => {}
            },
            Effect::ScheduleReady => {
                self.ready_at = Some(Instant::now() + self.config.completion_delay);
            }
            Effect::ResetSendProgress => self.send_progress.reset(),
            Effect::Notify(notice) => {
                let _ = self.notices.send(notice);
            }
        }
    }
}

async fn join_send(
    sending: &mut Option<InFlight>,
) -> Result<Result<SendOutcome, TransferError>, JoinError> {
    match sending {
        Some(inflight) => (&mut inflight.task).await,
        None => std::future::pending().await,
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
