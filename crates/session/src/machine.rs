//! The session state machine.
//!
//! [`SessionMachine::handle`] maps one [`SessionEvent`] to the [`Effect`]s
//! the driver must carry out. It performs no I/O, so every transition can
//! be tested without a provider or a runtime.

use roomdrop_data_channel::{ChannelId, ProviderErrorKind};
use roomdrop_protocol::RoomCode;
use roomdrop_transfer::SendOutcome;
use tracing::{debug, info, warn};

use crate::fingerprint::Fingerprint;
use crate::types::{
    Activity, Effect, Failure, Notice, Role, SessionEvent, SessionSnapshot, SessionState,
    StatusLabel,
};

#[derive(Debug)]
pub struct SessionMachine {
    role: Option<Role>,
    state: SessionState,
    activity: Activity,
    own_id: Option<String>,
    room: Option<RoomCode>,
    /// The one channel this session uses.
    active: Option<ChannelId>,
    peer: Option<String>,
    fingerprint: Option<Fingerprint>,
    failure: Option<Failure>,
}

impl Default for SessionMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionMachine {
    pub fn new() -> Self {
        Self {
            role: None,
            state: SessionState::Idle,
            activity: Activity::Idle,
            own_id: None,
            room: None,
            active: None,
            peer: None,
            fingerprint: None,
            failure: None,
        }
    }

    pub fn role(&self) -> Option<Role> {
        self.role
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn activity(&self) -> Activity {
        self.activity
    }

    pub fn active_channel(&self) -> Option<ChannelId> {
        self.active
    }

    /// `true` if a new file may be handed to the send pipeline.
    pub fn can_send(&self) -> bool {
        self.role == Some(Role::Sender)
            && self.state == SessionState::Connected
            && matches!(self.activity, Activity::Idle | Activity::Received)
    }

    pub fn status(&self) -> StatusLabel {
        match self.state {
            SessionState::Disconnected if self.failure.is_some() => StatusLabel::Error,
            SessionState::Disconnected => StatusLabel::Disconnected,
            SessionState::Idle | SessionState::AwaitingPeer => match self.role {
                Some(Role::Receiver) => StatusLabel::Connecting,
                _ => StatusLabel::Waiting,
            },
            SessionState::Connected => match self.activity {
                Activity::Sending => StatusLabel::Sending,
                Activity::Sent => StatusLabel::Done,
                Activity::Receiving => StatusLabel::Receiving,
                Activity::Received => StatusLabel::FileReceived,
                Activity::Idle => match self.role {
                    Some(Role::Receiver) => StatusLabel::Connected,
                    _ => StatusLabel::LockedIn,
                },
            },
        }
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            role: self.role,
            state: self.state,
            status: self.status(),
            own_id: self.own_id.clone(),
            room: self.room.clone(),
            peer: self.peer.clone(),
            fingerprint: self.fingerprint,
            failure: self.failure.clone(),
        }
    }

    /// Applies one event and returns the effects to carry out, in order.
    pub fn handle(&mut self, event: SessionEvent) -> Vec<Effect> {
        match event {
            SessionEvent::Start { own_id, room } => self.on_start(own_id, room),
            SessionEvent::Registered { id } => self.on_registered(id),
            SessionEvent::ProviderError { kind, message } => self.on_provider_error(kind, message),
            SessionEvent::Dialed { channel } => {
                if self.state == SessionState::AwaitingPeer && self.active.is_none() {
                    self.active = Some(channel);
                    Vec::new()
                } else {
                    vec![Effect::Close { channel }]
                }
            }
            SessionEvent::IncomingChannel { channel } => self.on_incoming(channel),
            SessionEvent::ChannelOpened { channel, peer } => self.on_opened(channel, peer),
            SessionEvent::ChannelClosed { channel } => self.on_closed(channel),
            SessionEvent::ChannelError { channel, message } => {
                if self.active == Some(channel) {
                    warn!(%channel, error = %message, "data channel failed");
                }
                self.on_closed(channel)
            }
            SessionEvent::Message { channel, message } => {
                if self.active == Some(channel) && self.state == SessionState::Connected {
                    vec![Effect::Assemble { message }]
                } else {
                    debug!(%channel, kind = %message.kind(), "dropping message from inactive channel");
                    Vec::new()
                }
            }
            SessionEvent::FileStarted { meta } => {
                self.activity = Activity::Receiving;
                vec![Effect::Notify(Notice::FileStarted { meta })]
            }
            SessionEvent::FileCompleted { index, file } => {
                self.activity = Activity::Received;
                vec![Effect::Notify(Notice::FileReceived { index, file })]
            }
            SessionEvent::SendStarted { meta } => {
                debug!(name = %meta.name, "send started");
                self.activity = Activity::Sending;
                Vec::new()
            }
            SessionEvent::SendFinished { name, outcome } => self.on_send_finished(name, outcome),
            SessionEvent::SendFailed { name, message } => {
                self.activity = Activity::Idle;
                vec![
                    Effect::ResetSendProgress,
                    Effect::Notify(Notice::SendFailed { name, message }),
                ]
            }
            SessionEvent::ReadyElapsed => {
                if self.activity != Activity::Sent {
                    return Vec::new();
                }
                self.activity = Activity::Idle;
                if self.state == SessionState::Connected {
                    vec![Effect::ResetSendProgress, Effect::Notify(Notice::Ready)]
                } else {
                    vec![Effect::ResetSendProgress]
                }
            }
        }
    }

    fn on_start(&mut self, own_id: String, room: Option<RoomCode>) -> Vec<Effect> {
        if self.state != SessionState::Idle {
            warn!("session already started");
            return Vec::new();
        }
        self.role = Some(if room.is_some() {
            Role::Receiver
        } else {
            Role::Sender
        });
        self.room = room;
        self.own_id = Some(own_id.clone());
        vec![Effect::Register { id: own_id }]
    }

    fn on_registered(&mut self, id: String) -> Vec<Effect> {
        if self.state != SessionState::Idle {
            return Vec::new();
        }
        self.state = SessionState::AwaitingPeer;
        self.own_id = Some(id.clone());

        match self.role {
            Some(Role::Receiver) => {
                let Some(code) = self.room.clone() else {
                    return Vec::new();
                };
                info!(own_id = %id, room = %code, "registered, joining room");
                vec![
                    Effect::Notify(Notice::Joining { code: code.clone() }),
                    Effect::Connect {
                        remote: code.as_str().to_string(),
                    },
                ]
            }
            _ => match RoomCode::parse(&id) {
                Ok(code) => {
                    info!(room = %code, "registered, waiting for a peer");
                    self.room = Some(code.clone());
                    vec![Effect::Notify(Notice::RoomReady { code })]
                }
                Err(e) => self.fail(Failure::Provider {
                    message: format!("registered identifier is not a room code: {e}"),
                }),
            },
        }
    }

    fn on_provider_error(&mut self, kind: ProviderErrorKind, message: String) -> Vec<Effect> {
        match kind {
            ProviderErrorKind::PeerUnavailable => {
                let code = self
                    .room
                    .as_ref()
                    .map(|c| c.as_str().to_string())
                    .unwrap_or_default();
                warn!(room = %code, "peer not found");
                let failure = Failure::PeerNotFound { code };
                self.failure = Some(failure.clone());
                vec![Effect::Notify(Notice::Failed(failure))]
            }
            ProviderErrorKind::Other => {
                warn!(error = %message, "provider error");
                self.fail(Failure::Provider { message })
            }
        }
    }

    fn on_incoming(&mut self, channel: ChannelId) -> Vec<Effect> {
        let accepting = self.role == Some(Role::Sender) && self.state == SessionState::AwaitingPeer;
        if !accepting {
            debug!(%channel, state = ?self.state, "rejecting inbound channel");
            return vec![Effect::Close { channel }];
        }

        let mut effects = Vec::new();
        if let Some(previous) = self.active.replace(channel) {
            // Superseded before it opened.
            effects.push(Effect::Close { channel: previous });
        }
        debug!(%channel, "accepted inbound channel");
        effects
    }

    fn on_opened(&mut self, channel: ChannelId, peer: String) -> Vec<Effect> {
        if self.active != Some(channel) || self.state != SessionState::AwaitingPeer {
            return Vec::new();
        }
        self.state = SessionState::Connected;
        self.activity = Activity::Idle;
        self.failure = None;

        let own = self.own_id.as_deref().unwrap_or_default();
        let fingerprint = Fingerprint::of(own, &peer);
        info!(%channel, peer = %peer, %fingerprint, "connected");
        self.fingerprint = Some(fingerprint);
        self.peer = Some(peer.clone());
        vec![Effect::Notify(Notice::Connected { peer, fingerprint })]
    }

    fn on_closed(&mut self, channel: ChannelId) -> Vec<Effect> {
        if self.active != Some(channel) || self.state == SessionState::Disconnected {
            return Vec::new();
        }
        info!(%channel, "peer disconnected");
        self.state = SessionState::Disconnected;
        if self.activity != Activity::Sent {
            self.activity = Activity::Idle;
        }
        vec![Effect::Notify(Notice::Disconnected)]
    }

    fn on_send_finished(&mut self, name: String, outcome: SendOutcome) -> Vec<Effect> {
        match outcome {
            SendOutcome::Completed { bytes } => {
                self.activity = Activity::Sent;
                vec![
                    Effect::Notify(Notice::FileSent { name, bytes }),
                    Effect::ScheduleReady,
                ]
            }
            SendOutcome::Aborted { sent } => {
                self.activity = Activity::Idle;
                vec![
                    Effect::ResetSendProgress,
                    Effect::Notify(Notice::SendAborted { name, sent }),
                ]
            }
        }
    }

    fn fail(&mut self, failure: Failure) -> Vec<Effect> {
        self.state = SessionState::Disconnected;
        self.failure = Some(failure.clone());
        let mut effects = Vec::new();
        if let Some(channel) = self.active {
            effects.push(Effect::Close { channel });
        }
        effects.push(Effect::Notify(Notice::Failed(failure)));
        effects
    }
}
