//! Public types of a roomdrop session.

use std::fmt;

use roomdrop_data_channel::{ChannelId, ProviderErrorKind};
use roomdrop_protocol::{FileMeta, RoomCode, TransferMessage};
use roomdrop_transfer::{CompletedFile, SendOutcome};

use crate::fingerprint::Fingerprint;

/// Which side of the transfer this peer plays. Fixed for a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Minted the room code and waits for a peer.
    Sender,
    /// Joined an existing room code.
    Receiver,
}

/// Connection lifecycle of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Constructed, not registered yet.
    Idle,
    /// Registered; waiting for the data channel to open.
    AwaitingPeer,
    /// The data channel is open.
    Connected,
    /// The channel closed or the provider failed. Terminal.
    Disconnected,
}

/// What the open channel is currently busy with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activity {
    Idle,
    Sending,
    /// A send finished; the completion delay is running.
    Sent,
    Receiving,
    Received,
}

/// Status text shown to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusLabel {
    Waiting,
    Connecting,
    LockedIn,
    Connected,
    Sending,
    Done,
    Receiving,
    FileReceived,
    Disconnected,
    Error,
}

impl StatusLabel {
    pub fn as_str(self) -> &'static str {
        match self {
            StatusLabel::Waiting => "WAITING",
            StatusLabel::Connecting => "CONNECTING...",
            StatusLabel::LockedIn => "LOCKED IN",
            StatusLabel::Connected => "CONNECTED",
            StatusLabel::Sending => "SENDING...",
            StatusLabel::Done => "DONE",
            StatusLabel::Receiving => "RECEIVING...",
            StatusLabel::FileReceived => "FILE RECEIVED",
            StatusLabel::Disconnected => "DISCONNECTED",
            StatusLabel::Error => "ERROR",
        }
    }
}

impl fmt::Display for StatusLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a session cannot make progress.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Failure {
    /// The dialed room does not exist. The user should check the code.
    PeerNotFound { code: String },
    /// Any other provider failure.
    Provider { message: String },
}

/// Inputs to the session state machine.
#[derive(Debug)]
pub enum SessionEvent {
    /// Start with our own identifier. `room` is the code to join, if any.
    Start {
        own_id: String,
        room: Option<RoomCode>,
    },
    Registered {
        id: String,
    },
    ProviderError {
        kind: ProviderErrorKind,
        message: String,
    },
    /// The driver dialed the room; `channel` will open later.
    Dialed {
        channel: ChannelId,
    },
    IncomingChannel {
        channel: ChannelId,
    },
    ChannelOpened {
        channel: ChannelId,
        peer: String,
    },
    ChannelClosed {
        channel: ChannelId,
    },
    ChannelError {
        channel: ChannelId,
        message: String,
    },
    Message {
        channel: ChannelId,
        message: TransferMessage,
    },
    FileStarted {
        meta: FileMeta,
    },
    FileCompleted {
        index: usize,
        file: CompletedFile,
    },
    SendStarted {
        meta: FileMeta,
    },
    SendFinished {
        name: String,
        outcome: SendOutcome,
    },
    SendFailed {
        name: String,
        message: String,
    },
    /// The completion delay after a send has elapsed.
    ReadyElapsed,
}

/// Work the driver performs on behalf of the state machine.
#[derive(Debug)]
pub enum Effect {
    Register { id: String },
    Connect { remote: String },
    /// Close a channel we do not want (duplicate or late).
    Close { channel: ChannelId },
    /// Feed an inbound message to the receive assembler.
    Assemble { message: TransferMessage },
    /// Start the completion delay.
    ScheduleReady,
    ResetSendProgress,
    Notify(Notice),
}

/// Everything a front end may want to show.
#[derive(Debug, Clone)]
pub enum Notice {
    /// The sender is registered; share this code.
    RoomReady { code: RoomCode },
    /// The receiver is registered and dialing `code`.
    Joining { code: RoomCode },
    Connected {
        peer: String,
        fingerprint: Fingerprint,
    },
    FileStarted { meta: FileMeta },
    FileReceived { index: usize, file: CompletedFile },
    FileSent { name: String, bytes: u64 },
    SendAborted { name: String, sent: u64 },
    SendFailed { name: String, message: String },
    /// Another file may be sent.
    Ready,
    Disconnected,
    Failed(Failure),
}

/// Point-in-time view of a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub role: Option<Role>,
    pub state: SessionState,
    pub status: StatusLabel,
    pub own_id: Option<String>,
    pub room: Option<RoomCode>,
    pub peer: Option<String>,
    pub fingerprint: Option<Fingerprint>,
    pub failure: Option<Failure>,
}

impl SessionSnapshot {
    /// `true` for a connected sender with no send in flight or cooling
    /// down.
    pub fn ready_to_send(&self) -> bool {
        self.role == Some(Role::Sender)
            && self.state == SessionState::Connected
            && !matches!(self.status, StatusLabel::Sending | StatusLabel::Done)
    }
}
