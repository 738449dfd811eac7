//! Direct TCP channel provider.
//!
//! The sending peer [`listen`](TcpProvider::listen)s and serves exactly the
//! room code it registers under. The receiving peer [`dial`](TcpProvider::dial)s
//! the listener's address and names that code in its handshake. Room links
//! (`host:port#CODE`) carry both halves.

use std::net::SocketAddr;
use std::sync::{Mutex, PoisonError};

use tokio::net::{TcpListener, ToSocketAddrs};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::channel::{
    ChannelHandle, ChannelProvider, ConnectOptions, EventSender, ProviderErrorKind, ProviderEvent,
};
use crate::connection::TcpChannel;
use crate::error::DataChannelError;
use crate::{client, server};

enum Mode {
    Listen {
        listener: Mutex<Option<TcpListener>>,
        local_addr: SocketAddr,
    },
    Dial {
        address: String,
    },
}

/// Channel provider over plain TCP.
///
/// Must be used from within a tokio runtime.
pub struct TcpProvider {
    mode: Mode,
    local: Mutex<Option<(String, EventSender)>>,
    cancel: CancellationToken,
}

impl TcpProvider {
    /// Binds a listener. Connections are accepted once a room is registered.
    pub async fn listen(addr: impl ToSocketAddrs) -> Result<Self, DataChannelError> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        info!(%local_addr, "TCP provider listening");
        Ok(Self {
            mode: Mode::Listen {
                listener: Mutex::new(Some(listener)),
                local_addr,
            },
            local: Mutex::new(None),
            cancel: CancellationToken::new(),
        })
    }

    /// Creates a provider that dials rooms served at `address`.
    pub fn dial(address: impl Into<String>) -> Self {
        Self {
            mode: Mode::Dial {
                address: address.into(),
            },
            local: Mutex::new(None),
            cancel: CancellationToken::new(),
        }
    }

    /// Bound address of a listening provider.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        match &self.mode {
            Mode::Listen { local_addr, .. } => Some(*local_addr),
            Mode::Dial { .. } => None,
        }
    }

    fn local(&self) -> Option<(String, EventSender)> {
        self.local
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl ChannelProvider for TcpProvider {
    fn register(&self, id: &str, events: EventSender) -> Result<(), DataChannelError> {
        {
            let mut local = self.local.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some((existing, _)) = local.as_ref() {
                warn!(peer = %id, existing = %existing, "provider already registered");
                let _ = events.send(ProviderEvent::Error {
                    kind: ProviderErrorKind::Other,
                    message: format!("provider already registered as {existing}"),
                });
                return Ok(());
            }
            *local = Some((id.to_string(), events.clone()));
        }

        if let Mode::Listen { listener, .. } = &self.mode {
            let listener = listener
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .take()
                .ok_or_else(|| DataChannelError::Protocol("listener already in use".into()))?;
            tokio::spawn(server::accept_loop(
                listener,
                id.to_string(),
                events.clone(),
                self.cancel.child_token(),
            ));
        }

        debug!(peer = %id, "registered with TCP provider");
        let _ = events.send(ProviderEvent::Registered { id: id.to_string() });
        Ok(())
    }

    fn connect_to(
        &self,
        remote: &str,
        options: ConnectOptions,
    ) -> Result<ChannelHandle, DataChannelError> {
        let Mode::Dial { address } = &self.mode else {
            return Err(DataChannelError::Unsupported(
                "a listening provider cannot dial".into(),
            ));
        };
        let (local_id, events) = self.local().ok_or(DataChannelError::NotRegistered)?;
        if options != ConnectOptions::RELIABLE_ORDERED {
            debug!(?options, "TCP channels are always reliable and ordered");
        }

        let cancel = self.cancel.child_token();
        let channel = TcpChannel::pending(remote, events.clone(), cancel.clone());
        tokio::spawn(client::dial(
            address.clone(),
            remote.to_string(),
            local_id,
            channel.clone(),
            events,
            cancel,
        ));
        Ok(channel)
    }
}

/// Dropping the provider stops accepting and closes every channel it
/// created.
impl Drop for TcpProvider {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
