//! Listening side of the TCP provider.
//!
//! Accepts connections for as long as the provider lives. Each dialer must
//! name the served room code in its handshake; a match is answered with
//! [`STATUS_ACCEPTED`](crate::wire::STATUS_ACCEPTED) and becomes an
//! incoming channel, anything else is refused and dropped.

use std::net::SocketAddr;

use tokio::io::BufReader;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::channel::EventSender;
use crate::connection::TcpChannel;
use crate::error::DataChannelError;
use crate::wire::{read_handshake, write_status};
use crate::{TCP_BUFFER_SIZE, TCP_HANDSHAKE_TIMEOUT};

/// Runs the accept loop until `cancel` fires.
pub(crate) async fn accept_loop(
    listener: TcpListener,
    room: String,
    events: EventSender,
    cancel: CancellationToken,
) {
    info!(room = %room, addr = ?listener.local_addr().ok(), "accepting TCP channels");

    loop {
        let (stream, addr) = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            result = listener.accept() => match result {
                Ok(accepted) => accepted,
                Err(e) => {
                    warn!(error = %e, "accept failed");
                    continue;
                }
            },
        };

        let room = room.clone();
        let events = events.clone();
        let cancel = cancel.child_token();
        tokio::spawn(async move {
            if let Err(e) = accept_one(stream, addr, &room, events, cancel).await {
                warn!(%addr, error = %e, "rejected TCP connection");
            }
        });
    }

    debug!(room = %room, "accept loop stopped");
}

async fn accept_one(
    stream: TcpStream,
    addr: SocketAddr,
    room: &str,
    events: EventSender,
    cancel: CancellationToken,
) -> Result<(), DataChannelError> {
    stream.set_nodelay(true)?;
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::with_capacity(TCP_BUFFER_SIZE, reader);

    let (code, peer) = tokio::select! {
        biased;
        _ = cancel.cancelled() => return Err(DataChannelError::Closed),
        result = tokio::time::timeout(TCP_HANDSHAKE_TIMEOUT, read_handshake(&mut reader)) => {
            match result {
                Ok(Ok(handshake)) => handshake,
                Ok(Err(e)) => return Err(e),
                Err(_) => return Err(DataChannelError::Timeout),
            }
        }
    };

    if code != room {
        write_status(&mut writer, false).await?;
        return Err(DataChannelError::PeerUnavailable(code));
    }
    write_status(&mut writer, true).await?;
    info!(%addr, peer = %peer, "TCP channel accepted");

    let channel = TcpChannel::pending(peer, events, cancel);
    channel.attach(reader, writer, true);
    Ok(())
}
