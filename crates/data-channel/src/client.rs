//! Dialing side of the TCP provider.

use tokio::io::BufReader;
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::channel::{EventSender, ProviderErrorKind, ProviderEvent};
use crate::connection::TcpChannel;
use crate::error::DataChannelError;
use crate::wire::{read_status, write_handshake};
use crate::{TCP_BUFFER_SIZE, TCP_CONNECT_TIMEOUT, TCP_HANDSHAKE_TIMEOUT};

/// Connects `channel` to the room `room` served at `address`.
///
/// Failures are reported as an `Error` event; the channel then never opens.
pub(crate) async fn dial(
    address: String,
    room: String,
    local_id: String,
    channel: std::sync::Arc<TcpChannel>,
    events: EventSender,
    cancel: CancellationToken,
) {
    match connect(&address, &room, &local_id, &cancel).await {
        Ok((reader, writer)) => {
            info!(%address, room = %room, "TCP channel connected");
            channel.attach(reader, writer, false);
        }
        Err(e) => {
            let kind = error_kind(&e);
            debug!(%address, room = %room, error = %e, ?kind, "dial failed");
            let _ = events.send(ProviderEvent::Error {
                kind,
                message: format!("could not connect to peer {room}: {e}"),
            });
        }
    }
}

/// Refused connections and unknown rooms both mean nobody is there.
fn error_kind(error: &DataChannelError) -> ProviderErrorKind {
    match error {
        DataChannelError::PeerUnavailable(_) => ProviderErrorKind::PeerUnavailable,
        DataChannelError::Io(e) if e.kind() == std::io::ErrorKind::ConnectionRefused => {
            ProviderErrorKind::PeerUnavailable
        }
        _ => ProviderErrorKind::Other,
    }
}

async fn connect(
    address: &str,
    room: &str,
    local_id: &str,
    cancel: &CancellationToken,
) -> Result<(BufReader<OwnedReadHalf>, OwnedWriteHalf), DataChannelError> {
    let stream = tokio::select! {
        biased;
        _ = cancel.cancelled() => return Err(DataChannelError::Closed),
        result = tokio::time::timeout(TCP_CONNECT_TIMEOUT, TcpStream::connect(address)) => {
            match result {
                Ok(Ok(stream)) => stream,
                Ok(Err(e)) => return Err(e.into()),
                Err(_) => return Err(DataChannelError::Timeout),
            }
        }
    };
    stream.set_nodelay(true)?;

    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::with_capacity(TCP_BUFFER_SIZE, reader);

    write_handshake(&mut writer, room, local_id).await?;

    let accepted = tokio::select! {
        biased;
        _ = cancel.cancelled() => return Err(DataChannelError::Closed),
        result = tokio::time::timeout(TCP_HANDSHAKE_TIMEOUT, read_status(&mut reader)) => {
            match result {
                Ok(Ok(accepted)) => accepted,
                Ok(Err(e)) => return Err(e),
                Err(_) => return Err(DataChannelError::Timeout),
            }
        }
    };

    if !accepted {
        return Err(DataChannelError::PeerUnavailable(room.to_string()));
    }
    Ok((reader, writer))
}
