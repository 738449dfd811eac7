//! Command orchestration: wires a TCP provider to a session and reports
//! what happens on the terminal.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use anyhow::{Context, bail};
use roomdrop_data_channel::TcpProvider;
use roomdrop_protocol::RoomLink;
use roomdrop_session::{Failure, Notice, SessionHandle};
use roomdrop_transfer::{FileSource, SendOutcome, TransferProgress, format_bytes};
use tokio::sync::{mpsc, watch};

use crate::config::Config;

/// Opens a room, waits for one peer and sends `files` to it in order.
pub async fn send(config: Config, files: Vec<PathBuf>, yes: bool) -> anyhow::Result<()> {
    config.validate()?;
    let transfer = config.transfer_config();
    let threshold = transfer.large_file_threshold;

    let provider = TcpProvider::listen(config.listen_addr.as_str())
        .await
        .with_context(|| format!("cannot listen on {}", config.listen_addr))?;
    let bound = provider
        .local_addr()
        .context("listening provider has no local address")?;

    let session = SessionHandle::start(provider, None, transfer);
    let mut notices = session
        .take_notices()
        .context("notice stream already taken")?;

    let code = loop {
        match notices.recv().await {
            Some(Notice::RoomReady { code }) => break code,
            Some(Notice::Failed(failure)) => return Err(failure_error(failure)),
            Some(_) => {}
            None => bail!("session ended before the room opened"),
        }
    };

    let link = RoomLink::new(advertised_address(bound, config.advertise_host.as_deref()), code);
    println!("Room code: {}", link.code);
    println!("Share this link: {link}");
    println!("Waiting for a peer...");

    let reporter = tokio::spawn(report_notices(notices));
    let progress = tokio::spawn(report_progress(session.send_progress(), "sent"));

    let connected = session.wait_connected().await?;
    if let Some(fingerprint) = connected.fingerprint {
        println!("Connected. Vibe check: {fingerprint}");
    }

    for path in &files {
        session.wait_ready().await?;
        let source = FileSource::open(path)
            .await
            .with_context(|| format!("cannot open {}", path.display()))?;

        let size = source.meta().size;
        let confirmed = yes || size <= threshold || confirm_large(path, size).await?;
        if !confirmed {
            println!("Skipped {}", path.display());
            continue;
        }

        match session.send_file(source, confirmed).await? {
            SendOutcome::Completed { .. } => {}
            SendOutcome::Aborted { sent } => {
                bail!(
                    "peer left during {} after {}",
                    path.display(),
                    format_bytes(sent)
                );
            }
        }
    }

    if !files.is_empty() {
        // Let the last file's completion delay run out before idling.
        let _ = session.wait_ready().await;
        println!("All files sent. Press Ctrl-C to close the room.");
    }

    tokio::select! {
        _ = session.wait_disconnected() => {}
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("interrupted, closing session");
            session.close().await;
            session.wait_disconnected().await;
        }
    }

    progress.abort();
    let _ = reporter.await;
    Ok(())
}

/// Joins the room named by `link` and saves each received file.
pub async fn receive(config: Config, link: &str) -> anyhow::Result<()> {
    config.validate()?;
    let link = RoomLink::parse(link)?;
    let out = config.download_dir.clone();
    tokio::fs::create_dir_all(&out)
        .await
        .with_context(|| format!("cannot create {}", out.display()))?;

    let provider = TcpProvider::dial(link.address.clone());
    let session = SessionHandle::start(provider, Some(link.code.clone()), config.transfer_config());
    let mut notices = session
        .take_notices()
        .context("notice stream already taken")?;
    let progress = tokio::spawn(report_progress(session.receive_progress(), "received"));

    let result = loop {
        let notice = tokio::select! {
            notice = notices.recv() => notice,
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("interrupted, closing session");
                session.close().await;
                continue;
            }
        };

        match notice {
            Some(Notice::Joining { code }) => println!("Joining room {code} at {}...", link.address),
            Some(Notice::Connected { fingerprint, .. }) => {
                println!("Connected. Vibe check: {fingerprint}");
            }
            Some(Notice::FileStarted { meta }) => {
                println!("Receiving {} ({})", meta.name, format_bytes(meta.size));
            }
            Some(Notice::FileReceived { index, file }) => {
                let path = session
                    .save(index, out.clone())
                    .await
                    .with_context(|| format!("cannot save {}", file.name()))?;
                println!("Saved {} to {}", file.display_label(), path.display());
            }
            Some(Notice::Failed(failure)) => break Err(failure_error(failure)),
            Some(Notice::Disconnected) | None => break Ok(()),
            Some(other) => tracing::debug!(?other, "notice"),
        }
    };

    progress.abort();
    if result.is_ok() {
        println!("Sender left the room.");
    }
    result
}

/// Host and port printed in the room link.
///
/// An unspecified bind address is useless to the peer, so the loopback
/// address stands in unless a host is configured.
fn advertised_address(bound: SocketAddr, host: Option<&str>) -> String {
    match host {
        Some(host) => format!("{host}:{}", bound.port()),
        None if bound.ip().is_unspecified() => {
            tracing::warn!("listening on all interfaces; pass --advertise HOST for remote peers");
            let loopback = if bound.is_ipv4() {
                SocketAddr::from(([127, 0, 0, 1], bound.port()))
            } else {
                SocketAddr::from((std::net::Ipv6Addr::LOCALHOST, bound.port()))
            };
            loopback.to_string()
        }
        None => bound.to_string(),
    }
}

fn failure_error(failure: Failure) -> anyhow::Error {
    match failure {
        Failure::PeerNotFound { code } => {
            anyhow::anyhow!("no sender in room {code}; check the code and that the sender is online")
        }
        Failure::Provider { message } => anyhow::anyhow!("connection failed: {message}"),
    }
}

async fn confirm_large(path: &Path, size: u64) -> anyhow::Result<bool> {
    let prompt = format!(
        "{} is {}. Send anyway? [y/N] ",
        path.display(),
        format_bytes(size)
    );
    let answer = tokio::task::spawn_blocking(move || -> std::io::Result<String> {
        use std::io::Write;
        let mut stdout = std::io::stdout();
        stdout.write_all(prompt.as_bytes())?;
        stdout.flush()?;
        let mut line = String::new();
        std::io::stdin().read_line(&mut line)?;
        Ok(line)
    })
    .await??;
    Ok(is_affirmative(&answer))
}

fn is_affirmative(answer: &str) -> bool {
    matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}

async fn report_notices(mut notices: mpsc::UnboundedReceiver<Notice>) {
    while let Some(notice) = notices.recv().await {
        match notice {
            Notice::FileSent { name, bytes } => println!("Sent {name} ({})", format_bytes(bytes)),
            Notice::SendAborted { name, sent } => {
                println!("Stopped {name} after {}", format_bytes(sent));
            }
            Notice::SendFailed { name, message } => println!("Failed to send {name}: {message}"),
            Notice::Disconnected => {
                println!("Peer left the room.");
                break;
            }
            Notice::Failed(failure) => {
                println!("{}", failure_error(failure));
                break;
            }
            other => tracing::debug!(?other, "notice"),
        }
    }
}

/// Logs progress in steps of ten percent.
async fn report_progress(mut progress: watch::Receiver<TransferProgress>, verb: &'static str) {
    let mut last_step = None;
    while progress.changed().await.is_ok() {
        let current = *progress.borrow_and_update();
        if current.total_bytes == 0 && !current.complete {
            last_step = None;
            continue;
        }
        let step = progress_step(&current);
        if last_step != Some(step) {
            last_step = Some(step);
            tracing::info!(
                percent = step * 10,
                transferred = %format_bytes(current.transferred_bytes),
                total = %format_bytes(current.total_bytes),
                "{verb}"
            );
        }
    }
}

fn progress_step(progress: &TransferProgress) -> u32 {
    (progress.percent() / 10.0).floor().clamp(0.0, 10.0) as u32
}
