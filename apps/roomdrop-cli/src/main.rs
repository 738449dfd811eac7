//! Roomdrop command-line entry point.

mod app;
mod config;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "roomdrop", version)]
#[command(about = "Send files to one peer over a shared room code", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Open a room and send files to the first peer that joins.
    Send {
        /// Files to send, one after another.
        files: Vec<PathBuf>,

        /// Address to listen on (overrides `listen_addr`).
        #[arg(long, value_name = "ADDR")]
        listen: Option<String>,

        /// Host to print in the room link (overrides `advertise_host`).
        #[arg(long, value_name = "HOST")]
        advertise: Option<String>,

        /// Send large files without asking.
        #[arg(short, long)]
        yes: bool,
    },
    /// Join a room and save every file the sender shares.
    Receive {
        /// Room link printed by the sender, `host:port#CODE`.
        link: String,

        /// Directory for received files (overrides `download_dir`).
        #[arg(short, long, value_name = "DIR")]
        out: Option<PathBuf>,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize structured logging.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    tracing::debug!(version = env!("CARGO_PKG_VERSION"), "starting roomdrop");

    let mut config = config::Config::load()?;

    let rt = tokio::runtime::Runtime::new()?;
    match cli.command {
        Command::Send {
            files,
            listen,
            advertise,
            yes,
        } => {
            if let Some(listen) = listen {
                config.listen_addr = listen;
            }
            if advertise.is_some() {
                config.advertise_host = advertise;
            }
            rt.block_on(app::send(config, files, yes))?;
        }
        Command::Receive { link, out } => {
            if let Some(out) = out {
                config.download_dir = out;
            }
            rt.block_on(app::receive(config, &link))?;
        }
    }

    tracing::debug!("roomdrop shut down cleanly");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_send_with_flags() {
        let cli = Cli::parse_from([
            "roomdrop", "send", "a.txt", "b.png", "--listen", "0.0.0.0:4040", "--yes",
        ]);
        match cli.command {
            Command::Send {
                files, listen, yes, ..
            } => {
                assert_eq!(files, vec![PathBuf::from("a.txt"), PathBuf::from("b.png")]);
                assert_eq!(listen.as_deref(), Some("0.0.0.0:4040"));
                assert!(yes);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn parses_receive_with_out_dir() {
        let cli = Cli::parse_from(["roomdrop", "receive", "10.0.0.2:4040#X7K2QP", "-o", "dl"]);
        match cli.command {
            Command::Receive { link, out } => {
                assert_eq!(link, "10.0.0.2:4040#X7K2QP");
                assert_eq!(out, Some(PathBuf::from("dl")));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn receive_requires_link() {
        assert!(Cli::try_parse_from(["roomdrop", "receive"]).is_err());
    }
}
