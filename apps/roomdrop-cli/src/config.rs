//! Roomdrop configuration management.
//!
//! Configuration is stored as TOML:
//! - Linux: `~/.config/roomdrop/roomdrop.toml`
//! - Windows: `%APPDATA%/roomdrop/roomdrop.toml`

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::bail;
use roomdrop_protocol::constants::{
    BACKPRESSURE_COOLDOWN, CHUNK_SIZE, COMPLETION_DELAY, HIGH_WATER_MARK, LARGE_FILE_THRESHOLD,
};
use roomdrop_transfer::TransferConfig;
use serde::{Deserialize, Serialize};

/// Roomdrop configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Bytes per chunk message.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Buffered bytes above which the sender pauses.
    #[serde(default = "default_high_water_mark")]
    pub high_water_mark: usize,

    /// Pause length once above the high-water mark, in milliseconds.
    #[serde(default = "default_cooldown_ms")]
    pub cooldown_ms: u64,

    /// Delay after a finished send before the next one, in milliseconds.
    #[serde(default = "default_completion_delay_ms")]
    pub completion_delay_ms: u64,

    /// Files above this many bytes ask for confirmation.
    #[serde(default = "default_large_file_threshold")]
    pub large_file_threshold: u64,

    /// Address the sender listens on (port 0 = auto-assign).
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,

    /// Host printed in the room link instead of the bound address.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub advertise_host: Option<String>,

    /// Where received files are written.
    #[serde(default = "default_download_dir")]
    pub download_dir: PathBuf,
}

fn default_chunk_size() -> usize {
    CHUNK_SIZE
}

fn default_high_water_mark() -> usize {
    HIGH_WATER_MARK
}

fn default_cooldown_ms() -> u64 {
    BACKPRESSURE_COOLDOWN.as_millis() as u64
}

fn default_completion_delay_ms() -> u64 {
    COMPLETION_DELAY.as_millis() as u64
}

fn default_large_file_threshold() -> u64 {
    LARGE_FILE_THRESHOLD
}

fn default_listen_addr() -> String {
    "0.0.0.0:0".into()
}

fn default_download_dir() -> PathBuf {
    PathBuf::from(".")
}

impl Default for Config {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            high_water_mark: default_high_water_mark(),
            cooldown_ms: default_cooldown_ms(),
            completion_delay_ms: default_completion_delay_ms(),
            large_file_threshold: default_large_file_threshold(),
            listen_addr: default_listen_addr(),
            advertise_host: None,
            download_dir: default_download_dir(),
        }
    }
}

impl Config {
    /// Loads configuration from disk, or creates a default if not found.
    pub fn load() -> anyhow::Result<Self> {
        Self::load_from(&config_path()?)
    }

    /// Loads configuration from `path`, writing defaults there if missing.
    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Config = toml::from_str(&content)?;
            config.validate()?;
            Ok(config)
        } else {
            let config = Config::default();
            config.save_to(path)?;
            Ok(config)
        }
    }

    /// Saves the configuration to `path`.
    pub fn save_to(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;

        // Restrict permissions on Unix.
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
        }

        tracing::debug!(path = %path.display(), "configuration saved");
        Ok(())
    }

    /// Rejects values the transfer pipeline cannot run with.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.chunk_size == 0 {
            bail!("chunk_size must be at least 1");
        }
        if self.listen_addr.trim().is_empty() {
            bail!("listen_addr must not be empty");
        }
        Ok(())
    }

    /// Transfer tunables derived from this configuration.
    pub fn transfer_config(&self) -> TransferConfig {
        TransferConfig {
            chunk_size: self.chunk_size,
            high_water_mark: self.high_water_mark,
            cooldown: Duration::from_millis(self.cooldown_ms),
            completion_delay: Duration::from_millis(self.completion_delay_ms),
            large_file_threshold: self.large_file_threshold,
        }
    }
}

/// Returns the platform-specific configuration file path.
pub fn config_path() -> anyhow::Result<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        let appdata =
            std::env::var("APPDATA").unwrap_or_else(|_| "C:\\Users\\Default\\AppData".into());
        Ok(PathBuf::from(appdata).join("roomdrop").join("roomdrop.toml"))
    }

    #[cfg(not(target_os = "windows"))]
    {
        let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".into());
        Ok(PathBuf::from(home)
            .join(".config")
            .join("roomdrop")
            .join("roomdrop.toml"))
    }
}
