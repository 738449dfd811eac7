//! Room codes and shareable room links.
//!
//! The sender mints a [`RoomCode`] and registers under it; the receiver
//! names the same code to join. A [`RoomLink`] adds the provider address
//! in front of the code, carried as a fragment: `host:port#CODE`.

use std::fmt;
use std::str::FromStr;

use rand::Rng;

use crate::ProtocolError;
use crate::constants::{ROOM_CODE_ALPHABET, ROOM_CODE_LEN};

/// Six uppercase alphanumeric characters naming a session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RoomCode(String);

impl RoomCode {
    /// Mints a fresh random room code.
    pub fn generate() -> Self {
        let mut rng = rand::thread_rng();
        let code = (0..ROOM_CODE_LEN)
            .map(|_| ROOM_CODE_ALPHABET[rng.gen_range(0..ROOM_CODE_ALPHABET.len())] as char)
            .collect();
        RoomCode(code)
    }

    /// Parses a user-typed code: whitespace is trimmed and letters uppercased.
    pub fn parse(input: &str) -> Result<Self, ProtocolError> {
        let code = input.trim().to_ascii_uppercase();
        if code.len() != ROOM_CODE_LEN {
            return Err(ProtocolError::InvalidRoomCode(format!(
                "expected {ROOM_CODE_LEN} characters, got {}",
                code.chars().count()
            )));
        }
        if !code.bytes().all(|b| ROOM_CODE_ALPHABET.contains(&b)) {
            return Err(ProtocolError::InvalidRoomCode(format!(
                "only letters and digits allowed: {code}"
            )));
        }
        Ok(RoomCode(code))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoomCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for RoomCode {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        RoomCode::parse(s)
    }
}

impl AsRef<str> for RoomCode {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Optional scheme prefix accepted in front of a room link.
const LINK_SCHEME: &str = "roomdrop://";

/// Provider address plus room code, written `host:port#CODE`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomLink {
    pub address: String,
    pub code: RoomCode,
}

impl RoomLink {
    pub fn new(address: impl Into<String>, code: RoomCode) -> Self {
        Self {
            address: address.into(),
            code,
        }
    }

    /// Parses `host:port#CODE`, optionally prefixed with `roomdrop://`.
    pub fn parse(input: &str) -> Result<Self, ProtocolError> {
        let trimmed = input.trim();
        let trimmed = trimmed.strip_prefix(LINK_SCHEME).unwrap_or(trimmed);
        let (address, fragment) = trimmed.split_once('#').ok_or_else(|| {
            ProtocolError::InvalidRoomLink(format!("missing #CODE fragment: {input}"))
        })?;
        let address = address.trim_end_matches('/');
        if address.is_empty() {
            return Err(ProtocolError::InvalidRoomLink(format!(
                "missing address: {input}"
            )));
        }
        Ok(Self {
            address: address.to_string(),
            code: RoomCode::parse(fragment)?,
        })
    }
}

impl fmt::Display for RoomLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.address, self.code)
    }
}

impl FromStr for RoomLink {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        RoomLink::parse(s)
    }
}
