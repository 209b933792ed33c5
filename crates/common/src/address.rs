//! Standard account addresses.
//!
//! Accepted input forms:
//!
//! | Form          | Example                                   |
//! |---------------|-------------------------------------------|
//! | Raw           | `-1:3333...3333`                          |
//! | User-friendly | `EQ...` / `kQ...` (36 bytes, base64 or base64url) |
//!
//! The user-friendly form is `flags:u8 workchain:i8 hash:[u8;32] crc16:u16`
//! where `crc16` is CRC-16/XMODEM over the first 34 bytes.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use base64::engine::general_purpose::{STANDARD, URL_SAFE, URL_SAFE_NO_PAD};
use base64::Engine as _;
use crc::{Crc, CRC_16_XMODEM};
use serde::{Deserialize, Deserializer};
use thiserror::Error;

const FLAG_BOUNCEABLE: u8 = 0x11;
const FLAG_NON_BOUNCEABLE: u8 = 0x51;
const FLAG_TESTNET: u8 = 0x80;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AddressError {
    #[error("invalid raw address '{0}'")]
    InvalidRaw(String),

    #[error("invalid user-friendly address '{0}'")]
    InvalidFriendly(String),

    #[error("address checksum mismatch for '{0}'")]
    Checksum(String),
}

/// A standard (`addr_std`) address without anycast.
///
/// Equality and hashing ignore the testnet display hint.
#[derive(Debug, Clone, Copy)]
pub struct Address {
    pub workchain: i8,
    pub hash: [u8; 32],
    /// Display hint carried over from a parsed testnet-only address.
    testnet: bool,
}

impl Address {
    pub const fn new(workchain: i8, hash: [u8; 32]) -> Self {
        Self { workchain, hash, testnet: false }
    }

    pub fn is_testnet(&self) -> bool {
        self.testnet
    }

    /// Returns a copy rendered with the testnet flag set or cleared.
    #[must_use]
    pub fn with_testnet(mut self, testnet: bool) -> Self {
        self.testnet = testnet;
        self
    }

    pub fn to_raw(&self) -> String {
        format!("{}:{}", self.workchain, hex::encode(self.hash))
    }

    pub fn to_friendly(&self, bounceable: bool) -> String {
        let mut flags = if bounceable { FLAG_BOUNCEABLE } else { FLAG_NON_BOUNCEABLE };
        if self.testnet {
            flags |= FLAG_TESTNET;
        }
        let mut bytes = Vec::with_capacity(36);
        bytes.push(flags);
        bytes.push(self.workchain as u8);
        bytes.extend_from_slice(&self.hash);
        let crc = crc16_xmodem(&bytes);
        bytes.extend_from_slice(&crc.to_be_bytes());
        URL_SAFE.encode(bytes)
    }

    fn parse_raw(s: &str) -> Result<Self, AddressError> {
        let (wc, hash_hex) = s
            .split_once(':')
            .ok_or_else(|| AddressError::InvalidRaw(s.to_string()))?;
        let workchain: i8 = wc.parse().map_err(|_| AddressError::InvalidRaw(s.to_string()))?;
        let bytes = hex::decode(hash_hex).map_err(|_| AddressError::InvalidRaw(s.to_string()))?;
        let hash: [u8; 32] = bytes
            .try_into()
            .map_err(|_| AddressError::InvalidRaw(s.to_string()))?;
        Ok(Self::new(workchain, hash))
    }

    fn parse_friendly(s: &str) -> Result<Self, AddressError> {
        let bytes = URL_SAFE
            .decode(s)
            .or_else(|_| STANDARD.decode(s))
            .or_else(|_| URL_SAFE_NO_PAD.decode(s))
            .map_err(|_| AddressError::InvalidFriendly(s.to_string()))?;
        if bytes.len() != 36 {
            return Err(AddressError::InvalidFriendly(s.to_string()));
        }

        let expected = u16::from_be_bytes([bytes[34], bytes[35]]);
        if crc16_xmodem(&bytes[..34]) != expected {
            return Err(AddressError::Checksum(s.to_string()));
        }

        let flags = bytes[0];
        let testnet = flags & FLAG_TESTNET != 0;
        let tag = flags & !FLAG_TESTNET;
        if tag != FLAG_BOUNCEABLE && tag != FLAG_NON_BOUNCEABLE {
            return Err(AddressError::InvalidFriendly(s.to_string()));
        }

        let mut hash = [0u8; 32];
        hash.copy_from_slice(&bytes[2..34]);
        Ok(Self { workchain: bytes[1] as i8, hash, testnet })
    }
}

impl PartialEq for Address {
    fn eq(&self, other: &Self) -> bool {
        self.workchain == other.workchain && self.hash == other.hash
    }
}

impl Eq for Address {}

impl Hash for Address {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.workchain.hash(state);
        self.hash.hash(state);
    }
}

impl FromStr for Address {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.contains(':') {
            Self::parse_raw(s)
        } else {
            Self::parse_friendly(s)
        }
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_friendly(true))
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

const XMODEM: Crc<u16> = Crc::<u16>::new(&CRC_16_XMODEM);

/// CRC-16/XMODEM (poly 0x1021, init 0).
pub fn crc16_xmodem(data: &[u8]) -> u16 {
    XMODEM.checksum(data)
}
