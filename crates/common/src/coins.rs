//! Nanocoin amounts.
//!
//! On-chain coin amounts are serialized as `VarUInteger 16`: a 4-bit byte
//! length followed by at most 15 big-endian bytes. Every representable
//! amount therefore fits in 120 bits and `u128` holds it exactly.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer};
use thiserror::Error;

/// Nanocoins per whole coin.
pub const NANO_PER_COIN: u128 = 1_000_000_000;

/// Largest byte length the `len:uint4` prefix can describe.
pub const MAX_COIN_BYTES: usize = 15;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CoinsError {
    #[error("empty amount")]
    Empty,

    #[error("invalid amount '{0}'")]
    Invalid(String),

    #[error("amount '{0}' has more than 9 fractional digits")]
    TooPrecise(String),

    #[error("amount '{0}' overflows")]
    Overflow(String),
}

/// An amount of nanocoins.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Coins(u128);

impl Coins {
    pub const ZERO: Coins = Coins(0);

    pub const fn from_nano(nano: u128) -> Self {
        Coins(nano)
    }

    /// Whole coins, for constants such as reserves.
    pub const fn from_coins(coins: u64) -> Self {
        Coins(coins as u128 * NANO_PER_COIN)
    }

    pub const fn nano(&self) -> u128 {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }

    pub fn checked_add(self, other: Coins) -> Option<Coins> {
        self.0.checked_add(other.0).map(Coins)
    }

    pub fn saturating_add(self, other: Coins) -> Coins {
        Coins(self.0.saturating_add(other.0))
    }

    /// Number of big-endian bytes needed for the wire form.
    pub fn byte_len(&self) -> usize {
        let bits = 128 - self.0.leading_zeros() as usize;
        bits.div_ceil(8)
    }
}

impl FromStr for Coins {
    type Err = CoinsError;

    /// Parses a decimal coin amount such as `"1.5"` or `"1000"`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(CoinsError::Empty);
        }

        let (whole, frac) = match s.split_once('.') {
            Some((w, f)) => (w, f),
            None => (s, ""),
        };
        if whole.is_empty() && frac.is_empty() {
            return Err(CoinsError::Invalid(s.to_string()));
        }
        if !whole.chars().all(|c| c.is_ascii_digit()) || !frac.chars().all(|c| c.is_ascii_digit()) {
            return Err(CoinsError::Invalid(s.to_string()));
        }
        if frac.len() > 9 {
            return Err(CoinsError::TooPrecise(s.to_string()));
        }

        let whole: u128 = if whole.is_empty() {
            0
        } else {
            whole.parse().map_err(|_| CoinsError::Overflow(s.to_string()))?
        };
        let mut frac_nano: u128 = 0;
        if !frac.is_empty() {
            let padded = format!("{:0<9}", frac);
            frac_nano = padded.parse().map_err(|_| CoinsError::Invalid(s.to_string()))?;
        }

        let nano = whole
            .checked_mul(NANO_PER_COIN)
            .and_then(|n| n.checked_add(frac_nano))
            .ok_or_else(|| CoinsError::Overflow(s.to_string()))?;

        let coins = Coins(nano);
        if coins.byte_len() > MAX_COIN_BYTES {
            return Err(CoinsError::Overflow(s.to_string()));
        }
        Ok(coins)
    }
}

impl fmt::Display for Coins {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let whole = self.0 / NANO_PER_COIN;
        let frac = self.0 % NANO_PER_COIN;
        if frac == 0 {
            return write!(f, "{}", whole);
        }
        let frac = format!("{:09}", frac);
        write!(f, "{}.{}", whole, frac.trim_end_matches('0'))
    }
}

impl<'de> Deserialize<'de> for Coins {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}
