//! Tick-level error type.
//!
//! Every failure inside one scheduler tick ends up here and is classified
//! so the log says whether to wait it out, check versions or fix the
//! config file.

use std::fmt;

use borrower_common::CellError;
use thiserror::Error;

use crate::chain::ChainError;
use crate::config::BorrowConfigError;
use crate::console::ConsoleError;
use crate::wallet::WalletError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Communication failure; the next tick retries.
    Transport,
    /// Unexpected record layout or console output, likely version skew.
    Protocol,
    /// Operator intent is invalid until the config file is fixed.
    Configuration,
    /// The tick itself crashed.
    Internal,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Transport => "transport",
            Self::Protocol => "protocol",
            Self::Configuration => "configuration",
            Self::Internal => "internal",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Error)]
pub enum TickError {
    #[error(transparent)]
    Chain(#[from] ChainError),

    #[error("validator console: {0}")]
    Console(#[from] ConsoleError),

    #[error("wallet: {0}")]
    Wallet(#[from] WalletError),

    #[error("record codec: {0}")]
    Codec(#[from] CellError),

    #[error("borrow config: {0}")]
    Config(#[from] BorrowConfigError),

    #[error("tick panicked: {0}")]
    Panicked(String),
}

impl TickError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Chain(e) if e.is_transport() => ErrorKind::Transport,
            Self::Chain(_) | Self::Codec(_) => ErrorKind::Protocol,
            Self::Console(e) if e.is_transport() => ErrorKind::Transport,
            Self::Console(_) => ErrorKind::Protocol,
            Self::Wallet(WalletError::Key(_)) => ErrorKind::Configuration,
            Self::Wallet(e) if e.is_transport() => ErrorKind::Transport,
            Self::Wallet(_) => ErrorKind::Protocol,
            Self::Config(_) => ErrorKind::Configuration,
            Self::Panicked(_) => ErrorKind::Internal,
        }
    }
}
