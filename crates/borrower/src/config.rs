//! # Borrower Configuration
//!
//! Typed view of `borrower.toml`.
//!
//! ```toml
//! treasury = "EQ..."
//!
//! [borrow]
//! active = true
//! stake = "300000"
//! loan = "0"                     # 0 = protocol minimum stake
//! min_payment = "10"
//! max_factor_ratio = 1.5
//! validator_reward_share = 4000  # basis points
//! mev_reward_share = 4000
//!
//! [wallet]
//! version = "v4r2"
//! address = "Ef..."
//! key_path = "/etc/borrower/wallet.pk"
//!
//! [validator_engine]
//! executable = "/usr/bin/validator-engine-console"
//! client_key = "/var/ton-work/keys/client"
//! server_key = "/var/ton-work/keys/server.pub"
//! ip = "127.0.0.1"
//! control_port = 3030
//! adnl_address = "..."           # 64 hex chars
//!
//! [chain]
//! endpoint = "https://toncenter.com/api/v2"
//! ```
//!
//! `[borrow]` is re-read on every request-loan tick; every other section
//! is read once at startup.

use std::path::{Path, PathBuf};
use std::time::Duration;

use borrower_common::config::load_from_file;
use borrower_common::{Address, Coins, ConfigError};
use serde::Deserialize;
use thiserror::Error;

use crate::records::MAX_REWARD_SHARE;
use crate::wallet::{WalletVersion, DEFAULT_SUBWALLET_ID};

pub const DEFAULT_CONFIG_FILE: &str = "borrower.toml";

/// 16.16 fixed-point scale of `max_factor`.
pub const MAX_FACTOR_SCALE: f64 = 65_536.0;

// ════════════════════════════════════════════════════════════════════════════
// SECTIONS
// ════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Deserialize)]
pub struct BorrowerConfig {
    pub treasury: Address,
    #[serde(default)]
    pub borrow: BorrowConfig,
    pub wallet: WalletConfig,
    pub validator_engine: ValidatorEngineConfig,
    pub chain: ChainConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
}

/// Operator borrowing intent.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BorrowConfig {
    #[serde(default)]
    pub active: bool,
    #[serde(default)]
    pub stake: Coins,
    /// Zero means the chain's minimum stake.
    #[serde(default)]
    pub loan: Coins,
    #[serde(default)]
    pub min_payment: Coins,
    #[serde(default = "default_max_factor_ratio")]
    pub max_factor_ratio: f64,
    #[serde(default)]
    pub validator_reward_share: u16,
    #[serde(default)]
    pub mev_reward_share: u16,
}

fn default_max_factor_ratio() -> f64 {
    1.0
}

impl Default for BorrowConfig {
    fn default() -> Self {
        Self {
            active: false,
            stake: Coins::ZERO,
            loan: Coins::ZERO,
            min_payment: Coins::ZERO,
            max_factor_ratio: default_max_factor_ratio(),
            validator_reward_share: 0,
            mev_reward_share: 0,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WalletConfig {
    pub version: WalletVersion,
    pub address: Address,
    pub key_path: PathBuf,
    #[serde(default = "default_subwallet_id")]
    pub subwallet_id: u32,
    #[serde(default = "default_send_timeout_secs")]
    pub send_timeout_secs: u64,
}

fn default_subwallet_id() -> u32 {
    DEFAULT_SUBWALLET_ID
}

fn default_send_timeout_secs() -> u64 {
    120
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ValidatorEngineConfig {
    pub executable: PathBuf,
    pub client_key: PathBuf,
    pub server_key: PathBuf,
    #[serde(default = "default_console_ip")]
    pub ip: String,
    pub control_port: u16,
    pub adnl_address: String,
    #[serde(default = "default_console_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_console_ip() -> String {
    "127.0.0.1".to_string()
}

fn default_console_timeout_secs() -> u64 {
    10
}

impl ValidatorEngineConfig {
    /// The validator's ADNL address as 256 bits.
    pub fn adnl(&self) -> Result<[u8; 32], ConfigError> {
        let bytes = hex::decode(self.adnl_address.trim())
            .map_err(|e| ConfigError::invalid("validator_engine.adnl_address", e.to_string()))?;
        bytes
            .try_into()
            .map_err(|_| ConfigError::invalid("validator_engine.adnl_address", "expected 64 hex characters"))
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ChainConfig {
    pub endpoint: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_chain_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_chain_retries")]
    pub retries: u32,
}

fn default_chain_timeout_secs() -> u64 {
    15
}

fn default_chain_retries() -> u32 {
    3
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SchedulerConfig {
    #[serde(default = "default_process_jitter_secs")]
    pub process_jitter_secs: u64,
    #[serde(default)]
    pub request_jitter_secs: u64,
}

fn default_process_jitter_secs() -> u64 {
    60
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self { process_jitter_secs: default_process_jitter_secs(), request_jitter_secs: 0 }
    }
}

// ════════════════════════════════════════════════════════════════════════════
// LOADING
// ════════════════════════════════════════════════════════════════════════════

impl BorrowerConfig {
    /// Loads and checks the static sections. `[borrow]` is only parsed here;
    /// it is validated per tick.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let config: Self = load_from_file(path)?;
        config.validator_engine.adnl()?;
        if config.chain.endpoint.trim().is_empty() {
            return Err(ConfigError::invalid("chain.endpoint", "must not be empty"));
        }
        if config.wallet.send_timeout_secs == 0 {
            return Err(ConfigError::invalid("wallet.send_timeout_secs", "must be positive"));
        }
        Ok(config)
    }
}

#[derive(Deserialize)]
struct BorrowSection {
    #[serde(default)]
    borrow: BorrowConfig,
}

/// Re-reads only the `[borrow]` section of the config file.
pub fn load_borrow_config(path: &Path) -> Result<BorrowConfig, ConfigError> {
    Ok(load_from_file::<BorrowSection>(path)?.borrow)
}

// ════════════════════════════════════════════════════════════════════════════
// BORROW INTENT VALIDATION
// ════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Error, PartialEq)]
pub enum BorrowConfigError {
    #[error("max_factor_ratio must be >= 1.0, got {0}")]
    MaxFactorTooLow(f64),

    #[error("max_factor_ratio {0} does not fit 16.16 fixed point")]
    MaxFactorTooHigh(f64),

    #[error("{field} must be at most 10000 basis points, got {value}")]
    RewardShare { field: &'static str, value: u16 },

    #[error("stake plus fees overflows a coin amount")]
    ValueOverflow,

    #[error(transparent)]
    Load(#[from] ConfigError),
}

impl BorrowConfig {
    /// Checks the intent in order: factor ratio, then reward shares.
    pub fn validate(&self) -> Result<(), BorrowConfigError> {
        let ratio = self.max_factor_ratio;
        if ratio.is_nan() || ratio < 1.0 {
            return Err(BorrowConfigError::MaxFactorTooLow(ratio));
        }
        if (ratio * MAX_FACTOR_SCALE).round() > u32::MAX as f64 {
            return Err(BorrowConfigError::MaxFactorTooHigh(ratio));
        }
        if self.validator_reward_share > MAX_REWARD_SHARE {
            return Err(BorrowConfigError::RewardShare {
                field: "validator_reward_share",
                value: self.validator_reward_share,
            });
        }
        if self.mev_reward_share > MAX_REWARD_SHARE {
            return Err(BorrowConfigError::RewardShare { field: "mev_reward_share", value: self.mev_reward_share });
        }
        Ok(())
    }

    /// `round(max_factor_ratio * 65536)`. Call after [`validate`](Self::validate).
    pub fn max_factor(&self) -> u32 {
        (self.max_factor_ratio * MAX_FACTOR_SCALE).round() as u32
    }
}
