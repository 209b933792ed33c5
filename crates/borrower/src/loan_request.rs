//! # Loan Request Builder
//!
//! One request-loan tick targets the round that starts when the current
//! validator set ends.
//!
//! ## Flow
//!
//! ```text
//! borrow.active? ─no─► Disabled
//! validate intent ─err─► Configuration error
//! treasury active, not stopped ─stopped─► Stopped
//! round state == Open ─no─► NotOpen
//! existing request identical ─yes─► AlreadyParticipated
//! balance > required value ─no─► LowBalance
//! node synced ─no─► OutOfSync
//! provision key, sign confirmation, send payload ─► Sent
//! ```
//!
//! Required value = `max(1 coin, max_punishment) + fee + min_payment + stake`.

use std::fmt;
use std::time::Duration;

use borrower_common::coins::NANO_PER_COIN;
use borrower_common::{Address, Coins};
use tracing::{info, warn};

use crate::chain::ChainClient;
use crate::config::{BorrowConfig, BorrowConfigError};
use crate::console::KeyConsole;
use crate::error::TickError;
use crate::participation::DEFAULT_WAIT;
use crate::provisioning::{sign_confirmation, ConfirmationRequest};
use crate::records::{LoanRequestPayload, ParticipationState, Request};
use crate::treasury::{load_chain_params, Treasury};
use crate::wallet::{OutboundMessage, TxReceipt, Wallet};

/// Reserve kept on top of the stake for the request to be processed.
pub const BASE_RESERVE: Coins = Coins::from_nano(NANO_PER_COIN);

// ════════════════════════════════════════════════════════════════════════════
// COMPUTATION
// ════════════════════════════════════════════════════════════════════════════

/// Configured loan, or the chain's minimum stake when it is zero.
pub fn effective_loan(configured: Coins, min_stake: Coins) -> Coins {
    if configured.is_zero() {
        min_stake
    } else {
        configured
    }
}

/// Value attached to the request message. `None` on overflow.
pub fn required_value(max_punishment: Coins, fee: Coins, min_payment: Coins, stake: Coins) -> Option<Coins> {
    BASE_RESERVE
        .max(max_punishment)
        .checked_add(fee)?
        .checked_add(min_payment)?
        .checked_add(stake)
}

/// Whether `existing` already records the intent, so resubmitting would
/// change nothing.
pub fn is_same_request(existing: &Request, loan: Coins, borrow: &BorrowConfig) -> bool {
    existing.min_payment == borrow.min_payment
        && existing.validator_reward_share == borrow.validator_reward_share
        && existing.loan_amount == loan
}

// ════════════════════════════════════════════════════════════════════════════
// OUTCOME
// ════════════════════════════════════════════════════════════════════════════

/// How a request-loan tick ended when no error occurred.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoanOutcome {
    Disabled,
    Stopped,
    NotOpen { round_since: u32, state: ParticipationState },
    AlreadyParticipated { round_since: u32 },
    LowBalance { required: Coins, balance: Coins },
    OutOfSync { lag_secs: i64 },
    Sent { round_since: u32, loan: Coins, value: Coins, receipt: TxReceipt },
}

impl fmt::Display for LoanOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disabled => write!(f, "borrowing is inactive"),
            Self::Stopped => write!(f, "treasury is stopped"),
            Self::NotOpen { round_since, state } => {
                write!(f, "round {} is {}, loan requests are not accepted", round_since, state)
            }
            Self::AlreadyParticipated { round_since } => write!(f, "already participated in round {}", round_since),
            Self::LowBalance { required, balance } => {
                write!(f, "low balance, need more than {} but wallet has {}", required, balance)
            }
            Self::OutOfSync { lag_secs } => write!(f, "validator node is {}s behind", lag_secs),
            Self::Sent { round_since, loan, value, .. } => {
                write!(f, "requested loan of {} for round {}, sent {}", loan, round_since, value)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoanReport {
    pub outcome: LoanOutcome,
    pub wait: Duration,
}

// ════════════════════════════════════════════════════════════════════════════
// REQUEST
// ════════════════════════════════════════════════════════════════════════════

/// Collaborators of the request-loan task.
pub struct LoanRequester<'a> {
    pub chain: &'a dyn ChainClient,
    pub console: &'a dyn KeyConsole,
    pub wallet: &'a dyn Wallet,
    pub treasury: Address,
    pub adnl_address: [u8; 32],
    pub send_timeout: Duration,
}

impl LoanRequester<'_> {
    /// Runs one request-loan tick at wall-clock time `now`.
    pub async fn request_loan(&self, borrow: &BorrowConfig, now: u64) -> Result<LoanReport, TickError> {
        if !borrow.active {
            return Ok(LoanReport { outcome: LoanOutcome::Disabled, wait: DEFAULT_WAIT });
        }
        borrow.validate()?;
        let max_factor = borrow.max_factor();

        let block = self.chain.current_chain_head().await?;
        let treasury = Treasury::new(self.chain, block, self.treasury);
        treasury.ensure_active().await?;
        let params = load_chain_params(self.chain, &block).await?;
        let state = treasury.state().await?;

        let round_since = params.vset.utime_until;
        let until_round = Duration::from_secs((round_since as u64).saturating_sub(now)).max(DEFAULT_WAIT);

        if state.stopped {
            return Ok(LoanReport { outcome: LoanOutcome::Stopped, wait: DEFAULT_WAIT });
        }

        let participation = state.participation(round_since)?;
        if participation.state != ParticipationState::Open {
            return Ok(LoanReport {
                outcome: LoanOutcome::NotOpen { round_since, state: participation.state },
                wait: until_round,
            });
        }

        let loan = effective_loan(borrow.loan, params.min_stake);
        let validator = self.wallet.address().with_testnet(self.treasury.is_testnet());
        if let Some(existing) = participation.request_for(&validator.hash)? {
            if is_same_request(&existing, loan, borrow) {
                return Ok(LoanReport {
                    outcome: LoanOutcome::AlreadyParticipated { round_since },
                    wait: until_round,
                });
            }
            info!(round = round_since, "🔁 replacing existing loan request");
        }

        let max_punishment = treasury.max_punishment(loan).await?;
        let fee = treasury.request_loan_fee().await?;
        let value = required_value(max_punishment, fee, borrow.min_payment, borrow.stake)
            .ok_or(BorrowConfigError::ValueOverflow)?;

        let balance = self.wallet.balance(&block).await?;
        if balance <= value {
            return Ok(LoanReport {
                outcome: LoanOutcome::LowBalance { required: value, balance },
                wait: DEFAULT_WAIT,
            });
        }

        let sync = self.console.sync_status().await?;
        if !sync.is_synced() {
            return Ok(LoanReport { outcome: LoanOutcome::OutOfSync { lag_secs: sync.lag_secs() }, wait: DEFAULT_WAIT });
        }

        let loan_address = treasury.loan_address(&validator, round_since).await?;
        info!(round = round_since, %loan, %value, loan_address = %loan_address, "💎 requesting a loan");

        let expire_at = round_since.saturating_add(params.timings.validators_elected_for);
        let confirmation = sign_confirmation(
            self.console,
            ConfirmationRequest {
                round_since,
                expire_at,
                max_factor,
                loan_address: &loan_address,
                adnl_address: &self.adnl_address,
            },
        )
        .await?;

        let payload = LoanRequestPayload {
            now,
            round_since,
            loan,
            min_payment: borrow.min_payment,
            validator_reward_share: borrow.validator_reward_share,
            mev_reward_share: borrow.mev_reward_share,
            confirmation,
        };
        let message = OutboundMessage { dest: self.treasury, value, bounce: true, body: payload.to_cell()? };

        let receipt = self.wallet.send_and_wait(message, self.send_timeout).await.map_err(|e| {
            warn!(round = round_since, error = %e, "❌ loan request not confirmed");
            e
        })?;

        Ok(LoanReport {
            outcome: LoanOutcome::Sent { round_since, loan, value, receipt },
            wait: DEFAULT_WAIT,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use borrower_common::Cell;

    #[test]
    fn test_effective_loan_defaults_to_min_stake() {
        let min_stake = Coins::from_nano(5_000_000_000);
        assert_eq!(effective_loan(Coins::ZERO, min_stake), min_stake);
        assert_eq!(effective_loan(Coins::from_coins(7), min_stake), Coins::from_coins(7));
    }

    #[test]
    fn test_required_value_reserve_raised_to_punishment() {
        let fee = Coins::from_coins(1);
        let min_payment = Coins::from_coins(10);
        let stake = Coins::from_coins(100);
        assert_eq!(
            required_value(Coins::from_nano(500), fee, min_payment, stake),
            Some(Coins::from_coins(1 + 1 + 10 + 100))
        );
        assert_eq!(
            required_value(Coins::from_coins(50), fee, min_payment, stake),
            Some(Coins::from_coins(50 + 1 + 10 + 100))
        );
        assert_eq!(required_value(Coins::from_nano(u128::MAX), fee, min_payment, stake), None);
    }

    #[test]
    fn test_same_request_compares_three_fields() {
        let borrow = BorrowConfig {
            active: true,
            min_payment: Coins::from_nano(10),
            validator_reward_share: 500,
            ..BorrowConfig::default()
        };
        let existing = Request {
            min_payment: Coins::from_nano(10),
            validator_reward_share: 500,
            loan_amount: Coins::from_nano(1_000),
            accrue_amount: Coins::ZERO,
            stake_amount: Coins::from_nano(99),
            new_stake_msg: Cell::empty(),
        };
        assert!(is_same_request(&existing, Coins::from_nano(1_000), &borrow));
        assert!(!is_same_request(&existing, Coins::from_nano(1_001), &borrow));
        let changed = BorrowConfig { validator_reward_share: 501, ..borrow.clone() };
        assert!(!is_same_request(&existing, Coins::from_nano(1_000), &changed));
    }
}
