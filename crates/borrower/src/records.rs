//! # Treasury Records
//!
//! Typed views of the treasury's on-chain records and of the message
//! bodies this daemon produces. Field order and widths are a contract with
//! the deployed treasury contract and must match it bit for bit.
//!
//! ## Participation (value of the `participations` dictionary, key = round)
//!
//! ```text
//! state:uint4 size:uint16
//! sorted:(HashmapE 112 ...)
//! requests:(HashmapE 256 Request)
//! rejected accepted accrued staked recovering:(HashmapE 256 ...)
//! total_staked:Coins total_recovered:Coins
//! current_vset_hash:uint256
//! stake_held_for:uint32 stake_held_until:uint32
//! ```
//!
//! ## Request (value of `requests`, key = validator wallet hash)
//!
//! ```text
//! min_payment:Coins validator_reward_share:uint14
//! loan_amount:Coins accrue_amount:Coins stake_amount:Coins
//! new_stake_msg:^StakeConfirmationEnvelope
//! ```
//!
//! ## Produced bodies
//!
//! ```text
//! notification   op:uint32 now:uint64 round_since:uint32
//! request_loan   op:uint32 now:uint64 round_since:uint32
//!                loan:Coins min_payment:Coins
//!                validator_reward_share:uint14 mev_reward_share:uint14
//!                ^StakeConfirmationEnvelope
//! confirmation   tag:uint32 round_since:uint32 max_factor:uint32
//!                loan_address:bits256 adnl_address:bits256
//! envelope       validator_pubkey:bits256 stake_at:uint32 max_factor:uint32
//!                adnl_address:bits256 signature:^bits512
//! ```
//!
//! Dictionaries inside a participation are kept as their original root
//! cells, so a decoded record re-encodes to the same bytes.

use std::fmt;

use borrower_common::dict::Dict;
use borrower_common::{Cell, CellBuilder, CellError, Coins};

// ════════════════════════════════════════════════════════════════════════════
// PROTOCOL CONSTANTS
// ════════════════════════════════════════════════════════════════════════════

pub const OP_PARTICIPATE_IN_ELECTION: u32 = 0x574a_297b;
pub const OP_VSET_CHANGED: u32 = 0x2f0b_5b3b;
pub const OP_FINISH_PARTICIPATION: u32 = 0x2327_4435;
pub const OP_REQUEST_LOAN: u32 = 0x12b8_08d3;

/// Tag of the signed stake confirmation.
pub const STAKE_CONFIRMATION_TAG: u32 = 0x654c_5074;

/// Width of a reward-share field.
pub const REWARD_SHARE_BITS: usize = 14;

/// Reward shares are basis points; 10000 is the whole reward.
pub const MAX_REWARD_SHARE: u16 = 10_000;

/// Key width of the `participations` dictionary.
pub const ROUND_KEY_BITS: usize = 32;

const SORTED_KEY_BITS: usize = 112;
const VALIDATOR_KEY_BITS: usize = 256;

// ════════════════════════════════════════════════════════════════════════════
// PARTICIPATION STATE
// ════════════════════════════════════════════════════════════════════════════

/// Lifecycle of one round's participation. Ordinals are the on-chain
/// `uint4` values.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum ParticipationState {
    #[default]
    Open = 0,
    Distributing = 1,
    Staked = 2,
    Validating = 3,
    Held = 4,
    Recovering = 5,
    Burning = 6,
}

impl ParticipationState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Distributing => "distributing",
            Self::Staked => "staked",
            Self::Validating => "validating",
            Self::Held => "held",
            Self::Recovering => "recovering",
            Self::Burning => "burning",
        }
    }
}

impl TryFrom<u8> for ParticipationState {
    type Error = CellError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Ok(match value {
            0 => Self::Open,
            1 => Self::Distributing,
            2 => Self::Staked,
            3 => Self::Validating,
            4 => Self::Held,
            5 => Self::Recovering,
            6 => Self::Burning,
            other => {
                return Err(CellError::Malformed(format!("participation state {}", other)));
            }
        })
    }
}

impl fmt::Display for ParticipationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ════════════════════════════════════════════════════════════════════════════
// PARTICIPATION
// ════════════════════════════════════════════════════════════════════════════

/// One round's participation record.
///
/// `Participation::default()` is the zero value used for a round that has
/// no entry in the dictionary: state `Open`, no requests, zero totals.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Participation {
    pub state: ParticipationState,
    pub size: u16,
    pub sorted: Dict,
    pub requests: Dict,
    pub rejected: Dict,
    pub accepted: Dict,
    pub accrued: Dict,
    pub staked: Dict,
    pub recovering: Dict,
    pub total_staked: Coins,
    pub total_recovered: Coins,
    pub current_vset_hash: [u8; 32],
    pub stake_held_for: u32,
    pub stake_held_until: u32,
}

impl Default for Participation {
    fn default() -> Self {
        Self {
            state: ParticipationState::Open,
            size: 0,
            sorted: Dict::empty(SORTED_KEY_BITS),
            requests: Dict::empty(VALIDATOR_KEY_BITS),
            rejected: Dict::empty(VALIDATOR_KEY_BITS),
            accepted: Dict::empty(VALIDATOR_KEY_BITS),
            accrued: Dict::empty(VALIDATOR_KEY_BITS),
            staked: Dict::empty(VALIDATOR_KEY_BITS),
            recovering: Dict::empty(VALIDATOR_KEY_BITS),
            total_staked: Coins::ZERO,
            total_recovered: Coins::ZERO,
            current_vset_hash: [0; 32],
            stake_held_for: 0,
            stake_held_until: 0,
        }
    }
}

impl Participation {
    pub fn load(cell: &Cell) -> Result<Self, CellError> {
        let mut s = cell.parse();
        let state = ParticipationState::try_from(s.load_uint(4)? as u8)?;
        Ok(Self {
            state,
            size: s.load_uint(16)? as u16,
            sorted: Dict::load(&mut s, SORTED_KEY_BITS)?,
            requests: Dict::load(&mut s, VALIDATOR_KEY_BITS)?,
            rejected: Dict::load(&mut s, VALIDATOR_KEY_BITS)?,
            accepted: Dict::load(&mut s, VALIDATOR_KEY_BITS)?,
            accrued: Dict::load(&mut s, VALIDATOR_KEY_BITS)?,
            staked: Dict::load(&mut s, VALIDATOR_KEY_BITS)?,
            recovering: Dict::load(&mut s, VALIDATOR_KEY_BITS)?,
            total_staked: s.load_coins()?,
            total_recovered: s.load_coins()?,
            current_vset_hash: s.load_u256()?,
            stake_held_for: s.load_uint(32)? as u32,
            stake_held_until: s.load_uint(32)? as u32,
        })
    }

    pub fn to_cell(&self) -> Result<Cell, CellError> {
        let mut b = CellBuilder::new()
            .store_uint(self.state as u64, 4)?
            .store_uint(self.size as u64, 16)?;
        for dict in [
            &self.sorted,
            &self.requests,
            &self.rejected,
            &self.accepted,
            &self.accrued,
            &self.staked,
            &self.recovering,
        ] {
            b = dict.store(b)?;
        }
        Ok(b
            .store_coins(self.total_staked)?
            .store_coins(self.total_recovered)?
            .store_u256(&self.current_vset_hash)?
            .store_uint(self.stake_held_for as u64, 32)?
            .store_uint(self.stake_held_until as u64, 32)?
            .build())
    }

    /// The request filed under `validator_key`, if any.
    pub fn request_for(&self, validator_key: &[u8; 32]) -> Result<Option<Request>, CellError> {
        match self.requests.get_u256(validator_key)? {
            Some(cell) => Request::load(&cell).map(Some),
            None => Ok(None),
        }
    }
}

// ════════════════════════════════════════════════════════════════════════════
// REQUEST
// ════════════════════════════════════════════════════════════════════════════

/// A validator's recorded loan request for one round.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub min_payment: Coins,
    pub validator_reward_share: u16,
    pub loan_amount: Coins,
    pub accrue_amount: Coins,
    pub stake_amount: Coins,
    pub new_stake_msg: Cell,
}

impl Request {
    pub fn load(cell: &Cell) -> Result<Self, CellError> {
        let mut s = cell.parse();
        Ok(Self {
            min_payment: s.load_coins()?,
            validator_reward_share: s.load_uint(REWARD_SHARE_BITS)? as u16,
            loan_amount: s.load_coins()?,
            accrue_amount: s.load_coins()?,
            stake_amount: s.load_coins()?,
            new_stake_msg: s.load_ref()?.clone(),
        })
    }

    pub fn to_cell(&self) -> Result<Cell, CellError> {
        Ok(CellBuilder::new()
            .store_coins(self.min_payment)?
            .store_uint(self.validator_reward_share as u64, REWARD_SHARE_BITS)?
            .store_coins(self.loan_amount)?
            .store_coins(self.accrue_amount)?
            .store_coins(self.stake_amount)?
            .store_ref(self.new_stake_msg.clone())?
            .build())
    }
}

// ════════════════════════════════════════════════════════════════════════════
// STAKE CONFIRMATION
// ════════════════════════════════════════════════════════════════════════════

/// The record the validation key signs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StakeConfirmation {
    pub round_since: u32,
    pub max_factor: u32,
    pub loan_address: [u8; 32],
    pub adnl_address: [u8; 32],
}

impl StakeConfirmation {
    pub fn to_cell(&self) -> Result<Cell, CellError> {
        Ok(CellBuilder::new()
            .store_uint(STAKE_CONFIRMATION_TAG as u64, 32)?
            .store_uint(self.round_since as u64, 32)?
            .store_uint(self.max_factor as u64, 32)?
            .store_u256(&self.loan_address)?
            .store_u256(&self.adnl_address)?
            .build())
    }

    pub fn load(cell: &Cell) -> Result<Self, CellError> {
        let mut s = cell.parse();
        s.expect_tag(STAKE_CONFIRMATION_TAG as u64, 32)?;
        Ok(Self {
            round_since: s.load_uint(32)? as u32,
            max_factor: s.load_uint(32)? as u32,
            loan_address: s.load_u256()?,
            adnl_address: s.load_u256()?,
        })
    }

    /// Bytes handed to the signer: the record's data payload only, without
    /// descriptors or completion tag. The record is byte-aligned (608 bits).
    pub fn signing_bytes(&self) -> Result<Vec<u8>, CellError> {
        Ok(self.to_cell()?.data().to_vec())
    }
}

/// Signed confirmation attached to a loan request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StakeConfirmationEnvelope {
    pub validator_pubkey: [u8; 32],
    pub stake_at: u32,
    pub max_factor: u32,
    pub adnl_address: [u8; 32],
    pub signature: [u8; 64],
}

impl StakeConfirmationEnvelope {
    pub fn to_cell(&self) -> Result<Cell, CellError> {
        let signature = CellBuilder::new().store_bytes(&self.signature)?.build();
        Ok(CellBuilder::new()
            .store_u256(&self.validator_pubkey)?
            .store_uint(self.stake_at as u64, 32)?
            .store_uint(self.max_factor as u64, 32)?
            .store_u256(&self.adnl_address)?
            .store_ref(signature)?
            .build())
    }

    pub fn load(cell: &Cell) -> Result<Self, CellError> {
        let mut s = cell.parse();
        let validator_pubkey = s.load_u256()?;
        let stake_at = s.load_uint(32)? as u32;
        let max_factor = s.load_uint(32)? as u32;
        let adnl_address = s.load_u256()?;
        let sig_bytes = s.load_ref()?.parse().load_bytes(64)?;
        let mut signature = [0u8; 64];
        signature.copy_from_slice(&sig_bytes);
        Ok(Self { validator_pubkey, stake_at, max_factor, adnl_address, signature })
    }
}

// ════════════════════════════════════════════════════════════════════════════
// PRODUCED BODIES
// ════════════════════════════════════════════════════════════════════════════

/// The three fixed-layout notifications sent to the treasury.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Notification {
    ParticipateInElection,
    VsetChanged,
    FinishParticipation,
}

impl Notification {
    pub fn op(&self) -> u32 {
        match self {
            Self::ParticipateInElection => OP_PARTICIPATE_IN_ELECTION,
            Self::VsetChanged => OP_VSET_CHANGED,
            Self::FinishParticipation => OP_FINISH_PARTICIPATION,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ParticipateInElection => "participate_in_election",
            Self::VsetChanged => "vset_changed",
            Self::FinishParticipation => "finish_participation",
        }
    }

    pub fn body(&self, now: u64, round_since: u32) -> Result<Cell, CellError> {
        Ok(CellBuilder::new()
            .store_uint(self.op() as u64, 32)?
            .store_uint(now, 64)?
            .store_uint(round_since as u64, 32)?
            .build())
    }
}

impl fmt::Display for Notification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Body of the loan request sent from the validator wallet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoanRequestPayload {
    pub now: u64,
    pub round_since: u32,
    pub loan: Coins,
    pub min_payment: Coins,
    pub validator_reward_share: u16,
    pub mev_reward_share: u16,
    pub confirmation: StakeConfirmationEnvelope,
}

impl LoanRequestPayload {
    pub fn to_cell(&self) -> Result<Cell, CellError> {
        Ok(CellBuilder::new()
            .store_uint(OP_REQUEST_LOAN as u64, 32)?
            .store_uint(self.now, 64)?
            .store_uint(self.round_since as u64, 32)?
            .store_coins(self.loan)?
            .store_coins(self.min_payment)?
            .store_uint(self.validator_reward_share as u64, REWARD_SHARE_BITS)?
            .store_uint(self.mev_reward_share as u64, REWARD_SHARE_BITS)?
            .store_ref(self.confirmation.to_cell()?)?
            .build())
    }

    pub fn load(cell: &Cell) -> Result<Self, CellError> {
        let mut s = cell.parse();
        s.expect_tag(OP_REQUEST_LOAN as u64, 32)?;
        Ok(Self {
            now: s.load_uint(64)?,
            round_since: s.load_uint(32)? as u32,
            loan: s.load_coins()?,
            min_payment: s.load_coins()?,
            validator_reward_share: s.load_uint(REWARD_SHARE_BITS)? as u16,
            mev_reward_share: s.load_uint(REWARD_SHARE_BITS)? as u16,
            confirmation: StakeConfirmationEnvelope::load(s.load_ref()?)?,
        })
    }
}

// ════════════════════════════════════════════════════════════════════════════
// CHAIN PARAMETERS
// ════════════════════════════════════════════════════════════════════════════

pub const PARAM_ELECTION_TIMINGS: u32 = 15;
pub const PARAM_STAKES: u32 = 17;
pub const PARAM_CURRENT_VALIDATORS: u32 = 34;

/// Config param 15.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ElectionTimings {
    pub validators_elected_for: u32,
    pub elections_start_before: u32,
    pub elections_end_before: u32,
    pub stake_held_for: u32,
}

impl ElectionTimings {
    pub fn load(cell: &Cell) -> Result<Self, CellError> {
        let mut s = cell.parse();
        Ok(Self {
            validators_elected_for: s.load_uint(32)? as u32,
            elections_start_before: s.load_uint(32)? as u32,
            elections_end_before: s.load_uint(32)? as u32,
            stake_held_for: s.load_uint(32)? as u32,
        })
    }
}

/// `min_stake`, the first field of config param 17.
pub fn load_min_stake(cell: &Cell) -> Result<Coins, CellError> {
    cell.parse().load_coins()
}

/// Config param 34, reduced to what scheduling needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValidatorSetInfo {
    /// Representation hash of the whole set.
    pub hash: [u8; 32],
    pub utime_since: u32,
    /// Start of the next round.
    pub utime_until: u32,
}

impl ValidatorSetInfo {
    pub fn load(cell: &Cell) -> Result<Self, CellError> {
        let mut s = cell.parse();
        let tag = s.load_uint(8)?;
        if tag != 0x11 && tag != 0x12 {
            return Err(CellError::UnexpectedTag { expected: 0x12, found: tag });
        }
        Ok(Self {
            hash: cell.hash(),
            utime_since: s.load_uint(32)? as u32,
            utime_until: s.load_uint(32)? as u32,
        })
    }
}

// ════════════════════════════════════════════════════════════════════════════
// TESTS
// ════════════════════════════════════════════════════════════════════════════
