//! Typed reads of the treasury contract and the chain configuration.
//!
//! All reads of one tick are pinned to the same [`BlockRef`].

use std::sync::Arc;

use borrower_common::dict::{key_to_uint, Dict};
use borrower_common::{Address, Cell, CellBuilder, CellError, Coins};
use tracing::debug;

use crate::chain::{BlockRef, ChainClient, ChainError, StackEntry};
use crate::records::{
    load_min_stake, ElectionTimings, Participation, ValidatorSetInfo, PARAM_CURRENT_VALIDATORS,
    PARAM_ELECTION_TIMINGS, PARAM_STAKES, ROUND_KEY_BITS,
};

const TREASURY_STATE_PARTICIPATIONS: usize = 5;
const TREASURY_STATE_STOPPED: usize = 6;
const TIMES_PARTICIPATE_SINCE: usize = 1;

// ════════════════════════════════════════════════════════════════════════════
// STACK ACCESS
// ════════════════════════════════════════════════════════════════════════════

fn entry<'a>(stack: &'a [StackEntry], method: &str, index: usize) -> Result<&'a StackEntry, ChainError> {
    stack
        .get(index)
        .ok_or_else(|| ChainError::stack(method, index, format!("stack has {} entries", stack.len())))
}

fn int_at(stack: &[StackEntry], method: &str, index: usize) -> Result<i128, ChainError> {
    match entry(stack, method, index)? {
        StackEntry::Int(n) => Ok(*n),
        other => Err(ChainError::stack(method, index, format!("expected int, got {}", other.kind()))),
    }
}

fn coins_at(stack: &[StackEntry], method: &str, index: usize) -> Result<Coins, ChainError> {
    let n = int_at(stack, method, index)?;
    u128::try_from(n)
        .map(Coins::from_nano)
        .map_err(|_| ChainError::stack(method, index, format!("negative amount {}", n)))
}

/// A cell entry; `null` reads as `None`.
fn maybe_cell_at(stack: &[StackEntry], method: &str, index: usize) -> Result<Option<Cell>, ChainError> {
    match entry(stack, method, index)? {
        StackEntry::Null => Ok(None),
        StackEntry::Cell(c) => Ok(Some(c.clone())),
        other => Err(ChainError::stack(method, index, format!("expected cell, got {}", other.kind()))),
    }
}

fn slice_at(stack: &[StackEntry], method: &str, index: usize) -> Result<Cell, ChainError> {
    match entry(stack, method, index)? {
        StackEntry::Slice(c) | StackEntry::Cell(c) => Ok(c.clone()),
        other => Err(ChainError::stack(method, index, format!("expected slice, got {}", other.kind()))),
    }
}

// ════════════════════════════════════════════════════════════════════════════
// TREASURY
// ════════════════════════════════════════════════════════════════════════════

/// Decoded `get_treasury_state` fields this daemon uses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreasuryState {
    /// `HashmapE 32 Participation`, keyed by `round_since`.
    pub participations: Dict,
    pub stopped: bool,
}

/// One participation entry. A record that fails to decode is kept as an
/// error so its siblings can still be evaluated.
pub type RoundEntry = (u32, Result<Participation, CellError>);

impl TreasuryState {
    pub fn rounds(&self) -> Result<Vec<RoundEntry>, CellError> {
        self.participations
            .entries()?
            .into_iter()
            .map(|(key, value)| Ok((key_to_uint(&key)? as u32, Participation::load(&value))))
            .collect()
    }

    /// The participation for `round_since`, or the zero value when the
    /// round has no entry.
    pub fn participation(&self, round_since: u32) -> Result<Participation, CellError> {
        match self.participations.get_uint(round_since as u64)? {
            Some(cell) => Participation::load(&cell),
            None => Ok(Participation::default()),
        }
    }
}

/// Read handle for the treasury contract at a fixed block.
pub struct Treasury<'a> {
    chain: &'a dyn ChainClient,
    block: BlockRef,
    address: Address,
}

impl<'a> Treasury<'a> {
    pub fn new(chain: &'a dyn ChainClient, block: BlockRef, address: Address) -> Self {
        Self { chain, block, address }
    }

    pub fn address(&self) -> &Address {
        &self.address
    }

    async fn call(&self, method: &str, args: &[StackEntry]) -> Result<Vec<StackEntry>, ChainError> {
        self.chain
            .run_get_method(&self.block, &self.address, method, args)
            .await
    }

    /// Fails with `InactiveAccount` unless the treasury account is active.
    pub async fn ensure_active(&self) -> Result<(), ChainError> {
        let account = self.chain.get_account(&self.block, &self.address).await?;
        if !account.is_active() {
            return Err(ChainError::InactiveAccount(self.address.to_string()));
        }
        Ok(())
    }

    pub async fn state(&self) -> Result<TreasuryState, ChainError> {
        const METHOD: &str = "get_treasury_state";
        let stack = self.call(METHOD, &[]).await?;
        let root = maybe_cell_at(&stack, METHOD, TREASURY_STATE_PARTICIPATIONS)?;
        let stopped = int_at(&stack, METHOD, TREASURY_STATE_STOPPED)? != 0;
        Ok(TreasuryState {
            participations: Dict::from_root(ROUND_KEY_BITS, root.map(Arc::new)),
            stopped,
        })
    }

    /// Start of the admission window for the next round.
    pub async fn participate_since(&self) -> Result<u32, ChainError> {
        const METHOD: &str = "get_times";
        let stack = self.call(METHOD, &[]).await?;
        let value = int_at(&stack, METHOD, TIMES_PARTICIPATE_SINCE)?;
        u32::try_from(value).map_err(|_| ChainError::stack(METHOD, TIMES_PARTICIPATE_SINCE, "out of range"))
    }

    pub async fn request_loan_fee(&self) -> Result<Coins, ChainError> {
        const METHOD: &str = "get_treasury_fees";
        let stack = self.call(METHOD, &[StackEntry::Int(0)]).await?;
        coins_at(&stack, METHOD, 0)
    }

    pub async fn max_punishment(&self, loan: Coins) -> Result<Coins, ChainError> {
        const METHOD: &str = "get_max_punishment";
        let arg = i128::try_from(loan.nano())
            .map_err(|_| ChainError::stack(METHOD, 0, "loan does not fit a stack integer"))?;
        let stack = self.call(METHOD, &[StackEntry::Int(arg)]).await?;
        coins_at(&stack, METHOD, 0)
    }

    /// Address of the loan contract for `validator` in `round_since`.
    pub async fn loan_address(&self, validator: &Address, round_since: u32) -> Result<Address, ChainError> {
        const METHOD: &str = "get_loan_address";
        let arg = CellBuilder::new().store_address(validator)?.build();
        let stack = self
            .call(METHOD, &[StackEntry::Slice(arg), StackEntry::Int(round_since as i128)])
            .await?;
        let slice = slice_at(&stack, METHOD, 0)?;
        slice
            .parse()
            .load_address()?
            .ok_or_else(|| ChainError::stack(METHOD, 0, "loan address is addr_none"))
    }
}

// ════════════════════════════════════════════════════════════════════════════
// CHAIN PARAMETERS
// ════════════════════════════════════════════════════════════════════════════

/// Chain configuration read once per tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChainParams {
    pub timings: ElectionTimings,
    pub min_stake: Coins,
    pub vset: ValidatorSetInfo,
}

pub async fn load_chain_params(chain: &dyn ChainClient, block: &BlockRef) -> Result<ChainParams, ChainError> {
    let timings = ElectionTimings::load(&chain.get_chain_parameter(block, PARAM_ELECTION_TIMINGS).await?)?;
    let min_stake = load_min_stake(&chain.get_chain_parameter(block, PARAM_STAKES).await?)?;
    let vset = ValidatorSetInfo::load(&chain.get_chain_parameter(block, PARAM_CURRENT_VALIDATORS).await?)?;
    debug!(
        %block,
        vset_since = vset.utime_since,
        vset_until = vset.utime_until,
        vset_hash = %hex::encode(vset.hash),
        "chain parameters loaded"
    );
    Ok(ChainParams { timings, min_stake, vset })
}
