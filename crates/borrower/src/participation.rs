//! # Participation State Machine
//!
//! Classifies every round in the treasury's participations dictionary and
//! decides what, if anything, to send for it on this tick.
//!
//! ## Decision Table
//!
//! ```text
//! state        condition                      action                 wait
//! ───────────  ─────────────────────────────  ─────────────────────  ──────────────────────────────
//! Open         now <  admission start         -                      until admission start
//! Open         now >= admission start         participate_in_election 30s
//! Distributing -                              -                      30s
//! Staked       vset unchanged                 -                      until round_since, else vset until
//! Staked       vset changed                   vset_changed           30s
//! Validating   vset unchanged                 -                      until round_since + elected_for
//! Validating   vset changed                   vset_changed           30s
//! Held         now <  stake_held_until        -                      until stake_held_until
//! Held         now >= stake_held_until        finish_participation   30s
//! Recovering   -                              -                      -
//! Burning      -                              -                      -
//! ```
//!
//! Admission start is `min(participate_since, round_since)`.
//!
//! The tick's wait is the minimum contribution. With no contribution at
//! all, the wait falls back to the next admission start, else the end of
//! the current validator set, else [`DEFAULT_WAIT`].
//!
//! [`decide`] is pure; [`process`] reads one snapshot, sends the chosen
//! notifications and never lets one round's failure stop its siblings.

use std::time::Duration;

use borrower_common::{Address, CellError};
use futures::future::join_all;
use tracing::{debug, error, info, warn};

use crate::chain::{BlockRef, ChainClient, ChainError};
use crate::error::TickError;
use crate::records::{Notification, Participation, ParticipationState};
use crate::treasury::{load_chain_params, ChainParams, Treasury, TreasuryState};

/// Cadence for re-checking a round after sending to it, or while it is
/// distributing.
pub const RETRY_WAIT: Duration = Duration::from_secs(30);

/// Wait after a failed tick or when nothing else applies.
pub const DEFAULT_WAIT: Duration = Duration::from_secs(60);

// ════════════════════════════════════════════════════════════════════════════
// PURE DECISION
// ════════════════════════════════════════════════════════════════════════════

/// Chain facts one tick decides against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Observation {
    pub now: u64,
    pub participate_since: u32,
    pub params: ChainParams,
}

/// What to do for one round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    pub action: Option<Notification>,
    /// `None` when the round does not constrain the next wake-up.
    pub wait: Option<Duration>,
}

impl Decision {
    fn idle(wait: Option<Duration>) -> Self {
        Self { action: None, wait }
    }

    fn send(action: Notification) -> Self {
        Self { action: Some(action), wait: Some(RETRY_WAIT) }
    }
}

/// Time from `now` until `target`, if `target` is still ahead.
fn until(now: u64, target: u64) -> Option<Duration> {
    (target > now).then(|| Duration::from_secs(target - now))
}

pub fn decide(participation: &Participation, round_since: u32, obs: &Observation) -> Decision {
    let now = obs.now;
    let vset_changed = participation.current_vset_hash != obs.params.vset.hash;

    match participation.state {
        ParticipationState::Open => {
            let admission_start = obs.participate_since.min(round_since) as u64;
            if now < admission_start {
                Decision::idle(until(now, admission_start))
            } else {
                Decision::send(Notification::ParticipateInElection)
            }
        }
        ParticipationState::Distributing => Decision::idle(Some(RETRY_WAIT)),
        ParticipationState::Staked if vset_changed => Decision::send(Notification::VsetChanged),
        ParticipationState::Staked => Decision::idle(
            until(now, round_since as u64).or_else(|| until(now, obs.params.vset.utime_until as u64)),
        ),
        ParticipationState::Validating if vset_changed => Decision::send(Notification::VsetChanged),
        ParticipationState::Validating => {
            let end = round_since as u64 + obs.params.timings.validators_elected_for as u64;
            Decision::idle(until(now, end))
        }
        ParticipationState::Held if now >= participation.stake_held_until as u64 => {
            Decision::send(Notification::FinishParticipation)
        }
        ParticipationState::Held => Decision::idle(until(now, participation.stake_held_until as u64)),
        ParticipationState::Recovering | ParticipationState::Burning => Decision::idle(None),
    }
}

/// Wait when no round contributed one.
pub fn fallback_wait(obs: &Observation) -> Duration {
    until(obs.now, obs.participate_since as u64)
        .or_else(|| until(obs.now, obs.params.vset.utime_until as u64))
        .unwrap_or(DEFAULT_WAIT)
}

// ════════════════════════════════════════════════════════════════════════════
// SNAPSHOT AND PLAN
// ════════════════════════════════════════════════════════════════════════════

/// Everything one sweep reads, pinned to a single block.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub block: BlockRef,
    pub observation: Observation,
    pub treasury: TreasuryState,
}

/// Reads the treasury and chain parameters at the current head.
pub async fn observe(chain: &dyn ChainClient, treasury_address: Address, now: u64) -> Result<Snapshot, ChainError> {
    let block = chain.current_chain_head().await?;
    let treasury = Treasury::new(chain, block, treasury_address);
    treasury.ensure_active().await?;
    let params = load_chain_params(chain, &block).await?;
    let state = treasury.state().await?;
    let participate_since = treasury.participate_since().await?;
    Ok(Snapshot {
        block,
        observation: Observation { now, participate_since, params },
        treasury: state,
    })
}

/// One round as seen by the state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoundPlan {
    pub round_since: u32,
    /// Decoded state and decision, or why the record could not be decoded.
    pub outcome: Result<(ParticipationState, Decision), CellError>,
}

/// Decides every round of the snapshot without sending anything.
pub fn plan(snapshot: &Snapshot) -> Result<Vec<RoundPlan>, CellError> {
    Ok(snapshot
        .treasury
        .rounds()?
        .into_iter()
        .map(|(round_since, record)| RoundPlan {
            round_since,
            outcome: record.map(|p| (p.state, decide(&p, round_since, &snapshot.observation))),
        })
        .collect())
}

// ════════════════════════════════════════════════════════════════════════════
// SWEEP
// ════════════════════════════════════════════════════════════════════════════

/// Result of one process tick.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub wait: Duration,
    pub sent: Vec<(u32, Notification)>,
    /// Rounds whose record failed to decode or whose submission failed.
    pub failed: Vec<u32>,
}

/// Runs the state machine over every round and sends the chosen
/// notifications to the treasury.
pub async fn process(chain: &dyn ChainClient, treasury_address: Address, now: u64) -> Result<SweepReport, TickError> {
    let snapshot = observe(chain, treasury_address, now).await?;
    let plans = plan(&snapshot)?;
    debug!(block = %snapshot.block, rounds = plans.len(), "processing participations");

    let mut report = SweepReport::default();
    let mut wait: Option<Duration> = None;
    let mut sends = Vec::new();

    for RoundPlan { round_since, outcome } in plans {
        let (state, decision) = match outcome {
            Ok(v) => v,
            Err(e) => {
                error!(round = round_since, error = %e, "❌ cannot decode participation");
                report.failed.push(round_since);
                continue;
            }
        };

        if let Some(w) = decision.wait {
            wait = Some(wait.map_or(w, |cur| cur.min(w)));
        }

        let Some(action) = decision.action else {
            debug!(round = round_since, %state, "nothing to send");
            continue;
        };

        match action.body(now, round_since) {
            Ok(body) => sends.push(async move {
                let result = chain.send_external_message(&treasury_address, body).await;
                (round_since, state, action, result)
            }),
            Err(e) => {
                error!(round = round_since, %state, op = %action, error = %e, "❌ cannot encode notification");
                report.failed.push(round_since);
            }
        }
    }

    // Rounds are independent; one slow or failed send does not hold up the rest.
    for (round_since, state, action, result) in join_all(sends).await {
        match result {
            Ok(()) => {
                info!(round = round_since, %state, op = %action, "☑️ sent {}", action);
                report.sent.push((round_since, action));
            }
            Err(e) => {
                warn!(round = round_since, %state, op = %action, error = %e, "❌ failed to send {}", action);
                report.failed.push(round_since);
            }
        }
    }

    report.wait = wait.unwrap_or_else(|| fallback_wait(&snapshot.observation));
    Ok(report)
}
