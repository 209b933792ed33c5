//! # Borrower Flow Integration Tests
//!
//! Drives the process sweep and the request-loan tick end to end against
//! the in-process chain, console and wallet.
//!
//! Every test builds a fresh [`MockChainClient`] with:
//!
//! - an active treasury at `TREASURY`
//! - election timings (param 15), `min_stake` 5 coins (param 17)
//! - a current validator set ending at `VSET_UNTIL` (param 34)
//! - fee, max punishment and loan address get-methods
//!
//! Rounds are installed into `get_treasury_state` per test.

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use borrower_common::dict::{bytes_key, uint_key};
use borrower_common::{Address, Cell, CellBuilder, Coins, Dict};
use ed25519_dalek::{Signature, Verifier, VerifyingKey};

use borrower_node::chain::{AccountState, AccountStatus, StackEntry};
use borrower_node::config::SchedulerConfig;
use borrower_node::error::ErrorKind;
use borrower_node::participation::{self, DEFAULT_WAIT, RETRY_WAIT};
use borrower_node::records::{
    LoanRequestPayload, Notification, Participation, ParticipationState, Request, StakeConfirmation,
    OP_FINISH_PARTICIPATION, OP_PARTICIPATE_IN_ELECTION, OP_VSET_CHANGED,
};
use borrower_node::wallet::WalletError;
use borrower_node::{
    BlockRef, BorrowConfig, ChainError, KeyConsole, LoanOutcome, LoanRequester, MockChainClient, MockConsole,
    MockWallet, Scheduler,
};

const TREASURY: Address = Address::new(-1, [0x33; 32]);
const WALLET: Address = Address::new(-1, [0x77; 32]);
const LOAN: Address = Address::new(-1, [0x4C; 32]);
const ADNL: [u8; 32] = [0xAD; 32];

const HEAD: BlockRef = BlockRef { workchain: -1, shard: i64::MIN, seqno: 42 };
const ELECTED_FOR: u32 = 65_536;
const VSET_SINCE: u32 = 100;
const VSET_UNTIL: u32 = 5_000;
const MIN_STAKE_NANO: u128 = 5_000_000_000;
const MAX_PUNISHMENT_NANO: i128 = 500;

// ════════════════════════════════════════════════════════════════════════════
// FIXTURES
// ════════════════════════════════════════════════════════════════════════════

fn vset_cell() -> Cell {
    CellBuilder::new()
        .store_uint(0x12, 8)
        .and_then(|b| b.store_uint(VSET_SINCE as u64, 32))
        .and_then(|b| b.store_uint(VSET_UNTIL as u64, 32))
        .expect("vset cell")
        .build()
}

fn vset_hash() -> [u8; 32] {
    vset_cell().hash()
}

/// Chain with everything but the participations dictionary configured.
fn chain(participate_since: u32) -> MockChainClient {
    let chain = MockChainClient::new();
    chain.set_head(HEAD);
    chain.set_account(TREASURY, AccountState::active(Coins::from_coins(1_000_000)));

    let timings = CellBuilder::new()
        .store_uint(ELECTED_FOR as u64, 32)
        .and_then(|b| b.store_uint(32_768, 32))
        .and_then(|b| b.store_uint(8_192, 32))
        .and_then(|b| b.store_uint(32_768, 32))
        .expect("timings cell")
        .build();
    let stakes = CellBuilder::new()
        .store_coins(Coins::from_nano(MIN_STAKE_NANO))
        .expect("stakes cell")
        .build();
    chain.set_param(15, timings);
    chain.set_param(17, stakes);
    chain.set_param(34, vset_cell());

    chain.set_method(
        TREASURY,
        "get_times",
        vec![StackEntry::Int(0), StackEntry::Int(participate_since as i128)],
    );
    chain.set_method(TREASURY, "get_treasury_fees", vec![StackEntry::Int(1_000_000_000)]);
    chain.set_method(TREASURY, "get_max_punishment", vec![StackEntry::Int(MAX_PUNISHMENT_NANO)]);
    let loan = CellBuilder::new().store_address(&LOAN).expect("loan address").build();
    chain.set_method(TREASURY, "get_loan_address", vec![StackEntry::Slice(loan)]);

    set_rounds(&chain, vec![], false);
    chain
}

/// Installs `get_treasury_state` with the given `(round_since, record)` entries.
fn set_rounds(chain: &MockChainClient, rounds: Vec<(u32, Cell)>, stopped: bool) {
    let entries = rounds
        .into_iter()
        .map(|(round, cell)| (uint_key(round as u64, 32).expect("round key"), cell))
        .collect();
    let dict = Dict::from_entries(32, entries).expect("participations dict");
    let root = match dict.root() {
        Some(root) => StackEntry::Cell(root.as_ref().clone()),
        None => StackEntry::Null,
    };

    let mut stack = vec![StackEntry::Int(0); 5];
    stack.push(root);
    stack.push(StackEntry::Int(stopped as i128));
    chain.set_method(TREASURY, "get_treasury_state", stack);
}

fn record(state: ParticipationState) -> Participation {
    Participation { state, current_vset_hash: vset_hash(), ..Participation::default() }
}

fn cell_of(p: &Participation) -> Cell {
    p.to_cell().expect("participation cell")
}

fn op_of(body: &Cell) -> u32 {
    body.parse().load_uint(32).expect("op") as u32
}

fn borrow() -> BorrowConfig {
    BorrowConfig {
        active: true,
        stake: Coins::from_coins(100),
        max_factor_ratio: 1.5,
        validator_reward_share: 500,
        mev_reward_share: 250,
        ..BorrowConfig::default()
    }
}

/// `max(1 coin, 500 nano) + 1 coin fee + 0 min_payment + 100 coins stake`.
fn expected_value() -> Coins {
    Coins::from_coins(102)
}

struct Harness {
    chain: MockChainClient,
    console: MockConsole,
    wallet: MockWallet,
}

impl Harness {
    fn new() -> Self {
        Self {
            chain: chain(0),
            console: MockConsole::new(),
            wallet: MockWallet::new(WALLET, Coins::from_coins(1_000)),
        }
    }

    fn requester(&self) -> LoanRequester<'_> {
        LoanRequester {
            chain: &self.chain,
            console: &self.console,
            wallet: &self.wallet,
            treasury: TREASURY,
            adnl_address: ADNL,
            send_timeout: Duration::from_secs(120),
        }
    }
}

// ════════════════════════════════════════════════════════════════════════════
// PROCESS SWEEP
// ════════════════════════════════════════════════════════════════════════════

/// An open round inside its admission window is told to participate.
#[tokio::test]
async fn test_open_round_participates() {
    let chain = chain(900);
    set_rounds(&chain, vec![(1_000, cell_of(&record(ParticipationState::Open)))], false);

    let report = participation::process(&chain, TREASURY, 950).await.expect("sweep");

    assert_eq!(report.sent, vec![(1_000, Notification::ParticipateInElection)]);
    assert!(report.failed.is_empty());
    assert_eq!(report.wait, RETRY_WAIT);

    let sent = chain.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].0, TREASURY);
    let mut body = sent[0].1.parse();
    assert_eq!(body.load_uint(32).expect("op") as u32, OP_PARTICIPATE_IN_ELECTION);
    assert_eq!(body.load_uint(64).expect("query id"), 950);
    assert_eq!(body.load_uint(32).expect("round") as u32, 1_000);
}

/// Before the admission window nothing is sent and the wait runs to its start.
#[tokio::test]
async fn test_open_round_waits_for_admission() {
    let chain = chain(900);
    set_rounds(&chain, vec![(1_000, cell_of(&record(ParticipationState::Open)))], false);

    let report = participation::process(&chain, TREASURY, 850).await.expect("sweep");

    assert!(report.sent.is_empty());
    assert_eq!(report.wait, Duration::from_secs(50));
    assert!(chain.sent().is_empty());
}

/// A staked round whose recorded validator set differs from the chain's is
/// told the set changed.
#[tokio::test]
async fn test_staked_round_reports_vset_change() {
    let chain = chain(0);
    let stale = Participation { current_vset_hash: [0x22; 32], ..record(ParticipationState::Staked) };
    set_rounds(&chain, vec![(6_000, cell_of(&stale))], false);

    let report = participation::process(&chain, TREASURY, 1_200).await.expect("sweep");

    assert_eq!(report.sent, vec![(6_000, Notification::VsetChanged)]);
    assert_eq!(op_of(&chain.sent()[0].1), OP_VSET_CHANGED);
}

/// With the set unchanged a staked round only schedules the next check.
#[tokio::test]
async fn test_staked_round_unchanged_waits() {
    let chain = chain(0);
    set_rounds(&chain, vec![(6_000, cell_of(&record(ParticipationState::Staked)))], false);

    let report = participation::process(&chain, TREASURY, 1_200).await.expect("sweep");

    assert!(report.sent.is_empty());
    assert_eq!(report.wait, Duration::from_secs(4_800));
}

/// `now == stake_held_until` is already late enough to finish.
#[tokio::test]
async fn test_held_round_finishes_at_boundary() {
    let chain = chain(0);
    let held = Participation { stake_held_until: 2_000, ..record(ParticipationState::Held) };
    set_rounds(&chain, vec![(1_000, cell_of(&held))], false);

    let early = participation::process(&chain, TREASURY, 1_999).await.expect("sweep");
    assert!(early.sent.is_empty());
    assert_eq!(early.wait, Duration::from_secs(1));

    let ready = participation::process(&chain, TREASURY, 2_000).await.expect("sweep");
    assert_eq!(ready.sent, vec![(1_000, Notification::FinishParticipation)]);
    assert_eq!(op_of(&chain.sent()[0].1), OP_FINISH_PARTICIPATION);
}

/// An undecodable record is reported without stopping its sibling.
#[tokio::test]
async fn test_bad_record_does_not_block_siblings() {
    let chain = chain(900);
    let garbage = CellBuilder::new().store_uint(0xF, 4).expect("garbage").build();
    set_rounds(
        &chain,
        vec![(1_000, garbage), (2_000, cell_of(&record(ParticipationState::Open)))],
        false,
    );

    let report = participation::process(&chain, TREASURY, 2_500).await.expect("sweep");

    assert_eq!(report.failed, vec![1_000]);
    assert_eq!(report.sent, vec![(2_000, Notification::ParticipateInElection)]);
}

/// A failed send is reported for its round; the other round still goes out.
#[tokio::test]
async fn test_send_failure_is_isolated() {
    let chain = chain(900);
    set_rounds(
        &chain,
        vec![
            (1_000, cell_of(&record(ParticipationState::Open))),
            (2_000, cell_of(&record(ParticipationState::Open))),
        ],
        false,
    );
    chain.push_send_result(Err(ChainError::Transport("connection reset".to_string())));

    let report = participation::process(&chain, TREASURY, 2_500).await.expect("sweep");

    assert_eq!(chain.sent().len(), 2);
    assert_eq!(report.sent.len(), 1);
    assert_eq!(report.failed.len(), 1);
    assert_ne!(report.sent[0].0, report.failed[0]);
    assert_eq!(report.wait, RETRY_WAIT);
}

/// Re-running the sweep on unchanged state sends the same notification again.
#[tokio::test]
async fn test_participate_retried_each_tick() {
    let chain = chain(900);
    set_rounds(&chain, vec![(1_000, cell_of(&record(ParticipationState::Open)))], false);

    participation::process(&chain, TREASURY, 950).await.expect("first sweep");
    participation::process(&chain, TREASURY, 980).await.expect("second sweep");

    let sent = chain.sent();
    assert_eq!(sent.len(), 2);
    assert!(sent.iter().all(|(_, body)| op_of(body) == OP_PARTICIPATE_IN_ELECTION));
}

/// Recovering and burning rounds are left alone.
#[tokio::test]
async fn test_inert_rounds_send_nothing() {
    let chain = chain(0);
    let stale = [0x22; 32];
    set_rounds(
        &chain,
        vec![
            (1_000, cell_of(&Participation { current_vset_hash: stale, ..record(ParticipationState::Recovering) })),
            (2_000, cell_of(&Participation { current_vset_hash: stale, ..record(ParticipationState::Burning) })),
        ],
        false,
    );

    let report = participation::process(&chain, TREASURY, 3_000).await.expect("sweep");

    assert!(report.sent.is_empty());
    assert!(chain.sent().is_empty());
    assert_eq!(report.wait, Duration::from_secs((VSET_UNTIL - 3_000) as u64));
}

/// With no rounds the wait falls back to the next admission start.
#[tokio::test]
async fn test_empty_participations_fall_back() {
    let chain = chain(3_000);

    let report = participation::process(&chain, TREASURY, 1_000).await.expect("sweep");
    assert_eq!(report.wait, Duration::from_secs(2_000));

    let late = participation::process(&chain, TREASURY, 10_000).await.expect("sweep");
    assert_eq!(late.wait, DEFAULT_WAIT);
}

/// An inactive treasury fails the tick as a transport error.
#[tokio::test]
async fn test_inactive_treasury_is_transport_error() {
    let chain = chain(0);
    chain.set_account(TREASURY, AccountState { status: AccountStatus::Frozen, balance: Coins::ZERO });

    let err = participation::process(&chain, TREASURY, 1_000).await.expect_err("inactive");
    assert_eq!(err.kind(), ErrorKind::Transport);
    assert!(chain.sent().is_empty());
}

/// A sweep reads state and admission times from the treasury only.
#[tokio::test]
async fn test_sweep_reads_treasury_methods() {
    let chain = chain(0);
    participation::process(&chain, TREASURY, 1_000).await.expect("sweep");

    let methods: Vec<String> = chain.calls().into_iter().map(|c| c.method).collect();
    assert!(methods.contains(&"get_treasury_state".to_string()));
    assert!(methods.contains(&"get_times".to_string()));
    assert!(chain.calls().iter().all(|c| c.address == TREASURY));
}

// ════════════════════════════════════════════════════════════════════════════
// REQUEST LOAN
// ════════════════════════════════════════════════════════════════════════════

/// A zero loan resolves to the chain's minimum stake and a signed request
/// goes out from the wallet.
#[tokio::test]
async fn test_request_sends_signed_payload() {
    let h = Harness::new();

    let report = h.requester().request_loan(&borrow(), 1_000).await.expect("request");

    match &report.outcome {
        LoanOutcome::Sent { round_since, loan, value, .. } => {
            assert_eq!(*round_since, VSET_UNTIL);
            assert_eq!(*loan, Coins::from_nano(MIN_STAKE_NANO));
            assert_eq!(*value, expected_value());
        }
        other => panic!("unexpected outcome: {}", other),
    }
    assert_eq!(report.wait, DEFAULT_WAIT);

    let sent = h.wallet.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].dest, TREASURY);
    assert!(sent[0].bounce);
    assert_eq!(sent[0].value, expected_value());

    let payload = LoanRequestPayload::load(&sent[0].body).expect("payload");
    assert_eq!(payload.now, 1_000);
    assert_eq!(payload.round_since, VSET_UNTIL);
    assert_eq!(payload.loan, Coins::from_nano(MIN_STAKE_NANO));
    assert_eq!(payload.validator_reward_share, 500);
    assert_eq!(payload.mev_reward_share, 250);

    let envelope = &payload.confirmation;
    assert_eq!(envelope.stake_at, VSET_UNTIL);
    assert_eq!(envelope.max_factor, 98_304);
    assert_eq!(envelope.adnl_address, ADNL);

    let signed = StakeConfirmation {
        round_since: VSET_UNTIL,
        max_factor: 98_304,
        loan_address: LOAN.hash,
        adnl_address: ADNL,
    };
    let key = VerifyingKey::from_bytes(&envelope.validator_pubkey).expect("public key");
    key.verify(&signed.signing_bytes().expect("signing bytes"), &Signature::from_bytes(&envelope.signature))
        .expect("signature verifies");
}

/// The key for the round is generated and registered in order.
#[tokio::test]
async fn test_request_provisions_key() {
    let h = Harness::new();
    h.requester().request_loan(&borrow(), 1_000).await.expect("request");

    let commands = h.console.commands();
    assert_eq!(
        commands,
        vec!["getstats", "getconfig", "newkey", "addpermkey", "addtempkey", "addvalidatoraddr", "exportpub", "sign"]
    );
    assert!(h.console.find_existing_key(VSET_UNTIL).await.expect("lookup").is_some());
}

/// A second request for the same round reuses the registered key.
#[tokio::test]
async fn test_request_reuses_key() {
    let h = Harness::new();
    h.requester().request_loan(&borrow(), 1_000).await.expect("first");
    h.requester().request_loan(&borrow(), 1_010).await.expect("second");

    let newkeys = h.console.commands().iter().filter(|c| c.as_str() == "newkey").count();
    assert_eq!(newkeys, 1);
    assert_eq!(h.wallet.sent().len(), 2);
}

fn existing_request(loan: Coins) -> Participation {
    let request = Request {
        min_payment: Coins::ZERO,
        validator_reward_share: 500,
        loan_amount: loan,
        accrue_amount: Coins::ZERO,
        stake_amount: Coins::from_coins(100),
        new_stake_msg: Cell::empty(),
    };
    let requests = Dict::from_entries(
        256,
        vec![(bytes_key(&WALLET.hash), request.to_cell().expect("request cell"))],
    )
    .expect("requests dict");
    Participation { requests, ..record(ParticipationState::Open) }
}

/// An identical request already on record is not resubmitted.
#[tokio::test]
async fn test_request_already_participated() {
    let h = Harness::new();
    set_rounds(
        &h.chain,
        vec![(VSET_UNTIL, cell_of(&existing_request(Coins::from_nano(MIN_STAKE_NANO))))],
        false,
    );

    let report = h.requester().request_loan(&borrow(), 1_000).await.expect("request");

    assert_eq!(report.outcome, LoanOutcome::AlreadyParticipated { round_since: VSET_UNTIL });
    assert_eq!(report.wait, Duration::from_secs((VSET_UNTIL - 1_000) as u64));
    assert!(h.wallet.sent().is_empty());
}

/// A request on record with a different loan is replaced.
#[tokio::test]
async fn test_request_replaces_changed_intent() {
    let h = Harness::new();
    set_rounds(&h.chain, vec![(VSET_UNTIL, cell_of(&existing_request(Coins::from_coins(7))))], false);

    let report = h.requester().request_loan(&borrow(), 1_000).await.expect("request");

    assert!(matches!(report.outcome, LoanOutcome::Sent { .. }));
    assert_eq!(h.wallet.sent().len(), 1);
}

/// The balance must exceed the required value strictly.
#[tokio::test]
async fn test_request_low_balance() {
    let h = Harness::new();
    h.wallet.set_balance(expected_value());

    let report = h.requester().request_loan(&borrow(), 1_000).await.expect("request");

    assert_eq!(
        report.outcome,
        LoanOutcome::LowBalance { required: expected_value(), balance: expected_value() }
    );
    assert_eq!(report.wait, DEFAULT_WAIT);
    assert!(h.wallet.sent().is_empty());
    assert!(!h.console.commands().contains(&"newkey".to_string()));
}

/// An inactive intent does not touch the chain.
#[tokio::test]
async fn test_request_disabled() {
    let h = Harness::new();
    let intent = BorrowConfig { active: false, ..borrow() };

    let report = h.requester().request_loan(&intent, 1_000).await.expect("request");

    assert_eq!(report.outcome, LoanOutcome::Disabled);
    assert!(h.chain.calls().is_empty());
}

#[tokio::test]
async fn test_request_stopped_treasury() {
    let h = Harness::new();
    set_rounds(&h.chain, vec![], true);

    let report = h.requester().request_loan(&borrow(), 1_000).await.expect("request");
    assert_eq!(report.outcome, LoanOutcome::Stopped);
    assert!(h.wallet.sent().is_empty());
}

/// Requests are only accepted while the target round is open.
#[tokio::test]
async fn test_request_round_not_open() {
    let h = Harness::new();
    set_rounds(&h.chain, vec![(VSET_UNTIL, cell_of(&record(ParticipationState::Distributing)))], false);

    let report = h.requester().request_loan(&borrow(), 4_990).await.expect("request");

    assert_eq!(
        report.outcome,
        LoanOutcome::NotOpen { round_since: VSET_UNTIL, state: ParticipationState::Distributing }
    );
    assert_eq!(report.wait, DEFAULT_WAIT);
}

/// A lagging node gets no key and no request.
#[tokio::test]
async fn test_request_out_of_sync() {
    let h = Harness::new();
    h.console.set_lag_secs(120);

    let report = h.requester().request_loan(&borrow(), 1_000).await.expect("request");

    assert_eq!(report.outcome, LoanOutcome::OutOfSync { lag_secs: 120 });
    assert_eq!(h.console.commands(), vec!["getstats"]);
    assert!(h.wallet.sent().is_empty());
}

#[tokio::test]
async fn test_request_invalid_intent_is_configuration_error() {
    let h = Harness::new();
    let intent = BorrowConfig { validator_reward_share: 10_001, ..borrow() };

    let err = h.requester().request_loan(&intent, 1_000).await.expect_err("invalid share");
    assert_eq!(err.kind(), ErrorKind::Configuration);
    assert!(h.chain.calls().is_empty());
}

/// A console failure mid-provisioning aborts the tick before anything is sent.
#[tokio::test]
async fn test_request_console_failure() {
    let h = Harness::new();
    h.console.fail_on("addtempkey");

    let err = h.requester().request_loan(&borrow(), 1_000).await.expect_err("console failure");
    assert_eq!(err.kind(), ErrorKind::Protocol);
    assert!(h.wallet.sent().is_empty());
}

/// A tick aborted halfway through key registration is completed by the next
/// one, and the request then goes out for a fully registered key.
#[tokio::test]
async fn test_request_retry_completes_provisioning() {
    let h = Harness::new();
    h.console.fail_on("addvalidatoraddr");
    h.requester().request_loan(&borrow(), 1_000).await.expect_err("console failure");
    assert!(h.wallet.sent().is_empty());

    h.console.clear_failure();
    let report = h.requester().request_loan(&borrow(), 1_030).await.expect("retry");
    assert!(matches!(report.outcome, LoanOutcome::Sent { .. }));

    let commands = h.console.commands();
    let retry_start = commands.iter().rposition(|c| c == "getstats").expect("second tick");
    assert_eq!(
        commands[retry_start..].to_vec(),
        vec!["getstats", "getconfig", "addtempkey", "addvalidatoraddr", "exportpub", "sign"]
    );

    let key = h.console.find_existing_key(VSET_UNTIL).await.expect("lookup").expect("permanent key");
    assert!(h.console.is_provisioned(&key));

    let sent = h.wallet.sent();
    assert_eq!(sent.len(), 1);
    let payload = LoanRequestPayload::load(&sent[0].body).expect("payload");
    let registered = h.console.verifying_key(&key).expect("known key");
    assert_eq!(payload.confirmation.validator_pubkey, registered.to_bytes());
}

/// An unconfirmed wallet transfer is a transport failure.
#[tokio::test]
async fn test_request_unconfirmed_send() {
    let h = Harness::new();
    h.wallet.fail_next_send(WalletError::NotConfirmed { seqno: 0, timeout_secs: 120 });

    let err = h.requester().request_loan(&borrow(), 1_000).await.expect_err("not confirmed");
    assert_eq!(err.kind(), ErrorKind::Transport);
}

// ════════════════════════════════════════════════════════════════════════════
// SCHEDULER
// ════════════════════════════════════════════════════════════════════════════

fn scheduler(chain: MockChainClient, config_path: std::path::PathBuf) -> (Scheduler, Arc<MockWallet>) {
    let wallet = Arc::new(MockWallet::new(WALLET, Coins::from_coins(1_000)));
    let scheduler = Scheduler::new(
        Arc::new(chain),
        Arc::new(MockConsole::new()),
        wallet.clone(),
        TREASURY,
        ADNL,
        config_path,
        Duration::from_secs(120),
        SchedulerConfig::default(),
    );
    (scheduler, wallet)
}

/// A failing process tick yields the default wait instead of an error.
#[tokio::test]
async fn test_process_tick_failure_yields_default_wait() {
    let chain = chain(0);
    chain.set_account(TREASURY, AccountState { status: AccountStatus::Uninit, balance: Coins::ZERO });
    let (scheduler, _) = scheduler(chain, "borrower.toml".into());

    assert_eq!(scheduler.process_tick().await, DEFAULT_WAIT);
}

/// The request tick reads `[borrow]` from disk on every run.
#[tokio::test]
async fn test_request_tick_rereads_intent() {
    let mut file = tempfile::NamedTempFile::new().expect("temp file");
    writeln!(file, "[borrow]\nactive = false").expect("write config");
    let (scheduler, wallet) = scheduler(chain(0), file.path().to_path_buf());

    assert_eq!(scheduler.request_tick().await, DEFAULT_WAIT);
    assert!(wallet.sent().is_empty());
}

/// A missing config file is reported and the task keeps its default cadence.
#[tokio::test]
async fn test_request_tick_missing_config() {
    let dir = tempfile::tempdir().expect("temp dir");
    let (scheduler, wallet) = scheduler(chain(0), dir.path().join("absent.toml"));

    assert_eq!(scheduler.request_tick().await, DEFAULT_WAIT);
    assert!(wallet.sent().is_empty());
}
