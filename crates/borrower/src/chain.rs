//! # Chain Query Facade
//!
//! Async boundary to the ledger: chain head, accounts, get-methods, config
//! parameters and external message broadcast.
//!
//! ## Architecture
//!
//! ```text
//! treasury / wallet / participation
//!      │
//!      ▼
//! dyn ChainClient
//!      ├─ HttpChainClient   (toncenter v2 JSON API, bounded read retry)
//!      └─ MockChainClient   (in-process snapshot, records sends)
//! ```
//!
//! ## Contract
//!
//! - Reads may be retried by the implementation (bounded).
//! - `send_external_message` is attempted exactly once.
//! - Implementations MUST NOT panic.

use std::collections::{HashMap, VecDeque};
use std::fmt;

use async_trait::async_trait;
use borrower_common::{Address, Cell, CellError, Coins};
use parking_lot::Mutex;
use thiserror::Error;

// ════════════════════════════════════════════════════════════════════════════
// TYPES
// ════════════════════════════════════════════════════════════════════════════

/// Masterchain block all reads of one tick are pinned to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockRef {
    pub workchain: i32,
    pub shard: i64,
    pub seqno: u32,
}

impl fmt::Display for BlockRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({},{:016x},{})", self.workchain, self.shard as u64, self.seqno)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccountStatus {
    Active,
    Uninit,
    Frozen,
    Nonexist,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountState {
    pub status: AccountStatus,
    pub balance: Coins,
}

impl AccountState {
    pub fn active(balance: Coins) -> Self {
        Self { status: AccountStatus::Active, balance }
    }

    pub fn is_active(&self) -> bool {
        self.status == AccountStatus::Active
    }
}

/// A TVM stack value as exchanged with get-methods.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StackEntry {
    Null,
    Int(i128),
    Cell(Cell),
    Slice(Cell),
    Tuple(Vec<StackEntry>),
}

impl StackEntry {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Int(_) => "int",
            Self::Cell(_) => "cell",
            Self::Slice(_) => "slice",
            Self::Tuple(_) => "tuple",
        }
    }
}

// ════════════════════════════════════════════════════════════════════════════
// ERROR
// ════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ChainError {
    #[error("chain transport error: {0}")]
    Transport(String),

    #[error("chain request timed out")]
    Timeout,

    #[error("unexpected chain response: {0}")]
    Response(String),

    #[error("get-method {method} exited with code {exit_code}")]
    GetMethod { method: String, exit_code: i64 },

    #[error("get-method {method}: stack entry {index}: {message}")]
    Stack { method: String, index: usize, message: String },

    #[error("account {0} is not active")]
    InactiveAccount(String),

    #[error("record codec: {0}")]
    Codec(#[from] CellError),
}

impl ChainError {
    /// Whether the failure is a communication failure rather than a
    /// malformed answer.
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::Timeout | Self::InactiveAccount(_))
    }

    pub(crate) fn stack(method: &str, index: usize, message: impl Into<String>) -> Self {
        Self::Stack { method: method.to_string(), index, message: message.into() }
    }
}

// ════════════════════════════════════════════════════════════════════════════
// CLIENT TRAIT
// ════════════════════════════════════════════════════════════════════════════

/// Read and broadcast operations against the ledger.
#[async_trait]
pub trait ChainClient: Send + Sync {
    async fn current_chain_head(&self) -> Result<BlockRef, ChainError>;

    async fn get_account(&self, block: &BlockRef, address: &Address) -> Result<AccountState, ChainError>;

    /// Runs a get-method and returns its result stack. Index 0 is the
    /// first returned value.
    async fn run_get_method(
        &self,
        block: &BlockRef,
        address: &Address,
        method: &str,
        args: &[StackEntry],
    ) -> Result<Vec<StackEntry>, ChainError>;

    async fn get_chain_parameter(&self, block: &BlockRef, id: u32) -> Result<Cell, ChainError>;

    /// Wraps `body` in an inbound external message to `dest` and
    /// broadcasts it once.
    async fn send_external_message(&self, dest: &Address, body: Cell) -> Result<(), ChainError>;
}

// ════════════════════════════════════════════════════════════════════════════
// MOCK CLIENT
// ════════════════════════════════════════════════════════════════════════════

/// A recorded get-method invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GetMethodCall {
    pub address: Address,
    pub method: String,
    pub args: Vec<StackEntry>,
}

#[derive(Default)]
struct MockState {
    head: Option<BlockRef>,
    accounts: HashMap<Address, AccountState>,
    /// Per (address, method) result queue; the last entry is sticky.
    methods: HashMap<(Address, String), VecDeque<Result<Vec<StackEntry>, ChainError>>>,
    params: HashMap<u32, Cell>,
    /// FIFO of outcomes for sends; empty means success.
    send_results: VecDeque<Result<(), ChainError>>,
    sent: Vec<(Address, Cell)>,
    calls: Vec<GetMethodCall>,
}

/// In-process chain snapshot for tests and dry runs.
///
/// Unconfigured reads fail with `ChainError::Response`.
#[derive(Default)]
pub struct MockChainClient {
    state: Mutex<MockState>,
}

impl MockChainClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_head(&self, block: BlockRef) {
        self.state.lock().head = Some(block);
    }

    pub fn set_account(&self, address: Address, account: AccountState) {
        self.state.lock().accounts.insert(address, account);
    }

    /// Replaces the result queue of a get-method with a single sticky result.
    pub fn set_method(&self, address: Address, method: &str, stack: Vec<StackEntry>) {
        let mut queue = VecDeque::new();
        queue.push_back(Ok(stack));
        self.state.lock().methods.insert((address, method.to_string()), queue);
    }

    /// Appends a result to a get-method's queue.
    pub fn push_method_result(&self, address: Address, method: &str, result: Result<Vec<StackEntry>, ChainError>) {
        self.state
            .lock()
            .methods
            .entry((address, method.to_string()))
            .or_default()
            .push_back(result);
    }

    pub fn set_param(&self, id: u32, cell: Cell) {
        self.state.lock().params.insert(id, cell);
    }

    /// Queues the outcome of the next send (FIFO).
    pub fn push_send_result(&self, result: Result<(), ChainError>) {
        self.state.lock().send_results.push_back(result);
    }

    /// Every external message body attempted, in order, including failed ones.
    pub fn sent(&self) -> Vec<(Address, Cell)> {
        self.state.lock().sent.clone()
    }

    pub fn calls(&self) -> Vec<GetMethodCall> {
        self.state.lock().calls.clone()
    }
}

#[async_trait]
impl ChainClient for MockChainClient {
    async fn current_chain_head(&self) -> Result<BlockRef, ChainError> {
        self.state
            .lock()
            .head
            .ok_or_else(|| ChainError::Transport("no mock chain head".to_string()))
    }

    async fn get_account(&self, _block: &BlockRef, address: &Address) -> Result<AccountState, ChainError> {
        Ok(self
            .state
            .lock()
            .accounts
            .get(address)
            .cloned()
            .unwrap_or(AccountState { status: AccountStatus::Nonexist, balance: Coins::ZERO }))
    }

    async fn run_get_method(
        &self,
        _block: &BlockRef,
        address: &Address,
        method: &str,
        args: &[StackEntry],
    ) -> Result<Vec<StackEntry>, ChainError> {
        let mut state = self.state.lock();
        state.calls.push(GetMethodCall {
            address: *address,
            method: method.to_string(),
            args: args.to_vec(),
        });
        let queue = state
            .methods
            .get_mut(&(*address, method.to_string()))
            .ok_or_else(|| ChainError::Response(format!("no mock result for {}", method)))?;
        let result = if queue.len() > 1 { queue.pop_front() } else { queue.front().cloned() };
        result.unwrap_or_else(|| Err(ChainError::Response(format!("no mock result for {}", method))))
    }

    async fn get_chain_parameter(&self, _block: &BlockRef, id: u32) -> Result<Cell, ChainError> {
        self.state
            .lock()
            .params
            .get(&id)
            .cloned()
            .ok_or_else(|| ChainError::Response(format!("config param {} not set", id)))
    }

    async fn send_external_message(&self, dest: &Address, body: Cell) -> Result<(), ChainError> {
        let mut state = self.state.lock();
        state.sent.push((*dest, body));
        state.send_results.pop_front().unwrap_or(Ok(()))
    }
}

// ════════════════════════════════════════════════════════════════════════════
// COMPILE-TIME ASSERTIONS
// ════════════════════════════════════════════════════════════════════════════

const _: () = {
    fn assert_send_sync<T: Send + Sync>() {}
    fn check() {
        assert_send_sync::<MockChainClient>();
        assert_send_sync::<Box<dyn ChainClient>>();
    }
    let _ = check;
};

#[cfg(test)]
mod tests {
    use super::*;
    use borrower_common::CellBuilder;

    fn block() -> BlockRef {
        BlockRef { workchain: -1, shard: i64::MIN, seqno: 42 }
    }

    #[tokio::test]
    async fn test_mock_method_queue_last_is_sticky() {
        let mock = MockChainClient::new();
        let addr = Address::new(0, [1; 32]);
        mock.push_method_result(addr, "seqno", Ok(vec![StackEntry::Int(5)]));
        mock.push_method_result(addr, "seqno", Ok(vec![StackEntry::Int(6)]));

        let first = mock.run_get_method(&block(), &addr, "seqno", &[]).await.unwrap();
        let second = mock.run_get_method(&block(), &addr, "seqno", &[]).await.unwrap();
        let third = mock.run_get_method(&block(), &addr, "seqno", &[]).await.unwrap();
        assert_eq!(first, vec![StackEntry::Int(5)]);
        assert_eq!(second, vec![StackEntry::Int(6)]);
        assert_eq!(third, vec![StackEntry::Int(6)]);
        assert_eq!(mock.calls().len(), 3);
    }

    #[tokio::test]
    async fn test_mock_send_results_fifo() {
        let mock = MockChainClient::new();
        let addr = Address::new(-1, [2; 32]);
        mock.push_send_result(Err(ChainError::Timeout));
        let body = CellBuilder::new().store_uint(1, 8).unwrap().build();

        assert_eq!(mock.send_external_message(&addr, body.clone()).await, Err(ChainError::Timeout));
        assert!(mock.send_external_message(&addr, body).await.is_ok());
        assert_eq!(mock.sent().len(), 2);
    }

    #[tokio::test]
    async fn test_mock_unknown_account_is_nonexistent() {
        let mock = MockChainClient::new();
        let acc = mock.get_account(&block(), &Address::new(0, [9; 32])).await.unwrap();
        assert!(!acc.is_active());
        assert!(mock.current_chain_head().await.is_err());
    }

    #[test]
    fn test_error_classification() {
        assert!(ChainError::Timeout.is_transport());
        assert!(ChainError::Transport("refused".into()).is_transport());
        assert!(!ChainError::Response("garbage".into()).is_transport());
        assert!(!ChainError::Codec(CellError::RefUnderflow).is_transport());
    }
}
