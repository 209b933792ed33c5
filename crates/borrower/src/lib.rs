//! # Borrower Node
//!
//! Daemon that lets a staking validator borrow stake from a treasury
//! contract for each election round and drives the round's participation
//! through its lifecycle.
//!
//! ## Modules
//! - `records`: Treasury records and produced message bodies
//! - `chain`: Chain query facade trait and mock
//! - `clock`: Wall-clock seconds
//! - `toncenter`: HTTP implementation of the chain facade
//! - `retry`: Bounded retry for chain reads
//! - `treasury`: Typed treasury get-methods and chain parameters
//! - `console`: Validator key console trait, process adapter and mock
//! - `wallet`: Wallet trait, standard wallet and mock
//! - `participation`: Participation state machine and process sweep
//! - `provisioning`: Validation-key provisioning and stake confirmation
//! - `loan_request`: Loan request builder
//! - `scheduler`: Two self-re-arming tasks
//! - `config`: Configuration file
//! - `error`: Tick error taxonomy
//!
//! ## Data Flow
//! ```text
//!                     ┌──────────── Scheduler ────────────┐
//!                     │                                   │
//!               process tick                       request-loan tick
//!                     │                                   │
//!                     ▼                                   ▼
//!   ChainClient ─► Treasury ─► participation     LoanRequester ─► provisioning ─► KeyConsole
//!        ▲                         │                   │
//!        └── send_external_message ┘                   └──► Wallet::send_and_wait
//! ```
//!
//! No state is kept between ticks; every tick re-reads the chain.

pub mod chain;
pub mod clock;
pub mod config;
pub mod console;
pub mod error;
pub mod loan_request;
pub mod participation;
pub mod provisioning;
pub mod records;
pub mod retry;
pub mod scheduler;
pub mod toncenter;
pub mod treasury;
pub mod wallet;

pub use chain::{BlockRef, ChainClient, ChainError, MockChainClient};
pub use config::{BorrowConfig, BorrowerConfig};
pub use console::{EngineConsole, KeyConsole, MockConsole};
pub use error::{ErrorKind, TickError};
pub use loan_request::{LoanOutcome, LoanReport, LoanRequester};
pub use participation::{Decision, SweepReport};
pub use scheduler::Scheduler;
pub use wallet::{MockWallet, StandardWallet, Wallet};

/// Borrower node version.
pub const BORROWER_VERSION: &str = env!("CARGO_PKG_VERSION");
