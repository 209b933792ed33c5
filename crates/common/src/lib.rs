//! # Borrower Common Crate
//!
//! Record codec primitives and shared value types for the borrower daemon.
//!
//! ## Modules
//! - `cell`: Bit-addressed cells, builder, slice and representation hash
//! - `dict`: `HashmapE` dictionaries
//! - `boc`: Bag-of-cells wire format
//! - `address`: Standard account addresses
//! - `coins`: Nanocoin amounts
//! - `message`: External and internal message envelopes
//! - `config`: TOML configuration loading
//!
//! ## Codec Layering
//! ```text
//! ┌───────────────┐   ┌──────────┐
//! │ message, dict │   │  boc     │  <- wire / structure
//! └───────┬───────┘   └────┬─────┘
//!         │                │
//!    ┌────▼────────────────▼───┐
//!    │   CellBuilder / Slice   │
//!    └────┬───────────────┬────┘
//!         │               │
//!     ┌───▼───┐      ┌────▼────┐
//!     │ Coins │      │ Address │
//!     └───────┘      └─────────┘
//! ```
//!
//! ## Usage
//! ```rust,ignore
//! let body = CellBuilder::new()
//!     .store_uint(op, 32)?
//!     .store_uint(now, 64)?
//!     .store_uint(round, 32)?
//!     .build();
//! let boc = boc::to_base64(&message::external_in(&treasury, body)?)?;
//! ```

pub mod address;
pub mod boc;
pub mod cell;
pub mod coins;
pub mod config;
pub mod dict;
pub mod message;

pub use address::{Address, AddressError};
pub use cell::{Cell, CellBuilder, CellError, CellSlice};
pub use coins::{Coins, CoinsError};
pub use config::ConfigError;
pub use dict::Dict;
