//! Message envelopes.
//!
//! ```text
//! ext_in_msg_info$10 src:addr_none dest:MsgAddressInt import_fee:Grams
//! int_msg_info$0 ihr_disabled:Bool bounce:Bool bounced:Bool
//!   src:addr_none dest:MsgAddressInt value:CurrencyCollection
//!   ihr_fee:Grams fwd_fee:Grams created_lt:uint64 created_at:uint32
//!
//! message$_ info init:(Maybe ...) body:(Either X ^X)
//! ```
//!
//! Bodies are always placed in a reference. No state init is attached.

use crate::address::Address;
use crate::cell::{Cell, CellBuilder, CellError};
use crate::coins::Coins;

/// Inbound external message carrying `body` to `dest`.
pub fn external_in(dest: &Address, body: Cell) -> Result<Cell, CellError> {
    Ok(CellBuilder::new()
        .store_uint(0b10, 2)?
        .store_address_none()?
        .store_address(dest)?
        .store_coins(Coins::ZERO)?
        .store_bit(false)?
        .store_bit(true)?
        .store_ref(body)?
        .build())
}

/// Internal message as placed inside a wallet transfer. Source, fees and
/// logical time are left for the chain to fill in.
pub fn internal(dest: &Address, value: Coins, bounce: bool, body: Cell) -> Result<Cell, CellError> {
    Ok(CellBuilder::new()
        .store_bit(false)?
        .store_bit(true)?
        .store_bit(bounce)?
        .store_bit(false)?
        .store_address_none()?
        .store_address(dest)?
        .store_coins(value)?
        .store_bit(false)? // no extra currencies
        .store_coins(Coins::ZERO)?
        .store_coins(Coins::ZERO)?
        .store_uint(0, 64)?
        .store_uint(0, 32)?
        .store_bit(false)?
        .store_bit(true)?
        .store_ref(body)?
        .build())
}
