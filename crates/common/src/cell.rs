//! # Cells
//!
//! A cell holds up to 1023 data bits and up to 4 references to child cells.
//! Every on-chain record this crate handles (treasury records, chain
//! parameters, message bodies) is a tree of cells.
//!
//! ```text
//! CellBuilder ──build()──▶ Cell ──parse()──▶ CellSlice
//!   store_uint/coins/ref      hash()           load_uint/coins/ref
//! ```
//!
//! ## Bit order
//!
//! Bits are stored most-significant first. Integers are big-endian.
//! Unused trailing bits of the last data byte are always zero.
//!
//! ## Representation hash
//!
//! `hash()` is the standard SHA-256 representation hash of an ordinary
//! (non-exotic, level 0) cell:
//!
//! ```text
//! d1 || d2 || data+completion tag || depth(ref_i) as u16 BE... || hash(ref_i)...
//! ```
//!
//! Two cells with the same hash are the same record; this is how a
//! validator set is identified.

use std::fmt;
use std::sync::Arc;

use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::address::Address;
use crate::coins::{Coins, MAX_COIN_BYTES};

/// Maximum number of data bits in one cell.
pub const MAX_DATA_BITS: usize = 1023;

/// Maximum number of references in one cell.
pub const MAX_REFS: usize = 4;

// ════════════════════════════════════════════════════════════════════════════
// ERROR
// ════════════════════════════════════════════════════════════════════════════

/// Errors raised while building, reading or transporting cells.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CellError {
    #[error("cell overflow: cannot hold {bits} bits and {refs} refs")]
    Overflow { bits: usize, refs: usize },

    #[error("cell underflow: need {needed} bits, {remaining} remaining")]
    BitUnderflow { needed: usize, remaining: usize },

    #[error("cell underflow: no reference left")]
    RefUnderflow,

    #[error("unsupported integer width {0}")]
    InvalidWidth(usize),

    #[error("value {value} does not fit in {bits} bits")]
    ValueTooLarge { value: i128, bits: usize },

    #[error("unexpected tag: expected {expected:#x}, found {found:#x}")]
    UnexpectedTag { expected: u64, found: u64 },

    #[error("invalid bag of cells: {0}")]
    InvalidBoc(String),

    #[error("unsupported: {0}")]
    Unsupported(String),

    #[error("malformed record: {0}")]
    Malformed(String),
}

// ════════════════════════════════════════════════════════════════════════════
// CELL
// ════════════════════════════════════════════════════════════════════════════

/// An immutable ordinary cell.
#[derive(Clone, PartialEq, Eq)]
pub struct Cell {
    data: Vec<u8>,
    bit_len: usize,
    refs: Vec<Arc<Cell>>,
}

impl Cell {
    /// The empty cell (no bits, no refs).
    pub fn empty() -> Self {
        Self { data: Vec::new(), bit_len: 0, refs: Vec::new() }
    }

    /// Assembles a cell from raw parts, enforcing the size limits.
    ///
    /// `data` must hold at least `bit_len` bits; bits past `bit_len` are
    /// cleared.
    pub fn from_parts(mut data: Vec<u8>, bit_len: usize, refs: Vec<Arc<Cell>>) -> Result<Self, CellError> {
        if bit_len > MAX_DATA_BITS || refs.len() > MAX_REFS || data.len() * 8 < bit_len {
            return Err(CellError::Overflow { bits: bit_len, refs: refs.len() });
        }
        data.truncate(bit_len.div_ceil(8));
        if bit_len % 8 != 0 {
            if let Some(last) = data.last_mut() {
                *last &= 0xFFu8 << (8 - bit_len % 8);
            }
        }
        Ok(Self { data, bit_len, refs })
    }

    pub fn bit_len(&self) -> usize {
        self.bit_len
    }

    /// Data bytes; trailing bits past `bit_len` are zero.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn refs(&self) -> &[Arc<Cell>] {
        &self.refs
    }

    pub fn parse(&self) -> CellSlice<'_> {
        CellSlice { cell: self, bit_pos: 0, ref_pos: 0 }
    }

    pub fn depth(&self) -> u16 {
        self.refs
            .iter()
            .map(|r| r.depth().saturating_add(1))
            .max()
            .unwrap_or(0)
    }

    pub(crate) fn descriptors(&self) -> [u8; 2] {
        let d1 = self.refs.len() as u8;
        let d2 = (self.bit_len / 8 + self.bit_len.div_ceil(8)) as u8;
        [d1, d2]
    }

    /// Data bytes with the completion tag appended when the bit length is
    /// not a multiple of eight.
    pub(crate) fn padded_data(&self) -> Vec<u8> {
        let mut out = self.data.clone();
        if self.bit_len % 8 != 0 {
            let idx = self.bit_len / 8;
            out[idx] |= 0x80 >> (self.bit_len % 8);
        }
        out
    }

    /// Standard representation hash.
    pub fn hash(&self) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(self.descriptors());
        hasher.update(self.padded_data());
        for r in &self.refs {
            hasher.update(r.depth().to_be_bytes());
        }
        for r in &self.refs {
            hasher.update(r.hash());
        }
        hasher.finalize().into()
    }
}

impl fmt::Debug for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cell")
            .field("bits", &self.bit_len)
            .field("data", &hex::encode(&self.data))
            .field("refs", &self.refs)
            .finish()
    }
}

// ════════════════════════════════════════════════════════════════════════════
// BUILDER
// ════════════════════════════════════════════════════════════════════════════

/// Append-only cell writer. Limits are checked on every store.
#[derive(Debug, Clone, Default)]
pub struct CellBuilder {
    data: Vec<u8>,
    bit_len: usize,
    refs: Vec<Arc<Cell>>,
}

impl CellBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bit_len(&self) -> usize {
        self.bit_len
    }

    fn ensure_bits(&self, n: usize) -> Result<(), CellError> {
        if self.bit_len + n > MAX_DATA_BITS {
            return Err(CellError::Overflow { bits: self.bit_len + n, refs: self.refs.len() });
        }
        Ok(())
    }

    fn push_bit(&mut self, bit: bool) {
        if self.bit_len % 8 == 0 {
            self.data.push(0);
        }
        if bit {
            self.data[self.bit_len / 8] |= 0x80 >> (self.bit_len % 8);
        }
        self.bit_len += 1;
    }

    pub fn store_bit(mut self, bit: bool) -> Result<Self, CellError> {
        self.ensure_bits(1)?;
        self.push_bit(bit);
        Ok(self)
    }

    pub fn store_uint(self, value: u64, bits: usize) -> Result<Self, CellError> {
        self.store_u128(value as u128, bits)
    }

    pub fn store_u128(mut self, value: u128, bits: usize) -> Result<Self, CellError> {
        if bits > 128 {
            return Err(CellError::InvalidWidth(bits));
        }
        if bits < 128 && value >> bits != 0 {
            return Err(CellError::ValueTooLarge { value: value as i128, bits });
        }
        self.ensure_bits(bits)?;
        for i in (0..bits).rev() {
            self.push_bit((value >> i) & 1 == 1);
        }
        Ok(self)
    }

    /// Two's-complement signed integer of `bits` width (at most 64).
    pub fn store_int(self, value: i64, bits: usize) -> Result<Self, CellError> {
        if bits == 0 || bits > 64 {
            return Err(CellError::InvalidWidth(bits));
        }
        let min = -(1i128 << (bits - 1));
        let max = (1i128 << (bits - 1)) - 1;
        if (value as i128) < min || (value as i128) > max {
            return Err(CellError::ValueTooLarge { value: value as i128, bits });
        }
        let mask: u64 = if bits == 64 { u64::MAX } else { (1u64 << bits) - 1 };
        self.store_uint(value as u64 & mask, bits)
    }

    pub fn store_bytes(mut self, bytes: &[u8]) -> Result<Self, CellError> {
        self.ensure_bits(bytes.len() * 8)?;
        for &byte in bytes {
            for i in (0..8).rev() {
                self.push_bit((byte >> i) & 1 == 1);
            }
        }
        Ok(self)
    }

    pub fn store_u256(self, value: &[u8; 32]) -> Result<Self, CellError> {
        self.store_bytes(value)
    }

    /// `VarUInteger 16`: `len:uint4` followed by `len` big-endian bytes.
    pub fn store_coins(self, amount: Coins) -> Result<Self, CellError> {
        let len = amount.byte_len();
        if len > MAX_COIN_BYTES {
            return Err(CellError::ValueTooLarge { value: amount.nano() as i128, bits: MAX_COIN_BYTES * 8 });
        }
        self.store_uint(len as u64, 4)?.store_u128(amount.nano(), len * 8)
    }

    /// `addr_std$10 anycast:0 workchain:int8 hash:bits256`.
    pub fn store_address(self, address: &Address) -> Result<Self, CellError> {
        self.store_uint(0b10, 2)?
            .store_bit(false)?
            .store_int(address.workchain as i64, 8)?
            .store_u256(&address.hash)
    }

    /// `addr_none$00`.
    pub fn store_address_none(self) -> Result<Self, CellError> {
        self.store_uint(0, 2)
    }

    pub fn store_ref(self, cell: Cell) -> Result<Self, CellError> {
        self.store_ref_arc(Arc::new(cell))
    }

    pub fn store_ref_arc(mut self, cell: Arc<Cell>) -> Result<Self, CellError> {
        if self.refs.len() >= MAX_REFS {
            return Err(CellError::Overflow { bits: self.bit_len, refs: self.refs.len() + 1 });
        }
        self.refs.push(cell);
        Ok(self)
    }

    /// `Maybe ^X`: one presence bit, then the reference if present.
    pub fn store_maybe_ref(self, cell: Option<Arc<Cell>>) -> Result<Self, CellError> {
        match cell {
            Some(c) => self.store_bit(true)?.store_ref_arc(c),
            None => self.store_bit(false),
        }
    }

    /// Appends the unread bits and references of `slice`.
    pub fn store_slice(mut self, slice: &CellSlice<'_>) -> Result<Self, CellError> {
        let mut reader = slice.clone();
        let bits = reader.remaining_bits();
        self.ensure_bits(bits)?;
        for _ in 0..bits {
            let bit = reader.load_bit()?;
            self.push_bit(bit);
        }
        while reader.remaining_refs() > 0 {
            let r = reader.load_ref_arc()?;
            self = self.store_ref_arc(r)?;
        }
        Ok(self)
    }

    pub fn build(self) -> Cell {
        Cell { data: self.data, bit_len: self.bit_len, refs: self.refs }
    }
}

// ════════════════════════════════════════════════════════════════════════════
// SLICE
// ════════════════════════════════════════════════════════════════════════════

/// Read cursor over a borrowed cell.
#[derive(Debug, Clone)]
pub struct CellSlice<'a> {
    cell: &'a Cell,
    bit_pos: usize,
    ref_pos: usize,
}

impl<'a> CellSlice<'a> {
    pub fn remaining_bits(&self) -> usize {
        self.cell.bit_len - self.bit_pos
    }

    pub fn remaining_refs(&self) -> usize {
        self.cell.refs.len() - self.ref_pos
    }

    fn ensure(&self, n: usize) -> Result<(), CellError> {
        if n > self.remaining_bits() {
            return Err(CellError::BitUnderflow { needed: n, remaining: self.remaining_bits() });
        }
        Ok(())
    }

    pub fn load_bit(&mut self) -> Result<bool, CellError> {
        self.ensure(1)?;
        let i = self.bit_pos;
        self.bit_pos += 1;
        Ok((self.cell.data[i / 8] >> (7 - i % 8)) & 1 == 1)
    }

    pub fn skip_bits(&mut self, n: usize) -> Result<(), CellError> {
        self.ensure(n)?;
        self.bit_pos += n;
        Ok(())
    }

    pub fn load_uint(&mut self, bits: usize) -> Result<u64, CellError> {
        if bits > 64 {
            return Err(CellError::InvalidWidth(bits));
        }
        Ok(self.load_u128(bits)? as u64)
    }

    pub fn load_u128(&mut self, bits: usize) -> Result<u128, CellError> {
        if bits > 128 {
            return Err(CellError::InvalidWidth(bits));
        }
        self.ensure(bits)?;
        let mut value: u128 = 0;
        for _ in 0..bits {
            value = (value << 1) | self.load_bit()? as u128;
        }
        Ok(value)
    }

    pub fn load_int(&mut self, bits: usize) -> Result<i64, CellError> {
        if bits == 0 || bits > 64 {
            return Err(CellError::InvalidWidth(bits));
        }
        let raw = self.load_uint(bits)?;
        let shift = 64 - bits as u32;
        Ok(((raw << shift) as i64) >> shift)
    }

    pub fn load_bytes(&mut self, n: usize) -> Result<Vec<u8>, CellError> {
        self.ensure(n * 8)?;
        (0..n).map(|_| self.load_uint(8).map(|b| b as u8)).collect()
    }

    pub fn load_u256(&mut self) -> Result<[u8; 32], CellError> {
        let bytes = self.load_bytes(32)?;
        let mut out = [0u8; 32];
        out.copy_from_slice(&bytes);
        Ok(out)
    }

    pub fn load_coins(&mut self) -> Result<Coins, CellError> {
        let len = self.load_uint(4)? as usize;
        Ok(Coins::from_nano(self.load_u128(len * 8)?))
    }

    /// Reads a `MsgAddressInt`; `addr_none` yields `None`.
    pub fn load_address(&mut self) -> Result<Option<Address>, CellError> {
        match self.load_uint(2)? {
            0b00 => Ok(None),
            0b10 => {
                if self.load_bit()? {
                    return Err(CellError::Unsupported("anycast address".to_string()));
                }
                let workchain = self.load_int(8)? as i8;
                let hash = self.load_u256()?;
                Ok(Some(Address::new(workchain, hash)))
            }
            other => Err(CellError::Unsupported(format!("address tag {:#b}", other))),
        }
    }

    /// Reads a fixed tag and fails with `UnexpectedTag` on mismatch.
    pub fn expect_tag(&mut self, expected: u64, bits: usize) -> Result<(), CellError> {
        let found = self.load_uint(bits)?;
        if found != expected {
            return Err(CellError::UnexpectedTag { expected, found });
        }
        Ok(())
    }

    pub fn load_ref(&mut self) -> Result<&'a Cell, CellError> {
        let cell = self.cell.refs.get(self.ref_pos).ok_or(CellError::RefUnderflow)?;
        self.ref_pos += 1;
        Ok(cell.as_ref())
    }

    pub fn load_ref_arc(&mut self) -> Result<Arc<Cell>, CellError> {
        let cell = self.cell.refs.get(self.ref_pos).ok_or(CellError::RefUnderflow)?;
        self.ref_pos += 1;
        Ok(Arc::clone(cell))
    }

    pub fn load_maybe_ref(&mut self) -> Result<Option<Arc<Cell>>, CellError> {
        if self.load_bit()? {
            self.load_ref_arc().map(Some)
        } else {
            Ok(None)
        }
    }

    /// Copies the unread remainder into a new cell.
    pub fn to_cell(&self) -> Result<Cell, CellError> {
        Ok(CellBuilder::new().store_slice(self)?.build())
    }
}

// ════════════════════════════════════════════════════════════════════════════
// TESTS
// ════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uint_layout_is_big_endian() {
        let cell = CellBuilder::new()
            .store_uint(0x574a297b, 32)
            .unwrap()
            .build();
        assert_eq!(cell.data(), &[0x57, 0x4a, 0x29, 0x7b]);
        assert_eq!(cell.parse().load_uint(32).unwrap(), 0x574a297b);
    }

    #[test]
    fn test_unaligned_fields() {
        let cell = CellBuilder::new()
            .store_uint(5, 4)
            .unwrap()
            .store_uint(0x1ABC, 14)
            .unwrap()
            .store_bit(true)
            .unwrap()
            .build();
        assert_eq!(cell.bit_len(), 19);
        let mut s = cell.parse();
        assert_eq!(s.load_uint(4).unwrap(), 5);
        assert_eq!(s.load_uint(14).unwrap(), 0x1ABC);
        assert!(s.load_bit().unwrap());
        assert_eq!(s.remaining_bits(), 0);
    }

    #[test]
    fn test_value_too_large() {
        assert!(matches!(
            CellBuilder::new().store_uint(16384, 14),
            Err(CellError::ValueTooLarge { bits: 14, .. })
        ));
    }

    #[test]
    fn test_signed_int() {
        let cell = CellBuilder::new().store_int(-1, 8).unwrap().build();
        assert_eq!(cell.data(), &[0xFF]);
        assert_eq!(cell.parse().load_int(8).unwrap(), -1);
        assert!(CellBuilder::new().store_int(128, 8).is_err());
    }

    #[test]
    fn test_coins_encoding() {
        let cell = CellBuilder::new()
            .store_coins(Coins::from_nano(5_000_000_000))
            .unwrap()
            .build();
        // 5e9 = 0x012A05F200, five bytes.
        assert_eq!(cell.bit_len(), 4 + 40);
        assert_eq!(cell.parse().load_coins().unwrap(), Coins::from_nano(5_000_000_000));

        let zero = CellBuilder::new().store_coins(Coins::ZERO).unwrap().build();
        assert_eq!(zero.bit_len(), 4);
    }

    #[test]
    fn test_address_encoding() {
        let addr = Address::new(-1, [0xAB; 32]);
        let cell = CellBuilder::new().store_address(&addr).unwrap().build();
        assert_eq!(cell.bit_len(), 267);
        assert_eq!(cell.parse().load_address().unwrap(), Some(addr));

        let none = CellBuilder::new().store_address_none().unwrap().build();
        assert_eq!(none.parse().load_address().unwrap(), None);
    }

    #[test]
    fn test_overflow_limits() {
        let full = CellBuilder::new().store_bytes(&[0u8; 127]).unwrap();
        assert_eq!(full.bit_len(), 1016);
        assert!(full.clone().store_uint(0, 7).is_ok());
        assert!(full.store_uint(0, 8).is_err());

        let mut b = CellBuilder::new();
        for _ in 0..MAX_REFS {
            b = b.store_ref(Cell::empty()).unwrap();
        }
        assert!(b.store_ref(Cell::empty()).is_err());
    }

    #[test]
    fn test_underflow() {
        let cell = CellBuilder::new().store_uint(1, 3).unwrap().build();
        let mut s = cell.parse();
        assert!(matches!(s.load_uint(4), Err(CellError::BitUnderflow { needed: 4, remaining: 3 })));
        assert!(matches!(s.load_ref(), Err(CellError::RefUnderflow)));
    }

    #[test]
    fn test_empty_cell_hash() {
        // Well-known hash of the empty ordinary cell.
        assert_eq!(
            hex::encode(Cell::empty().hash()),
            "96a296d224f285c67bee93c30f8a309157f0daa35dc5b87e410b78630a09cfc7"
        );
    }

    #[test]
    fn test_hash_depends_on_children() {
        let leaf_a = CellBuilder::new().store_uint(1, 8).unwrap().build();
        let leaf_b = CellBuilder::new().store_uint(2, 8).unwrap().build();
        let a = CellBuilder::new().store_ref(leaf_a).unwrap().build();
        let b = CellBuilder::new().store_ref(leaf_b).unwrap().build();
        assert_ne!(a.hash(), b.hash());
        assert_eq!(a.depth(), 1);
    }

    #[test]
    fn test_slice_remainder_to_cell() {
        let child = CellBuilder::new().store_uint(9, 8).unwrap().build();
        let cell = CellBuilder::new()
            .store_uint(0xAA, 8)
            .unwrap()
            .store_uint(0x3, 2)
            .unwrap()
            .store_ref(child.clone())
            .unwrap()
            .build();
        let mut s = cell.parse();
        s.skip_bits(8).unwrap();
        let rest = s.to_cell().unwrap();
        assert_eq!(rest.bit_len(), 2);
        assert_eq!(rest.refs().len(), 1);
        assert_eq!(rest.refs()[0].as_ref(), &child);
    }

    #[test]
    fn test_from_parts_masks_trailing_bits() {
        let cell = Cell::from_parts(vec![0xFF], 3, Vec::new()).unwrap();
        assert_eq!(cell.data(), &[0xE0]);
        assert!(Cell::from_parts(vec![0u8; 1], 9, Vec::new()).is_err());
    }
}
