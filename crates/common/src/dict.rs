//! # Dictionaries (`HashmapE n X`)
//!
//! Patricia-tree dictionaries with fixed `n`-bit keys.
//!
//! ```text
//! hme_empty$0 = HashmapE n X;
//! hme_root$1 root:^(Hashmap n X) = HashmapE n X;
//!
//! hm_edge#_ label:(HmLabel ~l n) node:(HashmapNode (n - l) X)
//! hmn_leaf#_ value:X                                 (n - l == 0)
//! hmn_fork#_ left:^(Hashmap m X) right:^(Hashmap m X) (m = n - l - 1)
//!
//! hml_short$0  len:(Unary ~l) s:(l * Bit)
//! hml_long$10  l:(#<= m) s:(l * Bit)
//! hml_same$11  v:Bit l:(#<= m)
//! ```
//!
//! [`Dict`] keeps the root cell as read from the chain, so a record that
//! embeds a dictionary re-encodes byte-for-byte. Lookups walk the tree on
//! demand. [`Dict::from_entries`] builds the canonical form, choosing the
//! shortest label encoding at each edge.

use std::sync::Arc;

use crate::cell::{Cell, CellBuilder, CellError, CellSlice};

/// A dictionary key as a bit string, most significant bit first.
pub type DictKey = Vec<bool>;

/// `HashmapE n X` with its root kept verbatim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dict {
    key_bits: usize,
    root: Option<Arc<Cell>>,
}

impl Dict {
    pub fn empty(key_bits: usize) -> Self {
        Self { key_bits, root: None }
    }

    pub fn key_bits(&self) -> usize {
        self.key_bits
    }

    pub fn is_empty(&self) -> bool {
        self.root.is_none()
    }

    pub fn root(&self) -> Option<&Arc<Cell>> {
        self.root.as_ref()
    }

    /// Wraps an already-loaded `Hashmap n X` root (e.g. a dictionary cell
    /// returned on a get-method stack).
    pub fn from_root(key_bits: usize, root: Option<Arc<Cell>>) -> Self {
        Self { key_bits, root }
    }

    /// Reads `HashmapE n X` from a slice.
    pub fn load(slice: &mut CellSlice<'_>, key_bits: usize) -> Result<Self, CellError> {
        let root = slice.load_maybe_ref()?;
        Ok(Self { key_bits, root })
    }

    /// Writes `HashmapE n X` to a builder.
    pub fn store(&self, builder: CellBuilder) -> Result<CellBuilder, CellError> {
        builder.store_maybe_ref(self.root.clone())
    }

    /// Looks up a key; the value is returned as a fresh cell holding the
    /// leaf's remaining bits and references.
    pub fn get(&self, key: &[bool]) -> Result<Option<Cell>, CellError> {
        if key.len() != self.key_bits {
            return Err(CellError::Malformed(format!(
                "key of {} bits for a {}-bit dictionary",
                key.len(),
                self.key_bits
            )));
        }
        let Some(root) = &self.root else {
            return Ok(None);
        };

        let mut cell: &Cell = root.as_ref();
        let mut remaining = self.key_bits;
        let mut pos = 0;
        loop {
            let mut slice = cell.parse();
            let label = load_label(&mut slice, remaining)?;
            if key[pos..pos + label.len()] != label[..] {
                return Ok(None);
            }
            pos += label.len();
            remaining -= label.len();
            if remaining == 0 {
                return slice.to_cell().map(Some);
            }
            let branch = key[pos];
            let left = slice.load_ref()?;
            let right = slice.load_ref()?;
            cell = if branch { right } else { left };
            pos += 1;
            remaining -= 1;
        }
    }

    pub fn get_uint(&self, key: u64) -> Result<Option<Cell>, CellError> {
        self.get(&uint_key(key, self.key_bits)?)
    }

    pub fn get_u256(&self, key: &[u8; 32]) -> Result<Option<Cell>, CellError> {
        self.get(&bytes_key(key))
    }

    /// All entries in ascending key order.
    pub fn entries(&self) -> Result<Vec<(DictKey, Cell)>, CellError> {
        let mut out = Vec::new();
        if let Some(root) = &self.root {
            walk(root, Vec::new(), self.key_bits, &mut out)?;
        }
        Ok(out)
    }

    /// Builds the canonical dictionary for `entries`.
    ///
    /// Keys must be unique and exactly `key_bits` long. Each value cell's
    /// bits and references are inlined into its leaf.
    pub fn from_entries(key_bits: usize, mut entries: Vec<(DictKey, Cell)>) -> Result<Self, CellError> {
        if entries.is_empty() {
            return Ok(Self::empty(key_bits));
        }
        if entries.iter().any(|(k, _)| k.len() != key_bits) {
            return Err(CellError::Malformed("dictionary key width mismatch".to_string()));
        }
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        if entries.windows(2).any(|w| w[0].0 == w[1].0) {
            return Err(CellError::Malformed("duplicate dictionary key".to_string()));
        }
        let refs: Vec<(&[bool], &Cell)> = entries.iter().map(|(k, v)| (k.as_slice(), v)).collect();
        let root = build_edge(&refs, key_bits)?;
        Ok(Self { key_bits, root: Some(Arc::new(root)) })
    }
}

// ════════════════════════════════════════════════════════════════════════════
// KEY HELPERS
// ════════════════════════════════════════════════════════════════════════════

pub fn uint_key(value: u64, bits: usize) -> Result<DictKey, CellError> {
    if bits > 64 {
        return Err(CellError::InvalidWidth(bits));
    }
    if bits < 64 && value >> bits != 0 {
        return Err(CellError::ValueTooLarge { value: value as i128, bits });
    }
    Ok((0..bits).rev().map(|i| (value >> i) & 1 == 1).collect())
}

pub fn bytes_key(bytes: &[u8]) -> DictKey {
    bytes
        .iter()
        .flat_map(|b| (0..8).rev().map(move |i| (b >> i) & 1 == 1))
        .collect()
}

pub fn key_to_uint(key: &[bool]) -> Result<u64, CellError> {
    if key.len() > 64 {
        return Err(CellError::InvalidWidth(key.len()));
    }
    Ok(key.iter().fold(0u64, |acc, &b| (acc << 1) | b as u64))
}

pub fn key_to_u256(key: &[bool]) -> Result<[u8; 32], CellError> {
    if key.len() != 256 {
        return Err(CellError::InvalidWidth(key.len()));
    }
    let mut out = [0u8; 32];
    for (i, &bit) in key.iter().enumerate() {
        if bit {
            out[i / 8] |= 0x80 >> (i % 8);
        }
    }
    Ok(out)
}

// ════════════════════════════════════════════════════════════════════════════
// LABELS
// ════════════════════════════════════════════════════════════════════════════

/// Width of `#<= m`.
fn len_width(max: usize) -> usize {
    (usize::BITS - max.leading_zeros()) as usize
}

fn load_label(slice: &mut CellSlice<'_>, max: usize) -> Result<Vec<bool>, CellError> {
    if !slice.load_bit()? {
        // hml_short
        let mut len = 0;
        while slice.load_bit()? {
            len += 1;
        }
        if len > max {
            return Err(CellError::Malformed(format!("label of {} bits exceeds {}", len, max)));
        }
        return (0..len).map(|_| slice.load_bit()).collect();
    }
    let width = len_width(max);
    if !slice.load_bit()? {
        // hml_long
        let len = slice.load_uint(width)? as usize;
        if len > max {
            return Err(CellError::Malformed(format!("label of {} bits exceeds {}", len, max)));
        }
        return (0..len).map(|_| slice.load_bit()).collect();
    }
    // hml_same
    let bit = slice.load_bit()?;
    let len = slice.load_uint(width)? as usize;
    if len > max {
        return Err(CellError::Malformed(format!("label of {} bits exceeds {}", len, max)));
    }
    Ok(vec![bit; len])
}

fn store_label(builder: CellBuilder, label: &[bool], max: usize) -> Result<CellBuilder, CellError> {
    let width = len_width(max);
    let short_len = 2 * label.len() + 2;
    let long_len = 2 + width + label.len();
    let same_len = 3 + width;
    let is_same = label.len() <= 1 || label.iter().all(|&b| b == label[0]);

    let mut kind = 0; // 0 short, 1 long, 2 same
    let mut best = short_len;
    if long_len < best {
        kind = 1;
        best = long_len;
    }
    if is_same && same_len < best {
        kind = 2;
    }

    let mut b = builder;
    match kind {
        0 => {
            b = b.store_bit(false)?;
            for _ in 0..label.len() {
                b = b.store_bit(true)?;
            }
            b = b.store_bit(false)?;
            for &bit in label {
                b = b.store_bit(bit)?;
            }
        }
        1 => {
            b = b.store_uint(0b10, 2)?.store_uint(label.len() as u64, width)?;
            for &bit in label {
                b = b.store_bit(bit)?;
            }
        }
        _ => {
            b = b
                .store_uint(0b11, 2)?
                .store_bit(label[0])?
                .store_uint(label.len() as u64, width)?;
        }
    }
    Ok(b)
}

// ════════════════════════════════════════════════════════════════════════════
// TREE WALK / BUILD
// ════════════════════════════════════════════════════════════════════════════

fn walk(cell: &Cell, prefix: DictKey, remaining: usize, out: &mut Vec<(DictKey, Cell)>) -> Result<(), CellError> {
    let mut slice = cell.parse();
    let label = load_label(&mut slice, remaining)?;
    let mut key = prefix;
    key.extend_from_slice(&label);
    let remaining = remaining - label.len();
    if remaining == 0 {
        out.push((key, slice.to_cell()?));
        return Ok(());
    }
    let left = slice.load_ref()?;
    let right = slice.load_ref()?;
    let mut left_key = key.clone();
    left_key.push(false);
    walk(left, left_key, remaining - 1, out)?;
    key.push(true);
    walk(right, key, remaining - 1, out)
}

fn build_edge(entries: &[(&[bool], &Cell)], remaining: usize) -> Result<Cell, CellError> {
    let first = entries[0].0;
    let mut common = first.len();
    for (key, _) in &entries[1..] {
        common = common.min(first.iter().zip(key.iter()).take_while(|(a, b)| a == b).count());
    }

    let builder = store_label(CellBuilder::new(), &first[..common], remaining)?;
    if common == remaining {
        // Exactly one entry reaches a leaf.
        let value = entries[0].1;
        return Ok(builder.store_slice(&value.parse())?.build());
    }

    let split = entries.partition_point(|(k, _)| !k[common]);
    fn strip<'a>(side: &[(&'a [bool], &'a Cell)], common: usize) -> Vec<(&'a [bool], &'a Cell)> {
        side.iter().map(|(k, v)| (&k[common + 1..], *v)).collect()
    }
    let left = build_edge(&strip(&entries[..split], common), remaining - common - 1)?;
    let right = build_edge(&strip(&entries[split..], common), remaining - common - 1)?;
    Ok(builder.store_ref(left)?.store_ref(right)?.build())
}
