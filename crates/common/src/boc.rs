//! # Bag of cells
//!
//! Wire format used by the chain API for cell trees (account data, get-method
//! results, outgoing messages).
//!
//! ```text
//! magic        u32   0xb5ee9c72
//! flags        u8    has_idx:1 has_crc32c:1 has_cache_bits:1 _:2 size:3
//! off_bytes    u8
//! cells        size bytes
//! roots        size bytes
//! absent       size bytes
//! tot_size     off_bytes bytes
//! root_list    roots * size bytes
//! index        cells * off_bytes bytes     (has_idx only)
//! cell_data    tot_size bytes
//! crc32c       u32 LE                      (has_crc32c only)
//! ```
//!
//! Serialization always writes a single root with a CRC32C trailer and no
//! index. Identical subtrees are stored once.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use crc::{Crc, CRC_32_ISCSI};

use crate::cell::{Cell, CellError};

const BOC_MAGIC: u32 = 0xb5ee_9c72;

// ════════════════════════════════════════════════════════════════════════════
// CRC32C
// ════════════════════════════════════════════════════════════════════════════

const CASTAGNOLI: Crc<u32> = Crc::<u32>::new(&CRC_32_ISCSI);

/// CRC-32C (Castagnoli), as used for the BOC trailer.
pub fn crc32c(data: &[u8]) -> u32 {
    CASTAGNOLI.checksum(data)
}

// ════════════════════════════════════════════════════════════════════════════
// SERIALIZE
// ════════════════════════════════════════════════════════════════════════════

fn bytes_for(value: usize) -> usize {
    let bits = (usize::BITS - value.leading_zeros()) as usize;
    bits.div_ceil(8).max(1)
}

fn push_be(out: &mut Vec<u8>, value: usize, width: usize) {
    let bytes = (value as u64).to_be_bytes();
    out.extend_from_slice(&bytes[8 - width..]);
}

fn collect_post_order(
    cell: &Arc<Cell>,
    seen: &mut HashSet<[u8; 32]>,
    out: &mut Vec<Arc<Cell>>,
) {
    if !seen.insert(cell.hash()) {
        return;
    }
    for child in cell.refs() {
        collect_post_order(child, seen, out);
    }
    out.push(Arc::clone(cell));
}

/// Serializes a single-root tree.
pub fn to_boc(root: &Cell) -> Result<Vec<u8>, CellError> {
    let root = Arc::new(root.clone());
    let mut seen = HashSet::new();
    let mut order = Vec::new();
    collect_post_order(&root, &mut seen, &mut order);
    order.reverse();

    let index: HashMap<[u8; 32], usize> = order
        .iter()
        .enumerate()
        .map(|(i, c)| (c.hash(), i))
        .collect();

    let size = bytes_for(order.len());
    let mut payload = Vec::new();
    for cell in &order {
        payload.extend_from_slice(&cell.descriptors());
        payload.extend_from_slice(&cell.padded_data());
        for child in cell.refs() {
            let idx = index
                .get(&child.hash())
                .ok_or_else(|| CellError::InvalidBoc("child missing from index".to_string()))?;
            push_be(&mut payload, *idx, size);
        }
    }
    let off_bytes = bytes_for(payload.len());

    let mut out = Vec::with_capacity(payload.len() + 32);
    out.extend_from_slice(&BOC_MAGIC.to_be_bytes());
    out.push(0b0100_0000 | size as u8);
    out.push(off_bytes as u8);
    push_be(&mut out, order.len(), size);
    push_be(&mut out, 1, size);
    push_be(&mut out, 0, size);
    push_be(&mut out, payload.len(), off_bytes);
    push_be(&mut out, 0, size);
    out.extend_from_slice(&payload);
    let crc = crc32c(&out);
    out.extend_from_slice(&crc.to_le_bytes());
    Ok(out)
}

pub fn to_base64(root: &Cell) -> Result<String, CellError> {
    Ok(STANDARD.encode(to_boc(root)?))
}

// ════════════════════════════════════════════════════════════════════════════
// DESERIALIZE
// ════════════════════════════════════════════════════════════════════════════

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8], CellError> {
        if self.pos + n > self.bytes.len() {
            return Err(CellError::InvalidBoc("unexpected end of data".to_string()));
        }
        let out = &self.bytes[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    fn uint(&mut self, n: usize) -> Result<usize, CellError> {
        Ok(self.take(n)?.iter().fold(0usize, |acc, &b| (acc << 8) | b as usize))
    }
}

struct RawCell {
    data: Vec<u8>,
    bit_len: usize,
    refs: Vec<usize>,
}

fn read_raw_cell(reader: &mut Reader<'_>, size: usize) -> Result<RawCell, CellError> {
    let d1 = reader.take(1)?[0];
    let d2 = reader.take(1)?[0];
    let ref_count = (d1 & 0x07) as usize;
    if d1 & 0x08 != 0 || d1 >> 5 != 0 {
        return Err(CellError::Unsupported("exotic or higher-level cell".to_string()));
    }
    if ref_count > 4 {
        return Err(CellError::InvalidBoc(format!("{} refs in one cell", ref_count)));
    }

    let byte_len = (d2 as usize).div_ceil(2);
    let mut data = reader.take(byte_len)?.to_vec();
    let bit_len = if d2 % 2 == 0 {
        byte_len * 8
    } else {
        // Strip the completion tag: the lowest set bit of the last byte.
        let last = data.last_mut().ok_or_else(|| CellError::InvalidBoc("empty padded cell".to_string()))?;
        if *last == 0 {
            return Err(CellError::InvalidBoc("missing completion tag".to_string()));
        }
        let trailing = last.trailing_zeros() as usize;
        *last &= !(1u8 << trailing);
        byte_len * 8 - trailing - 1
    };

    let refs = (0..ref_count)
        .map(|_| reader.uint(size))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(RawCell { data, bit_len, refs })
}

/// Deserializes a BOC and returns its first root.
pub fn from_boc(bytes: &[u8]) -> Result<Cell, CellError> {
    let mut reader = Reader { bytes, pos: 0 };
    let magic = reader.uint(4)? as u32;
    if magic != BOC_MAGIC {
        return Err(CellError::InvalidBoc(format!("unknown magic {:#010x}", magic)));
    }
    let flags = reader.take(1)?[0];
    let has_idx = flags & 0x80 != 0;
    let has_crc = flags & 0x40 != 0;
    let size = (flags & 0x07) as usize;
    if size == 0 || size > 4 {
        return Err(CellError::InvalidBoc(format!("ref size {}", size)));
    }
    let off_bytes = reader.take(1)?[0] as usize;
    if off_bytes == 0 || off_bytes > 8 {
        return Err(CellError::InvalidBoc(format!("offset size {}", off_bytes)));
    }

    let cell_count = reader.uint(size)?;
    let root_count = reader.uint(size)?;
    let _absent = reader.uint(size)?;
    let _total = reader.uint(off_bytes)?;
    if root_count == 0 {
        return Err(CellError::InvalidBoc("no roots".to_string()));
    }
    let roots = (0..root_count)
        .map(|_| reader.uint(size))
        .collect::<Result<Vec<_>, _>>()?;
    if has_idx {
        reader.take(cell_count * off_bytes)?;
    }

    let raw = (0..cell_count)
        .map(|_| read_raw_cell(&mut reader, size))
        .collect::<Result<Vec<_>, _>>()?;

    if has_crc {
        let body_end = reader.pos;
        let expected = u32::from_le_bytes(
            reader
                .take(4)?
                .try_into()
                .map_err(|_| CellError::InvalidBoc("short crc".to_string()))?,
        );
        if crc32c(&bytes[..body_end]) != expected {
            return Err(CellError::InvalidBoc("crc32c mismatch".to_string()));
        }
    }

    // Children always follow their parents; build from the back.
    let mut built: Vec<Option<Arc<Cell>>> = vec![None; cell_count];
    for (i, rc) in raw.into_iter().enumerate().rev() {
        let mut refs = Vec::with_capacity(rc.refs.len());
        for r in rc.refs {
            if r <= i || r >= cell_count {
                return Err(CellError::InvalidBoc(format!("cell {} references {}", i, r)));
            }
            let child = built[r]
                .as_ref()
                .ok_or_else(|| CellError::InvalidBoc(format!("cell {} not built", r)))?;
            refs.push(Arc::clone(child));
        }
        built[i] = Some(Arc::new(Cell::from_parts(rc.data, rc.bit_len, refs)?));
    }

    let root_idx = roots[0];
    let root = built
        .get(root_idx)
        .and_then(|c| c.as_ref())
        .ok_or_else(|| CellError::InvalidBoc(format!("root index {}", root_idx)))?;
    Ok(root.as_ref().clone())
}

pub fn from_base64(encoded: &str) -> Result<Cell, CellError> {
    let bytes = STANDARD
        .decode(encoded.trim())
        .map_err(|e| CellError::InvalidBoc(format!("base64: {}", e)))?;
    from_boc(&bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cell::CellBuilder;

    #[test]
    fn test_crc32c_check_value() {
        assert_eq!(crc32c(b"123456789"), 0xE306_9283);
    }

    #[test]
    fn test_empty_cell_boc() {
        let boc = to_boc(&Cell::empty()).unwrap();
        assert_eq!(&boc[..4], &BOC_MAGIC.to_be_bytes());
        let back = from_boc(&boc).unwrap();
        assert_eq!(back, Cell::empty());
    }

    #[test]
    fn test_tree_with_shared_child() {
        let shared = CellBuilder::new().store_uint(0xBEEF, 16).unwrap().build();
        let mid = CellBuilder::new()
            .store_uint(3, 5)
            .unwrap()
            .store_ref(shared.clone())
            .unwrap()
            .build();
        let root = CellBuilder::new()
            .store_uint(1, 1)
            .unwrap()
            .store_ref(mid)
            .unwrap()
            .store_ref(shared)
            .unwrap()
            .build();

        let boc = to_boc(&root).unwrap();
        // Three distinct cells, the shared one written once.
        assert_eq!(boc[6], 3);
        let back = from_boc(&boc).unwrap();
        assert_eq!(back.hash(), root.hash());
        assert_eq!(back, root);
    }

    #[test]
    fn test_base64_roundtrip_keeps_odd_bit_lengths() {
        let cell = CellBuilder::new().store_uint(0b101, 3).unwrap().build();
        let encoded = to_base64(&cell).unwrap();
        let back = from_base64(&encoded).unwrap();
        assert_eq!(back.bit_len(), 3);
        assert_eq!(back.parse().load_uint(3).unwrap(), 0b101);
    }

    #[test]
    fn test_corrupted_crc_rejected() {
        let mut boc = to_boc(&CellBuilder::new().store_uint(7, 8).unwrap().build()).unwrap();
        let n = boc.len();
        boc[n - 1] ^= 0xFF;
        assert!(matches!(from_boc(&boc), Err(CellError::InvalidBoc(_))));
    }

    #[test]
    fn test_bad_magic() {
        assert!(from_boc(&[0, 1, 2, 3, 4, 5]).is_err());
        assert!(from_base64("!!!").is_err());
    }
}
