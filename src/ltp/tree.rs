//! ## [BTree-on-Heap (BTH)](https://learn.microsoft.com/en-us/openspecs/office_file_formats/ms-pst/2dd1a95a-c8b1-4ac5-87d1-10cb8de64053)
//!
//! A flat, sorted array of fixed-size `(key, value)` records allocated as one heap entry.
//! `bIdxLevels` is required to be `0`: multi-level BTH (an index page of further HIDs) is
//! rejected as unsupported rather than generalized, since nothing in this crate's scope
//! produces one.

use byteorder::{LittleEndian, ReadBytesExt};
use std::io::Read;

use super::heap::{HeapId, HeapNodeType, HeapOnNode};
use super::{LtpError, LtpResult};

/// [BTHHEADER](https://learn.microsoft.com/en-us/openspecs/office_file_formats/ms-pst/8e4ae05c-3c24-4103-b7e5-ffef6f244834)
#[derive(Clone, Copy, Debug)]
struct HeapTreeHeader {
    key_size: u8,
    entry_size: u8,
    root: HeapId,
}

impl HeapTreeHeader {
    fn read(f: &mut dyn Read) -> LtpResult<Self> {
        let node_type = HeapNodeType::try_from(f.read_u8()?)?;
        if node_type != HeapNodeType::Tree {
            return Err(LtpError::InvalidHeapTreeNodeType(node_type));
        }
        let key_size = f.read_u8()?;
        if !matches!(key_size, 2 | 4 | 8 | 16) {
            return Err(LtpError::InvalidHeapTreeKeySize(key_size));
        }
        let entry_size = f.read_u8()?;
        if !(1..=32).contains(&entry_size) {
            return Err(LtpError::InvalidHeapTreeDataSize(entry_size));
        }
        let levels = f.read_u8()?;
        let root = HeapId::read(f)?;

        if levels != 0 {
            return Err(LtpError::UnsupportedHeapTreeLevels(levels));
        }

        Ok(Self {
            key_size,
            entry_size,
            root,
        })
    }
}

/// One flat `(key bytes, value bytes)` leaf record.
pub struct HeapTreeEntry<'a> {
    pub key: &'a [u8],
    pub value: &'a [u8],
}

/// A parsed BTH: its record layout plus the heap allocation holding the flat record array.
pub struct HeapTree<'a> {
    key_size: usize,
    entry_size: usize,
    records: &'a [u8],
}

impl<'a> HeapTree<'a> {
    /// `root_id` is the client's `hidUserRoot`, pointing at the BTH header allocation.
    pub fn load(heap: &HeapOnNode<'a>, root_id: HeapId) -> LtpResult<Self> {
        let header_bytes = heap.entry(root_id)?;
        let header = HeapTreeHeader::read(&mut &header_bytes[..])?;

        let records = if header.root.is_zero() {
            &[][..]
        } else {
            heap.entry(header.root)?
        };

        let record_size = usize::from(header.key_size) + usize::from(header.entry_size);
        if record_size != 0 && records.len() % record_size != 0 {
            return Err(LtpError::InvalidHeapTreeDataSize(header.entry_size));
        }

        Ok(Self {
            key_size: usize::from(header.key_size),
            entry_size: usize::from(header.entry_size),
            records,
        })
    }

    pub fn key_size(&self) -> usize {
        self.key_size
    }

    pub fn entry_size(&self) -> usize {
        self.entry_size
    }

    pub fn len(&self) -> usize {
        let record_size = self.key_size + self.entry_size;
        if record_size == 0 {
            0
        } else {
            self.records.len() / record_size
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn record(&self, index: usize) -> Option<HeapTreeEntry<'a>> {
        let record_size = self.key_size + self.entry_size;
        let start = index.checked_mul(record_size)?;
        let key_end = start + self.key_size;
        let end = key_end + self.entry_size;
        if end > self.records.len() {
            return None;
        }
        Some(HeapTreeEntry {
            key: &self.records[start..key_end],
            value: &self.records[key_end..end],
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = HeapTreeEntry<'a>> + '_ {
        (0..self.len()).filter_map(move |i| self.record(i))
    }

    /// Binary search by key bytes; the BTH's records are stored key-sorted ascending.
    pub fn find(&self, key: &[u8]) -> Option<HeapTreeEntry<'a>> {
        let mut lo = 0usize;
        let mut hi = self.len();
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            let entry = self.record(mid)?;
            match entry.key.cmp(key) {
                std::cmp::Ordering::Equal => return self.record(mid),
                std::cmp::Ordering::Less => lo = mid + 1,
                std::cmp::Ordering::Greater => hi = mid,
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_tree_bytes() -> Vec<u8> {
        // Two u16-key/u32-value records, already key-sorted.
        let mut out = Vec::new();
        out.extend_from_slice(&1u16.to_le_bytes());
        out.extend_from_slice(&100u32.to_le_bytes());
        out.extend_from_slice(&5u16.to_le_bytes());
        out.extend_from_slice(&500u32.to_le_bytes());
        out
    }

    #[test]
    fn test_find_binary_search() {
        let bytes = sample_tree_bytes();
        let tree = HeapTree {
            key_size: 2,
            entry_size: 4,
            records: &bytes,
        };
        assert_eq!(tree.len(), 2);
        let found = tree.find(&5u16.to_le_bytes()).unwrap();
        assert_eq!(u32::from_le_bytes(found.value.try_into().unwrap()), 500);
        assert!(tree.find(&9u16.to_le_bytes()).is_none());
    }
}
