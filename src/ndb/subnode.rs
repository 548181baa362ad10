//! ## SubNodeBTree (C5)
//!
//! A node's auxiliary index, mapping local NIDs to nested data trees and (recursively) further
//! sub-node trees. Not every NDB node has one (`bidSub == 0` means empty).
//!
//! No single reference file isolates this wire format; it shares the intermediate-block
//! envelope used by `XBLOCK`/`XXBLOCK` (one `btype`/`cLevel` header followed by `cEnt` fixed
//! entries), per MS-PST 2.2.2.8.

use byteorder::{LittleEndian, ReadBytesExt};
use std::collections::HashMap;
use tracing::instrument;

use super::block::DataTree;
use super::block_id::BlockId;
use super::node_id::NodeId;
use super::tree::BlockBTree;
use super::{NdbError, NdbResult};
use crate::pager::{round_up_to_64, Pager};

const BLOCK_TRAILER_SIZE: usize = 16;
const SL_ENTRY_SIZE: usize = 24;
const SI_ENTRY_SIZE: usize = 16;
const HEADER_SIZE: usize = 8;

struct SlEntry {
    nid: NodeId,
    bid_data: BlockId,
    bid_sub: BlockId,
}

struct SiEntry {
    nid: NodeId,
    bid: BlockId,
}

fn read_block_raw(pager: &Pager, bbt: &BlockBTree, bid: BlockId) -> NdbResult<Vec<u8>> {
    let entry = bbt.get(bid)?;
    let total_size = round_up_to_64(u32::from(entry.size) + BLOCK_TRAILER_SIZE as u32);
    let bytes = pager
        .read_block_range(entry.block.index().value(), total_size)
        .map_err(|_| NdbError::BlockNotFound(u64::from(bid)))?;
    if bytes.len() < BLOCK_TRAILER_SIZE {
        return Err(NdbError::InvalidBlockSize(entry.size));
    }
    let data = &bytes[..usize::from(entry.size)];
    // Sub-node blocks, like other internal blocks, are never encoding-permuted.
    Ok(data.to_vec())
}

fn read_header(raw: &[u8]) -> NdbResult<(u8, u16)> {
    if raw.len() < HEADER_SIZE {
        return Err(NdbError::InvalidInternalBlockEntryCount(0));
    }
    let mut cursor = raw;
    let btype = cursor.read_u8().map_err(|_| NdbError::InvalidInternalBlockType(0))?;
    if btype != 0x02 {
        return Err(NdbError::InvalidInternalBlockType(btype));
    }
    let level = cursor.read_u8().map_err(|_| NdbError::InvalidInternalBlockLevel(0))?;
    let entry_count = cursor
        .read_u16::<LittleEndian>()
        .map_err(|_| NdbError::InvalidInternalBlockEntryCount(0))?;
    Ok((level, entry_count))
}

fn read_sl_entries(raw: &[u8], count: u16) -> NdbResult<Vec<SlEntry>> {
    let available = (raw.len() - HEADER_SIZE) / SL_ENTRY_SIZE;
    if usize::from(count) > available {
        return Err(NdbError::InvalidInternalBlockEntryCount(count));
    }
    let mut cursor = &raw[HEADER_SIZE..];
    let mut entries = Vec::with_capacity(usize::from(count));
    for _ in 0..count {
        let nid = NodeId::read(&mut cursor).map_err(|_| NdbError::InvalidInternalBlockEntryCount(count))?;
        let _padding = cursor
            .read_u32::<LittleEndian>()
            .map_err(|_| NdbError::InvalidInternalBlockEntryCount(count))?;
        let bid_data = BlockId::read(&mut cursor).map_err(|_| NdbError::InvalidInternalBlockEntryCount(count))?;
        let bid_sub = BlockId::read(&mut cursor).map_err(|_| NdbError::InvalidInternalBlockEntryCount(count))?;
        entries.push(SlEntry {
            nid,
            bid_data,
            bid_sub,
        });
    }
    Ok(entries)
}

fn read_si_entries(raw: &[u8], count: u16) -> NdbResult<Vec<SiEntry>> {
    let available = (raw.len() - HEADER_SIZE) / SI_ENTRY_SIZE;
    if usize::from(count) > available {
        return Err(NdbError::InvalidInternalBlockEntryCount(count));
    }
    let mut cursor = &raw[HEADER_SIZE..];
    let mut entries = Vec::with_capacity(usize::from(count));
    for _ in 0..count {
        let nid = NodeId::read(&mut cursor).map_err(|_| NdbError::InvalidInternalBlockEntryCount(count))?;
        let _padding = cursor
            .read_u32::<LittleEndian>()
            .map_err(|_| NdbError::InvalidInternalBlockEntryCount(count))?;
        let bid = BlockId::read(&mut cursor).map_err(|_| NdbError::InvalidInternalBlockEntryCount(count))?;
        entries.push(SiEntry { nid, bid });
    }
    Ok(entries)
}

/// One entry's resolved contents: its data tree, plus an optional nested sub-node tree.
#[derive(Clone)]
struct Entry {
    data_tree: DataTree,
    nested: Option<SubNodeBTree>,
}

/// Per-node auxiliary index: local NID -> (DataTree, optional nested SubNodeBTree).
#[derive(Clone)]
pub struct SubNodeBTree {
    entries: HashMap<u32, Entry>,
}

impl SubNodeBTree {
    /// `bid.raw == 0` means "empty": an NDB node with no sub-node tree.
    #[instrument(skip(pager, bbt), err)]
    pub fn load(pager: &Pager, bbt: &BlockBTree, bid: BlockId) -> NdbResult<Self> {
        if u64::from(bid) == 0 {
            return Ok(Self {
                entries: HashMap::new(),
            });
        }

        let raw = read_block_raw(pager, bbt, bid)?;
        let (level, count) = read_header(&raw)?;

        let sl_entries = match level {
            0 => read_sl_entries(&raw, count)?,
            1 => {
                let mut sl_entries = Vec::new();
                for si in read_si_entries(&raw, count)? {
                    let sl_raw = read_block_raw(pager, bbt, si.bid)?;
                    let (sl_level, sl_count) = read_header(&sl_raw)?;
                    if sl_level != 0 {
                        return Err(NdbError::InvalidInternalBlockLevel(sl_level));
                    }
                    sl_entries.extend(read_sl_entries(&sl_raw, sl_count)?);
                }
                sl_entries
            }
            other => return Err(NdbError::InvalidInternalBlockLevel(other)),
        };

        let mut entries = HashMap::new();
        for sl in sl_entries {
            let raw_nid = u32::from(sl.nid);
            if entries.contains_key(&raw_nid) {
                return Err(NdbError::DuplicateSubNodeId(raw_nid));
            }

            let data_entry = bbt.get(sl.bid_data)?;
            let data_tree = DataTree::load(pager, bbt, data_entry.block, data_entry.size)?;

            let nested = if u64::from(sl.bid_sub) != 0 {
                Some(SubNodeBTree::load(pager, bbt, sl.bid_sub)?)
            } else {
                None
            };

            entries.insert(raw_nid, Entry { data_tree, nested });
        }

        Ok(Self { entries })
    }

    /// `get_data_tree(nid) -> DataTree*`: recursive search through nested sub-trees.
    pub fn get_data_tree(&self, nid: NodeId) -> NdbResult<&DataTree> {
        let raw_nid = u32::from(nid);
        if let Some(entry) = self.entries.get(&raw_nid) {
            return Ok(&entry.data_tree);
        }
        for entry in self.entries.values() {
            if let Some(nested) = &entry.nested {
                if let Ok(found) = nested.get_data_tree(nid) {
                    return Ok(found);
                }
            }
        }
        Err(NdbError::NodeNotFound(raw_nid))
    }

    /// `get_nested(nid) -> SubNodeBTree*`: surface a child sub-tree addressable by `nid`.
    pub fn get_nested(&self, nid: NodeId) -> Option<&SubNodeBTree> {
        self.entries.get(&u32::from(nid))?.nested.as_ref()
    }
}
