//! ## DataTree (C4)
//!
//! Resolves a leaf `BBTEntry` into an ordered sequence of decoded `DataBlock`s, transparently
//! expanding at most two levels of `XBLOCK`/`XXBLOCK` indirection.

use byteorder::{LittleEndian, ReadBytesExt};
use tracing::instrument;

use super::block_id::BlockId;
use super::block_ref::BlockRef;
use super::tree::BlockBTree;
use super::{NdbError, NdbResult};
use crate::encode::decode_block;
use crate::pager::{round_up_to_64, Pager};

const BLOCK_TRAILER_SIZE: usize = 16;
pub const MAX_DATA_BLOCK_SIZE: usize = 8176;
pub const INTERMEDIATE_BLOCK_PAYLOAD: usize = 8176;

/// Read and validate one block's trailer, returning its decoded payload (for a data block) or
/// raw payload (for an internal XBLOCK/XXBLOCK/SLBLOCK/SIBLOCK, whose bytes are never crypted).
fn read_block_raw(pager: &Pager, bref: BlockRef, cb: u16) -> NdbResult<Vec<u8>> {
    let total_size = round_up_to_64(u32::from(cb) + BLOCK_TRAILER_SIZE as u32);
    let bytes = pager
        .read_block_range(bref.index().value(), total_size)
        .map_err(|_| NdbError::BlockNotFound(u64::from(bref.block())))?;

    if bytes.len() < BLOCK_TRAILER_SIZE {
        return Err(NdbError::InvalidBlockSize(cb));
    }
    let trailer_offset = bytes.len() - BLOCK_TRAILER_SIZE;
    let (payload_region, trailer_bytes) = bytes.split_at(trailer_offset);

    let size_err = || NdbError::InvalidBlockSize(cb);
    let mut trailer_cursor = trailer_bytes;
    let trailer_cb = trailer_cursor
        .read_u16::<LittleEndian>()
        .map_err(|_| size_err())?;
    let _signature = trailer_cursor
        .read_u16::<LittleEndian>()
        .map_err(|_| size_err())?;
    let crc = trailer_cursor
        .read_u32::<LittleEndian>()
        .map_err(|_| size_err())?;
    let trailer_bid = BlockId::read(&mut trailer_cursor).map_err(|_| size_err())?;

    if trailer_cb != cb {
        return Err(NdbError::InvalidBlockSize(trailer_cb));
    }
    if trailer_bid != bref.block() {
        return Err(NdbError::InvalidBlockTrailerId(
            u64::from(bref.block()),
            u64::from(trailer_bid),
        ));
    }

    let data = &payload_region[..usize::from(cb)];
    // CRC is computed over the raw, still-encoded on-disk bytes, never the decoded payload.
    let computed = crate::crc::compute_crc(0, data);
    if computed != crc {
        return Err(NdbError::InvalidBlockCrc(crc, computed));
    }

    Ok(data.to_vec())
}

/// One decoded payload chunk of a node's main data stream.
#[derive(Clone, Debug)]
pub struct DataBlock {
    bytes: Vec<u8>,
    size_on_disk: u32,
}

impl DataBlock {
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn size_on_disk(&self) -> u32 {
        self.size_on_disk
    }
}

/// Lazily-materialized view of one node's main payload.
#[derive(Clone)]
pub struct DataTree {
    blocks: Vec<DataBlock>,
}

impl DataTree {
    /// Build from `(first_bref, first_cb)`, taken from a `BBTEntry`, expanding XBLOCK/XXBLOCK
    /// indirection eagerly (the tree itself is small and cheap relative to payload bytes; what
    /// stays lazy at the caller's level is *whether* a DataTree is built at all).
    #[instrument(skip(pager), err)]
    pub fn load(pager: &Pager, bbt: &BlockBTree, first_bref: BlockRef, first_cb: u16) -> NdbResult<Self> {
        let mut blocks = Vec::new();

        if !first_bref.block().is_internal() {
            let mut bytes = read_block_raw(pager, first_bref, first_cb)?;
            decode_block(&mut bytes);
            let size_on_disk = round_up_to_64(u32::from(first_cb) + BLOCK_TRAILER_SIZE as u32);
            blocks.push(DataBlock { bytes, size_on_disk });
            return Ok(Self { blocks });
        }

        let raw = read_block_raw(pager, first_bref, first_cb)?;
        let children = parse_intermediate(&raw)?;

        match children.level {
            1 => {
                for child_bid in children.entries {
                    push_data_block(pager, bbt, child_bid, &mut blocks)?;
                }
            }
            2 => {
                for xblock_bid in children.entries {
                    let xblock_entry = bbt.get(xblock_bid)?;
                    let xraw = read_block_raw(pager, xblock_entry.block, xblock_entry.size)?;
                    let grandchildren = parse_intermediate(&xraw)?;
                    if grandchildren.level != 1 {
                        return Err(NdbError::InvalidInternalBlockLevel(grandchildren.level));
                    }
                    for child_bid in grandchildren.entries {
                        push_data_block(pager, bbt, child_bid, &mut blocks)?;
                    }
                }
            }
            other => return Err(NdbError::InvalidInternalBlockLevel(other)),
        }

        Ok(Self { blocks })
    }

    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    pub fn block(&self, index: usize) -> Option<&DataBlock> {
        self.blocks.get(index)
    }

    pub fn size_of(&self, index: usize) -> Option<usize> {
        self.blocks.get(index).map(|b| b.bytes.len())
    }

    pub fn iter(&self) -> impl Iterator<Item = &DataBlock> {
        self.blocks.iter()
    }

    /// The source of truth for variable-length property payloads.
    pub fn concat_all(&self) -> Vec<u8> {
        let mut out = Vec::new();
        for block in &self.blocks {
            out.extend_from_slice(&block.bytes);
        }
        out
    }
}

fn push_data_block(
    pager: &Pager,
    bbt: &BlockBTree,
    bid: BlockId,
    out: &mut Vec<DataBlock>,
) -> NdbResult<()> {
    let entry = bbt.get(bid)?;
    let mut bytes = read_block_raw(pager, entry.block, entry.size)?;
    decode_block(&mut bytes);
    let size_on_disk = round_up_to_64(u32::from(entry.size) + BLOCK_TRAILER_SIZE as u32);
    out.push(DataBlock { bytes, size_on_disk });
    Ok(())
}

/// A parsed intermediate block (XBLOCK, XXBLOCK, or the SubNodeBTree's SIBLOCK/SLBLOCK
/// envelope, which shares this layout): one leading `btype` byte, one `cLevel` byte, `cEnt`
/// fixed-width child entries.
pub(crate) struct IntermediateBlock {
    pub level: u8,
    pub entries: Vec<BlockId>,
}

pub(crate) const DATA_TREE_HEADER_SIZE: usize = 8;
pub(crate) const DATA_TREE_ENTRY_SIZE: usize = 8;

fn parse_intermediate(raw: &[u8]) -> NdbResult<IntermediateBlock> {
    if raw.len() < DATA_TREE_HEADER_SIZE {
        return Err(NdbError::InvalidInternalBlockEntryCount(0));
    }
    let count_err = || NdbError::InvalidInternalBlockEntryCount(0);
    let mut cursor = raw;
    let btype = cursor.read_u8().map_err(|_| count_err())?;
    if btype != 0x01 {
        return Err(NdbError::InvalidInternalBlockType(btype));
    }
    let level = cursor.read_u8().map_err(|_| count_err())?;
    if level != 1 && level != 2 {
        return Err(NdbError::InvalidInternalBlockLevel(level));
    }
    let entry_count = cursor.read_u16::<LittleEndian>().map_err(|_| count_err())?;
    let _lcb_total = cursor.read_u32::<LittleEndian>().map_err(|_| count_err())?;

    let available = (raw.len() - DATA_TREE_HEADER_SIZE) / DATA_TREE_ENTRY_SIZE;
    if usize::from(entry_count) > available {
        return Err(NdbError::InvalidInternalBlockEntryCount(entry_count));
    }

    let mut entries = Vec::with_capacity(usize::from(entry_count));
    for _ in 0..entry_count {
        entries.push(BlockId::read(&mut cursor).map_err(|_| count_err())?);
    }

    Ok(IntermediateBlock { level, entries })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_intermediate_rejects_bad_type() {
        let raw = [0x02, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00];
        let err = parse_intermediate(&raw).unwrap_err();
        assert!(matches!(err, NdbError::InvalidInternalBlockType(0x02)));
    }

    #[test]
    fn test_parse_intermediate_xblock() {
        let mut raw = vec![0x01, 0x01, 0x02, 0x00, 0x00, 0x00, 0x00, 0x00];
        raw.extend_from_slice(&4_u64.to_le_bytes());
        raw.extend_from_slice(&8_u64.to_le_bytes());
        let parsed = parse_intermediate(&raw).unwrap();
        assert_eq!(parsed.level, 1);
        assert_eq!(parsed.entries.len(), 2);
    }
}
