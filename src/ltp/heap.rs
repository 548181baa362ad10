//! ## [HN (Heap-on-Node)](https://learn.microsoft.com/en-us/openspecs/office_file_formats/ms-pst/77ce49a3-3772-4d8d-bb2c-2f7520a238a6)
//!
//! A per-node byte allocator layered over a [`DataTree`]. Every allocation is addressed by a
//! [`HeapId`] (HID): `(alloc index, block index)` within the node's data blocks.

use byteorder::{LittleEndian, ReadBytesExt};
use std::io::{self, Cursor, Read, Seek, SeekFrom};

use super::LtpError;
use crate::ndb::block::DataTree;
use crate::ndb::node_id::{NodeId, NodeIdType};

const HEAP_INDEX_MASK: u32 = 0x7FF;

/// [HID](https://learn.microsoft.com/en-us/openspecs/office_file_formats/ms-pst/85b9e985-ea53-447f-b70c-eb82bfbdcbc9):
/// an allocation within a heap, distinguished from a plain NID by `NodeIdType::HeapNode`.
#[derive(Clone, Copy, Default, Debug, PartialEq, Eq)]
pub struct HeapId(NodeId);

impl HeapId {
    pub fn new(alloc_index: u16, block_index: u16) -> Result<Self, LtpError> {
        if alloc_index == 0 {
            return Err(LtpError::InvalidHeapIndex(alloc_index));
        }
        let node_index = (u32::from(block_index) << 11) | u32::from(alloc_index);
        Ok(Self(NodeId::new(NodeIdType::HeapNode, node_index).map_err(LtpError::Ndb)?))
    }

    /// Zero-based allocation index within the owning block's page map.
    pub fn alloc_index(&self) -> Result<u16, LtpError> {
        let packed = (self.0.index() & HEAP_INDEX_MASK) as u16;
        if packed == 0 {
            return Err(LtpError::InvalidHeapIndex(packed));
        }
        Ok(packed - 1)
    }

    pub fn block_index(&self) -> u16 {
        (self.0.index() >> 11) as u16
    }

    pub fn is_zero(&self) -> bool {
        u32::from(self.0) == 0
    }

    pub(crate) fn read(f: &mut dyn Read) -> io::Result<Self> {
        let value = NodeId::read(f)?;
        let id_type = value.id_type().map_err(LtpError::Ndb)?;
        if id_type != NodeIdType::HeapNode {
            return Err(LtpError::InvalidHeapNodeTypeSignature(id_type as u8).into());
        }
        Ok(Self(value))
    }
}

impl From<u32> for HeapId {
    fn from(value: u32) -> Self {
        Self(NodeId::from(value))
    }
}

impl From<HeapId> for u32 {
    fn from(value: HeapId) -> Self {
        u32::from(value.0)
    }
}

/// `bClientSig`: identifies what kind of structure is rooted at `hidUserRoot`.
#[repr(u8)]
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum HeapNodeType {
    Reserved1 = 0x6C,
    Table = 0x7C,
    Reserved2 = 0x8C,
    Reserved3 = 0x9C,
    Reserved4 = 0xA5,
    Reserved5 = 0xAC,
    Tree = 0xB5,
    Properties = 0xBC,
    Reserved6 = 0xCC,
}

impl TryFrom<u8> for HeapNodeType {
    type Error = LtpError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x6C => Ok(Self::Reserved1),
            0x7C => Ok(Self::Table),
            0x8C => Ok(Self::Reserved2),
            0x9C => Ok(Self::Reserved3),
            0xA5 => Ok(Self::Reserved4),
            0xAC => Ok(Self::Reserved5),
            0xB5 => Ok(Self::Tree),
            0xBC => Ok(Self::Properties),
            0xCC => Ok(Self::Reserved6),
            invalid => Err(LtpError::InvalidHeapNodeTypeSignature(invalid)),
        }
    }
}

/// [HNHDR](https://learn.microsoft.com/en-us/openspecs/office_file_formats/ms-pst/8e4ae05c-3c24-4103-b7e5-ffef6f244834):
/// present once, at the start of block 0.
#[derive(Clone, Copy, Debug)]
pub struct HeapNodeHeader {
    client_signature: HeapNodeType,
    user_root: HeapId,
}

impl HeapNodeHeader {
    pub fn user_root(&self) -> HeapId {
        self.user_root
    }

    pub fn client_signature(&self) -> HeapNodeType {
        self.client_signature
    }

    fn read(f: &mut dyn Read) -> io::Result<Self> {
        let _page_map_offset = f.read_u16::<LittleEndian>()?;
        let signature = f.read_u8()?;
        if signature != 0xEC {
            return Err(LtpError::InvalidHeapNodeSignature(signature).into());
        }
        let client_signature = HeapNodeType::try_from(f.read_u8()?)?;
        let user_root = HeapId::read(f)?;
        let _fill_levels = f.read_u32::<LittleEndian>()?;

        Ok(Self {
            client_signature,
            user_root,
        })
    }
}

/// `HNPAGEMAP`: the allocation table at the tail of every HN block. `offsets[i]..offsets[i+1]`
/// is the byte range of allocation `i`; the map is monotonically increasing.
struct PageMap {
    offsets: Vec<u16>,
}

impl PageMap {
    fn read(f: &mut dyn Read) -> io::Result<Self> {
        let alloc_count = f.read_u16::<LittleEndian>()?;
        let _free_count = f.read_u16::<LittleEndian>()?;
        let mut offsets = Vec::with_capacity(usize::from(alloc_count) + 1);
        for _ in 0..=alloc_count {
            offsets.push(f.read_u16::<LittleEndian>()?);
        }
        Ok(Self { offsets })
    }

    fn range(&self, alloc_index: u16) -> Result<(usize, usize), LtpError> {
        let i = usize::from(alloc_index);
        if i + 1 >= self.offsets.len() {
            return Err(LtpError::HeapAllocIndexNotFound(alloc_index));
        }
        Ok((usize::from(self.offsets[i]), usize::from(self.offsets[i + 1])))
    }
}

/// Offset of `HNPAGEMAP`: `HNHDR`, `HNBITMAPHDR` and `HNPAGEHDR` all lead with the same
/// two-byte `ibHnpm` field, so which header variant is present doesn't matter here.
fn page_map_offset(block: &[u8]) -> io::Result<u16> {
    let mut cursor = block;
    Ok(cursor.read_u16::<LittleEndian>()?)
}

/// One node's heap allocator, backed by its (already block-decoded) [`DataTree`].
pub struct HeapOnNode<'a> {
    tree: &'a DataTree,
}

impl<'a> HeapOnNode<'a> {
    pub fn new(tree: &'a DataTree) -> Self {
        Self { tree }
    }

    fn block_bytes(&self, block_index: u16) -> Result<&'a [u8], LtpError> {
        self.tree
            .block(usize::from(block_index))
            .map(|b| b.bytes())
            .ok_or(LtpError::HeapBlockIndexNotFound(block_index))
    }

    pub fn header(&self) -> Result<HeapNodeHeader, LtpError> {
        let block = self.block_bytes(0)?;
        Ok(HeapNodeHeader::read(&mut Cursor::new(block)).map_err(downcast_ltp)?)
    }

    /// Resolve a [`HeapId`] to its allocated byte range.
    pub fn entry(&self, heap_id: HeapId) -> Result<&'a [u8], LtpError> {
        let block_index = heap_id.block_index();
        let alloc_index = heap_id.alloc_index()?;
        let block = self.block_bytes(block_index)?;

        let offset = page_map_offset(block).map_err(downcast_ltp)?;

        let mut cursor = Cursor::new(block);
        cursor.seek(SeekFrom::Start(u64::from(offset))).map_err(downcast_ltp)?;
        let page_map = PageMap::read(&mut cursor).map_err(downcast_ltp)?;
        let (start, end) = page_map.range(alloc_index)?;

        block
            .get(start..end)
            .ok_or(LtpError::HeapAllocIndexNotFound(alloc_index))
    }
}

fn downcast_ltp(err: io::Error) -> LtpError {
    err.into_inner()
        .and_then(|inner| inner.downcast::<LtpError>().ok())
        .map(|boxed| *boxed)
        .unwrap_or(LtpError::InvalidHeapNodeSignature(0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_heap_id_round_trip() {
        let id = HeapId::new(3, 2).unwrap();
        assert_eq!(id.alloc_index().unwrap(), 2);
        assert_eq!(id.block_index(), 2);
    }

    #[test]
    fn test_heap_id_zero_index_rejected() {
        assert!(HeapId::new(0, 0).is_err());
    }
}
