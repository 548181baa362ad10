//! ## [Pages](https://learn.microsoft.com/en-us/openspecs/office_file_formats/ms-pst/fa24d5fc-c427-4888-8cab-b806c6a8e00a)
//!
//! Fixed 512-byte pages, their trailers, and the two B-tree page layouts (`BTPage`) built on
//! top of them: the Node B-Tree (NBT) and Block B-Tree (BBT).

use byteorder::{LittleEndian, ReadBytesExt};
use std::io::{self, Read};
use tracing::instrument;

use super::block_id::BlockId;
use super::block_ref::BlockRef;
use super::byte_index::ByteIndex;
use super::node_id::NodeId;
use super::NdbError;
use crate::block_sig::compute_sig;
use crate::crc::compute_crc;

pub const PAGE_SIZE: usize = 512;
const PAGE_TRAILER_SIZE: usize = 16;

/// `ptype`: the kind of page, recorded (twice) in its trailer.
#[repr(u8)]
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum PageType {
    BlockBTree = 0x80,
    NodeBTree = 0x81,
    FreeMap = 0x82,
    AllocationPageMap = 0x83,
    AllocationMap = 0x84,
    FreePageMap = 0x85,
    DensityList = 0x86,
}

impl TryFrom<u8> for PageType {
    type Error = NdbError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x80 => Ok(Self::BlockBTree),
            0x81 => Ok(Self::NodeBTree),
            0x82 => Ok(Self::FreeMap),
            0x83 => Ok(Self::AllocationPageMap),
            0x84 => Ok(Self::AllocationMap),
            0x85 => Ok(Self::FreePageMap),
            0x86 => Ok(Self::DensityList),
            invalid => Err(NdbError::InvalidPageType(invalid)),
        }
    }
}

/// The 16-byte trailer present at the end of every 512-byte page.
#[derive(Copy, Clone, Debug)]
pub struct PageTrailer {
    page_type: PageType,
    signature: u16,
    crc: u32,
    block_id: BlockId,
}

impl PageTrailer {
    pub fn page_type(&self) -> PageType {
        self.page_type
    }

    pub fn block_id(&self) -> BlockId {
        self.block_id
    }

    fn read(f: &mut dyn Read) -> io::Result<Self> {
        let page_type = f.read_u8()?;
        let page_type_repeat = f.read_u8()?;
        if page_type != page_type_repeat {
            return Err(NdbError::MismatchPageTypeRepeat(page_type, page_type_repeat).into());
        }
        let page_type = PageType::try_from(page_type)?;
        let signature = f.read_u16::<LittleEndian>()?;
        let crc = f.read_u32::<LittleEndian>()?;
        let block_id = BlockId::read(f)?;

        Ok(Self {
            page_type,
            signature,
            crc,
            block_id,
        })
    }

    /// Validate the trailer's signature and CRC against the raw page bytes (`data` excludes
    /// the trailer itself) and the page's absolute file offset.
    fn verify(&self, offset: ByteIndex, data: &[u8]) -> Result<(), NdbError> {
        if matches!(
            self.page_type,
            PageType::BlockBTree | PageType::NodeBTree | PageType::DensityList
        ) {
            let expected = compute_sig(offset.value() as u32, u64::from(self.block_id) as u32);
            if expected != self.signature {
                return Err(NdbError::InvalidPageSignature(expected, self.signature));
            }
        }

        let crc = compute_crc(0, data);
        if crc != self.crc {
            return Err(NdbError::InvalidPageCrc(self.crc, crc));
        }

        Ok(())
    }
}

/// One interior `BTEntry`: `(key, bref-to-child)`.
#[derive(Copy, Clone, Debug)]
pub struct BTreeEntry {
    pub key: u64,
    pub child: BlockRef,
}

/// `NBTEntry`: a leaf of the Node B-Tree.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct NbtEntry {
    pub node: NodeId,
    pub data: BlockId,
    pub sub_node: Option<BlockId>,
    pub parent: Option<NodeId>,
}

impl NbtEntry {
    const ENTRY_SIZE: usize = 32;

    fn read(f: &mut dyn Read) -> io::Result<Self> {
        let node = f.read_u64::<LittleEndian>()?;
        let node = u32::try_from(node)
            .map_err(|_| NdbError::InvalidNodeBTreeEntryNodeId(node))?;
        let node = NodeId::from(node);

        let data = BlockId::read(f)?;

        let sub_node = BlockId::read(f)?;
        let sub_node = (u64::from(sub_node) != 0).then_some(sub_node);

        let parent = NodeId::read(f)?;
        let parent = (u32::from(parent) != 0).then_some(parent);

        let _padding = f.read_u32::<LittleEndian>()?;

        Ok(Self {
            node,
            data,
            sub_node,
            parent,
        })
    }
}

/// `BBTEntry`: a leaf of the Block B-Tree.
#[derive(Copy, Clone, Debug)]
pub struct BbtEntry {
    pub block: BlockRef,
    pub size: u16,
    pub ref_count: u16,
}

impl BbtEntry {
    const ENTRY_SIZE: usize = 24;

    fn read(f: &mut dyn Read) -> io::Result<Self> {
        let block = BlockRef::read(f)?;
        let size = f.read_u16::<LittleEndian>()?;
        let ref_count = f.read_u16::<LittleEndian>()?;
        let _padding = f.read_u32::<LittleEndian>()?;

        Ok(Self {
            block,
            size,
            ref_count,
        })
    }
}

/// A parsed `BTPage`: either an interior page of `BTreeEntry`s or a leaf page of `NbtEntry`s /
/// `BbtEntry`s, depending on `ptype` and `level`.
pub enum BTreePage {
    Interior {
        level: u8,
        entries: Vec<BTreeEntry>,
    },
    NodeLeaf(Vec<NbtEntry>),
    BlockLeaf(Vec<BbtEntry>),
}

impl BTreePage {
    /// Read and fully validate a B-tree page at `offset`.
    #[instrument(skip(bytes), err)]
    pub fn read(offset: ByteIndex, bytes: &[u8; PAGE_SIZE]) -> Result<(Self, PageTrailer), NdbError> {
        let data = &bytes[..PAGE_SIZE - PAGE_TRAILER_SIZE];
        let trailer = {
            let mut cursor = &bytes[PAGE_SIZE - PAGE_TRAILER_SIZE..];
            PageTrailer::read(&mut cursor).map_err(io_to_ndb)?
        };
        trailer.verify(offset, data)?;

        let count = data[488] as usize;
        let max_count = data[489] as usize;
        let entry_size = data[490];
        let level = data[491];

        if count > max_count {
            return Err(NdbError::InvalidBTreeEntryCount(count));
        }

        let padding = u32::from_le_bytes(data[492..496].try_into().unwrap());
        if padding != 0 {
            return Err(NdbError::InvalidBTreePagePadding(padding));
        }

        let entries_region = &data[..488];

        let page = if level == 0 {
            match trailer.page_type {
                PageType::NodeBTree => {
                    if usize::from(entry_size) != NbtEntry::ENTRY_SIZE {
                        return Err(NdbError::InvalidBTreeEntrySize(entry_size));
                    }
                    let mut entries = Vec::with_capacity(count);
                    for i in 0..count {
                        let start = i * NbtEntry::ENTRY_SIZE;
                        let mut slice = &entries_region[start..start + NbtEntry::ENTRY_SIZE];
                        entries.push(NbtEntry::read(&mut slice).map_err(io_to_ndb)?);
                    }
                    BTreePage::NodeLeaf(entries)
                }
                PageType::BlockBTree => {
                    if usize::from(entry_size) != BbtEntry::ENTRY_SIZE {
                        return Err(NdbError::InvalidBTreeEntrySize(entry_size));
                    }
                    let mut entries = Vec::with_capacity(count);
                    for i in 0..count {
                        let start = i * BbtEntry::ENTRY_SIZE;
                        let mut slice = &entries_region[start..start + BbtEntry::ENTRY_SIZE];
                        entries.push(BbtEntry::read(&mut slice).map_err(io_to_ndb)?);
                    }
                    BTreePage::BlockLeaf(entries)
                }
                other => return Err(NdbError::UnexpectedPageType(other)),
            }
        } else {
            const ENTRY_SIZE: usize = 24;
            if usize::from(entry_size) != ENTRY_SIZE {
                return Err(NdbError::InvalidBTreeEntrySize(entry_size));
            }
            let mut entries = Vec::with_capacity(count);
            for i in 0..count {
                let start = i * ENTRY_SIZE;
                let mut slice = &entries_region[start..start + ENTRY_SIZE];
                let key = slice.read_u64::<LittleEndian>().map_err(io_to_ndb)?;
                let child = BlockRef::read(&mut slice).map_err(io_to_ndb)?;
                entries.push(BTreeEntry { key, child });
            }
            BTreePage::Interior { level, entries }
        };

        Ok((page, trailer))
    }
}

fn io_to_ndb(err: io::Error) -> NdbError {
    err.into_inner()
        .and_then(|inner| inner.downcast::<NdbError>().ok())
        .map(|boxed| *boxed)
        .unwrap_or(NdbError::InvalidBlockSize(0))
}
