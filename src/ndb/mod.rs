//! ## [Node Database (NDB) Layer](https://learn.microsoft.com/en-us/openspecs/office_file_formats/ms-pst/3bf5a591-aa16-4c60-973b-a26a90a37a06)
//!
//! The header, the two file-wide B-trees (node and block), the data tree and sub-node tree
//! built on top of them, and the primitives (NID/BID/BREF, block signature) they all share.

pub mod block;
pub mod block_id;
pub mod block_ref;
pub mod byte_index;
pub mod node_id;
pub mod page;
pub mod subnode;
pub mod tree;

use byteorder::{BigEndian, LittleEndian, ReadBytesExt};
use std::io::{self, Cursor, Read};
use thiserror::Error;
use tracing::instrument;

pub use block_id::BlockId;
pub use block_ref::BlockRef;
pub use byte_index::ByteIndex;
pub use node_id::NodeId;

use crate::crc::compute_crc;

/// Everything that can go wrong while parsing the NDB layer. One variant per distinct
/// wire-format violation, each carrying the offending raw value for diagnosis.
#[derive(Error, Debug)]
pub enum NdbError {
    #[error("invalid NID type: {0:#04x}")]
    InvalidNodeIdType(u8),
    #[error("invalid NID index: {0:#010x}")]
    InvalidNodeIndex(u32),
    #[error("invalid header magic: {0:#010x}")]
    InvalidHeaderMagic(u32),
    #[error("invalid header client magic: {0:#06x}")]
    InvalidHeaderMagicClient(u16),
    #[error("unsupported PST version: {0}")]
    UnsupportedVersion(u16),
    #[error("invalid header partial CRC: {0:#010x}")]
    InvalidHeaderPartialCrc(u32),
    #[error("invalid header full CRC: {0:#010x}")]
    InvalidHeaderFullCrc(u32),
    #[error("invalid header client version: {0}")]
    InvalidHeaderClientVersion(u16),
    #[error("invalid header platform value: create={0:#04x} access={1:#04x}")]
    InvalidHeaderPlatform(u8, u8),
    #[error("invalid header sentinel byte: {0:#04x}")]
    InvalidHeaderSentinel(u8),
    #[error("invalid NID default index for type {0:#04x}: {1:#010x}")]
    InvalidNidDefaultIndex(u8, u32),
    #[error("unsupported crypt method: {0:?}")]
    UnsupportedCryptMethod(NdbCryptMethod),
    #[error("invalid crypt method discriminant: {0:#04x}")]
    InvalidCryptMethod(u8),
    #[error("mismatched page type repeat: {0:#04x} != {1:#04x}")]
    MismatchPageTypeRepeat(u8, u8),
    #[error("invalid page type: {0:#04x}")]
    InvalidPageType(u8),
    #[error("unexpected page type: {0:?}")]
    UnexpectedPageType(page::PageType),
    #[error("invalid page signature: expected {0:#06x}, found {1:#06x}")]
    InvalidPageSignature(u16, u16),
    #[error("invalid page CRC: expected {0:#010x}, found {1:#010x}")]
    InvalidPageCrc(u32, u32),
    #[error("invalid B-tree page level: {0}")]
    InvalidBTreePageLevel(u8),
    #[error("invalid B-tree entry count: {0}")]
    InvalidBTreeEntryCount(usize),
    #[error("invalid B-tree entry size: {0}")]
    InvalidBTreeEntrySize(u8),
    #[error("B-tree level mismatch: parent level {0}, child level {1}")]
    InvalidBTreeLevelMismatch(u8, u8),
    #[error("invalid B-tree page padding: {0:#010x}")]
    InvalidBTreePagePadding(u32),
    #[error("invalid node B-tree entry NID: {0:#018x}")]
    InvalidNodeBTreeEntryNodeId(u64),
    #[error("duplicate well-known NID: {0:#010x}")]
    DuplicateWellKnownNid(u32),
    #[error("missing well-known NID: {0:#010x}")]
    MissingWellKnownNid(u32),
    #[error("NID not found: {0:#010x}")]
    NodeNotFound(u32),
    #[error("BID not found: {0:#018x}")]
    BlockNotFound(u64),
    #[error("invalid block size: {0}")]
    InvalidBlockSize(u16),
    #[error("invalid block CRC: expected {0:#010x}, found {1:#010x}")]
    InvalidBlockCrc(u32, u32),
    #[error("invalid block trailer id: expected {0:#018x}, found {1:#018x}")]
    InvalidBlockTrailerId(u64, u64),
    #[error("invalid internal block type byte: {0:#04x}")]
    InvalidInternalBlockType(u8),
    #[error("invalid internal block level: {0}")]
    InvalidInternalBlockLevel(u8),
    #[error("invalid internal block entry count: {0}")]
    InvalidInternalBlockEntryCount(u16),
    #[error("sub-node local NID not unique: {0:#010x}")]
    DuplicateSubNodeId(u32),
}

pub type NdbResult<T> = Result<T, NdbError>;

impl From<NdbError> for io::Error {
    fn from(value: NdbError) -> Self {
        io::Error::new(io::ErrorKind::InvalidData, value)
    }
}

const HEADER_MAGIC: u32 = u32::from_be_bytes(*b"!BDN");
const HEADER_MAGIC_CLIENT: u16 = u16::from_be_bytes(*b"SM");
const NDB_CLIENT_VERSION: u16 = 19;
const NDB_PLATFORM_CREATE: u8 = 0x01;
const NDB_PLATFORM_ACCESS: u8 = 0x01;
const NDB_SENTINEL: u8 = 0x80;
const NDB_VERSION_UNICODE: u16 = 23;

/// Minimum valid index, by [`node_id::NodeIdType`] discriminant, for the 32 NID slots recorded
/// in the header (`rgnid`). Folder, search, message and assoc-message NIDs must start beyond the
/// reserved well-known range.
const NDB_DEFAULT_NID_INDEX: u32 = 0x0400;
const NDB_SEARCH_NID_INDEX: u32 = 0x4000;
const NDB_ASSOC_MESSAGE_NID_INDEX: u32 = 0x8000;
const NDB_NORMAL_MESSAGE_NID_INDEX: u32 = 0x1_0000;

fn minimum_index_for_slot(slot_type: u8) -> u32 {
    use node_id::NodeIdType;
    if slot_type == NodeIdType::SearchFolder as u8 {
        NDB_SEARCH_NID_INDEX
    } else if slot_type == NodeIdType::NormalMessage as u8 {
        NDB_NORMAL_MESSAGE_NID_INDEX
    } else if slot_type == NodeIdType::AssociatedMessage as u8 {
        NDB_ASSOC_MESSAGE_NID_INDEX
    } else {
        NDB_DEFAULT_NID_INDEX
    }
}

/// `bCryptMethod`: the payload encoding used for data blocks.
#[repr(u8)]
#[derive(Copy, Clone, PartialEq, Eq, Default, Debug)]
pub enum NdbCryptMethod {
    #[default]
    None = 0x00,
    Permute = 0x01,
    Cyclic = 0x02,
}

impl TryFrom<u8> for NdbCryptMethod {
    type Error = NdbError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x00 => Ok(Self::None),
            0x01 => Ok(Self::Permute),
            0x02 => Ok(Self::Cyclic),
            invalid => Err(NdbError::InvalidCryptMethod(invalid)),
        }
    }
}

/// The 72-byte `ROOT` substructure embedded in the header: file size plus the two B-tree roots.
#[derive(Copy, Clone, Debug)]
pub struct Root {
    file_eof: ByteIndex,
    #[allow(dead_code)]
    amap_last: ByteIndex,
    #[allow(dead_code)]
    amap_free: u64,
    #[allow(dead_code)]
    pmap_free: u64,
    bref_nbt: BlockRef,
    bref_bbt: BlockRef,
}

impl Root {
    pub fn file_eof(&self) -> ByteIndex {
        self.file_eof
    }

    pub fn bref_nbt(&self) -> BlockRef {
        self.bref_nbt
    }

    pub fn bref_bbt(&self) -> BlockRef {
        self.bref_bbt
    }

    fn read(f: &mut dyn Read) -> io::Result<Self> {
        let _reserved = f.read_u32::<LittleEndian>()?;
        let file_eof = ByteIndex::read(f)?;
        let amap_last = ByteIndex::read(f)?;
        let amap_free = f.read_u64::<LittleEndian>()?;
        let pmap_free = f.read_u64::<LittleEndian>()?;
        let bref_nbt = BlockRef::read(f)?;
        let bref_bbt = BlockRef::read(f)?;
        let _f_amap_valid = f.read_u8()?;
        let _b_ar_vec_1 = f.read_u8()?;
        let _c_ar_vec_1 = f.read_u16::<LittleEndian>()?;

        Ok(Self {
            file_eof,
            amap_last,
            amap_free,
            pmap_free,
            bref_nbt,
            bref_bbt,
        })
    }
}

/// The 564-byte file header.
#[derive(Debug)]
pub struct Header {
    #[allow(dead_code)]
    version: u16,
    crypt_method: NdbCryptMethod,
    root: Root,
}

impl Header {
    pub fn root(&self) -> &Root {
        &self.root
    }

    pub fn crypt_method(&self) -> NdbCryptMethod {
        self.crypt_method
    }

    /// Parse and fully validate the 564-byte header, per MS-PST 2.2.2.6.
    #[instrument(skip(f), err)]
    pub fn read(f: &mut dyn Read) -> io::Result<Self> {
        let magic = f.read_u32::<BigEndian>()?;
        if magic != HEADER_MAGIC {
            return Err(NdbError::InvalidHeaderMagic(magic).into());
        }

        let crc_partial = f.read_u32::<LittleEndian>()?;

        // The partial CRC covers the next 471 bytes; the full CRC covers the next 516. Both
        // spans are read into one buffer so the two checks can run before any field is trusted.
        let mut buffer = [0_u8; 516];
        f.read_exact(&mut buffer[..471])?;
        if crc_partial != compute_crc(0, &buffer[..471]) {
            return Err(NdbError::InvalidHeaderPartialCrc(crc_partial).into());
        }

        {
            let mut cursor = Cursor::new(&buffer[..471]);
            let magic_client = cursor.read_u16::<BigEndian>()?;
            if magic_client != HEADER_MAGIC_CLIENT {
                return Err(NdbError::InvalidHeaderMagicClient(magic_client).into());
            }
            let version = cursor.read_u16::<LittleEndian>()?;
            if version != NDB_VERSION_UNICODE {
                return Err(NdbError::UnsupportedVersion(version).into());
            }
        }

        f.read_exact(&mut buffer[471..])?;
        let crc_full = f.read_u32::<LittleEndian>()?;
        if crc_full != compute_crc(0, &buffer) {
            return Err(NdbError::InvalidHeaderFullCrc(crc_full).into());
        }

        let mut cursor = Cursor::new(&buffer[..]);
        let _magic_client = cursor.read_u16::<BigEndian>()?;
        let version = cursor.read_u16::<LittleEndian>()?;
        let version_client = cursor.read_u16::<LittleEndian>()?;
        if version_client != NDB_CLIENT_VERSION {
            return Err(NdbError::InvalidHeaderClientVersion(version_client).into());
        }
        let platform_create = cursor.read_u8()?;
        let platform_access = cursor.read_u8()?;
        if platform_create != NDB_PLATFORM_CREATE || platform_access != NDB_PLATFORM_ACCESS {
            return Err(
                NdbError::InvalidHeaderPlatform(platform_create, platform_access).into(),
            );
        }
        let _reserved1 = cursor.read_u32::<LittleEndian>()?;
        let _reserved2 = cursor.read_u32::<LittleEndian>()?;
        let _bid_unused = cursor.read_u64::<LittleEndian>()?;
        let _bid_next_p = cursor.read_u64::<LittleEndian>()?;
        let _unique = cursor.read_u32::<LittleEndian>()?;

        for slot in 0..32_u8 {
            let index = cursor.read_u32::<LittleEndian>()?;
            let minimum = minimum_index_for_slot(slot);
            if index < minimum {
                return Err(NdbError::InvalidNidDefaultIndex(slot, index).into());
            }
        }

        let _qw_unused = cursor.read_u64::<LittleEndian>()?;

        let root = Root::read(&mut cursor)?;

        let _align = cursor.read_u32::<LittleEndian>()?;
        let mut _rgb_fm = [0_u8; 128];
        cursor.read_exact(&mut _rgb_fm)?;
        let mut _rgb_fp = [0_u8; 128];
        cursor.read_exact(&mut _rgb_fp)?;

        let sentinel = cursor.read_u8()?;
        if sentinel != NDB_SENTINEL {
            return Err(NdbError::InvalidHeaderSentinel(sentinel).into());
        }

        let crypt_method_raw = cursor.read_u8()?;
        let crypt_method = NdbCryptMethod::try_from(crypt_method_raw)?;
        if crypt_method != NdbCryptMethod::Permute {
            return Err(NdbError::UnsupportedCryptMethod(crypt_method).into());
        }

        Ok(Self {
            version,
            crypt_method,
            root,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn sample_header_bytes() -> Vec<u8> {
        use byteorder::WriteBytesExt;

        let mut buffer = vec![0_u8; 516];
        let mut sentinel_offset = 0;
        {
            let mut cursor = Cursor::new(&mut buffer[..]);
            cursor.write_u16::<BigEndian>(HEADER_MAGIC_CLIENT).unwrap();
            cursor
                .write_u16::<LittleEndian>(NDB_VERSION_UNICODE)
                .unwrap();
            cursor
                .write_u16::<LittleEndian>(NDB_CLIENT_VERSION)
                .unwrap();
            cursor.write_u8(NDB_PLATFORM_CREATE).unwrap();
            cursor.write_u8(NDB_PLATFORM_ACCESS).unwrap();
            cursor.write_u32::<LittleEndian>(0).unwrap(); // reserved1
            cursor.write_u32::<LittleEndian>(0).unwrap(); // reserved2
            cursor.write_u64::<LittleEndian>(0).unwrap(); // bidUnused
            cursor.write_u64::<LittleEndian>(0).unwrap(); // bidNextP
            cursor.write_u32::<LittleEndian>(1).unwrap(); // dwUnique
            for slot in 0..32_u8 {
                cursor
                    .write_u32::<LittleEndian>(minimum_index_for_slot(slot))
                    .unwrap();
            }
            cursor.write_u64::<LittleEndian>(0).unwrap(); // qwUnused
                                                           // ROOT (72 bytes)
            cursor.write_u32::<LittleEndian>(0).unwrap();
            cursor.write_u64::<LittleEndian>(1024).unwrap(); // ibFileEof
            cursor.write_u64::<LittleEndian>(0).unwrap(); // ibAMapLast
            cursor.write_u64::<LittleEndian>(0).unwrap(); // cbAMapFree
            cursor.write_u64::<LittleEndian>(0).unwrap(); // cbPMapFree
            cursor.write_u64::<LittleEndian>(0).unwrap(); // bidNBT
            cursor.write_u64::<LittleEndian>(512).unwrap(); // ibNBT
            cursor.write_u64::<LittleEndian>(0).unwrap(); // bidBBT
            cursor.write_u64::<LittleEndian>(768).unwrap(); // ibBBT
            cursor.write_u8(1).unwrap(); // fAMapValid
            cursor.write_u8(0).unwrap();
            cursor.write_u16::<LittleEndian>(0).unwrap();
            // dwAlign + rgbFM + rgbFP
            cursor.write_u32::<LittleEndian>(0).unwrap();
            cursor.write_all(&[0_u8; 128]).unwrap();
            cursor.write_all(&[0_u8; 128]).unwrap();

            sentinel_offset = cursor.position() as usize;
            cursor.write_u8(NDB_SENTINEL).unwrap();
            cursor.write_u8(NdbCryptMethod::Permute as u8).unwrap();
            cursor.write_u16::<LittleEndian>(0).unwrap(); // rgbReserved
            cursor.write_u64::<LittleEndian>(0).unwrap(); // bidNextB
        }

        let mut out = Vec::with_capacity(564);
        out.extend_from_slice(&HEADER_MAGIC.to_be_bytes());
        out.extend_from_slice(&compute_crc(0, &buffer[..471]).to_le_bytes());
        out.extend_from_slice(&buffer[..471]);
        out.extend_from_slice(&compute_crc(0, &buffer).to_le_bytes());
        out.extend_from_slice(&buffer[471..]);
        out.extend_from_slice(&[0_u8; 36]); // trailing reserved bytes, unvalidated
        assert!(sentinel_offset > 0);
        out
    }

    #[test]
    fn test_valid_header_roundtrip() {
        let bytes = sample_header_bytes();
        let header = Header::read(&mut Cursor::new(bytes)).expect("valid header");
        assert_eq!(header.crypt_method(), NdbCryptMethod::Permute);
        assert_eq!(header.root().file_eof().value(), 1024);
    }

    #[test]
    fn test_bad_magic() {
        let mut bytes = sample_header_bytes();
        bytes[0] ^= 0xFF;
        let err = Header::read(&mut Cursor::new(bytes)).unwrap_err();
        assert!(err.to_string().contains("magic"));
    }

    #[test]
    fn test_bad_sentinel() {
        let mut bytes = sample_header_bytes();
        // layout: 4 (magic) + 4 (crc_partial) + 471 (first chunk) + sentinel_offset within buffer
        let sentinel_offset = 8 + 471 + (504 - 471);
        bytes[sentinel_offset] = 0x00;
        let err = Header::read(&mut Cursor::new(bytes)).unwrap_err();
        assert!(err.to_string().contains("sentinel"));
    }
}
