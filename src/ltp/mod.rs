//! ## [Lists, Tables, and Properties (LTP) Layer](https://learn.microsoft.com/en-us/openspecs/office_file_formats/ms-pst/f4cc51b2-5d19-4a64-994c-5c2c60c5ce9f)
//!
//! Built on top of the NDB layer's data trees and sub-node trees: the heap allocator (HN), the
//! generic BTree-on-Heap (BTH), and the two HN/BTH clients that expose typed data —
//! PropertyContext (PC) and TableContext (TC).

pub mod heap;
pub mod prop_context;
pub mod prop_type;
pub mod table_context;
pub mod tree;

use thiserror::Error;

use crate::ltp::prop_type::PropertyType;
use crate::ndb::NdbError;

/// Everything that can go wrong while parsing the LTP layer.
#[derive(Error, Debug)]
pub enum LtpError {
    #[error(transparent)]
    Ndb(#[from] NdbError),
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("invalid heap node signature: {0:#04x}")]
    InvalidHeapNodeSignature(u8),
    #[error("invalid heap node type signature: {0:#04x}")]
    InvalidHeapNodeTypeSignature(u8),
    #[error("invalid heap fill level: {0:#04x}")]
    InvalidHeapFillLevel(u8),
    #[error("invalid heap index: {0:#06x}")]
    InvalidHeapIndex(u16),
    #[error("heap block index not found: {0}")]
    HeapBlockIndexNotFound(u16),
    #[error("heap allocation index not found: {0}")]
    HeapAllocIndexNotFound(u16),
    #[error("heap page allocation offsets are not monotonically increasing: {0}")]
    InvalidHeapPageAllocOffset(u16),
    #[error("empty heap page allocation map")]
    EmptyHeapPageAlloc,
    #[error("heap page ran out of 16-bit offset space")]
    HeapPageOutOfSpace,

    #[error("invalid heap tree (BTH) node type: {0:?}")]
    InvalidHeapTreeNodeType(heap::HeapNodeType),
    #[error("invalid heap tree key size: {0}")]
    InvalidHeapTreeKeySize(u8),
    #[error("invalid heap tree entry size: {0}")]
    InvalidHeapTreeDataSize(u8),
    #[error("unsupported heap tree index levels: {0} (only flat, single-level BTH is supported)")]
    UnsupportedHeapTreeLevels(u8),

    #[error("invalid property type: {0:#06x}")]
    InvalidPropertyType(u16),
    #[error("invalid variable-length property type: {0:?}")]
    InvalidVariableLengthPropertyType(PropertyType),
    #[error("string value is not null-terminated ({0} elements)")]
    StringNotNullTerminated(usize),
    #[error("invalid multi-value property count: {0}")]
    InvalidMultiValuePropertyCount(usize),
    #[error("invalid multi-value property offset: {0}")]
    InvalidMultiValuePropertyOffset(usize),
    #[error("property not found: {0:#06x}")]
    PropertyNotFound(u16),

    #[error("invalid table context column count: {0}")]
    InvalidTableContextColumnCount(usize),
    #[error("invalid table context 4-byte value region end offset: {0}")]
    InvalidTableContext4ByteOffset(u16),
    #[error("invalid table context 2-byte value region end offset: {0}")]
    InvalidTableContext2ByteOffset(u16),
    #[error("invalid table context 1-byte value region end offset: {0}")]
    InvalidTableContext1ByteOffset(u16),
    #[error("invalid table context existence bitmap end offset: {0}")]
    InvalidTableContextBitmaskOffset(u16),
    #[error("invalid fixed row-id/row-version column: prop {0:#06x}, type {1:?}")]
    InvalidTableContextRowIdColumn(u16, PropertyType),
    #[error("invalid table column property type: {0:?}")]
    InvalidTableColumnPropertyType(PropertyType),
    #[error("invalid table column offset: {0}")]
    InvalidTableColumnOffset(u16),
    #[error("invalid table column size: {0}")]
    InvalidTableColumnSize(u8),
    #[error("invalid table column boolean value: {0:#04x}")]
    InvalidTableColumnBooleanValue(u8),
    #[error("invalid table context row matrix reference: {0:#010x}")]
    InvalidTableContextRowsReference(u32),
    #[error("row not found: {0}")]
    TableRowNotFound(u32),
    #[error("column not found: prop id {0:#06x}")]
    TableColumnNotFound(u16),
}

pub type LtpResult<T> = Result<T, LtpError>;

impl From<LtpError> for std::io::Error {
    fn from(value: LtpError) -> Self {
        std::io::Error::new(std::io::ErrorKind::InvalidData, value)
    }
}
