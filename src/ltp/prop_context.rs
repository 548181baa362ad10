//! ## [Property Context (PC)](https://learn.microsoft.com/en-us/openspecs/office_file_formats/ms-pst/294c83c6-ff92-42f5-b6b6-876c29fa9737)
//!
//! A BTH (`cbKey = 2`, `cbEnt = 6`) mapping property IDs to values: small fixed values inline,
//! larger fixed values and all variable-length values by reference into the owning node's heap
//! or sub-node tree.

use byteorder::{LittleEndian, ReadBytesExt};
use core::mem;
use std::fmt::Debug;
use std::io::Read;
use tracing::instrument;

use super::heap::{HeapId, HeapNodeType, HeapOnNode};
use super::prop_type::PropertyType;
use super::tree::HeapTree;
use super::{LtpError, LtpResult};
use crate::ndb::block::DataTree;
use crate::ndb::block_ref::BlockRef;
use crate::ndb::node_id::{NodeId, NodeIdType};
use crate::ndb::subnode::SubNodeBTree;
use crate::ndb::tree::BlockBTree;
use crate::pager::Pager;
use crate::reader::Reader;
use crate::PstError;

#[derive(Copy, Clone)]
pub enum PropertyValueRecord {
    Small(u32),
    Heap(HeapId),
    Node(NodeId),
}

impl Debug for PropertyValueRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Small(value) => write!(f, "Small(0x{value:08X})"),
            Self::Heap(heap_id) => write!(f, "{heap_id:?}"),
            Self::Node(node_id) => write!(f, "{node_id:?}"),
        }
    }
}

/// [PC BTH Record](https://learn.microsoft.com/en-us/openspecs/office_file_formats/ms-pst/7daab6f5-ce65-437e-80d5-1b1be4088bd3)
#[derive(Clone, Copy, Debug)]
pub struct PropertyTreeRecord {
    prop_id: u16,
    prop_type: PropertyType,
    value: PropertyValueRecord,
}

impl PropertyTreeRecord {
    pub fn prop_id(&self) -> u16 {
        self.prop_id
    }

    pub fn prop_type(&self) -> PropertyType {
        self.prop_type
    }

    fn read(prop_id: u16, entry: &[u8]) -> LtpResult<Self> {
        let mut cursor = entry;
        let prop_type = cursor.read_u16::<LittleEndian>()?;
        let prop_type = PropertyType::try_from(prop_type)?;
        let raw = cursor.read_u32::<LittleEndian>()?;

        let value = match prop_type {
            PropertyType::Null
            | PropertyType::Integer16
            | PropertyType::Integer32
            | PropertyType::Floating32
            | PropertyType::ErrorCode
            | PropertyType::Boolean => PropertyValueRecord::Small(raw),

            PropertyType::Floating64
            | PropertyType::Currency
            | PropertyType::FloatingTime
            | PropertyType::Integer64
            | PropertyType::Time
            | PropertyType::Guid
            | PropertyType::Object => PropertyValueRecord::Heap(HeapId::from(raw)),

            _ => match NodeId::from(raw).id_type() {
                Ok(NodeIdType::HeapNode) => PropertyValueRecord::Heap(HeapId::from(raw)),
                _ => PropertyValueRecord::Node(NodeId::from(raw)),
            },
        };

        Ok(Self {
            prop_id,
            prop_type,
            value,
        })
    }
}

#[derive(Clone, Copy, Default)]
pub struct GuidValue {
    pub data1: u32,
    pub data2: u16,
    pub data3: u16,
    pub data4: [u8; 8],
}

impl Debug for GuidValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{:08X}-{:04X}-{:04X}-{:02X}{:02X}-{:02X}{:02X}{:02X}{:02X}{:02X}{:02X}",
            self.data1,
            self.data2,
            self.data3,
            self.data4[0],
            self.data4[1],
            self.data4[2],
            self.data4[3],
            self.data4[4],
            self.data4[5],
            self.data4[6],
            self.data4[7]
        )
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct ObjectValue {
    pub node: NodeId,
    pub size: u32,
}

/// A resolved property value. Fixed-size scalars decode directly from the 4-byte inline record
/// or an 8/16-byte heap allocation; variable-length values decode from the concatenated bytes
/// of a heap allocation or sub-node data tree.
#[derive(Clone, Debug, Default)]
pub enum PropertyValue {
    #[default]
    Null,
    Integer16(i16),
    Integer32(i32),
    Floating32(f32),
    Floating64(f64),
    Currency(i64),
    FloatingTime(f64),
    ErrorCode(i32),
    Boolean(bool),
    Integer64(i64),
    String8(Vec<u8>),
    Unicode(Vec<u16>),
    Time(i64),
    Guid(GuidValue),
    Binary(Vec<u8>),
    Object(ObjectValue),
    MultipleInteger16(Vec<i16>),
    MultipleInteger32(Vec<i32>),
    MultipleFloating32(Vec<f32>),
    MultipleFloating64(Vec<f64>),
    MultipleCurrency(Vec<i64>),
    MultipleFloatingTime(Vec<f64>),
    MultipleInteger64(Vec<i64>),
    MultipleString8(Vec<Vec<u8>>),
    MultipleUnicode(Vec<Vec<u16>>),
    MultipleTime(Vec<i64>),
    MultipleGuid(Vec<GuidValue>),
    MultipleBinary(Vec<Vec<u8>>),
}

pub(super) fn read_fixed(prop_type: PropertyType, raw: u32) -> LtpResult<PropertyValue> {
    Ok(match prop_type {
        PropertyType::Null => PropertyValue::Null,
        PropertyType::Integer16 => PropertyValue::Integer16(raw as i16),
        PropertyType::Integer32 => PropertyValue::Integer32(raw as i32),
        PropertyType::Floating32 => PropertyValue::Floating32(f32::from_bits(raw)),
        PropertyType::ErrorCode => PropertyValue::ErrorCode(raw as i32),
        PropertyType::Boolean => PropertyValue::Boolean(raw & 0xFF != 0),
        other => return Err(LtpError::InvalidVariableLengthPropertyType(other)),
    })
}

pub(super) fn read_heap_fixed(prop_type: PropertyType, bytes: &[u8]) -> LtpResult<PropertyValue> {
    let mut cursor = bytes;
    Ok(match prop_type {
        PropertyType::Floating64 => PropertyValue::Floating64(cursor.read_f64::<LittleEndian>()?),
        PropertyType::Currency => PropertyValue::Currency(cursor.read_i64::<LittleEndian>()?),
        PropertyType::FloatingTime => {
            PropertyValue::FloatingTime(cursor.read_f64::<LittleEndian>()?)
        }
        PropertyType::Integer64 => PropertyValue::Integer64(cursor.read_i64::<LittleEndian>()?),
        PropertyType::Time => PropertyValue::Time(cursor.read_i64::<LittleEndian>()?),
        PropertyType::Guid => {
            let data1 = cursor.read_u32::<LittleEndian>()?;
            let data2 = cursor.read_u16::<LittleEndian>()?;
            let data3 = cursor.read_u16::<LittleEndian>()?;
            let mut data4 = [0_u8; 8];
            cursor.read_exact(&mut data4)?;
            PropertyValue::Guid(GuidValue {
                data1,
                data2,
                data3,
                data4,
            })
        }
        PropertyType::Object => {
            let node = NodeId::read(&mut cursor)?;
            let size = cursor.read_u32::<LittleEndian>()?;
            PropertyValue::Object(ObjectValue { node, size })
        }
        other => return Err(LtpError::InvalidVariableLengthPropertyType(other)),
    })
}

pub(super) fn read_variable(prop_type: PropertyType, bytes: &[u8]) -> LtpResult<PropertyValue> {
    let mut cursor = bytes;
    Ok(match prop_type {
        PropertyType::String8 => PropertyValue::String8(bytes.to_vec()),
        PropertyType::Unicode => {
            let mut values = Vec::with_capacity(bytes.len() / 2);
            while let Ok(ch) = cursor.read_u16::<LittleEndian>() {
                values.push(ch);
            }
            PropertyValue::Unicode(values)
        }
        PropertyType::Binary => PropertyValue::Binary(bytes.to_vec()),
        PropertyType::MultipleInteger16 => {
            let mut values = Vec::with_capacity(bytes.len() / 2);
            while let Ok(value) = cursor.read_i16::<LittleEndian>() {
                values.push(value);
            }
            PropertyValue::MultipleInteger16(values)
        }
        PropertyType::MultipleInteger32 => {
            let mut values = Vec::with_capacity(bytes.len() / 4);
            while let Ok(value) = cursor.read_i32::<LittleEndian>() {
                values.push(value);
            }
            PropertyValue::MultipleInteger32(values)
        }
        PropertyType::MultipleFloating32 => {
            let mut values = Vec::with_capacity(bytes.len() / 4);
            while let Ok(value) = cursor.read_f32::<LittleEndian>() {
                values.push(value);
            }
            PropertyValue::MultipleFloating32(values)
        }
        PropertyType::MultipleFloating64 => {
            let mut values = Vec::with_capacity(bytes.len() / 8);
            while let Ok(value) = cursor.read_f64::<LittleEndian>() {
                values.push(value);
            }
            PropertyValue::MultipleFloating64(values)
        }
        PropertyType::MultipleCurrency => {
            let mut values = Vec::with_capacity(bytes.len() / 8);
            while let Ok(value) = cursor.read_i64::<LittleEndian>() {
                values.push(value);
            }
            PropertyValue::MultipleCurrency(values)
        }
        PropertyType::MultipleFloatingTime => {
            let mut values = Vec::with_capacity(bytes.len() / 8);
            while let Ok(value) = cursor.read_f64::<LittleEndian>() {
                values.push(value);
            }
            PropertyValue::MultipleFloatingTime(values)
        }
        PropertyType::MultipleInteger64 => {
            let mut values = Vec::with_capacity(bytes.len() / 8);
            while let Ok(value) = cursor.read_i64::<LittleEndian>() {
                values.push(value);
            }
            PropertyValue::MultipleInteger64(values)
        }
        PropertyType::MultipleTime => {
            let mut values = Vec::with_capacity(bytes.len() / 8);
            while let Ok(value) = cursor.read_i64::<LittleEndian>() {
                values.push(value);
            }
            PropertyValue::MultipleTime(values)
        }
        PropertyType::MultipleString8 => {
            PropertyValue::MultipleString8(read_multi_value_strings(bytes, |chunk| chunk.to_vec())?)
        }
        PropertyType::MultipleUnicode => PropertyValue::MultipleUnicode(read_multi_value_strings(
            bytes,
            |chunk| {
                let mut out = Vec::with_capacity(chunk.len() / 2);
                let mut c = chunk;
                while let Ok(ch) = c.read_u16::<LittleEndian>() {
                    out.push(ch);
                }
                out
            },
        )?),
        PropertyType::MultipleGuid => {
            let count = cursor.read_u32::<LittleEndian>()? as usize;
            let mut values = Vec::with_capacity(count);
            for _ in 0..count {
                let data1 = cursor.read_u32::<LittleEndian>()?;
                let data2 = cursor.read_u16::<LittleEndian>()?;
                let data3 = cursor.read_u16::<LittleEndian>()?;
                let mut data4 = [0_u8; 8];
                cursor.read_exact(&mut data4)?;
                values.push(GuidValue {
                    data1,
                    data2,
                    data3,
                    data4,
                });
            }
            PropertyValue::MultipleGuid(values)
        }
        PropertyType::MultipleBinary => {
            PropertyValue::MultipleBinary(read_multi_value_strings(bytes, |chunk| chunk.to_vec())?)
        }
        other => return Err(LtpError::InvalidVariableLengthPropertyType(other)),
    })
}

/// `ulCount` + `rgulDataOffsets` + `rgDataItems`, the shared multi-value layout (MS-PST
/// 2.3.4.4): `map` turns each item's raw byte slice into its element type.
fn read_multi_value_strings<T>(
    bytes: &[u8],
    map: impl Fn(&[u8]) -> T,
) -> LtpResult<Vec<T>> {
    let mut cursor = bytes;
    let count = cursor.read_u32::<LittleEndian>()? as usize;
    let mut offsets = Vec::with_capacity(count);
    for _ in 0..count {
        offsets.push(cursor.read_u32::<LittleEndian>()? as usize);
    }

    let header_size = (count + 1) * mem::size_of::<u32>();
    let mut values = Vec::with_capacity(count);
    for i in 0..count {
        let start = offsets[i];
        if i == 0 && start != header_size {
            return Err(LtpError::InvalidMultiValuePropertyOffset(start));
        }
        let end = if i + 1 < count {
            offsets[i + 1]
        } else {
            bytes.len()
        };
        if end < start || end > bytes.len() {
            return Err(LtpError::InvalidMultiValuePropertyOffset(end));
        }
        values.push(map(&bytes[start..end]));
    }
    Ok(values)
}

/// A node's fully-resolved property store.
pub struct PropertyContext {
    data: DataTree,
    sub_nodes: Option<SubNodeBTree>,
}

impl PropertyContext {
    #[instrument(skip(pager, bbt), err)]
    pub fn load(
        pager: &Pager,
        bbt: &BlockBTree,
        data_bref: BlockRef,
        data_cb: u16,
        sub_node_bid: crate::ndb::BlockId,
    ) -> LtpResult<Self> {
        let data = DataTree::load(pager, bbt, data_bref, data_cb)?;
        let sub_nodes = if u64::from(sub_node_bid) != 0 {
            Some(SubNodeBTree::load(pager, bbt, sub_node_bid)?)
        } else {
            None
        };
        Ok(Self { data, sub_nodes })
    }

    /// Open the property context rooted at `nid` in the file's main node B-tree.
    #[instrument(skip(reader), err)]
    pub fn open(nid: NodeId, reader: &Reader) -> Result<Self, PstError> {
        let nbt_entry = reader.nbt_get(nid)?;
        let bbt_entry = reader.bbt_get(nbt_entry.data)?;
        Ok(Self::load(
            reader.pager(),
            reader.bbt(),
            bbt_entry.block,
            bbt_entry.size,
            nbt_entry.sub_node.unwrap_or_default(),
        )?)
    }

    /// Open the property context rooted at `nid` inside an already-resolved sub-node tree, e.g.
    /// a Recipient or Attachment row's own property context nested under its owning Message.
    pub fn open_with(nid: NodeId, _reader: &Reader, sub_tree: &SubNodeBTree) -> LtpResult<Self> {
        let data = sub_tree.get_data_tree(nid)?.clone();
        let sub_nodes = sub_tree.get_nested(nid).cloned();
        Ok(Self { data, sub_nodes })
    }

    fn heap(&self) -> HeapOnNode<'_> {
        HeapOnNode::new(&self.data)
    }

    fn records(&self) -> LtpResult<Vec<PropertyTreeRecord>> {
        let heap = self.heap();
        let header = heap.header()?;
        if header.client_signature() != HeapNodeType::Properties {
            return Err(LtpError::InvalidHeapTreeNodeType(header.client_signature()));
        }
        let bth = HeapTree::load(&heap, header.user_root())?;
        if bth.key_size() != 2 || bth.entry_size() != 6 {
            return Err(LtpError::InvalidHeapTreeDataSize(bth.entry_size() as u8));
        }

        bth.iter()
            .map(|entry| {
                let prop_id = (entry.key[0] as u16) | ((entry.key[1] as u16) << 8);
                PropertyTreeRecord::read(prop_id, entry.value)
            })
            .collect()
    }

    pub fn properties(&self) -> LtpResult<Vec<u16>> {
        Ok(self.records()?.iter().map(|r| r.prop_id()).collect())
    }

    /// `get_value(propId) -> PropertyValue`.
    pub fn value(&self, prop_id: u16) -> LtpResult<PropertyValue> {
        let record = self
            .records()?
            .into_iter()
            .find(|r| r.prop_id == prop_id)
            .ok_or(LtpError::PropertyNotFound(prop_id))?;

        match record.value {
            PropertyValueRecord::Small(raw) => read_fixed(record.prop_type, raw),
            PropertyValueRecord::Heap(heap_id) => {
                let bytes = self.heap().entry(heap_id)?;
                if record.prop_type.fixed_size().is_some() {
                    read_heap_fixed(record.prop_type, bytes)
                } else {
                    read_variable(record.prop_type, bytes)
                }
            }
            PropertyValueRecord::Node(node_id) => {
                let sub_nodes = self
                    .sub_nodes
                    .as_ref()
                    .ok_or(LtpError::PropertyNotFound(prop_id))?;
                let tree = sub_nodes.get_data_tree(node_id)?;
                let bytes = tree.concat_all();
                read_variable(record.prop_type, &bytes)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record_bytes(prop_type: u16, raw: u32) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&prop_type.to_le_bytes());
        out.extend_from_slice(&raw.to_le_bytes());
        out
    }

    #[test]
    fn test_small_fixed_value_dispatch() {
        let entry = record_bytes(u16::from(PropertyType::Integer32), 42);
        let record = PropertyTreeRecord::read(0x3001, &entry).unwrap();
        assert!(matches!(record.value, PropertyValueRecord::Small(42)));
        let value = read_fixed(record.prop_type, 42).unwrap();
        assert!(matches!(value, PropertyValue::Integer32(42)));
    }

    #[test]
    fn test_wide_fixed_value_is_heap_reference() {
        let heap_id = HeapId::new(1, 0).unwrap();
        let entry = record_bytes(u16::from(PropertyType::Integer64), u32::from(heap_id));
        let record = PropertyTreeRecord::read(0x3002, &entry).unwrap();
        assert!(matches!(record.value, PropertyValueRecord::Heap(_)));
    }

    #[test]
    fn test_variable_length_value_is_heap_or_node_reference() {
        let heap_id = HeapId::new(1, 0).unwrap();
        let entry = record_bytes(u16::from(PropertyType::Unicode), u32::from(heap_id));
        let record = PropertyTreeRecord::read(0x3003, &entry).unwrap();
        assert!(matches!(record.value, PropertyValueRecord::Heap(_)));
    }

    #[test]
    fn test_multi_value_unicode_layout() {
        // ulCount = 2, offsets = [12, 14], then two 2-byte UTF-16 items.
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&2u32.to_le_bytes());
        bytes.extend_from_slice(&12u32.to_le_bytes());
        bytes.extend_from_slice(&14u32.to_le_bytes());
        bytes.extend_from_slice(&0x0041u16.to_le_bytes());
        bytes.extend_from_slice(&0x0042u16.to_le_bytes());

        let value = read_variable(PropertyType::MultipleUnicode, &bytes).unwrap();
        match value {
            PropertyValue::MultipleUnicode(items) => {
                assert_eq!(items, vec![vec![0x0041], vec![0x0042]]);
            }
            other => panic!("unexpected value: {other:?}"),
        }
    }
}
