//! ## [Table Context (TC)](https://learn.microsoft.com/en-us/openspecs/office_file_formats/ms-pst/5e48be0d-a75a-4918-a277-50408ff96740)
//!
//! A row/column table layered over a heap and (optionally) a sub-node tree: the column layout
//! and row-index BTH live in the heap; the row matrix itself is either one heap allocation or a
//! sub-node data tree, split into fixed-size rows once the column layout is known.

use byteorder::{LittleEndian, ReadBytesExt};
use std::collections::BTreeMap;
use std::io::Read;
use tracing::instrument;

use super::heap::{HeapId, HeapNodeType, HeapOnNode};
use super::prop_context::{read_heap_fixed, read_variable};
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

pub const LTP_ROW_ID_PROP_ID: u16 = 0x67F2;
pub const LTP_ROW_VERSION_PROP_ID: u16 = 0x67F3;

pub const fn existence_bitmap_size(column_count: usize) -> usize {
    column_count / 8 + if column_count % 8 == 0 { 0 } else { 1 }
}

pub fn check_existence_bitmap(column: usize, existence_bitmap: &[u8]) -> LtpResult<bool> {
    if column >= existence_bitmap.len() * 8 {
        return Err(LtpError::InvalidTableContextColumnCount(column));
    }
    Ok(existence_bitmap[column / 8] & (1_u8 << (7 - (column % 8))) != 0)
}

/// [TCOLDESC](https://learn.microsoft.com/en-us/openspecs/office_file_formats/ms-pst/3a2f63cf-bb40-4559-910c-e55ec43d9cbb)
#[derive(Clone, Copy, Debug)]
pub struct TableColumnDescriptor {
    prop_type: PropertyType,
    prop_id: u16,
    offset: u16,
    size: u8,
    existence_bitmap_index: u8,
}

impl TableColumnDescriptor {
    pub fn prop_type(&self) -> PropertyType {
        self.prop_type
    }

    pub fn prop_id(&self) -> u16 {
        self.prop_id
    }

    pub fn offset(&self) -> u16 {
        self.offset
    }

    pub fn size(&self) -> u8 {
        self.size
    }

    pub fn existence_bitmap_index(&self) -> u8 {
        self.existence_bitmap_index
    }

    fn read(f: &mut dyn Read) -> LtpResult<Self> {
        let prop_type = PropertyType::try_from(f.read_u16::<LittleEndian>()?)?;
        let prop_id = f.read_u16::<LittleEndian>()?;
        let offset = f.read_u16::<LittleEndian>()?;
        let size = f.read_u8()?;
        let existence_bitmap_index = f.read_u8()?;

        Ok(Self {
            prop_type,
            prop_id,
            offset,
            size,
            existence_bitmap_index,
        })
    }
}

/// [TCINFO](https://learn.microsoft.com/en-us/openspecs/office_file_formats/ms-pst/45b3a0c5-d6d6-4e02-aebf-13766ff693f0)
#[derive(Clone, Debug)]
pub struct TableContextInfo {
    end_4byte_values: u16,
    end_2byte_values: u16,
    end_1byte_values: u16,
    end_existence_bitmap: u16,
    row_index: HeapId,
    rows: Option<NodeId>,
    columns: Vec<TableColumnDescriptor>,
}

impl TableContextInfo {
    fn validate(
        end_4byte_values: u16,
        end_2byte_values: u16,
        end_1byte_values: u16,
        end_existence_bitmap: u16,
        columns: &[TableColumnDescriptor],
    ) -> LtpResult<()> {
        if columns.len() > 0xFF {
            return Err(LtpError::InvalidTableContextColumnCount(columns.len()));
        }
        if end_4byte_values % 4 != 0 {
            return Err(LtpError::InvalidTableContext4ByteOffset(end_4byte_values));
        }
        if end_2byte_values % 2 != 0 || end_2byte_values < end_4byte_values {
            return Err(LtpError::InvalidTableContext2ByteOffset(end_2byte_values));
        }
        if end_1byte_values < end_2byte_values {
            return Err(LtpError::InvalidTableContext1ByteOffset(end_1byte_values));
        }
        if end_existence_bitmap < end_1byte_values
            || (end_existence_bitmap - end_1byte_values) as usize
                != existence_bitmap_size(columns.len())
        {
            return Err(LtpError::InvalidTableContextBitmaskOffset(
                end_existence_bitmap,
            ));
        }

        for column in columns {
            match (column.prop_type, column.prop_id) {
                (PropertyType::Integer32, LTP_ROW_ID_PROP_ID)
                    if (column.offset, column.existence_bitmap_index) != (0, 0) =>
                {
                    return Err(LtpError::InvalidTableContextRowIdColumn(
                        column.prop_id,
                        column.prop_type,
                    ));
                }
                (PropertyType::Integer32, LTP_ROW_VERSION_PROP_ID)
                    if (column.offset, column.existence_bitmap_index) != (4, 1) =>
                {
                    return Err(LtpError::InvalidTableContextRowIdColumn(
                        column.prop_id,
                        column.prop_type,
                    ));
                }
                _ => {}
            }

            let expected_size = match column.prop_type {
                PropertyType::Boolean => 1,
                PropertyType::Integer16 => 2,
                PropertyType::Floating64
                | PropertyType::Currency
                | PropertyType::FloatingTime
                | PropertyType::Integer64
                | PropertyType::Time => 8,
                _ => 4,
            };
            if column.size != expected_size {
                return Err(LtpError::InvalidTableColumnSize(column.size));
            }

            if usize::from(column.existence_bitmap_index) >= existence_bitmap_size(columns.len()) * 8
            {
                return Err(LtpError::InvalidTableColumnOffset(column.offset));
            }
        }

        Ok(())
    }

    fn read(f: &mut dyn Read) -> LtpResult<Self> {
        let signature = HeapNodeType::try_from(f.read_u8()?)?;
        if signature != HeapNodeType::Table {
            return Err(LtpError::InvalidHeapTreeNodeType(signature));
        }

        let column_count = f.read_u8()?;

        let end_4byte_values = f.read_u16::<LittleEndian>()?;
        let end_2byte_values = f.read_u16::<LittleEndian>()?;
        let end_1byte_values = f.read_u16::<LittleEndian>()?;
        let end_existence_bitmap = f.read_u16::<LittleEndian>()?;

        let row_index = HeapId::read(f)?;

        let rows = NodeId::read(f)?;
        let rows = if u32::from(rows) == 0 { None } else { Some(rows) };

        let _deprecated_index = f.read_u32::<LittleEndian>()?;

        let mut columns = Vec::with_capacity(usize::from(column_count));
        for _ in 0..column_count {
            columns.push(TableColumnDescriptor::read(f)?);
        }

        Self::validate(
            end_4byte_values,
            end_2byte_values,
            end_1byte_values,
            end_existence_bitmap,
            &columns,
        )?;

        Ok(Self {
            end_4byte_values,
            end_2byte_values,
            end_1byte_values,
            end_existence_bitmap,
            row_index,
            rows,
            columns,
        })
    }

    pub fn columns(&self) -> &[TableColumnDescriptor] {
        &self.columns
    }

    pub fn column(&self, prop_id: u16) -> Option<&TableColumnDescriptor> {
        self.columns.iter().find(|c| c.prop_id == prop_id)
    }

    fn row_size(&self) -> usize {
        usize::from(self.end_existence_bitmap)
    }
}

/// A resolved but not-yet-decoded column value: small fixed values live inline in the row;
/// everything else is a reference into the owning node's heap or sub-node tree.
#[derive(Clone, Copy, Debug)]
enum TableRowColumnRef {
    Small([u8; 8], u8),
    Heap(HeapId),
    Node(NodeId),
}

/// One fixed-size row of the table's row matrix.
/// [Row Data Format](https://learn.microsoft.com/en-us/openspecs/office_file_formats/ms-pst/c48fa6b4-bfd4-49d7-80f8-8718bc4bcddc)
struct TableRowData {
    row_id: u32,
    unique: u32,
    align_4byte: Vec<u8>,
    align_2byte: Vec<u8>,
    align_1byte: Vec<u8>,
    existence_bitmap: Vec<u8>,
}

impl TableRowData {
    fn read(f: &mut dyn Read, context: &TableContextInfo) -> LtpResult<Self> {
        let row_id = f.read_u32::<LittleEndian>()?;
        let unique = f.read_u32::<LittleEndian>()?;

        let mut align_4byte = vec![0_u8; usize::from(context.end_4byte_values) - 8];
        f.read_exact(&mut align_4byte)?;

        let mut align_2byte =
            vec![0_u8; usize::from(context.end_2byte_values - context.end_4byte_values)];
        f.read_exact(&mut align_2byte)?;

        let mut align_1byte =
            vec![0_u8; usize::from(context.end_1byte_values - context.end_2byte_values)];
        f.read_exact(&mut align_1byte)?;

        let mut existence_bitmap = vec![0_u8; existence_bitmap_size(context.columns.len())];
        f.read_exact(&mut existence_bitmap)?;

        Ok(Self {
            row_id,
            unique,
            align_4byte,
            align_2byte,
            align_1byte,
            existence_bitmap,
        })
    }

    fn column_ref(
        &self,
        column: &TableColumnDescriptor,
        end_4byte_values: u16,
        end_2byte_values: u16,
    ) -> LtpResult<Option<TableRowColumnRef>> {
        let bit = usize::from(column.existence_bitmap_index);
        if !check_existence_bitmap(bit, &self.existence_bitmap)? {
            return Ok(None);
        }

        if column.prop_type == PropertyType::Integer32 && column.offset == 0 {
            return Ok(Some(TableRowColumnRef::Small(
                pad8(&self.row_id.to_le_bytes()),
                4,
            )));
        }
        if column.prop_type == PropertyType::Integer32 && column.offset == 4 {
            return Ok(Some(TableRowColumnRef::Small(
                pad8(&self.unique.to_le_bytes()),
                4,
            )));
        }

        match column.prop_type {
            PropertyType::Boolean => {
                let offset = self.offset_1byte(column.offset, end_2byte_values)?;
                Ok(Some(TableRowColumnRef::Small(
                    pad8(&[self.align_1byte[offset]]),
                    1,
                )))
            }
            PropertyType::Integer16 => {
                let offset = self.offset_2byte(column.offset, end_4byte_values)?;
                Ok(Some(TableRowColumnRef::Small(
                    pad8(&self.align_2byte[offset..offset + 2]),
                    2,
                )))
            }
            PropertyType::Floating64
            | PropertyType::Currency
            | PropertyType::FloatingTime
            | PropertyType::Integer64
            | PropertyType::Time => {
                let offset = self.offset_4byte(column.offset)?;
                Ok(Some(TableRowColumnRef::Small(
                    pad8(&self.align_4byte[offset..offset + 8]),
                    8,
                )))
            }
            PropertyType::Integer32 | PropertyType::Floating32 | PropertyType::ErrorCode => {
                let offset = self.offset_4byte(column.offset)?;
                Ok(Some(TableRowColumnRef::Small(
                    pad8(&self.align_4byte[offset..offset + 4]),
                    4,
                )))
            }
            _ => {
                let offset = self.offset_4byte(column.offset)?;
                let raw = read_u32_le(&self.align_4byte[offset..offset + 4])?;
                let node_id = NodeId::from(raw);
                Ok(Some(match node_id.id_type() {
                    Ok(NodeIdType::HeapNode) => TableRowColumnRef::Heap(HeapId::from(raw)),
                    _ => TableRowColumnRef::Node(node_id),
                }))
            }
        }
    }

    fn offset_1byte(&self, offset: u16, end_2byte_values: u16) -> LtpResult<usize> {
        if offset < end_2byte_values {
            return Err(LtpError::InvalidTableColumnOffset(offset));
        }
        let i = usize::from(offset - end_2byte_values);
        if i >= self.align_1byte.len() {
            return Err(LtpError::InvalidTableColumnOffset(offset));
        }
        Ok(i)
    }

    fn offset_2byte(&self, offset: u16, end_4byte_values: u16) -> LtpResult<usize> {
        if offset < end_4byte_values {
            return Err(LtpError::InvalidTableColumnOffset(offset));
        }
        let i = usize::from(offset - end_4byte_values);
        if i + 2 > self.align_2byte.len() {
            return Err(LtpError::InvalidTableColumnOffset(offset));
        }
        Ok(i)
    }

    fn offset_4byte(&self, offset: u16) -> LtpResult<usize> {
        if offset < 8 {
            return Err(LtpError::InvalidTableColumnOffset(offset));
        }
        let i = usize::from(offset - 8);
        if i + 8 > self.align_4byte.len() {
            return Err(LtpError::InvalidTableColumnOffset(offset));
        }
        Ok(i)
    }
}

fn pad8(bytes: &[u8]) -> [u8; 8] {
    let mut out = [0_u8; 8];
    out[..bytes.len()].copy_from_slice(bytes);
    out
}

fn read_u32_le(bytes: &[u8]) -> LtpResult<u32> {
    Ok((&mut &bytes[..]).read_u32::<LittleEndian>()?)
}

/// A node's fully-resolved row/column table.
pub struct TableContext {
    data: DataTree,
    sub_nodes: Option<SubNodeBTree>,
    context: TableContextInfo,
    row_index: BTreeMap<u32, u32>,
    rows: Vec<TableRowData>,
}

impl TableContext {
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
        Self::from_parts(data, sub_nodes)
    }

    /// Open the table rooted at `nid` in the file's main node B-tree, e.g. a Hierarchy,
    /// Contents or AssocContents folder table.
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

    /// Open the table rooted at `nid` inside an already-resolved sub-node tree, e.g. a
    /// Recipient or Attachment table nested under its owning Message.
    pub fn open_in(nid: NodeId, parent_sub_tree: &SubNodeBTree) -> LtpResult<Self> {
        let data = parent_sub_tree.get_data_tree(nid)?.clone();
        let sub_nodes = parent_sub_tree.get_nested(nid).cloned();
        Self::from_parts(data, sub_nodes)
    }

    fn from_parts(data: DataTree, sub_nodes: Option<SubNodeBTree>) -> LtpResult<Self> {
        let heap = HeapOnNode::new(&data);
        let header = heap.header()?;
        if header.client_signature() != HeapNodeType::Table {
            return Err(LtpError::InvalidHeapTreeNodeType(header.client_signature()));
        }

        let info_bytes = heap.entry(header.user_root())?;
        let context = TableContextInfo::read(&mut &info_bytes[..])?;

        let row_index_tree = HeapTree::load(&heap, context.row_index)?;
        if row_index_tree.key_size() != 4 || row_index_tree.entry_size() != 4 {
            return Err(LtpError::InvalidHeapTreeDataSize(
                row_index_tree.entry_size() as u8,
            ));
        }
        let mut row_index = BTreeMap::new();
        for entry in row_index_tree.iter() {
            let row_id = read_u32_le(entry.key)?;
            let index = read_u32_le(entry.value)?;
            row_index.insert(row_id, index);
        }

        let row_size = context.row_size();
        let mut rows = Vec::new();
        if row_size != 0 {
            match context.rows {
                None => {}
                Some(rows_nid) => match rows_nid.id_type() {
                    Ok(NodeIdType::HeapNode) => {
                        let row_bytes = heap.entry(HeapId::from(u32::from(rows_nid)))?;
                        if row_bytes.len() % row_size != 0 {
                            return Err(LtpError::InvalidTableContextBitmaskOffset(
                                context.end_existence_bitmap,
                            ));
                        }
                        for chunk in row_bytes.chunks(row_size) {
                            rows.push(TableRowData::read(&mut &chunk[..], &context)?);
                        }
                    }
                    _ => {
                        let sub_nodes = sub_nodes.as_ref().ok_or(
                            LtpError::InvalidTableContextRowsReference(u32::from(rows_nid)),
                        )?;
                        // Rows never span a data-block boundary: each block contributes as
                        // many complete rows as fit, and any trailing bytes are padding, not
                        // the start of the next row. Chunking the blocks' concatenation
                        // instead would shift every row's alignment past the first block.
                        let row_data_tree = sub_nodes.get_data_tree(rows_nid)?;
                        for block in row_data_tree.iter() {
                            let bytes = block.bytes();
                            let usable = bytes.len() - (bytes.len() % row_size);
                            for chunk in bytes[..usable].chunks(row_size) {
                                rows.push(TableRowData::read(&mut &chunk[..], &context)?);
                            }
                        }
                    }
                },
            }
        }

        Ok(Self {
            data,
            sub_nodes,
            context,
            row_index,
            rows,
        })
    }

    pub fn context(&self) -> &TableContextInfo {
        &self.context
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn row_ids(&self) -> impl Iterator<Item = u32> + '_ {
        self.row_index.keys().copied()
    }

    fn heap(&self) -> HeapOnNode<'_> {
        HeapOnNode::new(&self.data)
    }

    /// `get_value(rowId, propId) -> PropertyValue`.
    pub fn value(&self, row_id: u32, prop_id: u16) -> LtpResult<Option<PropertyValueCell>> {
        let index = self
            .row_index
            .get(&row_id)
            .ok_or(LtpError::TableRowNotFound(row_id))?;
        let row = self
            .rows
            .get(*index as usize)
            .ok_or(LtpError::TableRowNotFound(row_id))?;
        let column = self
            .context
            .column(prop_id)
            .ok_or(LtpError::TableColumnNotFound(prop_id))?;

        let Some(reference) = row.column_ref(
            column,
            self.context.end_4byte_values,
            self.context.end_2byte_values,
        )?
        else {
            return Ok(None);
        };

        let value = match reference {
            TableRowColumnRef::Small(bytes, size) => {
                if size <= 4 && column.prop_type.fixed_size().is_some_and(|s| s <= 4) {
                    let raw = read_u32_le(&bytes[..4])?;
                    super::prop_context::read_fixed(column.prop_type, raw)?
                } else {
                    read_heap_fixed(column.prop_type, &bytes[..size as usize])?
                }
            }
            TableRowColumnRef::Heap(heap_id) => {
                let bytes = self.heap().entry(heap_id)?;
                if column.prop_type.fixed_size().is_some() {
                    read_heap_fixed(column.prop_type, bytes)?
                } else {
                    read_variable(column.prop_type, bytes)?
                }
            }
            TableRowColumnRef::Node(node_id) => {
                let sub_nodes = self
                    .sub_nodes
                    .as_ref()
                    .ok_or(LtpError::TableColumnNotFound(prop_id))?;
                let tree = sub_nodes.get_data_tree(node_id)?;
                read_variable(column.prop_type, &tree.concat_all())?
            }
        };

        Ok(Some(value))
    }
}

pub use super::prop_context::PropertyValue as PropertyValueCell;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_existence_bitmap_size() {
        assert_eq!(existence_bitmap_size(0), 0);
        assert_eq!(existence_bitmap_size(1), 1);
        assert_eq!(existence_bitmap_size(8), 1);
        assert_eq!(existence_bitmap_size(9), 2);
    }

    #[test]
    fn test_check_existence_bitmap_msb_first() {
        // bit 0 is the MSB of byte 0.
        let bitmap = [0b1000_0000];
        assert!(check_existence_bitmap(0, &bitmap).unwrap());
        assert!(!check_existence_bitmap(1, &bitmap).unwrap());
        assert!(check_existence_bitmap(8, &bitmap).is_err());
    }

    #[test]
    fn test_fixed_row_id_version_columns_enforced() {
        let bad_row_id_column = TableColumnDescriptor {
            prop_type: PropertyType::Integer32,
            prop_id: LTP_ROW_ID_PROP_ID,
            offset: 4,
            size: 4,
            existence_bitmap_index: 0,
        };
        let err = TableContextInfo::validate(8, 8, 8, 9, std::slice::from_ref(&bad_row_id_column));
        assert!(matches!(
            err,
            Err(LtpError::InvalidTableContextRowIdColumn(_, _))
        ));
    }
}
