//! ## [Node ID](https://learn.microsoft.com/en-us/openspecs/office_file_formats/ms-pst/590d5943-9bea-49b7-a04e-b1b8a8a2fba3)

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{self, Read, Write};

use super::NdbError;

/// `NID_TYPE`: the low 5 bits of a [`NodeId`].
#[repr(u8)]
#[derive(Copy, Clone, PartialEq, Eq, Default, Debug)]
pub enum NodeIdType {
    /// `NID_TYPE_HID`: Heap node
    #[default]
    HeapNode = 0x00,
    /// `NID_TYPE_INTERNAL`: Internal node
    Internal = 0x01,
    /// `NID_TYPE_NORMAL_FOLDER`: Normal Folder object (PC)
    NormalFolder = 0x02,
    /// `NID_TYPE_SEARCH_FOLDER`: Search Folder object (PC)
    SearchFolder = 0x03,
    /// `NID_TYPE_NORMAL_MESSAGE`: Normal Message object (PC)
    NormalMessage = 0x04,
    /// `NID_TYPE_ATTACHMENT`: Attachment object (PC)
    Attachment = 0x05,
    /// `NID_TYPE_SEARCH_UPDATE_QUEUE`: Queue of changed objects for search Folder objects
    SearchUpdateQueue = 0x06,
    /// `NID_TYPE_SEARCH_CRITERIA_OBJECT`: Defines the search criteria for a search Folder object
    SearchCriteria = 0x07,
    /// `NID_TYPE_ASSOC_MESSAGE`: Folder associated information (FAI) Message object (PC)
    AssociatedMessage = 0x08,
    /// `NID_TYPE_CONTENTS_TABLE_INDEX`: Internal, persisted view-related
    ContentsTableIndex = 0x0A,
    /// `NID_TYPE_RECEIVE_FOLDER_TABLE`: Receive Folder object (Inbox)
    ReceiveFolderTable = 0x0B,
    /// `NID_TYPE_OUTGOING_QUEUE_TABLE`: Outbound queue (Outbox)
    OutgoingQueueTable = 0x0C,
    /// `NID_TYPE_HIERARCHY_TABLE`: Hierarchy table (TC)
    HierarchyTable = 0x0D,
    /// `NID_TYPE_CONTENTS_TABLE`: Contents table (TC)
    ContentsTable = 0x0E,
    /// `NID_TYPE_ASSOC_CONTENTS_TABLE`: FAI contents table (TC)
    AssociatedContentsTable = 0x0F,
    /// `NID_TYPE_SEARCH_CONTENTS_TABLE`: Contents table (TC) of a search Folder object
    SearchContentsTable = 0x10,
    /// `NID_TYPE_ATTACHMENT_TABLE`: Attachment table (TC)
    AttachmentTable = 0x11,
    /// `NID_TYPE_RECIPIENT_TABLE`: Recipient table (TC)
    RecipientTable = 0x12,
    /// `NID_TYPE_SEARCH_TABLE_INDEX`: Internal, persisted view-related
    SearchTableIndex = 0x13,
    /// `NID_TYPE_LTP`: [LTP](crate::ltp)
    ListsTablesProperties = 0x1F,
}

impl TryFrom<u8> for NodeIdType {
    type Error = NdbError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x00 => Ok(Self::HeapNode),
            0x01 => Ok(Self::Internal),
            0x02 => Ok(Self::NormalFolder),
            0x03 => Ok(Self::SearchFolder),
            0x04 => Ok(Self::NormalMessage),
            0x05 => Ok(Self::Attachment),
            0x06 => Ok(Self::SearchUpdateQueue),
            0x07 => Ok(Self::SearchCriteria),
            0x08 => Ok(Self::AssociatedMessage),
            0x0A => Ok(Self::ContentsTableIndex),
            0x0B => Ok(Self::ReceiveFolderTable),
            0x0C => Ok(Self::OutgoingQueueTable),
            0x0D => Ok(Self::HierarchyTable),
            0x0E => Ok(Self::ContentsTable),
            0x0F => Ok(Self::AssociatedContentsTable),
            0x10 => Ok(Self::SearchContentsTable),
            0x11 => Ok(Self::AttachmentTable),
            0x12 => Ok(Self::RecipientTable),
            0x13 => Ok(Self::SearchTableIndex),
            0x1F => Ok(Self::ListsTablesProperties),
            invalid => Err(NdbError::InvalidNodeIdType(invalid)),
        }
    }
}

/// Well-known node IDs (`NID_*` constants), [MS-PST 2.4.1](https://learn.microsoft.com/en-us/openspecs/office_file_formats/ms-pst/8a4298d9-ea0b-4028-84f9-a8d1f61c1a13).
pub mod well_known {
    pub const MESSAGE_STORE: u32 = 0x21;
    pub const NAME_TO_ID_MAP: u32 = 0x61;
    pub const NORMAL_FOLDER_TEMPLATE: u32 = 0xA1;
    pub const SEARCH_FOLDER_TEMPLATE: u32 = 0xC1;
    pub const ROOT_FOLDER: u32 = 0x122;
    pub const SEARCH_MANAGEMENT_QUEUE: u32 = 0x1E1;
}

/// [`NID`](https://learn.microsoft.com/en-us/openspecs/office_file_formats/ms-pst/590d5943-9bea-49b7-a04e-b1b8a8a2fba3):
/// a 32-bit node identifier. Low 5 bits are the [`NodeIdType`], the remaining 27 bits are the index.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Debug)]
pub struct NodeId(u32);

impl NodeId {
    pub fn new(id_type: NodeIdType, index: u32) -> Result<Self, NdbError> {
        if index.rotate_left(5) & 0x1F != 0 {
            return Err(NdbError::InvalidNodeIndex(index));
        }
        Ok(Self((index << 5) | u32::from(id_type as u8)))
    }

    pub fn id_type(&self) -> Result<NodeIdType, NdbError> {
        NodeIdType::try_from((self.0 & 0x1F) as u8)
    }

    pub fn index(&self) -> u32 {
        self.0 >> 5
    }

    pub fn read(f: &mut dyn Read) -> io::Result<Self> {
        Ok(Self(f.read_u32::<LittleEndian>()?))
    }

    pub fn write(&self, f: &mut dyn Write) -> io::Result<()> {
        f.write_u32::<LittleEndian>(self.0)
    }
}

impl From<u32> for NodeId {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

impl From<NodeId> for u32 {
    fn from(value: NodeId) -> Self {
        value.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_well_known() {
        assert_eq!(
            NodeId::from(well_known::MESSAGE_STORE).id_type().unwrap() as u8,
            NodeIdType::Internal as u8
        );
        assert_eq!(
            NodeId::from(well_known::ROOT_FOLDER).id_type().unwrap() as u8,
            NodeIdType::NormalFolder as u8
        );
    }

    #[test]
    fn test_roundtrip() {
        let nid = NodeId::new(NodeIdType::NormalMessage, 0x1234).unwrap();
        assert_eq!(nid.id_type().unwrap() as u8, NodeIdType::NormalMessage as u8);
        assert_eq!(nid.index(), 0x1234);
    }
}
