//! # outlook-pst-reader
//!
//! A read-only parser for the Unicode (2.0) variant of the Microsoft Outlook PST file format.
//!
//! Layered the way [MS-PST](https://learn.microsoft.com/en-us/openspecs/office_file_formats/ms-pst/141923d5-15ab-4ef1-a524-6dce75aae546)
//! itself is layered: the [`ndb`] module implements the Node Database layer (header, the two
//! file-wide B-trees, data trees, sub-node trees), and the [`ltp`] module implements Lists,
//! Tables and Properties on top of it (the heap allocator, BTree-on-Heap, PropertyContext,
//! TableContext). [`Reader`] is the single entry point tying both layers together.
//!
//! Out of scope: writing or modifying PST files, the deprecated ANSI (32-bit) format, cyclic
//! (WIP) encoding, and search folders.

mod block_sig;
mod crc;
mod encode;
mod error;
pub mod ltp;
pub mod ndb;
mod pager;
mod reader;

pub use error::{ErrorKind, PstError};
pub use ltp::prop_context::{GuidValue, ObjectValue, PropertyContext, PropertyValue};
pub use ltp::table_context::{PropertyValueCell, TableColumnDescriptor, TableContext, TableContextInfo};
pub use ndb::block::DataTree;
pub use ndb::block_id::BlockId;
pub use ndb::block_ref::BlockRef;
pub use ndb::node_id::{well_known, NodeId, NodeIdType};
pub use ndb::subnode::SubNodeBTree;
pub use ndb::{Header, NdbError};
pub use pager::Pager;
pub use reader::Reader;
