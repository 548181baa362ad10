//! ## Reader façade (C10)
//!
//! The sole entry point a caller constructs directly. Owns the open file's [`Pager`], its
//! parsed [`Header`], and the eagerly-built [`NodeBTree`]/[`BlockBTree`] indices, and performs
//! the header-adjacent well-known-node cardinality checks that the NDB layer itself has no
//! occasion to run (they span multiple NBT leaves, not a single page or block).

use std::path::Path;
use tracing::instrument;

use crate::ndb::node_id::well_known;
use crate::ndb::page::{BbtEntry, NbtEntry};
use crate::ndb::tree::{BlockBTree, NodeBTree};
use crate::ndb::{BlockId, Header, NdbError, NodeId};
use crate::pager::Pager;
use crate::PstError;

/// An open, validated Unicode PST file: the header plus both file-wide B-trees.
pub struct Reader {
    pager: Pager,
    header: Header,
    nbt: NodeBTree,
    bbt: BlockBTree,
}

impl Reader {
    /// Open `path`, parse its header, and eagerly build the node and block B-trees.
    ///
    /// Additionally enforces the well-known-node cardinality rules implied by the header's
    /// `rgnid` slots: exactly one `MESSAGE_STORE` and one `ROOT_FOLDER`, at most one each of
    /// `NAME_TO_ID_MAP`, `NORMAL_FOLDER_TEMPLATE`, `SEARCH_FOLDER_TEMPLATE` and
    /// `SEARCH_MANAGEMENT_QUEUE`.
    #[instrument(skip_all, err)]
    pub fn open(path: impl AsRef<Path>) -> Result<Self, PstError> {
        let pager = Pager::open(path)?;
        let header_bytes = pager.read_block_range(0, 564)?;
        let header = Header::read(&mut &header_bytes[..])?;

        let nbt = NodeBTree::load(&pager, header.root().bref_nbt())?;
        let bbt = BlockBTree::load(&pager, header.root().bref_bbt())?;

        require_exactly_one(&nbt, well_known::MESSAGE_STORE)?;
        require_exactly_one(&nbt, well_known::ROOT_FOLDER)?;
        require_at_most_one(&nbt, well_known::NAME_TO_ID_MAP)?;
        require_at_most_one(&nbt, well_known::NORMAL_FOLDER_TEMPLATE)?;
        require_at_most_one(&nbt, well_known::SEARCH_FOLDER_TEMPLATE)?;
        require_at_most_one(&nbt, well_known::SEARCH_MANAGEMENT_QUEUE)?;

        Ok(Self {
            pager,
            header,
            nbt,
            bbt,
        })
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    pub(crate) fn pager(&self) -> &Pager {
        &self.pager
    }

    pub(crate) fn bbt(&self) -> &BlockBTree {
        &self.bbt
    }

    pub fn nbt_get(&self, nid: NodeId) -> Result<&NbtEntry, PstError> {
        Ok(self.nbt.get(nid)?)
    }

    pub fn bbt_get(&self, bid: BlockId) -> Result<&BbtEntry, PstError> {
        Ok(self.bbt.get(bid)?)
    }

    /// `reader.data_tree(bref, cb) -> DataTree`: resolve a data stream given its `BBTEntry`'s
    /// `(BREF, cb)` directly, without a further B-tree lookup.
    pub fn data_tree(
        &self,
        bref: crate::ndb::BlockRef,
        cb: u16,
    ) -> Result<crate::ndb::block::DataTree, PstError> {
        Ok(crate::ndb::block::DataTree::load(
            &self.pager, &self.bbt, bref, cb,
        )?)
    }

    /// `reader.sub_node_tree(bid) -> SubNodeBTree`.
    pub fn sub_node_tree(&self, bid: BlockId) -> Result<crate::ndb::subnode::SubNodeBTree, PstError> {
        Ok(crate::ndb::subnode::SubNodeBTree::load(
            &self.pager, &self.bbt, bid,
        )?)
    }
}

fn require_exactly_one(nbt: &NodeBTree, raw_nid: u32) -> Result<(), PstError> {
    match nbt.count_with_raw(raw_nid) {
        0 => Err(NdbError::MissingWellKnownNid(raw_nid).into()),
        1 => Ok(()),
        _ => Err(NdbError::DuplicateWellKnownNid(raw_nid).into()),
    }
}

fn require_at_most_one(nbt: &NodeBTree, raw_nid: u32) -> Result<(), PstError> {
    let count = nbt.count_with_raw(raw_nid);
    if count > 1 {
        return Err(NdbError::DuplicateWellKnownNid(raw_nid).into());
    }
    Ok(())
}
