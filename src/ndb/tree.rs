//! ## Node / Block B-Trees (C3)
//!
//! The two file-wide persistent B-trees. Both are walked eagerly at load time, breadth-first
//! from the root `BREF`, into a flat in-memory leaf index — callers never re-walk the on-disk
//! page chain.

use std::collections::VecDeque;
use tracing::instrument;

use super::block_ref::BlockRef;
use super::node_id::NodeId;
use super::page::{BTreePage, BbtEntry, NbtEntry, PageType};
use super::{NdbError, NdbResult};
use crate::pager::Pager;

/// The eagerly-materialized Node B-Tree.
pub struct NodeBTree {
    entries: Vec<NbtEntry>,
}

impl NodeBTree {
    #[instrument(skip(pager), err)]
    pub fn load(pager: &Pager, root: BlockRef) -> NdbResult<Self> {
        let entries = walk(pager, root, PageType::NodeBTree)?.node_leaves;
        Ok(Self { entries })
    }

    /// `nbt.get(nid) -> NBTEntry`.
    pub fn get(&self, nid: NodeId) -> NdbResult<&NbtEntry> {
        self.entries
            .iter()
            .find(|e| e.node == nid)
            .ok_or(NdbError::NodeNotFound(u32::from(nid)))
    }

    /// `nbt.all(index) -> { NIDType -> NBTEntry }`: every leaf whose nid-index matches, e.g.
    /// the four-part folder lookup (NormalFolder/HierarchyTable/ContentsTable/AssocContentsTable
    /// sharing one index). Errors if two entries share a type.
    pub fn all_with_index(&self, index: u32) -> NdbResult<Vec<&NbtEntry>> {
        let mut found = Vec::new();
        let mut seen_types = Vec::new();
        for entry in &self.entries {
            if entry.node.index() != index {
                continue;
            }
            let ty = entry.node.id_type()?;
            let ty_raw = ty as u8;
            if seen_types.contains(&ty_raw) {
                return Err(NdbError::DuplicateWellKnownNid(u32::from(entry.node)));
            }
            seen_types.push(ty_raw);
            found.push(entry);
        }
        Ok(found)
    }

    pub fn count(&self) -> usize {
        self.entries.len()
    }

    pub fn count_with_raw(&self, raw_nid: u32) -> usize {
        self.entries
            .iter()
            .filter(|e| u32::from(e.node) == raw_nid)
            .count()
    }
}

/// The eagerly-materialized Block B-Tree.
pub struct BlockBTree {
    entries: Vec<BbtEntry>,
}

impl BlockBTree {
    #[instrument(skip(pager), err)]
    pub fn load(pager: &Pager, root: BlockRef) -> NdbResult<Self> {
        let entries = walk(pager, root, PageType::BlockBTree)?.block_leaves;
        Ok(Self { entries })
    }

    /// `bbt.get(bid) -> BBTEntry`.
    pub fn get(&self, bid: super::BlockId) -> NdbResult<&BbtEntry> {
        self.entries
            .iter()
            .find(|e| e.block.block() == bid)
            .ok_or(NdbError::BlockNotFound(u64::from(bid)))
    }

    pub fn count(&self) -> usize {
        self.entries.len()
    }
}

#[derive(Default)]
struct Leaves {
    node_leaves: Vec<NbtEntry>,
    block_leaves: Vec<BbtEntry>,
}

/// Breadth-first traversal from `root`, validating level monotonicity and page-type
/// consistency at every step, collecting every leaf page's entries.
fn walk(pager: &Pager, root: BlockRef, expected_type: PageType) -> NdbResult<Leaves> {
    let mut leaves = Leaves::default();
    let mut queue = VecDeque::new();
    queue.push_back((root, None::<u8>));

    while let Some((bref, parent_level)) = queue.pop_front() {
        let bytes = pager
            .read_page(bref.index().value())
            .map_err(|_| NdbError::BlockNotFound(u64::from(bref.block())))?;
        let (page, trailer) = BTreePage::read(bref.index(), &bytes)?;

        if trailer.page_type() != expected_type {
            return Err(NdbError::UnexpectedPageType(trailer.page_type()));
        }

        match page {
            BTreePage::Interior { level, entries } => {
                if let Some(parent_level) = parent_level {
                    if level + 1 != parent_level {
                        return Err(NdbError::InvalidBTreeLevelMismatch(parent_level, level));
                    }
                }
                if level == 0 {
                    return Err(NdbError::InvalidBTreePageLevel(level));
                }
                for entry in entries {
                    queue.push_back((entry.child, Some(level)));
                }
            }
            BTreePage::NodeLeaf(entries) => {
                if let Some(parent_level) = parent_level {
                    if parent_level != 1 {
                        return Err(NdbError::InvalidBTreeLevelMismatch(parent_level, 0));
                    }
                }
                leaves.node_leaves.extend(entries);
            }
            BTreePage::BlockLeaf(entries) => {
                if let Some(parent_level) = parent_level {
                    if parent_level != 1 {
                        return Err(NdbError::InvalidBTreeLevelMismatch(parent_level, 0));
                    }
                }
                leaves.block_leaves.extend(entries);
            }
        }
    }

    Ok(leaves)
}
