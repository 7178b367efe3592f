//! Persistent records of the tree: nodes, the root and payload references.
//!
//! Nodes and the root are bincode-encoded into pool records. A node record is
//! allocated with room for `order` items, so it is rewritten in place for the
//! whole life of the node.

use serde::{Deserialize, Serialize};

use crate::errors::{EvtError, EvtResult};
use crate::rect::EvtRect;
use crate::umem::Tmmid;

// ============================================================================
// Payload references
// ============================================================================

/// Weak reference to extent data owned outside the tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct EvtPtr {
    /// Opaque address or cookie of the data buffer
    pub addr: u64,
    /// Bytes per offset unit
    pub inob: u32,
    /// First offset unit of the referenced range inside the buffer
    pub index: u64,
}

impl EvtPtr {
    pub fn new(addr: u64, inob: u32, index: u64) -> EvtPtr {
        EvtPtr { addr, inob, index }
    }

    /// Byte position of `index` inside the buffer.
    pub fn byte_offset(&self) -> u64 {
        self.index * self.inob as u64
    }
}

/// A leaf item: rectangle plus payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvtLeafEntry {
    pub rect: EvtRect,
    pub ptr: EvtPtr,
}

/// A found entry.
///
/// `sel` is the part of `rect` selected by the query offsets and `ptr` points
/// at the first unit of that selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EvtEntry {
    pub rect: EvtRect,
    pub sel: EvtRect,
    pub ptr: EvtPtr,
}

impl EvtEntry {
    /// Builds the found entry of `leaf` for a query over `query`'s offsets.
    pub fn fill(leaf: &EvtLeafEntry, query: &EvtRect) -> EvtEntry {
        let sel = leaf.rect.clip_offsets(query).unwrap_or(leaf.rect);
        let mut ptr = leaf.ptr;
        ptr.index += sel.off_lo - leaf.rect.off_lo;
        EvtEntry {
            rect: leaf.rect,
            sel,
            ptr,
        }
    }

    pub fn leaf(&self) -> EvtLeafEntry {
        let mut ptr = self.ptr;
        ptr.index -= self.sel.off_lo - self.rect.off_lo;
        EvtLeafEntry {
            rect: self.rect,
            ptr,
        }
    }
}

// ============================================================================
// Nodes
// ============================================================================

pub const EVT_NODE_LEAF: u16 = 1 << 0;
pub const EVT_NODE_ROOT: u16 = 1 << 1;

pub type NodeMmid = Tmmid<EvtNode>;

/// An internal item: bounding rectangle of a subtree plus its node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvtChildRef {
    pub mbr: EvtRect,
    pub child: NodeMmid,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EvtNodeBody {
    Leaf(Vec<EvtLeafEntry>),
    Internal(Vec<EvtChildRef>),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvtNode {
    pub flags: u16,
    pub body: EvtNodeBody,
}

/// Record size reserved for a node of the given order.
pub fn node_alloc_size(order: u16) -> usize {
    64 + order as usize * 64
}

impl EvtNode {
    pub fn new_leaf(entries: Vec<EvtLeafEntry>) -> EvtNode {
        EvtNode {
            flags: EVT_NODE_LEAF,
            body: EvtNodeBody::Leaf(entries),
        }
    }

    pub fn new_internal(children: Vec<EvtChildRef>) -> EvtNode {
        EvtNode {
            flags: 0,
            body: EvtNodeBody::Internal(children),
        }
    }

    pub fn is_leaf(&self) -> bool {
        matches!(self.body, EvtNodeBody::Leaf(_))
    }

    pub fn is_root(&self) -> bool {
        self.flags & EVT_NODE_ROOT != 0
    }

    pub fn set_root(&mut self, root: bool) {
        if root {
            self.flags |= EVT_NODE_ROOT;
        } else {
            self.flags &= !EVT_NODE_ROOT;
        }
    }

    pub fn count(&self) -> usize {
        match &self.body {
            EvtNodeBody::Leaf(entries) => entries.len(),
            EvtNodeBody::Internal(children) => children.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.count() == 0
    }

    fn out_of_range(&self, at: usize) -> EvtError {
        EvtError::Corrupted(format!(
            "position {} out of range in node of {} items",
            at,
            self.count()
        ))
    }

    /// Rectangle of a leaf entry, or bounding rectangle of a child.
    pub fn rect_at(&self, at: usize) -> EvtResult<EvtRect> {
        let rect = match &self.body {
            EvtNodeBody::Leaf(entries) => entries.get(at).map(|e| e.rect),
            EvtNodeBody::Internal(children) => children.get(at).map(|c| c.mbr),
        };
        rect.ok_or_else(|| self.out_of_range(at))
    }

    pub fn set_rect_at(&mut self, at: usize, rect: EvtRect) -> EvtResult<()> {
        if at >= self.count() {
            return Err(self.out_of_range(at));
        }
        match &mut self.body {
            EvtNodeBody::Leaf(entries) => entries[at].rect = rect,
            EvtNodeBody::Internal(children) => children[at].mbr = rect,
        }
        Ok(())
    }

    pub fn child_at(&self, at: usize) -> EvtResult<NodeMmid> {
        match &self.body {
            EvtNodeBody::Internal(children) => children
                .get(at)
                .map(|c| c.child)
                .ok_or_else(|| self.out_of_range(at)),
            EvtNodeBody::Leaf(_) => Err(EvtError::Corrupted("child of a leaf node".into())),
        }
    }

    pub fn entry_at(&self, at: usize) -> EvtResult<&EvtLeafEntry> {
        match &self.body {
            EvtNodeBody::Leaf(entries) => entries.get(at).ok_or_else(|| self.out_of_range(at)),
            EvtNodeBody::Internal(_) => {
                Err(EvtError::Corrupted("entry of an internal node".into()))
            }
        }
    }

    pub fn entry_at_mut(&mut self, at: usize) -> EvtResult<&mut EvtLeafEntry> {
        if at >= self.count() {
            return Err(self.out_of_range(at));
        }
        match &mut self.body {
            EvtNodeBody::Leaf(entries) => Ok(&mut entries[at]),
            EvtNodeBody::Internal(_) => {
                Err(EvtError::Corrupted("entry of an internal node".into()))
            }
        }
    }

    pub fn ptr_at(&self, at: usize) -> EvtResult<EvtPtr> {
        self.entry_at(at).map(|e| e.ptr)
    }

    /// Rectangles of every item in stored order.
    pub fn rects(&self) -> Vec<EvtRect> {
        match &self.body {
            EvtNodeBody::Leaf(entries) => entries.iter().map(|e| e.rect).collect(),
            EvtNodeBody::Internal(children) => children.iter().map(|c| c.mbr).collect(),
        }
    }

    /// Minimal rectangle containing every item, `None` for an empty node.
    pub fn mbr(&self) -> Option<EvtRect> {
        match &self.body {
            EvtNodeBody::Leaf(entries) => EvtRect::bounding(entries.iter().map(|e| &e.rect)),
            EvtNodeBody::Internal(children) => {
                EvtRect::bounding(children.iter().map(|c| &c.mbr))
            }
        }
    }

    pub fn insert_entry(&mut self, at: usize, entry: EvtLeafEntry) -> EvtResult<()> {
        if at > self.count() {
            return Err(self.out_of_range(at));
        }
        match &mut self.body {
            EvtNodeBody::Leaf(entries) => {
                entries.insert(at, entry);
                Ok(())
            }
            EvtNodeBody::Internal(_) => {
                Err(EvtError::Corrupted("entry insert into an internal node".into()))
            }
        }
    }

    pub fn insert_child(&mut self, at: usize, child: EvtChildRef) -> EvtResult<()> {
        if at > self.count() {
            return Err(self.out_of_range(at));
        }
        match &mut self.body {
            EvtNodeBody::Internal(children) => {
                children.insert(at, child);
                Ok(())
            }
            EvtNodeBody::Leaf(_) => Err(EvtError::Corrupted("child insert into a leaf".into())),
        }
    }

    pub fn remove_at(&mut self, at: usize) -> EvtResult<()> {
        if at >= self.count() {
            return Err(self.out_of_range(at));
        }
        match &mut self.body {
            EvtNodeBody::Leaf(entries) => {
                entries.remove(at);
            }
            EvtNodeBody::Internal(children) => {
                children.remove(at);
            }
        }
        Ok(())
    }

    /// Moves the items at `moved` into a new sibling node and returns it.
    ///
    /// Both nodes keep the relative order of their items. The sibling never
    /// carries the root flag.
    pub fn split_off(&mut self, moved: &[usize]) -> EvtResult<EvtNode> {
        let count = self.count();
        let mut take = vec![false; count];
        for &at in moved {
            if at >= count || take[at] {
                return Err(EvtError::Corrupted(format!(
                    "invalid split position {} in node of {} items",
                    at, count
                )));
            }
            take[at] = true;
        }
        if moved.is_empty() || moved.len() == count {
            return Err(EvtError::Corrupted(
                "split must leave items on both sides".into(),
            ));
        }

        let body = match &mut self.body {
            EvtNodeBody::Leaf(entries) => {
                EvtNodeBody::Leaf(partition(entries, &take))
            }
            EvtNodeBody::Internal(children) => {
                EvtNodeBody::Internal(partition(children, &take))
            }
        };
        Ok(EvtNode {
            flags: self.flags & !EVT_NODE_ROOT,
            body,
        })
    }
}

fn partition<T>(items: &mut Vec<T>, take: &[bool]) -> Vec<T> {
    let mut kept = Vec::with_capacity(items.len());
    let mut moved = Vec::new();
    for (item, &take) in items.drain(..).zip(take) {
        if take {
            moved.push(item);
        } else {
            kept.push(item);
        }
    }
    *items = kept;
    moved
}

// ============================================================================
// Root
// ============================================================================

/// Persistent anchor of a tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvtRoot {
    /// Top node, NULL for an empty tree
    pub node: NodeMmid,
    /// Node levels: 0 when empty, 1 for a lone leaf
    pub depth: u16,
    pub order: u16,
    pub feats: u64,
}

pub type RootMmid = Tmmid<EvtRoot>;

pub const ROOT_ALLOC_SIZE: usize = 64;

impl EvtRoot {
    pub fn new(order: u16, feats: u64) -> EvtRoot {
        EvtRoot {
            node: NodeMmid::NULL,
            depth: 0,
            order,
            feats,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.node.is_null()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::EVT_ORDER_MAX;
    use crate::umem::encode;

    fn leaf_entry(off: u64, epoch: u64) -> EvtLeafEntry {
        EvtLeafEntry {
            rect: EvtRect::at_epoch(off, off + 9, epoch),
            ptr: EvtPtr::new(off, 1, 0),
        }
    }

    #[test]
    fn test_leaf_accessors() {
        let node = EvtNode::new_leaf(vec![leaf_entry(0, 1), leaf_entry(20, 2)]);
        assert!(node.is_leaf());
        assert!(!node.is_root());
        assert_eq!(node.count(), 2);
        assert_eq!(node.rect_at(1).unwrap(), EvtRect::at_epoch(20, 29, 2));
        assert_eq!(node.ptr_at(1).unwrap().addr, 20);
        assert!(node.rect_at(2).is_err());
        assert!(node.child_at(0).is_err());
        assert_eq!(node.mbr(), Some(EvtRect::new(0, 29, 1, 2)));
    }

    #[test]
    fn test_internal_accessors() {
        let mut node = EvtNode::new_internal(vec![EvtChildRef {
            mbr: EvtRect::at_epoch(0, 9, 1),
            child: NodeMmid::from_raw(5),
        }]);
        node.set_root(true);
        assert!(node.is_root());
        assert!(!node.is_leaf());
        assert_eq!(node.child_at(0).unwrap(), NodeMmid::from_raw(5));
        assert!(node.entry_at(0).is_err());

        node.insert_child(
            1,
            EvtChildRef {
                mbr: EvtRect::at_epoch(50, 59, 3),
                child: NodeMmid::from_raw(6),
            },
        )
        .unwrap();
        node.set_rect_at(0, EvtRect::at_epoch(0, 19, 1)).unwrap();
        assert_eq!(node.mbr(), Some(EvtRect::new(0, 59, 1, 3)));
        node.remove_at(0).unwrap();
        assert_eq!(node.child_at(0).unwrap(), NodeMmid::from_raw(6));
    }

    #[test]
    fn test_split_off_keeps_order() {
        let mut node = EvtNode::new_leaf((0..6).map(|i| leaf_entry(i * 10, 1)).collect());
        node.set_root(true);
        let sibling = node.split_off(&[1, 3, 5]).unwrap();

        assert!(node.is_root());
        assert!(!sibling.is_root());
        assert!(sibling.is_leaf());
        let offsets = |n: &EvtNode| n.rects().iter().map(|r| r.off_lo).collect::<Vec<_>>();
        assert_eq!(offsets(&node), vec![0, 20, 40]);
        assert_eq!(offsets(&sibling), vec![10, 30, 50]);
    }

    #[test]
    fn test_split_off_rejects_bad_sets() {
        let mut node = EvtNode::new_leaf((0..4).map(|i| leaf_entry(i * 10, 1)).collect());
        assert!(node.split_off(&[]).is_err());
        assert!(node.split_off(&[0, 1, 2, 3]).is_err());
        assert!(node.split_off(&[7]).is_err());
        assert!(node.split_off(&[1, 1]).is_err());
        assert_eq!(node.count(), 4);
    }

    #[test]
    fn test_full_node_fits_reserved_size() {
        let order = EVT_ORDER_MAX;
        let leaf = EvtNode::new_leaf(
            (0..order as u64)
                .map(|i| EvtLeafEntry {
                    rect: EvtRect::new(u64::MAX - i, u64::MAX, i, u64::MAX),
                    ptr: EvtPtr::new(u64::MAX, u32::MAX, u64::MAX),
                })
                .collect(),
        );
        assert!(encode(&leaf).unwrap().len() <= node_alloc_size(order));

        let internal = EvtNode::new_internal(
            (0..order as u64)
                .map(|i| EvtChildRef {
                    mbr: EvtRect::new(i, u64::MAX, i, u64::MAX),
                    child: NodeMmid::from_raw(u64::MAX),
                })
                .collect(),
        );
        assert!(encode(&internal).unwrap().len() <= node_alloc_size(order));
    }

    #[test]
    fn test_fill_entry_adjusts_payload() {
        let leaf = EvtLeafEntry {
            rect: EvtRect::at_epoch(100, 199, 4),
            ptr: EvtPtr::new(0xabc, 512, 7),
        };
        let found = EvtEntry::fill(&leaf, &EvtRect::at_epoch(150, 300, 9));
        assert_eq!(found.sel, EvtRect::at_epoch(150, 199, 4));
        assert_eq!(found.ptr.index, 57);
        assert_eq!(found.ptr.byte_offset(), 57 * 512);
        assert_eq!(found.leaf(), leaf);

        let whole = EvtEntry::fill(&leaf, &leaf.rect);
        assert_eq!(whole.sel, leaf.rect);
        assert_eq!(whole.ptr, leaf.ptr);
    }

    #[test]
    fn test_root_record() {
        let root = EvtRoot::new(16, 1);
        assert!(root.is_empty());
        assert_eq!(root.depth, 0);
        assert!(encode(&root).unwrap().len() <= ROOT_ALLOC_SIZE);
    }
}
