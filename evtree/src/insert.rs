//! Insertion with capping, and deletion.
//!
//! An insert first classifies the new rectangle against every overlapping
//! entry. A newer extent covering the new one makes the insert a no-op, an
//! identical or same-generation extent is updated in place, and older extents
//! the new one fully covers are removed. Only then is the new entry placed,
//! splitting nodes up to the root as needed. Everything runs inside one pool
//! transaction.

use crate::constants::EVT_TRACE_MAX;
use crate::errors::{EvtError, EvtResult};
use crate::node::{EvtChildRef, EvtEntry, EvtLeafEntry, EvtNode, EvtPtr, NodeMmid};
use crate::rect::{classify, classify_mbr, EvtRect, OverlapKind};
use crate::search::{descend, locate, trace_walk, Walk};
use crate::tcx::{EvtContext, TcxState};

/// What an insert did to the tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InsertOutcome {
    /// A new entry was added.
    Inserted { removed: Vec<EvtLeafEntry> },
    /// An identical rectangle existed, its payload was replaced.
    Replaced { removed: Vec<EvtLeafEntry> },
    /// An entry of the same offsets and start epoch took the new rectangle.
    Updated { removed: Vec<EvtLeafEntry> },
    /// A newer extent already covers the rectangle, nothing changed.
    Capped,
}

impl InsertOutcome {
    /// Older entries the insert shadowed and removed.
    pub fn removed(&self) -> &[EvtLeafEntry] {
        match self {
            InsertOutcome::Inserted { removed }
            | InsertOutcome::Replaced { removed }
            | InsertOutcome::Updated { removed } => removed,
            InsertOutcome::Capped => &[],
        }
    }

    pub fn is_capped(&self) -> bool {
        matches!(self, InsertOutcome::Capped)
    }
}

impl EvtContext {
    /// Inserts `rect` referencing `ptr`, applying the capping rules.
    pub fn insert(&self, rect: &EvtRect, ptr: EvtPtr) -> EvtResult<InsertOutcome> {
        rect.validate()?;
        self.with_state(|state| {
            state.invalidate_iter();
            self.umem()
                .with_tx("insert", || insert_in(self, state, rect, ptr))
        })
    }

    /// Removes the entry whose rectangle equals `rect`.
    pub fn delete(&self, rect: &EvtRect) -> EvtResult<Option<EvtEntry>> {
        rect.validate()?;
        self.with_state(|state| {
            state.invalidate_iter();
            self.umem().with_tx("delete", || {
                self.refresh(state)?;
                let removed = remove_exact(self, state, rect)?;
                Ok(removed.map(|leaf| EvtEntry::fill(&leaf, rect)))
            })
        })
    }
}

fn insert_in(
    tcx: &EvtContext,
    state: &mut TcxState,
    rect: &EvtRect,
    ptr: EvtPtr,
) -> EvtResult<InsertOutcome> {
    tcx.refresh(state)?;
    let entry = EvtLeafEntry { rect: *rect, ptr };
    if state.depth == 0 {
        insert_entry(tcx, state, entry)?;
        return Ok(InsertOutcome::Inserted {
            removed: Vec::new(),
        });
    }

    let mut overlaps: Vec<(EvtLeafEntry, OverlapKind)> = Vec::new();
    trace_walk(
        tcx,
        state,
        |mbr| classify_mbr(mbr, rect),
        |existing| {
            let kind = classify(&existing.rect, rect);
            match kind {
                OverlapKind::No => Ok(Walk::Continue),
                OverlapKind::Capped => {
                    overlaps.push((*existing, kind));
                    Ok(Walk::Stop)
                }
                _ => {
                    overlaps.push((*existing, kind));
                    Ok(Walk::Continue)
                }
            }
        },
    )?;

    if overlaps.iter().any(|(_, kind)| *kind == OverlapKind::Capped) {
        log::debug!("Insert of {} is capped by a newer extent", rect);
        return Ok(InsertOutcome::Capped);
    }

    let mut removed = Vec::new();
    for (existing, _) in overlaps
        .iter()
        .filter(|(_, kind)| *kind == OverlapKind::Capping)
    {
        if let Some(leaf) = remove_exact(tcx, state, &existing.rect)? {
            removed.push(leaf);
        }
    }

    let in_place = |wanted: OverlapKind| {
        overlaps
            .iter()
            .find(|(_, kind)| *kind == wanted)
            .map(|(existing, _)| existing.rect)
    };
    if let Some(old) = in_place(OverlapKind::Same) {
        update_exact(tcx, state, &old, entry)?;
        return Ok(InsertOutcome::Replaced { removed });
    }
    if let Some(old) = in_place(OverlapKind::Inplace) {
        update_exact(tcx, state, &old, entry)?;
        return Ok(InsertOutcome::Updated { removed });
    }

    insert_entry(tcx, state, entry)?;
    Ok(InsertOutcome::Inserted { removed })
}

/// Gives an empty tree its first node, a leaf that is also the root.
fn root_activate(tcx: &EvtContext, state: &mut TcxState, entry: EvtLeafEntry) -> EvtResult<()> {
    let mut leaf = EvtNode::new_leaf(vec![entry]);
    leaf.set_root(true);
    let mmid = tcx.alloc_node(state, &leaf)?;

    let mut root = tcx.load_root()?;
    root.node = mmid;
    root.depth = 1;
    tcx.store_root(state, &root)?;
    log::debug!("Activated root {:?} of tree {:?}", mmid, tcx.root_mmid());
    Ok(())
}

fn mbr_of(node: &EvtNode, mmid: NodeMmid) -> EvtResult<EvtRect> {
    node.mbr()
        .ok_or_else(|| EvtError::Corrupted(format!("empty node {:?}", mmid)))
}

/// Restores the bounding rectangles above `level` after its node changed to
/// cover `mbr`.
fn propagate(tcx: &EvtContext, state: &TcxState, level: usize, mbr: EvtRect) -> EvtResult<()> {
    let mut mbr = mbr;
    for parent_level in (0..level).rev() {
        let trace = *state.trace.get(parent_level);
        let mut parent = tcx.read_node(trace.node)?;
        if parent.rect_at(trace.at())? == mbr {
            break;
        }
        parent.set_rect_at(trace.at(), mbr)?;
        tcx.write_node(trace.node, &parent)?;
        mbr = mbr_of(&parent, trace.node)?;
    }
    Ok(())
}

/// Rewrites the entry with rectangle `old` as `entry`.
fn update_exact(
    tcx: &EvtContext,
    state: &mut TcxState,
    old: &EvtRect,
    entry: EvtLeafEntry,
) -> EvtResult<()> {
    if locate(tcx, state, old)?.is_none() {
        return Err(EvtError::NotFound);
    }
    let level = state.trace.depth() - 1;
    let trace = *state.trace.get(level);
    let mut node = tcx.read_node(trace.node)?;
    *node.entry_at_mut(trace.at())? = entry;
    tcx.write_node(trace.node, &node)?;
    propagate(tcx, state, level, mbr_of(&node, trace.node)?)
}

/// Places a new entry at the leaf chosen by `descend`, splitting on overflow.
///
/// The capping pass may have emptied the tree, in which case the entry
/// becomes the new root.
fn insert_entry(tcx: &EvtContext, state: &mut TcxState, entry: EvtLeafEntry) -> EvtResult<()> {
    if state.depth == 0 {
        return root_activate(tcx, state, entry);
    }
    descend(tcx, state, &entry.rect)?;
    let depth = state.trace.depth();
    let order = state.order as usize;

    let mut level = depth - 1;
    let leaf = *state.trace.get(level);
    let mut node = tcx.read_node(leaf.node)?;
    node.insert_entry(leaf.at(), entry)?;

    loop {
        let mmid = state.trace.get(level).node;
        if node.count() <= order {
            tcx.write_node(mmid, &node)?;
            return propagate(tcx, state, level, mbr_of(&node, mmid)?);
        }

        let split = tcx.policy().split(&node.rects());
        if split.keep.len() + split.moved.len() != node.count() {
            return Err(EvtError::Corrupted(format!(
                "policy {} split {} items into {} + {}",
                tcx.policy().name(),
                node.count(),
                split.keep.len(),
                split.moved.len()
            )));
        }
        let sibling = node.split_off(&split.moved)?;
        let node_mbr = mbr_of(&node, mmid)?;
        let sibling_mbr = sibling
            .mbr()
            .ok_or_else(|| EvtError::Corrupted("empty split sibling".into()))?;

        if level == 0 {
            let new_depth = depth + 1;
            if new_depth > EVT_TRACE_MAX {
                log::error!("Root split would grow the tree past {} levels", EVT_TRACE_MAX);
                return Err(EvtError::Overflow(new_depth));
            }
            node.set_root(false);
            let sibling_mmid = tcx.alloc_node(state, &sibling)?;
            tcx.write_node(mmid, &node)?;

            let mut top = EvtNode::new_internal(vec![
                EvtChildRef {
                    mbr: node_mbr,
                    child: mmid,
                },
                EvtChildRef {
                    mbr: sibling_mbr,
                    child: sibling_mmid,
                },
            ]);
            top.set_root(true);
            let top_mmid = tcx.alloc_node(state, &top)?;

            let mut root = tcx.load_root()?;
            root.node = top_mmid;
            root.depth = new_depth as u16;
            tcx.store_root(state, &root)?;
            log::debug!("Root split, tree depth is now {}", new_depth);
            return Ok(());
        }

        let sibling_mmid = tcx.alloc_node(state, &sibling)?;
        tcx.write_node(mmid, &node)?;
        log::debug!(
            "Split node {:?} at level {} into {} + {} items",
            mmid,
            level,
            node.count(),
            sibling.count()
        );

        level -= 1;
        let trace = *state.trace.get(level);
        let mut parent = tcx.read_node(trace.node)?;
        parent.set_rect_at(trace.at(), node_mbr)?;
        let at = tcx.policy().insert_at(&parent.rects(), &sibling_mbr);
        parent.insert_child(
            at,
            EvtChildRef {
                mbr: sibling_mbr,
                child: sibling_mmid,
            },
        )?;
        node = parent;
    }
}

/// Removes the entry whose rectangle equals `rect`, if present.
pub(crate) fn remove_exact(
    tcx: &EvtContext,
    state: &mut TcxState,
    rect: &EvtRect,
) -> EvtResult<Option<EvtLeafEntry>> {
    match locate(tcx, state, rect)? {
        Some(_) => delete_at_trace(tcx, state).map(Some),
        None => Ok(None),
    }
}

/// Removes the entry under the trace, freeing nodes left empty and
/// shrinking the tree from the top.
fn delete_at_trace(tcx: &EvtContext, state: &mut TcxState) -> EvtResult<EvtLeafEntry> {
    let mut level = state.trace.depth() - 1;
    let leaf = *state.trace.get(level);
    let mut node = tcx.read_node(leaf.node)?;
    let removed = *node.entry_at(leaf.at())?;
    node.remove_at(leaf.at())?;

    loop {
        let mmid = state.trace.get(level).node;
        if !node.is_empty() {
            tcx.write_node(mmid, &node)?;
            propagate(tcx, state, level, mbr_of(&node, mmid)?)?;
            break;
        }

        tcx.free_node(mmid)?;
        if level == 0 {
            let mut root = tcx.load_root()?;
            root.node = NodeMmid::NULL;
            root.depth = 0;
            tcx.store_root(state, &root)?;
            log::debug!("Tree {:?} is empty", tcx.root_mmid());
            return Ok(removed);
        }
        level -= 1;
        let trace = *state.trace.get(level);
        node = tcx.read_node(trace.node)?;
        node.remove_at(trace.at())?;
    }

    collapse_root(tcx, state)?;
    Ok(removed)
}

/// Replaces an internal root holding a single child by that child.
fn collapse_root(tcx: &EvtContext, state: &mut TcxState) -> EvtResult<()> {
    loop {
        let mut root = tcx.load_root()?;
        if root.depth <= 1 {
            return Ok(());
        }
        let top = tcx.read_node(root.node)?;
        if top.count() != 1 {
            return Ok(());
        }

        let child = top.child_at(0)?;
        let mut child_node = tcx.read_node(child)?;
        child_node.set_root(true);
        tcx.write_node(child, &child_node)?;
        tcx.free_node(root.node)?;

        root.node = child;
        root.depth -= 1;
        tcx.store_root(state, &root)?;
        log::debug!("Collapsed root, tree depth is now {}", root.depth);
    }
}
