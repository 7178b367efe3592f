//! Trace-based navigation of a tree.
//!
//! Every routine here leaves its position in the context's trace stack:
//! `descend` for the insertion path of a rectangle, `trace_first` and
//! `move_trace` for ordered iteration, and `trace_walk` for pruned
//! depth-first scans. The stack depth always equals the tree depth.

use crate::errors::{EvtError, EvtResult};
use crate::node::{EvtLeafEntry, EvtNode, EvtNodeBody, NodeMmid};
use crate::policy::EvtPolicy;
use crate::rect::{classify_mbr, EvtRect, OverlapKind};
use crate::tcx::{EvtContext, TcxState};
use crate::trace::EvtTrace;

/// Whether a walk goes on after a visited entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Walk {
    Continue,
    Stop,
}

fn check_level(node: &EvtNode, mmid: NodeMmid, level: usize, depth: usize) -> EvtResult<()> {
    if node.is_leaf() != (level + 1 == depth) {
        return Err(EvtError::Corrupted(format!(
            "node {:?} at level {} of {} has the wrong kind",
            mmid, level, depth
        )));
    }
    if node.is_empty() {
        return Err(EvtError::Corrupted(format!("empty node {:?}", mmid)));
    }
    Ok(())
}

fn pick(policy: &dyn EvtPolicy, mbrs: &[EvtRect], tied: &[usize], rect: &EvtRect) -> usize {
    if tied.len() == 1 {
        return tied[0];
    }
    let at = policy.choose_child(mbrs, tied, rect);
    if tied.contains(&at) {
        at
    } else {
        tied[0]
    }
}

/// Child position receiving `rect` and whether its bounds already include it.
fn choose_child(
    policy: &dyn EvtPolicy,
    mbrs: &[EvtRect],
    rect: &EvtRect,
) -> (usize, bool) {
    let including: Vec<usize> = (0..mbrs.len())
        .filter(|&at| classify_mbr(&mbrs[at], rect) == OverlapKind::Included)
        .collect();
    if let Some(best) = including.iter().map(|&at| mbrs[at].area()).min() {
        let tied: Vec<usize> = including
            .into_iter()
            .filter(|&at| mbrs[at].area() == best)
            .collect();
        return (pick(policy, mbrs, &tied, rect), true);
    }

    let cost = |at: usize| (mbrs[at].enlargement(rect), mbrs[at].area());
    let best = (0..mbrs.len()).map(cost).min();
    let tied: Vec<usize> = (0..mbrs.len())
        .filter(|&at| Some(cost(at)) == best)
        .collect();
    (pick(policy, mbrs, &tied, rect), false)
}

/// Fills the trace with the path from the root to the leaf that should
/// receive `rect`. The leaf level holds the insertion position.
pub(crate) fn descend(tcx: &EvtContext, state: &mut TcxState, rect: &EvtRect) -> EvtResult<()> {
    let depth = state.depth as usize;
    state.trace.reset(depth)?;

    let mut mmid = state.node;
    for level in 0..depth {
        let node = tcx.read_node(mmid)?;
        check_level(&node, mmid, level, depth)?;
        let mbrs = node.rects();
        if node.is_leaf() {
            let at = tcx.policy().insert_at(&mbrs, rect);
            state.trace.set(level, EvtTrace::new(mmid, at, true));
        } else {
            let (at, included) = choose_child(tcx.policy().as_ref(), &mbrs, rect);
            state.trace.set(level, EvtTrace::new(mmid, at, included));
            mmid = node.child_at(at)?;
        }
    }
    Ok(())
}

/// Positions the trace on the first (or last) entry of the tree.
///
/// Returns false for an empty tree.
pub(crate) fn trace_first(tcx: &EvtContext, state: &mut TcxState, forward: bool) -> EvtResult<bool> {
    let depth = state.depth as usize;
    state.trace.reset(depth)?;
    if depth == 0 {
        return Ok(false);
    }
    descend_edge(tcx, state, 0, state.node, forward)?;
    Ok(true)
}

/// Fills levels `from..depth` along the leftmost or rightmost path of `mmid`.
fn descend_edge(
    tcx: &EvtContext,
    state: &mut TcxState,
    from: usize,
    mut mmid: NodeMmid,
    forward: bool,
) -> EvtResult<()> {
    let depth = state.trace.depth();
    for level in from..depth {
        let node = tcx.read_node(mmid)?;
        check_level(&node, mmid, level, depth)?;
        let at = if forward { 0 } else { node.count() - 1 };
        state.trace.set(level, EvtTrace::new(mmid, at, false));
        if !node.is_leaf() {
            mmid = node.child_at(at)?;
        }
    }
    Ok(())
}

/// Moves the trace to the next (or previous) leaf entry, carrying into parent
/// levels at node boundaries. Returns false when no entry remains.
pub(crate) fn move_trace(tcx: &EvtContext, state: &mut TcxState, forward: bool) -> EvtResult<bool> {
    let depth = state.trace.depth();
    if depth == 0 {
        return Ok(false);
    }

    let mut level = depth - 1;
    loop {
        let trace = *state.trace.get(level);
        let node = tcx.read_node(trace.node)?;
        let count = node.count();
        let next = if forward {
            Some(trace.at() + 1).filter(|&at| at < count)
        } else {
            trace
                .at()
                .checked_sub(1)
                .filter(|_| count > 0)
                .map(|at| at.min(count - 1))
        };

        match next {
            Some(at) => {
                state.trace.get_mut(level).at = at as u32;
                if !node.is_leaf() {
                    descend_edge(tcx, state, level + 1, node.child_at(at)?, forward)?;
                }
                return Ok(true);
            }
            None if level == 0 => return Ok(false),
            None => level -= 1,
        }
    }
}

/// Depth-first scan of the tree in stored order.
///
/// `prune` classifies the bounding rectangle of each child: subtrees
/// classified `No` or `Inval` are skipped. `visit` sees every entry of the
/// visited leaves. When it returns [`Walk::Stop`] the trace is left on that
/// entry and the walk returns true.
pub(crate) fn trace_walk<P, V>(
    tcx: &EvtContext,
    state: &mut TcxState,
    mut prune: P,
    mut visit: V,
) -> EvtResult<bool>
where
    P: FnMut(&EvtRect) -> OverlapKind,
    V: FnMut(&EvtLeafEntry) -> EvtResult<Walk>,
{
    let depth = state.depth as usize;
    state.trace.reset(depth)?;
    if depth == 0 {
        return Ok(false);
    }

    let mut nodes: Vec<EvtNode> = Vec::with_capacity(depth);
    let top = tcx.read_node(state.node)?;
    check_level(&top, state.node, 0, depth)?;
    nodes.push(top);
    state.trace.set(0, EvtTrace::new(state.node, 0, false));

    let mut level = 0;
    loop {
        let at = state.trace.get(level).at();
        let node = &nodes[level];
        if at >= node.count() {
            if level == 0 {
                return Ok(false);
            }
            nodes.pop();
            level -= 1;
            state.trace.get_mut(level).at += 1;
            continue;
        }

        match &node.body {
            EvtNodeBody::Leaf(entries) => {
                if visit(&entries[at])? == Walk::Stop {
                    return Ok(true);
                }
                state.trace.get_mut(level).at += 1;
            }
            EvtNodeBody::Internal(children) => {
                let child = children[at];
                let kind = prune(&child.mbr);
                if matches!(kind, OverlapKind::No | OverlapKind::Inval) {
                    state.trace.get_mut(level).at += 1;
                    continue;
                }
                state.trace.get_mut(level).included = kind == OverlapKind::Included;

                let child_node = tcx.read_node(child.child)?;
                check_level(&child_node, child.child, level + 1, depth)?;
                level += 1;
                state.trace.set(level, EvtTrace::new(child.child, 0, false));
                nodes.push(child_node);
            }
        }
    }
}

/// Leaves the trace on the entry whose rectangle equals `rect`.
pub(crate) fn locate(
    tcx: &EvtContext,
    state: &mut TcxState,
    rect: &EvtRect,
) -> EvtResult<Option<EvtLeafEntry>> {
    let mut found = None;
    trace_walk(
        tcx,
        state,
        |mbr| {
            if mbr.includes(rect) {
                OverlapKind::Included
            } else {
                OverlapKind::No
            }
        },
        |entry| {
            if entry.rect == *rect {
                found = Some(*entry);
                Ok(Walk::Stop)
            } else {
                Ok(Walk::Continue)
            }
        },
    )?;
    Ok(found)
}
