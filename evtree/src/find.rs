//! Range queries.

use std::ops::Index;

use crate::errors::{EvtError, EvtResult};
use crate::node::{EvtEntry, EvtLeafEntry};
use crate::rect::{classify, classify_mbr, EvtRect, OverlapKind};
use crate::search::{trace_walk, Walk};
use crate::tcx::{EvtContext, TcxState};

/// Query mode of [`EvtContext::find`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvtFindOpc {
    /// Every entry overlapping the query
    All,
    /// The first overlapping entry in traversal order
    First,
    /// Entries a write of the query rectangle would capture
    Cap,
    /// The entry equal to the query
    Same,
}

/// Entries returned by a query, in traversal order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntryList {
    entries: Vec<EvtEntry>,
}

impl EntryList {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&EvtEntry> {
        self.entries.get(index)
    }

    pub fn first(&self) -> Option<&EvtEntry> {
        self.entries.first()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, EvtEntry> {
        self.entries.iter()
    }

    pub fn as_slice(&self) -> &[EvtEntry] {
        &self.entries
    }
}

impl Index<usize> for EntryList {
    type Output = EvtEntry;

    fn index(&self, index: usize) -> &EvtEntry {
        &self.entries[index]
    }
}

impl IntoIterator for EntryList {
    type Item = EvtEntry;
    type IntoIter = std::vec::IntoIter<EvtEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

impl<'a> IntoIterator for &'a EntryList {
    type Item = &'a EvtEntry;
    type IntoIter = std::slice::Iter<'a, EvtEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

impl EvtContext {
    /// Collects the entries matching `rect` under `opc`.
    pub fn find(&self, rect: &EvtRect, opc: EvtFindOpc) -> EvtResult<EntryList> {
        rect.validate()?;
        self.with_state(|state| {
            state.invalidate_iter();
            self.refresh(state)?;
            state.ent_list.clear();
            let result = find_in(self, state, rect, opc);

            let mut entries = Vec::new();
            if result.is_ok() {
                entries.try_reserve_exact(state.ent_list.len())?;
                entries.extend(state.ent_list.drain(..));
            }
            state.ent_list.clear();
            result.map(|_| EntryList { entries })
        })
    }
}

fn push(state_list: &mut Vec<EvtEntry>, leaf: &EvtLeafEntry, rect: &EvtRect) -> EvtResult<()> {
    state_list.try_reserve(1)?;
    state_list.push(EvtEntry::fill(leaf, rect));
    Ok(())
}

fn find_in(tcx: &EvtContext, state: &mut TcxState, rect: &EvtRect, opc: EvtFindOpc) -> EvtResult<()> {
    let mut found = std::mem::take(&mut state.ent_list);
    let result = collect(tcx, state, rect, opc, &mut found);
    state.ent_list = found;
    result
}

fn collect(
    tcx: &EvtContext,
    state: &mut TcxState,
    rect: &EvtRect,
    opc: EvtFindOpc,
    found: &mut Vec<EvtEntry>,
) -> EvtResult<()> {
    match opc {
        EvtFindOpc::All | EvtFindOpc::First => {
            trace_walk(
                tcx,
                state,
                |mbr| classify_mbr(mbr, rect),
                |leaf| match classify(&leaf.rect, rect) {
                    OverlapKind::No | OverlapKind::Inval => Ok(Walk::Continue),
                    _ => {
                        push(found, leaf, rect)?;
                        Ok(if opc == EvtFindOpc::First {
                            Walk::Stop
                        } else {
                            Walk::Continue
                        })
                    }
                },
            )?;
        }
        EvtFindOpc::Same => {
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
                |leaf| {
                    if leaf.rect == *rect {
                        push(found, leaf, rect)?;
                        Ok(Walk::Stop)
                    } else {
                        Ok(Walk::Continue)
                    }
                },
            )?;
        }
        EvtFindOpc::Cap => {
            trace_walk(
                tcx,
                state,
                |mbr| classify_mbr(mbr, rect),
                |leaf| match classify(&leaf.rect, rect) {
                    OverlapKind::No | OverlapKind::Capped => Ok(Walk::Continue),
                    OverlapKind::Capping | OverlapKind::Same | OverlapKind::Inplace => {
                        push(found, leaf, rect)?;
                        Ok(Walk::Continue)
                    }
                    kind => Err(EvtError::AmbiguousOverlap(format!(
                        "{} overlaps {} ({})",
                        rect, leaf.rect, kind
                    ))),
                },
            )?;
            check_capturable(found)?;
        }
    }
    Ok(())
}

/// A capture set is ambiguous when two of its extents partially overlap.
fn check_capturable(found: &[EvtEntry]) -> EvtResult<()> {
    for (i, a) in found.iter().enumerate() {
        for b in &found[i + 1..] {
            if a.rect.offsets_partially_overlap(&b.rect) {
                return Err(EvtError::AmbiguousOverlap(format!(
                    "{} partially overlaps {}",
                    a.rect, b.rect
                )));
            }
        }
    }
    Ok(())
}
