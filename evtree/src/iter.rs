//! Ordered iteration over the entries of a tree.
//!
//! An iterator runs on the iterator slot of a context. When the slot of the
//! caller's context is taken, the iterator clones the context and uses the
//! clone's slot instead, so that nested iterations never share a trace.

use crate::errors::{EvtError, EvtResult};
use crate::node::EvtEntry;
use crate::search::{move_trace, trace_first};
use crate::tcx::{ContextRef, EvtContext, TcxState};

/// Iterator slot states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IterState {
    /// Slot is free
    None,
    /// Prepared, not positioned
    Init,
    /// Positioned on an entry
    Ready,
    /// Ran off either end
    Fini,
}

/// Where `probe` positions the iterator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IterProbe {
    First,
    Last,
}

pub struct EvtIterator {
    tcx: ContextRef,
    /// Whether the slot belongs to the caller's own context
    private: bool,
}

impl EvtIterator {
    /// Claims an iterator slot of `tcx`, or of a clone of it when taken.
    pub fn prepare(tcx: &ContextRef) -> EvtResult<EvtIterator> {
        tcx.addref()?;
        let claimed = tcx.with_state(|state| {
            if state.iter == IterState::None {
                state.iter = IterState::Init;
                Ok(true)
            } else {
                Ok(false)
            }
        });
        match claimed {
            Ok(true) => Ok(EvtIterator {
                tcx: ContextRef::clone(tcx),
                private: true,
            }),
            Ok(false) => {
                tcx.decref();
                let clone = tcx.clone_context()?;
                clone.with_state(|state| {
                    state.iter = IterState::Init;
                    Ok(())
                })?;
                Ok(EvtIterator {
                    tcx: clone,
                    private: false,
                })
            }
            Err(err) => {
                tcx.decref();
                Err(err)
            }
        }
    }

    pub fn is_private(&self) -> bool {
        self.private
    }

    pub fn context(&self) -> &EvtContext {
        &self.tcx
    }

    pub fn state(&self) -> EvtResult<IterState> {
        self.tcx.with_state(|state| Ok(state.iter))
    }

    /// Positions the iterator on the first or last entry.
    ///
    /// Returns false, leaving the iterator finished, for an empty tree.
    pub fn probe(&mut self, probe: IterProbe) -> EvtResult<bool> {
        let tcx = &self.tcx;
        tcx.with_state(|state| {
            check_prepared(state)?;
            tcx.refresh(state)?;
            let found = trace_first(tcx, state, probe == IterProbe::First)?;
            state.iter = if found {
                IterState::Ready
            } else {
                IterState::Fini
            };
            Ok(found)
        })
    }

    /// The entry under the iterator.
    pub fn fetch(&self) -> EvtResult<EvtEntry> {
        let tcx = &self.tcx;
        tcx.with_state(|state| {
            if state.iter != IterState::Ready {
                return Err(EvtError::InvalidArgument(format!(
                    "fetch from an iterator in state {:?}",
                    state.iter
                )));
            }
            let leaf = state
                .trace
                .leaf()
                .copied()
                .ok_or_else(|| EvtError::Corrupted("positioned iterator without trace".into()))?;
            let node = tcx.read_node(leaf.node)?;
            let entry = node.entry_at(leaf.at())?;
            Ok(EvtEntry::fill(entry, &entry.rect))
        })
    }

    /// Moves to the next entry; false once past the last one.
    #[allow(clippy::should_implement_trait)]
    pub fn next(&mut self) -> EvtResult<bool> {
        self.step(true)
    }

    /// Moves to the previous entry; false once before the first one.
    pub fn prev(&mut self) -> EvtResult<bool> {
        self.step(false)
    }

    fn step(&mut self, forward: bool) -> EvtResult<bool> {
        let tcx = &self.tcx;
        tcx.with_state(|state| {
            match state.iter {
                IterState::Ready => {}
                IterState::Fini => return Ok(false),
                other => {
                    return Err(EvtError::InvalidArgument(format!(
                        "iterator in state {:?} must be probed first",
                        other
                    )))
                }
            }
            let moved = move_trace(tcx, state, forward)?;
            state.iter = if moved {
                IterState::Ready
            } else {
                IterState::Fini
            };
            Ok(moved)
        })
    }

    /// Returns the slot and drops the context reference.
    pub fn finish(self) {}

    /// Collects the remaining entries from the current position forward.
    pub fn collect_forward(&mut self) -> EvtResult<Vec<EvtEntry>> {
        let mut entries = Vec::new();
        if self.state()? != IterState::Ready {
            return Ok(entries);
        }
        loop {
            entries.push(self.fetch()?);
            if !self.next()? {
                return Ok(entries);
            }
        }
    }
}

fn check_prepared(state: &TcxState) -> EvtResult<()> {
    if state.iter == IterState::None {
        return Err(EvtError::InvalidArgument("iterator was finished".into()));
    }
    Ok(())
}

impl Drop for EvtIterator {
    fn drop(&mut self) {
        let _ = self.tcx.with_state(|state| {
            state.iter = IterState::None;
            Ok(())
        });
        self.tcx.decref();
    }
}
