//! Trace stack: the root-to-leaf path of a search position.
//!
//! Level 0 is the root node, level `depth - 1` the leaf. Each level records
//! the node, the item index inside it and whether the searched rectangle is
//! fully included in that item's bounding rectangle.

use crate::constants::EVT_TRACE_MAX;
use crate::errors::{EvtError, EvtResult};
use crate::node::NodeMmid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EvtTrace {
    pub node: NodeMmid,
    pub at: u32,
    pub included: bool,
}

impl EvtTrace {
    pub fn new(node: NodeMmid, at: usize, included: bool) -> EvtTrace {
        EvtTrace {
            node,
            at: at as u32,
            included,
        }
    }

    pub fn at(&self) -> usize {
        self.at as usize
    }
}

/// Fixed-capacity stack of [`EvtTrace`] entries.
#[derive(Debug, Clone)]
pub struct TraceStack {
    traces: [EvtTrace; EVT_TRACE_MAX],
    depth: usize,
}

impl Default for TraceStack {
    fn default() -> Self {
        TraceStack::new()
    }
}

impl TraceStack {
    pub fn new() -> TraceStack {
        TraceStack {
            traces: [EvtTrace::default(); EVT_TRACE_MAX],
            depth: 0,
        }
    }

    /// Clears the stack for a tree of `depth` levels.
    pub fn reset(&mut self, depth: usize) -> EvtResult<()> {
        if depth > EVT_TRACE_MAX {
            log::error!("Tree depth {} exceeds the trace capacity", depth);
            return Err(EvtError::Overflow(depth));
        }
        self.traces[..depth].fill(EvtTrace::default());
        self.depth = depth;
        Ok(())
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn is_empty(&self) -> bool {
        self.depth == 0
    }

    pub fn get(&self, level: usize) -> &EvtTrace {
        &self.traces[level]
    }

    pub fn get_mut(&mut self, level: usize) -> &mut EvtTrace {
        &mut self.traces[level]
    }

    pub fn set(&mut self, level: usize, trace: EvtTrace) {
        self.traces[level] = trace;
    }

    /// The leaf level, if the stack is not empty.
    pub fn leaf(&self) -> Option<&EvtTrace> {
        self.depth.checked_sub(1).map(|level| &self.traces[level])
    }

    pub fn as_slice(&self) -> &[EvtTrace] {
        &self.traces[..self.depth]
    }
}
