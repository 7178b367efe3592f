//! Pluggable placement and split heuristics.
//!
//! A policy decides where an item goes inside a node, which child takes a
//! rectangle when several are equally good, and how an overflowing node is
//! split. The policy of a tree is named by a feature bit stored in its root,
//! so that reopening a tree restores the same behaviour.

use std::fmt;
use std::sync::Arc;

use crate::errors::{EvtError, EvtResult};
use crate::rect::EvtRect;

/// Entries kept sorted by start offset, split in the middle.
pub const EVT_FEAT_SORT_SOFF: u64 = 1 << 0;
/// Entries appended, split along the axis of greatest spread.
pub const EVT_FEAT_SPLIT_AXIS: u64 = 1 << 1;

pub const EVT_FEATS_SUPPORTED: u64 = EVT_FEAT_SORT_SOFF | EVT_FEAT_SPLIT_AXIS;
pub const EVT_FEAT_DEFAULT: u64 = EVT_FEAT_SORT_SOFF;

/// Partition of an overflowing node: positions that stay and positions that
/// move to the new sibling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvtSplit {
    pub keep: Vec<usize>,
    pub moved: Vec<usize>,
}

pub trait EvtPolicy: Send + Sync {
    fn name(&self) -> &'static str;

    /// Feature bit recorded in the root of trees using this policy.
    fn feats(&self) -> u64;

    /// Position at which `rect` is inserted among the items `rects`.
    fn insert_at(&self, rects: &[EvtRect], rect: &EvtRect) -> usize;

    /// Picks one of the `tied` child positions to receive `rect`.
    fn choose_child(&self, mbrs: &[EvtRect], tied: &[usize], rect: &EvtRect) -> usize;

    /// Partitions the rectangles of a node holding one item too many.
    fn split(&self, rects: &[EvtRect]) -> EvtSplit;
}

impl fmt::Debug for dyn EvtPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EvtPolicy({})", self.name())
    }
}

/// Builds the built-in policy named by `feats`.
pub fn policy_for_feats(feats: u64) -> EvtResult<Arc<dyn EvtPolicy>> {
    if feats & !EVT_FEATS_SUPPORTED != 0 {
        return Err(EvtError::InvalidArgument(format!(
            "unknown feature bits {:#x}",
            feats & !EVT_FEATS_SUPPORTED
        )));
    }
    match feats {
        EVT_FEAT_SPLIT_AXIS => Ok(Arc::new(AxisSplitPolicy)),
        EVT_FEAT_SORT_SOFF | 0 => Ok(Arc::new(SortedOffsetPolicy)),
        _ => Err(EvtError::InvalidArgument(format!(
            "conflicting policy bits {:#x}",
            feats
        ))),
    }
}

fn split_sorted(order: Vec<usize>) -> EvtSplit {
    let mid = order.len().div_ceil(2);
    let mut keep = order[..mid].to_vec();
    let mut moved = order[mid..].to_vec();
    keep.sort_unstable();
    moved.sort_unstable();
    EvtSplit { keep, moved }
}

/// Keeps items ordered by `(off_lo, epc_lo)`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SortedOffsetPolicy;

impl EvtPolicy for SortedOffsetPolicy {
    fn name(&self) -> &'static str {
        "sorted-offset"
    }

    fn feats(&self) -> u64 {
        EVT_FEAT_SORT_SOFF
    }

    fn insert_at(&self, rects: &[EvtRect], rect: &EvtRect) -> usize {
        let key = (rect.off_lo, rect.epc_lo);
        rects.partition_point(|r| (r.off_lo, r.epc_lo) <= key)
    }

    fn choose_child(&self, mbrs: &[EvtRect], tied: &[usize], _rect: &EvtRect) -> usize {
        tied.iter()
            .copied()
            .min_by_key(|&at| (mbrs[at].off_lo, at))
            .unwrap_or(0)
    }

    fn split(&self, rects: &[EvtRect]) -> EvtSplit {
        let mut order: Vec<usize> = (0..rects.len()).collect();
        order.sort_by_key(|&at| (rects[at].off_lo, rects[at].epc_lo, at));
        split_sorted(order)
    }
}

/// Appends items and splits along the dimension whose centres spread most.
#[derive(Debug, Clone, Copy, Default)]
pub struct AxisSplitPolicy;

impl EvtPolicy for AxisSplitPolicy {
    fn name(&self) -> &'static str {
        "axis-split"
    }

    fn feats(&self) -> u64 {
        EVT_FEAT_SPLIT_AXIS
    }

    fn insert_at(&self, rects: &[EvtRect], _rect: &EvtRect) -> usize {
        rects.len()
    }

    fn choose_child(&self, mbrs: &[EvtRect], tied: &[usize], _rect: &EvtRect) -> usize {
        tied.iter()
            .copied()
            .min_by_key(|&at| (mbrs[at].area(), at))
            .unwrap_or(0)
    }

    fn split(&self, rects: &[EvtRect]) -> EvtSplit {
        let centres: Vec<(u128, u128)> = rects.iter().map(|r| r.center()).collect();
        let spread = |axis: fn(&(u128, u128)) -> u128| {
            let lo = centres.iter().map(axis).min().unwrap_or(0);
            let hi = centres.iter().map(axis).max().unwrap_or(0);
            hi - lo
        };
        let by_offset = spread(|c| c.0) >= spread(|c| c.1);

        let mut order: Vec<usize> = (0..rects.len()).collect();
        if by_offset {
            order.sort_by_key(|&at| (centres[at].0, centres[at].1, at));
        } else {
            order.sort_by_key(|&at| (centres[at].1, centres[at].0, at));
        }
        split_sorted(order)
    }
}
