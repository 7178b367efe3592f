//! Structural checks and statistics.

use crate::errors::EvtResult;
use crate::node::{EvtNodeBody, NodeMmid};
use crate::rect::EvtRect;
use crate::tcx::{EvtContext, TcxState};

/// Result of integrity check operation
#[derive(Debug, Clone, Default)]
pub struct IntegrityReport {
    pub valid: bool,
    pub depth: u16,
    pub node_count: u64,
    pub leaf_count: u64,
    pub entry_count: u64,
    /// Detailed error messages
    pub errors: Vec<String>,
}

impl IntegrityReport {
    fn fail(&mut self, message: String) {
        log::warn!("Integrity check: {}", message);
        self.valid = false;
        self.errors.push(message);
    }
}

/// Shape and usage of a tree.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EvtStats {
    pub depth: u16,
    pub order: u16,
    pub feats: u64,
    pub policy: &'static str,
    pub node_count: u64,
    pub leaf_count: u64,
    pub entry_count: u64,
    /// Average items per node, in percent of the order
    pub fill_percent: u64,
}

impl EvtContext {
    /// Walks the whole tree and verifies its structural invariants:
    /// flags, balance, node counts and minimal bounding rectangles.
    pub fn check_integrity(&self) -> EvtResult<IntegrityReport> {
        self.with_state(|state| {
            state.invalidate_iter();
            self.refresh(state)?;
            let mut report = IntegrityReport {
                valid: true,
                depth: state.depth,
                ..IntegrityReport::default()
            };
            if state.depth == 0 {
                if !state.node.is_null() {
                    report.fail("empty tree with a root node".into());
                }
                return Ok(report);
            }
            check_node(self, state, state.node, 0, &mut report)?;
            Ok(report)
        })
    }

    pub fn stats(&self) -> EvtResult<EvtStats> {
        let report = self.check_integrity()?;
        let order = self.with_state(|state| Ok((state.order, state.feats)))?;
        // every node but the top one is an item of its parent
        let items = report.entry_count + report.node_count.saturating_sub(1);
        let fill_percent = if report.node_count == 0 {
            0
        } else {
            items * 100 / (report.node_count * order.0 as u64)
        };
        Ok(EvtStats {
            depth: report.depth,
            order: order.0,
            feats: order.1,
            policy: self.policy().name(),
            node_count: report.node_count,
            leaf_count: report.leaf_count,
            entry_count: report.entry_count,
            fill_percent,
        })
    }
}

/// Checks the subtree at `mmid` and returns its actual bounding rectangle.
fn check_node(
    tcx: &EvtContext,
    state: &TcxState,
    mmid: NodeMmid,
    level: usize,
    report: &mut IntegrityReport,
) -> EvtResult<Option<EvtRect>> {
    let depth = state.depth as usize;
    let node = match tcx.read_node(mmid) {
        Ok(node) => node,
        Err(err) => {
            report.fail(format!("node {:?} unreadable: {}", mmid, err));
            return Ok(None);
        }
    };
    report.node_count += 1;

    if node.is_root() != (level == 0) {
        report.fail(format!("node {:?} at level {} has a wrong root flag", mmid, level));
    }
    if node.count() > state.order as usize {
        report.fail(format!(
            "node {:?} holds {} items, order is {}",
            mmid,
            node.count(),
            state.order
        ));
    }
    if node.is_empty() {
        report.fail(format!("node {:?} is empty", mmid));
    }

    match &node.body {
        EvtNodeBody::Leaf(entries) => {
            if level + 1 != depth {
                report.fail(format!(
                    "leaf {:?} at level {} in a tree of depth {}",
                    mmid, level, depth
                ));
            }
            report.leaf_count += 1;
            report.entry_count += entries.len() as u64;
            for entry in entries {
                if !entry.rect.is_valid() {
                    report.fail(format!("malformed rectangle {:?} in {:?}", entry.rect, mmid));
                }
            }
        }
        EvtNodeBody::Internal(children) => {
            if level + 1 >= depth {
                report.fail(format!(
                    "internal node {:?} at level {} in a tree of depth {}",
                    mmid, level, depth
                ));
                return Ok(node.mbr());
            }
            for child in children {
                if let Some(actual) = check_node(tcx, state, child.child, level + 1, report)? {
                    if actual != child.mbr {
                        report.fail(format!(
                            "child {:?} bounds {} but is recorded as {}",
                            child.child, actual, child.mbr
                        ));
                    }
                }
            }
        }
    }
    Ok(node.mbr())
}
