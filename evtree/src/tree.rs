//! EvtTree implementation.

use std::sync::Arc;

use crate::config::{validate_order, EvtConfig};
use crate::errors::{EvtError, EvtResult};
use crate::find::{EntryList, EvtFindOpc};
use crate::insert::InsertOutcome;
use crate::integrity::{EvtStats, IntegrityReport};
use crate::iter::EvtIterator;
use crate::node::{EvtEntry, EvtNodeBody, EvtPtr, EvtRoot, NodeMmid, RootMmid, ROOT_ALLOC_SIZE};
use crate::policy::{policy_for_feats, EvtPolicy};
use crate::rect::EvtRect;
use crate::tcx::{ContextRef, EvtContext};
use crate::umem::UmemInstance;

/// An open extent tree.
///
/// The tree owns one reference of its context. Iterators and handles take
/// references of their own, so the context outlives a dropped tree while
/// they are in use.
///
/// # Examples
///
/// ```rust
/// use evtree::{EvtConfig, EvtFindOpc, EvtPtr, EvtRect, EvtTree, UmemInstance};
///
/// let tree = EvtTree::create(UmemInstance::vmem(), &EvtConfig::default()).unwrap();
/// tree.insert(&EvtRect::at_epoch(0, 4095, 1), EvtPtr::new(0x1000, 1, 0)).unwrap();
///
/// let found = tree.find(&EvtRect::at_epoch(100, 199, 1), EvtFindOpc::All).unwrap();
/// assert_eq!(found.len(), 1);
/// assert_eq!(found[0].ptr.index, 100);
/// ```
#[derive(Debug)]
pub struct EvtTree {
    tcx: ContextRef,
}

impl EvtTree {
    /// Create an empty tree in `umem`.
    ///
    /// The root record is allocated in its own transaction; its id is what
    /// [`EvtTree::open`] takes to reach the tree again.
    pub fn create(umem: UmemInstance, config: &EvtConfig) -> EvtResult<Self> {
        validate_order(config.order())?;
        let policy = match config.policy() {
            Some(policy) => Arc::clone(policy),
            None => policy_for_feats(config.feats())?,
        };

        let root = EvtRoot::new(config.order(), config.feats());
        let root_mmid: RootMmid =
            umem.with_tx("create", || umem.alloc_typed(&root, ROOT_ALLOC_SIZE))?;
        log::debug!(
            "Created tree {:?}: order {}, feats {:#x}, policy {}",
            root_mmid,
            root.order,
            root.feats,
            policy.name()
        );

        let tcx = EvtContext::create(root_mmid, &root, umem, policy)?;
        Ok(EvtTree { tcx })
    }

    /// Open the tree whose root record lives at `root_mmid`.
    ///
    /// Without a custom policy the built-in one named by the root's feature
    /// bits is used.
    pub fn open(
        umem: UmemInstance,
        root_mmid: RootMmid,
        policy: Option<Arc<dyn EvtPolicy>>,
    ) -> EvtResult<Self> {
        let root = umem.fetch(root_mmid)?;
        validate_order(root.order)
            .map_err(|err| EvtError::Corrupted(format!("root {:?}: {}", root_mmid, err)))?;
        if root.is_empty() != (root.depth == 0) {
            return Err(EvtError::Corrupted(format!(
                "root {:?} has depth {} and top node {:?}",
                root_mmid, root.depth, root.node
            )));
        }
        let policy = match policy {
            Some(policy) => policy,
            None => policy_for_feats(root.feats)
                .map_err(|err| EvtError::Corrupted(format!("root {:?}: {}", root_mmid, err)))?,
        };

        log::debug!(
            "Opened tree {:?}: depth {}, order {}",
            root_mmid,
            root.depth,
            root.order
        );
        let tcx = EvtContext::create(root_mmid, &root, umem, policy)?;
        Ok(EvtTree { tcx })
    }

    /// Wrap a context, taking a reference of it.
    pub fn from_context(tcx: &ContextRef) -> EvtResult<Self> {
        tcx.addref()?;
        Ok(EvtTree {
            tcx: ContextRef::clone(tcx),
        })
    }

    pub fn context(&self) -> &ContextRef {
        &self.tcx
    }

    /// A second tree on the same root with its own context, for readers on
    /// other threads.
    ///
    /// Reads through the clone are not a snapshot. Each node is read as last
    /// committed, so a find or iterator that spans a writer's commit can reach
    /// a node the commit freed and fail with [`EvtError::InvalidArgument`].
    /// Callers that need a stable view serialize readers against the writer.
    pub fn try_clone(&self) -> EvtResult<Self> {
        Ok(EvtTree {
            tcx: self.tcx.clone_context()?,
        })
    }

    pub fn root_mmid(&self) -> RootMmid {
        self.tcx.root_mmid()
    }

    pub fn insert(&self, rect: &EvtRect, ptr: EvtPtr) -> EvtResult<InsertOutcome> {
        self.tcx.insert(rect, ptr)
    }

    pub fn delete(&self, rect: &EvtRect) -> EvtResult<Option<EvtEntry>> {
        self.tcx.delete(rect)
    }

    pub fn find(&self, rect: &EvtRect, opc: EvtFindOpc) -> EvtResult<EntryList> {
        self.tcx.find(rect, opc)
    }

    pub fn iter(&self) -> EvtResult<EvtIterator> {
        EvtIterator::prepare(&self.tcx)
    }

    pub fn depth(&self) -> EvtResult<u16> {
        self.current_root().map(|root| root.depth)
    }

    pub fn order(&self) -> EvtResult<u16> {
        self.current_root().map(|root| root.order)
    }

    pub fn feats(&self) -> EvtResult<u64> {
        self.current_root().map(|root| root.feats)
    }

    pub fn is_empty(&self) -> EvtResult<bool> {
        self.current_root().map(|root| root.is_empty())
    }

    fn current_root(&self) -> EvtResult<EvtRoot> {
        self.tcx.with_state(|state| self.tcx.refresh(state))
    }

    pub fn stats(&self) -> EvtResult<EvtStats> {
        self.tcx.stats()
    }

    pub fn check_integrity(&self) -> EvtResult<IntegrityReport> {
        self.tcx.check_integrity()
    }

    /// Drop this tree's context reference.
    pub fn close(self) {}

    /// Free every node and the root record.
    ///
    /// Other contexts of the tree become unusable; their next operation
    /// fails reading the freed root.
    pub fn destroy(self) -> EvtResult<()> {
        let tcx = &self.tcx;
        let root_mmid = tcx.root_mmid();
        let freed = tcx.with_state(|state| {
            state.invalidate_iter();
            tcx.umem().with_tx("destroy", || {
                let root = tcx.refresh(state)?;
                let mut freed = 0usize;
                if !root.is_empty() {
                    freed = free_subtree(tcx, root.node)?;
                }
                tcx.umem().free_typed(root_mmid)?;
                Ok(freed)
            })
        })?;
        log::debug!("Destroyed tree {:?}, freed {} nodes", root_mmid, freed);
        Ok(())
    }
}

/// Frees the subtree at `top`, children first. Returns the number of nodes.
fn free_subtree(tcx: &EvtContext, top: NodeMmid) -> EvtResult<usize> {
    let mut pending = vec![top];
    let mut freed = 0;
    while let Some(mmid) = pending.pop() {
        let node = tcx.read_node(mmid)?;
        if let EvtNodeBody::Internal(children) = &node.body {
            pending.extend(children.iter().map(|child| child.child));
        }
        tcx.free_node(mmid)?;
        freed += 1;
    }
    Ok(freed)
}

impl Drop for EvtTree {
    fn drop(&mut self) {
        self.tcx.decref();
    }
}
