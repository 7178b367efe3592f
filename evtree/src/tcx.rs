//! Tree contexts.
//!
//! A context is the transient, reference-counted view of one tree: the root
//! record it was opened on, the memory pool, the policy, and per-context
//! scratch state (trace stack, embedded iterator slot, entry buffer). Clones
//! share the pool, policy and root but get their own scratch state, so that
//! several readers can walk the same tree independently.

use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use crate::constants::{EVT_ENT_LIST_INIT, EVT_HDL_ALIVE, EVT_HDL_DEAD};
use crate::errors::{EvtError, EvtResult};
use crate::iter::IterState;
use crate::node::{node_alloc_size, EvtEntry, EvtNode, EvtRoot, NodeMmid, RootMmid};
use crate::policy::EvtPolicy;
use crate::trace::TraceStack;
use crate::umem::UmemInstance;

/// Scratch state owned by a live context.
pub(crate) struct TcxState {
    pub order: u16,
    pub depth: u16,
    pub feats: u64,
    /// Top node as of the last refresh
    pub node: NodeMmid,
    pub trace: TraceStack,
    pub iter: IterState,
    pub ent_list: Vec<EvtEntry>,
}

impl TcxState {
    /// Demotes a positioned iterator, whose trace is about to be reused.
    pub fn invalidate_iter(&mut self) {
        if self.iter == IterState::Ready {
            self.iter = IterState::Init;
        }
    }
}

pub struct EvtContext {
    root_mmid: RootMmid,
    umem: UmemInstance,
    policy: Arc<dyn EvtPolicy>,
    magic: AtomicU32,
    refs: AtomicU32,
    state: Mutex<Option<TcxState>>,
}

/// Shared pointer to a context.
pub type ContextRef = Arc<EvtContext>;

impl fmt::Debug for EvtContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EvtContext")
            .field("root", &self.root_mmid)
            .field("policy", &self.policy.name())
            .field("magic", &format_args!("{:#x}", self.magic.load(Ordering::Acquire)))
            .field("refs", &self.refs.load(Ordering::Acquire))
            .finish()
    }
}

impl EvtContext {
    /// Creates a context holding one reference.
    pub fn create(
        root_mmid: RootMmid,
        root: &EvtRoot,
        umem: UmemInstance,
        policy: Arc<dyn EvtPolicy>,
    ) -> EvtResult<ContextRef> {
        let mut ent_list = Vec::new();
        ent_list.try_reserve(EVT_ENT_LIST_INIT)?;

        let mut trace = TraceStack::new();
        trace.reset(root.depth as usize)?;

        Ok(Arc::new(EvtContext {
            root_mmid,
            umem,
            policy,
            magic: AtomicU32::new(EVT_HDL_ALIVE),
            refs: AtomicU32::new(1),
            state: Mutex::new(Some(TcxState {
                order: root.order,
                depth: root.depth,
                feats: root.feats,
                node: root.node,
                trace,
                iter: IterState::None,
                ent_list,
            })),
        }))
    }

    /// A new context on the same tree with its own scratch state.
    pub fn clone_context(&self) -> EvtResult<ContextRef> {
        if !self.is_alive() {
            return Err(EvtError::InvalidHandle);
        }
        let root = self.load_root()?;
        EvtContext::create(
            self.root_mmid,
            &root,
            self.umem.clone(),
            Arc::clone(&self.policy),
        )
    }

    pub fn addref(&self) -> EvtResult<()> {
        let mut refs = self.refs.load(Ordering::Acquire);
        loop {
            if refs == 0 || !self.is_alive() {
                return Err(EvtError::InvalidHandle);
            }
            match self.refs.compare_exchange_weak(
                refs,
                refs + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return Ok(()),
                Err(current) => refs = current,
            }
        }
    }

    /// Drops one reference; the last one releases the scratch state.
    ///
    /// Returns true when this call released the context.
    pub fn decref(&self) -> bool {
        let mut refs = self.refs.load(Ordering::Acquire);
        loop {
            if refs == 0 {
                return false;
            }
            match self.refs.compare_exchange_weak(
                refs,
                refs - 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => break,
                Err(current) => refs = current,
            }
        }
        if refs > 1 {
            return false;
        }

        self.magic.store(EVT_HDL_DEAD, Ordering::Release);
        self.state.lock().take();
        log::trace!("Released context of tree {:?}", self.root_mmid);
        true
    }

    pub fn ref_count(&self) -> u32 {
        self.refs.load(Ordering::Acquire)
    }

    pub fn magic(&self) -> u32 {
        self.magic.load(Ordering::Acquire)
    }

    pub fn is_alive(&self) -> bool {
        self.magic() == EVT_HDL_ALIVE
    }

    pub fn root_mmid(&self) -> RootMmid {
        self.root_mmid
    }

    pub fn umem(&self) -> &UmemInstance {
        &self.umem
    }

    pub fn policy(&self) -> &Arc<dyn EvtPolicy> {
        &self.policy
    }

    /// Runs `op` on the scratch state, failing with `InvalidHandle` once the
    /// context was released.
    pub(crate) fn with_state<R, F>(&self, op: F) -> EvtResult<R>
    where
        F: FnOnce(&mut TcxState) -> EvtResult<R>,
    {
        let mut guard = self.state.lock();
        match guard.as_mut() {
            Some(state) if self.is_alive() => op(state),
            _ => Err(EvtError::InvalidHandle),
        }
    }

    pub(crate) fn load_root(&self) -> EvtResult<EvtRoot> {
        self.umem.fetch(self.root_mmid)
    }

    pub(crate) fn store_root(&self, state: &mut TcxState, root: &EvtRoot) -> EvtResult<()> {
        self.umem.store(self.root_mmid, root)?;
        state.depth = root.depth;
        state.node = root.node;
        Ok(())
    }

    /// Reloads the root record into the cached `(order, depth, feats)`.
    pub(crate) fn refresh(&self, state: &mut TcxState) -> EvtResult<EvtRoot> {
        let root = self.load_root()?;
        state.order = root.order;
        state.depth = root.depth;
        state.feats = root.feats;
        state.node = root.node;
        Ok(root)
    }

    pub(crate) fn read_node(&self, mmid: NodeMmid) -> EvtResult<EvtNode> {
        self.umem.fetch(mmid)
    }

    pub(crate) fn write_node(&self, mmid: NodeMmid, node: &EvtNode) -> EvtResult<()> {
        self.umem.store(mmid, node)
    }

    pub(crate) fn alloc_node(&self, state: &TcxState, node: &EvtNode) -> EvtResult<NodeMmid> {
        self.umem.alloc_typed(node, node_alloc_size(state.order))
    }

    pub(crate) fn free_node(&self, mmid: NodeMmid) -> EvtResult<()> {
        self.umem.free_typed(mmid)
    }
}
