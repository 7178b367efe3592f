//! Opaque handles for contexts.
//!
//! Callers that cannot hold a [`ContextRef`] across an API boundary keep a
//! 64-bit [`EvtHandle`] instead and resolve it through a [`HandleTable`].
//! Every registered handle owns one context reference.

use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::errors::{EvtError, EvtResult};
use crate::tcx::ContextRef;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EvtHandle(pub u64);

impl EvtHandle {
    pub fn cookie(&self) -> u64 {
        self.0
    }
}

pub struct HandleTable {
    handles: DashMap<u64, ContextRef>,
    next_cookie: AtomicU64,
}

impl Default for HandleTable {
    fn default() -> Self {
        HandleTable::new()
    }
}

impl HandleTable {
    pub fn new() -> HandleTable {
        HandleTable {
            handles: DashMap::new(),
            next_cookie: AtomicU64::new(1),
        }
    }

    /// Registers `tcx`, taking a reference on it.
    pub fn tcx2hdl(&self, tcx: &ContextRef) -> EvtResult<EvtHandle> {
        tcx.addref()?;
        let cookie = self.next_cookie.fetch_add(1, Ordering::Relaxed);
        self.handles.insert(cookie, Arc::clone(tcx));
        Ok(EvtHandle(cookie))
    }

    /// Resolves `handle`, taking a reference the caller must drop with
    /// [`EvtContext::decref`](crate::EvtContext::decref).
    pub fn hdl2tcx(&self, handle: EvtHandle) -> EvtResult<ContextRef> {
        let tcx = self
            .handles
            .get(&handle.0)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or(EvtError::InvalidHandle)?;
        tcx.addref()?;
        Ok(tcx)
    }

    /// Unregisters `handle` and drops its reference.
    pub fn release(&self, handle: EvtHandle) -> EvtResult<()> {
        let (_, tcx) = self
            .handles
            .remove(&handle.0)
            .ok_or(EvtError::InvalidHandle)?;
        tcx.decref();
        Ok(())
    }

    /// Drops every registered handle, returning how many there were.
    pub fn teardown(&self) -> usize {
        let cookies: Vec<u64> = self.handles.iter().map(|entry| *entry.key()).collect();
        let mut released = 0;
        for cookie in cookies {
            if let Some((_, tcx)) = self.handles.remove(&cookie) {
                tcx.decref();
                released += 1;
            }
        }
        if released > 0 {
            log::debug!("Handle table teardown released {} handles", released);
        }
        released
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EvtConfig;
    use crate::tree::EvtTree;
    use crate::umem::UmemInstance;

    fn tree() -> EvtTree {
        EvtTree::create(UmemInstance::vmem(), &EvtConfig::default()).unwrap()
    }

    #[test]
    fn test_handle_round_trip() {
        let tree = tree();
        let table = HandleTable::new();
        let tcx = tree.context();

        let handle = table.tcx2hdl(tcx).unwrap();
        assert_eq!(tcx.ref_count(), 2);
        let resolved = table.hdl2tcx(handle).unwrap();
        assert!(Arc::ptr_eq(&resolved, tcx));
        assert_eq!(tcx.ref_count(), 3);
        resolved.decref();

        table.release(handle).unwrap();
        assert_eq!(tcx.ref_count(), 1);
        assert!(table.is_empty());
        assert!(matches!(table.hdl2tcx(handle), Err(EvtError::InvalidHandle)));
        assert!(matches!(table.release(handle), Err(EvtError::InvalidHandle)));
    }

    #[test]
    fn test_handle_outlives_tree() {
        let table = HandleTable::new();
        let handle = {
            let tree = tree();
            table.tcx2hdl(tree.context()).unwrap()
        };
        let tcx = table.hdl2tcx(handle).unwrap();
        assert!(tcx.is_alive());
        tcx.decref();

        assert_eq!(table.teardown(), 1);
        assert!(!tcx.is_alive());
        assert_eq!(table.teardown(), 0);
    }

    #[test]
    fn test_dead_context_not_registered() {
        let table = HandleTable::new();
        let tree = tree();
        let tcx = Arc::clone(tree.context());
        drop(tree);
        assert!(matches!(table.tcx2hdl(&tcx), Err(EvtError::InvalidHandle)));
        assert_eq!(table.len(), 0);
    }

    #[test]
    fn test_cookies_are_unique() {
        let tree = tree();
        let table = HandleTable::new();
        let a = table.tcx2hdl(tree.context()).unwrap();
        let b = table.tcx2hdl(tree.context()).unwrap();
        assert_ne!(a, b);
        assert_eq!(table.len(), 2);
        assert_eq!(table.teardown(), 2);
        assert!(tree.context().is_alive());
    }
}
