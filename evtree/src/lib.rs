//! # evtree - Epoch-Versioned Extent Tree
//!
//! An R-tree over two dimensions, byte offset and epoch, that records which
//! version of which byte range lives where. Every entry maps an extent
//! rectangle `[off_lo, off_hi] x [epc_lo, epc_hi]` to the location of its data.
//!
//! ## Features
//!
//! - **Overlap Classification**: every pair of extents falls in exactly one
//!   [`OverlapKind`], which drives capping of older versions
//! - **Transactional Memory**: nodes live in a [`UmemInstance`], either the
//!   volatile [`VmemPool`] or the journaled, file-backed [`PmemPool`]
//! - **Pluggable Policies**: placement and split rules behind [`EvtPolicy`],
//!   chosen by the tree's feature bits
//! - **Cursors**: bidirectional [`EvtIterator`] over every entry
//! - **Handles**: reference-counted contexts, reachable by opaque [`EvtHandle`]
//!
//! ## Classifying extents
//!
//! ```rust
//! use evtree::{EvtRect, classify, OverlapKind};
//!
//! let old = EvtRect::new(0, 99, 1, 1);
//! let new = EvtRect::new(0, 199, 5, 5);
//! assert_eq!(classify(&old, &new), OverlapKind::Capping);
//! assert_eq!(classify(&new, &old), OverlapKind::Capped);
//! ```
//!
//! ## Tree API
//!
//! ```rust,no_run
//! use evtree::{EvtConfig, EvtFindOpc, EvtPtr, EvtRect, EvtTree, PmemConfig, PmemPool, UmemInstance};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let pool = PmemPool::create(std::path::Path::new("extents.pool"), &PmemConfig::default())?;
//! let umem = UmemInstance::new(pool);
//! let tree = EvtTree::create(umem.clone(), &EvtConfig::default())?;
//! umem.set_root_object(tree.root_mmid().id())?;
//!
//! // version 3 of bytes 0..4096
//! tree.insert(&EvtRect::at_epoch(0, 4095, 3), EvtPtr::new(0x10000, 1, 0))?;
//!
//! // what a write of bytes 0..8192 at epoch 7 would cap
//! let captured = tree.find(&EvtRect::at_epoch(0, 8191, 7), EvtFindOpc::Cap)?;
//! assert_eq!(captured.len(), 1);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod constants;
pub mod errors;
pub mod find;
pub mod handle;
pub mod insert;
pub mod integrity;
pub mod iter;
pub mod node;
pub mod policy;
pub mod rect;
pub mod tcx;
pub mod trace;
pub mod tree;
pub mod umem;

mod search;

// Re-export the tree API
pub use config::{EvtConfig, EvtConfigBuilder, PmemConfig, PmemConfigBuilder};
pub use errors::{EvtError, EvtResult};
pub use find::{EntryList, EvtFindOpc};
pub use handle::{EvtHandle, HandleTable};
pub use insert::InsertOutcome;
pub use integrity::{EvtStats, IntegrityReport};
pub use iter::{EvtIterator, IterProbe, IterState};
pub use node::{EvtEntry, EvtLeafEntry, EvtPtr, EvtRoot, RootMmid};
pub use rect::{classify, classify_mbr, EvtRect, OverlapKind, EPOCH_MAX};
pub use tcx::{ContextRef, EvtContext};
pub use tree::EvtTree;

// Re-export policies
pub use policy::{
    AxisSplitPolicy, EvtPolicy, EvtSplit, SortedOffsetPolicy, EVT_FEATS_SUPPORTED,
    EVT_FEAT_DEFAULT, EVT_FEAT_SORT_SOFF, EVT_FEAT_SPLIT_AXIS,
};

// Re-export memory pools
pub use umem::{
    Mmid, PmemPool, Tmmid, UmemClass, UmemInstance, UmemOps, UmemStats, VmemPool, MMID_NULL,
};
