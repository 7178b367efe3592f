//! Memory and transaction adapter.
//!
//! The tree never touches memory directly. Every record it owns lives in a
//! pool behind [`UmemOps`], addressed by an opaque [`Mmid`]. Two pools ship
//! with the crate:
//!
//! - [`VmemPool`]: a volatile arena, without transactions
//! - [`PmemPool`]: a page file with a redo journal and nested transactions
//!
//! [`UmemInstance`] is the cloneable handle held by tree contexts. It adds
//! typed access on top of the byte-oriented trait, encoding records with
//! bincode.

mod cache;
mod journal;
mod pmem;
mod storage;
mod vmem;

pub use pmem::PmemPool;
pub use vmem::VmemPool;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use std::sync::Arc;

use crate::errors::{EvtError, EvtResult};

/// Memory ID of a pool record. `MMID_NULL` never names a record.
pub type Mmid = u64;

pub const MMID_NULL: Mmid = 0;

/// Kind of pool behind an adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UmemClass {
    Vmem,
    Pmem,
}

/// Usage counters of a pool.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UmemStats {
    /// Live records
    pub records: u64,
    /// Bytes reserved by live records
    pub bytes_in_use: u64,
    /// Bytes the pool may hand out, if bounded
    pub capacity: Option<u64>,
    pub tx_committed: u64,
    pub tx_aborted: u64,
}

/// Byte-level operations every memory pool provides.
///
/// `read` returns a copy of the record; callers write modified copies back
/// with `write`. Inside a transaction, mutations become durable only on the
/// outermost `tx_commit` and are discarded by `tx_abort`.
pub trait UmemOps: Send + Sync {
    fn class(&self) -> UmemClass;

    /// Whether the pool really provides transactions.
    fn has_tx(&self) -> bool;

    fn tx_begin(&self) -> EvtResult<()>;

    fn tx_commit(&self) -> EvtResult<()>;

    fn tx_abort(&self) -> EvtResult<()>;

    /// Reserves a record able to hold `size` bytes.
    fn alloc(&self, size: usize) -> EvtResult<Mmid>;

    fn free(&self, mmid: Mmid) -> EvtResult<()>;

    fn read(&self, mmid: Mmid) -> EvtResult<Vec<u8>>;

    fn write(&self, mmid: Mmid, bytes: &[u8]) -> EvtResult<()>;

    /// The record registered as the pool root, `MMID_NULL` if none.
    fn root_object(&self) -> EvtResult<Mmid>;

    fn set_root_object(&self, mmid: Mmid) -> EvtResult<()>;

    fn stats(&self) -> UmemStats;
}

/// A memory ID carrying the type of the record it addresses.
pub struct Tmmid<T> {
    id: Mmid,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Tmmid<T> {
    pub const NULL: Tmmid<T> = Tmmid {
        id: MMID_NULL,
        _marker: PhantomData,
    };

    pub fn from_raw(id: Mmid) -> Tmmid<T> {
        Tmmid {
            id,
            _marker: PhantomData,
        }
    }

    pub fn id(&self) -> Mmid {
        self.id
    }

    pub fn is_null(&self) -> bool {
        self.id == MMID_NULL
    }
}

impl<T> Clone for Tmmid<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Tmmid<T> {}

impl<T> PartialEq for Tmmid<T> {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl<T> Eq for Tmmid<T> {}

impl<T> Hash for Tmmid<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl<T> Default for Tmmid<T> {
    fn default() -> Self {
        Tmmid::NULL
    }
}

impl<T> fmt::Debug for Tmmid<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Tmmid({:#x})", self.id)
    }
}

impl<T> Serialize for Tmmid<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(self.id)
    }
}

impl<'de, T> Deserialize<'de> for Tmmid<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        u64::deserialize(deserializer).map(Tmmid::from_raw)
    }
}

pub(crate) fn encode<T: Serialize>(value: &T) -> EvtResult<Vec<u8>> {
    Ok(bincode::serde::encode_to_vec(
        value,
        bincode::config::legacy(),
    )?)
}

pub(crate) fn decode<T: DeserializeOwned>(bytes: &[u8]) -> EvtResult<T> {
    let (value, _) = bincode::serde::decode_from_slice(bytes, bincode::config::legacy())?;
    Ok(value)
}

/// Cloneable handle on a memory pool.
#[derive(Clone)]
pub struct UmemInstance {
    ops: Arc<dyn UmemOps>,
}

impl fmt::Debug for UmemInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UmemInstance")
            .field("class", &self.ops.class())
            .finish()
    }
}

impl UmemInstance {
    pub fn new<P: UmemOps + 'static>(pool: P) -> UmemInstance {
        UmemInstance { ops: Arc::new(pool) }
    }

    pub fn from_arc(ops: Arc<dyn UmemOps>) -> UmemInstance {
        UmemInstance { ops }
    }

    /// An unbounded volatile pool.
    pub fn vmem() -> UmemInstance {
        UmemInstance::new(VmemPool::new())
    }

    pub fn class(&self) -> UmemClass {
        self.ops.class()
    }

    pub fn has_tx(&self) -> bool {
        self.ops.has_tx()
    }

    pub fn tx_begin(&self) -> EvtResult<()> {
        self.ops.tx_begin()
    }

    pub fn tx_commit(&self) -> EvtResult<()> {
        self.ops.tx_commit()
    }

    pub fn tx_abort(&self) -> EvtResult<()> {
        self.ops.tx_abort()
    }

    pub fn alloc(&self, size: usize) -> EvtResult<Mmid> {
        self.ops.alloc(size)
    }

    pub fn free(&self, mmid: Mmid) -> EvtResult<()> {
        self.ops.free(mmid)
    }

    pub fn read(&self, mmid: Mmid) -> EvtResult<Vec<u8>> {
        self.ops.read(mmid)
    }

    pub fn write(&self, mmid: Mmid, bytes: &[u8]) -> EvtResult<()> {
        self.ops.write(mmid, bytes)
    }

    pub fn root_object(&self) -> EvtResult<Mmid> {
        self.ops.root_object()
    }

    pub fn set_root_object(&self, mmid: Mmid) -> EvtResult<()> {
        self.ops.set_root_object(mmid)
    }

    pub fn stats(&self) -> UmemStats {
        self.ops.stats()
    }

    /// Allocates a record of `size` bytes and stores `value` in it.
    pub fn alloc_typed<T: Serialize>(&self, value: &T, size: usize) -> EvtResult<Tmmid<T>> {
        let bytes = encode(value)?;
        let mmid = self.ops.alloc(size.max(bytes.len()))?;
        self.ops.write(mmid, &bytes)?;
        Ok(Tmmid::from_raw(mmid))
    }

    pub fn fetch<T: DeserializeOwned>(&self, id: Tmmid<T>) -> EvtResult<T> {
        if id.is_null() {
            return Err(EvtError::InvalidArgument("fetch of a NULL record".into()));
        }
        let bytes = self.ops.read(id.id())?;
        decode(&bytes)
    }

    pub fn store<T: Serialize>(&self, id: Tmmid<T>, value: &T) -> EvtResult<()> {
        let bytes = encode(value)?;
        self.ops.write(id.id(), &bytes)
    }

    pub fn free_typed<T>(&self, id: Tmmid<T>) -> EvtResult<()> {
        self.ops.free(id.id())
    }

    /// Runs `op` inside a transaction, committing on success.
    ///
    /// On failure the transaction is aborted and the original error returned.
    pub fn with_tx<R, F>(&self, name: &str, op: F) -> EvtResult<R>
    where
        F: FnOnce() -> EvtResult<R>,
    {
        self.ops.tx_begin()?;
        match op() {
            Ok(value) => {
                self.ops.tx_commit()?;
                Ok(value)
            }
            Err(err) => {
                log::error!("{} failed, aborting transaction: {}", name, err);
                if let Err(abort_err) = self.ops.tx_abort() {
                    log::error!("Abort after failed {} also failed: {}", name, abort_err);
                }
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Record {
        name: String,
        next: Tmmid<Record>,
    }

    #[test]
    fn test_tmmid_null_and_raw() {
        let id: Tmmid<Record> = Tmmid::default();
        assert!(id.is_null());
        assert_eq!(id, Tmmid::NULL);
        let id: Tmmid<Record> = Tmmid::from_raw(7);
        assert_eq!(id.id(), 7);
        assert!(!id.is_null());
        assert_eq!(format!("{:?}", id), "Tmmid(0x7)");
    }

    #[test]
    fn test_typed_records() {
        let umem = UmemInstance::vmem();
        let tail = umem
            .alloc_typed(
                &Record {
                    name: "tail".into(),
                    next: Tmmid::NULL,
                },
                64,
            )
            .unwrap();
        let head = umem
            .alloc_typed(
                &Record {
                    name: "head".into(),
                    next: tail,
                },
                64,
            )
            .unwrap();

        let fetched = umem.fetch(head).unwrap();
        assert_eq!(fetched.next, tail);
        assert_eq!(umem.fetch(fetched.next).unwrap().name, "tail");

        umem.store(
            tail,
            &Record {
                name: "renamed".into(),
                next: Tmmid::NULL,
            },
        )
        .unwrap();
        assert_eq!(umem.fetch(tail).unwrap().name, "renamed");

        umem.free_typed(tail).unwrap();
        assert!(umem.fetch(tail).is_err());
    }

    #[test]
    fn test_fetch_null_rejected() {
        let umem = UmemInstance::vmem();
        let err = umem.fetch::<Record>(Tmmid::NULL).unwrap_err();
        assert!(matches!(err, EvtError::InvalidArgument(_)));
    }

    #[test]
    fn test_with_tx_propagates_error() {
        let umem = UmemInstance::vmem();
        let result: EvtResult<()> =
            umem.with_tx("test", || Err(EvtError::NotFound));
        assert!(matches!(result, Err(EvtError::NotFound)));
        assert_eq!(umem.with_tx("test", || Ok(5)).unwrap(), 5);
    }
}
