//! Volatile record pool.

use parking_lot::Mutex;
use std::collections::HashMap;

use super::{Mmid, UmemClass, UmemOps, UmemStats, MMID_NULL};
use crate::errors::{EvtError, EvtResult};

struct VmemRecord {
    size: usize,
    data: Vec<u8>,
}

struct VmemInner {
    records: HashMap<Mmid, VmemRecord>,
    next_id: Mmid,
    bytes_in_use: usize,
    root: Mmid,
    tx_depth: u32,
}

/// In-memory record arena.
///
/// Transactions are accepted but do nothing: a failed operation leaves
/// whatever it already wrote in place.
pub struct VmemPool {
    inner: Mutex<VmemInner>,
    max_bytes: Option<usize>,
}

impl Default for VmemPool {
    fn default() -> Self {
        VmemPool::new()
    }
}

impl VmemPool {
    pub fn new() -> VmemPool {
        VmemPool {
            inner: Mutex::new(VmemInner {
                records: HashMap::new(),
                next_id: 1,
                bytes_in_use: 0,
                root: MMID_NULL,
                tx_depth: 0,
            }),
            max_bytes: None,
        }
    }

    /// A pool refusing allocations once `max_bytes` are reserved.
    pub fn with_budget(max_bytes: usize) -> VmemPool {
        VmemPool {
            max_bytes: Some(max_bytes),
            ..VmemPool::new()
        }
    }
}

impl UmemOps for VmemPool {
    fn class(&self) -> UmemClass {
        UmemClass::Vmem
    }

    fn has_tx(&self) -> bool {
        false
    }

    fn tx_begin(&self) -> EvtResult<()> {
        self.inner.lock().tx_depth += 1;
        Ok(())
    }

    fn tx_commit(&self) -> EvtResult<()> {
        let mut inner = self.inner.lock();
        inner.tx_depth = inner.tx_depth.saturating_sub(1);
        Ok(())
    }

    fn tx_abort(&self) -> EvtResult<()> {
        let mut inner = self.inner.lock();
        if inner.tx_depth > 0 {
            log::warn!("Volatile pool cannot roll back, partial updates remain");
        }
        inner.tx_depth = inner.tx_depth.saturating_sub(1);
        Ok(())
    }

    fn alloc(&self, size: usize) -> EvtResult<Mmid> {
        let mut inner = self.inner.lock();
        if let Some(max) = self.max_bytes {
            if inner.bytes_in_use + size > max {
                return Err(EvtError::OutOfMemory(format!(
                    "volatile pool budget of {} bytes exhausted",
                    max
                )));
            }
        }
        let mut data = Vec::new();
        data.try_reserve(size)?;

        let id = inner.next_id;
        inner.next_id += 1;
        inner.bytes_in_use += size;
        inner.records.insert(id, VmemRecord { size, data });
        Ok(id)
    }

    fn free(&self, mmid: Mmid) -> EvtResult<()> {
        let mut inner = self.inner.lock();
        match inner.records.remove(&mmid) {
            Some(record) => {
                inner.bytes_in_use -= record.size;
                if inner.root == mmid {
                    inner.root = MMID_NULL;
                }
                Ok(())
            }
            None => Err(EvtError::InvalidArgument(format!(
                "free of unknown record {:#x}",
                mmid
            ))),
        }
    }

    fn read(&self, mmid: Mmid) -> EvtResult<Vec<u8>> {
        let inner = self.inner.lock();
        inner
            .records
            .get(&mmid)
            .map(|record| record.data.clone())
            .ok_or_else(|| EvtError::InvalidArgument(format!("unknown record {:#x}", mmid)))
    }

    fn write(&self, mmid: Mmid, bytes: &[u8]) -> EvtResult<()> {
        let mut inner = self.inner.lock();
        let record = inner
            .records
            .get_mut(&mmid)
            .ok_or_else(|| EvtError::InvalidArgument(format!("unknown record {:#x}", mmid)))?;
        if bytes.len() > record.size {
            return Err(EvtError::InvalidArgument(format!(
                "{} bytes do not fit record {:#x} of {} bytes",
                bytes.len(),
                mmid,
                record.size
            )));
        }
        record.data.clear();
        record.data.extend_from_slice(bytes);
        Ok(())
    }

    fn root_object(&self) -> EvtResult<Mmid> {
        Ok(self.inner.lock().root)
    }

    fn set_root_object(&self, mmid: Mmid) -> EvtResult<()> {
        let mut inner = self.inner.lock();
        if mmid != MMID_NULL && !inner.records.contains_key(&mmid) {
            return Err(EvtError::InvalidArgument(format!(
                "unknown root record {:#x}",
                mmid
            )));
        }
        inner.root = mmid;
        Ok(())
    }

    fn stats(&self) -> UmemStats {
        let inner = self.inner.lock();
        UmemStats {
            records: inner.records.len() as u64,
            bytes_in_use: inner.bytes_in_use as u64,
            capacity: self.max_bytes.map(|max| max as u64),
            tx_committed: 0,
            tx_aborted: 0,
        }
    }
}
