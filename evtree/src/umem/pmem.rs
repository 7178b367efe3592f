//! File-backed transactional pool.
//!
//! One record per page. A transaction is owned by the thread that began it:
//! its allocations, frees and writes are staged in memory and visible only to
//! that thread until the outermost commit, which goes through the redo
//! journal before touching the pool file. Other threads keep reading
//! committed pages, served from an LRU cache.

use parking_lot::{Mutex, RwLock};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::{self, ThreadId};

use super::cache::PageCache;
use super::journal::{Journal, JournalBody, Recovery};
use super::storage::{encode_page, max_record_size, PageId, PageKind, PageStorage, PoolHeader};
use super::{Mmid, UmemClass, UmemOps, UmemStats, MMID_NULL};
use crate::config::PmemConfig;
use crate::errors::{EvtError, EvtResult};

struct TxState {
    owner: ThreadId,
    depth: u32,
    /// Set by an abort in a nested scope, the outermost end discards
    doomed: bool,
    header: PoolHeader,
    pages: BTreeMap<PageId, PageKind>,
}

/// Persistent memory pool backed by a page file and a redo journal.
pub struct PmemPool {
    storage: PageStorage,
    journal: Mutex<Journal>,
    cache: Mutex<PageCache>,
    /// Committed pool header
    header: RwLock<PoolHeader>,
    tx: Mutex<Option<TxState>>,
    /// Held exclusively while committed pages are rewritten
    commit_lock: RwLock<()>,
    sync_on_commit: bool,
    recovery: Recovery,
    tx_committed: AtomicU64,
    tx_aborted: AtomicU64,
}

impl PmemPool {
    /// Creates a new pool file, replacing any file at `path`.
    pub fn create(path: &Path, config: &PmemConfig) -> EvtResult<PmemPool> {
        let storage = PageStorage::create(path)?;
        let header = PoolHeader::new(config.max_pages().unwrap_or(0));
        storage.write_header(&header)?;
        storage.sync()?;

        let mut journal = Journal::open(path)?;
        journal.clear()?;
        log::debug!("Created pool {:?}", path);

        Ok(PmemPool::assemble(
            storage,
            journal,
            header,
            config,
            Recovery::Clean,
        ))
    }

    /// Opens an existing pool file, replaying an interrupted commit first.
    pub fn open(path: &Path, config: &PmemConfig) -> EvtResult<PmemPool> {
        let storage = PageStorage::open(path)?;
        let mut journal = Journal::open(path)?;
        let recovery = journal.recover(&storage)?;
        if recovery == Recovery::Discarded {
            log::warn!("Discarded incomplete journal {:?}", journal.path());
        }

        let mut header = storage.read_header()?;
        if let Some(max_pages) = config.max_pages() {
            header.max_pages = max_pages;
        }
        log::debug!(
            "Opened pool {:?}: {} records, {} free pages",
            path,
            header.records,
            header.free_count
        );

        Ok(PmemPool::assemble(storage, journal, header, config, recovery))
    }

    fn assemble(
        storage: PageStorage,
        journal: Journal,
        header: PoolHeader,
        config: &PmemConfig,
        recovery: Recovery,
    ) -> PmemPool {
        PmemPool {
            storage,
            journal: Mutex::new(journal),
            cache: Mutex::new(PageCache::new(config.cache_pages())),
            header: RwLock::new(header),
            tx: Mutex::new(None),
            commit_lock: RwLock::new(()),
            sync_on_commit: config.sync_on_commit(),
            recovery,
            tx_committed: AtomicU64::new(0),
            tx_aborted: AtomicU64::new(0),
        }
    }

    pub fn path(&self) -> &Path {
        self.storage.path()
    }

    /// Whether opening replayed a journaled commit.
    pub fn replayed_journal(&self) -> bool {
        matches!(self.recovery, Recovery::Replayed(_))
    }

    /// Number of pages currently held by the page cache.
    pub fn cached_pages(&self) -> usize {
        self.cache.lock().len()
    }

    pub fn free_pages(&self) -> u64 {
        self.header.read().free_count
    }

    fn owns_tx(&self) -> bool {
        let me = thread::current().id();
        matches!(self.tx.lock().as_ref(), Some(state) if state.owner == me)
    }

    /// Runs `op` on the staged state of the caller's transaction, wrapping it
    /// in a single-operation transaction when none is open.
    fn staged<R, F>(&self, op: F) -> EvtResult<R>
    where
        F: FnOnce(&mut TxState) -> EvtResult<R>,
    {
        let implicit = !self.owns_tx();
        if implicit {
            self.tx_begin()?;
        }

        let result = {
            let mut guard = self.tx.lock();
            match guard.as_mut() {
                Some(state) => op(state),
                None => Err(EvtError::Transaction("transaction vanished".into())),
            }
        };

        if !implicit {
            return result;
        }
        match result {
            Ok(value) => {
                self.tx_commit()?;
                Ok(value)
            }
            Err(err) => {
                self.tx_abort()?;
                Err(err)
            }
        }
    }

    fn read_committed(&self, page_id: PageId) -> EvtResult<PageKind> {
        let _guard = self.commit_lock.read();
        if let Some(page) = self.cache.lock().get(page_id) {
            return Ok(page);
        }
        let page = self.storage.read_page(page_id)?;
        self.cache.lock().insert(page_id, page.clone());
        Ok(page)
    }

    fn page_in_tx(&self, state: &TxState, page_id: PageId) -> EvtResult<PageKind> {
        if page_id == MMID_NULL || page_id >= state.header.next_page {
            return Err(EvtError::InvalidArgument(format!(
                "unknown record {:#x}",
                page_id
            )));
        }
        match state.pages.get(&page_id) {
            Some(page) => Ok(page.clone()),
            None => self.read_committed(page_id),
        }
    }

    fn commit_staged(&self, state: TxState) -> EvtResult<()> {
        let committed_header = self.header.read().clone();
        if state.pages.is_empty() && state.header == committed_header {
            return Ok(());
        }

        let mut images = Vec::with_capacity(state.pages.len());
        for (page_id, page) in &state.pages {
            images.push((*page_id, encode_page(page)?));
        }
        let body = JournalBody {
            header: state.header,
            pages: images,
        };

        let mut journal = self.journal.lock();
        journal.write(&body)?;
        {
            let _guard = self.commit_lock.write();
            super::journal::apply(&self.storage, &body)?;
            if self.sync_on_commit {
                self.storage.sync()?;
            }
            let mut cache = self.cache.lock();
            for (page_id, page) in state.pages {
                cache.insert(page_id, page);
            }
            *self.header.write() = body.header;
        }
        journal.clear()?;
        Ok(())
    }
}

fn data_of(page_id: PageId, page: PageKind) -> EvtResult<(u32, Vec<u8>)> {
    match page {
        PageKind::Data { size, bytes } => Ok((size, bytes)),
        PageKind::Free { .. } => Err(EvtError::InvalidArgument(format!(
            "record {:#x} was freed",
            page_id
        ))),
    }
}

impl UmemOps for PmemPool {
    fn class(&self) -> UmemClass {
        UmemClass::Pmem
    }

    fn has_tx(&self) -> bool {
        true
    }

    fn tx_begin(&self) -> EvtResult<()> {
        let me = thread::current().id();
        let mut guard = self.tx.lock();
        match guard.as_mut() {
            Some(state) if state.owner == me => {
                state.depth += 1;
                Ok(())
            }
            Some(_) => Err(EvtError::Transaction(
                "pool transaction is held by another thread".into(),
            )),
            None => {
                *guard = Some(TxState {
                    owner: me,
                    depth: 1,
                    doomed: false,
                    header: self.header.read().clone(),
                    pages: BTreeMap::new(),
                });
                Ok(())
            }
        }
    }

    fn tx_commit(&self) -> EvtResult<()> {
        let me = thread::current().id();
        let mut guard = self.tx.lock();
        let state = match guard.as_mut() {
            Some(state) if state.owner == me => state,
            _ => return Err(EvtError::Transaction("commit without transaction".into())),
        };
        state.depth -= 1;
        if state.depth > 0 {
            return Ok(());
        }

        let state = match guard.take() {
            Some(state) => state,
            None => return Err(EvtError::Transaction("commit without transaction".into())),
        };
        if state.doomed {
            self.tx_aborted.fetch_add(1, Ordering::Relaxed);
            return Err(EvtError::Transaction(
                "transaction was aborted in a nested scope".into(),
            ));
        }

        // the tx lock stays held so that no other transaction starts from a
        // header older than this commit
        match self.commit_staged(state) {
            Ok(()) => {
                self.tx_committed.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(err) => {
                log::error!("Commit to {:?} failed: {}", self.storage.path(), err);
                self.cache.lock().clear();
                Err(err)
            }
        }
    }

    fn tx_abort(&self) -> EvtResult<()> {
        let me = thread::current().id();
        let mut guard = self.tx.lock();
        let state = match guard.as_mut() {
            Some(state) if state.owner == me => state,
            _ => return Err(EvtError::Transaction("abort without transaction".into())),
        };
        state.doomed = true;
        state.depth -= 1;
        if state.depth == 0 {
            if let Some(state) = guard.take() {
                log::debug!("Aborted transaction, dropped {} staged pages", state.pages.len());
            }
            self.tx_aborted.fetch_add(1, Ordering::Relaxed);
        }
        Ok(())
    }

    fn alloc(&self, size: usize) -> EvtResult<Mmid> {
        if size > max_record_size() {
            return Err(EvtError::InvalidArgument(format!(
                "record of {} bytes exceeds the page capacity of {}",
                size,
                max_record_size()
            )));
        }
        self.staged(|state| {
            let page_id = if state.header.free_list_head != MMID_NULL {
                let page_id = state.header.free_list_head;
                match self.page_in_tx(state, page_id)? {
                    PageKind::Free { next_free } => {
                        state.header.free_list_head = next_free;
                        state.header.free_count -= 1;
                        page_id
                    }
                    PageKind::Data { .. } => {
                        return Err(EvtError::Corrupted(format!(
                            "free list names live page {}",
                            page_id
                        )));
                    }
                }
            } else {
                let max_pages = state.header.max_pages;
                if max_pages != 0 && state.header.next_page >= max_pages {
                    return Err(EvtError::OutOfMemory(format!(
                        "pool is full ({} pages)",
                        max_pages
                    )));
                }
                let page_id = state.header.next_page;
                state.header.next_page += 1;
                page_id
            };

            state.pages.insert(
                page_id,
                PageKind::Data {
                    size: size as u32,
                    bytes: Vec::new(),
                },
            );
            state.header.records += 1;
            state.header.bytes_in_use += size as u64;
            Ok(page_id)
        })
    }

    fn free(&self, mmid: Mmid) -> EvtResult<()> {
        self.staged(|state| {
            let (size, _) = data_of(mmid, self.page_in_tx(state, mmid)?)?;
            state.pages.insert(
                mmid,
                PageKind::Free {
                    next_free: state.header.free_list_head,
                },
            );
            state.header.free_list_head = mmid;
            state.header.free_count += 1;
            state.header.records -= 1;
            state.header.bytes_in_use -= size as u64;
            if state.header.root_object == mmid {
                state.header.root_object = MMID_NULL;
            }
            Ok(())
        })
    }

    fn read(&self, mmid: Mmid) -> EvtResult<Vec<u8>> {
        let me = thread::current().id();
        {
            let guard = self.tx.lock();
            if let Some(state) = guard.as_ref().filter(|state| state.owner == me) {
                let page = self.page_in_tx(state, mmid)?;
                return data_of(mmid, page).map(|(_, bytes)| bytes);
            }
        }

        if mmid == MMID_NULL || mmid >= self.header.read().next_page {
            return Err(EvtError::InvalidArgument(format!(
                "unknown record {:#x}",
                mmid
            )));
        }
        data_of(mmid, self.read_committed(mmid)?).map(|(_, bytes)| bytes)
    }

    fn write(&self, mmid: Mmid, bytes: &[u8]) -> EvtResult<()> {
        self.staged(|state| {
            let (size, _) = data_of(mmid, self.page_in_tx(state, mmid)?)?;
            if bytes.len() > size as usize {
                return Err(EvtError::InvalidArgument(format!(
                    "{} bytes do not fit record {:#x} of {} bytes",
                    bytes.len(),
                    mmid,
                    size
                )));
            }
            state.pages.insert(
                mmid,
                PageKind::Data {
                    size,
                    bytes: bytes.to_vec(),
                },
            );
            Ok(())
        })
    }

    fn root_object(&self) -> EvtResult<Mmid> {
        let me = thread::current().id();
        if let Some(state) = self.tx.lock().as_ref().filter(|state| state.owner == me) {
            return Ok(state.header.root_object);
        }
        Ok(self.header.read().root_object)
    }

    fn set_root_object(&self, mmid: Mmid) -> EvtResult<()> {
        self.staged(|state| {
            if mmid != MMID_NULL {
                data_of(mmid, self.page_in_tx(state, mmid)?)?;
            }
            state.header.root_object = mmid;
            Ok(())
        })
    }

    fn stats(&self) -> UmemStats {
        let header = self.header.read();
        UmemStats {
            records: header.records,
            bytes_in_use: header.bytes_in_use,
            capacity: (header.max_pages != 0)
                .then(|| (header.max_pages - 1) * max_record_size() as u64),
            tx_committed: self.tx_committed.load(Ordering::Relaxed),
            tx_aborted: self.tx_aborted.load(Ordering::Relaxed),
        }
    }
}
