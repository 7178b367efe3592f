//! Redo journal of the persistent pool.
//!
//! A commit first writes every staged page image plus the new pool header to
//! `<pool>.journal` and syncs it. Only then are pages written in place. If the
//! process dies in between, the next open finds a complete journal and
//! replays it; a torn or corrupt journal is discarded, since the pool file
//! was not touched yet.

use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use super::storage::{crc32, PageId, PageStorage, PoolHeader};
use super::{decode, encode};
use crate::constants::{JOURNAL_SUFFIX, POOL_MAGIC};
use crate::errors::{EvtError, EvtResult};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct JournalBody {
    pub header: PoolHeader,
    /// Encoded page images, in commit order
    pub pages: Vec<(PageId, Vec<u8>)>,
}

#[derive(Debug, Serialize, Deserialize)]
struct JournalRecord {
    magic: u32,
    checksum: u32,
    body: Vec<u8>,
}

/// Outcome of scanning the journal at open.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Recovery {
    Clean,
    Replayed(usize),
    Discarded,
}

pub(crate) struct Journal {
    file: File,
    path: PathBuf,
}

/// Journal path of the pool at `pool_path`.
pub(crate) fn journal_path(pool_path: &Path) -> PathBuf {
    let mut name = pool_path.as_os_str().to_owned();
    name.push(".");
    name.push(JOURNAL_SUFFIX);
    PathBuf::from(name)
}

impl Journal {
    pub fn open(pool_path: &Path) -> EvtResult<Journal> {
        let path = journal_path(pool_path);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;
        Ok(Journal { file, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Durably records a commit.
    pub fn write(&mut self, body: &JournalBody) -> EvtResult<()> {
        let body = encode(body)?;
        let record = JournalRecord {
            magic: POOL_MAGIC,
            checksum: crc32(&body),
            body,
        };
        let bytes = encode(&record)?;

        self.file.set_len(0)?;
        self.file.seek(SeekFrom::Start(0))?;
        self.file.write_all(&(bytes.len() as u64).to_le_bytes())?;
        self.file.write_all(&bytes)?;
        self.file.sync_all()?;
        Ok(())
    }

    /// Forgets the last commit once its pages are in place.
    pub fn clear(&mut self) -> EvtResult<()> {
        self.file.set_len(0)?;
        self.file.sync_all()?;
        Ok(())
    }

    /// Reads a complete journal, `None` if empty, torn or corrupt.
    pub fn read(&mut self) -> EvtResult<Option<JournalBody>> {
        let mut bytes = Vec::new();
        self.file.seek(SeekFrom::Start(0))?;
        self.file.read_to_end(&mut bytes)?;
        if bytes.is_empty() {
            return Ok(None);
        }
        if bytes.len() < 8 {
            log::warn!("Discarding torn journal {:?}", self.path);
            return Ok(None);
        }

        let mut len = [0u8; 8];
        len.copy_from_slice(&bytes[..8]);
        let len = u64::from_le_bytes(len) as usize;
        if bytes.len() - 8 < len {
            log::warn!(
                "Discarding torn journal {:?}: {} of {} bytes",
                self.path,
                bytes.len() - 8,
                len
            );
            return Ok(None);
        }

        let record: JournalRecord = match decode(&bytes[8..8 + len]) {
            Ok(record) => record,
            Err(err) => {
                log::warn!("Discarding unreadable journal {:?}: {}", self.path, err);
                return Ok(None);
            }
        };
        if record.magic != POOL_MAGIC || crc32(&record.body) != record.checksum {
            log::warn!("Discarding journal {:?} with bad checksum", self.path);
            return Ok(None);
        }
        Ok(Some(decode(&record.body)?))
    }

    /// Brings the pool file up to date with a complete journal, if any.
    pub fn recover(&mut self, storage: &PageStorage) -> EvtResult<Recovery> {
        let recovery = match self.read()? {
            Some(body) => {
                body.header.validate()?;
                apply(storage, &body)?;
                storage.sync()?;
                log::info!(
                    "Replayed {} journaled pages into {:?}",
                    body.pages.len(),
                    storage.path()
                );
                Recovery::Replayed(body.pages.len())
            }
            None if self.file.metadata()?.len() > 0 => Recovery::Discarded,
            None => Recovery::Clean,
        };
        if recovery != Recovery::Clean {
            self.clear()?;
        }
        Ok(recovery)
    }
}

/// Writes the journaled pages and header in place.
pub(crate) fn apply(storage: &PageStorage, body: &JournalBody) -> EvtResult<()> {
    for (page_id, image) in &body.pages {
        if *page_id == 0 {
            return Err(EvtError::Corrupted("journal names page 0".into()));
        }
        storage.write_raw(*page_id, image)?;
    }
    storage.write_header(&body.header)
}
