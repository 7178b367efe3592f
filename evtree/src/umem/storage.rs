//! Page file of the persistent pool.
//!
//! Page 0 holds the [`PoolHeader`]. Every other page holds one record or one
//! link of the free-page chain, wrapped in a CRC32-checksummed
//! [`PageWithChecksum`]. Each read or write touches exactly one page.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use super::{decode, encode, Mmid};
use crate::constants::{PAGE_OVERHEAD, PAGE_SIZE, POOL_MAGIC, POOL_VERSION};
use crate::errors::{EvtError, EvtResult};

pub(crate) type PageId = Mmid;

/// Pool metadata stored in page 0.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct PoolHeader {
    pub magic: u32,
    pub version: u32,
    pub page_size: u32,
    /// First page never handed out
    pub next_page: PageId,
    pub free_list_head: PageId,
    pub free_count: u64,
    pub root_object: Mmid,
    /// Page limit of the file, 0 when unbounded
    pub max_pages: u64,
    pub records: u64,
    pub bytes_in_use: u64,
}

impl PoolHeader {
    pub fn new(max_pages: u64) -> PoolHeader {
        PoolHeader {
            magic: POOL_MAGIC,
            version: POOL_VERSION,
            page_size: PAGE_SIZE as u32,
            next_page: 1,
            free_list_head: 0,
            free_count: 0,
            root_object: 0,
            max_pages,
            records: 0,
            bytes_in_use: 0,
        }
    }

    pub fn validate(&self) -> EvtResult<()> {
        if self.magic != POOL_MAGIC {
            return Err(EvtError::Corrupted(format!(
                "invalid pool magic {:#x}",
                self.magic
            )));
        }
        if self.version != POOL_VERSION {
            return Err(EvtError::Corrupted(format!(
                "unsupported pool version {}",
                self.version
            )));
        }
        if self.page_size as usize != PAGE_SIZE {
            return Err(EvtError::Corrupted(format!(
                "unsupported page size {}",
                self.page_size
            )));
        }
        Ok(())
    }
}

/// Content of a record page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) enum PageKind {
    /// A live record of `size` reserved bytes
    Data { size: u32, bytes: Vec<u8> },
    /// A released page, linked into the free chain
    Free { next_free: PageId },
}

/// A page wrapped with CRC32 checksum for corruption detection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct PageWithChecksum {
    pub checksum: u32,
    pub kind: PageKind,
}

impl PageWithChecksum {
    pub fn new(kind: PageKind) -> EvtResult<PageWithChecksum> {
        let checksum = crc32(&encode(&kind)?);
        Ok(PageWithChecksum { checksum, kind })
    }

    /// Verify checksum and consume self to return the page content
    pub fn into_kind(self) -> EvtResult<PageKind> {
        let expected = crc32(&encode(&self.kind)?);
        if self.checksum != expected {
            return Err(EvtError::Corrupted(format!(
                "page checksum mismatch (expected: {:x}, got: {:x})",
                expected, self.checksum
            )));
        }
        Ok(self.kind)
    }
}

/// CRC32-MPEG2 over `data`.
pub(crate) fn crc32(data: &[u8]) -> u32 {
    const POLY: u32 = 0x04C1_1DB7;
    let mut crc: u32 = 0xFFFF_FFFF;
    for &byte in data {
        crc ^= (byte as u32) << 24;
        for _ in 0..8 {
            crc = if crc & 0x8000_0000 != 0 {
                (crc << 1) ^ POLY
            } else {
                crc << 1
            };
        }
    }
    crc ^ 0xFFFF_FFFF
}

/// Largest record a page can hold.
pub(crate) const fn max_record_size() -> usize {
    PAGE_SIZE - PAGE_OVERHEAD
}

/// Encodes a page into its padded on-disk image.
pub(crate) fn encode_page(kind: &PageKind) -> EvtResult<Vec<u8>> {
    let mut bytes = encode(&PageWithChecksum::new(kind.clone())?)?;
    if bytes.len() > PAGE_SIZE {
        return Err(EvtError::InvalidArgument(format!(
            "page too large: {} bytes (max {})",
            bytes.len(),
            PAGE_SIZE
        )));
    }
    bytes.resize(PAGE_SIZE, 0);
    Ok(bytes)
}

/// Reads and writes single pages of the pool file.
pub(crate) struct PageStorage {
    file: RwLock<File>,
    path: PathBuf,
}

impl PageStorage {
    /// Create a new, empty pool file
    pub fn create(path: &Path) -> EvtResult<PageStorage> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;

        Ok(PageStorage {
            file: RwLock::new(file),
            path: path.to_path_buf(),
        })
    }

    /// Open an existing pool file
    pub fn open(path: &Path) -> EvtResult<PageStorage> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;

        Ok(PageStorage {
            file: RwLock::new(file),
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn read_header(&self) -> EvtResult<PoolHeader> {
        let buffer = self.read_raw(0)?;
        let header: PoolHeader = decode(&buffer)?;
        header.validate()?;
        Ok(header)
    }

    pub fn write_header(&self, header: &PoolHeader) -> EvtResult<()> {
        let mut bytes = encode(header)?;
        bytes.resize(PAGE_SIZE, 0);
        self.write_raw(0, &bytes)
    }

    /// Read a single page and verify its checksum.
    pub fn read_page(&self, page_id: PageId) -> EvtResult<PageKind> {
        if page_id == 0 {
            return Err(EvtError::InvalidArgument(
                "page 0 is reserved for the pool header".into(),
            ));
        }
        let buffer = self.read_raw(page_id)?;
        let page: PageWithChecksum = decode(&buffer)?;
        page.into_kind()
    }

    pub fn write_page(&self, page_id: PageId, kind: &PageKind) -> EvtResult<()> {
        if page_id == 0 {
            return Err(EvtError::InvalidArgument(
                "page 0 is reserved for the pool header".into(),
            ));
        }
        let bytes = encode_page(kind)?;
        self.write_raw(page_id, &bytes)
    }

    /// Write an already encoded page image.
    pub fn write_raw(&self, page_id: PageId, bytes: &[u8]) -> EvtResult<()> {
        if bytes.len() != PAGE_SIZE {
            return Err(EvtError::InvalidArgument(format!(
                "page image of {} bytes, expected {}",
                bytes.len(),
                PAGE_SIZE
            )));
        }
        let offset = page_id * PAGE_SIZE as u64;
        let mut file = self.file.write();
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(bytes)?;
        Ok(())
    }

    fn read_raw(&self, page_id: PageId) -> EvtResult<Vec<u8>> {
        let offset = page_id * PAGE_SIZE as u64;
        let mut file = self.file.write();
        file.seek(SeekFrom::Start(offset))?;
        let mut buffer = vec![0u8; PAGE_SIZE];
        file.read_exact(&mut buffer)?;
        Ok(buffer)
    }

    pub fn sync(&self) -> EvtResult<()> {
        self.file.write().sync_all()?;
        Ok(())
    }
}
