//! Constants for the extent tree and its memory pools.

/// Maximum depth of a tree, which is also the capacity of a trace stack
pub const EVT_TRACE_MAX: usize = 32;

/// Smallest accepted tree order
pub const EVT_ORDER_MIN: u16 = 4;

/// Largest accepted tree order
pub const EVT_ORDER_MAX: u16 = 128;

/// Order used when the configuration does not name one
pub const EVT_ORDER_DEFAULT: u16 = 16;

/// Magic number of a live context
pub const EVT_HDL_ALIVE: u32 = 0xbabe_cafe;

/// Magic number of a context whose last reference was dropped
pub const EVT_HDL_DEAD: u32 = 0xdead_beef;

/// Initial capacity of the entry list embedded in every context
pub const EVT_ENT_LIST_INIT: usize = 16;

/// Default page size (16KB) of a persistent pool, one record per page
pub const PAGE_SIZE: usize = 16384;

/// Bytes of every page reserved for the checksum wrapper
pub const PAGE_OVERHEAD: usize = 64;

/// Default cache size in number of pages (16MB with 16KB pages)
pub const DEFAULT_CACHE_PAGES: usize = 1024;

/// Magic number for pool file identification
pub const POOL_MAGIC: u32 = 0x4556_5450; // "EVTP"

/// Pool file format version
pub const POOL_VERSION: u32 = 1;

/// Suffix of the redo journal kept next to a pool file
pub const JOURNAL_SUFFIX: &str = "journal";
