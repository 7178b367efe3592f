//! Error and result types shared by every layer of the tree.

use std::io;
use thiserror::Error;

use crate::constants::EVT_TRACE_MAX;

/// Errors that can occur in extent tree and memory pool operations
#[derive(Debug, Error)]
pub enum EvtError {
    /// An allocation could not be satisfied by the pool or the process heap.
    #[error("Out of memory: {0}")]
    OutOfMemory(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The tree is deeper than a trace stack can describe.
    #[error("Trace overflow: depth {0} exceeds the limit of {max}", max = EVT_TRACE_MAX)]
    Overflow(usize),

    #[error("Not found")]
    NotFound,

    /// A capping query met an overlap it cannot resolve.
    #[error("Ambiguous overlap: {0}")]
    AmbiguousOverlap(String),

    #[error("Invalid or closed handle")]
    InvalidHandle,

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Corrupted: {0}")]
    Corrupted(String),

    #[error("Transaction error: {0}")]
    Transaction(String),
}

impl EvtError {
    /// Errors that indicate a broken invariant rather than a caller mistake.
    pub fn is_fatal(&self) -> bool {
        matches!(self, EvtError::Overflow(_) | EvtError::Corrupted(_))
    }
}

impl From<bincode::error::EncodeError> for EvtError {
    fn from(err: bincode::error::EncodeError) -> Self {
        EvtError::Serialization(err.to_string())
    }
}

impl From<bincode::error::DecodeError> for EvtError {
    fn from(err: bincode::error::DecodeError) -> Self {
        EvtError::Serialization(err.to_string())
    }
}

impl From<std::collections::TryReserveError> for EvtError {
    fn from(err: std::collections::TryReserveError) -> Self {
        EvtError::OutOfMemory(err.to_string())
    }
}

/// Result type for tree and pool operations
pub type EvtResult<T> = Result<T, EvtError>;
