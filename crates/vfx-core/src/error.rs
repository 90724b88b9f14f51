//! Error types for the tile cache and image engine.
//!
//! This module provides the single error enum shared by `vfx-cache` and
//! `vfx-image`. Failures fall into three groups:
//!
//! - **Contract violations** detected while building an image
//!   ([`IncompatibleStorage`](Error::IncompatibleStorage),
//!   [`BufferMismatch`](Error::BufferMismatch),
//!   [`UnsupportedBitDepth`](Error::UnsupportedBitDepth)).
//! - **Allocation failures** when neither host memory nor the cache can
//!   provide a new buffer ([`AllocationFailed`](Error::AllocationFailed)).
//! - **Storage failures** on the disk segment ([`InvalidSegment`](Error::InvalidSegment),
//!   [`Io`](Error::Io)).
//!
//! Render aborts are not errors: they are reported through return values.
//!
//! # Usage
//!
//! ```rust
//! use vfx_core::{Error, Result};
//!
//! fn reserve(bytes: usize, budget: usize) -> Result<()> {
//!     if bytes > budget {
//!         return Err(Error::allocation_failed(bytes, "cache budget exhausted"));
//!     }
//!     Ok(())
//! }
//! assert!(reserve(10, 5).unwrap_err().is_allocation_error());
//! ```

use thiserror::Error;

use crate::format::BitDepth;

/// Result type alias using [`Error`] as the error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by storage allocation, cache access and pixel operations.
#[derive(Debug, Error)]
pub enum Error {
    /// A buffer could not be allocated.
    ///
    /// Raised for empty bounds, for host allocations that cannot be
    /// satisfied and when the cache cannot make room for a new entry.
    /// Callers must treat the whole image initialization as failed.
    #[error("failed to allocate {requested} bytes: {reason}")]
    AllocationFailed {
        /// Bytes requested
        requested: usize,
        /// Failure reason
        reason: String,
    },

    /// Storage mode, buffer layout and bit depth do not fit together.
    #[error("incompatible storage: {0}")]
    IncompatibleStorage(String),

    /// An externally supplied buffer does not match the requested image.
    #[error("buffer mismatch: {0}")]
    BufferMismatch(String),

    /// The operation is not implemented for this bit depth.
    #[error("{operation} does not support {depth} samples")]
    UnsupportedBitDepth {
        /// Offending depth
        depth: BitDepth,
        /// Operation name
        operation: &'static str,
    },

    /// Raw sample access was requested on a GPU texture.
    #[error("storage is not accessible from the CPU")]
    NotCpuAccessible,

    /// The tile's allocation was delayed and never realized.
    #[error("tile storage has not been allocated")]
    NotAllocated,

    /// A disk segment has an unknown layout.
    #[error("invalid tile segment: {0}")]
    InvalidSegment(String),

    /// I/O error on the disk cache.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error with custom message.
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Creates an [`Error::AllocationFailed`] error.
    #[inline]
    pub fn allocation_failed(requested: usize, reason: impl Into<String>) -> Self {
        Self::AllocationFailed {
            requested,
            reason: reason.into(),
        }
    }

    /// Creates an [`Error::IncompatibleStorage`] error.
    #[inline]
    pub fn incompatible_storage(msg: impl Into<String>) -> Self {
        Self::IncompatibleStorage(msg.into())
    }

    /// Creates an [`Error::BufferMismatch`] error.
    #[inline]
    pub fn buffer_mismatch(msg: impl Into<String>) -> Self {
        Self::BufferMismatch(msg.into())
    }

    /// Creates an [`Error::UnsupportedBitDepth`] error.
    #[inline]
    pub fn unsupported_depth(depth: BitDepth, operation: &'static str) -> Self {
        Self::UnsupportedBitDepth { depth, operation }
    }

    /// Creates an [`Error::InvalidSegment`] error.
    #[inline]
    pub fn invalid_segment(msg: impl Into<String>) -> Self {
        Self::InvalidSegment(msg.into())
    }

    /// Creates an [`Error::Other`] error.
    #[inline]
    pub fn other(msg: impl Into<String>) -> Self {
        Self::Other(msg.into())
    }

    /// Returns `true` if this is an allocation error.
    #[inline]
    pub fn is_allocation_error(&self) -> bool {
        matches!(self, Self::AllocationFailed { .. })
    }

    /// Returns `true` if the image configuration itself was rejected.
    #[inline]
    pub fn is_contract_violation(&self) -> bool {
        matches!(
            self,
            Self::IncompatibleStorage(_) | Self::BufferMismatch(_) | Self::UnsupportedBitDepth { .. }
        )
    }

    /// Returns `true` if this is an I/O error.
    #[inline]
    pub fn is_io_error(&self) -> bool {
        matches!(self, Self::Io(_))
    }
}
