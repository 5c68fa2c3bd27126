//! Error types for storage operations.

use std::io;
use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Attempted to read beyond the end of storage.
    #[error("read beyond end of storage: offset {offset}, len {len}, size {size}")]
    ReadPastEnd {
        /// The requested read offset.
        offset: u64,
        /// The requested read length.
        len: usize,
        /// The current storage size.
        size: u64,
    },

    /// A frame in the log failed validation.
    #[error("corrupted frame at offset {offset}: {reason}")]
    CorruptedFrame {
        /// Offset of the frame header.
        offset: u64,
        /// What was wrong with it.
        reason: String,
    },

    /// A frame payload is too large for the 32-bit length field.
    #[error("frame payload of {len} bytes exceeds the maximum frame size")]
    FrameTooLarge {
        /// Payload length in bytes.
        len: usize,
    },
}

impl StorageError {
    /// Creates a corrupted frame error.
    pub fn corrupted_frame(offset: u64, reason: impl Into<String>) -> Self {
        Self::CorruptedFrame {
            offset,
            reason: reason.into(),
        }
    }
}
