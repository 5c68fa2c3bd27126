//! # Chronik Storage
//!
//! Byte-level storage for the Chronik datom log.
//!
//! Backends are **opaque append-only byte stores**. They know nothing about
//! datoms, transactions or CBOR; the engine writes self-delimiting frames
//! through [`FrameLog`] and owns their interpretation.
//!
//! ## Available Backends
//!
//! - [`InMemoryBackend`] - For `:memory` databases and tests
//! - [`FileBackend`] - For `:file` databases
//!
//! ## Example
//!
//! ```rust
//! use chronik_storage::{FrameLog, InMemoryBackend};
//!
//! let mut log = FrameLog::new(InMemoryBackend::new());
//! log.append_frame(b"first").unwrap();
//! log.append_frame(b"second").unwrap();
//! assert_eq!(log.read_frames().unwrap(), vec![b"first".to_vec(), b"second".to_vec()]);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod file;
mod frame;
mod memory;

pub use backend::StorageBackend;
pub use error::{StorageError, StorageResult};
pub use file::FileBackend;
pub use frame::{FrameLog, FRAME_HEADER_SIZE, FRAME_MAGIC};
pub use memory::InMemoryBackend;
