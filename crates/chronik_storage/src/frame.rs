//! Self-delimiting frames on top of a [`StorageBackend`].
//!
//! Every frame is laid out as:
//!
//! ```text
//! +-------+---------+---------+-----------------+
//! | magic | len u32 | crc u32 | payload (len B) |
//! +-------+---------+---------+-----------------+
//! ```
//!
//! Integers are little-endian. A frame whose header or payload runs past the
//! end of storage is a torn tail left by an interrupted append; it is
//! ignored on read and can be cut off with [`FrameLog::repair_tail`]. A
//! complete frame with a bad magic or checksum is corruption.

use crate::backend::StorageBackend;
use crate::error::{StorageError, StorageResult};

/// Magic bytes opening every frame.
pub const FRAME_MAGIC: [u8; 4] = *b"CHRK";

/// Size of the frame header in bytes.
pub const FRAME_HEADER_SIZE: usize = 12;

/// Result of scanning a log from the start.
struct Scan {
    frames: Vec<Vec<u8>>,
    valid_len: u64,
}

/// An append-only sequence of checksummed frames.
#[derive(Debug)]
pub struct FrameLog<B: StorageBackend> {
    backend: B,
}

impl<B: StorageBackend> FrameLog<B> {
    /// Wraps a backend.
    pub fn new(backend: B) -> Self {
        Self { backend }
    }

    /// Returns the underlying backend.
    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Consumes the log and returns the backend.
    pub fn into_inner(self) -> B {
        self.backend
    }

    /// Returns true if the log holds no bytes at all.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend size cannot be read.
    pub fn is_empty(&self) -> StorageResult<bool> {
        Ok(self.backend.size()? == 0)
    }

    /// Appends one frame and returns the offset of its header.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::FrameTooLarge`] for payloads over `u32::MAX`
    /// bytes, or any backend error.
    pub fn append_frame(&mut self, payload: &[u8]) -> StorageResult<u64> {
        let len = u32::try_from(payload.len())
            .map_err(|_| StorageError::FrameTooLarge { len: payload.len() })?;

        let mut buf = Vec::with_capacity(FRAME_HEADER_SIZE + payload.len());
        buf.extend_from_slice(&FRAME_MAGIC);
        buf.extend_from_slice(&len.to_le_bytes());
        buf.extend_from_slice(&crc32(payload).to_le_bytes());
        buf.extend_from_slice(payload);

        let offset = self.backend.append(&buf)?;
        self.backend.flush()?;
        Ok(offset)
    }

    /// Reads every complete frame in order.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::CorruptedFrame`] if a complete frame fails
    /// validation.
    pub fn read_frames(&self) -> StorageResult<Vec<Vec<u8>>> {
        Ok(self.scan()?.frames)
    }

    /// Truncates a torn trailing frame, returning true if bytes were removed.
    ///
    /// # Errors
    ///
    /// Returns an error if scanning or truncation fails.
    pub fn repair_tail(&mut self) -> StorageResult<bool> {
        let scan = self.scan()?;
        if scan.valid_len < self.backend.size()? {
            self.backend.truncate(scan.valid_len)?;
            return Ok(true);
        }
        Ok(false)
    }

    /// Replaces the whole log with `frames` and syncs it.
    ///
    /// # Errors
    ///
    /// Returns an error if truncation or any append fails.
    pub fn rewrite<P: AsRef<[u8]>>(&mut self, frames: &[P]) -> StorageResult<()> {
        self.backend.truncate(0)?;
        for frame in frames {
            self.append_frame(frame.as_ref())?;
        }
        self.backend.sync()
    }

    /// Syncs the log to durable storage.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend sync fails.
    pub fn sync(&mut self) -> StorageResult<()> {
        self.backend.sync()
    }

    fn scan(&self) -> StorageResult<Scan> {
        let size = self.backend.size()?;
        let mut frames = Vec::new();
        let mut offset = 0u64;

        while offset < size {
            if size - offset < FRAME_HEADER_SIZE as u64 {
                break;
            }
            let header = self.backend.read_at(offset, FRAME_HEADER_SIZE)?;
            if header[0..4] != FRAME_MAGIC {
                return Err(StorageError::corrupted_frame(offset, "bad magic"));
            }
            let len = u32::from_le_bytes([header[4], header[5], header[6], header[7]]);
            let expected_crc = u32::from_le_bytes([header[8], header[9], header[10], header[11]]);

            let payload_offset = offset + FRAME_HEADER_SIZE as u64;
            if size - payload_offset < u64::from(len) {
                break;
            }
            let payload = self.backend.read_at(payload_offset, len as usize)?;
            let actual_crc = crc32(&payload);
            if actual_crc != expected_crc {
                return Err(StorageError::corrupted_frame(
                    offset,
                    format!("checksum mismatch: expected {expected_crc:08x}, got {actual_crc:08x}"),
                ));
            }

            frames.push(payload);
            offset = payload_offset + u64::from(len);
        }

        Ok(Scan {
            frames,
            valid_len: offset,
        })
    }
}

/// CRC32 (IEEE polynomial) of `data`.
fn crc32(data: &[u8]) -> u32 {
    const TABLE: [u32; 256] = {
        let mut table = [0u32; 256];
        let mut i = 0;
        while i < 256 {
            let mut crc = i as u32;
            let mut j = 0;
            while j < 8 {
                if crc & 1 != 0 {
                    crc = (crc >> 1) ^ 0xEDB8_8320;
                } else {
                    crc >>= 1;
                }
                j += 1;
            }
            table[i] = crc;
            i += 1;
        }
        table
    };

    let mut crc = 0xFFFF_FFFF_u32;
    for &byte in data {
        crc = (crc >> 8) ^ TABLE[((crc ^ u32::from(byte)) & 0xFF) as usize];
    }
    !crc
}
