//! Type definitions for FFI.

use parking_lot::Mutex;
use std::ffi::{c_char, CString};
use std::sync::atomic::{AtomicU64, Ordering};

/// Callback through which every entry point delivers its single result.
///
/// The pointer handed to the callback is a NUL-terminated UTF-8 string
/// owned by the gateway and valid only for the duration of the call.
pub type OutputReader = Option<unsafe extern "C" fn(output: *const c_char)>;

/// Per-caller handle passed to every entry point.
///
/// Opaque to C. It carries no database state: connections are built and
/// dropped inside each call. It only remembers the last failure and how
/// many calls it has served.
#[derive(Debug, Default)]
pub struct ChronikContext {
    last_error: Mutex<Option<CString>>,
    calls: AtomicU64,
}

impl ChronikContext {
    /// Creates an empty context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the start of a call.
    pub(crate) fn begin_call(&self) {
        self.calls.fetch_add(1, Ordering::Relaxed);
    }

    /// Number of entry point calls served through this context.
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }

    /// Remembers the sentinel of the latest failed call.
    pub(crate) fn set_last_error(&self, sentinel: CString) {
        *self.last_error.lock() = Some(sentinel);
    }

    /// Forgets the last failure.
    pub(crate) fn clear_last_error(&self) {
        *self.last_error.lock() = None;
    }

    /// Pointer to the last failure, or null.
    ///
    /// The pointer stays valid until the next call through this context.
    pub(crate) fn last_error_ptr(&self) -> *const c_char {
        match self.last_error.lock().as_ref() {
            Some(s) => s.as_ptr(),
            None => std::ptr::null(),
        }
    }
}
