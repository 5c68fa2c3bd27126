//! Context handles and auxiliary exports.

use crate::boundary::invoke;
use crate::registry::operation_names;
use crate::types::{ChronikContext, OutputReader};
use chronik_codec::Value;
use std::ffi::c_char;
use tracing_subscriber::EnvFilter;

/// Environment variable holding the log filter, e.g. `chronik_core=debug`.
pub const LOG_ENV: &str = "CHRONIK_LOG";

/// Creates a context handle. Release it with [`chronik_context_destroy`].
#[no_mangle]
pub extern "C" fn chronik_context_create() -> *mut ChronikContext {
    Box::into_raw(Box::new(ChronikContext::new()))
}

/// Destroys a context handle.
///
/// # Safety
///
/// `ctx` must be null or come from [`chronik_context_create`], and must
/// not be used afterwards.
#[no_mangle]
pub unsafe extern "C" fn chronik_context_destroy(ctx: *mut ChronikContext) {
    if !ctx.is_null() {
        drop(Box::from_raw(ctx));
    }
}

/// Returns the sentinel string of the latest failed call through `ctx`, or
/// null when the latest call succeeded.
///
/// # Safety
///
/// `ctx` must be null or a live context. The returned pointer is valid
/// until the next call through the same context.
#[no_mangle]
pub unsafe extern "C" fn chronik_context_last_error(ctx: *const ChronikContext) -> *const c_char {
    match ctx.as_ref() {
        Some(ctx) => ctx.last_error_ptr(),
        None => std::ptr::null(),
    }
}

/// Returns the library version as a null-terminated string.
///
/// The returned pointer is static and should not be freed.
#[no_mangle]
pub extern "C" fn chronik_version() -> *const c_char {
    static VERSION: &str = concat!(env!("CARGO_PKG_VERSION"), "\0");
    VERSION.as_ptr().cast()
}

/// Installs a global `tracing` subscriber writing to stderr, filtered by
/// `CHRONIK_LOG` (default `warn`).
///
/// Returns `true` if this call installed it, `false` if a subscriber was
/// already set.
#[no_mangle]
pub extern "C" fn chronik_init_logging() -> bool {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init()
        .is_ok()
}

/// Delivers the names of all registered operations.
///
/// # Safety
///
/// Same contract as the operation entry points.
#[no_mangle]
pub unsafe extern "C" fn chronik_operations(
    ctx: *mut ChronikContext,
    output_format: *const c_char,
    output_reader: OutputReader,
) {
    invoke(ctx, "operations", output_format, output_reader, || {
        Ok(Value::Array(operation_names().into_iter().map(Value::text).collect()))
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::CStr;

    #[test]
    fn version() {
        let ver = chronik_version();
        assert!(!ver.is_null());

        let s = unsafe { CStr::from_ptr(ver) };
        assert_eq!(s.to_str().unwrap(), env!("CARGO_PKG_VERSION"));
    }

    #[test]
    fn context_lifecycle() {
        let ctx = chronik_context_create();
        assert!(!ctx.is_null());
        unsafe {
            assert!(chronik_context_last_error(ctx).is_null());
            chronik_context_destroy(ctx);
            chronik_context_destroy(std::ptr::null_mut());
        }
    }

    #[test]
    fn logging_installs_once() {
        chronik_init_logging();
        assert!(!chronik_init_logging());
    }
}
