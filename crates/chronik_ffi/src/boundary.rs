//! The one place where results cross into C.
//!
//! Every entry point funnels through [`invoke`], which catches panics,
//! collapses errors into the sentinel string and hands exactly one
//! NUL-terminated string to the caller's [`OutputReader`].

use crate::error::{GatewayError, GatewayResult};
use crate::output::OutputFormat;
use crate::types::{ChronikContext, OutputReader};
use chronik_codec::Value;
use std::any::Any;
use std::ffi::{c_char, CStr, CString};
use std::panic::{self, AssertUnwindSafe};
use tracing::{debug_span, warn};

/// Borrows a C string argument as UTF-8.
///
/// # Safety
///
/// `ptr` must be null or point to a NUL-terminated string that outlives `'a`.
pub(crate) unsafe fn c_str<'a>(ptr: *const c_char, name: &str) -> GatewayResult<&'a str> {
    if ptr.is_null() {
        return Err(GatewayError::invalid_argument(format!("{name} is null")));
    }
    CStr::from_ptr(ptr)
        .to_str()
        .map_err(|_| GatewayError::invalid_argument(format!("{name} is not valid UTF-8")))
}

/// Borrows `len` C strings from an array argument.
///
/// # Safety
///
/// When `len > 0`, `array` must point to `len` valid C string pointers.
pub(crate) unsafe fn c_str_array<'a>(
    array: *const *const c_char,
    len: i64,
    name: &str,
) -> GatewayResult<Vec<&'a str>> {
    let len = usize::try_from(len)
        .map_err(|_| GatewayError::invalid_argument(format!("negative length for {name}")))?;
    if len == 0 {
        return Ok(Vec::new());
    }
    if array.is_null() {
        return Err(GatewayError::invalid_argument(format!("{name} is null")));
    }
    std::slice::from_raw_parts(array, len)
        .iter()
        .enumerate()
        .map(|(i, &ptr)| c_str(ptr, &format!("{name}[{i}]")))
        .collect()
}

/// Runs one entry point body and delivers its outcome.
///
/// # Safety
///
/// `ctx` must be null or a live pointer from `chronik_context_create`;
/// `output_format` must be null or a valid C string.
pub(crate) unsafe fn invoke<F>(
    ctx: *mut ChronikContext,
    operation: &str,
    output_format: *const c_char,
    reader: OutputReader,
    body: F,
) where
    F: FnOnce() -> GatewayResult<Value>,
{
    let _span = debug_span!("chronik_call", operation).entered();
    let context = ctx.as_ref();
    if let Some(context) = context {
        context.begin_call();
    }

    let outcome = panic::catch_unwind(AssertUnwindSafe(|| run(context, output_format, body)))
        .unwrap_or_else(|payload| {
            Err(GatewayError::Panic {
                message: panic_message(payload.as_ref()),
            })
        });

    let text = match outcome {
        Ok(text) => {
            if let Some(context) = context {
                context.clear_last_error();
            }
            text
        }
        Err(err) => {
            warn!(operation, kind = err.kind().name(), error = %err, "call failed");
            let sentinel = err.to_sentinel(operation);
            if let Some(context) = context {
                context.set_last_error(to_c_string(&sentinel));
            }
            sentinel
        }
    };
    deliver(reader, operation, &text);
}

unsafe fn run<F>(
    context: Option<&ChronikContext>,
    output_format: *const c_char,
    body: F,
) -> GatewayResult<String>
where
    F: FnOnce() -> GatewayResult<Value>,
{
    if context.is_none() {
        return Err(GatewayError::invalid_argument("context handle is null"));
    }
    let format = OutputFormat::parse(c_str(output_format, "output_format")?)?;
    let value = body()?;
    format.serialize(&value)
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Interior NULs cannot cross as C strings; they are written as the EDN
/// and JSON escape `\u0000`.
fn to_c_string(text: &str) -> CString {
    CString::new(text.replace('\0', "\\u0000")).unwrap_or_default()
}

fn deliver(reader: OutputReader, operation: &str, text: &str) {
    let Some(reader) = reader else {
        warn!(operation, "no output reader supplied, result dropped");
        return;
    };
    let output = to_c_string(text);
    // Safety: the caller promised a valid function pointer; `output` lives
    // until the call returns.
    unsafe { reader(output.as_ptr()) };
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::is_sentinel;
    use std::cell::RefCell;

    thread_local! {
        static RECEIVED: RefCell<Vec<String>> = const { RefCell::new(Vec::new()) };
    }

    unsafe extern "C" fn record(output: *const c_char) {
        let text = CStr::from_ptr(output).to_string_lossy().into_owned();
        RECEIVED.with(|r| r.borrow_mut().push(text));
    }

    fn take() -> Vec<String> {
        RECEIVED.with(|r| std::mem::take(&mut *r.borrow_mut()))
    }

    fn edn() -> CString {
        CString::new("edn").unwrap()
    }

    #[test]
    fn delivers_success_once() {
        let ctx = Box::into_raw(Box::new(ChronikContext::new()));
        let format = edn();
        unsafe {
            invoke(ctx, "test", format.as_ptr(), Some(record), || Ok(Value::Integer(7)));
        }
        assert_eq!(take(), vec!["7".to_string()]);
        let ctx = unsafe { Box::from_raw(ctx) };
        assert_eq!(ctx.calls(), 1);
        assert!(ctx.last_error_ptr().is_null());
    }

    #[test]
    fn panics_become_sentinels() {
        let mut ctx = ChronikContext::new();
        let format = edn();
        unsafe {
            invoke(&mut ctx, "test", format.as_ptr(), Some(record), || {
                panic!("kaboom")
            });
        }
        let got = take();
        assert_eq!(got.len(), 1);
        assert!(got[0].starts_with("exception:Panic: panic: kaboom"));
        assert!(!ctx.last_error_ptr().is_null());
    }

    #[test]
    fn null_context_is_invalid_argument() {
        let format = edn();
        unsafe {
            invoke(std::ptr::null_mut(), "test", format.as_ptr(), Some(record), || {
                Ok(Value::Null)
            });
        }
        let got = take();
        assert!(is_sentinel(&got[0]));
        assert!(got[0].contains("InvalidArgument"));
    }

    #[test]
    fn unknown_output_format() {
        let mut ctx = ChronikContext::new();
        let format = CString::new("xml").unwrap();
        unsafe {
            invoke(&mut ctx, "test", format.as_ptr(), Some(record), || Ok(Value::Null));
        }
        let got = take();
        assert!(got[0].starts_with("exception:UnsupportedFormatError"));
    }

    #[test]
    fn string_arrays() {
        let a = CString::new("db").unwrap();
        let b = CString::new("edn").unwrap();
        let ptrs = [a.as_ptr(), b.as_ptr()];
        let strings = unsafe { c_str_array(ptrs.as_ptr(), 2, "input_formats") }.unwrap();
        assert_eq!(strings, vec!["db", "edn"]);

        let empty = unsafe { c_str_array(std::ptr::null(), 0, "input_formats") }.unwrap();
        assert!(empty.is_empty());

        assert!(unsafe { c_str_array(ptrs.as_ptr(), -1, "input_formats") }.is_err());
        assert!(unsafe { c_str_array(std::ptr::null(), 1, "input_formats") }.is_err());
    }

    #[test]
    fn interior_nul_is_escaped() {
        assert_eq!(to_c_string("a\0b").to_str().unwrap(), "a\\u0000b");
    }
}
