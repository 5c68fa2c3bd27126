//! Database lifecycle and write entry points.

use crate::boundary::{c_str, invoke};
use crate::dispatch::{Input, Request};
use crate::registry::{dispatch, Operation};
use crate::types::{ChronikContext, OutputReader};
use std::ffi::c_char;

/// Creates the database described by `db_config` (EDN).
///
/// Delivers `""` rendered in `output_format` on success.
///
/// # Safety
///
/// - `ctx` must come from `chronik_context_create`
/// - `db_config` and `output_format` must be valid null-terminated UTF-8 strings
/// - `output_reader` must be null or a valid function pointer
#[no_mangle]
pub unsafe extern "C" fn chronik_create_database(
    ctx: *mut ChronikContext,
    db_config: *const c_char,
    output_format: *const c_char,
    output_reader: OutputReader,
) {
    let operation = Operation::CreateDatabase;
    invoke(ctx, operation.name(), output_format, output_reader, || {
        dispatch(Request::CreateDatabase {
            config: c_str(db_config, "db_config")?,
        })
    });
}

/// Deletes the database described by `db_config`. Deleting a missing
/// database succeeds.
///
/// # Safety
///
/// Same contract as [`chronik_create_database`].
#[no_mangle]
pub unsafe extern "C" fn chronik_delete_database(
    ctx: *mut ChronikContext,
    db_config: *const c_char,
    output_format: *const c_char,
    output_reader: OutputReader,
) {
    let operation = Operation::DeleteDatabase;
    invoke(ctx, operation.name(), output_format, output_reader, || {
        dispatch(Request::DeleteDatabase {
            config: c_str(db_config, "db_config")?,
        })
    });
}

/// Delivers `true` or `false`.
///
/// # Safety
///
/// Same contract as [`chronik_create_database`].
#[no_mangle]
pub unsafe extern "C" fn chronik_database_exists(
    ctx: *mut ChronikContext,
    db_config: *const c_char,
    output_format: *const c_char,
    output_reader: OutputReader,
) {
    let operation = Operation::DatabaseExists;
    invoke(ctx, operation.name(), output_format, output_reader, || {
        dispatch(Request::DatabaseExists {
            config: c_str(db_config, "db_config")?,
        })
    });
}

/// Transacts `tx_data`, encoded as `tx_format` (`json`, `edn` or `cbor`).
///
/// Delivers the transaction's metadata map (`:db/id`, `:db/txInstant`).
/// JSON data is first coerced to the attribute types the schema declares.
///
/// # Safety
///
/// - `ctx` must come from `chronik_context_create`
/// - all string arguments must be valid null-terminated UTF-8 strings
/// - `output_reader` must be null or a valid function pointer
#[no_mangle]
pub unsafe extern "C" fn chronik_transact(
    ctx: *mut ChronikContext,
    db_config: *const c_char,
    tx_format: *const c_char,
    tx_data: *const c_char,
    output_format: *const c_char,
    output_reader: OutputReader,
) {
    let operation = Operation::Transact;
    invoke(ctx, operation.name(), output_format, output_reader, || {
        dispatch(Request::Transact {
            config: c_str(db_config, "db_config")?,
            tx: Input {
                format: c_str(tx_format, "tx_format")?,
                payload: c_str(tx_data, "tx_data")?,
            },
        })
    });
}

/// Purges history retracted before `before_ms` (epoch milliseconds).
///
/// Delivers `{:purged <datoms> :before #inst ..}`.
///
/// # Safety
///
/// Same contract as [`chronik_create_database`].
#[no_mangle]
pub unsafe extern "C" fn chronik_gc_storage(
    ctx: *mut ChronikContext,
    db_config: *const c_char,
    before_ms: i64,
    output_format: *const c_char,
    output_reader: OutputReader,
) {
    let operation = Operation::GcStorage;
    invoke(ctx, operation.name(), output_format, output_reader, || {
        dispatch(Request::GcStorage {
            config: c_str(db_config, "db_config")?,
            before: before_ms,
        })
    });
}
