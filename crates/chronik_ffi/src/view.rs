//! Read entry points. Each resolves one or more inputs to a database view.

use crate::boundary::{c_str, c_str_array, invoke};
use crate::dispatch::{Input, Request};
use crate::error::{GatewayError, GatewayResult};
use crate::registry::{dispatch, Operation};
use crate::types::{ChronikContext, OutputReader};
use std::ffi::c_char;

/// # Safety
///
/// Both pointers must be null or valid C strings.
unsafe fn input<'a>(input_format: *const c_char, raw_input: *const c_char) -> GatewayResult<Input<'a>> {
    Ok(Input {
        format: c_str(input_format, "input_format")?,
        payload: c_str(raw_input, "raw_input")?,
    })
}

/// Runs a datalog query.
///
/// `input_formats[i]` / `raw_inputs[i]` bind positionally to the query's
/// `:in` clause (default `[$]`).
///
/// # Safety
///
/// - `ctx` must come from `chronik_context_create`
/// - `query_edn` and `output_format` must be valid C strings
/// - when `num_inputs > 0`, both arrays must hold `num_inputs` valid C strings
/// - `output_reader` must be null or a valid function pointer
#[no_mangle]
pub unsafe extern "C" fn chronik_query(
    ctx: *mut ChronikContext,
    query_edn: *const c_char,
    num_inputs: i64,
    input_formats: *const *const c_char,
    raw_inputs: *const *const c_char,
    output_format: *const c_char,
    output_reader: OutputReader,
) {
    invoke(ctx, Operation::Query.name(), output_format, output_reader, || {
        let formats = c_str_array(input_formats, num_inputs, "input_formats")?;
        let payloads = c_str_array(raw_inputs, num_inputs, "raw_inputs")?;
        if formats.len() != payloads.len() {
            return Err(GatewayError::invalid_argument("input arrays differ in length"));
        }
        let inputs = formats
            .into_iter()
            .zip(payloads)
            .map(|(format, payload)| Input { format, payload })
            .collect();
        dispatch(Request::Query {
            query: c_str(query_edn, "query_edn")?,
            inputs,
        })
    });
}

/// Pulls `selector_edn` for entity `eid`. Delivers `nil` for a missing
/// entity.
///
/// # Safety
///
/// - `ctx` must come from `chronik_context_create`
/// - all string arguments must be valid C strings
/// - `output_reader` must be null or a valid function pointer
#[no_mangle]
pub unsafe extern "C" fn chronik_pull(
    ctx: *mut ChronikContext,
    input_format: *const c_char,
    raw_input: *const c_char,
    selector_edn: *const c_char,
    eid: i64,
    output_format: *const c_char,
    output_reader: OutputReader,
) {
    invoke(ctx, Operation::Pull.name(), output_format, output_reader, || {
        dispatch(Request::Pull {
            input: input(input_format, raw_input)?,
            selector: c_str(selector_edn, "selector_edn")?,
            eid,
        })
    });
}

/// Pulls `selector_edn` for each id in the EDN vector `eids_edn`.
///
/// # Safety
///
/// Same contract as [`chronik_pull`].
#[no_mangle]
pub unsafe extern "C" fn chronik_pull_many(
    ctx: *mut ChronikContext,
    input_format: *const c_char,
    raw_input: *const c_char,
    selector_edn: *const c_char,
    eids_edn: *const c_char,
    output_format: *const c_char,
    output_reader: OutputReader,
) {
    invoke(ctx, Operation::PullMany.name(), output_format, output_reader, || {
        dispatch(Request::PullMany {
            input: input(input_format, raw_input)?,
            selector: c_str(selector_edn, "selector_edn")?,
            eids: c_str(eids_edn, "eids_edn")?,
        })
    });
}

/// Delivers the plain attribute map of entity `eid`.
///
/// # Safety
///
/// Same contract as [`chronik_pull`].
#[no_mangle]
pub unsafe extern "C" fn chronik_entity(
    ctx: *mut ChronikContext,
    input_format: *const c_char,
    raw_input: *const c_char,
    eid: i64,
    output_format: *const c_char,
    output_reader: OutputReader,
) {
    invoke(ctx, Operation::Entity.name(), output_format, output_reader, || {
        dispatch(Request::Entity {
            input: input(input_format, raw_input)?,
            eid,
        })
    });
}

/// Delivers the datoms of an index as `[e a v tx added]` vectors.
///
/// `index_edn` is an index keyword (`:eavt`) or
/// `{:index :avet :components [:age 30]}`.
///
/// # Safety
///
/// Same contract as [`chronik_pull`].
#[no_mangle]
pub unsafe extern "C" fn chronik_datoms(
    ctx: *mut ChronikContext,
    input_format: *const c_char,
    raw_input: *const c_char,
    index_edn: *const c_char,
    output_format: *const c_char,
    output_reader: OutputReader,
) {
    invoke(ctx, Operation::Datoms.name(), output_format, output_reader, || {
        dispatch(Request::Datoms {
            input: input(input_format, raw_input)?,
            index: c_str(index_edn, "index_edn")?,
        })
    });
}

/// Like [`chronik_datoms`], starting at the components instead of
/// matching them.
///
/// # Safety
///
/// Same contract as [`chronik_pull`].
#[no_mangle]
pub unsafe extern "C" fn chronik_seek_datoms(
    ctx: *mut ChronikContext,
    input_format: *const c_char,
    raw_input: *const c_char,
    index_edn: *const c_char,
    output_format: *const c_char,
    output_reader: OutputReader,
) {
    invoke(ctx, Operation::SeekDatoms.name(), output_format, output_reader, || {
        dispatch(Request::SeekDatoms {
            input: input(input_format, raw_input)?,
            index: c_str(index_edn, "index_edn")?,
        })
    });
}

/// Delivers AVET datoms of `attrid_edn` with `start_edn <= v <= end_edn`.
/// `nil` leaves a bound open.
///
/// # Safety
///
/// Same contract as [`chronik_pull`].
#[no_mangle]
#[allow(clippy::too_many_arguments)]
pub unsafe extern "C" fn chronik_index_range(
    ctx: *mut ChronikContext,
    input_format: *const c_char,
    raw_input: *const c_char,
    attrid_edn: *const c_char,
    start_edn: *const c_char,
    end_edn: *const c_char,
    output_format: *const c_char,
    output_reader: OutputReader,
) {
    invoke(ctx, Operation::IndexRange.name(), output_format, output_reader, || {
        dispatch(Request::IndexRange {
            input: input(input_format, raw_input)?,
            attr: c_str(attrid_edn, "attrid_edn")?,
            start: c_str(start_edn, "start_edn")?,
            end: c_str(end_edn, "end_edn")?,
        })
    });
}

/// # Safety
///
/// Same contract as [`chronik_pull`].
#[no_mangle]
pub unsafe extern "C" fn chronik_schema(
    ctx: *mut ChronikContext,
    input_format: *const c_char,
    raw_input: *const c_char,
    output_format: *const c_char,
    output_reader: OutputReader,
) {
    invoke(ctx, Operation::Schema.name(), output_format, output_reader, || {
        dispatch(Request::Schema {
            input: input(input_format, raw_input)?,
        })
    });
}

/// # Safety
///
/// Same contract as [`chronik_pull`].
#[no_mangle]
pub unsafe extern "C" fn chronik_reverse_schema(
    ctx: *mut ChronikContext,
    input_format: *const c_char,
    raw_input: *const c_char,
    output_format: *const c_char,
    output_reader: OutputReader,
) {
    invoke(ctx, Operation::ReverseSchema.name(), output_format, output_reader, || {
        dispatch(Request::ReverseSchema {
            input: input(input_format, raw_input)?,
        })
    });
}

/// Datom counts of the view.
///
/// # Safety
///
/// Same contract as [`chronik_pull`].
#[no_mangle]
pub unsafe extern "C" fn chronik_metrics(
    ctx: *mut ChronikContext,
    input_format: *const c_char,
    raw_input: *const c_char,
    output_format: *const c_char,
    output_reader: OutputReader,
) {
    invoke(ctx, Operation::Metrics.name(), output_format, output_reader, || {
        dispatch(Request::Metrics {
            input: input(input_format, raw_input)?,
        })
    });
}
