//! Operation handlers: resolve inputs, make exactly one engine call, pick
//! the slice of the result that crosses the boundary.

use crate::coerce::{coerce_tx_data, TypeTable};
use crate::config::parse_config;
use crate::error::{GatewayError, GatewayResult};
use crate::input::{decode_data, resolve_db, InputFormat};
use crate::registry::Operation;
use chronik_codec::{Value, WireFormat};
use chronik_core::{Datom, Index, QueryInput};
use tracing::{debug, info};

/// A `(tag, payload)` input pair as received from C.
#[derive(Debug, Clone, Copy)]
pub struct Input<'a> {
    /// Input tag such as `db` or `asof:1700000000000`.
    pub format: &'a str,
    /// Config text for views, encoded data otherwise.
    pub payload: &'a str,
}

/// Decoded arguments of one call.
#[derive(Debug, Clone)]
#[allow(missing_docs)]
pub enum Request<'a> {
    CreateDatabase { config: &'a str },
    DeleteDatabase { config: &'a str },
    DatabaseExists { config: &'a str },
    Transact { config: &'a str, tx: Input<'a> },
    Query { query: &'a str, inputs: Vec<Input<'a>> },
    Pull { input: Input<'a>, selector: &'a str, eid: i64 },
    PullMany { input: Input<'a>, selector: &'a str, eids: &'a str },
    Entity { input: Input<'a>, eid: i64 },
    Datoms { input: Input<'a>, index: &'a str },
    SeekDatoms { input: Input<'a>, index: &'a str },
    IndexRange { input: Input<'a>, attr: &'a str, start: &'a str, end: &'a str },
    Schema { input: Input<'a> },
    ReverseSchema { input: Input<'a> },
    Metrics { input: Input<'a> },
    GcStorage { config: &'a str, before: i64 },
}

impl Request<'_> {
    /// Operation this request is for.
    pub fn operation(&self) -> Operation {
        match self {
            Request::CreateDatabase { .. } => Operation::CreateDatabase,
            Request::DeleteDatabase { .. } => Operation::DeleteDatabase,
            Request::DatabaseExists { .. } => Operation::DatabaseExists,
            Request::Transact { .. } => Operation::Transact,
            Request::Query { .. } => Operation::Query,
            Request::Pull { .. } => Operation::Pull,
            Request::PullMany { .. } => Operation::PullMany,
            Request::Entity { .. } => Operation::Entity,
            Request::Datoms { .. } => Operation::Datoms,
            Request::SeekDatoms { .. } => Operation::SeekDatoms,
            Request::IndexRange { .. } => Operation::IndexRange,
            Request::Schema { .. } => Operation::Schema,
            Request::ReverseSchema { .. } => Operation::ReverseSchema,
            Request::Metrics { .. } => Operation::Metrics,
            Request::GcStorage { .. } => Operation::GcStorage,
        }
    }
}

fn parse_edn(what: &'static str, text: &str) -> GatewayResult<Value> {
    chronik_codec::from_edn_str(text).map_err(|source| GatewayError::Parse { what, source })
}

fn datoms_to_value(datoms: &[Datom]) -> Value {
    Value::Array(datoms.iter().map(Datom::to_value).collect())
}

/// Index argument: `:eavt` or `{:index :eavt :components [..]}`.
fn parse_index(text: &str) -> GatewayResult<(Index, Vec<Value>)> {
    let value = parse_edn("index", text)?;
    if value.as_map().is_none() {
        return Ok((Index::from_value(&value)?, Vec::new()));
    }
    let index = value
        .get_keyword("index")
        .ok_or_else(|| GatewayError::format("index map requires an :index key"))?;
    let components = match value.get_keyword("components") {
        None | Some(Value::Null) => Vec::new(),
        Some(c) => c
            .as_seq()
            .ok_or_else(|| GatewayError::format(format!(":components must be a vector, got {c}")))?
            .to_vec(),
    };
    Ok((Index::from_value(index)?, components))
}

pub(crate) fn create_database(config: &str) -> GatewayResult<Value> {
    let config = parse_config(config)?;
    chronik_core::create_database(&config)?;
    Ok(Value::text(""))
}

pub(crate) fn delete_database(config: &str) -> GatewayResult<Value> {
    let config = parse_config(config)?;
    chronik_core::delete_database(&config)?;
    Ok(Value::text(""))
}

pub(crate) fn database_exists(config: &str) -> GatewayResult<Value> {
    let config = parse_config(config)?;
    Ok(Value::Bool(chronik_core::database_exists(&config)?))
}

pub(crate) fn transact(config: &str, tx: Input<'_>) -> GatewayResult<Value> {
    let config = parse_config(config)?;
    let InputFormat::Data(wire) = InputFormat::parse(tx.format)? else {
        return Err(GatewayError::format(format!(
            "transaction data must be json, edn or cbor, got `{}`",
            tx.format
        )));
    };
    let mut tx_data = decode_data(wire, tx.payload)?;
    let mut conn = chronik_core::connect(&config)?;
    if wire == WireFormat::Json {
        let table = TypeTable::build(&conn.db(), &tx_data);
        tx_data = coerce_tx_data(&table, tx_data);
    }
    let report = conn.transact(&tx_data)?;
    info!(store = %config.backend, datoms = report.tx_data.len(), "transaction committed");
    Ok(report.tx_meta)
}

pub(crate) fn query(query: &str, inputs: Vec<Input<'_>>) -> GatewayResult<Value> {
    let form = parse_edn("query", query)?;
    let inputs = inputs
        .iter()
        .map(|input| InputFormat::parse(input.format)?.resolve(input.payload))
        .collect::<GatewayResult<Vec<QueryInput>>>()?;
    debug!(inputs = inputs.len(), "running query");
    Ok(chronik_core::query(&form, inputs)?)
}

pub(crate) fn pull(input: Input<'_>, selector: &str, eid: i64) -> GatewayResult<Value> {
    let db = resolve_db(input.format, input.payload)?;
    let selector = parse_edn("selector", selector)?;
    Ok(chronik_core::pull(&db, &selector, &Value::Integer(eid))?)
}

pub(crate) fn pull_many(input: Input<'_>, selector: &str, eids: &str) -> GatewayResult<Value> {
    let db = resolve_db(input.format, input.payload)?;
    let selector = parse_edn("selector", selector)?;
    let eids = parse_edn("entity ids", eids)?;
    Ok(chronik_core::pull_many(&db, &selector, &eids)?)
}

pub(crate) fn entity(input: Input<'_>, eid: i64) -> GatewayResult<Value> {
    let db = resolve_db(input.format, input.payload)?;
    Ok(db.entity(&Value::Integer(eid))?)
}

pub(crate) fn datoms(input: Input<'_>, index: &str) -> GatewayResult<Value> {
    let db = resolve_db(input.format, input.payload)?;
    let (index, components) = parse_index(index)?;
    Ok(datoms_to_value(&db.datoms(index, &components)?))
}

pub(crate) fn seek_datoms(input: Input<'_>, index: &str) -> GatewayResult<Value> {
    let db = resolve_db(input.format, input.payload)?;
    let (index, components) = parse_index(index)?;
    Ok(datoms_to_value(&db.seek_datoms(index, &components)?))
}

pub(crate) fn index_range(input: Input<'_>, attr: &str, start: &str, end: &str) -> GatewayResult<Value> {
    let db = resolve_db(input.format, input.payload)?;
    let attr = parse_edn("attribute", attr)?;
    let start = parse_edn("range start", start)?;
    let end = parse_edn("range end", end)?;
    Ok(datoms_to_value(&db.index_range(&attr, &start, &end)?))
}

pub(crate) fn schema(input: Input<'_>) -> GatewayResult<Value> {
    Ok(resolve_db(input.format, input.payload)?.schema())
}

pub(crate) fn reverse_schema(input: Input<'_>) -> GatewayResult<Value> {
    Ok(resolve_db(input.format, input.payload)?.reverse_schema())
}

pub(crate) fn metrics(input: Input<'_>) -> GatewayResult<Value> {
    Ok(resolve_db(input.format, input.payload)?.metrics())
}

pub(crate) fn gc_storage(config: &str, before: i64) -> GatewayResult<Value> {
    let config = parse_config(config)?;
    let mut conn = chronik_core::connect(&config)?;
    Ok(conn.gc_storage(before)?)
}
