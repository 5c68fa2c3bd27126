//! Log record format.
//!
//! A store is a [`FrameLog`](chronik_storage::FrameLog) whose first frame
//! is a header carrying the configuration, followed by one frame per
//! transaction. Every frame is a canonical CBOR map:
//!
//! ```text
//! header: {:chronik/format 1 :config {...}}
//! tx:     {:tx 536870913 :instant 1700000000000 :datoms [[e :a v added] ...]}
//! ```

use chronik_codec::{from_canonical_cbor, to_canonical_cbor, Value};

use crate::config::DatabaseConfig;
use crate::error::{CoreError, CoreResult};
use crate::types::{Datom, TxId};

/// Log format version written into the header.
pub const FORMAT_VERSION: i64 = 1;

/// One committed transaction.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct TxRecord {
    pub(crate) tx: TxId,
    pub(crate) instant: i64,
    pub(crate) datoms: Vec<Datom>,
}

impl TxRecord {
    pub(crate) fn encode(&self) -> CoreResult<Vec<u8>> {
        let datoms = self
            .datoms
            .iter()
            .map(|d| {
                Value::Array(vec![
                    Value::Integer(d.e),
                    Value::Keyword(d.a.clone()),
                    d.v.clone(),
                    Value::Bool(d.added),
                ])
            })
            .collect();
        let value = Value::map(vec![
            (Value::keyword("tx"), Value::Integer(self.tx)),
            (Value::keyword("instant"), Value::Integer(self.instant)),
            (Value::keyword("datoms"), Value::Array(datoms)),
        ]);
        Ok(to_canonical_cbor(&value)?)
    }

    pub(crate) fn decode(bytes: &[u8]) -> CoreResult<Self> {
        let value = from_canonical_cbor(bytes)?;
        let int = |key: &str| {
            value
                .get_keyword(key)
                .and_then(Value::as_integer)
                .ok_or_else(|| CoreError::corrupt_log(format!("transaction frame missing :{key}")))
        };
        let tx = int("tx")?;
        let instant = int("instant")?;
        let raw = value
            .get_keyword("datoms")
            .and_then(Value::as_seq)
            .ok_or_else(|| CoreError::corrupt_log("transaction frame missing :datoms"))?;

        let datoms = raw
            .iter()
            .map(|item| match item.as_seq() {
                Some([Value::Integer(e), Value::Keyword(a), v, Value::Bool(added)]) => Ok(Datom {
                    e: *e,
                    a: a.clone(),
                    v: v.clone(),
                    tx,
                    added: *added,
                }),
                _ => Err(CoreError::corrupt_log(format!("malformed datom in tx {tx}"))),
            })
            .collect::<CoreResult<Vec<_>>>()?;

        Ok(Self {
            tx,
            instant,
            datoms,
        })
    }
}

pub(crate) fn encode_header(config: &DatabaseConfig) -> CoreResult<Vec<u8>> {
    let value = Value::map(vec![
        (Value::keyword("chronik/format"), Value::Integer(FORMAT_VERSION)),
        (Value::keyword("config"), config.to_value()),
    ]);
    Ok(to_canonical_cbor(&value)?)
}

pub(crate) fn decode_header(bytes: &[u8]) -> CoreResult<DatabaseConfig> {
    let value = from_canonical_cbor(bytes)?;
    match value.get_keyword("chronik/format").and_then(Value::as_integer) {
        Some(FORMAT_VERSION) => {}
        Some(other) => {
            return Err(CoreError::corrupt_log(format!(
                "unsupported log format version {other}"
            )))
        }
        None => return Err(CoreError::corrupt_log("missing log header")),
    }
    let config = value
        .get_keyword("config")
        .ok_or_else(|| CoreError::corrupt_log("log header missing :config"))?;
    DatabaseConfig::from_value(config)
}

/// Splits raw frames into the stored configuration and transaction records.
pub(crate) fn decode_frames(frames: &[Vec<u8>]) -> CoreResult<(DatabaseConfig, Vec<TxRecord>)> {
    let (header, txs) = frames
        .split_first()
        .ok_or_else(|| CoreError::corrupt_log("empty log"))?;
    let config = decode_header(header)?;
    let records = txs
        .iter()
        .map(|frame| TxRecord::decode(frame))
        .collect::<CoreResult<Vec<_>>>()?;
    Ok((config, records))
}
