//! Input tags: `db`, `history`, `since:<ms>`, `asof:<ms>`, `json`, `edn`, `cbor`.

use crate::config::parse_config;
use crate::error::{GatewayError, GatewayResult};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use chronik_codec::{Value, WireFormat};
use chronik_core::{connect, Db, QueryInput};
use tracing::debug;

/// A decoded input tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputFormat {
    /// Current view of the database named by the payload config.
    Db,
    /// Every assertion and retraction.
    History,
    /// Facts added strictly after the instant.
    Since(i64),
    /// Facts visible at or before the instant.
    AsOf(i64),
    /// A plain value in one of the wire formats.
    Data(WireFormat),
}

impl InputFormat {
    /// Decodes a tag of the form `<kind>[:<param>]`.
    pub fn parse(tag: &str) -> GatewayResult<Self> {
        let (kind, param) = match tag.split_once(':') {
            Some((kind, param)) => (kind, Some(param)),
            None => (tag, None),
        };
        let format = match kind {
            "db" => InputFormat::Db,
            "history" => InputFormat::History,
            "since" => InputFormat::Since(instant_param(tag, param)?),
            "asof" => InputFormat::AsOf(instant_param(tag, param)?),
            other => match WireFormat::from_name(other) {
                Some(wire) => InputFormat::Data(wire),
                None => return Err(GatewayError::unsupported_format(tag)),
            },
        };
        if param.is_some() && !format.takes_instant() {
            return Err(GatewayError::format(format!(
                "input format `{kind}` takes no parameter, got `{tag}`"
            )));
        }
        Ok(format)
    }

    fn takes_instant(self) -> bool {
        matches!(self, InputFormat::Since(_) | InputFormat::AsOf(_))
    }

    /// Resolves the payload into a query input.
    pub fn resolve(self, payload: &str) -> GatewayResult<QueryInput> {
        match self {
            InputFormat::Data(wire) => decode_data(wire, payload).map(QueryInput::Value),
            view => resolve_view(view, payload).map(QueryInput::Db),
        }
    }
}

fn instant_param(tag: &str, param: Option<&str>) -> GatewayResult<i64> {
    match param {
        None | Some("") => Err(GatewayError::format(format!(
            "input format `{tag}` requires an epoch-millisecond parameter"
        ))),
        Some(p) => p.trim().parse::<i64>().map_err(|_| {
            GatewayError::format(format!(
                "input format `{tag}`: `{p}` is not an epoch-millisecond timestamp"
            ))
        }),
    }
}

fn resolve_view(format: InputFormat, config_text: &str) -> GatewayResult<Db> {
    let config = parse_config(config_text)?;
    let db = connect(&config)?.db();
    let view = match format {
        InputFormat::History => db.history()?,
        InputFormat::Since(t) => db.since(t)?,
        InputFormat::AsOf(t) => db.as_of(t)?,
        _ => db,
    };
    debug!(store = %config.backend, view = %view.view(), "resolved database input");
    Ok(view)
}

/// Decodes a payload in one of the wire formats. CBOR arrives as base64 text.
pub fn decode_data(format: WireFormat, payload: &str) -> GatewayResult<Value> {
    let bytes = match format {
        WireFormat::Cbor => STANDARD
            .decode(payload.trim())
            .map_err(|source| GatewayError::Base64 {
                what: "cbor input",
                source,
            })?,
        _ => payload.as_bytes().to_vec(),
    };
    format.decode(&bytes).map_err(|source| GatewayError::Parse {
        what: "input data",
        source,
    })
}

/// Resolves an input that must be a database view.
pub fn resolve_db(tag: &str, payload: &str) -> GatewayResult<Db> {
    match InputFormat::parse(tag)?.resolve(payload)? {
        QueryInput::Db(db) => Ok(db),
        QueryInput::Value(_) => Err(GatewayError::format(format!(
            "expected a database input (db, history, since:<ms>, asof:<ms>), got `{tag}`"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn parses_tags() {
        assert_eq!(InputFormat::parse("db").unwrap(), InputFormat::Db);
        assert_eq!(InputFormat::parse("history").unwrap(), InputFormat::History);
        assert_eq!(InputFormat::parse("since:1000").unwrap(), InputFormat::Since(1000));
        assert_eq!(InputFormat::parse("asof:-5").unwrap(), InputFormat::AsOf(-5));
        assert_eq!(
            InputFormat::parse("cbor").unwrap(),
            InputFormat::Data(WireFormat::Cbor)
        );
    }

    #[test]
    fn unknown_kind_is_unsupported() {
        let err = InputFormat::parse("xml").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnsupportedFormatError);
        assert!(err.to_string().contains("xml"));
    }

    #[test]
    fn bad_parameters_are_format_errors() {
        for tag in ["asof", "asof:", "since:yesterday", "db:1", "json:2"] {
            let err = InputFormat::parse(tag).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::FormatError, "{tag}");
        }
    }

    #[test]
    fn decodes_data_payloads() {
        let edn = decode_data(WireFormat::Edn, "[1 :a]").unwrap();
        assert_eq!(edn, Value::Array(vec![Value::Integer(1), Value::keyword("a")]));

        let json = decode_data(WireFormat::Json, r#"{"age": 30}"#).unwrap();
        assert_eq!(json.get_keyword("age"), Some(&Value::Integer(30)));

        let bytes = WireFormat::Cbor.encode(&edn).unwrap();
        let cbor = decode_data(WireFormat::Cbor, &STANDARD.encode(bytes)).unwrap();
        assert_eq!(cbor, edn);
    }

    #[test]
    fn bad_base64_is_parse_error() {
        let err = decode_data(WireFormat::Cbor, "not base64!").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ParseError);
    }

    #[test]
    fn data_is_not_a_database() {
        let err = resolve_db("edn", "[]").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::FormatError);
    }
}
