//! # Chronik Codec
//!
//! The dynamic [`Value`] that crosses the gateway, and the three wire
//! formats it travels in:
//!
//! - **JSON** via `serde_json`, with tagged arrays for the types JSON lacks
//! - **EDN** text, read and printed natively
//! - **Canonical CBOR** (RFC 8949 §4.2.1) with semantic tags for keywords,
//!   symbols, sets, UUIDs and instants
//!
//! ## Usage
//!
//! ```
//! use chronik_codec::{Value, WireFormat};
//!
//! let value = chronik_codec::from_edn_str("{:name \"Alice\" :age 30}").unwrap();
//! assert_eq!(value.get_keyword("age"), Some(&Value::Integer(30)));
//!
//! let bytes = WireFormat::Cbor.encode(&value).unwrap();
//! assert_eq!(WireFormat::Cbor.decode(&bytes).unwrap(), value);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod cbor;
mod edn;
mod error;
mod json;
mod value;

pub use cbor::{
    from_canonical_cbor, from_cbor, to_canonical_cbor, CanonicalEncoder, CborDecoder,
};
pub use edn::{format_instant, from_edn_str, parse_instant, to_edn_string, EdnReader};
pub use error::{CodecError, CodecResult};
pub use json::{from_json_str, json_to_value, to_json_string, value_to_json};
pub use value::Value;

/// One of the three supported wire formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WireFormat {
    /// JSON text.
    Json,
    /// EDN text.
    Edn,
    /// Canonical CBOR bytes.
    Cbor,
}

impl WireFormat {
    /// All formats, in tag order.
    pub const ALL: [WireFormat; 3] = [WireFormat::Json, WireFormat::Edn, WireFormat::Cbor];

    /// Tag used to select this format (`"json"`, `"edn"`, `"cbor"`).
    pub const fn name(self) -> &'static str {
        match self {
            WireFormat::Json => "json",
            WireFormat::Edn => "edn",
            WireFormat::Cbor => "cbor",
        }
    }

    /// Look a format up by its tag.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|f| f.name() == name)
    }

    /// Encode a value. JSON and EDN produce UTF-8 text.
    pub fn encode(self, value: &Value) -> CodecResult<Vec<u8>> {
        match self {
            WireFormat::Json => to_json_string(value).map(String::into_bytes),
            WireFormat::Edn => to_edn_string(value).map(String::into_bytes),
            WireFormat::Cbor => to_canonical_cbor(value),
        }
    }

    /// Decode a value.
    pub fn decode(self, bytes: &[u8]) -> CodecResult<Value> {
        match self {
            WireFormat::Json => from_json_str(utf8(bytes)?),
            WireFormat::Edn => from_edn_str(utf8(bytes)?),
            WireFormat::Cbor => from_cbor(bytes),
        }
    }
}

impl std::fmt::Display for WireFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

fn utf8(bytes: &[u8]) -> CodecResult<&str> {
    std::str::from_utf8(bytes).map_err(|_| CodecError::InvalidUtf8)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn arb_leaf() -> impl Strategy<Value = Value> {
        prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::Bool),
            any::<i64>().prop_map(Value::Integer),
            (-1_000_000i32..1_000_000).prop_map(|n| Value::Float(f64::from(n) / 4.0)),
            "\\PC{0,12}".prop_map(Value::Text),
            "[a-z][a-z0-9-]{0,8}(/[a-z][a-z0-9-]{0,8})?".prop_map(Value::Keyword),
            "[a-z?][a-z0-9-]{0,8}"
                .prop_filter("reserved", |s| !matches!(s.as_str(), "nil" | "true" | "false"))
                .prop_map(Value::Symbol),
            any::<u128>().prop_map(|n| Value::Uuid(uuid::Uuid::from_u128(n))),
            (-10_000_000_000_000i64..10_000_000_000_000).prop_map(Value::Instant),
        ]
    }

    fn arb_value() -> impl Strategy<Value = Value> {
        arb_leaf().prop_recursive(3, 32, 6, |inner| {
            prop_oneof![
                prop::collection::vec(inner.clone(), 0..6).prop_map(Value::Array),
                prop::collection::vec(inner.clone(), 0..6).prop_map(Value::set),
                prop::collection::vec((inner.clone(), inner), 0..6).prop_map(Value::map),
            ]
        })
    }

    proptest! {
        #[test]
        fn every_format_roundtrips(value in arb_value()) {
            for format in WireFormat::ALL {
                let bytes = format.encode(&value).unwrap();
                prop_assert_eq!(format.decode(&bytes).unwrap(), value.clone(), "format {}", format);
            }
        }

        #[test]
        fn edn_names_read_back_or_are_refused(name in "\\PC{0,6}", symbol in any::<bool>()) {
            let value = if symbol { Value::symbol(name) } else { Value::Keyword(name) };
            match to_edn_string(&value) {
                Ok(text) => {
                    prop_assert_eq!(from_edn_str(&text).unwrap(), value);
                }
                Err(err) => {
                    prop_assert!(matches!(err, CodecError::Unrepresentable { .. }), "{}", err);
                }
            }
        }

        #[test]
        fn canonical_cbor_is_deterministic(value in arb_value()) {
            let a = to_canonical_cbor(&value).unwrap();
            let b = to_canonical_cbor(&value.clone()).unwrap();
            prop_assert_eq!(&a, &b);
            prop_assert_eq!(from_canonical_cbor(&a).unwrap(), value);
        }

        #[test]
        fn canonical_cbor_readable_by_ciborium(value in arb_value()) {
            let bytes = to_canonical_cbor(&value).unwrap();
            let parsed: Result<ciborium::value::Value, _> = ciborium::de::from_reader(bytes.as_slice());
            prop_assert!(parsed.is_ok());
        }
    }

    #[test]
    fn format_names() {
        assert_eq!(WireFormat::from_name("edn"), Some(WireFormat::Edn));
        assert_eq!(WireFormat::from_name("xml"), None);
        assert_eq!(WireFormat::Cbor.to_string(), "cbor");
    }

    #[test]
    fn text_formats_reject_invalid_utf8() {
        assert!(matches!(
            WireFormat::Json.decode(&[0xff]),
            Err(CodecError::InvalidUtf8)
        ));
    }
}
