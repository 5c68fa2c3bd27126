//! Result serialization.

use crate::error::{is_sentinel, GatewayError, GatewayResult};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use chronik_codec::{Value, WireFormat};

/// A decoded output tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputFormat(WireFormat);

impl OutputFormat {
    /// Decodes `json`, `edn` or `cbor`.
    pub fn parse(tag: &str) -> GatewayResult<Self> {
        WireFormat::from_name(tag)
            .map(Self)
            .ok_or_else(|| GatewayError::unsupported_format(tag))
    }

    /// Underlying wire format.
    pub fn wire(self) -> WireFormat {
        self.0
    }

    /// Renders `value`. CBOR output is base64 (standard alphabet, padded).
    ///
    /// EDN text that would begin with the failure sentinel (a bare symbol
    /// such as `exception:x`) gets one leading space, which EDN readers
    /// skip.
    pub fn serialize(self, value: &Value) -> GatewayResult<String> {
        let encode_err = |source| GatewayError::Encode {
            format: self.0.name(),
            source,
        };
        match self.0 {
            WireFormat::Json => chronik_codec::to_json_string(value).map_err(encode_err),
            WireFormat::Edn => {
                let text = chronik_codec::to_edn_string(value).map_err(encode_err)?;
                Ok(if is_sentinel(&text) {
                    format!(" {text}")
                } else {
                    text
                })
            }
            WireFormat::Cbor => chronik_codec::to_canonical_cbor(value)
                .map(|bytes| STANDARD.encode(bytes))
                .map_err(encode_err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::input::decode_data;

    #[test]
    fn unknown_output_tag() {
        let err = OutputFormat::parse("xml").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnsupportedFormatError);
    }

    #[test]
    fn renders_each_format() {
        let value = Value::set(vec![Value::Array(vec![Value::text("Alice")])]);
        let edn = OutputFormat::parse("edn").unwrap();
        assert_eq!(edn.serialize(&value).unwrap(), r#"#{["Alice"]}"#);

        let json = OutputFormat::parse("json").unwrap();
        assert_eq!(json.serialize(&value).unwrap(), r#"["!set",[["Alice"]]]"#);
    }

    #[test]
    fn serialized_output_decodes_back() {
        let value = Value::map(vec![
            (Value::keyword("name"), Value::text("Alice")),
            (Value::keyword("tags"), Value::set(vec![Value::keyword("a")])),
            (Value::keyword("at"), Value::Instant(1_700_000_000_000)),
        ]);
        for format in WireFormat::ALL {
            let text = OutputFormat(format).serialize(&value).unwrap();
            assert_eq!(decode_data(format, &text).unwrap(), value, "{format}");
        }
    }

    #[test]
    fn cbor_output_is_base64() {
        let text = OutputFormat(WireFormat::Cbor).serialize(&Value::Integer(1)).unwrap();
        assert_eq!(text, "AQ==");
    }

    #[test]
    fn sentinel_lookalike_is_disambiguated() {
        let text = OutputFormat(WireFormat::Edn)
            .serialize(&Value::symbol("exception:x"))
            .unwrap();
        assert_eq!(text, " exception:x");
        assert!(!is_sentinel(&text));
    }

    #[test]
    fn nan_is_not_json() {
        let err = OutputFormat(WireFormat::Json)
            .serialize(&Value::Float(f64::NAN))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::FormatError);
    }
}
