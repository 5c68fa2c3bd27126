//! JSON representation of wire values.
//!
//! JSON has no keywords, sets or tagged scalars, so those are spelled out:
//!
//! | Value | JSON |
//! |-------|------|
//! | keyword `:a/b` | `":a/b"` |
//! | text starting with `:`, `\` or `!` | the text prefixed with `\` |
//! | symbol | `["!sym", "name"]` |
//! | uuid | `["!uuid", "8-4-4-4-12"]` |
//! | instant | `["!inst", epoch_ms]` |
//! | set | `["!set", [..]]` |
//! | map with keyword or text keys | object; keyword keys bare, text keys prefixed with `\` |
//! | any other map | `["!map", [[k, v], ..]]` |
//!
//! Plain object keys read back as keywords, so `{"name": "Alice"}` from a
//! foreign caller is the map `{:name "Alice"}`.

use serde_json::Value as JsonValue;

use crate::error::{CodecError, CodecResult};
use crate::value::Value;

const FORMAT: &str = "JSON";

const TAG_SET: &str = "!set";
const TAG_SYMBOL: &str = "!sym";
const TAG_UUID: &str = "!uuid";
const TAG_INSTANT: &str = "!inst";
const TAG_MAP: &str = "!map";

/// Render a value as compact JSON text.
///
/// # Errors
///
/// Returns [`CodecError::Unrepresentable`] for NaN and infinite floats.
pub fn to_json_string(value: &Value) -> CodecResult<String> {
    let json = value_to_json(value)?;
    serde_json::to_string(&json).map_err(|e| CodecError::encoding_failed(e.to_string()))
}

/// Parse JSON text into a value.
///
/// # Errors
///
/// Returns [`CodecError::Syntax`] for malformed JSON and
/// [`CodecError::DecodingFailed`] for malformed tagged arrays.
pub fn from_json_str(text: &str) -> CodecResult<Value> {
    let json: JsonValue = serde_json::from_str(text).map_err(|e| {
        let offset = line_col_to_offset(text, e.line(), e.column());
        CodecError::syntax(FORMAT, offset, e.to_string())
    })?;
    json_to_value(&json)
}

/// Convert a value to a `serde_json` tree.
pub fn value_to_json(value: &Value) -> CodecResult<JsonValue> {
    Ok(match value {
        Value::Null => JsonValue::Null,
        Value::Bool(b) => JsonValue::Bool(*b),
        Value::Integer(n) => JsonValue::Number((*n).into()),
        Value::Float(f) => serde_json::Number::from_f64(*f)
            .map(JsonValue::Number)
            .ok_or_else(|| CodecError::unrepresentable(FORMAT, format!("float {f}")))?,
        Value::Text(s) => JsonValue::String(escape_text(s)),
        Value::Keyword(k) => JsonValue::String(format!(":{k}")),
        Value::Symbol(s) => tagged(TAG_SYMBOL, JsonValue::String(s.clone())),
        Value::Uuid(u) => tagged(TAG_UUID, JsonValue::String(u.to_string())),
        Value::Instant(ms) => tagged(TAG_INSTANT, JsonValue::Number((*ms).into())),
        Value::Array(items) => JsonValue::Array(seq_to_json(items)?),
        Value::Set(items) => tagged(TAG_SET, JsonValue::Array(seq_to_json(items)?)),
        Value::Map(pairs) => map_to_json(pairs)?,
    })
}

/// Convert a `serde_json` tree to a value.
pub fn json_to_value(json: &JsonValue) -> CodecResult<Value> {
    match json {
        JsonValue::Null => Ok(Value::Null),
        JsonValue::Bool(b) => Ok(Value::Bool(*b)),
        JsonValue::Number(n) => {
            if let Some(i) = n.as_i64() {
                Ok(Value::Integer(i))
            } else if let Some(f) = n.as_f64() {
                Ok(Value::Float(f))
            } else {
                Err(CodecError::decoding_failed(format!("invalid number {n}")))
            }
        }
        JsonValue::String(s) => Ok(unescape_string(s)),
        JsonValue::Array(items) => {
            if let [JsonValue::String(tag), payload] = items.as_slice() {
                if let Some(value) = decode_tagged(tag, payload)? {
                    return Ok(value);
                }
            }
            items
                .iter()
                .map(json_to_value)
                .collect::<CodecResult<Vec<_>>>()
                .map(Value::Array)
        }
        JsonValue::Object(obj) => {
            let pairs = obj
                .iter()
                .map(|(k, v)| Ok((object_key_to_value(k), json_to_value(v)?)))
                .collect::<CodecResult<Vec<_>>>()?;
            Ok(Value::map(pairs))
        }
    }
}

fn tagged(tag: &str, payload: JsonValue) -> JsonValue {
    JsonValue::Array(vec![JsonValue::String(tag.to_string()), payload])
}

fn seq_to_json(items: &[Value]) -> CodecResult<Vec<JsonValue>> {
    items.iter().map(value_to_json).collect()
}

fn needs_escape(s: &str) -> bool {
    s.starts_with([':', '\\', '!'])
}

fn escape_text(s: &str) -> String {
    if needs_escape(s) {
        format!("\\{s}")
    } else {
        s.to_string()
    }
}

fn unescape_string(s: &str) -> Value {
    if let Some(rest) = s.strip_prefix('\\') {
        Value::Text(rest.to_string())
    } else if let Some(name) = s.strip_prefix(':') {
        Value::Keyword(name.to_string())
    } else {
        Value::Text(s.to_string())
    }
}

fn map_to_json(pairs: &[(Value, Value)]) -> CodecResult<JsonValue> {
    let objectable = pairs
        .iter()
        .all(|(k, _)| matches!(k, Value::Keyword(_) | Value::Text(_)));

    if objectable {
        let mut obj = serde_json::Map::with_capacity(pairs.len());
        for (k, v) in pairs {
            let key = match k {
                Value::Keyword(name) if needs_escape(name) => format!(":{name}"),
                Value::Keyword(name) => name.clone(),
                Value::Text(s) => format!("\\{s}"),
                _ => unreachable!("checked above"),
            };
            obj.insert(key, value_to_json(v)?);
        }
        return Ok(JsonValue::Object(obj));
    }

    let entries = pairs
        .iter()
        .map(|(k, v)| Ok(JsonValue::Array(vec![value_to_json(k)?, value_to_json(v)?])))
        .collect::<CodecResult<Vec<_>>>()?;
    Ok(tagged(TAG_MAP, JsonValue::Array(entries)))
}

fn object_key_to_value(key: &str) -> Value {
    if let Some(rest) = key.strip_prefix('\\') {
        Value::Text(rest.to_string())
    } else {
        Value::keyword(key)
    }
}

fn decode_tagged(tag: &str, payload: &JsonValue) -> CodecResult<Option<Value>> {
    let malformed = |what: &str| CodecError::decoding_failed(format!("malformed {tag}: {what}"));

    let value = match tag {
        TAG_SET => {
            let items = payload.as_array().ok_or_else(|| malformed("expected array"))?;
            let items = items.iter().map(json_to_value).collect::<CodecResult<Vec<_>>>()?;
            Value::set(items)
        }
        TAG_SYMBOL => {
            let name = payload.as_str().ok_or_else(|| malformed("expected string"))?;
            Value::Symbol(name.to_string())
        }
        TAG_UUID => {
            let text = payload.as_str().ok_or_else(|| malformed("expected string"))?;
            let id = uuid::Uuid::parse_str(text).map_err(|e| malformed(&e.to_string()))?;
            Value::Uuid(id)
        }
        TAG_INSTANT => {
            let ms = payload.as_i64().ok_or_else(|| malformed("expected integer"))?;
            Value::Instant(ms)
        }
        TAG_MAP => {
            let entries = payload.as_array().ok_or_else(|| malformed("expected array"))?;
            let mut pairs = Vec::with_capacity(entries.len());
            for entry in entries {
                match entry.as_array().map(Vec::as_slice) {
                    Some([k, v]) => pairs.push((json_to_value(k)?, json_to_value(v)?)),
                    _ => return Err(malformed("expected [key, value] pairs")),
                }
            }
            Value::map(pairs)
        }
        _ => return Ok(None),
    };
    Ok(Some(value))
}

fn line_col_to_offset(text: &str, line: usize, column: usize) -> usize {
    let preceding: usize = text
        .split_inclusive('\n')
        .take(line.saturating_sub(1))
        .map(str::len)
        .sum();
    preceding + column.saturating_sub(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(value: &Value) -> Value {
        from_json_str(&to_json_string(value).unwrap()).unwrap()
    }

    #[test]
    fn keywords_and_escaped_strings() {
        assert_eq!(to_json_string(&Value::keyword("db/id")).unwrap(), r#"":db/id""#);
        assert_eq!(to_json_string(&Value::text(":x")).unwrap(), r#""\\:x""#);
        assert_eq!(roundtrip(&Value::text(":x")), Value::text(":x"));
        assert_eq!(roundtrip(&Value::text("\\")), Value::text("\\"));
        assert_eq!(roundtrip(&Value::text("!set")), Value::text("!set"));
    }

    #[test]
    fn set_encoding() {
        let set = Value::set(vec![Value::Array(vec![Value::text("Alice")])]);
        assert_eq!(to_json_string(&set).unwrap(), r#"["!set",[["Alice"]]]"#);
        assert_eq!(roundtrip(&set), set);
    }

    #[test]
    fn array_that_looks_like_a_tag_survives() {
        let value = Value::Array(vec![Value::text("!set"), Value::Array(vec![])]);
        assert_eq!(roundtrip(&value), value);
    }

    #[test]
    fn object_keys_become_keywords() {
        let value = from_json_str(r#"{"name": "Alice", "age": 30}"#).unwrap();
        assert_eq!(value.get_keyword("name"), Some(&Value::text("Alice")));
        assert_eq!(value.get_keyword("age"), Some(&Value::Integer(30)));
        let value = from_json_str(r#"{":db/id": 1}"#).unwrap();
        assert_eq!(value.get_keyword("db/id"), Some(&Value::Integer(1)));
    }

    #[test]
    fn text_keys_and_foreign_keys() {
        let text_keys = Value::map(vec![(Value::text("k"), Value::Integer(1))]);
        assert_eq!(to_json_string(&text_keys).unwrap(), r#"{"\\k":1}"#);
        assert_eq!(roundtrip(&text_keys), text_keys);

        let int_keys = Value::map(vec![(Value::Integer(1), Value::keyword("a"))]);
        assert_eq!(to_json_string(&int_keys).unwrap(), r#"["!map",[[1,":a"]]]"#);
        assert_eq!(roundtrip(&int_keys), int_keys);
    }

    #[test]
    fn floats_stay_floats() {
        assert_eq!(roundtrip(&Value::Float(30.0)), Value::Float(30.0));
        assert_eq!(from_json_str("30").unwrap(), Value::Integer(30));
        assert!(matches!(
            to_json_string(&Value::Float(f64::NAN)),
            Err(CodecError::Unrepresentable { .. })
        ));
    }

    #[test]
    fn tagged_scalars() {
        let id = uuid::Uuid::from_u128(42);
        assert_eq!(roundtrip(&Value::Uuid(id)), Value::Uuid(id));
        assert_eq!(roundtrip(&Value::Instant(-5)), Value::Instant(-5));
        assert_eq!(roundtrip(&Value::symbol("?e")), Value::symbol("?e"));
    }

    #[test]
    fn syntax_error_reports_offset() {
        let err = from_json_str("[1,\n 2,").unwrap_err();
        assert!(matches!(err, CodecError::Syntax { format: "JSON", .. }));
    }

    #[test]
    fn malformed_tag_payload_is_an_error() {
        assert!(from_json_str(r#"["!uuid", "nope"]"#).is_err());
        assert!(from_json_str(r#"["!map", [[1]]]"#).is_err());
    }
}
