//! EDN printer.

use std::fmt::Write;

use crate::edn::format_instant;
use crate::error::{CodecError, CodecResult};
use crate::value::Value;

/// Render a value as EDN text.
///
/// Maps print as `{k v, k v}`, sets as `#{..}`, UUIDs and instants as
/// `#uuid` / `#inst` tagged literals.
///
/// # Errors
///
/// Returns [`CodecError::Unrepresentable`] for instants outside the range
/// a calendar date can express.
pub fn to_edn_string(value: &Value) -> CodecResult<String> {
    let mut out = String::new();
    write_value(&mut out, value)?;
    Ok(out)
}

fn write_value(out: &mut String, value: &Value) -> CodecResult<()> {
    match value {
        Value::Null => out.push_str("nil"),
        Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Value::Integer(n) => {
            let _ = write!(out, "{n}");
        }
        Value::Float(f) => write_float(out, *f),
        Value::Text(s) => write_string(out, s),
        Value::Keyword(k) => {
            if !is_keyword_name(k) {
                return Err(CodecError::unrepresentable("EDN", format!("keyword name {k:?}")));
            }
            out.push(':');
            out.push_str(k);
        }
        Value::Symbol(s) => {
            if !is_symbol_name(s) {
                return Err(CodecError::unrepresentable("EDN", format!("symbol name {s:?}")));
            }
            out.push_str(s);
        }
        Value::Uuid(u) => {
            let _ = write!(out, "#uuid \"{u}\"");
        }
        Value::Instant(ms) => {
            let text = format_instant(*ms)
                .ok_or_else(|| CodecError::unrepresentable("EDN", format!("instant {ms}")))?;
            let _ = write!(out, "#inst \"{text}\"");
        }
        Value::Array(items) => write_seq(out, "[", items, "]")?,
        Value::Set(items) => write_seq(out, "#{", items, "}")?,
        Value::Map(pairs) => {
            out.push('{');
            for (i, (k, v)) in pairs.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                write_value(out, k)?;
                out.push(' ');
                write_value(out, v)?;
            }
            out.push('}');
        }
    }
    Ok(())
}

fn is_name_char(c: char) -> bool {
    c.is_alphanumeric() || ".*+!-_?$%&=<>/:#".contains(c)
}

/// Whether `name` prints as `:name` and reads back as the same keyword.
fn is_keyword_name(name: &str) -> bool {
    let Some(first) = name.chars().next() else {
        return false;
    };
    first != ':'
        && first != '#'
        && name.chars().all(is_name_char)
        && (name == "/" || !(name.starts_with('/') || name.ends_with('/')))
}

/// Whether `name` reads back as the same symbol rather than a number,
/// literal or keyword.
fn is_symbol_name(name: &str) -> bool {
    let mut chars = name.chars();
    let (Some(first), second) = (chars.next(), chars.next()) else {
        return false;
    };
    let numeric = first.is_ascii_digit()
        || (matches!(first, '+' | '-' | '.') && second.is_some_and(|c| c.is_ascii_digit()));
    is_keyword_name(name) && !numeric && !matches!(name, "nil" | "true" | "false")
}

fn write_seq(out: &mut String, open: &str, items: &[Value], close: &str) -> CodecResult<()> {
    out.push_str(open);
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            out.push(' ');
        }
        write_value(out, item)?;
    }
    out.push_str(close);
    Ok(())
}

fn write_float(out: &mut String, f: f64) {
    if f.is_nan() {
        out.push_str("##NaN");
    } else if f.is_infinite() {
        out.push_str(if f > 0.0 { "##Inf" } else { "##-Inf" });
    } else {
        // Debug keeps a decimal point or exponent so the text reads back as a float.
        let _ = write!(out, "{f:?}");
    }
}

fn write_string(out: &mut String, s: &str) {
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\r' => out.push_str("\\r"),
            c if c.is_control() => {
                let _ = write!(out, "\\u{:04x}", u32::from(c));
            }
            c => out.push(c),
        }
    }
    out.push('"');
}
