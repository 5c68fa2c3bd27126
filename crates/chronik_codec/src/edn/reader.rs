//! EDN reader.

use crate::edn::parse_instant;
use crate::error::{CodecError, CodecResult};
use crate::value::Value;

const FORMAT: &str = "EDN";
const MAX_DEPTH: usize = 512;

/// Read exactly one EDN form from `text`.
///
/// # Errors
///
/// Returns [`CodecError::Syntax`] for malformed input, an empty document,
/// or anything but whitespace and comments after the form.
pub fn from_edn_str(text: &str) -> CodecResult<Value> {
    let mut reader = EdnReader::new(text);
    let value = reader
        .read()?
        .ok_or_else(|| CodecError::syntax(FORMAT, 0, "empty input"))?;
    reader.skip_whitespace();
    if reader.pos < reader.src.len() {
        return Err(reader.error("unexpected trailing input"));
    }
    Ok(value)
}

/// Streaming reader over EDN text.
pub struct EdnReader<'a> {
    src: &'a str,
    pos: usize,
    depth: usize,
}

impl<'a> EdnReader<'a> {
    /// Create a reader positioned at the start of `src`.
    pub fn new(src: &'a str) -> Self {
        Self {
            src,
            pos: 0,
            depth: 0,
        }
    }

    /// Read the next form, or `None` at end of input.
    pub fn read(&mut self) -> CodecResult<Option<Value>> {
        loop {
            self.skip_whitespace();
            let Some(c) = self.peek() else {
                return Ok(None);
            };
            // #_ discards the following form
            if c == '#' && self.peek_at(1) == Some('_') {
                self.pos += 2;
                self.read_required()?;
                continue;
            }
            return self.read_form().map(Some);
        }
    }

    fn read_required(&mut self) -> CodecResult<Value> {
        self.read()?.ok_or_else(|| self.error("unexpected end of input"))
    }

    fn error(&self, message: impl Into<String>) -> CodecError {
        CodecError::syntax(FORMAT, self.pos, message)
    }

    fn peek(&self) -> Option<char> {
        self.src[self.pos..].chars().next()
    }

    fn peek_at(&self, n: usize) -> Option<char> {
        self.src[self.pos..].chars().nth(n)
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    fn skip_whitespace(&mut self) {
        while let Some(c) = self.peek() {
            if c.is_whitespace() || c == ',' {
                self.bump();
            } else if c == ';' {
                while let Some(c) = self.bump() {
                    if c == '\n' {
                        break;
                    }
                }
            } else {
                break;
            }
        }
    }

    fn read_form(&mut self) -> CodecResult<Value> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(self.error("nesting too deep"));
        }
        let result = self.read_form_inner();
        self.depth -= 1;
        result
    }

    fn read_form_inner(&mut self) -> CodecResult<Value> {
        let start = self.pos;
        let Some(c) = self.bump() else {
            return Err(self.error("unexpected end of input"));
        };
        match c {
            '[' => self.read_until(']').map(Value::Array),
            '(' => self.read_until(')').map(Value::Array),
            '{' => {
                let items = self.read_until('}')?;
                pairs_to_map(items).map_err(|msg| CodecError::syntax(FORMAT, start, msg))
            }
            '"' => self.read_string().map(Value::Text),
            '\\' => self.read_char(),
            ':' => {
                let token = self.read_token();
                if token.is_empty() || token.starts_with(':') {
                    return Err(CodecError::syntax(FORMAT, start, "invalid keyword"));
                }
                Ok(Value::Keyword(token.to_string()))
            }
            '#' => self.read_dispatch(start),
            ']' | ')' | '}' => Err(CodecError::syntax(
                FORMAT,
                start,
                format!("unmatched delimiter {c}"),
            )),
            _ => {
                self.pos = start;
                let token = self.read_token();
                if token.is_empty() {
                    return Err(CodecError::syntax(FORMAT, start, format!("unexpected {c:?}")));
                }
                parse_atom(token).map_err(|msg| CodecError::syntax(FORMAT, start, msg))
            }
        }
    }

    fn read_until(&mut self, close: char) -> CodecResult<Vec<Value>> {
        let mut items = Vec::new();
        loop {
            self.skip_whitespace();
            match self.peek() {
                None => return Err(self.error(format!("expected {close}"))),
                Some(c) if c == close => {
                    self.bump();
                    return Ok(items);
                }
                Some('#') if self.peek_at(1) == Some('_') => {
                    self.pos += 2;
                    self.read_required()?;
                }
                Some(_) => items.push(self.read_form()?),
            }
        }
    }

    fn read_dispatch(&mut self, start: usize) -> CodecResult<Value> {
        match self.peek() {
            Some('{') => {
                self.bump();
                self.read_until('}').map(Value::set)
            }
            Some('#') => {
                self.bump();
                match self.read_token() {
                    "Inf" => Ok(Value::Float(f64::INFINITY)),
                    "-Inf" => Ok(Value::Float(f64::NEG_INFINITY)),
                    "NaN" => Ok(Value::Float(f64::NAN)),
                    other => Err(CodecError::syntax(
                        FORMAT,
                        start,
                        format!("unknown symbolic value ##{other}"),
                    )),
                }
            }
            _ => {
                let tag = self.read_token().to_string();
                let form = self.read_required()?;
                match (tag.as_str(), &form) {
                    ("uuid", Value::Text(s)) => uuid::Uuid::parse_str(s)
                        .map(Value::Uuid)
                        .map_err(|e| CodecError::syntax(FORMAT, start, format!("#uuid: {e}"))),
                    ("inst", Value::Text(s)) => parse_instant(s)
                        .map(Value::Instant)
                        .ok_or_else(|| CodecError::syntax(FORMAT, start, format!("#inst: bad timestamp {s:?}"))),
                    ("uuid" | "inst", _) => Err(CodecError::syntax(
                        FORMAT,
                        start,
                        format!("#{tag} expects a string"),
                    )),
                    _ => Err(CodecError::unsupported_type(format!("EDN tag #{tag}"))),
                }
            }
        }
    }

    fn read_token(&mut self) -> &'a str {
        let src = self.src;
        let start = self.pos;
        while let Some(c) = self.peek() {
            if is_delimiter(c) {
                break;
            }
            self.bump();
        }
        &src[start..self.pos]
    }

    fn read_string(&mut self) -> CodecResult<String> {
        let mut out = String::new();
        loop {
            let c = self.bump().ok_or_else(|| self.error("unterminated string"))?;
            match c {
                '"' => return Ok(out),
                '\\' => {
                    let esc = self.bump().ok_or_else(|| self.error("unterminated string"))?;
                    match esc {
                        'n' => out.push('\n'),
                        't' => out.push('\t'),
                        'r' => out.push('\r'),
                        'b' => out.push('\u{8}'),
                        'f' => out.push('\u{c}'),
                        '"' => out.push('"'),
                        '\\' => out.push('\\'),
                        'u' => out.push(self.read_unicode_escape()?),
                        other => return Err(self.error(format!("invalid escape \\{other}"))),
                    }
                }
                c => out.push(c),
            }
        }
    }

    fn read_unicode_escape(&mut self) -> CodecResult<char> {
        let end = self.pos + 4;
        let hex = self
            .src
            .get(self.pos..end)
            .ok_or_else(|| self.error("truncated \\u escape"))?;
        let code = u32::from_str_radix(hex, 16).map_err(|_| self.error("invalid \\u escape"))?;
        self.pos = end;
        char::from_u32(code).ok_or_else(|| self.error("invalid code point"))
    }

    fn read_char(&mut self) -> CodecResult<Value> {
        let start = self.pos;
        let first = self.bump().ok_or_else(|| self.error("unexpected end of input"))?;
        let rest = self.read_token();
        let c = match (first, rest) {
            (c, "") => c,
            ('n', "ewline") => '\n',
            ('s', "pace") => ' ',
            ('t', "ab") => '\t',
            ('r', "eturn") => '\r',
            ('u', hex) if hex.len() == 4 => u32::from_str_radix(hex, 16)
                .ok()
                .and_then(char::from_u32)
                .ok_or_else(|| CodecError::syntax(FORMAT, start, "invalid character literal"))?,
            _ => return Err(CodecError::syntax(FORMAT, start, "invalid character literal")),
        };
        Ok(Value::Text(c.to_string()))
    }
}

fn is_delimiter(c: char) -> bool {
    c.is_whitespace() || matches!(c, ',' | ';' | '"' | '(' | ')' | '[' | ']' | '{' | '}')
}

fn pairs_to_map(items: Vec<Value>) -> Result<Value, String> {
    if items.len() % 2 != 0 {
        return Err("map literal must contain an even number of forms".to_string());
    }
    let mut pairs = Vec::with_capacity(items.len() / 2);
    let mut iter = items.into_iter();
    while let (Some(k), Some(v)) = (iter.next(), iter.next()) {
        pairs.push((k, v));
    }
    Ok(Value::map(pairs))
}

fn parse_atom(token: &str) -> Result<Value, String> {
    match token {
        "nil" => return Ok(Value::Null),
        "true" => return Ok(Value::Bool(true)),
        "false" => return Ok(Value::Bool(false)),
        _ => {}
    }

    let mut chars = token.chars();
    let first = chars.next().unwrap_or(' ');
    let second = chars.next();
    let numeric = first.is_ascii_digit()
        || (matches!(first, '+' | '-') && second.is_some_and(|c| c.is_ascii_digit()));

    if numeric {
        parse_number(token)
    } else {
        Ok(Value::Symbol(token.to_string()))
    }
}

fn parse_number(token: &str) -> Result<Value, String> {
    let bad = || format!("invalid number {token}");
    if let Some(digits) = token.strip_suffix('N') {
        return digits
            .parse::<i64>()
            .map(Value::Integer)
            .map_err(|_| format!("integer out of range {token}"));
    }
    if let Some(digits) = token.strip_suffix('M') {
        return digits.parse::<f64>().map(Value::Float).map_err(|_| bad());
    }
    if token.contains(['.', 'e', 'E']) {
        return token.parse::<f64>().map(Value::Float).map_err(|_| bad());
    }
    token.parse::<i64>().map(Value::Integer).map_err(|e| {
        if matches!(
            e.kind(),
            std::num::IntErrorKind::PosOverflow | std::num::IntErrorKind::NegOverflow
        ) {
            format!("integer out of range {token}")
        } else {
            bad()
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kw(name: &str) -> Value {
        Value::keyword(name)
    }

    #[test]
    fn reads_scalars() {
        assert_eq!(from_edn_str("nil").unwrap(), Value::Null);
        assert_eq!(from_edn_str("true").unwrap(), Value::Bool(true));
        assert_eq!(from_edn_str("-42").unwrap(), Value::Integer(-42));
        assert_eq!(from_edn_str("42N").unwrap(), Value::Integer(42));
        assert_eq!(from_edn_str("1.5").unwrap(), Value::Float(1.5));
        assert_eq!(from_edn_str("1e3").unwrap(), Value::Float(1000.0));
        assert_eq!(from_edn_str("2.5M").unwrap(), Value::Float(2.5));
        assert_eq!(from_edn_str(":db/id").unwrap(), kw("db/id"));
        assert_eq!(from_edn_str("?e").unwrap(), Value::symbol("?e"));
        assert_eq!(from_edn_str("-").unwrap(), Value::symbol("-"));
        assert_eq!(from_edn_str(r#""a\tb""#).unwrap(), Value::text("a\tb"));
        assert_eq!(from_edn_str(r"\newline").unwrap(), Value::text("\n"));
    }

    #[test]
    fn reads_query() {
        let value = from_edn_str("[:find ?n :where [?e :name ?n]]").unwrap();
        assert_eq!(
            value,
            Value::Array(vec![
                kw("find"),
                Value::symbol("?n"),
                kw("where"),
                Value::Array(vec![Value::symbol("?e"), kw("name"), Value::symbol("?n")]),
            ])
        );
    }

    #[test]
    fn reads_config_map() {
        let value = from_edn_str(
            r#"{:store {:backend :memory :id #uuid "a5ba0e5c-6b8c-4b0a-8a3f-6a1d1a2e8b10"}
                :keep-history? true ; comment
                :schema-flexibility :read}"#,
        )
        .unwrap();
        let store = value.get_keyword("store").unwrap();
        assert_eq!(store.get_keyword("backend"), Some(&kw("memory")));
        assert!(matches!(store.get_keyword("id"), Some(Value::Uuid(_))));
        assert_eq!(value.get_keyword("keep-history?"), Some(&Value::Bool(true)));
    }

    #[test]
    fn reads_sets_lists_and_discards() {
        assert_eq!(
            from_edn_str("#{3 1 #_ 2 3}").unwrap(),
            Value::set(vec![Value::Integer(1), Value::Integer(3)])
        );
        assert_eq!(
            from_edn_str("(pull ?e [*])").unwrap(),
            Value::Array(vec![
                Value::symbol("pull"),
                Value::symbol("?e"),
                Value::Array(vec![Value::symbol("*")]),
            ])
        );
        assert_eq!(from_edn_str("#_ 1 2").unwrap(), Value::Integer(2));
    }

    #[test]
    fn reads_instants() {
        assert_eq!(
            from_edn_str(r#"#inst "1970-01-01T00:00:01.000Z""#).unwrap(),
            Value::Instant(1000)
        );
    }

    #[test]
    fn rejects_malformed_input() {
        assert!(from_edn_str("").is_err());
        assert!(from_edn_str("[1 2").is_err());
        assert!(from_edn_str("{:a}").is_err());
        assert!(from_edn_str("1 2").is_err());
        assert!(from_edn_str(")").is_err());
        assert!(from_edn_str("\"abc").is_err());
        assert!(from_edn_str("99999999999999999999").is_err());
        assert!(from_edn_str("#foo 1").is_err());
    }
}
