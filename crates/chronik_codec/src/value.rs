//! Dynamic wire value type.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};

use uuid::Uuid;

/// A dynamic value exchanged across the gateway.
///
/// Every operation input and result is a `Value`. The type is closed over
/// what JSON, EDN and CBOR can jointly express once tagged values are
/// accounted for.
///
/// Sets and maps are normalized on construction through [`Value::set`] and
/// [`Value::map`]: elements are sorted by the total order of `Value` and
/// de-duplicated, so equality does not depend on insertion order. Building
/// the variants directly skips normalization; codecs never do that.
#[derive(Debug, Clone)]
pub enum Value {
    /// Absent value (`nil` / `null`).
    Null,
    /// Boolean value.
    Bool(bool),
    /// Signed 64-bit integer.
    Integer(i64),
    /// IEEE 754 double.
    Float(f64),
    /// UTF-8 text.
    Text(String),
    /// Keyword, stored without its leading colon (`db/ident`).
    Keyword(String),
    /// Symbol such as `?e` or `count`.
    Symbol(String),
    /// 128-bit UUID.
    Uuid(Uuid),
    /// Point in time, milliseconds since the Unix epoch.
    Instant(i64),
    /// Ordered sequence (EDN vectors and lists).
    Array(Vec<Value>),
    /// Sorted, de-duplicated set.
    Set(Vec<Value>),
    /// Map with sorted, unique keys.
    Map(Vec<(Value, Value)>),
}

impl Value {
    /// Create a normalized set.
    pub fn set(mut items: Vec<Value>) -> Self {
        items.sort();
        items.dedup();
        Value::Set(items)
    }

    /// Create a normalized map. When a key repeats, the last pair wins.
    pub fn map(pairs: Vec<(Value, Value)>) -> Self {
        let sorted: BTreeMap<Value, Value> = pairs.into_iter().collect();
        Value::Map(sorted.into_iter().collect())
    }

    /// Create a keyword. A leading colon is accepted and stripped.
    pub fn keyword(name: impl AsRef<str>) -> Self {
        let name = name.as_ref();
        Value::Keyword(name.strip_prefix(':').unwrap_or(name).to_string())
    }

    /// Create a symbol.
    pub fn symbol(name: impl Into<String>) -> Self {
        Value::Symbol(name.into())
    }

    /// Create a text value.
    pub fn text(s: impl Into<String>) -> Self {
        Value::Text(s.into())
    }

    /// Returns `true` for [`Value::Null`].
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Boolean content, if any.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Integer content, if any.
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Value::Integer(n) => Some(*n),
            _ => None,
        }
    }

    /// Numeric content widened to `f64`.
    #[allow(clippy::cast_precision_loss)]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Integer(n) => Some(*n as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// Text content, if any.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Keyword name (without colon), if any.
    pub fn as_keyword(&self) -> Option<&str> {
        match self {
            Value::Keyword(k) => Some(k),
            _ => None,
        }
    }

    /// Symbol name, if any.
    pub fn as_symbol(&self) -> Option<&str> {
        match self {
            Value::Symbol(s) => Some(s),
            _ => None,
        }
    }

    /// Elements of an array or set.
    pub fn as_seq(&self) -> Option<&[Value]> {
        match self {
            Value::Array(items) | Value::Set(items) => Some(items),
            _ => None,
        }
    }

    /// Map entries, if any.
    pub fn as_map(&self) -> Option<&[(Value, Value)]> {
        match self {
            Value::Map(pairs) => Some(pairs),
            _ => None,
        }
    }

    /// Look up a key in a map value.
    pub fn get(&self, key: &Value) -> Option<&Value> {
        let pairs = self.as_map()?;
        pairs
            .binary_search_by(|(k, _)| k.cmp(key))
            .ok()
            .map(|idx| &pairs[idx].1)
    }

    /// Look up a keyword key (`"db/id"` or `":db/id"`) in a map value.
    pub fn get_keyword(&self, name: &str) -> Option<&Value> {
        self.get(&Value::keyword(name))
    }

    /// Short name of the variant, used in error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "nil",
            Value::Bool(_) => "boolean",
            Value::Integer(_) => "integer",
            Value::Float(_) => "float",
            Value::Text(_) => "string",
            Value::Keyword(_) => "keyword",
            Value::Symbol(_) => "symbol",
            Value::Uuid(_) => "uuid",
            Value::Instant(_) => "instant",
            Value::Array(_) => "vector",
            Value::Set(_) => "set",
            Value::Map(_) => "map",
        }
    }

    fn rank(&self) -> u8 {
        match self {
            Value::Null => 0,
            Value::Bool(_) => 1,
            Value::Integer(_) => 2,
            Value::Float(_) => 3,
            Value::Text(_) => 4,
            Value::Keyword(_) => 5,
            Value::Symbol(_) => 6,
            Value::Uuid(_) => 7,
            Value::Instant(_) => 8,
            Value::Array(_) => 9,
            Value::Set(_) => 10,
            Value::Map(_) => 11,
        }
    }
}

impl Ord for Value {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Value::Null, Value::Null) => Ordering::Equal,
            (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
            (Value::Integer(a), Value::Integer(b)) | (Value::Instant(a), Value::Instant(b)) => {
                a.cmp(b)
            }
            (Value::Float(a), Value::Float(b)) => a.total_cmp(b),
            (Value::Text(a), Value::Text(b))
            | (Value::Keyword(a), Value::Keyword(b))
            | (Value::Symbol(a), Value::Symbol(b)) => a.cmp(b),
            (Value::Uuid(a), Value::Uuid(b)) => a.cmp(b),
            (Value::Array(a), Value::Array(b)) | (Value::Set(a), Value::Set(b)) => a.cmp(b),
            (Value::Map(a), Value::Map(b)) => a.cmp(b),
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

impl PartialOrd for Value {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.rank().hash(state);
        match self {
            Value::Null => {}
            Value::Bool(b) => b.hash(state),
            Value::Integer(n) | Value::Instant(n) => n.hash(state),
            Value::Float(f) => f.to_bits().hash(state),
            Value::Text(s) | Value::Keyword(s) | Value::Symbol(s) => s.hash(state),
            Value::Uuid(u) => u.hash(state),
            Value::Array(items) | Value::Set(items) => items.hash(state),
            Value::Map(pairs) => pairs.hash(state),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match crate::edn::to_edn_string(self) {
            Ok(text) => f.write_str(&text),
            Err(_) => write!(f, "{self:?}"),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Integer(n)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<Uuid> for Value {
    fn from(u: Uuid) -> Self {
        Value::Uuid(u)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::Array(items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_is_sorted_and_deduplicated() {
        let a = Value::set(vec![Value::Integer(3), Value::Integer(1), Value::Integer(3)]);
        let b = Value::set(vec![Value::Integer(1), Value::Integer(3)]);
        assert_eq!(a, b);
        assert_eq!(a.as_seq().unwrap().len(), 2);
    }

    #[test]
    fn map_last_key_wins() {
        let m = Value::map(vec![
            (Value::keyword("a"), Value::Integer(1)),
            (Value::keyword("b"), Value::Integer(2)),
            (Value::keyword("a"), Value::Integer(3)),
        ]);
        assert_eq!(m.get_keyword(":a"), Some(&Value::Integer(3)));
        assert_eq!(m.as_map().unwrap().len(), 2);
    }

    #[test]
    fn keyword_strips_colon() {
        assert_eq!(Value::keyword(":db/id"), Value::Keyword("db/id".into()));
        assert_eq!(Value::keyword("db/id"), Value::Keyword("db/id".into()));
    }

    #[test]
    fn order_is_total_across_variants() {
        let mut values = vec![
            Value::text("x"),
            Value::Null,
            Value::Float(f64::NAN),
            Value::Integer(5),
            Value::keyword("k"),
            Value::Bool(false),
        ];
        values.sort();
        assert_eq!(values[0], Value::Null);
        assert_eq!(values[1], Value::Bool(false));
        assert_eq!(values[2], Value::Integer(5));
        assert!(matches!(values[3], Value::Float(f) if f.is_nan()));
    }

    #[test]
    fn integer_and_float_are_distinct() {
        assert_ne!(Value::Integer(30), Value::Float(30.0));
        assert_eq!(Value::Integer(30).as_f64(), Some(30.0));
    }

    #[test]
    fn equal_values_hash_equally() {
        use std::collections::hash_map::DefaultHasher;
        let hash = |v: &Value| {
            let mut h = DefaultHasher::new();
            v.hash(&mut h);
            h.finish()
        };
        let a = Value::set(vec![Value::text("b"), Value::text("a")]);
        let b = Value::set(vec![Value::text("a"), Value::text("b")]);
        assert_eq!(hash(&a), hash(&b));
    }
}
