//! Core type definitions for the datom engine.

use std::cmp::Ordering;
use std::fmt;

use chronik_codec::Value;

use crate::error::{CoreError, CoreResult};

/// Entity identifier. User entities start at 1.
pub type EntityId = i64;

/// Transaction identifier. Transactions are entities too.
pub type TxId = EntityId;

/// Id of the empty database; the first transaction is `TX0 + 1`.
pub const TX0: TxId = 536_870_912;

/// One fact: entity `e` has value `v` for attribute `a`, asserted (or
/// retracted, when `added` is false) by transaction `tx`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Datom {
    /// Entity.
    pub e: EntityId,
    /// Attribute ident, without the leading colon.
    pub a: String,
    /// Value.
    pub v: Value,
    /// Transaction.
    pub tx: TxId,
    /// Assertion (`true`) or retraction (`false`).
    pub added: bool,
}

impl Datom {
    /// Creates an assertion.
    pub fn new(e: EntityId, a: impl Into<String>, v: Value, tx: TxId) -> Self {
        Self {
            e,
            a: a.into(),
            v,
            tx,
            added: true,
        }
    }

    /// Same fact, retracted by `tx`.
    #[must_use]
    pub fn retraction(&self, tx: TxId) -> Self {
        Self {
            e: self.e,
            a: self.a.clone(),
            v: self.v.clone(),
            tx,
            added: false,
        }
    }

    /// Flat `[e a v tx added]` form.
    pub fn to_value(&self) -> Value {
        Value::Array(vec![
            Value::Integer(self.e),
            Value::Keyword(self.a.clone()),
            self.v.clone(),
            Value::Integer(self.tx),
            Value::Bool(self.added),
        ])
    }
}

impl fmt::Display for Datom {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#datom [{} :{} {} {} {}]", self.e, self.a, self.v, self.tx, self.added)
    }
}

/// Sort orders over datoms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Index {
    /// Entity, attribute, value, tx.
    Eavt,
    /// Attribute, entity, value, tx.
    Aevt,
    /// Attribute, value, entity, tx. Indexed and unique attributes only.
    Avet,
    /// Value, attribute, entity, tx. Reference attributes only.
    Vaet,
}

impl Index {
    /// Keyword name without the colon.
    pub const fn name(self) -> &'static str {
        match self {
            Index::Eavt => "eavt",
            Index::Aevt => "aevt",
            Index::Avet => "avet",
            Index::Vaet => "vaet",
        }
    }

    /// Parses `:eavt`, `:aevt`, `:avet` or `:vaet`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidOperation`] for anything else.
    pub fn from_value(value: &Value) -> CoreResult<Self> {
        match value.as_keyword() {
            Some("eavt") => Ok(Index::Eavt),
            Some("aevt") => Ok(Index::Aevt),
            Some("avet") => Ok(Index::Avet),
            Some("vaet") => Ok(Index::Vaet),
            _ => Err(CoreError::invalid_operation(format!(
                "unknown index {value}, expected one of :eavt :aevt :avet :vaet"
            ))),
        }
    }

    /// Compares two datoms in this index's order. Retractions sort after
    /// assertions of the same fact and transaction.
    pub fn compare(self, x: &Datom, y: &Datom) -> Ordering {
        let primary = match self {
            Index::Eavt => x.e.cmp(&y.e).then_with(|| x.a.cmp(&y.a)).then_with(|| x.v.cmp(&y.v)),
            Index::Aevt => x.a.cmp(&y.a).then_with(|| x.e.cmp(&y.e)).then_with(|| x.v.cmp(&y.v)),
            Index::Avet => x.a.cmp(&y.a).then_with(|| x.v.cmp(&y.v)).then_with(|| x.e.cmp(&y.e)),
            Index::Vaet => x.v.cmp(&y.v).then_with(|| x.a.cmp(&y.a)).then_with(|| x.e.cmp(&y.e)),
        };
        primary
            .then_with(|| x.tx.cmp(&y.tx))
            .then_with(|| y.added.cmp(&x.added))
    }
}

impl fmt::Display for Index {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, ":{}", self.name())
    }
}
