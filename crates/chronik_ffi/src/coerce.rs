//! Schema-aware coercion of JSON transaction data.
//!
//! JSON has no keywords, uuids, instants or separate integer and float
//! types, so values decoded from JSON are converted to the type the schema
//! declares for their attribute before the engine sees them.

use chronik_codec::Value;
use chronik_core::{Db, Schema, ValueType};
use std::collections::HashMap;

/// Attribute ident (without colon) to its declared value type.
#[derive(Debug, Default)]
pub struct TypeTable {
    types: HashMap<String, ValueType>,
}

impl TypeTable {
    /// Collects the built-in attribute types, the types declared in `db`
    /// and attribute definitions found in `tx_data` itself.
    pub fn build(db: &Db, tx_data: &Value) -> Self {
        let mut table = Self::default();
        for attr in Schema::new().attributes() {
            table.types.insert(attr.ident.clone(), attr.value_type);
        }
        if let Some(pairs) = db.schema().as_map() {
            for (_, attr) in pairs {
                table.declare(attr);
            }
        }
        for form in tx_data.as_seq().unwrap_or_default() {
            if form.as_map().is_some() {
                table.declare(form);
            }
        }
        table
    }

    fn declare(&mut self, attr: &Value) {
        let name = |key: &str| {
            let value = attr.get_keyword(key)?;
            let name = value.as_keyword().or_else(|| value.as_text())?;
            Some(name.strip_prefix(':').unwrap_or(name))
        };
        let ident = name("db/ident");
        let value_type = name("db/valueType").and_then(ValueType::from_ident);
        if let (Some(ident), Some(value_type)) = (ident, value_type) {
            self.types.insert(ident.to_string(), value_type);
        }
    }

    fn get(&self, attr: &str) -> Option<ValueType> {
        let attr = attr.strip_prefix(':').unwrap_or(attr);
        if is_reverse_ref(attr) {
            return Some(ValueType::Ref);
        }
        self.types.get(attr).copied()
    }
}

fn is_reverse_ref(attr: &str) -> bool {
    let name = attr.rsplit_once('/').map_or(attr, |(_, name)| name);
    name.starts_with('_')
}

/// Coerces every form of a transaction.
pub fn coerce_tx_data(table: &TypeTable, tx_data: Value) -> Value {
    match tx_data {
        Value::Array(forms) => Value::Array(forms.into_iter().map(|f| coerce_form(table, f)).collect()),
        other => other,
    }
}

fn coerce_form(table: &TypeTable, form: Value) -> Value {
    match form {
        Value::Map(pairs) => coerce_entity(table, pairs),
        Value::Array(items) => coerce_list_form(table, items),
        other => other,
    }
}

fn coerce_entity(table: &TypeTable, pairs: Vec<(Value, Value)>) -> Value {
    let pairs = pairs
        .into_iter()
        .map(|(key, value)| {
            let key = match key {
                Value::Text(s) => Value::keyword(s.strip_prefix(':').unwrap_or(&s)),
                other => other,
            };
            let value = match key.as_keyword().and_then(|a| table.get(a)) {
                Some(value_type) => coerce_attr_value(table, value_type, value),
                None => value,
            };
            (key, value)
        })
        .collect();
    Value::map(pairs)
}

fn coerce_list_form(table: &TypeTable, mut items: Vec<Value>) -> Value {
    let op = items.first().and_then(op_name).map(str::to_string);
    if let Some(op) = op {
        if let Some(first) = items.first_mut() {
            *first = Value::keyword(&op);
        }
        if matches!(op.as_str(), "db/add" | "db/retract") && items.len() >= 4 {
            let attr = items[2].as_keyword().or_else(|| items[2].as_text()).map(str::to_string);
            if let Some(attr) = attr {
                items[2] = Value::keyword(attr.strip_prefix(':').unwrap_or(&attr));
                if let Some(value_type) = table.get(&attr) {
                    let v = std::mem::replace(&mut items[3], Value::Null);
                    items[3] = coerce_scalar(value_type, v);
                }
            }
        }
    }
    Value::Array(items)
}

fn op_name(head: &Value) -> Option<&str> {
    let name = head.as_keyword().or_else(|| head.as_text())?;
    let name = name.strip_prefix(':').unwrap_or(name);
    name.starts_with("db").then_some(name)
}

fn coerce_attr_value(table: &TypeTable, value_type: ValueType, value: Value) -> Value {
    match value {
        Value::Array(items) => {
            Value::Array(items.into_iter().map(|v| coerce_attr_value(table, value_type, v)).collect())
        }
        Value::Set(items) => {
            Value::set(items.into_iter().map(|v| coerce_attr_value(table, value_type, v)).collect())
        }
        Value::Map(pairs) if value_type == ValueType::Ref => coerce_entity(table, pairs),
        scalar => coerce_scalar(value_type, scalar),
    }
}

/// Converts one JSON-decoded scalar to `value_type` when a lossless
/// conversion exists; anything else is passed through for the engine to
/// judge.
pub fn coerce_scalar(value_type: ValueType, value: Value) -> Value {
    match (value_type, value) {
        (ValueType::Double | ValueType::Float, Value::Integer(n)) => Value::Float(n as f64),
        (ValueType::Long, Value::Float(f)) if f.fract() == 0.0 && f.abs() < 9.0e15 => {
            Value::Integer(f as i64)
        }
        (ValueType::Keyword, Value::Text(s)) => Value::keyword(s.strip_prefix(':').unwrap_or(&s)),
        (ValueType::Symbol, Value::Text(s)) => Value::symbol(s),
        (ValueType::Uuid, Value::Text(s)) => match s.parse() {
            Ok(u) => Value::Uuid(u),
            Err(_) => Value::Text(s),
        },
        (ValueType::Instant, Value::Integer(ms)) => Value::Instant(ms),
        (ValueType::Instant, Value::Text(s)) => match chronik_codec::parse_instant(&s) {
            Some(ms) => Value::Instant(ms),
            None => Value::Text(s),
        },
        (_, value) => value,
    }
}
