//! Attribute schema.
//!
//! Attributes are ordinary entities carrying `:db/ident` and
//! `:db/valueType`. The schema is derived from those entities after every
//! transaction; a handful of system attributes are built in.

use std::collections::{BTreeMap, BTreeSet};

use chronik_codec::Value;

use crate::config::SchemaFlexibility;
use crate::error::{CoreError, CoreResult};
use crate::types::EntityId;

/// `:db/ident`
pub const DB_IDENT: &str = "db/ident";
/// `:db/valueType`
pub const DB_VALUE_TYPE: &str = "db/valueType";
/// `:db/cardinality`
pub const DB_CARDINALITY: &str = "db/cardinality";
/// `:db/unique`
pub const DB_UNIQUE: &str = "db/unique";
/// `:db/index`
pub const DB_INDEX: &str = "db/index";
/// `:db/isComponent`
pub const DB_IS_COMPONENT: &str = "db/isComponent";
/// `:db/doc`
pub const DB_DOC: &str = "db/doc";
/// `:db/txInstant`
pub const DB_TX_INSTANT: &str = "db/txInstant";
/// `:db/id`, the pseudo-attribute naming an entity in maps and pull results.
pub const DB_ID: &str = "db/id";

/// Declared type of an attribute's values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueType {
    /// Text.
    String,
    /// 64-bit integer.
    Long,
    /// 64-bit float.
    Double,
    /// Float, stored as 64-bit.
    Float,
    /// Boolean.
    Boolean,
    /// Keyword.
    Keyword,
    /// Symbol.
    Symbol,
    /// Reference to another entity.
    Ref,
    /// Instant in epoch milliseconds.
    Instant,
    /// UUID.
    Uuid,
}

impl ValueType {
    const ALL: [ValueType; 10] = [
        ValueType::String,
        ValueType::Long,
        ValueType::Double,
        ValueType::Float,
        ValueType::Boolean,
        ValueType::Keyword,
        ValueType::Symbol,
        ValueType::Ref,
        ValueType::Instant,
        ValueType::Uuid,
    ];

    /// Ident such as `db.type/string`.
    pub const fn ident(self) -> &'static str {
        match self {
            ValueType::String => "db.type/string",
            ValueType::Long => "db.type/long",
            ValueType::Double => "db.type/double",
            ValueType::Float => "db.type/float",
            ValueType::Boolean => "db.type/boolean",
            ValueType::Keyword => "db.type/keyword",
            ValueType::Symbol => "db.type/symbol",
            ValueType::Ref => "db.type/ref",
            ValueType::Instant => "db.type/instant",
            ValueType::Uuid => "db.type/uuid",
        }
    }

    /// Looks a type up by ident.
    pub fn from_ident(ident: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.ident() == ident)
    }

    /// Whether a (resolved) value has this type.
    pub fn accepts(self, value: &Value) -> bool {
        matches!(
            (self, value),
            (ValueType::String, Value::Text(_))
                | (ValueType::Long | ValueType::Ref, Value::Integer(_))
                | (ValueType::Double | ValueType::Float, Value::Float(_))
                | (ValueType::Boolean, Value::Bool(_))
                | (ValueType::Keyword, Value::Keyword(_))
                | (ValueType::Symbol, Value::Symbol(_))
                | (ValueType::Instant, Value::Instant(_))
                | (ValueType::Uuid, Value::Uuid(_))
        )
    }
}

/// How many values an entity may hold for an attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Cardinality {
    /// A single value; asserting a new one replaces the old.
    #[default]
    One,
    /// A set of values.
    Many,
}

/// Uniqueness constraint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unique {
    /// Unique, and transacting an existing value upserts into its entity.
    Identity,
    /// Unique; a second entity claiming the value is an error.
    Value,
}

/// A declared attribute.
#[derive(Debug, Clone, PartialEq)]
pub struct Attribute {
    /// Ident without colon.
    pub ident: String,
    /// Entity that declared the attribute (0 for system attributes).
    pub id: EntityId,
    /// Value type.
    pub value_type: ValueType,
    /// Cardinality.
    pub cardinality: Cardinality,
    /// Uniqueness constraint.
    pub unique: Option<Unique>,
    /// Whether the attribute is in the AVET index.
    pub index: bool,
    /// Whether referenced entities are owned by the referrer.
    pub is_component: bool,
    /// Documentation string.
    pub doc: Option<String>,
}

impl Attribute {
    fn system(ident: &str, value_type: ValueType) -> Self {
        Self {
            ident: ident.to_string(),
            id: 0,
            value_type,
            cardinality: Cardinality::One,
            unique: None,
            index: false,
            is_component: false,
            doc: None,
        }
    }

    /// Whether values are entity references.
    pub fn is_ref(&self) -> bool {
        self.value_type == ValueType::Ref
    }

    /// Whether the attribute is cardinality many.
    pub fn is_many(&self) -> bool {
        self.cardinality == Cardinality::Many
    }

    /// Whether the attribute is covered by the AVET index.
    pub fn is_indexed(&self) -> bool {
        self.index || self.unique.is_some()
    }

    /// Builds an attribute from an entity's current attribute values.
    ///
    /// Returns `Ok(None)` when the entity has no `:db/valueType` (a plain
    /// ident, for example an enum value).
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Schema`] if a schema property has an invalid value.
    pub fn from_entity(id: EntityId, props: &BTreeMap<String, Value>) -> CoreResult<Option<Self>> {
        let Some(Value::Keyword(ident)) = props.get(DB_IDENT) else {
            return Ok(None);
        };
        let Some(value_type) = props.get(DB_VALUE_TYPE) else {
            return Ok(None);
        };
        let value_type = value_type
            .as_keyword()
            .and_then(ValueType::from_ident)
            .ok_or_else(|| {
                CoreError::schema(format!("unknown value type {value_type} for :{ident}"))
            })?;

        let cardinality = match props.get(DB_CARDINALITY).map(Value::as_keyword) {
            None | Some(Some("db.cardinality/one")) => Cardinality::One,
            Some(Some("db.cardinality/many")) => Cardinality::Many,
            Some(_) => {
                return Err(CoreError::schema(format!(
                    "invalid :db/cardinality for :{ident}, expected :db.cardinality/one or :db.cardinality/many"
                )))
            }
        };

        let unique = match props.get(DB_UNIQUE).map(Value::as_keyword) {
            None => None,
            Some(Some("db.unique/identity")) => Some(Unique::Identity),
            Some(Some("db.unique/value")) => Some(Unique::Value),
            Some(_) => {
                return Err(CoreError::schema(format!(
                    "invalid :db/unique for :{ident}, expected :db.unique/identity or :db.unique/value"
                )))
            }
        };

        let flag = |name: &str| -> CoreResult<bool> {
            match props.get(name) {
                None => Ok(false),
                Some(Value::Bool(b)) => Ok(*b),
                Some(other) => Err(CoreError::schema(format!(
                    "invalid :{name} {other} for :{ident}, expected a boolean"
                ))),
            }
        };
        let index = flag(DB_INDEX)?;
        let is_component = flag(DB_IS_COMPONENT)?;
        if is_component && value_type != ValueType::Ref {
            return Err(CoreError::schema(format!(
                ":db/isComponent requires :db.type/ref on :{ident}"
            )));
        }

        let doc = props.get(DB_DOC).and_then(Value::as_text).map(str::to_string);

        Ok(Some(Self {
            ident: ident.clone(),
            id,
            value_type,
            cardinality,
            unique,
            index,
            is_component,
            doc,
        }))
    }

    /// Map form as returned by `schema`.
    pub fn to_value(&self) -> Value {
        let mut pairs = vec![
            (Value::keyword(DB_IDENT), Value::keyword(&self.ident)),
            (Value::keyword(DB_VALUE_TYPE), Value::keyword(self.value_type.ident())),
            (
                Value::keyword(DB_CARDINALITY),
                Value::keyword(match self.cardinality {
                    Cardinality::One => "db.cardinality/one",
                    Cardinality::Many => "db.cardinality/many",
                }),
            ),
            (Value::keyword(DB_ID), Value::Integer(self.id)),
        ];
        if let Some(unique) = self.unique {
            pairs.push((
                Value::keyword(DB_UNIQUE),
                Value::keyword(match unique {
                    Unique::Identity => "db.unique/identity",
                    Unique::Value => "db.unique/value",
                }),
            ));
        }
        if self.index {
            pairs.push((Value::keyword(DB_INDEX), Value::Bool(true)));
        }
        if self.is_component {
            pairs.push((Value::keyword(DB_IS_COMPONENT), Value::Bool(true)));
        }
        if let Some(doc) = &self.doc {
            pairs.push((Value::keyword(DB_DOC), Value::text(doc.clone())));
        }
        Value::map(pairs)
    }
}

/// The set of known attributes.
#[derive(Debug, Clone, PartialEq)]
pub struct Schema {
    attrs: BTreeMap<String, Attribute>,
}

impl Default for Schema {
    fn default() -> Self {
        Self::new()
    }
}

impl Schema {
    /// Schema holding only the system attributes.
    pub fn new() -> Self {
        let mut ident = Attribute::system(DB_IDENT, ValueType::Keyword);
        ident.unique = Some(Unique::Identity);
        let mut tx_instant = Attribute::system(DB_TX_INSTANT, ValueType::Instant);
        tx_instant.index = true;

        let attrs = [
            ident,
            Attribute::system(DB_VALUE_TYPE, ValueType::Keyword),
            Attribute::system(DB_CARDINALITY, ValueType::Keyword),
            Attribute::system(DB_UNIQUE, ValueType::Keyword),
            Attribute::system(DB_INDEX, ValueType::Boolean),
            Attribute::system(DB_IS_COMPONENT, ValueType::Boolean),
            Attribute::system(DB_DOC, ValueType::String),
            tx_instant,
        ]
        .into_iter()
        .map(|a| (a.ident.clone(), a))
        .collect();

        Self { attrs }
    }

    /// Whether `ident` names a built-in attribute.
    pub fn is_system(ident: &str) -> bool {
        ident.starts_with("db/")
    }

    /// Looks an attribute up.
    pub fn get(&self, ident: &str) -> Option<&Attribute> {
        self.attrs.get(ident)
    }

    /// Adds or replaces an attribute.
    pub fn insert(&mut self, attr: Attribute) {
        self.attrs.insert(attr.ident.clone(), attr);
    }

    /// Removes a user attribute whose declaring entity was retracted.
    pub fn remove_declared_by(&mut self, id: EntityId) {
        self.attrs.retain(|_, a| a.id == 0 || a.id != id);
    }

    /// Every attribute, built-in ones included.
    pub fn attributes(&self) -> impl Iterator<Item = &Attribute> {
        self.attrs.values()
    }

    /// User-declared attributes.
    pub fn user_attributes(&self) -> impl Iterator<Item = &Attribute> {
        self.attrs.values().filter(|a| a.id != 0)
    }

    /// Whether `ident` is a reference attribute.
    pub fn is_ref(&self, ident: &str) -> bool {
        self.get(ident).is_some_and(Attribute::is_ref)
    }

    /// Whether `ident` is cardinality many.
    pub fn is_many(&self, ident: &str) -> bool {
        self.get(ident).is_some_and(Attribute::is_many)
    }

    /// Whether datoms of `ident` belong in the AVET index. Under `:read`
    /// flexibility every attribute is indexed.
    pub fn in_avet(&self, ident: &str, flexibility: SchemaFlexibility) -> bool {
        flexibility == SchemaFlexibility::Read || self.get(ident).is_some_and(Attribute::is_indexed)
    }

    /// `{ident {:db/ident .. :db/valueType .. ..}}` for user attributes.
    pub fn to_value(&self) -> Value {
        Value::map(
            self.user_attributes()
                .map(|a| (Value::keyword(&a.ident), a.to_value()))
                .collect(),
        )
    }

    /// Property keyword to the set of attributes having it, e.g.
    /// `{:db.type/ref #{:friend} :db.cardinality/many #{:friend}}`.
    pub fn reverse_value(&self) -> Value {
        let mut groups: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();
        for attr in self.user_attributes() {
            let name = attr.ident.as_str();
            groups.entry(DB_IDENT).or_default().insert(name);
            groups.entry(attr.value_type.ident()).or_default().insert(name);
            groups
                .entry(match attr.cardinality {
                    Cardinality::One => "db.cardinality/one",
                    Cardinality::Many => "db.cardinality/many",
                })
                .or_default()
                .insert(name);
            if let Some(unique) = attr.unique {
                groups.entry(DB_UNIQUE).or_default().insert(name);
                groups
                    .entry(match unique {
                        Unique::Identity => "db.unique/identity",
                        Unique::Value => "db.unique/value",
                    })
                    .or_default()
                    .insert(name);
            }
            if attr.is_indexed() {
                groups.entry(DB_INDEX).or_default().insert(name);
            }
            if attr.is_component {
                groups.entry(DB_IS_COMPONENT).or_default().insert(name);
            }
        }
        Value::map(
            groups
                .into_iter()
                .map(|(prop, attrs)| {
                    (
                        Value::keyword(prop),
                        Value::set(attrs.into_iter().map(Value::keyword).collect()),
                    )
                })
                .collect(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn props(pairs: &[(&str, Value)]) -> BTreeMap<String, Value> {
        pairs.iter().map(|(k, v)| ((*k).to_string(), v.clone())).collect()
    }

    #[test]
    fn builds_attribute_from_entity() {
        let attr = Attribute::from_entity(
            3,
            &props(&[
                (DB_IDENT, Value::keyword("email")),
                (DB_VALUE_TYPE, Value::keyword("db.type/string")),
                (DB_CARDINALITY, Value::keyword("db.cardinality/one")),
                (DB_UNIQUE, Value::keyword("db.unique/identity")),
            ]),
        )
        .unwrap()
        .unwrap();
        assert_eq!(attr.value_type, ValueType::String);
        assert_eq!(attr.unique, Some(Unique::Identity));
        assert!(attr.is_indexed());
    }

    #[test]
    fn plain_idents_are_not_attributes() {
        let attr = Attribute::from_entity(4, &props(&[(DB_IDENT, Value::keyword("color/red"))])).unwrap();
        assert!(attr.is_none());
    }

    #[test]
    fn rejects_bad_definitions() {
        let bad_type = props(&[
            (DB_IDENT, Value::keyword("x")),
            (DB_VALUE_TYPE, Value::keyword("db.type/blob")),
        ]);
        assert!(Attribute::from_entity(1, &bad_type).is_err());

        let bad_component = props(&[
            (DB_IDENT, Value::keyword("x")),
            (DB_VALUE_TYPE, Value::keyword("db.type/long")),
            (DB_IS_COMPONENT, Value::Bool(true)),
        ]);
        assert!(Attribute::from_entity(1, &bad_component).is_err());
    }

    #[test]
    fn value_type_acceptance() {
        assert!(ValueType::Long.accepts(&Value::Integer(30)));
        assert!(!ValueType::Double.accepts(&Value::Integer(30)));
        assert!(ValueType::Double.accepts(&Value::Float(30.0)));
        assert!(!ValueType::String.accepts(&Value::keyword("a")));
    }

    #[test]
    fn schema_maps_exclude_system_attributes() {
        let mut schema = Schema::new();
        assert_eq!(schema.to_value(), Value::map(vec![]));
        schema.insert(Attribute {
            ident: "friend".into(),
            id: 7,
            value_type: ValueType::Ref,
            cardinality: Cardinality::Many,
            unique: None,
            index: false,
            is_component: false,
            doc: None,
        });
        let reverse = schema.reverse_value();
        assert_eq!(
            reverse.get_keyword("db.type/ref"),
            Some(&Value::set(vec![Value::keyword("friend")]))
        );
        assert!(schema.in_avet("friend", SchemaFlexibility::Read));
        assert!(!schema.in_avet("friend", SchemaFlexibility::Write));
        schema.remove_declared_by(7);
        assert!(schema.get("friend").is_none());
        assert!(schema.get(DB_IDENT).is_some());
    }
}
