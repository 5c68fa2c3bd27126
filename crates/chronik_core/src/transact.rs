//! Transaction processing: tx data → datoms.
//!
//! Processing runs in three passes over the parsed operations:
//!
//! 1. upsert: tempids asserting a `:db.unique/identity` value that already
//!    exists take over the existing entity id;
//! 2. allocation: every remaining tempid gets a fresh entity id;
//! 3. application: operations are applied in order to a working copy of
//!    the state, producing the datoms of the transaction.

use std::collections::{BTreeMap, HashMap, HashSet};

use chronik_codec::Value;
use tracing::debug;

use crate::config::SchemaFlexibility;
use crate::db::DbState;
use crate::error::{CoreError, CoreResult};
use crate::log::TxRecord;
use crate::schema::{Attribute, Schema, Unique, DB_ID, DB_IDENT, DB_TX_INSTANT, DB_VALUE_TYPE};
use crate::types::{Datom, EntityId, TxId};

/// Tempid used for the transaction entity itself.
pub const CURRENT_TX_TEMPID: &str = "datomic.tx";

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum TempKey {
    User(Value),
    Auto(usize),
}

#[derive(Debug, Clone)]
enum EntityRef {
    Id(EntityId),
    Temp(TempKey),
    Lookup(String, Value),
    Ident(String),
    CurrentTx,
}

#[derive(Debug, Clone)]
enum ValueRef {
    Plain(Value),
    Entity(EntityRef),
}

#[derive(Debug, Clone)]
enum Op {
    Add {
        e: EntityRef,
        a: String,
        v: ValueRef,
    },
    Retract {
        e: EntityRef,
        a: String,
        v: ValueRef,
    },
    RetractAttr {
        e: EntityRef,
        a: String,
    },
    RetractEntity {
        e: EntityRef,
    },
    Cas {
        e: EntityRef,
        a: String,
        old: Option<ValueRef>,
        new: ValueRef,
    },
}

/// Result of processing tx data against a state.
pub(crate) struct Prepared {
    pub(crate) record: TxRecord,
    pub(crate) state: DbState,
    pub(crate) tempids: Value,
}

/// Processes `tx_data` as transaction `tx` at `instant`.
pub(crate) fn prepare(base: &DbState, tx_data: &Value, tx: TxId, instant: i64) -> CoreResult<Prepared> {
    let items = tx_data.as_seq().ok_or_else(|| {
        CoreError::transaction(format!(
            "tx data must be a sequence, got {}",
            tx_data.type_name()
        ))
    })?;

    let mut parser = Parser {
        schema: effective_schema(&base.schema, items)?,
        flexibility: base.flexibility,
        ops: Vec::new(),
        next_auto: 0,
    };
    for item in items {
        parser.parse_item(item)?;
    }
    let Parser { schema, ops, .. } = parser;

    let temps = Tempids::resolve(base, &schema, &ops)?;

    let mut builder = Builder {
        schema: &schema,
        flexibility: base.flexibility,
        state: base.clone(),
        tx,
        temps: &temps,
        datoms: Vec::new(),
    };
    let tx_instant = Datom::new(tx, DB_TX_INSTANT, Value::Instant(instant), tx);
    builder.state.facts.insert(tx_instant.clone());
    builder.datoms.push(tx_instant);
    for op in &ops {
        builder.apply(op)?;
    }

    let Builder {
        mut state, datoms, ..
    } = builder;
    let record = TxRecord {
        tx,
        instant,
        datoms,
    };
    state.commit(&record)?;
    debug!(tx, datoms = record.datoms.len(), "prepared transaction");

    let mut tempids: Vec<(Value, Value)> = temps
        .user_bindings()
        .map(|(key, e)| (key, Value::Integer(e)))
        .collect();
    tempids.push((Value::keyword("db/current-tx"), Value::Integer(tx)));

    Ok(Prepared {
        record,
        state,
        tempids: Value::map(tempids),
    })
}

/// The base schema plus attributes declared by maps in this transaction.
fn effective_schema(base: &Schema, items: &[Value]) -> CoreResult<Schema> {
    let mut schema = base.clone();
    for item in items {
        let Some(pairs) = item.as_map() else { continue };
        if item.get_keyword(DB_IDENT).is_none() || item.get_keyword(DB_VALUE_TYPE).is_none() {
            continue;
        }
        let props: BTreeMap<String, Value> = pairs
            .iter()
            .filter_map(|(k, v)| {
                k.as_keyword()
                    .filter(|name| Schema::is_system(name))
                    .map(|name| (name.to_string(), v.clone()))
            })
            .collect();
        if let Some(attr) = Attribute::from_entity(-1, &props)? {
            schema.insert(attr);
        }
    }
    Ok(schema)
}

/// `ns/_attr` → `ns/attr`.
fn reverse_attr(name: &str) -> Option<String> {
    match name.rsplit_once('/') {
        Some((ns, local)) => local.strip_prefix('_').map(|l| format!("{ns}/{l}")),
        None => name.strip_prefix('_').map(str::to_string),
    }
}

fn is_lookup_ref(value: &Value) -> bool {
    matches!(value, Value::Array(xs) if xs.len() == 2 && matches!(xs[0], Value::Keyword(_)))
}

fn parse_entity(value: &Value) -> CoreResult<EntityRef> {
    match value {
        Value::Integer(n) if *n > 0 => Ok(EntityRef::Id(*n)),
        Value::Integer(n) if *n < 0 => Ok(EntityRef::Temp(TempKey::User(value.clone()))),
        Value::Text(s) if s == CURRENT_TX_TEMPID => Ok(EntityRef::CurrentTx),
        Value::Text(_) => Ok(EntityRef::Temp(TempKey::User(value.clone()))),
        Value::Keyword(k) if k == "db/current-tx" => Ok(EntityRef::CurrentTx),
        Value::Keyword(k) => Ok(EntityRef::Ident(k.clone())),
        Value::Array(xs) => match xs.as_slice() {
            [Value::Keyword(a), v] => Ok(EntityRef::Lookup(a.clone(), v.clone())),
            _ => Err(CoreError::transaction(format!("invalid lookup ref {value}"))),
        },
        other => Err(CoreError::transaction(format!(
            "invalid entity identifier {other}"
        ))),
    }
}

fn attr_name(value: &Value) -> CoreResult<String> {
    value
        .as_keyword()
        .map(str::to_string)
        .ok_or_else(|| CoreError::transaction(format!("attribute must be a keyword, got {value}")))
}

struct Parser {
    schema: Schema,
    flexibility: SchemaFlexibility,
    ops: Vec<Op>,
    next_auto: usize,
}

impl Parser {
    fn auto(&mut self) -> EntityRef {
        self.next_auto += 1;
        EntityRef::Temp(TempKey::Auto(self.next_auto))
    }

    fn check_attr(&self, a: &str) -> CoreResult<()> {
        if self.flexibility == SchemaFlexibility::Write && self.schema.get(a).is_none() {
            return Err(CoreError::schema(format!(
                "attribute :{a} is not defined in the schema"
            )));
        }
        Ok(())
    }

    fn parse_item(&mut self, item: &Value) -> CoreResult<()> {
        let op = match item {
            Value::Map(_) => return self.parse_map(item).map(|_| ()),
            Value::Array(xs) => xs.as_slice(),
            other => {
                return Err(CoreError::transaction(format!(
                    "tx item must be a map or a vector, got {other}"
                )))
            }
        };
        let name = op.first().and_then(Value::as_keyword).unwrap_or_default();
        let arity = |n: usize| -> CoreResult<()> {
            if op.len() == n {
                Ok(())
            } else {
                Err(CoreError::transaction(format!(
                    "bad arity for :{name}, expected {} arguments in {item}",
                    n - 1
                )))
            }
        };
        match name {
            "db/add" => {
                arity(4)?;
                let a = attr_name(&op[2])?;
                self.check_attr(&a)?;
                let e = parse_entity(&op[1])?;
                let v = self.parse_value(&a, &op[3])?;
                self.ops.push(Op::Add { e, a, v });
            }
            "db/retract" if op.len() == 3 => {
                let a = attr_name(&op[2])?;
                let e = parse_entity(&op[1])?;
                self.ops.push(Op::RetractAttr { e, a });
            }
            "db/retract" => {
                arity(4)?;
                let a = attr_name(&op[2])?;
                let e = parse_entity(&op[1])?;
                let v = self.parse_value(&a, &op[3])?;
                self.ops.push(Op::Retract { e, a, v });
            }
            "db/retractEntity" | "db.fn/retractEntity" => {
                arity(2)?;
                let e = parse_entity(&op[1])?;
                self.ops.push(Op::RetractEntity { e });
            }
            "db/cas" | "db.fn/cas" => {
                arity(5)?;
                let a = attr_name(&op[2])?;
                self.check_attr(&a)?;
                let e = parse_entity(&op[1])?;
                let old = if op[3].is_null() {
                    None
                } else {
                    Some(self.parse_value(&a, &op[3])?)
                };
                let new = self.parse_value(&a, &op[4])?;
                self.ops.push(Op::Cas { e, a, old, new });
            }
            _ => {
                return Err(CoreError::transaction(format!(
                    "unknown operation in {item}, expected :db/add, :db/retract, :db/retractEntity or :db/cas"
                )))
            }
        }
        Ok(())
    }

    fn parse_value(&mut self, a: &str, value: &Value) -> CoreResult<ValueRef> {
        if !self.schema.is_ref(a) {
            return Ok(ValueRef::Plain(value.clone()));
        }
        match value {
            Value::Map(_) => Ok(ValueRef::Entity(self.parse_map(value)?)),
            other => Ok(ValueRef::Entity(parse_entity(other)?)),
        }
    }

    /// Expands an entity map into add operations and returns its entity.
    fn parse_map(&mut self, map: &Value) -> CoreResult<EntityRef> {
        let e = match map.get_keyword(DB_ID) {
            Some(id) => parse_entity(id)?,
            None => self.auto(),
        };
        let Some(pairs) = map.as_map() else {
            return Ok(e);
        };
        for (key, value) in pairs {
            let name = attr_name(key)?;
            if name == DB_ID {
                continue;
            }

            if let Some(forward) = reverse_attr(&name) {
                self.check_attr(&forward)?;
                let sources: Vec<&Value> = match value {
                    Value::Array(xs) if !is_lookup_ref(value) => xs.iter().collect(),
                    Value::Set(xs) => xs.iter().collect(),
                    _ => vec![value],
                };
                for source in sources {
                    let source = match source {
                        Value::Map(_) => self.parse_map(source)?,
                        other => parse_entity(other)?,
                    };
                    self.ops.push(Op::Add {
                        e: source,
                        a: forward.clone(),
                        v: ValueRef::Entity(e.clone()),
                    });
                }
                continue;
            }

            self.check_attr(&name)?;
            let is_ref = self.schema.is_ref(&name);
            let values: Vec<&Value> = if self.schema.is_many(&name) {
                match value {
                    Value::Set(xs) => xs.iter().collect(),
                    Value::Array(xs) if !(is_ref && is_lookup_ref(value)) => xs.iter().collect(),
                    _ => vec![value],
                }
            } else {
                vec![value]
            };
            for value in values {
                let v = self.parse_value(&name, value)?;
                self.ops.push(Op::Add {
                    e: e.clone(),
                    a: name.clone(),
                    v,
                });
            }
        }
        Ok(e)
    }
}

/// Tempid bindings after upsert and allocation.
struct Tempids {
    bindings: HashMap<TempKey, EntityId>,
    order: Vec<TempKey>,
}

impl Tempids {
    fn resolve(base: &DbState, schema: &Schema, ops: &[Op]) -> CoreResult<Self> {
        let mut bindings: HashMap<TempKey, EntityId> = HashMap::new();
        let mut claimed: HashMap<(String, Value), TempKey> = HashMap::new();
        let mut aliases: HashMap<TempKey, TempKey> = HashMap::new();

        for op in ops {
            let Op::Add {
                e: EntityRef::Temp(key),
                a,
                v,
            } = op
            else {
                continue;
            };
            if schema.get(a).and_then(|attr| attr.unique) != Some(Unique::Identity) {
                continue;
            }
            let value = match v {
                ValueRef::Plain(value) => value.clone(),
                ValueRef::Entity(EntityRef::Id(id)) => Value::Integer(*id),
                ValueRef::Entity(_) => continue,
            };
            if let Some(existing) = base.facts.holders(a, &value).next() {
                match bindings.get(key) {
                    Some(&bound) if bound != existing => {
                        return Err(CoreError::transaction(format!(
                            "conflicting upserts for {}: resolves to both {bound} and {existing}",
                            temp_label(key)
                        )))
                    }
                    _ => {
                        bindings.insert(key.clone(), existing);
                    }
                }
            } else {
                match claimed.get(&(a.clone(), value.clone())) {
                    Some(first) if first != key => {
                        aliases.insert(key.clone(), first.clone());
                    }
                    Some(_) => {}
                    None => {
                        claimed.insert((a.clone(), value), key.clone());
                    }
                }
            }
        }

        let mut as_entity: Vec<TempKey> = Vec::new();
        let mut seen = HashSet::new();
        for op in ops {
            if let Some(EntityRef::Temp(key)) = op_entity(op) {
                if seen.insert(key.clone()) {
                    as_entity.push(key.clone());
                }
            }
        }
        for op in ops {
            for v in op_values(op) {
                if let ValueRef::Entity(EntityRef::Temp(key)) = v {
                    if !seen.contains(key) {
                        return Err(CoreError::transaction(format!(
                            "tempid {} used only as value in transaction",
                            temp_label(key)
                        )));
                    }
                }
            }
        }

        let mut next = base.max_eid;
        for key in &as_entity {
            if bindings.contains_key(key) {
                continue;
            }
            let mut root = key;
            while let Some(parent) = aliases.get(root) {
                root = parent;
            }
            let id = match bindings.get(root) {
                Some(&id) => id,
                None => {
                    next += 1;
                    bindings.insert(root.clone(), next);
                    next
                }
            };
            bindings.insert(key.clone(), id);
        }

        Ok(Self {
            bindings,
            order: as_entity,
        })
    }

    fn get(&self, key: &TempKey) -> CoreResult<EntityId> {
        self.bindings
            .get(key)
            .copied()
            .ok_or_else(|| CoreError::transaction(format!("unresolved tempid {}", temp_label(key))))
    }

    fn user_bindings(&self) -> impl Iterator<Item = (Value, EntityId)> + '_ {
        self.order.iter().filter_map(|key| match key {
            TempKey::User(value) => self.bindings.get(key).map(|e| (value.clone(), *e)),
            TempKey::Auto(_) => None,
        })
    }
}

fn temp_label(key: &TempKey) -> String {
    match key {
        TempKey::User(value) => value.to_string(),
        TempKey::Auto(n) => format!("<map #{n}>"),
    }
}

fn op_entity(op: &Op) -> Option<&EntityRef> {
    match op {
        Op::Add { e, .. } | Op::Cas { e, .. } => Some(e),
        Op::Retract { .. } | Op::RetractAttr { .. } | Op::RetractEntity { .. } => None,
    }
}

fn op_values(op: &Op) -> Vec<&ValueRef> {
    match op {
        Op::Add { v, .. } | Op::Retract { v, .. } => vec![v],
        Op::Cas { old, new, .. } => old.iter().chain(std::iter::once(new)).collect(),
        Op::RetractAttr { .. } | Op::RetractEntity { .. } => Vec::new(),
    }
}

struct Builder<'t> {
    schema: &'t Schema,
    flexibility: SchemaFlexibility,
    state: DbState,
    tx: TxId,
    temps: &'t Tempids,
    datoms: Vec<Datom>,
}

impl Builder<'_> {
    fn entity(&self, e: &EntityRef) -> CoreResult<EntityId> {
        match e {
            EntityRef::Id(id) => Ok(*id),
            EntityRef::Temp(key) => self.temps.get(key),
            EntityRef::CurrentTx => Ok(self.tx),
            EntityRef::Lookup(a, v) => {
                if self.schema.get(a).and_then(|attr| attr.unique).is_none()
                    && self.flexibility == SchemaFlexibility::Write
                {
                    return Err(CoreError::transaction(format!(
                        "lookup ref attribute :{a} is not unique"
                    )));
                }
                self.state.facts.holders(a, v).next().ok_or_else(|| {
                    CoreError::transaction(format!("nothing found for lookup ref [:{a} {v}]"))
                })
            }
            EntityRef::Ident(ident) => self
                .state
                .facts
                .holders(DB_IDENT, &Value::keyword(ident.as_str()))
                .next()
                .ok_or_else(|| CoreError::transaction(format!("nothing found for ident :{ident}"))),
        }
    }

    fn value(&self, v: &ValueRef) -> CoreResult<Value> {
        match v {
            ValueRef::Plain(value) => Ok(value.clone()),
            ValueRef::Entity(e) => self.entity(e).map(Value::Integer),
        }
    }

    fn apply(&mut self, op: &Op) -> CoreResult<()> {
        match op {
            Op::Add { e, a, v } => {
                let e = self.entity(e)?;
                let v = self.value(v)?;
                self.assert(e, a, v)
            }
            Op::Retract { e, a, v } => {
                let e = self.entity(e)?;
                let v = self.value(v)?;
                self.retract(e, a, &v);
                Ok(())
            }
            Op::RetractAttr { e, a } => {
                let e = self.entity(e)?;
                let current: Vec<Value> = self.state.facts.values(e, a).map(|d| d.v.clone()).collect();
                for v in current {
                    self.retract(e, a, &v);
                }
                Ok(())
            }
            Op::RetractEntity { e } => {
                let e = self.entity(e)?;
                let mut seen = HashSet::new();
                self.retract_entity(e, &mut seen);
                Ok(())
            }
            Op::Cas { e, a, old, new } => {
                let e = self.entity(e)?;
                let old = old.as_ref().map(|v| self.value(v)).transpose()?;
                let new = self.value(new)?;
                let current: Vec<&Value> = self.state.facts.values(e, a).map(|d| &d.v).collect();
                let matches = match &old {
                    None => current.is_empty(),
                    Some(old) => current.contains(&old),
                };
                if !matches {
                    let found = current
                        .first()
                        .map_or_else(|| "nil".to_string(), |v| v.to_string());
                    let expected = old.map_or_else(|| "nil".to_string(), |v| v.to_string());
                    return Err(CoreError::transaction(format!(
                        ":db/cas failed on entity {e} :{a}: expected {expected}, found {found}"
                    )));
                }
                self.assert(e, a, new)
            }
        }
    }

    fn validate(&self, a: &str, v: &Value) -> CoreResult<()> {
        if v.is_null() {
            return Err(CoreError::transaction(format!("cannot assert nil for :{a}")));
        }
        if a == DB_TX_INSTANT {
            return Err(CoreError::transaction(":db/txInstant is set by the transactor"));
        }
        match self.schema.get(a) {
            Some(attr) if self.flexibility == SchemaFlexibility::Write => {
                if attr.value_type.accepts(v) {
                    Ok(())
                } else {
                    Err(CoreError::schema(format!(
                        "value {v} does not match type :{} of :{a}",
                        attr.value_type.ident()
                    )))
                }
            }
            None if self.flexibility == SchemaFlexibility::Write => Err(CoreError::schema(format!(
                "attribute :{a} is not defined in the schema"
            ))),
            _ => Ok(()),
        }
    }

    fn assert(&mut self, e: EntityId, a: &str, v: Value) -> CoreResult<()> {
        self.validate(a, &v)?;
        if self.state.facts.find(e, a, &v).is_some() {
            return Ok(());
        }
        if !self.schema.is_many(a) {
            let previous: Vec<Value> = self.state.facts.values(e, a).map(|d| d.v.clone()).collect();
            for old in previous {
                self.retract(e, a, &old);
            }
        }
        if self.schema.get(a).and_then(|attr| attr.unique).is_some() {
            if let Some(other) = self.state.facts.holders(a, &v).find(|holder| *holder != e) {
                return Err(CoreError::UniqueConflict {
                    attribute: a.to_string(),
                    value: v.to_string(),
                    entity: other,
                });
            }
        }
        let datom = Datom::new(e, a, v, self.tx);
        self.state.facts.insert(datom.clone());
        self.datoms.push(datom);
        Ok(())
    }

    fn retract(&mut self, e: EntityId, a: &str, v: &Value) {
        if let Some(found) = self.state.facts.remove(e, a, v) {
            self.datoms.push(found.retraction(self.tx));
        }
    }

    fn retract_entity(&mut self, e: EntityId, seen: &mut HashSet<EntityId>) {
        if !seen.insert(e) {
            return;
        }
        let target = Value::Integer(e);
        let own: Vec<Datom> = self.state.facts.entity(e).cloned().collect();
        let incoming: Vec<Datom> = self
            .state
            .facts
            .iter()
            .filter(|d| d.v == target && self.schema.is_ref(&d.a))
            .cloned()
            .collect();
        let components: Vec<EntityId> = own
            .iter()
            .filter(|d| self.schema.get(&d.a).is_some_and(|attr| attr.is_component))
            .filter_map(|d| d.v.as_integer())
            .collect();

        for datom in own.iter().chain(&incoming) {
            self.retract(datom.e, &datom.a, &datom.v);
        }
        for component in components {
            self.retract_entity(component, seen);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TX0;

    fn kw(name: &str) -> Value {
        Value::keyword(name)
    }

    fn attr(ident: &str, ty: &str, extra: Vec<(Value, Value)>) -> Value {
        let mut pairs = vec![
            (kw("db/ident"), kw(ident)),
            (kw("db/valueType"), kw(ty)),
            (kw("db/cardinality"), kw("db.cardinality/one")),
        ];
        pairs.extend(extra);
        Value::map(pairs)
    }

    fn schema_tx() -> Value {
        Value::Array(vec![
            attr("name", "db.type/string", vec![(kw("db/unique"), kw("db.unique/identity"))]),
            attr("age", "db.type/long", vec![]),
            attr(
                "friend",
                "db.type/ref",
                vec![(kw("db/cardinality"), kw("db.cardinality/many"))],
            ),
            attr("email", "db.type/string", vec![(kw("db/unique"), kw("db.unique/value"))]),
            attr(
                "address",
                "db.type/ref",
                vec![(kw("db/isComponent"), Value::Bool(true))],
            ),
            attr("street", "db.type/string", vec![]),
        ])
    }

    fn commit(state: &DbState, tx_data: Value) -> CoreResult<Prepared> {
        let tx = state.max_tx + 1;
        prepare(state, &tx_data, tx, 1000 * (tx - TX0))
    }

    fn base() -> DbState {
        let state = DbState::new(SchemaFlexibility::Write, true);
        commit(&state, schema_tx()).unwrap().state
    }

    fn person(name: &str, age: i64) -> Value {
        Value::map(vec![(kw("name"), Value::text(name)), (kw("age"), Value::Integer(age))])
    }

    fn eid_of(state: &DbState, name: &str) -> EntityId {
        state.facts.holders("name", &Value::text(name)).next().unwrap()
    }

    #[test]
    fn schema_transaction_declares_attributes() {
        let state = base();
        assert!(state.schema.get("name").is_some());
        assert!(state.schema.is_many("friend"));
        assert_eq!(state.max_eid, 6);
        assert_eq!(state.max_tx, TX0 + 1);
    }

    #[test]
    fn maps_allocate_fresh_ids() {
        let state = base();
        let prepared = commit(&state, Value::Array(vec![person("Alice", 30)])).unwrap();
        let alice = eid_of(&prepared.state, "Alice");
        assert_eq!(alice, 7);
        assert_eq!(prepared.record.datoms[0].a, DB_TX_INSTANT);
        assert_eq!(prepared.record.datoms.len(), 3);
    }

    #[test]
    fn cardinality_one_replaces_value() {
        let state = commit(&base(), Value::Array(vec![person("Alice", 30)])).unwrap().state;
        let alice = eid_of(&state, "Alice");
        let prepared = commit(
            &state,
            Value::Array(vec![Value::Array(vec![
                kw("db/add"),
                Value::Integer(alice),
                kw("age"),
                Value::Integer(31),
            ])]),
        )
        .unwrap();
        let ages: Vec<&Datom> = prepared.record.datoms.iter().filter(|d| d.a == "age").collect();
        assert_eq!(ages.len(), 2);
        assert!(!ages[0].added);
        assert_eq!(ages[1].v, Value::Integer(31));
        assert_eq!(prepared.state.facts.values(alice, "age").count(), 1);
    }

    #[test]
    fn identity_upserts() {
        let state = commit(&base(), Value::Array(vec![person("Alice", 30)])).unwrap().state;
        let alice = eid_of(&state, "Alice");
        let prepared = commit(&state, Value::Array(vec![person("Alice", 32)])).unwrap();
        assert_eq!(eid_of(&prepared.state, "Alice"), alice);
        assert_eq!(prepared.state.max_eid, state.max_eid);
    }

    #[test]
    fn unique_value_conflicts() {
        let state = base();
        let email = |name: &str| {
            Value::map(vec![
                (kw("name"), Value::text(name)),
                (kw("email"), Value::text("same@example.com")),
            ])
        };
        let state = commit(&state, Value::Array(vec![email("Alice")])).unwrap().state;
        let err = commit(&state, Value::Array(vec![email("Bob")])).err().unwrap();
        assert!(matches!(err, CoreError::UniqueConflict { .. }));
    }

    #[test]
    fn write_schema_rejects_unknown_and_mistyped() {
        let state = base();
        let unknown = Value::Array(vec![Value::map(vec![(kw("shoe"), Value::Integer(42))])]);
        assert!(matches!(commit(&state, unknown), Err(CoreError::Schema { .. })));
        let mistyped = Value::Array(vec![Value::map(vec![(kw("age"), Value::text("old"))])]);
        assert!(matches!(commit(&state, mistyped), Err(CoreError::Schema { .. })));
    }

    #[test]
    fn read_schema_accepts_anything() {
        let state = DbState::new(SchemaFlexibility::Read, true);
        let prepared = commit(
            &state,
            Value::Array(vec![Value::map(vec![(kw("shoe"), Value::Integer(42))])]),
        )
        .unwrap();
        assert_eq!(prepared.state.facts.len(), 2);
    }

    #[test]
    fn tempids_link_entities() {
        let state = base();
        let tx_data = Value::Array(vec![
            Value::map(vec![(kw("db/id"), Value::text("a")), (kw("name"), Value::text("Alice"))]),
            Value::map(vec![
                (kw("db/id"), Value::text("b")),
                (kw("name"), Value::text("Bob")),
                (kw("friend"), Value::text("a")),
            ]),
        ]);
        let prepared = commit(&state, tx_data).unwrap();
        let alice = eid_of(&prepared.state, "Alice");
        let bob = eid_of(&prepared.state, "Bob");
        assert!(prepared.state.facts.find(bob, "friend", &Value::Integer(alice)).is_some());
        assert_eq!(prepared.tempids.get(&Value::text("a")), Some(&Value::Integer(alice)));
        assert_eq!(
            prepared.tempids.get_keyword("db/current-tx"),
            Some(&Value::Integer(TX0 + 2))
        );
    }

    #[test]
    fn tempid_only_as_value_is_rejected() {
        let state = commit(&base(), Value::Array(vec![person("Alice", 30)])).unwrap().state;
        let alice = eid_of(&state, "Alice");
        let tx_data = Value::Array(vec![Value::Array(vec![
            kw("db/add"),
            Value::Integer(alice),
            kw("friend"),
            Value::text("ghost"),
        ])]);
        assert!(matches!(commit(&state, tx_data), Err(CoreError::Transaction { .. })));
    }

    #[test]
    fn reverse_and_nested_maps() {
        let state = commit(&base(), Value::Array(vec![person("Alice", 30)])).unwrap().state;
        let alice = eid_of(&state, "Alice");
        let tx_data = Value::Array(vec![Value::map(vec![
            (kw("name"), Value::text("Bob")),
            (kw("_friend"), Value::Array(vec![kw("name"), Value::text("Alice")])),
            (
                kw("address"),
                Value::map(vec![(kw("street"), Value::text("Main St"))]),
            ),
        ])]);
        let prepared = commit(&state, tx_data).unwrap();
        let bob = eid_of(&prepared.state, "Bob");
        assert!(prepared.state.facts.find(alice, "friend", &Value::Integer(bob)).is_some());
        let address = prepared.state.facts.values(bob, "address").next().unwrap().v.clone();
        assert_eq!(
            prepared
                .state
                .facts
                .values(address.as_integer().unwrap(), "street")
                .next()
                .map(|d| d.v.clone()),
            Some(Value::text("Main St"))
        );
    }

    #[test]
    fn retract_entity_cascades_components_and_refs() {
        let state = base();
        let tx_data = Value::Array(vec![
            Value::map(vec![
                (kw("db/id"), Value::text("bob")),
                (kw("name"), Value::text("Bob")),
                (kw("address"), Value::map(vec![(kw("street"), Value::text("Elm"))])),
            ]),
            Value::map(vec![
                (kw("name"), Value::text("Alice")),
                (kw("friend"), Value::text("bob")),
            ]),
        ]);
        let state = commit(&state, tx_data).unwrap().state;
        let before = state.facts.len();
        let prepared = commit(
            &state,
            Value::Array(vec![Value::Array(vec![
                kw("db/retractEntity"),
                Value::Array(vec![kw("name"), Value::text("Bob")]),
            ])]),
        )
        .unwrap();
        let retracted = prepared.record.datoms.iter().filter(|d| !d.added).count();
        assert_eq!(retracted, 4);
        assert_eq!(prepared.state.facts.len(), before - 4 + 1);
    }

    #[test]
    fn cas_checks_current_value() {
        let state = commit(&base(), Value::Array(vec![person("Alice", 30)])).unwrap().state;
        let alice = eid_of(&state, "Alice");
        let cas = |old: i64, new: i64| {
            Value::Array(vec![Value::Array(vec![
                kw("db/cas"),
                Value::Integer(alice),
                kw("age"),
                Value::Integer(old),
                Value::Integer(new),
            ])])
        };
        assert!(commit(&state, cas(29, 31)).is_err());
        let prepared = commit(&state, cas(30, 31)).unwrap();
        assert!(prepared.state.facts.find(alice, "age", &Value::Integer(31)).is_some());
    }

    #[test]
    fn tx_entity_attributes() {
        let state = DbState::new(SchemaFlexibility::Read, true);
        let tx_data = Value::Array(vec![Value::map(vec![
            (kw("db/id"), Value::text(CURRENT_TX_TEMPID)),
            (kw("source"), Value::text("import")),
        ])]);
        let prepared = commit(&state, tx_data).unwrap();
        let tx = prepared.record.tx;
        assert!(prepared.state.facts.find(tx, "source", &Value::text("import")).is_some());
        assert_eq!(prepared.state.max_eid, 0);
    }
}
