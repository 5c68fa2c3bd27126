//! Immutable database values and their temporal views.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use chronik_codec::Value;

use crate::config::SchemaFlexibility;
use crate::error::{CoreError, CoreResult};
use crate::facts::Facts;
use crate::log::TxRecord;
use crate::schema::{Attribute, Schema, DB_IDENT};
use crate::types::{Datom, EntityId, Index, TxId, TX0};

/// Which facts a [`Db`] exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum View {
    /// Facts true now.
    Current,
    /// Every assertion and retraction ever made.
    History,
    /// Facts true as of the given instant (epoch ms, inclusive).
    AsOf(i64),
    /// Current facts added strictly after the given instant (epoch ms).
    Since(i64),
}

impl fmt::Display for View {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            View::Current => f.write_str("current"),
            View::History => f.write_str("history"),
            View::AsOf(t) => write!(f, "as-of {t}"),
            View::Since(t) => write!(f, "since {t}"),
        }
    }
}

/// Replayed state of a store.
#[derive(Debug, Clone)]
pub(crate) struct DbState {
    pub(crate) flexibility: SchemaFlexibility,
    pub(crate) keep_history: bool,
    pub(crate) schema: Schema,
    pub(crate) facts: Facts,
    /// Every datom in commit order; empty unless history is kept.
    pub(crate) history: Vec<Datom>,
    pub(crate) tx_instants: BTreeMap<TxId, i64>,
    pub(crate) max_eid: EntityId,
    pub(crate) max_tx: TxId,
}

impl DbState {
    pub(crate) fn new(flexibility: SchemaFlexibility, keep_history: bool) -> Self {
        Self {
            flexibility,
            keep_history,
            schema: Schema::new(),
            facts: Facts::default(),
            history: Vec::new(),
            tx_instants: BTreeMap::new(),
            max_eid: 0,
            max_tx: TX0,
        }
    }

    pub(crate) fn last_instant(&self) -> Option<i64> {
        self.tx_instants.values().next_back().copied()
    }

    /// Replays a committed transaction.
    pub(crate) fn apply(&mut self, record: &TxRecord) -> CoreResult<()> {
        for datom in &record.datoms {
            if datom.added {
                self.facts.insert(datom.clone());
            } else {
                self.facts.remove(datom.e, &datom.a, &datom.v);
            }
        }
        self.commit(record)
    }

    /// Bookkeeping after a transaction's datoms reached `facts`.
    pub(crate) fn commit(&mut self, record: &TxRecord) -> CoreResult<()> {
        let mut schema_entities = BTreeSet::new();
        for datom in &record.datoms {
            if datom.e < TX0 {
                self.max_eid = self.max_eid.max(datom.e);
            }
            if Schema::is_system(&datom.a) && datom.e != record.tx {
                schema_entities.insert(datom.e);
            }
        }
        for e in schema_entities {
            self.refresh_attribute(e)?;
        }
        if self.keep_history {
            self.history.extend(record.datoms.iter().cloned());
        }
        self.tx_instants.insert(record.tx, record.instant);
        self.max_tx = self.max_tx.max(record.tx);
        Ok(())
    }

    fn refresh_attribute(&mut self, e: EntityId) -> CoreResult<()> {
        let props: BTreeMap<String, Value> = self
            .facts
            .entity(e)
            .filter(|d| Schema::is_system(&d.a))
            .map(|d| (d.a.clone(), d.v.clone()))
            .collect();
        self.schema.remove_declared_by(e);
        if let Some(attr) = Attribute::from_entity(e, &props)? {
            self.schema.insert(attr);
        }
        Ok(())
    }

    fn instant_of(&self, tx: TxId) -> i64 {
        self.tx_instants.get(&tx).copied().unwrap_or(i64::MIN)
    }
}

/// An immutable database value, possibly restricted to a temporal view.
///
/// Cloning is cheap; the underlying state is shared.
#[derive(Clone)]
pub struct Db {
    state: Arc<DbState>,
    view: View,
    /// Visible datoms in EAVT order.
    datoms: Arc<Vec<Datom>>,
}

impl fmt::Debug for Db {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Db")
            .field("view", &self.view)
            .field("max_tx", &self.state.max_tx)
            .field("datoms", &self.datoms.len())
            .finish()
    }
}

impl Db {
    pub(crate) fn current(state: Arc<DbState>) -> Self {
        let datoms = state.facts.iter().cloned().collect();
        Self {
            state,
            view: View::Current,
            datoms: Arc::new(datoms),
        }
    }

    /// The view this value exposes.
    pub fn view(&self) -> View {
        self.view
    }

    /// Id of the last transaction.
    pub fn basis_tx(&self) -> TxId {
        self.state.max_tx
    }

    /// Every assertion and retraction.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::HistoryDisabled`] when history is not kept.
    pub fn history(&self) -> CoreResult<Db> {
        self.require_history("history")?;
        let mut datoms = self.state.history.clone();
        datoms.sort_by(|x, y| Index::Eavt.compare(x, y));
        Ok(self.with_view(View::History, datoms))
    }

    /// Facts as they stood at instant `t` (epoch ms, inclusive).
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::HistoryDisabled`] when history is not kept.
    pub fn as_of(&self, t: i64) -> CoreResult<Db> {
        self.require_history("as-of")?;
        let mut visible: BTreeMap<(EntityId, &str, &Value), &Datom> = BTreeMap::new();
        for datom in &self.state.history {
            if self.state.instant_of(datom.tx) > t {
                break;
            }
            let key = (datom.e, datom.a.as_str(), &datom.v);
            if datom.added {
                visible.insert(key, datom);
            } else {
                visible.remove(&key);
            }
        }
        let datoms = visible.into_values().cloned().collect();
        Ok(self.with_view(View::AsOf(t), datoms))
    }

    /// Current facts whose transaction happened strictly after `t`.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::HistoryDisabled`] when history is not kept.
    pub fn since(&self, t: i64) -> CoreResult<Db> {
        self.require_history("since")?;
        let datoms = self
            .state
            .facts
            .iter()
            .filter(|d| self.state.instant_of(d.tx) > t)
            .cloned()
            .collect();
        Ok(self.with_view(View::Since(t), datoms))
    }

    fn require_history(&self, view: &'static str) -> CoreResult<()> {
        if self.state.keep_history {
            Ok(())
        } else {
            Err(CoreError::HistoryDisabled { view })
        }
    }

    fn with_view(&self, view: View, datoms: Vec<Datom>) -> Db {
        Db {
            state: Arc::clone(&self.state),
            view,
            datoms: Arc::new(datoms),
        }
    }

    /// Visible datoms in EAVT order.
    pub(crate) fn visible(&self) -> &[Datom] {
        &self.datoms
    }

    /// Visible datoms of one entity.
    pub(crate) fn entity_datoms(&self, e: EntityId) -> &[Datom] {
        let start = self.datoms.partition_point(|d| d.e < e);
        let end = self.datoms.partition_point(|d| d.e <= e);
        &self.datoms[start..end]
    }

    /// Visible assertions `[? a v]`.
    pub(crate) fn holders(&self, a: &str, v: &Value) -> Vec<EntityId> {
        if self.view == View::Current {
            return self.state.facts.holders(a, v).collect();
        }
        let mut found: Vec<EntityId> = self
            .datoms
            .iter()
            .filter(|d| d.added && d.a == a && d.v == *v)
            .map(|d| d.e)
            .collect();
        found.dedup();
        found
    }

    /// Resolves an entity identifier: an id, an ident keyword or a lookup
    /// ref `[attr value]`. `Ok(None)` means a well-formed identifier that
    /// names no entity.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidOperation`] for malformed identifiers and
    /// lookup refs on non-unique attributes.
    pub fn resolve_entity(&self, id: &Value) -> CoreResult<Option<EntityId>> {
        match id {
            Value::Integer(e) => Ok(Some(*e)),
            Value::Keyword(_) => Ok(self.holders(DB_IDENT, id).first().copied()),
            Value::Array(items) => match items.as_slice() {
                [Value::Keyword(a), v] => {
                    if self.state.flexibility == SchemaFlexibility::Write
                        && self.state.schema.get(a).and_then(|attr| attr.unique).is_none()
                    {
                        return Err(CoreError::invalid_operation(format!(
                            "lookup ref attribute :{a} is not unique"
                        )));
                    }
                    Ok(self.holders(a, v).first().copied())
                }
                _ => Err(CoreError::invalid_operation(format!(
                    "invalid lookup ref {id}, expected [attribute value]"
                ))),
            },
            other => Err(CoreError::invalid_operation(format!(
                "invalid entity identifier {other}"
            ))),
        }
    }

    /// Attribute schema as `{ident {:db/ident .. :db/valueType .. ..}}`.
    pub fn schema(&self) -> Value {
        self.state.schema.to_value()
    }

    /// Property to attributes, e.g. `{:db.type/ref #{:friend}}`.
    pub fn reverse_schema(&self) -> Value {
        self.state.schema.reverse_value()
    }

    pub(crate) fn attribute(&self, ident: &str) -> Option<&Attribute> {
        self.state.schema.get(ident)
    }

    fn in_index(&self, index: Index, datom: &Datom) -> bool {
        match index {
            Index::Eavt | Index::Aevt => true,
            Index::Avet => self.state.schema.in_avet(&datom.a, self.state.flexibility),
            Index::Vaet => self.state.schema.is_ref(&datom.a),
        }
    }

    fn sorted_index(&self, index: Index) -> Vec<&Datom> {
        let mut datoms: Vec<&Datom> = self.datoms.iter().filter(|d| self.in_index(index, d)).collect();
        datoms.sort_by(|x, y| index.compare(x, y));
        datoms
    }

    /// Resolves index components into comparable values.
    fn resolve_components(&self, index: Index, components: &[Value]) -> CoreResult<Option<Vec<Value>>> {
        if components.len() > 4 {
            return Err(CoreError::invalid_operation(format!(
                "{index} takes at most 4 components, got {}",
                components.len()
            )));
        }
        let roles: [Role; 4] = match index {
            Index::Eavt => [Role::E, Role::A, Role::V, Role::Tx],
            Index::Aevt => [Role::A, Role::E, Role::V, Role::Tx],
            Index::Avet => [Role::A, Role::V, Role::E, Role::Tx],
            Index::Vaet => [Role::V, Role::A, Role::E, Role::Tx],
        };
        let attr = components
            .iter()
            .zip(roles)
            .find(|(_, role)| *role == Role::A)
            .and_then(|(c, _)| c.as_keyword());
        let value_is_ref = match index {
            Index::Vaet => true,
            _ => attr.is_some_and(|a| self.state.schema.is_ref(a)),
        };

        let mut resolved = Vec::with_capacity(components.len());
        for (component, role) in components.iter().zip(roles) {
            let value = match role {
                Role::E => match self.resolve_entity(component)? {
                    Some(e) => Value::Integer(e),
                    None => return Ok(None),
                },
                Role::A => match component {
                    Value::Keyword(_) => component.clone(),
                    other => {
                        return Err(CoreError::invalid_operation(format!(
                            "attribute component must be a keyword, got {other}"
                        )))
                    }
                },
                Role::V if value_is_ref && !matches!(component, Value::Integer(_)) => {
                    match self.resolve_entity(component)? {
                        Some(e) => Value::Integer(e),
                        None => return Ok(None),
                    }
                }
                Role::V => component.clone(),
                Role::Tx => match component {
                    Value::Integer(_) => component.clone(),
                    other => {
                        return Err(CoreError::invalid_operation(format!(
                            "transaction component must be an integer, got {other}"
                        )))
                    }
                },
            };
            resolved.push(value);
        }
        Ok(Some(resolved))
    }

    /// Datoms of `index` whose leading components equal `components`.
    ///
    /// # Errors
    ///
    /// Returns an error for malformed components.
    pub fn datoms(&self, index: Index, components: &[Value]) -> CoreResult<Vec<Datom>> {
        let Some(components) = self.resolve_components(index, components)? else {
            return Ok(Vec::new());
        };
        Ok(self
            .sorted_index(index)
            .into_iter()
            .filter(|d| compare_prefix(index, d, &components) == std::cmp::Ordering::Equal)
            .cloned()
            .collect())
    }

    /// Datoms of `index` from the first one at or after `components` to
    /// the end of the index.
    ///
    /// # Errors
    ///
    /// Returns an error for malformed components.
    pub fn seek_datoms(&self, index: Index, components: &[Value]) -> CoreResult<Vec<Datom>> {
        let Some(components) = self.resolve_components(index, components)? else {
            return Ok(Vec::new());
        };
        let sorted = self.sorted_index(index);
        let start = sorted
            .partition_point(|d| compare_prefix(index, d, &components) == std::cmp::Ordering::Less);
        Ok(sorted[start..].iter().map(|d| (*d).clone()).collect())
    }

    /// AVET datoms of `attr` with `start <= v <= end`; `nil` bounds are open.
    ///
    /// # Errors
    ///
    /// Returns an error if `attr` is not a keyword or, under `:write`
    /// flexibility, is not indexed.
    pub fn index_range(&self, attr: &Value, start: &Value, end: &Value) -> CoreResult<Vec<Datom>> {
        let Some(a) = attr.as_keyword() else {
            return Err(CoreError::invalid_operation(format!(
                "index-range attribute must be a keyword, got {attr}"
            )));
        };
        if !self.state.schema.in_avet(a, self.state.flexibility) {
            return Err(CoreError::invalid_operation(format!(
                "attribute :{a} must be marked :db/index true or :db/unique to use index-range"
            )));
        }
        let mut datoms: Vec<Datom> = self
            .datoms
            .iter()
            .filter(|d| d.a == a)
            .filter(|d| start.is_null() || d.v >= *start)
            .filter(|d| end.is_null() || d.v <= *end)
            .cloned()
            .collect();
        datoms.sort_by(|x, y| Index::Avet.compare(x, y));
        Ok(datoms)
    }

    /// Index statistics.
    pub fn metrics(&self) -> Value {
        let count = self.datoms.len();
        let avet_count = self.datoms.iter().filter(|d| self.in_index(Index::Avet, d)).count();

        let mut per_attr: BTreeMap<&str, i64> = BTreeMap::new();
        let mut per_entity: BTreeMap<EntityId, i64> = BTreeMap::new();
        for datom in self.datoms.iter() {
            *per_attr.entry(&datom.a).or_default() += 1;
            *per_entity.entry(datom.e).or_default() += 1;
        }

        let mut pairs = vec![
            (Value::keyword("count"), count_value(count)),
            (Value::keyword("avet-count"), count_value(avet_count)),
            (
                Value::keyword("per-attr-counts"),
                Value::map(
                    per_attr
                        .into_iter()
                        .map(|(a, n)| (Value::keyword(a), Value::Integer(n)))
                        .collect(),
                ),
            ),
            (
                Value::keyword("per-entity-counts"),
                Value::map(
                    per_entity
                        .into_iter()
                        .map(|(e, n)| (Value::Integer(e), Value::Integer(n)))
                        .collect(),
                ),
            ),
        ];
        if self.state.keep_history {
            let history = &self.state.history;
            let temporal_avet = history.iter().filter(|d| self.in_index(Index::Avet, d)).count();
            pairs.push((Value::keyword("temporal-count"), count_value(history.len())));
            pairs.push((Value::keyword("temporal-avet-count"), count_value(temporal_avet)));
        }
        Value::map(pairs)
    }

    /// Attribute map of an entity. Cardinality-many attributes hold sets,
    /// references render as `{:db/id n}`. Unknown entities give `{}`.
    ///
    /// # Errors
    ///
    /// Returns an error for malformed entity identifiers.
    pub fn entity(&self, id: &Value) -> CoreResult<Value> {
        let Some(e) = self.resolve_entity(id)? else {
            return Ok(Value::map(Vec::new()));
        };
        let mut grouped: BTreeMap<&str, Vec<Value>> = BTreeMap::new();
        for datom in self.entity_datoms(e).iter().filter(|d| d.added) {
            let value = if self.state.schema.is_ref(&datom.a) {
                entity_ref(&datom.v)
            } else {
                datom.v.clone()
            };
            grouped.entry(&datom.a).or_default().push(value);
        }
        let pairs = grouped
            .into_iter()
            .map(|(a, mut values)| {
                let value = if self.state.schema.is_many(a) {
                    Value::set(values)
                } else {
                    values.pop().unwrap_or(Value::Null)
                };
                (Value::keyword(a), value)
            })
            .collect();
        Ok(Value::map(pairs))
    }
}

/// `{:db/id n}` for a reference value.
pub(crate) fn entity_ref(v: &Value) -> Value {
    Value::map(vec![(Value::keyword("db/id"), v.clone())])
}

fn count_value(n: usize) -> Value {
    Value::Integer(i64::try_from(n).unwrap_or(i64::MAX))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Role {
    E,
    A,
    V,
    Tx,
}

fn component(index: Index, datom: &Datom, position: usize) -> Value {
    let role = match (index, position) {
        (Index::Eavt, 0) | (Index::Aevt, 1) | (Index::Avet | Index::Vaet, 2) => Role::E,
        (Index::Eavt, 1) | (Index::Aevt | Index::Avet, 0) | (Index::Vaet, 1) => Role::A,
        (Index::Eavt | Index::Aevt, 2) | (Index::Avet, 1) | (Index::Vaet, 0) => Role::V,
        _ => Role::Tx,
    };
    match role {
        Role::E => Value::Integer(datom.e),
        Role::A => Value::Keyword(datom.a.clone()),
        Role::V => datom.v.clone(),
        Role::Tx => Value::Integer(datom.tx),
    }
}

fn compare_prefix(index: Index, datom: &Datom, components: &[Value]) -> std::cmp::Ordering {
    components
        .iter()
        .enumerate()
        .map(|(i, c)| component(index, datom, i).cmp(c))
        .find(|o| o.is_ne())
        .unwrap_or(std::cmp::Ordering::Equal)
}
