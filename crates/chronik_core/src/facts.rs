//! Current-state fact index.

use std::collections::{BTreeMap, BTreeSet};

use chronik_codec::Value;

use crate::types::{Datom, EntityId};

/// Facts that are true right now, kept in EAVT order with an AVET side
/// index for value lookups (uniqueness, lookup refs, reverse references).
#[derive(Debug, Clone, Default)]
pub(crate) struct Facts {
    eavt: BTreeSet<Datom>,
    avet: BTreeMap<(String, Value), BTreeSet<EntityId>>,
}

fn lower_bound(e: EntityId, a: &str, v: Value) -> Datom {
    Datom {
        e,
        a: a.to_string(),
        v,
        tx: i64::MIN,
        added: false,
    }
}

impl Facts {
    pub(crate) fn len(&self) -> usize {
        self.eavt.len()
    }

    /// All facts in EAVT order.
    pub(crate) fn iter(&self) -> impl Iterator<Item = &Datom> {
        self.eavt.iter()
    }

    /// Facts about one entity.
    pub(crate) fn entity(&self, e: EntityId) -> impl Iterator<Item = &Datom> {
        self.eavt
            .range(lower_bound(e, "", Value::Null)..)
            .take_while(move |d| d.e == e)
    }

    /// Values of one attribute on one entity.
    pub(crate) fn values<'a>(&'a self, e: EntityId, a: &'a str) -> impl Iterator<Item = &'a Datom> {
        self.eavt
            .range(lower_bound(e, a, Value::Null)..)
            .take_while(move |d| d.e == e && d.a == a)
    }

    pub(crate) fn find(&self, e: EntityId, a: &str, v: &Value) -> Option<&Datom> {
        self.eavt
            .range(lower_bound(e, a, v.clone())..)
            .next()
            .filter(|d| d.e == e && d.a == a && d.v == *v)
    }

    /// Entities holding value `v` for attribute `a`.
    pub(crate) fn holders(&self, a: &str, v: &Value) -> impl Iterator<Item = EntityId> + '_ {
        self.avet
            .get(&(a.to_string(), v.clone()))
            .into_iter()
            .flat_map(|set| set.iter().copied())
    }

    pub(crate) fn insert(&mut self, datom: Datom) {
        self.avet
            .entry((datom.a.clone(), datom.v.clone()))
            .or_default()
            .insert(datom.e);
        self.eavt.insert(datom);
    }

    pub(crate) fn remove(&mut self, e: EntityId, a: &str, v: &Value) -> Option<Datom> {
        let found = self.find(e, a, v)?.clone();
        self.eavt.remove(&found);
        let key = (found.a.clone(), found.v.clone());
        if let Some(set) = self.avet.get_mut(&key) {
            set.remove(&e);
            if set.is_empty() {
                self.avet.remove(&key);
            }
        }
        Some(found)
    }
}
