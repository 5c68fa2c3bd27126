//! Clause evaluation over binding rows.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use chronik_codec::Value;

use super::builtins;
use super::parser::{Binding, Clause, FindElem, FindSpec, InBinding, KeyKind, Query, Term, DEFAULT_SOURCE};
use super::QueryInput;
use crate::db::Db;
use crate::error::{CoreError, CoreResult};
use crate::pull::pull;
use crate::types::Datom;

/// Variable bindings of one solution.
pub(crate) type Row = BTreeMap<String, Value>;

pub(crate) enum Source {
    Db(Db),
    Rel(Vec<Vec<Value>>),
}

pub(crate) struct Evaluator {
    sources: HashMap<String, Source>,
}

/// Binds `value` to `binding` on top of `row`, unifying variables that
/// are already bound.
pub(crate) fn bind(binding: &Binding, value: &Value, row: Row) -> CoreResult<Vec<Row>> {
    match binding {
        Binding::Blank => Ok(vec![row]),
        Binding::Var(name) => match row.get(name) {
            Some(existing) if builtins::compare(existing, value).is_ne() => Ok(Vec::new()),
            Some(_) => Ok(vec![row]),
            None => {
                let mut row = row;
                row.insert(name.clone(), value.clone());
                Ok(vec![row])
            }
        },
        Binding::Tuple(parts) => {
            let items = value.as_seq().ok_or_else(|| {
                CoreError::query(format!("cannot bind {value} to a tuple binding"))
            })?;
            if items.len() < parts.len() {
                return Err(CoreError::query(format!(
                    "tuple binding needs {} elements, got {value}",
                    parts.len()
                )));
            }
            let mut rows = vec![row];
            for (part, item) in parts.iter().zip(items) {
                rows = rows
                    .into_iter()
                    .map(|row| bind(part, item, row))
                    .collect::<CoreResult<Vec<_>>>()?
                    .concat();
            }
            Ok(rows)
        }
        Binding::Coll(inner) => {
            let items = value.as_seq().ok_or_else(|| {
                CoreError::query(format!("cannot bind {value} to a collection binding"))
            })?;
            Ok(items
                .iter()
                .map(|item| bind(inner, item, row.clone()))
                .collect::<CoreResult<Vec<_>>>()?
                .concat())
        }
    }
}

fn as_relation(value: &Value) -> CoreResult<Vec<Vec<Value>>> {
    let tuples = value
        .as_seq()
        .ok_or_else(|| CoreError::query(format!("source must be a database or a collection of tuples, got {value}")))?;
    tuples
        .iter()
        .map(|t| {
            t.as_seq()
                .map(<[Value]>::to_vec)
                .ok_or_else(|| CoreError::query(format!("source tuples must be vectors, got {t}")))
        })
        .collect()
}

fn project(row: &Row, vars: &[String]) -> Row {
    vars.iter()
        .filter_map(|v| row.get(v).map(|x| (v.clone(), x.clone())))
        .collect()
}

fn datom_component(datom: &Datom, position: usize) -> Value {
    match position {
        0 => Value::Integer(datom.e),
        1 => Value::Keyword(datom.a.clone()),
        2 => datom.v.clone(),
        3 => Value::Integer(datom.tx),
        _ => Value::Bool(datom.added),
    }
}

/// Extends `row` with the free variables of `terms` taken from `values`.
fn unify(terms: &[Term], values: &[Value], row: &Row) -> Option<Row> {
    let mut out = row.clone();
    for (term, value) in terms.iter().zip(values) {
        match term {
            Term::Var(name) => match out.get(name) {
                Some(existing) if existing != value => return None,
                Some(_) => {}
                None => {
                    out.insert(name.clone(), value.clone());
                }
            },
            Term::Const(c) if c != value => return None,
            _ => {}
        }
    }
    Some(out)
}

impl Evaluator {
    /// Binds query inputs, returning the evaluator and the seed rows.
    pub(crate) fn new(query: &Query, inputs: Vec<QueryInput>) -> CoreResult<(Self, Vec<Row>)> {
        if inputs.len() != query.inputs.len() {
            return Err(CoreError::query(format!(
                "query expects {} inputs, got {}",
                query.inputs.len(),
                inputs.len()
            )));
        }
        let mut sources = HashMap::new();
        let mut rows = vec![Row::new()];
        for (binding, input) in query.inputs.iter().zip(inputs) {
            match (binding, input) {
                (InBinding::Source(name), QueryInput::Db(db)) => {
                    sources.insert(name.clone(), Source::Db(db));
                }
                (InBinding::Source(name), QueryInput::Value(value)) => {
                    sources.insert(name.clone(), Source::Rel(as_relation(&value)?));
                }
                (InBinding::Bind(binding), QueryInput::Value(value)) => {
                    rows = rows
                        .into_iter()
                        .map(|row| bind(binding, &value, row))
                        .collect::<CoreResult<Vec<_>>>()?
                        .concat();
                }
                (InBinding::Bind(_), QueryInput::Db(_)) => {
                    return Err(CoreError::query(
                        "a database input must be bound to a source variable such as $",
                    ))
                }
            }
        }
        Ok((Self { sources }, rows))
    }

    fn source(&self, name: Option<&str>) -> CoreResult<&Source> {
        let name = name.unwrap_or(DEFAULT_SOURCE);
        self.sources
            .get(name)
            .ok_or_else(|| CoreError::query(format!("unknown source {name}")))
    }

    fn db(&self, name: Option<&str>) -> CoreResult<&Db> {
        match self.source(name)? {
            Source::Db(db) => Ok(db),
            Source::Rel(_) => Err(CoreError::query(format!(
                "source {} is not a database",
                name.unwrap_or(DEFAULT_SOURCE)
            ))),
        }
    }

    pub(crate) fn eval(&self, clauses: &[Clause], rows: Vec<Row>) -> CoreResult<Vec<Row>> {
        clauses
            .iter()
            .try_fold(rows, |rows, clause| self.eval_clause(clause, rows))
    }

    fn eval_clause(&self, clause: &Clause, rows: Vec<Row>) -> CoreResult<Vec<Row>> {
        match clause {
            Clause::Pattern { src, terms } => self.eval_pattern(src.as_deref(), terms, rows),
            Clause::Pred { name, args } => {
                let mut out = Vec::with_capacity(rows.len());
                for row in rows {
                    if self.eval_predicate(name, args, &row)? {
                        out.push(row);
                    }
                }
                Ok(out)
            }
            Clause::Fn {
                name,
                args,
                binding,
            } => {
                let mut out = Vec::new();
                for row in rows {
                    let value = self.eval_fn(name, args, &row)?;
                    out.extend(bind(binding, &value, row)?);
                }
                Ok(out)
            }
            Clause::Not { join, clauses } => {
                let mut out = Vec::new();
                for row in rows {
                    let seed = match join {
                        Some(vars) => project(&row, vars),
                        None => row.clone(),
                    };
                    if self.eval(clauses, vec![seed])?.is_empty() {
                        out.push(row);
                    }
                }
                Ok(out)
            }
            Clause::Or { join, branches } => {
                let mut out = Vec::new();
                for row in rows {
                    let seed = match join {
                        Some(vars) => project(&row, vars),
                        None => row.clone(),
                    };
                    let mut seen = BTreeSet::new();
                    for branch in branches {
                        for found in self.eval(branch, vec![seed.clone()])? {
                            let merged = match join {
                                Some(vars) => {
                                    let mut merged = row.clone();
                                    merged.extend(project(&found, vars));
                                    merged
                                }
                                None => found,
                            };
                            if seen.insert(merged.clone()) {
                                out.push(merged);
                            }
                        }
                    }
                }
                Ok(out)
            }
        }
    }

    fn arg(&self, term: &Term, row: &Row, name: &str) -> CoreResult<Value> {
        match term {
            Term::Var(var) => row.get(var).cloned().ok_or_else(|| {
                CoreError::query(format!("insufficient bindings: {var} is not bound in ({name} ...)"))
            }),
            Term::Const(value) => Ok(value.clone()),
            Term::Src(src) => Ok(Value::Symbol(src.clone())),
            Term::Blank => Err(CoreError::query(format!("_ is not allowed as an argument to {name}"))),
        }
    }

    /// `($ ?e :attr ...)` argument prefix of `get-else` and `missing?`.
    fn entity_attr<'t>(
        &self,
        name: &str,
        args: &'t [Term],
        row: &Row,
    ) -> CoreResult<(&Db, Option<i64>, String, &'t [Term])> {
        let [Term::Src(src), e, a, rest @ ..] = args else {
            return Err(CoreError::query(format!("{name} expects a source, an entity and an attribute")));
        };
        let db = self.db(Some(src))?;
        let e = db.resolve_entity(&self.arg(e, row, name)?)?;
        let a = self.arg(a, row, name)?;
        let a = a
            .as_keyword()
            .ok_or_else(|| CoreError::query(format!("{name} expects an attribute keyword, got {a}")))?
            .to_string();
        Ok((db, e, a, rest))
    }

    fn first_value(db: &Db, e: Option<i64>, a: &str) -> Option<Value> {
        let e = e?;
        db.entity_datoms(e)
            .iter()
            .find(|d| d.added && d.a == a)
            .map(|d| d.v.clone())
    }

    fn eval_predicate(&self, name: &str, args: &[Term], row: &Row) -> CoreResult<bool> {
        if name == "missing?" {
            let (db, e, a, _) = self.entity_attr(name, args, row)?;
            return Ok(Self::first_value(db, e, &a).is_none());
        }
        if !builtins::is_predicate(name) {
            return builtins::call(name, &self.args(name, args, row)?).map(|v| !matches!(v, Value::Null | Value::Bool(false)));
        }
        builtins::predicate(name, &self.args(name, args, row)?)
    }

    fn eval_fn(&self, name: &str, args: &[Term], row: &Row) -> CoreResult<Value> {
        match name {
            "get-else" => {
                let (db, e, a, rest) = self.entity_attr(name, args, row)?;
                let [default] = rest else {
                    return Err(CoreError::query("get-else expects a default value"));
                };
                let default = self.arg(default, row, name)?;
                Ok(Self::first_value(db, e, &a).unwrap_or(default))
            }
            "missing?" => self.eval_predicate(name, args, row).map(Value::Bool),
            _ => builtins::call(name, &self.args(name, args, row)?),
        }
    }

    fn args(&self, name: &str, args: &[Term], row: &Row) -> CoreResult<Vec<Value>> {
        args.iter().map(|t| self.arg(t, row, name)).collect()
    }

    fn eval_pattern(&self, src: Option<&str>, terms: &[Term], rows: Vec<Row>) -> CoreResult<Vec<Row>> {
        let db = match self.source(src)? {
            Source::Db(db) => db,
            Source::Rel(tuples) => {
                let mut out = Vec::new();
                for row in &rows {
                    out.extend(
                        tuples
                            .iter()
                            .filter(|t| t.len() >= terms.len())
                            .filter_map(|t| unify(terms, t, row)),
                    );
                }
                return Ok(out);
            }
        };

        let mut out = Vec::new();
        for row in rows {
            let bound: Vec<Option<Value>> = terms
                .iter()
                .map(|t| match t {
                    Term::Var(name) => row.get(name).cloned(),
                    Term::Const(value) => Some(value.clone()),
                    Term::Blank | Term::Src(_) => None,
                })
                .collect();
            let at = |i: usize| bound.get(i).cloned().flatten();

            let e = match at(0) {
                Some(v) => match resolve_lenient(db, &v)? {
                    Some(e) => Some(e),
                    None => continue,
                },
                None => None,
            };
            let a = match at(1) {
                Some(Value::Keyword(a)) => Some(a),
                Some(_) => continue,
                None => None,
            };
            let v = match at(2) {
                Some(v) if !matches!(v, Value::Integer(_))
                    && a.as_deref().and_then(|a| db.attribute(a)).is_some_and(|x| x.is_ref()) =>
                {
                    match resolve_lenient(db, &v)? {
                        Some(id) => Some(Value::Integer(id)),
                        None => continue,
                    }
                }
                other => other,
            };
            let tx = at(3);
            let added = at(4);

            let candidates = match e {
                Some(e) => db.entity_datoms(e),
                None => db.visible(),
            };
            let free: Vec<Term> = terms
                .iter()
                .map(|t| match t {
                    Term::Var(name) if !row.contains_key(name) => t.clone(),
                    _ => Term::Blank,
                })
                .collect();
            for datom in candidates {
                if a.as_deref().is_some_and(|a| a != datom.a)
                    || v.as_ref().is_some_and(|v| *v != datom.v)
                    || tx.as_ref().is_some_and(|t| *t != Value::Integer(datom.tx))
                    || added.as_ref().is_some_and(|b| *b != Value::Bool(datom.added))
                {
                    continue;
                }
                let values: Vec<Value> = (0..terms.len()).map(|i| datom_component(datom, i)).collect();
                if let Some(found) = unify(&free, &values, &row) {
                    out.push(found);
                }
            }
        }
        Ok(out)
    }

    /// Shapes solutions according to the find spec.
    pub(crate) fn find(&self, query: &Query, rows: &[Row]) -> CoreResult<Value> {
        let elems = query.find.elements();
        let tuples = if elems.iter().any(FindElem::is_aggregate) {
            self.aggregate(query, rows)?
        } else {
            let keys: BTreeSet<Vec<Value>> = rows
                .iter()
                .map(|row| {
                    elems
                        .iter()
                        .map(|el| self.find_key(el, row))
                        .collect::<CoreResult<Vec<Value>>>()
                })
                .collect::<CoreResult<_>>()?;
            keys.into_iter()
                .map(|key| self.realize(elems, key))
                .collect::<CoreResult<Vec<_>>>()?
        };

        Ok(match &query.find {
            FindSpec::Rel(_) => match &query.keys {
                Some((kind, names)) => Value::set(
                    tuples
                        .into_iter()
                        .map(|tuple| {
                            Value::map(
                                names
                                    .iter()
                                    .map(|n| match kind {
                                        KeyKind::Keyword => Value::keyword(n),
                                        KeyKind::Text => Value::text(n.clone()),
                                        KeyKind::Symbol => Value::symbol(n.clone()),
                                    })
                                    .zip(tuple)
                                    .collect(),
                            )
                        })
                        .collect(),
                ),
                None => Value::set(tuples.into_iter().map(Value::Array).collect()),
            },
            FindSpec::Coll(_) => Value::Array(tuples.into_iter().filter_map(|t| t.into_iter().next()).collect()),
            FindSpec::Tuple(_) => tuples.into_iter().next().map_or(Value::Null, Value::Array),
            FindSpec::Scalar(_) => tuples
                .into_iter()
                .next()
                .and_then(|t| t.into_iter().next())
                .unwrap_or(Value::Null),
        })
    }

    fn var(row: &Row, var: &str) -> CoreResult<Value> {
        row.get(var)
            .cloned()
            .ok_or_else(|| CoreError::query(format!("find variable {var} is not bound by the query")))
    }

    /// Value identifying a non-aggregate element in one row.
    fn find_key(&self, elem: &FindElem, row: &Row) -> CoreResult<Value> {
        match elem {
            FindElem::Var(var) => Self::var(row, var),
            FindElem::Pull { var, pattern, .. } => {
                let pattern = match pattern {
                    Term::Var(p) => Self::var(row, p)?,
                    Term::Const(p) => p.clone(),
                    other => return Err(CoreError::query(format!("invalid pull pattern {other:?}"))),
                };
                Ok(Value::Array(vec![Self::var(row, var)?, pattern]))
            }
            FindElem::Aggregate { name, .. } => Err(CoreError::query(format!("unexpected aggregate {name}"))),
        }
    }

    /// Turns keys back into output values, running pulls.
    fn realize(&self, elems: &[FindElem], key: Vec<Value>) -> CoreResult<Vec<Value>> {
        elems
            .iter()
            .zip(key)
            .map(|(elem, key)| match elem {
                FindElem::Pull { src, .. } => match key.as_seq() {
                    Some([eid, pattern]) => pull(self.db(Some(src))?, pattern, eid),
                    _ => Ok(Value::Null),
                },
                _ => Ok(key),
            })
            .collect()
    }

    fn aggregate(&self, query: &Query, rows: &[Row]) -> CoreResult<Vec<Vec<Value>>> {
        let elems = query.find.elements();
        let mut agg_vars = Vec::new();
        for elem in elems {
            if let FindElem::Aggregate { name, args } = elem {
                if !builtins::is_aggregate(name) {
                    return Err(CoreError::query(format!("unknown aggregate {name}")));
                }
                match args.as_slice() {
                    [Term::Var(var)] => agg_vars.push(var.clone()),
                    _ => {
                        return Err(CoreError::query(format!(
                            "aggregate {name} takes a single variable"
                        )))
                    }
                }
            }
        }

        let mut projected: BTreeSet<(Vec<Value>, Vec<Value>, Vec<Value>)> = BTreeSet::new();
        for row in rows {
            let group = elems
                .iter()
                .filter(|el| !el.is_aggregate())
                .map(|el| self.find_key(el, row))
                .collect::<CoreResult<Vec<_>>>()?;
            let inputs = agg_vars
                .iter()
                .map(|v| Self::var(row, v))
                .collect::<CoreResult<Vec<_>>>()?;
            let with = query
                .with
                .iter()
                .map(|v| Self::var(row, v))
                .collect::<CoreResult<Vec<_>>>()?;
            projected.insert((group, inputs, with));
        }

        let mut groups: BTreeMap<Vec<Value>, Vec<Vec<Value>>> = BTreeMap::new();
        for (group, inputs, _) in projected {
            groups.entry(group).or_default().push(inputs);
        }

        let mut tuples = Vec::with_capacity(groups.len());
        for (group, inputs) in groups {
            let mut group_keys = group.into_iter();
            let mut agg_index = 0;
            let mut tuple = Vec::with_capacity(elems.len());
            for elem in elems {
                match elem {
                    FindElem::Aggregate { name, .. } => {
                        let values = inputs.iter().map(|i| i[agg_index].clone()).collect();
                        tuple.push(builtins::aggregate(name, values)?);
                        agg_index += 1;
                    }
                    other => {
                        let key = group_keys.next().unwrap_or(Value::Null);
                        tuple.extend(self.realize(std::slice::from_ref(other), vec![key])?);
                    }
                }
            }
            tuples.push(tuple);
        }
        Ok(tuples)
    }
}

/// Entity position lookups: ids, idents and lookup refs resolve; any
/// other value simply matches nothing.
fn resolve_lenient(db: &Db, value: &Value) -> CoreResult<Option<i64>> {
    match value {
        Value::Integer(_) | Value::Keyword(_) | Value::Array(_) => db.resolve_entity(value),
        _ => Ok(None),
    }
}
