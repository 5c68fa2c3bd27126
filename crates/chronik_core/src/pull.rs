//! Pull patterns: declarative, hierarchical entity selection.
//!
//! ```text
//! [:name :age {:friend [:name]} :_friend (:email :default "none") *]
//! ```

use std::collections::HashSet;

use chronik_codec::Value;

use crate::db::{entity_ref, Db};
use crate::error::{CoreError, CoreResult};
use crate::schema::DB_ID;
use crate::types::EntityId;

const DEFAULT_LIMIT: usize = 1000;

#[derive(Debug, Clone, PartialEq)]
enum Recursion {
    None,
    Unbounded,
    Depth(usize),
}

#[derive(Debug, Clone, PartialEq)]
struct AttrSpec {
    attr: String,
    reverse: bool,
    key: Value,
    limit: Option<usize>,
    default: Option<Value>,
    sub: Option<Pattern>,
    recursion: Recursion,
}

#[derive(Debug, Clone, PartialEq, Default)]
struct Pattern {
    wildcard: bool,
    attrs: Vec<AttrSpec>,
}

fn parse_pattern(value: &Value) -> CoreResult<Pattern> {
    let Value::Array(items) = value else {
        return Err(CoreError::pull(format!("pull pattern must be a vector, got {value}")));
    };
    let mut pattern = Pattern::default();
    for item in items {
        match item {
            Value::Symbol(s) | Value::Text(s) if s == "*" => pattern.wildcard = true,
            Value::Map(pairs) => {
                for (key, sub) in pairs {
                    let mut spec = parse_attr(key)?;
                    match sub {
                        Value::Symbol(s) if s == "..." => spec.recursion = Recursion::Unbounded,
                        Value::Integer(n) if *n >= 0 => {
                            spec.recursion = Recursion::Depth(usize::try_from(*n).unwrap_or(0));
                        }
                        other => spec.sub = Some(parse_pattern(other)?),
                    }
                    pattern.attrs.push(spec);
                }
            }
            other => pattern.attrs.push(parse_attr(other)?),
        }
    }
    Ok(pattern)
}

fn attr_spec(name: &str) -> AttrSpec {
    let (attr, reverse) = match name.rsplit_once('/') {
        Some((ns, local)) if local.starts_with('_') => (format!("{ns}/{}", &local[1..]), true),
        None if name.starts_with('_') => (name[1..].to_string(), true),
        _ => (name.to_string(), false),
    };
    AttrSpec {
        attr,
        reverse,
        key: Value::keyword(name),
        limit: Some(DEFAULT_LIMIT),
        default: None,
        sub: None,
        recursion: Recursion::None,
    }
}

fn parse_attr(value: &Value) -> CoreResult<AttrSpec> {
    match value {
        Value::Keyword(name) => Ok(attr_spec(name)),
        Value::Array(items) => match items.as_slice() {
            [Value::Symbol(f), attr, arg] if f == "limit" || f == "default" => {
                let mut spec = parse_attr(attr)?;
                apply_option(&mut spec, f, arg)?;
                Ok(spec)
            }
            [Value::Keyword(name), options @ ..] if options.len() % 2 == 0 => {
                let mut spec = attr_spec(name);
                for pair in options.chunks(2) {
                    let option = pair[0].as_keyword().ok_or_else(|| {
                        CoreError::pull(format!("attribute option must be a keyword, got {}", pair[0]))
                    })?;
                    apply_option(&mut spec, option, &pair[1])?;
                }
                Ok(spec)
            }
            _ => Err(CoreError::pull(format!("invalid attribute spec {value}"))),
        },
        other => Err(CoreError::pull(format!("invalid pull pattern element {other}"))),
    }
}

fn apply_option(spec: &mut AttrSpec, option: &str, arg: &Value) -> CoreResult<()> {
    match (option, arg) {
        ("as", key) => spec.key = key.clone(),
        ("limit", Value::Null) => spec.limit = None,
        ("limit", Value::Integer(n)) if *n >= 0 => spec.limit = usize::try_from(*n).ok(),
        ("default", value) => spec.default = Some(value.clone()),
        _ => {
            return Err(CoreError::pull(format!(
                "invalid attribute option :{option} {arg}"
            )))
        }
    }
    Ok(())
}

struct Puller<'d> {
    db: &'d Db,
}

impl Puller<'_> {
    fn pull(
        &self,
        pattern: &Pattern,
        e: EntityId,
        visited: &mut HashSet<EntityId>,
    ) -> CoreResult<Value> {
        let datoms: Vec<_> = self.db.entity_datoms(e).iter().filter(|d| d.added).collect();
        let mut pairs: Vec<(Value, Value)> = Vec::new();
        visited.insert(e);

        if pattern.wildcard {
            pairs.push((Value::keyword(DB_ID), Value::Integer(e)));
            let mut attrs: Vec<&str> = datoms.iter().map(|d| d.a.as_str()).collect();
            attrs.dedup();
            for attr in attrs {
                if pattern.attrs.iter().any(|s| !s.reverse && s.attr == attr) {
                    continue;
                }
                let values: Vec<Value> = datoms.iter().filter(|d| d.a == attr).map(|d| d.v.clone()).collect();
                let component = self.db.attribute(attr).is_some_and(|a| a.is_component);
                let star = Pattern {
                    wildcard: true,
                    attrs: Vec::new(),
                };
                let rendered = values
                    .iter()
                    .map(|v| match v.as_integer() {
                        Some(id) if component && !visited.contains(&id) => {
                            self.pull(&star, id, visited).map(|r| or_ref(r, v))
                        }
                        _ if self.is_ref(attr) => Ok(entity_ref(v)),
                        _ => Ok(v.clone()),
                    })
                    .collect::<CoreResult<Vec<_>>>()?;
                pairs.push((Value::keyword(attr), self.shape(attr, false, rendered)));
            }
        }

        for spec in &pattern.attrs {
            if spec.attr == DB_ID && !spec.reverse {
                pairs.push((spec.key.clone(), Value::Integer(e)));
                continue;
            }
            let mut targets: Vec<Value> = if spec.reverse {
                let target = Value::Integer(e);
                let mut holders = self.db.holders(&spec.attr, &target);
                holders.sort_unstable();
                holders.into_iter().map(Value::Integer).collect()
            } else {
                datoms
                    .iter()
                    .filter(|d| d.a == spec.attr)
                    .map(|d| d.v.clone())
                    .collect()
            };
            if let Some(limit) = spec.limit {
                targets.truncate(limit);
            }
            if targets.is_empty() {
                if let Some(default) = &spec.default {
                    pairs.push((spec.key.clone(), default.clone()));
                }
                continue;
            }

            let is_ref = spec.reverse || self.is_ref(&spec.attr);
            let rendered = if is_ref {
                targets
                    .iter()
                    .map(|v| self.pull_ref(pattern, spec, v, visited))
                    .collect::<CoreResult<Vec<_>>>()?
            } else {
                targets
            };
            pairs.push((spec.key.clone(), self.shape(&spec.attr, spec.reverse, rendered)));
        }

        visited.remove(&e);
        if datoms.is_empty() && !pairs.iter().any(|(k, _)| *k != Value::keyword(DB_ID)) {
            return Ok(Value::Null);
        }
        Ok(Value::map(pairs))
    }

    /// Renders one reference value of `spec`, a member of `current`.
    fn pull_ref(
        &self,
        current: &Pattern,
        spec: &AttrSpec,
        target: &Value,
        visited: &mut HashSet<EntityId>,
    ) -> CoreResult<Value> {
        let Some(id) = target.as_integer() else {
            return Ok(target.clone());
        };
        let nested = match (&spec.sub, &spec.recursion) {
            (Some(sub), _) => Some(sub.clone()),
            (None, Recursion::Unbounded) if !visited.contains(&id) => Some(current.clone()),
            (None, Recursion::Depth(n)) if *n > 0 && !visited.contains(&id) => {
                Some(decrement(current, &spec.attr, spec.reverse))
            }
            _ => None,
        };
        match nested {
            Some(pattern) => Ok(or_ref(self.pull(&pattern, id, visited)?, target)),
            None => Ok(entity_ref(target)),
        }
    }

    fn is_ref(&self, attr: &str) -> bool {
        self.db.attribute(attr).is_some_and(|a| a.is_ref())
    }

    /// Cardinality-one attributes (and reverse component refs) give a
    /// single value, everything else a vector.
    fn shape(&self, attr: &str, reverse: bool, mut values: Vec<Value>) -> Value {
        let single = match self.db.attribute(attr) {
            Some(a) if reverse => a.is_component,
            Some(a) => !a.is_many(),
            None => !reverse && values.len() == 1,
        };
        if single {
            values.swap_remove(0)
        } else {
            Value::Array(values)
        }
    }
}

/// `{:db/id n}` stands in for a nested pull that found nothing.
fn or_ref(pulled: Value, target: &Value) -> Value {
    if pulled.is_null() {
        entity_ref(target)
    } else {
        pulled
    }
}

/// Copy of `pattern` whose recursion on `attr` is one level shallower.
fn decrement(pattern: &Pattern, attr: &str, reverse: bool) -> Pattern {
    let mut next = pattern.clone();
    for spec in &mut next.attrs {
        if spec.attr == attr && spec.reverse == reverse {
            if let Recursion::Depth(n) = spec.recursion {
                spec.recursion = Recursion::Depth(n.saturating_sub(1));
            }
        }
    }
    next
}

/// Pulls `selector` for one entity; `nil` when the entity has no facts.
///
/// # Errors
///
/// Returns [`CoreError::Pull`] for malformed patterns.
pub fn pull(db: &Db, selector: &Value, eid: &Value) -> CoreResult<Value> {
    let pattern = parse_pattern(selector)?;
    let Some(e) = db.resolve_entity(eid)? else {
        return Ok(Value::Null);
    };
    Puller { db }.pull(&pattern, e, &mut HashSet::new())
}

/// Pulls `selector` for every entity in `eids`, in order.
///
/// # Errors
///
/// Returns [`CoreError::Pull`] if `eids` is not a sequence or the pattern
/// is malformed.
pub fn pull_many(db: &Db, selector: &Value, eids: &Value) -> CoreResult<Value> {
    let pattern = parse_pattern(selector)?;
    let ids = eids
        .as_seq()
        .ok_or_else(|| CoreError::pull(format!("pull-many expects a sequence of ids, got {eids}")))?;
    let puller = Puller { db };
    let results = ids
        .iter()
        .map(|id| match db.resolve_entity(id)? {
            Some(e) => puller.pull(&pattern, e, &mut HashSet::new()),
            None => Ok(Value::Null),
        })
        .collect::<CoreResult<Vec<_>>>()?;
    Ok(Value::Array(results))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DatabaseConfig;
    use crate::database::{connect, create_database, delete_database};
    use chronik_codec::from_edn_str;

    fn edn(text: &str) -> Value {
        from_edn_str(text).unwrap()
    }

    fn fixture(id: &str) -> (DatabaseConfig, Db) {
        let config = DatabaseConfig::memory(id).initial_tx(edn(
            r#"[{:db/ident :name :db/valueType :db.type/string :db/unique :db.unique/identity}
                {:db/ident :age :db/valueType :db.type/long}
                {:db/ident :friend :db/valueType :db.type/ref :db/cardinality :db.cardinality/many}]"#,
        ));
        create_database(&config).unwrap();
        let mut conn = connect(&config).unwrap();
        conn.transact(&edn(
            r#"[{:db/id "a" :name "Alice" :age 30 :friend "b"}
                {:db/id "b" :name "Bob" :age 25 :friend "c"}
                {:db/id "c" :name "Carol" :age 35}]"#,
        ))
        .unwrap();
        let db = conn.db();
        (config, db)
    }

    fn id_of(db: &Db, name: &str) -> i64 {
        db.resolve_entity(&edn(&format!(r#"[:name "{name}"]"#)))
            .unwrap()
            .unwrap()
    }

    #[test]
    fn plain_attributes() {
        let (config, db) = fixture("pull-test-plain");
        let alice = edn(r#"[:name "Alice"]"#);
        assert_eq!(
            pull(&db, &edn("[:name :age]"), &alice).unwrap(),
            edn(r#"{:name "Alice" :age 30}"#)
        );
        assert_eq!(pull(&db, &edn("[:name]"), &Value::Integer(9999)).unwrap(), Value::Null);
        delete_database(&config).unwrap();
    }

    #[test]
    fn wildcard_includes_id() {
        let (config, db) = fixture("pull-test-wildcard");
        let carol = id_of(&db, "Carol");
        assert_eq!(
            pull(&db, &edn("[*]"), &Value::Integer(carol)).unwrap(),
            edn(&format!(r#"{{:db/id {carol} :name "Carol" :age 35}}"#))
        );
        delete_database(&config).unwrap();
    }

    #[test]
    fn nested_and_reverse_refs() {
        let (config, db) = fixture("pull-test-refs");
        let alice = id_of(&db, "Alice");
        let bob = id_of(&db, "Bob");
        assert_eq!(
            pull(&db, &edn("[:name {:friend [:name]}]"), &Value::Integer(alice)).unwrap(),
            edn(r#"{:name "Alice" :friend [{:name "Bob"}]}"#)
        );
        assert_eq!(
            pull(&db, &edn("[:name :_friend]"), &Value::Integer(bob)).unwrap(),
            edn(&format!(r#"{{:name "Bob" :_friend [{{:db/id {alice}}}]}}"#))
        );
        delete_database(&config).unwrap();
    }

    #[test]
    fn unbounded_recursion_follows_the_chain() {
        let (config, db) = fixture("pull-test-recursion");
        let alice = id_of(&db, "Alice");
        assert_eq!(
            pull(&db, &edn("[:name {:friend ...}]"), &Value::Integer(alice)).unwrap(),
            edn(r#"{:name "Alice" :friend [{:name "Bob" :friend [{:name "Carol"}]}]}"#)
        );
        delete_database(&config).unwrap();
    }

    #[test]
    fn attribute_options() {
        let (config, db) = fixture("pull-test-options");
        let alice = edn(r#"[:name "Alice"]"#);
        assert_eq!(
            pull(&db, &edn(r#"[(default :email "none") [:age :as "years"]]"#), &alice).unwrap(),
            edn(r#"{:email "none" "years" 30}"#)
        );
        delete_database(&config).unwrap();
    }

    #[test]
    fn pull_many_keeps_order() {
        let (config, db) = fixture("pull-test-many");
        assert_eq!(
            pull_many(&db, &edn("[:name]"), &edn(r#"[[:name "Bob"] 9999 [:name "Alice"]]"#)).unwrap(),
            edn(r#"[{:name "Bob"} nil {:name "Alice"}]"#)
        );
        delete_database(&config).unwrap();
    }

    #[test]
    fn malformed_patterns() {
        let (config, db) = fixture("pull-test-malformed");
        let alice = edn(r#"[:name "Alice"]"#);
        assert!(matches!(
            pull(&db, &edn(":name"), &alice),
            Err(CoreError::Pull { .. })
        ));
        assert!(matches!(
            pull(&db, &edn("[42]"), &alice),
            Err(CoreError::Pull { .. })
        ));
        delete_database(&config).unwrap();
    }
}
