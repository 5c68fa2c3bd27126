//! Datalog queries over database values.
//!
//! Supported: vector and map query forms, find specs (relation, `.`,
//! `[?x ...]`, `[?x ?y]`), aggregates, `(pull ?e pattern)`, `:keys`,
//! `:with`, `:in` bindings, data patterns, predicates, function
//! bindings, `not`/`not-join` and `or`/`or-join`. Rules are not.

mod builtins;
mod eval;
mod parser;

use chronik_codec::Value;
use tracing::debug;

use crate::db::Db;
use crate::error::CoreResult;

/// One positional query input.
#[derive(Debug, Clone)]
pub enum QueryInput {
    /// A database, bound to a source variable (`$`, `$name`).
    Db(Db),
    /// A plain value, bound to a scalar, tuple, collection or relation
    /// binding, or used as a tuple source.
    Value(Value),
}

impl From<Db> for QueryInput {
    fn from(db: Db) -> Self {
        QueryInput::Db(db)
    }
}

impl From<Value> for QueryInput {
    fn from(value: Value) -> Self {
        QueryInput::Value(value)
    }
}

/// Runs `form` against `inputs`, bound positionally to `:in` (which
/// defaults to `[$]`).
///
/// # Errors
///
/// Returns [`CoreError::Query`](crate::CoreError::Query) for malformed
/// queries, unbound variables or mismatched inputs.
pub fn query(form: &Value, inputs: Vec<QueryInput>) -> CoreResult<Value> {
    let parsed = parser::parse_query(form)?;
    let (evaluator, seed) = eval::Evaluator::new(&parsed, inputs)?;
    let rows = evaluator.eval(&parsed.clauses, seed)?;
    debug!(rows = rows.len(), "query evaluated");
    evaluator.find(&parsed, &rows)
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

    fn run(db: &Db, text: &str) -> Value {
        query(&edn(text), vec![QueryInput::Db(db.clone())]).unwrap()
    }

    #[test]
    fn basic_relation() {
        let (config, db) = fixture("query-test-basic");
        assert_eq!(
            run(&db, "[:find ?n :where [?e :name ?n]]"),
            edn(r#"#{["Alice"] ["Bob"] ["Carol"]}"#)
        );
        assert_eq!(
            run(&db, "[:find ?n :where [?e :name ?n] [?e :age ?a] [(< ?a 30)]]"),
            edn(r#"#{["Bob"]}"#)
        );
        delete_database(&config).unwrap();
    }

    #[test]
    fn joins_and_find_specs() {
        let (config, db) = fixture("query-test-joins");
        assert_eq!(
            run(&db, "[:find [?fn ...] :where [?e :name \"Alice\"] [?e :friend ?f] [?f :name ?fn]]"),
            edn(r#"["Bob"]"#)
        );
        assert_eq!(
            run(&db, "[:find ?a . :where [?e :name \"Carol\"] [?e :age ?a]]"),
            Value::Integer(35)
        );
        assert_eq!(
            run(&db, "[:find [?n ?a] :where [?e :name ?n] [?e :age ?a] [(> ?a 32)]]"),
            edn(r#"["Carol" 35]"#)
        );
        delete_database(&config).unwrap();
    }

    #[test]
    fn aggregates_and_with() {
        let (config, db) = fixture("query-test-aggregates");
        assert_eq!(run(&db, "[:find (count ?e) . :where [?e :name]]"), Value::Integer(3));
        assert_eq!(run(&db, "[:find (sum ?a) . :where [?e :age ?a]]"), Value::Integer(90));
        assert_eq!(run(&db, "[:find (max ?a) . :where [_ :age ?a]]"), Value::Integer(35));
        delete_database(&config).unwrap();
    }

    #[test]
    fn inputs_and_functions() {
        let (config, db) = fixture("query-test-inputs");
        let result = query(
            &edn("[:find ?n ?next :in $ [?n ...] :where [?e :name ?n] [?e :age ?a] [(+ ?a 1) ?next]]"),
            vec![QueryInput::Db(db.clone()), QueryInput::Value(edn(r#"["Alice" "Bob"]"#))],
        )
        .unwrap();
        assert_eq!(result, edn(r#"#{["Alice" 31] ["Bob" 26]}"#));

        let keyed = run(&db, "[:find ?n ?a :keys name age :where [?e :name ?n] [?e :age ?a] [(= ?a 25)]]");
        assert_eq!(keyed, edn(r#"#{{:name "Bob" :age 25}}"#));

        assert!(query(&edn("[:find ?n :in $ ?x :where [?e :name ?n]]"), vec![QueryInput::Db(db)]).is_err());
        delete_database(&config).unwrap();
    }

    #[test]
    fn negation_and_disjunction() {
        let (config, db) = fixture("query-test-not-or");
        assert_eq!(
            run(&db, "[:find ?n :where [?e :name ?n] (not [?e :friend _])]"),
            edn(r#"#{["Carol"]}"#)
        );
        assert_eq!(
            run(&db, r#"[:find ?n :where [?e :name ?n] (or [?e :age 25] [?e :age 35])]"#),
            edn(r#"#{["Bob"] ["Carol"]}"#)
        );
        assert_eq!(
            run(&db, "[:find ?n :where [?e :name ?n] (not-join [?e] [?x :friend ?e])]"),
            edn(r#"#{["Alice"]}"#)
        );
        delete_database(&config).unwrap();
    }

    #[test]
    fn pull_in_find_and_relation_sources() {
        let (config, db) = fixture("query-test-pull");
        let result = run(&db, "[:find (pull ?e [:name {:friend [:name]}]) . :where [?e :name \"Alice\"]]");
        assert_eq!(result, edn(r#"{:name "Alice" :friend [{:name "Bob"}]}"#));

        let tuples = query(
            &edn("[:find ?n :in $ $ages :where [?e :name ?n] [$ages ?n 30]]"),
            vec![
                QueryInput::Db(db),
                QueryInput::Value(edn(r#"[["Alice" 30] ["Bob" 31]]"#)),
            ],
        )
        .unwrap();
        assert_eq!(tuples, edn(r#"#{["Alice"]}"#));
        delete_database(&config).unwrap();
    }

    #[test]
    fn get_else_and_missing() {
        let (config, db) = fixture("query-test-get-else");
        assert_eq!(
            run(&db, "[:find ?n :where [?e :name ?n] [(missing? $ ?e :friend)]]"),
            edn(r#"#{["Carol"]}"#)
        );
        assert_eq!(
            run(&db, "[:find ?x . :where [?e :name \"Carol\"] [(get-else $ ?e :friend 0) ?x]]"),
            Value::Integer(0)
        );
        delete_database(&config).unwrap();
    }

    #[test]
    fn unbound_find_variable_is_an_error() {
        let (config, db) = fixture("query-test-unbound");
        assert!(query(&edn("[:find ?x :where [?e :name ?n]]"), vec![QueryInput::Db(db)]).is_err());
        delete_database(&config).unwrap();
    }
}
