//! Database lifecycle and connections.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chronik_codec::Value;
use tracing::{debug, info, warn};

use crate::config::DatabaseConfig;
use crate::db::{Db, DbState};
use crate::error::CoreResult;
use crate::log::{decode_frames, encode_header, TxRecord};
use crate::schema::DB_ID;
use crate::store::Store;
use crate::transact::prepare;
use crate::types::{Datom, EntityId, TxId};

/// Creates a database and applies its `:initial-tx`, if any.
///
/// If the initial transaction fails the new store is removed again and
/// the transaction error is returned.
///
/// # Errors
///
/// Returns [`CoreError::DatabaseExists`](crate::CoreError::DatabaseExists)
/// if a store already exists at the configured location.
pub fn create_database(config: &DatabaseConfig) -> CoreResult<()> {
    let header = encode_header(config)?;
    Store::create(&config.backend, &header)?;
    info!(store = %config.backend, "created database");

    if let Some(tx_data) = &config.initial_tx {
        let applied = connect(config).and_then(|mut conn| conn.transact(tx_data));
        if let Err(err) = applied {
            warn!(store = %config.backend, error = %err, "initial transaction failed");
            if let Err(cleanup) = Store::delete(&config.backend) {
                warn!(store = %config.backend, error = %cleanup, "failed to remove store");
            }
            return Err(err);
        }
    }
    Ok(())
}

/// Deletes a database. Deleting a missing database is a no-op.
///
/// # Errors
///
/// Returns an error if the store is locked or cannot be removed.
pub fn delete_database(config: &DatabaseConfig) -> CoreResult<()> {
    let existed = Store::delete(&config.backend)?;
    info!(store = %config.backend, existed, "deleted database");
    Ok(())
}

/// Whether a database exists at the configured location.
///
/// # Errors
///
/// Currently infallible; kept fallible for symmetry with the other
/// lifecycle calls.
pub fn database_exists(config: &DatabaseConfig) -> CoreResult<bool> {
    Ok(Store::exists(&config.backend))
}

/// Connects to an existing database.
///
/// Schema flexibility and history retention come from the stored
/// configuration, not from `config`.
///
/// # Errors
///
/// Returns [`CoreError::DatabaseNotFound`](crate::CoreError::DatabaseNotFound)
/// if no store exists, or a log error if the store cannot be replayed.
pub fn connect(config: &DatabaseConfig) -> CoreResult<Connection> {
    let store = Store::open(&config.backend)?;
    let (frames, log_size) = store.read()?;
    let (mut stored, state) = replay(&frames)?;
    stored.backend = config.backend.clone();
    debug!(
        store = %stored.backend,
        max_tx = state.max_tx,
        datoms = state.facts.len(),
        "connected"
    );
    Ok(Connection {
        config: stored,
        store,
        state: Arc::new(state),
        log_size,
    })
}

fn replay(frames: &[Vec<u8>]) -> CoreResult<(DatabaseConfig, DbState)> {
    let (config, records) = decode_frames(frames)?;
    let mut state = DbState::new(config.schema_flexibility, config.keep_history);
    for record in &records {
        state.apply(record)?;
    }
    Ok((config, state))
}

fn next_instant(last: Option<i64>) -> i64 {
    let now = chrono::Utc::now().timestamp_millis();
    match last {
        Some(last) if now <= last => last + 1,
        _ => now,
    }
}

/// Outcome of a transaction.
#[derive(Debug, Clone)]
pub struct TxReport {
    /// Database before the transaction.
    pub db_before: Db,
    /// Database after the transaction.
    pub db_after: Db,
    /// Datoms the transaction asserted and retracted.
    pub tx_data: Vec<Datom>,
    /// User tempids to entity ids, plus `:db/current-tx`.
    pub tempids: Value,
    /// `{:db/txInstant .. :db/id tx}` plus attributes of the tx entity.
    pub tx_meta: Value,
}

/// A connection to one database. Holds the replayed state of the log and
/// catches up with writes made through other connections on `transact`.
#[derive(Debug)]
pub struct Connection {
    config: DatabaseConfig,
    store: Store,
    state: Arc<DbState>,
    log_size: u64,
}

impl Connection {
    /// Stored configuration of the connected database.
    pub fn config(&self) -> &DatabaseConfig {
        &self.config
    }

    /// Current database value.
    pub fn db(&self) -> Db {
        Db::current(Arc::clone(&self.state))
    }

    /// Transacts `tx_data`.
    ///
    /// # Errors
    ///
    /// Returns the schema or transaction error that rejected `tx_data`;
    /// nothing is written in that case.
    pub fn transact(&mut self, tx_data: &Value) -> CoreResult<TxReport> {
        let (base, prepared, log_size) = self.store.write(|log| {
            let size = log.backend().size()?;
            let base = if size == self.log_size {
                Arc::clone(&self.state)
            } else {
                debug!(store = %self.config.backend, "log changed, replaying");
                Arc::new(replay(&log.read_frames()?)?.1)
            };
            let tx = base.max_tx + 1;
            let prepared = prepare(&base, tx_data, tx, next_instant(base.last_instant()))?;
            log.append_frame(&prepared.record.encode()?)?;
            Ok((base, prepared, log.backend().size()?))
        })?;

        let tx = prepared.record.tx;
        info!(
            store = %self.config.backend,
            tx,
            datoms = prepared.record.datoms.len(),
            "transacted"
        );
        self.state = Arc::new(prepared.state);
        self.log_size = log_size;

        let db_after = self.db();
        let tx_meta = tx_meta(&db_after, tx)?;
        Ok(TxReport {
            db_before: Db::current(base),
            db_after,
            tx_data: prepared.record.datoms,
            tempids: prepared.tempids,
            tx_meta,
        })
    }

    /// Permanently removes retracted facts, together with their
    /// assertions, whose retraction happened strictly before `before`
    /// (epoch ms). Returns `{:purged n :before #inst ..}` where `n` counts
    /// removed datoms. Running it again with the same `before` purges
    /// nothing.
    ///
    /// # Errors
    ///
    /// Returns an error if the log cannot be read or rewritten.
    pub fn gc_storage(&mut self, before: i64) -> CoreResult<Value> {
        let (state, purged, log_size) = self.store.write(|log| {
            let frames = log.read_frames()?;
            let (_, records) = decode_frames(&frames)?;
            let (kept, purged) = purge(records, before);
            if purged > 0 {
                let mut rewritten = Vec::with_capacity(kept.len() + 1);
                rewritten.extend(frames.first().cloned());
                for record in &kept {
                    rewritten.push(record.encode()?);
                }
                log.rewrite(&rewritten)?;
            }
            let (_, state) = replay(&log.read_frames()?)?;
            Ok((state, purged, log.backend().size()?))
        })?;

        info!(store = %self.config.backend, before, purged, "garbage collected");
        self.state = Arc::new(state);
        self.log_size = log_size;
        Ok(Value::map(vec![
            (
                Value::keyword("purged"),
                Value::Integer(i64::try_from(purged).unwrap_or(i64::MAX)),
            ),
            (Value::keyword("before"), Value::Instant(before)),
        ]))
    }
}

fn tx_meta(db: &Db, tx: TxId) -> CoreResult<Value> {
    let entity = db.entity(&Value::Integer(tx))?;
    let mut pairs = entity.as_map().map(<[_]>::to_vec).unwrap_or_default();
    pairs.push((Value::keyword(DB_ID), Value::Integer(tx)));
    Ok(Value::map(pairs))
}

/// Drops each retraction made before `before` along with the assertion
/// it ended. Returns the remaining records and the number of datoms
/// dropped.
fn purge(records: Vec<TxRecord>, before: i64) -> (Vec<TxRecord>, usize) {
    let mut live: HashMap<(EntityId, String, Value), (usize, usize)> = HashMap::new();
    let mut dropped: HashSet<(usize, usize)> = HashSet::new();

    for (r, record) in records.iter().enumerate() {
        for (d, datom) in record.datoms.iter().enumerate() {
            let key = (datom.e, datom.a.clone(), datom.v.clone());
            if datom.added {
                live.insert(key, (r, d));
                continue;
            }
            let asserted = live.remove(&key);
            if record.instant < before {
                dropped.insert((r, d));
                dropped.extend(asserted);
            }
        }
    }

    let purged = dropped.len();
    let kept = records
        .into_iter()
        .enumerate()
        .map(|(r, record)| TxRecord {
            datoms: record
                .datoms
                .into_iter()
                .enumerate()
                .filter(|(d, _)| !dropped.contains(&(r, *d)))
                .map(|(_, datom)| datom)
                .collect(),
            ..record
        })
        .collect();
    (kept, purged)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CoreError;
    use crate::types::Index;

    fn kw(name: &str) -> Value {
        Value::keyword(name)
    }

    fn schema() -> Value {
        Value::Array(vec![
            Value::map(vec![
                (kw("db/ident"), kw("name")),
                (kw("db/valueType"), kw("db.type/string")),
                (kw("db/unique"), kw("db.unique/identity")),
            ]),
            Value::map(vec![
                (kw("db/ident"), kw("age")),
                (kw("db/valueType"), kw("db.type/long")),
                (kw("db/cardinality"), kw("db.cardinality/one")),
            ]),
        ])
    }

    fn alice(age: i64) -> Value {
        Value::Array(vec![Value::map(vec![
            (kw("db/id"), Value::Integer(-1)),
            (kw("name"), Value::text("Alice")),
            (kw("age"), Value::Integer(age)),
        ])])
    }

    #[test]
    fn create_connect_transact() {
        let config = DatabaseConfig::memory("database-test-basic").initial_tx(schema());
        create_database(&config).unwrap();
        assert!(database_exists(&config).unwrap());

        let mut conn = connect(&config).unwrap();
        let report = conn.transact(&alice(30)).unwrap();
        assert!(report.tx_meta.get_keyword("db/txInstant").is_some());
        assert_eq!(
            report.tx_meta.get_keyword("db/id"),
            Some(&Value::Integer(report.db_after.basis_tx()))
        );
        assert!(report.tempids.get(&Value::Integer(-1)).is_some());
        assert_eq!(report.db_before.basis_tx() + 1, report.db_after.basis_tx());

        let other = connect(&config).unwrap();
        let names = other.db().datoms(Index::Aevt, &[kw("name")]).unwrap();
        assert_eq!(names.len(), 1);

        delete_database(&config).unwrap();
        assert!(!database_exists(&config).unwrap());
        delete_database(&config).unwrap();
    }

    #[test]
    fn failing_initial_tx_removes_store() {
        let config = DatabaseConfig::memory("database-test-bad-initial")
            .initial_tx(Value::Array(vec![Value::map(vec![(kw("undeclared"), Value::Integer(1))])]));
        assert!(create_database(&config).is_err());
        assert!(!database_exists(&config).unwrap());
    }

    #[test]
    fn connections_catch_up() {
        let config = DatabaseConfig::memory("database-test-catch-up").initial_tx(schema());
        create_database(&config).unwrap();
        let mut first = connect(&config).unwrap();
        let mut second = connect(&config).unwrap();
        first.transact(&alice(30)).unwrap();
        let report = second.transact(&alice(31)).unwrap();
        let ages = report.db_after.datoms(Index::Aevt, &[kw("age")]).unwrap();
        assert_eq!(ages.len(), 1);
        assert_eq!(ages[0].v, Value::Integer(31));
        delete_database(&config).unwrap();
    }

    #[test]
    fn instants_strictly_increase() {
        let config = DatabaseConfig::memory("database-test-instants").initial_tx(schema());
        create_database(&config).unwrap();
        let mut conn = connect(&config).unwrap();
        let mut last = i64::MIN;
        for age in 0..5 {
            let report = conn.transact(&alice(age)).unwrap();
            let Some(Value::Instant(t)) = report.tx_meta.get_keyword("db/txInstant").cloned() else {
                panic!("missing tx instant");
            };
            assert!(t > last);
            last = t;
        }
        delete_database(&config).unwrap();
    }

    #[test]
    fn gc_purges_and_is_idempotent() {
        let config = DatabaseConfig::memory("database-test-gc").initial_tx(schema());
        create_database(&config).unwrap();
        let mut conn = connect(&config).unwrap();
        conn.transact(&alice(30)).unwrap();
        conn.transact(&alice(31)).unwrap();
        let history_before = conn.db().history().unwrap().visible().len();

        let result = conn.gc_storage(i64::MAX).unwrap();
        assert_eq!(result.get_keyword("purged"), Some(&Value::Integer(2)));
        assert_eq!(conn.db().history().unwrap().visible().len(), history_before - 2);

        let again = conn.gc_storage(i64::MAX).unwrap();
        assert_eq!(again.get_keyword("purged"), Some(&Value::Integer(0)));
        let ages = conn.db().datoms(Index::Aevt, &[kw("age")]).unwrap();
        assert_eq!(ages[0].v, Value::Integer(31));
        delete_database(&config).unwrap();
    }

    #[test]
    fn gc_keeps_recent_retractions() {
        let config = DatabaseConfig::memory("database-test-gc-recent").initial_tx(schema());
        create_database(&config).unwrap();
        let mut conn = connect(&config).unwrap();
        conn.transact(&alice(30)).unwrap();
        conn.transact(&alice(31)).unwrap();
        let result = conn.gc_storage(0).unwrap();
        assert_eq!(result.get_keyword("purged"), Some(&Value::Integer(0)));
        delete_database(&config).unwrap();
    }

    #[test]
    fn missing_database() {
        let config = DatabaseConfig::memory("database-test-missing");
        assert!(matches!(
            connect(&config),
            Err(CoreError::DatabaseNotFound { .. })
        ));
    }

    #[test]
    fn file_database_survives_reconnect() {
        let dir = tempfile::tempdir().unwrap();
        let config = DatabaseConfig::file(dir.path().join("db")).initial_tx(schema());
        create_database(&config).unwrap();
        connect(&config).unwrap().transact(&alice(30)).unwrap();

        let conn = connect(&config).unwrap();
        let entity = conn
            .db()
            .entity(&Value::Array(vec![kw("name"), Value::text("Alice")]))
            .unwrap();
        assert_eq!(entity.get_keyword("age"), Some(&Value::Integer(30)));
        delete_database(&config).unwrap();
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;
        use std::sync::atomic::{AtomicUsize, Ordering};

        static NEXT_ID: AtomicUsize = AtomicUsize::new(0);

        fn instant(report: &TxReport) -> i64 {
            match report.tx_meta.get_keyword("db/txInstant") {
                Some(Value::Instant(t)) => *t,
                other => panic!("unexpected tx instant {other:?}"),
            }
        }

        proptest! {
            #![proptest_config(ProptestConfig::with_cases(32))]

            #[test]
            fn as_of_and_since_split_the_present(
                ages in prop::collection::vec(0i64..100, 1..6),
                pivot in 0usize..6,
            ) {
                let id = NEXT_ID.fetch_add(1, Ordering::Relaxed);
                let config = DatabaseConfig::memory(format!("database-prop-{id}")).initial_tx(schema());
                create_database(&config).unwrap();
                let mut conn = connect(&config).unwrap();
                let mut instants = Vec::new();
                for age in &ages {
                    instants.push(instant(&conn.transact(&alice(*age)).unwrap()));
                }
                let t = instants[pivot.min(instants.len() - 1)];
                let db = conn.db();

                let past = db.as_of(t).unwrap().datoms(Index::Eavt, &[]).unwrap();
                let recent = db.since(t).unwrap().datoms(Index::Eavt, &[]).unwrap();
                for datom in &recent {
                    prop_assert!(!past.contains(datom));
                }

                let latest = *instants.last().unwrap();
                let now = db.datoms(Index::Eavt, &[]).unwrap();
                prop_assert_eq!(db.as_of(latest).unwrap().datoms(Index::Eavt, &[]).unwrap(), now.clone());

                let replayed = connect(&config).unwrap().db().datoms(Index::Eavt, &[]).unwrap();
                prop_assert_eq!(replayed, now);
                delete_database(&config).unwrap();
            }
        }
    }
}
