//! End-to-end tests through the exported C entry points.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use chronik_codec::{from_edn_str, Value};
use chronik_ffi::*;
use std::cell::RefCell;
use std::ffi::{c_char, CStr, CString};

thread_local! {
    static OUTPUT: RefCell<Vec<String>> = const { RefCell::new(Vec::new()) };
}

unsafe extern "C" fn capture(output: *const c_char) {
    let text = CStr::from_ptr(output).to_string_lossy().into_owned();
    OUTPUT.with(|o| o.borrow_mut().push(text));
}

fn cs(s: &str) -> CString {
    CString::new(s).unwrap()
}

fn take_one() -> String {
    let mut all = OUTPUT.with(|o| std::mem::take(&mut *o.borrow_mut()));
    assert_eq!(all.len(), 1, "callback must fire exactly once: {all:?}");
    all.remove(0)
}

fn memory_config(id: &str) -> String {
    format!(r#"{{:store {{:backend :memory :id "gateway-{id}"}} :schema-flexibility :write}}"#)
}

const SCHEMA: &str = r"[{:db/ident :name :db/valueType :db.type/string :db/cardinality :db.cardinality/one :db/unique :db.unique/identity}
                        {:db/ident :age :db/valueType :db.type/long :db/cardinality :db.cardinality/one}
                        {:db/ident :score :db/valueType :db.type/double :db/cardinality :db.cardinality/one}]";

struct Gateway {
    ctx: *mut ChronikContext,
}

impl Gateway {
    fn new() -> Self {
        Self {
            ctx: chronik_context_create(),
        }
    }

    fn create(&self, config: &str) -> String {
        let (config, out) = (cs(config), cs("edn"));
        unsafe { chronik_create_database(self.ctx, config.as_ptr(), out.as_ptr(), Some(capture)) };
        take_one()
    }

    fn delete(&self, config: &str) -> String {
        let (config, out) = (cs(config), cs("edn"));
        unsafe { chronik_delete_database(self.ctx, config.as_ptr(), out.as_ptr(), Some(capture)) };
        take_one()
    }

    fn exists(&self, config: &str) -> String {
        let (config, out) = (cs(config), cs("edn"));
        unsafe { chronik_database_exists(self.ctx, config.as_ptr(), out.as_ptr(), Some(capture)) };
        take_one()
    }

    fn fresh(&self, config: &str) {
        self.delete(config);
        assert_eq!(self.create(config), r#""""#);
    }

    fn transact(&self, config: &str, format: &str, data: &str) -> String {
        let (config, format, data, out) = (cs(config), cs(format), cs(data), cs("edn"));
        unsafe {
            chronik_transact(
                self.ctx,
                config.as_ptr(),
                format.as_ptr(),
                data.as_ptr(),
                out.as_ptr(),
                Some(capture),
            );
        }
        take_one()
    }

    /// Transacts and returns the transaction instant.
    fn transact_at(&self, config: &str, format: &str, data: &str) -> i64 {
        let meta = self.transact(config, format, data);
        let meta = from_edn_str(&meta).unwrap_or_else(|e| panic!("{meta}: {e}"));
        match meta.get_keyword("db/txInstant") {
            Some(Value::Instant(ms)) => *ms,
            other => panic!("no tx instant in {meta}: {other:?}"),
        }
    }

    fn query(&self, query: &str, inputs: &[(&str, &str)], output: &str) -> String {
        let query = cs(query);
        let formats: Vec<CString> = inputs.iter().map(|(f, _)| cs(f)).collect();
        let payloads: Vec<CString> = inputs.iter().map(|(_, p)| cs(p)).collect();
        let format_ptrs: Vec<*const c_char> = formats.iter().map(|s| s.as_ptr()).collect();
        let payload_ptrs: Vec<*const c_char> = payloads.iter().map(|s| s.as_ptr()).collect();
        let out = cs(output);
        unsafe {
            chronik_query(
                self.ctx,
                query.as_ptr(),
                inputs.len() as i64,
                format_ptrs.as_ptr(),
                payload_ptrs.as_ptr(),
                out.as_ptr(),
                Some(capture),
            );
        }
        take_one()
    }

    fn pull(&self, input: (&str, &str), selector: &str, eid: i64) -> String {
        let (format, payload, selector, out) = (cs(input.0), cs(input.1), cs(selector), cs("edn"));
        unsafe {
            chronik_pull(
                self.ctx,
                format.as_ptr(),
                payload.as_ptr(),
                selector.as_ptr(),
                eid,
                out.as_ptr(),
                Some(capture),
            );
        }
        take_one()
    }

    fn datoms(&self, input: (&str, &str), index: &str) -> String {
        let (format, payload, index, out) = (cs(input.0), cs(input.1), cs(index), cs("edn"));
        unsafe {
            chronik_datoms(
                self.ctx,
                format.as_ptr(),
                payload.as_ptr(),
                index.as_ptr(),
                out.as_ptr(),
                Some(capture),
            );
        }
        take_one()
    }

    fn gc(&self, config: &str, before: i64) -> String {
        let (config, out) = (cs(config), cs("edn"));
        unsafe { chronik_gc_storage(self.ctx, config.as_ptr(), before, out.as_ptr(), Some(capture)) };
        take_one()
    }

    fn last_error(&self) -> Option<String> {
        let ptr = unsafe { chronik_context_last_error(self.ctx) };
        if ptr.is_null() {
            None
        } else {
            Some(unsafe { CStr::from_ptr(ptr) }.to_string_lossy().into_owned())
        }
    }
}

impl Drop for Gateway {
    fn drop(&mut self) {
        unsafe { chronik_context_destroy(self.ctx) };
    }
}

fn eid_of(gw: &Gateway, config: &str, name: &str) -> i64 {
    let found = gw.query(
        &format!(r#"[:find ?e . :where [?e :name "{name}"]]"#),
        &[("db", config)],
        "edn",
    );
    found.parse().unwrap_or_else(|_| panic!("no entity for {name}: {found}"))
}

#[test]
fn alice_end_to_end() {
    let gw = Gateway::new();
    let config = memory_config("alice");
    gw.fresh(&config);
    gw.transact(&config, "edn", SCHEMA);
    let t0 = gw.transact_at(&config, "json", r#"[{"name": "Alice", "age": 30}]"#);

    let query = "[:find ?n :where [?e :name ?n]]";
    assert_eq!(gw.query(query, &[("db", &config)], "edn"), r#"#{["Alice"]}"#);
    assert_eq!(
        gw.query(query, &[(&format!("asof:{}", t0 - 1), &config)], "edn"),
        "#{}"
    );
    assert_eq!(
        gw.query(query, &[(&format!("asof:{t0}"), &config)], "edn"),
        r#"#{["Alice"]}"#
    );
}

#[test]
fn lifecycle() {
    let gw = Gateway::new();
    let config = memory_config("lifecycle");
    gw.delete(&config);
    assert_eq!(gw.exists(&config), "false");
    assert_eq!(gw.create(&config), r#""""#);
    assert_eq!(gw.exists(&config), "true");

    let again = gw.create(&config);
    assert!(again.starts_with("exception:EngineError"), "{again}");

    assert_eq!(gw.delete(&config), r#""""#);
    assert_eq!(gw.exists(&config), "false");
    assert_eq!(gw.delete(&config), r#""""#);
}

#[test]
fn file_backed_database() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("db");
    let config = format!(r#"{{:store {{:backend :file :path "{}"}}}}"#, path.display());
    let gw = Gateway::new();

    gw.create(&config);
    assert_eq!(gw.exists(&config), "true");
    gw.transact(&config, "edn", SCHEMA);
    gw.transact(&config, "edn", r#"[{:name "Dora" :age 51}]"#);
    assert_eq!(
        gw.query("[:find ?a . :where [_ :age ?a]]", &[("db", &config)], "edn"),
        "51"
    );
    gw.delete(&config);
    assert_eq!(gw.exists(&config), "false");
}

#[test]
fn unsupported_formats_yield_sentinels() {
    let gw = Gateway::new();
    let config = memory_config("xml");
    gw.fresh(&config);

    let out = gw.query("[:find ?e :where [?e :name]]", &[("db", &config)], "xml");
    assert!(out.starts_with("exception:UnsupportedFormatError"), "{out}");
    assert!(out.contains("\nStacktrace:\n"));
    assert_eq!(gw.last_error().as_deref(), Some(out.as_str()));

    let out = gw.query("[:find ?e :where [?e :name]]", &[("xml", &config)], "edn");
    assert!(out.starts_with("exception:UnsupportedFormatError"), "{out}");

    let out = gw.query("[:find ?e :where [?e :name]]", &[("asof:soon", &config)], "edn");
    assert!(out.starts_with("exception:FormatError"), "{out}");

    let out = gw.query("[:find ?e :where", &[("db", &config)], "edn");
    assert!(out.starts_with("exception:ParseError"), "{out}");

    gw.exists(&config);
    assert_eq!(gw.last_error(), None);
}

#[test]
fn integer_overflow_is_an_engine_error() {
    let gw = Gateway::new();
    let min = i64::MIN.to_string();
    for op in ["quot", "rem", "mod", "/"] {
        let query = format!("[:find ?r . :in ?x ?y :where [({op} ?x ?y) ?r]]");
        let out = gw.query(&query, &[("edn", &min), ("edn", "-1")], "edn");
        assert!(out.starts_with("exception:EngineError"), "{op}: {out}");
        assert!(out.contains("integer overflow"), "{op}: {out}");
    }
    let out = gw.query("[:find ?r . :in ?x ?y :where [(quot ?x ?y) ?r]]", &[("edn", "-7"), ("edn", "2")], "edn");
    assert_eq!(out, "-3");
}

#[test]
fn keywords_edn_cannot_spell_are_refused() {
    let gw = Gateway::new();
    let echo = "[:find ?o . :in ?k :where [(identity ?k) ?o]]";

    let out = gw.query(echo, &[("json", r#"":a b""#)], "json");
    assert_eq!(out, r#"":a b""#);

    let out = gw.query(echo, &[("json", r#"":a b""#)], "edn");
    assert!(out.starts_with("exception:FormatError"), "{out}");

    let out = gw.query(echo, &[("json", r#"":a/b""#)], "edn");
    assert_eq!(from_edn_str(&out).unwrap(), Value::keyword("a/b"));
}

#[test]
fn json_schema_with_bare_strings() {
    let gw = Gateway::new();
    let config = memory_config("json-schema");
    gw.fresh(&config);
    let out = gw.transact(
        &config,
        "json",
        r#"[{"db/ident": "name", "db/valueType": "db.type/string",
             "db/cardinality": "db.cardinality/one", "db/unique": "db.unique/identity"}]"#,
    );
    assert!(!out.starts_with("exception:"), "{out}");
    gw.transact(&config, "json", r#"[{"name": "Dee"}]"#);

    let out = gw.query("[:find ?n . :where [_ :name ?n]]", &[("db", &config)], "edn");
    assert_eq!(out, r#""Dee""#);
}

#[test]
fn json_coercion_follows_schema() {
    let gw = Gateway::new();
    let config = memory_config("coercion");
    gw.fresh(&config);
    gw.transact(&config, "edn", SCHEMA);
    gw.transact(&config, "json", r#"[{"name": "Ann", "age": 30, "score": 30}]"#);

    let eid = eid_of(&gw, &config, "Ann");
    let pulled = from_edn_str(&gw.pull(("db", &config), "[:age :score]", eid)).unwrap();
    assert_eq!(pulled.get_keyword("age"), Some(&Value::Integer(30)));
    assert_eq!(pulled.get_keyword("score"), Some(&Value::Float(30.0)));

    // EDN is passed through untouched, so the strict schema rejects it.
    let out = gw.transact(&config, "edn", r#"[{:name "Ben" :score 30}]"#);
    assert!(out.starts_with("exception:EngineError"), "{out}");
}

#[test]
fn asof_and_since_are_disjoint() {
    let gw = Gateway::new();
    let config = memory_config("split");
    gw.fresh(&config);
    gw.transact(&config, "edn", SCHEMA);
    let t1 = gw.transact_at(&config, "edn", r#"[{:name "Early"}]"#);
    gw.transact_at(&config, "edn", r#"[{:name "Late"}]"#);

    let query = "[:find ?n :where [?e :name ?n]]";
    let before = gw.query(query, &[(&format!("asof:{t1}"), &config)], "edn");
    let after = gw.query(query, &[(&format!("since:{t1}"), &config)], "edn");
    assert_eq!(before, r#"#{["Early"]}"#);
    assert_eq!(after, r#"#{["Late"]}"#);

    let union = gw.query(query, &[("db", &config)], "edn");
    assert_eq!(union, r#"#{["Early"] ["Late"]}"#);
}

#[test]
fn gc_is_idempotent() {
    let gw = Gateway::new();
    let config = memory_config("gc");
    gw.fresh(&config);
    gw.transact(&config, "edn", SCHEMA);
    gw.transact(&config, "edn", r#"[{:name "Gus" :age 1}]"#);
    gw.transact(&config, "edn", r#"[{:name "Gus" :age 2}]"#);
    let last = gw.transact_at(&config, "edn", r#"[{:name "Gus" :age 3}]"#);

    let history_before = gw.datoms(("history", &config), ":eavt");
    let first = from_edn_str(&gw.gc(&config, last + 1)).unwrap();
    assert!(matches!(first.get_keyword("purged"), Some(Value::Integer(n)) if *n > 0));
    let history_after = gw.datoms(("history", &config), ":eavt");
    assert_ne!(history_before, history_after);

    let second = from_edn_str(&gw.gc(&config, last + 1)).unwrap();
    assert_eq!(second.get_keyword("purged"), Some(&Value::Integer(0)));
    assert_eq!(gw.datoms(("history", &config), ":eavt"), history_after);

    let eid = eid_of(&gw, &config, "Gus");
    let current = from_edn_str(&gw.pull(("db", &config), "[:age]", eid)).unwrap();
    assert_eq!(current.get_keyword("age"), Some(&Value::Integer(3)));
}

#[test]
fn query_binds_scalar_inputs_and_cbor_output() {
    let gw = Gateway::new();
    let config = memory_config("inputs");
    gw.fresh(&config);
    gw.transact(&config, "edn", SCHEMA);
    gw.transact(&config, "edn", r#"[{:name "Ivy" :age 7} {:name "Jon" :age 9}]"#);

    let query = "[:find ?a . :in $ ?n :where [?e :name ?n] [?e :age ?a]]";
    let out = gw.query(query, &[("db", &config), ("json", r#""Jon""#)], "edn");
    assert_eq!(out, "9");

    let cbor = gw.query(query, &[("db", &config), ("edn", r#""Ivy""#)], "cbor");
    let bytes = STANDARD.decode(cbor).unwrap();
    assert_eq!(chronik_codec::from_cbor(&bytes).unwrap(), Value::Integer(7));

    let json = gw.query(
        "[:find ?n ?a :where [?e :name ?n] [?e :age ?a]]",
        &[("db", &config)],
        "json",
    );
    assert_eq!(json, r#"["!set",[["Ivy",7],["Jon",9]]]"#);
}

#[test]
fn operations_are_listed() {
    let gw = Gateway::new();
    let out = cs("edn");
    unsafe { chronik_operations(gw.ctx, out.as_ptr(), Some(capture)) };
    let names = from_edn_str(&take_one()).unwrap();
    let names = names.as_seq().unwrap();
    assert_eq!(names.len(), Operation::ALL.len());
    assert!(names.contains(&Value::text("gc_storage")));
}

#[test]
fn null_arguments_are_reported() {
    let out = cs("edn");
    let config = cs(&memory_config("nulls"));
    unsafe {
        chronik_database_exists(std::ptr::null_mut(), config.as_ptr(), out.as_ptr(), Some(capture));
    }
    let text = take_one();
    assert!(text.starts_with("exception:InvalidArgument"), "{text}");

    let gw = Gateway::new();
    unsafe { chronik_database_exists(gw.ctx, std::ptr::null(), out.as_ptr(), Some(capture)) };
    let text = take_one();
    assert!(text.starts_with("exception:InvalidArgument"), "{text}");

    // No callback: the call still completes without delivering anything.
    unsafe { chronik_database_exists(gw.ctx, config.as_ptr(), out.as_ptr(), None) };
    assert!(OUTPUT.with(|o| o.borrow().is_empty()));
}
