//! Database configuration.
//!
//! A configuration names a store and fixes the two behavioural switches
//! that are written into the store at creation time:
//!
//! ```text
//! {:store {:backend :memory :id "orders"}   ; or {:backend :file :path "/var/db/orders"}
//!  :schema-flexibility :write               ; :write (strict) or :read (anything goes)
//!  :keep-history? true                      ; enables history / as-of / since views
//!  :initial-tx [...]}                       ; transacted right after creation
//! ```

use std::fmt;
use std::path::PathBuf;

use chronik_codec::Value;

use crate::error::{CoreError, CoreResult};

/// Identity used for `:memory` stores when the configuration names none.
pub const DEFAULT_MEMORY_ID: &str = "default";

/// Where a database lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Backend {
    /// Process-wide in-memory store keyed by id.
    Memory {
        /// Storage identity.
        id: String,
    },
    /// Directory on disk holding `LOG` and `LOCK`.
    File {
        /// Store directory.
        path: PathBuf,
    },
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Backend::Memory { id } => write!(f, "memory:{id}"),
            Backend::File { path } => write!(f, "file:{}", path.display()),
        }
    }
}

/// How strictly transactions are checked against the schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SchemaFlexibility {
    /// Attributes must be declared and values must match their type.
    #[default]
    Write,
    /// Any attribute and value is accepted.
    Read,
}

impl SchemaFlexibility {
    /// Keyword name without the colon.
    pub const fn name(self) -> &'static str {
        match self {
            SchemaFlexibility::Write => "write",
            SchemaFlexibility::Read => "read",
        }
    }
}

/// Configuration for creating or connecting to a database.
#[derive(Debug, Clone, PartialEq)]
pub struct DatabaseConfig {
    /// Store location.
    pub backend: Backend,
    /// Schema checking mode.
    pub schema_flexibility: SchemaFlexibility,
    /// Whether retracted facts are kept for temporal views.
    pub keep_history: bool,
    /// Transaction data applied right after creation.
    pub initial_tx: Option<Value>,
}

impl DatabaseConfig {
    /// Configuration for an in-memory store with default settings.
    #[must_use]
    pub fn memory(id: impl Into<String>) -> Self {
        Self::with_backend(Backend::Memory { id: id.into() })
    }

    /// Configuration for a file store with default settings.
    #[must_use]
    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self::with_backend(Backend::File { path: path.into() })
    }

    fn with_backend(backend: Backend) -> Self {
        Self {
            backend,
            schema_flexibility: SchemaFlexibility::Write,
            keep_history: true,
            initial_tx: None,
        }
    }

    /// Sets the schema flexibility.
    #[must_use]
    pub fn schema_flexibility(mut self, value: SchemaFlexibility) -> Self {
        self.schema_flexibility = value;
        self
    }

    /// Sets history retention.
    #[must_use]
    pub fn keep_history(mut self, value: bool) -> Self {
        self.keep_history = value;
        self
    }

    /// Sets the initial transaction.
    #[must_use]
    pub fn initial_tx(mut self, tx_data: Value) -> Self {
        self.initial_tx = Some(tx_data);
        self
    }

    /// Builds a configuration from its EDN map form.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidConfig`] naming the offending key.
    pub fn from_value(value: &Value) -> CoreResult<Self> {
        if value.as_map().is_none() {
            return Err(CoreError::invalid_config(
                "config",
                format!("expected a map, found {}", value.type_name()),
            ));
        }

        let backend = match value.get_keyword("store") {
            None | Some(Value::Null) => Backend::Memory {
                id: DEFAULT_MEMORY_ID.to_string(),
            },
            Some(store) => parse_store(store)?,
        };

        let schema_flexibility = match value.get_keyword("schema-flexibility") {
            None | Some(Value::Null) => SchemaFlexibility::Write,
            Some(Value::Keyword(k)) if k == "write" => SchemaFlexibility::Write,
            Some(Value::Keyword(k)) if k == "read" => SchemaFlexibility::Read,
            Some(other) => {
                return Err(CoreError::invalid_config(
                    ":schema-flexibility",
                    format!("expected :write or :read, found {other}"),
                ))
            }
        };

        let keep_history = match value.get_keyword("keep-history?") {
            None | Some(Value::Null) => true,
            Some(Value::Bool(b)) => *b,
            Some(other) => {
                return Err(CoreError::invalid_config(
                    ":keep-history?",
                    format!("expected a boolean, found {other}"),
                ))
            }
        };

        let initial_tx = match value.get_keyword("initial-tx") {
            None | Some(Value::Null) => None,
            Some(tx @ (Value::Array(_) | Value::Set(_))) => Some(tx.clone()),
            Some(other) => {
                return Err(CoreError::invalid_config(
                    ":initial-tx",
                    format!("expected a vector of transaction forms, found {}", other.type_name()),
                ))
            }
        };

        Ok(Self {
            backend,
            schema_flexibility,
            keep_history,
            initial_tx,
        })
    }

    /// Renders the configuration back to its map form.
    ///
    /// The initial transaction is omitted: it is applied once and is not
    /// part of the store's identity.
    pub fn to_value(&self) -> Value {
        let store = match &self.backend {
            Backend::Memory { id } => Value::map(vec![
                (Value::keyword("backend"), Value::keyword("memory")),
                (Value::keyword("id"), Value::text(id.clone())),
            ]),
            Backend::File { path } => Value::map(vec![
                (Value::keyword("backend"), Value::keyword("file")),
                (
                    Value::keyword("path"),
                    Value::text(path.to_string_lossy().into_owned()),
                ),
            ]),
        };
        Value::map(vec![
            (Value::keyword("store"), store),
            (
                Value::keyword("schema-flexibility"),
                Value::keyword(self.schema_flexibility.name()),
            ),
            (Value::keyword("keep-history?"), Value::Bool(self.keep_history)),
        ])
    }
}

fn parse_store(store: &Value) -> CoreResult<Backend> {
    if store.as_map().is_none() {
        return Err(CoreError::invalid_config(
            ":store",
            format!("expected a map, found {}", store.type_name()),
        ));
    }

    let backend = match store.get_keyword("backend") {
        None | Some(Value::Null) => "memory",
        Some(Value::Keyword(k)) => k.as_str(),
        Some(other) => {
            return Err(CoreError::invalid_config(
                ":backend",
                format!("expected a keyword, found {other}"),
            ))
        }
    };

    match backend {
        "memory" | "mem" => {
            let id = match store.get_keyword("id") {
                Some(Value::Text(s)) => s.clone(),
                Some(Value::Uuid(u)) => u.to_string(),
                Some(Value::Keyword(k)) => k.clone(),
                Some(Value::Integer(n)) => n.to_string(),
                None | Some(Value::Null) => {
                    return Err(CoreError::invalid_config(
                        ":id",
                        "memory stores require an :id",
                    ))
                }
                Some(other) => {
                    return Err(CoreError::invalid_config(
                        ":id",
                        format!("expected a string or uuid, found {other}"),
                    ))
                }
            };
            Ok(Backend::Memory { id })
        }
        "file" => match store.get_keyword("path") {
            Some(Value::Text(p)) if !p.is_empty() => Ok(Backend::File {
                path: PathBuf::from(p),
            }),
            _ => Err(CoreError::invalid_config(
                ":path",
                "file stores require a non-empty :path string",
            )),
        },
        other => Err(CoreError::invalid_config(
            ":backend",
            format!("unknown backend :{other}"),
        )),
    }
}
