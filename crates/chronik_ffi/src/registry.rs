//! Process-wide operation table.

use crate::dispatch::{self, Request};
use crate::error::{GatewayError, GatewayResult};
use chronik_codec::Value;
use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::fmt;
use tracing::debug;

/// Every operation the gateway exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    /// Create a store.
    CreateDatabase,
    /// Delete a store.
    DeleteDatabase,
    /// Check whether a store exists.
    DatabaseExists,
    /// Apply transaction data.
    Transact,
    /// Run a datalog query.
    Query,
    /// Pull one entity.
    Pull,
    /// Pull several entities.
    PullMany,
    /// Attribute map of one entity.
    Entity,
    /// Datoms of an index.
    Datoms,
    /// Datoms of an index from a starting point.
    SeekDatoms,
    /// AVET datoms of one attribute within a value range.
    IndexRange,
    /// Attribute definitions.
    Schema,
    /// Attributes grouped by property.
    ReverseSchema,
    /// Datom counts.
    Metrics,
    /// Purge old history.
    GcStorage,
}

/// Handler invoked for one operation.
pub(crate) type Handler = fn(Request<'_>) -> GatewayResult<Value>;

/// Builds the handler of `$op`: unpacks its request variant into the typed
/// arguments of `$handler`.
macro_rules! route {
    ($op:ident => $handler:path { $($field:ident),* }) => {
        (|request: Request<'_>| match request {
            Request::$op { $($field),* } => $handler($($field),*),
            other => Err(misrouted(Operation::$op, other.operation())),
        }) as Handler
    };
}

fn misrouted(expected: Operation, got: Operation) -> GatewayError {
    GatewayError::invalid_argument(format!("{expected} handler received a {got} request"))
}

impl Operation {
    /// All operations in export order.
    pub const ALL: [Operation; 15] = [
        Operation::CreateDatabase,
        Operation::DeleteDatabase,
        Operation::DatabaseExists,
        Operation::Transact,
        Operation::Query,
        Operation::Pull,
        Operation::PullMany,
        Operation::Entity,
        Operation::Datoms,
        Operation::SeekDatoms,
        Operation::IndexRange,
        Operation::Schema,
        Operation::ReverseSchema,
        Operation::Metrics,
        Operation::GcStorage,
    ];

    /// Exported symbol name without the `chronik_` prefix.
    pub const fn name(self) -> &'static str {
        match self {
            Operation::CreateDatabase => "create_database",
            Operation::DeleteDatabase => "delete_database",
            Operation::DatabaseExists => "database_exists",
            Operation::Transact => "transact",
            Operation::Query => "query",
            Operation::Pull => "pull",
            Operation::PullMany => "pull_many",
            Operation::Entity => "entity",
            Operation::Datoms => "datoms",
            Operation::SeekDatoms => "seek_datoms",
            Operation::IndexRange => "index_range",
            Operation::Schema => "schema",
            Operation::ReverseSchema => "reverse_schema",
            Operation::Metrics => "metrics",
            Operation::GcStorage => "gc_storage",
        }
    }

    /// Whether the operation writes to the store.
    pub const fn mutates(self) -> bool {
        matches!(
            self,
            Operation::CreateDatabase
                | Operation::DeleteDatabase
                | Operation::Transact
                | Operation::GcStorage
        )
    }

    fn handler(self) -> Handler {
        match self {
            Operation::CreateDatabase => route!(CreateDatabase => dispatch::create_database { config }),
            Operation::DeleteDatabase => route!(DeleteDatabase => dispatch::delete_database { config }),
            Operation::DatabaseExists => route!(DatabaseExists => dispatch::database_exists { config }),
            Operation::Transact => route!(Transact => dispatch::transact { config, tx }),
            Operation::Query => route!(Query => dispatch::query { query, inputs }),
            Operation::Pull => route!(Pull => dispatch::pull { input, selector, eid }),
            Operation::PullMany => route!(PullMany => dispatch::pull_many { input, selector, eids }),
            Operation::Entity => route!(Entity => dispatch::entity { input, eid }),
            Operation::Datoms => route!(Datoms => dispatch::datoms { input, index }),
            Operation::SeekDatoms => route!(SeekDatoms => dispatch::seek_datoms { input, index }),
            Operation::IndexRange => {
                route!(IndexRange => dispatch::index_range { input, attr, start, end })
            }
            Operation::Schema => route!(Schema => dispatch::schema { input }),
            Operation::ReverseSchema => route!(ReverseSchema => dispatch::reverse_schema { input }),
            Operation::Metrics => route!(Metrics => dispatch::metrics { input }),
            Operation::GcStorage => route!(GcStorage => dispatch::gc_storage { config, before }),
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

static REGISTRY: Lazy<HashMap<&'static str, Handler>> = Lazy::new(|| {
    let table: HashMap<_, _> = Operation::ALL
        .into_iter()
        .map(|op| (op.name(), op.handler()))
        .collect();
    debug!(operations = table.len(), "operation registry built");
    table
});

/// Looks a handler up by operation name.
pub(crate) fn lookup(name: &str) -> Option<Handler> {
    REGISTRY.get(name).copied()
}

/// Names of all registered operations, in export order.
pub fn operation_names() -> Vec<&'static str> {
    Operation::ALL
        .into_iter()
        .map(Operation::name)
        .filter(|name| REGISTRY.contains_key(name))
        .collect()
}

/// Runs the handler registered for the request's operation.
pub(crate) fn dispatch(request: Request<'_>) -> GatewayResult<Value> {
    let operation = request.operation();
    let handler = lookup(operation.name()).ok_or_else(|| {
        GatewayError::invalid_argument(format!("no handler registered for {operation}"))
    })?;
    debug!(%operation, mutates = operation.mutates(), "dispatching");
    handler(request)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::Input;
    use crate::error::ErrorKind;

    #[test]
    fn every_operation_is_registered() {
        for op in Operation::ALL {
            assert!(lookup(op.name()).is_some(), "{op}");
        }
        assert!(lookup("seekdatoms").is_none());
        assert_eq!(operation_names().len(), Operation::ALL.len());
    }

    #[test]
    fn handlers_only_accept_their_own_request() {
        let handler = lookup(Operation::Pull.name()).unwrap();
        let err = handler(Request::Schema {
            input: Input {
                format: "db",
                payload: "{}",
            },
        })
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
        assert!(err.to_string().contains("pull handler received a schema request"));
    }

    #[test]
    fn names_are_unique() {
        let mut names = operation_names();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), Operation::ALL.len());
    }

    #[test]
    fn mutating_operations() {
        let mutating: Vec<_> = Operation::ALL.into_iter().filter(|op| op.mutates()).collect();
        assert_eq!(
            mutating,
            vec![
                Operation::CreateDatabase,
                Operation::DeleteDatabase,
                Operation::Transact,
                Operation::GcStorage
            ]
        );
    }
}
