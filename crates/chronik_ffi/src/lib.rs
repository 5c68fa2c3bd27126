//! # Chronik FFI
//!
//! C ABI gateway to the Chronik temporal datom database.
//!
//! Every entry point takes a context from [`chronik_context_create`],
//! C-string arguments, an output format tag (`json`, `edn` or `cbor`) and
//! an [`OutputReader`] callback. The callback is invoked exactly once per
//! call, with either the serialized result or a failure string of the form
//!
//! ```text
//! exception:<Kind>: <description>
//! Stacktrace:
//!     at chronik_ffi::<operation>
//!     caused by: ...
//! ```
//!
//! Database inputs are selected with tags: `db` (current view), `history`,
//! `since:<ms>` and `asof:<ms>` take an EDN configuration as payload;
//! `json`, `edn` and `cbor` (base64) take encoded data.
//!
//! No connection outlives a call and no panic crosses the boundary.

#![warn(missing_docs)]

mod boundary;
mod coerce;
pub mod config;
pub mod context;
pub mod database;
mod dispatch;
pub mod error;
pub mod input;
pub mod output;
pub mod registry;
pub mod types;
pub mod view;

pub use context::{
    chronik_context_create, chronik_context_destroy, chronik_context_last_error,
    chronik_init_logging, chronik_operations, chronik_version,
};
pub use database::{
    chronik_create_database, chronik_database_exists, chronik_delete_database,
    chronik_gc_storage, chronik_transact,
};
pub use error::{ErrorKind, GatewayError, GatewayResult};
pub use registry::Operation;
pub use types::{ChronikContext, OutputReader};
pub use view::{
    chronik_datoms, chronik_entity, chronik_index_range, chronik_metrics, chronik_pull,
    chronik_pull_many, chronik_query, chronik_reverse_schema, chronik_schema,
    chronik_seek_datoms,
};
