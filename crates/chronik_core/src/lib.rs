//! # Chronik Core
//!
//! Embedded temporal datom engine.
//!
//! This crate provides:
//! - Database lifecycle: create, delete, exists, connect
//! - Transactions over entity maps and list forms, with tempids, upserts
//!   and schema checking
//! - Immutable database values with current, history, as-of and since views
//! - Index access (`datoms`, `seek_datoms`, `index_range`)
//! - Datalog queries and pull patterns
//! - Storage garbage collection of retracted history
//!
//! Every store is a frame log (see [`chronik_storage`]) of canonical CBOR
//! records; connections replay it into memory.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod database;
mod db;
mod error;
mod facts;
mod log;
mod pull;
mod query;
mod schema;
mod store;
mod transact;
mod types;

pub use config::{Backend, DatabaseConfig, SchemaFlexibility, DEFAULT_MEMORY_ID};
pub use database::{connect, create_database, database_exists, delete_database, Connection, TxReport};
pub use db::{Db, View};
pub use error::{CoreError, CoreResult};
pub use log::FORMAT_VERSION;
pub use pull::{pull, pull_many};
pub use query::{query, QueryInput};
pub use schema::{Attribute, Cardinality, Schema, Unique, ValueType};
pub use transact::CURRENT_TX_TEMPID;
pub use types::{Datom, EntityId, Index, TxId, TX0};
