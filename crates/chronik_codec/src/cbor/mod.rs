//! Canonical CBOR (RFC 8949 §4.2.1) with the semantic tags the gateway
//! uses for keywords, symbols, sets, UUIDs and instants.

mod decoder;
mod encoder;

pub use decoder::{from_canonical_cbor, from_cbor, CborDecoder};
pub use encoder::{to_canonical_cbor, CanonicalEncoder};

/// Tag for epoch-based date/time (seconds).
pub const TAG_EPOCH: u64 = 1;
/// Tag for RFC 3339 date/time strings.
pub const TAG_DATETIME: u64 = 0;
/// Tag for binary UUIDs.
pub const TAG_UUID: u64 = 37;
/// Tag for identifiers: `":name"` is a keyword, anything else a symbol.
pub const TAG_IDENTIFIER: u64 = 39;
/// Tag for mathematical finite sets.
pub const TAG_SET: u64 = 258;
