//! Data storage and persistence
//!
//! This module holds the key/value store abstraction the ledger persists
//! into, its sled and in-memory backends, and the UTXO index kept in the
//! chainstate bucket.

pub mod kv;
pub mod utxo_set;

pub use kv::{Database, KeyValueStore, MemoryStore, SledStore};
pub use utxo_set::{select_outputs, UTXOSet};
