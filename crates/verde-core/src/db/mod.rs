//! Local persistence for Verde

mod connection;
mod kv_store;
mod migrations;

pub use connection::Database;
pub use kv_store::{KeyValueStore, LibSqlKeyValueStore, MemoryKeyValueStore};
