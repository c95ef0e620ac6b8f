//! MailRouter Storage - Key-value store abstraction
//!
//! The routing engine only needs `get`/`put` with a TTL. This crate provides
//! the trait plus a SQLite-backed store and an in-memory store.

pub mod db;
pub mod kv;

pub use db::DatabasePool;
pub use kv::{KvError, KvResult, KvStore, MemoryKvStore, SqliteKvStore};
