//! `lettra-store` — SQLite persistence boundary.
//!
//! Owns the durable side of reconciliation: transaction/invoice snapshots,
//! the compare-and-set link transition, and the per-workspace ignored set.
//! Implements the engine's port traits.

mod sqlite;

pub use sqlite::SqliteStore;
