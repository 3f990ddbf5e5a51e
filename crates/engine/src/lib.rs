//! `lettra-engine` — Payment reconciliation engine.
//!
//! Pure engine crate: receives transaction and invoice snapshots, computes
//! ranked match suggestions, and meters their delivery. Persistence and
//! collaborator IO happen behind the port traits in [`cycle`].

pub mod config;
pub mod cycle;
pub mod matcher;
pub mod normalize;
pub mod registry;
pub mod throttle;

pub use config::EngineConfig;
pub use cycle::{
    CycleError, CycleSummary, IgnoreStore, InvoiceFeed, LinkStore, Reconciler, TransactionFeed,
};
pub use matcher::match_invoices;
pub use registry::SuggestionRegistry;
