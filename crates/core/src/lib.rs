//! `lettra-core` — Domain types for payment reconciliation.
//!
//! Pure types crate: transactions, invoices, match candidates, suggestions,
//! and the error taxonomy. No IO dependencies.

pub mod error;
pub mod model;

pub use error::{LinkError, StoreError, UpstreamError};
pub use model::{
    Confidence, Invoice, InvoiceStatus, LinkOutcome, MatchCandidate, MatchReason, Suggestion,
    SuggestionState, Transaction,
};
