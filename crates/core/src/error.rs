use std::fmt;

use crate::model::InvoiceStatus;

/// Failure modes of the reconciliation linker.
///
/// `AlreadyLinked` never reaches the user: callers map it to
/// success-as-noop (see `LinkOutcome::AlreadyLinked`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkError {
    /// Transaction already carries a reconciled invoice (concurrent link).
    AlreadyLinked { transaction_id: String },
    /// Invoice status changed concurrently (already paid, canceled, ...).
    InvoiceNotEligible {
        invoice_id: String,
        status: InvoiceStatus,
    },
    /// Stale reference; drop the suggestion and resync next cycle.
    TransactionNotFound(String),
    InvoiceNotFound(String),
    /// Authorization violation: must abort and log, never auto-correct.
    CrossWorkspace {
        transaction_id: String,
        invoice_id: String,
    },
    /// Transaction and invoice currencies differ. The matcher never
    /// proposes such a pair; this guards hand-crafted link calls.
    CurrencyMismatch {
        transaction_currency: String,
        invoice_currency: String,
    },
    /// Persistence failure underneath the linker.
    Storage(String),
}

impl fmt::Display for LinkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AlreadyLinked { transaction_id } => {
                write!(f, "transaction '{transaction_id}' is already reconciled")
            }
            Self::InvoiceNotEligible { invoice_id, status } => {
                write!(
                    f,
                    "invoice '{invoice_id}' can no longer be reconciled (status: {status})"
                )
            }
            Self::TransactionNotFound(id) => write!(f, "transaction '{id}' not found"),
            Self::InvoiceNotFound(id) => write!(f, "invoice '{id}' not found"),
            Self::CrossWorkspace {
                transaction_id,
                invoice_id,
            } => write!(
                f,
                "transaction '{transaction_id}' and invoice '{invoice_id}' belong to different workspaces"
            ),
            Self::CurrencyMismatch {
                transaction_currency,
                invoice_currency,
            } => write!(
                f,
                "currency mismatch: transaction is {transaction_currency}, invoice is {invoice_currency}"
            ),
            Self::Storage(msg) => write!(f, "storage error: {msg}"),
        }
    }
}

impl std::error::Error for LinkError {}

/// A fetch from the banking or invoicing collaborator failed.
///
/// The poll cycle skips and retries; previous suggestion state is retained
/// so a failed fetch never clears suggestions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpstreamError(pub String);

impl fmt::Display for UpstreamError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "upstream unavailable: {}", self.0)
    }
}

impl std::error::Error for UpstreamError {}

/// Persistence-boundary failure (ignored-set reads/writes, snapshot loads).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreError(pub String);

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "store error: {}", self.0)
    }
}

impl std::error::Error for StoreError {}
