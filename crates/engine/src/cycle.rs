use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use lettra_core::{
    Invoice, LinkError, LinkOutcome, StoreError, Suggestion, Transaction, UpstreamError,
};

use crate::config::EngineConfig;
use crate::matcher::match_invoices;
use crate::registry::{MergeOutcome, SuggestionRegistry};
use crate::throttle::next_suggestion;

// ---------------------------------------------------------------------------
// Ports
// ---------------------------------------------------------------------------

/// Banking collaborator: yields the current transaction snapshot.
pub trait TransactionFeed {
    fn list_unreconciled(&self, workspace_id: &str) -> Result<Vec<Transaction>, UpstreamError>;
}

/// Invoicing collaborator: yields the open (Pending/Overdue) invoices.
pub trait InvoiceFeed {
    fn list_open(&self, workspace_id: &str) -> Result<Vec<Invoice>, UpstreamError>;
}

/// The atomic link transition. Implementations must compare-and-set on the
/// transaction's reconciled flag so concurrent attempts serialize; both
/// writes (transaction flag, invoice status) succeed or neither does.
pub trait LinkStore {
    fn link(
        &self,
        transaction_id: &str,
        invoice_id: &str,
        paid_at: DateTime<Utc>,
    ) -> Result<(), LinkError>;
}

/// Durable per-workspace ignored set. `add` must be synchronous: the write
/// lands before the next poll cycle reads the set.
pub trait IgnoreStore {
    fn add_ignored(&self, workspace_id: &str, transaction_id: &str) -> Result<(), StoreError>;
    fn load_ignored(&self, workspace_id: &str) -> Result<HashSet<String>, StoreError>;
}

// ---------------------------------------------------------------------------
// Cycle errors
// ---------------------------------------------------------------------------

/// A poll cycle that could not complete. Suggestion state is retained
/// untouched; the next cycle retries.
#[derive(Debug)]
pub enum CycleError {
    Upstream(UpstreamError),
    Store(StoreError),
}

impl fmt::Display for CycleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Upstream(e) => write!(f, "{e}"),
            Self::Store(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for CycleError {}

impl From<UpstreamError> for CycleError {
    fn from(e: UpstreamError) -> Self {
        Self::Upstream(e)
    }
}

impl From<StoreError> for CycleError {
    fn from(e: StoreError) -> Self {
        Self::Store(e)
    }
}

// ---------------------------------------------------------------------------
// Cycle summary
// ---------------------------------------------------------------------------

/// What one poll cycle saw and did.
#[derive(Debug, Clone, Serialize)]
pub struct CycleSummary {
    pub workspace_id: String,
    pub transactions: usize,
    pub open_invoices: usize,
    pub merge: MergeOutcome,
    pub suggestions_open: usize,
    /// The suggestion emitted to the presentation layer, if any.
    pub emitted: Option<Suggestion>,
}

// ---------------------------------------------------------------------------
// Reconciler
// ---------------------------------------------------------------------------

/// Poll-driven reconciliation façade over one store.
///
/// Each cycle re-derives suggestions from current snapshots, so cycles are
/// idempotent and self-correcting; no cancellation tokens are needed when a
/// user action overlaps a cycle. Cycles for one workspace run sequentially
/// (this type is not shared across threads); distinct workspaces get their
/// own registries and may be driven concurrently from separate reconcilers
/// over a shared store.
pub struct Reconciler<S> {
    store: S,
    config: EngineConfig,
    registries: HashMap<String, SuggestionRegistry>,
}

impl<S> Reconciler<S>
where
    S: TransactionFeed + InvoiceFeed + LinkStore + IgnoreStore,
{
    pub fn new(store: S, config: EngineConfig) -> Self {
        Self {
            store,
            config,
            registries: HashMap::new(),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Run one poll cycle: refresh from snapshots, then offer the next
    /// eligible suggestion to the presentation boundary.
    pub fn poll_cycle(
        &mut self,
        workspace_id: &str,
        now: DateTime<Utc>,
    ) -> Result<CycleSummary, CycleError> {
        let mut summary = self.refresh(workspace_id)?;

        let registry = self.registries.entry(workspace_id.to_string()).or_default();
        summary.emitted = next_suggestion(registry, now, &self.config.delivery);
        if let Some(ref s) = summary.emitted {
            info!(
                workspace_id,
                transaction_id = %s.transaction_id,
                candidates = s.matching_invoices.len(),
                "suggestion shown"
            );
        }
        Ok(summary)
    }

    /// Fetch snapshots, match, and merge, without emitting anything.
    /// On a failed fetch the previous suggestion state is kept untouched,
    /// never cleared, to avoid false negatives.
    pub fn refresh(&mut self, workspace_id: &str) -> Result<CycleSummary, CycleError> {
        let transactions = match self.store.list_unreconciled(workspace_id) {
            Ok(t) => t,
            Err(e) => {
                warn!(workspace_id, error = %e, "transaction fetch failed, skipping cycle");
                return Err(e.into());
            }
        };
        let invoices = match self.store.list_open(workspace_id) {
            Ok(i) => i,
            Err(e) => {
                warn!(workspace_id, error = %e, "invoice fetch failed, skipping cycle");
                return Err(e.into());
            }
        };
        let ignored = self.store.load_ignored(workspace_id)?;

        let mut matches: BTreeMap<String, Vec<lettra_core::MatchCandidate>> = BTreeMap::new();
        for transaction in transactions.iter().filter(|t| t.is_matchable()) {
            let candidates = match_invoices(transaction, &invoices, &self.config.matching);
            if !candidates.is_empty() {
                matches.insert(transaction.id.clone(), candidates);
            }
        }

        let registry = self.registries.entry(workspace_id.to_string()).or_default();
        let merge = registry.merge(&transactions, &matches, &ignored);

        debug!(
            workspace_id,
            transactions = transactions.len(),
            created = merge.created,
            evicted = merge.evicted,
            "cycle complete"
        );

        Ok(CycleSummary {
            workspace_id: workspace_id.to_string(),
            transactions: transactions.len(),
            open_invoices: invoices.len(),
            merge,
            suggestions_open: registry.len(),
            emitted: None,
        })
    }

    /// Open suggestions for the presentation layer's poll.
    pub fn suggestions(&self, workspace_id: &str) -> Vec<Suggestion> {
        self.registries
            .get(workspace_id)
            .map(SuggestionRegistry::suggestions)
            .unwrap_or_default()
    }

    /// User-initiated link. `AlreadyLinked` from a concurrent attempt is
    /// success-as-noop: the desired end state was already reached and no
    /// error surfaces to the user.
    pub fn link(
        &mut self,
        workspace_id: &str,
        transaction_id: &str,
        invoice_id: &str,
        now: DateTime<Utc>,
    ) -> Result<LinkOutcome, LinkError> {
        match self.store.link(transaction_id, invoice_id, now) {
            Ok(()) => {
                self.evict(workspace_id, transaction_id);
                info!(workspace_id, transaction_id, invoice_id, "reconciled");
                Ok(LinkOutcome::Linked)
            }
            Err(LinkError::AlreadyLinked { .. }) => {
                self.evict(workspace_id, transaction_id);
                debug!(
                    workspace_id,
                    transaction_id, "already reconciled by concurrent linker"
                );
                Ok(LinkOutcome::AlreadyLinked)
            }
            Err(e @ LinkError::CrossWorkspace { .. }) => {
                // Authorization violation: abort loudly, never auto-correct.
                error!(workspace_id, transaction_id, invoice_id, error = %e, "link rejected");
                Err(e)
            }
            Err(e @ (LinkError::TransactionNotFound(_) | LinkError::InvoiceNotFound(_))) => {
                // Stale reference: drop the suggestion, resync next cycle.
                self.evict(workspace_id, transaction_id);
                warn!(workspace_id, transaction_id, invoice_id, error = %e, "stale link target");
                Err(e)
            }
            Err(e) => {
                warn!(workspace_id, transaction_id, invoice_id, error = %e, "link failed");
                Err(e)
            }
        }
    }

    /// User-initiated ignore: durable write first, then eviction, so a
    /// cycle racing this call can at worst re-show once, never resurrect
    /// after the write landed.
    pub fn ignore(&mut self, workspace_id: &str, transaction_id: &str) -> Result<(), StoreError> {
        self.store.add_ignored(workspace_id, transaction_id)?;
        self.evict(workspace_id, transaction_id);
        info!(workspace_id, transaction_id, "suggestion ignored");
        Ok(())
    }

    fn evict(&mut self, workspace_id: &str, transaction_id: &str) {
        if let Some(registry) = self.registries.get_mut(workspace_id) {
            registry.resolve(transaction_id);
        }
    }
}
