use std::collections::{BTreeMap, HashSet};

use lettra_core::{Confidence, MatchCandidate, Suggestion, SuggestionState, Transaction};

/// Per-workspace set of open suggestions, keyed by transaction id.
///
/// The registry is a deterministic state-merge: given the latest matcher
/// output it evicts what resolved or disappeared, refreshes what is still
/// open, and creates suggestions only for high-confidence matches. It never
/// raises errors.
#[derive(Debug, Default)]
pub struct SuggestionRegistry {
    suggestions: BTreeMap<String, Suggestion>,
}

/// Counts from one merge pass, reported in the cycle summary.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct MergeOutcome {
    pub created: usize,
    pub refreshed: usize,
    pub evicted: usize,
}

impl SuggestionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge the latest snapshot + matcher output into the registry.
    ///
    /// `matches` holds the ranked candidates per transaction id;
    /// `ignored` is the durable ignored set read this cycle.
    pub fn merge(
        &mut self,
        transactions: &[Transaction],
        matches: &BTreeMap<String, Vec<MatchCandidate>>,
        ignored: &HashSet<String>,
    ) -> MergeOutcome {
        let mut outcome = MergeOutcome::default();

        // Index of what the feed still reports, and which of those can
        // still carry a suggestion.
        let alive: BTreeMap<&str, &Transaction> = transactions
            .iter()
            .map(|t| (t.id.as_str(), t))
            .collect();

        // Eviction pass: transaction gone from the feed, resolved
        // externally, ignored, or left without any candidate.
        let stale: Vec<String> = self
            .suggestions
            .keys()
            .filter(|id| {
                match alive.get(id.as_str()) {
                    None => true, // disappeared from the source feed
                    Some(t) => {
                        t.reconciled_invoice_id.is_some()
                            || ignored.contains(id.as_str())
                            || matches.get(id.as_str()).map_or(true, Vec::is_empty)
                    }
                }
            })
            .cloned()
            .collect();
        for id in stale {
            self.suggestions.remove(&id);
            outcome.evicted += 1;
        }

        // Create/refresh pass, in sorted transaction-id order so repeated
        // merges walk identically.
        for (id, transaction) in &alive {
            if transaction.reconciled_invoice_id.is_some() || ignored.contains(*id) {
                continue;
            }
            let Some(candidates) = matches.get(*id).filter(|c| !c.is_empty()) else {
                continue;
            };

            if let Some(existing) = self.suggestions.get_mut(*id) {
                // Idempotent on transaction id: keep state and shown_at,
                // refresh the candidate list with this cycle's ranking.
                existing.matching_invoices = candidates.clone();
                existing.transaction_date = transaction.date;
                outcome.refreshed += 1;
                continue;
            }

            // Only a High top candidate surfaces a fresh suggestion;
            // Medium/Low never interrupt on their own.
            if candidates[0].confidence != Confidence::High {
                continue;
            }

            self.suggestions.insert(
                (*id).to_string(),
                Suggestion {
                    transaction_id: (*id).to_string(),
                    transaction_date: transaction.date,
                    matching_invoices: candidates.clone(),
                    shown_at: None,
                    state: SuggestionState::New,
                    times_surfaced: 0,
                },
            );
            outcome.created += 1;
        }

        outcome
    }

    /// All open suggestions, in transaction-id order.
    pub fn suggestions(&self) -> Vec<Suggestion> {
        self.suggestions.values().cloned().collect()
    }

    pub fn get(&self, transaction_id: &str) -> Option<&Suggestion> {
        self.suggestions.get(transaction_id)
    }

    pub fn len(&self) -> usize {
        self.suggestions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.suggestions.is_empty()
    }

    /// Evict after a successful link. `Resolved` is terminal, so the entry
    /// is removed rather than kept around.
    pub fn resolve(&mut self, transaction_id: &str) -> bool {
        self.suggestions.remove(transaction_id).is_some()
    }

    /// Evict after the user ignored the suggestion; the durable ignored set
    /// prevents re-creation on later merges.
    pub fn ignore(&mut self, transaction_id: &str) -> bool {
        self.suggestions.remove(transaction_id).is_some()
    }

    pub(crate) fn entries_mut(&mut self) -> &mut BTreeMap<String, Suggestion> {
        &mut self.suggestions
    }
}
