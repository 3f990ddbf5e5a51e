use std::collections::BTreeSet;

use lettra_core::{Confidence, Invoice, MatchCandidate, MatchReason, Transaction};

use crate::config::MatchConfig;
use crate::normalize::share_token;

/// Score one unreconciled credit against a set of open invoices.
///
/// Pure function: no side effects, and an empty result is a valid outcome,
/// not a failure. Candidates come back best first, with a fully
/// deterministic order so repeated runs produce identical suggestion
/// identities.
pub fn match_invoices(
    transaction: &Transaction,
    invoices: &[Invoice],
    config: &MatchConfig,
) -> Vec<MatchCandidate> {
    // Debits and already-reconciled transactions never match.
    if !transaction.is_matchable() {
        return Vec::new();
    }

    let mut candidates: Vec<MatchCandidate> = invoices
        .iter()
        .filter(|inv| {
            inv.status.is_open()
                && inv.workspace_id == transaction.workspace_id
                && inv.currency == transaction.currency
        })
        .filter_map(|inv| score(transaction, inv, config))
        .collect();

    candidates.sort_by(|a, b| {
        a.confidence
            .cmp(&b.confidence)
            .then(b.reasons.len().cmp(&a.reasons.len()))
            .then(a.date_offset_days.abs().cmp(&b.date_offset_days.abs()))
            .then(a.invoice_number.cmp(&b.invoice_number))
    });
    candidates.truncate(config.max_candidates);
    candidates
}

fn score(
    transaction: &Transaction,
    invoice: &Invoice,
    config: &MatchConfig,
) -> Option<MatchCandidate> {
    let delta = (invoice.total_ttc_minor - transaction.amount_minor).abs();
    let tolerance = config.tolerance_for(invoice.total_ttc_minor);
    if delta > tolerance {
        return None;
    }

    let mut reasons = BTreeSet::new();
    reasons.insert(if delta == 0 {
        MatchReason::AmountExact
    } else {
        MatchReason::AmountNear
    });

    let date_offset_days = (invoice.due_date - transaction.date).num_days();
    if date_offset_days.abs() <= config.date_window_days {
        reasons.insert(MatchReason::DateProximity);
    }

    if share_token(
        &transaction.description,
        &invoice.client_name,
        config.min_token_len,
    ) {
        reasons.insert(MatchReason::DescriptionMatch);
    }

    Some(MatchCandidate {
        transaction_id: transaction.id.clone(),
        invoice_id: invoice.id.clone(),
        invoice_number: invoice.number.clone(),
        confidence: tier(&reasons),
        reasons,
        date_offset_days,
    })
}

/// Deterministic confidence tiering, no scoring weights:
/// - High:   exact amount and corroboration (name or date)
/// - Medium: near amount with corroboration, or exact amount alone
/// - Low:    anything else within tolerance
fn tier(reasons: &BTreeSet<MatchReason>) -> Confidence {
    let exact = reasons.contains(&MatchReason::AmountExact);
    let corroborated = reasons.contains(&MatchReason::DescriptionMatch)
        || reasons.contains(&MatchReason::DateProximity);

    if exact && corroborated {
        Confidence::High
    } else if corroborated || exact {
        Confidence::Medium
    } else {
        Confidence::Low
    }
}
