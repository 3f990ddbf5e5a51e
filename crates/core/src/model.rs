use std::collections::BTreeSet;

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;

// ---------------------------------------------------------------------------
// Bank transactions
// ---------------------------------------------------------------------------

/// A bank transaction as delivered by the aggregation feed.
///
/// Read-only to the reconciliation core except `reconciled_invoice_id`,
/// which only the linker may set, exactly once.
#[derive(Debug, Clone, Serialize)]
pub struct Transaction {
    pub id: String,
    pub workspace_id: String,
    /// Signed amount in minor units. Credits are positive.
    pub amount_minor: i64,
    pub currency: String,
    pub description: String,
    pub date: NaiveDate,
    pub reconciled_invoice_id: Option<String>,
}

impl Transaction {
    /// Only unreconciled credits are match candidates.
    pub fn is_matchable(&self) -> bool {
        self.amount_minor > 0 && self.reconciled_invoice_id.is_none()
    }
}

// ---------------------------------------------------------------------------
// Invoices
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceStatus {
    Draft,
    Pending,
    Paid,
    Overdue,
    Canceled,
}

impl InvoiceStatus {
    /// Statuses eligible for reconciliation.
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Pending | Self::Overdue)
    }
}

impl std::fmt::Display for InvoiceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Draft => write!(f, "draft"),
            Self::Pending => write!(f, "pending"),
            Self::Paid => write!(f, "paid"),
            Self::Overdue => write!(f, "overdue"),
            Self::Canceled => write!(f, "canceled"),
        }
    }
}

impl std::str::FromStr for InvoiceStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(Self::Draft),
            "pending" => Ok(Self::Pending),
            "paid" => Ok(Self::Paid),
            "overdue" => Ok(Self::Overdue),
            "canceled" => Ok(Self::Canceled),
            other => Err(format!("unknown invoice status '{other}'")),
        }
    }
}

/// An invoice as delivered by the invoicing collaborator.
///
/// Read-only to the core except `status`, which only the linker
/// transitions to `Paid`.
#[derive(Debug, Clone, Serialize)]
pub struct Invoice {
    pub id: String,
    pub workspace_id: String,
    pub number: String,
    pub client_id: String,
    pub client_name: String,
    /// Total incl. tax, in minor units.
    pub total_ttc_minor: i64,
    pub currency: String,
    pub status: InvoiceStatus,
    pub due_date: NaiveDate,
}

// ---------------------------------------------------------------------------
// Match candidates
// ---------------------------------------------------------------------------

/// Why a candidate matched. Ordered so reason sets serialize stably.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchReason {
    AmountExact,
    AmountNear,
    DescriptionMatch,
    DateProximity,
}

/// Rule-based match quality. Declaration order is ranking order:
/// `High` sorts before `Medium` sorts before `Low`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Confidence {
    High,
    Medium,
    Low,
}

impl std::fmt::Display for Confidence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::High => write!(f, "high"),
            Self::Medium => write!(f, "medium"),
            Self::Low => write!(f, "low"),
        }
    }
}

/// One scored transaction↔invoice pairing. Ephemeral: recomputed on every
/// matching pass, never persisted.
#[derive(Debug, Clone, Serialize)]
pub struct MatchCandidate {
    pub transaction_id: String,
    pub invoice_id: String,
    /// Carried for deterministic ranking and display.
    pub invoice_number: String,
    pub confidence: Confidence,
    pub reasons: BTreeSet<MatchReason>,
    /// `invoice.due_date - transaction.date`, in days.
    pub date_offset_days: i64,
}

// ---------------------------------------------------------------------------
// Suggestions
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SuggestionState {
    New,
    Shown,
    Ignored,
    Resolved,
}

impl std::fmt::Display for SuggestionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::New => write!(f, "new"),
            Self::Shown => write!(f, "shown"),
            Self::Ignored => write!(f, "ignored"),
            Self::Resolved => write!(f, "resolved"),
        }
    }
}

/// A proposed reconciliation awaiting user action. At most one suggestion
/// exists per transaction id; `Resolved` ones are evicted from the registry.
#[derive(Debug, Clone, Serialize)]
pub struct Suggestion {
    pub transaction_id: String,
    pub transaction_date: NaiveDate,
    /// Best candidate first.
    pub matching_invoices: Vec<MatchCandidate>,
    pub shown_at: Option<DateTime<Utc>>,
    pub state: SuggestionState,
    /// How many times this suggestion has been surfaced to the user.
    pub times_surfaced: u32,
}

impl Suggestion {
    /// The candidate a link action would apply.
    pub fn top_candidate(&self) -> Option<&MatchCandidate> {
        self.matching_invoices.first()
    }
}

// ---------------------------------------------------------------------------
// Link outcome
// ---------------------------------------------------------------------------

/// Successful link results. `AlreadyLinked` is success-as-noop: the desired
/// end state was already reached by a concurrent caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkOutcome {
    Linked,
    AlreadyLinked,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn confidence_ordering_ranks_high_first() {
        let mut tiers = vec![Confidence::Low, Confidence::High, Confidence::Medium];
        tiers.sort();
        assert_eq!(
            tiers,
            vec![Confidence::High, Confidence::Medium, Confidence::Low]
        );
    }

    #[test]
    fn open_statuses() {
        assert!(InvoiceStatus::Pending.is_open());
        assert!(InvoiceStatus::Overdue.is_open());
        assert!(!InvoiceStatus::Draft.is_open());
        assert!(!InvoiceStatus::Paid.is_open());
        assert!(!InvoiceStatus::Canceled.is_open());
    }

    #[test]
    fn status_round_trips_through_str() {
        for status in [
            InvoiceStatus::Draft,
            InvoiceStatus::Pending,
            InvoiceStatus::Paid,
            InvoiceStatus::Overdue,
            InvoiceStatus::Canceled,
        ] {
            let parsed: InvoiceStatus = status.to_string().parse().unwrap();
            assert_eq!(parsed, status);
        }
    }

    #[test]
    fn matchable_requires_positive_unreconciled() {
        let tx = Transaction {
            id: "tx_1".into(),
            workspace_id: "ws_1".into(),
            amount_minor: 12_000,
            currency: "EUR".into(),
            description: "VIR ACME".into(),
            date: NaiveDate::from_ymd_opt(2024, 3, 10).unwrap(),
            reconciled_invoice_id: None,
        };
        assert!(tx.is_matchable());

        let debit = Transaction {
            amount_minor: -4_500,
            ..tx.clone()
        };
        assert!(!debit.is_matchable());

        let linked = Transaction {
            reconciled_invoice_id: Some("inv_1".into()),
            ..tx
        };
        assert!(!linked.is_matchable());
    }
}
