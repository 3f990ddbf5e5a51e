use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};

use lettra_core::{
    Confidence, Invoice, InvoiceStatus, LinkOutcome, MatchReason, SuggestionState, Transaction,
};
use lettra_engine::{EngineConfig, Reconciler};
use lettra_store::SqliteStore;

fn date(s: &str) -> NaiveDate {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
}

fn at(secs: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 15, 9, 0, 0).unwrap() + Duration::seconds(secs)
}

fn transaction(id: &str, amount: i64, desc: &str, d: &str) -> Transaction {
    Transaction {
        id: id.into(),
        workspace_id: "ws_1".into(),
        amount_minor: amount,
        currency: "EUR".into(),
        description: desc.into(),
        date: date(d),
        reconciled_invoice_id: None,
    }
}

fn invoice(id: &str, number: &str, client: &str, total: i64, due: &str) -> Invoice {
    Invoice {
        id: id.into(),
        workspace_id: "ws_1".into(),
        number: number.into(),
        client_id: format!("cl_{id}"),
        client_name: client.into(),
        total_ttc_minor: total,
        currency: "EUR".into(),
        status: InvoiceStatus::Pending,
        due_date: date(due),
    }
}

// -------------------------------------------------------------------------
// End-to-end
// -------------------------------------------------------------------------

#[test]
fn end_to_end_sarl_dupont() {
    let store = SqliteStore::open_in_memory().unwrap();
    // +€1,200.00 credit, described the way French banks label transfers.
    store
        .upsert_transactions(&[transaction(
            "tx_8f2",
            120_000,
            "VIR SARL DUPONT 03/2024",
            "2024-03-10",
        )])
        .unwrap();
    store
        .upsert_invoices(&[invoice(
            "inv_31",
            "F-2024-031",
            "SARL Dupont",
            120_000,
            "2024-03-05",
        )])
        .unwrap();

    let mut reconciler = Reconciler::new(store, EngineConfig::default());

    let summary = reconciler.poll_cycle("ws_1", at(0)).unwrap();
    let shown = summary.emitted.expect("suggestion should surface");
    assert_eq!(shown.state, SuggestionState::Shown);
    let top = shown.top_candidate().unwrap();
    assert_eq!(top.invoice_number, "F-2024-031");
    assert_eq!(top.confidence, Confidence::High);
    assert!(top.reasons.contains(&MatchReason::AmountExact));
    assert!(top.reasons.contains(&MatchReason::DescriptionMatch));
    assert!(top.reasons.contains(&MatchReason::DateProximity));

    // User clicks "Rattacher".
    let outcome = reconciler.link("ws_1", "tx_8f2", "inv_31", at(5)).unwrap();
    assert_eq!(outcome, LinkOutcome::Linked);
    assert!(reconciler.suggestions("ws_1").is_empty());

    let inv = reconciler.store().invoice("inv_31").unwrap().unwrap();
    assert_eq!(inv.status, InvoiceStatus::Paid);
    let tx = reconciler.store().transaction("tx_8f2").unwrap().unwrap();
    assert_eq!(tx.reconciled_invoice_id.as_deref(), Some("inv_31"));

    // Later cycles stay quiet.
    let summary = reconciler.poll_cycle("ws_1", at(60)).unwrap();
    assert_eq!(summary.suggestions_open, 0);
    assert!(summary.emitted.is_none());
}

// -------------------------------------------------------------------------
// Throttling
// -------------------------------------------------------------------------

#[test]
fn bulk_sync_emits_one_suggestion_per_cooldown() {
    let store = SqliteStore::open_in_memory().unwrap();
    store
        .upsert_transactions(&[
            transaction("tx_a", 100_000, "VIR ACME CORP", "2024-03-03"),
            transaction("tx_b", 200_000, "VIR BRICO SAS", "2024-03-01"),
            transaction("tx_c", 300_000, "VIR CAFE NUAGE", "2024-03-02"),
        ])
        .unwrap();
    store
        .upsert_invoices(&[
            invoice("inv_a", "F-1", "Acme Corp", 100_000, "2024-03-04"),
            invoice("inv_b", "F-2", "Brico SAS", 200_000, "2024-03-02"),
            invoice("inv_c", "F-3", "Café Nuage", 300_000, "2024-03-03"),
        ])
        .unwrap();

    let mut reconciler = Reconciler::new(store, EngineConfig::default());

    // One batch creates three High suggestions; only one is shown.
    let summary = reconciler.poll_cycle("ws_1", at(0)).unwrap();
    assert_eq!(summary.merge.created, 3);
    let first = summary.emitted.unwrap();
    assert_eq!(first.transaction_id, "tx_b"); // oldest transaction date

    let still_new = reconciler
        .suggestions("ws_1")
        .iter()
        .filter(|s| s.state == SuggestionState::New)
        .count();
    assert_eq!(still_new, 2);

    // Within the cool-down: nothing new.
    assert!(reconciler.poll_cycle("ws_1", at(10)).unwrap().emitted.is_none());

    // Resolving the shown one frees the slot immediately.
    reconciler.link("ws_1", "tx_b", "inv_b", at(12)).unwrap();
    let next = reconciler.poll_cycle("ws_1", at(15)).unwrap().emitted.unwrap();
    assert_eq!(next.transaction_id, "tx_c");
}

// -------------------------------------------------------------------------
// Ignore durability
// -------------------------------------------------------------------------

#[test]
fn ignore_survives_process_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("lettra.db");

    {
        let store = SqliteStore::open(&path).unwrap();
        store
            .upsert_transactions(&[transaction("tx_1", 120_000, "VIR ACME CORP", "2024-03-10")])
            .unwrap();
        store
            .upsert_invoices(&[invoice("inv_1", "F-1", "Acme Corp", 120_000, "2024-03-08")])
            .unwrap();

        let mut reconciler = Reconciler::new(store, EngineConfig::default());
        let summary = reconciler.poll_cycle("ws_1", at(0)).unwrap();
        assert!(summary.emitted.is_some());

        reconciler.ignore("ws_1", "tx_1").unwrap();
    }

    // New process, same database: the transaction is still unresolved in
    // the feed but never re-surfaces.
    let store = SqliteStore::open(&path).unwrap();
    let mut reconciler = Reconciler::new(store, EngineConfig::default());
    let summary = reconciler.poll_cycle("ws_1", at(120)).unwrap();
    assert_eq!(summary.merge.created, 0);
    assert!(summary.emitted.is_none());
    assert!(reconciler.suggestions("ws_1").is_empty());
}

// -------------------------------------------------------------------------
// Determinism / idempotence
// -------------------------------------------------------------------------

#[test]
fn repeated_cycles_keep_suggestion_identity_and_order() {
    let store = SqliteStore::open_in_memory().unwrap();
    store
        .upsert_transactions(&[transaction("tx_1", 100_000, "VIR ACME CORP", "2024-03-10")])
        .unwrap();
    // Two invoices with the same amount; ranking must be stable.
    store
        .upsert_invoices(&[
            invoice("inv_1", "F-2024-010", "Acme Corp", 100_000, "2024-03-09"),
            invoice("inv_2", "F-2024-011", "Acme Corp", 100_000, "2024-03-20"),
        ])
        .unwrap();

    let mut reconciler = Reconciler::new(store, EngineConfig::default());
    reconciler.poll_cycle("ws_1", at(0)).unwrap();
    let first: Vec<String> = reconciler.suggestions("ws_1")[0]
        .matching_invoices
        .iter()
        .map(|c| c.invoice_number.clone())
        .collect();

    // Second cycle: same input, same single suggestion, same order.
    let summary = reconciler.poll_cycle("ws_1", at(5)).unwrap();
    assert_eq!(summary.merge.created, 0);
    let suggestions = reconciler.suggestions("ws_1");
    assert_eq!(suggestions.len(), 1);
    let second: Vec<String> = suggestions[0]
        .matching_invoices
        .iter()
        .map(|c| c.invoice_number.clone())
        .collect();
    assert_eq!(first, second);
    assert_eq!(first[0], "F-2024-010"); // closer due date ranks first
}
