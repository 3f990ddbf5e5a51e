use std::collections::HashSet;
use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use tracing::debug;

use lettra_core::{
    Invoice, InvoiceStatus, LinkError, StoreError, Transaction, UpstreamError,
};
use lettra_engine::{IgnoreStore, InvoiceFeed, LinkStore, TransactionFeed};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS transactions (
    id TEXT PRIMARY KEY,
    workspace_id TEXT NOT NULL,
    amount_minor INTEGER NOT NULL,
    currency TEXT NOT NULL,
    description TEXT NOT NULL,
    date TEXT NOT NULL,                -- YYYY-MM-DD
    reconciled_invoice_id TEXT         -- NULL until linked, set exactly once
);

CREATE INDEX IF NOT EXISTS idx_transactions_workspace
    ON transactions (workspace_id, reconciled_invoice_id);

CREATE TABLE IF NOT EXISTS invoices (
    id TEXT PRIMARY KEY,
    workspace_id TEXT NOT NULL,
    number TEXT NOT NULL,
    client_id TEXT NOT NULL,
    client_name TEXT NOT NULL,
    total_ttc_minor INTEGER NOT NULL,
    currency TEXT NOT NULL,
    status TEXT NOT NULL,              -- draft|pending|paid|overdue|canceled
    due_date TEXT NOT NULL,            -- YYYY-MM-DD
    paid_at TEXT                       -- RFC3339, set by the linker
);

CREATE INDEX IF NOT EXISTS idx_invoices_workspace
    ON invoices (workspace_id, status);

CREATE TABLE IF NOT EXISTS ignored_transactions (
    workspace_id TEXT NOT NULL,
    transaction_id TEXT NOT NULL,
    ignored_at TEXT NOT NULL,          -- RFC3339
    PRIMARY KEY (workspace_id, transaction_id)
);
"#;

/// SQLite-backed store. The connection sits behind a mutex so a shared
/// `Arc<SqliteStore>` can serve concurrent link attempts; the link
/// transition itself serializes through an immediate transaction plus a
/// compare-and-set on `reconciled_invoice_id`.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path).map_err(store_err)?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory().map_err(store_err)?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(SCHEMA).map_err(store_err)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>, StoreError> {
        self.conn
            .lock()
            .map_err(|_| StoreError("connection mutex poisoned".into()))
    }

    /// Upsert a snapshot of transactions from the aggregation feed.
    ///
    /// `reconciled_invoice_id` is never taken from the snapshot: the linker
    /// owns that column and a stale import must not clear or overwrite it.
    pub fn upsert_transactions(&self, transactions: &[Transaction]) -> Result<usize, StoreError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction().map_err(store_err)?;
        let mut count = 0;
        {
            let mut stmt = tx
                .prepare(
                    "INSERT INTO transactions
                         (id, workspace_id, amount_minor, currency, description, date, reconciled_invoice_id)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, NULL)
                     ON CONFLICT(id) DO UPDATE SET
                         workspace_id = excluded.workspace_id,
                         amount_minor = excluded.amount_minor,
                         currency = excluded.currency,
                         description = excluded.description,
                         date = excluded.date",
                )
                .map_err(store_err)?;
            for t in transactions {
                stmt.execute(params![
                    t.id,
                    t.workspace_id,
                    t.amount_minor,
                    t.currency,
                    t.description,
                    t.date.format("%Y-%m-%d").to_string(),
                ])
                .map_err(store_err)?;
                count += 1;
            }
        }
        tx.commit().map_err(store_err)?;
        debug!(count, "transactions upserted");
        Ok(count)
    }

    /// Upsert a snapshot of invoices from the invoicing collaborator.
    ///
    /// A locally linked invoice keeps its `paid` status and timestamp even
    /// if the snapshot lags behind the link.
    pub fn upsert_invoices(&self, invoices: &[Invoice]) -> Result<usize, StoreError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction().map_err(store_err)?;
        let mut count = 0;
        {
            let mut stmt = tx
                .prepare(
                    "INSERT INTO invoices
                         (id, workspace_id, number, client_id, client_name,
                          total_ttc_minor, currency, status, due_date, paid_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, NULL)
                     ON CONFLICT(id) DO UPDATE SET
                         workspace_id = excluded.workspace_id,
                         number = excluded.number,
                         client_id = excluded.client_id,
                         client_name = excluded.client_name,
                         total_ttc_minor = excluded.total_ttc_minor,
                         currency = excluded.currency,
                         due_date = excluded.due_date,
                         status = CASE WHEN invoices.status = 'paid'
                                       THEN invoices.status
                                       ELSE excluded.status END",
                )
                .map_err(store_err)?;
            for inv in invoices {
                stmt.execute(params![
                    inv.id,
                    inv.workspace_id,
                    inv.number,
                    inv.client_id,
                    inv.client_name,
                    inv.total_ttc_minor,
                    inv.currency,
                    inv.status.to_string(),
                    inv.due_date.format("%Y-%m-%d").to_string(),
                ])
                .map_err(store_err)?;
                count += 1;
            }
        }
        tx.commit().map_err(store_err)?;
        debug!(count, "invoices upserted");
        Ok(count)
    }

    pub fn invoice(&self, invoice_id: &str) -> Result<Option<Invoice>, StoreError> {
        let conn = self.lock()?;
        conn.query_row(
            "SELECT id, workspace_id, number, client_id, client_name,
                    total_ttc_minor, currency, status, due_date
             FROM invoices WHERE id = ?1",
            params![invoice_id],
            row_to_invoice,
        )
        .optional()
        .map_err(store_err)
    }

    pub fn transaction(&self, transaction_id: &str) -> Result<Option<Transaction>, StoreError> {
        let conn = self.lock()?;
        conn.query_row(
            "SELECT id, workspace_id, amount_minor, currency, description, date,
                    reconciled_invoice_id
             FROM transactions WHERE id = ?1",
            params![transaction_id],
            row_to_transaction,
        )
        .optional()
        .map_err(store_err)
    }
}

// ---------------------------------------------------------------------------
// Port implementations
// ---------------------------------------------------------------------------

impl TransactionFeed for SqliteStore {
    fn list_unreconciled(&self, workspace_id: &str) -> Result<Vec<Transaction>, UpstreamError> {
        let conn = self.lock().map_err(upstream_err)?;
        let mut stmt = conn
            .prepare(
                "SELECT id, workspace_id, amount_minor, currency, description, date,
                        reconciled_invoice_id
                 FROM transactions
                 WHERE workspace_id = ?1 AND reconciled_invoice_id IS NULL
                 ORDER BY date, id",
            )
            .map_err(|e| UpstreamError(e.to_string()))?;
        let rows = stmt
            .query_map(params![workspace_id], row_to_transaction)
            .map_err(|e| UpstreamError(e.to_string()))?;
        rows.collect::<Result<Vec<_>, _>>()
            .map_err(|e| UpstreamError(e.to_string()))
    }
}

impl InvoiceFeed for SqliteStore {
    fn list_open(&self, workspace_id: &str) -> Result<Vec<Invoice>, UpstreamError> {
        let conn = self.lock().map_err(upstream_err)?;
        let mut stmt = conn
            .prepare(
                "SELECT id, workspace_id, number, client_id, client_name,
                        total_ttc_minor, currency, status, due_date
                 FROM invoices
                 WHERE workspace_id = ?1 AND status IN ('pending', 'overdue')
                 ORDER BY number, id",
            )
            .map_err(|e| UpstreamError(e.to_string()))?;
        let rows = stmt
            .query_map(params![workspace_id], row_to_invoice)
            .map_err(|e| UpstreamError(e.to_string()))?;
        rows.collect::<Result<Vec<_>, _>>()
            .map_err(|e| UpstreamError(e.to_string()))
    }
}

impl LinkStore for SqliteStore {
    /// The atomic link transition: set the transaction's reconciled flag
    /// and mark the invoice paid, both or neither.
    ///
    /// Single-writer guarantee: an immediate transaction takes the write
    /// lock up front, and the flag update is a compare-and-set
    /// (`WHERE reconciled_invoice_id IS NULL`) so the loser of a race
    /// observes `AlreadyLinked` instead of double-writing.
    fn link(
        &self,
        transaction_id: &str,
        invoice_id: &str,
        paid_at: DateTime<Utc>,
    ) -> Result<(), LinkError> {
        let mut conn = self
            .conn
            .lock()
            .map_err(|_| LinkError::Storage("connection mutex poisoned".into()))?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(link_err)?;

        let bank_tx: (String, String, Option<String>) = tx
            .query_row(
                "SELECT workspace_id, currency, reconciled_invoice_id
                 FROM transactions WHERE id = ?1",
                params![transaction_id],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()
            .map_err(link_err)?
            .ok_or_else(|| LinkError::TransactionNotFound(transaction_id.to_string()))?;

        let invoice: (String, String, String) = tx
            .query_row(
                "SELECT workspace_id, currency, status FROM invoices WHERE id = ?1",
                params![invoice_id],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()
            .map_err(link_err)?
            .ok_or_else(|| LinkError::InvoiceNotFound(invoice_id.to_string()))?;

        let (tx_workspace, tx_currency, reconciled) = bank_tx;
        let (inv_workspace, inv_currency, inv_status) = invoice;

        if tx_workspace != inv_workspace {
            return Err(LinkError::CrossWorkspace {
                transaction_id: transaction_id.to_string(),
                invoice_id: invoice_id.to_string(),
            });
        }
        if tx_currency != inv_currency {
            return Err(LinkError::CurrencyMismatch {
                transaction_currency: tx_currency,
                invoice_currency: inv_currency,
            });
        }
        if reconciled.is_some() {
            return Err(LinkError::AlreadyLinked {
                transaction_id: transaction_id.to_string(),
            });
        }
        let status: InvoiceStatus = inv_status.parse().map_err(LinkError::Storage)?;
        if !status.is_open() {
            return Err(LinkError::InvoiceNotEligible {
                invoice_id: invoice_id.to_string(),
                status,
            });
        }

        let updated = tx
            .execute(
                "UPDATE transactions SET reconciled_invoice_id = ?1
                 WHERE id = ?2 AND reconciled_invoice_id IS NULL",
                params![invoice_id, transaction_id],
            )
            .map_err(link_err)?;
        if updated != 1 {
            return Err(LinkError::AlreadyLinked {
                transaction_id: transaction_id.to_string(),
            });
        }

        let updated = tx
            .execute(
                "UPDATE invoices SET status = 'paid', paid_at = ?1
                 WHERE id = ?2 AND status IN ('pending', 'overdue')",
                params![paid_at.to_rfc3339(), invoice_id],
            )
            .map_err(link_err)?;
        if updated != 1 {
            // Dropping the transaction rolls both writes back.
            return Err(LinkError::InvoiceNotEligible {
                invoice_id: invoice_id.to_string(),
                status,
            });
        }

        tx.commit().map_err(link_err)?;
        Ok(())
    }
}

impl IgnoreStore for SqliteStore {
    /// Synchronous, durable write: committed before this returns, so the
    /// next poll cycle cannot re-surface a just-ignored suggestion.
    fn add_ignored(&self, workspace_id: &str, transaction_id: &str) -> Result<(), StoreError> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT OR IGNORE INTO ignored_transactions
                 (workspace_id, transaction_id, ignored_at)
             VALUES (?1, ?2, ?3)",
            params![workspace_id, transaction_id, Utc::now().to_rfc3339()],
        )
        .map_err(store_err)?;
        Ok(())
    }

    fn load_ignored(&self, workspace_id: &str) -> Result<HashSet<String>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare("SELECT transaction_id FROM ignored_transactions WHERE workspace_id = ?1")
            .map_err(store_err)?;
        let rows = stmt
            .query_map(params![workspace_id], |row| row.get::<_, String>(0))
            .map_err(store_err)?;
        rows.collect::<Result<HashSet<_>, _>>().map_err(store_err)
    }
}

// ---------------------------------------------------------------------------
// Row mapping
// ---------------------------------------------------------------------------

fn row_to_transaction(row: &rusqlite::Row<'_>) -> rusqlite::Result<Transaction> {
    Ok(Transaction {
        id: row.get(0)?,
        workspace_id: row.get(1)?,
        amount_minor: row.get(2)?,
        currency: row.get(3)?,
        description: row.get(4)?,
        date: parse_date(row, 5)?,
        reconciled_invoice_id: row.get(6)?,
    })
}

fn row_to_invoice(row: &rusqlite::Row<'_>) -> rusqlite::Result<Invoice> {
    let status_text: String = row.get(7)?;
    let status = status_text.parse().map_err(|e: String| {
        rusqlite::Error::FromSqlConversionFailure(7, rusqlite::types::Type::Text, e.into())
    })?;
    Ok(Invoice {
        id: row.get(0)?,
        workspace_id: row.get(1)?,
        number: row.get(2)?,
        client_id: row.get(3)?,
        client_name: row.get(4)?,
        total_ttc_minor: row.get(5)?,
        currency: row.get(6)?,
        status,
        due_date: parse_date(row, 8)?,
    })
}

fn parse_date(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<NaiveDate> {
    let text: String = row.get(idx)?;
    NaiveDate::parse_from_str(&text, "%Y-%m-%d").map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

fn store_err(e: rusqlite::Error) -> StoreError {
    StoreError(e.to_string())
}

fn link_err(e: rusqlite::Error) -> LinkError {
    LinkError::Storage(e.to_string())
}

fn upstream_err(e: StoreError) -> UpstreamError {
    UpstreamError(e.0)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn tx(id: &str, ws: &str, amount: i64) -> Transaction {
        Transaction {
            id: id.into(),
            workspace_id: ws.into(),
            amount_minor: amount,
            currency: "EUR".into(),
            description: "VIR SARL DUPONT".into(),
            date: date("2024-03-10"),
            reconciled_invoice_id: None,
        }
    }

    fn invoice(id: &str, ws: &str, total: i64, status: InvoiceStatus) -> Invoice {
        Invoice {
            id: id.into(),
            workspace_id: ws.into(),
            number: format!("F-{id}"),
            client_id: "cl_1".into(),
            client_name: "SARL Dupont".into(),
            total_ttc_minor: total,
            currency: "EUR".into(),
            status,
            due_date: date("2024-03-05"),
        }
    }

    fn seeded() -> SqliteStore {
        let store = SqliteStore::open_in_memory().unwrap();
        store
            .upsert_transactions(&[tx("tx_1", "ws_1", 120_000)])
            .unwrap();
        store
            .upsert_invoices(&[
                invoice("inv_1", "ws_1", 120_000, InvoiceStatus::Pending),
                invoice("inv_2", "ws_1", 55_000, InvoiceStatus::Overdue),
            ])
            .unwrap();
        store
    }

    #[test]
    fn link_sets_both_sides_atomically() {
        let store = seeded();
        store.link("tx_1", "inv_1", Utc::now()).unwrap();

        let t = store.transaction("tx_1").unwrap().unwrap();
        assert_eq!(t.reconciled_invoice_id.as_deref(), Some("inv_1"));
        let inv = store.invoice("inv_1").unwrap().unwrap();
        assert_eq!(inv.status, InvoiceStatus::Paid);
    }

    #[test]
    fn second_link_observes_already_linked() {
        let store = seeded();
        store.link("tx_1", "inv_1", Utc::now()).unwrap();

        let err = store.link("tx_1", "inv_2", Utc::now()).unwrap_err();
        assert!(matches!(err, LinkError::AlreadyLinked { .. }));
        // The transaction is linked to exactly one invoice.
        let t = store.transaction("tx_1").unwrap().unwrap();
        assert_eq!(t.reconciled_invoice_id.as_deref(), Some("inv_1"));
        // inv_2 was not touched.
        let inv = store.invoice("inv_2").unwrap().unwrap();
        assert_eq!(inv.status, InvoiceStatus::Overdue);
    }

    #[test]
    fn no_two_transactions_link_the_same_invoice() {
        let store = seeded();
        store
            .upsert_transactions(&[tx("tx_2", "ws_1", 120_000)])
            .unwrap();

        store.link("tx_1", "inv_1", Utc::now()).unwrap();
        let err = store.link("tx_2", "inv_1", Utc::now()).unwrap_err();
        assert!(matches!(
            err,
            LinkError::InvoiceNotEligible {
                status: InvoiceStatus::Paid,
                ..
            }
        ));
        let t2 = store.transaction("tx_2").unwrap().unwrap();
        assert!(t2.reconciled_invoice_id.is_none());
    }

    #[test]
    fn concurrent_links_one_winner() {
        let store = Arc::new(seeded());
        let mut handles = Vec::new();
        for _ in 0..8 {
            let store = Arc::clone(&store);
            handles.push(std::thread::spawn(move || {
                store.link("tx_1", "inv_1", Utc::now())
            }));
        }

        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        let wins = results.iter().filter(|r| r.is_ok()).count();
        let noops = results
            .iter()
            .filter(|r| matches!(r, Err(LinkError::AlreadyLinked { .. })))
            .count();
        assert_eq!(wins, 1);
        assert_eq!(noops, 7);

        let t = store.transaction("tx_1").unwrap().unwrap();
        assert_eq!(t.reconciled_invoice_id.as_deref(), Some("inv_1"));
    }

    #[test]
    fn cross_workspace_link_is_rejected() {
        let store = seeded();
        store
            .upsert_invoices(&[invoice("inv_w2", "ws_2", 120_000, InvoiceStatus::Pending)])
            .unwrap();

        let err = store.link("tx_1", "inv_w2", Utc::now()).unwrap_err();
        assert!(matches!(err, LinkError::CrossWorkspace { .. }));
        // Nothing was written.
        let t = store.transaction("tx_1").unwrap().unwrap();
        assert!(t.reconciled_invoice_id.is_none());
    }

    #[test]
    fn currency_mismatch_is_rejected() {
        let store = seeded();
        let mut usd = invoice("inv_usd", "ws_1", 120_000, InvoiceStatus::Pending);
        usd.currency = "USD".into();
        store.upsert_invoices(&[usd]).unwrap();

        let err = store.link("tx_1", "inv_usd", Utc::now()).unwrap_err();
        assert!(matches!(err, LinkError::CurrencyMismatch { .. }));
    }

    #[test]
    fn link_to_canceled_invoice_is_not_eligible() {
        let store = seeded();
        store
            .upsert_invoices(&[invoice("inv_c", "ws_1", 120_000, InvoiceStatus::Canceled)])
            .unwrap();

        let err = store.link("tx_1", "inv_c", Utc::now()).unwrap_err();
        assert!(matches!(
            err,
            LinkError::InvoiceNotEligible {
                status: InvoiceStatus::Canceled,
                ..
            }
        ));
    }

    #[test]
    fn missing_rows_are_not_found() {
        let store = seeded();
        assert!(matches!(
            store.link("tx_nope", "inv_1", Utc::now()).unwrap_err(),
            LinkError::TransactionNotFound(_)
        ));
        assert!(matches!(
            store.link("tx_1", "inv_nope", Utc::now()).unwrap_err(),
            LinkError::InvoiceNotFound(_)
        ));
    }

    #[test]
    fn feeds_are_workspace_scoped() {
        let store = seeded();
        store
            .upsert_transactions(&[tx("tx_w2", "ws_2", 9_000)])
            .unwrap();

        let ws1 = store.list_unreconciled("ws_1").unwrap();
        assert_eq!(ws1.len(), 1);
        assert_eq!(ws1[0].id, "tx_1");

        let open = store.list_open("ws_1").unwrap();
        assert_eq!(open.len(), 2); // pending + overdue

        store.link("tx_1", "inv_1", Utc::now()).unwrap();
        // Linked transaction drops out of the unreconciled feed.
        assert!(store.list_unreconciled("ws_1").unwrap().is_empty());
        assert_eq!(store.list_open("ws_1").unwrap().len(), 1);
    }

    #[test]
    fn ignored_set_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lettra.db");

        {
            let store = SqliteStore::open(&path).unwrap();
            store.add_ignored("ws_1", "tx_1").unwrap();
            // Adding twice is a no-op, not an error.
            store.add_ignored("ws_1", "tx_1").unwrap();
        }

        let store = SqliteStore::open(&path).unwrap();
        let ignored = store.load_ignored("ws_1").unwrap();
        assert!(ignored.contains("tx_1"));
        assert!(store.load_ignored("ws_2").unwrap().is_empty());
    }

    #[test]
    fn snapshot_upsert_preserves_link_state() {
        let store = seeded();
        store.link("tx_1", "inv_1", Utc::now()).unwrap();

        // A lagging snapshot re-imports the same rows, pre-link.
        store
            .upsert_transactions(&[tx("tx_1", "ws_1", 120_000)])
            .unwrap();
        store
            .upsert_invoices(&[invoice("inv_1", "ws_1", 120_000, InvoiceStatus::Pending)])
            .unwrap();

        let t = store.transaction("tx_1").unwrap().unwrap();
        assert_eq!(t.reconciled_invoice_id.as_deref(), Some("inv_1"));
        let inv = store.invoice("inv_1").unwrap().unwrap();
        assert_eq!(inv.status, InvoiceStatus::Paid);
    }
}
