//! CSV snapshot ingestion for the `import` command.
//!
//! Bank exports and invoicing exports arrive as fixed-column CSVs; rows are
//! parsed into domain types and upserted into the store. Amounts are minor
//! units, dates are `YYYY-MM-DD`.

use chrono::NaiveDate;
use serde::Deserialize;

use lettra_core::{Invoice, Transaction};

#[derive(Debug, Deserialize)]
struct TransactionRow {
    id: String,
    workspace_id: String,
    amount_minor: i64,
    currency: String,
    description: String,
    date: String,
}

#[derive(Debug, Deserialize)]
struct InvoiceRow {
    id: String,
    workspace_id: String,
    number: String,
    client_id: String,
    client_name: String,
    total_ttc_minor: i64,
    currency: String,
    status: String,
    due_date: String,
}

fn parse_date(value: &str, row_id: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .map_err(|_| format!("row '{row_id}': cannot parse date '{value}'"))
}

/// Parse a bank transaction snapshot.
pub fn read_transactions(csv_data: &str) -> Result<Vec<Transaction>, String> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .from_reader(csv_data.as_bytes());

    let mut out = Vec::new();
    for record in reader.deserialize() {
        let row: TransactionRow = record.map_err(|e| e.to_string())?;
        let date = parse_date(&row.date, &row.id)?;
        out.push(Transaction {
            id: row.id,
            workspace_id: row.workspace_id,
            amount_minor: row.amount_minor,
            currency: row.currency,
            description: row.description,
            date,
            reconciled_invoice_id: None,
        });
    }
    Ok(out)
}

/// Parse an invoice snapshot.
pub fn read_invoices(csv_data: &str) -> Result<Vec<Invoice>, String> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .from_reader(csv_data.as_bytes());

    let mut out = Vec::new();
    for record in reader.deserialize() {
        let row: InvoiceRow = record.map_err(|e| e.to_string())?;
        let due_date = parse_date(&row.due_date, &row.id)?;
        let status = row
            .status
            .parse()
            .map_err(|e: String| format!("row '{}': {e}", row.id))?;
        out.push(Invoice {
            id: row.id,
            workspace_id: row.workspace_id,
            number: row.number,
            client_id: row.client_id,
            client_name: row.client_name,
            total_ttc_minor: row.total_ttc_minor,
            currency: row.currency,
            status,
            due_date,
        });
    }
    Ok(out)
}
