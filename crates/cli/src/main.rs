// lettra CLI - headless payment reconciliation operations

mod exit_codes;
mod import;

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use chrono::Utc;
use clap::{Parser, Subcommand};

use lettra_core::{LinkOutcome, Suggestion};
use lettra_engine::{EngineConfig, Reconciler};
use lettra_store::SqliteStore;

use exit_codes::{link_exit_code, EXIT_PARSE, EXIT_STORE, EXIT_USAGE};

/// A command failure carrying its exit code, plus an optional hint for the
/// human on stderr.
pub struct CliError {
    pub code: u8,
    pub message: String,
    pub hint: Option<String>,
}

impl CliError {
    fn usage(message: impl Into<String>) -> Self {
        Self {
            code: EXIT_USAGE,
            message: message.into(),
            hint: None,
        }
    }

    fn parse(message: impl Into<String>) -> Self {
        Self {
            code: EXIT_PARSE,
            message: message.into(),
            hint: None,
        }
    }

    fn store(message: impl Into<String>) -> Self {
        Self {
            code: EXIT_STORE,
            message: message.into(),
            hint: None,
        }
    }
}

#[derive(Parser)]
#[command(name = "lettra")]
#[command(about = "Bank transaction / invoice reconciliation (headless)")]
#[command(version)]
struct Cli {
    /// SQLite database holding snapshots and reconciliation state
    #[arg(long, env = "LETTRA_DB", default_value = "lettra.db", global = true)]
    db: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Import transaction and/or invoice snapshots from CSV
    #[command(after_help = "\
Examples:
  lettra import --transactions bank-export.csv
  lettra import --transactions bank.csv --invoices invoices.csv")]
    Import {
        /// Bank transaction snapshot (id,workspace_id,amount_minor,currency,description,date)
        #[arg(long)]
        transactions: Option<PathBuf>,

        /// Invoice snapshot (id,workspace_id,number,client_id,client_name,total_ttc_minor,currency,status,due_date)
        #[arg(long)]
        invoices: Option<PathBuf>,
    },

    /// Run one poll cycle and emit the next suggestion, if any
    #[command(after_help = "\
Examples:
  lettra cycle --workspace ws_1
  lettra cycle --workspace ws_1 --config lettra.toml --json")]
    Cycle {
        #[arg(long, short = 'w')]
        workspace: String,

        /// Engine tuning file (defaults apply when omitted)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Output JSON instead of a human summary
        #[arg(long)]
        json: bool,
    },

    /// List open suggestions without emitting anything
    Suggestions {
        #[arg(long, short = 'w')]
        workspace: String,

        #[arg(long)]
        config: Option<PathBuf>,

        #[arg(long)]
        json: bool,
    },

    /// Reconcile a transaction against an invoice
    #[command(after_help = "\
Examples:
  lettra link tx_8f2 inv_2024_031")]
    Link {
        transaction_id: String,
        invoice_id: String,
    },

    /// Ignore a suggestion: never auto-surface this transaction again
    Ignore {
        #[arg(long, short = 'w')]
        workspace: String,

        transaction_id: String,
    },
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {}", err.message);
            if let Some(hint) = err.hint {
                eprintln!("hint: {hint}");
            }
            ExitCode::from(err.code)
        }
    }
}

fn run(cli: Cli) -> Result<(), CliError> {
    match cli.command {
        Commands::Import {
            transactions,
            invoices,
        } => cmd_import(&cli.db, transactions, invoices),
        Commands::Cycle {
            workspace,
            config,
            json,
        } => cmd_cycle(&cli.db, &workspace, config, json),
        Commands::Suggestions {
            workspace,
            config,
            json,
        } => cmd_suggestions(&cli.db, &workspace, config, json),
        Commands::Link {
            transaction_id,
            invoice_id,
        } => cmd_link(&cli.db, &transaction_id, &invoice_id),
        Commands::Ignore {
            workspace,
            transaction_id,
        } => cmd_ignore(&cli.db, &workspace, &transaction_id),
    }
}

fn open_store(db: &Path) -> Result<SqliteStore, CliError> {
    SqliteStore::open(db).map_err(|e| CliError::store(e.to_string()))
}

fn load_config(path: Option<PathBuf>) -> Result<EngineConfig, CliError> {
    let Some(path) = path else {
        return Ok(EngineConfig::default());
    };
    let raw = std::fs::read_to_string(&path)
        .map_err(|e| CliError::usage(format!("cannot read {}: {e}", path.display())))?;
    EngineConfig::from_toml(&raw).map_err(CliError::parse)
}

fn cmd_import(
    db: &Path,
    transactions: Option<PathBuf>,
    invoices: Option<PathBuf>,
) -> Result<(), CliError> {
    if transactions.is_none() && invoices.is_none() {
        return Err(CliError::usage(
            "nothing to import: pass --transactions and/or --invoices",
        ));
    }
    let store = open_store(db)?;

    if let Some(path) = transactions {
        let raw = std::fs::read_to_string(&path)
            .map_err(|e| CliError::usage(format!("cannot read {}: {e}", path.display())))?;
        let rows = import::read_transactions(&raw).map_err(CliError::parse)?;
        let count = store
            .upsert_transactions(&rows)
            .map_err(|e| CliError::store(e.to_string()))?;
        println!("imported {count} transaction(s)");
    }

    if let Some(path) = invoices {
        let raw = std::fs::read_to_string(&path)
            .map_err(|e| CliError::usage(format!("cannot read {}: {e}", path.display())))?;
        let rows = import::read_invoices(&raw).map_err(CliError::parse)?;
        let count = store
            .upsert_invoices(&rows)
            .map_err(|e| CliError::store(e.to_string()))?;
        println!("imported {count} invoice(s)");
    }

    Ok(())
}

fn cmd_cycle(
    db: &Path,
    workspace: &str,
    config: Option<PathBuf>,
    json: bool,
) -> Result<(), CliError> {
    let config = load_config(config)?;
    let mut reconciler = Reconciler::new(open_store(db)?, config);

    let summary = reconciler
        .poll_cycle(workspace, Utc::now())
        .map_err(|e| CliError::store(e.to_string()))?;

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&summary).map_err(|e| CliError::store(e.to_string()))?
        );
        return Ok(());
    }

    println!(
        "{}: {} transaction(s), {} open invoice(s), {} suggestion(s) open",
        summary.workspace_id, summary.transactions, summary.open_invoices, summary.suggestions_open
    );
    match summary.emitted {
        Some(s) => print_suggestion(&s),
        None => println!("nothing to show (cool-down active or no high-confidence match)"),
    }
    Ok(())
}

fn cmd_suggestions(
    db: &Path,
    workspace: &str,
    config: Option<PathBuf>,
    json: bool,
) -> Result<(), CliError> {
    let config = load_config(config)?;
    let mut reconciler = Reconciler::new(open_store(db)?, config);

    reconciler
        .refresh(workspace)
        .map_err(|e| CliError::store(e.to_string()))?;
    let suggestions = reconciler.suggestions(workspace);

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&suggestions)
                .map_err(|e| CliError::store(e.to_string()))?
        );
        return Ok(());
    }

    if suggestions.is_empty() {
        println!("no open suggestions");
        return Ok(());
    }
    for s in &suggestions {
        print_suggestion(s);
    }
    Ok(())
}

fn print_suggestion(s: &Suggestion) {
    match s.top_candidate() {
        Some(c) => println!(
            "{} [{}] -> invoice {} ({}, {:?}, {} candidate(s))",
            s.transaction_id,
            s.state,
            c.invoice_number,
            c.confidence,
            c.reasons,
            s.matching_invoices.len()
        ),
        None => println!("{} [{}] (no candidates)", s.transaction_id, s.state),
    }
}

fn cmd_link(db: &Path, transaction_id: &str, invoice_id: &str) -> Result<(), CliError> {
    let store = open_store(db)?;
    let workspace = store
        .transaction(transaction_id)
        .map_err(|e| CliError::store(e.to_string()))?
        .map(|t| t.workspace_id)
        .unwrap_or_default();

    let mut reconciler = Reconciler::new(store, EngineConfig::default());
    let outcome = reconciler
        .link(&workspace, transaction_id, invoice_id, Utc::now())
        .map_err(|e| CliError {
            code: link_exit_code(&e),
            message: e.to_string(),
            hint: match e {
                lettra_core::LinkError::InvoiceNotEligible { .. } => {
                    Some("run `lettra cycle` to resync suggestions".into())
                }
                _ => None,
            },
        })?;

    match outcome {
        LinkOutcome::Linked => {
            println!("linked {transaction_id} -> {invoice_id}; invoice marked paid")
        }
        LinkOutcome::AlreadyLinked => {
            println!("{transaction_id} was already reconciled; nothing to do")
        }
    }
    Ok(())
}

fn cmd_ignore(db: &Path, workspace: &str, transaction_id: &str) -> Result<(), CliError> {
    let mut reconciler = Reconciler::new(open_store(db)?, EngineConfig::default());
    reconciler
        .ignore(workspace, transaction_id)
        .map_err(|e| CliError::store(e.to_string()))?;
    println!("{transaction_id} will no longer be suggested");
    Ok(())
}
