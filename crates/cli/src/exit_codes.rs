//! CLI Exit Code Registry
//!
//! Single source of truth for all exit codes. Exit codes are part of the
//! shell contract — scripts rely on them.
//!
//! | Range | Domain    | Description                                |
//! |-------|-----------|--------------------------------------------|
//! | 0     | Universal | Success (incl. already-linked no-ops)      |
//! | 1     | Universal | General error (unspecified)                |
//! | 2     | Universal | CLI usage error (bad args, missing file)   |
//! | 3-9   | Input     | Snapshot/config parse errors               |
//! | 10-19 | Link      | Reconciliation link rejections             |
//! | 20-29 | Store     | Persistence / upstream fetch failures      |

use lettra_core::LinkError;

/// Success - command completed without errors.
pub const EXIT_SUCCESS: u8 = 0;

/// General error - unspecified failure. Prefer a specific code.
pub const EXIT_ERROR: u8 = 1;

/// Usage error - bad arguments, missing required options.
pub const EXIT_USAGE: u8 = 2;

/// Parse error reading a CSV snapshot or TOML config.
pub const EXIT_PARSE: u8 = 3;

/// Invoice can no longer be reconciled (paid/canceled concurrently).
pub const EXIT_LINK_NOT_ELIGIBLE: u8 = 10;

/// Stale reference: transaction or invoice not found.
pub const EXIT_LINK_NOT_FOUND: u8 = 11;

/// Cross-workspace link attempt (authorization violation).
pub const EXIT_LINK_CROSS_WORKSPACE: u8 = 12;

/// Transaction and invoice currencies differ.
pub const EXIT_LINK_CURRENCY: u8 = 13;

/// Store/upstream failure; the operation can be retried.
pub const EXIT_STORE: u8 = 20;

/// Map a link failure to its exit code. `AlreadyLinked` never reaches this
/// point: callers treat it as success.
pub fn link_exit_code(err: &LinkError) -> u8 {
    match err {
        LinkError::AlreadyLinked { .. } => EXIT_SUCCESS,
        LinkError::InvoiceNotEligible { .. } => EXIT_LINK_NOT_ELIGIBLE,
        LinkError::TransactionNotFound(_) | LinkError::InvoiceNotFound(_) => EXIT_LINK_NOT_FOUND,
        LinkError::CrossWorkspace { .. } => EXIT_LINK_CROSS_WORKSPACE,
        LinkError::CurrencyMismatch { .. } => EXIT_LINK_CURRENCY,
        LinkError::Storage(_) => EXIT_STORE,
    }
}
