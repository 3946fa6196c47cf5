//! Error types for ticket issuance, storage and check-in.

use crate::signature::SignatureError;
use crate::ticket::TicketId;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for ticketing operations.
pub type Result<T> = std::result::Result<T, TicketError>;

/// Error taxonomy for the ticketing core.
///
/// Expected redemption outcomes (`Accepted`, `AlreadyChecked`, `InvalidSignature`,
/// `UnknownTicket`) are NOT errors; they are returned as
/// [`RedeemOutcome`](crate::verifier::RedeemOutcome) values. This enum only covers
/// failures a caller has to handle as failures.
#[derive(Debug, Error)]
pub enum TicketError {
    // ═══════════════════════════════════════════════════════════
    // Input Errors
    // ═══════════════════════════════════════════════════════════

    /// Caller input was rejected before any storage mutation.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Untrusted signature bytes or text could not be decoded.
    #[error("Malformed signature: {0}")]
    MalformedSignature(#[from] SignatureError),

    // ═══════════════════════════════════════════════════════════
    // Ledger Errors
    // ═══════════════════════════════════════════════════════════

    /// Storage layer or transport failure (including timeouts).
    ///
    /// Never retried inside the core.
    #[error("Ledger unavailable: {0}")]
    LedgerUnavailable(String),

    /// The store was created by an incompatible schema version.
    ///
    /// Fatal at startup: the process must not serve with this store.
    #[error("Ledger schema mismatch: {0}")]
    SchemaMismatch(String),

    /// A record in the ledger log could not be read back.
    #[error("Corrupt ledger entry at line {line}: {reason}")]
    CorruptLedger {
        /// Line number (1-based) of the offending entry.
        line: usize,
        /// Description of the corruption.
        reason: String,
    },

    /// No ticket with this id exists.
    #[error("Ticket {0} not found")]
    TicketNotFound(TicketId),

    /// The ticket already carries a signature.
    #[error("Ticket {0} is already signed")]
    AlreadySigned(TicketId),

    // ═══════════════════════════════════════════════════════════
    // Key Errors
    // ═══════════════════════════════════════════════════════════

    /// Key file does not exist.
    #[error("Key file missing: {}", path.display())]
    KeyMissing {
        /// Expected key location.
        path: PathBuf,
    },

    /// Key file exists but does not hold a usable P-256 key.
    #[error("Key file {} is unusable: {reason}", path.display())]
    KeyCorrupt {
        /// Key location.
        path: PathBuf,
        /// Parser or I/O failure description.
        reason: String,
    },

    /// Refusing to overwrite an existing key file.
    #[error("Key file already exists: {}", path.display())]
    KeyAlreadyExists {
        /// Existing key location.
        path: PathBuf,
    },

    // ═══════════════════════════════════════════════════════════
    // Checker Codes
    // ═══════════════════════════════════════════════════════════

    /// Too many collisions while generating checker codes.
    #[error("Checker code space exhausted: generated {generated} of {requested} codes")]
    CodeSpaceExhausted {
        /// Codes stored before giving up.
        generated: usize,
        /// Codes requested.
        requested: usize,
    },

    // ═══════════════════════════════════════════════════════════
    // Configuration
    // ═══════════════════════════════════════════════════════════

    /// Invalid configuration value.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl TicketError {
    /// Whether this error is a storage availability failure.
    #[must_use]
    pub const fn is_unavailable(&self) -> bool {
        matches!(self, Self::LedgerUnavailable(_))
    }
}
