//! Ticket ledger abstraction.
//!
//! The ledger is the single source of truth for issued tickets and checker
//! codes. It owns id allocation and the check-in flag, and is the only place
//! where those two critical sections are serialized.
//!
//! # Implementations
//!
//! - `PostgresLedger` (in `ticketing-postgres`): transactional relational backend
//! - [`FlatFileLedger`]: locked append-only JSON-lines log
//! - `InMemoryLedger` (in [`crate::mocks`]): fast, deterministic testing
//!
//! All three satisfy the same atomicity contract: two concurrent
//! [`allocate_and_store`](TicketLedger::allocate_and_store) calls never receive
//! the same id, and under any number of concurrent
//! [`mark_checked_if_unchecked`](TicketLedger::mark_checked_if_unchecked) calls
//! for one ticket exactly one observes [`CheckInTransition::Checked`].

mod flat_file;
mod state;

pub use flat_file::FlatFileLedger;
pub use state::{LedgerState, LogRecord};

use crate::error::{Result, TicketError};
use crate::signature::CanonicalSignature;
use crate::ticket::{AllocatedTicket, LedgerStats, Ticket, TicketId, TicketNo};
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

/// Boxed future returned by [`TicketLedger`] methods.
pub type LedgerFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// Outcome of an atomic check-in attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckInTransition {
    /// The flag flipped false→true in this call. Carries the updated ticket.
    Checked(Ticket),
    /// The ticket was already checked in. Carries the ticket as stored.
    AlreadyChecked(Ticket),
    /// No ticket with this number exists.
    NotFound,
}

impl CheckInTransition {
    /// Whether this call performed the transition.
    #[must_use]
    pub const fn transitioned(&self) -> bool {
        matches!(self, Self::Checked(_))
    }
}

/// Outcome of undoing a check-in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UncheckTransition {
    /// The flag flipped true→false in this call.
    Unchecked,
    /// The ticket exists but was not checked in.
    NotChecked,
    /// No ticket with this number exists.
    NotFound,
}

/// Proof that an operator typed the confirmation phrase for a bulk wipe.
///
/// [`TicketLedger::clear_all`] cannot be called without one.
#[derive(Debug)]
pub struct ClearConfirmation(());

impl ClearConfirmation {
    /// The exact phrase that unlocks [`TicketLedger::clear_all`].
    pub const PHRASE: &'static str = "CLEAR ALL TICKETS";

    /// Build a confirmation from operator input.
    ///
    /// # Errors
    ///
    /// Returns [`TicketError::InvalidInput`] unless `phrase` equals
    /// [`PHRASE`](Self::PHRASE) exactly.
    pub fn from_phrase(phrase: &str) -> Result<Self> {
        if phrase == Self::PHRASE {
            Ok(Self(()))
        } else {
            Err(TicketError::InvalidInput(format!(
                "confirmation phrase must be exactly {:?}",
                Self::PHRASE
            )))
        }
    }
}

/// Durable, concurrency-safe store of tickets and checker codes.
///
/// # Dyn Compatibility
///
/// Methods return [`LedgerFuture`] so the ledger can be shared as
/// `Arc<dyn TicketLedger>` and selected at runtime.
///
/// # Errors
///
/// Every method fails with [`TicketError::LedgerUnavailable`] on storage or
/// transport failure, including exhausting the operation timeout. Failures are
/// never retried internally and a failed mutation leaves no partial effect.
pub trait TicketLedger: Send + Sync {
    /// Allocate the next id and store a ticket row with an empty signature.
    ///
    /// The returned ticket number is derived from the id by the ledger's
    /// [`TicketNoFormat`](crate::ticket::TicketNoFormat).
    fn allocate_and_store<'a>(&'a self, name: &'a str, email: &'a str)
    -> LedgerFuture<'a, AllocatedTicket>;

    /// Fill in the signature of a still-unsigned ticket.
    ///
    /// Fails with [`TicketError::TicketNotFound`] if the id does not exist and
    /// [`TicketError::AlreadySigned`] if it already carries a signature.
    fn attach_signature<'a>(
        &'a self,
        id: TicketId,
        signature: &'a CanonicalSignature,
    ) -> LedgerFuture<'a, ()>;

    /// Look up a ticket by number.
    fn find_ticket<'a>(&'a self, ticket_no: &'a TicketNo) -> LedgerFuture<'a, Option<Ticket>>;

    /// Tickets still carrying the empty signature sentinel, in id order.
    fn unsigned_tickets(&self) -> LedgerFuture<'_, Vec<Ticket>>;

    /// Atomically flip `checked` from false to true.
    fn mark_checked_if_unchecked<'a>(
        &'a self,
        ticket_no: &'a TicketNo,
    ) -> LedgerFuture<'a, CheckInTransition>;

    /// Atomically flip `checked` from true to false.
    fn mark_unchecked<'a>(&'a self, ticket_no: &'a TicketNo) -> LedgerFuture<'a, UncheckTransition>;

    /// Uncheck every ticket. Returns how many changed.
    fn reset_all_checked(&self) -> LedgerFuture<'_, u64>;

    /// Current counters.
    fn stats(&self) -> LedgerFuture<'_, LedgerStats>;

    /// Store a checker code. Returns `false` (not an error) if it already exists.
    fn insert_checker_code<'a>(
        &'a self,
        code: &'a str,
        note: Option<&'a str>,
    ) -> LedgerFuture<'a, bool>;

    /// Whether a checker code exists.
    fn checker_code_exists<'a>(&'a self, code: &'a str) -> LedgerFuture<'a, bool>;

    /// Wipe every ticket and restart id allocation at 1. Checker codes are kept.
    ///
    /// Returns the number of tickets removed.
    fn clear_all(&self, confirmation: ClearConfirmation) -> LedgerFuture<'_, u64>;
}

/// Bound a ledger call by `limit`, mapping exhaustion to
/// [`TicketError::LedgerUnavailable`].
///
/// Also counts every unavailable result under `ledger.unavailable`.
///
/// # Errors
///
/// Returns the inner error, or `LedgerUnavailable` if `limit` elapses first.
pub async fn with_deadline<T, F>(backend: &'static str, limit: Duration, operation: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    let result = match tokio::time::timeout(limit, operation).await {
        Ok(result) => result,
        Err(_) => Err(TicketError::LedgerUnavailable(format!(
            "{backend} ledger operation timed out after {}ms",
            limit.as_millis()
        ))),
    };
    note_unavailable(backend, &result);
    result
}

/// Log and count a [`TicketError::LedgerUnavailable`] result.
pub fn note_unavailable<T>(backend: &'static str, result: &Result<T>) {
    if let Err(error) = result {
        if error.is_unavailable() {
            tracing::warn!(backend, error = %error, "Ledger unavailable");
            metrics::counter!("ledger.unavailable", "backend" => backend).increment(1);
        }
    }
}
