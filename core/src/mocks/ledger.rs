//! In-memory ledger for testing.

use crate::error::{Result, TicketError};
use crate::ledger::{
    CheckInTransition, ClearConfirmation, LedgerFuture, LedgerState, LogRecord, TicketLedger,
    UncheckTransition,
};
use crate::signature::CanonicalSignature;
use crate::ticket::{AllocatedTicket, LedgerStats, Ticket, TicketId, TicketNo, TicketNoFormat};
use chrono::Utc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

/// In-memory [`TicketLedger`].
///
/// Runs the same state machine as the flat-file ledger behind a mutex, so the
/// atomicity contract holds. Supports fault injection for recovery tests.
#[derive(Debug, Clone)]
pub struct InMemoryLedger {
    state: Arc<Mutex<LedgerState>>,
    records: Arc<Mutex<Vec<LogRecord>>>,
    fail_next_attach: Arc<AtomicBool>,
    preempt_next_attach: Arc<AtomicBool>,
    unavailable: Arc<AtomicBool>,
}

impl InMemoryLedger {
    /// Create an empty ledger deriving ticket numbers with `format`.
    #[must_use]
    pub fn new(format: TicketNoFormat) -> Self {
        Self {
            state: Arc::new(Mutex::new(LedgerState::new(format))),
            records: Arc::new(Mutex::new(Vec::new())),
            fail_next_attach: Arc::new(AtomicBool::new(false)),
            preempt_next_attach: Arc::new(AtomicBool::new(false)),
            unavailable: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Make the next `attach_signature` call fail with `LedgerUnavailable`.
    pub fn fail_next_attach(&self) {
        self.fail_next_attach.store(true, Ordering::SeqCst);
    }

    /// Commit the signature of the next `attach_signature` call just before
    /// that call runs, as a concurrent recovery pass would.
    pub fn preempt_next_attach(&self) {
        self.preempt_next_attach.store(true, Ordering::SeqCst);
    }

    /// Make every call fail with `LedgerUnavailable` until reset.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Every record committed so far (for testing).
    #[must_use]
    pub fn records(&self) -> Vec<LogRecord> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Copy of the current state (for testing).
    #[must_use]
    pub fn snapshot(&self) -> LedgerState {
        self.state.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn commit<T, F>(&self, decide: F) -> Result<T>
    where
        F: FnOnce(&LedgerState) -> Result<(T, Vec<LogRecord>)>,
    {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(TicketError::LedgerUnavailable("simulated outage".to_string()));
        }
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let (value, records) = decide(&state)?;
        let mut log = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        for record in records {
            state.apply(&record).map_err(|reason| TicketError::CorruptLedger {
                line: log.len() + 1,
                reason,
            })?;
            log.push(record);
        }
        Ok(value)
    }

    fn read<T>(&self, query: impl FnOnce(&LedgerState) -> T) -> Result<T> {
        self.commit(|state| Ok((query(state), Vec::new())))
    }
}

impl TicketLedger for InMemoryLedger {
    fn allocate_and_store<'a>(
        &'a self,
        name: &'a str,
        email: &'a str,
    ) -> LedgerFuture<'a, AllocatedTicket> {
        Box::pin(async move {
            self.commit(|state| {
                let (allocated, record) = state.plan_allocate(name, email, Utc::now());
                Ok((allocated, vec![record]))
            })
        })
    }

    fn attach_signature<'a>(
        &'a self,
        id: TicketId,
        signature: &'a CanonicalSignature,
    ) -> LedgerFuture<'a, ()> {
        Box::pin(async move {
            if self.fail_next_attach.swap(false, Ordering::SeqCst) {
                return Err(TicketError::LedgerUnavailable(
                    "simulated attach failure".to_string(),
                ));
            }
            if self.preempt_next_attach.swap(false, Ordering::SeqCst) {
                self.commit(|state| Ok(((), vec![state.plan_attach(id, signature)?])))?;
            }
            self.commit(|state| Ok(((), vec![state.plan_attach(id, signature)?])))
        })
    }

    fn find_ticket<'a>(&'a self, ticket_no: &'a TicketNo) -> LedgerFuture<'a, Option<Ticket>> {
        Box::pin(async move { self.read(|state| state.find(ticket_no).cloned()) })
    }

    fn unsigned_tickets(&self) -> LedgerFuture<'_, Vec<Ticket>> {
        Box::pin(async move { self.read(LedgerState::unsigned) })
    }

    fn mark_checked_if_unchecked<'a>(
        &'a self,
        ticket_no: &'a TicketNo,
    ) -> LedgerFuture<'a, CheckInTransition> {
        Box::pin(async move {
            self.commit(|state| {
                let (transition, record) = state.plan_check_in(ticket_no, Utc::now());
                Ok((transition, record.into_iter().collect()))
            })
        })
    }

    fn mark_unchecked<'a>(&'a self, ticket_no: &'a TicketNo) -> LedgerFuture<'a, UncheckTransition> {
        Box::pin(async move {
            self.commit(|state| {
                let (transition, record) = state.plan_uncheck(ticket_no);
                Ok((transition, record.into_iter().collect()))
            })
        })
    }

    fn reset_all_checked(&self) -> LedgerFuture<'_, u64> {
        Box::pin(async move {
            self.commit(|state| {
                let (changed, record) = state.plan_reset_checks(Utc::now());
                Ok((changed, record.into_iter().collect()))
            })
        })
    }

    fn stats(&self) -> LedgerFuture<'_, LedgerStats> {
        Box::pin(async move { self.read(LedgerState::stats) })
    }

    fn insert_checker_code<'a>(
        &'a self,
        code: &'a str,
        note: Option<&'a str>,
    ) -> LedgerFuture<'a, bool> {
        Box::pin(async move {
            self.commit(|state| {
                let (inserted, record) = state.plan_checker(code, note);
                Ok((inserted, record.into_iter().collect()))
            })
        })
    }

    fn checker_code_exists<'a>(&'a self, code: &'a str) -> LedgerFuture<'a, bool> {
        Box::pin(async move { self.read(|state| state.has_checker(code)) })
    }

    fn clear_all(&self, _confirmation: ClearConfirmation) -> LedgerFuture<'_, u64> {
        Box::pin(async move {
            self.commit(|state| {
                let (removed, record) = state.plan_clear(Utc::now());
                Ok((removed, vec![record]))
            })
        })
    }
}
