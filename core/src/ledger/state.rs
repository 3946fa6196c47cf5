//! Ledger state machine shared by the log-backed ledgers.
//!
//! State only changes by applying a [`LogRecord`]. Operations are split into a
//! pure `plan_*` step that inspects the current state and returns the value for
//! the caller together with the records to persist, and [`LedgerState::apply`],
//! which folds a persisted record in. The flat-file ledger replays its log
//! through `apply` on open, so replay and live operation share one code path.

use super::{CheckInTransition, UncheckTransition};
use crate::error::{Result, TicketError};
use crate::signature::CanonicalSignature;
use crate::ticket::{AllocatedTicket, LedgerStats, Ticket, TicketId, TicketNo, TicketNoFormat};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// One persisted ledger mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum LogRecord {
    /// A ticket row was allocated with an empty signature.
    Allocated {
        /// Assigned id.
        id: TicketId,
        /// Derived ticket number.
        ticket_no: TicketNo,
        /// Holder name.
        name: String,
        /// Holder email.
        email: String,
        /// Allocation time.
        issued_at: DateTime<Utc>,
    },
    /// A signature was attached to an allocated ticket.
    Signed {
        /// Ticket id.
        id: TicketId,
        /// Canonical signature over the ticket number.
        signature: CanonicalSignature,
    },
    /// A ticket was checked in.
    Checked {
        /// Ticket id.
        id: TicketId,
        /// Check-in time.
        at: DateTime<Utc>,
    },
    /// A check-in was undone.
    Unchecked {
        /// Ticket id.
        id: TicketId,
    },
    /// Every ticket was unchecked.
    ChecksReset {
        /// Reset time.
        at: DateTime<Utc>,
    },
    /// A checker code was stored.
    CheckerAdded {
        /// The code.
        code: String,
        /// Optional operator note.
        note: Option<String>,
    },
    /// All tickets were wiped and id allocation restarted.
    Cleared {
        /// Wipe time.
        at: DateTime<Utc>,
    },
}

/// In-memory view of the ledger.
#[derive(Debug, Clone)]
pub struct LedgerState {
    format: TicketNoFormat,
    tickets: BTreeMap<TicketId, Ticket>,
    by_no: HashMap<TicketNo, TicketId>,
    checkers: HashMap<String, Option<String>>,
    next_id: i64,
}

impl LedgerState {
    /// Empty state deriving ticket numbers with `format`.
    #[must_use]
    pub fn new(format: TicketNoFormat) -> Self {
        Self {
            format,
            tickets: BTreeMap::new(),
            by_no: HashMap::new(),
            checkers: HashMap::new(),
            next_id: 1,
        }
    }

    /// Ticket number format in use.
    #[must_use]
    pub const fn format(&self) -> &TicketNoFormat {
        &self.format
    }

    // ═══════════════════════════════════════════════════════════
    // Apply
    // ═══════════════════════════════════════════════════════════

    /// Fold a persisted record into the state.
    ///
    /// # Errors
    ///
    /// Returns a description of the inconsistency if the record contradicts
    /// the current state (duplicate id or number, unknown ticket, double sign).
    /// Callers reading a log turn this into [`TicketError::CorruptLedger`].
    pub fn apply(&mut self, record: &LogRecord) -> std::result::Result<(), String> {
        match record {
            LogRecord::Allocated {
                id,
                ticket_no,
                name,
                email,
                issued_at,
            } => {
                if id.get() < self.next_id {
                    return Err(format!("id {id} allocated out of order (next is {})", self.next_id));
                }
                if self.by_no.contains_key(ticket_no) {
                    return Err(format!("ticket number {ticket_no} allocated twice"));
                }
                self.by_no.insert(ticket_no.clone(), *id);
                self.tickets.insert(
                    *id,
                    Ticket {
                        id: *id,
                        ticket_no: ticket_no.clone(),
                        name: name.clone(),
                        email: email.clone(),
                        signature: None,
                        checked: false,
                        issued_at: *issued_at,
                        checked_at: None,
                    },
                );
                self.next_id = id.get() + 1;
            }
            LogRecord::Signed { id, signature } => {
                let ticket = self.ticket_mut(*id)?;
                if ticket.signature.is_some() {
                    return Err(format!("ticket {id} signed twice"));
                }
                ticket.signature = Some(*signature);
            }
            LogRecord::Checked { id, at } => {
                let ticket = self.ticket_mut(*id)?;
                ticket.checked = true;
                ticket.checked_at = Some(*at);
            }
            LogRecord::Unchecked { id } => {
                let ticket = self.ticket_mut(*id)?;
                ticket.checked = false;
                ticket.checked_at = None;
            }
            LogRecord::ChecksReset { .. } => {
                for ticket in self.tickets.values_mut() {
                    ticket.checked = false;
                    ticket.checked_at = None;
                }
            }
            LogRecord::CheckerAdded { code, note } => {
                if self.checkers.insert(code.clone(), note.clone()).is_some() {
                    return Err("checker code stored twice".to_string());
                }
            }
            LogRecord::Cleared { .. } => {
                self.tickets.clear();
                self.by_no.clear();
                self.next_id = 1;
            }
        }
        Ok(())
    }

    fn ticket_mut(&mut self, id: TicketId) -> std::result::Result<&mut Ticket, String> {
        self.tickets
            .get_mut(&id)
            .ok_or_else(|| format!("record refers to unknown ticket {id}"))
    }

    // ═══════════════════════════════════════════════════════════
    // Plan
    // ═══════════════════════════════════════════════════════════

    /// Plan allocation of the next ticket.
    #[must_use]
    pub fn plan_allocate(&self, name: &str, email: &str, now: DateTime<Utc>) -> (AllocatedTicket, LogRecord) {
        let id = TicketId::new(self.next_id);
        let ticket_no = self.format.format(id);
        let allocated = AllocatedTicket {
            id,
            ticket_no: ticket_no.clone(),
            issued_at: now,
        };
        let record = LogRecord::Allocated {
            id,
            ticket_no,
            name: name.to_string(),
            email: email.to_string(),
            issued_at: now,
        };
        (allocated, record)
    }

    /// Plan attaching a signature.
    ///
    /// # Errors
    ///
    /// [`TicketError::TicketNotFound`] or [`TicketError::AlreadySigned`].
    pub fn plan_attach(&self, id: TicketId, signature: &CanonicalSignature) -> Result<LogRecord> {
        let ticket = self.tickets.get(&id).ok_or(TicketError::TicketNotFound(id))?;
        if ticket.signature.is_some() {
            return Err(TicketError::AlreadySigned(id));
        }
        Ok(LogRecord::Signed {
            id,
            signature: *signature,
        })
    }

    /// Plan a check-in.
    #[must_use]
    pub fn plan_check_in(
        &self,
        ticket_no: &TicketNo,
        now: DateTime<Utc>,
    ) -> (CheckInTransition, Option<LogRecord>) {
        let Some(ticket) = self.find(ticket_no) else {
            return (CheckInTransition::NotFound, None);
        };
        if ticket.checked {
            return (CheckInTransition::AlreadyChecked(ticket.clone()), None);
        }
        let mut updated = ticket.clone();
        updated.checked = true;
        updated.checked_at = Some(now);
        (
            CheckInTransition::Checked(updated),
            Some(LogRecord::Checked { id: ticket.id, at: now }),
        )
    }

    /// Plan undoing a check-in.
    #[must_use]
    pub fn plan_uncheck(&self, ticket_no: &TicketNo) -> (UncheckTransition, Option<LogRecord>) {
        match self.find(ticket_no) {
            None => (UncheckTransition::NotFound, None),
            Some(ticket) if !ticket.checked => (UncheckTransition::NotChecked, None),
            Some(ticket) => (
                UncheckTransition::Unchecked,
                Some(LogRecord::Unchecked { id: ticket.id }),
            ),
        }
    }

    /// Plan unchecking every ticket.
    #[must_use]
    pub fn plan_reset_checks(&self, now: DateTime<Utc>) -> (u64, Option<LogRecord>) {
        let changed = self.tickets.values().filter(|t| t.checked).count() as u64;
        let record = (changed > 0).then_some(LogRecord::ChecksReset { at: now });
        (changed, record)
    }

    /// Plan storing a checker code.
    #[must_use]
    pub fn plan_checker(&self, code: &str, note: Option<&str>) -> (bool, Option<LogRecord>) {
        if self.checkers.contains_key(code) {
            return (false, None);
        }
        let record = LogRecord::CheckerAdded {
            code: code.to_string(),
            note: note.map(str::to_string),
        };
        (true, Some(record))
    }

    /// Plan a full wipe.
    #[must_use]
    pub fn plan_clear(&self, now: DateTime<Utc>) -> (u64, LogRecord) {
        (self.tickets.len() as u64, LogRecord::Cleared { at: now })
    }

    // ═══════════════════════════════════════════════════════════
    // Queries
    // ═══════════════════════════════════════════════════════════

    /// Ticket by number.
    #[must_use]
    pub fn find(&self, ticket_no: &TicketNo) -> Option<&Ticket> {
        self.by_no.get(ticket_no).and_then(|id| self.tickets.get(id))
    }

    /// Ticket by id.
    #[must_use]
    pub fn get(&self, id: TicketId) -> Option<&Ticket> {
        self.tickets.get(&id)
    }

    /// Unsigned tickets in id order.
    #[must_use]
    pub fn unsigned(&self) -> Vec<Ticket> {
        self.tickets.values().filter(|t| t.is_unsigned()).cloned().collect()
    }

    /// Current counters.
    #[must_use]
    pub fn stats(&self) -> LedgerStats {
        let tickets = self.tickets.values();
        LedgerStats {
            total: self.tickets.len() as u64,
            checked: tickets.clone().filter(|t| t.checked).count() as u64,
            unsigned: tickets.filter(|t| t.is_unsigned()).count() as u64,
        }
    }

    /// Whether a checker code exists.
    #[must_use]
    pub fn has_checker(&self, code: &str) -> bool {
        self.checkers.contains_key(code)
    }

    /// Note stored with a checker code.
    #[must_use]
    pub fn checker_note(&self, code: &str) -> Option<&str> {
        self.checkers.get(code).and_then(Option::as_deref)
    }

    /// Number of stored checker codes.
    #[must_use]
    pub fn checker_count(&self) -> usize {
        self.checkers.len()
    }
}
