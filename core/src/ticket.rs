//! Ticket data model and ticket-number format.

use crate::error::{Result, TicketError};
use crate::signature::CanonicalSignature;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Internal sequential ticket id, assigned by the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TicketId(i64);

impl TicketId {
    /// Wrap a raw id.
    #[must_use]
    pub const fn new(id: i64) -> Self {
        Self(id)
    }

    /// Raw id value.
    #[must_use]
    pub const fn get(self) -> i64 {
        self.0
    }
}

impl fmt::Display for TicketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Human-readable ticket number, e.g. `CYP001`.
///
/// This is the exact message that gets signed.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TicketNo(String);

impl TicketNo {
    /// Wrap a ticket number as presented (e.g. scanned from a code).
    #[must_use]
    pub fn new(ticket_no: impl Into<String>) -> Self {
        Self(ticket_no.into())
    }

    /// String form.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Bytes that are signed and verified.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

impl fmt::Display for TicketNo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for TicketNo {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Derivation of ticket numbers from ids: `<prefix><id zero-padded to width>`.
///
/// The id is never truncated, so ids wider than `width` still map to distinct
/// numbers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TicketNoFormat {
    /// Leading text, e.g. `CYP`.
    pub prefix: String,
    /// Minimum number of digits.
    pub width: usize,
}

impl TicketNoFormat {
    /// Create a format after validating it.
    ///
    /// # Errors
    ///
    /// Returns [`TicketError::Config`] if the prefix is blank, ends with a digit
    /// (which would make numbers ambiguous) or the width is zero.
    pub fn new(prefix: impl Into<String>, width: usize) -> Result<Self> {
        let format = Self {
            prefix: prefix.into(),
            width,
        };
        format.validate()?;
        Ok(format)
    }

    /// Check the format invariants.
    ///
    /// # Errors
    ///
    /// See [`TicketNoFormat::new`].
    pub fn validate(&self) -> Result<()> {
        if self.prefix.trim().is_empty() {
            return Err(TicketError::Config("ticket number prefix is empty".into()));
        }
        if self.prefix.ends_with(|c: char| c.is_ascii_digit()) {
            return Err(TicketError::Config(format!(
                "ticket number prefix {:?} must not end with a digit",
                self.prefix
            )));
        }
        if self.width == 0 {
            return Err(TicketError::Config("ticket number width must be > 0".into()));
        }
        Ok(())
    }

    /// Derive the ticket number for an id.
    #[must_use]
    pub fn format(&self, id: TicketId) -> TicketNo {
        TicketNo(format!("{}{:0width$}", self.prefix, id.get(), width = self.width))
    }

    /// Exact inverse of [`format`](Self::format).
    ///
    /// Returns `None` unless `ticket_no` is precisely what `format` produces for
    /// some positive id.
    #[must_use]
    pub fn parse(&self, ticket_no: &str) -> Option<TicketId> {
        let digits = ticket_no.strip_prefix(&self.prefix)?;
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        let id = TicketId::new(digits.parse().ok()?);
        (id.get() > 0 && self.format(id).as_str() == ticket_no).then_some(id)
    }
}

/// An issued ticket as stored in the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ticket {
    /// Sequential id.
    pub id: TicketId,
    /// Derived display number.
    pub ticket_no: TicketNo,
    /// Holder name.
    pub name: String,
    /// Holder email address.
    pub email: String,
    /// Signature over `ticket_no`; `None` while the ticket is still unsigned.
    pub signature: Option<CanonicalSignature>,
    /// Whether the ticket has been checked in.
    pub checked: bool,
    /// Allocation time.
    pub issued_at: DateTime<Utc>,
    /// Time of the most recent check-in, if checked.
    pub checked_at: Option<DateTime<Utc>>,
}

impl Ticket {
    /// Whether the ticket is still waiting for its signature.
    #[must_use]
    pub const fn is_unsigned(&self) -> bool {
        self.signature.is_none()
    }

    /// Signature in transport text form, if signed.
    #[must_use]
    pub fn signature_text(&self) -> Option<String> {
        self.signature.as_ref().map(CanonicalSignature::to_text)
    }
}

/// Result of allocating a new ticket row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllocatedTicket {
    /// Newly assigned id.
    pub id: TicketId,
    /// Ticket number derived from `id`.
    pub ticket_no: TicketNo,
    /// Allocation time.
    pub issued_at: DateTime<Utc>,
}

/// Ledger counters shown at the check-in desk.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerStats {
    /// Tickets in the ledger.
    pub total: u64,
    /// Tickets checked in.
    pub checked: u64,
    /// Tickets still waiting for a signature.
    pub unsigned: u64,
}

#[cfg(test)]
#[allow(clippy::expect_used)]
mod tests {
    use super::*;

    fn cyp() -> TicketNoFormat {
        TicketNoFormat::new("CYP", 3).expect("valid format")
    }

    #[test]
    fn formats_with_zero_padding() {
        assert_eq!(cyp().format(TicketId::new(1)).as_str(), "CYP001");
        assert_eq!(cyp().format(TicketId::new(42)).as_str(), "CYP042");
    }

    #[test]
    fn wide_ids_are_not_truncated() {
        assert_eq!(cyp().format(TicketId::new(1234)).as_str(), "CYP1234");
    }

    #[test]
    fn parse_inverts_format() {
        for id in [1, 9, 10, 999, 1000, 123_456] {
            let no = cyp().format(TicketId::new(id));
            assert_eq!(cyp().parse(no.as_str()), Some(TicketId::new(id)));
        }
    }

    #[test]
    fn parse_rejects_non_canonical_numbers() {
        let format = cyp();
        assert_eq!(format.parse("CYP01"), None);
        assert_eq!(format.parse("CYP0001"), None);
        assert_eq!(format.parse("CYP000"), None);
        assert_eq!(format.parse("XYZ001"), None);
        assert_eq!(format.parse("CYP"), None);
        assert_eq!(format.parse("CYP-01"), None);
        assert_eq!(format.parse("CYP99999999999999999999"), None);
    }

    #[test]
    fn rejects_invalid_formats() {
        assert!(TicketNoFormat::new("", 3).is_err());
        assert!(TicketNoFormat::new("CYP", 0).is_err());
        assert!(TicketNoFormat::new("A1", 3).is_err());
    }

    #[test]
    fn unsigned_ticket_has_no_signature_text() {
        let ticket = Ticket {
            id: TicketId::new(1),
            ticket_no: cyp().format(TicketId::new(1)),
            name: "Alice".into(),
            email: "alice@example.com".into(),
            signature: None,
            checked: false,
            issued_at: Utc::now(),
            checked_at: None,
        };
        assert!(ticket.is_unsigned());
        assert_eq!(ticket.signature_text(), None);
    }
}
