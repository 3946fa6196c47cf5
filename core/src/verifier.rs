//! Ticket redemption at the door.

use crate::error::Result;
use crate::keys::TicketPublicKey;
use crate::ledger::{CheckInTransition, TicketLedger};
use crate::payload::QrPayload;
use crate::signature::CanonicalSignature;
use crate::ticket::{Ticket, TicketNo};
use std::sync::Arc;
use tracing::{info, warn};

/// Outcome of a redemption attempt.
///
/// All four are expected results for a front end to display, not errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RedeemOutcome {
    /// Signature valid and the ticket was checked in by this call.
    Accepted(Ticket),
    /// Signature valid but the ticket had already been checked in.
    AlreadyChecked(Ticket),
    /// Signature malformed or not made by the event key for this ticket number.
    InvalidSignature,
    /// Signature valid but the ledger has no such ticket.
    UnknownTicket,
}

impl RedeemOutcome {
    /// Short label, used as the `outcome` metric label.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Accepted(_) => "accepted",
            Self::AlreadyChecked(_) => "already_checked",
            Self::InvalidSignature => "invalid_signature",
            Self::UnknownTicket => "unknown_ticket",
        }
    }
}

/// Validates presented tickets and checks them in exactly once.
pub struct TicketVerifier<L: TicketLedger + ?Sized> {
    ledger: Arc<L>,
    public_key: TicketPublicKey,
}

impl<L: TicketLedger + ?Sized> TicketVerifier<L> {
    /// Create a verifier over `ledger` trusting `public_key`.
    #[must_use]
    pub const fn new(ledger: Arc<L>, public_key: TicketPublicKey) -> Self {
        Self { ledger, public_key }
    }

    /// Redeem a ticket number with its signature text.
    ///
    /// The signature is decoded and verified before the ledger is touched, so
    /// a presenter without a valid signature can never flip the check-in flag.
    ///
    /// # Errors
    ///
    /// Only [`TicketError::LedgerUnavailable`](crate::TicketError::LedgerUnavailable).
    pub async fn redeem(&self, ticket_no: &TicketNo, signature_text: &str) -> Result<RedeemOutcome> {
        let outcome = self.redeem_inner(ticket_no, signature_text).await?;
        metrics::counter!("tickets.redeemed", "outcome" => outcome.label()).increment(1);
        match &outcome {
            RedeemOutcome::Accepted(_) => info!(ticket_no = %ticket_no, "Ticket checked in"),
            other => warn!(ticket_no = %ticket_no, outcome = other.label(), "Ticket rejected"),
        }
        Ok(outcome)
    }

    /// Redeem raw scanner output (`"<ticket_no>,<signature_text>"`).
    ///
    /// An unparseable payload carries no verifiable signature and is reported
    /// as [`RedeemOutcome::InvalidSignature`] without touching the ledger.
    ///
    /// # Errors
    ///
    /// Only [`TicketError::LedgerUnavailable`](crate::TicketError::LedgerUnavailable).
    pub async fn redeem_payload(&self, raw: &str) -> Result<RedeemOutcome> {
        match QrPayload::parse(raw) {
            Ok(payload) => self.redeem(&payload.ticket_no, &payload.signature_text).await,
            Err(error) => {
                warn!(error = %error, "Unreadable ticket payload");
                metrics::counter!("tickets.redeemed", "outcome" => RedeemOutcome::InvalidSignature.label())
                    .increment(1);
                Ok(RedeemOutcome::InvalidSignature)
            }
        }
    }

    async fn redeem_inner(&self, ticket_no: &TicketNo, signature_text: &str) -> Result<RedeemOutcome> {
        let Ok(signature) = CanonicalSignature::from_text(signature_text) else {
            return Ok(RedeemOutcome::InvalidSignature);
        };
        if !self.public_key.verify(ticket_no.as_bytes(), &signature) {
            return Ok(RedeemOutcome::InvalidSignature);
        }

        Ok(match self.ledger.mark_checked_if_unchecked(ticket_no).await? {
            CheckInTransition::Checked(ticket) => RedeemOutcome::Accepted(ticket),
            CheckInTransition::AlreadyChecked(ticket) => RedeemOutcome::AlreadyChecked(ticket),
            CheckInTransition::NotFound => RedeemOutcome::UnknownTicket,
        })
    }
}
