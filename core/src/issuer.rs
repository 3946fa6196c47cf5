//! Ticket issuance: allocate, sign, attach.

use crate::error::{Result, TicketError};
use crate::keys::KeyManager;
use crate::ledger::TicketLedger;
use crate::ticket::Ticket;
use crate::validation::{is_valid_email, is_valid_name};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Creates signed tickets.
///
/// Issuance is two ledger commits around a signing step:
///
/// 1. [`allocate_and_store`](TicketLedger::allocate_and_store) assigns the id
///    and stores the row with an empty signature
/// 2. the ticket number is signed with the [`KeyManager`]
/// 3. [`attach_signature`](TicketLedger::attach_signature) fills the row in
///
/// If step 2 or 3 fails, the ticket stays in the ledger as unsigned and
/// [`complete_unsigned`](Self::complete_unsigned) finishes it later without
/// allocating a new id.
pub struct TicketIssuer<L: TicketLedger + ?Sized> {
    ledger: Arc<L>,
    keys: Arc<KeyManager>,
}

impl<L: TicketLedger + ?Sized> TicketIssuer<L> {
    /// Create an issuer over `ledger` signing with `keys`.
    #[must_use]
    pub const fn new(ledger: Arc<L>, keys: Arc<KeyManager>) -> Self {
        Self { ledger, keys }
    }

    /// Issue a signed ticket.
    ///
    /// If a concurrent [`complete_unsigned`](Self::complete_unsigned) signs the
    /// new row first, the stored ticket is returned.
    ///
    /// # Errors
    ///
    /// - [`TicketError::InvalidInput`] for a blank name or malformed email, before
    ///   anything is stored
    /// - [`TicketError::LedgerUnavailable`] from either ledger commit
    pub async fn issue(&self, name: &str, email: &str) -> Result<Ticket> {
        let name = name.trim();
        let email = email.trim();
        if !is_valid_name(name) {
            return Err(TicketError::InvalidInput("name must not be blank".to_string()));
        }
        if !is_valid_email(email) {
            return Err(TicketError::InvalidInput(format!("invalid email address: {email}")));
        }

        let allocated = self.ledger.allocate_and_store(name, email).await?;
        let signed = async {
            let signature = self.keys.sign(allocated.ticket_no.as_bytes())?;
            self.ledger.attach_signature(allocated.id, &signature).await?;
            Ok::<_, TicketError>(signature)
        }
        .await;

        let signature = match signed {
            Ok(signature) => signature,
            Err(TicketError::AlreadySigned(id)) => {
                // A recovery pass signed the row first; the stored ticket is the result.
                return match self.ledger.find_ticket(&allocated.ticket_no).await? {
                    Some(ticket) if !ticket.is_unsigned() => {
                        metrics::counter!("tickets.issued").increment(1);
                        info!(
                            ticket_id = id.get(),
                            ticket_no = %ticket.ticket_no,
                            "Ticket issued (signed by recovery pass)"
                        );
                        Ok(ticket)
                    }
                    _ => Err(TicketError::AlreadySigned(id)),
                };
            }
            Err(error) => {
                warn!(
                    ticket_id = allocated.id.get(),
                    ticket_no = %allocated.ticket_no,
                    error = %error,
                    "Ticket left unsigned"
                );
                return Err(error);
            }
        };

        metrics::counter!("tickets.issued").increment(1);
        info!(ticket_id = allocated.id.get(), ticket_no = %allocated.ticket_no, "Ticket issued");

        Ok(Ticket {
            id: allocated.id,
            ticket_no: allocated.ticket_no,
            name: name.to_string(),
            email: email.to_string(),
            signature: Some(signature),
            checked: false,
            issued_at: allocated.issued_at,
            checked_at: None,
        })
    }

    /// Sign every ticket still carrying the empty signature.
    ///
    /// Uses the stored ticket number, so ids are never reallocated. Tickets
    /// completed concurrently by another recovery pass are skipped.
    ///
    /// # Errors
    ///
    /// Returns [`TicketError::LedgerUnavailable`] from the ledger. Tickets
    /// completed before the failure stay completed.
    pub async fn complete_unsigned(&self) -> Result<Vec<Ticket>> {
        let pending = self.ledger.unsigned_tickets().await?;
        let mut completed = Vec::with_capacity(pending.len());

        for mut ticket in pending {
            let signature = self.keys.sign(ticket.ticket_no.as_bytes())?;
            match self.ledger.attach_signature(ticket.id, &signature).await {
                Ok(()) => {}
                Err(TicketError::AlreadySigned(id)) => {
                    debug!(ticket_id = id.get(), "Ticket signed by another recovery pass");
                    continue;
                }
                Err(error) => return Err(error),
            }
            ticket.signature = Some(signature);
            metrics::counter!("tickets.recovered").increment(1);
            info!(ticket_id = ticket.id.get(), ticket_no = %ticket.ticket_no, "Unsigned ticket completed");
            completed.push(ticket);
        }

        Ok(completed)
    }
}
