//! Delivery collaborators: render a ticket face, notify the holder.
//!
//! Delivery happens after issuance and never undoes it. A ticket whose
//! artifact could not be rendered or sent is still valid and can be
//! delivered again later.

use crate::payload::QrPayload;
use crate::ticket::{Ticket, TicketNo};
use std::future::Future;
use thiserror::Error;
use tracing::{info, warn};

/// Delivery failures. Reported to the caller, never retried by the core.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeliveryError {
    /// The renderer could not produce an artifact.
    #[error("Render failed: {0}")]
    Render(String),

    /// The notifier could not hand the artifact over.
    #[error("Notification failed: {0}")]
    Notify(String),
}

/// What a renderer draws: the public face of a ticket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TicketFace {
    /// Ticket number.
    pub ticket_no: TicketNo,
    /// Signature text for the scannable payload.
    pub signature_text: String,
    /// Holder name.
    pub name: String,
}

impl TicketFace {
    /// Face of a signed ticket; `None` while the ticket is unsigned.
    #[must_use]
    pub fn of(ticket: &Ticket) -> Option<Self> {
        Some(Self {
            ticket_no: ticket.ticket_no.clone(),
            signature_text: ticket.signature_text()?,
            name: ticket.name.clone(),
        })
    }

    /// The `"<ticket_no>,<signature_text>"` string to encode in a QR code.
    #[must_use]
    pub fn payload(&self) -> String {
        QrPayload {
            ticket_no: self.ticket_no.clone(),
            signature_text: self.signature_text.clone(),
        }
        .to_string()
    }
}

/// Rendered ticket, addressable by its ticket number.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TicketArtifact {
    /// Ticket this artifact belongs to.
    pub ticket_no: TicketNo,
    /// Suggested file name, e.g. `CYP001.txt`.
    pub file_name: String,
    /// MIME type of `bytes`.
    pub media_type: String,
    /// Artifact contents.
    pub bytes: Vec<u8>,
}

/// A notification to send once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    /// Recipient address.
    pub recipient: String,
    /// Rendered ticket.
    pub artifact: TicketArtifact,
    /// Ticket number.
    pub ticket_no: TicketNo,
    /// Holder name.
    pub name: String,
}

/// Produces an artifact from a ticket face.
pub trait Renderer: Send + Sync {
    /// Render `face`.
    ///
    /// # Errors
    ///
    /// Returns [`DeliveryError::Render`] if no artifact can be produced.
    fn render(&self, face: &TicketFace) -> Result<TicketArtifact, DeliveryError>;
}

/// Sends a rendered ticket to its holder.
pub trait Notifier: Send + Sync {
    /// Attempt delivery once.
    ///
    /// # Errors
    ///
    /// Returns [`DeliveryError::Notify`] if the notification was not accepted.
    fn notify(
        &self,
        notification: &Notification,
    ) -> impl Future<Output = Result<(), DeliveryError>> + Send;
}

/// Result of one delivery attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryReport {
    /// Rendered and handed to the notifier.
    Delivered(TicketArtifact),
    /// Rendering failed; nothing was sent.
    RenderFailed(DeliveryError),
    /// Rendered, but the notifier failed.
    NotifyFailed(DeliveryError),
}

impl DeliveryReport {
    /// Whether the notifier accepted the ticket.
    #[must_use]
    pub const fn is_delivered(&self) -> bool {
        matches!(self, Self::Delivered(_))
    }
}

/// Render `ticket` and notify its holder, once each.
pub async fn deliver<R, N>(renderer: &R, notifier: &N, ticket: &Ticket) -> DeliveryReport
where
    R: Renderer + ?Sized,
    N: Notifier,
{
    let Some(face) = TicketFace::of(ticket) else {
        let error = DeliveryError::Render(format!("ticket {} is not signed yet", ticket.ticket_no));
        warn!(ticket_no = %ticket.ticket_no, "Skipping delivery of unsigned ticket");
        return DeliveryReport::RenderFailed(error);
    };

    let artifact = match renderer.render(&face) {
        Ok(artifact) => artifact,
        Err(error) => {
            warn!(ticket_no = %ticket.ticket_no, error = %error, "Ticket render failed");
            return DeliveryReport::RenderFailed(error);
        }
    };

    let notification = Notification {
        recipient: ticket.email.clone(),
        artifact,
        ticket_no: ticket.ticket_no.clone(),
        name: ticket.name.clone(),
    };
    match notifier.notify(&notification).await {
        Ok(()) => {
            info!(ticket_no = %ticket.ticket_no, "Ticket delivered");
            DeliveryReport::Delivered(notification.artifact)
        }
        Err(error) => {
            warn!(ticket_no = %ticket.ticket_no, error = %error, "Ticket notification failed");
            DeliveryReport::NotifyFailed(error)
        }
    }
}

/// Renders the QR payload as a plain-text artifact.
///
/// Stands in for an image renderer: the text is what a QR encoder would be fed.
#[derive(Debug, Clone, Copy, Default)]
pub struct PayloadRenderer;

impl PayloadRenderer {
    /// Create a new payload renderer.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl Renderer for PayloadRenderer {
    fn render(&self, face: &TicketFace) -> Result<TicketArtifact, DeliveryError> {
        let body = format!(
            "Ticket: {}\nName: {}\nPayload: {}\n",
            face.ticket_no,
            face.name,
            face.payload()
        );
        Ok(TicketArtifact {
            ticket_no: face.ticket_no.clone(),
            file_name: format!("{}.txt", face.ticket_no),
            media_type: "text/plain; charset=utf-8".to_string(),
            bytes: body.into_bytes(),
        })
    }
}

/// Notifier that logs instead of sending.
///
/// For development: the artifact is not transmitted anywhere.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConsoleNotifier;

impl ConsoleNotifier {
    /// Create a new console notifier.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl Notifier for ConsoleNotifier {
    async fn notify(&self, notification: &Notification) -> Result<(), DeliveryError> {
        info!(
            to = %notification.recipient,
            ticket_no = %notification.ticket_no,
            name = %notification.name,
            file_name = %notification.artifact.file_name,
            bytes = notification.artifact.bytes.len(),
            "Ticket email (development mode)"
        );
        Ok(())
    }
}
