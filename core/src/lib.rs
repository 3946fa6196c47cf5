//! # Ticketing Core
//!
//! Tamper-evident event tickets: issue signed tickets, verify them at the door,
//! and check each one in exactly once.
//!
//! ## Components
//!
//! - **[`KeyManager`]**: owns the P-256 signing key, produces canonical signatures
//! - **[`CanonicalSignature`]**: 64-byte R‖S form, DER conversion, transport text
//! - **[`TicketLedger`]**: durable store of tickets and checker codes, with
//!   serialized id allocation and check-in
//! - **[`TicketIssuer`]**: allocate → sign → attach
//! - **[`TicketVerifier`]**: verify signature → atomic check-in
//!
//! ## Flow
//!
//! ```text
//! issue(name, email) ─→ ledger.allocate_and_store ─→ keys.sign(ticket_no)
//!                                                  ─→ ledger.attach_signature
//!
//! redeem(ticket_no, sig) ─→ decode + verify ─→ ledger.mark_checked_if_unchecked
//! ```
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use ticketing_core::*;
//!
//! let config = TicketingConfig::from_env()?;
//! let ledger = Arc::new(FlatFileLedger::from_config(&config)?);
//! let keys = Arc::new(KeyManager::load(&config.keys)?);
//!
//! let issuer = TicketIssuer::new(Arc::clone(&ledger), Arc::clone(&keys));
//! let ticket = issuer.issue("Alice", "alice@example.com").await?;
//!
//! let verifier = TicketVerifier::new(ledger, keys.public_key().clone());
//! let sig = ticket.signature_text().unwrap_or_default();
//! assert!(matches!(
//!     verifier.redeem(&ticket.ticket_no, &sig).await?,
//!     RedeemOutcome::Accepted(_)
//! ));
//! ```

#![deny(missing_docs)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![deny(clippy::todo)]
#![deny(clippy::unimplemented)]

pub mod checker;
pub mod config;
pub mod delivery;
pub mod error;
pub mod issuer;
pub mod keys;
pub mod ledger;
pub mod payload;
pub mod signature;
pub mod ticket;
pub mod validation;
pub mod verifier;

/// Mock implementations for testing
#[cfg(any(test, feature = "test-utils"))]
pub mod mocks;

// Re-export main types for convenience
pub use checker::{CodeSource, RandomCodeSource, authenticate_checker, generate_checker_codes};
pub use config::{KeyPaths, LedgerBackend, TicketingConfig};
pub use delivery::{
    ConsoleNotifier, DeliveryError, DeliveryReport, Notifier, PayloadRenderer, Renderer,
    TicketArtifact, TicketFace, deliver,
};
pub use error::{Result, TicketError};
pub use issuer::TicketIssuer;
pub use keys::{KeyManager, TicketPublicKey};
pub use ledger::{
    CheckInTransition, ClearConfirmation, FlatFileLedger, TicketLedger, UncheckTransition,
};
pub use payload::QrPayload;
pub use signature::{CanonicalSignature, SignatureError};
pub use ticket::{LedgerStats, Ticket, TicketId, TicketNo, TicketNoFormat};
pub use verifier::{RedeemOutcome, TicketVerifier};
