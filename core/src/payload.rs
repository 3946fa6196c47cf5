//! Scannable ticket payload: `"<ticket_no>,<signature_text>"`.

use crate::error::{Result, TicketError};
use crate::signature::CanonicalSignature;
use crate::ticket::TicketNo;
use std::fmt;

const FULLWIDTH_COMMA: char = '\u{FF0C}';
const ZERO_WIDTH_SPACE: char = '\u{200B}';

/// Ticket number and signature text as embedded in a QR code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QrPayload {
    /// Claimed ticket number.
    pub ticket_no: TicketNo,
    /// Signature text, not yet decoded.
    pub signature_text: String,
}

impl QrPayload {
    /// Payload for an issued ticket.
    #[must_use]
    pub fn new(ticket_no: TicketNo, signature: &CanonicalSignature) -> Self {
        Self {
            ticket_no,
            signature_text: signature.to_text(),
        }
    }

    /// Parse scanner output.
    ///
    /// Zero-width spaces are dropped, the separator may be an ASCII or a
    /// full-width comma (some phone keyboards substitute one), and empty
    /// segments are ignored.
    ///
    /// # Errors
    ///
    /// Returns [`TicketError::InvalidInput`] unless exactly two non-empty
    /// segments remain.
    pub fn parse(raw: &str) -> Result<Self> {
        let cleaned: String = raw.chars().filter(|c| *c != ZERO_WIDTH_SPACE).collect();
        let parts: Vec<&str> = cleaned
            .trim()
            .split([',', FULLWIDTH_COMMA])
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .collect();

        match parts.as_slice() {
            [ticket_no, signature_text] => Ok(Self {
                ticket_no: TicketNo::new(*ticket_no),
                signature_text: (*signature_text).to_string(),
            }),
            _ => Err(TicketError::InvalidInput(format!(
                "expected \"<ticket_no>,<signature>\", found {} segment(s)",
                parts.len()
            ))),
        }
    }
}

impl fmt::Display for QrPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{}", self.ticket_no, self.signature_text)
    }
}

#[cfg(test)]
#[allow(clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_payload() {
        let payload = QrPayload::parse("CYP001,abc_-123").expect("parse");
        assert_eq!(payload.ticket_no.as_str(), "CYP001");
        assert_eq!(payload.signature_text, "abc_-123");
    }

    #[test]
    fn tolerates_scanner_noise() {
        let payload = QrPayload::parse("\u{200B} CYP001\u{FF0C}sig \n").expect("parse");
        assert_eq!(payload.ticket_no.as_str(), "CYP001");
        assert_eq!(payload.signature_text, "sig");

        let payload = QrPayload::parse(",CYP002,,sig,").expect("parse");
        assert_eq!(payload.ticket_no.as_str(), "CYP002");
    }

    #[test]
    fn rejects_wrong_segment_count() {
        for raw in ["", "CYP001", "CYP001,", "a,b,c", "\u{200B}"] {
            assert!(
                matches!(QrPayload::parse(raw), Err(TicketError::InvalidInput(_))),
                "{raw:?} should be rejected"
            );
        }
    }

    #[test]
    fn display_matches_parse_input() {
        let sig = CanonicalSignature::from_array([9; 64]);
        let payload = QrPayload::new(TicketNo::new("CYP010"), &sig);
        let parsed = QrPayload::parse(&payload.to_string()).expect("parse");
        assert_eq!(parsed, payload);
    }
}
