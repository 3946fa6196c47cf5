//! Checker codes: bulk-generated credentials for check-in staff.
//!
//! A checker code is an opaque random string, unique across the ledger and
//! not tied to any ticket. Codes are generated offline in batches and stored
//! with an optional note (e.g. which gate they were handed out at).

use crate::error::{Result, TicketError};
use crate::ledger::TicketLedger;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::RngCore;
use rand::rngs::OsRng;
use std::collections::HashSet;
use tracing::{debug, info};

/// Upper bound on draws per requested code before giving up.
const DRAWS_PER_CODE: usize = 64;

/// Source of candidate checker codes.
pub trait CodeSource: Send + Sync {
    /// Draw one candidate code.
    fn next_code(&self) -> String;
}

/// Codes from the operating system RNG, URL-safe base64 without padding.
#[derive(Debug, Clone, Copy)]
pub struct RandomCodeSource {
    length_bytes: usize,
}

impl RandomCodeSource {
    /// Create a source drawing `length_bytes` random bytes per code.
    ///
    /// # Errors
    ///
    /// Returns [`TicketError::InvalidInput`] if `length_bytes` is zero.
    pub fn new(length_bytes: usize) -> Result<Self> {
        if length_bytes == 0 {
            return Err(TicketError::InvalidInput(
                "checker code length must be > 0".to_string(),
            ));
        }
        Ok(Self { length_bytes })
    }
}

impl CodeSource for RandomCodeSource {
    fn next_code(&self) -> String {
        let mut bytes = vec![0u8; self.length_bytes];
        OsRng.fill_bytes(&mut bytes);
        URL_SAFE_NO_PAD.encode(bytes)
    }
}

/// Generate and store `count` new unique checker codes.
///
/// Candidates already drawn in this run or already stored in the ledger are
/// skipped and redrawn. Returns the stored codes in generation order.
///
/// # Errors
///
/// - [`TicketError::InvalidInput`] if `count` is zero (nothing is stored)
/// - [`TicketError::CodeSpaceExhausted`] if the source keeps colliding
/// - [`TicketError::LedgerUnavailable`] from the ledger
pub async fn generate_checker_codes<L, S>(
    ledger: &L,
    source: &S,
    count: usize,
    note: Option<&str>,
) -> Result<Vec<String>>
where
    L: TicketLedger + ?Sized,
    S: CodeSource + ?Sized,
{
    if count == 0 {
        return Err(TicketError::InvalidInput(
            "checker code count must be > 0".to_string(),
        ));
    }

    let max_draws = count.saturating_mul(DRAWS_PER_CODE).saturating_add(DRAWS_PER_CODE);
    let mut drawn = HashSet::with_capacity(count);
    let mut codes = Vec::with_capacity(count);
    let mut collisions = 0_u64;

    for _ in 0..max_draws {
        if codes.len() == count {
            break;
        }
        let code = source.next_code();
        if !drawn.insert(code.clone()) {
            collisions += 1;
            continue;
        }
        if ledger.insert_checker_code(&code, note).await? {
            codes.push(code);
        } else {
            debug!("Checker code already stored, drawing another");
            collisions += 1;
        }
    }

    metrics::counter!("checkers.collisions").increment(collisions);
    metrics::counter!("checkers.generated").increment(codes.len() as u64);

    if codes.len() < count {
        return Err(TicketError::CodeSpaceExhausted {
            generated: codes.len(),
            requested: count,
        });
    }

    info!(count, collisions, "Generated checker codes");
    Ok(codes)
}

/// Whether `code` is a stored checker code. Surrounding whitespace is ignored.
///
/// # Errors
///
/// Returns [`TicketError::LedgerUnavailable`] from the ledger.
pub async fn authenticate_checker<L>(ledger: &L, code: &str) -> Result<bool>
where
    L: TicketLedger + ?Sized,
{
    let code = code.trim();
    if code.is_empty() {
        return Ok(false);
    }
    ledger.checker_code_exists(code).await
}

#[cfg(test)]
#[allow(clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn random_codes_have_expected_length() {
        let source = RandomCodeSource::new(24).expect("source");
        let code = source.next_code();
        assert_eq!(code.len(), 32);
        assert!(code.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
        assert_ne!(code, source.next_code());
    }

    #[test]
    fn zero_length_is_rejected() {
        assert!(matches!(
            RandomCodeSource::new(0),
            Err(TicketError::InvalidInput(_))
        ));
    }
}
