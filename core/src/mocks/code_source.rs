//! Deterministic checker code source.

use crate::checker::CodeSource;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::{Mutex, PoisonError};

/// Seeded code source drawing from a small code space.
///
/// With `space` close to the number of codes requested, most draws collide,
/// which exercises the retry path of
/// [`generate_checker_codes`](crate::checker::generate_checker_codes).
#[derive(Debug)]
pub struct SeededCodeSource {
    rng: Mutex<StdRng>,
    space: u32,
}

impl SeededCodeSource {
    /// Create a source yielding codes `code-0` .. `code-{space - 1}`.
    #[must_use]
    pub fn new(seed: u64, space: u32) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
            space: space.max(1),
        }
    }
}

impl CodeSource for SeededCodeSource {
    fn next_code(&self) -> String {
        let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);
        format!("code-{}", rng.gen_range(0..self.space))
    }
}
