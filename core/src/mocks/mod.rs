//! Mock implementations for testing.
//!
//! In-memory, deterministic stand-ins for the ledger, the checker code source
//! and the delivery collaborators, for use in unit and integration tests.

pub mod code_source;
pub mod delivery;
pub mod ledger;

pub use code_source::SeededCodeSource;
pub use delivery::{MockNotifier, MockRenderer};
pub use ledger::InMemoryLedger;
