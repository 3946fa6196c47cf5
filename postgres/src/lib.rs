//! `PostgreSQL` ticket ledger for the ticketing core.
//!
//! This crate provides [`PostgresLedger`], a transactional implementation of
//! the `TicketLedger` trait from `ticketing-core`. It relies on the database
//! for both critical sections:
//!
//! - Id allocation draws from the `tickets` sequence inside the inserting transaction
//! - Check-in is a single conditional `UPDATE ... WHERE checked = FALSE`
//!
//! # Example
//!
//! ```ignore
//! use ticketing_core::TicketingConfig;
//! use ticketing_postgres::PostgresLedger;
//!
//! async fn example() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = TicketingConfig::from_env()?;
//!     let ledger = PostgresLedger::connect(&config).await?;
//!     ledger.migrate().await?;
//!     ledger.verify_schema().await?;
//!     Ok(())
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod ledger;

pub use ledger::{PostgresLedger, SCHEMA_VERSION};
