//! Subcommand handlers.
//!
//! Results go to stdout for the operator; diagnostics go through `tracing`.

use crate::render::DirectoryRenderer;
use anyhow::{Context, Result, bail};
use std::process::ExitCode;
use std::sync::Arc;
use ticketing_core::{
    ClearConfirmation, ConsoleNotifier, DeliveryReport, FlatFileLedger, KeyManager, LedgerBackend,
    RandomCodeSource, RedeemOutcome, TicketIssuer, TicketLedger, TicketNo, TicketPublicKey,
    TicketVerifier, TicketingConfig, UncheckTransition, deliver, generate_checker_codes,
};
use ticketing_postgres::PostgresLedger;
use tracing::{info, warn};

/// How a command ended, as far as the shell is concerned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Status {
    Done,
    /// The presented ticket was not admitted or does not exist.
    Rejected,
}

impl From<Status> for ExitCode {
    fn from(status: Status) -> Self {
        match status {
            Status::Done => Self::SUCCESS,
            Status::Rejected => Self::from(2_u8),
        }
    }
}

/// Open the configured backend and make sure its schema is usable.
async fn open_ledger(config: &TicketingConfig) -> Result<Arc<dyn TicketLedger>> {
    match config.ledger.backend {
        LedgerBackend::Postgres => {
            let ledger = PostgresLedger::connect(config)
                .await
                .context("connecting to postgres ledger")?;
            ledger
                .verify_schema()
                .await
                .context("postgres schema check failed (run `ticketctl migrate`?)")?;
            Ok(Arc::new(ledger))
        }
        LedgerBackend::File => {
            let ledger = FlatFileLedger::from_config(config).with_context(|| {
                format!("opening ledger file {}", config.ledger.file_path.display())
            })?;
            Ok(Arc::new(ledger))
        }
    }
}

fn verifier(
    config: &TicketingConfig,
    ledger: Arc<dyn TicketLedger>,
) -> Result<TicketVerifier<dyn TicketLedger>> {
    let public_key = TicketPublicKey::load(&config.keys.public_key_path)?;
    Ok(TicketVerifier::new(ledger, public_key))
}

fn report(outcome: &RedeemOutcome) -> Status {
    match outcome {
        RedeemOutcome::Accepted(ticket) => {
            println!("ACCEPTED  {}  {} <{}>", ticket.ticket_no, ticket.name, ticket.email);
            Status::Done
        }
        RedeemOutcome::AlreadyChecked(ticket) => {
            let at = ticket
                .checked_at
                .map_or_else(|| "unknown time".to_string(), |at| at.to_rfc3339());
            println!("ALREADY CHECKED  {}  {} (at {at})", ticket.ticket_no, ticket.name);
            Status::Rejected
        }
        RedeemOutcome::InvalidSignature => {
            println!("INVALID SIGNATURE");
            Status::Rejected
        }
        RedeemOutcome::UnknownTicket => {
            println!("UNKNOWN TICKET");
            Status::Rejected
        }
    }
}

pub(crate) fn keygen(config: &TicketingConfig) -> Result<Status> {
    KeyManager::generate_keypair(&config.keys)?;
    println!(
        "Wrote {} and {}",
        config.keys.private_key_path.display(),
        config.keys.public_key_path.display()
    );
    Ok(Status::Done)
}

pub(crate) async fn migrate(config: &TicketingConfig) -> Result<Status> {
    if config.ledger.backend != LedgerBackend::Postgres {
        bail!("migrate only applies to the postgres backend");
    }
    let ledger = PostgresLedger::connect(config).await?;
    ledger.migrate().await?;
    ledger.verify_schema().await?;
    println!("Schema is up to date");
    Ok(Status::Done)
}

pub(crate) async fn issue(
    config: &TicketingConfig,
    name: &str,
    email: &str,
    deliver_ticket: bool,
) -> Result<Status> {
    let keys = Arc::new(KeyManager::load(&config.keys)?);
    let ledger = open_ledger(config).await?;
    let issuer = TicketIssuer::new(ledger, keys);

    let ticket = issuer
        .issue(name, email)
        .await
        .context("issuing ticket (any allocated row can be finished with `resume-unsigned`)")?;
    let signature = ticket.signature_text().unwrap_or_default();
    println!("{}  {}", ticket.ticket_no, signature);

    if deliver_ticket {
        let renderer = DirectoryRenderer::new(&config.delivery.output_dir);
        match deliver(&renderer, &ConsoleNotifier::new(), &ticket).await {
            DeliveryReport::Delivered(artifact) => {
                println!(
                    "Delivered {}",
                    renderer.output_dir().join(&artifact.file_name).display()
                );
            }
            DeliveryReport::RenderFailed(error) | DeliveryReport::NotifyFailed(error) => {
                warn!(ticket_no = %ticket.ticket_no, error = %error, "Ticket issued but not delivered");
                println!("Issued but not delivered: {error}");
            }
        }
    }
    Ok(Status::Done)
}

pub(crate) async fn redeem(
    config: &TicketingConfig,
    ticket_no: &str,
    signature: &str,
) -> Result<Status> {
    let ledger = open_ledger(config).await?;
    let verifier = verifier(config, ledger)?;
    let outcome = verifier
        .redeem(&TicketNo::new(ticket_no.trim()), signature.trim())
        .await?;
    Ok(report(&outcome))
}

pub(crate) async fn scan(config: &TicketingConfig, payload: &str) -> Result<Status> {
    let ledger = open_ledger(config).await?;
    let verifier = verifier(config, ledger)?;
    let outcome = verifier.redeem_payload(payload).await?;
    Ok(report(&outcome))
}

pub(crate) async fn uncheck(config: &TicketingConfig, ticket_no: &str) -> Result<Status> {
    let ledger = open_ledger(config).await?;
    let ticket_no = TicketNo::new(ticket_no.trim());
    match ledger.mark_unchecked(&ticket_no).await? {
        UncheckTransition::Unchecked => {
            info!(ticket_no = %ticket_no, "Check-in undone");
            println!("{ticket_no} is unchecked again");
            Ok(Status::Done)
        }
        UncheckTransition::NotChecked => {
            println!("{ticket_no} was not checked in");
            Ok(Status::Done)
        }
        UncheckTransition::NotFound => {
            println!("UNKNOWN TICKET");
            Ok(Status::Rejected)
        }
    }
}

pub(crate) async fn stats(config: &TicketingConfig) -> Result<Status> {
    let ledger = open_ledger(config).await?;
    let stats = ledger.stats().await?;
    println!("total     {}", stats.total);
    println!("checked   {}", stats.checked);
    println!("unsigned  {}", stats.unsigned);
    Ok(Status::Done)
}

pub(crate) async fn reset_checks(config: &TicketingConfig) -> Result<Status> {
    let ledger = open_ledger(config).await?;
    let reset = ledger.reset_all_checked().await?;
    println!("Reset {reset} check-ins");
    Ok(Status::Done)
}

pub(crate) async fn checkers(
    config: &TicketingConfig,
    count: usize,
    note: Option<&str>,
) -> Result<Status> {
    let ledger = open_ledger(config).await?;
    let source = RandomCodeSource::new(config.checkers.code_length_bytes)?;
    let codes = generate_checker_codes(&*ledger, &source, count, note).await?;
    for code in codes {
        println!("{code}");
    }
    Ok(Status::Done)
}

pub(crate) async fn resume_unsigned(config: &TicketingConfig) -> Result<Status> {
    let keys = Arc::new(KeyManager::load(&config.keys)?);
    let ledger = open_ledger(config).await?;
    let issuer = TicketIssuer::new(ledger, keys);

    let completed = issuer.complete_unsigned().await?;
    for ticket in &completed {
        println!("{}  {}", ticket.ticket_no, ticket.signature_text().unwrap_or_default());
    }
    println!("Signed {} ticket(s)", completed.len());
    Ok(Status::Done)
}

pub(crate) async fn clear(config: &TicketingConfig, phrase: &str) -> Result<Status> {
    // Phrase first: a wrong phrase must not open the ledger.
    let confirmation = ClearConfirmation::from_phrase(phrase)?;
    let ledger = open_ledger(config).await?;
    let removed = ledger.clear_all(confirmation).await?;
    println!("Removed {removed} ticket(s); checker codes kept");
    Ok(Status::Done)
}

#[cfg(test)]
#[allow(clippy::expect_used)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::path::Path;
    use ticketing_core::{KeyPaths, TicketId, TicketNoFormat};
    use ticketing_core::config::{CheckerConfig, DeliveryConfig, LedgerConfig};

    fn file_config(dir: &Path) -> TicketingConfig {
        TicketingConfig {
            ticket_no: TicketNoFormat::new("CYP", 3).expect("format"),
            keys: KeyPaths {
                private_key_path: dir.join("private.key"),
                public_key_path: dir.join("public.key"),
            },
            ledger: LedgerConfig {
                backend: LedgerBackend::File,
                database_url: String::new(),
                max_connections: 1,
                acquire_timeout_secs: 1,
                statement_timeout_secs: 1,
                operation_timeout_ms: 2_000,
                file_path: dir.join("ledger.jsonl"),
            },
            checkers: CheckerConfig {
                code_length_bytes: 16,
            },
            delivery: DeliveryConfig {
                output_dir: dir.join("tickets"),
            },
        }
    }

    #[tokio::test]
    async fn issue_then_scan_on_file_backend() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = file_config(dir.path());

        keygen(&config).expect("keygen");
        assert!(keygen(&config).is_err(), "keys must never be overwritten");

        assert_eq!(
            issue(&config, "Alice", "alice@example.com", true).await.expect("issue"),
            Status::Done
        );
        assert!(dir.path().join("tickets").join("CYP001.txt").exists());

        let ledger = open_ledger(&config).await.expect("ledger");
        let ticket = ledger
            .find_ticket(&TicketNo::new("CYP001"))
            .await
            .expect("find")
            .expect("issued");
        let payload = format!("CYP001,{}", ticket.signature_text().expect("signed"));

        assert_eq!(scan(&config, &payload).await.expect("scan"), Status::Done);
        assert_eq!(
            scan(&config, &payload).await.expect("scan"),
            Status::Rejected
        );
        assert_eq!(uncheck(&config, "CYP001").await.expect("uncheck"), Status::Done);
        assert_eq!(
            redeem(&config, "CYP001", &ticket.signature_text().expect("signed"))
                .await
                .expect("redeem"),
            Status::Done
        );
    }

    #[tokio::test]
    async fn clear_refuses_wrong_phrase() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = file_config(dir.path());
        keygen(&config).expect("keygen");
        issue(&config, "Bob", "bob@example.com", false).await.expect("issue");

        assert!(clear(&config, "clear all tickets").await.is_err());
        let ledger = open_ledger(&config).await.expect("ledger");
        assert_eq!(ledger.stats().await.expect("stats").total, 1);

        clear(&config, ClearConfirmation::PHRASE).await.expect("clear");
        assert_eq!(ledger.stats().await.expect("stats").total, 0);
    }

    #[tokio::test]
    async fn resume_signs_left_over_rows() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = file_config(dir.path());
        keygen(&config).expect("keygen");

        let ledger = open_ledger(&config).await.expect("ledger");
        let allocated = ledger
            .allocate_and_store("Carol", "carol@example.com")
            .await
            .expect("allocate");
        assert_eq!(allocated.id, TicketId::new(1));
        assert!(allocated.issued_at <= Utc::now());

        resume_unsigned(&config).await.expect("resume");
        assert_eq!(ledger.stats().await.expect("stats").unsigned, 0);
    }

    #[tokio::test]
    async fn migrate_rejects_file_backend() {
        let dir = tempfile::tempdir().expect("tempdir");
        assert!(migrate(&file_config(dir.path())).await.is_err());
    }
}
