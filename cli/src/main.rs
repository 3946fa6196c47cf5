//! `ticketctl`: issue, sign and check in tickets from the command line.
//!
//! Configuration is read once from the environment (and `.env`), logging is
//! initialised here, and the selected ledger backend is handed to the core.

mod commands;
mod render;

use clap::{Parser, Subcommand};
use std::process::ExitCode;
use ticketing_core::TicketingConfig;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(name = "ticketctl", version, about = "Tamper-evident event tickets")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Generate a new signing key pair (refuses to overwrite)
    Keygen,

    /// Apply database migrations (postgres backend only)
    Migrate,

    /// Issue and sign a ticket, then deliver it
    Issue {
        /// Holder name
        #[arg(long)]
        name: String,

        /// Holder email address
        #[arg(long)]
        email: String,

        /// Skip rendering and notification
        #[arg(long)]
        no_deliver: bool,
    },

    /// Redeem a ticket number and signature text
    Redeem {
        /// Ticket number, e.g. CYP001
        ticket_no: String,

        /// Signature text from the ticket
        signature: String,
    },

    /// Redeem a raw scanned payload ("<ticket_no>,<signature>")
    Scan {
        /// Payload as read from the QR code
        payload: String,
    },

    /// Undo a mistaken check-in
    Uncheck {
        /// Ticket number
        ticket_no: String,
    },

    /// Show ledger counters
    Stats,

    /// Mark every checked ticket as unchecked
    ResetChecks,

    /// Generate checker access codes
    Checkers {
        /// How many codes to generate
        #[arg(long)]
        count: usize,

        /// Note stored with each code
        #[arg(long)]
        note: Option<String>,
    },

    /// Sign tickets left unsigned by an interrupted issuance
    ResumeUnsigned,

    /// Delete every ticket (checker codes are kept)
    Clear {
        /// Confirmation phrase, exactly "CLEAR ALL TICKETS"
        #[arg(long)]
        confirm: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    // A missing .env is fine; the process environment still applies.
    let _ = dotenvy::dotenv();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ticketing=info,ticketctl=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let config = TicketingConfig::from_env()?;
    info!(
        backend = ?config.ledger.backend,
        prefix = %config.ticket_no.prefix,
        "Configuration loaded"
    );

    let status = match cli.command {
        Command::Keygen => commands::keygen(&config),
        Command::Migrate => commands::migrate(&config).await,
        Command::Issue {
            name,
            email,
            no_deliver,
        } => commands::issue(&config, &name, &email, !no_deliver).await,
        Command::Redeem {
            ticket_no,
            signature,
        } => commands::redeem(&config, &ticket_no, &signature).await,
        Command::Scan { payload } => commands::scan(&config, &payload).await,
        Command::Uncheck { ticket_no } => commands::uncheck(&config, &ticket_no).await,
        Command::Stats => commands::stats(&config).await,
        Command::ResetChecks => commands::reset_checks(&config).await,
        Command::Checkers { count, note } => {
            commands::checkers(&config, count, note.as_deref()).await
        }
        Command::ResumeUnsigned => commands::resume_unsigned(&config).await,
        Command::Clear { confirm } => commands::clear(&config, &confirm).await,
    }?;
    Ok(status.into())
}
