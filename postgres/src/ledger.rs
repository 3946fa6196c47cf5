//! `PostgreSQL` implementation of [`TicketLedger`].

use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Row};
use std::collections::HashSet;
use std::time::Duration;
use ticketing_core::ledger::{LedgerFuture, with_deadline};
use ticketing_core::ticket::AllocatedTicket;
use ticketing_core::{
    CanonicalSignature, CheckInTransition, ClearConfirmation, LedgerStats, Result, Ticket,
    TicketError, TicketId, TicketLedger, TicketNo, TicketNoFormat, TicketingConfig,
    UncheckTransition,
};

const BACKEND: &str = "postgres";

/// Schema version written by the embedded migrations.
pub const SCHEMA_VERSION: i32 = 1;

const TICKET_COLUMNS: &[&str] = &[
    "id",
    "ticket_no",
    "name",
    "email",
    "signature",
    "checked",
    "issued_at",
    "checked_at",
];
const CHECKER_COLUMNS: &[&str] = &["id", "code", "note"];

const SELECT_TICKET: &str = r"
    SELECT id, ticket_no, name, email, signature, checked, issued_at, checked_at
    FROM tickets
";

/// `PostgreSQL` ticket ledger.
///
/// # Atomicity
///
/// - Ids come from the `tickets` id sequence, drawn inside the inserting
///   transaction; `nextval` never hands out the same value twice
/// - Check-in and uncheck are single conditional `UPDATE` statements, so the
///   row lock taken by the first writer decides the race
/// - Checker insertion relies on the `UNIQUE` constraint via `ON CONFLICT DO NOTHING`
///
/// Every call is bounded by the operation timeout on top of the pool acquire
/// timeout and the per-connection `statement_timeout`.
#[derive(Debug, Clone)]
pub struct PostgresLedger {
    pool: PgPool,
    format: TicketNoFormat,
    timeout: Duration,
}

impl PostgresLedger {
    /// Wrap an existing pool.
    #[must_use]
    pub const fn from_pool(pool: PgPool, format: TicketNoFormat, timeout: Duration) -> Self {
        Self {
            pool,
            format,
            timeout,
        }
    }

    /// Connect using the ledger section of `config`.
    ///
    /// # Errors
    ///
    /// Returns [`TicketError::LedgerUnavailable`] if no connection can be made.
    pub async fn connect(config: &TicketingConfig) -> Result<Self> {
        let statement_timeout = format!("{}ms", config.ledger.statement_timeout().as_millis());
        let pool = PgPoolOptions::new()
            .max_connections(config.ledger.max_connections)
            .acquire_timeout(config.ledger.acquire_timeout())
            .after_connect(move |conn, _meta| {
                let statement_timeout = statement_timeout.clone();
                Box::pin(async move {
                    sqlx::query("SELECT set_config('statement_timeout', $1, false)")
                        .bind(statement_timeout)
                        .execute(conn)
                        .await?;
                    Ok(())
                })
            })
            .connect(&config.ledger.database_url)
            .await
            .map_err(|e| TicketError::LedgerUnavailable(format!("Failed to connect: {e}")))?;

        tracing::info!(
            max_connections = config.ledger.max_connections,
            "Connected to PostgreSQL ticket ledger"
        );

        Ok(Self::from_pool(
            pool,
            config.ticket_no.clone(),
            config.ledger.operation_timeout(),
        ))
    }

    /// Underlying connection pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Run the embedded migrations.
    ///
    /// # Errors
    ///
    /// Returns [`TicketError::SchemaMismatch`] if the database carries
    /// migrations this binary does not know, or
    /// [`TicketError::LedgerUnavailable`] on connection failure.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| match e {
                sqlx::migrate::MigrateError::Execute(inner) => database_error(inner),
                other => TicketError::SchemaMismatch(format!("Migration failed: {other}")),
            })?;
        tracing::info!(schema_version = SCHEMA_VERSION, "Ticket ledger migrations applied");
        Ok(())
    }

    /// Check that the database holds the schema this binary expects.
    ///
    /// Call at startup; serving against a mismatched store is not safe.
    ///
    /// # Errors
    ///
    /// Returns [`TicketError::SchemaMismatch`] describing the first difference.
    pub async fn verify_schema(&self) -> Result<()> {
        let meta: Option<String> = sqlx::query_scalar("SELECT to_regclass('ticket_ledger_meta')::text")
            .fetch_one(&self.pool)
            .await
            .map_err(database_error)?;
        if meta.is_none() {
            return Err(TicketError::SchemaMismatch(
                "ticket_ledger_meta table is missing; run migrations first".to_string(),
            ));
        }

        let version: Option<i32> =
            sqlx::query_scalar("SELECT schema_version FROM ticket_ledger_meta LIMIT 1")
                .fetch_optional(&self.pool)
                .await
                .map_err(database_error)?;
        if version != Some(SCHEMA_VERSION) {
            return Err(TicketError::SchemaMismatch(format!(
                "expected schema version {SCHEMA_VERSION}, found {version:?}"
            )));
        }

        self.require_columns("tickets", TICKET_COLUMNS).await?;
        self.require_columns("checkers", CHECKER_COLUMNS).await?;
        Ok(())
    }

    async fn require_columns(&self, table: &str, required: &[&str]) -> Result<()> {
        let present: HashSet<String> = sqlx::query_scalar(
            r"
            SELECT column_name::text
            FROM information_schema.columns
            WHERE table_schema = current_schema() AND table_name = $1
            ",
        )
        .bind(table)
        .fetch_all(&self.pool)
        .await
        .map_err(database_error)?
        .into_iter()
        .collect();

        let missing: Vec<&str> = required
            .iter()
            .copied()
            .filter(|column| !present.contains(*column))
            .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(TicketError::SchemaMismatch(format!(
                "table {table} is missing columns: {}",
                missing.join(", ")
            )))
        }
    }

    async fn ticket_exists(&self, ticket_no: &TicketNo) -> Result<bool> {
        sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM tickets WHERE ticket_no = $1)")
            .bind(ticket_no.as_str())
            .fetch_one(&self.pool)
            .await
            .map_err(database_error)
    }

    fn row_to_ticket(row: &PgRow) -> Result<Ticket> {
        let id: i64 = row.try_get("id").map_err(database_error)?;
        let signature: Vec<u8> = row.try_get("signature").map_err(database_error)?;
        let signature = if signature.is_empty() {
            None
        } else {
            Some(CanonicalSignature::from_slice(&signature).map_err(|e| {
                TicketError::CorruptLedger {
                    line: 0,
                    reason: format!("ticket {id} has an unusable signature: {e}"),
                }
            })?)
        };
        let ticket_no: String = row.try_get("ticket_no").map_err(database_error)?;

        Ok(Ticket {
            id: TicketId::new(id),
            ticket_no: TicketNo::new(ticket_no),
            name: row.try_get("name").map_err(database_error)?,
            email: row.try_get("email").map_err(database_error)?,
            signature,
            checked: row.try_get("checked").map_err(database_error)?,
            issued_at: row.try_get("issued_at").map_err(database_error)?,
            checked_at: row.try_get("checked_at").map_err(database_error)?,
        })
    }
}

fn database_error(e: sqlx::Error) -> TicketError {
    TicketError::LedgerUnavailable(format!("Database error: {e}"))
}

fn count(value: i64) -> u64 {
    u64::try_from(value).unwrap_or_default()
}

impl TicketLedger for PostgresLedger {
    fn allocate_and_store<'a>(
        &'a self,
        name: &'a str,
        email: &'a str,
    ) -> LedgerFuture<'a, AllocatedTicket> {
        Box::pin(with_deadline(BACKEND, self.timeout, async move {
            let mut tx = self.pool.begin().await.map_err(database_error)?;

            let id: i64 =
                sqlx::query_scalar("SELECT nextval(pg_get_serial_sequence('tickets', 'id'))")
                    .fetch_one(&mut *tx)
                    .await
                    .map_err(database_error)?;
            let id = TicketId::new(id);
            let ticket_no = self.format.format(id);

            let issued_at: DateTime<Utc> = sqlx::query_scalar(
                r"
                INSERT INTO tickets (id, ticket_no, name, email, signature, checked)
                VALUES ($1, $2, $3, $4, ''::bytea, FALSE)
                RETURNING issued_at
                ",
            )
            .bind(id.get())
            .bind(ticket_no.as_str())
            .bind(name)
            .bind(email)
            .fetch_one(&mut *tx)
            .await
            .map_err(database_error)?;

            tx.commit().await.map_err(database_error)?;

            tracing::debug!(ticket_id = id.get(), ticket_no = %ticket_no, "Allocated ticket");
            Ok(AllocatedTicket {
                id,
                ticket_no,
                issued_at,
            })
        }))
    }

    fn attach_signature<'a>(
        &'a self,
        id: TicketId,
        signature: &'a CanonicalSignature,
    ) -> LedgerFuture<'a, ()> {
        Box::pin(with_deadline(BACKEND, self.timeout, async move {
            let updated = sqlx::query(
                r"
                UPDATE tickets
                SET signature = $2
                WHERE id = $1 AND signature = ''::bytea
                ",
            )
            .bind(id.get())
            .bind(signature.as_bytes().as_slice())
            .execute(&self.pool)
            .await
            .map_err(database_error)?
            .rows_affected();

            if updated == 1 {
                return Ok(());
            }

            let exists: bool = sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM tickets WHERE id = $1)")
                .bind(id.get())
                .fetch_one(&self.pool)
                .await
                .map_err(database_error)?;
            Err(if exists {
                TicketError::AlreadySigned(id)
            } else {
                TicketError::TicketNotFound(id)
            })
        }))
    }

    fn find_ticket<'a>(&'a self, ticket_no: &'a TicketNo) -> LedgerFuture<'a, Option<Ticket>> {
        Box::pin(with_deadline(BACKEND, self.timeout, async move {
            let row = sqlx::query(&format!("{SELECT_TICKET} WHERE ticket_no = $1"))
                .bind(ticket_no.as_str())
                .fetch_optional(&self.pool)
                .await
                .map_err(database_error)?;
            row.as_ref().map(Self::row_to_ticket).transpose()
        }))
    }

    fn unsigned_tickets(&self) -> LedgerFuture<'_, Vec<Ticket>> {
        Box::pin(with_deadline(BACKEND, self.timeout, async move {
            let rows = sqlx::query(&format!("{SELECT_TICKET} WHERE signature = ''::bytea ORDER BY id"))
                .fetch_all(&self.pool)
                .await
                .map_err(database_error)?;
            rows.iter().map(Self::row_to_ticket).collect()
        }))
    }

    fn mark_checked_if_unchecked<'a>(
        &'a self,
        ticket_no: &'a TicketNo,
    ) -> LedgerFuture<'a, CheckInTransition> {
        Box::pin(with_deadline(BACKEND, self.timeout, async move {
            let flipped = sqlx::query(
                r"
                UPDATE tickets
                SET checked = TRUE, checked_at = NOW()
                WHERE ticket_no = $1 AND checked = FALSE
                RETURNING id, ticket_no, name, email, signature, checked, issued_at, checked_at
                ",
            )
            .bind(ticket_no.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(database_error)?;

            if let Some(row) = flipped {
                return Ok(CheckInTransition::Checked(Self::row_to_ticket(&row)?));
            }

            let current = sqlx::query(&format!("{SELECT_TICKET} WHERE ticket_no = $1"))
                .bind(ticket_no.as_str())
                .fetch_optional(&self.pool)
                .await
                .map_err(database_error)?;
            Ok(match current {
                Some(row) => CheckInTransition::AlreadyChecked(Self::row_to_ticket(&row)?),
                None => CheckInTransition::NotFound,
            })
        }))
    }

    fn mark_unchecked<'a>(&'a self, ticket_no: &'a TicketNo) -> LedgerFuture<'a, UncheckTransition> {
        Box::pin(with_deadline(BACKEND, self.timeout, async move {
            let updated = sqlx::query(
                r"
                UPDATE tickets
                SET checked = FALSE, checked_at = NULL
                WHERE ticket_no = $1 AND checked = TRUE
                ",
            )
            .bind(ticket_no.as_str())
            .execute(&self.pool)
            .await
            .map_err(database_error)?
            .rows_affected();

            if updated == 1 {
                Ok(UncheckTransition::Unchecked)
            } else if self.ticket_exists(ticket_no).await? {
                Ok(UncheckTransition::NotChecked)
            } else {
                Ok(UncheckTransition::NotFound)
            }
        }))
    }

    fn reset_all_checked(&self) -> LedgerFuture<'_, u64> {
        Box::pin(with_deadline(BACKEND, self.timeout, async move {
            let changed = sqlx::query(
                "UPDATE tickets SET checked = FALSE, checked_at = NULL WHERE checked = TRUE",
            )
            .execute(&self.pool)
            .await
            .map_err(database_error)?
            .rows_affected();
            tracing::info!(changed, "Reset all check-ins");
            Ok(changed)
        }))
    }

    fn stats(&self) -> LedgerFuture<'_, LedgerStats> {
        Box::pin(with_deadline(BACKEND, self.timeout, async move {
            let row = sqlx::query(
                r"
                SELECT
                    COUNT(*) AS total,
                    COUNT(*) FILTER (WHERE checked) AS checked,
                    COUNT(*) FILTER (WHERE signature = ''::bytea) AS unsigned
                FROM tickets
                ",
            )
            .fetch_one(&self.pool)
            .await
            .map_err(database_error)?;

            Ok(LedgerStats {
                total: count(row.try_get("total").map_err(database_error)?),
                checked: count(row.try_get("checked").map_err(database_error)?),
                unsigned: count(row.try_get("unsigned").map_err(database_error)?),
            })
        }))
    }

    fn insert_checker_code<'a>(
        &'a self,
        code: &'a str,
        note: Option<&'a str>,
    ) -> LedgerFuture<'a, bool> {
        Box::pin(with_deadline(BACKEND, self.timeout, async move {
            let inserted = sqlx::query(
                r"
                INSERT INTO checkers (code, note)
                VALUES ($1, $2)
                ON CONFLICT (code) DO NOTHING
                ",
            )
            .bind(code)
            .bind(note)
            .execute(&self.pool)
            .await
            .map_err(database_error)?
            .rows_affected();
            Ok(inserted == 1)
        }))
    }

    fn checker_code_exists<'a>(&'a self, code: &'a str) -> LedgerFuture<'a, bool> {
        Box::pin(with_deadline(BACKEND, self.timeout, async move {
            sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM checkers WHERE code = $1)")
                .bind(code)
                .fetch_one(&self.pool)
                .await
                .map_err(database_error)
        }))
    }

    fn clear_all(&self, _confirmation: ClearConfirmation) -> LedgerFuture<'_, u64> {
        Box::pin(with_deadline(BACKEND, self.timeout, async move {
            let mut tx = self.pool.begin().await.map_err(database_error)?;

            sqlx::query("LOCK TABLE tickets IN ACCESS EXCLUSIVE MODE")
                .execute(&mut *tx)
                .await
                .map_err(database_error)?;
            let removed: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM tickets")
                .fetch_one(&mut *tx)
                .await
                .map_err(database_error)?;
            sqlx::query("TRUNCATE tickets RESTART IDENTITY")
                .execute(&mut *tx)
                .await
                .map_err(database_error)?;

            tx.commit().await.map_err(database_error)?;

            tracing::warn!(removed, "Cleared all tickets");
            Ok(count(removed))
        }))
    }
}
