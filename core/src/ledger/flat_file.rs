//! Append-only JSON-lines ledger guarded by an exclusive file lock.
//!
//! # Format
//!
//! The first line is a header naming the log kind and version; every
//! following line is one [`LogRecord`]. Records are only ever appended.
//!
//! # Concurrency
//!
//! Each operation takes an in-process async lock, then an exclusive OS lock
//! on the file (polled until the operation deadline), replays whatever other
//! handles or processes appended since the last call, decides against that
//! state, appends and `fsync`s its records, and releases the lock. The decide
//! step never sees a stale view, so id allocation and check-in are serialized
//! by the file lock.
//!
//! # Crash Recovery
//!
//! - A final line without its terminating newline is a torn write: it is
//!   truncated and the log continues from the last complete record.
//! - A terminated line that cannot be parsed or applied, wherever it sits,
//!   is [`TicketError::CorruptLedger`].
//! - A header with another kind or version is [`TicketError::SchemaMismatch`].

use super::state::{LedgerState, LogRecord};
use super::{
    note_unavailable, with_deadline, CheckInTransition, ClearConfirmation, LedgerFuture,
    TicketLedger, UncheckTransition,
};
use crate::config::TicketingConfig;
use crate::error::{Result, TicketError};
use crate::signature::CanonicalSignature;
use crate::ticket::{AllocatedTicket, LedgerStats, Ticket, TicketId, TicketNo, TicketNoFormat};
use chrono::Utc;
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

const BACKEND: &str = "file";
const LEDGER_KIND: &str = "ticket-ledger";
const LEDGER_VERSION: u32 = 1;
const LOCK_POLL_INTERVAL: Duration = Duration::from_millis(5);

#[derive(Debug, Serialize, Deserialize)]
struct LogHeader {
    ledger: String,
    version: u32,
}

/// Flat-file [`TicketLedger`] backend.
///
/// Cloning shares the same in-process state; separate [`open`](Self::open)
/// calls on the same path (in this or another process) coordinate through
/// the file lock.
#[derive(Debug, Clone)]
pub struct FlatFileLedger {
    path: PathBuf,
    timeout: Duration,
    inner: Arc<Mutex<LogFile>>,
}

#[derive(Debug)]
struct LogFile {
    file: File,
    state: LedgerState,
    /// Byte offset just past the last applied line.
    offset: u64,
    /// Lines applied so far, header included.
    lines: usize,
}

impl FlatFileLedger {
    /// Open (or create) the log at `path` and replay it.
    ///
    /// # Errors
    ///
    /// - [`TicketError::LedgerUnavailable`] if the file cannot be opened or locked in time
    /// - [`TicketError::SchemaMismatch`] if the header names another kind or version
    /// - [`TicketError::CorruptLedger`] if a record before the last line is unreadable
    pub fn open(path: impl AsRef<Path>, format: TicketNoFormat, timeout: Duration) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .append(true)
            .create(true)
            .open(&path)
            .map_err(io_unavailable)?;

        let mut log = LogFile {
            file,
            state: LedgerState::new(format),
            offset: 0,
            lines: 0,
        };
        log.run(Instant::now() + timeout, |_| Ok(((), Vec::new())))?;

        tracing::info!(
            path = %path.display(),
            tickets = log.state.stats().total,
            "Opened flat-file ticket ledger"
        );

        Ok(Self {
            path,
            timeout,
            inner: Arc::new(Mutex::new(log)),
        })
    }

    /// Open the ledger described by `config`.
    ///
    /// # Errors
    ///
    /// See [`open`](Self::open).
    pub fn from_config(config: &TicketingConfig) -> Result<Self> {
        Self::open(
            &config.ledger.file_path,
            config.ticket_no.clone(),
            config.ledger.operation_timeout(),
        )
    }

    /// Log file location.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn transact<T, F>(&self, decide: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&LedgerState) -> Result<(T, Vec<LogRecord>)> + Send + 'static,
    {
        let deadline = Instant::now() + self.timeout;
        let inner = Arc::clone(&self.inner);
        let guard = with_deadline(BACKEND, self.timeout, async move {
            Ok(inner.lock_owned().await)
        })
        .await?;

        // The blocking step is bounded by the file lock deadline and is not
        // cancelled midway, so a write is either fully committed or not at all.
        let result = tokio::task::spawn_blocking(move || {
            let mut log = guard;
            log.run(deadline, decide)
        })
        .await
        .map_err(|e| TicketError::LedgerUnavailable(format!("ledger task failed: {e}")))
        .and_then(|result| result);
        note_unavailable(BACKEND, &result);
        result
    }

    async fn read<T, F>(&self, query: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&LedgerState) -> T + Send + 'static,
    {
        self.transact(move |state| Ok((query(state), Vec::new()))).await
    }
}

impl LogFile {
    fn run<T, F>(&mut self, deadline: Instant, decide: F) -> Result<T>
    where
        F: FnOnce(&LedgerState) -> Result<(T, Vec<LogRecord>)>,
    {
        lock_until(&self.file, deadline)?;
        let result = self.locked(decide);
        if let Err(error) = FileExt::unlock(&self.file) {
            tracing::warn!(error = %error, "Failed to release ledger file lock");
        }
        result
    }

    fn locked<T, F>(&mut self, decide: F) -> Result<T>
    where
        F: FnOnce(&LedgerState) -> Result<(T, Vec<LogRecord>)>,
    {
        self.catch_up()?;
        if self.lines == 0 {
            self.write_header()?;
        }

        let (value, records) = decide(&self.state)?;
        if !records.is_empty() {
            self.append(&records)?;
        }
        Ok(value)
    }

    fn write_header(&mut self) -> Result<()> {
        let header = LogHeader {
            ledger: LEDGER_KIND.to_string(),
            version: LEDGER_VERSION,
        };
        let mut line = serde_json::to_vec(&header)
            .map_err(|e| TicketError::LedgerUnavailable(format!("header encoding failed: {e}")))?;
        line.push(b'\n');
        self.write_durably(&line)?;
        self.lines = 1;
        Ok(())
    }

    fn append(&mut self, records: &[LogRecord]) -> Result<()> {
        let mut buf = Vec::new();
        for record in records {
            serde_json::to_writer(&mut buf, record).map_err(|e| {
                TicketError::LedgerUnavailable(format!("record encoding failed: {e}"))
            })?;
            buf.push(b'\n');
        }
        self.write_durably(&buf)?;

        for record in records {
            self.lines += 1;
            self.state.apply(record).map_err(|reason| TicketError::CorruptLedger {
                line: self.lines,
                reason,
            })?;
        }
        Ok(())
    }

    /// Append `bytes` and fsync. On failure, cut the file back to the last
    /// committed offset.
    fn write_durably(&mut self, bytes: &[u8]) -> Result<()> {
        let written = self
            .file
            .write_all(bytes)
            .and_then(|()| self.file.sync_data());
        if let Err(error) = written {
            if let Err(undo) = self.file.set_len(self.offset) {
                tracing::warn!(error = %undo, "Failed to roll back partial ledger append");
            }
            return Err(io_unavailable(error));
        }
        self.offset += bytes.len() as u64;
        Ok(())
    }

    /// Apply every complete line appended since the last call.
    fn catch_up(&mut self) -> Result<()> {
        let len = self.file.metadata().map_err(io_unavailable)?.len();
        if len < self.offset {
            return Err(TicketError::CorruptLedger {
                line: self.lines,
                reason: format!("log shrank from {} to {len} bytes", self.offset),
            });
        }
        if len == self.offset {
            return Ok(());
        }

        let mut buf = Vec::new();
        self.file
            .seek(SeekFrom::Start(self.offset))
            .map_err(io_unavailable)?;
        (&self.file)
            .take(len - self.offset)
            .read_to_end(&mut buf)
            .map_err(io_unavailable)?;

        let mut pos = 0;
        while pos < buf.len() {
            let line_no = self.lines + 1;
            let Some(line_len) = buf[pos..].iter().position(|b| *b == b'\n') else {
                // Only an unterminated final line can come from an interrupted append.
                tracing::warn!(
                    line = line_no,
                    bytes = buf.len() - pos,
                    "Truncating torn tail record from ticket ledger"
                );
                self.file.set_len(self.offset).map_err(io_unavailable)?;
                self.file.sync_all().map_err(io_unavailable)?;
                break;
            };

            self.parse_line(&buf[pos..pos + line_len], line_no)?;
            self.lines = line_no;
            self.offset += (line_len + 1) as u64;
            pos += line_len + 1;
        }
        Ok(())
    }

    fn parse_line(&mut self, line: &[u8], line_no: usize) -> Result<()> {
        if line_no == 1 {
            let header: LogHeader =
                serde_json::from_slice(line).map_err(|e| TicketError::CorruptLedger {
                    line: line_no,
                    reason: format!("unreadable header: {e}"),
                })?;
            if header.ledger != LEDGER_KIND || header.version != LEDGER_VERSION {
                return Err(TicketError::SchemaMismatch(format!(
                    "expected {LEDGER_KIND} v{LEDGER_VERSION}, found {} v{}",
                    header.ledger, header.version
                )));
            }
            return Ok(());
        }

        let record: LogRecord =
            serde_json::from_slice(line).map_err(|e| TicketError::CorruptLedger {
                line: line_no,
                reason: e.to_string(),
            })?;
        self.state
            .apply(&record)
            .map_err(|reason| TicketError::CorruptLedger { line: line_no, reason })
    }
}

fn lock_until(file: &File, deadline: Instant) -> Result<()> {
    let contended = fs2::lock_contended_error().raw_os_error();
    loop {
        match file.try_lock_exclusive() {
            Ok(()) => return Ok(()),
            Err(error) if error.raw_os_error() == contended => {
                if Instant::now() >= deadline {
                    return Err(TicketError::LedgerUnavailable(
                        "timed out waiting for ledger file lock".to_string(),
                    ));
                }
                std::thread::sleep(LOCK_POLL_INTERVAL);
            }
            Err(error) => return Err(io_unavailable(error)),
        }
    }
}

fn io_unavailable(error: std::io::Error) -> TicketError {
    TicketError::LedgerUnavailable(format!("ledger file I/O failed: {error}"))
}

impl TicketLedger for FlatFileLedger {
    fn allocate_and_store<'a>(
        &'a self,
        name: &'a str,
        email: &'a str,
    ) -> LedgerFuture<'a, AllocatedTicket> {
        let name = name.to_string();
        let email = email.to_string();
        Box::pin(async move {
            let allocated = self
                .transact(move |state| {
                    let (allocated, record) = state.plan_allocate(&name, &email, Utc::now());
                    Ok((allocated, vec![record]))
                })
                .await?;
            tracing::debug!(ticket_id = allocated.id.get(), ticket_no = %allocated.ticket_no, "Allocated ticket");
            Ok(allocated)
        })
    }

    fn attach_signature<'a>(
        &'a self,
        id: TicketId,
        signature: &'a CanonicalSignature,
    ) -> LedgerFuture<'a, ()> {
        let signature = *signature;
        Box::pin(self.transact(move |state| {
            let record = state.plan_attach(id, &signature)?;
            Ok(((), vec![record]))
        }))
    }

    fn find_ticket<'a>(&'a self, ticket_no: &'a TicketNo) -> LedgerFuture<'a, Option<Ticket>> {
        let ticket_no = ticket_no.clone();
        Box::pin(self.read(move |state| state.find(&ticket_no).cloned()))
    }

    fn unsigned_tickets(&self) -> LedgerFuture<'_, Vec<Ticket>> {
        Box::pin(self.read(LedgerState::unsigned))
    }

    fn mark_checked_if_unchecked<'a>(
        &'a self,
        ticket_no: &'a TicketNo,
    ) -> LedgerFuture<'a, CheckInTransition> {
        let ticket_no = ticket_no.clone();
        Box::pin(self.transact(move |state| {
            let (transition, record) = state.plan_check_in(&ticket_no, Utc::now());
            Ok((transition, record.into_iter().collect()))
        }))
    }

    fn mark_unchecked<'a>(&'a self, ticket_no: &'a TicketNo) -> LedgerFuture<'a, UncheckTransition> {
        let ticket_no = ticket_no.clone();
        Box::pin(self.transact(move |state| {
            let (transition, record) = state.plan_uncheck(&ticket_no);
            Ok((transition, record.into_iter().collect()))
        }))
    }

    fn reset_all_checked(&self) -> LedgerFuture<'_, u64> {
        Box::pin(self.transact(|state| {
            let (changed, record) = state.plan_reset_checks(Utc::now());
            Ok((changed, record.into_iter().collect()))
        }))
    }

    fn stats(&self) -> LedgerFuture<'_, LedgerStats> {
        Box::pin(self.read(LedgerState::stats))
    }

    fn insert_checker_code<'a>(
        &'a self,
        code: &'a str,
        note: Option<&'a str>,
    ) -> LedgerFuture<'a, bool> {
        let code = code.to_string();
        let note = note.map(str::to_string);
        Box::pin(self.transact(move |state| {
            let (inserted, record) = state.plan_checker(&code, note.as_deref());
            Ok((inserted, record.into_iter().collect()))
        }))
    }

    fn checker_code_exists<'a>(&'a self, code: &'a str) -> LedgerFuture<'a, bool> {
        let code = code.to_string();
        Box::pin(self.read(move |state| state.has_checker(&code)))
    }

    fn clear_all(&self, _confirmation: ClearConfirmation) -> LedgerFuture<'_, u64> {
        Box::pin(async move {
            let removed = self
                .transact(|state| {
                    let (removed, record) = state.plan_clear(Utc::now());
                    Ok((removed, vec![record]))
                })
                .await?;
            tracing::warn!(removed, path = %self.path.display(), "Cleared all tickets");
            Ok(removed)
        })
    }
}
