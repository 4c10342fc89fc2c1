//! Database layer for the study platform.

mod schema;
mod subjects;
mod completion;
mod forms;
mod researchers;

pub use researchers::StoredCredentials;
pub use schema::*;

use rusqlite::{Connection, ErrorCode, Transaction, TransactionBehavior};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Database errors.
#[derive(Error, Debug)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Constraint violation: {0}")]
    Constraint(String),

    #[error("Deadline exceeded: {0}")]
    DeadlineExceeded(String),
}

impl DbError {
    /// SQLite result code, when the error came from the engine.
    pub fn sqlite_code(&self) -> Option<ErrorCode> {
        match self {
            DbError::Sqlite(e) => e.sqlite_error_code(),
            _ => None,
        }
    }

    /// True for UNIQUE / PRIMARY KEY / CHECK violations.
    pub fn is_constraint_violation(&self) -> bool {
        matches!(self, DbError::Constraint(_))
            || self.sqlite_code() == Some(ErrorCode::ConstraintViolation)
    }

    /// True when the engine gave up waiting for a lock.
    pub fn is_busy(&self) -> bool {
        matches!(
            self.sqlite_code(),
            Some(ErrorCode::DatabaseBusy) | Some(ErrorCode::DatabaseLocked)
        )
    }
}

pub type DbResult<T> = Result<T, DbError>;

/// SQLite journal mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum JournalMode {
    #[default]
    Wal,
    Delete,
}

impl JournalMode {
    pub fn pragma_value(self) -> &'static str {
        match self {
            JournalMode::Wal => "wal",
            JournalMode::Delete => "delete",
        }
    }
}

impl std::str::FromStr for JournalMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "wal" => Ok(JournalMode::Wal),
            "delete" => Ok(JournalMode::Delete),
            other => Err(format!("unsupported journal mode '{}'", other)),
        }
    }
}

/// Connection settings applied at open.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreOptions {
    /// How long a writer waits for the lock before failing with SQLITE_BUSY
    pub busy_timeout: Duration,
    pub journal_mode: JournalMode,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            busy_timeout: Duration::from_millis(2_000),
            journal_mode: JournalMode::Wal,
        }
    }
}

/// Database connection wrapper.
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Open database at path, creating if needed.
    pub fn open<P: AsRef<Path>>(path: P) -> DbResult<Self> {
        Self::open_with(path, &StoreOptions::default())
    }

    /// Open database at path with explicit connection settings.
    pub fn open_with<P: AsRef<Path>>(path: P, options: &StoreOptions) -> DbResult<Self> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(options.busy_timeout)?;
        // journal_mode returns a row, so it cannot go through execute_batch
        let _mode: String = conn.query_row(
            &format!("PRAGMA journal_mode = {}", options.journal_mode.pragma_value()),
            [],
            |row| row.get(0),
        )?;
        let db = Self { conn };
        db.initialize()?;
        Ok(db)
    }

    /// Create in-memory database (for testing).
    pub fn open_in_memory() -> DbResult<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Self { conn };
        db.initialize()?;
        Ok(db)
    }

    /// Initialize schema.
    fn initialize(&self) -> DbResult<()> {
        self.conn.execute_batch(SCHEMA)?;
        Ok(())
    }

    /// Get raw connection (for advanced queries).
    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Begin a `BEGIN IMMEDIATE` transaction.
    ///
    /// The write lock is taken before the first read, so read-then-write sequences inside
    /// the transaction are serialized against every other writer on the same database file.
    /// Statements issued through `self` while the returned guard is alive run inside it;
    /// dropping the guard without `commit()` rolls back.
    pub fn immediate_transaction(&self) -> DbResult<Transaction<'_>> {
        Ok(Transaction::new_unchecked(
            &self.conn,
            TransactionBehavior::Immediate,
        )?)
    }
}
