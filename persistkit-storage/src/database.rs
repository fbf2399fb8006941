//! SQLite connection handle.
//!
//! Blocking callers borrow a `&Connection` directly. [`Database`] wraps one
//! connection behind a mutex so async callers can hand work to
//! `spawn_blocking` without holding the connection across an await.

use crate::error::{StorageError, StorageResult};
use rusqlite::Connection;
use serde::Deserialize;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::debug;

const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;

// ============================================================================
// Config
// ============================================================================

/// SQLite journal mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum JournalMode {
    #[default]
    Wal,
    Delete,
}

impl JournalMode {
    pub const fn pragma_value(self) -> &'static str {
        match self {
            Self::Wal => "wal",
            Self::Delete => "delete",
        }
    }
}

/// Connection settings applied by [`Database::open`].
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
    #[serde(default)]
    pub journal_mode: JournalMode,
}

const fn default_busy_timeout_ms() -> u64 {
    DEFAULT_BUSY_TIMEOUT_MS
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS,
            journal_mode: JournalMode::default(),
        }
    }
}

// ============================================================================
// Database
// ============================================================================

/// A shared SQLite connection.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Opens or creates a database file and applies `config`.
    pub fn open(path: &Path, config: &DatabaseConfig) -> StorageResult<Self> {
        let conn = Connection::open(path)?;
        apply_pragmas(&conn, config)?;
        debug!(path = %path.display(), "opened database");
        Ok(Self::from_connection(conn))
    }

    /// Opens a private in-memory database.
    pub fn open_in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        Ok(Self::from_connection(conn))
    }

    pub fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
        }
    }

    /// Runs `f` with the connection on the current thread.
    pub fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> StorageResult<T>) -> StorageResult<T> {
        let guard = self.conn.lock().map_err(|_| StorageError::LockPoisoned)?;
        f(&guard)
    }

    /// Runs `f` with the connection on tokio's blocking pool.
    pub async fn run<T, F>(&self, f: F) -> StorageResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> StorageResult<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let guard = conn.lock().map_err(|_| StorageError::LockPoisoned)?;
            f(&guard)
        })
        .await
        .map_err(|e| StorageError::Join(e.to_string()))?
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database").finish_non_exhaustive()
    }
}

fn apply_pragmas(conn: &Connection, config: &DatabaseConfig) -> StorageResult<()> {
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    // journal_mode returns the resulting mode as a row.
    let _mode: String = conn.query_row(
        &format!("PRAGMA journal_mode = {}", config.journal_mode.pragma_value()),
        [],
        |row| row.get(0),
    )?;
    conn.busy_timeout(Duration::from_millis(config.busy_timeout_ms))?;
    Ok(())
}
