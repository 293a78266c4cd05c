//! Database module for EPG storage.
//!
//! This module provides SQLite-based persistent storage for:
//! - Configured transport frequencies
//! - NIT transport streams (frequency and modulation)
//! - Channels and programmes decoded from SDT/EIT
//! - Per-program elementary stream summaries from the PMT

mod epg;
mod schema;
mod store;

pub use store::SqliteEpgStore;

use rusqlite::Connection;
use std::path::Path;
use thiserror::Error;

/// Database error types.
#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Invalid value in column {column}: {value}")]
    InvalidValue { column: &'static str, value: String },
}

pub type Result<T> = std::result::Result<T, DatabaseError>;

/// Main database connection wrapper.
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Open or create a database at the specified path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path)?;
        let db = Self { conn };
        db.initialize_schema()?;
        Ok(db)
    }

    /// Open an in-memory database (for testing).
    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Self { conn };
        db.initialize_schema()?;
        Ok(db)
    }

    /// Create the tables the daemon itself maintains.
    fn initialize_schema(&self) -> Result<()> {
        self.conn.execute_batch(schema::FREQUENCY_TABLE_SQL)?;
        self.conn.execute_batch(schema::TSINFO_TABLE_SQL)?;
        Ok(())
    }

    pub fn create_nit_table(&self) -> Result<()> {
        self.conn.execute_batch(schema::NIT_TABLE_SQL)?;
        Ok(())
    }

    pub fn create_channel_table(&self) -> Result<()> {
        self.conn.execute_batch(schema::CHANNEL_TABLE_SQL)?;
        Ok(())
    }

    pub fn create_program_table(&self) -> Result<()> {
        self.conn.execute_batch(schema::PROGRAM_TABLE_SQL)?;
        Ok(())
    }

    /// Row count of a table; 0 when the table does not exist yet.
    pub fn row_count(&self, table: &str) -> Result<u64> {
        let exists: bool = self.conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1)",
            [table],
            |row| row.get(0),
        )?;
        if !exists {
            return Ok(0);
        }
        let count: i64 = self
            .conn
            .query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| row.get(0))?;
        Ok(count as u64)
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database").finish_non_exhaustive()
    }
}
