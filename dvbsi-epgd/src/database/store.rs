//! [`EpgStore`] implementation over the SQLite database.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use dvbsi::{
    ChannelRecord, EpgStore, JoinKey, NetworkRecord, ProgramRecord, StoreError, StoreResult,
    TsInfoRecord,
};

use super::{Database, DatabaseError};

impl From<DatabaseError> for StoreError {
    fn from(e: DatabaseError) -> Self {
        StoreError::backend(e)
    }
}

/// Shared EPG database handle.
///
/// The parser calls the store synchronously from the worker task, so the
/// connection sits behind a blocking mutex; every call is a short statement.
pub struct SqliteEpgStore {
    db: Mutex<Database>,
}

impl SqliteEpgStore {
    pub fn new(db: Database) -> Self {
        Self { db: Mutex::new(db) }
    }

    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, DatabaseError> {
        Ok(Self::new(Database::open(path)?))
    }

    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self, DatabaseError> {
        Ok(Self::new(Database::open_in_memory()?))
    }

    /// Lock the database for a direct query.
    pub fn lock(&self) -> StoreResult<MutexGuard<'_, Database>> {
        self.db
            .lock()
            .map_err(|_| StoreError::Unavailable("database mutex poisoned".to_string()))
    }
}

impl std::fmt::Debug for SqliteEpgStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteEpgStore").finish_non_exhaustive()
    }
}

impl EpgStore for SqliteEpgStore {
    fn create_nit_table(&self) -> StoreResult<()> {
        Ok(self.lock()?.create_nit_table()?)
    }

    fn create_channel_table(&self) -> StoreResult<()> {
        Ok(self.lock()?.create_channel_table()?)
    }

    fn create_program_table(&self) -> StoreResult<()> {
        Ok(self.lock()?.create_program_table()?)
    }

    fn insert_nit_info(&self, record: &NetworkRecord) -> StoreResult<()> {
        Ok(self.lock()?.insert_nit_info(record)?)
    }

    fn insert_channel_info(&self, record: &ChannelRecord) -> StoreResult<()> {
        Ok(self.lock()?.insert_channel_info(record)?)
    }

    fn insert_program_info(&self, record: &ProgramRecord) -> StoreResult<()> {
        Ok(self.lock()?.insert_program_info(record)?)
    }

    fn insert_ts_info(&self, record: &TsInfoRecord) -> StoreResult<()> {
        Ok(self.lock()?.insert_ts_info(record)?)
    }

    fn read_frequencies(&self) -> StoreResult<Vec<u32>> {
        Ok(self.lock()?.read_frequencies()?)
    }

    fn frequency_and_modulation(&self, key: JoinKey) -> StoreResult<Option<(u32, u8)>> {
        Ok(self.lock()?.frequency_and_modulation(key)?)
    }

    fn is_service_in_ts_info(&self, service_id: u16) -> StoreResult<bool> {
        Ok(self.lock()?.is_service_in_ts_info(service_id)?)
    }

    fn channel_lcn(&self, service_id: u16, transport_stream_id: u16) -> StoreResult<Option<u16>> {
        Ok(self.lock()?.channel_lcn(service_id, transport_stream_id)?)
    }
}
