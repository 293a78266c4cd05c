//! Collaborators consumed by the parser: the tuner/demux and the EPG store.
//!
//! Both are shared with other tasks, so implementations provide their own
//! synchronization and take `&self`.

use chrono::{DateTime, Utc};

use crate::error::StoreResult;
use crate::records::{ChannelRecord, JoinKey, NetworkRecord, ProgramRecord, TsInfoRecord};

/// Tuner and section filter control.
pub trait SiHandler: Send + Sync {
    /// Start delivering sections of a PID.
    fn start_filter(&self, pid: u16);

    /// Stop delivering sections of a PID.
    fn stop_filter(&self, pid: u16);

    /// Stop every active filter.
    fn stop_filters(&self);

    /// Tune to the home transport stream.
    fn set_home_ts(&self, frequency: u32, secondary: u32);

    /// Whether the service list of the tuned transport is known.
    fn is_ts_info_present(&self) -> bool;

    /// Whether a channel scan is in progress.
    fn is_scanning(&self) -> bool;

    /// Start periodic housekeeping once the broadcast time is known.
    fn start_timer(&self);

    /// Apply the broadcast UTC time. Returns false if it could not be applied.
    fn set_reference_time(&self, _utc: DateTime<Utc>) -> bool {
        true
    }
}

/// EPG persistence.
pub trait EpgStore: Send + Sync {
    fn create_nit_table(&self) -> StoreResult<()>;
    fn create_channel_table(&self) -> StoreResult<()>;
    fn create_program_table(&self) -> StoreResult<()>;

    /// Record a transport stream; an existing (tsid, onid) entry is kept.
    fn insert_nit_info(&self, record: &NetworkRecord) -> StoreResult<()>;

    /// Record a channel; an existing (service id, tsid) entry is kept.
    fn insert_channel_info(&self, record: &ChannelRecord) -> StoreResult<()>;

    /// Record an event, replacing an identical (service, event, start) entry.
    fn insert_program_info(&self, record: &ProgramRecord) -> StoreResult<()>;

    fn insert_ts_info(&self, record: &TsInfoRecord) -> StoreResult<()>;

    /// Configured transport frequencies in Hz, home transport first.
    fn read_frequencies(&self) -> StoreResult<Vec<u32>>;

    /// Frequency (Hz) and modulation recorded for a transport stream.
    fn frequency_and_modulation(&self, key: JoinKey) -> StoreResult<Option<(u32, u8)>>;

    fn is_service_in_ts_info(&self, service_id: u16) -> StoreResult<bool>;

    /// LCN already assigned to a channel, if the channel is stored.
    fn channel_lcn(&self, service_id: u16, transport_stream_id: u16) -> StoreResult<Option<u16>>;
}
