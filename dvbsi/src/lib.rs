//! DVB Service Information decoder.
//!
//! Raw PSI/SI sections (PAT, PMT, NIT, SDT, EIT, TDT, TOT and optionally BAT)
//! are decoded into channel, network and programme records and handed to an
//! [`EpgStore`]. Section filtering and tuning are delegated to a
//! [`SiHandler`].
//!
//! # Data Flow
//!
//! ```text
//! tuner --(frequency tag + section)--> SiParser::ingest
//!                                          |
//!            PAT -> PMT filters            |  version trackers
//!            NIT/BAT -> transports -> SDT -> services -> EIT
//!            TDT/TOT -> reference time     |
//!                                          v
//!                                      EpgStore
//! ```
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use dvbsi::{ParserConfig, SiParser};
//!
//! let mut parser = SiParser::new(ParserConfig::default(), handler, store);
//! parser.prepare_store();
//! parser.start_base_filters();
//! while let Some(item) = queue.recv().await {
//!     parser.ingest(&item);
//! }
//! ```

pub mod collab;
pub mod error;
pub mod records;
pub mod si;

pub use collab::{EpgStore, SiHandler};
pub use error::{Result, SiError, StoreError, StoreResult};
pub use records::{
    BouquetId, ChannelRecord, JoinKey, LocalTimeOffset, NetworkId, NetworkRecord, ProgramRecord,
    ServiceKey, TsInfoRecord,
};
pub use si::dispatcher::{frame_section, FREQUENCY_PREFIX_LEN};
pub use si::{JoinStrategy, ParserConfig, SiParser};
