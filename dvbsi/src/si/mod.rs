//! DVB Service Information decoding.
//!
//! # Supported Tables
//! - PAT (Program Association Table) - PID 0x0000
//! - PMT (Program Map Table) - PIDs announced by the PAT
//! - NIT (Network Information Table) - PID 0x0010
//! - SDT (Service Description Table) - PID 0x0011
//! - BAT (Bouquet Association Table) - PID 0x0011
//! - EIT (Event Information Table) - PID 0x0012
//! - TDT/TOT (Time and Date / Time Offset Table) - PID 0x0014
//!
//! # Usage
//! ```ignore
//! use dvbsi::{SiParser, ParserConfig};
//!
//! let mut parser = SiParser::new(ParserConfig::default(), handler, store);
//! parser.ingest(&queued_item);
//! ```

pub mod bat;
pub mod cursor;
pub mod descriptors;
pub mod dispatcher;
pub mod eit;
pub mod nit;
pub mod packet;
pub mod pat;
pub mod pmt;
pub mod psi;
pub mod sdt;
pub mod text;
pub mod time;
pub mod tot;
pub mod version;

pub use cursor::SectionCursor;
pub use descriptors::{genre_name, DescriptorState, TableContext};
pub use dispatcher::{JoinStrategy, ParserConfig, SiParser};
pub use packet::{SectionDemux, TsHeader, TsPacket, TsPacketIterator, SYNC_BYTE, TS_PACKET_SIZE};
pub use psi::{crc32_mpeg2, PsiHeader, SectionCollector};
pub use version::{AdmitResult, VersionTracker};

/// Well-known PIDs.
pub mod pid {
    /// Program Association Table PID.
    pub const PAT: u16 = 0x0000;
    /// Network Information Table PID.
    pub const NIT: u16 = 0x0010;
    /// Service Description / Bouquet Association Table PID.
    pub const SDT: u16 = 0x0011;
    /// Event Information Table PID.
    pub const EIT: u16 = 0x0012;
    /// Time and Date / Time Offset Table PID.
    pub const TDT: u16 = 0x0014;
    /// Null packet PID (stuffing).
    pub const NULL: u16 = 0x1FFF;

    /// PIDs started when a transport is tuned.
    pub const BASE_FILTERS: [u16; 4] = [SDT, NIT, EIT, TDT];
}

/// Table IDs.
pub mod table_id {
    /// Program Association Section.
    pub const PAT: u8 = 0x00;
    /// Program Map Section.
    pub const PMT: u8 = 0x02;
    /// Network Information Section - actual.
    pub const NIT_ACTUAL: u8 = 0x40;
    /// Network Information Section - other.
    pub const NIT_OTHER: u8 = 0x41;
    /// Service Description Section - actual.
    pub const SDT_ACTUAL: u8 = 0x42;
    /// Service Description Section - other.
    pub const SDT_OTHER: u8 = 0x46;
    /// Bouquet Association Section.
    pub const BAT: u8 = 0x4A;
    /// Event Information Section - actual, present/following.
    pub const EIT_PF_ACTUAL: u8 = 0x4E;
    /// Event Information Section - actual, schedule (first).
    pub const EIT_SCHEDULE_FIRST: u8 = 0x50;
    /// Event Information Section - actual, schedule (last).
    pub const EIT_SCHEDULE_LAST: u8 = 0x5F;
    /// Time and Date Section.
    pub const TDT: u8 = 0x70;
    /// Time Offset Section.
    pub const TOT: u8 = 0x73;
}

/// Descriptor tags.
pub mod descriptor_tag {
    /// Satellite delivery system descriptor. Not decoded.
    pub const SATELLITE_DELIVERY_SYSTEM: u8 = 0x43;
    /// Cable delivery system descriptor.
    pub const CABLE_DELIVERY_SYSTEM: u8 = 0x44;
    /// Bouquet name descriptor.
    pub const BOUQUET_NAME: u8 = 0x47;
    /// Service descriptor.
    pub const SERVICE: u8 = 0x48;
    /// Short event descriptor.
    pub const SHORT_EVENT: u8 = 0x4D;
    /// Component descriptor.
    pub const COMPONENT: u8 = 0x50;
    /// Content descriptor.
    pub const CONTENT: u8 = 0x54;
    /// Local time offset descriptor.
    pub const LOCAL_TIME_OFFSET: u8 = 0x58;
    /// Terrestrial delivery system descriptor.
    pub const TERRESTRIAL_DELIVERY_SYSTEM: u8 = 0x5A;
    /// Logical channel descriptor (private, EACEM/NorDig).
    pub const LOGICAL_CHANNEL: u8 = 0x83;
}
