//! Keys and records exchanged between the decoders and the EPG store.

use chrono::{DateTime, Duration, Utc};

/// Versioning scope of a NIT sub-table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NetworkId(pub u16);

/// Versioning scope of a BAT sub-table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BouquetId(pub u16);

/// Identifies a transport stream across tables (NIT/BAT -> SDT).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JoinKey {
    pub original_network_id: u16,
    pub transport_stream_id: u16,
}

impl JoinKey {
    pub fn new(original_network_id: u16, transport_stream_id: u16) -> Self {
        Self {
            original_network_id,
            transport_stream_id,
        }
    }
}

/// Identifies a service across tables (SDT -> EIT).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ServiceKey {
    pub original_network_id: u16,
    pub transport_stream_id: u16,
    pub service_id: u16,
}

impl ServiceKey {
    pub fn new(original_network_id: u16, transport_stream_id: u16, service_id: u16) -> Self {
        Self {
            original_network_id,
            transport_stream_id,
            service_id,
        }
    }

    /// The transport stream carrying this service.
    pub fn join_key(&self) -> JoinKey {
        JoinKey::new(self.original_network_id, self.transport_stream_id)
    }
}

/// One transport stream entry of a NIT.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkRecord {
    pub network_id: u16,
    pub transport_stream_id: u16,
    pub original_network_id: u16,
    /// Carrier frequency in Hz (0 when no delivery descriptor was seen).
    pub frequency_hz: u32,
    /// Modulation code as carried by the delivery descriptor.
    pub modulation: u8,
}

impl NetworkRecord {
    pub fn join_key(&self) -> JoinKey {
        JoinKey::new(self.original_network_id, self.transport_stream_id)
    }
}

/// One service of an SDT, ready to be persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelRecord {
    /// Logical channel number, stored as text.
    pub lcn: String,
    /// Carrier frequency in MHz.
    pub frequency_mhz: u32,
    pub modulation: u8,
    /// Service name.
    pub name: String,
    pub service_id: u16,
    pub transport_stream_id: u16,
    pub original_network_id: u16,
    /// Program number in the PAT (equal to the service id in DVB).
    pub program_number: u16,
    /// Service language; empty means undefined.
    pub language: String,
}

/// One event of an EIT, ready to be persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgramRecord {
    pub service_id: u16,
    pub event_id: u16,
    /// Start time, with the local time offset applied.
    pub start: DateTime<Utc>,
    pub duration: Duration,
    /// Event name from the short event descriptor.
    pub title: String,
    /// Parental rating; not decoded for DVB.
    pub rating: String,
    pub genre: String,
    pub subtitle_languages: Vec<String>,
    pub audio_languages: Vec<String>,
}

impl ProgramRecord {
    pub fn end(&self) -> DateTime<Utc> {
        self.start + self.duration
    }
}

/// Elementary stream summary of one program, derived from its PMT.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TsInfoRecord {
    /// Frequency in Hz of the transport the PMT was received on.
    pub frequency: u32,
    pub program_number: u16,
    pub pmt_pid: u16,
    pub pcr_pid: u16,
    pub video_pid: u16,
    pub video_codec: u8,
    pub audio_pid: u16,
    pub audio_codec: u8,
}

/// One entry of a local time offset descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalTimeOffset {
    /// ISO 3166 alpha-3 country code.
    pub country_code: [u8; 3],
    pub region_id: u8,
    /// 0 = ahead of UTC, 1 = behind UTC.
    pub polarity: u8,
    pub offset: Duration,
    /// `None` when the time of change is undefined.
    pub time_of_change: Option<DateTime<Utc>>,
    pub next_offset: Duration,
}

impl LocalTimeOffset {
    /// Signed offset in force at `now`.
    pub fn effective_offset(&self, now: DateTime<Utc>) -> Duration {
        let magnitude = match self.time_of_change {
            Some(change) if now >= change => self.next_offset,
            _ => self.offset,
        };
        if self.polarity == 1 {
            -magnitude
        } else {
            magnitude
        }
    }

    pub fn matches(&self, country_code: &[u8; 3], region_id: u8) -> bool {
        self.country_code.eq_ignore_ascii_case(country_code) && self.region_id == region_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_service_key_join() {
        let key = ServiceKey::new(1, 100, 5);
        assert_eq!(key.join_key(), JoinKey::new(1, 100));
    }

    #[test]
    fn test_effective_offset() {
        let change = Utc.with_ymd_and_hms(2024, 3, 31, 1, 0, 0).unwrap();
        let offset = LocalTimeOffset {
            country_code: *b"GBR",
            region_id: 0,
            polarity: 0,
            offset: Duration::hours(0),
            time_of_change: Some(change),
            next_offset: Duration::hours(1),
        };
        assert_eq!(
            offset.effective_offset(change - Duration::minutes(1)),
            Duration::zero()
        );
        assert_eq!(offset.effective_offset(change), Duration::hours(1));

        let behind = LocalTimeOffset {
            polarity: 1,
            time_of_change: None,
            offset: Duration::hours(3),
            ..offset
        };
        assert_eq!(behind.effective_offset(change), Duration::hours(-3));
    }

    #[test]
    fn test_offset_matching() {
        let offset = LocalTimeOffset {
            country_code: *b"DEU",
            region_id: 2,
            polarity: 0,
            offset: Duration::hours(1),
            time_of_change: None,
            next_offset: Duration::hours(2),
        };
        assert!(offset.matches(b"deu", 2));
        assert!(!offset.matches(b"DEU", 0));
        assert!(!offset.matches(b"FRA", 2));
    }
}
