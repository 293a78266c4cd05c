//! EPG table operations.

use super::schema::{NOT_AVAILABLE, UNDEFINED_LANGUAGE};
use super::{Database, DatabaseError, Result};
use chrono::{DateTime, Utc};
use dvbsi::{ChannelRecord, JoinKey, NetworkRecord, ProgramRecord, TsInfoRecord};
use rusqlite::{params, OptionalExtension};

fn or_placeholder<'a>(value: &'a str, placeholder: &'a str) -> &'a str {
    if value.is_empty() {
        placeholder
    } else {
        value
    }
}

fn join_languages(languages: &[String]) -> String {
    if languages.is_empty() {
        UNDEFINED_LANGUAGE.to_string()
    } else {
        languages.join(",")
    }
}

impl Database {
    /// Replace the frequency list, keeping the given order.
    pub fn replace_frequencies(&mut self, frequencies: &[u32]) -> Result<()> {
        let tx = self.conn.transaction()?;
        tx.execute("DELETE FROM FREQUENCY", [])?;
        for frequency in frequencies {
            tx.execute(
                "INSERT OR IGNORE INTO FREQUENCY (FREQUENCY) VALUES (?1)",
                params![frequency],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    /// Stored frequencies in insertion order; zero entries are skipped.
    pub fn read_frequencies(&self) -> Result<Vec<u32>> {
        let mut stmt = self
            .conn
            .prepare("SELECT FREQUENCY FROM FREQUENCY ORDER BY rowid")?;
        let frequencies = stmt
            .query_map([], |row| row.get::<_, u32>(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(frequencies.into_iter().filter(|&f| f != 0).collect())
    }

    pub fn insert_nit_info(&self, record: &NetworkRecord) -> Result<()> {
        self.conn.execute(
            "INSERT OR IGNORE INTO NIT (NETWORK_ID, TRANSPORT_STREAM_ID, ORIGINAL_NETWORK_ID, FREQUENCY, MODULATION)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                record.network_id,
                record.transport_stream_id,
                record.original_network_id,
                record.frequency_hz,
                record.modulation,
            ],
        )?;
        Ok(())
    }

    pub fn frequency_and_modulation(&self, key: JoinKey) -> Result<Option<(u32, u8)>> {
        let found = self
            .conn
            .query_row(
                "SELECT FREQUENCY, MODULATION FROM NIT
                 WHERE ORIGINAL_NETWORK_ID = ?1 AND TRANSPORT_STREAM_ID = ?2",
                params![key.original_network_id, key.transport_stream_id],
                |row| Ok((row.get::<_, Option<u32>>(0)?, row.get::<_, Option<u8>>(1)?)),
            )
            .optional()?;
        Ok(found.map(|(frequency, modulation)| (frequency.unwrap_or(0), modulation.unwrap_or(0))))
    }

    pub fn insert_channel_info(&self, record: &ChannelRecord) -> Result<()> {
        self.conn.execute(
            "INSERT OR IGNORE INTO CHANNEL (LCN, FREQUENCY, MODULATION, SERVICE_ID, TS_ID, NETWORK_ID,
                                            PROGRAM_NUMBER, NAME, LANGUAGE)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                record.lcn,
                record.frequency_mhz,
                record.modulation,
                record.service_id,
                record.transport_stream_id,
                record.original_network_id,
                record.program_number,
                record.name,
                or_placeholder(&record.language, UNDEFINED_LANGUAGE),
            ],
        )?;
        Ok(())
    }

    /// LCN of a stored channel.
    pub fn channel_lcn(&self, service_id: u16, transport_stream_id: u16) -> Result<Option<u16>> {
        let lcn: Option<String> = self
            .conn
            .query_row(
                "SELECT LCN FROM CHANNEL WHERE SERVICE_ID = ?1 AND TS_ID = ?2",
                params![service_id, transport_stream_id],
                |row| row.get(0),
            )
            .optional()?;
        lcn.map(|lcn| {
            lcn.trim().parse().map_err(|_| DatabaseError::InvalidValue {
                column: "CHANNEL.LCN",
                value: lcn.clone(),
            })
        })
        .transpose()
    }

    pub fn insert_program_info(&self, record: &ProgramRecord) -> Result<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO PROGRAM (SOURCE_ID, EVENT_ID, START_TIME, DURATION, EVENT_NAME,
                                             SUBTITLE_LANG, RATING, GENRE, AUDIO_LANG)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                record.service_id,
                record.event_id,
                record.start.timestamp(),
                record.duration.num_seconds(),
                record.title,
                join_languages(&record.subtitle_languages),
                or_placeholder(&record.rating, NOT_AVAILABLE),
                or_placeholder(&record.genre, NOT_AVAILABLE),
                join_languages(&record.audio_languages),
            ],
        )?;
        Ok(())
    }

    /// Delete programmes that ended before `now`. Returns the number removed.
    pub fn delete_expired_programs(&self, now: DateTime<Utc>) -> Result<usize> {
        let removed = self.conn.execute(
            "DELETE FROM PROGRAM WHERE (START_TIME + DURATION) < ?1",
            params![now.timestamp()],
        )?;
        Ok(removed)
    }

    pub fn insert_ts_info(&self, record: &TsInfoRecord) -> Result<()> {
        self.conn.execute(
            "INSERT OR IGNORE INTO TSINFO (FREQUENCY, PROGRAM_NUMBER, VIDEO_PID, VIDEO_CODEC, VIDEO_PCR_PID,
                                           AUDIO_PID, AUDIO_CODEC, AUDIO_PCR_PID, PMT_PID)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                record.frequency,
                record.program_number,
                record.video_pid,
                record.video_codec,
                record.pcr_pid,
                record.audio_pid,
                record.audio_codec,
                record.pcr_pid,
                record.pmt_pid,
            ],
        )?;
        Ok(())
    }

    pub fn is_service_in_ts_info(&self, service_id: u16) -> Result<bool> {
        let present: bool = self.conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM TSINFO WHERE PROGRAM_NUMBER = ?1)",
            params![service_id],
            |row| row.get(0),
        )?;
        Ok(present)
    }

    /// Whether any PMT was recorded for a transport frequency.
    pub fn has_ts_info(&self, frequency: u32) -> Result<bool> {
        let present: bool = self.conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM TSINFO WHERE FREQUENCY = ?1)",
            params![frequency],
            |row| row.get(0),
        )?;
        Ok(present)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn epg_db() -> Database {
        let db = Database::open_in_memory().unwrap();
        db.create_nit_table().unwrap();
        db.create_channel_table().unwrap();
        db.create_program_table().unwrap();
        db
    }

    fn channel(lcn: &str, service_id: u16, name: &str) -> ChannelRecord {
        ChannelRecord {
            lcn: lcn.to_string(),
            frequency_mhz: 450,
            modulation: 3,
            name: name.to_string(),
            service_id,
            transport_stream_id: 100,
            original_network_id: 1,
            program_number: service_id,
            language: String::new(),
        }
    }

    fn program(event_id: u16, start: DateTime<Utc>, minutes: i64) -> ProgramRecord {
        ProgramRecord {
            service_id: 1,
            event_id,
            start,
            duration: Duration::minutes(minutes),
            title: format!("Event {}", event_id),
            rating: String::new(),
            genre: String::new(),
            subtitle_languages: Vec::new(),
            audio_languages: vec!["eng".to_string(), "deu".to_string()],
        }
    }

    #[test]
    fn test_frequencies_keep_order() {
        let mut db = epg_db();
        db.replace_frequencies(&[618_000_000, 474_000_000, 0, 474_000_000])
            .unwrap();
        assert_eq!(db.read_frequencies().unwrap(), vec![618_000_000, 474_000_000]);

        db.replace_frequencies(&[474_000_000]).unwrap();
        assert_eq!(db.read_frequencies().unwrap(), vec![474_000_000]);
    }

    #[test]
    fn test_nit_lookup() {
        let db = epg_db();
        let record = NetworkRecord {
            network_id: 1,
            transport_stream_id: 100,
            original_network_id: 1,
            frequency_hz: 450_000_000,
            modulation: 3,
        };
        db.insert_nit_info(&record).unwrap();
        // First entry wins.
        db.insert_nit_info(&NetworkRecord {
            frequency_hz: 1,
            ..record.clone()
        })
        .unwrap();

        assert_eq!(
            db.frequency_and_modulation(JoinKey::new(1, 100)).unwrap(),
            Some((450_000_000, 3))
        );
        assert_eq!(db.frequency_and_modulation(JoinKey::new(2, 100)).unwrap(), None);
        assert_eq!(db.row_count("NIT").unwrap(), 1);
    }

    #[test]
    fn test_channel_lcn_and_language() {
        let db = epg_db();
        db.insert_channel_info(&channel("7", 1, "Channel One")).unwrap();
        db.insert_channel_info(&channel("9", 1, "Renamed")).unwrap();

        assert_eq!(db.channel_lcn(1, 100).unwrap(), Some(7));
        assert_eq!(db.channel_lcn(2, 100).unwrap(), None);

        let (name, language): (String, String) = db
            .conn
            .query_row("SELECT NAME, LANGUAGE FROM CHANNEL WHERE SERVICE_ID = 1", [], |row| {
                Ok((row.get(0)?, row.get(1)?))
            })
            .unwrap();
        assert_eq!(name, "Channel One");
        assert_eq!(language, "und");
    }

    #[test]
    fn test_channel_lcn_not_numeric() {
        let db = epg_db();
        db.insert_channel_info(&channel("A1", 3, "Odd")).unwrap();
        assert!(matches!(
            db.channel_lcn(3, 100),
            Err(DatabaseError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_program_placeholders_and_replace() {
        let db = epg_db();
        let start = Utc.with_ymd_and_hms(2024, 5, 1, 20, 0, 0).unwrap();
        db.insert_program_info(&program(1, start, 30)).unwrap();
        db.insert_program_info(&ProgramRecord {
            title: "Updated".to_string(),
            ..program(1, start, 30)
        })
        .unwrap();
        assert_eq!(db.row_count("PROGRAM").unwrap(), 1);

        let row: (String, String, String, String, String, i64) = db
            .conn
            .query_row(
                "SELECT EVENT_NAME, SUBTITLE_LANG, RATING, GENRE, AUDIO_LANG, START_TIME FROM PROGRAM",
                [],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?, row.get(5)?)),
            )
            .unwrap();
        assert_eq!(row.0, "Updated");
        assert_eq!(row.1, "und");
        assert_eq!(row.2, "Not Available");
        assert_eq!(row.3, "Not Available");
        assert_eq!(row.4, "eng,deu");
        assert_eq!(row.5, start.timestamp());
    }

    #[test]
    fn test_delete_expired_programs() {
        let db = epg_db();
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 21, 0, 0).unwrap();
        db.insert_program_info(&program(1, now - Duration::hours(2), 30)).unwrap();
        db.insert_program_info(&program(2, now - Duration::minutes(10), 30)).unwrap();
        db.insert_program_info(&program(3, now + Duration::hours(1), 30)).unwrap();

        assert_eq!(db.delete_expired_programs(now).unwrap(), 1);
        assert_eq!(db.row_count("PROGRAM").unwrap(), 2);
    }

    #[test]
    fn test_ts_info() {
        let db = epg_db();
        let info = TsInfoRecord {
            frequency: 450_000_000,
            program_number: 1,
            pmt_pid: 0x20,
            pcr_pid: 0x100,
            video_pid: 0x100,
            video_codec: 0x02,
            audio_pid: 0x101,
            audio_codec: 0x03,
        };
        db.insert_ts_info(&info).unwrap();
        db.insert_ts_info(&info).unwrap();
        assert_eq!(db.row_count("TSINFO").unwrap(), 1);
        assert!(db.is_service_in_ts_info(1).unwrap());
        assert!(!db.is_service_in_ts_info(2).unwrap());
        assert!(db.has_ts_info(450_000_000).unwrap());
        assert!(!db.has_ts_info(474_000_000).unwrap());
    }
}
