//! Database schema definitions.
//!
//! `FREQUENCY` and `TSINFO` are created when the database is opened; the
//! tables written by the SI parser are created on its request.

/// Transport frequencies in Hz, home transport first.
///
/// `INT` rather than `INTEGER` keeps the rowid separate, so rowid order is
/// insertion order.
pub const FREQUENCY_TABLE_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS FREQUENCY (
    FREQUENCY INT PRIMARY KEY NOT NULL
);
"#;

/// Elementary stream summary per program, from the PMT.
pub const TSINFO_TABLE_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS TSINFO (
    FREQUENCY       INTEGER DEFAULT NULL,
    PROGRAM_NUMBER  INTEGER DEFAULT NULL,
    VIDEO_PID       INTEGER DEFAULT NULL,
    VIDEO_CODEC     INTEGER DEFAULT NULL,
    VIDEO_PCR_PID   INTEGER DEFAULT NULL,
    AUDIO_PID       INTEGER DEFAULT NULL,
    AUDIO_CODEC     INTEGER DEFAULT NULL,
    AUDIO_PCR_PID   INTEGER DEFAULT NULL,
    PMT_PID         INTEGER DEFAULT NULL,
    UNIQUE(FREQUENCY, PROGRAM_NUMBER, VIDEO_PID, VIDEO_CODEC, VIDEO_PCR_PID,
           AUDIO_PID, AUDIO_CODEC, AUDIO_PCR_PID, PMT_PID)
);
"#;

/// Transport streams announced by the NIT.
pub const NIT_TABLE_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS NIT (
    NETWORK_ID           INTEGER NOT NULL,
    TRANSPORT_STREAM_ID  INTEGER NOT NULL,
    ORIGINAL_NETWORK_ID  INTEGER DEFAULT NULL,
    FREQUENCY            INTEGER DEFAULT NULL,  -- Hz
    MODULATION           INTEGER DEFAULT NULL,
    UNIQUE(TRANSPORT_STREAM_ID, ORIGINAL_NETWORK_ID)
);
"#;

/// Services from the SDT.
pub const CHANNEL_TABLE_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS CHANNEL (
    LCN             TEXT        NOT NULL,
    FREQUENCY       INTEGER     NOT NULL,       -- MHz
    MODULATION      INTEGER     NOT NULL,
    SERVICE_ID      INTEGER     NOT NULL,
    TS_ID           INTEGER     NOT NULL,
    NETWORK_ID      INTEGER     NOT NULL,       -- original network id
    PROGRAM_NUMBER  INTEGER     NOT NULL,
    NAME            TEXT        NOT NULL,
    LANGUAGE        VARCHAR(20) DEFAULT 'und',
    PARENTAL_LOCK   INTEGER     DEFAULT 0,
    UNIQUE(SERVICE_ID, TS_ID)
);
"#;

/// Events from the EIT. START_TIME is a Unix timestamp.
pub const PROGRAM_TABLE_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS PROGRAM (
    SOURCE_ID      INTEGER  NOT NULL,
    EVENT_ID       INTEGER  NOT NULL,
    START_TIME     INTEGER  NOT NULL,
    DURATION       INTEGER  NOT NULL,
    EVENT_NAME     TEXT     NOT NULL,
    SUBTITLE_LANG  TEXT     NULL DEFAULT 'und',
    RATING         VARCHAR(10) DEFAULT 'Not Available',
    GENRE          TEXT     NULL DEFAULT 'Not Available',
    AUDIO_LANG     TEXT     NULL DEFAULT 'und',
    UNIQUE(SOURCE_ID, EVENT_ID, START_TIME)
);

CREATE INDEX IF NOT EXISTS idx_program_end ON PROGRAM(START_TIME, DURATION);
"#;

/// Placeholder for an empty language list.
pub const UNDEFINED_LANGUAGE: &str = "und";

/// Placeholder for an empty genre or rating.
pub const NOT_AVAILABLE: &str = "Not Available";
