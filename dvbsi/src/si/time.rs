//! DVB time encodings: MJD + BCD UTC timestamps, BCD durations and BCD
//! frequency fields.

use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};

/// 5-byte MJD + BCD hh:mm:ss timestamp.
pub type DvbDate = [u8; 5];

/// 3-byte BCD hh:mm:ss duration.
pub type DvbDuration = [u8; 3];

fn bcd_byte(value: u8) -> Option<u32> {
    let hi = (value >> 4) as u32;
    let lo = (value & 0x0F) as u32;
    if hi > 9 || lo > 9 {
        return None;
    }
    Some(hi * 10 + lo)
}

/// Convert a Modified Julian Day number to a Gregorian calendar date.
///
/// Uses the ETSI EN 300 468 Annex C conversion, including its correction for
/// the January/February months counted at the end of the previous year.
pub fn mjd_to_date(mjd: u16) -> Option<NaiveDate> {
    let mjd = mjd as f64;
    let y_prime = ((mjd - 15078.2) / 365.25) as i64;
    let m_prime = ((mjd - 14956.1 - (y_prime as f64 * 365.25).trunc()) / 30.6001) as i64;
    let day = mjd as i64 - 14956 - (y_prime as f64 * 365.25) as i64 - (m_prime as f64 * 30.6001) as i64;
    let k = if m_prime == 14 || m_prime == 15 { 1 } else { 0 };
    let year = 1900 + y_prime + k;
    let month = m_prime - 1 - k * 12;

    NaiveDate::from_ymd_opt(year as i32, month as u32, day as u32)
}

/// Decode a DVB UTC timestamp. All-`0xFF` means "undefined".
pub fn dvb_date_to_time(date: &DvbDate) -> Option<DateTime<Utc>> {
    if date.iter().all(|&b| b == 0xFF) {
        return None;
    }

    let mjd = u16::from_be_bytes([date[0], date[1]]);
    let day = mjd_to_date(mjd)?;
    let hour = bcd_byte(date[2])?;
    let minute = bcd_byte(date[3])?;
    let second = bcd_byte(date[4])?;
    let naive = day.and_hms_opt(hour, minute, second)?;

    Some(Utc.from_utc_datetime(&naive))
}

/// Decode a 3-byte BCD duration.
pub fn dvb_duration_to_seconds(duration: &DvbDuration) -> Duration {
    let hours = bcd_digits_to_int(duration[0] as u32) as i64;
    let minutes = bcd_digits_to_int(duration[1] as u32) as i64;
    let seconds = bcd_digits_to_int(duration[2] as u32) as i64;
    Duration::seconds(hours * 3600 + minutes * 60 + seconds)
}

/// Decode a 2-byte BCD HH:MM field (local time offsets).
pub fn dvb_hhmm_to_seconds(hhmm: &[u8; 2]) -> Duration {
    let hours = bcd_digits_to_int(hhmm[0] as u32) as i64;
    let minutes = bcd_digits_to_int(hhmm[1] as u32) as i64;
    Duration::seconds(hours * 3600 + minutes * 60)
}

/// Convert up to eight packed BCD digits to their decimal value.
pub fn bcd_digits_to_int(bcd: u32) -> u32 {
    let mut result = 0u32;
    for shift in (0..8).rev() {
        let digit = (bcd >> (shift * 4)) & 0x0F;
        result = result * 10 + digit;
    }
    result
}

/// Decode a big-endian 4-byte BCD field (cable/satellite frequencies).
pub fn bcd32_to_int(bytes: &[u8; 4]) -> u32 {
    bcd_digits_to_int(u32::from_be_bytes(*bytes))
}
