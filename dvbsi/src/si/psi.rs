//! PSI/SI section header parsing, CRC validation and section reassembly.

use crate::error::{Result, SiError};

/// Length of the long-form common header (table_id .. last_section_number).
pub const LONG_HEADER_LEN: usize = 8;

/// Length of the short-form header (table_id + section_length).
pub const SHORT_HEADER_LEN: usize = 3;

/// Length of the CRC-32 trailer.
pub const CRC_LEN: usize = 4;

/// Common section header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PsiHeader {
    /// Table ID.
    pub table_id: u8,
    /// Section syntax indicator.
    pub section_syntax_indicator: bool,
    /// Section length (12 bits), counting every byte after the field.
    pub section_length: u16,
    /// Table ID extension (program number, network id, service id, ...).
    pub table_id_extension: u16,
    /// Version number (5 bits).
    pub version_number: u8,
    /// Current/next indicator.
    pub current_next_indicator: bool,
    /// Section number.
    pub section_number: u8,
    /// Last section number.
    pub last_section_number: u8,
}

impl PsiHeader {
    /// Parse the 8-byte common header and check the declared length against
    /// the buffer size.
    ///
    /// The long-form fields are read unconditionally; for short-form tables
    /// (TDT/TOT) they are payload bytes and must be ignored by the caller.
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < LONG_HEADER_LEN {
            return Err(SiError::SectionTooShort(data.len()));
        }

        let section_length = ((data[1] as u16 & 0x0F) << 8) | data[2] as u16;
        let actual = data.len() - SHORT_HEADER_LEN;
        if section_length as usize != actual {
            return Err(SiError::LengthMismatch {
                declared: section_length as usize,
                actual,
            });
        }

        Ok(PsiHeader {
            table_id: data[0],
            section_syntax_indicator: data[1] & 0x80 != 0,
            section_length,
            table_id_extension: ((data[3] as u16) << 8) | data[4] as u16,
            version_number: (data[5] >> 1) & 0x1F,
            current_next_indicator: data[5] & 0x01 != 0,
            section_number: data[6],
            last_section_number: data[7],
        })
    }

    /// Total section size including the 3-byte prefix.
    pub fn total_length(&self) -> usize {
        SHORT_HEADER_LEN + self.section_length as usize
    }
}

/// Body of a long-form section: bytes after the 8-byte header, CRC excluded.
pub fn long_body(data: &[u8]) -> Result<&[u8]> {
    body_between(data, LONG_HEADER_LEN)
}

/// Body of a short-form section with CRC (TOT): bytes after section_length,
/// CRC excluded.
pub fn short_body(data: &[u8]) -> Result<&[u8]> {
    body_between(data, SHORT_HEADER_LEN)
}

/// Body of a short-form section without CRC (TDT).
pub fn short_payload(data: &[u8]) -> Result<&[u8]> {
    if data.len() < SHORT_HEADER_LEN {
        return Err(SiError::Truncated {
            needed: SHORT_HEADER_LEN,
            remaining: data.len(),
        });
    }
    Ok(&data[SHORT_HEADER_LEN..])
}

fn body_between(data: &[u8], start: usize) -> Result<&[u8]> {
    if data.len() < start + CRC_LEN {
        return Err(SiError::Truncated {
            needed: start + CRC_LEN,
            remaining: data.len(),
        });
    }
    Ok(&data[start..data.len() - CRC_LEN])
}

/// Check the CRC-32 trailer of a complete section.
pub fn verify_crc(data: &[u8]) -> Result<()> {
    if data.len() < CRC_LEN {
        return Err(SiError::SectionTooShort(data.len()));
    }
    let (covered, trailer) = data.split_at(data.len() - CRC_LEN);
    let expected = u32::from_be_bytes([trailer[0], trailer[1], trailer[2], trailer[3]]);
    let computed = crc32_mpeg2(covered);
    if expected != computed {
        return Err(SiError::CrcMismatch { expected, computed });
    }
    Ok(())
}

/// Calculate CRC32 for MPEG-2 (polynomial 0x04C11DB7).
pub fn crc32_mpeg2(data: &[u8]) -> u32 {
    static CRC_TABLE: [u32; 256] = {
        let mut table = [0u32; 256];
        let mut i = 0;
        while i < 256 {
            let mut crc = (i as u32) << 24;
            let mut j = 0;
            while j < 8 {
                if crc & 0x80000000 != 0 {
                    crc = (crc << 1) ^ 0x04C11DB7;
                } else {
                    crc <<= 1;
                }
                j += 1;
            }
            table[i] = crc;
            i += 1;
        }
        table
    };

    let mut crc = 0xFFFFFFFFu32;
    for &byte in data {
        let index = ((crc >> 24) ^ byte as u32) as usize;
        crc = (crc << 8) ^ CRC_TABLE[index];
    }
    crc
}

/// Reassembles sections that span several TS packets on one PID.
///
/// Several short sections may share a packet; [`push`](Self::push) returns
/// every section completed by the given payload.
#[derive(Debug, Default)]
pub struct SectionCollector {
    buffer: Vec<u8>,
    expected_length: Option<usize>,
    last_cc: Option<u8>,
}

impl SectionCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop any partially collected section.
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.expected_length = None;
        self.last_cc = None;
    }

    /// Feed the payload of one TS packet.
    pub fn push(&mut self, payload: &[u8], cc: u8, payload_unit_start: bool) -> Vec<Vec<u8>> {
        let mut completed = Vec::new();

        if let Some(last) = self.last_cc {
            if cc == last {
                // Duplicate packet.
                return completed;
            }
            if cc != (last + 1) & 0x0F && !payload_unit_start {
                self.clear();
                return completed;
            }
        }
        self.last_cc = Some(cc);

        if payload.is_empty() {
            return completed;
        }

        let mut rest = payload;
        if payload_unit_start {
            let pointer = payload[0] as usize;
            if pointer + 1 > payload.len() {
                self.reset_buffer();
                return completed;
            }
            // Bytes before the pointer target finish the previous section.
            if !self.buffer.is_empty() {
                self.buffer.extend_from_slice(&payload[1..pointer + 1]);
                self.take_complete(&mut completed);
            }
            self.reset_buffer();
            rest = &payload[pointer + 1..];
            self.start_sections(rest, &mut completed);
        } else if !self.buffer.is_empty() {
            self.buffer.extend_from_slice(rest);
            self.take_complete(&mut completed);
        }

        completed
    }

    fn reset_buffer(&mut self) {
        self.buffer.clear();
        self.expected_length = None;
    }

    fn start_sections(&mut self, mut data: &[u8], completed: &mut Vec<Vec<u8>>) {
        // 0xFF is stuffing up to the end of the packet.
        while !data.is_empty() && data[0] != 0xFF {
            if data.len() < SHORT_HEADER_LEN {
                self.buffer.extend_from_slice(data);
                return;
            }
            let total = SHORT_HEADER_LEN + (((data[1] as usize & 0x0F) << 8) | data[2] as usize);
            if data.len() < total {
                self.buffer.extend_from_slice(data);
                self.expected_length = Some(total);
                return;
            }
            completed.push(data[..total].to_vec());
            data = &data[total..];
        }
    }

    fn take_complete(&mut self, completed: &mut Vec<Vec<u8>>) {
        if self.expected_length.is_none() && self.buffer.len() >= SHORT_HEADER_LEN {
            let len = ((self.buffer[1] as usize & 0x0F) << 8) | self.buffer[2] as usize;
            self.expected_length = Some(SHORT_HEADER_LEN + len);
        }
        if let Some(expected) = self.expected_length {
            if self.buffer.len() >= expected {
                completed.push(self.buffer[..expected].to_vec());
                self.reset_buffer();
            }
        }
    }

    /// Check if collector has buffered data.
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }
}

/// Test helper: build a complete long-form section with a valid length and CRC.
#[cfg(test)]
pub(crate) fn build_section(
    table_id: u8,
    table_id_extension: u16,
    version: u8,
    section_number: u8,
    last_section_number: u8,
    body: &[u8],
) -> Vec<u8> {
    let section_length = (5 + body.len() + CRC_LEN) as u16;
    let mut data = vec![
        table_id,
        0xB0 | ((section_length >> 8) as u8 & 0x0F),
        (section_length & 0xFF) as u8,
        (table_id_extension >> 8) as u8,
        (table_id_extension & 0xFF) as u8,
        0xC1 | ((version & 0x1F) << 1),
        section_number,
        last_section_number,
    ];
    data.extend_from_slice(body);
    let crc = crc32_mpeg2(&data);
    data.extend_from_slice(&crc.to_be_bytes());
    data
}

/// Test helper: build a short-form section (TDT without CRC, TOT with CRC).
#[cfg(test)]
pub(crate) fn build_short_section(table_id: u8, body: &[u8], with_crc: bool) -> Vec<u8> {
    let crc_len = if with_crc { CRC_LEN } else { 0 };
    let section_length = (body.len() + crc_len) as u16;
    let mut data = vec![
        table_id,
        0x70 | ((section_length >> 8) as u8 & 0x0F),
        (section_length & 0xFF) as u8,
    ];
    data.extend_from_slice(body);
    if with_crc {
        let crc = crc32_mpeg2(&data);
        data.extend_from_slice(&crc.to_be_bytes());
    }
    data
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crc32_empty() {
        assert_eq!(crc32_mpeg2(&[]), 0xFFFFFFFF);
    }

    #[test]
    fn test_crc32_known_vector() {
        // CRC-32/MPEG-2 check value.
        assert_eq!(crc32_mpeg2(b"123456789"), 0x0376E6E7);
    }

    #[test]
    fn test_crc_of_whole_section_is_zero() {
        let section = build_section(0x00, 1, 0, 0, 0, &[0x00, 0x01, 0xE0, 0x20]);
        assert_eq!(crc32_mpeg2(&section), 0);
        assert!(verify_crc(&section).is_ok());
    }

    #[test]
    fn test_crc_mismatch() {
        let mut section = build_section(0x00, 1, 0, 0, 0, &[0x00, 0x01, 0xE0, 0x20]);
        section[9] ^= 0x01;
        assert!(matches!(
            verify_crc(&section),
            Err(SiError::CrcMismatch { .. })
        ));
    }

    #[test]
    fn test_short_accessors() {
        let tdt = [0x70, 0x70, 0x05, 0xCC, 0x04, 0x21, 0x00, 0x00];
        assert_eq!(short_payload(&tdt).unwrap(), &tdt[3..]);
        assert_eq!(short_body(&tdt).unwrap(), &tdt[3..4]);
        assert!(matches!(
            short_payload(&tdt[..2]),
            Err(SiError::Truncated { needed: 3, remaining: 2 })
        ));
    }

    #[test]
    fn test_header_parse() {
        let section = build_section(0x42, 0x0064, 7, 1, 2, &[0u8; 3]);
        let header = PsiHeader::parse(&section).unwrap();
        assert_eq!(header.table_id, 0x42);
        assert!(header.section_syntax_indicator);
        assert_eq!(header.table_id_extension, 0x0064);
        assert_eq!(header.version_number, 7);
        assert!(header.current_next_indicator);
        assert_eq!(header.section_number, 1);
        assert_eq!(header.last_section_number, 2);
        assert_eq!(header.total_length(), section.len());
        assert_eq!(long_body(&section).unwrap(), &[0u8; 3]);
    }

    #[test]
    fn test_header_length_mismatch() {
        let mut section = build_section(0x00, 1, 0, 0, 0, &[0x00, 0x01, 0xE0, 0x20]);
        section.push(0x00);
        match PsiHeader::parse(&section) {
            Err(SiError::LengthMismatch { declared, actual }) => {
                assert_eq!(declared + 1, actual);
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_header_too_short() {
        assert!(matches!(
            PsiHeader::parse(&[0x00, 0xB0, 0x04, 0x00]),
            Err(SiError::SectionTooShort(4))
        ));
    }

    #[test]
    fn test_collector_single_packet() {
        let section = build_section(0x00, 1, 0, 0, 0, &[0x00, 0x01, 0xE0, 0x20]);
        let mut payload = vec![0u8];
        payload.extend_from_slice(&section);
        payload.resize(184, 0xFF);

        let mut collector = SectionCollector::new();
        let sections = collector.push(&payload, 0, true);
        assert_eq!(sections, vec![section]);
        assert!(collector.is_empty());
    }

    #[test]
    fn test_collector_spanning_packets() {
        let body = vec![0x11u8; 300];
        let section = build_section(0x50, 1, 0, 0, 0, &body);

        let mut first = vec![0u8];
        first.extend_from_slice(&section[..183]);
        let mut second = section[183..].to_vec();
        second.resize(184, 0xFF);

        let mut collector = SectionCollector::new();
        assert!(collector.push(&first, 3, true).is_empty());
        assert!(!collector.is_empty());
        let sections = collector.push(&second, 4, false);
        assert_eq!(sections, vec![section]);
    }

    #[test]
    fn test_collector_discontinuity_drops_partial() {
        let body = vec![0x11u8; 300];
        let section = build_section(0x50, 1, 0, 0, 0, &body);

        let mut first = vec![0u8];
        first.extend_from_slice(&section[..183]);
        let second = section[183..].to_vec();

        let mut collector = SectionCollector::new();
        collector.push(&first, 3, true);
        assert!(collector.push(&second, 7, false).is_empty());
        assert!(collector.is_empty());
    }
}
