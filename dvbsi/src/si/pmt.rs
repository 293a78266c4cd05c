//! PMT (Program Map Table) decoding.
//!
//! Elementary stream descriptors are walked with [`TableContext::Pmt`]; no
//! handler is registered for that context, so they only advance the loop.

use super::cursor::SectionCursor;
use super::descriptors::{decode_loop, DescriptorState, TableContext};
use crate::error::Result;
use crate::records::TsInfoRecord;

/// Elementary stream record size (without descriptors).
pub const PMT_LOOP_LEN: usize = 5;

/// Stream type constants.
pub mod stream_type {
    /// MPEG-1 Video.
    pub const MPEG1_VIDEO: u8 = 0x01;
    /// MPEG-2 Video.
    pub const MPEG2_VIDEO: u8 = 0x02;
    /// MPEG-1 Audio.
    pub const MPEG1_AUDIO: u8 = 0x03;
    /// MPEG-2 Audio.
    pub const MPEG2_AUDIO: u8 = 0x04;
    /// AAC Audio (ADTS).
    pub const AAC_AUDIO: u8 = 0x0F;
    /// AAC Audio (LATM).
    pub const AAC_LATM: u8 = 0x11;
    /// H.264/AVC Video.
    pub const H264_VIDEO: u8 = 0x1B;
    /// H.265/HEVC Video.
    pub const H265_VIDEO: u8 = 0x24;
}

/// A single elementary stream entry in the PMT.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PmtStream {
    pub stream_type: u8,
    pub elementary_pid: u16,
}

impl PmtStream {
    pub fn is_video(&self) -> bool {
        matches!(
            self.stream_type,
            stream_type::MPEG1_VIDEO
                | stream_type::MPEG2_VIDEO
                | stream_type::H264_VIDEO
                | stream_type::H265_VIDEO
        )
    }

    pub fn is_audio(&self) -> bool {
        matches!(
            self.stream_type,
            stream_type::MPEG1_AUDIO
                | stream_type::MPEG2_AUDIO
                | stream_type::AAC_AUDIO
                | stream_type::AAC_LATM
        )
    }
}

/// Decoded PMT body.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PmtSection {
    pub pcr_pid: u16,
    pub streams: Vec<PmtStream>,
}

impl PmtSection {
    /// Summarize the first video and audio stream for the EPG store.
    pub fn to_ts_info(&self, frequency: u32, program_number: u16, pmt_pid: u16) -> TsInfoRecord {
        let mut info = TsInfoRecord {
            frequency,
            program_number,
            pmt_pid,
            pcr_pid: self.pcr_pid,
            ..Default::default()
        };
        if let Some(video) = self.streams.iter().find(|s| s.is_video()) {
            info.video_pid = video.elementary_pid;
            info.video_codec = video.stream_type;
        }
        if let Some(audio) = self.streams.iter().find(|s| s.is_audio()) {
            info.audio_pid = audio.elementary_pid;
            info.audio_codec = audio.stream_type;
        }
        info
    }
}

/// Decode a PMT body.
pub fn parse_pmt(body: &[u8]) -> Result<PmtSection> {
    let mut cursor = SectionCursor::new(body);
    let pcr_pid = cursor.read_pid()?;
    let program_info_length = cursor.read_length_12()?;
    cursor.skip(program_info_length)?;

    let mut streams = Vec::new();
    while cursor.remaining() >= PMT_LOOP_LEN {
        let stream_type = cursor.read_u8()?;
        let elementary_pid = cursor.read_pid()?;
        let es_info_length = cursor.read_length_12()?;
        let descriptors = match cursor.read_bytes(es_info_length) {
            Ok(descriptors) => descriptors,
            Err(e) => {
                log::debug!("PMT stream 0x{:04X}: {}", elementary_pid, e);
                break;
            }
        };
        let mut state = DescriptorState::new();
        decode_loop(TableContext::Pmt, descriptors, &mut state);

        streams.push(PmtStream {
            stream_type,
            elementary_pid,
        });
    }

    Ok(PmtSection { pcr_pid, streams })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_body() -> Vec<u8> {
        vec![
            0xE1, 0x00, // PCR PID 0x100
            0xF0, 0x00, // no program info
            0x02, 0xE1, 0x00, 0xF0, 0x03, 0x52, 0x01, 0x01, // MPEG-2 video, stream id descriptor
            0x06, 0xE1, 0x02, 0xF0, 0x00, // PES private data
            0x04, 0xE1, 0x01, 0xF0, 0x00, // MPEG-2 audio
        ]
    }

    #[test]
    fn test_parse_pmt() {
        let pmt = parse_pmt(&sample_body()).unwrap();
        assert_eq!(pmt.pcr_pid, 0x100);
        assert_eq!(pmt.streams.len(), 3);
        assert!(pmt.streams[0].is_video());
        assert!(!pmt.streams[1].is_audio());
        assert!(pmt.streams[2].is_audio());
    }

    #[test]
    fn test_ts_info() {
        let pmt = parse_pmt(&sample_body()).unwrap();
        let info = pmt.to_ts_info(450_000_000, 1, 0x20);
        assert_eq!(info.frequency, 450_000_000);
        assert_eq!(info.program_number, 1);
        assert_eq!(info.pmt_pid, 0x20);
        assert_eq!(info.pcr_pid, 0x100);
        assert_eq!((info.video_pid, info.video_codec), (0x100, 0x02));
        assert_eq!((info.audio_pid, info.audio_codec), (0x101, 0x04));
    }

    #[test]
    fn test_program_info_skipped() {
        let body = [0xE1, 0x00, 0xF0, 0x02, 0x09, 0x00, 0x1B, 0xE0, 0x40, 0xF0, 0x00];
        let pmt = parse_pmt(&body).unwrap();
        assert_eq!(
            pmt.streams,
            vec![PmtStream {
                stream_type: 0x1B,
                elementary_pid: 0x40
            }]
        );
    }

    #[test]
    fn test_truncated_header() {
        assert!(parse_pmt(&[0xE1]).is_err());
    }
}
