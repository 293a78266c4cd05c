//! EIT (Event Information Table) decoding.

use chrono::{DateTime, Duration, Utc};

use super::cursor::SectionCursor;
use super::descriptors::{decode_loop, DescriptorState, TableContext};
use super::sdt::running_status_name;
use super::time::{dvb_date_to_time, dvb_duration_to_seconds};
use crate::error::Result;
use crate::records::ServiceKey;

/// Event record size (without descriptors).
pub const EIT_LOOP_LEN: usize = 12;

/// One event of an EIT section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EitEvent {
    pub event_id: u16,
    /// UTC start time; `None` when undefined.
    pub start_time: Option<DateTime<Utc>>,
    pub duration: Duration,
    pub running_status: u8,
    pub free_ca_mode: bool,
    pub title: String,
    pub genre: String,
    pub audio_languages: Vec<String>,
    pub subtitle_languages: Vec<String>,
}

/// Decoded EIT body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EitSection {
    pub service_id: u16,
    pub transport_stream_id: u16,
    pub original_network_id: u16,
    pub segment_last_section_number: u8,
    pub last_table_id: u8,
    pub events: Vec<EitEvent>,
}

impl EitSection {
    pub fn service_key(&self) -> ServiceKey {
        ServiceKey::new(
            self.original_network_id,
            self.transport_stream_id,
            self.service_id,
        )
    }
}

/// Decode an EIT body. `service_id` is the table id extension.
pub fn parse_eit(body: &[u8], service_id: u16) -> Result<EitSection> {
    let mut cursor = SectionCursor::new(body);
    let transport_stream_id = cursor.read_u16()?;
    let original_network_id = cursor.read_u16()?;
    let segment_last_section_number = cursor.read_u8()?;
    let last_table_id = cursor.read_u8()?;

    let mut events = Vec::new();
    while cursor.remaining() >= EIT_LOOP_LEN {
        let event_id = cursor.read_u16()?;
        let start_time = dvb_date_to_time(&cursor.read_array::<5>()?);
        let duration = dvb_duration_to_seconds(&cursor.read_array::<3>()?);
        let status_and_length = cursor.read_u16()?;
        let descriptors_length = (status_and_length & 0x0FFF) as usize;
        let descriptors = match cursor.read_bytes(descriptors_length) {
            Ok(descriptors) => descriptors,
            Err(e) => {
                log::debug!("EIT event 0x{:04X}: {}", event_id, e);
                break;
            }
        };

        let running_status = (status_and_length >> 13) as u8;
        log::trace!(
            "EIT: service 0x{:04X} event 0x{:04X} start {:?} duration {}s {}",
            service_id,
            event_id,
            start_time,
            duration.num_seconds(),
            running_status_name(running_status)
        );

        // Fresh state per event: genre and languages never leak across events.
        let mut state = DescriptorState::new();
        decode_loop(TableContext::Eit, descriptors, &mut state);

        events.push(EitEvent {
            event_id,
            start_time,
            duration,
            running_status,
            free_ca_mode: status_and_length & 0x1000 != 0,
            title: state.event_name.unwrap_or_default(),
            genre: state.genre.unwrap_or_default(),
            audio_languages: state.audio_languages,
            subtitle_languages: state.subtitle_languages,
        });
    }

    Ok(EitSection {
        service_id,
        transport_stream_id,
        original_network_id,
        segment_last_section_number,
        last_table_id,
        events,
    })
}

/// Test helper: an EIT body with one event per entry.
#[cfg(test)]
pub(crate) fn build_eit_body(
    transport_stream_id: u16,
    original_network_id: u16,
    events: &[(u16, [u8; 5], [u8; 3], Vec<u8>)],
) -> Vec<u8> {
    let mut body = transport_stream_id.to_be_bytes().to_vec();
    body.extend_from_slice(&original_network_id.to_be_bytes());
    body.extend_from_slice(&[0x00, 0x4E]);
    for (event_id, start, duration, descriptors) in events {
        body.extend_from_slice(&event_id.to_be_bytes());
        body.extend_from_slice(start);
        body.extend_from_slice(duration);
        let status_and_length = (4u16 << 13) | descriptors.len() as u16;
        body.extend_from_slice(&status_and_length.to_be_bytes());
        body.extend_from_slice(descriptors);
    }
    body
}

/// Test helper: a short event descriptor with the given title.
#[cfg(test)]
pub(crate) fn short_event_descriptor(title: &str) -> Vec<u8> {
    let mut data = vec![super::descriptor_tag::SHORT_EVENT, (5 + title.len()) as u8];
    data.extend_from_slice(b"eng");
    data.push(title.len() as u8);
    data.extend_from_slice(title.as_bytes());
    data.push(0);
    data
}
