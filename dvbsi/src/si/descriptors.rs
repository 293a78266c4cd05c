//! Descriptor loop decoding.
//!
//! Handlers are looked up by `(TableContext, tag)` in a static table. Each
//! handler decodes one descriptor payload into a [`DescriptorState`] owned by
//! the table decoder that runs the loop.

use chrono::Duration;

use super::cursor::{bits, SectionCursor};
use super::descriptor_tag;
use super::text::decode_text;
use super::time::{bcd32_to_int, dvb_date_to_time, dvb_hhmm_to_seconds};
use crate::error::{Result, SiError};
use crate::records::LocalTimeOffset;

/// Which table a descriptor loop belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TableContext {
    Pmt,
    Nit,
    Sdt,
    Eit,
    Tot,
    Bat,
}

/// Content descriptor genres, indexed by `content_nibble_level_1`.
pub const GENRES: [&str; 16] = [
    "Undefined Content",
    "Movie/Drama",
    "News/Current Affairs",
    "Show/Game Show",
    "Sports",
    "Children's/Youth Programmes",
    "Music/Ballet/Dance",
    "Arts/Culture (without music)",
    "Social/Political Issues/Economics",
    "Education/Science/Factual Topics",
    "Leisure Hobbies",
    "Special Characteristics",
    "reserved for future use",
    "reserved for future use",
    "reserved for future use",
    "User Defined",
];

/// Genre used when the nibble is outside the table.
pub const GENRE_NOT_AVAILABLE: &str = "Not available";

/// Look up the genre for a level-1 content nibble.
pub fn genre_name(nibble: u8) -> &'static str {
    GENRES
        .get(nibble as usize)
        .copied()
        .unwrap_or(GENRE_NOT_AVAILABLE)
}

/// Component descriptor `stream_content` values.
pub mod stream_content {
    pub const VIDEO: u8 = 0x01;
    pub const AUDIO: u8 = 0x02;
    pub const SUBTITLE: u8 = 0x03;
}

/// Delivery system parameters of one transport stream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Delivery {
    /// Frequency in Hz.
    pub frequency_hz: u32,
    pub modulation: u8,
}

/// Values collected while walking one descriptor loop.
#[derive(Debug, Default)]
pub struct DescriptorState {
    /// Set once a cable delivery descriptor was decoded; terrestrial
    /// descriptors are ignored afterwards. Carried across loops by the owner.
    pub cable_seen: bool,
    pub delivery: Option<Delivery>,
    pub provider_name: Option<String>,
    pub service_name: Option<String>,
    pub event_name: Option<String>,
    pub genre: Option<String>,
    pub audio_languages: Vec<String>,
    pub subtitle_languages: Vec<String>,
    pub local_time_offsets: Vec<LocalTimeOffset>,
    /// (service_id, logical channel number) pairs.
    pub logical_channels: Vec<(u16, u16)>,
    pub bouquet_name: Option<String>,
}

impl DescriptorState {
    pub fn new() -> Self {
        Self::default()
    }

    /// A fresh state that remembers whether cable delivery was seen before.
    pub fn with_cable_seen(cable_seen: bool) -> Self {
        Self {
            cable_seen,
            ..Self::default()
        }
    }
}

type Handler = fn(&[u8], &mut DescriptorState) -> Result<()>;

static HANDLERS: &[(TableContext, u8, Handler)] = &[
    (
        TableContext::Nit,
        descriptor_tag::TERRESTRIAL_DELIVERY_SYSTEM,
        terrestrial_delivery,
    ),
    (
        TableContext::Nit,
        descriptor_tag::CABLE_DELIVERY_SYSTEM,
        cable_delivery,
    ),
    (
        TableContext::Nit,
        descriptor_tag::LOGICAL_CHANNEL,
        logical_channel,
    ),
    (TableContext::Sdt, descriptor_tag::SERVICE, service),
    (TableContext::Eit, descriptor_tag::SHORT_EVENT, short_event),
    (TableContext::Eit, descriptor_tag::COMPONENT, component),
    (TableContext::Eit, descriptor_tag::CONTENT, content),
    (
        TableContext::Tot,
        descriptor_tag::LOCAL_TIME_OFFSET,
        local_time_offset,
    ),
    (TableContext::Bat, descriptor_tag::BOUQUET_NAME, bouquet_name),
];

fn find_handler(context: TableContext, tag: u8) -> Option<Handler> {
    HANDLERS
        .iter()
        .find(|(ctx, t, _)| *ctx == context && *t == tag)
        .map(|(_, _, handler)| *handler)
}

/// Walk a descriptor loop and feed each known descriptor to its handler.
///
/// Unknown tags are skipped by their length. A zero declared length ends the
/// loop. A descriptor running past the loop aborts it; descriptors decoded
/// before stay in `state`.
pub fn decode_loop(context: TableContext, data: &[u8], state: &mut DescriptorState) {
    let mut cursor = SectionCursor::new(data);
    while cursor.remaining() >= 2 {
        let (tag, len) = match (cursor.read_u8(), cursor.read_u8()) {
            (Ok(tag), Ok(len)) => (tag, len as usize),
            _ => break,
        };
        if len == 0 {
            log::trace!("Zero-length descriptor 0x{:02X} ends the loop", tag);
            break;
        }
        let payload = match cursor.read_bytes(len) {
            Ok(payload) => payload,
            Err(e) => {
                log::debug!("Descriptor 0x{:02X} truncated: {}", tag, e);
                break;
            }
        };
        if let Some(handler) = find_handler(context, tag) {
            if let Err(e) = handler(payload, state) {
                log::debug!("Descriptor 0x{:02X} in {:?} skipped: {}", tag, context, e);
            }
        }
    }
}

/// Split a payload into fixed-size records, rejecting a trailing partial one.
fn records(payload: &[u8], size: usize) -> Result<std::slice::ChunksExact<'_, u8>> {
    if payload.len() % size != 0 {
        log::debug!(
            "Descriptor payload of {} bytes is not a multiple of {}",
            payload.len(),
            size
        );
    }
    if payload.len() < size {
        return Err(SiError::Truncated {
            needed: size,
            remaining: payload.len(),
        });
    }
    Ok(payload.chunks_exact(size))
}

fn terrestrial_delivery(payload: &[u8], state: &mut DescriptorState) -> Result<()> {
    if state.cable_seen {
        return Ok(());
    }
    let mut cursor = SectionCursor::new(payload);
    // centre_frequency is in units of 10 Hz.
    let frequency = cursor.read_u32()?.wrapping_mul(10);
    cursor.skip(1)?;
    let modulation = bits(cursor.read_u8()?, 7, 6);
    log::debug!(
        "Terrestrial delivery: frequency = {} Hz, constellation = {}",
        frequency,
        modulation
    );
    state.delivery = Some(Delivery {
        frequency_hz: frequency,
        modulation,
    });
    Ok(())
}

fn cable_delivery(payload: &[u8], state: &mut DescriptorState) -> Result<()> {
    let mut cursor = SectionCursor::new(payload);
    // Eight BCD digits in units of 100 Hz.
    let frequency = bcd32_to_int(&cursor.read_array::<4>()?).wrapping_mul(100);
    cursor.skip(2)?;
    let modulation = cursor.read_u8()?;
    state.cable_seen = true;
    log::debug!(
        "Cable delivery: frequency = {} Hz, modulation = {}",
        frequency,
        modulation
    );
    state.delivery = Some(Delivery {
        frequency_hz: frequency,
        modulation,
    });
    Ok(())
}

fn logical_channel(payload: &[u8], state: &mut DescriptorState) -> Result<()> {
    for record in records(payload, 4)? {
        let service_id = u16::from_be_bytes([record[0], record[1]]);
        let lcn = (((record[2] & 0x03) as u16) << 8) | record[3] as u16;
        log::trace!("LCN: service 0x{:04X} -> {}", service_id, lcn);
        state.logical_channels.push((service_id, lcn));
    }
    Ok(())
}

fn service(payload: &[u8], state: &mut DescriptorState) -> Result<()> {
    let mut cursor = SectionCursor::new(payload);
    let _service_type = cursor.read_u8()?;
    let provider_len = cursor.read_u8()? as usize;
    let provider = cursor.read_bytes(provider_len)?;
    let name_len = cursor.read_u8()? as usize;
    let name = decode_text(cursor.read_bytes(name_len)?);
    log::debug!("Service name = {}", name);
    state.provider_name = Some(decode_text(provider));
    state.service_name = Some(name);
    Ok(())
}

fn short_event(payload: &[u8], state: &mut DescriptorState) -> Result<()> {
    let mut cursor = SectionCursor::new(payload);
    cursor.skip(3)?;
    let name_len = cursor.read_u8()? as usize;
    let name = decode_text(cursor.read_bytes(name_len)?);
    log::trace!("Event name = {}", name);
    state.event_name = Some(name);
    Ok(())
}

fn component(payload: &[u8], state: &mut DescriptorState) -> Result<()> {
    let mut cursor = SectionCursor::new(payload);
    let stream_content = cursor.read_u8()? & 0x0F;
    let _component_type = cursor.read_u8()?;
    let _component_tag = cursor.read_u8()?;
    let language = cursor.read_array::<3>()?;

    let languages = match stream_content {
        stream_content::AUDIO => &mut state.audio_languages,
        stream_content::SUBTITLE => &mut state.subtitle_languages,
        _ => return Ok(()),
    };
    let code = decode_text(&language);
    if !languages.iter().any(|existing| existing.as_bytes() == language) {
        languages.push(code);
    }
    Ok(())
}

fn content(payload: &[u8], state: &mut DescriptorState) -> Result<()> {
    // The last entry wins.
    for record in records(payload, 2)? {
        let nibble = record[0] >> 4;
        state.genre = Some(genre_name(nibble).to_string());
    }
    Ok(())
}

fn local_time_offset(payload: &[u8], state: &mut DescriptorState) -> Result<()> {
    for record in records(payload, 13)? {
        let mut cursor = SectionCursor::new(record);
        let country_code = cursor.read_array::<3>()?;
        let flags = cursor.read_u8()?;
        let offset: Duration = dvb_hhmm_to_seconds(&cursor.read_array::<2>()?);
        let time_of_change = dvb_date_to_time(&cursor.read_array::<5>()?);
        let next_offset = dvb_hhmm_to_seconds(&cursor.read_array::<2>()?);
        state.local_time_offsets.push(LocalTimeOffset {
            country_code,
            region_id: bits(flags, 7, 2),
            polarity: bits(flags, 0, 0),
            offset,
            time_of_change,
            next_offset,
        });
    }
    Ok(())
}

fn bouquet_name(payload: &[u8], state: &mut DescriptorState) -> Result<()> {
    state.bouquet_name = Some(decode_text(payload));
    Ok(())
}
