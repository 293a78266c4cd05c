//! TDT and TOT decoding.
//!
//! Both are short-form sections: their body starts right after
//! `section_length`.

use chrono::{DateTime, Utc};

use super::cursor::SectionCursor;
use super::descriptors::{decode_loop, DescriptorState, TableContext};
use super::time::dvb_date_to_time;
use crate::error::Result;
use crate::records::LocalTimeOffset;

/// Decode a TDT body into the broadcast UTC time.
pub fn parse_tdt(body: &[u8]) -> Result<Option<DateTime<Utc>>> {
    let mut cursor = SectionCursor::new(body);
    Ok(dvb_date_to_time(&cursor.read_array::<5>()?))
}

/// Decoded TOT body. The descriptor loop is decoded on demand.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TotSection<'a> {
    pub utc_time: Option<DateTime<Utc>>,
    descriptors: &'a [u8],
}

impl<'a> TotSection<'a> {
    /// Every local time offset entry carried by the section.
    pub fn local_time_offsets(&self) -> Vec<LocalTimeOffset> {
        let mut state = DescriptorState::new();
        decode_loop(TableContext::Tot, self.descriptors, &mut state);
        state.local_time_offsets
    }

    /// The entry for a country and region, if present.
    pub fn find_offset(&self, country_code: &[u8; 3], region_id: u8) -> Option<LocalTimeOffset> {
        self.local_time_offsets()
            .into_iter()
            .find(|offset| offset.matches(country_code, region_id))
    }
}

/// Decode a TOT body (CRC excluded).
pub fn parse_tot(body: &[u8]) -> Result<TotSection<'_>> {
    let mut cursor = SectionCursor::new(body);
    let utc_time = dvb_date_to_time(&cursor.read_array::<5>()?);
    let loop_length = cursor.read_length_12()?;
    let descriptors = match cursor.read_bytes(loop_length) {
        Ok(descriptors) => descriptors,
        Err(e) => {
            log::debug!("TOT descriptor loop: {}", e);
            cursor.peek_rest()
        }
    };
    Ok(TotSection {
        utc_time,
        descriptors,
    })
}
