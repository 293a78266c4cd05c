//! BAT (Bouquet Association Table) decoding.
//!
//! Same layout as the NIT, scoped by bouquet id. When bouquet joining is
//! selected, its transport loop decides which transports SDT/NIT accept.

use super::cursor::SectionCursor;
use super::descriptors::{decode_loop, DescriptorState, TableContext};
use super::nit::{parse_transport_loop, TransportEntry};
use crate::error::Result;

/// Decoded BAT body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatSection {
    pub bouquet_id: u16,
    pub bouquet_name: Option<String>,
    pub transports: Vec<TransportEntry>,
}

/// Decode a BAT body.
pub fn parse_bat(body: &[u8], bouquet_id: u16) -> Result<BatSection> {
    let mut cursor = SectionCursor::new(body);
    let bouquet_descriptors = cursor.read_length_12().and_then(|len| cursor.read_bytes(len))?;

    let mut state = DescriptorState::new();
    decode_loop(TableContext::Bat, bouquet_descriptors, &mut state);
    if let Some(name) = &state.bouquet_name {
        log::debug!("Bouquet 0x{:04X}: {}", bouquet_id, name);
    }

    // Delivery descriptors are only honoured in the NIT.
    let mut cable_seen = false;
    let transports = parse_transport_loop(&mut cursor, TableContext::Bat, &mut cable_seen)?;

    Ok(BatSection {
        bouquet_id,
        bouquet_name: state.bouquet_name,
        transports,
    })
}
