//! NIT (Network Information Table) decoding.
//!
//! The transport stream loop layout is shared with the BAT.

use super::cursor::SectionCursor;
use super::descriptors::{decode_loop, Delivery, DescriptorState, TableContext};
use crate::error::Result;
use crate::records::{JoinKey, NetworkRecord};

/// Transport stream record size (without descriptors).
pub const NIT_LOOP_LEN: usize = 6;

/// One transport stream of a NIT or BAT.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportEntry {
    pub transport_stream_id: u16,
    pub original_network_id: u16,
    /// Delivery parameters from the transport descriptors, if any.
    pub delivery: Option<Delivery>,
    /// (service_id, LCN) pairs of the logical channel descriptor.
    pub logical_channels: Vec<(u16, u16)>,
}

impl TransportEntry {
    pub fn join_key(&self) -> JoinKey {
        JoinKey::new(self.original_network_id, self.transport_stream_id)
    }
}

/// Decoded NIT body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NitSection {
    pub network_id: u16,
    /// Delivery parameters found in the network-level loop, if any.
    pub network_delivery: Option<Delivery>,
    pub transports: Vec<TransportEntry>,
}

impl NitSection {
    /// Records to persist, one per transport stream.
    pub fn network_records(&self) -> Vec<NetworkRecord> {
        self.transports
            .iter()
            .map(|ts| {
                let delivery = ts.delivery.or(self.network_delivery).unwrap_or_default();
                NetworkRecord {
                    network_id: self.network_id,
                    transport_stream_id: ts.transport_stream_id,
                    original_network_id: ts.original_network_id,
                    frequency_hz: delivery.frequency_hz,
                    modulation: delivery.modulation,
                }
            })
            .collect()
    }
}

/// Decode a NIT body.
///
/// `cable_seen` persists for the lifetime of the parser: once a cable
/// delivery descriptor was decoded, terrestrial ones are ignored.
pub fn parse_nit(body: &[u8], network_id: u16, cable_seen: &mut bool) -> Result<NitSection> {
    let mut cursor = SectionCursor::new(body);
    let network_descriptors = cursor.read_length_12().and_then(|len| cursor.read_bytes(len))?;

    let mut state = DescriptorState::with_cable_seen(*cable_seen);
    decode_loop(TableContext::Nit, network_descriptors, &mut state);
    *cable_seen = state.cable_seen;
    let network_delivery = state.delivery;

    let transports = parse_transport_loop(&mut cursor, TableContext::Nit, cable_seen)?;

    Ok(NitSection {
        network_id,
        network_delivery,
        transports,
    })
}

/// Decode the `transport_stream_loop` shared by NIT and BAT.
pub(crate) fn parse_transport_loop(
    cursor: &mut SectionCursor<'_>,
    context: TableContext,
    cable_seen: &mut bool,
) -> Result<Vec<TransportEntry>> {
    let loop_length = cursor.read_length_12()?;
    let mut ts_loop = match cursor.sub_cursor(loop_length) {
        Ok(ts_loop) => ts_loop,
        Err(e) => {
            // Decode what was delivered.
            log::debug!("{:?} transport loop: {}", context, e);
            let rest = cursor.remaining();
            cursor.sub_cursor(rest)?
        }
    };

    let mut transports = Vec::new();
    while ts_loop.remaining() >= NIT_LOOP_LEN {
        let transport_stream_id = ts_loop.read_u16()?;
        let original_network_id = ts_loop.read_u16()?;
        let descriptors_length = ts_loop.read_length_12()?;
        let descriptors = match ts_loop.read_bytes(descriptors_length) {
            Ok(descriptors) => descriptors,
            Err(e) => {
                log::debug!(
                    "{:?} transport 0x{:04X}: descriptor loop {}",
                    context,
                    transport_stream_id,
                    e
                );
                break;
            }
        };

        let mut state = DescriptorState::with_cable_seen(*cable_seen);
        decode_loop(context, descriptors, &mut state);
        *cable_seen = state.cable_seen;

        log::trace!(
            "{:?}: onid = 0x{:04X}, tsid = 0x{:04X}",
            context,
            original_network_id,
            transport_stream_id
        );
        transports.push(TransportEntry {
            transport_stream_id,
            original_network_id,
            delivery: state.delivery,
            logical_channels: state.logical_channels,
        });
    }

    Ok(transports)
}

/// Test helper: a NIT/BAT body with the given transport records.
#[cfg(test)]
pub(crate) fn build_transport_body(first_loop: &[u8], transports: &[(u16, u16, Vec<u8>)]) -> Vec<u8> {
    let mut body = vec![
        0xF0 | ((first_loop.len() >> 8) as u8 & 0x0F),
        first_loop.len() as u8,
    ];
    body.extend_from_slice(first_loop);

    let mut ts_loop = Vec::new();
    for (tsid, onid, descriptors) in transports {
        ts_loop.extend_from_slice(&tsid.to_be_bytes());
        ts_loop.extend_from_slice(&onid.to_be_bytes());
        ts_loop.push(0xF0 | ((descriptors.len() >> 8) as u8 & 0x0F));
        ts_loop.push(descriptors.len() as u8);
        ts_loop.extend_from_slice(descriptors);
    }
    body.push(0xF0 | ((ts_loop.len() >> 8) as u8 & 0x0F));
    body.push(ts_loop.len() as u8);
    body.extend(ts_loop);
    body
}
