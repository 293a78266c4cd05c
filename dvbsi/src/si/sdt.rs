//! SDT (Service Description Table) decoding.

use super::cursor::SectionCursor;
use super::descriptors::{decode_loop, DescriptorState, TableContext};
use crate::error::Result;

/// Service record size (without descriptors).
pub const SDT_LOOP_LEN: usize = 5;

/// Human-readable running status (SDT and EIT).
pub fn running_status_name(status: u8) -> &'static str {
    match status {
        0 => "undefined",
        1 => "not running",
        2 => "starts soon",
        3 => "pausing",
        4 => "running",
        5 => "off-air",
        _ => "reserved",
    }
}

/// Service entry in the SDT.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SdtService {
    pub service_id: u16,
    pub eit_schedule_flag: bool,
    pub eit_present_following_flag: bool,
    pub running_status: u8,
    pub free_ca_mode: bool,
    pub provider_name: Option<String>,
    /// Name from the service descriptor.
    pub service_name: Option<String>,
}

/// Decoded SDT body.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SdtSection {
    pub original_network_id: u16,
    pub services: Vec<SdtService>,
}

/// Decode an SDT body.
pub fn parse_sdt(body: &[u8]) -> Result<SdtSection> {
    let mut cursor = SectionCursor::new(body);
    let original_network_id = cursor.read_u16()?;
    cursor.skip(1)?;

    let mut services = Vec::new();
    while cursor.remaining() >= SDT_LOOP_LEN {
        let service_id = cursor.read_u16()?;
        let flags = cursor.read_u8()?;
        let status_and_length = cursor.read_u16()?;
        let descriptors_length = (status_and_length & 0x0FFF) as usize;
        let descriptors = match cursor.read_bytes(descriptors_length) {
            Ok(descriptors) => descriptors,
            Err(e) => {
                log::debug!("SDT service 0x{:04X}: {}", service_id, e);
                break;
            }
        };

        let running_status = (status_and_length >> 13) as u8;
        log::trace!(
            "SDT: service 0x{:04X} {}",
            service_id,
            running_status_name(running_status)
        );

        let mut state = DescriptorState::new();
        decode_loop(TableContext::Sdt, descriptors, &mut state);

        services.push(SdtService {
            service_id,
            eit_schedule_flag: flags & 0x02 != 0,
            eit_present_following_flag: flags & 0x01 != 0,
            running_status,
            free_ca_mode: status_and_length & 0x1000 != 0,
            provider_name: state.provider_name,
            service_name: state.service_name,
        });
    }

    Ok(SdtSection {
        original_network_id,
        services,
    })
}

/// Test helper: an SDT body with (service_id, running_status, name) entries.
#[cfg(test)]
pub(crate) fn build_sdt_body(original_network_id: u16, services: &[(u16, u8, &str)]) -> Vec<u8> {
    use super::descriptor_tag;

    let mut body = original_network_id.to_be_bytes().to_vec();
    body.push(0xFF);
    for (service_id, running_status, name) in services {
        let mut descriptor = vec![descriptor_tag::SERVICE, (3 + name.len()) as u8, 0x01, 0x00];
        descriptor.push(name.len() as u8);
        descriptor.extend_from_slice(name.as_bytes());

        body.extend_from_slice(&service_id.to_be_bytes());
        body.push(0xFD);
        let status_and_length = ((*running_status as u16) << 13) | descriptor.len() as u16;
        body.extend_from_slice(&status_and_length.to_be_bytes());
        body.extend(descriptor);
    }
    body
}
