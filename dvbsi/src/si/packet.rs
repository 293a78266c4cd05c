//! MPEG-TS packet parsing and PID-filtered section demultiplexing.

use std::collections::HashMap;

use super::psi::SectionCollector;

/// TS packet size in bytes.
pub const TS_PACKET_SIZE: usize = 188;

/// TS sync byte (0x47).
pub const SYNC_BYTE: u8 = 0x47;

/// Parsed TS packet header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TsHeader {
    /// Transport error indicator.
    pub transport_error: bool,
    /// Payload unit start indicator.
    pub payload_unit_start: bool,
    /// Packet Identifier (13 bits).
    pub pid: u16,
    /// Transport scrambling control (2 bits).
    pub scrambling_control: u8,
    /// Adaptation field control (2 bits).
    pub adaptation_field_control: u8,
    /// Continuity counter (4 bits).
    pub continuity_counter: u8,
}

impl TsHeader {
    pub fn has_adaptation_field(&self) -> bool {
        self.adaptation_field_control & 0x02 != 0
    }

    pub fn has_payload(&self) -> bool {
        self.adaptation_field_control & 0x01 != 0
    }

    pub fn is_scrambled(&self) -> bool {
        self.scrambling_control != 0
    }
}

/// A parsed TS packet.
#[derive(Debug, Clone)]
pub struct TsPacket<'a> {
    pub header: TsHeader,
    /// Payload after the adaptation field (empty when absent).
    pub payload: &'a [u8],
}

impl<'a> TsPacket<'a> {
    /// Parse a TS packet from at least 188 bytes.
    pub fn parse(data: &'a [u8]) -> Result<Self, &'static str> {
        if data.len() < TS_PACKET_SIZE {
            return Err("Packet too short");
        }
        if data[0] != SYNC_BYTE {
            return Err("Invalid sync byte");
        }

        let header = TsHeader {
            transport_error: data[1] & 0x80 != 0,
            payload_unit_start: data[1] & 0x40 != 0,
            pid: ((data[1] as u16 & 0x1F) << 8) | data[2] as u16,
            scrambling_control: (data[3] >> 6) & 0x03,
            adaptation_field_control: (data[3] >> 4) & 0x03,
            continuity_counter: data[3] & 0x0F,
        };

        let offset = if header.has_adaptation_field() {
            5 + data[4] as usize
        } else {
            4
        };

        let payload = if header.has_payload() && offset < TS_PACKET_SIZE {
            &data[offset..TS_PACKET_SIZE]
        } else {
            &[]
        };

        Ok(TsPacket { header, payload })
    }
}

/// Iterator over TS packets in a byte stream, resynchronizing on sync loss.
pub struct TsPacketIterator<'a> {
    data: &'a [u8],
    offset: usize,
}

impl<'a> TsPacketIterator<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        let offset = data
            .iter()
            .position(|&b| b == SYNC_BYTE)
            .unwrap_or(data.len());
        Self { data, offset }
    }

    /// Bytes not yet consumed (a trailing partial packet).
    pub fn remainder(&self) -> &'a [u8] {
        &self.data[self.offset.min(self.data.len())..]
    }

    fn resync(&mut self) {
        self.offset += 1;
        while self.offset < self.data.len() && self.data[self.offset] != SYNC_BYTE {
            self.offset += 1;
        }
    }
}

impl<'a> Iterator for TsPacketIterator<'a> {
    type Item = TsPacket<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        while self.offset + TS_PACKET_SIZE <= self.data.len() {
            match TsPacket::parse(&self.data[self.offset..]) {
                Ok(packet) => {
                    self.offset += TS_PACKET_SIZE;
                    return Some(packet);
                }
                Err(_) => self.resync(),
            }
        }
        None
    }
}

/// Routes packets of the filtered PIDs to per-PID section collectors.
#[derive(Debug, Default)]
pub struct SectionDemux {
    collectors: HashMap<u16, SectionCollector>,
}

impl SectionDemux {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start collecting sections on a PID. Returns false if already active.
    pub fn add_pid(&mut self, pid: u16) -> bool {
        if self.collectors.contains_key(&pid) {
            return false;
        }
        self.collectors.insert(pid, SectionCollector::new());
        true
    }

    /// Stop collecting on a PID and drop any partial section.
    pub fn remove_pid(&mut self, pid: u16) -> bool {
        self.collectors.remove(&pid).is_some()
    }

    pub fn clear(&mut self) {
        self.collectors.clear();
    }

    pub fn is_filtered(&self, pid: u16) -> bool {
        self.collectors.contains_key(&pid)
    }

    /// Feed one packet; returns the sections it completed.
    pub fn feed(&mut self, packet: &TsPacket<'_>) -> Vec<Vec<u8>> {
        let header = &packet.header;
        if header.transport_error || header.is_scrambled() || !header.has_payload() {
            return Vec::new();
        }
        match self.collectors.get_mut(&header.pid) {
            Some(collector) => collector.push(
                packet.payload,
                header.continuity_counter,
                header.payload_unit_start,
            ),
            None => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::si::psi::build_section;

    fn make_packet(pid: u16, cc: u8, pusi: bool, payload: &[u8]) -> Vec<u8> {
        let mut packet = vec![0xFFu8; TS_PACKET_SIZE];
        packet[0] = SYNC_BYTE;
        packet[1] = ((pid >> 8) as u8 & 0x1F) | if pusi { 0x40 } else { 0 };
        packet[2] = (pid & 0xFF) as u8;
        packet[3] = 0x10 | (cc & 0x0F);
        packet[4..4 + payload.len()].copy_from_slice(payload);
        packet
    }

    #[test]
    fn test_parse_null_packet() {
        let mut packet = [0u8; 188];
        packet[0] = SYNC_BYTE;
        packet[1] = 0x1F;
        packet[2] = 0xFF;
        packet[3] = 0x10;

        let parsed = TsPacket::parse(&packet).unwrap();
        assert_eq!(parsed.header.pid, 0x1FFF);
        assert!(parsed.header.has_payload());
        assert!(!parsed.header.has_adaptation_field());
        assert_eq!(parsed.payload.len(), 184);
    }

    #[test]
    fn test_adaptation_field_is_skipped() {
        let mut packet = [0u8; 188];
        packet[0] = SYNC_BYTE;
        packet[3] = 0x30;
        packet[4] = 7;
        let parsed = TsPacket::parse(&packet).unwrap();
        assert_eq!(parsed.payload.len(), 188 - 12);
    }

    #[test]
    fn test_invalid_sync_byte() {
        let packet = [0u8; 188];
        assert!(TsPacket::parse(&packet).is_err());
    }

    #[test]
    fn test_iterator_resyncs() {
        let mut stream = vec![0x00, 0x12, 0x34];
        stream.extend(make_packet(0x11, 0, false, &[]));
        stream.extend(make_packet(0x12, 0, false, &[]));
        stream.extend_from_slice(&[SYNC_BYTE, 0x00]);

        let mut iter = TsPacketIterator::new(&stream);
        let pids: Vec<u16> = iter.by_ref().map(|p| p.header.pid).collect();
        assert_eq!(pids, vec![0x11, 0x12]);
        assert_eq!(iter.remainder(), &[SYNC_BYTE, 0x00]);
    }

    #[test]
    fn test_demux_filters_pids() {
        let section = build_section(0x00, 1, 0, 0, 0, &[0x00, 0x01, 0xE0, 0x20]);
        let mut payload = vec![0u8];
        payload.extend_from_slice(&section);

        let on_pat = make_packet(0x0000, 0, true, &payload);
        let on_other = make_packet(0x0100, 0, true, &payload);

        let mut demux = SectionDemux::new();
        assert!(demux.add_pid(0x0000));
        assert!(!demux.add_pid(0x0000));

        let packet = TsPacket::parse(&on_pat).unwrap();
        assert_eq!(demux.feed(&packet), vec![section.clone()]);

        let packet = TsPacket::parse(&on_other).unwrap();
        assert!(demux.feed(&packet).is_empty());

        assert!(demux.remove_pid(0x0000));
        assert!(!demux.is_filtered(0x0000));
    }
}
