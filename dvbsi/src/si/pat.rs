//! PAT (Program Association Table) decoding.

use super::cursor::SectionCursor;

/// PAT record size.
pub const PAT_LOOP_LEN: usize = 4;

/// One program of the PAT.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PatEntry {
    pub program_number: u16,
    pub pmt_pid: u16,
}

/// Decode the program loop of a PAT body. Program 0 (network PID) is skipped.
pub fn parse_pat(body: &[u8]) -> Vec<PatEntry> {
    let mut cursor = SectionCursor::new(body);
    let mut entries = Vec::with_capacity(body.len() / PAT_LOOP_LEN);

    while cursor.remaining() >= PAT_LOOP_LEN {
        let (Ok(program_number), Ok(pid)) = (cursor.read_u16(), cursor.read_pid()) else {
            break;
        };
        log::trace!("PAT: program {} -> PMT PID 0x{:04X}", program_number, pid);
        if program_number == 0 {
            continue;
        }
        entries.push(PatEntry {
            program_number,
            pmt_pid: pid,
        });
    }

    entries
}
