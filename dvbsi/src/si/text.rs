//! DVB text decoding (EN 300 468 Annex A).
//!
//! The first byte of a text field selects the character table. Values of
//! `0x20` and above are already text in the default table (ISO/IEC 6937).

use encoding_rs::Encoding;

/// Substitute for code points that cannot be displayed.
pub const PLACEHOLDER: char = ' ';

/// Decode a DVB text field into a `String`.
pub fn decode_text(data: &[u8]) -> String {
    let Some(&first) = data.first() else {
        return String::new();
    };

    match first {
        0x20..=0xFF => decode_iso6937(data),
        0x01..=0x0B => match iso8859(first as u32 + 4) {
            Some(encoding) => decode_single_byte(encoding, &data[1..]),
            None => String::new(),
        },
        0x10 => {
            if data.len() < 3 || data[1] != 0x00 {
                return String::new();
            }
            match iso8859(data[2] as u32) {
                Some(encoding) => decode_single_byte(encoding, &data[3..]),
                None => String::new(),
            }
        }
        0x11 => decode_multi_byte(encoding_rs::UTF_16BE, &data[1..]),
        0x12 => decode_multi_byte(encoding_rs::EUC_KR, &data[1..]),
        0x13 => decode_multi_byte(encoding_rs::GBK, &data[1..]),
        0x14 => decode_multi_byte(encoding_rs::BIG5, &data[1..]),
        0x15 => decode_multi_byte(encoding_rs::UTF_8, &data[1..]),
        _ => {
            log::debug!("Reserved character table 0x{:02X}", first);
            String::new()
        }
    }
}

/// ISO/IEC 8859 part `n`, via the WHATWG encodings where they coincide.
fn iso8859(n: u32) -> Option<&'static Encoding> {
    let encoding = match n {
        1 => encoding_rs::WINDOWS_1252,
        2 => encoding_rs::ISO_8859_2,
        3 => encoding_rs::ISO_8859_3,
        4 => encoding_rs::ISO_8859_4,
        5 => encoding_rs::ISO_8859_5,
        6 => encoding_rs::ISO_8859_6,
        7 => encoding_rs::ISO_8859_7,
        8 => encoding_rs::ISO_8859_8,
        9 => encoding_rs::WINDOWS_1254,
        10 => encoding_rs::ISO_8859_10,
        11 => encoding_rs::WINDOWS_874,
        13 => encoding_rs::ISO_8859_13,
        14 => encoding_rs::ISO_8859_14,
        15 => encoding_rs::ISO_8859_15,
        16 => encoding_rs::ISO_8859_16,
        _ => return None,
    };
    Some(encoding)
}

/// Strip single-byte control codes before handing bytes to the decoder.
fn strip_control_bytes(data: &[u8]) -> Vec<u8> {
    data.iter()
        .filter_map(|&b| match b {
            0x8A => Some(b' '),
            0x80..=0x9F => None,
            0x00..=0x1F => None,
            _ => Some(b),
        })
        .collect()
}

fn decode_single_byte(encoding: &'static Encoding, data: &[u8]) -> String {
    let cleaned = strip_control_bytes(data);
    let (text, _) = encoding.decode_without_bom_handling(&cleaned);
    sanitize(&text)
}

fn decode_multi_byte(encoding: &'static Encoding, data: &[u8]) -> String {
    let (text, _) = encoding.decode_without_bom_handling(data);
    sanitize(&text)
}

/// Apply the control code rules to decoded text.
fn sanitize(text: &str) -> String {
    text.chars()
        .filter_map(|c| match c {
            '\u{8A}' | '\u{E08A}' => Some(' '),
            '\u{80}'..='\u{9F}' | '\u{E080}'..='\u{E09F}' => None,
            c if (c as u32) < 0x20 => None,
            c if c.is_control() || c == '\u{FFFD}' => Some(PLACEHOLDER),
            c => Some(c),
        })
        .collect()
}

/// Non-spacing diacritical marks of ISO/IEC 6937, as Unicode combining marks.
fn iso6937_diacritic(b: u8) -> Option<char> {
    let mark = match b {
        0xC1 => '\u{0300}',
        0xC2 => '\u{0301}',
        0xC3 => '\u{0302}',
        0xC4 => '\u{0303}',
        0xC5 => '\u{0304}',
        0xC6 => '\u{0306}',
        0xC7 => '\u{0307}',
        0xC8 => '\u{0308}',
        0xCA => '\u{030A}',
        0xCB => '\u{0327}',
        0xCD => '\u{030B}',
        0xCE => '\u{0328}',
        0xCF => '\u{030C}',
        _ => return None,
    };
    Some(mark)
}

#[rustfmt::skip]
static ISO6937_A0: [Option<char>; 32] = [
    Some('\u{A0}'), Some('¡'), Some('¢'), Some('£'), None, Some('¥'), None, Some('§'),
    Some('¤'), Some('‘'), Some('“'), Some('«'), Some('←'), Some('↑'), Some('→'), Some('↓'),
    Some('°'), Some('±'), Some('²'), Some('³'), Some('×'), Some('µ'), Some('¶'), Some('·'),
    Some('÷'), Some('’'), Some('”'), Some('»'), Some('¼'), Some('½'), Some('¾'), Some('¿'),
];

#[rustfmt::skip]
static ISO6937_D0: [Option<char>; 48] = [
    Some('―'), Some('¹'), Some('®'), Some('©'), Some('™'), Some('♪'), Some('¬'), Some('¦'),
    None, None, None, None, Some('⅛'), Some('⅜'), Some('⅝'), Some('⅞'),
    Some('Ω'), Some('Æ'), Some('Đ'), Some('ª'), Some('Ħ'), None, Some('Ĳ'), Some('Ŀ'),
    Some('Ł'), Some('Ø'), Some('Œ'), Some('º'), Some('Þ'), Some('Ŧ'), Some('Ŋ'), Some('ŉ'),
    Some('ĸ'), Some('æ'), Some('đ'), Some('ð'), Some('ħ'), Some('ı'), Some('ĳ'), Some('ŀ'),
    Some('ł'), Some('ø'), Some('œ'), Some('ß'), Some('þ'), Some('ŧ'), Some('ŋ'), Some('\u{AD}'),
];

fn decode_iso6937(data: &[u8]) -> String {
    let mut out = String::with_capacity(data.len());
    let mut i = 0;
    while i < data.len() {
        let b = data[i];
        i += 1;
        match b {
            0x8A => out.push(' '),
            0x00..=0x1F | 0x80..=0x9F => {}
            0x20..=0x7E => out.push(b as char),
            0x7F => out.push(PLACEHOLDER),
            0xA0..=0xBF => out.push(ISO6937_A0[(b - 0xA0) as usize].unwrap_or(PLACEHOLDER)),
            0xC0..=0xCF => {
                let Some(mark) = iso6937_diacritic(b) else {
                    out.push(PLACEHOLDER);
                    continue;
                };
                // The mark applies to the following base character.
                if let Some(&base) = data.get(i) {
                    if base.is_ascii_alphabetic() {
                        out.push(base as char);
                        out.push(mark);
                        i += 1;
                    }
                }
            }
            0xD0..=0xFF => out.push(ISO6937_D0[(b - 0xD0) as usize].unwrap_or(PLACEHOLDER)),
        }
    }
    out
}
