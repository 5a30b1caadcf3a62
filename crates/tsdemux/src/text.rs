//! DVB SI text decoding (ETSI EN 300 468 Annex A).
//!
//! The first byte of a text field optionally selects a character table.
//! Without a selector the field is ISO/IEC 6937.

use encoding_rs::{EUC_KR, Encoding, GBK, UTF_16BE, WINDOWS_1254};
use tracing::trace;

/// Character table of a DVB text field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextEncoding {
    Iso6937,
    /// ISO/IEC 8859 part n
    Iso8859(u8),
    /// ISO/IEC 10646 basic multilingual plane, two bytes per character
    Ucs2,
    EucKr,
    Gb2312,
    Utf16Be,
    Utf8,
    /// Selector we have no decoder for
    Unsupported(u8),
}

impl TextEncoding {
    fn is_multibyte(self) -> bool {
        matches!(
            self,
            TextEncoding::Ucs2
                | TextEncoding::EucKr
                | TextEncoding::Gb2312
                | TextEncoding::Utf16Be
                | TextEncoding::Utf8
        )
    }
}

/// Read the character table selector, returning the encoding and the
/// number of selector bytes to skip.
pub fn detect_encoding(data: &[u8]) -> (TextEncoding, usize) {
    let Some(&first) = data.first() else {
        return (TextEncoding::Iso6937, 0);
    };
    match first {
        0x01..=0x0B => (TextEncoding::Iso8859(first + 4), 1),
        0x10 => match data.get(1..3) {
            Some(&[0x00, part]) if (1..=15).contains(&part) => (TextEncoding::Iso8859(part), 3),
            _ => (TextEncoding::Unsupported(first), data.len().min(3)),
        },
        0x11 => (TextEncoding::Ucs2, 1),
        0x12 => (TextEncoding::EucKr, 1),
        0x13 => (TextEncoding::Gb2312, 1),
        0x14 => (TextEncoding::Utf16Be, 1),
        0x15 => (TextEncoding::Utf8, 1),
        0x1F => (TextEncoding::Unsupported(first), data.len().min(2)),
        0x00..=0x1F => (TextEncoding::Iso6937, 1),
        _ => (TextEncoding::Iso6937, 0),
    }
}

/// Decode a DVB text field into a `String`.
///
/// Emphasis control codes are dropped and the CR/LF control code becomes a
/// newline. When the selected table cannot decode the bytes the field is
/// retried as ISO-8859-1, then ISO-8859-9, and finally copied lossily.
pub fn decode_dvb_text(data: &[u8]) -> String {
    let (encoding, skip) = detect_encoding(data);
    let text = &data[skip..];
    if text.is_empty() {
        return String::new();
    }

    let decoded = if encoding.is_multibyte() {
        decode_multibyte(encoding, text).map(strip_private_controls)
    } else {
        let cleaned = strip_controls(text);
        decode_single_byte(encoding, &cleaned)
    };
    if let Some(s) = decoded {
        return s;
    }

    trace!(?encoding, len = text.len(), "text decoding failed, falling back");
    let cleaned = strip_controls(text);
    decode_latin1(&cleaned)
        .or_else(|| decode_with(WINDOWS_1254, &cleaned))
        .unwrap_or_else(|| String::from_utf8_lossy(&cleaned).into_owned())
}

/// Remove single-byte control codes 0x80..=0x9F, keeping 0x8A as a newline.
fn strip_controls(text: &[u8]) -> Vec<u8> {
    text.iter()
        .filter_map(|&b| match b {
            0x8A => Some(b'\n'),
            0x80..=0x9F => None,
            _ => Some(b),
        })
        .collect()
}

/// Same for multibyte tables, where the control codes live at U+E080..U+E09F.
fn strip_private_controls(text: String) -> String {
    if !text.chars().any(|c| ('\u{E080}'..='\u{E09F}').contains(&c)) {
        return text;
    }
    text.chars()
        .filter_map(|c| match c {
            '\u{E08A}' => Some('\n'),
            '\u{E080}'..='\u{E09F}' => None,
            _ => Some(c),
        })
        .collect()
}

fn decode_with(encoding: &'static Encoding, bytes: &[u8]) -> Option<String> {
    encoding
        .decode_without_bom_handling_and_without_replacement(bytes)
        .map(|s| s.into_owned())
}

fn decode_multibyte(encoding: TextEncoding, text: &[u8]) -> Option<String> {
    match encoding {
        TextEncoding::Ucs2 | TextEncoding::Utf16Be => decode_with(UTF_16BE, text),
        TextEncoding::EucKr => decode_with(EUC_KR, text),
        TextEncoding::Gb2312 => decode_with(GBK, text),
        TextEncoding::Utf8 => std::str::from_utf8(text).ok().map(str::to_owned),
        _ => None,
    }
}

fn decode_single_byte(encoding: TextEncoding, text: &[u8]) -> Option<String> {
    match encoding {
        TextEncoding::Iso6937 => decode_iso6937(text),
        TextEncoding::Iso8859(1) => decode_latin1(text),
        TextEncoding::Iso8859(part) => {
            // C1 controls are already gone, so the WHATWG aliases of
            // ISO-8859-9 and -11 decode identically
            let label = format!("iso-8859-{part}");
            decode_with(Encoding::for_label(label.as_bytes())?, text)
        }
        _ => None,
    }
}

fn decode_latin1(text: &[u8]) -> Option<String> {
    if text.iter().any(|b| (0x80..=0x9F).contains(b)) {
        return None;
    }
    Some(text.iter().map(|&b| b as char).collect())
}

/// Characters of ISO/IEC 6937 at 0xA0..=0xFF. `None` marks unassigned
/// positions and the diacritical prefixes handled separately.
const ISO6937_HIGH: [Option<char>; 96] = {
    const N: Option<char> = None;
    [
        // A0
        Some('\u{00A0}'), Some('¡'), Some('¢'), Some('£'), N, Some('¥'), N, Some('§'),
        Some('¤'), Some('‘'), Some('“'), Some('«'), Some('←'), Some('↑'), Some('→'), Some('↓'),
        // B0
        Some('°'), Some('±'), Some('²'), Some('³'), Some('×'), Some('µ'), Some('¶'), Some('·'),
        Some('÷'), Some('’'), Some('”'), Some('»'), Some('¼'), Some('½'), Some('¾'), Some('¿'),
        // C0: diacritical marks
        N, N, N, N, N, N, N, N, N, N, N, N, N, N, N, N,
        // D0
        Some('―'), Some('¹'), Some('®'), Some('©'), Some('™'), Some('♪'), Some('¬'), Some('¦'),
        N, N, N, N, Some('⅛'), Some('⅜'), Some('⅝'), Some('⅞'),
        // E0
        Some('Ω'), Some('Æ'), Some('Đ'), Some('ª'), Some('Ħ'), N, Some('Ĳ'), Some('Ŀ'),
        Some('Ł'), Some('Ø'), Some('Œ'), Some('º'), Some('Þ'), Some('Ŧ'), Some('Ŋ'), Some('ŉ'),
        // F0
        Some('ĸ'), Some('æ'), Some('đ'), Some('ð'), Some('ħ'), Some('ı'), Some('ĳ'), Some('ŀ'),
        Some('ł'), Some('ø'), Some('œ'), Some('ß'), Some('þ'), Some('ŧ'), Some('ŋ'), Some('\u{00AD}'),
    ]
};

/// Combining mark for a diacritical prefix byte.
fn iso6937_mark(b: u8) -> Option<char> {
    Some(match b {
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
    })
}

/// Precomposed forms for the marks that cover Latin-1 letters, as
/// base/composed pairs.
fn iso6937_precomposed(mark: u8) -> &'static str {
    match mark {
        0xC1 => "AÀEÈIÌOÒUÙaàeèiìoòuù",
        0xC2 => "AÁEÉIÍOÓUÚYÝaáeéiíoóuúyýCĆcćNŃnńSŚsśZŹzźLĹlĺRŔrŕ",
        0xC3 => "AÂEÊIÎOÔUÛaâeêiîoôuûCĈcĉGĜgĝHĤhĥJĴjĵSŜsŝWŴwŵYŶyŷ",
        0xC4 => "AÃNÑOÕaãnñoõIĨiĩUŨuũ",
        0xC5 => "AĀaāEĒeēIĪiīOŌoōUŪuū",
        0xC6 => "AĂaăGĞgğUŬuŭ",
        0xC7 => "CĊcċEĖeėGĠgġIİZŻzż",
        0xC8 => "AÄEËIÏOÖUÜaäeëiïoöuüyÿYŸ",
        0xCA => "AÅaåUŮuů",
        0xCB => "CÇcçGĢKĶkķLĻlļNŅnņRŖrŗSŞsşTŢtţ",
        0xCD => "OŐoőUŰuű",
        0xCE => "AĄaąEĘeęIĮiįUŲuų",
        0xCF => "CČcčDĎdďEĚeěLĽlľNŇnňRŘrřSŠsšTŤtťZŽzž",
        _ => "",
    }
}

fn compose(mark: u8, base: char) -> Option<char> {
    let mut chars = iso6937_precomposed(mark).chars();
    while let (Some(b), Some(c)) = (chars.next(), chars.next()) {
        if b == base {
            return Some(c);
        }
    }
    None
}

fn decode_iso6937(text: &[u8]) -> Option<String> {
    let mut out = String::with_capacity(text.len());
    let mut iter = text.iter().copied();
    while let Some(b) = iter.next() {
        match b {
            0x00..=0x7F => out.push(b as char),
            0xC1..=0xCF => {
                let mark = iso6937_mark(b)?;
                let base = iter.next()?;
                if !base.is_ascii() {
                    return None;
                }
                match compose(b, base as char) {
                    Some(c) => out.push(c),
                    None => {
                        out.push(base as char);
                        out.push(mark);
                    }
                }
            }
            0xA0..=0xFF => out.push(ISO6937_HIGH[(b - 0xA0) as usize]?),
            _ => return None,
        }
    }
    Some(out)
}
