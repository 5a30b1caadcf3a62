//! CRC-32/MPEG-2 as used by PSI/SI sections.
//!
//! Polynomial 0x04C11DB7, initial value 0xFFFFFFFF, MSB first, no final XOR.
//! Running it over a whole section, including the trailing CRC field,
//! yields zero when the section is intact.

use crate::{Result, TsError};

const POLY: u32 = 0x04C1_1DB7;

const fn make_table() -> [u32; 256] {
    let mut table = [0u32; 256];
    let mut n = 0;
    while n < 256 {
        let mut c = (n as u32) << 24;
        let mut k = 0;
        while k < 8 {
            c = if c & 0x8000_0000 != 0 {
                (c << 1) ^ POLY
            } else {
                c << 1
            };
            k += 1;
        }
        table[n] = c;
        n += 1;
    }
    table
}

static TABLE: [u32; 256] = make_table();

/// Compute the CRC-32/MPEG-2 of `data`.
pub fn crc32_mpeg2(data: &[u8]) -> u32 {
    data.iter().fold(0xFFFF_FFFF, |crc, &b| {
        (crc << 8) ^ TABLE[((crc >> 24) as u8 ^ b) as usize]
    })
}

/// Whether sections with this table id carry a CRC_32 field.
///
/// TDT/TOT/RST/ST (0x70..=0x73), DIT/SIT (0x7E) and the reserved ranges
/// 0x75..=0x77 and 0x80..=0x8F are transmitted without one, or with one we
/// cannot rely on.
pub fn table_has_crc(table_id: u8) -> bool {
    !matches!(table_id, 0x70..=0x73 | 0x75..=0x77 | 0x7E | 0x80..=0x8F)
}

/// Verify the CRC of a complete long-form section (header through CRC).
pub fn check_section_crc(section: &[u8]) -> Result<()> {
    if section.len() < 4 {
        return Err(TsError::InsufficientData {
            expected: 4,
            actual: section.len(),
        });
    }
    if crc32_mpeg2(section) == 0 {
        return Ok(());
    }
    let (body, tail) = section.split_at(section.len() - 4);
    Err(TsError::Crc32Mismatch {
        expected: u32::from_be_bytes([tail[0], tail[1], tail[2], tail[3]]),
        calculated: crc32_mpeg2(body),
    })
}

/// Read the stored CRC of a section, if it is long enough to carry one.
pub fn stored_crc(section: &[u8]) -> Option<u32> {
    let n = section.len();
    (n >= 4).then(|| u32::from_be_bytes([section[n - 4], section[n - 3], section[n - 2], section[n - 1]]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn check_value_matches_catalogue() {
        assert_eq!(crc32_mpeg2(b"123456789"), 0x0376_E6E7);
        assert_eq!(crc32_mpeg2(&[]), 0xFFFF_FFFF);
    }

    #[test]
    fn section_with_appended_crc_verifies() {
        let mut section = vec![0x00, 0xB0, 0x0D, 0x00, 0x01, 0xC1, 0x00, 0x00, 0x00, 0x01, 0xF0, 0x00];
        let crc = crc32_mpeg2(&section);
        section.extend_from_slice(&crc.to_be_bytes());
        assert!(check_section_crc(&section).is_ok());
        assert_eq!(stored_crc(&section), Some(crc));

        section[4] ^= 0x01;
        match check_section_crc(&section) {
            Err(TsError::Crc32Mismatch { expected, .. }) => assert_eq!(expected, crc),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn crc_less_table_ids() {
        for id in [0x70, 0x71, 0x72, 0x73, 0x75, 0x77, 0x7E, 0x80, 0x8F] {
            assert!(!table_has_crc(id), "0x{id:02x}");
        }
        for id in [0x00, 0x02, 0x42, 0x4E, 0x74, 0x7F, 0x90] {
            assert!(table_has_crc(id), "0x{id:02x}");
        }
    }
}
