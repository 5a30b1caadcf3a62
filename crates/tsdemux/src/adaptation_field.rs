use crate::{Result, TsError};

/// Program Clock Reference: 33-bit base at 90 kHz plus a 9-bit extension at 27 MHz.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pcr {
    /// 33-bit base value at 90 kHz
    pub base: u64,
    /// 9-bit extension value at 27 MHz
    pub extension: u16,
}

impl Pcr {
    /// Decode the 6-byte PCR/OPCR field.
    ///
    /// Layout: `[base32..25][base24..17][base16..9][base8..1][base0 | reserved(6) | ext8][ext7..0]`
    pub fn parse(data: &[u8]) -> Option<Self> {
        let raw: [u8; 6] = data.get(..6)?.try_into().ok()?;
        let hi = u32::from_be_bytes([raw[0], raw[1], raw[2], raw[3]]) as u64;
        let base = (hi << 1) | (raw[4] >> 7) as u64;
        let extension = u16::from_be_bytes([raw[4] & 0x01, raw[5]]);
        Some(Pcr { base, extension })
    }

    /// Combined value in 27 MHz ticks.
    ///
    /// Extensions above 299 are out of range on the wire and are folded back
    /// with a modulo, matching what receivers do in practice.
    pub fn as_27mhz(&self) -> u64 {
        self.base * 300 + (self.extension % 300) as u64
    }

    /// Encode into the 6-byte wire layout. Reserved bits are set.
    pub fn to_bytes(&self) -> [u8; 6] {
        let base = self.base & 0x1_FFFF_FFFF;
        [
            (base >> 25) as u8,
            (base >> 17) as u8,
            (base >> 9) as u8,
            (base >> 1) as u8,
            ((base & 0x01) as u8) << 7 | 0x7E | ((self.extension >> 8) as u8 & 0x01),
            self.extension as u8,
        ]
    }
}

/// Adaptation field flags and clock references of a single packet.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AdaptationField {
    pub discontinuity_indicator: bool,
    pub random_access_indicator: bool,
    pub elementary_stream_priority_indicator: bool,
    pub pcr: Option<Pcr>,
    pub opcr: Option<Pcr>,
    pub splice_countdown: Option<i8>,
}

impl AdaptationField {
    /// Parse the field body (the bytes after the length byte).
    ///
    /// An empty body is a single stuffing byte and yields no flags.
    pub fn parse(data: &[u8]) -> Self {
        let Some(&flags) = data.first() else {
            return AdaptationField::default();
        };

        let mut field = AdaptationField {
            discontinuity_indicator: flags & 0x80 != 0,
            random_access_indicator: flags & 0x40 != 0,
            elementary_stream_priority_indicator: flags & 0x20 != 0,
            ..Default::default()
        };

        let mut rest = &data[1..];
        if flags & 0x10 != 0 {
            field.pcr = Pcr::parse(rest);
            rest = rest.get(6..).unwrap_or_default();
        }
        if flags & 0x08 != 0 {
            field.opcr = Pcr::parse(rest);
            rest = rest.get(6..).unwrap_or_default();
        }
        if flags & 0x04 != 0 {
            field.splice_countdown = rest.first().map(|&b| b as i8);
        }
        field
    }
}

/// Validate an adaptation field length against the adaptation_field_control
/// bits and the bytes left in the packet.
///
/// Returns whether the payload flag survives: encoders that mark a packet as
/// carrying payload with a 183-byte adaptation field actually carry none.
pub(crate) fn check_length(length: u8, control: u8, available: usize) -> Result<bool> {
    let has_payload = control & 0x01 != 0;
    if length == 0 {
        return Ok(has_payload);
    }
    let keep_payload = match (has_payload, length) {
        (false, 0..=183) => false,
        (true, 183) => false,
        (true, 0..=182) => true,
        _ => {
            return Err(TsError::InvalidAdaptationFieldLength { length, control });
        }
    };
    if length as usize > available {
        return Err(TsError::InvalidAdaptationFieldLength { length, control });
    }
    Ok(keep_payload)
}
