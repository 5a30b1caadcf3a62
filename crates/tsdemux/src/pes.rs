//! PES packet header parsing.

use crate::{Result, TsError};

/// Private stream 2
pub const STREAM_ID_PRIVATE_2: u8 = 0xBF;
/// Padding stream
pub const STREAM_ID_PADDING: u8 = 0xBE;
/// Extended stream id (stream_id_extension present)
pub const STREAM_ID_EXTENDED: u8 = 0xFD;

/// Largest value of a 33-bit PTS/DTS plus one.
pub const PTS_WRAP: u64 = 1 << 33;

/// Parse a 33-bit PTS or DTS timestamp from 5 bytes.
///
/// Layout: `[prefix(4) | ts32..30 | 1 | ts29..15 | 1 | ts14..0 | 1]`
fn parse_timestamp(data: &[u8]) -> Result<u64> {
    if data[0] & 0x01 == 0 || data[2] & 0x01 == 0 || data[4] & 0x01 == 0 {
        return Err(TsError::InvalidTimestampMarker);
    }
    Ok((((data[0] as u64 >> 1) & 0x07) << 30)
        | ((data[1] as u64) << 22)
        | (((data[2] as u64 >> 1) & 0x7F) << 15)
        | ((data[3] as u64) << 7)
        | ((data[4] as u64 >> 1) & 0x7F))
}

/// ESCR: 33-bit base and 9-bit extension, with marker bits.
fn parse_escr(data: &[u8]) -> Result<u64> {
    if data[0] & 0x04 == 0 || data[2] & 0x04 == 0 || data[4] & 0x04 == 0 || data[5] & 0x01 == 0 {
        return Err(TsError::InvalidTimestampMarker);
    }
    let base = (((data[0] as u64 >> 3) & 0x07) << 30)
        | ((data[0] as u64 & 0x03) << 28)
        | ((data[1] as u64) << 20)
        | (((data[2] as u64 >> 3) & 0x1F) << 15)
        | ((data[2] as u64 & 0x03) << 13)
        | ((data[3] as u64) << 5)
        | ((data[4] as u64 >> 3) & 0x1F);
    let extension = ((data[4] as u64 & 0x03) << 7) | (data[5] as u64 >> 1);
    Ok(base * 300 + extension % 300)
}

/// Check if a stream_id has an optional PES header (PTS/DTS fields).
fn has_optional_pes_header(stream_id: u8) -> bool {
    // Per ISO 13818-1 Table 2-18, these stream IDs do NOT have optional header:
    !matches!(
        stream_id,
        0xBC   // program_stream_map
        | STREAM_ID_PADDING
        | STREAM_ID_PRIVATE_2
        | 0xF0 // ECM_stream
        | 0xF1 // EMM_stream
        | 0xFF // program_stream_directory
        | 0xF2 // DSMCC_stream
        | 0xF8 // ITU-T Rec. H.222.1 type E
    )
}

fn need(data: &[u8], len: usize) -> Result<()> {
    if data.len() < len {
        return Err(TsError::InsufficientData {
            expected: len,
            actual: data.len(),
        });
    }
    Ok(())
}

/// Parsed PES header.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PesHeader {
    pub stream_id: u8,
    /// PES_packet_length; 0 means unbounded
    pub packet_length: u16,
    /// Bytes before the elementary stream data
    pub header_size: usize,
    pub scrambling_control: u8,
    pub data_alignment_indicator: bool,
    pub pts: Option<u64>,
    pub dts: Option<u64>,
    /// ESCR in 27MHz units
    pub escr: Option<u64>,
    /// ES_rate in units of 50 bytes/s
    pub es_rate: Option<u32>,
    pub trick_mode: Option<u8>,
    pub additional_copy_info: Option<u8>,
    pub previous_pes_crc: Option<u16>,
    pub stream_id_extension: Option<u8>,
}

impl PesHeader {
    /// Parse a PES header from bytes starting with the start code prefix.
    ///
    /// [`TsError::InsufficientData`] means the header continues in a later
    /// packet; every other error makes the PES unusable.
    pub fn parse(data: &[u8]) -> Result<Self> {
        need(data, 6)?;
        if data[0] != 0x00 || data[1] != 0x00 || data[2] != 0x01 {
            return Err(TsError::InvalidPesStartCode);
        }

        let mut header = PesHeader {
            stream_id: data[3],
            packet_length: u16::from_be_bytes([data[4], data[5]]),
            header_size: 6,
            ..Default::default()
        };
        if !has_optional_pes_header(header.stream_id) {
            return Ok(header);
        }

        need(data, 9)?;
        if data[6] >> 6 != 0b10 {
            return Err(TsError::ParseError(format!(
                "bad PES header marker 0x{:02x}",
                data[6]
            )));
        }
        header.scrambling_control = (data[6] >> 4) & 0x03;
        header.data_alignment_indicator = data[6] & 0x04 != 0;
        let flags = data[7];
        header.header_size = 9 + data[8] as usize;
        if header.packet_length != 0 && header.header_size > header.packet_length as usize + 6 {
            return Err(TsError::ParseError(format!(
                "PES header size {} exceeds packet length {}",
                header.header_size, header.packet_length
            )));
        }
        need(data, header.header_size)?;

        let fields = &data[9..header.header_size];
        let mut pos = 0;
        let mut take = |len: usize| -> Result<&[u8]> {
            let field = fields.get(pos..pos + len).ok_or_else(|| {
                TsError::ParseError("PES optional fields overrun header".to_string())
            })?;
            pos += len;
            Ok(field)
        };

        match flags >> 6 {
            0b00 => {}
            0b01 => return Err(TsError::InvalidPtsDtsFlags(0b01)),
            0b10 => header.pts = Some(parse_timestamp(take(5)?)?),
            _ => {
                header.pts = Some(parse_timestamp(take(5)?)?);
                header.dts = Some(parse_timestamp(take(5)?)?);
            }
        }
        if flags & 0x20 != 0 {
            header.escr = Some(parse_escr(take(6)?)?);
        }
        if flags & 0x10 != 0 {
            let b = take(3)?;
            header.es_rate = Some(
                ((b[0] as u32 & 0x7F) << 15) | ((b[1] as u32) << 7) | (b[2] as u32 >> 1),
            );
        }
        if flags & 0x08 != 0 {
            header.trick_mode = Some(take(1)?[0]);
        }
        if flags & 0x04 != 0 {
            header.additional_copy_info = Some(take(1)?[0] & 0x7F);
        }
        if flags & 0x02 != 0 {
            let b = take(2)?;
            header.previous_pes_crc = Some(u16::from_be_bytes([b[0], b[1]]));
        }
        if flags & 0x01 != 0 {
            let ext = take(1)?[0];
            if ext & 0x80 != 0 {
                // PES_private_data
                take(16)?;
            }
            if ext & 0x40 != 0 {
                let pack_field_length = take(1)?[0] as usize;
                take(pack_field_length)?;
            }
            if ext & 0x20 != 0 {
                // program_packet_sequence_counter
                take(2)?;
            }
            if ext & 0x10 != 0 {
                // P-STD buffer
                take(2)?;
            }
            if ext & 0x01 != 0 {
                let ext2 = take(1)?[0];
                let ext2_length = (ext2 & 0x7F) as usize;
                let body = take(ext2_length)?;
                if header.stream_id == STREAM_ID_EXTENDED
                    && let Some(&b) = body.first()
                    && b & 0x80 == 0
                {
                    header.stream_id_extension = Some(b & 0x7F);
                }
            }
        }
        // anything left is stuffing

        Ok(header)
    }

    /// Elementary stream bytes following the header, if bounded.
    pub fn payload_size(&self) -> Option<usize> {
        match self.packet_length {
            0 => None,
            len => Some((len as usize + 6).saturating_sub(self.header_size)),
        }
    }
}
