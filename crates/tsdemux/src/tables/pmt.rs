use crate::descriptor::{Descriptor, parse_descriptors, registration_id};
use crate::section::Section;
use crate::{Result, TsError};

pub const TABLE_ID_PMT: u8 = 0x02;

/// SCTE-35 format identifier ("CUEI")
pub const REGISTRATION_CUEI: u32 = u32::from_be_bytes(*b"CUEI");
/// CableLabs ETV format identifier ("ETV1")
pub const REGISTRATION_ETV1: u32 = u32::from_be_bytes(*b"ETV1");

/// Elementary stream types carried in the PMT.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamType {
    Mpeg1Video,
    Mpeg2Video,
    Mpeg1Audio,
    Mpeg2Audio,
    PrivateSections,
    PrivatePes,
    Mheg,
    DsmCc,
    DsmccA,
    DsmccB,
    DsmccC,
    DsmccD,
    AdtsAac,
    Mpeg4Visual,
    LatmAac,
    SlFlexmuxSections,
    MetadataPes,
    MetadataSections,
    H264,
    H265,
    Ac3,
    ScteSit,
    Eac3,
    ScteDsmccDcb,
    ScteSignaling,
    Unknown(u8),
}

impl From<u8> for StreamType {
    fn from(value: u8) -> Self {
        match value {
            0x01 => StreamType::Mpeg1Video,
            0x02 => StreamType::Mpeg2Video,
            0x03 => StreamType::Mpeg1Audio,
            0x04 => StreamType::Mpeg2Audio,
            0x05 => StreamType::PrivateSections,
            0x06 => StreamType::PrivatePes,
            0x07 => StreamType::Mheg,
            0x08 => StreamType::DsmCc,
            0x0A => StreamType::DsmccA,
            0x0B => StreamType::DsmccB,
            0x0C => StreamType::DsmccC,
            0x0D => StreamType::DsmccD,
            0x0F => StreamType::AdtsAac,
            0x10 => StreamType::Mpeg4Visual,
            0x11 => StreamType::LatmAac,
            0x13 => StreamType::SlFlexmuxSections,
            0x15 => StreamType::MetadataPes,
            0x16 => StreamType::MetadataSections,
            0x1B => StreamType::H264,
            0x24 => StreamType::H265,
            0x81 => StreamType::Ac3,
            0x86 => StreamType::ScteSit,
            0x87 => StreamType::Eac3,
            0xB0 => StreamType::ScteDsmccDcb,
            0xC0 => StreamType::ScteSignaling,
            other => StreamType::Unknown(other),
        }
    }
}

impl From<StreamType> for u8 {
    fn from(value: StreamType) -> Self {
        match value {
            StreamType::Mpeg1Video => 0x01,
            StreamType::Mpeg2Video => 0x02,
            StreamType::Mpeg1Audio => 0x03,
            StreamType::Mpeg2Audio => 0x04,
            StreamType::PrivateSections => 0x05,
            StreamType::PrivatePes => 0x06,
            StreamType::Mheg => 0x07,
            StreamType::DsmCc => 0x08,
            StreamType::DsmccA => 0x0A,
            StreamType::DsmccB => 0x0B,
            StreamType::DsmccC => 0x0C,
            StreamType::DsmccD => 0x0D,
            StreamType::AdtsAac => 0x0F,
            StreamType::Mpeg4Visual => 0x10,
            StreamType::LatmAac => 0x11,
            StreamType::SlFlexmuxSections => 0x13,
            StreamType::MetadataPes => 0x15,
            StreamType::MetadataSections => 0x16,
            StreamType::H264 => 0x1B,
            StreamType::H265 => 0x24,
            StreamType::Ac3 => 0x81,
            StreamType::ScteSit => 0x86,
            StreamType::Eac3 => 0x87,
            StreamType::ScteDsmccDcb => 0xB0,
            StreamType::ScteSignaling => 0xC0,
            StreamType::Unknown(other) => other,
        }
    }
}

impl StreamType {
    pub fn is_video(&self) -> bool {
        matches!(
            self,
            StreamType::Mpeg1Video
                | StreamType::Mpeg2Video
                | StreamType::Mpeg4Visual
                | StreamType::H264
                | StreamType::H265
        )
    }

    pub fn is_audio(&self) -> bool {
        matches!(
            self,
            StreamType::Mpeg1Audio
                | StreamType::Mpeg2Audio
                | StreamType::AdtsAac
                | StreamType::LatmAac
                | StreamType::Ac3
                | StreamType::Eac3
        )
    }
}

/// One elementary stream entry of a PMT.
#[derive(Debug, Clone, PartialEq)]
pub struct PmtStream {
    pub stream_type: StreamType,
    pub elementary_pid: u16,
    pub descriptors: Vec<Descriptor>,
}

impl PmtStream {
    pub fn registration_id(&self) -> Option<u32> {
        registration_id(&self.descriptors)
    }
}

/// Program map table
#[derive(Debug, Clone, PartialEq)]
pub struct Pmt {
    pub program_number: u16,
    pub version_number: u8,
    pub pcr_pid: u16,
    pub descriptors: Vec<Descriptor>,
    pub streams: Vec<PmtStream>,
}

impl Pmt {
    pub fn parse(section: &Section) -> Result<Self> {
        if section.table_id != TABLE_ID_PMT {
            return Err(TsError::InvalidTableId {
                expected: TABLE_ID_PMT,
                actual: section.table_id,
            });
        }
        if section.short_section {
            return Err(TsError::ParseError(
                "PMT must have section syntax indicator set".to_string(),
            ));
        }
        let body = section.body();
        if body.len() < 4 {
            return Err(TsError::InsufficientData {
                expected: 4,
                actual: body.len(),
            });
        }
        let pcr_pid = u16::from_be_bytes([body[0] & 0x1F, body[1]]);
        let program_info_length = u16::from_be_bytes([body[2] & 0x0F, body[3]]) as usize;
        let program_info = body
            .get(4..4 + program_info_length)
            .ok_or(TsError::MalformedDescriptorLoop { offset: 4 })?;
        let descriptors = parse_descriptors(program_info)?;

        let mut streams = Vec::new();
        let mut rest = &body[4 + program_info_length..];
        while rest.len() >= 5 {
            let es_info_length = u16::from_be_bytes([rest[3] & 0x0F, rest[4]]) as usize;
            let es_info = rest.get(5..5 + es_info_length).ok_or(TsError::InsufficientData {
                expected: es_info_length,
                actual: rest.len() - 5,
            })?;
            streams.push(PmtStream {
                stream_type: StreamType::from(rest[0]),
                elementary_pid: u16::from_be_bytes([rest[1] & 0x1F, rest[2]]),
                descriptors: parse_descriptors(es_info)?,
            });
            rest = &rest[5 + es_info_length..];
        }

        Ok(Pmt {
            program_number: section.subtable_extension,
            version_number: section.version_number,
            pcr_pid,
            descriptors,
            streams,
        })
    }

    pub fn registration_id(&self) -> Option<u32> {
        registration_id(&self.descriptors)
    }

    /// Whether `stream` carries private sections rather than PES packets.
    pub fn is_private_section(&self, stream: &PmtStream) -> bool {
        match stream.stream_type {
            StreamType::ScteDsmccDcb | StreamType::ScteSignaling => matches!(
                stream.registration_id(),
                Some(REGISTRATION_CUEI | REGISTRATION_ETV1)
            ),
            StreamType::PrivateSections
            | StreamType::Mheg
            | StreamType::DsmCc
            | StreamType::DsmccA
            | StreamType::DsmccB
            | StreamType::DsmccC
            | StreamType::DsmccD
            | StreamType::SlFlexmuxSections
            | StreamType::MetadataSections => true,
            StreamType::ScteSit => self.descriptors.iter().any(|d| {
                matches!(d, Descriptor::Registration { format_identifier, .. }
                    if *format_identifier == REGISTRATION_CUEI)
            }),
            _ => false,
        }
    }
}
