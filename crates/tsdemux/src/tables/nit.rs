use crate::descriptor::{Descriptor, parse_descriptors};
use crate::section::Section;
use crate::{Result, TsError};

pub const TABLE_ID_NIT_ACTUAL: u8 = 0x40;
pub const TABLE_ID_NIT_OTHER: u8 = 0x41;

#[derive(Debug, Clone, PartialEq)]
pub struct NitTransportStream {
    pub transport_stream_id: u16,
    pub original_network_id: u16,
    pub descriptors: Vec<Descriptor>,
}

/// Network information table
#[derive(Debug, Clone, PartialEq)]
pub struct Nit {
    pub network_id: u16,
    pub actual_network: bool,
    pub version_number: u8,
    pub descriptors: Vec<Descriptor>,
    pub transport_streams: Vec<NitTransportStream>,
}

/// Split a 12-bit length-prefixed loop off the front of `data`.
pub(crate) fn length_prefixed(data: &[u8], offset: usize) -> Result<(&[u8], &[u8])> {
    if data.len() < 2 {
        return Err(TsError::MalformedDescriptorLoop { offset });
    }
    let length = u16::from_be_bytes([data[0] & 0x0F, data[1]]) as usize;
    let rest = &data[2..];
    if rest.len() < length {
        return Err(TsError::MalformedDescriptorLoop { offset });
    }
    Ok(rest.split_at(length))
}

impl Nit {
    pub fn parse(section: &Section) -> Result<Self> {
        if !matches!(section.table_id, TABLE_ID_NIT_ACTUAL | TABLE_ID_NIT_OTHER) {
            return Err(TsError::InvalidTableId {
                expected: TABLE_ID_NIT_ACTUAL,
                actual: section.table_id,
            });
        }
        let body = section.body();
        let (network_info, rest) = length_prefixed(body, 0)?;
        let (mut ts_loop, _) = length_prefixed(rest, 2 + network_info.len())?;

        let mut transport_streams = Vec::new();
        while ts_loop.len() >= 6 {
            let (descriptors, next) = length_prefixed(&ts_loop[4..], 0)?;
            transport_streams.push(NitTransportStream {
                transport_stream_id: u16::from_be_bytes([ts_loop[0], ts_loop[1]]),
                original_network_id: u16::from_be_bytes([ts_loop[2], ts_loop[3]]),
                descriptors: parse_descriptors(descriptors)?,
            });
            ts_loop = next;
        }

        Ok(Nit {
            network_id: section.subtable_extension,
            actual_network: section.table_id == TABLE_ID_NIT_ACTUAL,
            version_number: section.version_number,
            descriptors: parse_descriptors(network_info)?,
            transport_streams,
        })
    }

    /// Network name from the first network name descriptor.
    pub fn network_name(&self) -> Option<&str> {
        self.descriptors.iter().find_map(|d| match d {
            Descriptor::NetworkName(name) => Some(name.as_str()),
            _ => None,
        })
    }
}
