use crate::descriptor::{Descriptor, parse_descriptors};
use crate::section::Section;
use crate::{Result, TsError};

pub const TABLE_ID_SDT_ACTUAL: u8 = 0x42;
pub const TABLE_ID_SDT_OTHER: u8 = 0x46;

/// Running status values shared by the SDT and EIT.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunningStatus {
    Undefined,
    NotRunning,
    StartsInAFewSeconds,
    Pausing,
    Running,
    OffAir,
    Reserved(u8),
}

impl From<u8> for RunningStatus {
    fn from(value: u8) -> Self {
        match value {
            0 => RunningStatus::Undefined,
            1 => RunningStatus::NotRunning,
            2 => RunningStatus::StartsInAFewSeconds,
            3 => RunningStatus::Pausing,
            4 => RunningStatus::Running,
            5 => RunningStatus::OffAir,
            other => RunningStatus::Reserved(other),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SdtService {
    pub service_id: u16,
    pub eit_schedule: bool,
    pub eit_present_following: bool,
    pub running_status: RunningStatus,
    pub free_ca_mode: bool,
    pub descriptors: Vec<Descriptor>,
}

impl SdtService {
    /// (provider, name) from the service descriptor.
    pub fn names(&self) -> Option<(&str, &str)> {
        self.descriptors.iter().find_map(|d| match d {
            Descriptor::Service {
                provider_name,
                service_name,
                ..
            } => Some((provider_name.as_str(), service_name.as_str())),
            _ => None,
        })
    }
}

/// Service description table
#[derive(Debug, Clone, PartialEq)]
pub struct Sdt {
    pub transport_stream_id: u16,
    pub original_network_id: u16,
    pub actual_ts: bool,
    pub version_number: u8,
    pub services: Vec<SdtService>,
}

impl Sdt {
    pub fn parse(section: &Section) -> Result<Self> {
        if !matches!(section.table_id, TABLE_ID_SDT_ACTUAL | TABLE_ID_SDT_OTHER) {
            return Err(TsError::InvalidTableId {
                expected: TABLE_ID_SDT_ACTUAL,
                actual: section.table_id,
            });
        }
        let body = section.body();
        if body.len() < 3 {
            return Err(TsError::InsufficientData {
                expected: 3,
                actual: body.len(),
            });
        }

        let mut services = Vec::new();
        let mut rest = &body[3..];
        while rest.len() >= 5 {
            let loop_length = u16::from_be_bytes([rest[3] & 0x0F, rest[4]]) as usize;
            let descriptors = rest
                .get(5..5 + loop_length)
                .ok_or(TsError::MalformedDescriptorLoop {
                    offset: body.len() - rest.len() + 5,
                })?;
            services.push(SdtService {
                service_id: u16::from_be_bytes([rest[0], rest[1]]),
                eit_schedule: rest[2] & 0x02 != 0,
                eit_present_following: rest[2] & 0x01 != 0,
                running_status: RunningStatus::from(rest[3] >> 5),
                free_ca_mode: rest[3] & 0x10 != 0,
                descriptors: parse_descriptors(descriptors)?,
            });
            rest = &rest[5 + loop_length..];
        }

        Ok(Sdt {
            transport_stream_id: section.subtable_extension,
            original_network_id: u16::from_be_bytes([body[0], body[1]]),
            actual_ts: section.table_id == TABLE_ID_SDT_ACTUAL,
            version_number: section.version_number,
            services,
        })
    }
}
