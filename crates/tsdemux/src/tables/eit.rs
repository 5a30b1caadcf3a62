use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::descriptor::{Descriptor, parse_descriptors};
use crate::section::Section;
use crate::tables::sdt::RunningStatus;
use crate::tables::time::{parse_bcd_duration, parse_utc_time};
use crate::{Result, TsError};

pub const TABLE_ID_EIT_ACTUAL_PF: u8 = 0x4E;
pub const TABLE_ID_EIT_OTHER_PF: u8 = 0x4F;
pub const TABLE_ID_EIT_SCHEDULE_FIRST: u8 = 0x50;
pub const TABLE_ID_EIT_SCHEDULE_LAST: u8 = 0x6F;

#[derive(Debug, Clone, PartialEq)]
pub struct EitEvent {
    pub event_id: u16,
    /// `None` when the start time is left undefined
    pub start_time: Option<DateTime<Utc>>,
    pub duration: Option<Duration>,
    pub running_status: RunningStatus,
    pub free_ca_mode: bool,
    pub descriptors: Vec<Descriptor>,
}

impl EitEvent {
    /// (event name, text) from the first short event descriptor.
    pub fn short_event(&self) -> Option<(&str, &str)> {
        self.descriptors.iter().find_map(|d| match d {
            Descriptor::ShortEvent {
                event_name, text, ..
            } => Some((event_name.as_str(), text.as_str())),
            _ => None,
        })
    }
}

/// Event information table
#[derive(Debug, Clone, PartialEq)]
pub struct Eit {
    pub table_id: u8,
    pub service_id: u16,
    pub transport_stream_id: u16,
    pub original_network_id: u16,
    pub version_number: u8,
    pub segment_last_section_number: u8,
    pub last_table_id: u8,
    pub events: Vec<EitEvent>,
}

impl Eit {
    pub fn is_eit_table(table_id: u8) -> bool {
        (TABLE_ID_EIT_ACTUAL_PF..=TABLE_ID_EIT_SCHEDULE_LAST).contains(&table_id)
    }

    pub fn parse(section: &Section) -> Result<Self> {
        if !Self::is_eit_table(section.table_id) {
            return Err(TsError::InvalidTableId {
                expected: TABLE_ID_EIT_ACTUAL_PF,
                actual: section.table_id,
            });
        }
        let body = section.body();
        if body.len() < 6 {
            return Err(TsError::InsufficientData {
                expected: 6,
                actual: body.len(),
            });
        }

        let mut events = Vec::new();
        let mut rest = &body[6..];
        while rest.len() >= 12 {
            let loop_length = u16::from_be_bytes([rest[10] & 0x0F, rest[11]]) as usize;
            let descriptors = rest
                .get(12..12 + loop_length)
                .ok_or(TsError::MalformedDescriptorLoop {
                    offset: body.len() - rest.len() + 12,
                })?;
            events.push(EitEvent {
                event_id: u16::from_be_bytes([rest[0], rest[1]]),
                start_time: parse_utc_time(&rest[2..7]),
                duration: parse_bcd_duration(&rest[7..10]),
                running_status: RunningStatus::from(rest[10] >> 5),
                free_ca_mode: rest[10] & 0x10 != 0,
                descriptors: parse_descriptors(descriptors)?,
            });
            rest = &rest[12 + loop_length..];
        }

        Ok(Eit {
            table_id: section.table_id,
            service_id: section.subtable_extension,
            transport_stream_id: u16::from_be_bytes([body[0], body[1]]),
            original_network_id: u16::from_be_bytes([body[2], body[3]]),
            version_number: section.version_number,
            segment_last_section_number: body[4],
            last_table_id: body[5],
            events,
        })
    }

    /// Present/following table (as opposed to a schedule).
    pub fn present_following(&self) -> bool {
        matches!(self.table_id, TABLE_ID_EIT_ACTUAL_PF | TABLE_ID_EIT_OTHER_PF)
    }

    pub fn actual_stream(&self) -> bool {
        self.table_id == TABLE_ID_EIT_ACTUAL_PF
            || (TABLE_ID_EIT_SCHEDULE_FIRST..=0x5F).contains(&self.table_id)
    }

    /// The event currently flagged as running.
    pub fn running_event(&self) -> Option<&EitEvent> {
        self.events
            .iter()
            .find(|e| e.running_status == RunningStatus::Running)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{EitEventSpec, build_eit_section};
    use bytes::Bytes;
    use chrono::Timelike;

    #[test]
    fn parses_present_following() {
        let raw = build_eit_section(
            TABLE_ID_EIT_ACTUAL_PF,
            1,
            0,
            &[
                EitEventSpec {
                    event_id: 0x0100,
                    start: [0xC0, 0x79, 0x12, 0x45, 0x00],
                    duration: [0x00, 0x30, 0x00],
                    running_status: 4,
                    name: "News",
                    text: "Headlines",
                },
                EitEventSpec {
                    event_id: 0x0101,
                    start: [0xC0, 0x79, 0x13, 0x15, 0x00],
                    duration: [0x01, 0x00, 0x00],
                    running_status: 1,
                    name: "Film",
                    text: "",
                },
            ],
        );
        let section = Section::parse(0x12, Bytes::from(raw), 0).unwrap();
        let eit = Eit::parse(&section).unwrap();
        assert_eq!(eit.service_id, 1);
        assert!(eit.present_following());
        assert!(eit.actual_stream());
        assert_eq!(eit.events.len(), 2);
        let running = eit.running_event().unwrap();
        assert_eq!(running.event_id, 0x0100);
        assert_eq!(running.duration, Some(Duration::from_secs(1800)));
        assert_eq!(running.start_time.unwrap().minute(), 45);
        assert_eq!(running.short_event(), Some(("News", "Headlines")));
    }

    #[test]
    fn schedule_tables() {
        let raw = build_eit_section(0x61, 9, 0, &[]);
        let section = Section::parse(0x12, Bytes::from(raw), 0).unwrap();
        let eit = Eit::parse(&section).unwrap();
        assert!(!eit.present_following());
        assert!(!eit.actual_stream());
        assert!(eit.events.is_empty());
    }
}
