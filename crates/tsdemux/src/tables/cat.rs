use crate::descriptor::{Descriptor, parse_descriptors};
use crate::section::Section;
use crate::{Result, TsError};

pub const TABLE_ID_CAT: u8 = 0x01;

/// Conditional access table
#[derive(Debug, Clone, PartialEq)]
pub struct Cat {
    pub version_number: u8,
    pub descriptors: Vec<Descriptor>,
}

impl Cat {
    pub fn parse(section: &Section) -> Result<Self> {
        if section.table_id != TABLE_ID_CAT {
            return Err(TsError::InvalidTableId {
                expected: TABLE_ID_CAT,
                actual: section.table_id,
            });
        }
        Ok(Cat {
            version_number: section.version_number,
            descriptors: parse_descriptors(section.body())?,
        })
    }

    /// EMM PIDs announced by CA descriptors.
    pub fn ca_pids(&self) -> impl Iterator<Item = (u16, u16)> + '_ {
        self.descriptors.iter().filter_map(|d| match d {
            Descriptor::ConditionalAccess {
                ca_system_id,
                ca_pid,
                ..
            } => Some((*ca_system_id, *ca_pid)),
            _ => None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::build_long_section;
    use bytes::Bytes;

    #[test]
    fn lists_ca_systems() {
        let body = [0x09, 0x04, 0x0B, 0x00, 0xE1, 0x23];
        let raw = build_long_section(TABLE_ID_CAT, 0xFFFF, 1, &body);
        let section = Section::parse(1, Bytes::from(raw), 0).unwrap();
        let cat = Cat::parse(&section).unwrap();
        assert_eq!(cat.ca_pids().collect::<Vec<_>>(), vec![(0x0B00, 0x0123)]);
    }
}
