use crate::section::Section;
use crate::{Result, TsError};

pub const TABLE_ID_PAT: u8 = 0x00;

/// One PAT entry. Program number 0 points at the network PID.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PatProgram {
    pub program_number: u16,
    pub pmt_pid: u16,
}

/// Program association table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pat {
    pub transport_stream_id: u16,
    pub version_number: u8,
    pub programs: Vec<PatProgram>,
}

impl Pat {
    pub fn parse(section: &Section) -> Result<Self> {
        if section.table_id != TABLE_ID_PAT {
            return Err(TsError::InvalidTableId {
                expected: TABLE_ID_PAT,
                actual: section.table_id,
            });
        }
        if section.short_section {
            return Err(TsError::ParseError(
                "PAT must have section syntax indicator set".to_string(),
            ));
        }
        let body = section.body();
        if body.len() % 4 != 0 {
            return Err(TsError::InvalidSectionLength(section.data.len() as u16 - 3));
        }
        let programs = body
            .chunks_exact(4)
            .map(|c| PatProgram {
                program_number: u16::from_be_bytes([c[0], c[1]]),
                pmt_pid: u16::from_be_bytes([c[2] & 0x1F, c[3]]),
            })
            .collect();
        Ok(Pat {
            transport_stream_id: u16::from_be_bytes([section.data[3], section.data[4]]),
            version_number: section.version_number,
            programs,
        })
    }

    /// PMT PID announced for `program_number`.
    pub fn pmt_pid(&self, program_number: u16) -> Option<u16> {
        self.programs
            .iter()
            .find(|p| p.program_number == program_number)
            .map(|p| p.pmt_pid)
    }
}
