//! Structured decoders for PSI/SI tables.

pub mod cat;
pub mod eit;
pub mod nit;
pub mod pat;
pub mod pmt;
pub mod sdt;
pub mod time;

pub use cat::Cat;
pub use eit::{Eit, EitEvent};
pub use nit::{Nit, NitTransportStream};
pub use pat::{Pat, PatProgram};
pub use pmt::{Pmt, PmtStream, StreamType};
pub use sdt::{RunningStatus, Sdt, SdtService};
pub use time::{TimeDateTable, TimeOffsetTable};

use crate::Result;
use crate::section::Section;

/// A decoded section.
#[derive(Debug, Clone)]
pub enum Table {
    Pat(Pat),
    Pmt(Pmt),
    Cat(Cat),
    Nit(Nit),
    Sdt(Sdt),
    Eit(Eit),
    Tdt(TimeDateTable),
    Tot(TimeOffsetTable),
    /// Sections without a dedicated decoder (private data, ATSC, ...)
    Other(Section),
}

impl Table {
    /// Decode a section according to its table id.
    pub fn decode(section: &Section) -> Result<Table> {
        Ok(match section.table_id {
            pat::TABLE_ID_PAT => Table::Pat(Pat::parse(section)?),
            cat::TABLE_ID_CAT => Table::Cat(Cat::parse(section)?),
            pmt::TABLE_ID_PMT => Table::Pmt(Pmt::parse(section)?),
            nit::TABLE_ID_NIT_ACTUAL | nit::TABLE_ID_NIT_OTHER => Table::Nit(Nit::parse(section)?),
            sdt::TABLE_ID_SDT_ACTUAL | sdt::TABLE_ID_SDT_OTHER => Table::Sdt(Sdt::parse(section)?),
            id if Eit::is_eit_table(id) => Table::Eit(Eit::parse(section)?),
            time::TABLE_ID_TDT => Table::Tdt(TimeDateTable::parse(section)?),
            time::TABLE_ID_TOT => Table::Tot(TimeOffsetTable::parse(section)?),
            _ => Table::Other(section.clone()),
        })
    }

    pub fn name(&self) -> &'static str {
        match self {
            Table::Pat(_) => "PAT",
            Table::Pmt(_) => "PMT",
            Table::Cat(_) => "CAT",
            Table::Nit(_) => "NIT",
            Table::Sdt(_) => "SDT",
            Table::Eit(_) => "EIT",
            Table::Tdt(_) => "TDT",
            Table::Tot(_) => "TOT",
            Table::Other(_) => "private",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{build_long_section, build_pat_section};
    use bytes::Bytes;

    #[test]
    fn dispatches_on_table_id() {
        let pat = Section::parse(0, Bytes::from(build_pat_section(0, 1, &[(1, 0x100)])), 0).unwrap();
        assert!(matches!(Table::decode(&pat).unwrap(), Table::Pat(_)));

        let private = build_long_section(0xC0, 7, 0, &[1, 2, 3]);
        let section = Section::parse(0x300, Bytes::from(private), 0).unwrap();
        let table = Table::decode(&section).unwrap();
        assert_eq!(table.name(), "private");
    }
}
