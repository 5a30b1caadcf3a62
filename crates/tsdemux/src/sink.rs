//! Output side of the demuxer.

use std::time::Duration;

use bytes::Bytes;

use crate::Result;
use crate::registry::Program;
use crate::tables::{StreamType, Table};

/// One reassembled PES payload.
#[derive(Debug, Clone, PartialEq)]
pub struct AccessUnit {
    pub pid: u16,
    pub program_number: u16,
    /// `None` for a PCR-only PID
    pub stream_type: Option<StreamType>,
    pub registration_id: Option<u32>,
    pub stream_id: u8,
    /// Raw 33-bit values from the PES header (90kHz)
    pub raw_pts: Option<u64>,
    pub raw_dts: Option<u64>,
    /// Rollover-corrected values (90kHz)
    pub pts: Option<u64>,
    pub dts: Option<u64>,
    /// Output times from clock recovery
    pub pts_time: Option<Duration>,
    pub dts_time: Option<Duration>,
    /// Offset of the packet carrying the PES header
    pub offset: u64,
    /// First unit after a flush or continuity loss
    pub discont: bool,
    pub payload: Bytes,
}

/// Per-header statistics, reported when enabled in the config.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnitStatistics {
    pub pid: u16,
    pub offset: u64,
    pub pts: Option<u64>,
    pub dts: Option<u64>,
}

/// Receives everything the demuxer produces.
///
/// All methods default to doing nothing.
pub trait DemuxSink {
    fn program_started(&mut self, _program: &Program) {}

    fn program_stopped(&mut self, _program: &Program) {}

    fn table(&mut self, _pid: u16, _table: &Table) {}

    /// An error is logged and counted; it never stops the demuxer.
    fn access_unit(&mut self, _unit: AccessUnit) -> Result<()> {
        Ok(())
    }

    fn statistics(&mut self, _stats: UnitStatistics) {}
}

/// Everything a [`EventCollector`] saw, in order.
#[derive(Debug, Clone)]
pub enum DemuxEvent {
    ProgramStarted(Program),
    ProgramStopped(Program),
    Table { pid: u16, table: Table },
    AccessUnit(AccessUnit),
    Statistics(UnitStatistics),
}

/// Sink that records every call.
#[derive(Debug, Default)]
pub struct EventCollector {
    pub events: Vec<DemuxEvent>,
}

impl EventCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn access_units(&self) -> impl Iterator<Item = &AccessUnit> {
        self.events.iter().filter_map(|e| match e {
            DemuxEvent::AccessUnit(unit) => Some(unit),
            _ => None,
        })
    }

    pub fn started_programs(&self) -> impl Iterator<Item = &Program> {
        self.events.iter().filter_map(|e| match e {
            DemuxEvent::ProgramStarted(p) => Some(p),
            _ => None,
        })
    }

    pub fn stopped_programs(&self) -> impl Iterator<Item = &Program> {
        self.events.iter().filter_map(|e| match e {
            DemuxEvent::ProgramStopped(p) => Some(p),
            _ => None,
        })
    }

    pub fn tables(&self) -> impl Iterator<Item = (u16, &Table)> {
        self.events.iter().filter_map(|e| match e {
            DemuxEvent::Table { pid, table } => Some((*pid, table)),
            _ => None,
        })
    }

    pub fn clear(&mut self) {
        self.events.clear();
    }
}

impl DemuxSink for EventCollector {
    fn program_started(&mut self, program: &Program) {
        self.events.push(DemuxEvent::ProgramStarted(program.clone()));
    }

    fn program_stopped(&mut self, program: &Program) {
        self.events.push(DemuxEvent::ProgramStopped(program.clone()));
    }

    fn table(&mut self, pid: u16, table: &Table) {
        self.events.push(DemuxEvent::Table {
            pid,
            table: table.clone(),
        });
    }

    fn access_unit(&mut self, unit: AccessUnit) -> Result<()> {
        self.events.push(DemuxEvent::AccessUnit(unit));
        Ok(())
    }

    fn statistics(&mut self, stats: UnitStatistics) {
        self.events.push(DemuxEvent::Statistics(stats));
    }
}
