//! Per-stream PES reassembly.
//!
//! Payload packets are collected from one payload unit start to the next.
//! Bounded PES packets are emitted as soon as their declared size is in,
//! unbounded ones (video) when the next unit starts or the stream drains.

use std::time::Duration;

use bytes::{Bytes, BytesMut};
use tracing::{debug, trace, warn};

use crate::clock::mpeg_to_ns;
use crate::packet::TsPacket;
use crate::pes::PesHeader;
use crate::sink::{AccessUnit, UnitStatistics};
use crate::tables::StreamType;
use crate::timestamp::RolloverTracker;
use crate::TsError;

/// Units growing past this are pushed out early.
pub const MAX_PES_PAYLOAD: usize = 32 * 1024 * 1024;

/// Initial buffer for unbounded PES packets.
const MIN_ALLOCATION: usize = 8192;

/// PTS further than this from the DTS (5s at 90kHz) is replaced by the DTS.
const MAX_PTS_DTS_DIFF: u64 = 5 * 90_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PesState {
    /// Waiting for a payload unit start
    Empty,
    /// Payload unit start seen, header not parsed yet
    Header,
    /// Collecting payload
    Buffer,
    /// Sync lost, dropping payload until the next unit start
    Discont,
}

/// What a pushed packet produced.
#[derive(Debug, Clone, PartialEq)]
pub enum EsOutput {
    Unit(AccessUnit),
    Statistics(UnitStatistics),
}

/// Reassembly state for one elementary stream PID.
#[derive(Debug)]
pub struct EsAccumulator {
    pid: u16,
    program_number: u16,
    stream_type: Option<StreamType>,
    registration_id: Option<u32>,

    state: PesState,
    continuity_counter: Option<u8>,
    pending_header: BytesMut,
    data: BytesMut,
    /// 0 when unbounded
    expected_size: usize,
    discont: bool,

    stream_id: u8,
    offset: u64,
    raw_pts: Option<u64>,
    raw_dts: Option<u64>,
    pts: Option<u64>,
    dts: Option<u64>,
    pts_time: Option<Duration>,
    dts_time: Option<Duration>,
    pts_rollover: RolloverTracker,
    dts_rollover: RolloverTracker,
}

impl EsAccumulator {
    pub fn new(
        pid: u16,
        program_number: u16,
        stream_type: Option<StreamType>,
        registration_id: Option<u32>,
    ) -> Self {
        Self {
            pid,
            program_number,
            stream_type,
            registration_id,
            state: PesState::Empty,
            continuity_counter: None,
            pending_header: BytesMut::new(),
            data: BytesMut::new(),
            expected_size: 0,
            discont: true,
            stream_id: 0,
            offset: 0,
            raw_pts: None,
            raw_dts: None,
            pts: None,
            dts: None,
            pts_time: None,
            dts_time: None,
            pts_rollover: RolloverTracker::new(),
            dts_rollover: RolloverTracker::new(),
        }
    }

    pub fn pid(&self) -> u16 {
        self.pid
    }

    pub fn program_number(&self) -> u16 {
        self.program_number
    }

    pub fn state(&self) -> PesState {
        self.state
    }

    /// Bytes collected for the current unit.
    pub fn buffered(&self) -> usize {
        self.data.len()
    }

    pub fn pts_rollovers(&self) -> u64 {
        self.pts_rollover.rollovers()
    }

    /// Feed one packet of this PID.
    ///
    /// `to_time` maps a corrected timestamp in nanoseconds to output time.
    pub fn push(
        &mut self,
        packet: &TsPacket,
        to_time: &mut dyn FnMut(u64) -> Option<u64>,
    ) -> Vec<EsOutput> {
        let mut out = Vec::new();

        if packet.payload_unit_start_indicator && packet.has_payload() {
            out.extend(self.take_unit().map(EsOutput::Unit));
            // drop any header cut short by this start
            self.pending_header.clear();
            self.clear_timestamps();
            self.state = PesState::Header;
        }

        let Some(payload) = packet.payload.as_ref() else {
            return out;
        };
        self.queue(packet, payload, to_time, &mut out);

        if (self.expected_size > 0 && self.data.len() >= self.expected_size)
            || self.data.len() >= MAX_PES_PAYLOAD
        {
            trace!(pid = self.pid, size = self.data.len(), "PES complete");
            out.extend(self.take_unit().map(EsOutput::Unit));
        }
        out
    }

    /// Emit whatever is pending, complete or not.
    pub fn drain(&mut self) -> Option<AccessUnit> {
        self.take_unit()
    }

    /// Drop the partial unit. A hard flush also forgets rollover history.
    pub fn flush(&mut self, hard: bool) {
        self.state = PesState::Empty;
        self.continuity_counter = None;
        self.pending_header.clear();
        self.data = BytesMut::new();
        self.expected_size = 0;
        self.discont = true;
        self.clear_timestamps();
        if hard {
            self.pts_rollover.reset();
            self.dts_rollover.reset();
        }
    }

    fn clear_timestamps(&mut self) {
        self.raw_pts = None;
        self.raw_dts = None;
        self.pts = None;
        self.dts = None;
        self.pts_time = None;
        self.dts_time = None;
    }

    fn queue(
        &mut self,
        packet: &TsPacket,
        payload: &Bytes,
        to_time: &mut dyn FnMut(u64) -> Option<u64>,
        out: &mut Vec<EsOutput>,
    ) {
        let cc = packet.continuity_counter;
        if let Some(prev) = self.continuity_counter
            && cc != (prev + 1) & 0x0F
            && self.state != PesState::Empty
        {
            if packet.payload_unit_start_indicator {
                // a new unit starts here, nothing to recover from
                self.data.clear();
                self.pending_header.clear();
                self.state = PesState::Header;
            } else {
                warn!(
                    pid = self.pid,
                    expected = (prev + 1) & 0x0F,
                    got = cc,
                    "continuity mismatch, dropping PES"
                );
                self.state = PesState::Discont;
            }
        }
        self.continuity_counter = Some(cc);

        if self.state == PesState::Empty {
            if packet.payload_unit_start_indicator {
                self.state = PesState::Header;
            } else {
                debug!(pid = self.pid, "missed the start of this PES");
                self.state = PesState::Discont;
            }
        }

        match self.state {
            PesState::Header => self.parse_header(packet.offset, payload, to_time, out),
            PesState::Buffer => {
                if self.data.capacity() == 0 {
                    self.data.reserve(MIN_ALLOCATION.max(payload.len()));
                }
                self.data.extend_from_slice(payload);
            }
            PesState::Discont => {
                self.data.clear();
                self.pending_header.clear();
                self.continuity_counter = None;
                self.discont = true;
            }
            PesState::Empty => {}
        }
    }

    fn parse_header(
        &mut self,
        offset: u64,
        payload: &Bytes,
        to_time: &mut dyn FnMut(u64) -> Option<u64>,
        out: &mut Vec<EsOutput>,
    ) {
        let buf = if self.pending_header.is_empty() {
            payload.clone()
        } else {
            self.pending_header.extend_from_slice(payload);
            self.pending_header.split().freeze()
        };

        let header = match PesHeader::parse(&buf) {
            Ok(header) => header,
            Err(TsError::InsufficientData { .. }) => {
                // header spans packets
                self.pending_header.extend_from_slice(&buf);
                return;
            }
            Err(e) => {
                warn!(pid = self.pid, stream_type = ?self.stream_type, error = %e, "error parsing PES header");
                self.state = PesState::Discont;
                self.discont = true;
                return;
            }
        };

        self.record_timestamps(&header, to_time);
        if self.raw_pts.is_some() || self.raw_dts.is_some() {
            out.push(EsOutput::Statistics(UnitStatistics {
                pid: self.pid,
                offset,
                pts: self.raw_pts,
                dts: self.raw_dts,
            }));
        }

        self.stream_id = header.stream_id;
        self.offset = offset;
        self.expected_size = header.payload_size().unwrap_or(0);
        if header.packet_length != 0 && self.expected_size == 0 {
            warn!(pid = self.pid, "PES header fills the whole packet");
        }

        let rest = &buf[header.header_size..];
        let capacity = match self.expected_size {
            0 => MIN_ALLOCATION.max(rest.len()),
            n => n.max(rest.len()),
        };
        self.data = BytesMut::with_capacity(capacity);
        self.data.extend_from_slice(rest);
        self.state = PesState::Buffer;
    }

    fn record_timestamps(
        &mut self,
        header: &PesHeader,
        to_time: &mut dyn FnMut(u64) -> Option<u64>,
    ) {
        let mut convert = |v: u64| to_time(mpeg_to_ns(v)).map(Duration::from_nanos);

        self.raw_dts = header.dts;
        self.dts = header.dts.map(|v| self.dts_rollover.update(v));
        self.dts_time = self.dts.and_then(&mut convert);

        self.raw_pts = header.pts;
        self.pts = header.pts.map(|v| self.pts_rollover.update(v));
        self.pts_time = self.pts.and_then(&mut convert);

        if let (Some(pts), Some(dts)) = (self.pts, self.dts)
            && pts.abs_diff(dts) > MAX_PTS_DTS_DIFF
        {
            warn!(
                pid = self.pid,
                pts, dts, "PTS differs too much against DTS, using DTS"
            );
            self.raw_pts = self.raw_dts;
            self.pts = self.dts;
            self.pts_time = self.dts_time;
        }
        trace!(pid = self.pid, pts = ?self.pts, dts = ?self.dts, "PES timestamps");
    }

    fn take_unit(&mut self) -> Option<AccessUnit> {
        if self.state != PesState::Buffer || self.data.is_empty() {
            return None;
        }
        let payload = self.data.split().freeze();
        let size = payload.len();
        if self.expected_size > 0 {
            if size >= self.expected_size {
                self.expected_size = 0;
                self.state = PesState::Empty;
            } else {
                self.expected_size -= size;
            }
        }
        let unit = AccessUnit {
            pid: self.pid,
            program_number: self.program_number,
            stream_type: self.stream_type,
            registration_id: self.registration_id,
            stream_id: self.stream_id,
            raw_pts: self.raw_pts,
            raw_dts: self.raw_dts,
            pts: self.pts,
            dts: self.dts,
            pts_time: self.pts_time,
            dts_time: self.dts_time,
            offset: self.offset,
            discont: std::mem::take(&mut self.discont),
            payload,
        };
        // a continuation of the same PES carries no timestamps
        self.clear_timestamps();
        Some(unit)
    }
}
