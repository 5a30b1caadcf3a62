//! The demuxer: ties the packetizer, the program registry and the PES
//! reassemblers together.
//!
//! Bytes come in either pushed by the caller ([`TsDemuxer::push`]) or pulled
//! from a seekable [`ByteSource`] ([`TsDemuxer::scan`] followed by
//! [`TsDemuxer::pull_next`]). Everything produced goes to a [`DemuxSink`].

use std::collections::BTreeMap;
use std::io::{Read, Seek, SeekFrom};
use std::time::Duration;

use bytes::Bytes;
use tracing::{debug, info, trace, warn};

use crate::config::{ClockMode, DemuxConfig};
use crate::packet::{PID_NULL, TsPacket};
use crate::packetizer::{PacketResult, Packetizer};
use crate::reassembler::{EsAccumulator, EsOutput};
use crate::registry::{Program, ProgramEvent, Registry, Stream};
use crate::section::Section;
use crate::sink::{AccessUnit, DemuxSink};
use crate::tables::{StreamType, Table};
use crate::{Result, TsError};

/// Size of one read while scanning the head of a pull source.
const SCAN_CHUNK: usize = 65536;
/// Head reads before giving up on finding a PCR.
const SCAN_HEAD_CHUNKS: u64 = 10;
/// PCR observations that end the head scan early.
const SCAN_HEAD_PCRS: usize = 5;
/// Size of one backwards read at the tail (300 packets of 188 bytes).
const SCAN_TAIL_CHUNK: usize = 56400;
/// How far back from the end the tail scan goes.
const SCAN_TAIL_SPAN: u64 = 640 * 1024;
/// Packets per pull-mode read.
const PULL_PACKETS: usize = 100;

/// A range of input bytes.
#[derive(Debug, Clone)]
pub struct InputRange {
    /// Stream offset of the first byte
    pub offset: u64,
    pub data: Bytes,
    /// Arrival time of the range, for clock recovery on live input
    pub arrival: Option<Duration>,
    /// The range does not follow the previous one
    pub discont: bool,
}

impl InputRange {
    pub fn new(offset: u64, data: impl Into<Bytes>) -> Self {
        Self {
            offset,
            data: data.into(),
            arrival: None,
            discont: false,
        }
    }

    pub fn with_arrival(mut self, arrival: Duration) -> Self {
        self.arrival = Some(arrival);
        self
    }

    pub fn with_discont(mut self) -> Self {
        self.discont = true;
        self
    }
}

/// Random-access byte input for pull mode.
pub trait ByteSource {
    /// Total size in bytes.
    fn size(&mut self) -> Result<u64>;

    /// Read up to `len` bytes at `offset`. Returns fewer bytes near the end
    /// and nothing at or past it.
    fn read_at(&mut self, offset: u64, len: usize) -> Result<Bytes>;
}

impl ByteSource for Bytes {
    fn size(&mut self) -> Result<u64> {
        Ok(self.len() as u64)
    }

    fn read_at(&mut self, offset: u64, len: usize) -> Result<Bytes> {
        let start = usize::try_from(offset).unwrap_or(usize::MAX).min(self.len());
        let end = start.saturating_add(len).min(self.len());
        Ok(self.slice(start..end))
    }
}

/// [`ByteSource`] over anything readable and seekable, such as a file.
#[derive(Debug)]
pub struct ReaderSource<R> {
    inner: R,
}

impl<R: Read + Seek> ReaderSource<R> {
    pub fn new(inner: R) -> Self {
        Self { inner }
    }

    pub fn into_inner(self) -> R {
        self.inner
    }
}

impl<R: Read + Seek> ByteSource for ReaderSource<R> {
    fn size(&mut self) -> Result<u64> {
        Ok(self.inner.seek(SeekFrom::End(0))?)
    }

    fn read_at(&mut self, offset: u64, len: usize) -> Result<Bytes> {
        self.inner.seek(SeekFrom::Start(offset))?;
        let mut buf = vec![0u8; len];
        let mut filled = 0;
        while filled < len {
            match self.inner.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e.into()),
            }
        }
        buf.truncate(filled);
        Ok(Bytes::from(buf))
    }
}

/// Reassembly state of one exposed PES stream.
#[derive(Debug)]
struct DemuxStream {
    accumulator: EsAccumulator,
    stream_type: Option<StreamType>,
    pcr_pid: u16,
}

impl DemuxStream {
    fn new(stream: &Stream, pcr_pid: u16) -> Self {
        Self {
            accumulator: EsAccumulator::new(
                stream.pid,
                stream.program_number,
                stream.stream_type,
                stream.registration_id,
            ),
            stream_type: stream.stream_type,
            pcr_pid,
        }
    }
}

/// MPEG transport stream demuxer.
#[derive(Debug)]
pub struct TsDemuxer {
    config: DemuxConfig,
    packetizer: Packetizer,
    registry: Registry,
    streams: BTreeMap<u16, DemuxStream>,
    /// Next pull-mode read position
    read_offset: u64,
    /// First packet boundary found by the scan, seeks align to it
    sync_offset: u64,
    pull_packet_size: Option<usize>,
    sink_errors: u64,
}

impl Default for TsDemuxer {
    fn default() -> Self {
        Self::new(DemuxConfig::default())
    }
}

impl TsDemuxer {
    pub fn new(config: DemuxConfig) -> Self {
        let packetizer = Packetizer::new(&config);
        let registry = Registry::new(config.ignore_pcr, config.parse_private_sections);
        Self {
            config,
            packetizer,
            registry,
            streams: BTreeMap::new(),
            read_offset: 0,
            sync_offset: 0,
            pull_packet_size: None,
            sink_errors: 0,
        }
    }

    pub fn config(&self) -> &DemuxConfig {
        &self.config
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn packetizer(&self) -> &Packetizer {
        &self.packetizer
    }

    pub fn programs(&self) -> impl Iterator<Item = &Program> {
        self.registry.programs()
    }

    /// Access units the sink refused so far.
    pub fn sink_errors(&self) -> u64 {
        self.sink_errors
    }

    /// Next pull-mode read position.
    pub fn read_offset(&self) -> u64 {
        self.read_offset
    }

    fn is_pull(&self) -> bool {
        self.pull_packet_size.is_some()
    }

    /// Feed one range of bytes.
    ///
    /// Damaged packets, sections and PES headers are logged and skipped.
    /// Fails only when no packet size can be found in the input.
    pub fn push(&mut self, range: InputRange, sink: &mut dyn DemuxSink) -> Result<()> {
        if range.discont {
            debug!(offset = range.offset, "discontinuity, draining");
            self.drain(sink);
            self.flush_streams(false);
            if self.is_pull() {
                self.packetizer.flush(false);
            } else {
                // sections are delivered again so a changed PAT/PMT is noticed
                self.packetizer.clear();
            }
        }

        let arrival = range
            .arrival
            .map(|t| u64::try_from(t.as_nanos()).unwrap_or(u64::MAX));
        self.packetizer.push(&range.data, range.offset, arrival);

        loop {
            match self.packetizer.next_packet() {
                PacketResult::NeedMore => break,
                PacketResult::Bad => continue,
                PacketResult::Packet(packet) => self.handle_packet(packet, sink),
            }
        }

        if self.packetizer.discovery_exhausted() {
            return Err(TsError::PacketSizeNotFound(self.packetizer.discarded() as u64));
        }
        Ok(())
    }

    fn handle_packet(&mut self, packet: TsPacket, sink: &mut dyn DemuxSink) {
        let pid = packet.pid;
        if self.registry.is_pes(pid) {
            self.handle_pes(packet, sink);
        } else if packet.has_payload() && self.registry.is_psi(pid) {
            for section in self.packetizer.push_section(&packet) {
                self.handle_section(section, sink);
            }
        } else {
            trace!(pid, offset = packet.offset, "ignoring packet");
        }
    }

    fn handle_pes(&mut self, packet: TsPacket, sink: &mut dyn DemuxSink) {
        let Some(stream) = self.streams.get_mut(&packet.pid) else {
            return;
        };
        let pcr_pid = stream.pcr_pid;
        let packetizer = &mut self.packetizer;
        let outputs = stream
            .accumulator
            .push(&packet, &mut |ns| packetizer.pts_to_ts(ns, pcr_pid));

        for output in outputs {
            match output {
                EsOutput::Unit(unit) => self.emit_unit(unit, sink),
                EsOutput::Statistics(stats) => {
                    if self.config.emit_statistics {
                        sink.statistics(stats);
                    }
                }
            }
        }
    }

    fn emit_unit(&mut self, unit: AccessUnit, sink: &mut dyn DemuxSink) {
        let pid = unit.pid;
        if let Err(e) = sink.access_unit(unit) {
            self.sink_errors += 1;
            warn!(pid, error = %e, "sink rejected access unit");
        }
    }

    fn handle_section(&mut self, section: Section, sink: &mut dyn DemuxSink) {
        let table = match Table::decode(&section) {
            Ok(table) => table,
            Err(e) => {
                warn!(
                    pid = section.pid,
                    table_id = section.table_id,
                    error = %e,
                    "dropping undecodable section"
                );
                return;
            }
        };
        trace!(pid = section.pid, table = table.name(), "table");

        match &table {
            Table::Pat(pat) => {
                if !self.registry.seen_pat() {
                    self.packetizer.set_reference_offset(section.offset);
                }
                let events = self.registry.apply_pat(pat.clone());
                self.handle_program_events(events, sink);
            }
            Table::Pmt(pmt) => match self.registry.apply_pmt(section.pid, pmt.clone()) {
                Ok(events) => self.handle_program_events(events, sink),
                Err(TsError::PmtBeforePat(pid)) => {
                    debug!(pid, "PMT before PAT, waiting for it to repeat");
                    self.packetizer.remove_stream(pid);
                }
                Err(e) => debug!(pid = section.pid, error = %e, "PMT not applied"),
            },
            Table::Eit(eit) => {
                self.registry.apply_eit(eit);
            }
            _ => {}
        }

        sink.table(section.pid, &table);
    }

    fn handle_program_events(&mut self, events: Vec<ProgramEvent>, sink: &mut dyn DemuxSink) {
        for event in events {
            match event {
                ProgramEvent::Started(program) => self.start_program(&program, sink),
                ProgramEvent::Stopped(program) => self.stop_program(&program, sink),
                ProgramEvent::PidReleased(pid) => self.packetizer.remove_stream(pid),
            }
        }
    }

    fn start_program(&mut self, program: &Program, sink: &mut dyn DemuxSink) {
        if !self.config.wants_program(program.program_number) {
            debug!(program = program.program_number, "program not selected");
            return;
        }
        info!(
            program = program.program_number,
            pcr_pid = program.pcr_pid,
            streams = program.streams.len(),
            "program started"
        );

        for stream in program.pes_streams().filter(|s| s.stream_type.is_some()) {
            if let Some(existing) = self.streams.get_mut(&stream.pid)
                && existing.accumulator.program_number() == program.program_number
                && existing.stream_type == stream.stream_type
            {
                existing.pcr_pid = program.pcr_pid;
                continue;
            }
            if let Some(mut old) = self.streams.remove(&stream.pid)
                && let Some(unit) = old.accumulator.drain()
            {
                self.emit_unit(unit, sink);
            }
            debug!(pid = stream.pid, stream_type = ?stream.stream_type, "adding stream");
            self.streams
                .insert(stream.pid, DemuxStream::new(stream, program.pcr_pid));
        }
        sink.program_started(program);
    }

    fn stop_program(&mut self, program: &Program, sink: &mut dyn DemuxSink) {
        for stream in &program.streams {
            // still listed by a running program
            if self.registry.is_pes(stream.pid) {
                continue;
            }
            if let Some(mut old) = self.streams.remove(&stream.pid) {
                debug!(pid = stream.pid, "removing stream");
                if let Some(unit) = old.accumulator.drain() {
                    self.emit_unit(unit, sink);
                }
            }
        }
        if self.config.wants_program(program.program_number) {
            info!(program = program.program_number, "program stopped");
            sink.program_stopped(program);
        }
    }

    /// Emit every pending unit, complete or not.
    pub fn drain(&mut self, sink: &mut dyn DemuxSink) {
        let units: Vec<AccessUnit> = self
            .streams
            .values_mut()
            .filter_map(|s| s.accumulator.drain())
            .collect();
        for unit in units {
            self.emit_unit(unit, sink);
        }
    }

    fn flush_streams(&mut self, hard: bool) {
        for stream in self.streams.values_mut() {
            stream.accumulator.flush(hard);
        }
    }

    /// Drop partial state.
    ///
    /// A soft flush keeps programs, PCR observations and timestamp rollover
    /// history; a hard flush starts over from nothing without telling the
    /// sink. Use [`TsDemuxer::reset`] to have programs reported as stopped.
    pub fn flush(&mut self, hard: bool) {
        debug!(hard, "flushing demuxer");
        self.flush_streams(hard);
        self.packetizer.flush(hard);
        if hard {
            self.packetizer.clear();
            self.registry.reset();
            self.streams.clear();
            self.read_offset = 0;
            self.sync_offset = 0;
            self.pull_packet_size = None;
        }
    }

    /// Drain, stop every program, then hard flush.
    pub fn reset(&mut self, sink: &mut dyn DemuxSink) {
        self.drain(sink);
        let events = self.registry.deactivate_all();
        self.handle_program_events(events, sink);
        self.flush(true);
    }

    /// Locate the PCR range of a seekable source.
    ///
    /// Reads the head until a few PCRs are seen, then walks backwards from
    /// the end until a later PCR shows up. Afterwards the demuxer is in pull
    /// mode and [`TsDemuxer::pull_next`] starts at the first packet.
    pub fn scan<S: ByteSource + ?Sized>(&mut self, source: &mut S) -> Result<()> {
        self.packetizer.set_clock_mode(ClockMode::Offset);
        self.config.clock_mode = ClockMode::Offset;

        let mut sync = None;
        let mut head_read = 0u64;
        'head: for i in 0..SCAN_HEAD_CHUNKS {
            let offset = i * SCAN_CHUNK as u64;
            let data = source.read_at(offset, SCAN_CHUNK)?;
            if data.is_empty() {
                break;
            }
            head_read += data.len() as u64;
            self.packetizer.push(&data, offset, None);
            if !self.packetizer.has_packets() {
                continue;
            }
            if sync.is_none() {
                sync = Some((self.packetizer.offset(), self.packetizer.packet_size()));
            }
            loop {
                match self.packetizer.next_packet() {
                    PacketResult::NeedMore => break,
                    PacketResult::Bad => {}
                    PacketResult::Packet(_) => {
                        if self.packetizer.clock().observations() >= SCAN_HEAD_PCRS {
                            break 'head;
                        }
                    }
                }
            }
        }

        let Some((sync_offset, Some(packet_size))) = sync else {
            self.packetizer.clear();
            return Err(TsError::PacketSizeNotFound(head_read));
        };

        let initial = self.packetizer.clock().observations();
        if initial == 0 {
            self.packetizer.clear();
            return Err(TsError::NoInitialPcr(SCAN_HEAD_CHUNKS * SCAN_CHUNK as u64));
        }
        debug!(initial, "PCRs found at the head");

        let size = source.size()?;
        let limit = size.saturating_sub(SCAN_TAIL_SPAN);
        let mut pos = size.saturating_sub(SCAN_TAIL_CHUNK as u64);
        while pos >= limit {
            self.packetizer.clear();
            let data = source.read_at(pos, SCAN_TAIL_CHUNK)?;
            if data.is_empty() {
                break;
            }
            self.packetizer.push(&data, pos, None);
            // the whole chunk is read so the last PCR in it is kept
            if self.packetizer.has_packets() {
                while !matches!(self.packetizer.next_packet(), PacketResult::NeedMore) {}
            }
            if self.packetizer.clock().observations() > initial || pos == 0 {
                break;
            }
            pos = pos.saturating_sub(SCAN_TAIL_CHUNK as u64);
        }
        self.packetizer.clear();

        if self.packetizer.clock().reference_offset().is_none() {
            self.packetizer.set_reference_offset(sync_offset);
        }
        info!(
            observations = self.packetizer.clock().observations(),
            sync_offset, packet_size, "scan done"
        );
        self.sync_offset = sync_offset;
        self.read_offset = sync_offset;
        self.pull_packet_size = Some(packet_size);
        Ok(())
    }

    /// Read and demux the next block of a pull source.
    ///
    /// Returns `false` once the end is reached; pending units are drained
    /// then.
    pub fn pull_next<S: ByteSource + ?Sized>(
        &mut self,
        source: &mut S,
        sink: &mut dyn DemuxSink,
    ) -> Result<bool> {
        let packet_size = self
            .packetizer
            .packet_size()
            .or(self.pull_packet_size)
            .unwrap_or(crate::packet::TS_PACKET_SIZE);
        if self.pull_packet_size.is_none() {
            self.pull_packet_size = Some(packet_size);
        }

        let data = source.read_at(self.read_offset, packet_size * PULL_PACKETS)?;
        if data.is_empty() {
            debug!(offset = self.read_offset, "end of source");
            self.drain(sink);
            return Ok(false);
        }
        let offset = self.read_offset;
        self.read_offset += data.len() as u64;
        self.push(InputRange::new(offset, data), sink)?;
        Ok(true)
    }

    /// Pull until the source is exhausted.
    pub fn pull_all<S: ByteSource + ?Sized>(
        &mut self,
        source: &mut S,
        sink: &mut dyn DemuxSink,
    ) -> Result<()> {
        while self.pull_next(source, sink)? {}
        Ok(())
    }

    /// PID whose PCRs drive time/offset conversions.
    fn clock_pid(&self) -> Option<u16> {
        let selected = self
            .registry
            .programs()
            .filter(|p| p.active && p.pcr_pid != PID_NULL)
            .find(|p| self.config.wants_program(p.program_number))
            .map(|p| p.pcr_pid);
        selected.or_else(|| self.packetizer.clock().pids().first().copied())
    }

    /// Stream time at byte `offset`.
    pub fn offset_to_time(&self, offset: u64) -> Option<Duration> {
        let pid = self.clock_pid()?;
        self.packetizer
            .offset_to_ts(offset, pid)
            .map(Duration::from_nanos)
    }

    /// Duration of a pull source, from the PCRs found by the scan.
    pub fn duration<S: ByteSource + ?Sized>(&self, source: &mut S) -> Option<Duration> {
        let size = source.size().ok()?;
        self.offset_to_time(size)
    }

    /// Move the read position to where `target` is expected.
    ///
    /// The position is aligned to a packet boundary. Partial state is
    /// flushed so demuxing resumes cleanly there. Returns `None`, changing
    /// nothing, when no PCR range is known yet.
    pub fn seek_offset(&mut self, target: Duration) -> Option<u64> {
        let pid = self.clock_pid()?;
        let ns = u64::try_from(target.as_nanos()).unwrap_or(u64::MAX);
        let offset = self.packetizer.ts_to_offset(ns, pid)?;
        let packet_size = self.pull_packet_size.or(self.packetizer.packet_size())? as u64;

        let aligned = if offset > self.sync_offset {
            self.sync_offset + (offset - self.sync_offset) / packet_size * packet_size
        } else {
            self.sync_offset
        };
        info!(target = ?target, offset = aligned, "seeking");
        self.flush_streams(false);
        self.packetizer.flush(false);
        self.read_offset = aligned;
        Some(aligned)
    }
}
