//! Byte stream to transport packets.
//!
//! The packetizer buffers incoming bytes, discovers the packet size, keeps
//! sync and parses packets one at a time. It also owns the per-PID section
//! assembler and the PCR clock, since both are fed straight from packets.

use bytes::{Buf, Bytes, BytesMut};
use memchr::memchr_iter;
use tracing::{debug, info, trace};

use crate::clock::PcrClock;
use crate::config::{ClockMode, DemuxConfig};
use crate::packet::{ATSC_PACKET_SIZE, M2TS_PACKET_SIZE, PACKET_SIZES, SYNC_BYTE, TS_PACKET_SIZE, TsPacket};
use crate::section::{Section, SectionAssembler};

/// Outcome of [`Packetizer::next_packet`].
#[derive(Debug)]
pub enum PacketResult {
    Packet(TsPacket),
    /// A packet was consumed but its header was unusable
    Bad,
    /// Not enough buffered bytes
    NeedMore,
}

#[derive(Debug)]
pub struct Packetizer {
    buffer: BytesMut,
    /// Stream offset of `buffer[0]`
    offset: u64,
    empty: bool,
    packet_size: Option<usize>,
    need_sync: bool,
    /// Bytes thrown away while looking for the packet size
    discarded: usize,
    discovery_limit: usize,
    /// Arrival time of the range being parsed
    arrival: Option<u64>,
    last_in_time: Option<u64>,
    sections: SectionAssembler,
    clock: PcrClock,
}

impl Default for Packetizer {
    fn default() -> Self {
        Self::new(&DemuxConfig::default())
    }
}

impl Packetizer {
    pub fn new(config: &DemuxConfig) -> Self {
        Packetizer {
            buffer: BytesMut::new(),
            offset: 0,
            empty: true,
            packet_size: None,
            need_sync: false,
            discarded: 0,
            discovery_limit: config.discovery_limit,
            arrival: None,
            last_in_time: None,
            sections: SectionAssembler::new(config.check_crc),
            clock: PcrClock::new(config.clock_mode, config.discont_threshold_ns()),
        }
    }

    /// Append bytes that start at stream `offset`.
    ///
    /// The offset is only used for the first push after creation or a
    /// flush; later pushes are assumed contiguous.
    pub fn push(&mut self, data: &[u8], offset: u64, arrival_ns: Option<u64>) {
        if self.empty {
            self.empty = false;
            self.offset = offset;
        }
        trace!(len = data.len(), offset, "pushing bytes");
        self.buffer.extend_from_slice(data);
        self.arrival = arrival_ns;
        if arrival_ns.is_some() {
            self.last_in_time = arrival_ns;
        }
    }

    pub fn packet_size(&self) -> Option<usize> {
        self.packet_size
    }

    /// Stream offset of the next unread byte.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    pub fn last_in_time(&self) -> Option<u64> {
        self.last_in_time
    }

    /// Whether packet size discovery threw away more than the configured
    /// limit without finding anything.
    pub fn discovery_exhausted(&self) -> bool {
        self.packet_size.is_none() && self.discarded > self.discovery_limit
    }

    pub fn discarded(&self) -> usize {
        self.discarded
    }

    pub fn has_packets(&mut self) -> bool {
        let size = match self.packet_size {
            Some(size) => Some(size),
            None => self.discover_packet_size(),
        };
        size.is_some_and(|size| self.buffer.len() >= size)
    }

    fn skip(&mut self, n: usize) {
        if n > 0 {
            trace!(n, "skipping bytes");
            self.buffer.advance(n);
            self.offset += n as u64;
        }
    }

    /// Look for four sync bytes at one of the known packet strides.
    fn discover_packet_size(&mut self) -> Option<usize> {
        let size = self.buffer.len();
        if size < 4 * ATSC_PACKET_SIZE {
            return None;
        }

        let limit = size - 3 * ATSC_PACKET_SIZE;
        let found = memchr_iter(SYNC_BYTE, &self.buffer[..limit]).find_map(|i| {
            PACKET_SIZES
                .iter()
                .find(|&&stride| (1..4).all(|k| self.buffer[i + k * stride] == SYNC_BYTE))
                .map(|&stride| (i, stride))
        });

        let Some((pos, packet_size)) = found else {
            debug!(size, flushed = limit, "could not determine packet size");
            self.discarded += limit;
            self.skip(limit);
            return None;
        };

        info!(packet_size, offset = self.offset + pos as u64, "packet size detected");
        self.packet_size = Some(packet_size);
        // M2TS carries a 4-byte prefix in front of the sync byte
        let pos = if packet_size == M2TS_PACKET_SIZE && pos >= 4 {
            pos - 4
        } else {
            pos
        };
        self.skip(pos);
        Some(packet_size)
    }

    /// Find three packets in a row and drop everything before them.
    fn resync(&mut self, packet_size: usize, prefix: usize) -> bool {
        let size = self.buffer.len();
        if size < 3 * packet_size {
            return false;
        }
        let end = size - 2 * packet_size;
        let found = memchr_iter(SYNC_BYTE, &self.buffer[prefix..end])
            .map(|i| i + prefix)
            .find(|&i| {
                self.buffer[i + packet_size] == SYNC_BYTE
                    && self.buffer[i + 2 * packet_size] == SYNC_BYTE
            });
        match found {
            Some(i) => {
                debug!(skipped = i - prefix, offset = self.offset, "sync recovered");
                self.skip(i - prefix);
                true
            }
            None => {
                self.skip(end - prefix);
                false
            }
        }
    }

    /// Parse the next packet. PCRs are recorded into the clock on the way.
    pub fn next_packet(&mut self) -> PacketResult {
        let packet_size = match self.packet_size {
            Some(size) => size,
            None => match self.discover_packet_size() {
                Some(size) => size,
                None => return PacketResult::NeedMore,
            },
        };
        let prefix = if packet_size == M2TS_PACKET_SIZE { 4 } else { 0 };

        loop {
            if self.need_sync {
                if !self.resync(packet_size, prefix) {
                    return PacketResult::NeedMore;
                }
                self.need_sync = false;
            }
            if self.buffer.len() < packet_size {
                return PacketResult::NeedMore;
            }
            if self.buffer[prefix] != SYNC_BYTE {
                debug!(offset = self.offset, "lost sync");
                self.need_sync = true;
                continue;
            }

            let offset = self.offset;
            let raw: Bytes = self.buffer.split_to(packet_size).freeze();
            self.offset += packet_size as u64;

            return match TsPacket::parse(raw.slice(prefix..prefix + TS_PACKET_SIZE), offset) {
                Ok(packet) => {
                    if let Some(pcr) = packet.pcr() {
                        trace!(pid = packet.pid, pcr = pcr.as_27mhz(), offset, "PCR");
                        self.clock
                            .observe(packet.pid, pcr.as_27mhz(), offset, self.arrival);
                    }
                    PacketResult::Packet(packet)
                }
                Err(e) => {
                    debug!(offset, error = %e, "bad packet, skipping");
                    PacketResult::Bad
                }
            };
        }
    }

    /// Feed a PSI packet to the section assembler.
    pub fn push_section(&mut self, packet: &TsPacket) -> Vec<Section> {
        self.sections.push(packet)
    }

    /// Forget the section state of `pid`, so its next table is delivered
    /// even if unchanged.
    pub fn remove_stream(&mut self, pid: u16) {
        if self.sections.has_stream(pid) {
            debug!(pid, "removing section stream");
        }
        self.sections.remove_stream(pid);
    }

    pub fn clock(&self) -> &PcrClock {
        &self.clock
    }

    pub fn set_clock_mode(&mut self, mode: ClockMode) {
        self.clock.set_mode(mode);
    }

    pub fn set_reference_offset(&mut self, offset: u64) {
        self.clock.set_reference_offset(offset);
    }

    /// Time of byte `offset` according to the PCRs of `pid`.
    pub fn offset_to_ts(&self, offset: u64, pid: u16) -> Option<u64> {
        self.clock.offset_to_ts(offset, pid)
    }

    /// Byte offset of time `ts_ns` according to the PCRs of `pid`.
    pub fn ts_to_offset(&self, ts_ns: u64, pid: u16) -> Option<u64> {
        self.clock.ts_to_offset(ts_ns, pid)
    }

    /// Output time of a PTS/DTS, in nanoseconds.
    pub fn pts_to_ts(&mut self, pts_ns: u64, pcr_pid: u16) -> Option<u64> {
        self.clock.pts_to_ts(pts_ns, pcr_pid, self.last_in_time)
    }

    /// Drop buffered bytes and partial sections, keeping the packet size
    /// and the subtable history. A hard flush also drops PCR observations.
    pub fn flush(&mut self, hard: bool) {
        debug!(hard, "flushing packetizer");
        self.buffer.clear();
        self.offset = 0;
        self.empty = true;
        self.need_sync = false;
        self.arrival = None;
        self.last_in_time = None;
        self.sections.reset_continuity();
        self.clock.reset_arrival_base();
        if hard {
            self.clock.clear();
        }
    }

    /// Back to the initial state apart from PCR observations.
    pub fn clear(&mut self) {
        self.flush(false);
        self.packet_size = None;
        self.discarded = 0;
        self.sections.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::DVB_ASI_PACKET_SIZE;
    use crate::test_utils::{build_pat_section, build_pcr_packet, build_ts_packet, packetize_section};

    fn stream(count: usize, packet_size: usize) -> Vec<u8> {
        let mut data = Vec::new();
        for i in 0..count {
            if packet_size == M2TS_PACKET_SIZE {
                data.extend_from_slice(&(i as u32).to_be_bytes());
            }
            data.extend_from_slice(&build_ts_packet(0x100, false, (i & 0x0F) as u8, &[i as u8]));
            if packet_size > TS_PACKET_SIZE && packet_size != M2TS_PACKET_SIZE {
                data.resize(data.len() + packet_size - TS_PACKET_SIZE, 0x00);
            }
        }
        data
    }

    fn drain(packetizer: &mut Packetizer) -> (Vec<TsPacket>, usize) {
        let mut packets = Vec::new();
        let mut bad = 0;
        loop {
            match packetizer.next_packet() {
                PacketResult::Packet(p) => packets.push(p),
                PacketResult::Bad => bad += 1,
                PacketResult::NeedMore => return (packets, bad),
            }
        }
    }

    #[test]
    fn discovers_every_packet_size() {
        for size in [TS_PACKET_SIZE, M2TS_PACKET_SIZE, DVB_ASI_PACKET_SIZE, ATSC_PACKET_SIZE] {
            let mut packetizer = Packetizer::default();
            packetizer.push(&stream(10, size), 0, None);
            assert!(packetizer.has_packets());
            assert_eq!(packetizer.packet_size(), Some(size));

            let (packets, bad) = drain(&mut packetizer);
            assert_eq!(bad, 0);
            assert_eq!(packets.len(), 10, "size {size}");
            assert_eq!(packets[3].offset, 3 * size as u64);
            assert_eq!(packets[3].payload.as_ref().unwrap()[0], 3);
        }
    }

    #[test]
    fn needs_four_packets_to_discover() {
        let mut packetizer = Packetizer::default();
        packetizer.push(&stream(2, TS_PACKET_SIZE), 0, None);
        assert!(matches!(packetizer.next_packet(), PacketResult::NeedMore));
        assert_eq!(packetizer.packet_size(), None);

        packetizer.push(&stream(3, TS_PACKET_SIZE), 0, None);
        assert!(matches!(packetizer.next_packet(), PacketResult::Packet(_)));
    }

    #[test]
    fn leading_garbage_is_skipped() {
        let mut data = vec![0x00, 0x47, 0x12, 0x47, 0x99];
        data.extend_from_slice(&stream(8, TS_PACKET_SIZE));
        let mut packetizer = Packetizer::default();
        packetizer.push(&data, 1000, None);
        let (packets, _) = drain(&mut packetizer);
        assert_eq!(packets.len(), 8);
        assert_eq!(packets[0].offset, 1005);
        assert_eq!(packets[1].offset, 1005 + 188);
    }

    #[test]
    fn resyncs_after_lost_bytes() {
        let mut data = stream(10, TS_PACKET_SIZE);
        // drop 50 bytes from the middle of packet 5
        data.drain(5 * 188 + 20..5 * 188 + 70);
        let mut packetizer = Packetizer::default();
        packetizer.push(&data, 0, None);
        let (packets, _) = drain(&mut packetizer);
        let payloads: Vec<u8> = packets
            .iter()
            .map(|p| p.payload.as_ref().unwrap()[0])
            .collect();
        // the damaged packet still has a good header, the one after it is lost
        assert_eq!(payloads, vec![0, 1, 2, 3, 4, 5, 7, 8, 9]);
        // offsets stay true to the input
        assert_eq!(packets.last().unwrap().offset, 9 * 188 - 50);
    }

    #[test]
    fn bad_packet_is_dropped_alone() {
        let mut data = stream(6, TS_PACKET_SIZE);
        data[2 * 188 + 1] |= 0x80;
        let mut packetizer = Packetizer::default();
        packetizer.push(&data, 0, None);
        let (packets, bad) = drain(&mut packetizer);
        assert_eq!(bad, 1);
        assert_eq!(packets.len(), 5);
        assert_eq!(packets[2].offset, 3 * 188);
    }

    #[test]
    fn any_single_byte_corruption_stays_local() {
        let clean = stream(6, TS_PACKET_SIZE);
        for pos in 1..TS_PACKET_SIZE {
            for mask in [0x01u8, 0x80, 0xFF] {
                let mut data = clean.clone();
                data[2 * 188 + pos] ^= mask;
                let mut packetizer = Packetizer::default();
                packetizer.push(&data, 0, None);
                let (packets, bad) = drain(&mut packetizer);

                assert_eq!(packets.len() + bad, 6, "pos {pos} mask {mask:#x}");
                let intact: Vec<u64> = packets
                    .iter()
                    .map(|p| p.offset)
                    .filter(|&o| o != 2 * 188)
                    .collect();
                assert_eq!(intact, [0, 188, 3 * 188, 4 * 188, 5 * 188]);
            }
        }
    }

    #[test]
    fn split_pushes_are_contiguous() {
        let data = stream(6, TS_PACKET_SIZE);
        let mut packetizer = Packetizer::default();
        let (head, tail) = data.split_at(900);
        packetizer.push(head, 0, None);
        let (first, _) = drain(&mut packetizer);
        packetizer.push(tail, 900, None);
        let (second, _) = drain(&mut packetizer);
        assert_eq!(first.len() + second.len(), 6);
        assert_eq!(second.last().unwrap().offset, 5 * 188);
    }

    #[test]
    fn noise_exhausts_discovery() {
        let config = DemuxConfig::default().with_discovery_limit(4096);
        let mut packetizer = Packetizer::new(&config);
        let noise: Vec<u8> = (0..8192u32).map(|i| (i * 7 % 251) as u8 & 0x3F).collect();
        packetizer.push(&noise, 0, None);
        assert!(matches!(packetizer.next_packet(), PacketResult::NeedMore));
        assert!(packetizer.discarded() > 0);
        assert!(packetizer.buffered() < noise.len());
        packetizer.push(&noise, 0, None);
        assert!(matches!(packetizer.next_packet(), PacketResult::NeedMore));
        assert!(packetizer.discovery_exhausted());
    }

    #[test]
    fn pcr_is_recorded() {
        let mut data = Vec::new();
        for i in 0..5u64 {
            data.extend_from_slice(&build_pcr_packet(0x101, i as u8, i * 2_700_000, &[0]));
        }
        let config = DemuxConfig::default().with_clock_mode(ClockMode::Offset);
        let mut packetizer = Packetizer::new(&config);
        packetizer.push(&data, 0, None);
        let (packets, _) = drain(&mut packetizer);
        assert_eq!(packets.len(), 5);

        let table = packetizer.clock().table(0x101).unwrap();
        assert_eq!(table.offsets.first().unwrap().offset, 0);
        assert_eq!(table.offsets.last().unwrap().offset, 4 * 188);
    }

    #[test]
    fn sections_go_through_the_assembler() {
        let pat = build_pat_section(0, 1, &[(1, 0x1000)]);
        let mut cc = 0;
        let mut data = Vec::new();
        for _ in 0..4 {
            data.extend(packetize_section(0, &pat, &mut cc).concat());
        }
        let mut packetizer = Packetizer::default();
        packetizer.push(&data, 0, None);
        let (packets, _) = drain(&mut packetizer);
        let sections: Vec<Section> = packets
            .iter()
            .flat_map(|p| packetizer.push_section(p))
            .collect();
        // repeats are suppressed
        assert_eq!(sections.len(), 1);

        packetizer.remove_stream(0);
        let mut cc = 4;
        let again = packetize_section(0, &pat, &mut cc);
        let packet = TsPacket::parse(Bytes::from(again[0].clone()), 0).unwrap();
        assert_eq!(packetizer.push_section(&packet).len(), 1);
    }

    #[test]
    fn flush_keeps_packet_size() {
        let mut packetizer = Packetizer::default();
        packetizer.push(&stream(5, TS_PACKET_SIZE), 0, Some(1_000));
        let _ = drain(&mut packetizer);
        packetizer.flush(false);
        assert_eq!(packetizer.packet_size(), Some(TS_PACKET_SIZE));
        assert_eq!(packetizer.last_in_time(), None);

        packetizer.push(&stream(1, TS_PACKET_SIZE), 188 * 40, None);
        let (packets, _) = drain(&mut packetizer);
        assert_eq!(packets[0].offset, 188 * 40);

        packetizer.clear();
        assert_eq!(packetizer.packet_size(), None);
    }
}
