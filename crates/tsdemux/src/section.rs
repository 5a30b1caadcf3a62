//! PSI/SI section reassembly.
//!
//! Sections are collected per PID across packets while the continuity
//! counter advances by one. A break throws away the partial section and
//! waits for the next payload unit start. Completed long-form sections are
//! CRC checked and compared against the last copy of the same subtable so
//! repeated tables are only delivered once.

use std::collections::HashMap;

use bytes::{Bytes, BytesMut};
use tracing::{debug, trace, warn};

use crate::crc32;
use crate::packet::TsPacket;
use crate::{Result, TsError};

/// Largest section_length + 3 a private section can declare.
pub const MAX_SECTION_SIZE: usize = 4096;

/// A complete PSI/SI section.
#[derive(Debug, Clone)]
pub struct Section {
    pub pid: u16,
    pub table_id: u8,
    /// table_id_extension for long sections; always 0 for the PAT and for
    /// short sections
    pub subtable_extension: u16,
    pub version_number: u8,
    pub current_next_indicator: bool,
    pub section_number: u8,
    pub last_section_number: u8,
    /// Stored CRC_32, or 0 for sections without one
    pub crc: u32,
    /// section_syntax_indicator was 0
    pub short_section: bool,
    /// Stream offset of the packet the section started in
    pub offset: u64,
    /// The whole section, header and CRC included
    pub data: Bytes,
}

impl Section {
    /// Decode the generic section header.
    pub fn parse(pid: u16, data: Bytes, offset: u64) -> Result<Self> {
        if data.len() < 3 {
            return Err(TsError::InsufficientData {
                expected: 3,
                actual: data.len(),
            });
        }
        let table_id = data[0];
        let section_length = u16::from_be_bytes([data[1] & 0x0F, data[2]]);
        if data.len() != section_length as usize + 3 {
            return Err(TsError::InvalidSectionLength(section_length));
        }

        if data[1] & 0x80 == 0 {
            return Ok(Section {
                pid,
                table_id,
                subtable_extension: 0,
                version_number: 0,
                current_next_indicator: true,
                section_number: 0,
                last_section_number: 0,
                crc: 0,
                short_section: true,
                offset,
                data,
            });
        }

        if section_length < 9 {
            return Err(TsError::InvalidSectionLength(section_length));
        }
        let section_number = data[6];
        let last_section_number = data[7];
        if section_number > last_section_number {
            return Err(TsError::ParseError(format!(
                "section_number {section_number} > last_section_number {last_section_number}"
            )));
        }

        Ok(Section {
            pid,
            table_id,
            subtable_extension: if table_id == 0 {
                0
            } else {
                u16::from_be_bytes([data[3], data[4]])
            },
            version_number: (data[5] >> 1) & 0x1F,
            current_next_indicator: data[5] & 0x01 != 0,
            section_number,
            last_section_number,
            crc: crc32::stored_crc(&data).unwrap_or_default(),
            short_section: false,
            offset,
            data,
        })
    }

    /// Bytes between the header and the CRC.
    ///
    /// For short sections that is everything after the 3-byte header; any
    /// trailing CRC stays in place for the table decoder to handle.
    pub fn body(&self) -> &[u8] {
        if self.short_section {
            &self.data[3..]
        } else {
            &self.data[8..self.data.len() - 4]
        }
    }

    /// Same as [`Section::body`], as a cheap slice of the section bytes.
    pub fn body_bytes(&self) -> Bytes {
        if self.short_section {
            self.data.slice(3..)
        } else {
            self.data.slice(8..self.data.len() - 4)
        }
    }
}

/// Last version and per-section CRCs seen for one (table_id, extension).
#[derive(Debug, Default)]
struct Subtable {
    version_number: u8,
    crcs: HashMap<u8, u32>,
}

/// Reassembly state for the sections of one PID.
#[derive(Debug, Default)]
pub(crate) struct SectionStream {
    continuity_counter: Option<u8>,
    pending: BytesMut,
    expected: usize,
    offset: u64,
    subtables: HashMap<(u8, u16), Subtable>,
}

impl SectionStream {
    fn clear_pending(&mut self) {
        self.pending.clear();
        self.expected = 0;
    }

    /// Returns true if an identical copy of the section was seen before,
    /// and remembers it otherwise.
    fn seen(&mut self, section: &Section) -> bool {
        let subtable = self
            .subtables
            .entry((section.table_id, section.subtable_extension))
            .or_default();
        if subtable.version_number != section.version_number {
            subtable.version_number = section.version_number;
            subtable.crcs.clear();
        } else if subtable.crcs.get(&section.section_number) == Some(&section.crc) {
            return true;
        }
        subtable.crcs.insert(section.section_number, section.crc);
        false
    }
}

/// Per-PID section assembler.
#[derive(Debug)]
pub struct SectionAssembler {
    streams: HashMap<u16, SectionStream>,
    check_crc: bool,
}

impl Default for SectionAssembler {
    fn default() -> Self {
        Self::new(true)
    }
}

impl SectionAssembler {
    pub fn new(check_crc: bool) -> Self {
        SectionAssembler {
            streams: HashMap::new(),
            check_crc,
        }
    }

    /// Feed one packet and return the sections it completed.
    ///
    /// Damaged or repeated sections are dropped here; only fresh, valid
    /// ones come out.
    pub fn push(&mut self, packet: &TsPacket) -> Vec<Section> {
        let mut out = Vec::new();
        let Some(payload) = packet.payload.as_ref().filter(|p| !p.is_empty()) else {
            return out;
        };
        let pid = packet.pid;
        let pusi = packet.payload_unit_start_indicator;
        let cc = packet.continuity_counter;

        if !pusi && !self.streams.contains_key(&pid) {
            trace!(pid, "no section in progress and no payload start");
            return out;
        }
        let stream = self.streams.entry(pid).or_default();

        let mut pos = 0;
        let mut pointer = 0;
        if pusi {
            pointer = payload[0] as usize;
            pos = 1;
            if pos + pointer > payload.len() {
                warn!(pid, pointer, "pointer field points past the packet");
                stream.clear_pending();
                stream.continuity_counter = None;
                return out;
            }
        }

        let sequential = stream
            .continuity_counter
            .is_some_and(|last| (last + 1) & 0x0F == cc);
        if !sequential {
            if stream.expected > 0 {
                debug!(pid, cc, last = ?stream.continuity_counter, "continuity break, dropping partial section");
            }
            stream.clear_pending();
            stream.continuity_counter = Some(cc);
            if !pusi {
                return out;
            }
            pos += pointer;
        } else {
            stream.continuity_counter = Some(cc);
            if pusi && pointer == 0 {
                stream.clear_pending();
            } else if stream.expected > 0 {
                let available = if pusi { pointer } else { payload.len() - pos };
                let take = (stream.expected - stream.pending.len()).min(available);
                stream.pending.extend_from_slice(&payload[pos..pos + take]);
                pos += take;
                if stream.pending.len() == stream.expected {
                    let data = std::mem::take(&mut stream.pending).freeze();
                    let offset = stream.offset;
                    stream.expected = 0;
                    self.complete(pid, data, offset, &mut out);
                } else if pusi {
                    debug!(pid, "payload start before the pending section was complete");
                    stream.clear_pending();
                } else {
                    return out;
                }
                if pusi {
                    pos = 1 + pointer;
                }
            } else if pusi {
                pos += pointer;
            } else {
                trace!(pid, "continuation with no section pending");
                return out;
            }
        }

        self.section_start(pid, payload, pos, packet.offset, &mut out);
        out
    }

    /// Parse back-to-back sections starting at `pos` until stuffing, the end
    /// of the packet, or a section that continues in the next packet.
    fn section_start(
        &mut self,
        pid: u16,
        payload: &Bytes,
        mut pos: usize,
        offset: u64,
        out: &mut Vec<Section>,
    ) {
        while payload.len() - pos >= 3 && payload[pos] != 0xFF {
            let length =
                u16::from_be_bytes([payload[pos + 1] & 0x0F, payload[pos + 2]]) as usize + 3;
            if length > MAX_SECTION_SIZE {
                warn!(pid, length, "section too long, skipping packet");
                return;
            }
            if pos + length <= payload.len() {
                self.complete(pid, payload.slice(pos..pos + length), offset, out);
                pos += length;
                continue;
            }

            let Some(stream) = self.streams.get_mut(&pid) else {
                return;
            };
            stream.pending = BytesMut::with_capacity(length);
            stream.pending.extend_from_slice(&payload[pos..]);
            stream.expected = length;
            stream.offset = offset;
            return;
        }
    }

    fn complete(&mut self, pid: u16, data: Bytes, offset: u64, out: &mut Vec<Section>) {
        let section = match Section::parse(pid, data, offset) {
            Ok(section) => section,
            Err(e) => {
                warn!(pid, error = %e, "dropping malformed section");
                return;
            }
        };
        if section.short_section {
            out.push(section);
            return;
        }
        if !section.current_next_indicator {
            trace!(pid, table_id = section.table_id, "skipping not-yet-applicable section");
            return;
        }
        if self.check_crc && crc32::table_has_crc(section.table_id) {
            if let Err(e) = crc32::check_section_crc(&section.data) {
                warn!(pid, table_id = section.table_id, error = %e, "section failed CRC check");
                return;
            }
        }
        let Some(stream) = self.streams.get_mut(&pid) else {
            return;
        };
        if stream.seen(&section) {
            trace!(
                pid,
                table_id = section.table_id,
                version = section.version_number,
                "section unchanged"
            );
            return;
        }
        debug!(
            pid,
            table_id = section.table_id,
            extension = section.subtable_extension,
            version = section.version_number,
            section_number = section.section_number,
            "new section"
        );
        out.push(section);
    }

    /// Drop all state for a PID.
    pub fn remove_stream(&mut self, pid: u16) {
        self.streams.remove(&pid);
    }

    /// Drop partial sections and continuity state on every PID while
    /// keeping the subtable history, so unchanged tables stay suppressed.
    pub fn reset_continuity(&mut self) {
        for stream in self.streams.values_mut() {
            stream.clear_pending();
            stream.continuity_counter = None;
        }
    }

    /// Drop everything.
    pub fn clear(&mut self) {
        self.streams.clear();
    }

    pub fn has_stream(&self, pid: u16) -> bool {
        self.streams.contains_key(&pid)
    }
}
