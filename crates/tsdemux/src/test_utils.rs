//! Builders for synthetic transport streams used across the unit tests.

use crate::adaptation_field::Pcr;
use crate::crc32::crc32_mpeg2;
use crate::packet::{SYNC_BYTE, TS_PACKET_SIZE};

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
}

fn header(pid: u16, pusi: bool, cc: u8, control: u8) -> [u8; 4] {
    [
        SYNC_BYTE,
        (if pusi { 0x40 } else { 0x00 }) | ((pid >> 8) as u8 & 0x1F),
        pid as u8,
        (control << 4) | (cc & 0x0F),
    ]
}

/// Payload-only packet; the payload is padded with 0xFF to fill the packet.
pub fn build_ts_packet(pid: u16, pusi: bool, cc: u8, payload: &[u8]) -> Vec<u8> {
    assert!(payload.len() <= 184);
    let mut packet = header(pid, pusi, cc, 0x01).to_vec();
    packet.extend_from_slice(payload);
    packet.resize(TS_PACKET_SIZE, 0xFF);
    packet
}

/// Packet whose payload is exactly `payload`, using adaptation field
/// stuffing for the rest.
pub fn build_stuffed_packet(pid: u16, pusi: bool, cc: u8, payload: &[u8]) -> Vec<u8> {
    assert!(!payload.is_empty() && payload.len() <= 184);
    if payload.len() == 184 {
        return build_ts_packet(pid, pusi, cc, payload);
    }
    let af_length = 183 - payload.len();
    let mut packet = header(pid, pusi, cc, 0x03).to_vec();
    packet.push(af_length as u8);
    if af_length > 0 {
        packet.push(0x00);
        packet.resize(5 + af_length, 0xFF);
    }
    packet.extend_from_slice(payload);
    debug_assert_eq!(packet.len(), TS_PACKET_SIZE);
    packet
}

/// Packet carrying a PCR (27MHz units) followed by exactly `payload`.
pub fn build_pcr_packet(pid: u16, cc: u8, pcr: u64, payload: &[u8]) -> Vec<u8> {
    assert!(payload.len() <= 176);
    let pcr = Pcr {
        base: pcr / 300,
        extension: (pcr % 300) as u16,
    };
    let (control, af_length) = if payload.is_empty() {
        (0x02, 183)
    } else {
        (0x03, 183 - payload.len())
    };
    let mut packet = header(pid, false, cc, control).to_vec();
    packet.push(af_length as u8);
    packet.push(0x10);
    packet.extend_from_slice(&pcr.to_bytes());
    packet.resize(5 + af_length, 0xFF);
    packet.extend_from_slice(payload);
    debug_assert_eq!(packet.len(), TS_PACKET_SIZE);
    packet
}

/// Long-form section with a valid CRC.
pub fn build_long_section(table_id: u8, extension: u16, version: u8, body: &[u8]) -> Vec<u8> {
    let section_length = 5 + body.len() + 4;
    let mut section = vec![
        table_id,
        0xB0 | ((section_length >> 8) as u8 & 0x0F),
        section_length as u8,
        (extension >> 8) as u8,
        extension as u8,
        0xC1 | ((version & 0x1F) << 1),
        0x00,
        0x00,
    ];
    section.extend_from_slice(body);
    let crc = crc32_mpeg2(&section);
    section.extend_from_slice(&crc.to_be_bytes());
    section
}

pub fn build_pat_section(version: u8, transport_stream_id: u16, programs: &[(u16, u16)]) -> Vec<u8> {
    let mut body = Vec::with_capacity(programs.len() * 4);
    for &(number, pid) in programs {
        body.extend_from_slice(&number.to_be_bytes());
        body.push(0xE0 | ((pid >> 8) as u8 & 0x1F));
        body.push(pid as u8);
    }
    build_long_section(0x00, transport_stream_id, version, &body)
}

/// PMT with `(stream_type, pid, descriptors)` entries.
pub fn build_pmt_section(
    program_number: u16,
    version: u8,
    pcr_pid: u16,
    program_descriptors: &[u8],
    streams: &[(u8, u16, Vec<u8>)],
) -> Vec<u8> {
    let mut body = vec![
        0xE0 | ((pcr_pid >> 8) as u8 & 0x1F),
        pcr_pid as u8,
        0xF0 | ((program_descriptors.len() >> 8) as u8 & 0x0F),
        program_descriptors.len() as u8,
    ];
    body.extend_from_slice(program_descriptors);
    for (stream_type, pid, descriptors) in streams {
        body.push(*stream_type);
        body.push(0xE0 | ((pid >> 8) as u8 & 0x1F));
        body.push(*pid as u8);
        body.push(0xF0 | ((descriptors.len() >> 8) as u8 & 0x0F));
        body.push(descriptors.len() as u8);
        body.extend_from_slice(descriptors);
    }
    build_long_section(0x02, program_number, version, &body)
}

/// One EIT event, described by its wire fields.
pub struct EitEventSpec<'a> {
    pub event_id: u16,
    /// MJD + BCD time
    pub start: [u8; 5],
    /// BCD hhmmss
    pub duration: [u8; 3],
    pub running_status: u8,
    pub name: &'a str,
    pub text: &'a str,
}

/// EIT section whose events each carry one English short event descriptor.
pub fn build_eit_section(
    table_id: u8,
    service_id: u16,
    version: u8,
    events: &[EitEventSpec<'_>],
) -> Vec<u8> {
    let mut body = vec![0x00, 0x01, 0x00, 0x01, 0x00, table_id];
    for event in events {
        let mut descriptor = b"eng".to_vec();
        descriptor.push(event.name.len() as u8);
        descriptor.extend_from_slice(event.name.as_bytes());
        descriptor.push(event.text.len() as u8);
        descriptor.extend_from_slice(event.text.as_bytes());

        let loop_length = descriptor.len() + 2;
        body.extend_from_slice(&event.event_id.to_be_bytes());
        body.extend_from_slice(&event.start);
        body.extend_from_slice(&event.duration);
        body.push((event.running_status << 5) | ((loop_length >> 8) as u8 & 0x0F));
        body.push(loop_length as u8);
        body.push(0x4D);
        body.push(descriptor.len() as u8);
        body.extend_from_slice(&descriptor);
    }
    build_long_section(table_id, service_id, version, &body)
}

/// Split a section into packets, pointer field 0 on the first one.
pub fn packetize_section(pid: u16, section: &[u8], cc: &mut u8) -> Vec<Vec<u8>> {
    let mut packets = Vec::new();
    let mut first = vec![0x00];
    let head = section.len().min(183);
    first.extend_from_slice(&section[..head]);
    packets.push(build_ts_packet(pid, true, *cc, &first));
    *cc = (*cc + 1) & 0x0F;
    for chunk in section[head..].chunks(184) {
        packets.push(build_ts_packet(pid, false, *cc, chunk));
        *cc = (*cc + 1) & 0x0F;
    }
    packets
}

/// 33-bit timestamp in the 5-byte PES layout with a 4-bit prefix.
pub fn encode_timestamp(prefix: u8, ts: u64) -> [u8; 5] {
    [
        (prefix << 4) | (((ts >> 30) & 0x07) as u8) << 1 | 0x01,
        (ts >> 22) as u8,
        (((ts >> 15) & 0x7F) as u8) << 1 | 0x01,
        (ts >> 7) as u8,
        ((ts & 0x7F) as u8) << 1 | 0x01,
    ]
}

/// PES packet. Unbounded packets have a packet_length of 0.
pub fn build_pes(
    stream_id: u8,
    pts: Option<u64>,
    dts: Option<u64>,
    payload: &[u8],
    bounded: bool,
) -> Vec<u8> {
    let mut timestamps = Vec::new();
    let flags = match (pts, dts) {
        (Some(pts), Some(dts)) => {
            timestamps.extend_from_slice(&encode_timestamp(0x3, pts));
            timestamps.extend_from_slice(&encode_timestamp(0x1, dts));
            0xC0
        }
        (Some(pts), None) => {
            timestamps.extend_from_slice(&encode_timestamp(0x2, pts));
            0x80
        }
        _ => 0x00,
    };
    let packet_length = if bounded {
        3 + timestamps.len() + payload.len()
    } else {
        0
    };
    let mut pes = vec![0x00, 0x00, 0x01, stream_id];
    pes.extend_from_slice(&(packet_length as u16).to_be_bytes());
    pes.extend_from_slice(&[0x80, flags, timestamps.len() as u8]);
    pes.extend_from_slice(&timestamps);
    pes.extend_from_slice(payload);
    pes
}

/// Split a PES packet into TS packets carrying it byte for byte.
pub fn packetize_pes(pid: u16, pes: &[u8], cc: &mut u8) -> Vec<Vec<u8>> {
    pes.chunks(184)
        .enumerate()
        .map(|(i, chunk)| {
            let packet = build_stuffed_packet(pid, i == 0, *cc, chunk);
            *cc = (*cc + 1) & 0x0F;
            packet
        })
        .collect()
}
