use std::hint::black_box;

use bytes::Bytes;
use criterion::{Criterion, Throughput, criterion_group, criterion_main};
use tsdemux::{DemuxConfig, DemuxSink, InputRange, Pcr, TsDemuxer, crc32_mpeg2};

/// Counts units without keeping them.
#[derive(Default)]
struct CountingSink {
    units: usize,
    bytes: usize,
}

impl DemuxSink for CountingSink {
    fn access_unit(&mut self, unit: tsdemux::AccessUnit) -> tsdemux::Result<()> {
        self.units += 1;
        self.bytes += unit.payload.len();
        Ok(())
    }
}

fn benchmark_demux(c: &mut Criterion) {
    let mut group = c.benchmark_group("Demux");

    let plain = create_two_program_stream(2000);
    let inputs = [
        ("188", Bytes::from(plain.clone())),
        ("192 (M2TS)", Bytes::from(rewrap(&plain, 4, 0))),
        ("204 (DVB-ASI)", Bytes::from(rewrap(&plain, 0, 16))),
        ("188 noisy", Bytes::from(create_noisy_data(&plain))),
    ];

    for (name, data) in inputs {
        group.throughput(Throughput::Bytes(data.len() as u64));
        group.bench_function(format!("push {name}"), |b| {
            b.iter(|| {
                let mut demuxer = TsDemuxer::new(DemuxConfig::default());
                let mut sink = CountingSink::default();
                // feed in 64KiB ranges like a live reader would
                let mut offset = 0;
                while offset < data.len() {
                    let end = (offset + 65536).min(data.len());
                    demuxer
                        .push(
                            InputRange::new(offset as u64, data.slice(offset..end)),
                            &mut sink,
                        )
                        .unwrap();
                    offset = end;
                }
                demuxer.drain(&mut sink);
                black_box(sink.units)
            })
        });
    }

    let data = Bytes::from(plain);
    group.throughput(Throughput::Bytes(data.len() as u64));
    group.bench_function("pull scan + read", |b| {
        b.iter(|| {
            let mut source = data.clone();
            let mut demuxer = TsDemuxer::new(DemuxConfig::default());
            let mut sink = CountingSink::default();
            demuxer.scan(&mut source).unwrap();
            demuxer.pull_all(&mut source, &mut sink).unwrap();
            black_box(sink.bytes)
        })
    });

    group.finish();
}

criterion_group!(benches, benchmark_demux);
criterion_main!(benches);

fn header(pid: u16, pusi: bool, cc: u8, control: u8) -> [u8; 4] {
    [
        0x47,
        (if pusi { 0x40 } else { 0x00 }) | ((pid >> 8) as u8 & 0x1F),
        pid as u8,
        (control << 4) | (cc & 0x0F),
    ]
}

fn long_section(table_id: u8, extension: u16, body: &[u8]) -> Vec<u8> {
    let length = 5 + body.len() + 4;
    let mut section = vec![
        table_id,
        0xB0 | ((length >> 8) as u8 & 0x0F),
        length as u8,
        (extension >> 8) as u8,
        extension as u8,
        0xC1,
        0x00,
        0x00,
    ];
    section.extend_from_slice(body);
    let crc = crc32_mpeg2(&section);
    section.extend_from_slice(&crc.to_be_bytes());
    section
}

fn section_packet(pid: u16, cc: u8, section: &[u8]) -> Vec<u8> {
    let mut packet = header(pid, true, cc, 0x01).to_vec();
    packet.push(0x00);
    packet.extend_from_slice(section);
    packet.resize(188, 0xFF);
    packet
}

fn pes_header(stream_id: u8, pts: u64) -> Vec<u8> {
    vec![
        0x00,
        0x00,
        0x01,
        stream_id,
        0x00,
        0x00,
        0x80,
        0x80,
        0x05,
        0x21 | (((pts >> 30) & 0x07) as u8) << 1,
        (pts >> 22) as u8,
        (((pts >> 15) & 0x7F) as u8) << 1 | 0x01,
        (pts >> 7) as u8,
        ((pts & 0x7F) as u8) << 1 | 0x01,
    ]
}

/// Packet with `payload` exactly, an optional PCR and stuffing in between.
fn es_packet(pid: u16, pusi: bool, cc: u8, pcr: Option<u64>, payload: &[u8]) -> Vec<u8> {
    if payload.len() == 184 {
        let mut packet = header(pid, pusi, cc, 0x01).to_vec();
        packet.extend_from_slice(payload);
        return packet;
    }
    let mut packet = header(pid, pusi, cc, 0x03).to_vec();
    let af_length = 183 - payload.len();
    packet.push(af_length as u8);
    if af_length > 0 {
        match pcr {
            Some(pcr) => {
                packet.push(0x10);
                let pcr = Pcr {
                    base: pcr / 300,
                    extension: (pcr % 300) as u16,
                };
                packet.extend_from_slice(&pcr.to_bytes());
            }
            None => packet.push(0x00),
        }
    }
    packet.resize(5 + af_length, 0xFF);
    packet.extend_from_slice(payload);
    packet
}

/// Two programs, each with a video and an audio PID. Every video frame is
/// four packets long and carries a PCR on its first packet.
fn create_two_program_stream(frames: u64) -> Vec<u8> {
    let mut out = Vec::new();
    let mut cc = [0u8; 0x2000];
    let mut next_cc = |pid: u16| {
        let value = cc[pid as usize];
        cc[pid as usize] = (value + 1) & 0x0F;
        value
    };

    let pat = long_section(0x00, 1, &[0x00, 0x01, 0xF0, 0x00, 0x00, 0x02, 0xF0, 0x01]);
    // H.264 + AAC, then H.265 + AC-3; the video PID carries the PCR
    let pmts = [
        (
            0x1000,
            long_section(
                0x02,
                1,
                &[0xE1, 0x00, 0xF0, 0x00, 0x1B, 0xE1, 0x00, 0xF0, 0x00, 0x0F, 0xE1, 0x01, 0xF0, 0x00],
            ),
        ),
        (
            0x1001,
            long_section(
                0x02,
                2,
                &[0xE2, 0x00, 0xF0, 0x00, 0x24, 0xE2, 0x00, 0xF0, 0x00, 0x81, 0xE2, 0x01, 0xF0, 0x00],
            ),
        ),
    ];

    for frame in 0..frames {
        if frame % 25 == 0 {
            out.extend(section_packet(0, next_cc(0), &pat));
            for (pid, pmt) in &pmts {
                out.extend(section_packet(*pid, next_cc(*pid), pmt));
            }
        }
        let pcr = 27_000_000 + frame * 1_080_000;
        let pts = pcr / 300 + 9000;
        for (video, audio) in [(0x100u16, 0x101u16), (0x200, 0x201)] {
            let mut first = pes_header(0xE0, pts);
            first.extend_from_slice(&[0x11; 150]);
            out.extend(es_packet(video, true, next_cc(video), Some(pcr), &first));
            for _ in 0..3 {
                out.extend(es_packet(video, false, next_cc(video), None, &[0x22; 184]));
            }
            let mut audio_pes = pes_header(0xC0, pts);
            audio_pes.extend_from_slice(&[0x33; 120]);
            out.extend(es_packet(audio, true, next_cc(audio), None, &audio_pes));
        }
    }
    out
}

fn rewrap(plain: &[u8], prefix: usize, suffix: usize) -> Vec<u8> {
    let mut out = Vec::with_capacity(plain.len() / 188 * (188 + prefix + suffix));
    for packet in plain.chunks_exact(188) {
        out.extend(std::iter::repeat_n(0x00, prefix));
        out.extend_from_slice(packet);
        out.extend(std::iter::repeat_n(0xAA, suffix));
    }
    out
}

/// Garbage with decoy sync bytes every 64 packets.
fn create_noisy_data(plain: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(plain.len() + plain.len() / 188);
    for (idx, packet) in plain.chunks_exact(188).enumerate() {
        out.extend_from_slice(packet);
        if idx % 64 == 63 {
            out.extend_from_slice(&[0x47, 0x13, 0x37, 0x99, 0x47, 0x00, 0x12]);
        }
    }
    out
}
