//! MPEG-2 Transport Stream demultiplexer
//!
//! This crate turns a byte stream of transport packets (188, 192, 204 or
//! 208 bytes each) into programs, PSI/SI tables and timestamped elementary
//! stream access units. It covers packet size discovery and resync,
//! section reassembly with CRC checks, PAT/PMT driven program tracking,
//! PES reassembly with PTS/DTS rollover correction and PCR based clock
//! recovery for both live and seekable input.
//!
//! ```no_run
//! use tsdemux::{DemuxConfig, EventCollector, InputRange, TsDemuxer};
//!
//! let data = std::fs::read("capture.ts")?;
//! let mut demuxer = TsDemuxer::new(DemuxConfig::default());
//! let mut sink = EventCollector::new();
//! demuxer.push(InputRange::new(0, data), &mut sink)?;
//! demuxer.drain(&mut sink);
//! for unit in sink.access_units() {
//!     println!("pid {} pts {:?}", unit.pid, unit.pts_time);
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod adaptation_field;
pub mod clock;
pub mod config;
pub mod crc32;
pub mod demuxer;
pub mod descriptor;
pub mod error;
pub mod packet;
pub mod packetizer;
pub mod pes;
pub mod reassembler;
pub mod registry;
pub mod section;
pub mod sink;
pub mod tables;
pub mod text;
pub mod timestamp;

#[cfg(test)]
mod test_utils;

pub use adaptation_field::{AdaptationField, Pcr};
pub use clock::{OffsetTracker, PcrClock, PcrTable, SkewEstimator};
pub use config::{ClockMode, DemuxConfig};
pub use crc32::crc32_mpeg2;
pub use demuxer::{ByteSource, InputRange, ReaderSource, TsDemuxer};
pub use descriptor::Descriptor;
pub use error::TsError;
pub use packet::{PID_CAT, PID_NULL, PID_PAT, TsPacket};
pub use packetizer::{PacketResult, Packetizer};
pub use pes::PesHeader;
pub use reassembler::{EsAccumulator, EsOutput, PesState};
pub use registry::{Program, ProgramEvent, ProgramTags, Registry, Stream};
pub use section::{Section, SectionAssembler};
pub use sink::{AccessUnit, DemuxEvent, DemuxSink, EventCollector, UnitStatistics};
pub use tables::{Pat, Pmt, StreamType, Table};
pub use timestamp::RolloverTracker;

/// Result type for demuxing operations
pub type Result<T> = std::result::Result<T, TsError>;
