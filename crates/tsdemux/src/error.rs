//! Error types for transport stream demultiplexing.

use thiserror::Error;

/// Errors that can occur while parsing or demultiplexing a transport stream.
///
/// Most variants describe a single damaged record (packet, section, table,
/// PES header). Those are logged and dropped by the demuxer; only
/// [`TsError::PacketSizeNotFound`], [`TsError::NoInitialPcr`] and
/// [`TsError::Io`] escape from [`crate::TsDemuxer`] operations.
#[derive(Error, Debug)]
pub enum TsError {
    /// I/O error from a pull-mode byte source.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A packet slice did not have the expected length.
    #[error("invalid packet size: {0}")]
    InvalidPacketSize(usize),

    /// The byte at the sync position was not 0x47.
    #[error("invalid sync byte: 0x{0:02x}")]
    InvalidSyncByte(u8),

    /// The transport_error_indicator bit was set.
    #[error("transport error indicator set on PID 0x{0:04x}")]
    TransportError(u16),

    /// The packet payload is scrambled.
    #[error("scrambled packet on PID 0x{0:04x}")]
    Scrambled(u16),

    /// The adaptation field length is out of range for the packet.
    #[error("invalid adaptation field length {length} (control 0b{control:02b})")]
    InvalidAdaptationFieldLength {
        /// Declared length.
        length: u8,
        /// adaptation_field_control bits.
        control: u8,
    },

    /// Not enough bytes to decode a structure.
    #[error("insufficient data: expected {expected} bytes, got {actual}")]
    InsufficientData {
        /// Bytes required.
        expected: usize,
        /// Bytes available.
        actual: usize,
    },

    /// A section carried an unexpected table id.
    #[error("invalid table id: expected 0x{expected:02x}, got 0x{actual:02x}")]
    InvalidTableId {
        /// Table id the decoder handles.
        expected: u8,
        /// Table id found in the section.
        actual: u8,
    },

    /// The declared section length is inconsistent with its content.
    #[error("invalid section length: {0}")]
    InvalidSectionLength(u16),

    /// CRC-32/MPEG-2 check failed.
    #[error("CRC32 mismatch: stored 0x{expected:08x}, calculated 0x{calculated:08x}")]
    Crc32Mismatch {
        /// CRC stored at the end of the section.
        expected: u32,
        /// CRC computed over the section body.
        calculated: u32,
    },

    /// PES packet did not start with `00 00 01`.
    #[error("invalid PES start code")]
    InvalidPesStartCode,

    /// Forbidden PTS_DTS_flags value (`01`).
    #[error("invalid PTS/DTS flags: {0:#04b}")]
    InvalidPtsDtsFlags(u8),

    /// A PTS/DTS field had its marker bits cleared.
    #[error("invalid timestamp marker bits")]
    InvalidTimestampMarker,

    /// A descriptor or entry loop overran its enclosing structure.
    #[error("malformed descriptor loop at offset {offset}")]
    MalformedDescriptorLoop {
        /// Offset of the entry that overran.
        offset: usize,
    },

    /// A descriptor body was shorter than its fixed fields.
    #[error("descriptor 0x{tag:02x} too short: {len} bytes")]
    DescriptorTooShort {
        /// Descriptor tag.
        tag: u8,
        /// Body length.
        len: usize,
    },

    /// A PMT arrived before any PAT.
    #[error("PMT on PID 0x{0:04x} received before any PAT")]
    PmtBeforePat(u16),

    /// A PMT referenced a program number the PAT does not list.
    #[error("unknown program {0}")]
    UnknownProgram(u16),

    /// Packet size discovery gave up without finding a packet size.
    #[error("no packet size found after scanning {0} bytes")]
    PacketSizeNotFound(u64),

    /// Pull-mode scan saw no PCR in the head of the source.
    #[error("no PCR found within the first {0} bytes")]
    NoInitialPcr(u64),

    /// Generic parse error.
    #[error("parse error: {0}")]
    ParseError(String),
}
