use crate::adaptation_field::{self, AdaptationField, Pcr};
use crate::{Result, TsError};
use bytes::Bytes;

/// Sync byte opening every transport packet.
pub const SYNC_BYTE: u8 = 0x47;

/// Plain transport packet.
pub const TS_PACKET_SIZE: usize = 188;
/// M2TS packet: 4-byte timecode prefix followed by a 188-byte packet.
pub const M2TS_PACKET_SIZE: usize = 192;
/// DVB-ASI packet with 16 bytes of Reed-Solomon parity.
pub const DVB_ASI_PACKET_SIZE: usize = 204;
/// ATSC packet with 20 bytes of parity.
pub const ATSC_PACKET_SIZE: usize = 208;

/// Every packet size the packetizer can lock onto, in probe order.
pub const PACKET_SIZES: [usize; 4] = [
    TS_PACKET_SIZE,
    M2TS_PACKET_SIZE,
    DVB_ASI_PACKET_SIZE,
    ATSC_PACKET_SIZE,
];

/// Number of addressable PIDs.
pub const PID_SPACE: usize = 0x2000;

/// PAT PID (always 0x0000)
pub const PID_PAT: u16 = 0x0000;
/// CAT PID (always 0x0001)
pub const PID_CAT: u16 = 0x0001;
/// Transport stream description table
pub const PID_TSDT: u16 = 0x0002;
/// IPMP control information
pub const PID_IPMP: u16 = 0x0003;
/// NIT/ST
pub const PID_NIT: u16 = 0x0010;
/// SDT/BAT/ST
pub const PID_SDT: u16 = 0x0011;
/// EIT/ST/CIT
pub const PID_EIT: u16 = 0x0012;
/// TDT/TOT/ST
pub const PID_TDT: u16 = 0x0014;
/// Network synchronisation
pub const PID_NETWORK_SYNC: u16 = 0x0015;
/// ATSC PSIP base PID
pub const PID_ATSC_PSIP: u16 = 0x1FFB;
/// NULL PID (always 0x1FFF)
pub const PID_NULL: u16 = 0x1FFF;

/// A parsed transport packet.
///
/// Cheap to clone: the payload is a slice of the packetizer's buffer.
#[derive(Debug, Clone)]
pub struct TsPacket {
    pub pid: u16,
    pub payload_unit_start_indicator: bool,
    pub transport_priority: bool,
    /// adaptation_field_control, after the 183-byte payload fix-up
    pub adaptation_field_control: u8,
    pub continuity_counter: u8,
    pub adaptation_field: Option<AdaptationField>,
    pub payload: Option<Bytes>,
    /// Stream offset of the first byte of the packet (prefix included)
    pub offset: u64,
}

impl TsPacket {
    /// Parse the 188 bytes that start at a sync byte.
    ///
    /// Errored, scrambled or structurally broken packets are rejected so the
    /// caller can drop them and resynchronise.
    pub fn parse(data: Bytes, offset: u64) -> Result<Self> {
        if data.len() < TS_PACKET_SIZE {
            return Err(TsError::InvalidPacketSize(data.len()));
        }
        let data = data.slice(..TS_PACKET_SIZE);
        if data[0] != SYNC_BYTE {
            return Err(TsError::InvalidSyncByte(data[0]));
        }

        let pid = u16::from_be_bytes([data[1] & 0x1F, data[2]]);
        if data[1] & 0x80 != 0 {
            return Err(TsError::TransportError(pid));
        }
        if data[3] & 0xC0 != 0 {
            return Err(TsError::Scrambled(pid));
        }

        let mut control = (data[3] >> 4) & 0x03;
        let mut pos = 4;
        let mut adaptation_field = None;

        if control & 0x02 != 0 {
            let length = data[pos];
            pos += 1;
            if !adaptation_field::check_length(length, control, TS_PACKET_SIZE - pos)? {
                control &= !0x01;
            }
            adaptation_field = Some(AdaptationField::parse(&data[pos..pos + length as usize]));
            pos += length as usize;
        }

        let payload = (control & 0x01 != 0 && pos < TS_PACKET_SIZE).then(|| data.slice(pos..));

        Ok(TsPacket {
            pid,
            payload_unit_start_indicator: data[1] & 0x40 != 0,
            transport_priority: data[1] & 0x20 != 0,
            adaptation_field_control: control,
            continuity_counter: data[3] & 0x0F,
            adaptation_field,
            payload,
            offset,
        })
    }

    pub fn has_payload(&self) -> bool {
        self.adaptation_field_control & 0x01 != 0
    }

    pub fn pcr(&self) -> Option<Pcr> {
        self.adaptation_field.and_then(|af| af.pcr)
    }

    pub fn opcr(&self) -> Option<Pcr> {
        self.adaptation_field.and_then(|af| af.opcr)
    }

    /// Whether the adaptation field flags a discontinuity.
    pub fn is_discontinuity(&self) -> bool {
        self.adaptation_field
            .is_some_and(|af| af.discontinuity_indicator)
    }

    pub fn is_random_access(&self) -> bool {
        self.adaptation_field
            .is_some_and(|af| af.random_access_indicator)
    }
}
