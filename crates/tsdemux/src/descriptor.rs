use std::time::Duration;

use bytes::{Buf, Bytes};
use chrono::{DateTime, Utc};
use tracing::trace;

use crate::tables::time::{parse_bcd_hhmm, parse_utc_time};
use crate::text::decode_dvb_text;
use crate::{Result, TsError};

/// Registration descriptor (tag 0x05)
pub const TAG_REGISTRATION: u8 = 0x05;
/// Conditional access descriptor (tag 0x09)
pub const TAG_CA: u8 = 0x09;
/// ISO 639 language descriptor (tag 0x0A)
pub const TAG_ISO_639_LANGUAGE: u8 = 0x0A;
/// Network name descriptor (tag 0x40)
pub const TAG_NETWORK_NAME: u8 = 0x40;
/// Service list descriptor (tag 0x41)
pub const TAG_SERVICE_LIST: u8 = 0x41;
/// Satellite delivery system descriptor (tag 0x43)
pub const TAG_SATELLITE_DELIVERY: u8 = 0x43;
/// Cable delivery system descriptor (tag 0x44)
pub const TAG_CABLE_DELIVERY: u8 = 0x44;
/// Service descriptor (tag 0x48)
pub const TAG_SERVICE: u8 = 0x48;
/// Short event descriptor (tag 0x4D)
pub const TAG_SHORT_EVENT: u8 = 0x4D;
/// Extended event descriptor (tag 0x4E)
pub const TAG_EXTENDED_EVENT: u8 = 0x4E;
/// Component descriptor (tag 0x50)
pub const TAG_COMPONENT: u8 = 0x50;
/// Stream identifier descriptor (tag 0x52)
pub const TAG_STREAM_IDENTIFIER: u8 = 0x52;
/// Local time offset descriptor (tag 0x58)
pub const TAG_LOCAL_TIME_OFFSET: u8 = 0x58;
/// Terrestrial delivery system descriptor (tag 0x5A)
pub const TAG_TERRESTRIAL_DELIVERY: u8 = 0x5A;
/// Data broadcast descriptor (tag 0x64)
pub const TAG_DATA_BROADCAST: u8 = 0x64;
/// AC-3 audio descriptor (tag 0x6A)
pub const TAG_AC3: u8 = 0x6A;
/// Enhanced AC-3 audio descriptor (tag 0x7A)
pub const TAG_EAC3: u8 = 0x7A;

/// Raw descriptor: tag plus body.
#[derive(Debug, Clone)]
pub struct DescriptorRef {
    pub tag: u8,
    pub data: Bytes,
}

/// Iterator over a TLV descriptor loop.
///
/// Each descriptor is `[tag: u8][length: u8][data: length bytes]`. A
/// descriptor running past the end of the loop yields one error and ends
/// the iteration.
#[derive(Debug, Clone)]
pub struct DescriptorIterator {
    data: Bytes,
    consumed: usize,
}

impl DescriptorIterator {
    pub fn new(data: Bytes) -> Self {
        DescriptorIterator { data, consumed: 0 }
    }
}

impl Iterator for DescriptorIterator {
    type Item = Result<DescriptorRef>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.data.is_empty() {
            return None;
        }
        if self.data.remaining() < 2 || self.data.remaining() < 2 + self.data[1] as usize {
            self.data.advance(self.data.remaining());
            return Some(Err(TsError::MalformedDescriptorLoop {
                offset: self.consumed,
            }));
        }
        let tag = self.data.get_u8();
        let length = self.data.get_u8() as usize;
        self.consumed += 2 + length;
        Some(Ok(DescriptorRef {
            tag,
            data: self.data.split_to(length),
        }))
    }
}

/// Decode a whole descriptor loop.
///
/// An overrunning loop fails as a whole; descriptors too short for their
/// fixed fields are kept as [`Descriptor::Unknown`].
pub fn parse_descriptors(data: &[u8]) -> Result<Vec<Descriptor>> {
    DescriptorIterator::new(Bytes::copy_from_slice(data))
        .map(|raw| {
            let raw = raw?;
            Ok(Descriptor::parse(raw.tag, &raw.data).unwrap_or_else(|e| {
                trace!(tag = raw.tag, error = %e, "keeping undecodable descriptor as raw");
                Descriptor::Unknown {
                    tag: raw.tag,
                    data: raw.data,
                }
            }))
        })
        .collect()
}

/// A single ISO 639 language entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LanguageEntry {
    /// 3-character ISO 639-2 language code (e.g. b"eng")
    pub language_code: [u8; 3],
    /// 0 undefined, 1 clean effects, 2 hearing impaired, 3 visual impaired commentary
    pub audio_type: u8,
}

/// AC-3 audio descriptor body.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Ac3Descriptor {
    pub component_type: Option<u8>,
    pub bsid: Option<u8>,
    pub mainid: Option<u8>,
    pub asvc: Option<u8>,
}

/// Enhanced AC-3 audio descriptor body.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Eac3Descriptor {
    pub component_type: Option<u8>,
    pub bsid: Option<u8>,
    pub mainid: Option<u8>,
    pub asvc: Option<u8>,
    pub mixinfo_exists: bool,
    pub substream1: Option<u8>,
    pub substream2: Option<u8>,
    pub substream3: Option<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SatelliteDelivery {
    /// Frequency in 10 kHz units
    pub frequency: u32,
    /// Orbital position in 0.1 degree units
    pub orbital_position: u16,
    pub west_east_flag: bool,
    pub polarization: u8,
    pub roll_off: u8,
    /// 0 DVB-S, 1 DVB-S2
    pub modulation_system: u8,
    pub modulation_type: u8,
    /// Symbol rate in 100 symbol/s units
    pub symbol_rate: u32,
    pub fec_inner: u8,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CableDelivery {
    /// Frequency in 100 Hz units
    pub frequency: u32,
    pub fec_outer: u8,
    pub modulation: u8,
    /// Symbol rate in 100 symbol/s units
    pub symbol_rate: u32,
    pub fec_inner: u8,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TerrestrialDelivery {
    /// Centre frequency in Hz
    pub centre_frequency: u64,
    pub bandwidth: u8,
    pub priority: bool,
    pub time_slicing_indicator: bool,
    pub mpe_fec_indicator: bool,
    pub constellation: u8,
    pub hierarchy_information: u8,
    pub code_rate_hp: u8,
    pub code_rate_lp: u8,
    pub guard_interval: u8,
    pub transmission_mode: u8,
    pub other_frequency_flag: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtendedEventItem {
    pub description: String,
    pub item: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalTimeOffsetEntry {
    pub country_code: [u8; 3],
    pub country_region_id: u8,
    /// Signed offset from UTC in minutes
    pub local_time_offset_minutes: i32,
    pub time_of_change: Option<DateTime<Utc>>,
    pub next_time_offset_minutes: i32,
}

/// Decoded MPEG-2 / DVB descriptor.
#[derive(Debug, Clone, PartialEq)]
pub enum Descriptor {
    Registration {
        format_identifier: u32,
        additional_info: Bytes,
    },
    Iso639Language(Vec<LanguageEntry>),
    ConditionalAccess {
        ca_system_id: u16,
        ca_pid: u16,
        private_data: Bytes,
    },
    NetworkName(String),
    /// (service_id, service_type) pairs
    ServiceList(Vec<(u16, u8)>),
    SatelliteDelivery(SatelliteDelivery),
    CableDelivery(CableDelivery),
    TerrestrialDelivery(TerrestrialDelivery),
    Service {
        service_type: u8,
        provider_name: String,
        service_name: String,
    },
    ShortEvent {
        language_code: [u8; 3],
        event_name: String,
        text: String,
    },
    ExtendedEvent {
        descriptor_number: u8,
        last_descriptor_number: u8,
        language_code: [u8; 3],
        items: Vec<ExtendedEventItem>,
        text: String,
    },
    Component {
        stream_content: u8,
        component_type: u8,
        component_tag: u8,
        language_code: [u8; 3],
        text: String,
    },
    StreamIdentifier(u8),
    DataBroadcast {
        data_broadcast_id: u16,
        component_tag: u8,
        selector: Bytes,
        language_code: [u8; 3],
        text: String,
    },
    Ac3(Ac3Descriptor),
    Eac3(Eac3Descriptor),
    LocalTimeOffset(Vec<LocalTimeOffsetEntry>),
    Unknown {
        tag: u8,
        data: Bytes,
    },
}

fn need(tag: u8, data: &[u8], len: usize) -> Result<()> {
    if data.len() < len {
        return Err(TsError::DescriptorTooShort {
            tag,
            len: data.len(),
        });
    }
    Ok(())
}

fn bcd_digits(data: &[u8]) -> u32 {
    data.iter()
        .fold(0, |acc, &b| acc * 100 + (b >> 4) as u32 * 10 + (b & 0x0F) as u32)
}

fn lang(data: &[u8]) -> [u8; 3] {
    [data[0], data[1], data[2]]
}

/// Read a length-prefixed text field, returning it and the rest.
fn text_field(tag: u8, data: &[u8]) -> Result<(String, &[u8])> {
    need(tag, data, 1)?;
    let len = data[0] as usize;
    need(tag, data, 1 + len)?;
    Ok((decode_dvb_text(&data[1..1 + len]), &data[1 + len..]))
}

/// Optional single-byte fields of the AC-3 family, in flag order.
fn flagged_bytes(flags: u8, masks: &[u8], data: &[u8]) -> (Vec<Option<u8>>, usize) {
    let mut pos = 0;
    let values = masks
        .iter()
        .map(|&mask| {
            if flags & mask == 0 {
                return None;
            }
            let value = data.get(pos).copied();
            pos += 1;
            value
        })
        .collect();
    (values, pos)
}

impl Descriptor {
    /// Decode one descriptor body.
    pub fn parse(tag: u8, data: &[u8]) -> Result<Self> {
        let body = Bytes::copy_from_slice(data);
        Ok(match tag {
            TAG_REGISTRATION => {
                need(tag, data, 4)?;
                Descriptor::Registration {
                    format_identifier: u32::from_be_bytes([data[0], data[1], data[2], data[3]]),
                    additional_info: body.slice(4..),
                }
            }
            TAG_CA => {
                need(tag, data, 4)?;
                Descriptor::ConditionalAccess {
                    ca_system_id: u16::from_be_bytes([data[0], data[1]]),
                    ca_pid: u16::from_be_bytes([data[2] & 0x1F, data[3]]),
                    private_data: body.slice(4..),
                }
            }
            TAG_ISO_639_LANGUAGE => Descriptor::Iso639Language(
                data.chunks_exact(4)
                    .map(|c| LanguageEntry {
                        language_code: lang(c),
                        audio_type: c[3],
                    })
                    .collect(),
            ),
            TAG_NETWORK_NAME => Descriptor::NetworkName(decode_dvb_text(data)),
            TAG_SERVICE_LIST => Descriptor::ServiceList(
                data.chunks_exact(3)
                    .map(|c| (u16::from_be_bytes([c[0], c[1]]), c[2]))
                    .collect(),
            ),
            TAG_SATELLITE_DELIVERY => {
                need(tag, data, 11)?;
                Descriptor::SatelliteDelivery(SatelliteDelivery {
                    frequency: bcd_digits(&data[0..4]),
                    orbital_position: bcd_digits(&data[4..6]) as u16,
                    west_east_flag: data[6] & 0x80 != 0,
                    polarization: (data[6] >> 5) & 0x03,
                    roll_off: (data[6] >> 3) & 0x03,
                    modulation_system: (data[6] >> 2) & 0x01,
                    modulation_type: data[6] & 0x03,
                    symbol_rate: bcd_digits(&data[7..11]) / 10,
                    fec_inner: data[10] & 0x0F,
                })
            }
            TAG_CABLE_DELIVERY => {
                need(tag, data, 11)?;
                Descriptor::CableDelivery(CableDelivery {
                    frequency: bcd_digits(&data[0..4]),
                    fec_outer: data[5] & 0x0F,
                    modulation: data[6],
                    symbol_rate: bcd_digits(&data[7..11]) / 10,
                    fec_inner: data[10] & 0x0F,
                })
            }
            TAG_TERRESTRIAL_DELIVERY => {
                need(tag, data, 11)?;
                let frequency = u32::from_be_bytes([data[0], data[1], data[2], data[3]]);
                Descriptor::TerrestrialDelivery(TerrestrialDelivery {
                    centre_frequency: frequency as u64 * 10,
                    bandwidth: data[4] >> 5,
                    priority: data[4] & 0x10 != 0,
                    time_slicing_indicator: data[4] & 0x08 == 0,
                    mpe_fec_indicator: data[4] & 0x04 == 0,
                    constellation: data[5] >> 6,
                    hierarchy_information: (data[5] >> 3) & 0x07,
                    code_rate_hp: data[5] & 0x07,
                    code_rate_lp: data[6] >> 5,
                    guard_interval: (data[6] >> 3) & 0x03,
                    transmission_mode: (data[6] >> 1) & 0x03,
                    other_frequency_flag: data[6] & 0x01 != 0,
                })
            }
            TAG_SERVICE => {
                need(tag, data, 1)?;
                let (provider_name, rest) = text_field(tag, &data[1..])?;
                let (service_name, _) = text_field(tag, rest)?;
                Descriptor::Service {
                    service_type: data[0],
                    provider_name,
                    service_name,
                }
            }
            TAG_SHORT_EVENT => {
                need(tag, data, 3)?;
                let (event_name, rest) = text_field(tag, &data[3..])?;
                let (text, _) = text_field(tag, rest)?;
                Descriptor::ShortEvent {
                    language_code: lang(data),
                    event_name,
                    text,
                }
            }
            TAG_EXTENDED_EVENT => {
                need(tag, data, 5)?;
                let items_len = data[4] as usize;
                need(tag, data, 5 + items_len)?;
                let mut items = Vec::new();
                let mut rest = &data[5..5 + items_len];
                while !rest.is_empty() {
                    let (description, r) = text_field(tag, rest)?;
                    let (item, r) = text_field(tag, r)?;
                    items.push(ExtendedEventItem { description, item });
                    rest = r;
                }
                let (text, _) = text_field(tag, &data[5 + items_len..])?;
                Descriptor::ExtendedEvent {
                    descriptor_number: data[0] >> 4,
                    last_descriptor_number: data[0] & 0x0F,
                    language_code: lang(&data[1..]),
                    items,
                    text,
                }
            }
            TAG_COMPONENT => {
                need(tag, data, 6)?;
                Descriptor::Component {
                    stream_content: data[0] & 0x0F,
                    component_type: data[1],
                    component_tag: data[2],
                    language_code: lang(&data[3..]),
                    text: decode_dvb_text(&data[6..]),
                }
            }
            TAG_STREAM_IDENTIFIER => {
                need(tag, data, 1)?;
                Descriptor::StreamIdentifier(data[0])
            }
            TAG_DATA_BROADCAST => {
                need(tag, data, 4)?;
                let selector_len = data[3] as usize;
                need(tag, data, 4 + selector_len + 3)?;
                let after = 4 + selector_len;
                let (text, _) = text_field(tag, &data[after + 3..])?;
                Descriptor::DataBroadcast {
                    data_broadcast_id: u16::from_be_bytes([data[0], data[1]]),
                    component_tag: data[2],
                    selector: body.slice(4..after),
                    language_code: lang(&data[after..]),
                    text,
                }
            }
            TAG_AC3 => {
                need(tag, data, 1)?;
                let (v, _) = flagged_bytes(data[0], &[0x80, 0x40, 0x20, 0x10], &data[1..]);
                Descriptor::Ac3(Ac3Descriptor {
                    component_type: v[0],
                    bsid: v[1],
                    mainid: v[2],
                    asvc: v[3],
                })
            }
            TAG_EAC3 => {
                need(tag, data, 1)?;
                let flags = data[0];
                let (v, _) = flagged_bytes(
                    flags,
                    &[0x80, 0x40, 0x20, 0x10, 0x04, 0x02, 0x01],
                    &data[1..],
                );
                Descriptor::Eac3(Eac3Descriptor {
                    component_type: v[0],
                    bsid: v[1],
                    mainid: v[2],
                    asvc: v[3],
                    mixinfo_exists: flags & 0x08 != 0,
                    substream1: v[4],
                    substream2: v[5],
                    substream3: v[6],
                })
            }
            TAG_LOCAL_TIME_OFFSET => Descriptor::LocalTimeOffset(
                data.chunks_exact(13)
                    .map(|c| {
                        let sign = if c[3] & 0x01 != 0 { -1 } else { 1 };
                        let minutes = |d: Option<Duration>| {
                            sign * d.map_or(0, |d| (d.as_secs() / 60) as i32)
                        };
                        LocalTimeOffsetEntry {
                            country_code: lang(c),
                            country_region_id: c[3] >> 2,
                            local_time_offset_minutes: minutes(parse_bcd_hhmm(&c[4..6])),
                            time_of_change: parse_utc_time(&c[6..11]),
                            next_time_offset_minutes: minutes(parse_bcd_hhmm(&c[11..13])),
                        }
                    })
                    .collect(),
            ),
            _ => Descriptor::Unknown { tag, data: body },
        })
    }

    /// Tag byte of the descriptor.
    pub fn tag(&self) -> u8 {
        match self {
            Descriptor::Registration { .. } => TAG_REGISTRATION,
            Descriptor::Iso639Language(_) => TAG_ISO_639_LANGUAGE,
            Descriptor::ConditionalAccess { .. } => TAG_CA,
            Descriptor::NetworkName(_) => TAG_NETWORK_NAME,
            Descriptor::ServiceList(_) => TAG_SERVICE_LIST,
            Descriptor::SatelliteDelivery(_) => TAG_SATELLITE_DELIVERY,
            Descriptor::CableDelivery(_) => TAG_CABLE_DELIVERY,
            Descriptor::TerrestrialDelivery(_) => TAG_TERRESTRIAL_DELIVERY,
            Descriptor::Service { .. } => TAG_SERVICE,
            Descriptor::ShortEvent { .. } => TAG_SHORT_EVENT,
            Descriptor::ExtendedEvent { .. } => TAG_EXTENDED_EVENT,
            Descriptor::Component { .. } => TAG_COMPONENT,
            Descriptor::StreamIdentifier(_) => TAG_STREAM_IDENTIFIER,
            Descriptor::DataBroadcast { .. } => TAG_DATA_BROADCAST,
            Descriptor::Ac3(_) => TAG_AC3,
            Descriptor::Eac3(_) => TAG_EAC3,
            Descriptor::LocalTimeOffset(_) => TAG_LOCAL_TIME_OFFSET,
            Descriptor::Unknown { tag, .. } => *tag,
        }
    }
}

/// First registration format identifier in a descriptor list.
pub fn registration_id(descriptors: &[Descriptor]) -> Option<u32> {
    descriptors.iter().find_map(|d| match d {
        Descriptor::Registration {
            format_identifier, ..
        } => Some(*format_identifier),
        _ => None,
    })
}
