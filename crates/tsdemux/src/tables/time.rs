//! DVB time encoding and the TDT/TOT tables.

use std::time::Duration;

use chrono::{DateTime, Days, NaiveDate, NaiveTime, Utc};

use crate::descriptor::{Descriptor, parse_descriptors};
use crate::section::Section;
use crate::{Result, TsError};

/// Time and date table id.
pub const TABLE_ID_TDT: u8 = 0x70;
/// Time offset table id.
pub const TABLE_ID_TOT: u8 = 0x73;

fn bcd(b: u8) -> Option<u32> {
    let (hi, lo) = (b >> 4, b & 0x0F);
    (hi < 10 && lo < 10).then_some((hi * 10 + lo) as u32)
}

/// Decode 16-bit MJD followed by 6 BCD digits (hhmmss).
///
/// All bits set means "undefined" and yields `None`.
pub fn parse_utc_time(data: &[u8]) -> Option<DateTime<Utc>> {
    let raw: &[u8; 5] = data.get(..5)?.try_into().ok()?;
    if raw.iter().all(|&b| b == 0xFF) {
        return None;
    }
    let mjd = u16::from_be_bytes([raw[0], raw[1]]) as u64;
    let date = NaiveDate::from_ymd_opt(1858, 11, 17)?.checked_add_days(Days::new(mjd))?;
    let time = NaiveTime::from_hms_opt(bcd(raw[2])?, bcd(raw[3])?, bcd(raw[4])?)?;
    Some(date.and_time(time).and_utc())
}

/// Decode a 6-digit BCD duration (hhmmss).
pub fn parse_bcd_duration(data: &[u8]) -> Option<Duration> {
    let raw = data.get(..3)?;
    let secs = bcd(raw[0])? as u64 * 3600 + bcd(raw[1])? as u64 * 60 + bcd(raw[2])? as u64;
    Some(Duration::from_secs(secs))
}

/// Decode a 4-digit BCD duration (hhmm).
pub fn parse_bcd_hhmm(data: &[u8]) -> Option<Duration> {
    let raw = data.get(..2)?;
    Some(Duration::from_secs(
        bcd(raw[0])? as u64 * 3600 + bcd(raw[1])? as u64 * 60,
    ))
}

/// Time and date table
#[derive(Debug, Clone, PartialEq)]
pub struct TimeDateTable {
    pub utc_time: DateTime<Utc>,
}

impl TimeDateTable {
    pub fn parse(section: &Section) -> Result<Self> {
        if section.table_id != TABLE_ID_TDT {
            return Err(TsError::InvalidTableId {
                expected: TABLE_ID_TDT,
                actual: section.table_id,
            });
        }
        let utc_time = parse_utc_time(section.body())
            .ok_or_else(|| TsError::ParseError("invalid TDT time".into()))?;
        Ok(TimeDateTable { utc_time })
    }
}

/// Time offset table
#[derive(Debug, Clone)]
pub struct TimeOffsetTable {
    pub utc_time: DateTime<Utc>,
    pub descriptors: Vec<Descriptor>,
}

impl TimeOffsetTable {
    pub fn parse(section: &Section) -> Result<Self> {
        if section.table_id != TABLE_ID_TOT {
            return Err(TsError::InvalidTableId {
                expected: TABLE_ID_TOT,
                actual: section.table_id,
            });
        }
        let body = section.body();
        if body.len() < 11 {
            return Err(TsError::InsufficientData {
                expected: 11,
                actual: body.len(),
            });
        }
        let utc_time =
            parse_utc_time(body).ok_or_else(|| TsError::ParseError("invalid TOT time".into()))?;
        let loop_length = u16::from_be_bytes([body[5] & 0x0F, body[6]]) as usize;
        // the short-form body still ends with a CRC_32
        let descriptors = body
            .get(7..7 + loop_length)
            .filter(|_| 7 + loop_length + 4 <= body.len())
            .ok_or(TsError::MalformedDescriptorLoop { offset: 7 })?;
        Ok(TimeOffsetTable {
            utc_time,
            descriptors: parse_descriptors(descriptors)?,
        })
    }
}
