//! Datetime encoding and decoding
//!
//! Every datetime type shares one packed layout:
//! - Bytes 0-2: date, `year:15 (signed) | month:4 | day:5`
//! - Time: `hour:5 | minute:6 | second:6 | fraction`, right-aligned in
//!   5 bytes with a 20-bit microsecond fraction, or in 6 bytes with a
//!   30-bit nanosecond fraction for `DATETIME2` types
//! - 2 bytes: time zone offset in minutes (zero for types without a zone)
//! - 2 bytes: reserved, zero
//!
//! That gives 12 bytes for `DATE`..`DATETIME_TZ` and 13 for `DATETIME2*`.

use chrono::{DateTime, Datelike, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Timelike};

use crate::constants::col_type;
use crate::error::{Error, Result};

/// Length of the microsecond layout
pub const DATETIME_LEN: usize = 12;

/// Length of the nanosecond layout
pub const DATETIME2_LEN: usize = 13;

/// Decoded datetime value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DmDateTime {
    /// Year (-16384..=16383)
    pub year: i32,
    /// Month (1-12)
    pub month: u8,
    /// Day (1-31)
    pub day: u8,
    /// Hour (0-23)
    pub hour: u8,
    /// Minute (0-59)
    pub minute: u8,
    /// Second (0-59)
    pub second: u8,
    /// Fractional part in nanoseconds
    pub nanos: u32,
    /// Offset from UTC in minutes, for zoned types
    pub tz_minutes: Option<i16>,
}

impl Default for DmDateTime {
    fn default() -> Self {
        Self {
            year: 1900,
            month: 1,
            day: 1,
            hour: 0,
            minute: 0,
            second: 0,
            nanos: 0,
            tz_minutes: None,
        }
    }
}

fn uses_nanos(code: i32) -> bool {
    matches!(code, col_type::DATETIME2 | col_type::DATETIME2_TZ)
}

fn is_zoned(code: i32) -> bool {
    matches!(code, col_type::TIME_TZ | col_type::DATETIME_TZ | col_type::DATETIME2_TZ)
}

impl DmDateTime {
    /// Create a value without a zone
    pub fn new(year: i32, month: u8, day: u8, hour: u8, minute: u8, second: u8, nanos: u32) -> Self {
        Self {
            year,
            month,
            day,
            hour,
            minute,
            second,
            nanos,
            tz_minutes: None,
        }
    }

    /// Attach a UTC offset
    pub fn with_offset(mut self, minutes: i16) -> Self {
        self.tz_minutes = Some(minutes);
        self
    }

    /// Decode a cell of type `code`
    pub fn from_wire(data: &[u8], code: i32) -> Result<Self> {
        let nanos_form = uses_nanos(code);
        let expected = if nanos_form { DATETIME2_LEN } else { DATETIME_LEN };
        if data.len() < expected {
            return Err(Error::DataConversion(format!(
                "{} needs {expected} bytes, got {}",
                col_type::name(code),
                data.len()
            )));
        }

        let date = u32::from_be_bytes([0, data[0], data[1], data[2]]);
        // sign-extend the 15-bit year
        let year = (((date >> 9) as i32) << 17) >> 17;
        let month = ((date >> 5) & 0x0F) as u8;
        let day = (date & 0x1F) as u8;

        let time_len = if nanos_form { 6 } else { 5 };
        let time = data[3..3 + time_len]
            .iter()
            .fold(0u64, |acc, b| (acc << 8) | *b as u64);
        let (hour, minute, second, nanos) = if nanos_form {
            (
                (time >> 42) & 0x1F,
                (time >> 36) & 0x3F,
                (time >> 30) & 0x3F,
                (time & 0x3FFF_FFFF) as u32,
            )
        } else {
            (
                (time >> 32) & 0x1F,
                (time >> 26) & 0x3F,
                (time >> 20) & 0x3F,
                (time & 0xF_FFFF) as u32 * 1000,
            )
        };
        let tz_at = 3 + time_len;
        let tz = i16::from_be_bytes([data[tz_at], data[tz_at + 1]]);

        Ok(Self {
            year,
            month,
            day,
            hour: hour as u8,
            minute: minute as u8,
            second: second as u8,
            nanos,
            tz_minutes: is_zoned(code).then_some(tz),
        })
    }

    /// Encode as a cell of type `code`
    pub fn to_wire(&self, code: i32) -> Result<Vec<u8>> {
        if !(-16384..=16383).contains(&self.year)
            || self.month > 12
            || self.day > 31
            || self.hour > 23
            || self.minute > 59
            || self.second > 59
            || self.nanos > 999_999_999
        {
            return Err(Error::DataConversion(format!("datetime out of range: {self}")));
        }
        let nanos_form = uses_nanos(code);
        let mut out = Vec::with_capacity(DATETIME2_LEN);
        let date = (((self.year as u32) & 0x7FFF) << 9) | ((self.month as u32) << 5) | self.day as u32;
        out.extend_from_slice(&date.to_be_bytes()[1..]);

        let (h, m, s) = (self.hour as u64, self.minute as u64, self.second as u64);
        if nanos_form {
            let time = (h << 42) | (m << 36) | (s << 30) | self.nanos as u64;
            out.extend_from_slice(&time.to_be_bytes()[2..]);
        } else {
            let time = (h << 32) | (m << 26) | (s << 20) | (self.nanos / 1000) as u64;
            out.extend_from_slice(&time.to_be_bytes()[3..]);
        }
        let tz = if is_zoned(code) { self.tz_minutes.unwrap_or(0) } else { 0 };
        out.extend_from_slice(&tz.to_be_bytes());
        out.extend_from_slice(&[0, 0]);
        Ok(out)
    }

    /// Convert to a naive date-time, ignoring the zone
    pub fn to_naive(&self) -> Result<NaiveDateTime> {
        let date = NaiveDate::from_ymd_opt(self.year, self.month as u32, self.day as u32)
            .ok_or_else(|| Error::DataConversion(format!("invalid date {self}")))?;
        let time = NaiveTime::from_hms_nano_opt(
            self.hour as u32,
            self.minute as u32,
            self.second as u32,
            self.nanos,
        )
        .ok_or_else(|| Error::DataConversion(format!("invalid time {self}")))?;
        Ok(NaiveDateTime::new(date, time))
    }

    /// Convert to a zoned date-time; values without a zone are taken as UTC
    pub fn to_fixed_offset(&self) -> Result<DateTime<FixedOffset>> {
        let offset = FixedOffset::east_opt(self.tz_minutes.unwrap_or(0) as i32 * 60)
            .ok_or_else(|| Error::DataConversion(format!("invalid offset in {self}")))?;
        offset
            .from_local_datetime(&self.to_naive()?)
            .single()
            .ok_or_else(|| Error::DataConversion(format!("ambiguous local time {self}")))
    }
}

impl std::fmt::Display for DmDateTime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{:04}-{:02}-{:02} {:02}:{:02}:{:02}",
            self.year, self.month, self.day, self.hour, self.minute, self.second
        )?;
        if self.nanos != 0 {
            let frac = format!("{:09}", self.nanos);
            write!(f, ".{}", frac.trim_end_matches('0'))?;
        }
        if let Some(tz) = self.tz_minutes {
            let sign = if tz < 0 { '-' } else { '+' };
            let abs = tz.unsigned_abs();
            write!(f, " {sign}{:02}:{:02}", abs / 60, abs % 60)?;
        }
        Ok(())
    }
}

impl From<NaiveDateTime> for DmDateTime {
    fn from(dt: NaiveDateTime) -> Self {
        Self::new(
            dt.year(),
            dt.month() as u8,
            dt.day() as u8,
            dt.hour() as u8,
            dt.minute() as u8,
            dt.second() as u8,
            dt.nanosecond().min(999_999_999),
        )
    }
}

impl From<NaiveDate> for DmDateTime {
    fn from(d: NaiveDate) -> Self {
        Self::new(d.year(), d.month() as u8, d.day() as u8, 0, 0, 0, 0)
    }
}

impl From<NaiveTime> for DmDateTime {
    fn from(t: NaiveTime) -> Self {
        Self {
            hour: t.hour() as u8,
            minute: t.minute() as u8,
            second: t.second() as u8,
            nanos: t.nanosecond().min(999_999_999),
            ..Default::default()
        }
    }
}

impl From<DateTime<FixedOffset>> for DmDateTime {
    fn from(dt: DateTime<FixedOffset>) -> Self {
        let minutes = (dt.offset().local_minus_utc() / 60) as i16;
        DmDateTime::from(dt.naive_local()).with_offset(minutes)
    }
}
