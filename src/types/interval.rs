//! INTERVAL YEAR TO MONTH and INTERVAL DAY TO SECOND
//!
//! Both travel as fixed runs of big-endian `i32`: `[years][months][prec]`
//! (12 bytes) and `[days][hours][minutes][seconds][micros][prec]` (24 bytes).

use std::fmt;
use std::str::FromStr;

use chrono::TimeDelta;

use crate::buffer::ByteBuffer;
use crate::error::{Error, Result};

/// Wire length of a year-month interval
pub const INTERVAL_YM_LEN: usize = 12;

/// Wire length of a day-second interval
pub const INTERVAL_DT_LEN: usize = 24;

const DEFAULT_LEAD_PREC: i32 = 9;

/// Year-to-month interval
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IntervalYM {
    /// Years (carries the sign)
    pub years: i32,
    /// Months, same sign as `years`
    pub months: i32,
    /// Leading field precision
    pub lead_prec: i32,
}

impl IntervalYM {
    /// Create an interval; months above 11 roll into years
    pub fn new(years: i32, months: i32) -> Result<Self> {
        let total = (years as i64) * 12 + months as i64;
        let years = i32::try_from(total / 12).map_err(|_| Error::IntervalOverflow)?;
        Ok(Self {
            years,
            months: (total % 12) as i32,
            lead_prec: DEFAULT_LEAD_PREC,
        })
    }

    /// Total months
    pub fn total_months(&self) -> i64 {
        self.years as i64 * 12 + self.months as i64
    }

    /// Decode the wire form
    pub fn from_wire(data: &[u8]) -> Result<Self> {
        if data.len() < INTERVAL_YM_LEN {
            return Err(Error::InvalidTimeInterval(format!("{} bytes", data.len())));
        }
        let mut buf = ByteBuffer::from_slice(data);
        Ok(Self {
            years: buf.read_i32()?,
            months: buf.read_i32()?,
            lead_prec: buf.read_i32()?,
        })
    }

    /// Encode the wire form
    pub fn to_wire(&self) -> Vec<u8> {
        let mut buf = ByteBuffer::with_capacity(INTERVAL_YM_LEN);
        buf.write_i32(self.years);
        buf.write_i32(self.months);
        buf.write_i32(self.lead_prec);
        buf.into_vec()
    }
}

impl fmt::Display for IntervalYM {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let total = self.total_months();
        let sign = if total < 0 { "-" } else { "" };
        write!(f, "{sign}{}-{}", total.abs() / 12, total.abs() % 12)
    }
}

impl FromStr for IntervalYM {
    type Err = Error;

    /// Parse `[-]Y-M`
    fn from_str(s: &str) -> Result<Self> {
        let bad = || Error::InvalidTimeInterval(s.to_string());
        let t = s.trim();
        let (negative, t) = t.strip_prefix('-').map_or((false, t), |r| (true, r));
        let (y, m) = t.split_once('-').ok_or_else(bad)?;
        let years: i32 = y.trim().parse().map_err(|_| bad())?;
        let months: i32 = m.trim().parse().map_err(|_| bad())?;
        if !(0..12).contains(&months) {
            return Err(Error::IntervalOverflow);
        }
        let sign = if negative { -1 } else { 1 };
        Self::new(sign * years, sign * months)
    }
}

/// Day-to-second interval
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IntervalDT {
    /// Days (carries the sign)
    pub days: i32,
    /// Hours
    pub hours: i32,
    /// Minutes
    pub minutes: i32,
    /// Seconds
    pub seconds: i32,
    /// Microseconds
    pub micros: i32,
    /// Leading and fractional precision packed as `lead << 4 | frac`
    pub prec: i32,
}

impl IntervalDT {
    /// Build from a signed duration
    pub fn from_delta(delta: TimeDelta) -> Result<Self> {
        let total_micros = delta.num_microseconds().ok_or(Error::IntervalOverflow)?;
        let sign = if total_micros < 0 { -1 } else { 1 };
        let mut rest = total_micros.abs();
        let micros = rest % 1_000_000;
        rest /= 1_000_000;
        let seconds = rest % 60;
        rest /= 60;
        let minutes = rest % 60;
        rest /= 60;
        let hours = rest % 24;
        let days = i32::try_from(rest / 24).map_err(|_| Error::IntervalOverflow)?;
        Ok(Self {
            days: sign as i32 * days,
            hours: (sign * hours) as i32,
            minutes: (sign * minutes) as i32,
            seconds: (sign * seconds) as i32,
            micros: (sign * micros) as i32,
            prec: (DEFAULT_LEAD_PREC << 4) | 6,
        })
    }

    /// Convert to a signed duration
    pub fn to_delta(&self) -> TimeDelta {
        TimeDelta::days(self.days as i64)
            + TimeDelta::hours(self.hours as i64)
            + TimeDelta::minutes(self.minutes as i64)
            + TimeDelta::seconds(self.seconds as i64)
            + TimeDelta::microseconds(self.micros as i64)
    }

    /// Decode the wire form
    pub fn from_wire(data: &[u8]) -> Result<Self> {
        if data.len() < INTERVAL_DT_LEN {
            return Err(Error::InvalidTimeInterval(format!("{} bytes", data.len())));
        }
        let mut buf = ByteBuffer::from_slice(data);
        Ok(Self {
            days: buf.read_i32()?,
            hours: buf.read_i32()?,
            minutes: buf.read_i32()?,
            seconds: buf.read_i32()?,
            micros: buf.read_i32()?,
            prec: buf.read_i32()?,
        })
    }

    /// Encode the wire form
    pub fn to_wire(&self) -> Vec<u8> {
        let mut buf = ByteBuffer::with_capacity(INTERVAL_DT_LEN);
        for v in [self.days, self.hours, self.minutes, self.seconds, self.micros, self.prec] {
            buf.write_i32(v);
        }
        buf.into_vec()
    }
}

impl fmt::Display for IntervalDT {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let negative = self.to_delta() < TimeDelta::zero();
        write!(
            f,
            "{}{} {:02}:{:02}:{:02}.{:06}",
            if negative { "-" } else { "" },
            self.days.unsigned_abs(),
            self.hours.unsigned_abs(),
            self.minutes.unsigned_abs(),
            self.seconds.unsigned_abs(),
            self.micros.unsigned_abs()
        )
    }
}

impl FromStr for IntervalDT {
    type Err = Error;

    /// Parse `[-]D HH:MM:SS[.ffffff]`
    fn from_str(s: &str) -> Result<Self> {
        let bad = || Error::InvalidTimeInterval(s.to_string());
        let t = s.trim();
        let (negative, t) = t.strip_prefix('-').map_or((false, t), |r| (true, r));
        let (d, clock) = t.split_once(' ').ok_or_else(bad)?;
        let days: i64 = d.parse().map_err(|_| bad())?;
        let mut parts = clock.trim().splitn(3, ':');
        let mut next = || parts.next().ok_or_else(bad);
        let h: i64 = next()?.parse().map_err(|_| bad())?;
        let m: i64 = next()?.parse().map_err(|_| bad())?;
        let sec_part = next()?;
        let (sec, frac) = sec_part.split_once('.').unwrap_or((sec_part, ""));
        let sec: i64 = sec.parse().map_err(|_| bad())?;
        if h > 23 || m > 59 || sec > 59 || frac.len() > 9 {
            return Err(Error::IntervalOverflow);
        }
        let micros: i64 = if frac.is_empty() {
            0
        } else {
            format!("{frac:0<6}")[..6].parse().map_err(|_| bad())?
        };
        let total = TimeDelta::try_days(days)
            .and_then(|d| d.checked_add(&TimeDelta::hours(h)))
            .and_then(|d| d.checked_add(&TimeDelta::minutes(m)))
            .and_then(|d| d.checked_add(&TimeDelta::seconds(sec)))
            .and_then(|d| d.checked_add(&TimeDelta::microseconds(micros)))
            .ok_or(Error::IntervalOverflow)?;
        Self::from_delta(if negative { -total } else { total })
    }
}
