//! DECIMAL encoding and decoding
//!
//! DECIMAL values travel in a variable-length base-100 form:
//! - Byte 0: exponent of the leading base-100 digit, biased by 193, with
//!   the high bit set for positive values and all bits inverted for negative
//!   values. Zero is the single byte `0x80`.
//! - Bytes 1..n: base-100 digits, stored as `d + 1` for positive values and
//!   `101 - d` for negative values.
//! - Negative values end with a `102` terminator unless all 20 digit slots
//!   are used.

use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

/// Maximum decimal digits a value can carry
const MAX_DIGITS: usize = 40;

/// Maximum base-100 digit slots
const MAX_PAIRS: usize = MAX_DIGITS / 2;

const EXPONENT_BIAS: i32 = 193;
const NEGATIVE_TERMINATOR: u8 = 102;

/// Exact decimal number
///
/// Stored as a sign, significant decimal digits without leading or trailing
/// zeros, and the position of the decimal point relative to the first digit.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct Decimal {
    negative: bool,
    digits: Vec<u8>,
    point: i32,
}

impl Decimal {
    /// The value zero
    pub fn zero() -> Self {
        Self::default()
    }

    /// Check if the value is zero
    pub fn is_zero(&self) -> bool {
        self.digits.is_empty()
    }

    /// Check if the value is negative
    pub fn is_negative(&self) -> bool {
        self.negative
    }

    /// Check if the value has no fractional part
    pub fn is_integer(&self) -> bool {
        self.point >= self.digits.len() as i32
    }

    fn normalize(mut self) -> Self {
        let lead = self.digits.iter().take_while(|d| **d == 0).count();
        self.digits.drain(..lead);
        self.point -= lead as i32;
        while self.digits.last() == Some(&0) {
            self.digits.pop();
        }
        if self.digits.is_empty() {
            self.negative = false;
            self.point = 0;
        }
        self
    }

    /// Decode the wire form
    pub fn from_wire(data: &[u8]) -> Result<Self> {
        let (&head, rest) = data
            .split_first()
            .ok_or_else(|| Error::DataConversion("empty DECIMAL".into()))?;
        let positive = head & 0x80 != 0;
        if rest.is_empty() {
            if positive {
                return Ok(Self::zero());
            }
            return Err(Error::DataConversion("DECIMAL without mantissa".into()));
        }

        let exponent = if positive { head as i32 } else { (!head) as i32 } - EXPONENT_BIAS;
        let mantissa = if !positive && rest.last() == Some(&NEGATIVE_TERMINATOR) {
            &rest[..rest.len() - 1]
        } else {
            rest
        };

        let mut digits = Vec::with_capacity(mantissa.len() * 2);
        for &b in mantissa {
            let pair = if positive { b.wrapping_sub(1) } else { 101u8.wrapping_sub(b) };
            if pair > 99 {
                return Err(Error::DataConversion(format!("invalid DECIMAL digit byte {b}")));
            }
            digits.push(pair / 10);
            digits.push(pair % 10);
        }
        Ok(Self {
            negative: !positive,
            digits,
            point: (exponent + 1) * 2,
        }
        .normalize())
    }

    /// Encode to the wire form
    pub fn to_wire(&self) -> Result<Vec<u8>> {
        if self.is_zero() {
            return Ok(vec![0x80]);
        }
        let mut digits = self.digits.clone();
        let mut point = self.point;
        if point.rem_euclid(2) == 1 {
            digits.insert(0, 0);
            point += 1;
        }
        if digits.len() % 2 == 1 {
            digits.push(0);
        }
        let pairs = digits.len() / 2;
        let exponent = point / 2 - 1;
        if pairs > MAX_PAIRS || !(-65..=62).contains(&exponent) {
            return Err(Error::DataConversion(format!("{self} is out of DECIMAL range")));
        }

        let exp_byte = (exponent + EXPONENT_BIAS) as u8;
        let mut out = Vec::with_capacity(pairs + 2);
        out.push(if self.negative { !exp_byte } else { exp_byte });
        for chunk in digits.chunks(2) {
            let v = chunk[0] * 10 + chunk[1];
            out.push(if self.negative { 101 - v } else { v + 1 });
        }
        if self.negative && pairs < MAX_PAIRS {
            out.push(NEGATIVE_TERMINATOR);
        }
        Ok(out)
    }

    /// Convert to `i64`, failing on fractions or overflow
    pub fn to_i64(&self) -> Result<i64> {
        if !self.is_integer() {
            return Err(Error::DataConversion(format!("{self} is not an integer")));
        }
        self.to_string()
            .parse()
            .map_err(|_| Error::DataConversion(format!("{self} does not fit i64")))
    }

    /// Convert to `f64` (may lose precision)
    pub fn to_f64(&self) -> f64 {
        self.to_string().parse().unwrap_or(f64::NAN)
    }

    /// Round to `scale` fractional digits, half away from zero
    pub fn round(&self, scale: i32) -> Self {
        let keep = self.point + scale;
        if keep >= self.digits.len() as i32 {
            return self.clone();
        }
        if keep < 0 {
            return Self::zero();
        }
        let keep = keep as usize;
        let mut digits = self.digits[..keep].to_vec();
        let mut point = self.point;
        if self.digits[keep] >= 5 {
            let mut i = digits.len();
            loop {
                if i == 0 {
                    digits.insert(0, 1);
                    point += 1;
                    break;
                }
                i -= 1;
                if digits[i] == 9 {
                    digits[i] = 0;
                } else {
                    digits[i] += 1;
                    break;
                }
            }
        }
        Self {
            negative: self.negative,
            digits,
            point,
        }
        .normalize()
    }
}

impl fmt::Display for Decimal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_zero() {
            return f.write_str("0");
        }
        let mut s = String::with_capacity(self.digits.len() + 4);
        if self.negative {
            s.push('-');
        }
        let digit = |d: &u8| char::from(b'0' + d);
        if self.point <= 0 {
            s.push_str("0.");
            s.extend(std::iter::repeat('0').take((-self.point) as usize));
            s.extend(self.digits.iter().map(digit));
        } else {
            let point = self.point as usize;
            for i in 0..point.max(self.digits.len()) {
                if i == point {
                    s.push('.');
                }
                s.push(self.digits.get(i).map_or('0', digit));
            }
        }
        f.write_str(&s)
    }
}

impl FromStr for Decimal {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self> {
        let invalid = || Error::DataConversion(format!("invalid number: {value:?}"));
        let s = value.trim();
        let (negative, s) = match s.as_bytes().first() {
            Some(b'-') => (true, &s[1..]),
            Some(b'+') => (false, &s[1..]),
            _ => (false, s),
        };
        let (mantissa, exp) = match s.find(['e', 'E']) {
            Some(i) => (&s[..i], s[i + 1..].parse::<i32>().map_err(|_| invalid())?),
            None => (s, 0),
        };
        let (int_part, frac_part) = mantissa.split_once('.').unwrap_or((mantissa, ""));
        if int_part.is_empty() && frac_part.is_empty() {
            return Err(invalid());
        }
        let mut digits = Vec::with_capacity(int_part.len() + frac_part.len());
        for c in int_part.bytes().chain(frac_part.bytes()) {
            if !c.is_ascii_digit() {
                return Err(invalid());
            }
            digits.push(c - b'0');
        }
        let d = Self {
            negative,
            digits,
            point: int_part.len() as i32 + exp,
        }
        .normalize();
        if d.digits.len() > MAX_DIGITS {
            return Err(Error::DataConversion(format!("{value} has more than {MAX_DIGITS} digits")));
        }
        Ok(d)
    }
}

impl From<i64> for Decimal {
    fn from(v: i64) -> Self {
        // i64 always parses
        v.to_string().parse().unwrap_or_default()
    }
}

impl From<i32> for Decimal {
    fn from(v: i32) -> Self {
        Decimal::from(v as i64)
    }
}

impl TryFrom<f64> for Decimal {
    type Error = Error;

    fn try_from(v: f64) -> Result<Self> {
        if !v.is_finite() {
            return Err(Error::DataConversion(format!("{v} cannot be a DECIMAL")));
        }
        format!("{v}").parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dec(s: &str) -> Decimal {
        s.parse().unwrap()
    }

    #[test]
    fn test_zero() {
        assert_eq!(Decimal::zero().to_wire().unwrap(), vec![0x80]);
        assert!(Decimal::from_wire(&[0x80]).unwrap().is_zero());
        assert_eq!(dec("-0.000").to_string(), "0");
    }

    #[test]
    fn test_known_encodings() {
        assert_eq!(dec("123").to_wire().unwrap(), vec![0xC2, 0x02, 0x18]);
        assert_eq!(dec("1.5").to_wire().unwrap(), vec![0xC1, 0x02, 0x33]);
        assert_eq!(dec("-5").to_wire().unwrap(), vec![0x3E, 0x60, 0x66]);
        assert_eq!(dec("100").to_wire().unwrap(), vec![0xC2, 0x02]);
    }

    #[test]
    fn test_decode_known() {
        assert_eq!(Decimal::from_wire(&[0xC2, 0x02, 0x18]).unwrap().to_string(), "123");
        assert_eq!(Decimal::from_wire(&[0x3D, 0x64, 0x4E, 0x66]).unwrap().to_string(), "-123");
        assert_eq!(Decimal::from_wire(&[0xC2, 0x02]).unwrap().to_string(), "100");
    }

    #[test]
    fn test_wire_values_survive() {
        for s in ["1", "99", "-100", "3.14159", "0.00012", "-98765.4321", "12345678901234567890123456789012345678"] {
            let d = dec(s);
            assert_eq!(Decimal::from_wire(&d.to_wire().unwrap()).unwrap(), d, "{s}");
            assert_eq!(d.to_string(), s);
        }
    }

    #[test]
    fn test_scientific_and_conversions() {
        assert_eq!(dec("1.5e10").to_string(), "15000000000");
        assert_eq!(dec("25e-3").to_string(), "0.025");
        assert_eq!(dec("42").to_i64().unwrap(), 42);
        assert!(dec("4.2").to_i64().is_err());
        assert!((dec("3.14").to_f64() - 3.14).abs() < 1e-12);
        assert_eq!(Decimal::try_from(0.5).unwrap().to_string(), "0.5");
        assert!(Decimal::try_from(f64::NAN).is_err());
        assert!("1.2.3".parse::<Decimal>().is_err());
    }

    #[test]
    fn test_round() {
        assert_eq!(dec("2.345").round(2).to_string(), "2.35");
        assert_eq!(dec("9.99").round(1).to_string(), "10");
        assert_eq!(dec("-1.24").round(1).to_string(), "-1.2");
        assert_eq!(dec("0.004").round(2).to_string(), "0");
    }
}
