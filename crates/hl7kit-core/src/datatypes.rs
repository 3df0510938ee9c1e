//! Primitive HL7 datatypes: DTM/TS, DT, TM, NM and SI
//!
//! Date/time values keep the precision they were sent with. `200301` is a
//! month, not the first of January, and renders back as `200301`.

use std::fmt;
use std::str::FromStr;

use chrono::{FixedOffset, Local, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Timelike};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::{Hl7Error, Result};

/// How much of a date/time value was sent
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "camelCase")]
pub enum DatePrecision {
    Year,
    Month,
    Day,
    Hour,
    Minute,
    Second,
    /// Seconds with 1 to 4 fractional digits
    FractionalSecond(u8),
}

impl DatePrecision {
    fn from_digits(len: usize) -> Option<Self> {
        match len {
            4 => Some(Self::Year),
            6 => Some(Self::Month),
            8 => Some(Self::Day),
            10 => Some(Self::Hour),
            12 => Some(Self::Minute),
            14 => Some(Self::Second),
            _ => None,
        }
    }

    /// Number of leading date digits this precision covers
    fn digits(self) -> usize {
        match self {
            Self::Year => 4,
            Self::Month => 6,
            Self::Day => 8,
            Self::Hour => 10,
            Self::Minute => 12,
            Self::Second | Self::FractionalSecond(_) => 14,
        }
    }
}

impl fmt::Display for DatePrecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Year => write!(f, "year"),
            Self::Month => write!(f, "month"),
            Self::Day => write!(f, "day"),
            Self::Hour => write!(f, "hour"),
            Self::Minute => write!(f, "minute"),
            Self::Second => write!(f, "second"),
            Self::FractionalSecond(n) => write!(f, "fractional second ({n} digits)"),
        }
    }
}

impl FromStr for DatePrecision {
    type Err = Hl7Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "year" => Ok(Self::Year),
            "month" => Ok(Self::Month),
            "day" => Ok(Self::Day),
            "hour" => Ok(Self::Hour),
            "minute" => Ok(Self::Minute),
            "second" => Ok(Self::Second),
            "millisecond" | "fraction" => Ok(Self::FractionalSecond(3)),
            other => Err(Hl7Error::config_error(format!(
                "Unknown date precision '{other}'"
            ))),
        }
    }
}

/// A DTM (or TS component 1) value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DateTime {
    pub year: i32,
    pub month: u32,
    pub day: u32,
    pub hour: u32,
    pub minute: u32,
    pub second: u32,
    /// Fractional seconds as sent, scaled to ten-thousandths
    pub fraction: u32,
    pub precision: DatePrecision,
    /// Offset from UTC in minutes
    pub offset: Option<i32>,
}

impl DateTime {
    /// Parse `YYYY[MM[DD[HH[MM[SS[.S[S[S[S]]]]]]]]][+/-ZZZZ]`
    pub fn parse(text: &str) -> Result<Self> {
        let invalid = |message: &str| Hl7Error::datatype_error("DTM", text, message);

        let (body, offset) = split_offset(text).map_err(|m| invalid(m.as_str()))?;
        let (digits, fraction) = match body.split_once('.') {
            Some((digits, fraction)) => (digits, Some(fraction)),
            None => (body, None),
        };
        if !digits.bytes().all(|b| b.is_ascii_digit()) {
            return Err(invalid("expected digits"));
        }
        let mut precision = DatePrecision::from_digits(digits.len())
            .ok_or_else(|| invalid("expected 4, 6, 8, 10, 12 or 14 digits"))?;

        let mut fraction_value = 0;
        if let Some(fraction) = fraction {
            if precision != DatePrecision::Second {
                return Err(invalid("fractional seconds require full seconds"));
            }
            if fraction.is_empty()
                || fraction.len() > 4
                || !fraction.bytes().all(|b| b.is_ascii_digit())
            {
                return Err(invalid("expected 1 to 4 fractional digits"));
            }
            let scale = 10u32.pow(4 - fraction.len() as u32);
            fraction_value = fraction.parse::<u32>().map_err(|_| invalid("bad fraction"))? * scale;
            precision = DatePrecision::FractionalSecond(fraction.len() as u8);
        }

        let number = |range: std::ops::Range<usize>, default: u32| -> u32 {
            digits
                .get(range)
                .and_then(|part| part.parse().ok())
                .unwrap_or(default)
        };
        let value = Self {
            year: number(0..4, 0) as i32,
            month: number(4..6, 1),
            day: number(6..8, 1),
            hour: number(8..10, 0),
            minute: number(10..12, 0),
            second: number(12..14, 0),
            fraction: fraction_value,
            precision,
            offset,
        };
        value.check_ranges().map_err(|m| invalid(m.as_str()))?;
        Ok(value)
    }

    fn check_ranges(&self) -> std::result::Result<(), String> {
        if !(1..=12).contains(&self.month) {
            return Err(format!("month {} out of range", self.month));
        }
        if NaiveDate::from_ymd_opt(self.year, self.month, self.day).is_none() {
            return Err(format!("day {} out of range", self.day));
        }
        if self.hour > 23 {
            return Err(format!("hour {} out of range", self.hour));
        }
        if self.minute > 59 {
            return Err(format!("minute {} out of range", self.minute));
        }
        // 60 is a leap second
        if self.second > 60 {
            return Err(format!("second {} out of range", self.second));
        }
        Ok(())
    }

    /// Current local time at second precision, with its UTC offset
    pub fn now() -> Self {
        let now = Local::now();
        let mut value = Self::from_naive(now.naive_local(), DatePrecision::Second);
        value.offset = Some(now.offset().local_minus_utc() / 60);
        value
    }

    /// Build a value from a chrono timestamp, truncated to `precision`
    pub fn from_naive(naive: NaiveDateTime, precision: DatePrecision) -> Self {
        use chrono::Datelike;
        let mut value = Self {
            year: naive.year(),
            month: naive.month(),
            day: naive.day(),
            hour: naive.hour(),
            minute: naive.minute(),
            second: naive.second().min(59),
            fraction: (naive.nanosecond() % 1_000_000_000) / 100_000,
            precision,
            offset: None,
        };
        value.truncate();
        value
    }

    fn truncate(&mut self) {
        let digits = self.precision.digits();
        if digits < 6 {
            self.month = 1;
        }
        if digits < 8 {
            self.day = 1;
        }
        if digits < 10 {
            self.hour = 0;
        }
        if digits < 12 {
            self.minute = 0;
        }
        if digits < 14 {
            self.second = 0;
        }
        match self.precision {
            DatePrecision::FractionalSecond(n) => {
                let scale = 10u32.pow(4 - u32::from(n.min(4)));
                self.fraction = self.fraction / scale * scale;
            }
            _ => self.fraction = 0,
        }
    }

    /// Missing parts default to the start of the period
    pub fn to_naive(&self) -> Option<NaiveDateTime> {
        let date = NaiveDate::from_ymd_opt(self.year, self.month, self.day)?;
        let time = NaiveTime::from_hms_micro_opt(
            self.hour,
            self.minute,
            self.second.min(59),
            self.fraction * 100,
        )?;
        Some(date.and_time(time))
    }

    /// Values without an offset are taken as UTC
    pub fn to_chrono(&self) -> Option<chrono::DateTime<FixedOffset>> {
        let offset = FixedOffset::east_opt(self.offset.unwrap_or(0) * 60)?;
        offset.from_local_datetime(&self.to_naive()?).single()
    }

    pub fn is_at_least(&self, precision: DatePrecision) -> bool {
        self.precision.digits() >= precision.digits()
            && match precision {
                DatePrecision::FractionalSecond(n) => {
                    matches!(self.precision, DatePrecision::FractionalSecond(m) if m >= n)
                }
                _ => true,
            }
    }
}

impl fmt::Display for DateTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let digits = self.precision.digits();
        write!(f, "{:04}", self.year)?;
        if digits >= 6 {
            write!(f, "{:02}", self.month)?;
        }
        if digits >= 8 {
            write!(f, "{:02}", self.day)?;
        }
        if digits >= 10 {
            write!(f, "{:02}", self.hour)?;
        }
        if digits >= 12 {
            write!(f, "{:02}", self.minute)?;
        }
        if digits >= 14 {
            write!(f, "{:02}", self.second)?;
        }
        if let DatePrecision::FractionalSecond(n) = self.precision {
            let n = u32::from(n.clamp(1, 4));
            let value = self.fraction / 10u32.pow(4 - n);
            write!(f, ".{:0width$}", value, width = n as usize)?;
        }
        write_offset(f, self.offset)
    }
}

impl FromStr for DateTime {
    type Err = Hl7Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// A DT value: `YYYY[MM[DD]]`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Date(DateTime);

impl Date {
    pub fn parse(text: &str) -> Result<Self> {
        if text.len() > 8 || !text.bytes().all(|b| b.is_ascii_digit()) {
            return Err(Hl7Error::datatype_error("DT", text, "expected YYYY[MM[DD]]"));
        }
        DateTime::parse(text)
            .map(Self)
            .map_err(|e| match e {
                Hl7Error::DatatypeError { value, message, .. } => {
                    Hl7Error::datatype_error("DT", value, message)
                }
                other => other,
            })
    }

    pub fn precision(&self) -> DatePrecision {
        self.0.precision
    }

    pub fn to_naive(&self) -> Option<NaiveDate> {
        NaiveDate::from_ymd_opt(self.0.year, self.0.month, self.0.day)
    }
}

impl fmt::Display for Date {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// A TM value: `HH[MM[SS[.S[S[S[S]]]]]][+/-ZZZZ]`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Time {
    pub hour: u32,
    pub minute: u32,
    pub second: u32,
    pub fraction: u32,
    pub precision: DatePrecision,
    pub offset: Option<i32>,
}

impl Time {
    pub fn parse(text: &str) -> Result<Self> {
        let invalid = |message: &str| Hl7Error::datatype_error("TM", text, message);
        let (body, offset) = split_offset(text).map_err(|m| invalid(m.as_str()))?;
        if !matches!(body.split('.').next().map(str::len), Some(2 | 4 | 6)) {
            return Err(invalid("expected HH[MM[SS[.SSSS]]]"));
        }
        // Reuse the date/time parser on a fixed date
        let full = format!("20000101{body}");
        let value = DateTime::parse(&full).map_err(|e| match e {
            Hl7Error::DatatypeError { message, .. } => invalid(message.as_str()),
            other => other,
        })?;
        Ok(Self {
            hour: value.hour,
            minute: value.minute,
            second: value.second,
            fraction: value.fraction,
            precision: value.precision,
            offset,
        })
    }

    pub fn to_naive(&self) -> Option<NaiveTime> {
        NaiveTime::from_hms_micro_opt(
            self.hour,
            self.minute,
            self.second.min(59),
            self.fraction * 100,
        )
    }
}

impl fmt::Display for Time {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let digits = self.precision.digits();
        write!(f, "{:02}", self.hour)?;
        if digits >= 12 {
            write!(f, "{:02}", self.minute)?;
        }
        if digits >= 14 {
            write!(f, "{:02}", self.second)?;
        }
        if let DatePrecision::FractionalSecond(n) = self.precision {
            let n = u32::from(n.clamp(1, 4));
            write!(
                f,
                ".{:0width$}",
                self.fraction / 10u32.pow(4 - n),
                width = n as usize
            )?;
        }
        write_offset(f, self.offset)
    }
}

fn split_offset(text: &str) -> std::result::Result<(&str, Option<i32>), String> {
    let Some(at) = text.find(['+', '-']) else {
        return Ok((text, None));
    };
    let (body, zone) = text.split_at(at);
    let sign = if zone.starts_with('-') { -1 } else { 1 };
    let digits = &zone[1..];
    if digits.len() != 4 || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err("UTC offset must be +/-HHMM".to_string());
    }
    let hours: i32 = digits[..2].parse().map_err(|_| "bad offset hours")?;
    let minutes: i32 = digits[2..].parse().map_err(|_| "bad offset minutes")?;
    if hours > 14 || minutes > 59 {
        return Err(format!("UTC offset {zone} out of range"));
    }
    Ok((body, Some(sign * (hours * 60 + minutes))))
}

fn write_offset(f: &mut fmt::Formatter<'_>, offset: Option<i32>) -> fmt::Result {
    match offset {
        Some(minutes) => {
            let sign = if minutes < 0 { '-' } else { '+' };
            let minutes = minutes.abs();
            write!(f, "{sign}{:02}{:02}", minutes / 60, minutes % 60)
        }
        None => Ok(()),
    }
}

/// NM: optional sign, digits and at most one decimal point
pub fn is_numeric(value: &str) -> bool {
    let unsigned = value.strip_prefix(['+', '-']).unwrap_or(value);
    let mut digits = 0;
    let mut points = 0;
    for c in unsigned.chars() {
        match c {
            '0'..='9' => digits += 1,
            '.' => points += 1,
            _ => return false,
        }
    }
    digits > 0 && points <= 1
}

/// SI: a non-negative integer of at most four digits
pub fn is_sequence_id(value: &str) -> bool {
    !value.is_empty() && value.len() <= 4 && value.bytes().all(|b| b.is_ascii_digit())
}
