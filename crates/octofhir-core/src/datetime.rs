//! Precision-aware FHIR date parsing.
//!
//! FHIR `date`, `dateTime` and `instant` values may be written with any precision from a
//! bare year down to fractional seconds. A [`PartialDateTime`] keeps the instant the value
//! starts at together with the precision it was written with, so that a search literal can
//! be widened into the half-open range `[start, end)` it denotes:
//!
//! - Year: `2023` -> `[2023-01-01, 2024-01-01)`
//! - Month: `2023-01` -> `[2023-01-01, 2023-02-01)`
//! - Day: `2023-01-15` -> `[2023-01-15, 2023-01-16)`
//! - DateTime: one step of the smallest unit written (minute, second or fraction)
//!
//! Values without an offset are taken as UTC. Index instants have microsecond resolution,
//! so digits past the sixth fractional one are dropped.

use std::fmt;
use std::str::FromStr;

use time::format_description::FormatItem;
use time::macros::format_description;
use time::{Date, Duration, Month, OffsetDateTime, PrimitiveDateTime, Time, UtcOffset};

use crate::error::{CoreError, Result};

const DATE_FORMAT: &[FormatItem<'static>] = format_description!("[year]-[month]-[day]");
const OFFSET_FORMAT: &[FormatItem<'static>] =
    format_description!("[offset_hour sign:mandatory]:[offset_minute]");
/// Fractional digits an index instant keeps.
const INDEX_FRACTION_DIGITS: usize = 6;
const INDEX_FORMAT: &[FormatItem<'static>] = format_description!(
    "[year]-[month]-[day]T[hour]:[minute]:[second].[subsecond digits:6]Z"
);

/// The smallest unit a date literal was written with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatePrecision {
    Year,
    Month,
    Day,
    Minute,
    Second,
    /// Fractional seconds with the given number of digits (1..=6).
    Fraction(u8),
}

/// A FHIR date/dateTime/instant normalized to UTC, remembering its written precision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartialDateTime {
    start: OffsetDateTime,
    precision: DatePrecision,
}

impl PartialDateTime {
    pub fn parse(value: &str) -> Result<Self> {
        let trimmed = value.trim();
        let invalid = |reason: &str| CoreError::invalid_date_time(format!("{trimmed}: {reason}"));

        if trimmed.is_empty() {
            return Err(invalid("empty value"));
        }

        // Year only: 2023
        if trimmed.len() == 4 && trimmed.chars().all(|c| c.is_ascii_digit()) {
            let year: i32 = trimmed.parse().map_err(|_| invalid("bad year"))?;
            let date = Date::from_calendar_date(year, Month::January, 1)
                .map_err(|e| invalid(&e.to_string()))?;
            return Ok(Self::at_midnight(date, DatePrecision::Year));
        }

        // Year-Month: 2023-01
        if trimmed.len() == 7 && trimmed.as_bytes()[4] == b'-' {
            let year: i32 = trimmed[..4].parse().map_err(|_| invalid("bad year"))?;
            let month: u8 = trimmed[5..].parse().map_err(|_| invalid("bad month"))?;
            let month = Month::try_from(month).map_err(|e| invalid(&e.to_string()))?;
            let date =
                Date::from_calendar_date(year, month, 1).map_err(|e| invalid(&e.to_string()))?;
            return Ok(Self::at_midnight(date, DatePrecision::Month));
        }

        // Full date: 2023-01-15
        if trimmed.len() == 10 {
            let date = Date::parse(trimmed, DATE_FORMAT).map_err(|e| invalid(&e.to_string()))?;
            return Ok(Self::at_midnight(date, DatePrecision::Day));
        }

        let (date_part, rest) = trimmed
            .split_once('T')
            .ok_or_else(|| invalid("unrecognized date format"))?;
        let date = Date::parse(date_part, DATE_FORMAT).map_err(|e| invalid(&e.to_string()))?;

        let (time_part, offset) = split_offset(rest).map_err(|reason| invalid(&reason))?;
        let (time, precision) = parse_time(time_part).map_err(|reason| invalid(&reason))?;

        let start = PrimitiveDateTime::new(date, time)
            .assume_offset(offset)
            .to_offset(UtcOffset::UTC);
        Ok(Self { start, precision })
    }

    fn at_midnight(date: Date, precision: DatePrecision) -> Self {
        Self {
            start: date.with_time(Time::MIDNIGHT).assume_utc(),
            precision,
        }
    }

    /// The instant this value starts at.
    pub fn start(&self) -> OffsetDateTime {
        self.start
    }

    /// The exclusive upper bound of the range this value denotes.
    pub fn end(&self) -> Result<OffsetDateTime> {
        let overflow = || CoreError::invalid_date_time(format!("{} has no upper bound", self.start));
        match self.precision {
            DatePrecision::Year => {
                let date = Date::from_calendar_date(self.start.year() + 1, Month::January, 1)
                    .map_err(|_| overflow())?;
                Ok(date.with_time(Time::MIDNIGHT).assume_utc())
            }
            DatePrecision::Month => {
                let month = self.start.month();
                let year = if month == Month::December {
                    self.start.year() + 1
                } else {
                    self.start.year()
                };
                let date =
                    Date::from_calendar_date(year, month.next(), 1).map_err(|_| overflow())?;
                Ok(date.with_time(Time::MIDNIGHT).assume_utc())
            }
            DatePrecision::Day => self
                .start
                .checked_add(Duration::days(1))
                .ok_or_else(overflow),
            DatePrecision::Minute => self
                .start
                .checked_add(Duration::minutes(1))
                .ok_or_else(overflow),
            DatePrecision::Second => self
                .start
                .checked_add(Duration::seconds(1))
                .ok_or_else(overflow),
            DatePrecision::Fraction(digits) => {
                let step = 10_i64.pow(9 - u32::from(digits));
                self.start
                    .checked_add(Duration::nanoseconds(step))
                    .ok_or_else(overflow)
            }
        }
    }

    pub fn precision(&self) -> DatePrecision {
        self.precision
    }
}

impl FromStr for PartialDateTime {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for PartialDateTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({:?})", format_index_instant(self.start), self.precision)
    }
}

fn split_offset(rest: &str) -> std::result::Result<(&str, UtcOffset), String> {
    if let Some(time) = rest.strip_suffix('Z') {
        return Ok((time, UtcOffset::UTC));
    }
    match rest.rfind(['+', '-']) {
        Some(idx) => {
            let offset = UtcOffset::parse(&rest[idx..], OFFSET_FORMAT)
                .map_err(|e| format!("bad offset: {e}"))?;
            Ok((&rest[..idx], offset))
        }
        None => Ok((rest, UtcOffset::UTC)),
    }
}

fn parse_time(value: &str) -> std::result::Result<(Time, DatePrecision), String> {
    let mut parts = value.split(':');
    let hour: u8 = parse_component(parts.next(), "hour")?;
    let minute: u8 = parse_component(parts.next(), "minute")?;

    let Some(seconds) = parts.next() else {
        let time = Time::from_hms(hour, minute, 0).map_err(|e| e.to_string())?;
        return Ok((time, DatePrecision::Minute));
    };
    if parts.next().is_some() {
        return Err("too many time components".to_string());
    }

    let (whole, fraction) = match seconds.split_once('.') {
        Some((whole, fraction)) => (whole, Some(fraction)),
        None => (seconds, None),
    };
    let second: u8 = parse_component(Some(whole), "second")?;

    match fraction {
        None => {
            let time = Time::from_hms(hour, minute, second).map_err(|e| e.to_string())?;
            Ok((time, DatePrecision::Second))
        }
        Some(digits) => {
            if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
                return Err(format!("bad fractional seconds: {digits}"));
            }
            let written = digits.len().min(INDEX_FRACTION_DIGITS);
            let mut nanos: u32 = digits[..written].parse().map_err(|_| "bad fraction")?;
            nanos *= 10_u32.pow(9 - written as u32);
            let time =
                Time::from_hms_nano(hour, minute, second, nanos).map_err(|e| e.to_string())?;
            Ok((time, DatePrecision::Fraction(written as u8)))
        }
    }
}

fn parse_component(part: Option<&str>, name: &str) -> std::result::Result<u8, String> {
    let part = part.ok_or_else(|| format!("missing {name}"))?;
    if part.len() != 2 {
        return Err(format!("bad {name}: {part}"));
    }
    part.parse().map_err(|_| format!("bad {name}: {part}"))
}

/// Format an instant as fixed-width UTC text.
///
/// The output sorts lexicographically in chronological order, which is what text-typed
/// date columns rely on.
pub fn format_index_instant(instant: OffsetDateTime) -> String {
    instant
        .to_offset(UtcOffset::UTC)
        .format(INDEX_FORMAT)
        .unwrap_or_else(|_| instant.to_string())
}

pub fn now_utc() -> OffsetDateTime {
    OffsetDateTime::now_utc()
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn test_year_precision() {
        let dt = PartialDateTime::parse("2023").unwrap();
        assert_eq!(dt.precision(), DatePrecision::Year);
        assert_eq!(dt.start(), datetime!(2023-01-01 00:00:00 UTC));
        assert_eq!(dt.end().unwrap(), datetime!(2024-01-01 00:00:00 UTC));
    }

    #[test]
    fn test_month_precision() {
        let dt = PartialDateTime::parse("2023-01").unwrap();
        assert_eq!(dt.start(), datetime!(2023-01-01 00:00:00 UTC));
        assert_eq!(dt.end().unwrap(), datetime!(2023-02-01 00:00:00 UTC));

        let dec = PartialDateTime::parse("2023-12").unwrap();
        assert_eq!(dec.end().unwrap(), datetime!(2024-01-01 00:00:00 UTC));
    }

    #[test]
    fn test_day_precision() {
        let dt = PartialDateTime::parse("2020-06-15").unwrap();
        assert_eq!(dt.precision(), DatePrecision::Day);
        assert_eq!(dt.start(), datetime!(2020-06-15 00:00:00 UTC));
        assert_eq!(dt.end().unwrap(), datetime!(2020-06-16 00:00:00 UTC));
    }

    #[test]
    fn test_datetime_with_zulu() {
        let dt = PartialDateTime::parse("2020-06-15T10:00:00Z").unwrap();
        assert_eq!(dt.precision(), DatePrecision::Second);
        assert_eq!(dt.start(), datetime!(2020-06-15 10:00:00 UTC));
        assert_eq!(dt.end().unwrap(), datetime!(2020-06-15 10:00:01 UTC));
    }

    #[test]
    fn test_datetime_with_offset_is_normalized_to_utc() {
        let dt = PartialDateTime::parse("2020-06-15T10:00:00+02:00").unwrap();
        assert_eq!(dt.start(), datetime!(2020-06-15 08:00:00 UTC));

        let dt = PartialDateTime::parse("2020-06-15T10:00:00-05:00").unwrap();
        assert_eq!(dt.start(), datetime!(2020-06-15 15:00:00 UTC));
    }

    #[test]
    fn test_datetime_without_offset_assumes_utc() {
        let dt = PartialDateTime::parse("2020-06-15T10:30").unwrap();
        assert_eq!(dt.precision(), DatePrecision::Minute);
        assert_eq!(dt.start(), datetime!(2020-06-15 10:30:00 UTC));
        assert_eq!(dt.end().unwrap(), datetime!(2020-06-15 10:31:00 UTC));
    }

    #[test]
    fn test_fractional_seconds() {
        let dt = PartialDateTime::parse("2020-06-15T10:00:00.123Z").unwrap();
        assert_eq!(dt.precision(), DatePrecision::Fraction(3));
        assert_eq!(dt.start(), datetime!(2020-06-15 10:00:00.123 UTC));
        assert_eq!(dt.end().unwrap(), datetime!(2020-06-15 10:00:00.124 UTC));
    }

    #[test]
    fn test_fraction_beyond_microseconds_is_truncated() {
        let dt = PartialDateTime::parse("2020-06-15T10:00:00.123456789Z").unwrap();
        assert_eq!(dt.precision(), DatePrecision::Fraction(6));
        assert_eq!(dt.start(), datetime!(2020-06-15 10:00:00.123456 UTC));
        assert_eq!(dt.end().unwrap(), datetime!(2020-06-15 10:00:00.123457 UTC));
        assert!(format_index_instant(dt.start()) < format_index_instant(dt.end().unwrap()));
    }

    #[test]
    fn test_invalid_values() {
        assert!(PartialDateTime::parse("").is_err());
        assert!(PartialDateTime::parse("childhood").is_err());
        assert!(PartialDateTime::parse("2020-13").is_err());
        assert!(PartialDateTime::parse("2020-02-30").is_err());
        assert!(PartialDateTime::parse("2020-06-15T25:00:00Z").is_err());
        assert!(PartialDateTime::parse("2020-06-15T10").is_err());
    }

    #[test]
    fn test_index_format_is_fixed_width_and_ordered() {
        let early = format_index_instant(datetime!(2020-06-15 09:59:59.5 UTC));
        let late = format_index_instant(datetime!(2020-06-15 10:00:00 UTC));
        assert_eq!(late, "2020-06-15T10:00:00.000000Z");
        assert_eq!(early.len(), late.len());
        assert!(early < late);
    }
}
