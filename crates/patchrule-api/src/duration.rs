//! Go-style duration strings (`"30s"`, `"1m30s"`, `"250ms"`).
//!
//! Used as a serde `with` module for the rule's `interval` and
//! `forDuration` fields.

use std::time::Duration;

use serde::{Deserialize, Deserializer, Serializer};
use thiserror::Error;

const NANOS_PER_SEC: u128 = 1_000_000_000;

/// Largest duration accepted, matching a signed 64-bit nanosecond count.
const MAX_NANOS: u128 = i64::MAX as u128;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DurationError {
    #[error("empty duration")]
    Empty,

    #[error("negative duration: {0}")]
    Negative(String),

    #[error("invalid duration: {0}")]
    Invalid(String),

    #[error("missing unit in duration: {0}")]
    MissingUnit(String),

    #[error("unknown unit {unit:?} in duration {input}")]
    UnknownUnit { unit: String, input: String },

    #[error("duration out of range: {0}")]
    Overflow(String),
}

/// Parse a Go duration string. A bare `0` is accepted.
pub fn parse(input: &str) -> Result<Duration, DurationError> {
    let s = input.trim();
    if s.is_empty() {
        return Err(DurationError::Empty);
    }
    if s.starts_with('-') {
        return Err(DurationError::Negative(s.to_string()));
    }
    let s = s.strip_prefix('+').unwrap_or(s);
    if s == "0" {
        return Ok(Duration::ZERO);
    }

    let invalid = || DurationError::Invalid(input.to_string());
    let overflow = || DurationError::Overflow(input.to_string());

    let mut rest = s;
    let mut total: u128 = 0;
    while !rest.is_empty() {
        let num_end = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .ok_or_else(|| DurationError::MissingUnit(input.to_string()))?;
        if num_end == 0 {
            return Err(invalid());
        }
        let (number, tail) = rest.split_at(num_end);
        let unit_end = tail
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(tail.len());
        let (unit, next) = tail.split_at(unit_end);

        let scale: u128 = match unit {
            "ns" => 1,
            "us" | "µs" | "μs" => 1_000,
            "ms" => 1_000_000,
            "s" => NANOS_PER_SEC,
            "m" => 60 * NANOS_PER_SEC,
            "h" => 3_600 * NANOS_PER_SEC,
            _ => {
                return Err(DurationError::UnknownUnit {
                    unit: unit.to_string(),
                    input: input.to_string(),
                });
            }
        };

        let (whole, frac) = number.split_once('.').unwrap_or((number, ""));
        if whole.is_empty() && frac.is_empty() {
            return Err(invalid());
        }
        let whole: u128 = if whole.is_empty() {
            0
        } else {
            whole.parse().map_err(|_| invalid())?
        };
        total = whole
            .checked_mul(scale)
            .and_then(|v| total.checked_add(v))
            .ok_or_else(overflow)?;

        if !frac.is_empty() {
            let digits = u32::try_from(frac.len()).map_err(|_| invalid())?;
            let frac_value: u128 = frac.parse().map_err(|_| invalid())?;
            let denom = 10u128.checked_pow(digits).ok_or_else(overflow)?;
            let part = frac_value.checked_mul(scale).ok_or_else(overflow)? / denom;
            total = total.checked_add(part).ok_or_else(overflow)?;
        }

        rest = next;
    }

    if total > MAX_NANOS {
        return Err(overflow());
    }
    let secs = u64::try_from(total / NANOS_PER_SEC).map_err(|_| overflow())?;
    let nanos = (total % NANOS_PER_SEC) as u32;
    Ok(Duration::new(secs, nanos))
}

/// Format a duration the way Go prints it (`1h0m0s`, `1m30s`, `250ms`).
pub fn format(d: Duration) -> String {
    if d.is_zero() {
        return "0s".to_string();
    }

    let secs = d.as_secs();
    let nanos = d.subsec_nanos();

    if secs == 0 {
        return if nanos % 1_000_000 == 0 {
            format!("{}ms", nanos / 1_000_000)
        } else if nanos % 1_000 == 0 {
            format!("{}µs", nanos / 1_000)
        } else {
            format!("{nanos}ns")
        };
    }

    let hours = secs / 3_600;
    let minutes = (secs % 3_600) / 60;
    let seconds = secs % 60;

    let mut out = String::new();
    if hours > 0 {
        out.push_str(&format!("{hours}h"));
    }
    if hours > 0 || minutes > 0 {
        out.push_str(&format!("{minutes}m"));
    }
    if nanos == 0 {
        out.push_str(&format!("{seconds}s"));
    } else {
        let frac = format!("{nanos:09}");
        out.push_str(&format!("{seconds}.{}s", frac.trim_end_matches('0')));
    }
    out
}

pub fn serialize<S: Serializer>(d: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&format(*d))
}

pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
    let s = String::deserialize(deserializer)?;
    parse(&s).map_err(serde::de::Error::custom)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_simple_units() {
        assert_eq!(parse("30s"), Ok(Duration::from_secs(30)));
        assert_eq!(parse("5m"), Ok(Duration::from_secs(300)));
        assert_eq!(parse("2h"), Ok(Duration::from_secs(7_200)));
        assert_eq!(parse("250ms"), Ok(Duration::from_millis(250)));
        assert_eq!(parse("0"), Ok(Duration::ZERO));
        assert_eq!(parse("0s"), Ok(Duration::ZERO));
    }

    #[test]
    fn parse_compound_and_fractional() {
        assert_eq!(parse("1m30s"), Ok(Duration::from_secs(90)));
        assert_eq!(parse("1h2m3s"), Ok(Duration::from_secs(3_723)));
        assert_eq!(parse("1.5s"), Ok(Duration::from_millis(1_500)));
        assert_eq!(parse(".5m"), Ok(Duration::from_secs(30)));
    }

    #[test]
    fn parse_rejects_garbage() {
        assert_eq!(parse(""), Err(DurationError::Empty));
        assert!(matches!(parse("-5s"), Err(DurationError::Negative(_))));
        assert!(matches!(parse("10"), Err(DurationError::MissingUnit(_))));
        assert!(matches!(parse("10d"), Err(DurationError::UnknownUnit { .. })));
        assert!(matches!(parse("s"), Err(DurationError::Invalid(_))));
        assert!(matches!(parse("1.2.3s"), Err(DurationError::Invalid(_))));
    }

    #[test]
    fn parse_rejects_out_of_range() {
        assert!(parse("2562047h").is_ok());
        assert!(matches!(parse("2562048h"), Err(DurationError::Overflow(_))));
        assert!(matches!(
            parse("18446744073709551615s1ns"),
            Err(DurationError::Overflow(_))
        ));
    }

    #[test]
    fn format_matches_go() {
        assert_eq!(format(Duration::ZERO), "0s");
        assert_eq!(format(Duration::from_secs(5)), "5s");
        assert_eq!(format(Duration::from_secs(90)), "1m30s");
        assert_eq!(format(Duration::from_secs(3_600)), "1h0m0s");
        assert_eq!(format(Duration::from_millis(250)), "250ms");
        assert_eq!(format(Duration::from_millis(1_500)), "1.5s");
    }

    #[test]
    fn format_parses_back() {
        for d in [
            Duration::from_secs(8),
            Duration::from_secs(3_723),
            Duration::from_millis(1_250),
        ] {
            assert_eq!(parse(&format(d)), Ok(d));
        }
    }
}
