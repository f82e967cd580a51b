//! Time utility functions

use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DurationParseError {
    #[error("duration is empty")]
    Empty,
    #[error("invalid duration '{0}': expected a number followed by s, m, h, d or w")]
    Invalid(String),
    #[error("duration '{0}' is out of range")]
    Overflow(String),
}

/// Parse a suffixed duration such as `90s`, `30m`, `24h`, `7d` or `2w`.
///
/// Suffixes may be combined (`1d12h`). A bare number is read as seconds.
pub fn parse_duration(input: &str) -> Result<Duration, DurationParseError> {
    let s = input.trim();
    if s.is_empty() {
        return Err(DurationParseError::Empty);
    }

    if let Ok(secs) = s.parse::<u64>() {
        return Ok(Duration::from_secs(secs));
    }

    let mut total: u64 = 0;
    let mut digits = String::new();

    for c in s.chars() {
        if c.is_ascii_digit() {
            digits.push(c);
            continue;
        }

        let unit: u64 = match c.to_ascii_lowercase() {
            's' => 1,
            'm' => 60,
            'h' => 3600,
            'd' => 86_400,
            'w' => 604_800,
            _ => return Err(DurationParseError::Invalid(s.to_string())),
        };
        if digits.is_empty() {
            return Err(DurationParseError::Invalid(s.to_string()));
        }
        let value: u64 = digits
            .parse()
            .map_err(|_| DurationParseError::Overflow(s.to_string()))?;
        total = value
            .checked_mul(unit)
            .and_then(|v| total.checked_add(v))
            .ok_or_else(|| DurationParseError::Overflow(s.to_string()))?;
        digits.clear();
    }

    // Trailing digits without a unit ("1h30")
    if !digits.is_empty() {
        return Err(DurationParseError::Invalid(s.to_string()));
    }

    Ok(Duration::from_secs(total))
}
