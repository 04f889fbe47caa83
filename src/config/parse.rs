use std::time::Duration;

use crate::error::ConfigError;

/// Parses `300ms` / `30s` / `2m` / `1h`; bare digits are seconds.
pub(crate) fn parse_duration_value(value: &str) -> Result<Duration, ConfigError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(ConfigError::DurationEmpty);
    }

    let mut digits_len = 0usize;
    for ch in value.chars() {
        if ch.is_ascii_digit() {
            digits_len = digits_len.saturating_add(1);
        } else {
            break;
        }
    }
    if digits_len == 0 {
        return Err(ConfigError::InvalidDurationFormat {
            value: value.to_owned(),
        });
    }

    let (num_part, unit_part) = value.split_at(digits_len);
    let number: u64 = num_part
        .parse()
        .map_err(|err| ConfigError::InvalidDurationNumber {
            value: value.to_owned(),
            source: err,
        })?;

    let unit = if unit_part.is_empty() { "s" } else { unit_part };
    let duration = match unit {
        "ms" => Duration::from_millis(number),
        "s" => Duration::from_secs(number),
        "m" => {
            let secs = number.checked_mul(60).ok_or(ConfigError::DurationOverflow)?;
            Duration::from_secs(secs)
        }
        "h" => {
            let secs = number
                .checked_mul(60)
                .and_then(|seconds| seconds.checked_mul(60))
                .ok_or(ConfigError::DurationOverflow)?;
            Duration::from_secs(secs)
        }
        _ => {
            return Err(ConfigError::InvalidDurationUnit {
                unit: unit.to_owned(),
            })
        }
    };

    if duration.as_millis() == 0 {
        return Err(ConfigError::DurationZero);
    }

    Ok(duration)
}

/// Parses a `Name: value` header argument.
pub(crate) fn parse_header_arg(value: &str) -> Result<(String, String), ConfigError> {
    let (name, rest) = value
        .split_once(':')
        .ok_or_else(|| ConfigError::InvalidHeader {
            value: value.to_owned(),
        })?;
    let name = name.trim();
    if name.is_empty() {
        return Err(ConfigError::InvalidHeader {
            value: value.to_owned(),
        });
    }
    Ok((name.to_owned(), rest.trim().to_owned()))
}
