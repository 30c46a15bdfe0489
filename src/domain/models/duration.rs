//! Duration strings for mission timeouts.
//!
//! Accepts `(Hh)?(Mm)?(Ss)?` with the components in that order, e.g. `30m`,
//! `1h30m`, `90s`, `2h30m45s`. Empty and zero durations are invalid.

use std::time::Duration;

/// Parse a mission timeout string.
pub fn parse_duration(input: &str) -> Result<Duration, String> {
    let s = input.trim();
    if s.is_empty() {
        return Err("duration must not be empty".to_string());
    }

    let mut total_secs: u64 = 0;
    let mut number = String::new();
    // Units must appear in h, m, s order; this tracks the last unit seen.
    let mut last_unit_rank = 0u8;

    for ch in s.chars() {
        if ch.is_ascii_digit() {
            number.push(ch);
            continue;
        }
        let (rank, multiplier) = match ch {
            'h' => (1u8, 3600u64),
            'm' => (2, 60),
            's' => (3, 1),
            other => return Err(format!("invalid duration unit '{}' in '{}'", other, input)),
        };
        if number.is_empty() {
            return Err(format!("missing value before '{}' in '{}'", ch, input));
        }
        if rank <= last_unit_rank {
            return Err(format!(
                "duration components out of order in '{}': expected h, m, s",
                input
            ));
        }
        let value: u64 = number
            .parse()
            .map_err(|_| format!("invalid number '{}' in '{}'", number, input))?;
        total_secs = total_secs
            .checked_add(value.saturating_mul(multiplier))
            .ok_or_else(|| format!("duration '{}' overflows", input))?;
        number.clear();
        last_unit_rank = rank;
    }

    if !number.is_empty() {
        return Err(format!("trailing digits without a unit in '{}'", input));
    }
    if total_secs == 0 {
        return Err(format!("duration '{}' must be greater than zero", input));
    }
    Ok(Duration::from_secs(total_secs))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accepts_well_formed_durations() {
        assert_eq!(parse_duration("30m").unwrap(), Duration::from_secs(1800));
        assert_eq!(parse_duration("1h30m").unwrap(), Duration::from_secs(5400));
        assert_eq!(parse_duration("90s").unwrap(), Duration::from_secs(90));
        assert_eq!(
            parse_duration("2h30m45s").unwrap(),
            Duration::from_secs(2 * 3600 + 30 * 60 + 45)
        );
        assert_eq!(parse_duration("2s").unwrap(), Duration::from_secs(2));
    }

    #[test]
    fn test_rejects_malformed_durations() {
        for bad in ["", "  ", "0h", "0m0s", "10d", "30m1h", "h", "5", "1h2h", "-5m"] {
            assert!(parse_duration(bad).is_err(), "{bad:?} should be rejected");
        }
    }

    #[test]
    fn test_whitespace_trimmed() {
        assert_eq!(parse_duration(" 90s ").unwrap(), Duration::from_secs(90));
    }
}
