//! Defensive parsing for the interval strings in `GATEWAY_CONNECTION_READY`.
//!
//! The intervals arrive as free-form text ("10s", "500ms", "2m"). Parsing
//! never fails the handshake; callers fall back to their defaults on
//! `None`.

use std::time::Duration;

/// Parse a duration string like `"10s"`, `"500ms"`, `"2m"` or `"1.5s"`.
///
/// A bare number is read as seconds. Returns `None` for anything that
/// does not parse, including zero and negative values.
pub fn parse_interval(text: &str) -> Option<Duration> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }

    let split = text
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(text.len());
    let (number, unit) = text.split_at(split);

    let value: f64 = number.parse().ok()?;
    if !value.is_finite() || value <= 0.0 {
        return None;
    }

    let millis = match unit.trim() {
        "ms" => value,
        "" | "s" => value * 1_000.0,
        "m" => value * 60_000.0,
        "h" => value * 3_600_000.0,
        _ => return None,
    };

    Some(Duration::from_millis(millis.round() as u64))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_interval() {
        assert_eq!(parse_interval("10s"), Some(Duration::from_secs(10)));
        assert_eq!(parse_interval("5s"), Some(Duration::from_secs(5)));
        assert_eq!(parse_interval("500ms"), Some(Duration::from_millis(500)));
        assert_eq!(parse_interval("2m"), Some(Duration::from_secs(120)));
        assert_eq!(parse_interval("1.5s"), Some(Duration::from_millis(1500)));
        assert_eq!(parse_interval(" 10s "), Some(Duration::from_secs(10)));
        // Bare numbers are seconds.
        assert_eq!(parse_interval("10"), Some(Duration::from_secs(10)));
    }

    #[test]
    fn test_parse_interval_rejects_garbage() {
        assert_eq!(parse_interval(""), None);
        assert_eq!(parse_interval("soon"), None);
        assert_eq!(parse_interval("10 parsecs"), None);
        assert_eq!(parse_interval("0s"), None);
        assert_eq!(parse_interval("-5s"), None);
    }
}
