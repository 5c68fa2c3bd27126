//! EDN text reader and printer.

mod printer;
mod reader;

pub use printer::to_edn_string;
pub use reader::{from_edn_str, EdnReader};

use chrono::{DateTime, NaiveDate, Utc};

/// Parse an RFC 3339 timestamp (or a bare `YYYY-MM-DD` date) to epoch ms.
pub fn parse_instant(text: &str) -> Option<i64> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.timestamp_millis());
    }
    let date = NaiveDate::parse_from_str(text, "%Y-%m-%d").ok()?;
    Some(date.and_hms_opt(0, 0, 0)?.and_utc().timestamp_millis())
}

/// Format epoch ms as an RFC 3339 UTC timestamp with millisecond precision.
pub fn format_instant(ms: i64) -> Option<String> {
    let dt = DateTime::<Utc>::from_timestamp_millis(ms)?;
    Some(dt.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn instant_text_roundtrip() {
        assert_eq!(format_instant(0).as_deref(), Some("1970-01-01T00:00:00.000Z"));
        assert_eq!(parse_instant("1970-01-01T00:00:01.500Z"), Some(1500));
        assert_eq!(parse_instant("2024-01-01"), Some(1_704_067_200_000));
        assert_eq!(parse_instant("2024-01-01T01:00:00+01:00"), Some(1_704_067_200_000));
        assert_eq!(parse_instant("yesterday"), None);
    }
}
