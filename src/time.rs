/// Timeframe parsing and millisecond grid arithmetic.
///
/// Every timestamp handled by the archive is in epoch milliseconds UTC, and
/// every bar's open time must land on a multiple of its timeframe's period
/// (the "grid"). This module is the single place that knows how to turn a
/// `"5m"`-style token into a period and how to snap a timestamp to the grid.
use chrono::{DateTime, NaiveDateTime, Utc};

use crate::error::PlantError;

/// A parsed timeframe token (`"5m"`, `"1h"`, `"3d"`, ...) and its period.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Timeframe {
    ms: i64,
}

impl Timeframe {
    pub fn parse(tf: &str) -> Result<Self, PlantError> {
        Ok(Self {
            ms: tf_to_ms(tf)?,
        })
    }

    pub fn ms(self) -> i64 {
        self.ms
    }
}

/// Parses a timeframe token into its period in milliseconds.
///
/// Accepts `^\d+[smhdw]$`: a positive integer count followed by one of
/// `s`, `m`, `h`, `d`, `w`.
pub fn tf_to_ms(tf: &str) -> Result<i64, PlantError> {
    let tf = tf.trim();
    let unit = tf
        .chars()
        .last()
        .ok_or_else(|| PlantError::InvalidInput(format!("empty timeframe: {tf:?}")))?;

    let (count_str, mult) = match unit {
        's' => (&tf[..tf.len() - 1], 1_000i64),
        'm' => (&tf[..tf.len() - 1], 60_000i64),
        'h' => (&tf[..tf.len() - 1], 3_600_000i64),
        'd' => (&tf[..tf.len() - 1], 86_400_000i64),
        'w' => (&tf[..tf.len() - 1], 604_800_000i64),
        _ => {
            return Err(PlantError::InvalidInput(format!(
                "invalid timeframe unit in {tf:?} (expected one of s, m, h, d, w)"
            )));
        }
    };

    if count_str.is_empty() || !count_str.bytes().all(|b| b.is_ascii_digit()) {
        return Err(PlantError::InvalidInput(format!(
            "invalid timeframe: {tf:?} (expected e.g. '1m', '5m', '1h')"
        )));
    }

    let count: i64 = count_str
        .parse()
        .map_err(|_| PlantError::InvalidInput(format!("invalid timeframe count in {tf:?}")))?;

    if count <= 0 {
        return Err(PlantError::InvalidInput(format!(
            "timeframe count must be positive: {tf:?}"
        )));
    }

    Ok(count * mult)
}

/// Floors `ts_ms` down to the nearest multiple of the timeframe's period.
pub fn floor_to_tf(ts_ms: i64, tf: &str) -> Result<i64, PlantError> {
    let ms = tf_to_ms(tf)?;
    Ok(floor_to_ms(ts_ms, ms))
}

pub fn floor_to_ms(ts_ms: i64, tf_ms: i64) -> i64 {
    ts_ms.div_euclid(tf_ms) * tf_ms
}

/// Ceils `ts_ms` up to the nearest multiple of the timeframe's period.
pub fn ceil_to_tf(ts_ms: i64, tf: &str) -> Result<i64, PlantError> {
    let ms = tf_to_ms(tf)?;
    Ok(ceil_to_ms(ts_ms, ms))
}

pub fn ceil_to_ms(ts_ms: i64, tf_ms: i64) -> i64 {
    let floored = floor_to_ms(ts_ms, tf_ms);
    if floored == ts_ms {
        floored
    } else {
        floored + tf_ms
    }
}

/// Parses an ISO-8601 UTC timestamp into epoch milliseconds.
///
/// Accepts a trailing `Z`, an explicit `+HH:MM` offset, or no offset at all
/// (treated as UTC), matching the original `datetime_utils.parse_iso8601_to_ms`.
pub fn parse_iso8601_utc(s: &str) -> Result<i64, PlantError> {
    let s = s.trim();

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc).timestamp_millis());
    }

    // Allow a bare "Z" without full rfc3339 fraction handling, and allow a
    // naive string with no offset at all (assumed UTC).
    let normalized = if let Some(stripped) = s.strip_suffix('Z') {
        format!("{stripped}+00:00")
    } else {
        s.to_string()
    };

    if let Ok(dt) = DateTime::parse_from_rfc3339(&normalized) {
        return Ok(dt.with_timezone(&Utc).timestamp_millis());
    }

    for fmt in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S", "%Y-%m-%d"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
            return Ok(DateTime::<Utc>::from_naive_utc_and_offset(naive, Utc).timestamp_millis());
        }
        if fmt == "%Y-%m-%d" {
            if let Ok(date) = chrono::NaiveDate::parse_from_str(s, fmt) {
                let naive = date.and_hms_opt(0, 0, 0).unwrap();
                return Ok(
                    DateTime::<Utc>::from_naive_utc_and_offset(naive, Utc).timestamp_millis(),
                );
            }
        }
    }

    Err(PlantError::InvalidInput(format!(
        "could not parse ISO-8601 timestamp: {s:?}"
    )))
}

/// The current wall-clock time in epoch milliseconds.
pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_all_units() {
        assert_eq!(tf_to_ms("1s").unwrap(), 1_000);
        assert_eq!(tf_to_ms("1m").unwrap(), 60_000);
        assert_eq!(tf_to_ms("5m").unwrap(), 300_000);
        assert_eq!(tf_to_ms("1h").unwrap(), 3_600_000);
        assert_eq!(tf_to_ms("1d").unwrap(), 86_400_000);
        assert_eq!(tf_to_ms("1w").unwrap(), 604_800_000);
    }

    #[test]
    fn rejects_malformed_tokens() {
        assert!(tf_to_ms("").is_err());
        assert!(tf_to_ms("m5").is_err());
        assert!(tf_to_ms("5").is_err());
        assert!(tf_to_ms("5x").is_err());
        assert!(tf_to_ms("-5m").is_err());
        assert!(tf_to_ms("0m").is_err());
    }

    #[test]
    fn floor_and_ceil_agree_on_grid_points() {
        let tf = "5m";
        let ms = tf_to_ms(tf).unwrap();
        let x = 10 * ms;
        assert_eq!(floor_to_tf(x, tf).unwrap(), x);
        assert_eq!(ceil_to_tf(x, tf).unwrap(), x);
    }

    #[test]
    fn floor_rounds_down_and_ceil_rounds_up() {
        let tf = "5m";
        let ms = tf_to_ms(tf).unwrap();
        let x = 10 * ms + 1;
        assert_eq!(floor_to_tf(x, tf).unwrap(), 10 * ms);
        assert_eq!(ceil_to_tf(x, tf).unwrap(), 11 * ms);
    }

    #[test]
    fn parses_iso8601_with_z_and_offset() {
        let a = parse_iso8601_utc("2017-08-17T00:00:00Z").unwrap();
        let b = parse_iso8601_utc("2017-08-17T00:00:00+00:00").unwrap();
        let c = parse_iso8601_utc("2017-08-17T00:00:00").unwrap();
        assert_eq!(a, b);
        assert_eq!(a, c);
    }

    #[test]
    fn parses_bare_date() {
        let a = parse_iso8601_utc("2017-08-17").unwrap();
        let b = parse_iso8601_utc("2017-08-17T00:00:00Z").unwrap();
        assert_eq!(a, b);
    }
}
