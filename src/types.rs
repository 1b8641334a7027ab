/// Core value objects: OHLCV bars, coverage rows, known-missing ranges, gaps.
///
/// All of these are immutable once constructed; "updating" a bar means
/// upserting a new value under the same key, never mutating in place.
use crate::error::PlantError;

/// A single OHLCV bar. `ts_ms` is the bar's open time and must already be
/// aligned to its timeframe's grid by the time a bar reaches this type —
/// callers align, this type only validates OHLC shape.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Ohlcv {
    pub ts_ms: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Ohlcv {
    pub fn new(
        ts_ms: i64,
        open: f64,
        high: f64,
        low: f64,
        close: f64,
        volume: f64,
    ) -> Result<Self, PlantError> {
        if low > open || low > close || open > high || close > high || high < low {
            return Err(PlantError::InvariantViolation(format!(
                "bar at ts_ms={ts_ms} violates low<=open,close<=high: o={open} h={high} l={low} c={close}"
            )));
        }
        if volume < 0.0 {
            return Err(PlantError::InvariantViolation(format!(
                "bar at ts_ms={ts_ms} has negative volume={volume}"
            )));
        }
        Ok(Self {
            ts_ms,
            open,
            high,
            low,
            close,
            volume,
        })
    }

    /// Constructs a bar without re-checking the OHLC invariants, for callers
    /// (store reads, aggregation) that already know the values are sound.
    pub fn new_unchecked(ts_ms: i64, open: f64, high: f64, low: f64, close: f64, volume: f64) -> Self {
        Self {
            ts_ms,
            open,
            high,
            low,
            close,
            volume,
        }
    }
}

/// The single trustworthy interval `[start_ms, end_ms)` for one
/// `(venue, symbol, timeframe)` series.
#[derive(Debug, Clone, PartialEq)]
pub struct CoverageRow {
    pub venue: String,
    pub symbol: String,
    pub timeframe: String,
    pub start_ms: i64,
    pub end_ms: i64,
    pub updated_at_ms: i64,
}

/// A sub-range the adapter has proved empty upstream.
#[derive(Debug, Clone, PartialEq)]
pub struct KnownMissingRange {
    pub venue: String,
    pub symbol: String,
    pub timeframe: String,
    pub start_ms: i64,
    pub end_ms_excl: i64,
    pub reason: String,
    pub updated_at_ms: i64,
}

/// A maximal hole `[start_ms, end_ms_excl)` in an otherwise-stored series.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GapRange {
    pub start_ms: i64,
    pub end_ms_excl: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_inverted_high_low() {
        assert!(Ohlcv::new(0, 10.0, 5.0, 1.0, 3.0, 1.0).is_err());
    }

    #[test]
    fn rejects_negative_volume() {
        assert!(Ohlcv::new(0, 5.0, 10.0, 1.0, 7.0, -1.0).is_err());
    }

    #[test]
    fn accepts_valid_bar() {
        let bar = Ohlcv::new(0, 5.0, 10.0, 1.0, 7.0, 2.0).unwrap();
        assert_eq!(bar.close, 7.0);
    }
}
