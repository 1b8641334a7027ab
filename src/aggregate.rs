/// Rolls base-timeframe bars up into a higher timeframe using bucket-floor
/// grouping, processed in day-sized chunks so large ranges don't require
/// holding the whole base series in memory at once.
use tracing::{debug, info};

use crate::error::PlantError;
use crate::store::BarStore;
use crate::time::{floor_to_ms, tf_to_ms};
use crate::types::{CoverageRow, Ohlcv};

const DEFAULT_CHUNK_DAYS: i64 = 30;
const MS_PER_DAY: i64 = 86_400_000;

pub struct Aggregator;

#[derive(Debug, Clone, PartialEq)]
pub struct AggregateReport {
    pub rows_written: usize,
    pub coverage: Option<CoverageRow>,
}

/// Accumulates one target-timeframe bucket from a stream of base bars.
struct BucketAccumulator {
    bucket_start: i64,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    volume: f64,
}

impl BucketAccumulator {
    fn start(bar: &Ohlcv, bucket_start: i64) -> Self {
        Self {
            bucket_start,
            open: bar.open,
            high: bar.high,
            low: bar.low,
            close: bar.close,
            volume: bar.volume,
        }
    }

    fn fold(&mut self, bar: &Ohlcv) {
        self.high = self.high.max(bar.high);
        self.low = self.low.min(bar.low);
        self.close = bar.close;
        self.volume += bar.volume;
    }

    fn finish(self) -> Ohlcv {
        Ohlcv::new_unchecked(self.bucket_start, self.open, self.high, self.low, self.close, self.volume)
    }
}

impl Aggregator {
    pub fn new() -> Self {
        Self
    }

    /// Aggregates `base_tf` bars into `target_tf` over `[start_ms, end_ms)`,
    /// writing only fully-completed buckets, in chunks of `chunk_days` days.
    pub fn run(
        &self,
        store: &mut BarStore,
        venue: &str,
        symbol: &str,
        base_tf: &str,
        target_tf: &str,
        start_ms: i64,
        end_ms: i64,
        chunk_days: Option<i64>,
    ) -> Result<AggregateReport, PlantError> {
        if end_ms <= start_ms {
            return Err(PlantError::InvalidInput(format!(
                "aggregate window is empty: start_ms={start_ms} end_ms={end_ms}"
            )));
        }

        let base_tf_ms = tf_to_ms(base_tf)?;
        let target_tf_ms = tf_to_ms(target_tf)?;
        if target_tf_ms <= base_tf_ms {
            return Err(PlantError::InvalidInput(format!(
                "target timeframe {target_tf} must be coarser than base {base_tf}"
            )));
        }

        let chunk_ms = chunk_days.unwrap_or(DEFAULT_CHUNK_DAYS) * MS_PER_DAY;
        let mut rows_written = 0usize;
        let mut cursor = floor_to_ms(start_ms, target_tf_ms);

        while cursor < end_ms {
            let chunk_end = (cursor + chunk_ms).min(end_ms);
            let complete_end = floor_to_ms(chunk_end, target_tf_ms);
            if complete_end <= cursor {
                break;
            }

            // Extend the read window leftward so a bucket straddling the
            // chunk boundary still sees all of its base bars.
            let read_start = (cursor - target_tf_ms).max(0);
            let base_bars = store.read_range(base_tf, venue, symbol, read_start, complete_end)?;

            let mut out = Vec::new();
            let mut acc: Option<BucketAccumulator> = None;

            for bar in &base_bars {
                let bucket_start = floor_to_ms(bar.ts_ms, target_tf_ms);
                if bucket_start + target_tf_ms > complete_end {
                    break;
                }
                if bucket_start < cursor {
                    continue;
                }
                match &mut acc {
                    Some(current) if current.bucket_start == bucket_start => current.fold(bar),
                    _ => {
                        if let Some(prev) = acc.take() {
                            out.push(prev.finish());
                        }
                        acc = Some(BucketAccumulator::start(bar, bucket_start));
                    }
                }
            }
            if let Some(prev) = acc.take() {
                out.push(prev.finish());
            }

            if !out.is_empty() {
                debug!(venue, symbol, base_tf, target_tf, buckets = out.len(), "aggregated chunk");
                rows_written += store.upsert_bars(target_tf, venue, symbol, &out)?;
            }

            cursor = complete_end;
        }

        let coverage = self.refresh_coverage(store, venue, symbol, target_tf)?;
        info!(venue, symbol, target_tf, rows_written, "aggregation complete");

        Ok(AggregateReport { rows_written, coverage })
    }

    fn refresh_coverage(
        &self,
        store: &BarStore,
        venue: &str,
        symbol: &str,
        tf: &str,
    ) -> Result<Option<CoverageRow>, PlantError> {
        let tf_ms = tf_to_ms(tf)?;
        let Some((min_ts, max_ts)) = store.min_max(tf, venue, symbol)? else {
            return Ok(None);
        };
        let existing = store.get_coverage(venue, symbol, tf)?;
        let start_ms = match &existing {
            Some(prev) => prev.start_ms.min(min_ts),
            None => min_ts,
        };
        let end_ms = match &existing {
            Some(prev) => prev.end_ms.max(max_ts + tf_ms),
            None => max_ts + tf_ms,
        };
        let row = CoverageRow {
            venue: venue.to_string(),
            symbol: symbol.to_string(),
            timeframe: tf.to_string(),
            start_ms,
            end_ms,
            updated_at_ms: crate::time::now_ms(),
        };
        store.upsert_coverage(&row)?;
        Ok(Some(row))
    }
}

impl Default for Aggregator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    fn temp_store() -> BarStore {
        let file = NamedTempFile::new().unwrap();
        BarStore::open(file.path()).unwrap()
    }

    fn bar(ts_ms: i64, close: f64) -> Ohlcv {
        Ohlcv::new_unchecked(ts_ms, close, close, close, close, 1.0)
    }

    #[test]
    fn aggregates_ten_1m_bars_into_two_5m_buckets() {
        let mut store = temp_store();
        let bars: Vec<Ohlcv> = (0..10).map(|i| bar(i * 60_000, i as f64)).collect();
        store.upsert_bars("1m", "fake", "BTCUSDT", &bars).unwrap();

        let agg = Aggregator::new();
        let report = agg
            .run(&mut store, "fake", "BTCUSDT", "1m", "5m", 0, 600_000, None)
            .unwrap();

        assert_eq!(report.rows_written, 2);
        let rows = store.read_range("5m", "fake", "BTCUSDT", 0, 600_000).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].ts_ms, 0);
        assert_eq!(rows[0].close, 4.0);
        assert_eq!(rows[1].ts_ms, 300_000);
        assert_eq!(rows[1].close, 9.0);
    }

    #[test]
    fn trailing_partial_bucket_is_not_emitted() {
        let mut store = temp_store();
        // Only 3 of 5 bars for the second 5m bucket: incomplete, must not emit.
        let bars: Vec<Ohlcv> = (0..8).map(|i| bar(i * 60_000, i as f64)).collect();
        store.upsert_bars("1m", "fake", "BTCUSDT", &bars).unwrap();

        let agg = Aggregator::new();
        let report = agg
            .run(&mut store, "fake", "BTCUSDT", "1m", "5m", 0, 480_000, None)
            .unwrap();

        assert_eq!(report.rows_written, 1);
        let rows = store.read_range("5m", "fake", "BTCUSDT", 0, 600_000).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].ts_ms, 0);
    }

    #[test]
    fn rerunning_same_window_is_idempotent() {
        let mut store = temp_store();
        let bars: Vec<Ohlcv> = (0..10).map(|i| bar(i * 60_000, i as f64)).collect();
        store.upsert_bars("1m", "fake", "BTCUSDT", &bars).unwrap();

        let agg = Aggregator::new();
        agg.run(&mut store, "fake", "BTCUSDT", "1m", "5m", 0, 600_000, None).unwrap();
        agg.run(&mut store, "fake", "BTCUSDT", "1m", "5m", 0, 600_000, None).unwrap();

        let rows = store.read_range("5m", "fake", "BTCUSDT", 0, 600_000).unwrap();
        assert_eq!(rows.len(), 2);
    }

    #[test]
    fn rejects_target_coarser_than_base_violation() {
        let mut store = temp_store();
        let agg = Aggregator::new();
        let err = agg.run(&mut store, "fake", "BTCUSDT", "5m", "1m", 0, 600_000, None);
        assert!(err.is_err());
    }
}
