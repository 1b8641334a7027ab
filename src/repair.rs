/// Gap-repair: scans a bounded window for holes in a series and attempts to
/// fill each one, falling back to a known-missing record when the adapter
/// confirms (via probe) that the data simply doesn't exist upstream.
use std::sync::Arc;

use tracing::{info, warn};

use crate::adapter::MarketDataAdapter;
use crate::error::PlantError;
use crate::store::BarStore;
use crate::time::tf_to_ms;
use crate::types::{GapRange, KnownMissingRange};

const DEFAULT_CHUNK_LIMIT: usize = 500;
const DEFAULT_MAX_RANGES: usize = 100;

pub struct GapRepairService {
    adapter: Arc<dyn MarketDataAdapter>,
    max_gap_ms: i64,
    chunk_limit: usize,
    max_ranges: usize,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct RepairReport {
    pub gaps_scanned: usize,
    pub gaps_skipped_too_large: usize,
    pub windows_filled: usize,
    pub windows_marked_missing: usize,
    pub rows_written: usize,
}

impl GapRepairService {
    pub fn new(adapter: Arc<dyn MarketDataAdapter>, max_gap_ms: i64) -> Self {
        Self {
            adapter,
            max_gap_ms,
            chunk_limit: DEFAULT_CHUNK_LIMIT,
            max_ranges: DEFAULT_MAX_RANGES,
        }
    }

    pub fn with_limits(mut self, chunk_limit: usize, max_ranges: usize) -> Self {
        self.chunk_limit = chunk_limit;
        self.max_ranges = max_ranges;
        self
    }

    pub async fn run(
        &self,
        store: &mut BarStore,
        venue: &str,
        symbol: &str,
        tf: &str,
        scan_start: i64,
        scan_end_excl: i64,
    ) -> Result<RepairReport, PlantError> {
        let tf_ms = tf_to_ms(tf)?;
        let gaps: Vec<GapRange> = store.find_gaps(
            tf,
            venue,
            symbol,
            Some(scan_start),
            Some(scan_end_excl),
            self.max_ranges,
        )?;

        let mut report = RepairReport {
            gaps_scanned: gaps.len(),
            ..Default::default()
        };

        for gap in gaps {
            let gap_len = gap.end_ms_excl - gap.start_ms;
            if gap_len > self.max_gap_ms {
                warn!(
                    venue, symbol, tf,
                    gap_start = gap.start_ms, gap_end = gap.end_ms_excl,
                    "gap exceeds max_gap_ms, skipping"
                );
                report.gaps_skipped_too_large += 1;
                continue;
            }

            self.repair_gap(store, venue, symbol, tf, tf_ms, gap, &mut report)
                .await?;
        }

        info!(venue, symbol, tf, ?report, "gap repair pass complete");
        Ok(report)
    }

    async fn repair_gap(
        &self,
        store: &mut BarStore,
        venue: &str,
        symbol: &str,
        tf: &str,
        tf_ms: i64,
        gap: GapRange,
        report: &mut RepairReport,
    ) -> Result<(), PlantError> {
        let chunk_span = self.chunk_limit as i64 * tf_ms;
        let mut window_start = gap.start_ms;

        while window_start < gap.end_ms_excl {
            let window_end = (window_start + chunk_span).min(gap.end_ms_excl);

            if store.is_known_missing(venue, symbol, tf, window_start, window_end)? {
                window_start = window_end;
                continue;
            }

            let page = self
                .adapter
                .fetch_ohlcv(symbol, tf, window_start, window_end, self.chunk_limit)
                .await?;

            if !page.is_empty() {
                report.rows_written += store.upsert_bars(tf, venue, symbol, &page)?;
                report.windows_filled += 1;
                window_start = window_end;
                continue;
            }

            // Empty page: probe to see whether the next available bar is at
            // or beyond this window, which confirms the window is genuinely
            // empty upstream rather than a transient miss.
            let probe = self
                .adapter
                .fetch_ohlcv(symbol, tf, window_start, i64::MAX, 1)
                .await?;

            let confirmed_empty = match probe.first() {
                None => true,
                Some(bar) => bar.ts_ms >= window_end,
            };

            if confirmed_empty {
                store.record_known_missing(&KnownMissingRange {
                    venue: venue.to_string(),
                    symbol: symbol.to_string(),
                    timeframe: tf.to_string(),
                    start_ms: window_start,
                    end_ms_excl: window_end,
                    reason: "upstream_empty_confirmed_by_probe".to_string(),
                    updated_at_ms: crate::time::now_ms(),
                })?;
                report.windows_marked_missing += 1;
            }
            // Otherwise: the probe found a bar inside the window, meaning this
            // was a transient empty response. Advance without marking so a
            // later pass can retry.

            window_start = window_end;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::test_support::{FakeAdapter, FakePage};
    use crate::types::Ohlcv;
    use tempfile::NamedTempFile;

    fn temp_store() -> BarStore {
        let file = NamedTempFile::new().unwrap();
        BarStore::open(file.path()).unwrap()
    }

    fn bar(ts_ms: i64) -> Ohlcv {
        Ohlcv::new_unchecked(ts_ms, 1.0, 1.0, 1.0, 1.0, 1.0)
    }

    #[tokio::test]
    async fn fills_gap_when_adapter_has_data() {
        let mut store = temp_store();
        store
            .upsert_bars("1m", "fake", "BTCUSDT", &[bar(0), bar(60_000), bar(180_000)])
            .unwrap();

        let adapter = Arc::new(FakeAdapter::new(
            "fake",
            vec![FakePage {
                start_ms: 120_000,
                end_ms: 180_000,
                limit: DEFAULT_CHUNK_LIMIT,
                bars: vec![bar(120_000)],
            }],
        ));
        let service = GapRepairService::new(adapter, 10 * 60_000);

        let report = service
            .run(&mut store, "fake", "BTCUSDT", "1m", 0, 240_000)
            .await
            .unwrap();

        assert_eq!(report.windows_filled, 1);
        assert_eq!(report.rows_written, 1);
    }

    #[tokio::test]
    async fn marks_known_missing_when_probe_confirms_empty() {
        let mut store = temp_store();
        store
            .upsert_bars("1m", "fake", "BTCUSDT", &[bar(0), bar(60_000), bar(180_000)])
            .unwrap();

        let adapter = Arc::new(FakeAdapter::new(
            "fake",
            vec![
                FakePage {
                    start_ms: 120_000,
                    end_ms: 180_000,
                    limit: DEFAULT_CHUNK_LIMIT,
                    bars: vec![],
                },
                FakePage {
                    start_ms: 120_000,
                    end_ms: i64::MAX,
                    limit: 1,
                    bars: vec![bar(180_000)],
                },
            ],
        ));
        let service = GapRepairService::new(adapter, 10 * 60_000);

        let report = service
            .run(&mut store, "fake", "BTCUSDT", "1m", 0, 240_000)
            .await
            .unwrap();

        assert_eq!(report.windows_marked_missing, 1);
        assert!(
            store
                .is_known_missing("fake", "BTCUSDT", "1m", 120_000, 180_000)
                .unwrap()
        );
    }

    #[tokio::test]
    async fn skips_gap_larger_than_max_gap_ms() {
        let mut store = temp_store();
        store
            .upsert_bars("1m", "fake", "BTCUSDT", &[bar(0), bar(600_000)])
            .unwrap();

        let adapter = Arc::new(FakeAdapter::new("fake", vec![]));
        let service = GapRepairService::new(adapter, 60_000);

        let report = service
            .run(&mut store, "fake", "BTCUSDT", "1m", 0, 660_000)
            .await
            .unwrap();

        assert_eq!(report.gaps_skipped_too_large, 1);
        assert_eq!(report.windows_filled, 0);
    }

    #[tokio::test]
    async fn idempotent_rerun_over_known_missing_does_no_work() {
        let mut store = temp_store();
        store
            .upsert_bars("1m", "fake", "BTCUSDT", &[bar(0), bar(60_000), bar(180_000)])
            .unwrap();
        store
            .record_known_missing(&KnownMissingRange {
                venue: "fake".into(),
                symbol: "BTCUSDT".into(),
                timeframe: "1m".into(),
                start_ms: 120_000,
                end_ms_excl: 180_000,
                reason: "upstream_empty_confirmed_by_probe".into(),
                updated_at_ms: 1,
            })
            .unwrap();

        let adapter = Arc::new(FakeAdapter::new("fake", vec![]));
        let service = GapRepairService::new(adapter, 10 * 60_000);

        let report = service
            .run(&mut store, "fake", "BTCUSDT", "1m", 0, 240_000)
            .await
            .unwrap();

        assert_eq!(report.windows_filled, 0);
        assert_eq!(report.windows_marked_missing, 0);
    }
}
