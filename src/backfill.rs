/// Bootstrap / tail-update paging loop: pulls a single series forward to
/// `end_ms` and keeps `history_coverage` in sync, one commit per page.
use std::sync::Arc;

use tracing::{info, warn};

use crate::adapter::MarketDataAdapter;
use crate::error::PlantError;
use crate::store::BarStore;
use crate::time::floor_to_ms;
use crate::types::CoverageRow;

const PAGE_LIMIT: usize = 1000;

pub struct BackfillService {
    adapter: Arc<dyn MarketDataAdapter>,
}

/// Outcome of one `run` call, reported up to the caller for logging/exit codes.
#[derive(Debug, Clone, PartialEq)]
pub struct BackfillReport {
    pub rows_written: usize,
    pub pages_fetched: usize,
    pub coverage: Option<CoverageRow>,
}

impl BackfillService {
    pub fn new(adapter: Arc<dyn MarketDataAdapter>) -> Self {
        Self { adapter }
    }

    /// Runs bootstrap-or-tail-update for one `(venue, symbol, tf)` series
    /// over `[start_ms, end_ms)`, both already floored to the timeframe grid
    /// by the caller (the plant owns date parsing and flooring, per §4.7).
    pub async fn run(
        &self,
        store: &mut BarStore,
        venue: &str,
        symbol: &str,
        tf: &str,
        start_ms: i64,
        end_ms: i64,
    ) -> Result<BackfillReport, PlantError> {
        if end_ms <= start_ms {
            return Err(PlantError::InvalidInput(format!(
                "backfill window is empty: start_ms={start_ms} end_ms={end_ms}"
            )));
        }

        let tf_ms = crate::time::tf_to_ms(tf)?;

        let max_ts = store.max_ts(tf, venue, symbol)?;
        let mut cursor = match max_ts {
            None => {
                info!(venue, symbol, tf, start_ms, "backfill bootstrap");
                start_ms
            }
            Some(max_ts) => {
                let tail_cursor = (max_ts + tf_ms).max(start_ms);
                if tail_cursor >= end_ms {
                    info!(venue, symbol, tf, "backfill already caught up, refreshing coverage only");
                    let coverage = self.refresh_coverage(store, venue, symbol, tf)?;
                    return Ok(BackfillReport {
                        rows_written: 0,
                        pages_fetched: 0,
                        coverage,
                    });
                }
                info!(venue, symbol, tf, cursor = tail_cursor, "backfill tail-update");
                tail_cursor
            }
        };

        let mut rows_written = 0usize;
        let mut pages_fetched = 0usize;

        loop {
            let page = self
                .adapter
                .fetch_ohlcv(symbol, tf, cursor, end_ms, PAGE_LIMIT)
                .await?;
            pages_fetched += 1;

            if page.is_empty() {
                warn!(venue, symbol, tf, cursor, end_ms, "backfill page empty, stopping");
                break;
            }

            let last_ts = page
                .last()
                .expect("non-empty page has a last element")
                .ts_ms;

            rows_written += store.upsert_bars(tf, venue, symbol, &page)?;

            let next = floor_to_ms(last_ts, tf_ms) + tf_ms;
            if next <= cursor {
                // Classed as a fatal invariant violation, not a soft stop: a
                // non-progressing cursor means the adapter returned bars
                // that don't advance the grid, which the store must never
                // persist silently.
                return Err(PlantError::InvariantViolation(format!(
                    "backfill cursor failed to progress: cursor={cursor} next={next}"
                )));
            }
            cursor = next;

            if cursor >= end_ms {
                break;
            }
        }

        let coverage = self.refresh_coverage(store, venue, symbol, tf)?;

        Ok(BackfillReport {
            rows_written,
            pages_fetched,
            coverage,
        })
    }

    /// Recomputes `(min_ts, max_ts + tf_ms)` from the stored series and
    /// upserts coverage, enforcing that `start_ms` never grows past a prior
    /// stored value (monotonicity, §4.5/§8).
    fn refresh_coverage(
        &self,
        store: &BarStore,
        venue: &str,
        symbol: &str,
        tf: &str,
    ) -> Result<Option<CoverageRow>, PlantError> {
        let tf_ms = crate::time::tf_to_ms(tf)?;
        let Some((min_ts, max_ts)) = store.min_max(tf, venue, symbol)? else {
            return Ok(None);
        };

        let existing = store.get_coverage(venue, symbol, tf)?;
        let start_ms = match &existing {
            Some(prev) => prev.start_ms.min(min_ts),
            None => min_ts,
        };
        let end_ms = max_ts + tf_ms;
        let end_ms = match &existing {
            Some(prev) => prev.end_ms.max(end_ms),
            None => end_ms,
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
