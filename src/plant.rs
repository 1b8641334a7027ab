/// The market-data plant: the single high-level entry point that ties
/// backfill, gap-repair, and aggregation together into one deterministic
/// `ensure_history` call per `(venue, symbol)`.
use std::collections::HashMap;
use std::sync::Arc;

use tracing::info;

use crate::adapter::MarketDataAdapter;
use crate::aggregate::Aggregator;
use crate::backfill::BackfillService;
use crate::error::PlantError;
use crate::repair::GapRepairService;
use crate::store::BarStore;
use crate::time::{Timeframe, ceil_to_ms, floor_to_ms, now_ms, parse_iso8601_utc};

/// The base timeframe every derived (aggregated) timeframe rolls up from.
/// Fixed at `"1m"`: the original source never parameterizes this, and
/// nothing in the request surface asks for a different base.
pub const BASE_TIMEFRAME: &str = "1m";

pub struct MarketDataPlant {
    adapters: HashMap<String, Arc<dyn MarketDataAdapter>>,
    max_gap_ms: i64,
    chunk_days: i64,
}

#[derive(Debug, Clone, Default)]
pub struct EnsureHistoryReport {
    pub backfill_rows: usize,
    pub repair_windows_filled: usize,
    pub repair_windows_marked_missing: usize,
    pub aggregate_rows: usize,
}

impl MarketDataPlant {
    pub fn new(max_gap_ms: i64, chunk_days: i64) -> Self {
        Self {
            adapters: HashMap::new(),
            max_gap_ms,
            chunk_days,
        }
    }

    pub fn register_adapter(&mut self, adapter: Arc<dyn MarketDataAdapter>) {
        self.adapters.insert(adapter.venue().to_string(), adapter);
    }

    /// Normalizes, dedupes, and validates a requested timeframe list,
    /// ensuring the base timeframe is included so derived aggregation has
    /// something to roll up from. Parses each token's period once here so
    /// the rest of `ensure_history` reuses the cached `Timeframe` instead of
    /// re-parsing the same string on every pass.
    fn normalize_timeframes(requested: &[String]) -> Result<Vec<(String, Timeframe)>, PlantError> {
        if requested.is_empty() {
            return Err(PlantError::InvalidInput(
                "timeframe list must not be empty".to_string(),
            ));
        }

        let mut seen = std::collections::HashSet::new();
        let mut normalized = Vec::new();

        if !requested.iter().any(|tf| tf == BASE_TIMEFRAME) {
            let parsed = Timeframe::parse(BASE_TIMEFRAME)?;
            normalized.push((BASE_TIMEFRAME.to_string(), parsed));
            seen.insert(BASE_TIMEFRAME.to_string());
        }

        for tf in requested {
            let parsed = Timeframe::parse(tf)?;
            if seen.insert(tf.clone()) {
                normalized.push((tf.clone(), parsed));
            }
        }

        Ok(normalized)
    }

    pub async fn ensure_history(
        &self,
        store: &mut BarStore,
        venue: &str,
        symbol: &str,
        requested_timeframes: &[String],
        start_date: &str,
        end_date: Option<&str>,
        chunk_days: Option<i64>,
    ) -> Result<EnsureHistoryReport, PlantError> {
        let adapter = self.adapters.get(venue).cloned().ok_or_else(|| {
            PlantError::InvalidInput(format!("no adapter registered for venue {venue:?}"))
        })?;

        let timeframes = Self::normalize_timeframes(requested_timeframes)?;
        let start_raw = parse_iso8601_utc(start_date)?;
        let end_raw = match end_date {
            Some(s) => parse_iso8601_utc(s)?,
            None => now_ms(),
        };

        let backfill = BackfillService::new(adapter.clone());
        let repair = GapRepairService::new(adapter, self.max_gap_ms);
        let aggregator = Aggregator::new();
        let chunk_days = chunk_days.unwrap_or(self.chunk_days);

        let mut report = EnsureHistoryReport::default();

        // Step 2: backfill every timeframe independently, in order.
        for (tf, timeframe) in &timeframes {
            let tf_ms = timeframe.ms();
            let start_ms = floor_to_ms(start_raw, tf_ms);
            let end_ms = floor_to_ms(end_raw, tf_ms);
            if end_ms <= start_ms {
                return Err(PlantError::InvalidInput(format!(
                    "requested range is empty once floored to {tf}: start={start_ms} end={end_ms}"
                )));
            }
            info!(venue, symbol, tf, "ensure_history: backfill step");
            let result = backfill
                .run(store, venue, symbol, tf, start_ms, end_ms)
                .await?;
            report.backfill_rows += result.rows_written;
        }

        // Step 3: gap-repair every timeframe, bounded by the requested window.
        for (tf, timeframe) in &timeframes {
            let tf_ms = timeframe.ms();
            let scan_start = floor_to_ms(start_raw, tf_ms);
            let scan_end_excl = ceil_to_ms(end_raw, tf_ms);
            info!(venue, symbol, tf, "ensure_history: gap-repair step");
            let result = repair
                .run(store, venue, symbol, tf, scan_start, scan_end_excl)
                .await?;
            report.repair_windows_filled += result.windows_filled;
            report.repair_windows_marked_missing += result.windows_marked_missing;
        }

        // Step 4: aggregate every non-base timeframe from the base series.
        // The plant always treats every requested timeframe other than
        // BASE_TIMEFRAME as derived from it (resolved ambiguity, see DESIGN.md).
        let Some((base_min, base_max)) = store.min_max(BASE_TIMEFRAME, venue, symbol)? else {
            return Ok(report);
        };
        let base_tf_ms = timeframes
            .iter()
            .find(|(tf, _)| tf == BASE_TIMEFRAME)
            .map(|(_, timeframe)| timeframe.ms())
            .expect("normalize_timeframes always includes the base timeframe");

        for (tf, timeframe) in &timeframes {
            if tf == BASE_TIMEFRAME {
                continue;
            }
            let target_tf_ms = timeframe.ms();
            let prev_cov = store.get_coverage(venue, symbol, tf)?;
            let agg_start = match prev_cov {
                Some(cov) => cov.end_ms.saturating_sub(target_tf_ms).max(base_min),
                None => floor_to_ms(start_raw, target_tf_ms).max(base_min),
            };
            let derived_end_excl = floor_to_ms(base_max + base_tf_ms, target_tf_ms);
            if derived_end_excl <= agg_start {
                continue;
            }

            info!(venue, symbol, tf, "ensure_history: aggregate step");
            let result = aggregator.run(
                store,
                venue,
                symbol,
                BASE_TIMEFRAME,
                tf,
                agg_start,
                derived_end_excl,
                Some(chunk_days),
            )?;
            report.aggregate_rows += result.rows_written;
        }

        Ok(report)
    }
}
