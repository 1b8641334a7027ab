/// Read-side API: clamps a request against stored coverage, finds the
/// longest gap-free window inside it, and (optionally) fills remaining
/// holes with synthetic flat bars for consumers that want a dense grid.
use crate::error::PlantError;
use crate::store::BarStore;
use crate::time::{ceil_to_ms, floor_to_ms, tf_to_ms};
use crate::types::Ohlcv;

/// An aligned, coverage-clamped read window `[start, end_excl)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedWindow {
    pub start_ms: i64,
    pub end_ms_excl: i64,
}

/// Loads coverage for `(venue, symbol, tf)`, clamps the optional requested
/// window against it, and aligns the result to the timeframe grid.
pub fn resolve_coverage(
    store: &BarStore,
    venue: &str,
    symbol: &str,
    tf: &str,
    req_start: Option<i64>,
    req_end: Option<i64>,
) -> Result<ResolvedWindow, PlantError> {
    let tf_ms = tf_to_ms(tf)?;
    let cov = store
        .get_coverage(venue, symbol, tf)?
        .ok_or_else(|| PlantError::ResolverEmpty(format!("no coverage for {venue}/{symbol}/{tf}")))?;

    let start_raw = req_start.unwrap_or(cov.start_ms).max(cov.start_ms);
    let end_raw = req_end.unwrap_or(cov.end_ms).min(cov.end_ms);

    let start_ms = ceil_to_ms(start_raw, tf_ms);
    let end_ms_excl = floor_to_ms(end_raw, tf_ms);

    if end_ms_excl <= start_ms {
        return Err(PlantError::ResolverEmpty(format!(
            "requested window is empty after clamp/align: start={start_ms} end_excl={end_ms_excl}"
        )));
    }

    Ok(ResolvedWindow { start_ms, end_ms_excl })
}

/// Finds the longest gap-free segment within `window`, requiring at least
/// `min_window_candles` bars. Returns `window` unchanged if it has no gaps.
pub fn resolve_contiguous_window(
    store: &BarStore,
    venue: &str,
    symbol: &str,
    tf: &str,
    window: ResolvedWindow,
    min_window_candles: i64,
) -> Result<ResolvedWindow, PlantError> {
    let tf_ms = tf_to_ms(tf)?;
    let gaps = store.find_gaps(
        tf,
        venue,
        symbol,
        Some(window.start_ms),
        Some(window.end_ms_excl),
        usize::MAX,
    )?;

    if gaps.is_empty() {
        return Ok(window);
    }

    let mut boundaries = vec![window.start_ms];
    for gap in &gaps {
        boundaries.push(gap.start_ms);
        boundaries.push(gap.end_ms_excl);
    }
    boundaries.push(window.end_ms_excl);

    let min_span = min_window_candles * tf_ms;
    let mut best: Option<(i64, i64)> = None;

    for pair in boundaries.chunks(2) {
        if pair.len() < 2 {
            continue;
        }
        let (seg_start, seg_end) = (pair[0], pair[1]);
        if seg_end <= seg_start {
            continue;
        }
        let span = seg_end - seg_start;
        let is_longer = best.map(|(s, e)| span > e - s).unwrap_or(true);
        if is_longer {
            best = Some((seg_start, seg_end));
        }
    }

    match best {
        Some((s, e)) if e - s >= min_span => Ok(ResolvedWindow { start_ms: s, end_ms_excl: e }),
        Some((s, e)) => Err(PlantError::ResolverEmpty(format!(
            "no segment reaches min_window_candles={min_window_candles}; longest observed span is {} candles",
            (e - s) / tf_ms
        ))),
        None => Err(PlantError::ResolverEmpty(
            "no non-empty segment found in window".to_string(),
        )),
    }
}

/// One grid point of a synthetic-fill stream: a real or synthesized bar.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FilledBar {
    pub bar: Ohlcv,
    pub is_synthetic: bool,
}

/// Lazily walks the full grid over `[start, end_excl)`, skipping missing
/// points before the first real bar ("anchor") and synthesizing flat bars
/// at `last_close` for every missing point after it. Not resumable: build a
/// fresh iterator to re-walk the same range.
pub struct SyntheticFillIter<I: Iterator<Item = Ohlcv>> {
    real: std::iter::Peekable<I>,
    cursor: i64,
    end_excl: i64,
    tf_ms: i64,
    anchor_seen: bool,
    last_close: f64,
}

impl<I: Iterator<Item = Ohlcv>> SyntheticFillIter<I> {
    pub fn new(real: I, start_ms: i64, end_excl: i64, tf_ms: i64) -> Self {
        Self {
            real: real.peekable(),
            cursor: start_ms,
            end_excl,
            tf_ms,
            anchor_seen: false,
            last_close: 0.0,
        }
    }
}

impl<I: Iterator<Item = Ohlcv>> Iterator for SyntheticFillIter<I> {
    type Item = FilledBar;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.cursor >= self.end_excl {
                return None;
            }

            if let Some(peeked) = self.real.peek() {
                if peeked.ts_ms == self.cursor {
                    let bar = self.real.next().unwrap();
                    self.last_close = bar.close;
                    self.anchor_seen = true;
                    self.cursor += self.tf_ms;
                    return Some(FilledBar { bar, is_synthetic: false });
                }
            }

            if !self.anchor_seen {
                // Markets that didn't exist yet: skip silently to the next grid point.
                self.cursor += self.tf_ms;
                continue;
            }

            let ts = self.cursor;
            self.cursor += self.tf_ms;
            let synthetic = Ohlcv::new_unchecked(
                ts,
                self.last_close,
                self.last_close,
                self.last_close,
                self.last_close,
                0.0,
            );
            return Some(FilledBar { bar: synthetic, is_synthetic: true });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::CoverageRow;
    use tempfile::NamedTempFile;

    fn temp_store() -> BarStore {
        let file = NamedTempFile::new().unwrap();
        BarStore::open(file.path()).unwrap()
    }

    fn bar(ts_ms: i64) -> Ohlcv {
        Ohlcv::new_unchecked(ts_ms, 1.0, 1.0, 1.0, 1.0, 1.0)
    }

    #[test]
    fn resolve_coverage_clamps_and_aligns() {
        let store = temp_store();
        store
            .upsert_coverage(&CoverageRow {
                venue: "v".into(),
                symbol: "s".into(),
                timeframe: "5m".into(),
                start_ms: 100_000,
                end_ms: 900_000,
                updated_at_ms: 0,
            })
            .unwrap();

        let window = resolve_coverage(&store, "v", "s", "5m", Some(120_000), Some(1_000_000)).unwrap();
        assert_eq!(window.start_ms, 300_000);
        assert_eq!(window.end_ms_excl, 900_000);
    }

    #[test]
    fn resolve_coverage_fails_when_absent() {
        let store = temp_store();
        let err = resolve_coverage(&store, "v", "s", "5m", None, None);
        assert!(err.is_err());
    }

    #[test]
    fn contiguous_window_returns_longer_side() {
        let mut store = temp_store();
        let mut bars: Vec<Ohlcv> = (0..5).map(|i| bar(i * 60_000)).collect();
        bars.extend((40..70).map(|i| bar(i * 60_000)));
        store.upsert_bars("1m", "v", "s", &bars).unwrap();

        let window = ResolvedWindow { start_ms: 0, end_ms_excl: 70 * 60_000 };
        let resolved = resolve_contiguous_window(&store, "v", "s", "1m", window, 10).unwrap();
        assert_eq!(resolved.start_ms, 40 * 60_000);
        assert_eq!(resolved.end_ms_excl, 70 * 60_000);
    }

    #[test]
    fn contiguous_window_fails_when_no_side_reaches_minimum() {
        let mut store = temp_store();
        let mut bars: Vec<Ohlcv> = (0..5).map(|i| bar(i * 60_000)).collect();
        bars.extend((40..45).map(|i| bar(i * 60_000)));
        store.upsert_bars("1m", "v", "s", &bars).unwrap();

        let window = ResolvedWindow { start_ms: 0, end_ms_excl: 45 * 60_000 };
        let err = resolve_contiguous_window(&store, "v", "s", "1m", window, 10);
        assert!(err.is_err());
    }

    #[test]
    fn synthetic_fill_matches_scenario_six() {
        let real = vec![bar(60_000), bar(240_000)];
        let iter = SyntheticFillIter::new(real.into_iter(), 0, 300_000, 60_000);
        let filled: Vec<FilledBar> = iter.collect();

        // ts=0 skipped (before anchor), real@60k, syn@120k, syn@180k, real@240k.
        assert_eq!(filled.len(), 4);
        assert_eq!(filled[0].bar.ts_ms, 60_000);
        assert!(!filled[0].is_synthetic);
        assert_eq!(filled[1].bar.ts_ms, 120_000);
        assert!(filled[1].is_synthetic);
        assert_eq!(filled[2].bar.ts_ms, 180_000);
        assert!(filled[2].is_synthetic);
        assert_eq!(filled[3].bar.ts_ms, 240_000);
        assert!(!filled[3].is_synthetic);
    }

    #[test]
    fn stripping_synthetic_entries_recovers_input() {
        let real = vec![bar(0), bar(180_000)];
        let iter = SyntheticFillIter::new(real.clone().into_iter(), 0, 240_000, 60_000);
        let recovered: Vec<i64> = iter
            .filter(|f| !f.is_synthetic)
            .map(|f| f.bar.ts_ms)
            .collect();
        assert_eq!(recovered, real.iter().map(|b| b.ts_ms).collect::<Vec<_>>());
    }
}
