/// Adapter port: the uniform interface the rest of the plant uses to pull
/// candles from an exchange, independent of which exchange it is.
use async_trait::async_trait;

use crate::error::AdapterError;
use crate::types::Ohlcv;

/// A market-data provider. Implementations must be `Send + Sync` so a
/// `Box<dyn MarketDataAdapter>` can be held by the plant and shared across
/// the sequential per-timeframe passes.
#[async_trait]
pub trait MarketDataAdapter: Send + Sync {
    /// Identifies this adapter in the venue → adapter registry owned by the
    /// plant (e.g. `"binance_spot"`).
    fn venue(&self) -> &str;

    /// Fetches bars for `symbol`/`timeframe` whose `ts_ms` lies in
    /// `[start_ms, end_ms)`, sorted ascending, at most `limit` rows.
    ///
    /// Implementations must strictly exclude `end_ms` and sort their output;
    /// callers additionally filter defensively (§6 wire contract).
    async fn fetch_ohlcv(
        &self,
        symbol: &str,
        timeframe: &str,
        start_ms: i64,
        end_ms: i64,
        limit: usize,
    ) -> Result<Vec<Ohlcv>, AdapterError>;
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use std::sync::Mutex;

    /// A scripted adapter for backfill/repair tests: each call to
    /// `fetch_ohlcv` pops the next page queued for that exact
    /// `(start_ms, end_ms)` window, or returns empty if nothing was queued.
    pub struct FakeAdapter {
        venue: String,
        pages: Mutex<Vec<FakePage>>,
    }

    pub struct FakePage {
        pub start_ms: i64,
        pub end_ms: i64,
        pub limit: usize,
        pub bars: Vec<Ohlcv>,
    }

    impl FakeAdapter {
        pub fn new(venue: &str, pages: Vec<FakePage>) -> Self {
            Self {
                venue: venue.to_string(),
                pages: Mutex::new(pages),
            }
        }
    }

    #[async_trait]
    impl MarketDataAdapter for FakeAdapter {
        fn venue(&self) -> &str {
            &self.venue
        }

        async fn fetch_ohlcv(
            &self,
            _symbol: &str,
            _timeframe: &str,
            start_ms: i64,
            end_ms: i64,
            limit: usize,
        ) -> Result<Vec<Ohlcv>, AdapterError> {
            let mut pages = self.pages.lock().unwrap();
            if let Some(pos) = pages
                .iter()
                .position(|p| p.start_ms == start_ms && p.end_ms == end_ms && p.limit >= limit)
            {
                let page = pages.remove(pos);
                return Ok(page
                    .bars
                    .into_iter()
                    .filter(|b| b.ts_ms >= start_ms && b.ts_ms < end_ms)
                    .take(limit)
                    .collect());
            }
            Ok(Vec::new())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;

    #[tokio::test]
    async fn fake_adapter_returns_scripted_page_once() {
        let adapter = FakeAdapter::new(
            "fake",
            vec![FakePage {
                start_ms: 0,
                end_ms: 1000,
                limit: 10,
                bars: vec![Ohlcv::new_unchecked(0, 1.0, 1.0, 1.0, 1.0, 1.0)],
            }],
        );

        let bars = adapter
            .fetch_ohlcv("BTCUSDT", "1m", 0, 1000, 10)
            .await
            .unwrap();
        assert_eq!(bars.len(), 1);

        let empty = adapter
            .fetch_ohlcv("BTCUSDT", "1m", 0, 1000, 10)
            .await
            .unwrap();
        assert!(empty.is_empty());
    }
}
