/// Concrete Binance spot adapter: wraps the `binance` crate's REST client,
/// validates the requested timeframe against Binance's supported interval
/// set, and retries transient failures with bounded exponential backoff.
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use binance::market::Market;
use binance::model::KlineSummaries;
use rand::Rng;
use tracing::warn;

use crate::adapter::MarketDataAdapter;
use crate::error::AdapterError;
use crate::types::Ohlcv;

const VENUE: &str = "binance_spot";
const DEFAULT_MAX_RETRIES: u32 = 5;
const DEFAULT_TIMEOUT_S: u64 = 15;

fn supported_timeframes() -> HashSet<&'static str> {
    [
        "1m", "3m", "5m", "15m", "30m", "1h", "2h", "4h", "6h", "8h", "12h", "1d", "3d", "1w", "1M",
    ]
    .into_iter()
    .collect()
}

pub struct BinanceAdapter {
    market: Arc<Market>,
    max_retries: u32,
    request_timeout: Duration,
}

impl BinanceAdapter {
    pub fn new(market: Market) -> Self {
        Self {
            market: Arc::new(market),
            max_retries: DEFAULT_MAX_RETRIES,
            request_timeout: Duration::from_secs(DEFAULT_TIMEOUT_S),
        }
    }

    fn validate_timeframe(&self, timeframe: &str) -> Result<(), AdapterError> {
        if !supported_timeframes().contains(timeframe) {
            return Err(AdapterError::Permanent {
                venue: VENUE.to_string(),
                message: format!("unsupported Binance interval timeframe={timeframe:?}"),
            });
        }
        Ok(())
    }

    fn symbol_to_binance(symbol: &str) -> String {
        symbol.replace('/', "").to_uppercase()
    }

    fn fetch_once(
        market: &Market,
        symbol: &str,
        timeframe: &str,
        start_ms: i64,
        limit: usize,
    ) -> Result<Vec<Ohlcv>, AdapterError> {
        let binance_symbol = Self::symbol_to_binance(symbol);
        let klines_data = market
            .get_klines(
                binance_symbol,
                timeframe,
                Some(limit as u16),
                Some(start_ms as u64),
                None,
            )
            .map_err(|e| AdapterError::Transient {
                venue: VENUE.to_string(),
                message: format!("{e:?}"),
            })?;

        let klines = match klines_data {
            KlineSummaries::AllKlineSummaries(v) => v,
        };

        let mut out = Vec::with_capacity(klines.len());
        for k in klines {
            let parse = |s: &str| -> Result<f64, AdapterError> {
                s.parse::<f64>().map_err(|_| AdapterError::Transient {
                    venue: VENUE.to_string(),
                    message: format!("unparseable price field {s:?} from Binance"),
                })
            };
            out.push(Ohlcv::new_unchecked(
                k.open_time,
                parse(&k.open)?,
                parse(&k.high)?,
                parse(&k.low)?,
                parse(&k.close)?,
                parse(&k.volume)?,
            ));
        }

        out.sort_by_key(|b| b.ts_ms);
        Ok(out)
    }
}

#[async_trait]
impl MarketDataAdapter for BinanceAdapter {
    fn venue(&self) -> &str {
        VENUE
    }

    async fn fetch_ohlcv(
        &self,
        symbol: &str,
        timeframe: &str,
        start_ms: i64,
        end_ms: i64,
        limit: usize,
    ) -> Result<Vec<Ohlcv>, AdapterError> {
        self.validate_timeframe(timeframe)?;

        let mut last_err = None;

        for attempt in 1..=self.max_retries {
            let market = self.market.clone();
            let symbol_owned = symbol.to_string();
            let timeframe_owned = timeframe.to_string();

            let blocking_call = tokio::task::spawn_blocking(move || {
                Self::fetch_once(&market, &symbol_owned, &timeframe_owned, start_ms, limit)
            });

            let outcome = tokio::time::timeout(self.request_timeout, blocking_call).await;

            match outcome {
                Ok(Ok(Ok(bars))) => {
                    return Ok(bars.into_iter().filter(|b| b.ts_ms < end_ms).collect());
                }
                Ok(Ok(Err(e))) => {
                    warn!(venue = VENUE, symbol, attempt, error = ?e, "fetch_ohlcv attempt failed");
                    let is_permanent = matches!(e, AdapterError::Permanent { .. });
                    last_err = Some(e);
                    if is_permanent {
                        break;
                    }
                }
                Ok(Err(join_err)) => {
                    warn!(venue = VENUE, symbol, attempt, error = %join_err, "fetch_ohlcv task panicked");
                    last_err = Some(AdapterError::Transient {
                        venue: VENUE.to_string(),
                        message: format!("blocking task failed: {join_err}"),
                    });
                }
                Err(_) => {
                    warn!(venue = VENUE, symbol, attempt, "fetch_ohlcv attempt timed out");
                    last_err = Some(AdapterError::Transient {
                        venue: VENUE.to_string(),
                        message: "request timed out".to_string(),
                    });
                }
            }

            let backoff_s = (2u64.saturating_pow(attempt.saturating_sub(1))).min(10);
            let jitter_ms: u64 = rand::thread_rng().gen_range(0..250);
            tokio::time::sleep(Duration::from_secs(backoff_s) + Duration::from_millis(jitter_ms)).await;
        }

        Err(last_err.unwrap_or_else(|| AdapterError::Transient {
            venue: VENUE.to_string(),
            message: format!("exhausted after {} attempts", self.max_retries),
        }))
    }
}
