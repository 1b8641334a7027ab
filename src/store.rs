/// Durable key/value store for bars, coverage, and known-missing ranges.
///
/// One `BarStore` owns one `rusqlite::Connection`. Each timeframe gets its
/// own `bars_{tf}` table so range scans stay cheap without a `timeframe`
/// column in the hot path, mirroring the teacher's single `candlesticks`
/// table but split per timeframe per the external schema in the spec.
use rusqlite::{Connection, OptionalExtension, params};
use std::path::Path;

use crate::error::StoreError;
use crate::types::{CoverageRow, GapRange, KnownMissingRange, Ohlcv};

pub struct BarStore {
    conn: Connection,
}

impl BarStore {
    pub fn open(db_file: impl AsRef<Path>) -> Result<Self, StoreError> {
        let conn = Connection::open(db_file)?;
        let store = Self { conn };
        store.ensure_schema()?;
        Ok(store)
    }

    fn bars_table(tf: &str) -> String {
        format!("bars_{tf}")
    }

    /// Idempotent setup of the catalogs that don't depend on a timeframe.
    /// Per-timeframe bar tables are created lazily by `ensure_bars_table`,
    /// since the set of timeframes isn't known until a caller asks for one.
    pub fn ensure_schema(&self) -> Result<(), StoreError> {
        self.conn.execute(
            "CREATE TABLE IF NOT EXISTS history_coverage (
                venue TEXT NOT NULL,
                symbol TEXT NOT NULL,
                timeframe TEXT NOT NULL,
                start_ms INTEGER NOT NULL,
                end_ms INTEGER NOT NULL,
                updated_at_ms INTEGER NOT NULL,
                PRIMARY KEY (venue, symbol, timeframe)
            )",
            [],
        )?;

        self.conn.execute(
            "CREATE TABLE IF NOT EXISTS known_missing_ranges (
                venue TEXT NOT NULL,
                symbol TEXT NOT NULL,
                timeframe TEXT NOT NULL,
                start_ms INTEGER NOT NULL,
                end_ms_excl INTEGER NOT NULL,
                reason TEXT NOT NULL,
                updated_at_ms INTEGER NOT NULL,
                PRIMARY KEY (venue, symbol, timeframe, start_ms, end_ms_excl)
            )",
            [],
        )?;

        self.conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_known_missing_lookup
                ON known_missing_ranges (venue, symbol, timeframe, start_ms, end_ms_excl)",
            [],
        )?;

        Ok(())
    }

    /// Idempotent setup of one timeframe's bar table + its lookup index.
    pub fn ensure_bars_table(&self, tf: &str) -> Result<(), StoreError> {
        let table = Self::bars_table(tf);
        self.conn.execute(
            &format!(
                "CREATE TABLE IF NOT EXISTS {table} (
                    venue TEXT NOT NULL,
                    symbol TEXT NOT NULL,
                    ts_ms INTEGER NOT NULL,
                    open REAL NOT NULL,
                    high REAL NOT NULL,
                    low REAL NOT NULL,
                    close REAL NOT NULL,
                    volume REAL NOT NULL,
                    PRIMARY KEY (venue, symbol, ts_ms)
                )"
            ),
            [],
        )?;
        self.conn.execute(
            &format!(
                "CREATE INDEX IF NOT EXISTS idx_{table}_lookup ON {table} (venue, symbol, ts_ms)"
            ),
            [],
        )?;
        Ok(())
    }

    /// Insert-or-replace by `(venue, symbol, ts_ms)`. Returns the number of
    /// rows written (including replacements).
    pub fn upsert_bars(
        &mut self,
        tf: &str,
        venue: &str,
        symbol: &str,
        bars: &[Ohlcv],
    ) -> Result<usize, StoreError> {
        self.ensure_bars_table(tf)?;
        let table = Self::bars_table(tf);

        let tx = self.conn.transaction()?;
        let mut written = 0usize;
        {
            let mut stmt = tx.prepare(&format!(
                "INSERT OR REPLACE INTO {table}
                    (venue, symbol, ts_ms, open, high, low, close, volume)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)"
            ))?;
            for bar in bars {
                stmt.execute(params![
                    venue,
                    symbol,
                    bar.ts_ms,
                    bar.open,
                    bar.high,
                    bar.low,
                    bar.close,
                    bar.volume
                ])?;
                written += 1;
            }
        }
        tx.commit()?;
        Ok(written)
    }

    pub fn min_ts(&self, tf: &str, venue: &str, symbol: &str) -> Result<Option<i64>, StoreError> {
        self.ensure_bars_table(tf)?;
        let table = Self::bars_table(tf);
        let v: Option<i64> = self
            .conn
            .query_row(
                &format!("SELECT MIN(ts_ms) FROM {table} WHERE venue = ?1 AND symbol = ?2"),
                params![venue, symbol],
                |row| row.get(0),
            )
            .optional()?
            .flatten();
        Ok(v)
    }

    pub fn max_ts(&self, tf: &str, venue: &str, symbol: &str) -> Result<Option<i64>, StoreError> {
        self.ensure_bars_table(tf)?;
        let table = Self::bars_table(tf);
        let v: Option<i64> = self
            .conn
            .query_row(
                &format!("SELECT MAX(ts_ms) FROM {table} WHERE venue = ?1 AND symbol = ?2"),
                params![venue, symbol],
                |row| row.get(0),
            )
            .optional()?
            .flatten();
        Ok(v)
    }

    pub fn min_max(
        &self,
        tf: &str,
        venue: &str,
        symbol: &str,
    ) -> Result<Option<(i64, i64)>, StoreError> {
        match (
            self.min_ts(tf, venue, symbol)?,
            self.max_ts(tf, venue, symbol)?,
        ) {
            (Some(min), Some(max)) => Ok(Some((min, max))),
            _ => Ok(None),
        }
    }

    /// Range scan `[start_ms, end_ms_excl)`, sorted ascending.
    pub fn read_range(
        &self,
        tf: &str,
        venue: &str,
        symbol: &str,
        start_ms: i64,
        end_ms_excl: i64,
    ) -> Result<Vec<Ohlcv>, StoreError> {
        self.ensure_bars_table(tf)?;
        let table = Self::bars_table(tf);
        let mut stmt = self.conn.prepare(&format!(
            "SELECT ts_ms, open, high, low, close, volume FROM {table}
             WHERE venue = ?1 AND symbol = ?2 AND ts_ms >= ?3 AND ts_ms < ?4
             ORDER BY ts_ms ASC"
        ))?;

        let rows = stmt
            .query_map(params![venue, symbol, start_ms, end_ms_excl], |row| {
                Ok(Ohlcv::new_unchecked(
                    row.get(0)?,
                    row.get(1)?,
                    row.get(2)?,
                    row.get(3)?,
                    row.get(4)?,
                    row.get(5)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(rows)
    }

    pub fn get_coverage(
        &self,
        venue: &str,
        symbol: &str,
        tf: &str,
    ) -> Result<Option<CoverageRow>, StoreError> {
        self.conn
            .query_row(
                "SELECT venue, symbol, timeframe, start_ms, end_ms, updated_at_ms
                 FROM history_coverage
                 WHERE venue = ?1 AND symbol = ?2 AND timeframe = ?3",
                params![venue, symbol, tf],
                |row| {
                    Ok(CoverageRow {
                        venue: row.get(0)?,
                        symbol: row.get(1)?,
                        timeframe: row.get(2)?,
                        start_ms: row.get(3)?,
                        end_ms: row.get(4)?,
                        updated_at_ms: row.get(5)?,
                    })
                },
            )
            .optional()
            .map_err(StoreError::from)
    }

    /// Upserts a coverage row as-is. Monotonicity (`start_ms` never grows,
    /// `end_ms` never shrinks versus a prior row) is the *caller's*
    /// responsibility — the store just persists what it's given.
    pub fn upsert_coverage(&self, row: &CoverageRow) -> Result<(), StoreError> {
        if row.end_ms <= row.start_ms {
            return Err(StoreError::InvariantViolation(format!(
                "coverage end_ms ({}) <= start_ms ({}) for {}/{}/{}",
                row.end_ms, row.start_ms, row.venue, row.symbol, row.timeframe
            )));
        }
        self.conn.execute(
            "INSERT INTO history_coverage (venue, symbol, timeframe, start_ms, end_ms, updated_at_ms)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT (venue, symbol, timeframe)
             DO UPDATE SET start_ms = excluded.start_ms,
                           end_ms = excluded.end_ms,
                           updated_at_ms = excluded.updated_at_ms",
            params![
                row.venue,
                row.symbol,
                row.timeframe,
                row.start_ms,
                row.end_ms,
                row.updated_at_ms
            ],
        )?;
        Ok(())
    }

    /// Returns gaps inside the optional scan window: consecutive stored
    /// `ts_ms` whose delta is not exactly `tf_ms` apart.
    pub fn find_gaps(
        &self,
        tf: &str,
        venue: &str,
        symbol: &str,
        start_ms: Option<i64>,
        end_ms_excl: Option<i64>,
        limit: usize,
    ) -> Result<Vec<GapRange>, StoreError> {
        self.ensure_bars_table(tf)?;
        let table = Self::bars_table(tf);
        let tf_ms = crate::time::tf_to_ms(tf)
            .map_err(|e| StoreError::InvariantViolation(e.to_string()))?;

        let lo = start_ms.unwrap_or(i64::MIN);
        let hi = end_ms_excl.unwrap_or(i64::MAX);

        let mut stmt = self.conn.prepare(&format!(
            "SELECT ts_ms FROM {table}
             WHERE venue = ?1 AND symbol = ?2 AND ts_ms >= ?3 AND ts_ms < ?4
             ORDER BY ts_ms ASC"
        ))?;

        let timestamps: Vec<i64> = stmt
            .query_map(params![venue, symbol, lo, hi], |row| row.get(0))?
            .collect::<Result<Vec<_>, _>>()?;

        let mut gaps = Vec::new();
        for pair in timestamps.windows(2) {
            let (prev, next) = (pair[0], pair[1]);
            let delta = next - prev;
            if delta != tf_ms {
                gaps.push(GapRange {
                    start_ms: prev + tf_ms,
                    end_ms_excl: next,
                });
                if gaps.len() >= limit {
                    break;
                }
            }
        }

        Ok(gaps)
    }

    pub fn record_known_missing(
        &self,
        range: &KnownMissingRange,
    ) -> Result<(), StoreError> {
        self.conn.execute(
            "INSERT OR REPLACE INTO known_missing_ranges
                (venue, symbol, timeframe, start_ms, end_ms_excl, reason, updated_at_ms)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                range.venue,
                range.symbol,
                range.timeframe,
                range.start_ms,
                range.end_ms_excl,
                range.reason,
                range.updated_at_ms
            ],
        )?;
        Ok(())
    }

    /// True iff some stored known-missing range fully covers
    /// `[start_ms, end_ms_excl)`.
    pub fn is_known_missing(
        &self,
        venue: &str,
        symbol: &str,
        tf: &str,
        start_ms: i64,
        end_ms_excl: i64,
    ) -> Result<bool, StoreError> {
        let covered: Option<i64> = self
            .conn
            .query_row(
                "SELECT 1 FROM known_missing_ranges
                 WHERE venue = ?1 AND symbol = ?2 AND timeframe = ?3
                   AND start_ms <= ?4 AND end_ms_excl >= ?5
                 LIMIT 1",
                params![venue, symbol, tf, start_ms, end_ms_excl],
                |row| row.get(0),
            )
            .optional()?;
        Ok(covered.is_some())
    }
}
