/// Core library for the candle archive: adapters, storage, backfill,
/// aggregation, gap-repair, and the read-side API.
pub mod adapter;
pub mod aggregate;
pub mod backfill;
pub mod binance_adapter;
pub mod error;
pub mod logging;
pub mod plant;
pub mod read;
pub mod repair;
pub mod store;
pub mod time;
pub mod types;
