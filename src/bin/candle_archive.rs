/// Thin CLI entry point: parses arguments, wires a `BinanceAdapter` and a
/// `BarStore`, and calls into the library. All real logic lives in the
/// library so it stays testable without a process boundary.
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use binance::api::Binance;
use binance::market::Market;
use candle_archive::aggregate::Aggregator;
use candle_archive::binance_adapter::BinanceAdapter;
use candle_archive::error::PlantError;
use candle_archive::logging;
use candle_archive::plant::MarketDataPlant;
use candle_archive::repair::GapRepairService;
use candle_archive::store::BarStore;
use candle_archive::time::{ceil_to_ms, floor_to_ms, now_ms, parse_iso8601_utc, tf_to_ms};
use clap::{Args, Parser, Subcommand};

const DEFAULT_MAX_GAP_MINUTES: i64 = 1440;
const DEFAULT_CHUNK_DAYS: i64 = 30;
const DEFAULT_CHUNK_LIMIT: usize = 500;
const DEFAULT_MAX_RANGES: usize = 100;

#[derive(Parser, Debug)]
#[command(author, version, about = "Market-data bar archive", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Ensures full history for one or more timeframes.
    Backfill(BackfillArgs),
    /// Rolls the base timeframe up into one target timeframe.
    Aggregate(AggregateArgs),
    /// Scans and repairs gaps in an already-backfilled series.
    Repair(RepairArgs),
}

#[derive(Args, Debug)]
struct BackfillArgs {
    #[arg(long)]
    venue: String,
    #[arg(long)]
    symbol: String,
    #[arg(long, value_delimiter = ',')]
    timeframes: Vec<String>,
    #[arg(long)]
    start: String,
    #[arg(long)]
    end: Option<String>,
    #[arg(long, default_value = "candles.db")]
    db: PathBuf,
    #[arg(long, default_value_t = DEFAULT_MAX_GAP_MINUTES)]
    max_gap_minutes: i64,
    #[arg(long, default_value_t = DEFAULT_CHUNK_DAYS)]
    chunk_days: i64,
}

#[derive(Args, Debug)]
struct AggregateArgs {
    #[arg(long)]
    venue: String,
    #[arg(long)]
    symbol: String,
    #[arg(long)]
    tf: String,
    #[arg(long)]
    start: Option<String>,
    #[arg(long)]
    end: Option<String>,
    #[arg(long, default_value = "candles.db")]
    db: PathBuf,
    #[arg(long, default_value_t = DEFAULT_CHUNK_DAYS)]
    chunk_days: i64,
}

#[derive(Args, Debug)]
struct RepairArgs {
    #[arg(long)]
    venue: String,
    #[arg(long)]
    symbol: String,
    #[arg(long, value_delimiter = ',')]
    timeframes: Vec<String>,
    #[arg(long = "scan-start")]
    scan_start: Option<String>,
    #[arg(long = "scan-end")]
    scan_end: Option<String>,
    #[arg(long, default_value_t = DEFAULT_MAX_GAP_MINUTES)]
    max_gap_minutes: i64,
    #[arg(long, default_value_t = DEFAULT_CHUNK_LIMIT)]
    chunk_limit: usize,
    #[arg(long, default_value_t = DEFAULT_MAX_RANGES)]
    max_ranges: usize,
    #[arg(long, default_value = "candles.db")]
    db: PathBuf,
}

fn binance_market() -> Market {
    Binance::new(None, None)
}

async fn run_backfill(args: BackfillArgs) -> Result<()> {
    if args.timeframes.is_empty() {
        anyhow::bail!("--timeframes must list at least one timeframe");
    }

    let mut store = BarStore::open(&args.db).context("opening bar store")?;
    let mut plant = MarketDataPlant::new(args.max_gap_minutes * 60_000, args.chunk_days);
    plant.register_adapter(Arc::new(BinanceAdapter::new(binance_market())));

    let report = plant
        .ensure_history(
            &mut store,
            &args.venue,
            &args.symbol,
            &args.timeframes,
            &args.start,
            args.end.as_deref(),
            None,
        )
        .await?;

    tracing::info!(?report, "backfill complete");
    Ok(())
}

async fn run_aggregate(args: AggregateArgs) -> Result<()> {
    let mut store = BarStore::open(&args.db).context("opening bar store")?;

    let tf_ms = tf_to_ms(&args.tf)?;
    let start_raw = match &args.start {
        Some(s) => parse_iso8601_utc(s)?,
        None => store
            .min_ts("1m", &args.venue, &args.symbol)?
            .ok_or_else(|| PlantError::ResolverEmpty("no base-timeframe data to aggregate from".into()))?,
    };
    let end_raw = match &args.end {
        Some(s) => parse_iso8601_utc(s)?,
        None => now_ms(),
    };
    let start_ms = floor_to_ms(start_raw, tf_ms);
    let end_ms = ceil_to_ms(end_raw, tf_ms);

    let aggregator = Aggregator::new();
    let report = aggregator.run(
        &mut store,
        &args.venue,
        &args.symbol,
        "1m",
        &args.tf,
        start_ms,
        end_ms,
        Some(args.chunk_days),
    )?;

    tracing::info!(?report, "aggregate complete");
    Ok(())
}

async fn run_repair(args: RepairArgs) -> Result<()> {
    if args.timeframes.is_empty() {
        anyhow::bail!("--timeframes must list at least one timeframe");
    }

    let mut store = BarStore::open(&args.db).context("opening bar store")?;

    let service = GapRepairService::new(
        Arc::new(BinanceAdapter::new(binance_market())),
        args.max_gap_minutes * 60_000,
    )
    .with_limits(args.chunk_limit, args.max_ranges);

    for tf in &args.timeframes {
        let tf_ms = tf_to_ms(tf)?;
        let scan_start = match &args.scan_start {
            Some(s) => floor_to_ms(parse_iso8601_utc(s)?, tf_ms),
            None => store
                .min_ts(tf, &args.venue, &args.symbol)?
                .ok_or_else(|| PlantError::ResolverEmpty(format!("no data for timeframe {tf}")))?,
        };
        let scan_end = match &args.scan_end {
            Some(s) => ceil_to_ms(parse_iso8601_utc(s)?, tf_ms),
            None => ceil_to_ms(now_ms(), tf_ms),
        };

        let report = service
            .run(&mut store, &args.venue, &args.symbol, tf, scan_start, scan_end)
            .await?;
        tracing::info!(tf, ?report, "repair complete");
    }

    Ok(())
}

fn exit_code_for(err: &anyhow::Error) -> ExitCode {
    if let Some(plant_err) = err.downcast_ref::<PlantError>() {
        return match plant_err {
            PlantError::InvalidInput(_) => ExitCode::from(2),
            PlantError::AdapterExhausted(_) | PlantError::AdapterPermanent(_) => ExitCode::from(3),
            PlantError::InvariantViolation(_) => ExitCode::from(4),
            PlantError::ResolverEmpty(_) | PlantError::Store(_) | PlantError::Sqlite(_) => {
                ExitCode::from(2)
            }
        };
    }
    ExitCode::from(2)
}

#[tokio::main]
async fn main() -> ExitCode {
    logging::init();
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Backfill(args) => run_backfill(args).await,
        Command::Aggregate(args) => run_aggregate(args).await,
        Command::Repair(args) => run_repair(args).await,
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = ?e, "command failed");
            exit_code_for(&e)
        }
    }
}
