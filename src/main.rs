use anyhow::{bail, Result};
use clap::Parser;
use std::path::PathBuf;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use pe_cache::api::YahooClient;
use pe_cache::batch::BatchDriver;
use pe_cache::cache::PeCacheStore;
use pe_cache::models::Config;

/// Record today's trailing P/E for every share in the input file
#[derive(Parser)]
#[command(name = "pe_cache")]
#[command(version = "0.1.0")]
#[command(about = "Fetch trailing P/E ratios and append them to per-ISIN cache files")]
#[command(long_about = "
Reads a JSON file of the form {\"shares\": [{\"isin\": ..., \"ticker\": ...}]}, fetches the
current trailing P/E for each ticker from Yahoo Finance and records it under today's date in
<cache-dir>/<isin>_pe_cache.json. Dates already present in a cache file are never overwritten.

Settings can also come from the environment (or a .env file): PE_INPUT_FILE, PE_CACHE_DIR,
YAHOO_BASE_URL, YAHOO_COOKIE_URL, RATE_LIMIT_PER_MINUTE, REQUEST_TIMEOUT_SECS.
")]
struct Args {
    /// Input file listing the shares (defaults to isins.json)
    #[arg(long, short = 'i')]
    input: Option<PathBuf>,

    /// Directory holding the cache files (defaults to the working directory)
    #[arg(long, short = 'c')]
    cache_dir: Option<PathBuf>,
}

fn init_logging() -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("pe_cache=info"));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    init_logging()?;

    let args = Args::parse();
    let mut config = Config::from_env()?;
    if let Some(input) = args.input {
        config.input_file = input;
    }
    if let Some(cache_dir) = args.cache_dir {
        config.cache_dir = cache_dir;
    }

    let client = YahooClient::new(&config)?;
    let store = PeCacheStore::new(&config.cache_dir);
    let driver = BatchDriver::new(client, store);

    info!("🚀 Updating P/E caches for {} in {}", driver.today(), config.cache_dir.display());

    let summary = match driver.run(&config.input_file).await {
        Ok(summary) => summary,
        Err(e) => {
            error!("Failed to load input: {:#}", e);
            return Err(e);
        }
    };
    summary.log();

    if summary.has_failures() {
        bail!("{} of {} entries failed", summary.failures().len(), summary.total());
    }
    Ok(())
}
