use anyhow::Result;
use clap::Parser;
use tracing::{info, Level};

use pe_cache::api::{PeRatioProvider, YahooClient};
use pe_cache::models::Config;

/// Print the current trailing P/E for some tickers without touching any cache
#[derive(Parser)]
#[command(name = "check_pe")]
struct Args {
    /// Yahoo Finance symbols, e.g. SAP.DE AAPL
    #[arg(required = true)]
    tickers: Vec<String>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let subscriber = tracing_subscriber::FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let args = Args::parse();
    let config = Config::from_env()?;
    let client = YahooClient::new(&config)?;

    info!("🔍 Checking trailing P/E for: {:?}", args.tickers);

    for ticker in &args.tickers {
        match client.trailing_pe(ticker).await {
            Ok(Some(pe_ratio)) => info!("📊 {}: P/E {:.2}", ticker, pe_ratio),
            Ok(None) => info!("⚪ {}: no trailing P/E", ticker),
            Err(e) => info!("❌ {}: {:#}", ticker, e),
        }
    }

    Ok(())
}
