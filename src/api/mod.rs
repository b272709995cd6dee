use anyhow::Result;
use chrono::NaiveDate;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::cache::PeCache;

pub mod yahoo_client;
pub use yahoo_client::YahooClient;

/// Simple rate limiter for API requests.
///
/// Enforces a fixed minimum gap between consecutive requests; the first
/// request goes out immediately.
pub struct ApiRateLimiter {
    delay: Duration,
    last_request: Mutex<Option<Instant>>,
}

impl ApiRateLimiter {
    pub fn new(requests_per_minute: u32) -> Self {
        let delay_ms = if requests_per_minute > 0 {
            60_000 / requests_per_minute as u64
        } else {
            1000 // Default 1 second delay
        };

        Self {
            delay: Duration::from_millis(delay_ms),
            last_request: Mutex::new(None),
        }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    pub async fn wait(&self) {
        let mut last = self.last_request.lock().await;
        if let Some(previous) = *last {
            let elapsed = previous.elapsed();
            if elapsed < self.delay {
                tokio::time::sleep(self.delay - elapsed).await;
            }
        }
        *last = Some(Instant::now());
    }
}

/// Source of trailing P/E ratios
#[async_trait::async_trait]
pub trait PeRatioProvider: Send + Sync {
    /// Current trailing P/E for `ticker`, or `None` when the provider has no figure
    async fn trailing_pe(&self, ticker: &str) -> Result<Option<f64>>;
}

/// Fetch today's trailing P/E for `ticker` as a one-entry cache update.
///
/// Returns an empty update when the provider has no figure. Zero and
/// non-finite ratios are treated as missing.
pub async fn fetch_pe_update<P>(provider: &P, ticker: &str, today: NaiveDate) -> Result<PeCache>
where
    P: PeRatioProvider + ?Sized,
{
    let mut update = PeCache::new();

    match provider.trailing_pe(ticker).await? {
        Some(pe_ratio) if pe_ratio.is_finite() && pe_ratio != 0.0 => {
            debug!("{}: trailing P/E {} on {}", ticker, pe_ratio, today);
            update.insert(today, pe_ratio);
        }
        _ => info!("Could not find P/E ratio for ticker: {}", ticker),
    }

    Ok(update)
}
