use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::PathBuf;

/// Input document listing the shares to track.
///
/// Entries stay untyped here so one bad entry can be skipped on its own.
#[derive(Debug, Clone, Deserialize)]
pub struct SharesFile {
    pub shares: Vec<Value>,
}

/// Share entry as it appears in the input file, before validation
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RawShareEntry {
    #[serde(default)]
    pub isin: Option<String>,
    #[serde(default)]
    pub ticker: Option<String>,
}

/// A validated identifier/ticker pair
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShareEntry {
    pub isin: String,
    pub ticker: String,
}

impl RawShareEntry {
    /// Decode one element of the `shares` array
    pub fn from_value(value: &Value) -> Result<Self, String> {
        serde_json::from_value(value.clone()).map_err(|e| format!("invalid entry: {}", e))
    }

    /// Validate field presence. Empty strings count as missing.
    pub fn validate(&self) -> Result<ShareEntry, String> {
        let isin = self.isin.as_deref().filter(|s| !s.is_empty());
        let ticker = self.ticker.as_deref().filter(|s| !s.is_empty());

        match (isin, ticker) {
            // The isin names the cache file, so it must stay inside the cache dir
            (Some(isin), Some(_)) if isin.contains(['/', '\\']) => {
                Err(format!("isin {:?} contains a path separator", isin))
            }
            (Some(isin), Some(ticker)) => Ok(ShareEntry {
                isin: isin.to_string(),
                ticker: ticker.to_string(),
            }),
            (None, None) => Err("missing isin and ticker".to_string()),
            (None, Some(_)) => Err("missing isin".to_string()),
            (Some(_), None) => Err("missing ticker".to_string()),
        }
    }

    /// Short label for log lines, tolerant of missing fields
    pub fn label(&self) -> String {
        format!(
            "{}/{}",
            self.isin.as_deref().unwrap_or("?"),
            self.ticker.as_deref().unwrap_or("?")
        )
    }
}

impl ShareEntry {
    pub fn label(&self) -> String {
        format!("{}/{}", self.isin, self.ticker)
    }
}

/// Configuration for the application
#[derive(Debug, Clone)]
pub struct Config {
    pub input_file: PathBuf,
    pub cache_dir: PathBuf,
    pub yahoo_base_url: String,
    pub yahoo_cookie_url: String,
    pub rate_limit_per_minute: u32,
    pub request_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            input_file: PathBuf::from("isins.json"),
            cache_dir: PathBuf::from("."),
            yahoo_base_url: "https://query1.finance.yahoo.com".to_string(),
            yahoo_cookie_url: "https://fc.yahoo.com".to_string(),
            rate_limit_per_minute: 60,
            request_timeout_secs: 30,
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok(); // Load .env file if it exists

        let defaults = Config::default();

        Ok(Config {
            input_file: std::env::var("PE_INPUT_FILE")
                .map(PathBuf::from)
                .unwrap_or(defaults.input_file),
            cache_dir: std::env::var("PE_CACHE_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.cache_dir),
            yahoo_base_url: std::env::var("YAHOO_BASE_URL")
                .unwrap_or(defaults.yahoo_base_url),
            yahoo_cookie_url: std::env::var("YAHOO_COOKIE_URL")
                .unwrap_or(defaults.yahoo_cookie_url),
            rate_limit_per_minute: parse_env("RATE_LIMIT_PER_MINUTE", defaults.rate_limit_per_minute)?,
            request_timeout_secs: parse_env("REQUEST_TIMEOUT_SECS", defaults.request_timeout_secs)?,
        })
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> anyhow::Result<T> {
    match std::env::var(key) {
        Ok(value) => value
            .parse()
            .map_err(|_| anyhow::anyhow!("{} must be a number, got {:?}", key, value)),
        Err(_) => Ok(default),
    }
}
