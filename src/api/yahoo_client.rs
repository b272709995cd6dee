use anyhow::{anyhow, Context, Result};
use reqwest::{header, Client, StatusCode};
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use url::Url;

use super::{ApiRateLimiter, PeRatioProvider};
use crate::models::Config;

const USER_AGENT: &str = "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0 Safari/537.36";

/// Cookie and crumb pair Yahoo requires on quoteSummary requests
#[derive(Debug, Clone)]
struct YahooSession {
    cookie: String,
    crumb: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QuoteSummaryResponse {
    quote_summary: QuoteSummary,
}

#[derive(Debug, Deserialize)]
struct QuoteSummary {
    #[serde(default)]
    result: Option<Vec<QuoteSummaryResult>>,
    #[serde(default)]
    error: Option<QuoteSummaryError>,
}

#[derive(Debug, Deserialize)]
struct QuoteSummaryError {
    code: String,
    #[serde(default)]
    description: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QuoteSummaryResult {
    #[serde(default)]
    summary_detail: Option<SummaryDetail>,
}

#[derive(Debug, Deserialize)]
struct SummaryDetail {
    #[serde(default, rename = "trailingPE")]
    trailing_pe: Option<Value>,
}

/// Yahoo reports numbers either bare or as `{"raw": 15.2, "fmt": "15.20"}`.
/// Anything else, `{}` included, carries no value.
fn numeric_field(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::Object(obj) => obj.get("raw").and_then(Value::as_f64),
        _ => None,
    }
}

/// Yahoo Finance quoteSummary client
pub struct YahooClient {
    client: Client,
    base_url: Url,
    cookie_url: String,
    rate_limiter: ApiRateLimiter,
    session: Arc<Mutex<Option<YahooSession>>>,
}

impl YahooClient {
    /// Create a new Yahoo client
    pub fn new(config: &Config) -> Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(config.request_timeout_secs))
            .user_agent(USER_AGENT)
            .build()?;

        let base_url = Url::parse(&config.yahoo_base_url)
            .with_context(|| format!("invalid YAHOO_BASE_URL: {}", config.yahoo_base_url))?;

        Ok(Self {
            client,
            base_url,
            cookie_url: config.yahoo_cookie_url.clone(),
            rate_limiter: ApiRateLimiter::new(config.rate_limit_per_minute),
            session: Arc::new(Mutex::new(None)),
        })
    }

    /// Obtain a session cookie, then a crumb bound to it
    async fn open_session(&self) -> Result<YahooSession> {
        self.rate_limiter.wait().await;

        // fc.yahoo.com answers 404 but still sets the cookie
        let response = self.client
            .get(&self.cookie_url)
            .send()
            .await
            .context("failed to reach Yahoo cookie endpoint")?;

        let cookie = response
            .headers()
            .get_all(header::SET_COOKIE)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .filter_map(|value| value.split(';').next())
            .map(str::trim)
            .filter(|pair| !pair.is_empty())
            .collect::<Vec<_>>()
            .join("; ");

        if cookie.is_empty() {
            return Err(anyhow!("Yahoo did not return a session cookie"));
        }

        let mut crumb_url = self.base_url.clone();
        crumb_url.set_path("/v1/test/getcrumb");

        self.rate_limiter.wait().await;
        let response = self.client
            .get(crumb_url)
            .header(header::COOKIE, &cookie)
            .send()
            .await
            .context("failed to fetch Yahoo crumb")?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(anyhow!("Crumb request failed with status {}: {}", status, error_text));
        }

        let crumb = response.text().await?.trim().to_string();
        if crumb.is_empty() {
            return Err(anyhow!("Yahoo returned an empty crumb"));
        }

        info!("Opened Yahoo Finance session");
        Ok(YahooSession { cookie, crumb })
    }

    /// Current session, opening one if needed
    async fn session(&self) -> Result<YahooSession> {
        let mut guard = self.session.lock().await;
        if let Some(session) = &*guard {
            return Ok(session.clone());
        }

        let session = self.open_session().await?;
        *guard = Some(session.clone());
        Ok(session)
    }

    fn quote_summary_url(&self, ticker: &str, crumb: &str) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| anyhow!("YAHOO_BASE_URL cannot be a base: {}", self.base_url))?
            .clear()
            .extend(["v10", "finance", "quoteSummary", ticker]);
        url.query_pairs_mut()
            .append_pair("modules", "summaryDetail")
            .append_pair("crumb", crumb);
        Ok(url)
    }

    /// Request the summaryDetail module for `ticker`
    async fn fetch_summary(&self, ticker: &str, session: &YahooSession) -> Result<(StatusCode, String)> {
        let url = self.quote_summary_url(ticker, &session.crumb)?;

        self.rate_limiter.wait().await;
        debug!("Making request to: {}", url);

        let response = self.client
            .get(url)
            .header(header::COOKIE, &session.cookie)
            .header(header::ACCEPT, "application/json")
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        Ok((status, body))
    }

    /// Get the trailing P/E for a symbol
    pub async fn get_trailing_pe(&self, ticker: &str) -> Result<Option<f64>> {
        let session = self.session().await?;
        let (mut status, mut body) = self.fetch_summary(ticker, &session).await?;

        // Crumbs expire; re-open the session once
        if status == StatusCode::UNAUTHORIZED {
            warn!("Yahoo rejected the crumb for {}, opening a new session", ticker);
            *self.session.lock().await = None;
            let session = self.session().await?;
            (status, body) = self.fetch_summary(ticker, &session).await?;
        }

        parse_trailing_pe(ticker, status, &body)
    }
}

/// Interpret a quoteSummary reply. Unknown symbols yield `None`.
fn parse_trailing_pe(ticker: &str, status: StatusCode, body: &str) -> Result<Option<f64>> {
    if !status.is_success() && status != StatusCode::NOT_FOUND {
        return Err(anyhow!("API request failed with status {}: {}", status, body));
    }

    let parsed: QuoteSummaryResponse = match serde_json::from_str(body) {
        Ok(parsed) => parsed,
        Err(_) if status == StatusCode::NOT_FOUND => {
            debug!("{}: not found", ticker);
            return Ok(None);
        }
        Err(e) => {
            return Err(anyhow::Error::new(e)
                .context(format!("malformed quoteSummary response for {}", ticker)));
        }
    };

    if let Some(error) = parsed.quote_summary.error {
        if error.code == "Not Found" || status == StatusCode::NOT_FOUND {
            debug!("{}: {}", ticker, error.description);
            return Ok(None);
        }
        return Err(anyhow!("Yahoo error for {}: {} ({})", ticker, error.code, error.description));
    }

    let pe_ratio = parsed
        .quote_summary
        .result
        .and_then(|results| results.into_iter().next())
        .and_then(|result| result.summary_detail)
        .and_then(|detail| detail.trailing_pe)
        .and_then(|value| numeric_field(&value));

    Ok(pe_ratio)
}

#[async_trait::async_trait]
impl PeRatioProvider for YahooClient {
    async fn trailing_pe(&self, ticker: &str) -> Result<Option<f64>> {
        self.get_trailing_pe(ticker)
            .await
            .with_context(|| format!("failed to fetch trailing P/E for {}", ticker))
    }
}
