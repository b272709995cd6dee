//! Batch processing of the shares listed in the input file
//!
//! Entries are handled one at a time. A failure on one entry is recorded in
//! the summary and does not stop the remaining entries.

use anyhow::{Context, Result};
use chrono::{Local, NaiveDate};
use std::fmt;
use std::fs;
use std::path::Path;
use tracing::{debug, error, info, warn};

use crate::api::{fetch_pe_update, PeRatioProvider};
use crate::cache::PeCacheStore;
use crate::models::{RawShareEntry, SharesFile, ShareEntry};

/// What happened to a single entry
#[derive(Debug, Clone, PartialEq)]
pub enum EntryOutcome {
    /// New dates were written to the cache file
    Updated { added: usize },
    /// A P/E was fetched but its date was already cached
    Unchanged,
    /// The provider had no P/E for the ticker
    NoData,
    /// The entry was unusable: missing or mistyped fields
    Skipped { reason: String },
    Failed { error: String },
}

impl fmt::Display for EntryOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntryOutcome::Updated { added } => write!(f, "updated ({} new)", added),
            EntryOutcome::Unchanged => write!(f, "unchanged"),
            EntryOutcome::NoData => write!(f, "no P/E available"),
            EntryOutcome::Skipped { reason } => write!(f, "skipped: {}", reason),
            EntryOutcome::Failed { error } => write!(f, "failed: {}", error),
        }
    }
}

/// Outcomes of one batch run, in input order
#[derive(Debug, Default)]
pub struct BatchSummary {
    pub outcomes: Vec<(String, EntryOutcome)>,
}

impl BatchSummary {
    pub fn total(&self) -> usize {
        self.outcomes.len()
    }

    pub fn updated(&self) -> usize {
        self.count(|o| matches!(o, EntryOutcome::Updated { .. }))
    }

    pub fn unchanged(&self) -> usize {
        self.count(|o| matches!(o, EntryOutcome::Unchanged))
    }

    pub fn no_data(&self) -> usize {
        self.count(|o| matches!(o, EntryOutcome::NoData))
    }

    pub fn skipped(&self) -> usize {
        self.count(|o| matches!(o, EntryOutcome::Skipped { .. }))
    }

    pub fn failures(&self) -> Vec<(&str, &str)> {
        self.outcomes
            .iter()
            .filter_map(|(label, outcome)| match outcome {
                EntryOutcome::Failed { error } => Some((label.as_str(), error.as_str())),
                _ => None,
            })
            .collect()
    }

    pub fn has_failures(&self) -> bool {
        self.outcomes
            .iter()
            .any(|(_, o)| matches!(o, EntryOutcome::Failed { .. }))
    }

    fn count(&self, pred: impl Fn(&EntryOutcome) -> bool) -> usize {
        self.outcomes.iter().filter(|(_, o)| pred(o)).count()
    }

    /// Log a one-line summary plus one line per failed entry
    pub fn log(&self) {
        info!(
            "📊 Processed {} entries: {} updated, {} unchanged, {} without P/E, {} skipped, {} failed",
            self.total(),
            self.updated(),
            self.unchanged(),
            self.no_data(),
            self.skipped(),
            self.failures().len()
        );
        for (label, outcome) in &self.outcomes {
            debug!("{}: {}", label, outcome);
        }
        for (label, error) in self.failures() {
            error!("❌ {}: {}", label, error);
        }
    }
}

/// Read the shares list from `path`
pub fn load_shares(path: &Path) -> Result<SharesFile> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("failed to read input file {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("malformed input file {}", path.display()))
}

/// Drives fetch and merge for every entry of an input file
pub struct BatchDriver<P> {
    provider: P,
    store: PeCacheStore,
    today: NaiveDate,
}

impl<P: PeRatioProvider> BatchDriver<P> {
    /// Create a driver stamping values with today's local date
    pub fn new(provider: P, store: PeCacheStore) -> Self {
        Self::with_date(provider, store, Local::now().date_naive())
    }

    pub fn with_date(provider: P, store: PeCacheStore, today: NaiveDate) -> Self {
        Self { provider, store, today }
    }

    pub fn today(&self) -> NaiveDate {
        self.today
    }

    /// Process every entry of the input file at `config_path`.
    ///
    /// Only an unreadable input file, or one without a `shares` array, is an
    /// error here; bad entries and per-entry failures end up in the summary.
    pub async fn run(&self, config_path: &Path) -> Result<BatchSummary> {
        let shares = load_shares(config_path)?;
        info!("📋 Loaded {} entries from {}", shares.shares.len(), config_path.display());

        let mut summary = BatchSummary::default();
        for value in &shares.shares {
            let raw = match RawShareEntry::from_value(value) {
                Ok(raw) => raw,
                Err(reason) => {
                    warn!("Invalid entry: {} ({})", value, reason);
                    summary.outcomes.push((value.to_string(), EntryOutcome::Skipped { reason }));
                    continue;
                }
            };

            let entry = match raw.validate() {
                Ok(entry) => entry,
                Err(reason) => {
                    warn!("Missing data for entry: {:?} ({})", raw, reason);
                    summary.outcomes.push((raw.label(), EntryOutcome::Skipped { reason }));
                    continue;
                }
            };

            let outcome = self.process_entry(&entry).await;
            summary.outcomes.push((entry.label(), outcome));
        }

        Ok(summary)
    }

    /// Fetch and merge a single validated entry
    pub async fn process_entry(&self, entry: &ShareEntry) -> EntryOutcome {
        info!("Processing ISIN: {}, Ticker: {}", entry.isin, entry.ticker);

        match self.update_entry(entry).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!("❌ ISIN {} (ticker {}) failed: {:#}", entry.isin, entry.ticker, e);
                EntryOutcome::Failed { error: format!("{:#}", e) }
            }
        }
    }

    async fn update_entry(&self, entry: &ShareEntry) -> Result<EntryOutcome> {
        let update = fetch_pe_update(&self.provider, &entry.ticker, self.today).await?;

        // Merge even an empty update so a corrupt cache file surfaces here
        let report = self.store.merge(&entry.isin, &update)?;
        if update.is_empty() {
            Ok(EntryOutcome::NoData)
        } else if report.added > 0 {
            info!("✅ {}: {} new value(s), {} cached in {}",
                  entry.isin, report.added, report.total, report.path.display());
            Ok(EntryOutcome::Updated { added: report.added })
        } else {
            info!("⚪ {}: {} already cached", entry.isin, self.today);
            Ok(EntryOutcome::Unchanged)
        }
    }
}
