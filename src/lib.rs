pub mod api;
pub mod batch;
pub mod cache;
pub mod models;

pub use api::{fetch_pe_update, PeRatioProvider, YahooClient};
pub use batch::{BatchDriver, BatchSummary, EntryOutcome};
pub use cache::{CacheError, PeCache, PeCacheStore};
