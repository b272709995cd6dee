//! Per-identifier P/E cache files
//!
//! Each identifier owns one JSON file mapping ISO dates to trailing P/E
//! values. Existing dates are never overwritten.

use chrono::NaiveDate;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

/// Date to trailing P/E mapping, as stored on disk
pub type PeCache = BTreeMap<NaiveDate, f64>;

const CACHE_FILE_SUFFIX: &str = "_pe_cache.json";

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("failed to read cache file {path}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("malformed cache file {path}")]
    Malformed {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to write cache file {path}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Result of merging one update into a cache file
#[derive(Debug, Clone, PartialEq)]
pub struct MergeReport {
    pub path: PathBuf,
    pub added: usize,
    pub total: usize,
    pub written: bool,
}

/// Insert every date from `update` that `cache` does not already hold.
/// Returns the number of dates inserted.
pub fn merge_update(cache: &mut PeCache, update: &PeCache) -> usize {
    let mut added = 0;
    for (date, pe_ratio) in update {
        if !cache.contains_key(date) {
            cache.insert(*date, *pe_ratio);
            added += 1;
        }
    }
    added
}

/// Directory of cache files, one per identifier
#[derive(Debug, Clone)]
pub struct PeCacheStore {
    dir: PathBuf,
}

impl PeCacheStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Cache file path for an identifier: `<dir>/<identifier>_pe_cache.json`
    pub fn path_for(&self, identifier: &str) -> PathBuf {
        self.dir.join(format!("{}{}", identifier, CACHE_FILE_SUFFIX))
    }

    /// Load a cache file. A missing file is an empty cache.
    pub fn load(&self, path: &Path) -> Result<PeCache, CacheError> {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(PeCache::new()),
            Err(source) => {
                return Err(CacheError::Read { path: path.to_path_buf(), source });
            }
        };

        serde_json::from_str(&content).map_err(|source| CacheError::Malformed {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Replace the cache file with `cache`, via a temporary sibling and a rename
    pub fn save(&self, path: &Path, cache: &PeCache) -> Result<(), CacheError> {
        let write_err = |source: io::Error| CacheError::Write { path: path.to_path_buf(), source };

        let content = to_pretty_json(cache)
            .map_err(|e| write_err(io::Error::new(io::ErrorKind::InvalidData, e)))?;

        let mut tmp_name = path.as_os_str().to_owned();
        tmp_name.push(".tmp");
        let tmp_path = PathBuf::from(tmp_name);

        fs::write(&tmp_path, content).map_err(write_err)?;
        if let Err(e) = fs::rename(&tmp_path, path) {
            fs::remove_file(&tmp_path).ok();
            return Err(write_err(e));
        }
        Ok(())
    }

    /// Load, merge and persist one identifier's cache.
    ///
    /// The file is only rewritten when at least one new date was added, so an
    /// empty update never creates a file and never touches an existing one.
    pub fn merge(&self, identifier: &str, update: &PeCache) -> Result<MergeReport, CacheError> {
        let path = self.path_for(identifier);
        let mut cache = self.load(&path)?;

        let added = merge_update(&mut cache, update);
        let written = added > 0;
        if written {
            self.save(&path, &cache)?;
            debug!("Wrote {} entries to {}", cache.len(), path.display());
        } else {
            debug!("No new dates for {}, leaving {} untouched", identifier, path.display());
        }

        Ok(MergeReport { path, added, total: cache.len(), written })
    }
}

/// Serialize with 4-space indentation
fn to_pretty_json(cache: &PeCache) -> serde_json::Result<String> {
    let mut buf = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
    let mut serializer = serde_json::Serializer::with_formatter(&mut buf, formatter);
    cache.serialize(&mut serializer)?;
    // serde_json only emits valid UTF-8
    Ok(String::from_utf8_lossy(&buf).into_owned())
}
