//! Integration tests for the batch driver against scratch cache directories

use assert_matches::assert_matches;
use pretty_assertions::assert_eq;
use serde_json::json;

use pe_cache::batch::{BatchDriver, EntryOutcome};
use pe_cache::cache::PeCache;

use crate::common::fixtures::Workspace;
use crate::common::logging::{log_test_data, log_test_step};
use crate::common::{date, MockProvider, StubProvider};

#[test_log::test(tokio::test)]
async fn test_first_fetch_creates_cache() {
    log_test_step("One entry, provider returns 15.2");
    let ws = Workspace::new();
    let input = ws.write_shares(json!([{ "isin": "DE0001", "ticker": "ABC" }]));

    let provider = StubProvider::new().with_pe("ABC", 15.2);
    let driver = BatchDriver::with_date(provider, ws.store(), date("2024-03-01"));
    let summary = driver.run(&input).await.unwrap();

    log_test_data("Summary", &summary);
    assert_eq!(summary.outcomes, vec![("DE0001/ABC".to_string(), EntryOutcome::Updated { added: 1 })]);
    assert_eq!(ws.read_cache("DE0001"), PeCache::from([(date("2024-03-01"), 15.2)]));
    assert_eq!(ws.read_cache_raw("DE0001"), "{\n    \"2024-03-01\": 15.2\n}");
}

#[test_log::test(tokio::test)]
async fn test_same_day_refetch_keeps_first_value() {
    let ws = Workspace::new();
    let input = ws.write_shares(json!([{ "isin": "DE0001", "ticker": "ABC" }]));
    ws.write_cache_raw("DE0001", r#"{"2024-03-01": 15.2}"#);

    let provider = StubProvider::new().with_pe("ABC", 16.0);
    let driver = BatchDriver::with_date(provider, ws.store(), date("2024-03-01"));
    let summary = driver.run(&input).await.unwrap();

    assert_eq!(summary.outcomes[0].1, EntryOutcome::Unchanged);
    // Not rewritten, so the existing formatting survives
    assert_eq!(ws.read_cache_raw("DE0001"), r#"{"2024-03-01": 15.2}"#);
}

#[test_log::test(tokio::test)]
async fn test_next_day_appends() {
    let ws = Workspace::new();
    let input = ws.write_shares(json!([{ "isin": "DE0001", "ticker": "ABC" }]));
    ws.write_cache_raw("DE0001", r#"{"2024-03-01": 15.2}"#);

    let provider = StubProvider::new().with_pe("ABC", 16.0);
    let driver = BatchDriver::with_date(provider, ws.store(), date("2024-03-02"));
    driver.run(&input).await.unwrap();

    assert_eq!(
        ws.read_cache("DE0001"),
        PeCache::from([(date("2024-03-01"), 15.2), (date("2024-03-02"), 16.0)])
    );
}

#[test_log::test(tokio::test)]
async fn test_repeated_runs_are_idempotent() {
    let ws = Workspace::new();
    let input = ws.write_shares(json!([{ "isin": "DE0001", "ticker": "ABC" }]));
    let driver = BatchDriver::with_date(StubProvider::new().with_pe("ABC", 15.2), ws.store(), date("2024-03-01"));

    driver.run(&input).await.unwrap();
    let once = ws.read_cache_raw("DE0001");
    driver.run(&input).await.unwrap();

    assert_eq!(ws.read_cache_raw("DE0001"), once);
}

#[test_log::test(tokio::test)]
async fn test_entry_missing_ticker_is_skipped() {
    log_test_step("Entry without ticker followed by a valid entry");
    let ws = Workspace::new();
    let input = ws.write_shares(json!([
        { "isin": "DE0001" },
        { "isin": "", "ticker": "XYZ" },
        { "isin": "DE0002", "ticker": "DEF" }
    ]));

    let provider = StubProvider::new().with_pe("DEF", 9.5);
    let driver = BatchDriver::with_date(provider, ws.store(), date("2024-03-01"));
    let summary = driver.run(&input).await.unwrap();

    assert_matches!(&summary.outcomes[0].1, EntryOutcome::Skipped { reason } if reason == "missing ticker");
    assert_matches!(&summary.outcomes[1].1, EntryOutcome::Skipped { reason } if reason == "missing isin");
    assert_eq!(summary.outcomes[2].1, EntryOutcome::Updated { added: 1 });
    assert_eq!(summary.skipped(), 2);
    assert!(!ws.cache_path("DE0001").exists());
    assert!(ws.cache_path("DE0002").exists());
}

#[test_log::test(tokio::test)]
async fn test_skipped_entries_never_reach_provider() {
    let ws = Workspace::new();
    let input = ws.write_shares(json!([
        { "ticker": "NOPE" },
        { "isin": "DE0001", "ticker": "ABC" }
    ]));

    let mut provider = MockProvider::new();
    provider
        .expect_trailing_pe()
        .with(mockall::predicate::eq("ABC"))
        .times(1)
        .returning(|_| Ok(Some(15.2)));

    let driver = BatchDriver::with_date(provider, ws.store(), date("2024-03-01"));
    let summary = driver.run(&input).await.unwrap();

    assert_eq!(summary.updated(), 1);
    assert_eq!(summary.skipped(), 1);
}

#[test_log::test(tokio::test)]
async fn test_missing_pe_leaves_cache_untouched() {
    let ws = Workspace::new();
    let input = ws.write_shares(json!([
        { "isin": "DE0001", "ticker": "ABC" },
        { "isin": "DE0002", "ticker": "DEF" }
    ]));
    ws.write_cache_raw("DE0002", r#"{"2024-02-29": 11.0}"#);

    let driver = BatchDriver::with_date(StubProvider::new(), ws.store(), date("2024-03-01"));
    let summary = driver.run(&input).await.unwrap();

    assert_eq!(summary.no_data(), 2);
    assert!(!ws.cache_path("DE0001").exists());
    assert_eq!(ws.read_cache_raw("DE0002"), r#"{"2024-02-29": 11.0}"#);
}

#[test_log::test(tokio::test)]
async fn test_entries_do_not_touch_each_other() {
    let ws = Workspace::new();
    let input = ws.write_shares(json!([{ "isin": "DE0001", "ticker": "ABC" }]));
    ws.write_cache_raw("DE0002", r#"{"2024-02-29": 11.0}"#);

    let provider = StubProvider::new().with_pe("ABC", 15.2).with_pe("DEF", 99.0);
    let driver = BatchDriver::with_date(provider, ws.store(), date("2024-03-01"));
    driver.run(&input).await.unwrap();

    assert_eq!(ws.read_cache_raw("DE0002"), r#"{"2024-02-29": 11.0}"#);
    assert_eq!(ws.read_cache("DE0001").len(), 1);
}

#[test_log::test(tokio::test)]
async fn test_failures_are_isolated_per_entry() {
    log_test_step("Provider failure and corrupt cache do not stop the batch");
    let ws = Workspace::new();
    let input = ws.write_shares(json!([
        { "isin": "DE0001", "ticker": "BAD" },
        { "isin": "DE0002", "ticker": "DEF" },
        { "isin": "DE0003", "ticker": "GHI" }
    ]));
    ws.write_cache_raw("DE0002", "{ not json");

    let provider = StubProvider::new()
        .failing("BAD")
        .with_pe("DEF", 9.5)
        .with_pe("GHI", 20.1);
    let driver = BatchDriver::with_date(provider, ws.store(), date("2024-03-01"));
    let summary = driver.run(&input).await.unwrap();

    log_test_data("Failures", &summary.failures());
    let failures = summary.failures();
    assert_eq!(failures.len(), 2);
    assert_eq!(failures[0].0, "DE0001/BAD");
    assert!(failures[0].1.contains("connection reset"));
    assert_eq!(failures[1].0, "DE0002/DEF");
    assert!(failures[1].1.contains("malformed cache file"));

    assert_eq!(summary.outcomes[2].1, EntryOutcome::Updated { added: 1 });
    assert_eq!(ws.read_cache_raw("DE0002"), "{ not json");
    assert!(summary.has_failures());
}

#[test_log::test(tokio::test)]
async fn test_missing_input_file_is_fatal() {
    let ws = Workspace::new();
    let driver = BatchDriver::with_date(StubProvider::new(), ws.store(), date("2024-03-01"));

    let result = driver.run(&ws.path().join("isins.json")).await;
    assert!(result.is_err());
}

#[test_log::test(tokio::test)]
async fn test_input_without_shares_array_is_fatal() {
    let ws = Workspace::new();
    let input = ws.path().join("isins.json");
    std::fs::write(&input, r#"{"shares": 5}"#).unwrap();

    let driver = BatchDriver::with_date(StubProvider::new(), ws.store(), date("2024-03-01"));
    let err = driver.run(&input).await.unwrap_err();
    assert!(format!("{:#}", err).contains("malformed input file"));
}

#[test_log::test(tokio::test)]
async fn test_mistyped_entry_is_skipped() {
    let ws = Workspace::new();
    let input = ws.write_shares(json!([
        { "isin": 42, "ticker": "ABC" },
        "DE0009",
        { "isin": "DE0002", "ticker": "DEF" }
    ]));

    let provider = StubProvider::new().with_pe("ABC", 15.2).with_pe("DEF", 9.5);
    let driver = BatchDriver::with_date(provider, ws.store(), date("2024-03-01"));
    let summary = driver.run(&input).await.unwrap();

    assert_matches!(&summary.outcomes[0].1, EntryOutcome::Skipped { reason } if reason.starts_with("invalid entry"));
    assert_matches!(&summary.outcomes[1].1, EntryOutcome::Skipped { .. });
    assert_eq!(summary.outcomes[2].1, EntryOutcome::Updated { added: 1 });
    assert!(!summary.has_failures());
}

#[test_log::test(tokio::test)]
async fn test_isin_with_path_separator_is_skipped() {
    let ws = Workspace::new();
    let input = ws.write_shares(json!([
        { "isin": "../DE0001", "ticker": "ABC" },
        { "isin": "DE0002", "ticker": "DEF" }
    ]));

    let provider = StubProvider::new().with_pe("ABC", 15.2).with_pe("DEF", 9.5);
    let driver = BatchDriver::with_date(provider, ws.store(), date("2024-03-01"));
    let summary = driver.run(&input).await.unwrap();

    assert_matches!(&summary.outcomes[0].1, EntryOutcome::Skipped { reason } if reason.contains("path separator"));
    assert_eq!(summary.outcomes[1].1, EntryOutcome::Updated { added: 1 });
    assert!(!ws.path().parent().unwrap().join("DE0001_pe_cache.json").exists());
}

#[test_log::test(tokio::test)]
async fn test_corrupt_cache_fails_even_without_pe() {
    log_test_step("Provider has no P/E and the existing cache is corrupt");
    let ws = Workspace::new();
    let input = ws.write_shares(json!([
        { "isin": "DE0001", "ticker": "ABC" },
        { "isin": "DE0002", "ticker": "DEF" }
    ]));
    ws.write_cache_raw("DE0001", "{ not json");

    let driver = BatchDriver::with_date(StubProvider::new(), ws.store(), date("2024-03-01"));
    let summary = driver.run(&input).await.unwrap();

    let failures = summary.failures();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].0, "DE0001/ABC");
    assert!(failures[0].1.contains("malformed cache file"), "{}", failures[0].1);
    assert_eq!(summary.outcomes[1].1, EntryOutcome::NoData);
    assert_eq!(ws.read_cache_raw("DE0001"), "{ not json");
}

#[test_log::test(tokio::test)]
async fn test_write_failure_is_reported_and_batch_continues() {
    log_test_step("Cache file for the first entry cannot be written");
    let ws = Workspace::new();
    let input = ws.write_shares(json!([
        { "isin": "DE0001", "ticker": "ABC" },
        { "isin": "DE0002", "ticker": "DEF" }
    ]));
    // A directory where the temporary file would go
    std::fs::create_dir(ws.path().join("DE0001_pe_cache.json.tmp")).unwrap();

    let provider = StubProvider::new().with_pe("ABC", 15.2).with_pe("DEF", 9.5);
    let driver = BatchDriver::with_date(provider, ws.store(), date("2024-03-01"));
    let summary = driver.run(&input).await.unwrap();

    let failures = summary.failures();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].0, "DE0001/ABC");
    assert!(failures[0].1.contains("failed to write cache file"), "{}", failures[0].1);
    assert!(!ws.cache_path("DE0001").exists());
    assert_eq!(summary.outcomes[1].1, EntryOutcome::Updated { added: 1 });
    assert_eq!(ws.read_cache("DE0002"), PeCache::from([(date("2024-03-01"), 9.5)]));
}
