//! Integration tests: local scripted HTTP server, real libcurl transport, real
//! Parquet files. Covers the end-to-end scenario, idempotent re-runs and resume.

mod common;

use common::image_server::{self, Reply};
use common::parquet_fixture::{read_column, write_urls};
use pqfetch_core::config::JobConfig;
use pqfetch_core::control::AbortToken;
use pqfetch_core::driver::{FileOutcome, JobDriver};
use std::fs;
use std::path::Path;
use std::time::Duration;
use tempfile::tempdir;

fn job(input: &Path, output: &Path) -> JobConfig {
    let mut cfg = JobConfig::new(input, output);
    cfg.max_workers = 1;
    cfg.timeout = Duration::from_millis(500);
    cfg.retries = 2;
    cfg.retry.base_delay_secs = 0.01;
    cfg.retry.max_delay_secs = 1;
    cfg.retry.jitter = false;
    cfg.validate().expect("valid config")
}

#[test]
fn scenario_rows_land_in_batches_and_file_is_processed() {
    let server = image_server::start(vec![
        ("/a.jpg", vec![Reply::ok(1000)]),
        ("/b.jpg", vec![Reply::status(404)]),
        (
            "/c.png",
            vec![Reply::Hang(Duration::from_secs(2)), Reply::ok(500)],
        ),
    ]);
    let input = tempdir().unwrap();
    let output = tempdir().unwrap();
    write_urls(
        &input.path().join("shard.parquet"),
        "url",
        &[
            &server.url("/a.jpg"),
            &server.url("/b.jpg"),
            &server.url("/c.png"),
        ],
    );

    let mut cfg = job(input.path(), output.path());
    cfg.batch_capacity_bytes = 1200;
    let driver = JobDriver::from_config(cfg.clone(), AbortToken::new()).unwrap();
    let summary = driver.run(|_, _| {}).unwrap();

    assert_eq!(summary.files.len(), 1);
    assert_eq!(summary.files[0].outcome, FileOutcome::Processed);
    assert_eq!(summary.rows_succeeded(), 2);
    assert_eq!(summary.rows_failed(), 1);
    assert_eq!(summary.bytes_written(), 1500);
    assert!(!summary.interrupted);

    let processed = input.path().join("shard_processed.parquet");
    assert!(processed.exists());
    assert!(!input.path().join("shard.parquet").exists());
    assert!(!input.path().join("shard_processing.parquet").exists());

    let status = read_column(&processed, "status");
    assert_eq!(
        status,
        vec![
            Some("success".to_string()),
            Some("failed".to_string()),
            Some("success".to_string())
        ]
    );
    let errors = read_column(&processed, "error");
    assert_eq!(errors[0], None);
    assert!(errors[1].as_deref().unwrap().starts_with("ClientError"));
    assert_eq!(errors[2], None);

    let paths = read_column(&processed, "filepath");
    let a = output.path().join("000001").join("shard_00000000.jpg");
    let c = output.path().join("000002").join("shard_00000002.png");
    assert_eq!(paths[0].as_deref(), Some(a.to_str().unwrap()));
    assert_eq!(paths[1], None);
    assert_eq!(paths[2].as_deref(), Some(c.to_str().unwrap()));
    assert_eq!(fs::metadata(&a).unwrap().len(), 1000);
    assert_eq!(fs::metadata(&c).unwrap().len(), 500);

    assert_eq!(server.hits("/a.jpg"), 1);
    assert_eq!(server.hits("/b.jpg"), 1, "404 is not retried");
    assert_eq!(server.hits("/c.png"), 2, "timeout is retried once");
}

#[test]
fn exhausted_retries_record_the_last_error() {
    let server = image_server::start(vec![("/flaky.jpg", vec![Reply::status(503)])]);
    let input = tempdir().unwrap();
    let output = tempdir().unwrap();
    write_urls(
        &input.path().join("s.parquet"),
        "url",
        &[&server.url("/flaky.jpg")],
    );
    let cfg = job(input.path(), output.path());
    let driver = JobDriver::from_config(cfg, AbortToken::new()).unwrap();
    let summary = driver.run(|_, _| {}).unwrap();
    assert_eq!(summary.rows_failed(), 1);
    assert_eq!(server.hits("/flaky.jpg"), 3);

    let processed = input.path().join("s_processed.parquet");
    assert_eq!(
        read_column(&processed, "error"),
        vec![Some("ServerError: HTTP 503".to_string())]
    );
}

#[test]
fn rerun_of_completed_input_fetches_nothing() {
    let server = image_server::start(vec![
        ("/1.jpg", vec![Reply::ok(64)]),
        ("/2.jpg", vec![Reply::ok(64)]),
    ]);
    let input = tempdir().unwrap();
    let output = tempdir().unwrap();
    write_urls(
        &input.path().join("s.parquet"),
        "url",
        &[&server.url("/1.jpg"), &server.url("/2.jpg")],
    );
    let cfg = job(input.path(), output.path());

    let first = JobDriver::from_config(cfg.clone(), AbortToken::new()).unwrap();
    assert_eq!(first.run(|_, _| {}).unwrap().rows_succeeded(), 2);
    assert_eq!(server.total_hits(), 2);

    let second = JobDriver::from_config(cfg, AbortToken::new()).unwrap();
    let summary = second.run(|_, _| {}).unwrap();
    assert!(summary.files.is_empty());
    assert_eq!(server.total_hits(), 2);
}

#[test]
fn resume_processes_only_pending_rows() {
    let server = image_server::start(vec![
        ("/0.jpg", vec![Reply::ok(10)]),
        // Slow enough that the abort lands while this row is in flight.
        ("/1.jpg", vec![Reply::slow(Duration::from_millis(300), 10)]),
        ("/2.jpg", vec![Reply::ok(10)]),
        ("/3.jpg", vec![Reply::ok(10)]),
        ("/done.jpg", vec![Reply::ok(10)]),
    ]);
    let input = tempdir().unwrap();
    let output = tempdir().unwrap();
    write_urls(
        &input.path().join("a.parquet"),
        "url",
        &[&server.url("/done.jpg")],
    );
    write_urls(
        &input.path().join("b.parquet"),
        "url",
        &[
            &server.url("/0.jpg"),
            &server.url("/1.jpg"),
            &server.url("/2.jpg"),
            &server.url("/3.jpg"),
        ],
    );
    let cfg = job(input.path(), output.path());

    // First run is stopped once the first row of b is reported.
    let abort = AbortToken::new();
    let driver = JobDriver::from_config(cfg.clone(), abort.clone()).unwrap();
    let summary = driver
        .run(|file, _| {
            if file.stem() == "b" {
                abort.request_abort();
            }
        })
        .unwrap();
    assert!(summary.interrupted);
    assert_eq!(summary.files[0].outcome, FileOutcome::Processed);
    assert!(matches!(
        summary.files[1].outcome,
        FileOutcome::StillProcessing { .. }
    ));
    let processing = input.path().join("b_processing.parquet");
    let done_before = read_column(&processing, "status")
        .iter()
        .filter(|s| s.is_some())
        .count();
    assert!(done_before >= 1 && done_before < 4);
    let a_processed = input.path().join("a_processed.parquet");
    let a_bytes = fs::read(&a_processed).unwrap();
    let hits_before = server.total_hits();

    let resumed = JobDriver::from_config(
        JobConfig {
            resume: true,
            ..cfg
        },
        AbortToken::new(),
    )
    .unwrap();
    let summary = resumed.run(|_, _| {}).unwrap();
    assert_eq!(summary.files.len(), 1);
    assert_eq!(summary.files[0].outcome, FileOutcome::Processed);
    assert_eq!(summary.rows_succeeded(), 4 - done_before);
    assert_eq!(server.total_hits() - hits_before, 4 - done_before);
    for path in ["/0.jpg", "/1.jpg", "/2.jpg", "/3.jpg"] {
        assert_eq!(server.hits(path), 1, "{} fetched once", path);
    }

    assert_eq!(fs::read(&a_processed).unwrap(), a_bytes, "earlier file untouched");
    let b_processed = input.path().join("b_processed.parquet");
    assert!(read_column(&b_processed, "status")
        .iter()
        .all(|s| s.as_deref() == Some("success")));
    for p in read_column(&b_processed, "filepath") {
        assert_eq!(fs::metadata(p.unwrap()).unwrap().len(), 10);
    }
}

#[test]
fn custom_url_column_and_unknown_extension() {
    let server = image_server::start(vec![("/render", vec![Reply::ok(32)])]);
    let input = tempdir().unwrap();
    let output = tempdir().unwrap();
    write_urls(
        &input.path().join("photos.parquet"),
        "image_url",
        &[&format!("{}?id=7", server.url("/render"))],
    );
    let mut cfg = job(input.path(), output.path());
    cfg.url_column = "image_url".to_string();
    let driver = JobDriver::from_config(cfg, AbortToken::new()).unwrap();
    assert_eq!(driver.run(|_, _| {}).unwrap().rows_succeeded(), 1);
    assert!(output
        .path()
        .join("000001")
        .join("photos_00000000.jpg")
        .exists());
}

#[test]
fn datasets_with_look_alike_names_keep_their_own_files() {
    let server = image_server::start(vec![
        ("/small.jpg", vec![Reply::ok(100)]),
        ("/large.jpg", vec![Reply::ok(300)]),
    ]);
    let input = tempdir().unwrap();
    let output = tempdir().unwrap();
    write_urls(
        &input.path().join("a b.parquet"),
        "url",
        &[&server.url("/small.jpg")],
    );
    write_urls(
        &input.path().join("a_b.parquet"),
        "url",
        &[&server.url("/large.jpg")],
    );
    let cfg = job(input.path(), output.path());
    let driver = JobDriver::from_config(cfg, AbortToken::new()).unwrap();
    let summary = driver.run(|_, _| {}).unwrap();
    assert_eq!(summary.rows_succeeded(), 2);

    let spaced = read_column(&input.path().join("a b_processed.parquet"), "filepath");
    let plain = read_column(&input.path().join("a_b_processed.parquet"), "filepath");
    let spaced = spaced[0].clone().unwrap();
    let plain = plain[0].clone().unwrap();
    assert_ne!(spaced, plain);
    assert_eq!(fs::metadata(&spaced).unwrap().len(), 100);
    assert_eq!(fs::metadata(&plain).unwrap().len(), 300);
    assert!(plain.ends_with("a_b_00000000.jpg"));
}

#[test]
fn earlier_processed_dataset_is_not_replaced() {
    let server = image_server::start(vec![("/a.jpg", vec![Reply::ok(10)])]);
    let input = tempdir().unwrap();
    let output = tempdir().unwrap();
    let done = input.path().join("x_processed.parquet");
    write_urls(&done, "url", &["http://img/old1.jpg", "http://img/old2.jpg"]);
    write_urls(&input.path().join("x.parquet"), "url", &[&server.url("/a.jpg")]);

    let cfg = job(input.path(), output.path());
    let driver = JobDriver::from_config(cfg, AbortToken::new()).unwrap();
    let summary = driver.run(|_, _| {}).unwrap();
    assert_eq!(summary.files.len(), 1);
    assert!(matches!(summary.files[0].outcome, FileOutcome::Skipped { .. }));
    assert_eq!(server.total_hits(), 0);
    assert_eq!(read_column(&done, "url").len(), 2);
    assert!(input.path().join("x.parquet").exists());
}
