//! End-to-end extraction scenarios against real sinks in temp directories.

use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{NaiveDate, TimeZone, Utc};
use chrono_tz::Europe::London;
use core_types::types::{FailedExtraction, Trade, TradePeriod};
use dead_letter_queue::DeadLetterQueue;
use engine_api::Engine;
use extraction_engine::{
    BoxError, ExtractionEngine, ExtractionRunner, ExtractionSettings, TradeSource,
};
use snapshot_sinks::{ExecutionAuditLog, PositionReportWriter};
use tempfile::{tempdir, TempDir};
use tokio_util::sync::CancellationToken;
use trading_calendar::TradingCalendar;

struct FixedSource {
    trades: Vec<Trade>,
    fail_first: u32,
    calls: AtomicU32,
}

impl FixedSource {
    fn succeeding(trades: Vec<Trade>) -> Arc<Self> {
        Arc::new(Self {
            trades,
            fail_first: 0,
            calls: AtomicU32::new(0),
        })
    }

    fn failing_first(fail_first: u32, trades: Vec<Trade>) -> Arc<Self> {
        Arc::new(Self {
            trades,
            fail_first,
            calls: AtomicU32::new(0),
        })
    }

    fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TradeSource for FixedSource {
    async fn fetch(&self, _target_date: NaiveDate) -> Result<Vec<Trade>, BoxError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.fail_first {
            return Err(format!("upstream unavailable (call {})", call + 1).into());
        }
        Ok(self.trades.clone())
    }
}

fn day_of_trades(volume_for: impl Fn(u32) -> f64) -> Trade {
    Trade {
        trade_date: NaiveDate::from_ymd_opt(2025, 12, 10).unwrap(),
        periods: (1..=24)
            .map(|period| TradePeriod {
                period,
                volume: volume_for(period),
            })
            .collect(),
    }
}

struct Fixture {
    _out: TempDir,
    _audit_dir: TempDir,
    _dlq_dir: TempDir,
    runner: ExtractionRunner,
    reports: Arc<PositionReportWriter>,
    audit: Arc<ExecutionAuditLog>,
    dlq: Arc<DeadLetterQueue>,
}

fn settings(retry_attempts: u32) -> ExtractionSettings {
    ExtractionSettings {
        interval: Duration::from_secs(300),
        retry_attempts,
        retry_delay: Duration::from_millis(5),
        run_time: Some(Utc.with_ymd_and_hms(2025, 12, 10, 14, 5, 0).unwrap()),
    }
}

fn fixture(retry_attempts: u32, source: Arc<dyn TradeSource>) -> Fixture {
    let out = tempdir().unwrap();
    let audit_dir = tempdir().unwrap();
    let dlq_dir = tempdir().unwrap();
    let reports = Arc::new(PositionReportWriter::new(out.path()).unwrap());
    let audit = Arc::new(ExecutionAuditLog::new(audit_dir.path()).unwrap());
    let dlq = Arc::new(DeadLetterQueue::open(dlq_dir.path()).unwrap());
    let runner = ExtractionRunner::new(
        settings(retry_attempts),
        TradingCalendar::new(London),
        source,
        reports.clone(),
        audit.clone(),
        dlq.clone(),
    );
    Fixture {
        _out: out,
        _audit_dir: audit_dir,
        _dlq_dir: dlq_dir,
        runner,
        reports,
        audit,
        dlq,
    }
}

/// Data rows (header stripped) across every audit file in the directory.
fn audit_rows(dir: &Path) -> Vec<String> {
    let mut rows = Vec::new();
    let mut paths: Vec<_> = std::fs::read_dir(dir)
        .unwrap()
        .map(|entry| entry.unwrap().path())
        .collect();
    paths.sort();
    for path in paths {
        let contents = std::fs::read_to_string(&path).unwrap();
        rows.extend(contents.lines().skip(1).map(|line| line.to_string()));
    }
    rows
}

fn status_and_attempt(row: &str) -> (String, String) {
    let fields: Vec<&str> = row.split(',').collect();
    (fields[4].to_string(), fields[5].to_string())
}

#[tokio::test]
async fn happy_path_writes_the_snapshot_and_a_done_row() {
    let source = FixedSource::succeeding(vec![day_of_trades(|_| 100.0)]);
    let f = fixture(3, source);
    f.runner
        .run(Utc::now(), &CancellationToken::new())
        .await
        .unwrap();

    let report = f
        .reports
        .directory()
        .join("PowerPosition_20251210_1405.csv");
    let contents = std::fs::read_to_string(&report).unwrap();
    let lines: Vec<&str> = contents.lines().collect();
    assert_eq!(lines.len(), 25);
    assert_eq!(lines[0], "LocalTime,Volume");
    assert_eq!(lines[1], "23:00,100.00");
    for line in &lines[1..] {
        assert!(line.ends_with(",100.00"), "unexpected row: {line}");
    }

    let rows = audit_rows(f.audit.directory());
    assert_eq!(rows.len(), 1);
    assert_eq!(
        status_and_attempt(&rows[0]),
        ("Done".to_string(), "1".to_string())
    );
    assert!(rows[0].ends_with("PowerPosition_20251210_1405.csv"));
    assert_eq!(f.dlq.count(), 0);
}

#[tokio::test]
async fn volumes_aggregate_across_trades() {
    let source = FixedSource::succeeding(vec![
        day_of_trades(|period| f64::from(period) * 10.0),
        day_of_trades(|period| f64::from(period) * 5.0),
    ]);
    let f = fixture(3, source);
    f.runner
        .run(Utc::now(), &CancellationToken::new())
        .await
        .unwrap();

    let contents = std::fs::read_to_string(
        f.reports
            .directory()
            .join("PowerPosition_20251210_1405.csv"),
    )
    .unwrap();
    let lines: Vec<&str> = contents.lines().collect();
    for (index, line) in lines[1..].iter().enumerate() {
        let period = index as u32 + 1;
        let expected = format!(",{:.2}", f64::from(period) * 15.0);
        assert!(line.ends_with(&expected), "period {period} row: {line}");
    }
}

#[tokio::test]
async fn transient_failure_recovers_on_the_second_attempt() {
    let source = FixedSource::failing_first(1, vec![day_of_trades(|_| 100.0)]);
    let f = fixture(3, source.clone());
    f.runner
        .run(Utc::now(), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(source.calls(), 2);
    let rows = audit_rows(f.audit.directory());
    let summary: Vec<(String, String)> = rows.iter().map(|r| status_and_attempt(r)).collect();
    assert_eq!(
        summary,
        vec![
            ("RetryAttempt".to_string(), "1".to_string()),
            ("Done".to_string(), "2".to_string()),
        ]
    );
    assert!(f
        .reports
        .directory()
        .join("PowerPosition_20251210_1405.csv")
        .exists());
    assert_eq!(f.dlq.count(), 0);
}

#[tokio::test]
async fn exhausted_retries_land_in_the_dead_letter_queue() {
    let source = FixedSource::failing_first(u32::MAX, Vec::new());
    let f = fixture(3, source.clone());
    f.runner
        .run(Utc::now(), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(source.calls(), 3);
    let summary: Vec<(String, String)> = audit_rows(f.audit.directory())
        .iter()
        .map(|r| status_and_attempt(r))
        .collect();
    assert_eq!(
        summary,
        vec![
            ("RetryAttempt".to_string(), "1".to_string()),
            ("RetryAttempt".to_string(), "2".to_string()),
            ("Failed".to_string(), "3".to_string()),
        ]
    );

    let entries = f.dlq.peek_all();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].retry_count, 3);
    assert_eq!(entries[0].last_error, "All retry attempts exhausted");
}

#[tokio::test]
async fn bad_period_counts_fail_every_attempt_deterministically() {
    let short_trade = Trade {
        trade_date: NaiveDate::from_ymd_opt(2025, 12, 10).unwrap(),
        periods: (1..=23)
            .map(|period| TradePeriod {
                period,
                volume: 1.0,
            })
            .collect(),
    };
    let source = FixedSource::succeeding(vec![short_trade]);
    let f = fixture(3, source);
    f.runner
        .run(Utc::now(), &CancellationToken::new())
        .await
        .unwrap();

    let rows = audit_rows(f.audit.directory());
    assert_eq!(rows.len(), 3);
    for row in &rows {
        assert!(row.contains("Expected period count to be a multiple of 24"));
        assert!(row.contains("23 periods"));
    }
    assert_eq!(status_and_attempt(&rows[2]).0, "Failed");
    assert_eq!(f.dlq.count(), 1);
}

#[test]
fn startup_drains_the_dead_letter_queue() {
    let out = tempdir().unwrap();
    let audit_dir = tempdir().unwrap();
    let dlq_dir = tempdir().unwrap();
    let reports = Arc::new(PositionReportWriter::new(out.path()).unwrap());
    let audit = Arc::new(ExecutionAuditLog::new(audit_dir.path()).unwrap());
    let dlq = Arc::new(DeadLetterQueue::open(dlq_dir.path()).unwrap());
    dlq.enqueue(FailedExtraction {
        extraction_time_utc: Utc.with_ymd_and_hms(2025, 12, 9, 10, 0, 0).unwrap(),
        failed_at_utc: Utc.with_ymd_and_hms(2025, 12, 9, 10, 5, 0).unwrap(),
        retry_count: 5,
        last_error: "All retry attempts exhausted".to_string(),
    })
    .unwrap();

    let source = FixedSource::succeeding(vec![day_of_trades(|_| 100.0)]);
    let engine = ExtractionEngine::new(
        settings(3),
        TradingCalendar::new(London),
        source,
        reports,
        audit,
        dlq.clone(),
    );
    engine.start().unwrap();
    std::thread::sleep(Duration::from_millis(500));
    engine.stop().unwrap();

    assert_eq!(dlq.count(), 0);
    let rows = audit_rows(audit_dir.path());
    let summary: Vec<(String, String)> = rows.iter().map(|r| status_and_attempt(r)).collect();
    assert!(
        summary.contains(&("RecoveredFromDLQ".to_string(), "6".to_string())),
        "rows were: {summary:?}"
    );
    // The recovered snapshot is named for the original extraction instant.
    assert!(out.path().join("PowerPosition_20251209_1000.csv").exists());
    // The initial scheduled run also happened and is audited.
    assert!(summary.contains(&("Done".to_string(), "1".to_string())));
}

#[test]
fn failed_recovery_is_requeued_with_a_bumped_retry_count() {
    let out = tempdir().unwrap();
    let audit_dir = tempdir().unwrap();
    let dlq_dir = tempdir().unwrap();
    let reports = Arc::new(PositionReportWriter::new(out.path()).unwrap());
    let audit = Arc::new(ExecutionAuditLog::new(audit_dir.path()).unwrap());
    let dlq = Arc::new(DeadLetterQueue::open(dlq_dir.path()).unwrap());
    let stamp = Utc.with_ymd_and_hms(2025, 12, 9, 10, 0, 0).unwrap();
    dlq.enqueue(FailedExtraction {
        extraction_time_utc: stamp,
        failed_at_utc: Utc.with_ymd_and_hms(2025, 12, 9, 10, 5, 0).unwrap(),
        retry_count: 3,
        last_error: "All retry attempts exhausted".to_string(),
    })
    .unwrap();

    // Everything fails: the recovery replay and the scheduled runs alike.
    let source = FixedSource::failing_first(u32::MAX, Vec::new());
    let engine = ExtractionEngine::new(
        settings(1),
        TradingCalendar::new(London),
        source,
        reports,
        audit,
        dlq.clone(),
    );
    engine.start().unwrap();
    std::thread::sleep(Duration::from_millis(500));
    engine.stop().unwrap();

    let entries = dlq.peek_all();
    let replayed = entries
        .iter()
        .find(|entry| entry.extraction_time_utc == stamp)
        .expect("entry must survive a failed replay");
    assert_eq!(replayed.retry_count, 4);
}

#[test]
fn engine_lifecycle_rejects_double_transitions() {
    let out = tempdir().unwrap();
    let audit_dir = tempdir().unwrap();
    let dlq_dir = tempdir().unwrap();
    let engine = ExtractionEngine::new(
        settings(1),
        TradingCalendar::new(London),
        FixedSource::succeeding(vec![day_of_trades(|_| 1.0)]),
        Arc::new(PositionReportWriter::new(out.path()).unwrap()),
        Arc::new(ExecutionAuditLog::new(audit_dir.path()).unwrap()),
        Arc::new(DeadLetterQueue::open(dlq_dir.path()).unwrap()),
    );
    engine.start().unwrap();
    assert!(engine.start().is_err());
    engine.stop().unwrap();
    assert!(engine.stop().is_err());
}
