use std::env;
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use core_types::types::{AuditRecord, AuditStatus, FailedExtraction};
use log::{error, warn};
use position_aggregator::aggregate;
use thiserror::Error;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use trading_calendar::{TradingCalendar, PERIODS_PER_DAY};

use crate::capabilities::{AuditSink, BoxError, FailureStore, ReportSink, TradeSource};
use crate::ExtractionSettings;

/// Operator override for the extraction instant, read fresh on every run so
/// a live service can be retargeted without a restart.
pub const RUNTIME_OVERRIDE_ENV: &str = "DOTNET_RUNTIME";

const EXHAUSTED_MESSAGE: &str = "All retry attempts exhausted";

#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("failed to persist dead letter entry: {0}")]
    DeadLetter(#[source] BoxError),
}

/// Drives a single extraction through its retry budget: fetch, aggregate,
/// write the snapshot, and always leave exactly one audit row per attempt.
pub struct ExtractionRunner {
    settings: ExtractionSettings,
    calendar: TradingCalendar,
    source: Arc<dyn TradeSource>,
    reports: Arc<dyn ReportSink>,
    audit: Arc<dyn AuditSink>,
    failures: Arc<dyn FailureStore>,
}

enum AttemptOutcome {
    Success { report_file: Option<String> },
    Failure { message: String },
    Cancelled,
}

#[derive(Clone, Copy)]
enum AttemptKind {
    Scheduled { is_final: bool },
    Recovery,
}

impl ExtractionRunner {
    pub fn new(
        settings: ExtractionSettings,
        calendar: TradingCalendar,
        source: Arc<dyn TradeSource>,
        reports: Arc<dyn ReportSink>,
        audit: Arc<dyn AuditSink>,
        failures: Arc<dyn FailureStore>,
    ) -> Self {
        Self {
            settings,
            calendar,
            source,
            reports,
            audit,
            failures,
        }
    }

    /// Runs one scheduled extraction. The only error that surfaces is a dead
    /// letter that could not be persisted after the retry budget ran out;
    /// everything else ends up in the audit trail.
    pub async fn run(
        &self,
        at: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> Result<(), ExtractionError> {
        let effective = self.effective_run_time(at);
        let target_date = self.calendar.date_of(effective);
        let budget = self.settings.retry_attempts.max(1);
        for attempt in 1..=budget {
            let kind = AttemptKind::Scheduled {
                is_final: attempt == budget,
            };
            match self
                .audited_attempt(effective, target_date, attempt, kind, cancel)
                .await
            {
                AttemptOutcome::Success { .. } => return Ok(()),
                AttemptOutcome::Cancelled => return Ok(()),
                AttemptOutcome::Failure { .. } => {
                    if attempt == budget {
                        break;
                    }
                    if !self.pause_between_attempts(cancel).await {
                        return Ok(());
                    }
                }
            }
        }
        let entry = FailedExtraction {
            extraction_time_utc: effective,
            failed_at_utc: Utc::now(),
            retry_count: budget,
            last_error: EXHAUSTED_MESSAGE.to_string(),
        };
        self.failures
            .enqueue(entry)
            .map_err(ExtractionError::DeadLetter)
    }

    /// Replays a dead-lettered extraction once, continuing its attempt
    /// numbering. Returns whether the entry recovered.
    pub async fn run_recovery(
        &self,
        entry: &FailedExtraction,
        cancel: &CancellationToken,
    ) -> bool {
        let target_date = entry.target_date(&self.calendar.zone());
        let attempt = entry.retry_count.saturating_add(1);
        matches!(
            self.audited_attempt(
                entry.extraction_time_utc,
                target_date,
                attempt,
                AttemptKind::Recovery,
                cancel,
            )
            .await,
            AttemptOutcome::Success { .. }
        )
    }

    async fn audited_attempt(
        &self,
        extraction_time: DateTime<Utc>,
        target_date: NaiveDate,
        attempt: u32,
        kind: AttemptKind,
        cancel: &CancellationToken,
    ) -> AttemptOutcome {
        let started = Utc::now();
        let outcome = self.attempt_once(extraction_time, target_date, cancel).await;
        let ended = Utc::now();
        let (status, error_message) = match (&outcome, kind) {
            (AttemptOutcome::Success { .. }, AttemptKind::Recovery) => {
                (AuditStatus::RecoveredFromDlq, None)
            }
            (AttemptOutcome::Success { .. }, AttemptKind::Scheduled { .. }) => {
                (AuditStatus::Done, None)
            }
            (AttemptOutcome::Cancelled, _) => (AuditStatus::Cancelled, None),
            (AttemptOutcome::Failure { message }, AttemptKind::Scheduled { is_final: false }) => {
                (AuditStatus::RetryAttempt, Some(message.clone()))
            }
            (AttemptOutcome::Failure { message }, _) => {
                (AuditStatus::Failed, Some(message.clone()))
            }
        };
        let report_file_name = match &outcome {
            AttemptOutcome::Success { report_file } => report_file.clone(),
            _ => None,
        };
        let record = AuditRecord {
            started_local: self.calendar.to_local(started),
            ended_local: self.calendar.to_local(ended),
            target_date,
            status,
            attempt,
            error_message,
            report_file_name,
        };
        // Missing an audit row is preferable to sinking the pipeline over it.
        if let Err(err) = self.audit.log_attempt(&record, cancel).await {
            error!("audit append failed for attempt {attempt} ({status}): {err}");
        }
        outcome
    }

    async fn attempt_once(
        &self,
        extraction_time: DateTime<Utc>,
        target_date: NaiveDate,
        cancel: &CancellationToken,
    ) -> AttemptOutcome {
        if cancel.is_cancelled() {
            return AttemptOutcome::Cancelled;
        }
        let trades = tokio::select! {
            _ = cancel.cancelled() => return AttemptOutcome::Cancelled,
            fetched = self.source.fetch(target_date) => match fetched {
                Ok(trades) => trades,
                Err(err) => {
                    return AttemptOutcome::Failure {
                        message: format!("trade source failure: {err}"),
                    }
                }
            },
        };
        let positions = match aggregate(&trades, target_date, &self.calendar) {
            Ok(positions) => positions,
            Err(err) => {
                return AttemptOutcome::Failure {
                    message: err.to_string(),
                }
            }
        };
        if positions.len() != PERIODS_PER_DAY as usize {
            return AttemptOutcome::Failure {
                message: format!(
                    "incomplete snapshot: {} of {} periods present",
                    positions.len(),
                    PERIODS_PER_DAY
                ),
            };
        }
        let extraction_local = self.calendar.to_local(extraction_time);
        match self.reports.write(&positions, extraction_local, cancel).await {
            Ok(path) => AttemptOutcome::Success {
                report_file: path
                    .file_name()
                    .map(|name| name.to_string_lossy().into_owned()),
            },
            Err(_) if cancel.is_cancelled() => AttemptOutcome::Cancelled,
            Err(err) => AttemptOutcome::Failure {
                message: format!("report write failure: {err}"),
            },
        }
    }

    /// Cancellable delay between attempts; false means cancellation won.
    async fn pause_between_attempts(&self, cancel: &CancellationToken) -> bool {
        tokio::select! {
            _ = cancel.cancelled() => false,
            _ = sleep(self.settings.retry_delay) => true,
        }
    }

    fn effective_run_time(&self, at: DateTime<Utc>) -> DateTime<Utc> {
        if let Ok(raw) = env::var(RUNTIME_OVERRIDE_ENV) {
            match DateTime::parse_from_rfc3339(raw.trim()) {
                Ok(parsed) => return parsed.with_timezone(&Utc),
                Err(err) => warn!("ignoring {RUNTIME_OVERRIDE_ENV} override {raw:?}: {err}"),
            }
        }
        self.settings.run_time.unwrap_or(at)
    }
}
