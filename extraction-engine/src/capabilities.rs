use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate};
use chrono_tz::Tz;
use core_types::types::{AuditRecord, FailedExtraction, Position, Trade};
use dead_letter_queue::DeadLetterQueue;
use snapshot_sinks::{ExecutionAuditLog, PositionReportWriter};
use tokio_util::sync::CancellationToken;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// The external trading API. Errors are opaque to the engine and always
/// treated as retryable; an empty day is a legal answer.
#[async_trait]
pub trait TradeSource: Send + Sync {
    async fn fetch(&self, target_date: NaiveDate) -> Result<Vec<Trade>, BoxError>;
}

/// Destination for snapshot reports.
#[async_trait]
pub trait ReportSink: Send + Sync {
    async fn write(
        &self,
        positions: &[Position],
        extraction_local: DateTime<Tz>,
        cancel: &CancellationToken,
    ) -> Result<PathBuf, BoxError>;
}

/// Destination for per-attempt audit rows.
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn log_attempt(
        &self,
        record: &AuditRecord,
        cancel: &CancellationToken,
    ) -> Result<(), BoxError>;
}

/// Persistent store of extractions that exhausted their retry budget.
pub trait FailureStore: Send + Sync {
    fn enqueue(&self, entry: FailedExtraction) -> Result<(), BoxError>;
    fn dequeue_all(&self) -> Result<Vec<FailedExtraction>, BoxError>;
}

#[async_trait]
impl ReportSink for PositionReportWriter {
    async fn write(
        &self,
        positions: &[Position],
        extraction_local: DateTime<Tz>,
        cancel: &CancellationToken,
    ) -> Result<PathBuf, BoxError> {
        PositionReportWriter::write(self, positions, extraction_local, cancel)
            .await
            .map_err(|err| Box::new(err) as BoxError)
    }
}

#[async_trait]
impl AuditSink for ExecutionAuditLog {
    async fn log_attempt(
        &self,
        record: &AuditRecord,
        cancel: &CancellationToken,
    ) -> Result<(), BoxError> {
        ExecutionAuditLog::log_attempt(self, record, cancel)
            .await
            .map_err(|err| Box::new(err) as BoxError)
    }
}

impl FailureStore for DeadLetterQueue {
    fn enqueue(&self, entry: FailedExtraction) -> Result<(), BoxError> {
        DeadLetterQueue::enqueue(self, entry).map_err(|err| Box::new(err) as BoxError)
    }

    fn dequeue_all(&self) -> Result<Vec<FailedExtraction>, BoxError> {
        DeadLetterQueue::dequeue_all(self).map_err(|err| Box::new(err) as BoxError)
    }
}
