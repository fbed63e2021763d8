// Copyright (c) James Kassemi, SC, US. All rights reserved.

use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

/// One hourly slot of a trade. `period` counts 1..=24 from the trading-day
/// anchor; range enforcement happens where periods are mapped to wall-clock
/// times, not at construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradePeriod {
    pub period: u32,
    pub volume: f64,
}

/// A trade as delivered by the upstream trading API. The engine never
/// interprets trade identity; it only sums the period volumes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub trade_date: NaiveDate,
    pub periods: Vec<TradePeriod>,
}

/// One row of a snapshot report: the hourly total for a period, labelled
/// with the observed local wall-clock time of that period's start.
#[derive(Debug, Clone, PartialEq)]
pub struct Position {
    pub period: u32,
    pub local_time: String,
    pub volume: f64,
}

/// Terminal status of a single extraction attempt, rendered verbatim into
/// the audit trail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditStatus {
    Done,
    RecoveredFromDlq,
    RetryAttempt,
    Failed,
    Cancelled,
}

impl AuditStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditStatus::Done => "Done",
            AuditStatus::RecoveredFromDlq => "RecoveredFromDLQ",
            AuditStatus::RetryAttempt => "RetryAttempt",
            AuditStatus::Failed => "Failed",
            AuditStatus::Cancelled => "Cancelled",
        }
    }
}

impl fmt::Display for AuditStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Input contract of the audit sink: one record per extraction attempt.
#[derive(Debug, Clone)]
pub struct AuditRecord {
    pub started_local: DateTime<Tz>,
    pub ended_local: DateTime<Tz>,
    pub target_date: NaiveDate,
    pub status: AuditStatus,
    pub attempt: u32,
    pub error_message: Option<String>,
    pub report_file_name: Option<String>,
}

/// An extraction that exhausted its retry budget. Persisted to the dead
/// letter store; field names are the canonical document spelling, with the
/// casings seen in the wild accepted on read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailedExtraction {
    #[serde(
        rename = "ExtractionTimeUtc",
        alias = "extractionTimeUtc",
        alias = "extraction_time_utc"
    )]
    pub extraction_time_utc: DateTime<Utc>,
    #[serde(
        rename = "FailedAtUtc",
        alias = "failedAtUtc",
        alias = "failed_at_utc"
    )]
    pub failed_at_utc: DateTime<Utc>,
    #[serde(rename = "RetryCount", alias = "retryCount", alias = "retry_count")]
    pub retry_count: u32,
    #[serde(rename = "LastError", alias = "lastError", alias = "last_error")]
    pub last_error: String,
}

impl FailedExtraction {
    /// The trading date this entry targets: the local calendar date of the
    /// extraction instant. Derived on demand, never stored.
    pub fn target_date(&self, zone: &Tz) -> NaiveDate {
        self.extraction_time_utc.with_timezone(zone).date_naive()
    }
}
