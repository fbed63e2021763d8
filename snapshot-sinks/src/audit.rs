use std::fs::OpenOptions;
use std::io::Write as _;
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use core_types::types::AuditRecord;
use log::debug;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::{escape_csv_field, SinkError};

const AUDIT_HEADER: &str =
    "StartTimeLocal,EndTimeLocal,TargetDate,DurationSeconds,Status,Attempt,ErrorMessage,ReportFileName";

/// Appends one row per extraction attempt to a daily audit file, keyed on
/// the local calendar day the attempt ended.
pub struct ExecutionAuditLog {
    dir: PathBuf,
    write_lock: Mutex<()>,
}

impl ExecutionAuditLog {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, SinkError> {
        let dir = dir.into();
        if dir.as_os_str().is_empty() {
            return Err(SinkError::EmptyDirectory);
        }
        std::fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            write_lock: Mutex::new(()),
        })
    }

    pub fn file_name(day: NaiveDate) -> String {
        format!("ExecutionAudit_{}.csv", day.format("%Y%m%d"))
    }

    pub fn directory(&self) -> &Path {
        &self.dir
    }

    pub async fn log_attempt(
        &self,
        record: &AuditRecord,
        cancel: &CancellationToken,
    ) -> Result<(), SinkError> {
        if record.attempt < 1 {
            return Err(SinkError::InvalidArgument(format!(
                "attempt must be at least 1, got {}",
                record.attempt
            )));
        }
        let _guard = self.write_lock.lock().await;
        if cancel.is_cancelled() {
            return Err(SinkError::Cancelled);
        }
        let path = self.dir.join(Self::file_name(record.ended_local.date_naive()));
        let fresh = !path.exists();
        let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
        let mut chunk = String::new();
        if fresh {
            chunk.push_str(AUDIT_HEADER);
            chunk.push('\n');
        }
        chunk.push_str(&render_row(record));
        chunk.push('\n');
        file.write_all(chunk.as_bytes())?;
        debug!("appended {} audit row to {:?}", record.status, path);
        Ok(())
    }
}

fn render_row(record: &AuditRecord) -> String {
    let duration = record
        .ended_local
        .signed_duration_since(record.started_local);
    let duration_seconds = duration.num_milliseconds() as f64 / 1000.0;
    [
        escape_csv_field(&record.started_local.format("%Y-%m-%d %H:%M:%S").to_string()),
        escape_csv_field(&record.ended_local.format("%Y-%m-%d %H:%M:%S").to_string()),
        escape_csv_field(&record.target_date.format("%Y-%m-%d").to_string()),
        format!("{duration_seconds:.2}"),
        escape_csv_field(record.status.as_str()),
        record.attempt.to_string(),
        escape_csv_field(record.error_message.as_deref().unwrap_or_default()),
        escape_csv_field(record.report_file_name.as_deref().unwrap_or_default()),
    ]
    .join(",")
}
