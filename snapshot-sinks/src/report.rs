use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::DateTime;
use chrono_tz::Tz;
use core_types::types::Position;
use log::{debug, warn};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use trading_calendar::PERIODS_PER_DAY;

use crate::SinkError;

const REPORT_HEADER: &str = "LocalTime,Volume";

/// Writes one snapshot CSV per extraction. Concurrent writers serialize on
/// an internal mutex; a rerun in the same local minute overwrites its
/// earlier snapshot, which is the intended idempotent behavior.
pub struct PositionReportWriter {
    dir: PathBuf,
    write_lock: Mutex<()>,
}

impl PositionReportWriter {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, SinkError> {
        let dir = dir.into();
        if dir.as_os_str().is_empty() {
            return Err(SinkError::EmptyDirectory);
        }
        fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            write_lock: Mutex::new(()),
        })
    }

    /// `PowerPosition_<YYYYMMDD>_<HHMM>.csv`, named for the extraction
    /// instant in the configured zone.
    pub fn file_name(extraction_local: &DateTime<Tz>) -> String {
        format!(
            "PowerPosition_{}.csv",
            extraction_local.format("%Y%m%d_%H%M")
        )
    }

    pub fn directory(&self) -> &Path {
        &self.dir
    }

    pub async fn write(
        &self,
        positions: &[Position],
        extraction_local: DateTime<Tz>,
        cancel: &CancellationToken,
    ) -> Result<PathBuf, SinkError> {
        let _guard = self.write_lock.lock().await;
        if cancel.is_cancelled() {
            return Err(SinkError::Cancelled);
        }
        if positions.len() != PERIODS_PER_DAY as usize {
            warn!(
                "snapshot carries {} positions where {} were expected; writing it anyway",
                positions.len(),
                PERIODS_PER_DAY
            );
        }
        let path = self.dir.join(Self::file_name(&extraction_local));
        let mut body = String::with_capacity(16 + positions.len() * 12);
        body.push_str(REPORT_HEADER);
        body.push('\n');
        for position in positions {
            let _ = writeln!(body, "{},{:.2}", position.local_time, position.volume);
        }
        fs::write(&path, body)?;
        debug!("wrote snapshot {:?}", path);
        Ok(path)
    }
}
