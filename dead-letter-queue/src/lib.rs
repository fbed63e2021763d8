//! Persistent FIFO of extractions that exhausted their retry budget.
//!
//! The whole queue is one JSON array in `FailedExtractions.json`. Every
//! mutation rewrites the document through a temp file and an atomic rename,
//! so a crash leaves either the old queue or the new one, never a torn
//! file. A malformed document is treated as an empty queue; losing a corrupt
//! entry beats refusing to start.

use std::fs;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use core_types::types::FailedExtraction;
use log::warn;
use parking_lot::Mutex;
use thiserror::Error;

const QUEUE_FILE: &str = "FailedExtractions.json";

#[derive(Debug, Error)]
pub enum DeadLetterError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

pub struct DeadLetterQueue {
    path: PathBuf,
    lock: Mutex<()>,
}

impl DeadLetterQueue {
    /// Opens (and creates, if needed) the queue directory.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, DeadLetterError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self {
            path: dir.join(QUEUE_FILE),
            lock: Mutex::new(()),
        })
    }

    /// Adds an entry, replacing any existing entry for the same extraction
    /// instant (the newer retry count supersedes the older one).
    pub fn enqueue(&self, entry: FailedExtraction) -> Result<(), DeadLetterError> {
        let _guard = self.lock.lock();
        let mut entries = self.read_entries();
        entries.retain(|existing| existing.extraction_time_utc != entry.extraction_time_utc);
        entries.push(entry);
        sort_fifo(&mut entries);
        self.persist(&entries)
    }

    /// Returns every entry in FIFO order and atomically empties the store.
    pub fn dequeue_all(&self) -> Result<Vec<FailedExtraction>, DeadLetterError> {
        let _guard = self.lock.lock();
        let mut entries = self.read_entries();
        sort_fifo(&mut entries);
        self.persist(&[])?;
        Ok(entries)
    }

    pub fn count(&self) -> usize {
        let _guard = self.lock.lock();
        self.read_entries().len()
    }

    pub fn peek_all(&self) -> Vec<FailedExtraction> {
        let _guard = self.lock.lock();
        let mut entries = self.read_entries();
        sort_fifo(&mut entries);
        entries
    }

    /// Removes the entry for `extraction_time_utc`, reporting whether one
    /// was present.
    pub fn remove(&self, extraction_time_utc: DateTime<Utc>) -> Result<bool, DeadLetterError> {
        let _guard = self.lock.lock();
        let mut entries = self.read_entries();
        let before = entries.len();
        entries.retain(|entry| entry.extraction_time_utc != extraction_time_utc);
        if entries.len() == before {
            return Ok(false);
        }
        self.persist(&entries)?;
        Ok(true)
    }

    fn read_entries(&self) -> Vec<FailedExtraction> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Vec::new(),
            Err(err) => {
                warn!("dead letter store {:?} unreadable ({err}); treating as empty", self.path);
                return Vec::new();
            }
        };
        if raw.trim().is_empty() {
            warn!("dead letter store {:?} is empty; treating as empty queue", self.path);
            return Vec::new();
        }
        match serde_json::from_str(&raw) {
            Ok(entries) => entries,
            Err(err) => {
                warn!("dead letter store {:?} is malformed ({err}); treating as empty", self.path);
                Vec::new()
            }
        }
    }

    fn persist(&self, entries: &[FailedExtraction]) -> Result<(), DeadLetterError> {
        let staging = self.path.with_extension("json.tmp");
        fs::write(&staging, serde_json::to_string_pretty(entries)?)?;
        fs::rename(&staging, &self.path)?;
        Ok(())
    }
}

fn sort_fifo(entries: &mut [FailedExtraction]) {
    entries.sort_by_key(|entry| entry.extraction_time_utc);
}
