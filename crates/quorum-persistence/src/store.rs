//! Commit stores.
//!
//! The JSON Lines store appends one record per line, so an interrupted
//! write only ever damages the last line of a file.

use crate::config::{CommitBackend, CommitConfig};
use crate::error::{PersistenceError, PersistenceResult};
use async_trait::async_trait;
use chrono::DateTime;
use parking_lot::Mutex;
use quorum_core::{Price, Symbol};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// A durably committed consensus value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitRecord {
    pub symbol: Symbol,
    pub price: Price,
    pub confidence: f64,
    /// Commit time (epoch ms).
    pub committed_at: i64,
}

/// Durable target for commit records.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CommitStore: Send + Sync {
    async fn commit(&self, record: &CommitRecord) -> PersistenceResult<()>;

    /// Flush buffered output. Called on shutdown.
    async fn flush(&self) -> PersistenceResult<()> {
        Ok(())
    }
}

/// Build the configured store.
pub fn build_store(config: &CommitConfig) -> PersistenceResult<Arc<dyn CommitStore>> {
    Ok(match config.backend {
        CommitBackend::Jsonl => Arc::new(JsonLinesCommitStore::new(&config.data_dir)?),
        CommitBackend::Log => Arc::new(LogCommitStore),
    })
}

struct ActiveWriter {
    writer: BufWriter<File>,
    date: String,
    records_written: usize,
}

/// Append-only JSON Lines store with daily rotation
/// (`commits_YYYY-MM-DD.jsonl`, UTC date of the record).
pub struct JsonLinesCommitStore {
    base_dir: PathBuf,
    active: Mutex<Option<ActiveWriter>>,
}

impl JsonLinesCommitStore {
    pub fn new(base_dir: impl AsRef<Path>) -> PersistenceResult<Self> {
        let base_dir = base_dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&base_dir)?;
        Ok(Self {
            base_dir,
            active: Mutex::new(None),
        })
    }

    pub fn file_for(&self, date: &str) -> PathBuf {
        self.base_dir.join(format!("commits_{date}.jsonl"))
    }

    fn open(&self, date: &str) -> PersistenceResult<ActiveWriter> {
        let path = self.file_for(date);
        info!(path = %path.display(), "Opening commit file (append mode)");
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(ActiveWriter {
            writer: BufWriter::new(file),
            date: date.to_string(),
            records_written: 0,
        })
    }

    fn write(&self, record: &CommitRecord) -> PersistenceResult<()> {
        let date = DateTime::from_timestamp_millis(record.committed_at)
            .ok_or_else(|| {
                PersistenceError::Unavailable(format!(
                    "commit time out of range: {}",
                    record.committed_at
                ))
            })?
            .format("%Y-%m-%d")
            .to_string();
        let line = serde_json::to_string(record)?;

        let mut guard = self.active.lock();
        if guard.as_ref().is_some_and(|w| w.date != date) {
            if let Some(old) = guard.take() {
                close(old);
            }
        }
        if guard.is_none() {
            *guard = Some(self.open(&date)?);
        }
        if let Some(active) = guard.as_mut() {
            writeln!(active.writer, "{line}")?;
            active.writer.flush()?;
            active.records_written += 1;
        }
        Ok(())
    }
}

fn close(mut active: ActiveWriter) {
    if let Err(e) = active.writer.flush() {
        warn!(?e, "Failed to flush commit file on close");
    }
    info!(
        date = %active.date,
        records = active.records_written,
        "Closed commit file"
    );
}

#[async_trait]
impl CommitStore for JsonLinesCommitStore {
    async fn commit(&self, record: &CommitRecord) -> PersistenceResult<()> {
        self.write(record)
    }

    async fn flush(&self) -> PersistenceResult<()> {
        if let Some(active) = self.active.lock().as_mut() {
            active.writer.flush()?;
        }
        Ok(())
    }
}

impl Drop for JsonLinesCommitStore {
    fn drop(&mut self) {
        if let Some(active) = self.active.lock().take() {
            close(active);
        }
    }
}

/// Store that only emits a structured log line.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogCommitStore;

#[async_trait]
impl CommitStore for LogCommitStore {
    async fn commit(&self, record: &CommitRecord) -> PersistenceResult<()> {
        info!(
            symbol = %record.symbol,
            price = %record.price,
            confidence = record.confidence,
            committed_at = record.committed_at,
            "Committed consensus price"
        );
        debug!(?record, "Commit record");
        Ok(())
    }
}
