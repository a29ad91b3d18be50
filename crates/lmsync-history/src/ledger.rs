//! CSV implementation of IHistoryRepository
//!
//! The whole ledger is held in memory behind a single async mutex and
//! mirrored to disk on every write:
//!
//! | Situation                        | Disk operation                      |
//! |----------------------------------|-------------------------------------|
//! | `(path, type)` already present   | full rewrite (temp file + rename)   |
//! | ledger empty or file missing     | full rewrite including header       |
//! | otherwise                        | single row appended                 |
//!
//! The mutex is held across the disk operation, so writers are serialized
//! even when transfers run concurrently. Memory is only updated after the
//! disk operation succeeded.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use lmsync_core::domain::{Entity, HistoryRecord, SyncPath};
use lmsync_core::ports::{IHistoryRepository, UpsertOutcome};

use crate::HistoryError;

/// Column names in on-disk order
pub const LEDGER_HEADER: [&str; 4] = ["id", "path", "modified_at", "type"];

/// History ledger stored as a CSV file
pub struct CsvHistoryLedger {
    path: PathBuf,
    records: Mutex<Vec<HistoryRecord>>,
}

impl CsvHistoryLedger {
    /// Load the ledger at `path`
    ///
    /// A missing file yields an empty ledger. So does a file that cannot be
    /// read or parsed: the next sync then re-transfers what it cannot
    /// prove is current.
    #[instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub async fn load(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();

        let records = match tokio::fs::read(&path).await {
            Ok(bytes) => match decode_records(&bytes) {
                Ok(records) => {
                    debug!(count = records.len(), "Loaded history ledger");
                    records
                }
                Err(e) => {
                    warn!(error = %e, "History ledger is unreadable, starting with empty history");
                    Vec::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No history ledger yet");
                Vec::new()
            }
            Err(e) => {
                warn!(error = %e, "Failed to read history ledger, starting with empty history");
                Vec::new()
            }
        };

        Self {
            path,
            records: Mutex::new(records),
        }
    }

    /// Location of the ledger file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of records currently held
    pub async fn len(&self) -> usize {
        self.records.lock().await.len()
    }

    /// `true` when no record is held
    pub async fn is_empty(&self) -> bool {
        self.records.lock().await.is_empty()
    }

    /// Write every record, with header, via a temporary sibling file
    async fn rewrite(&self, records: &[HistoryRecord]) -> Result<(), HistoryError> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let bytes = encode_records(records, true)?;
        let temp_path = temp_path_for(&self.path);

        if let Err(e) = tokio::fs::write(&temp_path, &bytes).await {
            let _ = tokio::fs::remove_file(&temp_path).await;
            return Err(e.into());
        }
        if let Err(e) = tokio::fs::rename(&temp_path, &self.path).await {
            let _ = tokio::fs::remove_file(&temp_path).await;
            return Err(e.into());
        }

        debug!(count = records.len(), "Rewrote history ledger");
        Ok(())
    }

    /// Append one row to an existing ledger file
    async fn append(&self, record: &HistoryRecord) -> Result<(), HistoryError> {
        let bytes = encode_records(std::slice::from_ref(record), false)?;

        let mut file = tokio::fs::OpenOptions::new()
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(&bytes).await?;
        file.flush().await?;

        debug!(path = %record.path, "Appended history record");
        Ok(())
    }
}

#[async_trait]
impl IHistoryRepository for CsvHistoryLedger {
    async fn lookup_by_path(&self, path: &SyncPath) -> Option<HistoryRecord> {
        let records = self.records.lock().await;
        records.iter().find(|r| &r.path == path).cloned()
    }

    async fn lookup_index(&self, record: &HistoryRecord) -> Option<usize> {
        let records = self.records.lock().await;
        records.iter().position(|r| r.same_key(record))
    }

    #[instrument(skip(self, record), fields(path = %record.path, entity_type = %record.entity_type))]
    async fn upsert(&self, record: HistoryRecord) -> anyhow::Result<UpsertOutcome> {
        let mut records = self.records.lock().await;

        if let Some(index) = records.iter().position(|r| r.same_key(&record)) {
            let mut updated = records.clone();
            updated[index] = record;
            self.rewrite(&updated).await?;
            *records = updated;
            info!("History record updated");
            return Ok(UpsertOutcome::Replaced);
        }

        let file_exists = tokio::fs::try_exists(&self.path).await.unwrap_or(false);
        if records.is_empty() || !file_exists {
            let mut updated = records.clone();
            updated.push(record);
            self.rewrite(&updated).await?;
            *records = updated;
        } else {
            self.append(&record).await?;
            records.push(record);
        }

        info!("History record added");
        Ok(UpsertOutcome::Appended)
    }

    async fn record_entity(
        &self,
        entity: &Entity,
        observed_modified_at: DateTime<Utc>,
    ) -> anyhow::Result<Option<UpsertOutcome>> {
        match HistoryRecord::for_entity(entity, observed_modified_at) {
            Some(record) => self.upsert(record).await.map(Some),
            None => {
                debug!(entity = %entity, "Excluding entity from history");
                Ok(None)
            }
        }
    }

    async fn records(&self) -> Vec<HistoryRecord> {
        self.records.lock().await.clone()
    }
}

// ============================================================================
// Encoding
// ============================================================================

fn decode_records(bytes: &[u8]) -> Result<Vec<HistoryRecord>, HistoryError> {
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(Vec::new());
    }

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .from_reader(bytes);

    let headers = reader.headers()?;
    if headers.iter().ne(LEDGER_HEADER.iter().copied()) {
        return Err(HistoryError::UnexpectedHeader(
            headers.iter().collect::<Vec<_>>().join(","),
        ));
    }

    reader
        .deserialize::<HistoryRecord>()
        .collect::<Result<Vec<_>, _>>()
        .map_err(HistoryError::from)
}

fn encode_records(records: &[HistoryRecord], with_header: bool) -> Result<Vec<u8>, HistoryError> {
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(Vec::new());

    if with_header {
        writer.write_record(LEDGER_HEADER)?;
    }
    for record in records {
        writer.serialize(record)?;
    }

    writer
        .into_inner()
        .map_err(|e| HistoryError::Io(e.into_error()))
}

fn temp_path_for(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}
