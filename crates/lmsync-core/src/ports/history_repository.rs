//! History repository port (driven/secondary port)
//!
//! This module defines the interface for the persistent history ledger
//! that makes synchronization incremental across runs.
//!
//! ## Design Notes
//!
//! - Uses `anyhow::Result` because storage errors are adapter-specific.
//! - Loading never fails: an unreadable ledger is an empty ledger. Only
//!   writes can return errors.
//! - Implementations must serialize writers; the ledger file is rewritten
//!   in full on replacement and concurrent rewrites would race.

use chrono::{DateTime, Utc};

use crate::domain::{Entity, HistoryRecord, SyncPath};

/// What an upsert did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    /// A record with the same `(path, type)` was replaced
    Replaced,
    /// A new record was appended
    Appended,
}

/// Port trait for the history ledger
#[async_trait::async_trait]
pub trait IHistoryRepository: Send + Sync {
    /// First record whose normalized path equals `path`
    async fn lookup_by_path(&self, path: &SyncPath) -> Option<HistoryRecord>;

    /// Position of the record sharing `record`'s `(path, type)` key
    async fn lookup_index(&self, record: &HistoryRecord) -> Option<usize>;

    /// Insert or replace a record and persist the ledger
    async fn upsert(&self, record: HistoryRecord) -> anyhow::Result<UpsertOutcome>;

    /// Upsert the record for an entity, if its kind is tracked
    ///
    /// Returns `Ok(None)` for kinds that are excluded from the ledger.
    async fn record_entity(
        &self,
        entity: &Entity,
        observed_modified_at: DateTime<Utc>,
    ) -> anyhow::Result<Option<UpsertOutcome>>;

    /// Snapshot of all records in ledger order
    async fn records(&self) -> Vec<HistoryRecord>;
}
