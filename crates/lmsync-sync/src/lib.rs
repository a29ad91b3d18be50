//! lmsync Sync - Hierarchical synchronization engine
//!
//! Provides:
//! - Remote tree discovery (courses, modules, pages, the course file area)
//! - Local tree discovery from the sync directory
//! - Downloads that only touch files whose remote timestamp moved
//! - Uploads of new and locally modified files
//! - The orchestrators running one `walk`, `sync` or `show` pass over every course
//!
//! ## Modules
//!
//! - [`engine`] - `RemoteSynchronizer` and `LocalSynchronizer`
//! - [`remote`] - Remote tree builder
//! - [`local`] - Local tree builder
//! - [`download`] - Per-file download with temp-file cleanup
//! - [`upload`] - Per-file upload branch selection and transfer
//! - [`filesystem`] - Local filesystem adapter (atomic writes, timestamps)
//! - [`retry`] - Exponential backoff for read-only LMS calls

pub mod download;
pub mod engine;
pub mod filesystem;
pub mod local;
pub mod remote;
pub mod retry;
pub mod upload;

use std::fmt::{self, Display, Formatter};

use serde::Serialize;
use thiserror::Error;

use lmsync_core::domain::{DomainError, EntityType, SessionId, SyncPath};

pub use engine::{LocalSynchronizer, RemoteSynchronizer, SyncSettings};
pub use filesystem::LocalFileSystemAdapter;
pub use retry::RetryPolicy;

/// Errors that abort a synchronization pass
///
/// Failures of a single file never surface here; they become a
/// [`FileStatus`] in the [`SyncReport`].
#[derive(Debug, Error)]
pub enum SyncError {
    /// The pass was cancelled; partial downloads have been removed
    #[error("Synchronization interrupted")]
    Interrupted,

    /// The LMS could not be reached for the top-level listing
    #[error("LMS error: {0:#}")]
    Provider(anyhow::Error),

    /// The sync root could not be read or created
    #[error("Filesystem error: {0:#}")]
    Filesystem(anyhow::Error),

    /// The history ledger could not be written
    #[error("History ledger error: {0:#}")]
    History(anyhow::Error),

    /// A domain-level error propagated from lmsync-core
    #[error("Domain error: {0}")]
    Domain(#[from] DomainError),

    /// Required settings are missing or invalid
    #[error("Not configured: {0}")]
    NotConfigured(String),
}

/// Why a single transfer stopped
#[derive(Debug)]
pub(crate) enum TransferError {
    /// Cancellation; aborts the pass
    Interrupted,
    /// Any transport or I/O failure; terminal for this file only
    Failed(anyhow::Error),
}

impl From<anyhow::Error> for TransferError {
    fn from(err: anyhow::Error) -> Self {
        TransferError::Failed(err)
    }
}

impl From<SyncError> for TransferError {
    fn from(err: SyncError) -> Self {
        match err {
            SyncError::Interrupted => TransferError::Interrupted,
            other => TransferError::Failed(other.into()),
        }
    }
}

// ============================================================================
// Per-file outcome
// ============================================================================

/// Terminal state of one file in a pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FileStatus {
    /// Downloaded and recorded
    Synced,
    /// Local copy already carries the remote timestamp
    UpToDate,
    /// Hidden from the user by the LMS; skipped
    Locked,
    /// New local file uploaded
    Uploaded,
    /// Modified local file uploaded over its remote counterpart
    Updated,
    /// Local file not modified since the last transfer
    Unchanged,
    FailedDownload,
    FailedUpload,
    FailedUpdate,
}

impl FileStatus {
    /// `true` for the three failure states
    #[must_use]
    pub fn is_failure(self) -> bool {
        matches!(
            self,
            FileStatus::FailedDownload | FileStatus::FailedUpload | FileStatus::FailedUpdate
        )
    }

    /// `true` when bytes were moved
    #[must_use]
    pub fn is_transfer(self) -> bool {
        matches!(
            self,
            FileStatus::Synced | FileStatus::Uploaded | FileStatus::Updated
        )
    }

    /// Console label
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            FileStatus::Synced => "SYNCED",
            FileStatus::UpToDate => "UP TO DATE",
            FileStatus::Locked => "LOCKED",
            FileStatus::Uploaded => "UPLOADED",
            FileStatus::Updated => "UPDATED",
            FileStatus::Unchanged => "UNCHANGED",
            FileStatus::FailedDownload => "FAILED DOWNLOAD",
            FileStatus::FailedUpload => "FAILED UPLOAD",
            FileStatus::FailedUpdate => "FAILED UPDATE",
        }
    }
}

impl Display for FileStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// What happened to one file
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileOutcome {
    pub path: SyncPath,
    pub entity_type: EntityType,
    pub status: FileStatus,
    /// Error text for failures
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl FileOutcome {
    #[must_use]
    pub fn new(path: SyncPath, entity_type: EntityType, status: FileStatus) -> Self {
        Self {
            path,
            entity_type,
            status,
            message: None,
        }
    }

    #[must_use]
    pub fn failed(
        path: SyncPath,
        entity_type: EntityType,
        status: FileStatus,
        error: &anyhow::Error,
    ) -> Self {
        Self {
            path,
            entity_type,
            status,
            message: Some(format!("{error:#}")),
        }
    }
}

/// A node whose children could not be listed
///
/// Its subtree is skipped for this pass; siblings continue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExpansionIssue {
    pub path: SyncPath,
    pub message: String,
}

// ============================================================================
// Pass reports
// ============================================================================

/// Summary of a `sync` pass
#[derive(Debug, Clone, Serialize)]
pub struct SyncReport {
    pub session_id: SessionId,
    pub outcomes: Vec<FileOutcome>,
    pub issues: Vec<ExpansionIssue>,
    pub duration_ms: u64,
}

impl SyncReport {
    #[must_use]
    pub fn new(session_id: SessionId) -> Self {
        Self {
            session_id,
            outcomes: Vec::new(),
            issues: Vec::new(),
            duration_ms: 0,
        }
    }

    /// Number of outcomes with the given status
    #[must_use]
    pub fn count(&self, status: FileStatus) -> usize {
        self.outcomes.iter().filter(|o| o.status == status).count()
    }

    /// Number of files whose bytes were moved
    #[must_use]
    pub fn transferred(&self) -> usize {
        self.outcomes.iter().filter(|o| o.status.is_transfer()).count()
    }

    /// Failed files
    pub fn failures(&self) -> impl Iterator<Item = &FileOutcome> {
        self.outcomes.iter().filter(|o| o.status.is_failure())
    }

    /// `true` when no file failed and every node could be expanded
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.failures().next().is_none() && self.issues.is_empty()
    }
}

/// One line of a tree listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TreeLine {
    /// Number of ancestors; courses are 0
    pub depth: usize,
    /// Kind label, e.g. `Module`
    pub label: &'static str,
    pub name: String,
    pub path: SyncPath,
    pub locked: bool,
}

impl Display for TreeLine {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:indent$}[{}] {}",
            "",
            self.label,
            self.name,
            indent = self.depth * 2
        )?;
        if self.locked {
            f.write_str(" (locked)")?;
        }
        Ok(())
    }
}

/// Result of a `walk` pass
#[derive(Debug, Clone, Serialize)]
pub struct WalkReport {
    pub session_id: SessionId,
    pub lines: Vec<TreeLine>,
    /// File-bearing leaves listed: files, linked files and pages
    pub file_count: usize,
    pub issues: Vec<ExpansionIssue>,
}

/// Live progress of a pass, for presentation layers
#[derive(Debug, Clone)]
pub enum SyncEvent {
    /// A directory-like node is being processed
    Entered(TreeLine),
    /// A file reached its terminal state
    Finished(FileOutcome),
}
