//! Local filesystem port (driven/secondary port)
//!
//! This module defines the interface for interacting with the local sync
//! directory: reading and writing files, listing directories and setting
//! file timestamps.
//!
//! ## Design Notes
//!
//! - Uses `anyhow::Result` because filesystem errors are adapter-specific.
//! - `write_file` must never leave a partially written file at the target
//!   path, including when the returned future is dropped before completion.
//!   Cancelling a download is done by dropping that future.

use chrono::{DateTime, Utc};

use crate::domain::newtypes::SyncPath;

// ============================================================================
// FileSystemState struct
// ============================================================================

/// Snapshot of a file's state on the local filesystem
#[derive(Debug, Clone)]
pub struct FileSystemState {
    /// Whether the file/directory exists on disk
    pub exists: bool,
    /// Whether this is a regular file (false for directories and other types)
    pub is_file: bool,
    /// Size in bytes (0 for directories or non-existent files)
    pub size: u64,
    /// Last modification time (None if not available or file doesn't exist)
    pub modified: Option<DateTime<Utc>>,
}

impl FileSystemState {
    /// Returns a state representing a non-existent path
    pub fn not_found() -> Self {
        Self {
            exists: false,
            is_file: false,
            size: 0,
            modified: None,
        }
    }

    /// Returns true if the file exists and is a regular file
    pub fn is_regular_file(&self) -> bool {
        self.exists && self.is_file
    }

    /// Returns true if the file exists and is a directory
    pub fn is_directory(&self) -> bool {
        self.exists && !self.is_file
    }
}

/// Entries of one directory, each list sorted by name
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DirectoryListing {
    pub directories: Vec<String>,
    pub files: Vec<String>,
}

// ============================================================================
// ILocalFileSystem trait
// ============================================================================

/// Port trait for local filesystem operations
///
/// All paths are `SyncPath` instances, which are guaranteed to be absolute.
#[async_trait::async_trait]
pub trait ILocalFileSystem: Send + Sync {
    /// Reads the entire contents of a file
    ///
    /// # Errors
    /// Returns an error if the file doesn't exist or cannot be read
    async fn read_file(&self, path: &SyncPath) -> anyhow::Result<Vec<u8>>;

    /// Replaces the contents of a file, creating it if necessary
    ///
    /// The data is written next to the target and moved into place once
    /// complete. If the write fails, or the future is dropped, the target
    /// is either absent or still holds its previous contents.
    /// Parent directories are NOT automatically created.
    async fn write_file(&self, path: &SyncPath, data: &[u8]) -> anyhow::Result<()>;

    /// Gets the current state of a file or directory
    ///
    /// Returns `FileSystemState::not_found()` if the path doesn't exist
    /// (does not return an error for missing paths).
    async fn get_state(&self, path: &SyncPath) -> anyhow::Result<FileSystemState>;

    /// Lists the subdirectories and regular files of a directory
    ///
    /// Returns an empty listing if the directory doesn't exist.
    async fn list_directory(&self, path: &SyncPath) -> anyhow::Result<DirectoryListing>;

    /// Creates a directory and all parent directories as needed
    ///
    /// This is equivalent to `mkdir -p` behavior.
    async fn create_directory(&self, path: &SyncPath) -> anyhow::Result<()>;

    /// Sets both the modification and access time of a file
    async fn set_times(&self, path: &SyncPath, at: DateTime<Utc>) -> anyhow::Result<()>;
}
