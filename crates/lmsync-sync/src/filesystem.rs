//! Local filesystem adapter (secondary/driven adapter)
//!
//! Implements [`ILocalFileSystem`] using `tokio::fs` for async file operations.
//!
//! ## Design Decisions
//!
//! - **Atomic writes**: data goes to a hidden `.name.part` sibling that is
//!   renamed over the target once complete. A guard removes the sibling
//!   when the write fails or its future is dropped, so an interrupted
//!   download never leaves a partial file behind.
//! - **Timestamps**: `set_times` uses `std::fs::File::set_times` on a
//!   blocking thread.
//! - **Listings** skip in-flight `.part` files.

use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use chrono::{DateTime, Utc};
use lmsync_core::{
    domain::SyncPath,
    ports::{DirectoryListing, FileSystemState, ILocalFileSystem},
};
use tracing::{debug, instrument, warn};

/// Suffix of in-flight write files
pub const PART_SUFFIX: &str = ".part";

/// Adapter that bridges the [`ILocalFileSystem`] port to the real filesystem.
///
/// Zero-sized: every operation takes its context from the [`SyncPath`]
/// arguments.
#[derive(Debug, Clone, Default)]
pub struct LocalFileSystemAdapter;

impl LocalFileSystemAdapter {
    /// Create a new `LocalFileSystemAdapter`.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

/// Path of the in-flight sibling used while writing `target`
#[must_use]
pub fn part_path_for(target: &Path) -> PathBuf {
    let mut name = std::ffi::OsString::from(".");
    if let Some(file_name) = target.file_name() {
        name.push(file_name);
    }
    name.push(PART_SUFFIX);
    target.with_file_name(name)
}

/// `true` for names produced by [`part_path_for`]
#[must_use]
pub fn is_part_file(name: &str) -> bool {
    name.starts_with('.') && name.ends_with(PART_SUFFIX)
}

/// An in-flight write shared between the writing thread and its guard
///
/// The flag and the file operations that depend on it happen under one
/// lock: once abandoned, the part file is gone and the writer will neither
/// recreate it nor rename it over the target.
struct PartFile {
    path: PathBuf,
    abandoned: Mutex<bool>,
}

impl PartFile {
    fn new(path: PathBuf) -> Self {
        Self {
            path,
            abandoned: Mutex::new(false),
        }
    }

    fn lock(&self) -> MutexGuard<'_, bool> {
        self.abandoned.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn abandon(&self) {
        let mut abandoned = self.lock();
        *abandoned = true;
        remove_if_present(&self.path);
    }

    /// Write `data` and rename it over `target`; `false` if abandoned first
    fn write_and_commit(&self, data: &[u8], target: &Path) -> std::io::Result<bool> {
        let mut file = {
            let abandoned = self.lock();
            if *abandoned {
                return Ok(false);
            }
            std::fs::File::create(&self.path)?
        };

        if let Err(e) = file.write_all(data).and_then(|()| file.flush()) {
            drop(file);
            remove_if_present(&self.path);
            return Err(e);
        }
        drop(file);

        let abandoned = self.lock();
        if *abandoned {
            remove_if_present(&self.path);
            return Ok(false);
        }
        if let Err(e) = std::fs::rename(&self.path, target) {
            remove_if_present(&self.path);
            return Err(e);
        }
        Ok(true)
    }
}

fn remove_if_present(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => debug!(path = %path.display(), "removed partial file"),
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "failed to remove partial file"),
    }
}

/// Abandons the in-flight write when dropped before being disarmed
struct PartFileGuard {
    part: Option<Arc<PartFile>>,
}

impl PartFileGuard {
    fn new(part: Arc<PartFile>) -> Self {
        Self { part: Some(part) }
    }

    fn disarm(&mut self) {
        self.part = None;
    }
}

impl Drop for PartFileGuard {
    fn drop(&mut self) {
        if let Some(part) = self.part.take() {
            part.abandon();
        }
    }
}

fn to_system_time(at: DateTime<Utc>) -> SystemTime {
    let secs = at.timestamp();
    if secs >= 0 {
        UNIX_EPOCH + Duration::new(secs.unsigned_abs(), at.timestamp_subsec_nanos())
    } else {
        UNIX_EPOCH
            .checked_sub(Duration::from_secs(secs.unsigned_abs()))
            .unwrap_or(UNIX_EPOCH)
    }
}

#[async_trait::async_trait]
impl ILocalFileSystem for LocalFileSystemAdapter {
    #[instrument(skip(self), fields(path = %path))]
    async fn read_file(&self, path: &SyncPath) -> anyhow::Result<Vec<u8>> {
        let data = tokio::fs::read(path.as_path()).await?;
        debug!(bytes = data.len(), "file read complete");
        Ok(data)
    }

    #[instrument(skip(self, data), fields(path = %path, bytes = data.len()))]
    async fn write_file(&self, path: &SyncPath, data: &[u8]) -> anyhow::Result<()> {
        let target = path.as_path().to_path_buf();
        let part = Arc::new(PartFile::new(part_path_for(&target)));
        let mut guard = PartFileGuard::new(part.clone());

        debug!(part = %part.path.display(), "writing to partial file");
        let data = data.to_vec();
        let committed =
            tokio::task::spawn_blocking(move || part.write_and_commit(&data, &target)).await??;
        guard.disarm();

        if !committed {
            anyhow::bail!("write to {path} was abandoned");
        }
        debug!("write complete");
        Ok(())
    }

    #[instrument(skip(self), fields(path = %path))]
    async fn get_state(&self, path: &SyncPath) -> anyhow::Result<FileSystemState> {
        let metadata = match tokio::fs::metadata(path.as_path()).await {
            Ok(m) => m,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Ok(FileSystemState::not_found());
            }
            Err(e) => return Err(e.into()),
        };

        let modified = metadata.modified().ok().and_then(|st| {
            st.duration_since(UNIX_EPOCH).ok().and_then(|dur| {
                i64::try_from(dur.as_secs())
                    .ok()
                    .and_then(|secs| DateTime::from_timestamp(secs, dur.subsec_nanos()))
            })
        });

        Ok(FileSystemState {
            exists: true,
            is_file: metadata.is_file(),
            size: metadata.len(),
            modified,
        })
    }

    #[instrument(skip(self), fields(path = %path))]
    async fn list_directory(&self, path: &SyncPath) -> anyhow::Result<DirectoryListing> {
        let mut entries = match tokio::fs::read_dir(path.as_path()).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("directory not found, empty listing");
                return Ok(DirectoryListing::default());
            }
            Err(e) => return Err(e.into()),
        };

        let mut listing = DirectoryListing::default();
        while let Some(entry) = entries.next_entry().await? {
            let Ok(name) = entry.file_name().into_string() else {
                debug!(name = ?entry.file_name(), "skipping non UTF-8 entry");
                continue;
            };
            // Follows symlinks, so linked directories and files count as such
            let metadata = match tokio::fs::metadata(entry.path()).await {
                Ok(m) => m,
                Err(e) => {
                    debug!(name, error = %e, "skipping unreadable entry");
                    continue;
                }
            };

            if metadata.is_dir() {
                listing.directories.push(name);
            } else if metadata.is_file() && !is_part_file(&name) {
                listing.files.push(name);
            }
        }

        listing.directories.sort();
        listing.files.sort();
        debug!(
            directories = listing.directories.len(),
            files = listing.files.len(),
            "directory listed"
        );
        Ok(listing)
    }

    #[instrument(skip(self), fields(path = %path))]
    async fn create_directory(&self, path: &SyncPath) -> anyhow::Result<()> {
        tokio::fs::create_dir_all(path.as_path()).await?;
        Ok(())
    }

    #[instrument(skip(self), fields(path = %path, at = %at))]
    async fn set_times(&self, path: &SyncPath, at: DateTime<Utc>) -> anyhow::Result<()> {
        let target = path.as_path().to_path_buf();
        let time = to_system_time(at);

        tokio::task::spawn_blocking(move || -> std::io::Result<()> {
            let times = std::fs::FileTimes::new()
                .set_modified(time)
                .set_accessed(time);
            let file = std::fs::File::options().write(true).open(&target)?;
            file.set_times(times)
        })
        .await??;

        Ok(())
    }
}
