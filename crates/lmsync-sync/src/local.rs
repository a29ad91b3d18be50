//! Local tree builder
//!
//! Discovers `LocalCourse`, `LocalModule` and `LocalFile` nodes from the
//! sync directory and resolves their LMS ids:
//!
//! - courses by matching the directory name against sanitized course names
//! - modules by matching against the sanitized module names of that course
//! - files from the history ledger
//!
//! Id resolution is best effort. An entity without an id is still listed;
//! the upload path decides what it can do without one. An entry whose name
//! cannot be a path component is left out and reported in
//! [`Expansion::skipped`]; its siblings are listed as usual.

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use lmsync_core::domain::{
    DomainError, EntityKind, EntityName, EntityType, NewEntity, RemoteId, SyncPath,
};
use lmsync_core::ports::{IHistoryRepository, ILmsProvider, ILocalFileSystem};

use crate::engine::SyncSettings;
use crate::remote::{Expansion, OTHER_FILES};
use crate::retry::{with_retry, RetryPolicy};
use crate::SyncError;

/// Course subdirectories that are never treated as modules
pub const RESERVED_DIRECTORIES: [&str; 2] = ["Assignments", OTHER_FILES];

/// Builds local nodes from the sync directory
pub struct LocalTreeBuilder<'a> {
    filesystem: &'a dyn ILocalFileSystem,
    history: &'a dyn IHistoryRepository,
    provider: &'a dyn ILmsProvider,
    retry: &'a RetryPolicy,
    cancel: &'a CancellationToken,
}

impl<'a> LocalTreeBuilder<'a> {
    pub fn new(
        filesystem: &'a dyn ILocalFileSystem,
        history: &'a dyn IHistoryRepository,
        provider: &'a dyn ILmsProvider,
        retry: &'a RetryPolicy,
        cancel: &'a CancellationToken,
    ) -> Self {
        Self {
            filesystem,
            history,
            provider,
            retry,
            cancel,
        }
    }

    /// One `LocalCourse` per subdirectory of the sync root
    pub async fn courses(&self, settings: &SyncSettings) -> Result<Expansion, SyncError> {
        let listing = self
            .filesystem
            .list_directory(&settings.root)
            .await
            .map_err(SyncError::Filesystem)?;

        let provider = self.provider;
        let remote = match with_retry("list_courses", self.retry, self.cancel, || async move {
            provider.list_courses().await
        })
        .await?
        {
            Ok(courses) => courses,
            Err(e) => {
                warn!(error = %format!("{e:#}"), "Could not list courses, local courses stay unresolved");
                Vec::new()
            }
        };

        let mut courses = Expansion::from_children(Vec::with_capacity(listing.directories.len()));
        for directory in listing.directories {
            let name = match EntityName::from_local(&directory) {
                Ok(name) => name,
                Err(e) => {
                    skip(&mut courses, &settings.root, &directory, &e);
                    continue;
                }
            };
            let id = remote
                .iter()
                .find(|c| EntityName::sanitized(&c.name) == name)
                .map(|c| c.id.clone());
            let to_be_synced = settings.selects(&directory);
            debug!(course = %directory, resolved = id.is_some(), to_be_synced, "Local course");
            courses
                .children
                .push(NewEntity::new(name, EntityKind::LocalCourse { to_be_synced }).with_id(id));
        }
        Ok(courses)
    }

    /// `LocalModule`s for the non-reserved subdirectories of a course
    pub async fn modules(
        &self,
        course_path: &SyncPath,
        course_id: Option<&RemoteId>,
    ) -> Result<Expansion, SyncError> {
        let listing = self
            .filesystem
            .list_directory(course_path)
            .await
            .map_err(SyncError::Filesystem)?;

        let remote = match course_id {
            Some(course_id) => {
                let provider = self.provider;
                match with_retry("list_modules", self.retry, self.cancel, || async move {
                    provider.list_modules(course_id).await
                })
                .await?
                {
                    Ok(modules) => modules,
                    Err(e) => {
                        warn!(course = %course_path, error = %format!("{e:#}"), "Could not list modules");
                        Vec::new()
                    }
                }
            }
            None => Vec::new(),
        };

        let mut modules = Expansion::from_children(Vec::new());
        let directories = listing
            .directories
            .into_iter()
            .filter(|d| !RESERVED_DIRECTORIES.contains(&d.as_str()));
        for directory in directories {
            let name = match EntityName::from_local(&directory) {
                Ok(name) => name,
                Err(e) => {
                    skip(&mut modules, course_path, &directory, &e);
                    continue;
                }
            };
            let id = remote
                .iter()
                .find(|m| EntityName::sanitized(&m.name) == name)
                .map(|m| m.id.clone());
            let position = modules.children.len();
            modules
                .children
                .push(NewEntity::new(name, EntityKind::LocalModule { position }).with_id(id));
        }
        Ok(modules)
    }

    /// `LocalFile`s for the regular files of a module directory
    pub async fn files(&self, module_path: &SyncPath) -> Result<Expansion, SyncError> {
        let listing = self
            .filesystem
            .list_directory(module_path)
            .await
            .map_err(SyncError::Filesystem)?;

        let mut files = Expansion::from_children(Vec::with_capacity(listing.files.len()));
        for file_name in listing.files {
            let (name, path) = match EntityName::from_local(&file_name)
                .and_then(|name| Ok((name, module_path.join(&file_name)?)))
            {
                Ok(resolved) => resolved,
                Err(e) => {
                    skip(&mut files, module_path, &file_name, &e);
                    continue;
                }
            };
            let id = self
                .history
                .lookup_by_path(&path)
                .await
                .filter(|r| r.entity_type == EntityType::File)
                .and_then(|r| r.id);
            files
                .children
                .push(NewEntity::new(name, EntityKind::LocalFile).with_id(id));
        }
        Ok(files)
    }
}

/// Leave `entry` out of `expansion`; the pass reports it as an issue on `parent`
fn skip(expansion: &mut Expansion, parent: &SyncPath, entry: &str, error: &DomainError) {
    debug!(parent = %parent, entry = %entry.escape_debug(), error = %error, "Local entry left out");
    expansion.skipped.push(format!("{entry:?}: {error}"));
}
