//! Download path
//!
//! Per-file state machine:
//!
//! ```text
//! Unvisited -> Locked
//!           -> UpToDate                 (local mtime == remote modified_at, whole seconds)
//!           -> Downloading -> Synced    (written, mtime set, ledger row upserted)
//!                          -> FailedDownload
//!                          -> Interrupted (partial file removed, pass aborted)
//! ```
//!
//! Bytes are written through [`ILocalFileSystem::write_file`], which moves
//! complete data into place and cleans up when its future is dropped. The
//! write races the cancellation token, so an interruption drops it.

use anyhow::Context;
use chrono::{DateTime, Utc};
use tracing::{debug, info, instrument, warn};

use lmsync_core::domain::history::same_second;
use lmsync_core::domain::{DomainError, Entity, EntityKind, EntityType, HistoryRecord, SyncPath};
use lmsync_core::ports::PageInfo;

use crate::engine::SyncContext;
use crate::retry::with_retry;
use crate::{FileOutcome, FileStatus, SyncError, TransferError};

/// Download one `File` or `LinkedFile` node
///
/// Only an interruption is returned as an error; every other failure is
/// a [`FileStatus::FailedDownload`] outcome.
#[instrument(skip(ctx, entity), fields(path = %entity.sync_path()))]
pub async fn download_file(ctx: &SyncContext, entity: &Entity) -> Result<FileOutcome, SyncError> {
    let path = entity.sync_path().clone();
    let entity_type = entity.kind().entity_type();
    let meta = match entity.kind() {
        EntityKind::File(meta) | EntityKind::LinkedFile(meta) => meta,
        other => {
            return Err(DomainError::ValidationFailed(format!(
                "{} is not a downloadable kind",
                other.label()
            ))
            .into())
        }
    };

    if entity.is_locked() {
        info!("File is locked, skipping");
        return Ok(FileOutcome::new(path, entity_type, FileStatus::Locked));
    }

    match is_up_to_date(ctx, &path, meta.modified_at).await {
        Ok(true) => {
            debug!("Local copy is up to date");
            return Ok(FileOutcome::new(path, entity_type, FileStatus::UpToDate));
        }
        Ok(false) => {}
        Err(e) => {
            warn!(error = %format!("{e:#}"), "Could not inspect local file");
            return Ok(FileOutcome::failed(
                path,
                entity_type,
                FileStatus::FailedDownload,
                &e,
            ));
        }
    }

    let url = meta.url.clone();
    let fetched = {
        let provider = ctx.provider.as_ref();
        let url = url.as_str();
        with_retry("fetch_file_bytes", &ctx.retry, &ctx.cancel, || async move {
            provider.fetch_file_bytes(url).await
        })
        .await
    };
    let bytes = match fetched {
        Err(e) => return Err(e),
        Ok(Ok(bytes)) => bytes,
        Ok(Err(e)) => {
            warn!(error = %format!("{e:#}"), "Download failed");
            return Ok(FileOutcome::failed(
                path,
                entity_type,
                FileStatus::FailedDownload,
                &e,
            ));
        }
    };

    let record = HistoryRecord::new(entity.id().cloned(), path.clone(), meta.modified_at, entity_type);
    match store(ctx, &path, &bytes, meta.modified_at, record).await {
        Ok(()) => {
            info!(bytes = bytes.len(), "Downloaded");
            Ok(FileOutcome::new(path, entity_type, FileStatus::Synced))
        }
        Err(TransferError::Interrupted) => {
            info!("Download interrupted");
            Err(SyncError::Interrupted)
        }
        Err(TransferError::Failed(e)) => {
            warn!(error = %format!("{e:#}"), "Download failed");
            Ok(FileOutcome::failed(
                path,
                entity_type,
                FileStatus::FailedDownload,
                &e,
            ))
        }
    }
}

/// Write a page body to `<page dir>/<title>.html`
///
/// The page directory is the node's own sync path. Skipped when the file
/// already carries the page's `updated_at`.
#[instrument(skip(ctx, entity, page), fields(path = %entity.sync_path()))]
pub async fn download_page(
    ctx: &SyncContext,
    entity: &Entity,
    page: &PageInfo,
) -> Result<FileOutcome, SyncError> {
    let html_path = page_html_path(entity)?;

    if page.locked_for_user {
        info!("Page is locked, skipping");
        return Ok(FileOutcome::new(html_path, EntityType::Page, FileStatus::Locked));
    }

    if let Some(updated_at) = page.updated_at {
        match is_up_to_date(ctx, &html_path, updated_at).await {
            Ok(true) => {
                return Ok(FileOutcome::new(html_path, EntityType::Page, FileStatus::UpToDate))
            }
            Ok(false) => {}
            Err(e) => {
                return Ok(FileOutcome::failed(
                    html_path,
                    EntityType::Page,
                    FileStatus::FailedDownload,
                    &e,
                ))
            }
        }
    }

    let modified_at = page.updated_at.unwrap_or_else(Utc::now);
    let body = page.body.clone().unwrap_or_default();
    let record = HistoryRecord::new(
        entity.id().cloned(),
        html_path.clone(),
        modified_at,
        EntityType::Page,
    );

    match store(ctx, &html_path, body.as_bytes(), modified_at, record).await {
        Ok(()) => {
            info!("Page written");
            Ok(FileOutcome::new(html_path, EntityType::Page, FileStatus::Synced))
        }
        Err(TransferError::Interrupted) => Err(SyncError::Interrupted),
        Err(TransferError::Failed(e)) => {
            warn!(error = %format!("{e:#}"), "Writing page failed");
            Ok(FileOutcome::failed(
                html_path,
                EntityType::Page,
                FileStatus::FailedDownload,
                &e,
            ))
        }
    }
}

/// `<page dir>/<page name>.html`
pub fn page_html_path(entity: &Entity) -> Result<SyncPath, DomainError> {
    entity
        .sync_path()
        .join(&format!("{}.html", entity.name()))
}

async fn is_up_to_date(
    ctx: &SyncContext,
    path: &SyncPath,
    remote_modified_at: DateTime<Utc>,
) -> anyhow::Result<bool> {
    let state = ctx.filesystem.get_state(path).await?;
    Ok(state.is_regular_file()
        && state
            .modified
            .is_some_and(|local| same_second(local, remote_modified_at)))
}

/// Write, stamp and record one file
async fn store(
    ctx: &SyncContext,
    path: &SyncPath,
    bytes: &[u8],
    modified_at: DateTime<Utc>,
    record: HistoryRecord,
) -> Result<(), TransferError> {
    if let Some(parent) = path.parent() {
        ctx.filesystem
            .create_directory(&parent)
            .await
            .with_context(|| format!("Failed to create {parent}"))?;
    }

    // A cancel after the rename inside write_file but before this select
    // resolves leaves a complete file with no ledger row and no mtime. The
    // next pass finds no record for it and downloads it again.
    tokio::select! {
        biased;
        _ = ctx.cancel.cancelled() => return Err(TransferError::Interrupted),
        written = ctx.filesystem.write_file(path, bytes) => written?,
    }

    ctx.filesystem
        .set_times(path, modified_at)
        .await
        .context("Failed to set file times")?;
    ctx.history
        .upsert(record)
        .await
        .context("Failed to record download in history")?;
    Ok(())
}
