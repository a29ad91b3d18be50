//! Upload path
//!
//! A `LocalFile` is compared against its history record:
//!
//! | Record                      | Plan      | Remote calls                                        |
//! |-----------------------------|-----------|-----------------------------------------------------|
//! | none                        | new       | course upload target, upload, module attach         |
//! | local mtime newer (seconds) | update    | `get_file_by_id`, folder target (overwrite), upload |
//! | local mtime equal or older  | unchanged | none                                                |
//!
//! After a successful upload the local mtime is set to the `modified_at`
//! the LMS reported, then the record is upserted. A failure leaves the
//! ledger untouched so the next pass tries again. Uploads are not retried.

use anyhow::{anyhow, Context};
use chrono::{DateTime, Utc};
use tracing::{info, instrument, warn};

use lmsync_core::domain::{EntityKind, EntityTree, EntityType, HistoryRecord, NodeId, RemoteId, SyncPath};
use lmsync_core::ports::{
    NewModuleItem, OnDuplicate, UploadDestination, UploadRequest, UploadedFile,
};

use crate::engine::SyncContext;
use crate::retry::with_retry;
use crate::{FileOutcome, FileStatus, SyncError, TransferError};

/// What to do with one local file
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadPlan {
    /// Never transferred; upload to the course
    New,
    /// Modified since `record` was written; overwrite in place
    Update { record: HistoryRecord },
    /// Nothing to do
    Unchanged,
}

/// Pick the upload branch for a file whose mtime is `local_modified_at`
#[must_use]
pub fn plan_upload(record: Option<&HistoryRecord>, local_modified_at: DateTime<Utc>) -> UploadPlan {
    match record {
        None => UploadPlan::New,
        Some(record) if record.is_older_than(local_modified_at) => UploadPlan::Update {
            record: record.clone(),
        },
        Some(_) => UploadPlan::Unchanged,
    }
}

/// Run the upload state machine for one `LocalFile` node
///
/// On success the node receives the id the LMS assigned. Only an
/// interruption is returned as an error.
#[instrument(skip(ctx, tree, node), fields(node = %node))]
pub async fn upload_file(
    ctx: &SyncContext,
    tree: &mut EntityTree,
    node: NodeId,
) -> Result<FileOutcome, SyncError> {
    let path = tree.entity(node)?.sync_path().clone();

    let local_modified_at = match local_mtime(ctx, &path).await {
        Ok(at) => at,
        Err(e) => {
            warn!(path = %path, error = %format!("{e:#}"), "Could not inspect local file");
            return Ok(FileOutcome::failed(
                path,
                EntityType::File,
                FileStatus::FailedUpload,
                &e,
            ));
        }
    };

    let record = ctx
        .history
        .lookup_by_path(&path)
        .await
        .filter(|r| r.entity_type == EntityType::File);

    let (result, success, failure) = match plan_upload(record.as_ref(), local_modified_at) {
        UploadPlan::Unchanged => {
            return Ok(FileOutcome::new(path, EntityType::File, FileStatus::Unchanged));
        }
        UploadPlan::New => (
            upload_new(ctx, tree, node).await,
            FileStatus::Uploaded,
            FileStatus::FailedUpload,
        ),
        UploadPlan::Update { record } => (
            upload_update(ctx, tree, node, &record).await,
            FileStatus::Updated,
            FileStatus::FailedUpdate,
        ),
    };

    let result = match result {
        Ok(uploaded) => finish(ctx, tree, node, uploaded).await,
        Err(e) => Err(e),
    };

    match result {
        Ok(()) => {
            info!(path = %path, status = %success, "Upload complete");
            Ok(FileOutcome::new(path, EntityType::File, success))
        }
        Err(TransferError::Interrupted) => Err(SyncError::Interrupted),
        Err(TransferError::Failed(e)) => {
            warn!(path = %path, error = %format!("{e:#}"), "Upload failed");
            Ok(FileOutcome::failed(path, EntityType::File, failure, &e))
        }
    }
}

async fn local_mtime(ctx: &SyncContext, path: &SyncPath) -> anyhow::Result<DateTime<Utc>> {
    let state = ctx.filesystem.get_state(path).await?;
    if !state.is_regular_file() {
        return Err(anyhow!("{path} is not a regular file"));
    }
    state
        .modified
        .ok_or_else(|| anyhow!("{path} has no modification time"))
}

/// First upload: course upload folder, then module attach
async fn upload_new(
    ctx: &SyncContext,
    tree: &EntityTree,
    node: NodeId,
) -> Result<UploadedFile, TransferError> {
    let entity = tree.entity(node).map_err(anyhow::Error::from)?;
    let name = entity.name().as_str();

    let course_id = tree
        .nearest_ancestor(node, EntityKind::is_course)
        .and_then(|course| tree.entity(course).ok())
        .and_then(|course| course.id().cloned())
        .ok_or_else(|| anyhow!("Course of {} is not known to the LMS", entity.sync_path()))?;

    let data = ctx
        .filesystem
        .read_file(entity.sync_path())
        .await
        .context("Failed to read local file")?;

    let request = UploadRequest {
        name: name.to_string(),
        size: data.len() as u64,
        on_duplicate: None,
    };
    let uploaded = send(ctx, &UploadDestination::Course(course_id.clone()), &request, name, data).await?;

    let parent = entity.parent().and_then(|p| tree.entity(p).ok());
    if let Some(module) = parent.filter(|p| matches!(p.kind(), EntityKind::LocalModule { .. })) {
        let module_id = module.id().ok_or_else(|| {
            anyhow!(
                "Uploaded as file {} but module {} is not known to the LMS",
                uploaded.id,
                module.name()
            )
        })?;
        attach(ctx, &course_id, module_id, name, &uploaded.id).await?;
    }

    Ok(uploaded)
}

/// Overwrite the remote file in the folder it lives in
async fn upload_update(
    ctx: &SyncContext,
    tree: &EntityTree,
    node: NodeId,
    record: &HistoryRecord,
) -> Result<UploadedFile, TransferError> {
    let entity = tree.entity(node).map_err(anyhow::Error::from)?;
    let name = entity.name().as_str();

    let file_id = record
        .id
        .as_ref()
        .ok_or_else(|| anyhow!("History record for {} has no file id", record.path))?;

    let provider = ctx.provider.as_ref();
    let remote = with_retry("get_file_by_id", &ctx.retry, &ctx.cancel, || async move {
        provider.get_file_by_id(file_id).await
    })
    .await??;
    let folder_id = remote
        .folder_id
        .ok_or_else(|| anyhow!("Remote file {file_id} has no folder"))?;

    let data = ctx
        .filesystem
        .read_file(entity.sync_path())
        .await
        .context("Failed to read local file")?;

    let request = UploadRequest {
        name: name.to_string(),
        size: data.len() as u64,
        on_duplicate: Some(OnDuplicate::Overwrite),
    };
    send(ctx, &UploadDestination::Folder(folder_id), &request, name, data).await
}

async fn send(
    ctx: &SyncContext,
    destination: &UploadDestination,
    request: &UploadRequest,
    name: &str,
    data: Vec<u8>,
) -> Result<UploadedFile, TransferError> {
    let upload = async {
        let target = ctx
            .provider
            .create_upload_target(destination, request)
            .await
            .context("Failed to request upload target")?;
        ctx.provider
            .upload_file(&target, name, data)
            .await
            .context("Failed to upload file")
    };

    tokio::select! {
        biased;
        _ = ctx.cancel.cancelled() => Err(TransferError::Interrupted),
        uploaded = upload => uploaded.map_err(TransferError::from),
    }
}

async fn attach(
    ctx: &SyncContext,
    course_id: &RemoteId,
    module_id: &RemoteId,
    title: &str,
    file_id: &RemoteId,
) -> Result<(), TransferError> {
    let item = NewModuleItem {
        title: title.to_string(),
        content_id: file_id.clone(),
    };
    ctx.provider
        .attach_item_to_module(course_id, module_id, &item)
        .await
        .with_context(|| format!("Uploaded as file {file_id} but attaching to module failed"))?;
    Ok(())
}

/// Stamp the local file and record the transfer
async fn finish(
    ctx: &SyncContext,
    tree: &mut EntityTree,
    node: NodeId,
    uploaded: UploadedFile,
) -> Result<(), TransferError> {
    let modified_at = uploaded.modified_at.unwrap_or_else(Utc::now);

    let entity = tree.entity_mut(node).map_err(anyhow::Error::from)?;
    entity.set_id(uploaded.id);
    ctx.filesystem
        .set_times(entity.sync_path(), modified_at)
        .await
        .context("Failed to set file times")?;
    ctx.history
        .record_entity(entity, modified_at)
        .await
        .context("Failed to record upload in history")?;
    Ok(())
}
