//! CanvasLmsProvider - ILmsProvider implementation for Canvas
//!
//! Wraps a [`CanvasClient`] and implements the
//! [`ILmsProvider`](lmsync_core::ports::ILmsProvider) port trait by calling
//! the Canvas REST endpoints.
//!
//! Every [`CanvasError`] leaving this adapter is wrapped in a
//! [`TransportError`] carrying its retry classification, then given
//! `anyhow` context naming the call that failed.

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::{debug, instrument};

use lmsync_core::domain::RemoteId;
use lmsync_core::ports::{
    CourseInfo, FileInfo, FolderInfo, ILmsProvider, ModuleInfo, ModuleItemInfo, NewModuleItem,
    PageInfo, TransportError, UploadDestination, UploadRequest, UploadTarget, UploadedFile,
};

use crate::client::CanvasClient;
use crate::types::{
    CanvasCourse, CanvasFile, CanvasFolder, CanvasModule, CanvasModuleItem, CanvasPage,
};
use crate::{upload, CanvasError};

fn transport(err: CanvasError) -> TransportError {
    let retryable = err.is_retryable();
    let retry_after = match &err {
        CanvasError::TooManyRequests { retry_after } => Some(*retry_after),
        _ => None,
    };
    let transport = TransportError::new(err, retryable);
    match retry_after {
        Some(delay) => transport.with_retry_after(delay),
        None => transport,
    }
}

/// Body of `POST /api/v1/courses/:course_id/modules/:module_id/items`
#[derive(Debug, Serialize)]
struct ModuleItemBody<'a> {
    module_item: ModuleItemFields<'a>,
}

#[derive(Debug, Serialize)]
struct ModuleItemFields<'a> {
    title: &'a str,
    #[serde(rename = "type")]
    item_type: &'static str,
    content_id: &'a str,
}

// ============================================================================
// CanvasLmsProvider
// ============================================================================

/// Canvas implementation of the [`ILmsProvider`] port trait
#[derive(Debug, Clone)]
pub struct CanvasLmsProvider {
    client: CanvasClient,
}

impl CanvasLmsProvider {
    /// Creates a new `CanvasLmsProvider` wrapping the given [`CanvasClient`]
    pub fn new(client: CanvasClient) -> Self {
        Self { client }
    }

    /// Returns the wrapped client
    pub fn client(&self) -> &CanvasClient {
        &self.client
    }
}

#[async_trait::async_trait]
impl ILmsProvider for CanvasLmsProvider {
    /// Makes `GET /api/v1/courses`, dropping entries without a name
    #[instrument(skip(self))]
    async fn list_courses(&self) -> Result<Vec<CourseInfo>> {
        let courses: Vec<CanvasCourse> = self
            .client
            .get_json_list("/api/v1/courses?per_page=100")
            .await
            .map_err(transport)
            .context("Failed to list courses")?;

        let total = courses.len();
        let courses: Vec<CourseInfo> = courses
            .into_iter()
            .filter_map(CanvasCourse::into_info)
            .collect();
        debug!(total, named = courses.len(), "Listed courses");
        Ok(courses)
    }

    #[instrument(skip(self), fields(course_id = %course_id))]
    async fn list_modules(&self, course_id: &RemoteId) -> Result<Vec<ModuleInfo>> {
        let path = format!("/api/v1/courses/{}/modules?per_page=100", course_id.as_str());
        let modules: Vec<CanvasModule> = self
            .client
            .get_json_list(&path)
            .await
            .map_err(transport)
            .with_context(|| format!("Failed to list modules of course {course_id}"))?;

        debug!(count = modules.len(), "Listed modules");
        Ok(modules.into_iter().map(ModuleInfo::from).collect())
    }

    #[instrument(skip(self), fields(course_id = %course_id, module_id = %module_id))]
    async fn list_items_in_module(
        &self,
        course_id: &RemoteId,
        module_id: &RemoteId,
    ) -> Result<Vec<ModuleItemInfo>> {
        let path = format!(
            "/api/v1/courses/{}/modules/{}/items?per_page=100",
            course_id.as_str(),
            module_id.as_str()
        );
        let items: Vec<CanvasModuleItem> = self
            .client
            .get_json_list(&path)
            .await
            .map_err(transport)
            .with_context(|| format!("Failed to list items of module {module_id}"))?;

        debug!(count = items.len(), "Listed module items");
        Ok(items.into_iter().map(ModuleItemInfo::from).collect())
    }

    #[instrument(skip(self), fields(course_id = %course_id))]
    async fn get_root_folder(&self, course_id: &RemoteId) -> Result<FolderInfo> {
        let path = format!("/api/v1/courses/{}/folders/root", course_id.as_str());
        let folder: CanvasFolder = self
            .client
            .get_json(&path)
            .await
            .map_err(transport)
            .with_context(|| format!("Failed to get root folder of course {course_id}"))?;

        Ok(folder.into())
    }

    #[instrument(skip(self), fields(folder_id = %folder_id))]
    async fn list_files_in_folder(&self, folder_id: &RemoteId) -> Result<Vec<FileInfo>> {
        let path = format!("/api/v1/folders/{}/files?per_page=100", folder_id.as_str());
        let files: Vec<CanvasFile> = self
            .client
            .get_json_list(&path)
            .await
            .map_err(transport)
            .with_context(|| format!("Failed to list files of folder {folder_id}"))?;

        debug!(count = files.len(), "Listed folder files");
        files
            .into_iter()
            .map(|f| FileInfo::try_from(f).map_err(transport))
            .collect::<Result<Vec<_>, _>>()
            .with_context(|| format!("Invalid file entry in folder {folder_id}"))
    }

    #[instrument(skip(self), fields(folder_id = %folder_id))]
    async fn list_folders_in_folder(&self, folder_id: &RemoteId) -> Result<Vec<FolderInfo>> {
        let path = format!("/api/v1/folders/{}/folders?per_page=100", folder_id.as_str());
        let folders: Vec<CanvasFolder> = self
            .client
            .get_json_list(&path)
            .await
            .map_err(transport)
            .with_context(|| format!("Failed to list subfolders of folder {folder_id}"))?;

        debug!(count = folders.len(), "Listed subfolders");
        Ok(folders.into_iter().map(FolderInfo::from).collect())
    }

    #[instrument(skip(self), fields(file_id = %file_id))]
    async fn get_file_by_id(&self, file_id: &RemoteId) -> Result<FileInfo> {
        let path = format!("/api/v1/files/{}", file_id.as_str());
        let file: CanvasFile = self
            .client
            .get_json(&path)
            .await
            .map_err(transport)
            .with_context(|| format!("Failed to get file {file_id}"))?;

        FileInfo::try_from(file)
            .map_err(transport)
            .with_context(|| format!("Invalid metadata for file {file_id}"))
    }

    #[instrument(skip(self), fields(course_id = %course_id))]
    async fn get_page(&self, course_id: &RemoteId, page_url: &str) -> Result<PageInfo> {
        let path = format!("/api/v1/courses/{}/pages/{}", course_id.as_str(), page_url);
        let page: CanvasPage = self
            .client
            .get_json(&path)
            .await
            .map_err(transport)
            .with_context(|| format!("Failed to get page {page_url}"))?;

        Ok(page.into())
    }

    #[instrument(skip(self, url))]
    async fn fetch_file_bytes(&self, url: &str) -> Result<Vec<u8>> {
        self.client
            .download(url)
            .await
            .map_err(transport)
            .context("Failed to download file content")
    }

    #[instrument(skip(self, destination, request), fields(name = %request.name, size = request.size))]
    async fn create_upload_target(
        &self,
        destination: &UploadDestination,
        request: &UploadRequest,
    ) -> Result<UploadTarget> {
        upload::request_upload_target(&self.client, destination, request)
            .await
            .map_err(transport)
            .with_context(|| format!("Failed to request upload target for {}", request.name))
    }

    #[instrument(skip(self, target, data), fields(size = data.len()))]
    async fn upload_file(
        &self,
        target: &UploadTarget,
        file_name: &str,
        data: Vec<u8>,
    ) -> Result<UploadedFile> {
        upload::send_to_target(&self.client, target, file_name, data)
            .await
            .map_err(transport)
            .with_context(|| format!("Failed to upload {file_name}"))
    }

    #[instrument(skip(self, item), fields(course_id = %course_id, module_id = %module_id, content_id = %item.content_id))]
    async fn attach_item_to_module(
        &self,
        course_id: &RemoteId,
        module_id: &RemoteId,
        item: &NewModuleItem,
    ) -> Result<()> {
        let path = format!(
            "/api/v1/courses/{}/modules/{}/items",
            course_id.as_str(),
            module_id.as_str()
        );
        let body = ModuleItemBody {
            module_item: ModuleItemFields {
                title: &item.title,
                item_type: "File",
                content_id: item.content_id.as_str(),
            },
        };

        let _created: serde_json::Value = self
            .client
            .post_json(&path, &body)
            .await
            .map_err(transport)
            .with_context(|| format!("Failed to add {} to module {module_id}", item.title))?;

        debug!("Module item created");
        Ok(())
    }
}
