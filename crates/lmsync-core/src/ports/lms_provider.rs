//! LMS provider port (driven/secondary port)
//!
//! This module defines the interface the sync engine uses to talk to the
//! learning management system. The implementation in `lmsync-canvas`
//! targets the Canvas REST API; the engine only sees the listing, fetch and
//! upload capabilities below.
//!
//! ## Design Notes
//!
//! - Uses `anyhow::Result` because transport errors are adapter-specific.
//!   The engine treats every error from this port as a transport/API
//!   failure of the single operation that raised it.
//! - The `*Info` structs are port-level DTOs. Tree builders map them to
//!   `NewEntity` values.
//! - Uploads are two-phase: `create_upload_target` asks the LMS where to
//!   send the bytes, `upload_file` sends them and completes any
//!   confirmation step the LMS requires.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::newtypes::RemoteId;

// ============================================================================
// Listing DTOs
// ============================================================================

/// A course visible to the authenticated user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CourseInfo {
    pub id: RemoteId,
    /// Display name, matched against the `courses_to_sync` allow-list
    pub name: String,
    pub course_code: Option<String>,
}

/// A module inside a course
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleInfo {
    pub id: RemoteId,
    pub name: String,
    pub position: Option<u32>,
}

/// Kind of a module item
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModuleItemType {
    File,
    Page,
    /// Headers, quizzes, external links and anything else that has no
    /// local file representation
    Other(String),
}

impl ModuleItemType {
    /// Map the LMS `type` string
    #[must_use]
    pub fn from_api(value: &str) -> Self {
        match value {
            "File" => ModuleItemType::File,
            "Page" => ModuleItemType::Page,
            other => ModuleItemType::Other(other.to_string()),
        }
    }
}

/// An entry of a module
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleItemInfo {
    pub id: RemoteId,
    pub title: String,
    pub item_type: ModuleItemType,
    /// Id of the underlying file for `File` items
    pub content_id: Option<RemoteId>,
    /// Slug of the underlying page for `Page` items
    pub page_url: Option<String>,
}

/// A stored file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileInfo {
    pub id: RemoteId,
    pub display_name: String,
    /// Authenticated download URL
    pub url: String,
    pub modified_at: DateTime<Utc>,
    pub size: Option<u64>,
    /// `true` when the LMS hides the content from this user
    pub locked_for_user: bool,
    pub folder_id: Option<RemoteId>,
}

/// A folder in a course's file area
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FolderInfo {
    pub id: RemoteId,
    pub name: String,
    pub parent_folder_id: Option<RemoteId>,
}

/// A wiki page with its HTML body
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageInfo {
    pub title: String,
    pub body: Option<String>,
    pub updated_at: Option<DateTime<Utc>>,
    pub locked_for_user: bool,
}

// ============================================================================
// Upload DTOs
// ============================================================================

/// Where a new upload should be placed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadDestination {
    /// The course's default upload folder
    Course(RemoteId),
    /// A specific folder, used to overwrite an existing file in place
    Folder(RemoteId),
}

/// What to do when a file of the same name already exists
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OnDuplicate {
    Overwrite,
    Rename,
}

/// Metadata sent when requesting an upload target
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadRequest {
    pub name: String,
    pub size: u64,
    pub on_duplicate: Option<OnDuplicate>,
}

/// Where and how to send file bytes, as returned by the LMS
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadTarget {
    pub upload_url: String,
    /// Form fields that must precede the file part
    pub upload_params: BTreeMap<String, String>,
}

/// The file object the LMS created from an upload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedFile {
    pub id: RemoteId,
    pub modified_at: Option<DateTime<Utc>>,
}

/// A module item to create for an uploaded file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewModuleItem {
    pub title: String,
    pub content_id: RemoteId,
}

// ============================================================================
// TransportError
// ============================================================================

/// Failure of a single LMS call, tagged with whether repeating it may help
///
/// Adapters wrap their own error types in this so the engine can retry
/// throttling and server-side failures without knowing the adapter.
#[derive(Debug, thiserror::Error)]
#[error("{source}")]
pub struct TransportError {
    retryable: bool,
    retry_after: Option<Duration>,
    #[source]
    source: Box<dyn std::error::Error + Send + Sync + 'static>,
}

impl TransportError {
    pub fn new(source: impl std::error::Error + Send + Sync + 'static, retryable: bool) -> Self {
        Self {
            retryable,
            retry_after: None,
            source: Box::new(source),
        }
    }

    /// Minimum wait the LMS asked for before the call is repeated
    #[must_use]
    pub fn with_retry_after(mut self, delay: Duration) -> Self {
        self.retry_after = Some(delay);
        self
    }

    /// `true` for throttling, server errors and connection failures
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        self.retryable
    }

    #[must_use]
    pub fn retry_after(&self) -> Option<Duration> {
        self.retry_after
    }
}

// ============================================================================
// ILmsProvider trait
// ============================================================================

/// Port trait for LMS operations
///
/// All identifiers are opaque [`RemoteId`]s. Listing methods return the
/// items in the order the LMS reports them; tree builders preserve that
/// order.
#[async_trait::async_trait]
pub trait ILmsProvider: Send + Sync {
    /// Lists the courses of the authenticated user
    async fn list_courses(&self) -> anyhow::Result<Vec<CourseInfo>>;

    /// Lists the modules of a course
    async fn list_modules(&self, course_id: &RemoteId) -> anyhow::Result<Vec<ModuleInfo>>;

    /// Lists the items of a module
    async fn list_items_in_module(
        &self,
        course_id: &RemoteId,
        module_id: &RemoteId,
    ) -> anyhow::Result<Vec<ModuleItemInfo>>;

    /// Gets the top-level folder of a course's file area
    async fn get_root_folder(&self, course_id: &RemoteId) -> anyhow::Result<FolderInfo>;

    /// Lists the files directly inside a folder
    async fn list_files_in_folder(&self, folder_id: &RemoteId) -> anyhow::Result<Vec<FileInfo>>;

    /// Lists the folders directly inside a folder
    async fn list_folders_in_folder(
        &self,
        folder_id: &RemoteId,
    ) -> anyhow::Result<Vec<FolderInfo>>;

    /// Gets the current metadata of a file
    async fn get_file_by_id(&self, file_id: &RemoteId) -> anyhow::Result<FileInfo>;

    /// Gets a wiki page including its body
    async fn get_page(&self, course_id: &RemoteId, page_url: &str) -> anyhow::Result<PageInfo>;

    /// Downloads the raw bytes behind a file URL
    async fn fetch_file_bytes(&self, url: &str) -> anyhow::Result<Vec<u8>>;

    /// Requests an upload target for a new file
    async fn create_upload_target(
        &self,
        destination: &UploadDestination,
        request: &UploadRequest,
    ) -> anyhow::Result<UploadTarget>;

    /// Sends the bytes to an upload target and completes the upload
    async fn upload_file(
        &self,
        target: &UploadTarget,
        file_name: &str,
        data: Vec<u8>,
    ) -> anyhow::Result<UploadedFile>;

    /// Adds an uploaded file to a module
    async fn attach_item_to_module(
        &self,
        course_id: &RemoteId,
        module_id: &RemoteId,
        item: &NewModuleItem,
    ) -> anyhow::Result<()>;
}
