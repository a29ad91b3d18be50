//! Canvas JSON response types
//!
//! These mirror the subset of the Canvas REST resources the sync engine
//! reads. Canvas reports ids as numbers, or as strings when the client asks
//! for `application/json+canvas-string-ids`; both are accepted.
//!
//! Each type converts into the matching `lmsync_core::ports` DTO.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer};

use lmsync_core::domain::RemoteId;
use lmsync_core::ports::{
    CourseInfo, FileInfo, FolderInfo, ModuleInfo, ModuleItemInfo, ModuleItemType, PageInfo,
    UploadTarget, UploadedFile,
};

use crate::CanvasError;

// ============================================================================
// Id handling
// ============================================================================

#[derive(Deserialize)]
#[serde(untagged)]
enum RawId {
    Number(u64),
    Text(String),
}

impl RawId {
    fn into_remote_id<E: serde::de::Error>(self) -> Result<RemoteId, E> {
        match self {
            RawId::Number(n) => Ok(RemoteId::from(n)),
            RawId::Text(s) => RemoteId::new(s).map_err(E::custom),
        }
    }
}

fn deserialize_id<'de, D>(deserializer: D) -> Result<RemoteId, D::Error>
where
    D: Deserializer<'de>,
{
    RawId::deserialize(deserializer)?.into_remote_id()
}

fn deserialize_optional_id<'de, D>(deserializer: D) -> Result<Option<RemoteId>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<RawId>::deserialize(deserializer)? {
        Some(raw) => raw.into_remote_id().map(Some),
        None => Ok(None),
    }
}

// ============================================================================
// Listing resources
// ============================================================================

/// `GET /api/v1/courses`
#[derive(Debug, Clone, Deserialize)]
pub struct CanvasCourse {
    #[serde(deserialize_with = "deserialize_id")]
    pub id: RemoteId,
    /// Absent for courses the user can no longer access
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub course_code: Option<String>,
}

impl CanvasCourse {
    /// `None` for nameless entries, which cannot be mapped to a directory
    pub fn into_info(self) -> Option<CourseInfo> {
        let name = self.name.filter(|n| !n.trim().is_empty())?;
        Some(CourseInfo {
            id: self.id,
            name,
            course_code: self.course_code,
        })
    }
}

/// `GET /api/v1/courses/:course_id/modules`
#[derive(Debug, Clone, Deserialize)]
pub struct CanvasModule {
    #[serde(deserialize_with = "deserialize_id")]
    pub id: RemoteId,
    pub name: String,
    #[serde(default)]
    pub position: Option<u32>,
}

impl From<CanvasModule> for ModuleInfo {
    fn from(module: CanvasModule) -> Self {
        ModuleInfo {
            id: module.id,
            name: module.name,
            position: module.position,
        }
    }
}

/// `GET /api/v1/courses/:course_id/modules/:module_id/items`
#[derive(Debug, Clone, Deserialize)]
pub struct CanvasModuleItem {
    #[serde(deserialize_with = "deserialize_id")]
    pub id: RemoteId,
    pub title: String,
    #[serde(rename = "type")]
    pub item_type: String,
    #[serde(default, deserialize_with = "deserialize_optional_id")]
    pub content_id: Option<RemoteId>,
    #[serde(default)]
    pub page_url: Option<String>,
}

impl From<CanvasModuleItem> for ModuleItemInfo {
    fn from(item: CanvasModuleItem) -> Self {
        ModuleItemInfo {
            id: item.id,
            title: item.title,
            item_type: ModuleItemType::from_api(&item.item_type),
            content_id: item.content_id,
            page_url: item.page_url,
        }
    }
}

/// `GET /api/v1/files/:id` and folder file listings
#[derive(Debug, Clone, Deserialize)]
pub struct CanvasFile {
    #[serde(deserialize_with = "deserialize_id")]
    pub id: RemoteId,
    pub display_name: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub modified_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub size: Option<u64>,
    #[serde(default)]
    pub locked_for_user: bool,
    #[serde(default, deserialize_with = "deserialize_optional_id")]
    pub folder_id: Option<RemoteId>,
}

impl TryFrom<CanvasFile> for FileInfo {
    type Error = CanvasError;

    fn try_from(file: CanvasFile) -> Result<Self, Self::Error> {
        let modified_at = file.modified_at.or(file.updated_at).ok_or_else(|| {
            CanvasError::InvalidResponse(format!("file {} has no modification time", file.id))
        })?;

        Ok(FileInfo {
            id: file.id,
            display_name: file.display_name,
            // Locked files come without a URL
            url: file.url.unwrap_or_default(),
            modified_at,
            size: file.size,
            locked_for_user: file.locked_for_user,
            folder_id: file.folder_id,
        })
    }
}

/// `GET /api/v1/folders/:id` and folder listings
#[derive(Debug, Clone, Deserialize)]
pub struct CanvasFolder {
    #[serde(deserialize_with = "deserialize_id")]
    pub id: RemoteId,
    pub name: String,
    #[serde(default, deserialize_with = "deserialize_optional_id")]
    pub parent_folder_id: Option<RemoteId>,
}

impl From<CanvasFolder> for FolderInfo {
    fn from(folder: CanvasFolder) -> Self {
        FolderInfo {
            id: folder.id,
            name: folder.name,
            parent_folder_id: folder.parent_folder_id,
        }
    }
}

/// `GET /api/v1/courses/:course_id/pages/:url`
#[derive(Debug, Clone, Deserialize)]
pub struct CanvasPage {
    pub title: String,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub locked_for_user: bool,
}

impl From<CanvasPage> for PageInfo {
    fn from(page: CanvasPage) -> Self {
        PageInfo {
            title: page.title,
            body: page.body,
            updated_at: page.updated_at,
            locked_for_user: page.locked_for_user,
        }
    }
}

// ============================================================================
// Upload resources
// ============================================================================

/// Answer to the upload target request
#[derive(Debug, Clone, Deserialize)]
pub struct CanvasUploadTarget {
    pub upload_url: String,
    #[serde(default)]
    pub upload_params: BTreeMap<String, serde_json::Value>,
}

impl From<CanvasUploadTarget> for UploadTarget {
    fn from(target: CanvasUploadTarget) -> Self {
        let upload_params = target
            .upload_params
            .into_iter()
            .filter_map(|(key, value)| {
                let text = match value {
                    serde_json::Value::Null => return None,
                    serde_json::Value::String(s) => s,
                    other => other.to_string(),
                };
                Some((key, text))
            })
            .collect();

        UploadTarget {
            upload_url: target.upload_url,
            upload_params,
        }
    }
}

/// File object returned by the upload step or its confirmation
#[derive(Debug, Clone, Deserialize)]
pub struct CanvasUploadedFile {
    #[serde(default, deserialize_with = "deserialize_optional_id")]
    pub id: Option<RemoteId>,
    #[serde(default)]
    pub modified_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
    /// Confirmation URL, present when the storage host did not finish the upload
    #[serde(default)]
    pub location: Option<String>,
}

impl CanvasUploadedFile {
    /// `None` while the upload still needs confirmation
    pub fn into_uploaded(self) -> Option<UploadedFile> {
        let modified_at = self.modified_at.or(self.updated_at);
        self.id.map(|id| UploadedFile { id, modified_at })
    }
}
