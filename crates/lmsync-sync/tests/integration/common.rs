//! Common test utilities for the sync engine tests
//!
//! `FakeLms` is an in-memory `ILmsProvider`. Every call is recorded as
//! `"<method>:<first id>"` so tests can assert which listings happened.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::SystemTime;

use anyhow::{anyhow, bail};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use lmsync_core::config::ContentToggles;
use lmsync_core::domain::{RemoteId, SyncPath};
use lmsync_core::ports::{
    CourseInfo, DirectoryListing, FileInfo, FileSystemState, FolderInfo, ILmsProvider,
    ILocalFileSystem, ModuleInfo, ModuleItemInfo, ModuleItemType, NewModuleItem, PageInfo,
    UploadDestination, UploadRequest, UploadTarget, UploadedFile,
};
use lmsync_history::CsvHistoryLedger;
use lmsync_sync::{LocalFileSystemAdapter, LocalSynchronizer, RemoteSynchronizer, RetryPolicy, SyncSettings};

pub const LEDGER_NAME: &str = ".lmsync-history.csv";

/// Folder the fake files course-level uploads into
pub const UNFILED_FOLDER: u64 = 600;

/// Timestamp the fake LMS reports for every upload
pub fn upload_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap()
}

pub fn jan_first_2023() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2023, 1, 1, 0, 0, 0).unwrap()
}

// ============================================================================
// FakeLms
// ============================================================================

/// A file the fake serves
#[derive(Debug, Clone)]
pub struct FakeFile {
    pub info: FileInfo,
    pub bytes: Vec<u8>,
}

impl FakeFile {
    pub fn new(id: u64, name: &str, modified_at: DateTime<Utc>, bytes: &[u8]) -> Self {
        Self {
            info: FileInfo {
                id: RemoteId::from(id),
                display_name: name.to_string(),
                url: format!("https://canvas.test/files/{id}/download"),
                modified_at,
                size: Some(bytes.len() as u64),
                locked_for_user: false,
                folder_id: None,
            },
            bytes: bytes.to_vec(),
        }
    }

    pub fn locked(mut self) -> Self {
        self.info.locked_for_user = true;
        self
    }

    pub fn in_folder(mut self, folder_id: u64) -> Self {
        self.info.folder_id = Some(RemoteId::from(folder_id));
        self
    }
}

/// One `upload_file` call
#[derive(Debug, Clone)]
pub struct RecordedUpload {
    pub destination: UploadDestination,
    pub request: UploadRequest,
    pub file_name: String,
    pub data: Vec<u8>,
    pub assigned_id: RemoteId,
}

#[derive(Default)]
struct FakeState {
    courses: Vec<CourseInfo>,
    modules: HashMap<String, Vec<ModuleInfo>>,
    items: HashMap<(String, String), Vec<ModuleItemInfo>>,
    files: BTreeMap<String, FakeFile>,
    root_folders: HashMap<String, FolderInfo>,
    subfolders: HashMap<String, Vec<FolderInfo>>,
    folder_files: HashMap<String, Vec<String>>,
    pages: HashMap<(String, String), PageInfo>,
    failing: HashSet<String>,
    hang_downloads: bool,
    pending_targets: HashMap<String, (UploadDestination, UploadRequest)>,
    uploads: Vec<RecordedUpload>,
    attachments: Vec<(RemoteId, RemoteId, NewModuleItem)>,
    next_id: u64,
}

/// In-memory LMS
#[derive(Default)]
pub struct FakeLms {
    state: Mutex<FakeState>,
    calls: Mutex<Vec<String>>,
}

impl FakeLms {
    pub fn new() -> Arc<Self> {
        let fake = Self::default();
        fake.state.lock().unwrap().next_id = 9000;
        Arc::new(fake)
    }

    pub fn add_course(&self, id: u64, name: &str) {
        self.state.lock().unwrap().courses.push(CourseInfo {
            id: RemoteId::from(id),
            name: name.to_string(),
            course_code: None,
        });
    }

    pub fn add_module(&self, course: u64, id: u64, name: &str) {
        let mut state = self.state.lock().unwrap();
        let modules = state.modules.entry(course.to_string()).or_default();
        let position = u32::try_from(modules.len()).ok();
        modules.push(ModuleInfo {
            id: RemoteId::from(id),
            name: name.to_string(),
            position,
        });
    }

    /// A module item pointing at `file`, which also becomes fetchable
    pub fn add_file_item(&self, course: u64, module: u64, item_id: u64, file: FakeFile) {
        let mut state = self.state.lock().unwrap();
        state
            .items
            .entry((course.to_string(), module.to_string()))
            .or_default()
            .push(ModuleItemInfo {
                id: RemoteId::from(item_id),
                title: file.info.display_name.clone(),
                item_type: ModuleItemType::File,
                content_id: Some(file.info.id.clone()),
                page_url: None,
            });
        state.files.insert(file.info.id.to_string(), file);
    }

    pub fn add_other_item(&self, course: u64, module: u64, item_id: u64, kind: &str) {
        self.state
            .lock()
            .unwrap()
            .items
            .entry((course.to_string(), module.to_string()))
            .or_default()
            .push(ModuleItemInfo {
                id: RemoteId::from(item_id),
                title: format!("{kind} item"),
                item_type: ModuleItemType::from_api(kind),
                content_id: None,
                page_url: None,
            });
    }

    pub fn add_page_item(&self, course: u64, module: u64, item_id: u64, page_url: &str, page: PageInfo) {
        let mut state = self.state.lock().unwrap();
        state
            .items
            .entry((course.to_string(), module.to_string()))
            .or_default()
            .push(ModuleItemInfo {
                id: RemoteId::from(item_id),
                title: page.title.clone(),
                item_type: ModuleItemType::Page,
                content_id: None,
                page_url: Some(page_url.to_string()),
            });
        state
            .pages
            .insert((course.to_string(), page_url.to_string()), page);
    }

    /// A file that is only reachable by id, e.g. through a page link
    pub fn add_loose_file(&self, file: FakeFile) {
        self.state
            .lock()
            .unwrap()
            .files
            .insert(file.info.id.to_string(), file);
    }

    pub fn set_root_folder(&self, course: u64, folder_id: u64) {
        self.state.lock().unwrap().root_folders.insert(
            course.to_string(),
            FolderInfo {
                id: RemoteId::from(folder_id),
                name: "course files".to_string(),
                parent_folder_id: None,
            },
        );
    }

    pub fn add_subfolder(&self, parent: u64, id: u64, name: &str) {
        self.state
            .lock()
            .unwrap()
            .subfolders
            .entry(parent.to_string())
            .or_default()
            .push(FolderInfo {
                id: RemoteId::from(id),
                name: name.to_string(),
                parent_folder_id: Some(RemoteId::from(parent)),
            });
    }

    pub fn add_folder_file(&self, folder: u64, file: FakeFile) {
        let file = file.in_folder(folder);
        let mut state = self.state.lock().unwrap();
        state
            .folder_files
            .entry(folder.to_string())
            .or_default()
            .push(file.info.id.to_string());
        state.files.insert(file.info.id.to_string(), file);
    }

    /// Change the remote timestamp and contents of a known file
    pub fn touch_file(&self, id: u64, modified_at: DateTime<Utc>, bytes: &[u8]) {
        let mut state = self.state.lock().unwrap();
        if let Some(file) = state.files.get_mut(&id.to_string()) {
            file.info.modified_at = modified_at;
            file.bytes = bytes.to_vec();
        }
    }

    /// Make every call recorded as `key` fail with a non-retryable error
    pub fn fail(&self, key: &str) {
        self.state.lock().unwrap().failing.insert(key.to_string());
    }

    /// Make `fetch_file_bytes` never complete
    pub fn hang_downloads(&self) {
        self.state.lock().unwrap().hang_downloads = true;
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    /// Number of calls to `method`, any argument
    pub fn count(&self, method: &str) -> usize {
        let prefix = format!("{method}:");
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.starts_with(&prefix))
            .count()
    }

    pub fn uploads(&self) -> Vec<RecordedUpload> {
        self.state.lock().unwrap().uploads.clone()
    }

    pub fn attachments(&self) -> Vec<(RemoteId, RemoteId, NewModuleItem)> {
        self.state.lock().unwrap().attachments.clone()
    }

    fn record(&self, method: &str, arg: &str) -> anyhow::Result<()> {
        let key = format!("{method}:{arg}");
        self.calls.lock().unwrap().push(key.clone());
        if self.state.lock().unwrap().failing.contains(&key) {
            bail!("fake LMS refused {key}");
        }
        Ok(())
    }

    fn file(&self, id: &str) -> anyhow::Result<FakeFile> {
        self.state
            .lock()
            .unwrap()
            .files
            .get(id)
            .cloned()
            .ok_or_else(|| anyhow!("404 Not Found: file {id}"))
    }
}

#[async_trait]
impl ILmsProvider for FakeLms {
    async fn list_courses(&self) -> anyhow::Result<Vec<CourseInfo>> {
        self.record("list_courses", "")?;
        Ok(self.state.lock().unwrap().courses.clone())
    }

    async fn list_modules(&self, course_id: &RemoteId) -> anyhow::Result<Vec<ModuleInfo>> {
        self.record("list_modules", course_id.as_str())?;
        Ok(self
            .state
            .lock()
            .unwrap()
            .modules
            .get(course_id.as_str())
            .cloned()
            .unwrap_or_default())
    }

    async fn list_items_in_module(
        &self,
        course_id: &RemoteId,
        module_id: &RemoteId,
    ) -> anyhow::Result<Vec<ModuleItemInfo>> {
        self.record("list_items_in_module", module_id.as_str())?;
        Ok(self
            .state
            .lock()
            .unwrap()
            .items
            .get(&(course_id.to_string(), module_id.to_string()))
            .cloned()
            .unwrap_or_default())
    }

    async fn get_root_folder(&self, course_id: &RemoteId) -> anyhow::Result<FolderInfo> {
        self.record("get_root_folder", course_id.as_str())?;
        self.state
            .lock()
            .unwrap()
            .root_folders
            .get(course_id.as_str())
            .cloned()
            .ok_or_else(|| anyhow!("404 Not Found: root folder of {course_id}"))
    }

    async fn list_files_in_folder(&self, folder_id: &RemoteId) -> anyhow::Result<Vec<FileInfo>> {
        self.record("list_files_in_folder", folder_id.as_str())?;
        let state = self.state.lock().unwrap();
        Ok(state
            .folder_files
            .get(folder_id.as_str())
            .into_iter()
            .flatten()
            .filter_map(|id| state.files.get(id))
            .map(|f| f.info.clone())
            .collect())
    }

    async fn list_folders_in_folder(&self, folder_id: &RemoteId) -> anyhow::Result<Vec<FolderInfo>> {
        self.record("list_folders_in_folder", folder_id.as_str())?;
        Ok(self
            .state
            .lock()
            .unwrap()
            .subfolders
            .get(folder_id.as_str())
            .cloned()
            .unwrap_or_default())
    }

    async fn get_file_by_id(&self, file_id: &RemoteId) -> anyhow::Result<FileInfo> {
        self.record("get_file_by_id", file_id.as_str())?;
        Ok(self.file(file_id.as_str())?.info)
    }

    async fn get_page(&self, course_id: &RemoteId, page_url: &str) -> anyhow::Result<PageInfo> {
        self.record("get_page", page_url)?;
        self.state
            .lock()
            .unwrap()
            .pages
            .get(&(course_id.to_string(), page_url.to_string()))
            .cloned()
            .ok_or_else(|| anyhow!("404 Not Found: page {page_url}"))
    }

    async fn fetch_file_bytes(&self, url: &str) -> anyhow::Result<Vec<u8>> {
        self.record("fetch_file_bytes", url)?;
        let hang = self.state.lock().unwrap().hang_downloads;
        if hang {
            std::future::pending::<()>().await;
        }
        let state = self.state.lock().unwrap();
        state
            .files
            .values()
            .find(|f| f.info.url == url)
            .map(|f| f.bytes.clone())
            .ok_or_else(|| anyhow!("404 Not Found: {url}"))
    }

    async fn create_upload_target(
        &self,
        destination: &UploadDestination,
        request: &UploadRequest,
    ) -> anyhow::Result<UploadTarget> {
        let arg = match destination {
            UploadDestination::Course(id) => format!("course/{id}"),
            UploadDestination::Folder(id) => format!("folder/{id}"),
        };
        self.record("create_upload_target", &arg)?;

        let mut state = self.state.lock().unwrap();
        state.next_id += 1;
        let upload_url = format!("https://files.canvas.test/upload/{}", state.next_id);
        state
            .pending_targets
            .insert(upload_url.clone(), (destination.clone(), request.clone()));
        Ok(UploadTarget {
            upload_url,
            upload_params: BTreeMap::new(),
        })
    }

    async fn upload_file(
        &self,
        target: &UploadTarget,
        file_name: &str,
        data: Vec<u8>,
    ) -> anyhow::Result<UploadedFile> {
        self.record("upload_file", file_name)?;

        let mut state = self.state.lock().unwrap();
        let (destination, request) = state
            .pending_targets
            .remove(&target.upload_url)
            .ok_or_else(|| anyhow!("unknown upload target {}", target.upload_url))?;

        // Overwrites keep the file id; new uploads get a fresh one
        let assigned_id = match &destination {
            UploadDestination::Folder(folder) => state
                .files
                .values()
                .find(|f| f.info.folder_id.as_ref() == Some(folder) && f.info.display_name == file_name)
                .map(|f| f.info.id.clone())
                .unwrap_or_else(|| RemoteId::from(state.next_id)),
            UploadDestination::Course(_) => RemoteId::from(state.next_id),
        };

        let folder = match &destination {
            UploadDestination::Folder(folder) => folder.clone(),
            UploadDestination::Course(_) => RemoteId::from(UNFILED_FOLDER),
        };
        let mut stored = FakeFile::new(0, file_name, upload_time(), &data);
        stored.info.id = assigned_id.clone();
        stored.info.url = format!("https://canvas.test/files/{assigned_id}/download");
        stored.info.folder_id = Some(folder);
        state.files.insert(assigned_id.to_string(), stored);

        state.uploads.push(RecordedUpload {
            destination,
            request,
            file_name: file_name.to_string(),
            data,
            assigned_id: assigned_id.clone(),
        });
        Ok(UploadedFile {
            id: assigned_id,
            modified_at: Some(upload_time()),
        })
    }

    async fn attach_item_to_module(
        &self,
        course_id: &RemoteId,
        module_id: &RemoteId,
        item: &NewModuleItem,
    ) -> anyhow::Result<()> {
        self.record("attach_item_to_module", module_id.as_str())?;
        self.state
            .lock()
            .unwrap()
            .attachments
            .push((course_id.clone(), module_id.clone(), item.clone()));
        Ok(())
    }
}

// ============================================================================
// StalledWriteFs
// ============================================================================

/// Local filesystem whose `write_file` cancels the pass and never finishes
///
/// Everything else goes to the real adapter.
pub struct StalledWriteFs {
    inner: LocalFileSystemAdapter,
    cancel: CancellationToken,
    write_started: AtomicBool,
}

impl StalledWriteFs {
    pub fn new(cancel: CancellationToken) -> Arc<Self> {
        Arc::new(Self {
            inner: LocalFileSystemAdapter::new(),
            cancel,
            write_started: AtomicBool::new(false),
        })
    }

    pub fn write_started(&self) -> bool {
        self.write_started.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ILocalFileSystem for StalledWriteFs {
    async fn read_file(&self, path: &SyncPath) -> anyhow::Result<Vec<u8>> {
        self.inner.read_file(path).await
    }

    async fn write_file(&self, _path: &SyncPath, _data: &[u8]) -> anyhow::Result<()> {
        self.write_started.store(true, Ordering::SeqCst);
        self.cancel.cancel();
        std::future::pending::<anyhow::Result<()>>().await
    }

    async fn get_state(&self, path: &SyncPath) -> anyhow::Result<FileSystemState> {
        self.inner.get_state(path).await
    }

    async fn list_directory(&self, path: &SyncPath) -> anyhow::Result<DirectoryListing> {
        self.inner.list_directory(path).await
    }

    async fn create_directory(&self, path: &SyncPath) -> anyhow::Result<()> {
        self.inner.create_directory(path).await
    }

    async fn set_times(&self, path: &SyncPath, at: DateTime<Utc>) -> anyhow::Result<()> {
        self.inner.set_times(path, at).await
    }
}

// ============================================================================
// Engine wiring
// ============================================================================

pub fn settings(dir: &TempDir, courses: &[&str], content: ContentToggles) -> SyncSettings {
    SyncSettings::new(
        SyncPath::new(dir.path().to_path_buf()).unwrap(),
        courses.iter().map(|c| (*c).to_string()).collect(),
        content,
    )
}

pub fn modules_only() -> ContentToggles {
    ContentToggles {
        modules: true,
        files: false,
        assignments: false,
    }
}

pub async fn ledger(dir: &TempDir) -> Arc<CsvHistoryLedger> {
    Arc::new(CsvHistoryLedger::load(dir.path().join(LEDGER_NAME)).await)
}

/// A remote synchronizer with a freshly loaded ledger and no retries
pub async fn remote(dir: &TempDir, lms: &Arc<FakeLms>, settings: SyncSettings) -> RemoteSynchronizer {
    RemoteSynchronizer::new(
        settings,
        lms.clone(),
        Arc::new(LocalFileSystemAdapter::new()),
        ledger(dir).await,
    )
    .with_retry(RetryPolicy::none())
}

pub async fn local(dir: &TempDir, lms: &Arc<FakeLms>, settings: SyncSettings) -> LocalSynchronizer {
    LocalSynchronizer::new(
        settings,
        lms.clone(),
        Arc::new(LocalFileSystemAdapter::new()),
        ledger(dir).await,
    )
    .with_retry(RetryPolicy::none())
}

pub fn ledger_lines(dir: &TempDir) -> Vec<String> {
    std::fs::read_to_string(dir.path().join(LEDGER_NAME))
        .unwrap_or_default()
        .lines()
        .map(str::to_string)
        .collect()
}

pub fn mtime(path: &Path) -> DateTime<Utc> {
    DateTime::<Utc>::from(std::fs::metadata(path).unwrap().modified().unwrap())
}

pub fn set_mtime(path: &Path, at: DateTime<Utc>) {
    let file = std::fs::File::options().write(true).open(path).unwrap();
    file.set_modified(SystemTime::from(at)).unwrap();
}
