//! Remote tree builder
//!
//! Turns LMS listings into [`NewEntity`] lists for the orchestrator to
//! place with [`EntityTree::replace_children`](lmsync_core::domain::EntityTree::replace_children).
//! Nothing here touches the local filesystem.
//!
//! | Parent        | Children                                               |
//! |---------------|--------------------------------------------------------|
//! | (root)        | one `Course` per listed course                         |
//! | `Course`      | `Module`s, then the `Other Files` folder if enabled    |
//! | `Module`      | `File` and `Page` items; other item types are ignored  |
//! | `Folder`      | subfolders, then files                                 |
//! | `Page`        | `LinkedFile`s referenced from the page body            |
//!
//! Read calls go through [`with_retry`]. A listing that fails fails the
//! whole expansion; a single item that cannot be resolved is skipped and
//! reported in [`Expansion::skipped`].

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use lmsync_core::domain::{EntityKind, EntityName, NewEntity, PageMeta, RemoteFileMeta, RemoteId};
use lmsync_core::ports::{CourseInfo, FileInfo, ILmsProvider, ModuleItemType, PageInfo};

use crate::engine::SyncSettings;
use crate::retry::{with_retry, RetryPolicy};
use crate::SyncError;

/// Directory name of the mirrored course file area
pub const OTHER_FILES: &str = "Other Files";

/// Children produced by one expansion
#[derive(Debug, Default)]
pub struct Expansion {
    pub children: Vec<NewEntity>,
    /// Items left out because they could not be resolved
    pub skipped: Vec<String>,
}

impl Expansion {
    pub(crate) fn from_children(children: Vec<NewEntity>) -> Self {
        Self {
            children,
            skipped: Vec::new(),
        }
    }
}

/// Builds remote nodes from LMS listings
pub struct RemoteTreeBuilder<'a> {
    provider: &'a dyn ILmsProvider,
    retry: &'a RetryPolicy,
    cancel: &'a CancellationToken,
}

impl<'a> RemoteTreeBuilder<'a> {
    pub fn new(
        provider: &'a dyn ILmsProvider,
        retry: &'a RetryPolicy,
        cancel: &'a CancellationToken,
    ) -> Self {
        Self {
            provider,
            retry,
            cancel,
        }
    }

    /// One `Course` node per listed course, flagged by the allow-list
    pub async fn courses(&self, settings: &SyncSettings) -> Result<Vec<NewEntity>, SyncError> {
        let provider = self.provider;
        let courses = self
            .call("list_courses", || async move { provider.list_courses().await })
            .await?;

        debug!(count = courses.len(), "Discovered courses");
        Ok(courses
            .into_iter()
            .map(|course| course_entity(course, settings))
            .collect())
    }

    /// Children of a course: modules and/or the `Other Files` folder
    pub async fn course_children(
        &self,
        course_id: &RemoteId,
        settings: &SyncSettings,
    ) -> Result<Expansion, SyncError> {
        let mut children = Vec::new();
        let provider = self.provider;

        if settings.content.modules {
            let modules = self
                .call("list_modules", || async move {
                    provider.list_modules(course_id).await
                })
                .await?;
            children.extend(modules.into_iter().enumerate().map(|(position, module)| {
                NewEntity::new(
                    EntityName::sanitized(&module.name),
                    EntityKind::Module { position },
                )
                .with_id(Some(module.id))
            }));
        }

        if settings.content.files {
            let root = self
                .call("get_root_folder", || async move {
                    provider.get_root_folder(course_id).await
                })
                .await?;
            children.push(
                NewEntity::new(EntityName::sanitized(OTHER_FILES), EntityKind::Folder)
                    .with_id(Some(root.id)),
            );
        }

        Ok(Expansion::from_children(children))
    }

    /// Children of a module, in item order
    pub async fn module_children(
        &self,
        course_id: &RemoteId,
        module_id: &RemoteId,
    ) -> Result<Expansion, SyncError> {
        let provider = self.provider;
        let items = self
            .call("list_items_in_module", || async move {
                provider.list_items_in_module(course_id, module_id).await
            })
            .await?;

        let mut expansion = Expansion::default();
        for item in items {
            match item.item_type {
                ModuleItemType::File => {
                    let Some(content_id) = item.content_id.as_ref() else {
                        warn!(title = %item.title, "File item without content id");
                        expansion
                            .skipped
                            .push(format!("{}: file item without content id", item.title));
                        continue;
                    };
                    match self.resolve_file(content_id).await? {
                        Ok(file) => expansion.children.push(file_entity(file, false)),
                        Err(e) => expansion.skipped.push(format!("{}: {e:#}", item.title)),
                    }
                }
                ModuleItemType::Page => match item.page_url {
                    Some(page_url) => expansion.children.push(
                        NewEntity::new(
                            EntityName::sanitized(&item.title),
                            EntityKind::Page(PageMeta { page_url }),
                        )
                        .with_id(Some(item.id)),
                    ),
                    None => {
                        warn!(title = %item.title, "Page item without page url");
                        expansion
                            .skipped
                            .push(format!("{}: page item without page url", item.title));
                    }
                },
                ModuleItemType::Other(kind) => {
                    debug!(title = %item.title, kind, "Ignoring module item");
                }
            }
        }

        Ok(expansion)
    }

    /// Children of a folder: subfolders first, then files
    pub async fn folder_children(&self, folder_id: &RemoteId) -> Result<Expansion, SyncError> {
        let provider = self.provider;
        let folders = self
            .call("list_folders_in_folder", || async move {
                provider.list_folders_in_folder(folder_id).await
            })
            .await?;
        let files = self
            .call("list_files_in_folder", || async move {
                provider.list_files_in_folder(folder_id).await
            })
            .await?;

        let mut children: Vec<NewEntity> = folders
            .into_iter()
            .map(|folder| {
                NewEntity::new(EntityName::sanitized(&folder.name), EntityKind::Folder)
                    .with_id(Some(folder.id))
            })
            .collect();
        children.extend(files.into_iter().map(|file| file_entity(file, false)));

        Ok(Expansion::from_children(children))
    }

    /// Fetch a page with its body
    pub async fn page(&self, course_id: &RemoteId, page_url: &str) -> Result<PageInfo, SyncError> {
        let provider = self.provider;
        self.call("get_page", || async move {
            provider.get_page(course_id, page_url).await
        })
        .await
    }

    /// `LinkedFile` children for the files a page body links to
    pub async fn page_children(&self, page: &PageInfo) -> Result<Expansion, SyncError> {
        let mut expansion = Expansion::default();
        let Some(body) = page.body.as_deref() else {
            return Ok(expansion);
        };

        for file_id in linked_file_ids(body) {
            match self.resolve_file(&file_id).await? {
                Ok(file) => expansion.children.push(file_entity(file, true)),
                Err(e) => expansion
                    .skipped
                    .push(format!("linked file {file_id}: {e:#}")),
            }
        }
        Ok(expansion)
    }

    async fn resolve_file(&self, file_id: &RemoteId) -> Result<anyhow::Result<FileInfo>, SyncError> {
        let provider = self.provider;
        with_retry("get_file_by_id", self.retry, self.cancel, || async move {
            provider.get_file_by_id(file_id).await
        })
        .await
    }

    async fn call<F, Fut, T>(&self, operation_name: &str, f: F) -> Result<T, SyncError>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = anyhow::Result<T>>,
    {
        with_retry(operation_name, self.retry, self.cancel, f)
            .await?
            .map_err(SyncError::Provider)
    }
}

/// Course node; only allow-listed courses are expanded later
#[must_use]
pub fn course_entity(course: CourseInfo, settings: &SyncSettings) -> NewEntity {
    let to_be_synced = settings.selects(&course.name);
    NewEntity::new(
        EntityName::sanitized(&course.name),
        EntityKind::Course { to_be_synced },
    )
    .with_id(Some(course.id))
}

/// File or linked file node carrying the remote metadata
#[must_use]
pub fn file_entity(file: FileInfo, linked: bool) -> NewEntity {
    let meta = RemoteFileMeta {
        url: file.url,
        modified_at: file.modified_at,
        size: file.size,
    };
    let kind = if linked {
        EntityKind::LinkedFile(meta)
    } else {
        EntityKind::File(meta)
    };
    NewEntity::new(EntityName::sanitized(&file.display_name), kind)
        .with_id(Some(file.id))
        .with_locked(file.locked_for_user)
}

/// File ids referenced as `/files/<id>` in an HTML body, first occurrence order
#[must_use]
pub fn linked_file_ids(body: &str) -> Vec<RemoteId> {
    const MARKER: &str = "/files/";

    let mut ids: Vec<RemoteId> = Vec::new();
    let mut rest = body;
    while let Some(start) = rest.find(MARKER) {
        rest = &rest[start + MARKER.len()..];
        let digits: String = rest.chars().take_while(char::is_ascii_digit).collect();
        if digits.is_empty() {
            continue;
        }
        if let Ok(id) = RemoteId::new(digits) {
            if !ids.contains(&id) {
                ids.push(id);
            }
        }
    }
    ids
}
