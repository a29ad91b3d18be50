//! Synchronization orchestrators
//!
//! [`RemoteSynchronizer`] mirrors the LMS into the sync directory,
//! [`LocalSynchronizer`] pushes new and modified local files back. Both own
//! the [`EntityTree`] of their last pass and run the same pass shape:
//!
//! 1. **Roots**: one node per course (`list_courses`, or the subdirectories
//!    of the sync root)
//! 2. **Expansion**: depth-first, pre-order. A node's children are built
//!    when the node is visited and assigned with `replace_children`
//! 3. **Leaves**: in `sync` mode every file runs its transfer state machine;
//!    in `walk` mode nothing is written
//!
//! Courses that are not on the allow-list are placed but never expanded, so
//! no listing call is made for their content. When every content toggle is
//! off, no course is expanded at all.
//!
//! A node whose children cannot be listed becomes an [`ExpansionIssue`] and
//! its subtree is skipped. Only an interruption, or a failure to list the
//! courses themselves, ends a pass early.

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use lmsync_core::config::{Config, ContentToggles};
use lmsync_core::domain::{
    Entity, EntityKind, EntityName, EntityTree, NodeId, RemoteId, SessionId, SyncPath,
};
use lmsync_core::ports::{IHistoryRepository, ILmsProvider, ILocalFileSystem};

use crate::download::{download_file, download_page};
use crate::local::LocalTreeBuilder;
use crate::remote::{Expansion, RemoteTreeBuilder};
use crate::retry::RetryPolicy;
use crate::upload::upload_file;
use crate::{ExpansionIssue, FileOutcome, SyncError, SyncEvent, SyncReport, TreeLine, WalkReport};

// ============================================================================
// Settings
// ============================================================================

/// What a pass covers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncSettings {
    /// Directory holding one subdirectory per course
    pub root: SyncPath,
    /// Course names to expand
    pub courses_to_sync: Vec<String>,
    pub content: ContentToggles,
}

impl SyncSettings {
    #[must_use]
    pub fn new(root: SyncPath, courses_to_sync: Vec<String>, content: ContentToggles) -> Self {
        Self {
            root,
            courses_to_sync,
            content,
        }
    }

    /// Settings from the `sync` configuration section
    ///
    /// # Errors
    /// Returns `SyncError::NotConfigured` when `sync.root` is not absolute
    pub fn from_config(config: &Config) -> Result<Self, SyncError> {
        let root = SyncPath::new(config.sync.root.clone())
            .map_err(|e| SyncError::NotConfigured(format!("sync.root: {e}")))?;
        Ok(Self::new(
            root,
            config.sync.courses_to_sync.clone(),
            config.sync.content,
        ))
    }

    /// `true` when a course name is on the allow-list
    ///
    /// Entries match either the raw LMS name or its sanitized directory
    /// form, so local directories resolve the same way remote courses do.
    #[must_use]
    pub fn selects(&self, name: &str) -> bool {
        self.courses_to_sync
            .iter()
            .any(|c| c == name || EntityName::sanitized(c).as_str() == name)
    }
}

// ============================================================================
// Shared pass context
// ============================================================================

/// Collaborators every transfer needs
pub struct SyncContext {
    pub(crate) provider: Arc<dyn ILmsProvider>,
    pub(crate) filesystem: Arc<dyn ILocalFileSystem>,
    pub(crate) history: Arc<dyn IHistoryRepository>,
    pub(crate) retry: RetryPolicy,
    pub(crate) cancel: CancellationToken,
    pub(crate) events: Option<mpsc::UnboundedSender<SyncEvent>>,
}

impl SyncContext {
    fn new(
        provider: Arc<dyn ILmsProvider>,
        filesystem: Arc<dyn ILocalFileSystem>,
        history: Arc<dyn IHistoryRepository>,
    ) -> Self {
        Self {
            provider,
            filesystem,
            history,
            retry: RetryPolicy::default(),
            cancel: CancellationToken::new(),
            events: None,
        }
    }

    fn emit(&self, event: SyncEvent) {
        if let Some(tx) = &self.events {
            // A dropped receiver only means nobody is watching
            let _ = tx.send(event);
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PassMode {
    Walk,
    Sync,
}

impl PassMode {
    fn as_str(self) -> &'static str {
        match self {
            PassMode::Walk => "walk",
            PassMode::Sync => "sync",
        }
    }
}

#[derive(Debug, Default)]
struct PassOutput {
    outcomes: Vec<FileOutcome>,
    issues: Vec<ExpansionIssue>,
}

/// Bookkeeping shared by the remote and local passes
struct PassLog<'a> {
    ctx: &'a SyncContext,
    output: PassOutput,
}

impl<'a> PassLog<'a> {
    fn new(ctx: &'a SyncContext) -> Self {
        Self {
            ctx,
            output: PassOutput::default(),
        }
    }

    fn issue(&mut self, path: &SyncPath, message: String) {
        warn!(path = %path, %message, "Skipping subtree");
        self.output.issues.push(ExpansionIssue {
            path: path.clone(),
            message,
        });
    }

    fn finished(&mut self, outcome: FileOutcome) {
        info!(path = %outcome.path, status = %outcome.status, "File processed");
        self.ctx.emit(SyncEvent::Finished(outcome.clone()));
        self.output.outcomes.push(outcome);
    }

    fn entered(&self, tree: &EntityTree, node: NodeId) {
        if let Ok(line) = tree_line(tree, node) {
            self.ctx.emit(SyncEvent::Entered(line));
        }
    }

    /// Place an expansion under `node`
    ///
    /// Interruptions propagate; any other failure becomes an issue and the
    /// node keeps no children.
    fn place(
        &mut self,
        tree: &mut EntityTree,
        node: NodeId,
        path: &SyncPath,
        expansion: Result<Expansion, SyncError>,
    ) -> Result<Vec<NodeId>, SyncError> {
        match expansion {
            Ok(expansion) => {
                for skipped in expansion.skipped {
                    self.issue(path, skipped);
                }
                match tree.replace_children(node, expansion.children) {
                    Ok(ids) => Ok(ids),
                    Err(e) => {
                        self.issue(path, e.to_string());
                        Ok(Vec::new())
                    }
                }
            }
            Err(SyncError::Interrupted) => Err(SyncError::Interrupted),
            Err(e) => {
                self.issue(path, e.to_string());
                Ok(Vec::new())
            }
        }
    }

    /// Create the directory of a node in `sync` mode; `false` when that failed
    async fn prepare_directory(&mut self, mode: PassMode, path: &SyncPath) -> bool {
        if mode == PassMode::Walk {
            return true;
        }
        match self.ctx.filesystem.create_directory(path).await {
            Ok(()) => true,
            Err(e) => {
                self.issue(path, format!("Failed to create directory: {e:#}"));
                false
            }
        }
    }
}

fn check_cancelled(cancel: &CancellationToken) -> Result<(), SyncError> {
    if cancel.is_cancelled() {
        Err(SyncError::Interrupted)
    } else {
        Ok(())
    }
}

fn elapsed_ms(start: Instant) -> u64 {
    u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX)
}

// ============================================================================
// Tree rendering
// ============================================================================

/// Listing line for one node
///
/// # Errors
/// Returns `DomainError::UnknownNode` for an index from another tree
pub fn tree_line(tree: &EntityTree, node: NodeId) -> Result<TreeLine, SyncError> {
    let entity = tree.entity(node)?;
    Ok(TreeLine {
        depth: tree.depth(node),
        label: entity.kind().label(),
        name: entity.name().to_string(),
        path: entity.sync_path().clone(),
        locked: entity.is_locked(),
    })
}

/// Every reachable node, roots in order, each followed by its subtree
#[must_use]
pub fn render(tree: &EntityTree) -> Vec<TreeLine> {
    tree.roots()
        .iter()
        .flat_map(|root| tree.descendants(*root))
        .filter_map(|node| tree_line(tree, node).ok())
        .collect()
}

/// Nodes that stand for a file on disk
fn is_file_bearing(kind: &EntityKind) -> bool {
    matches!(
        kind,
        EntityKind::File(_) | EntityKind::LinkedFile(_) | EntityKind::Page(_) | EntityKind::LocalFile
    )
}

fn walk_report(session_id: SessionId, tree: &EntityTree, issues: Vec<ExpansionIssue>) -> WalkReport {
    let file_count = tree
        .roots()
        .iter()
        .flat_map(|root| tree.descendants(*root))
        .filter_map(|node| tree.entity(node).ok())
        .filter(|entity| is_file_bearing(entity.kind()))
        .count();
    WalkReport {
        session_id,
        lines: render(tree),
        file_count,
        issues,
    }
}

// ============================================================================
// RemoteSynchronizer
// ============================================================================

/// Mirrors the LMS into the sync directory
pub struct RemoteSynchronizer {
    settings: SyncSettings,
    ctx: SyncContext,
    tree: EntityTree,
}

impl RemoteSynchronizer {
    pub fn new(
        settings: SyncSettings,
        provider: Arc<dyn ILmsProvider>,
        filesystem: Arc<dyn ILocalFileSystem>,
        history: Arc<dyn IHistoryRepository>,
    ) -> Self {
        let tree = EntityTree::new(settings.root.clone());
        Self {
            settings,
            ctx: SyncContext::new(provider, filesystem, history),
            tree,
        }
    }

    /// Cancel passes through `token`
    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.ctx.cancel = token;
        self
    }

    /// Send live progress to `tx`
    #[must_use]
    pub fn with_events(mut self, tx: mpsc::UnboundedSender<SyncEvent>) -> Self {
        self.ctx.events = Some(tx);
        self
    }

    #[must_use]
    pub fn with_retry(mut self, policy: RetryPolicy) -> Self {
        self.ctx.retry = policy;
        self
    }

    /// Tree of the last pass
    #[must_use]
    pub fn tree(&self) -> &EntityTree {
        &self.tree
    }

    /// List what a sync would cover without writing anything
    pub async fn walk(&mut self) -> Result<WalkReport, SyncError> {
        let session_id = SessionId::new();
        let span = info_span!("sync_pass", session_id = %session_id, mode = PassMode::Walk.as_str());
        let output = self.run(PassMode::Walk).instrument(span).await?;
        Ok(walk_report(session_id, &self.tree, output.issues))
    }

    /// Download everything that changed since the last pass
    pub async fn sync(&mut self) -> Result<SyncReport, SyncError> {
        let start = Instant::now();
        let session_id = SessionId::new();
        let span = info_span!("sync_pass", session_id = %session_id, mode = PassMode::Sync.as_str());
        let output = self.run(PassMode::Sync).instrument(span).await?;

        let mut report = SyncReport::new(session_id);
        report.outcomes = output.outcomes;
        report.issues = output.issues;
        report.duration_ms = elapsed_ms(start);
        info!(
            transferred = report.transferred(),
            failed = report.failures().count(),
            duration_ms = report.duration_ms,
            "Sync pass complete"
        );
        Ok(report)
    }

    /// Lines of the tree built by the last pass; makes no calls
    #[must_use]
    pub fn show(&self) -> Vec<TreeLine> {
        render(&self.tree)
    }

    async fn run(&mut self, mode: PassMode) -> Result<PassOutput, SyncError> {
        let Self {
            settings,
            ctx,
            tree,
        } = self;
        let settings: &SyncSettings = settings;
        let ctx: &SyncContext = ctx;
        *tree = EntityTree::new(settings.root.clone());

        info!(root = %settings.root, "Starting remote pass");
        if mode == PassMode::Sync {
            ctx.filesystem
                .create_directory(&settings.root)
                .await
                .map_err(SyncError::Filesystem)?;
        }

        let builder = RemoteTreeBuilder::new(ctx.provider.as_ref(), &ctx.retry, &ctx.cancel);
        let mut pass = RemotePass {
            settings,
            ctx,
            builder,
            mode,
            log: PassLog::new(ctx),
        };

        let mut stack = Vec::new();
        for course in pass.builder.courses(settings).await? {
            stack.push(tree.add_root(course)?);
        }
        stack.reverse();

        while let Some(node) = stack.pop() {
            check_cancelled(&ctx.cancel)?;
            let children = pass.visit(tree, node).await?;
            stack.extend(children.into_iter().rev());
        }

        Ok(pass.log.output)
    }
}

struct RemotePass<'a> {
    settings: &'a SyncSettings,
    ctx: &'a SyncContext,
    builder: RemoteTreeBuilder<'a>,
    mode: PassMode,
    log: PassLog<'a>,
}

impl RemotePass<'_> {
    /// Process one node; returns the children to visit next
    async fn visit(&mut self, tree: &mut EntityTree, node: NodeId) -> Result<Vec<NodeId>, SyncError> {
        let entity = tree.entity(node)?.clone();
        let path = entity.sync_path().clone();

        match entity.kind() {
            EntityKind::Course { to_be_synced } => {
                if !to_be_synced {
                    debug!(course = %entity.name(), "Course not selected");
                    return Ok(Vec::new());
                }
                if !self.settings.content.any() {
                    debug!(course = %entity.name(), "All content toggles are off");
                    return Ok(Vec::new());
                }
                self.log.entered(tree, node);
                if !self.log.prepare_directory(self.mode, &path).await {
                    return Ok(Vec::new());
                }
                let Some(course_id) = entity.id() else {
                    self.log.issue(&path, "Course has no id".to_string());
                    return Ok(Vec::new());
                };
                let expansion = self.builder.course_children(course_id, self.settings).await;
                self.log.place(tree, node, &path, expansion)
            }
            EntityKind::Module { .. } => {
                self.log.entered(tree, node);
                if !self.log.prepare_directory(self.mode, &path).await {
                    return Ok(Vec::new());
                }
                let (Some(course_id), Some(module_id)) = (course_id_of(tree, node), entity.id())
                else {
                    self.log.issue(&path, "Module or its course has no id".to_string());
                    return Ok(Vec::new());
                };
                let expansion = self.builder.module_children(&course_id, module_id).await;
                self.log.place(tree, node, &path, expansion)
            }
            EntityKind::Folder => {
                self.log.entered(tree, node);
                if !self.log.prepare_directory(self.mode, &path).await {
                    return Ok(Vec::new());
                }
                let Some(folder_id) = entity.id() else {
                    self.log.issue(&path, "Folder has no id".to_string());
                    return Ok(Vec::new());
                };
                let expansion = self.builder.folder_children(folder_id).await;
                self.log.place(tree, node, &path, expansion)
            }
            EntityKind::Page(meta) => {
                self.log.entered(tree, node);
                let Some(course_id) = course_id_of(tree, node) else {
                    self.log.issue(&path, "Page course has no id".to_string());
                    return Ok(Vec::new());
                };
                let page = match self.builder.page(&course_id, &meta.page_url).await {
                    Ok(page) => page,
                    Err(SyncError::Interrupted) => return Err(SyncError::Interrupted),
                    Err(e) => {
                        self.log.issue(&path, e.to_string());
                        return Ok(Vec::new());
                    }
                };
                if self.mode == PassMode::Sync {
                    let outcome = download_page(self.ctx, &entity, &page).await?;
                    self.log.finished(outcome);
                }
                let expansion = self.builder.page_children(&page).await;
                self.log.place(tree, node, &path, expansion)
            }
            EntityKind::File(_) | EntityKind::LinkedFile(_) => {
                if self.mode == PassMode::Sync {
                    let outcome = download_file(self.ctx, &entity).await?;
                    self.log.finished(outcome);
                }
                Ok(Vec::new())
            }
            EntityKind::LocalCourse { .. } | EntityKind::LocalModule { .. } | EntityKind::LocalFile => {
                debug!(node = %node, "Local node in remote tree, ignoring");
                Ok(Vec::new())
            }
        }
    }
}

/// Id of the course a node belongs to
fn course_id_of(tree: &EntityTree, node: NodeId) -> Option<RemoteId> {
    tree.nearest_ancestor(node, EntityKind::is_course)
        .and_then(|course| tree.entity(course).ok())
        .and_then(Entity::id)
        .cloned()
}

// ============================================================================
// LocalSynchronizer
// ============================================================================

/// Uploads new and modified files from the sync directory
pub struct LocalSynchronizer {
    settings: SyncSettings,
    ctx: SyncContext,
    tree: EntityTree,
}

impl LocalSynchronizer {
    pub fn new(
        settings: SyncSettings,
        provider: Arc<dyn ILmsProvider>,
        filesystem: Arc<dyn ILocalFileSystem>,
        history: Arc<dyn IHistoryRepository>,
    ) -> Self {
        let tree = EntityTree::new(settings.root.clone());
        Self {
            settings,
            ctx: SyncContext::new(provider, filesystem, history),
            tree,
        }
    }

    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.ctx.cancel = token;
        self
    }

    #[must_use]
    pub fn with_events(mut self, tx: mpsc::UnboundedSender<SyncEvent>) -> Self {
        self.ctx.events = Some(tx);
        self
    }

    /// Retry policy for the id-resolution listings; uploads are never retried
    #[must_use]
    pub fn with_retry(mut self, policy: RetryPolicy) -> Self {
        self.ctx.retry = policy;
        self
    }

    #[must_use]
    pub fn tree(&self) -> &EntityTree {
        &self.tree
    }

    /// List the local files an upload pass would consider
    pub async fn walk(&mut self) -> Result<WalkReport, SyncError> {
        let session_id = SessionId::new();
        let span = info_span!("sync_pass", session_id = %session_id, mode = "local_walk");
        let output = self.run(PassMode::Walk).instrument(span).await?;
        Ok(walk_report(session_id, &self.tree, output.issues))
    }

    /// Upload new files and files modified since their last transfer
    pub async fn sync(&mut self) -> Result<SyncReport, SyncError> {
        let start = Instant::now();
        let session_id = SessionId::new();
        let span = info_span!("sync_pass", session_id = %session_id, mode = "upload");
        let output = self.run(PassMode::Sync).instrument(span).await?;

        let mut report = SyncReport::new(session_id);
        report.outcomes = output.outcomes;
        report.issues = output.issues;
        report.duration_ms = elapsed_ms(start);
        info!(
            transferred = report.transferred(),
            failed = report.failures().count(),
            duration_ms = report.duration_ms,
            "Upload pass complete"
        );
        Ok(report)
    }

    #[must_use]
    pub fn show(&self) -> Vec<TreeLine> {
        render(&self.tree)
    }

    async fn run(&mut self, mode: PassMode) -> Result<PassOutput, SyncError> {
        let Self {
            settings,
            ctx,
            tree,
        } = self;
        let settings: &SyncSettings = settings;
        let ctx: &SyncContext = ctx;
        *tree = EntityTree::new(settings.root.clone());

        info!(root = %settings.root, "Starting local pass");
        let builder = LocalTreeBuilder::new(
            ctx.filesystem.as_ref(),
            ctx.history.as_ref(),
            ctx.provider.as_ref(),
            &ctx.retry,
            &ctx.cancel,
        );
        let mut log = PassLog::new(ctx);

        let courses = builder.courses(settings).await?;
        for skipped in courses.skipped {
            log.issue(&settings.root, skipped);
        }
        let mut stack = Vec::new();
        for course in courses.children {
            stack.push(tree.add_root(course)?);
        }
        stack.reverse();

        while let Some(node) = stack.pop() {
            check_cancelled(&ctx.cancel)?;
            let entity = tree.entity(node)?.clone();
            let path = entity.sync_path().clone();

            let children = match entity.kind() {
                EntityKind::LocalCourse { to_be_synced } => {
                    if !to_be_synced || !settings.content.modules {
                        debug!(course = %entity.name(), "Course not expanded");
                        continue;
                    }
                    log.entered(tree, node);
                    let expansion = builder.modules(&path, entity.id()).await;
                    log.place(tree, node, &path, expansion)?
                }
                EntityKind::LocalModule { .. } => {
                    log.entered(tree, node);
                    let expansion = builder.files(&path).await;
                    log.place(tree, node, &path, expansion)?
                }
                EntityKind::LocalFile => {
                    if mode == PassMode::Sync {
                        let outcome = upload_file(ctx, tree, node).await?;
                        log.finished(outcome);
                    }
                    Vec::new()
                }
                _ => {
                    debug!(node = %node, "Remote node in local tree, ignoring");
                    Vec::new()
                }
            };
            stack.extend(children.into_iter().rev());
        }

        Ok(log.output)
    }
}
