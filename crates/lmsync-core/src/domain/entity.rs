//! Entity tree
//!
//! Courses, modules, folders, files and pages form a tree that mirrors the
//! LMS hierarchy on disk. Nodes live in an arena ([`EntityTree`]) and refer
//! to each other by [`NodeId`]: a child holds its parent's index only, the
//! parent owns the ordered list of child indices. The tree is built fresh
//! for every sync pass and dropped afterwards.
//!
//! Every node's `sync_path` is derived when it is inserted:
//! `parent.sync_path / name` for children, `root / name` for roots.

use std::fmt::{self, Display, Formatter};

use chrono::{DateTime, Utc};

use super::errors::DomainError;
use super::history::EntityType;
use super::newtypes::{EntityName, RemoteId, SyncPath};

/// Index of a node inside an [`EntityTree`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

impl NodeId {
    #[must_use]
    pub const fn index(self) -> usize {
        self.0
    }
}

impl Display for NodeId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// What the LMS reports about a downloadable file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteFileMeta {
    /// Download URL
    pub url: String,
    /// Remote modification time, the value local mtimes are set to
    pub modified_at: DateTime<Utc>,
    pub size: Option<u64>,
}

/// What the LMS reports about a wiki page
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageMeta {
    /// URL slug used to fetch the page body
    pub page_url: String,
}

/// The closed set of node kinds
///
/// The first six variants come from the LMS, the last three from the local
/// sync directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntityKind {
    Course { to_be_synced: bool },
    Module { position: usize },
    Folder,
    File(RemoteFileMeta),
    Page(PageMeta),
    LinkedFile(RemoteFileMeta),
    LocalCourse { to_be_synced: bool },
    LocalModule { position: usize },
    LocalFile,
}

impl EntityKind {
    /// Short label used in tree listings
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            EntityKind::Course { .. } => "Course",
            EntityKind::Module { .. } => "Module",
            EntityKind::Folder => "Folder",
            EntityKind::File(_) => "File",
            EntityKind::Page(_) => "Page",
            EntityKind::LinkedFile(_) => "Linked File",
            EntityKind::LocalCourse { .. } => "Local Course",
            EntityKind::LocalModule { .. } => "Local Module",
            EntityKind::LocalFile => "Local File",
        }
    }

    /// Ledger type for this kind; local kinds map to their remote counterpart
    #[must_use]
    pub fn entity_type(&self) -> EntityType {
        match self {
            EntityKind::Course { .. } | EntityKind::LocalCourse { .. } => EntityType::Course,
            EntityKind::Module { .. } | EntityKind::LocalModule { .. } => EntityType::Module,
            EntityKind::Folder => EntityType::Folder,
            EntityKind::File(_) | EntityKind::LocalFile => EntityType::File,
            EntityKind::Page(_) => EntityType::Page,
            EntityKind::LinkedFile(_) => EntityType::LinkedFile,
        }
    }

    #[must_use]
    pub fn is_local(&self) -> bool {
        matches!(
            self,
            EntityKind::LocalCourse { .. } | EntityKind::LocalModule { .. } | EntityKind::LocalFile
        )
    }

    /// `true` for kinds that map to a directory on disk
    #[must_use]
    pub fn is_directory(&self) -> bool {
        !matches!(
            self,
            EntityKind::File(_) | EntityKind::LinkedFile(_) | EntityKind::LocalFile
        )
    }

    #[must_use]
    pub fn is_course(&self) -> bool {
        matches!(self, EntityKind::Course { .. } | EntityKind::LocalCourse { .. })
    }

    #[must_use]
    pub fn is_module(&self) -> bool {
        matches!(self, EntityKind::Module { .. } | EntityKind::LocalModule { .. })
    }
}

/// A node description produced by a tree builder, before it is placed
#[derive(Debug, Clone)]
pub struct NewEntity {
    pub id: Option<RemoteId>,
    pub name: EntityName,
    pub kind: EntityKind,
    pub locked: bool,
}

impl NewEntity {
    #[must_use]
    pub fn new(name: EntityName, kind: EntityKind) -> Self {
        Self {
            id: None,
            name,
            kind,
            locked: false,
        }
    }

    #[must_use]
    pub fn with_id(mut self, id: Option<RemoteId>) -> Self {
        self.id = id;
        self
    }

    #[must_use]
    pub fn with_locked(mut self, locked: bool) -> Self {
        self.locked = locked;
        self
    }
}

/// A placed node
#[derive(Debug, Clone)]
pub struct Entity {
    id: Option<RemoteId>,
    name: EntityName,
    sync_path: SyncPath,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    kind: EntityKind,
    locked: bool,
}

impl Entity {
    #[must_use]
    pub fn id(&self) -> Option<&RemoteId> {
        self.id.as_ref()
    }

    #[must_use]
    pub fn name(&self) -> &EntityName {
        &self.name
    }

    #[must_use]
    pub fn sync_path(&self) -> &SyncPath {
        &self.sync_path
    }

    #[must_use]
    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    #[must_use]
    pub fn children(&self) -> &[NodeId] {
        &self.children
    }

    #[must_use]
    pub fn kind(&self) -> &EntityKind {
        &self.kind
    }

    #[must_use]
    pub fn is_locked(&self) -> bool {
        self.locked
    }

    /// Record the id assigned by the LMS, e.g. after a first upload
    pub fn set_id(&mut self, id: RemoteId) {
        self.id = Some(id);
    }
}

impl Display for Entity {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.kind.label(), self.name)
    }
}

/// Arena owning every node of one sync pass
#[derive(Debug, Clone)]
pub struct EntityTree {
    root_path: SyncPath,
    nodes: Vec<Entity>,
    roots: Vec<NodeId>,
}

impl EntityTree {
    /// Create an empty tree whose roots are placed under `root_path`
    #[must_use]
    pub fn new(root_path: SyncPath) -> Self {
        Self {
            root_path,
            nodes: Vec::new(),
            roots: Vec::new(),
        }
    }

    #[must_use]
    pub fn root_path(&self) -> &SyncPath {
        &self.root_path
    }

    /// Top-level nodes in insertion order
    #[must_use]
    pub fn roots(&self) -> &[NodeId] {
        &self.roots
    }

    /// Number of nodes ever placed, detached ones included
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Place a new top-level node
    ///
    /// # Errors
    /// Returns error if the name cannot be joined onto the root path
    pub fn add_root(&mut self, new: NewEntity) -> Result<NodeId, DomainError> {
        let sync_path = self.root_path.join(new.name.as_str())?;
        let id = self.push(new, sync_path, None);
        self.roots.push(id);
        Ok(id)
    }

    /// Replace the children of `parent` with freshly built nodes
    ///
    /// Previous children are detached from the parent; calling this again
    /// with the same input yields the same visible tree.
    ///
    /// # Errors
    /// Returns error if `parent` is unknown or a child name is not a valid
    /// path component
    pub fn replace_children(
        &mut self,
        parent: NodeId,
        children: Vec<NewEntity>,
    ) -> Result<Vec<NodeId>, DomainError> {
        let parent_path = self.entity(parent)?.sync_path.clone();

        let mut placed = Vec::with_capacity(children.len());
        for child in children {
            let sync_path = parent_path.join(child.name.as_str())?;
            placed.push((child, sync_path));
        }

        let ids: Vec<NodeId> = placed
            .into_iter()
            .map(|(child, sync_path)| self.push(child, sync_path, Some(parent)))
            .collect();

        self.entity_mut(parent)?.children = ids.clone();
        Ok(ids)
    }

    /// Look up a node
    ///
    /// # Errors
    /// Returns `DomainError::UnknownNode` for an index from another tree
    pub fn entity(&self, id: NodeId) -> Result<&Entity, DomainError> {
        self.nodes.get(id.0).ok_or(DomainError::UnknownNode(id.0))
    }

    /// Look up a node mutably
    ///
    /// # Errors
    /// Returns `DomainError::UnknownNode` for an index from another tree
    pub fn entity_mut(&mut self, id: NodeId) -> Result<&mut Entity, DomainError> {
        self.nodes
            .get_mut(id.0)
            .ok_or(DomainError::UnknownNode(id.0))
    }

    /// Children of `id`, empty for unknown or unexpanded nodes
    #[must_use]
    pub fn children(&self, id: NodeId) -> &[NodeId] {
        self.nodes
            .get(id.0)
            .map(|e| e.children.as_slice())
            .unwrap_or(&[])
    }

    /// Closest strict ancestor matching `predicate`
    #[must_use]
    pub fn nearest_ancestor<F>(&self, id: NodeId, predicate: F) -> Option<NodeId>
    where
        F: Fn(&EntityKind) -> bool,
    {
        let mut current = self.nodes.get(id.0)?.parent;
        while let Some(node) = current {
            let entity = self.nodes.get(node.0)?;
            if predicate(&entity.kind) {
                return Some(node);
            }
            current = entity.parent;
        }
        None
    }

    /// Number of ancestors; roots have depth 0
    #[must_use]
    pub fn depth(&self, id: NodeId) -> usize {
        let mut depth = 0;
        let mut current = self.nodes.get(id.0).and_then(|e| e.parent);
        while let Some(node) = current {
            depth += 1;
            current = self.nodes.get(node.0).and_then(|e| e.parent);
        }
        depth
    }

    /// `id` and everything reachable below it, depth-first pre-order
    #[must_use]
    pub fn descendants(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack = vec![id];
        while let Some(node) = stack.pop() {
            if self.nodes.get(node.0).is_none() {
                continue;
            }
            out.push(node);
            stack.extend(self.children(node).iter().rev().copied());
        }
        out
    }

    fn push(&mut self, new: NewEntity, sync_path: SyncPath, parent: Option<NodeId>) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(Entity {
            id: new.id,
            name: new.name,
            sync_path,
            parent,
            children: Vec::new(),
            kind: new.kind,
            locked: new.locked,
        });
        id
    }
}
