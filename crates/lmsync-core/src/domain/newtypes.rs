//! Validated identifiers, names and paths
//!
//! A value of any of these types has passed its checks; code holding a
//! `SyncPath` or `EntityName` never re-validates it.

use std::fmt::{self, Display, Formatter};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::errors::DomainError;

// ============================================================================
// Session identifier
// ============================================================================

/// Identifier for one sync pass (tree construction plus one traversal)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(Uuid);

impl SessionId {
    /// Create a new random SessionId
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Get the inner UUID value
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for SessionId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for SessionId {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|e| DomainError::InvalidId(format!("Invalid SessionId: {e}")))
    }
}

// ============================================================================
// Path types
// ============================================================================

/// A lexically normalized absolute path (no `.` or `..` components),
/// optionally checked to lie under the sync root
///
/// The history ledger stores and compares paths in this form, so two
/// spellings of the same location (`/a/./b`, `/a/c/../b`) look up the
/// same record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "PathBuf", into = "PathBuf")]
pub struct SyncPath(PathBuf);

impl SyncPath {
    /// Create a new SyncPath, validating it is absolute
    ///
    /// # Errors
    /// Returns `DomainError::InvalidPath` if the path is not absolute
    pub fn new(path: PathBuf) -> Result<Self, DomainError> {
        if !path.is_absolute() {
            return Err(DomainError::InvalidPath(format!(
                "Path must be absolute: {}",
                path.display()
            )));
        }

        // Lexical only: the path might not exist yet
        let normalized = Self::normalize_path(&path)?;
        Ok(Self(normalized))
    }

    /// Get the inner path reference
    #[must_use]
    pub fn as_path(&self) -> &Path {
        &self.0
    }

    /// Convert to owned PathBuf
    #[must_use]
    pub fn into_path_buf(self) -> PathBuf {
        self.0
    }

    /// Append a single path component
    ///
    /// # Errors
    /// Returns error if the component is empty, a dot entry, or contains a separator
    pub fn join(&self, component: &str) -> Result<Self, DomainError> {
        if !is_single_component(component) {
            return Err(DomainError::InvalidPath(format!(
                "Invalid path component: {component:?}"
            )));
        }

        Ok(Self(self.0.join(component)))
    }

    /// The containing directory, `None` for the filesystem root
    #[must_use]
    pub fn parent(&self) -> Option<Self> {
        self.0.parent().map(|p| Self(p.to_path_buf()))
    }

    /// Last component as UTF-8, if any
    #[must_use]
    pub fn file_name(&self) -> Option<&str> {
        self.0.file_name().and_then(|n| n.to_str())
    }

    /// Normalize a path by resolving . and .. components
    fn normalize_path(path: &Path) -> Result<PathBuf, DomainError> {
        use std::path::Component;

        let mut normalized = PathBuf::new();

        for component in path.components() {
            match component {
                Component::Prefix(p) => normalized.push(p.as_os_str()),
                Component::RootDir => normalized.push("/"),
                Component::CurDir => {}
                Component::ParentDir => {
                    if !normalized.pop() {
                        return Err(DomainError::InvalidPath(
                            "Path escapes root via ..".to_string(),
                        ));
                    }
                }
                Component::Normal(c) => normalized.push(c),
            }
        }

        Ok(normalized)
    }
}

impl Display for SyncPath {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.display())
    }
}

impl TryFrom<PathBuf> for SyncPath {
    type Error = DomainError;

    fn try_from(path: PathBuf) -> Result<Self, Self::Error> {
        Self::new(path)
    }
}

impl From<SyncPath> for PathBuf {
    fn from(sync_path: SyncPath) -> Self {
        sync_path.0
    }
}

impl AsRef<Path> for SyncPath {
    fn as_ref(&self) -> &Path {
        &self.0
    }
}

// ============================================================================
// LMS identifiers and names
// ============================================================================

/// Opaque LMS object identifier
///
/// Canvas ids are numeric (`123`) or shard-qualified (`10000~123`); they
/// are kept as strings so nothing here depends on the numeric form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RemoteId(String);

impl RemoteId {
    /// Create a new RemoteId
    ///
    /// # Errors
    /// Returns error if the ID is empty or contains characters that cannot
    /// appear in a URL path segment unescaped
    pub fn new(id: String) -> Result<Self, DomainError> {
        if id.is_empty() {
            return Err(DomainError::InvalidRemoteId(
                "Remote ID cannot be empty".to_string(),
            ));
        }

        if !id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '~' || c == '-' || c == '_')
        {
            return Err(DomainError::InvalidRemoteId(format!(
                "Remote ID contains invalid characters: {id}"
            )));
        }

        Ok(Self(id))
    }

    /// Get the inner string reference
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for RemoteId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for RemoteId {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s.to_string())
    }
}

impl TryFrom<String> for RemoteId {
    type Error = DomainError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::new(s)
    }
}

impl From<RemoteId> for String {
    fn from(id: RemoteId) -> Self {
        id.0
    }
}

impl From<u64> for RemoteId {
    fn from(id: u64) -> Self {
        Self(id.to_string())
    }
}

/// `true` for a name that [`SyncPath::join`] accepts as one component
///
/// Both separators are refused on every platform so a tree built on Linux
/// never holds a name another system would split.
fn is_single_component(name: &str) -> bool {
    !(name.is_empty() || name == "." || name == ".." || name.contains(&['/', '\\'][..]))
}

/// Characters that are replaced when a remote display name becomes a path component
const ILLEGAL_NAME_CHARS: &[char] = &['/', '\\', ':', '*', '?', '"', '<', '>', '|'];

/// Placeholder used when sanitizing leaves nothing usable
const EMPTY_NAME_PLACEHOLDER: &str = "untitled";

/// A display name that is safe to use as a single path component
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityName(String);

impl EntityName {
    /// Sanitize a remote display name
    ///
    /// Separators and characters reserved on common filesystems become `-`,
    /// control characters are dropped, surrounding whitespace and trailing
    /// dots are trimmed.
    #[must_use]
    pub fn sanitized(raw: &str) -> Self {
        let replaced: String = raw
            .chars()
            .filter(|c| !c.is_control())
            .map(|c| if ILLEGAL_NAME_CHARS.contains(&c) { '-' } else { c })
            .collect();

        let trimmed = replaced.trim().trim_end_matches('.').trim_end();

        if trimmed.is_empty() {
            Self(EMPTY_NAME_PLACEHOLDER.to_string())
        } else {
            Self(trimmed.to_string())
        }
    }

    /// Wrap a name read from the local filesystem
    ///
    /// # Errors
    /// Returns error if the name is not a single path component
    pub fn from_local(name: &str) -> Result<Self, DomainError> {
        if !is_single_component(name) {
            return Err(DomainError::InvalidPath(format!(
                "Not a single path component: {name:?}"
            )));
        }
        Ok(Self(name.to_string()))
    }

    /// Get the inner string reference
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for EntityName {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
