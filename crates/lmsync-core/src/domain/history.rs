//! History ledger records
//!
//! A [`HistoryRecord`] remembers one successful transfer: which remote object
//! (`id`) was written to which local `path`, with which modification time and
//! entity type. Records are keyed by `(path, type)`; ids can change when a
//! file is re-uploaded, paths cannot.
//!
//! Timestamps are kept at whole-second precision. Filesystems, the ledger
//! text format and the LMS API disagree about sub-second digits, and every
//! comparison in the sync protocol is made on seconds.

use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use super::entity::{Entity, EntityKind};
use super::errors::DomainError;
use super::newtypes::{RemoteId, SyncPath};

/// Value of the ledger `type` column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Course,
    Module,
    Folder,
    File,
    Page,
    LinkedFile,
}

impl EntityType {
    /// Column value as written to the ledger
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Course => "course",
            EntityType::Module => "module",
            EntityType::Folder => "folder",
            EntityType::File => "file",
            EntityType::Page => "page",
            EntityType::LinkedFile => "linked_file",
        }
    }
}

impl Display for EntityType {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityType {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "course" => Ok(EntityType::Course),
            "module" => Ok(EntityType::Module),
            "folder" => Ok(EntityType::Folder),
            "file" => Ok(EntityType::File),
            "page" => Ok(EntityType::Page),
            "linked_file" => Ok(EntityType::LinkedFile),
            other => Err(DomainError::UnknownEntityType(other.to_string())),
        }
    }
}

/// One row of the history ledger
///
/// Field order matches the on-disk column order `id,path,modified_at,type`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub id: Option<RemoteId>,
    pub path: SyncPath,
    #[serde(with = "rfc3339_seconds")]
    pub modified_at: DateTime<Utc>,
    #[serde(rename = "type")]
    pub entity_type: EntityType,
}

impl HistoryRecord {
    /// Create a record, truncating `modified_at` to whole seconds
    #[must_use]
    pub fn new(
        id: Option<RemoteId>,
        path: SyncPath,
        modified_at: DateTime<Utc>,
        entity_type: EntityType,
    ) -> Self {
        Self {
            id,
            path,
            modified_at: truncate_to_seconds(modified_at),
            entity_type,
        }
    }

    /// Build the record for an entity whose local modification time was just observed
    ///
    /// Only locally sourced files are tracked this way; every other kind
    /// returns `None`.
    #[must_use]
    pub fn for_entity(entity: &Entity, observed_modified_at: DateTime<Utc>) -> Option<Self> {
        match entity.kind() {
            EntityKind::LocalFile => Some(Self::new(
                entity.id().cloned(),
                entity.sync_path().clone(),
                observed_modified_at,
                EntityType::File,
            )),
            _ => None,
        }
    }

    /// `true` when `other` has the same `(path, type)` key
    #[must_use]
    pub fn same_key(&self, other: &HistoryRecord) -> bool {
        self.path == other.path && self.entity_type == other.entity_type
    }

    /// `true` when a local modification time is strictly newer than this record
    #[must_use]
    pub fn is_older_than(&self, local_modified_at: DateTime<Utc>) -> bool {
        local_modified_at.timestamp() > self.modified_at.timestamp()
    }
}

/// Drop the sub-second part of a timestamp
#[must_use]
pub fn truncate_to_seconds(at: DateTime<Utc>) -> DateTime<Utc> {
    DateTime::from_timestamp(at.timestamp(), 0).unwrap_or(at)
}

/// Whole-second equality used by the download skip check
#[must_use]
pub fn same_second(a: DateTime<Utc>, b: DateTime<Utc>) -> bool {
    a.timestamp() == b.timestamp()
}

/// Format a timestamp the way the ledger stores it (`2023-01-01T00:00:00Z`)
#[must_use]
pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Parse any RFC 3339 timestamp into UTC
///
/// # Errors
/// Returns `DomainError::ValidationFailed` for text that is not RFC 3339
pub fn parse_timestamp(text: &str) -> Result<DateTime<Utc>, DomainError> {
    DateTime::parse_from_rfc3339(text.trim())
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| DomainError::ValidationFailed(format!("Invalid timestamp {text:?}: {e}")))
}

mod rfc3339_seconds {
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(at: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&super::format_timestamp(*at))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
        let text = String::deserialize(deserializer)?;
        super::parse_timestamp(&text)
            .map(super::truncate_to_seconds)
            .map_err(serde::de::Error::custom)
    }
}
