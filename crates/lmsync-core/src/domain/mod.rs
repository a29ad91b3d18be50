//! Domain entities and business logic
//!
//! This module contains the core domain types for lmsync:
//! - Newtypes for validated paths, identifiers and names
//! - The entity tree arena mirroring the LMS hierarchy
//! - History ledger records
//! - Domain-specific error types

pub mod entity;
pub mod errors;
pub mod history;
pub mod newtypes;

// Re-export commonly used types
pub use entity::{Entity, EntityKind, EntityTree, NewEntity, NodeId, PageMeta, RemoteFileMeta};
pub use errors::DomainError;
pub use history::{EntityType, HistoryRecord};
pub use newtypes::*;
