//! Domain error types
//!
//! This module defines error types specific to domain operations:
//! path and identifier validation, tree navigation and history parsing.

use thiserror::Error;

/// Errors that can occur in domain operations
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// Invalid path format or content
    #[error("Invalid path: {0}")]
    InvalidPath(String),

    /// Invalid remote ID format
    #[error("Invalid remote ID: {0}")]
    InvalidRemoteId(String),

    /// ID parsing error
    #[error("Invalid ID format: {0}")]
    InvalidId(String),

    /// Unknown value in the history `type` column
    #[error("Unknown entity type: {0}")]
    UnknownEntityType(String),

    /// A node index that does not belong to the tree
    #[error("Unknown tree node: {0}")]
    UnknownNode(usize),

    /// Generic validation failure
    #[error("Validation failed: {0}")]
    ValidationFailed(String),
}
