//! Port definitions (hexagonal architecture interfaces)
//!
//! This module defines the port traits that form the boundaries of the
//! hexagonal architecture. Ports are interfaces that the sync engine
//! depends on, but whose implementations live in adapter crates.
//!
//! ## Ports Overview
//!
//! - [`ILmsProvider`] - Course, module, file and page access on the LMS
//! - [`ILocalFileSystem`] - Local sync directory operations
//! - [`IHistoryRepository`] - The persistent history ledger

pub mod history_repository;
pub mod lms_provider;
pub mod local_filesystem;

pub use history_repository::{IHistoryRepository, UpsertOutcome};
pub use lms_provider::{
    CourseInfo, FileInfo, FolderInfo, ILmsProvider, ModuleInfo, ModuleItemInfo, ModuleItemType,
    NewModuleItem, OnDuplicate, PageInfo, TransportError, UploadDestination, UploadRequest,
    UploadTarget, UploadedFile,
};
pub use local_filesystem::{DirectoryListing, FileSystemState, ILocalFileSystem};
