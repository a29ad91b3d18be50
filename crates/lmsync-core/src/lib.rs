//! lmsync Core - Domain logic and port definitions
//!
//! This crate contains the hexagonal architecture core with:
//! - **Domain types** - `SyncPath`, `RemoteId`, `EntityName`, the `EntityTree` arena
//!   and `HistoryRecord`
//! - **Port definitions** - Traits for adapters: `ILmsProvider`, `ILocalFileSystem`,
//!   `IHistoryRepository`
//! - **Configuration** - the YAML-backed `Config`
//!
//! # Architecture
//!
//! The domain module is pure data and rules with no I/O. Ports define the
//! trait interfaces that the adapter crates (`lmsync-canvas`, `lmsync-history`,
//! `lmsync-sync`) implement.

pub mod config;
pub mod domain;
pub mod ports;
