//! lmsync History - the persistent sync ledger
//!
//! A flat CSV file with one row per successfully transferred entity:
//!
//! ```text
//! id,path,modified_at,type
//! 123,/home/user/Canvas/CS101/Week1/notes.pdf,2023-01-01T00:00:00Z,file
//! ```
//!
//! ## Architecture
//!
//! This crate implements the `IHistoryRepository` port from `lmsync-core`.
//! It is a driven (secondary) adapter in the hexagonal architecture.
//!
//! ## Key Components
//!
//! - [`CsvHistoryLedger`] - In-memory ledger mirrored to a CSV file
//! - [`HistoryError`] - Error types for ledger operations
//!
//! ## Usage
//!
//! ```no_run
//! use lmsync_history::CsvHistoryLedger;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let ledger = CsvHistoryLedger::load("/home/user/Canvas/.lmsync-history.csv").await;
//! // Use ledger as IHistoryRepository...
//! # Ok(())
//! # }
//! ```

pub mod ledger;

pub use ledger::{CsvHistoryLedger, LEDGER_HEADER};

/// Errors that can occur while reading or writing the ledger
#[derive(Debug, thiserror::Error)]
pub enum HistoryError {
    /// The ledger file could not be read or written
    #[error("Ledger I/O failed: {0}")]
    Io(#[from] std::io::Error),

    /// A row could not be encoded or decoded
    #[error("Ledger format error: {0}")]
    Format(#[from] csv::Error),

    /// The header row does not match `id,path,modified_at,type`
    #[error("Unexpected ledger header: {0}")]
    UnexpectedHeader(String),
}
