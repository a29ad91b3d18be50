//! lmsync Canvas - Canvas LMS REST API client
//!
//! Provides an async client for:
//! - Course, module, folder, file and page listings
//! - Authenticated file downloads
//! - The two-phase file upload protocol, including the 3xx confirmation step
//! - Module item creation for uploaded files
//!
//! ## Modules
//!
//! - [`client`] - HTTP client with bearer authentication and status mapping
//! - [`types`] - Canvas JSON response types and their port DTO conversions
//! - [`upload`] - File upload operations
//! - [`provider`] - `ILmsProvider` implementation

pub mod client;
pub mod provider;
pub mod types;
pub mod upload;

pub use client::CanvasClient;
pub use provider::CanvasLmsProvider;

use std::time::Duration;
use thiserror::Error;

/// Errors that can occur when communicating with the Canvas API
#[derive(Debug, Error)]
pub enum CanvasError {
    /// The access token is missing, invalid or expired
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// The user may not access the requested resource
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// The requested resource does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Rate limit exceeded; retry after the specified duration
    #[error("Too many requests, retry after {retry_after:?}")]
    TooManyRequests {
        /// Duration to wait before retrying
        retry_after: Duration,
    },

    /// A server-side error occurred (5xx)
    #[error("Server error: {0}")]
    ServerError(String),

    /// Any other non-success status
    #[error("Unexpected status {status}: {message}")]
    UnexpectedStatus {
        /// HTTP status code
        status: u16,
        /// Response body or reason phrase
        message: String,
    },

    /// A network-level error occurred
    #[error("Network error: {0}")]
    NetworkError(#[from] reqwest::Error),

    /// The API response could not be parsed or was malformed
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

impl CanvasError {
    /// `true` when repeating the request may succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            CanvasError::TooManyRequests { .. } | CanvasError::ServerError(_) => true,
            CanvasError::NetworkError(e) => e.is_timeout() || e.is_connect(),
            _ => false,
        }
    }
}
