//! Canvas API client
//!
//! Provides a typed HTTP client for the Canvas REST API. Handles the bearer
//! authentication header, JSON deserialization, `Link` header pagination
//! and the mapping of HTTP status codes to [`CanvasError`].
//!
//! ## Usage
//!
//! ```rust,no_run
//! use lmsync_canvas::client::CanvasClient;
//! use lmsync_canvas::types::CanvasCourse;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let client = CanvasClient::new("https://school.instructure.com", "access-token-here")?;
//! let courses: Vec<CanvasCourse> = client.get_json_list("/api/v1/courses?per_page=100").await?;
//! println!("{} courses", courses.len());
//! # Ok(())
//! # }
//! ```

use std::time::Duration;

use reqwest::header::{HeaderMap, LINK, RETRY_AFTER};
use reqwest::{redirect, Client, Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};
use url::Url;

use crate::CanvasError;

/// Default retry-after duration when the header is missing
const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(30);

/// Upper bound on pages followed for one listing
const MAX_PAGES: usize = 100;

/// HTTP client for Canvas API calls
///
/// Holds two `reqwest` clients: the default one follows redirects (file
/// downloads redirect to storage hosts), the upload one does not, so the
/// 3xx answer of an upload POST can be observed and confirmed.
#[derive(Debug, Clone)]
pub struct CanvasClient {
    client: Client,
    upload_client: Client,
    base_url: String,
    access_token: String,
}

impl CanvasClient {
    /// Creates a new client for the Canvas instance at `base_url`
    ///
    /// # Arguments
    /// * `base_url` - Scheme and host of the instance, e.g. `https://school.instructure.com`
    /// * `access_token` - A personal access token
    pub fn new(
        base_url: impl Into<String>,
        access_token: impl Into<String>,
    ) -> Result<Self, CanvasError> {
        let upload_client = Client::builder()
            .redirect(redirect::Policy::none())
            .build()?;

        Ok(Self {
            client: Client::new(),
            upload_client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            access_token: access_token.into(),
        })
    }

    /// Returns the base URL for API requests
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Creates an authenticated request builder for a path on this instance
    ///
    /// # Arguments
    /// * `method` - HTTP method
    /// * `path` - API path relative to base URL (e.g., "/api/v1/courses")
    pub fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}{}", self.base_url, path);
        self.client
            .request(method, &url)
            .bearer_auth(&self.access_token)
    }

    /// Creates a request for an absolute URL
    ///
    /// The token is only attached when the URL has the scheme, host and port
    /// of this instance.
    pub fn request_url(&self, method: Method, url: &str) -> RequestBuilder {
        let builder = self.client.request(method, url);
        if self.is_own_url(url) {
            builder.bearer_auth(&self.access_token)
        } else {
            builder
        }
    }

    /// Request builder on the non-redirecting client, without authentication
    pub(crate) fn upload_request(&self, url: &str) -> RequestBuilder {
        self.upload_client.post(url)
    }

    /// Authenticated GET on the non-redirecting client
    pub(crate) fn confirm_request(&self, url: &str) -> RequestBuilder {
        self.upload_client.get(url).bearer_auth(&self.access_token)
    }

    fn is_own_url(&self, url: &str) -> bool {
        let (Ok(base), Ok(target)) = (Url::parse(&self.base_url), Url::parse(url)) else {
            return false;
        };
        base.scheme() == target.scheme()
            && base.host_str() == target.host_str()
            && base.port_or_known_default() == target.port_or_known_default()
    }

    /// GET a single JSON object
    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, CanvasError> {
        debug!(path, "GET");
        let response = self.request(Method::GET, path).send().await?;
        let response = check_status(response).await?;
        parse_json(response).await
    }

    /// GET a JSON array, following `Link: <...>; rel="next"` pages
    ///
    /// A response that is not an array yields an empty list.
    pub async fn get_json_list<T: DeserializeOwned>(
        &self,
        path: &str,
    ) -> Result<Vec<T>, CanvasError> {
        let mut items = Vec::new();
        let mut response = self.request(Method::GET, path).send().await?;

        for page in 0..MAX_PAGES {
            let response_ok = check_status(response).await?;
            let next = next_link(response_ok.headers());
            let value: serde_json::Value = parse_json(response_ok).await?;

            match value {
                serde_json::Value::Array(values) => {
                    for value in values {
                        let item = serde_json::from_value(value)
                            .map_err(|e| CanvasError::InvalidResponse(format!("{path}: {e}")))?;
                        items.push(item);
                    }
                }
                other => {
                    debug!(path, kind = json_kind(&other), "Expected a JSON array, treating as empty");
                }
            }

            match next {
                Some(url) => {
                    debug!(path, page = page + 1, "Following next page");
                    response = self.request_url(Method::GET, &url).send().await?;
                }
                None => return Ok(items),
            }
        }

        warn!(path, pages = MAX_PAGES, "Stopped following pagination links");
        Ok(items)
    }

    /// POST a URL-encoded form and decode the JSON answer
    pub async fn post_form<F, T>(&self, path: &str, form: &F) -> Result<T, CanvasError>
    where
        F: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        debug!(path, "POST form");
        let response = self.request(Method::POST, path).form(form).send().await?;
        let response = check_status(response).await?;
        parse_json(response).await
    }

    /// POST a JSON body and decode the JSON answer
    pub async fn post_json<B, T>(&self, path: &str, body: &B) -> Result<T, CanvasError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        debug!(path, "POST json");
        let response = self.request(Method::POST, path).json(body).send().await?;
        let response = check_status(response).await?;
        parse_json(response).await
    }

    /// Downloads the bytes behind a file URL
    ///
    /// Relative URLs are resolved against the base URL. Redirects to
    /// storage hosts are followed without the token.
    pub async fn download(&self, url: &str) -> Result<Vec<u8>, CanvasError> {
        let response = if url.starts_with('/') {
            self.request(Method::GET, url).send().await?
        } else {
            self.request_url(Method::GET, url).send().await?
        };
        let response = check_status(response).await?;
        let bytes = response.bytes().await?;

        debug!(bytes = bytes.len(), "Downloaded file payload");
        Ok(bytes.to_vec())
    }
}

// ============================================================================
// Response handling
// ============================================================================

/// Maps non-success statuses to [`CanvasError`]; 2xx and 3xx pass through
pub async fn check_status(response: Response) -> Result<Response, CanvasError> {
    let status = response.status();
    if status.is_success() || status.is_redirection() {
        return Ok(response);
    }

    let retry_after = response
        .headers()
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .map(|v| parse_retry_after(v, DEFAULT_RETRY_AFTER))
        .unwrap_or(DEFAULT_RETRY_AFTER);
    let url = response.url().path().to_string();
    let body = response.text().await.unwrap_or_default();
    let message = if body.trim().is_empty() {
        format!("{url} ({})", status.canonical_reason().unwrap_or("no reason"))
    } else {
        format!("{url}: {}", body.trim())
    };

    Err(match status {
        StatusCode::UNAUTHORIZED => CanvasError::Unauthorized(message),
        StatusCode::FORBIDDEN => CanvasError::Forbidden(message),
        StatusCode::NOT_FOUND => CanvasError::NotFound(message),
        StatusCode::TOO_MANY_REQUESTS => CanvasError::TooManyRequests { retry_after },
        s if s.is_server_error() => CanvasError::ServerError(message),
        s => CanvasError::UnexpectedStatus {
            status: s.as_u16(),
            message,
        },
    })
}

pub(crate) async fn parse_json<T: DeserializeOwned>(response: Response) -> Result<T, CanvasError> {
    let url = response.url().path().to_string();
    let bytes = response.bytes().await?;
    serde_json::from_slice(&bytes).map_err(|e| CanvasError::InvalidResponse(format!("{url}: {e}")))
}

/// Extracts the `rel="next"` target of a `Link` header
pub fn next_link(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(LINK)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .find_map(|entry| {
            let mut parts = entry.split(';');
            let target = parts.next()?.trim();
            let is_next = parts.any(|p| {
                let p = p.trim();
                p == "rel=\"next\"" || p == "rel=next"
            });
            if is_next {
                target
                    .strip_prefix('<')
                    .and_then(|t| t.strip_suffix('>'))
                    .map(str::to_string)
            } else {
                None
            }
        })
}

/// Parses a `Retry-After` header value (seconds or HTTP date)
pub fn parse_retry_after(value: &str, default: Duration) -> Duration {
    if let Ok(seconds) = value.trim().parse::<u64>() {
        return Duration::from_secs(seconds);
    }

    if let Ok(date) = chrono::DateTime::parse_from_rfc2822(value.trim()) {
        let now = chrono::Utc::now();
        let target = date.with_timezone(&chrono::Utc);
        if target > now {
            if let Ok(secs) = u64::try_from((target - now).num_seconds()) {
                if secs <= 3600 {
                    return Duration::from_secs(secs);
                }
            }
        }
    }

    warn!(value, "Could not parse Retry-After header, using default");
    default
}

fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "bool",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}
