//! Upload operations for the Canvas files API
//!
//! Canvas uploads files in up to three steps:
//! - [`request_upload_target`] - tell Canvas about the file and receive an
//!   upload URL plus form parameters
//! - [`send_to_target`] - POST the parameters and the bytes as multipart form
//!   data to that URL, which may belong to a separate storage host
//! - [`confirm_upload`] - when the storage host answers with a redirect (or a
//!   `location` without a file id), GET that location with the token to
//!   finalize the file
//!
//! ## Canvas API References
//!
//! - [File uploads](https://canvas.instructure.com/doc/api/file.file_uploads.html)

use reqwest::header::LOCATION;
use reqwest::multipart::{Form, Part};
use serde::Serialize;
use tracing::{debug, info};

use lmsync_core::ports::{OnDuplicate, UploadDestination, UploadRequest, UploadTarget, UploadedFile};

use crate::client::{check_status, parse_json, CanvasClient};
use crate::types::{CanvasUploadTarget, CanvasUploadedFile};
use crate::CanvasError;

/// Form body of the first upload step
#[derive(Debug, Serialize)]
struct UploadTargetForm<'a> {
    name: &'a str,
    size: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    on_duplicate: Option<OnDuplicate>,
}

/// Builds the API path receiving the upload target request
fn upload_target_path(destination: &UploadDestination) -> String {
    match destination {
        UploadDestination::Course(id) => format!("/api/v1/courses/{}/files", id.as_str()),
        UploadDestination::Folder(id) => format!("/api/v1/folders/{}/files", id.as_str()),
    }
}

// ============================================================================
// Step 1: request_upload_target
// ============================================================================

/// Announces a file to Canvas and returns where its bytes must be sent
///
/// Uses `POST /api/v1/courses/:id/files` or `POST /api/v1/folders/:id/files`.
pub async fn request_upload_target(
    client: &CanvasClient,
    destination: &UploadDestination,
    request: &UploadRequest,
) -> Result<UploadTarget, CanvasError> {
    let path = upload_target_path(destination);
    let form = UploadTargetForm {
        name: &request.name,
        size: request.size,
        on_duplicate: request.on_duplicate,
    };

    let target: CanvasUploadTarget = client.post_form(&path, &form).await?;
    debug!(
        name = %request.name,
        upload_url = %target.upload_url,
        params = target.upload_params.len(),
        "Received upload target"
    );
    Ok(target.into())
}

// ============================================================================
// Step 2: send_to_target
// ============================================================================

/// Sends the file bytes to an upload target and returns the created file
///
/// The parameters are sent as text fields in the order received, followed
/// by the `file` part. A 3xx answer, or a 2xx answer carrying only a
/// `location`, is completed with [`confirm_upload`].
pub async fn send_to_target(
    client: &CanvasClient,
    target: &UploadTarget,
    file_name: &str,
    data: Vec<u8>,
) -> Result<UploadedFile, CanvasError> {
    let size = data.len();
    let mut form = Form::new();
    for (key, value) in &target.upload_params {
        form = form.text(key.clone(), value.clone());
    }
    form = form.part("file", Part::bytes(data).file_name(file_name.to_string()));

    debug!(file_name, size, url = %target.upload_url, "Sending upload payload");

    let response = client
        .upload_request(&target.upload_url)
        .multipart(form)
        .send()
        .await?;
    let response = check_status(response).await?;

    if response.status().is_redirection() {
        let location = response
            .headers()
            .get(LOCATION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| {
                CanvasError::InvalidResponse("upload redirect without Location header".into())
            })?;
        return confirm_upload(client, &location).await;
    }

    let file: CanvasUploadedFile = parse_json(response).await?;
    match (file.id.is_some(), file.location.clone()) {
        (true, _) => finish(file, file_name),
        (false, Some(location)) => confirm_upload(client, &location).await,
        (false, None) => Err(CanvasError::InvalidResponse(
            "upload answer has neither a file id nor a location".into(),
        )),
    }
}

// ============================================================================
// Step 3: confirm_upload
// ============================================================================

/// Finalizes an upload by fetching its confirmation location
pub async fn confirm_upload(
    client: &CanvasClient,
    location: &str,
) -> Result<UploadedFile, CanvasError> {
    debug!(location, "Confirming upload");

    let response = client.confirm_request(location).send().await?;
    let response = check_status(response).await?;
    if response.status().is_redirection() {
        return Err(CanvasError::UnexpectedStatus {
            status: response.status().as_u16(),
            message: format!("confirmation at {location} redirected again"),
        });
    }

    let file: CanvasUploadedFile = parse_json(response).await?;
    finish(file, location)
}

fn finish(file: CanvasUploadedFile, label: &str) -> Result<UploadedFile, CanvasError> {
    let uploaded = file.into_uploaded().ok_or_else(|| {
        CanvasError::InvalidResponse(format!("upload of {label} returned no file id"))
    })?;
    info!(id = %uploaded.id, "Upload completed");
    Ok(uploaded)
}
