//! Shared test helpers for Canvas API integration tests
//!
//! Each helper mounts the mock endpoints a test needs on a wiremock server.
//! [`setup_canvas_mock`] returns a provider pointing at that server.

use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use lmsync_canvas::{CanvasClient, CanvasLmsProvider};

pub const TEST_TOKEN: &str = "test-access-token";

/// Starts a mock server and returns it with a provider using [`TEST_TOKEN`]
pub async fn setup_canvas_mock() -> (MockServer, CanvasLmsProvider) {
    let server = MockServer::start().await;
    let client = CanvasClient::new(server.uri(), TEST_TOKEN).expect("client");
    (server, CanvasLmsProvider::new(client))
}

/// Mounts a GET endpoint answering with `body`, requiring the bearer token
pub async fn mount_json(server: &MockServer, endpoint: &str, body: serde_json::Value) {
    Mock::given(method("GET"))
        .and(path(endpoint))
        .and(header("authorization", format!("Bearer {TEST_TOKEN}").as_str()))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .mount(server)
        .await;
}

/// Mounts a GET endpoint answering with a bare status
pub async fn mount_status(server: &MockServer, endpoint: &str, status: u16) {
    Mock::given(method("GET"))
        .and(path(endpoint))
        .respond_with(ResponseTemplate::new(status))
        .mount(server)
        .await;
}

/// A Canvas file object as returned by `/api/v1/files/:id`
pub fn file_json(server: &MockServer, id: u64, name: &str, modified_at: &str) -> serde_json::Value {
    serde_json::json!({
        "id": id,
        "display_name": name,
        "filename": name,
        "url": format!("{}/files/{id}/download?download_frd=1", server.uri()),
        "size": 12,
        "modified_at": modified_at,
        "updated_at": modified_at,
        "locked_for_user": false,
        "folder_id": 900
    })
}
