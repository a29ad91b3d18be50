//! Integration tests for listing endpoints
//!
//! Verifies courses, modules, items, folders and pages are fetched from the
//! expected paths, paginated listings are followed and failures carry the
//! retry classification.

use lmsync_core::domain::RemoteId;
use lmsync_core::ports::{ILmsProvider, ModuleItemType, TransportError};
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, ResponseTemplate};

use crate::common;

fn transport_error(err: &anyhow::Error) -> &TransportError {
    err.chain()
        .find_map(|cause| cause.downcast_ref::<TransportError>())
        .expect("error should carry a TransportError")
}

// ============================================================================
// Courses
// ============================================================================

#[tokio::test]
async fn test_list_courses_skips_nameless_entries() {
    let (server, provider) = common::setup_canvas_mock().await;
    common::mount_json(
        &server,
        "/api/v1/courses",
        serde_json::json!([
            {"id": 1, "name": "CS101", "course_code": "CS101"},
            {"id": 2, "access_restricted_by_date": true},
            {"id": 3, "name": "MATH200"}
        ]),
    )
    .await;

    let courses = provider.list_courses().await.unwrap();
    let names: Vec<_> = courses.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(names, vec!["CS101", "MATH200"]);
    assert_eq!(courses[0].id, RemoteId::from(1u64));
}

#[tokio::test]
async fn test_list_courses_follows_next_link() {
    let (server, provider) = common::setup_canvas_mock().await;

    Mock::given(method("GET"))
        .and(path("/api/v1/courses"))
        .and(query_param("page", "2"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(serde_json::json!([{"id": 2, "name": "B"}])),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v1/courses"))
        .and(query_param("per_page", "100"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header(
                    "link",
                    format!("<{}/api/v1/courses?page=2>; rel=\"next\"", server.uri()).as_str(),
                )
                .set_body_json(serde_json::json!([{"id": 1, "name": "A"}])),
        )
        .mount(&server)
        .await;

    let courses = provider.list_courses().await.unwrap();
    let names: Vec<_> = courses.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(names, vec!["A", "B"]);
}

#[tokio::test]
async fn test_non_array_listing_is_empty() {
    let (server, provider) = common::setup_canvas_mock().await;
    common::mount_json(
        &server,
        "/api/v1/courses",
        serde_json::json!({"status": "unauthenticated"}),
    )
    .await;

    assert!(provider.list_courses().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_unauthorized_is_not_retryable() {
    let (server, provider) = common::setup_canvas_mock().await;
    common::mount_status(&server, "/api/v1/courses", 401).await;

    let err = provider.list_courses().await.unwrap_err();
    assert!(!transport_error(&err).is_retryable());
    assert!(format!("{err:#}").contains("Unauthorized"));
}

#[tokio::test]
async fn test_server_error_is_retryable() {
    let (server, provider) = common::setup_canvas_mock().await;
    common::mount_status(&server, "/api/v1/courses/1/modules", 503).await;

    let err = provider.list_modules(&RemoteId::from(1u64)).await.unwrap_err();
    assert!(transport_error(&err).is_retryable());
}

#[tokio::test]
async fn test_rate_limit_is_retryable() {
    let (server, provider) = common::setup_canvas_mock().await;
    Mock::given(method("GET"))
        .and(path("/api/v1/courses"))
        .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "2"))
        .mount(&server)
        .await;

    let err = provider.list_courses().await.unwrap_err();
    assert!(transport_error(&err).is_retryable());
}

// ============================================================================
// Modules and items
// ============================================================================

#[tokio::test]
async fn test_list_modules_and_items() {
    let (server, provider) = common::setup_canvas_mock().await;
    common::mount_json(
        &server,
        "/api/v1/courses/1/modules",
        serde_json::json!([
            {"id": 10, "name": "Week1", "position": 1},
            {"id": 11, "name": "Week2", "position": 2}
        ]),
    )
    .await;
    common::mount_json(
        &server,
        "/api/v1/courses/1/modules/10/items",
        serde_json::json!([
            {"id": 100, "title": "notes.pdf", "type": "File", "content_id": 123},
            {"id": 101, "title": "Intro", "type": "Page", "page_url": "intro"},
            {"id": 102, "title": "Readings", "type": "SubHeader"}
        ]),
    )
    .await;

    let course = RemoteId::from(1u64);
    let modules = provider.list_modules(&course).await.unwrap();
    assert_eq!(modules.len(), 2);
    assert_eq!(modules[0].name, "Week1");

    let items = provider
        .list_items_in_module(&course, &modules[0].id)
        .await
        .unwrap();
    assert_eq!(items.len(), 3);
    assert_eq!(items[0].item_type, ModuleItemType::File);
    assert_eq!(items[0].content_id, Some(RemoteId::from(123u64)));
    assert_eq!(items[1].item_type, ModuleItemType::Page);
    assert_eq!(items[1].page_url.as_deref(), Some("intro"));
    assert!(matches!(items[2].item_type, ModuleItemType::Other(_)));
}

// ============================================================================
// Files, folders and pages
// ============================================================================

#[tokio::test]
async fn test_get_file_by_id() {
    let (server, provider) = common::setup_canvas_mock().await;
    let body = common::file_json(&server, 123, "notes.pdf", "2023-01-01T00:00:00Z");
    common::mount_json(&server, "/api/v1/files/123", body).await;

    let file = provider.get_file_by_id(&RemoteId::from(123u64)).await.unwrap();
    assert_eq!(file.display_name, "notes.pdf");
    assert_eq!(file.modified_at.timestamp(), 1_672_531_200);
    assert_eq!(file.folder_id, Some(RemoteId::from(900u64)));
    assert!(file.url.ends_with("/files/123/download?download_frd=1"));
}

#[tokio::test]
async fn test_get_missing_file_is_not_found() {
    let (server, provider) = common::setup_canvas_mock().await;
    common::mount_status(&server, "/api/v1/files/404", 404).await;

    let err = provider.get_file_by_id(&RemoteId::from(404u64)).await.unwrap_err();
    assert!(format!("{err:#}").contains("Not found"));
    assert!(!transport_error(&err).is_retryable());
}

#[tokio::test]
async fn test_folder_tree_listing() {
    let (server, provider) = common::setup_canvas_mock().await;
    common::mount_json(
        &server,
        "/api/v1/courses/1/folders/root",
        serde_json::json!({"id": 900, "name": "course files", "parent_folder_id": null}),
    )
    .await;
    common::mount_json(
        &server,
        "/api/v1/folders/900/folders",
        serde_json::json!([{"id": 901, "name": "Slides", "parent_folder_id": 900}]),
    )
    .await;
    common::mount_json(
        &server,
        "/api/v1/folders/900/files",
        serde_json::json!([
            common::file_json(&server, 5, "syllabus.pdf", "2023-02-01T10:00:00Z"),
            {"id": 6, "display_name": "hidden.pdf", "updated_at": "2023-02-01T10:00:00Z",
             "locked_for_user": true}
        ]),
    )
    .await;

    let root = provider.get_root_folder(&RemoteId::from(1u64)).await.unwrap();
    assert_eq!(root.id, RemoteId::from(900u64));
    assert_eq!(root.parent_folder_id, None);

    let folders = provider.list_folders_in_folder(&root.id).await.unwrap();
    assert_eq!(folders[0].name, "Slides");

    let files = provider.list_files_in_folder(&root.id).await.unwrap();
    assert_eq!(files.len(), 2);
    assert!(!files[0].locked_for_user);
    assert!(files[1].locked_for_user);
    assert!(files[1].url.is_empty());
}

#[tokio::test]
async fn test_get_page() {
    let (server, provider) = common::setup_canvas_mock().await;
    common::mount_json(
        &server,
        "/api/v1/courses/1/pages/intro",
        serde_json::json!({
            "title": "Intro",
            "body": "<p>See <a href=\"/courses/1/files/5/download\">slides</a></p>",
            "updated_at": "2023-03-01T08:00:00Z",
            "locked_for_user": false
        }),
    )
    .await;

    let page = provider
        .get_page(&RemoteId::from(1u64), "intro")
        .await
        .unwrap();
    assert_eq!(page.title, "Intro");
    assert!(page.body.unwrap().contains("/files/5/"));
    assert!(page.updated_at.is_some());
}
