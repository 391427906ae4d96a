//! Integration tests for the subscription publisher

use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    Router,
};
use tempfile::TempDir;
use tower::ServiceExt; // For `oneshot` method
use tunnelsub_api::{ApiServer, ApiServerConfig};
use tunnelsub_links::{SubscriptionDocument, SubscriptionStore};

fn create_test_router(temp: &TempDir) -> (Router, SubscriptionStore) {
    let store = SubscriptionStore::new(temp.path().join("sub.txt"));
    let config = ApiServerConfig {
        bind_addr: "127.0.0.1:0".parse().unwrap(),
        subscription_path: "sub".to_string(),
    };
    let server = ApiServer::new(config, store.clone());
    (server.build_router(), store)
}

async fn get(router: Router, uri: &str) -> (StatusCode, Option<String>, Vec<u8>) {
    let request = Request::builder().uri(uri).body(Body::empty()).unwrap();
    let response = router.oneshot(request).await.unwrap();

    let status = response.status();
    let content_type = response
        .headers()
        .get(header::CONTENT_TYPE)
        .map(|v| v.to_str().unwrap().to_string());
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, content_type, body.to_vec())
}

#[tokio::test]
async fn test_root_greeting() {
    let temp = TempDir::new().unwrap();
    let (router, _) = create_test_router(&temp);

    let (status, _, body) = get(router, "/").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, b"Hello World");
}

#[tokio::test]
async fn test_subscription_missing_before_publish() {
    let temp = TempDir::new().unwrap();
    let (router, _) = create_test_router(&temp);

    let (status, _, _) = get(router, "/sub").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_subscription_served_after_publish() {
    let temp = TempDir::new().unwrap();
    let (router, store) = create_test_router(&temp);

    let document = SubscriptionDocument::from_encoded("dmxlc3M6Ly9leGFtcGxl");
    store.write(&document).await.unwrap();

    let (status, content_type, body) = get(router, "/sub").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(content_type.as_deref(), Some("text/plain; charset=utf-8"));
    assert_eq!(body, document.as_str().as_bytes());
}

#[tokio::test]
async fn test_unknown_path_is_not_found() {
    let temp = TempDir::new().unwrap();
    let (router, store) = create_test_router(&temp);
    store
        .write(&SubscriptionDocument::from_encoded("abc"))
        .await
        .unwrap();

    let (status, _, _) = get(router.clone(), "/other").await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _, _) = get(router, "/sub/extra").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[cfg(unix)]
#[tokio::test]
async fn test_unreadable_subscription_is_server_error() {
    let temp = TempDir::new().unwrap();
    let (router, store) = create_test_router(&temp);
    // A directory in place of the file cannot be read as one
    std::fs::create_dir(store.path()).unwrap();

    let (status, _, _) = get(router, "/sub").await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
}
