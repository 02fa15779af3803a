//! End-to-end HTTP tests driving the full router via `tower::ServiceExt`,
//! covering the lifecycle scenarios from spec.md §8.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;

use axum::body::Body;
use axum::extract::ConnectInfo;
use axum::http::{Request, StatusCode};
use axum::Router;
use bytebin::config::{self, Config};
use bytebin::handlers;
use bytebin::index::ContentIndex;
use bytebin::storage::local::LocalStorage;
use bytebin::storage::selector::BackendSelector;
use bytebin::storage::StorageBackend;
use bytebin::AppState;
use tower::ServiceExt;

fn peer() -> SocketAddr {
    SocketAddr::new(IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)), 9001)
}

async fn test_router(extra_toml: &str) -> (Router, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let toml_str = format!(
        "[database]\nurl = \"sqlite::memory:\"\n\n[storage]\n[storage.local]\npath = \"{}\"\n{extra_toml}",
        dir.path().display(),
    );

    let config: Config = config::load_config_str(&toml_str).unwrap();
    let backend: Arc<dyn StorageBackend> = Arc::new(LocalStorage::new("local", config.storage.local.path.clone()));
    let selector = BackendSelector::always(backend.clone());
    let index = ContentIndex::connect(&config.database.url).await.unwrap();
    let state = AppState::new(config, index, vec![backend], selector).await.unwrap();

    (handlers::router(state), dir)
}

fn request(method: &str, uri: &str) -> axum::http::request::Builder {
    Request::builder()
        .method(method)
        .uri(uri)
        .extension(ConnectInfo(peer()))
}

async fn body_bytes(response: axum::response::Response) -> Vec<u8> {
    hyper::body::to_bytes(response.into_body()).await.unwrap().to_vec()
}

#[tokio::test]
async fn post_then_get_round_trips_bytes_and_content_type() {
    let (router, _dir) = test_router("").await;

    let post_response = router
        .clone()
        .oneshot(
            request("POST", "/post")
                .header("content-type", "text/plain")
                .body(Body::from("hello world"))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(post_response.status(), StatusCode::CREATED);
    let location = post_response.headers().get("location").unwrap().to_str().unwrap().to_string();

    let get_response = router
        .clone()
        .oneshot(request("GET", &format!("/{location}")).body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(get_response.status(), StatusCode::OK);
    assert_eq!(get_response.headers().get("content-type").unwrap(), "text/plain");
    assert_eq!(body_bytes(get_response).await, b"hello world");
}

#[tokio::test]
async fn server_compresses_uncompressed_uploads_and_decompresses_for_plain_clients() {
    let (router, _dir) = test_router("").await;

    let post_response = router
        .clone()
        .oneshot(
            request("POST", "/post")
                .header("content-type", "application/json")
                .body(Body::from("{\"a\":1}"))
                .unwrap(),
        )
        .await
        .unwrap();
    let location = post_response.headers().get("location").unwrap().to_str().unwrap().to_string();

    // A client that does not advertise gzip support gets plain bytes back.
    let get_response = router
        .clone()
        .oneshot(
            request("GET", &format!("/{location}"))
                .header("accept-encoding", "identity")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(get_response.status(), StatusCode::OK);
    assert!(get_response.headers().get("content-encoding").is_none());
    assert_eq!(body_bytes(get_response).await, b"{\"a\":1}");
}

#[tokio::test]
async fn post_rejects_empty_body() {
    let (router, _dir) = test_router("").await;
    let response = router
        .oneshot(request("POST", "/post").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn get_rejects_invalid_key_shape() {
    let (router, _dir) = test_router("").await;
    let response = router
        .oneshot(request("GET", "/not-a-valid-key").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn get_of_unknown_key_is_not_found() {
    let (router, _dir) = test_router("").await;
    let response = router
        .oneshot(request("GET", "/abcdefg").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn post_rate_limit_rejects_past_the_configured_maximum() {
    let (router, _dir) = test_router(
        "\n[rate-limits.post]\nperiod_minutes = 1\nmax_actions = 1\n\
         [rate-limits.update]\nperiod_minutes = 1\nmax_actions = 4\n\
         [rate-limits.get]\nperiod_minutes = 1\nmax_actions = 60\n\
         [rate-limits.not_found]\nperiod_minutes = 1\nmax_actions = 20\n",
    )
    .await;

    let first = router
        .clone()
        .oneshot(request("POST", "/post").body(Body::from("a")).unwrap())
        .await
        .unwrap();
    assert_eq!(first.status(), StatusCode::CREATED);

    let second = router
        .oneshot(request("POST", "/post").body(Body::from("b")).unwrap())
        .await
        .unwrap();
    assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);
}

#[tokio::test]
async fn modifiable_content_can_be_updated_with_its_auth_key_and_rejected_without_it() {
    let (router, _dir) = test_router("").await;

    let post_response = router
        .clone()
        .oneshot(
            request("POST", "/post")
                .header("content-type", "text/plain")
                .header("allow-modification", "true")
                .body(Body::from("v1"))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(post_response.status(), StatusCode::CREATED);
    let key = post_response.headers().get("location").unwrap().to_str().unwrap().to_string();
    let auth_key = post_response.headers().get("modification-key").unwrap().to_str().unwrap().to_string();

    let unauthorized = router
        .clone()
        .oneshot(
            request("PUT", &format!("/{key}"))
                .header("content-type", "text/plain")
                .body(Body::from("v2"))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(unauthorized.status(), StatusCode::UNAUTHORIZED);

    let updated = router
        .clone()
        .oneshot(
            request("PUT", &format!("/{key}"))
                .header("content-type", "text/plain")
                .header("authorization", format!("Bearer {auth_key}"))
                .body(Body::from("v2"))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(updated.status(), StatusCode::OK);

    let get_response = router
        .oneshot(
            request("GET", &format!("/{key}"))
                .header("accept-encoding", "identity")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(body_bytes(get_response).await, b"v2");
}

#[tokio::test]
async fn immutable_content_rejects_update_attempts() {
    let (router, _dir) = test_router("").await;

    let post_response = router
        .clone()
        .oneshot(request("POST", "/post").body(Body::from("v1")).unwrap())
        .await
        .unwrap();
    let key = post_response.headers().get("location").unwrap().to_str().unwrap().to_string();

    let response = router
        .oneshot(
            request("PUT", &format!("/{key}"))
                .header("authorization", "Bearer anything")
                .body(Body::from("v2"))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn health_check_reports_ok() {
    let (router, _dir) = test_router("").await;
    let response = router
        .oneshot(request("GET", "/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn admin_bulk_delete_requires_a_valid_admin_key() {
    let (router, _dir) = test_router("\n[auth]\nadmin-keys = [\"admin-secret\"]\n").await;

    let post_response = router
        .clone()
        .oneshot(request("POST", "/post").body(Body::from("payload")).unwrap())
        .await
        .unwrap();
    let key = post_response.headers().get("location").unwrap().to_str().unwrap().to_string();

    let denied = router
        .clone()
        .oneshot(
            request("POST", "/admin/bulkdelete")
                .header("content-type", "application/json")
                .body(Body::from(format!("[\"{key}\"]")))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(denied.status(), StatusCode::UNAUTHORIZED);

    let allowed = router
        .clone()
        .oneshot(
            request("POST", "/admin/bulkdelete")
                .header("content-type", "application/json")
                .header("bytebin-api-key", "admin-secret")
                .body(Body::from(format!("[\"{key}\"]")))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(allowed.status(), StatusCode::OK);

    let get_response = router
        .oneshot(request("GET", &format!("/{key}")).body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(get_response.status(), StatusCode::NOT_FOUND);
}
