use axum::{
    Router,
    body::{Body, to_bytes},
    http::{Method, Request, StatusCode, header},
    response::Response,
};
use segment_fs::{
    driver::{Driver, DriverOptions},
    routes::routes::routes,
    store::{ObjectStore, memory::MemoryStore},
};
use serde_json::{Value, json};
use std::sync::Arc;
use tower::ServiceExt;

async fn app() -> (Arc<MemoryStore>, Router) {
    let store = Arc::new(MemoryStore::default());
    let driver = Driver::new(
        store.clone() as Arc<dyn ObjectStore>,
        DriverOptions::new("files").with_chunk_size(5),
    )
    .await
    .unwrap();
    (store, routes().with_state(driver))
}

async fn send(app: &Router, method: Method, uri: &str, body: Body) -> Response {
    app.clone()
        .oneshot(
            Request::builder()
                .method(method)
                .uri(uri)
                .body(body)
                .unwrap(),
        )
        .await
        .unwrap()
}

async fn body_bytes(response: Response) -> Vec<u8> {
    to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap()
        .to_vec()
}

async fn body_json(response: Response) -> Value {
    serde_json::from_slice(&body_bytes(response).await).unwrap()
}

#[tokio::test]
async fn health_endpoints() {
    let (_, app) = app().await;

    let response = send(&app, Method::GET, "/healthz", Body::empty()).await;
    assert_eq!(response.status(), StatusCode::OK);

    let response = send(&app, Method::GET, "/readyz", Body::empty()).await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["driver"], "swift");
    assert_eq!(body["checks"]["store"]["ok"], true);
}

#[tokio::test]
async fn patch_writes_at_offsets_and_get_reads_back() {
    let (_, app) = app().await;

    let response = send(
        &app,
        Method::PATCH,
        "/files/logs/app.log?offset=0",
        Body::from("ABCDEFGHIJ"),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        body_json(response).await,
        json!({ "path": "/logs/app.log", "offset": 0, "bytes_written": 10 })
    );

    let response = send(
        &app,
        Method::PATCH,
        "/files/logs/app.log?offset=3",
        Body::from("xy"),
    )
    .await;
    assert_eq!(body_json(response).await["bytes_written"], 2);

    let response = send(&app, Method::GET, "/files/logs/app.log", Body::empty()).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_bytes(response).await, b"ABCxyFGHIJ");

    let response = send(
        &app,
        Method::GET,
        "/files/logs/app.log?offset=8",
        Body::empty(),
    )
    .await;
    assert_eq!(body_bytes(response).await, b"IJ");

    let response = send(
        &app,
        Method::GET,
        "/files/logs/app.log?offset=10",
        Body::empty(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(body_bytes(response).await.is_empty());
}

#[tokio::test]
async fn put_stat_head_and_list() {
    let (_, app) = app().await;

    let response = send(&app, Method::PUT, "/files/d/a.txt", Body::from("hello")).await;
    assert_eq!(response.status(), StatusCode::CREATED);

    let response = send(&app, Method::HEAD, "/files/d/a.txt", Body::empty()).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_LENGTH], "5");
    assert!(response.headers().contains_key(header::LAST_MODIFIED));

    let response = send(&app, Method::GET, "/stat/d", Body::empty()).await;
    let info = body_json(response).await;
    assert_eq!(info["path"], "/d");
    assert_eq!(info["is_dir"], true);

    let response = send(&app, Method::GET, "/list", Body::empty()).await;
    assert_eq!(
        body_json(response).await,
        json!({ "path": "/", "children": ["/d"] })
    );

    let response = send(&app, Method::GET, "/list/d", Body::empty()).await;
    assert_eq!(body_json(response).await["children"], json!(["/d/a.txt"]));
}

#[tokio::test]
async fn put_accepts_bodies_above_the_default_limit() {
    let (store, app) = app().await;
    let payload = vec![7u8; 3 * 1024 * 1024];

    let response = send(&app, Method::PUT, "/files/big.bin", Body::from(payload.clone())).await;
    assert_eq!(response.status(), StatusCode::CREATED);

    let response = send(&app, Method::HEAD, "/files/big.bin", Body::empty()).await;
    assert_eq!(
        response.headers()[header::CONTENT_LENGTH],
        payload.len().to_string().as_str()
    );
    assert_eq!(
        store.raw_object("files", "big.bin").await.unwrap().len(),
        payload.len()
    );
}

#[tokio::test]
async fn move_and_delete() {
    let (store, app) = app().await;
    send(
        &app,
        Method::PATCH,
        "/files/src.bin",
        Body::from("ABCDEFGHIJKLM"),
    )
    .await;

    let request = json!({ "source": "/src.bin", "destination": "/out/dst.bin" });
    let response = send(
        &app,
        Method::POST,
        "/move",
        Body::from(request.to_string()),
    )
    .await;
    // The JSON extractor needs a content type.
    assert_eq!(response.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method(Method::POST)
                .uri("/move")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(request.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let response = send(&app, Method::GET, "/files/out/dst.bin", Body::empty()).await;
    assert_eq!(body_bytes(response).await, b"ABCDEFGHIJKLM");

    let response = send(&app, Method::DELETE, "/files/out", Body::empty()).await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    assert!(store.object_names("files").await.is_empty());
    assert!(store.object_names("files_segments").await.is_empty());
}

#[tokio::test]
async fn errors_are_json() {
    let (_, app) = app().await;

    let response = send(&app, Method::GET, "/files/missing", Body::empty()).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body = body_json(response).await;
    assert_eq!(body["status"], 404);
    assert!(body["error"].as_str().unwrap().contains("/missing"));

    let response = send(&app, Method::GET, "/files/a//b", Body::empty()).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = send(&app, Method::DELETE, "/files/missing", Body::empty()).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn failed_patch_reports_bytes_written() {
    let (store, app) = app().await;
    store.fail_puts_after(2);

    let response = send(
        &app,
        Method::PATCH,
        "/files/f?offset=0",
        Body::from("ABCDEFGHIJKLM"),
    )
    .await;
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body = body_json(response).await;
    assert_eq!(body["bytes_written"], 5);

    store.heal();
    let response = send(
        &app,
        Method::PATCH,
        "/files/f?offset=5",
        Body::from("FGHIJKLM"),
    )
    .await;
    assert_eq!(body_json(response).await["bytes_written"], 8);

    let response = send(&app, Method::GET, "/files/f", Body::empty()).await;
    assert_eq!(body_bytes(response).await, b"ABCDEFGHIJKLM");
}
