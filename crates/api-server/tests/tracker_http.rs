use api_server::{router, AppState};
use application::TrackerApp;
use axum::body::{to_bytes, Body};
use axum::http::{header, Request, StatusCode};
use axum::Router;
use domain::{content_identity, hash_piece, AnnouncePolicy, AnnounceResponse, ErrorBody, TorrentMetadata};
use serde_json::json;
use tower::ServiceExt;

fn app() -> Router {
    router(AppState::new(TrackerApp::in_memory(AnnouncePolicy::default())))
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, serde_json::Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = if bytes.is_empty() {
        serde_json::Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, body)
}

fn post_json(uri: &str, token: Option<&str>, body: serde_json::Value) -> Request<Body> {
    let mut builder = Request::post(uri).header(header::CONTENT_TYPE, "application/json");
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

fn get(uri: &str, token: Option<&str>) -> Request<Body> {
    let mut builder = Request::get(uri);
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
    }
    builder.body(Body::empty()).unwrap()
}

async fn register(app: &Router, username: &str) -> String {
    let (status, body) = send(
        app,
        post_json("/register", None, json!({"username": username, "password": "secret"})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["token_type"], "bearer");
    body["access_token"].as_str().unwrap().to_string()
}

fn descriptor() -> TorrentMetadata {
    let piece_hashes = vec![hash_piece(b"first"), hash_piece(b"second")];
    let info_hash = content_identity("movie.mkv", 10, 5, &piece_hashes).unwrap().to_hex();
    TorrentMetadata {
        name: "movie.mkv".to_string(),
        size: 10,
        piece_length: 5,
        piece_hashes,
        info_hash,
        files: None,
    }
}

fn announce_uri(info_hash: &str, peer_id: &str, port: u16, event: Option<&str>) -> String {
    let mut uri = format!(
        "/announce?info_hash={}&peer_id={}&ip=127.0.0.1&port={}&uploaded=0&downloaded=0&left=10",
        info_hash, peer_id, port
    );
    if let Some(event) = event {
        uri.push_str("&event=");
        uri.push_str(event);
    }
    uri
}

#[tokio::test]
async fn health_check_answers() {
    let (status, body) = send(&app(), get("/health", None)).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
}

#[tokio::test]
async fn login_rotates_the_bearer_token() {
    let app = app();
    let first = register(&app, "alice").await;

    let (status, body) = send(
        &app,
        post_json("/login", None, json!({"username": "alice", "password": "secret"})),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_ne!(body["access_token"].as_str().unwrap(), first);

    let (status, body) = send(
        &app,
        post_json("/login", None, json!({"username": "alice", "password": "wrong"})),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "unauthorized");
}

#[tokio::test]
async fn duplicate_registration_conflicts() {
    let app = app();
    register(&app, "alice").await;

    let (status, body) = send(
        &app,
        post_json("/register", None, json!({"username": "alice", "password": "other"})),
    )
    .await;

    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "username_taken");
}

#[tokio::test]
async fn publish_requires_a_bearer_token() {
    let app = app();
    let body = serde_json::to_value(descriptor()).unwrap();

    let (status, _) = send(&app, post_json("/publish", None, body.clone())).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = send(&app, post_json("/publish", Some("not-a-token"), body)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn publishing_twice_returns_the_stored_descriptor() {
    let app = app();
    let token = register(&app, "alice").await;
    let metadata = descriptor();
    let body = serde_json::to_value(&metadata).unwrap();

    let (status, first) = send(&app, post_json("/publish", Some(&token), body.clone())).await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, second) = send(&app, post_json("/publish", Some(&token), body)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(first, second);

    let (status, stored) = send(&app, get(&format!("/torrent/{}", metadata.info_hash), None)).await;
    assert_eq!(status, StatusCode::OK);
    let stored: TorrentMetadata = serde_json::from_value(stored).unwrap();
    assert_eq!(stored.piece_hashes, metadata.piece_hashes);
}

#[tokio::test]
async fn a_descriptor_with_a_forged_identity_is_rejected() {
    let app = app();
    let token = register(&app, "alice").await;
    let mut metadata = descriptor();
    metadata.info_hash = "ab".repeat(20);

    let (status, body) = send(
        &app,
        post_json("/publish", Some(&token), serde_json::to_value(metadata).unwrap()),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "validation");
}

#[tokio::test]
async fn announce_for_an_unknown_torrent_is_not_found() {
    let app = app();
    let token = register(&app, "alice").await;

    let (status, body) = send(
        &app,
        get(&announce_uri(&"cd".repeat(20), "peer-a", 6881, Some("started")), Some(&token)),
    )
    .await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    let body: ErrorBody = serde_json::from_value(body).unwrap();
    assert_eq!(body.error, "unknown_torrent");
}

#[tokio::test]
async fn announce_rejects_unknown_events_and_missing_tokens() {
    let app = app();
    let token = register(&app, "alice").await;
    let metadata = descriptor();
    send(
        &app,
        post_json("/publish", Some(&token), serde_json::to_value(&metadata).unwrap()),
    )
    .await;

    let (status, _) = send(
        &app,
        get(&announce_uri(&metadata.info_hash, "peer-a", 6881, Some("paused")), Some(&token)),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(
        &app,
        get(&announce_uri(&metadata.info_hash, "peer-a", 6881, Some("started")), None),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn announce_lists_active_swarm_members() {
    let app = app();
    let token = register(&app, "alice").await;
    let metadata = descriptor();
    send(
        &app,
        post_json("/publish", Some(&token), serde_json::to_value(&metadata).unwrap()),
    )
    .await;

    send(
        &app,
        get(&announce_uri(&metadata.info_hash, "peer-a", 6881, Some("started")), Some(&token)),
    )
    .await;
    let (status, body) = send(
        &app,
        get(&announce_uri(&metadata.info_hash, "peer-b", 6882, Some("started")), Some(&token)),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let response: AnnounceResponse = serde_json::from_value(body).unwrap();
    let ids: Vec<&str> = response.peers.iter().map(|p| p.peer_id.as_str()).collect();
    assert_eq!(ids, vec!["peer-a", "peer-b"]);
    assert_eq!(response.interval, 1800);

    let (_, body) = send(
        &app,
        get(&announce_uri(&metadata.info_hash, "peer-a", 6881, Some("stopped")), Some(&token)),
    )
    .await;
    let response: AnnounceResponse = serde_json::from_value(body).unwrap();
    let ids: Vec<&str> = response.peers.iter().map(|p| p.peer_id.as_str()).collect();
    assert_eq!(ids, vec!["peer-b"]);
}
