//! End-to-end tests for the HTTP surface, with a scripted upstream model
//! and a throwaway SQLite database.

use async_trait::async_trait;
use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode, header},
    response::Response,
};
use nano_gateway::build_router;
use nano_gateway::gateway::ThrottleConfig;
use nano_gateway::gemini::{
    Candidate, Content, ContentPart, GenerateContentResponse, GenerationConfig, ImageModel,
    InlineData, ModelError, Part,
};
use nano_gateway::state::AppState;
use nano_gateway::store::SqliteStore;
use serde_json::{Value, json};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tower::ServiceExt; // for `oneshot`

const BOUNDARY: &str = "nano-test-boundary";

/// Upstream fake: replays queued outcomes, then answers with one image.
#[derive(Default)]
struct StubModel {
    queued: Mutex<VecDeque<Result<GenerateContentResponse, ModelError>>>,
    requests: Mutex<Vec<(String, Vec<ContentPart>, GenerationConfig)>>,
}

impl StubModel {
    fn queue(&self, outcome: Result<GenerateContentResponse, ModelError>) {
        self.queued.lock().unwrap().push_back(outcome);
    }

    fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl ImageModel for StubModel {
    async fn generate_content(
        &self,
        model: &str,
        contents: &[ContentPart],
        config: &GenerationConfig,
    ) -> Result<GenerateContentResponse, ModelError> {
        self.requests
            .lock()
            .unwrap()
            .push((model.to_string(), contents.to_vec(), config.clone()));
        self.queued
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(image_response("aW1hZ2U=")))
    }
}

fn image_response(data: &str) -> GenerateContentResponse {
    GenerateContentResponse {
        candidates: vec![Candidate {
            content: Content {
                parts: vec![Part {
                    inline_data: Some(InlineData { mime_type: "image/png".into(), data: data.into() }),
                    text: None,
                }],
            },
        }],
    }
}

struct TestApp {
    router: Router,
    model: Arc<StubModel>,
    store: SqliteStore,
    _dir: tempfile::TempDir,
}

async fn setup() -> TestApp {
    let dir = tempfile::tempdir().expect("temp dir");
    std::fs::create_dir_all(dir.path().join("public")).unwrap();
    std::fs::write(dir.path().join("public/index.html"), "<h1>nano</h1>").unwrap();

    let store = SqliteStore::open(dir.path().join("app.db")).await.expect("open store");
    let model = Arc::new(StubModel::default());
    let throttle = ThrottleConfig {
        min_interval: Duration::ZERO,
        backoff_base: Duration::from_millis(1),
        ..Default::default()
    };
    let state = Arc::new(AppState::new(
        model.clone(),
        throttle,
        "test-model".to_string(),
        store.clone(),
        dir.path().join("public"),
        8 * 1024 * 1024,
    ));
    let router = build_router(state, &["http://localhost:5500".to_string()]);

    TestApp { router, model, store, _dir: dir }
}

impl TestApp {
    async fn send(&self, request: Request<Body>) -> Response {
        self.router.clone().oneshot(request).await.unwrap()
    }

    async fn post_json(&self, uri: &str, body: Value, cookie: Option<&str>) -> Response {
        let mut builder = Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json");
        if let Some(cookie) = cookie {
            builder = builder.header(header::COOKIE, cookie);
        }
        self.send(builder.body(Body::from(body.to_string())).unwrap()).await
    }

    async fn get(&self, uri: &str, cookie: Option<&str>) -> Response {
        let mut builder = Request::builder().uri(uri);
        if let Some(cookie) = cookie {
            builder = builder.header(header::COOKIE, cookie);
        }
        self.send(builder.body(Body::empty()).unwrap()).await
    }

    async fn post_multipart(&self, uri: &str, body: Vec<u8>, cookie: Option<&str>) -> Response {
        let mut builder = Request::builder()
            .method("POST")
            .uri(uri)
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={}", BOUNDARY),
            );
        if let Some(cookie) = cookie {
            builder = builder.header(header::COOKIE, cookie);
        }
        self.send(builder.body(Body::from(body)).unwrap()).await
    }

    /// Signs up and returns the `session=...` cookie pair.
    async fn signup(&self, username: &str) -> String {
        let response = self
            .post_json("/auth/signup", json!({"username": username, "password": "pw"}), None)
            .await;
        assert_eq!(response.status(), StatusCode::OK);
        session_cookie(&response)
    }
}

fn session_cookie(response: &Response) -> String {
    let raw = response
        .headers()
        .get(header::SET_COOKIE)
        .expect("set-cookie header")
        .to_str()
        .unwrap();
    raw.split(';').next().unwrap().to_string()
}

async fn body_json(response: Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

// Builds a multipart body from text fields and (filename, content type, bytes) files
fn multipart(fields: &[(&str, &str)], files: &[(&str, &str, &[u8])]) -> Vec<u8> {
    let mut body = Vec::new();
    for (name, value) in fields {
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n"
            )
            .as_bytes(),
        );
    }
    for (filename, content_type, data) in files {
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"files\"; filename=\"{filename}\"\r\nContent-Type: {content_type}\r\n\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(data);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
    body
}

#[tokio::test]
async fn health_reports_ok() {
    let app = setup().await;

    let response = app.get("/health", None).await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await, json!({"status": "ok"}));
}

#[tokio::test]
async fn index_serves_frontend() {
    let app = setup().await;

    let response = app.get("/", None).await;

    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn generate_returns_base64_images() {
    let app = setup().await;

    let response = app.post_json("/v1/generate", json!({"prompt": "a red cube"}), None).await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await, json!({"images": ["aW1hZ2U="], "texts": []}));

    let requests = app.model.requests.lock().unwrap();
    let (model, contents, config) = &requests[0];
    assert_eq!(model, "test-model");
    assert_eq!(contents, &vec![ContentPart::Text("a red cube".into())]);
    assert_eq!(config.candidate_count, 1);
}

#[tokio::test]
async fn generate_clamps_candidate_count() {
    let app = setup().await;

    let response = app
        .post_json(
            "/v1/generate",
            json!({"prompt": "cube", "candidate_count": 12, "model": "other-model"}),
            None,
        )
        .await;

    assert_eq!(response.status(), StatusCode::OK);
    let requests = app.model.requests.lock().unwrap();
    assert_eq!(requests[0].0, "other-model");
    assert_eq!(requests[0].2.candidate_count, 6);
}

#[tokio::test]
async fn generate_rejects_blank_prompt() {
    let app = setup().await;

    let response = app.post_json("/v1/generate", json!({"prompt": "   "}), None).await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(app.model.calls(), 0);
}

#[tokio::test]
async fn generate_without_prompt_reports_detail() {
    let app = setup().await;

    let response = app.post_json("/v1/generate", json!({"model": "m"}), None).await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert!(body["detail"].as_str().unwrap().contains("prompt"));
    assert_eq!(app.model.calls(), 0);
}

#[tokio::test]
async fn empty_upstream_answer_is_bad_gateway() {
    let app = setup().await;
    app.model.queue(Ok(GenerateContentResponse::default()));

    let response = app.post_json("/v1/generate", json!({"prompt": "cube"}), None).await;

    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
}

#[tokio::test]
async fn exhausted_rate_limit_is_429_with_retry_after() {
    let app = setup().await;
    for _ in 0..3 {
        app.model.queue(Err(ModelError::Status { status: 429, message: "RESOURCE_EXHAUSTED".into() }));
    }

    let response = app.post_json("/v1/generate", json!({"prompt": "cube"}), None).await;

    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(response.headers()[header::RETRY_AFTER], "1");
    assert_eq!(app.model.calls(), 3);
}

#[tokio::test]
async fn other_upstream_errors_are_500() {
    let app = setup().await;
    app.model.queue(Err(ModelError::Status { status: 400, message: "INVALID_ARGUMENT".into() }));

    let response = app.post_json("/v1/generate", json!({"prompt": "cube"}), None).await;

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(app.model.calls(), 1);
}

#[tokio::test]
async fn edit_without_files_is_rejected() {
    let app = setup().await;
    let body = multipart(&[("prompt", "make it blue")], &[]);

    let response = app.post_multipart("/v1/edit", body, None).await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["detail"], "No image files uploaded");
    assert_eq!(app.model.calls(), 0);
}

#[tokio::test]
async fn edit_sends_images_then_prompt() {
    let app = setup().await;
    let body = multipart(
        &[("prompt", "make it blue"), ("candidate_count", "abc")],
        &[("a.jpg", "image/jpeg", &b"jpeg-bytes"[..]), ("b.png", "image/png", &b"png-bytes"[..])],
    );

    let response = app.post_multipart("/v1/edit", body, None).await;

    assert_eq!(response.status(), StatusCode::OK);
    let requests = app.model.requests.lock().unwrap();
    let (_, contents, config) = &requests[0];
    assert_eq!(
        contents,
        &vec![
            ContentPart::Image { mime_type: "image/jpeg".into(), data: b"jpeg-bytes".to_vec() },
            ContentPart::Image { mime_type: "image/png".into(), data: b"png-bytes".to_vec() },
            ContentPart::Text("make it blue".into()),
        ]
    );
    assert_eq!(config.candidate_count, 1);
}

#[tokio::test]
async fn compose_accepts_its_own_form() {
    let app = setup().await;
    app.model.queue(Ok(GenerateContentResponse {
        candidates: vec![Candidate {
            content: Content {
                parts: vec![Part { inline_data: None, text: Some("composed".into()) }],
            },
        }],
    }));
    let body = multipart(
        &[("prompt", "put the cat on the sofa"), ("model", "compose-model")],
        &[("cat.png", "image/png", &b"cat"[..]), ("sofa.png", "image/png", &b"sofa"[..])],
    );

    let response = app.post_multipart("/v1/compose", body, None).await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await, json!({"images": [], "texts": ["composed"]}));
    assert_eq!(app.model.requests.lock().unwrap()[0].0, "compose-model");
}

#[tokio::test]
async fn duplicate_signup_conflicts() {
    let app = setup().await;
    app.signup("alice").await;

    let response = app
        .post_json("/auth/signup", json!({"username": "alice", "password": "other"}), None)
        .await;

    assert_eq!(response.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn login_checks_password_and_sets_session() {
    let app = setup().await;
    app.signup("bob").await;

    let bad = app
        .post_json("/auth/login", json!({"username": "bob", "password": "nope"}), None)
        .await;
    assert_eq!(bad.status(), StatusCode::UNAUTHORIZED);

    let good = app
        .post_json("/auth/login", json!({"username": "bob", "password": "pw"}), None)
        .await;
    assert_eq!(good.status(), StatusCode::OK);
    let cookie = session_cookie(&good);

    let me = body_json(app.get("/me", Some(&cookie)).await).await;
    assert_eq!(me["authenticated"], true);
    assert_eq!(me["username"], "bob");

    let logout = app.post_json("/auth/logout", json!({}), Some(&cookie)).await;
    assert_eq!(logout.status(), StatusCode::OK);
    let me = body_json(app.get("/me", Some(&cookie)).await).await;
    assert_eq!(me, json!({"authenticated": false}));
}

#[tokio::test]
async fn conversations_require_login() {
    let app = setup().await;

    let response = app.get("/conversations", None).await;

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn generation_is_recorded_only_for_the_owner() {
    let app = setup().await;
    let owner = app.signup("owner").await;
    let other = app.signup("other").await;

    let created = app.post_json("/conversations", json!({"title": "cubes"}), Some(&owner)).await;
    assert_eq!(created.status(), StatusCode::OK);
    let conv_id = body_json(created).await["id"].as_i64().unwrap();

    // someone else's conversation: generation still succeeds, nothing is written
    let response = app
        .post_json("/v1/generate", json!({"prompt": "a red cube", "conv_id": conv_id}), Some(&other))
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["images"], json!(["aW1hZ2U="]));
    assert!(app.store.list_messages(conv_id).await.unwrap().is_empty());

    let response = app
        .post_json(
            "/v1/generate",
            json!({"prompt": "a red cube", "conv_id": conv_id, "candidate_count": 3}),
            Some(&owner),
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);

    let messages = body_json(app.get(&format!("/conversations/{}/messages", conv_id), Some(&owner)).await).await;
    let messages = messages.as_array().unwrap();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0]["role"], "user");
    assert_eq!(messages[0]["type"], "generate");
    assert_eq!(messages[0]["prompt"], "a red cube");
    assert_eq!(messages[0]["params"]["candidate_count"], 3);
    assert_eq!(messages[1]["role"], "assistant");
    assert_eq!(messages[1]["images"], json!(["aW1hZ2U="]));
    assert_eq!(messages[1]["params"]["model"], "test-model");
}

#[tokio::test]
async fn edit_and_compose_record_edit_turns_for_the_owner() {
    let app = setup().await;
    let owner = app.signup("frank").await;
    let conv_id = body_json(app.post_json("/conversations", json!({}), Some(&owner)).await).await["id"]
        .as_i64()
        .unwrap();
    let conv = conv_id.to_string();

    let compose = multipart(
        &[("prompt", "cat on sofa"), ("conv_id", &conv)],
        &[("cat.png", "image/png", &b"cat"[..]), ("sofa.png", "image/png", &b"sofa"[..])],
    );
    let response = app.post_multipart("/v1/compose", compose, Some(&owner)).await;
    assert_eq!(response.status(), StatusCode::OK);

    let messages = app.store.list_messages(conv_id).await.unwrap();
    let kinds: Vec<(&str, &str)> =
        messages.iter().map(|m| (m.role.as_str(), m.turn_type.as_str())).collect();
    assert_eq!(kinds, vec![("user", "edit"), ("assistant", "edit")]);
    assert_eq!(messages[0].prompt.as_deref(), Some("cat on sofa"));
    assert_eq!(messages[1].images, vec!["aW1hZ2U=".to_string()]);
    // no model field in the form, so none is recorded
    assert!(messages[0].params["model"].is_null());

    let edit = multipart(
        &[("prompt", "make it blue"), ("model", "edit-model"), ("conv_id", &conv)],
        &[("cat.png", "image/png", &b"cat"[..])],
    );
    let response = app.post_multipart("/v1/edit", edit, Some(&owner)).await;
    assert_eq!(response.status(), StatusCode::OK);

    let messages = app.store.list_messages(conv_id).await.unwrap();
    assert_eq!(messages.len(), 4);
    assert_eq!(messages[2].turn_type, "edit");
    assert_eq!(messages[2].params["model"], "edit-model");
}

#[tokio::test]
async fn anonymous_edit_with_conversation_writes_nothing() {
    let app = setup().await;
    let owner = app.signup("grace").await;
    let conv_id = body_json(app.post_json("/conversations", json!({}), Some(&owner)).await).await["id"]
        .as_i64()
        .unwrap();

    let body = multipart(
        &[("prompt", "make it blue"), ("conv_id", &conv_id.to_string())],
        &[("cat.png", "image/png", &b"cat"[..])],
    );
    let response = app.post_multipart("/v1/edit", body, None).await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["images"], json!(["aW1hZ2U="]));
    assert!(app.store.list_messages(conv_id).await.unwrap().is_empty());
}

#[tokio::test]
async fn foreign_conversations_look_missing() {
    let app = setup().await;
    let owner = app.signup("carol").await;
    let other = app.signup("dave").await;
    let conv_id = body_json(app.post_json("/conversations", json!({}), Some(&owner)).await).await["id"]
        .as_i64()
        .unwrap();

    let foreign = app.get(&format!("/conversations/{}/messages", conv_id), Some(&other)).await;
    let missing = app.get("/conversations/9999/messages", Some(&other)).await;

    assert_eq!(foreign.status(), StatusCode::NOT_FOUND);
    assert_eq!(missing.status(), StatusCode::NOT_FOUND);
    assert_eq!(body_json(foreign).await, body_json(missing).await);
}

#[tokio::test]
async fn rename_and_delete_conversation() {
    let app = setup().await;
    let cookie = app.signup("erin").await;
    let created = body_json(app.post_json("/conversations", json!({}), Some(&cookie)).await).await;
    assert_eq!(created["title"], "New conversation");
    let uri = format!("/conversations/{}", created["id"]);

    let blank = Request::builder()
        .method("PATCH")
        .uri(&uri)
        .header(header::CONTENT_TYPE, "application/json")
        .header(header::COOKIE, &cookie)
        .body(Body::from(json!({"title": "  "}).to_string()))
        .unwrap();
    assert_eq!(app.send(blank).await.status(), StatusCode::BAD_REQUEST);

    let rename = Request::builder()
        .method("PATCH")
        .uri(&uri)
        .header(header::CONTENT_TYPE, "application/json")
        .header(header::COOKIE, &cookie)
        .body(Body::from(json!({"title": "Renamed"}).to_string()))
        .unwrap();
    let renamed = app.send(rename).await;
    assert_eq!(renamed.status(), StatusCode::OK);
    assert_eq!(body_json(renamed).await["title"], "Renamed");

    let delete = Request::builder()
        .method("DELETE")
        .uri(&uri)
        .header(header::COOKIE, &cookie)
        .body(Body::empty())
        .unwrap();
    assert_eq!(app.send(delete).await.status(), StatusCode::OK);

    let listed = body_json(app.get("/conversations", Some(&cookie)).await).await;
    assert_eq!(listed, json!([]));
}
