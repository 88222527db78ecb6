//! HTTP API integration tests, driven through the router with scripted
//! browsers.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use tower::ServiceExt;

use pagewise::driver::scripted::{ScriptedDriver, ScriptedFactory, ScriptedPage};
use pagewise::{DriverFactory, SiteProfile};
use pagewise_server::transport::{router, ServerState};
use pagewise_server::{build_orchestrator, EventBus, SessionManager};

// ─────────────────────── helpers ───────────────────────

const PROFILE: &str = r#"{
    "name": "test-directory",
    "fields": {
        "Name": { "selector": "span.name" },
        "Photo": { "selector": "img" }
    },
    "container": ".results",
    "items": { "strategy": "selector", "selector": "li" },
    "nextControl": "button.next",
    "inclusion": { "kind": "require_any", "fields": ["Name"] }
}"#;

fn page(p: usize) -> ScriptedPage {
    ScriptedPage::new(format!(
        r#"<div class="results"><ul>
             <li><span class="name">p{p}-a</span><img src="a.png"></li>
             <li><span class="name">p{p}-b</span></li>
             <li><img src="anon.png"></li>
           </ul></div>"#
    ))
}

fn scripted(pages: usize) -> Arc<dyn DriverFactory> {
    Arc::new(ScriptedFactory::new(move || {
        ScriptedDriver::new((1..=pages).map(page).collect()).with_next_control("button.next")
    }))
}

fn app(factory: Arc<dyn DriverFactory>) -> Router {
    let profile = SiteProfile::from_json(PROFILE).unwrap();
    let orchestrator = Arc::new(build_orchestrator(&profile, false).unwrap());
    let manager = Arc::new(SessionManager::new(
        orchestrator,
        factory,
        Arc::new(EventBus::default()),
    ));
    router(Arc::new(ServerState::new(manager)))
}

async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, String) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, String::from_utf8(bytes.to_vec()).unwrap())
}

async fn send_json(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let (status, text) = send(app, method, uri, body).await;
    (status, serde_json::from_str(&text).unwrap_or(Value::Null))
}

async fn start(app: &Router, body: Value) -> String {
    let (status, json) = send_json(app, "POST", "/api/scrape", Some(body)).await;
    assert_eq!(status, StatusCode::ACCEPTED, "unexpected response: {json}");
    json["sessionId"].as_str().unwrap().to_string()
}

async fn wait_finished(app: &Router, id: &str) -> Value {
    for _ in 0..1000 {
        let (status, json) = send_json(app, "GET", &format!("/api/sessions/{id}"), None).await;
        assert_eq!(status, StatusCode::OK);
        if json.get("finishedAt").is_some() {
            return json;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    panic!("session {id} did not finish");
}

// ─────────────────────── basics ───────────────────────

#[tokio::test]
async fn test_health() {
    let app = app(scripted(1));
    let (status, json) = send_json(&app, "GET", "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "ok");
    assert_eq!(json["activeSessions"], 0);
}

#[tokio::test]
async fn test_fields_lists_profile_fields() {
    let app = app(scripted(1));
    let (status, json) = send_json(&app, "GET", "/api/fields", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["fields"], json!(["Name", "Photo"]));
}

// ─────────────────────── start ───────────────────────

#[tokio::test(start_paused = true)]
async fn test_bounded_session_collects_records() {
    let app = app(scripted(5));
    let id = start(
        &app,
        json!({
            "targetUrl": "https://example.test/search",
            "fields": ["Name", "Photo"],
            "paginationMode": "bounded",
            "maxPages": 2
        }),
    )
    .await;

    let summary = wait_finished(&app, &id).await;
    assert_eq!(summary["status"], "exhausted");
    assert_eq!(summary["pagesScraped"], 2);
    assert_eq!(summary["recordCount"], 4);
    assert_eq!(summary["records"][0]["Name"], "p1-a");
    assert_eq!(summary["records"][0]["Photo"], "a.png");
    assert!(summary["records"][1].get("Photo").is_none());

    let (_, list) = send_json(&app, "GET", "/api/sessions", None).await;
    assert_eq!(list["count"], 1);
    assert!(list["sessions"][0].get("records").is_none());
}

#[tokio::test]
async fn test_bounded_without_max_pages_is_rejected() {
    let app = app(scripted(1));
    let (status, json) = send_json(
        &app,
        "POST",
        "/api/scrape",
        Some(json!({
            "targetUrl": "https://example.test",
            "fields": ["Name"],
            "paginationMode": "bounded"
        })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"]["code"], "invalid_request");

    let (_, list) = send_json(&app, "GET", "/api/sessions", None).await;
    assert_eq!(list["count"], 0);
}

#[tokio::test]
async fn test_empty_fields_are_rejected() {
    let app = app(scripted(1));
    let (status, json) = send_json(
        &app,
        "POST",
        "/api/scrape",
        Some(json!({
            "targetUrl": "https://example.test",
            "fields": [],
            "paginationMode": "continuous"
        })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"]["code"], "invalid_request");
}

#[tokio::test]
async fn test_unknown_fields_are_rejected() {
    let app = app(scripted(1));
    let (status, json) = send_json(
        &app,
        "POST",
        "/api/scrape",
        Some(json!({
            "targetUrl": "https://example.test",
            "fields": ["Salary"],
            "paginationMode": "continuous"
        })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"]["code"], "empty_template");
}

#[tokio::test]
async fn test_malformed_body_is_rejected() {
    let app = app(scripted(1));
    let (status, json) = send_json(
        &app,
        "POST",
        "/api/scrape",
        Some(json!({ "fields": "Name" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error"]["code"], "invalid_request");
}

// ─────────────────────── stop ───────────────────────

#[tokio::test(start_paused = true)]
async fn test_stop_is_idempotent() {
    let app = app(scripted(50));
    let id = start(
        &app,
        json!({
            "targetUrl": "https://example.test",
            "fields": ["Name"],
            "paginationMode": "bounded",
            "maxPages": 50
        }),
    )
    .await;

    let (status, _) = send_json(&app, "POST", &format!("/api/sessions/{id}/stop"), None).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = send_json(&app, "POST", "/api/stop", Some(json!({ "sessionId": id }))).await;
    assert_eq!(status, StatusCode::OK);

    let summary = wait_finished(&app, &id).await;
    assert_eq!(summary["status"], "cancelled");
    assert!(summary["pagesScraped"].as_u64().unwrap() < 50);
}

#[tokio::test]
async fn test_unknown_session_is_not_found() {
    let app = app(scripted(1));
    let (status, json) = send_json(&app, "POST", "/api/sessions/nope/stop", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json["error"]["code"], "session_not_found");

    let (status, _) = send_json(&app, "GET", "/api/sessions/nope", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(&app, "GET", "/api/sessions/nope/events", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

// ─────────────────────── progress stream ───────────────────────

#[tokio::test(start_paused = true)]
async fn test_event_stream_ends_with_terminal_event() {
    let app = app(scripted(3));
    let id = start(
        &app,
        json!({
            "targetUrl": "https://example.test",
            "fields": ["Name"],
            "paginationMode": "bounded",
            "maxPages": 3
        }),
    )
    .await;

    let (status, body) = send(&app, "GET", &format!("/api/sessions/{id}/events"), None).await;
    assert_eq!(status, StatusCode::OK);

    let events: Vec<Value> = body
        .lines()
        .filter_map(|line| line.strip_prefix("data:"))
        .map(|data| serde_json::from_str(data.trim()).unwrap())
        .collect();
    let last = events.last().unwrap();
    assert_eq!(last["isFinal"], true);
    assert_eq!(last["status"], "exhausted");
    assert_eq!(last["pageIndex"], 4);
    assert_eq!(last["pageRecords"], json!([]));
    assert_eq!(events.iter().filter(|e| e["isFinal"] == true).count(), 1);
}

#[tokio::test]
async fn test_missing_browser_is_service_unavailable() {
    let app = app(Arc::new(pagewise::NoopFactory));
    let (status, json) = send_json(
        &app,
        "POST",
        "/api/scrape",
        Some(json!({
            "targetUrl": "https://example.test",
            "fields": ["Name"],
            "paginationMode": "continuous"
        })),
    )
    .await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(json["error"]["code"], "browser_unavailable");
    assert!(json["error"]["message"]
        .as_str()
        .unwrap()
        .contains("Browser not available"));

    let (_, list) = send_json(&app, "GET", "/api/sessions", None).await;
    assert_eq!(list["count"], 0);
}
