//! HTTP endpoint tests. Each test serves the router on an ephemeral port with
//! the file host and completion API mocked.

use folio::config::Config;
use folio::fallback::FallbackOrchestrator;
use folio::quota::{InMemoryQuotaStore, QuotaGate};
use folio::server::{router, AppState};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const ANSWER: &str = r#"{"description":"A tiny app.","technologies":["TypeScript"]}"#;

fn test_config(upstream: &MockServer, max_generations: u32) -> Config {
    let mut cfg = Config::minimal("m1");
    cfg.completion.api_url = format!("{}/v1/chat/completions", upstream.uri());
    cfg.completion.api_key = Some("test-key".to_string());
    cfg.completion.backoff_base_ms = 1;
    cfg.files.trusted_prefix = format!("{}/raw/", upstream.uri());
    cfg.files.max_files = 2;
    cfg.quota.max_generations = max_generations;
    cfg
}

async fn mount_upstream(upstream: &MockServer, completion: ResponseTemplate) {
    Mock::given(method("GET"))
        .and(path("/raw/u/r/main/a.ts"))
        .respond_with(ResponseTemplate::new(200).set_body_string("const x=1;"))
        .mount(upstream)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(completion)
        .mount(upstream)
        .await;
}

fn ok_completion() -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "choices": [{ "message": { "role": "assistant", "content": ANSWER } }]
    }))
}

/// Serves the router on 127.0.0.1:0 and returns its base URL.
async fn spawn_app(cfg: Config) -> String {
    let orchestrator = FallbackOrchestrator::new(&cfg).unwrap();
    let quota = QuotaGate::new(
        Arc::new(InMemoryQuotaStore::new()),
        cfg.quota.max_generations,
    );
    let state = AppState::new(cfg, orchestrator, quota, CancellationToken::new());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router(state)).await.unwrap();
    });
    format!("http://{}", addr)
}

async fn post_generate(base: &str, project: &str, body: Value) -> (u16, Value) {
    let resp = reqwest::Client::new()
        .post(format!("{}/projects/{}/generate", base, project))
        .json(&body)
        .send()
        .await
        .unwrap();
    let status = resp.status().as_u16();
    (status, resp.json().await.unwrap())
}

fn file_url(upstream: &MockServer) -> String {
    format!("{}/raw/u/r/main/a.ts", upstream.uri())
}

// ─── Tests ──────────────────────────────────────────────────────────

#[tokio::test]
async fn test_health() {
    let upstream = MockServer::start().await;
    let base = spawn_app(test_config(&upstream, 3)).await;

    let body: Value = reqwest::get(format!("{}/health", base))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["status"], "ok");
    assert!(body["version"].is_string());
}

#[tokio::test]
async fn test_generate_success_consumes_quota() {
    let upstream = MockServer::start().await;
    mount_upstream(&upstream, ok_completion()).await;
    let base = spawn_app(test_config(&upstream, 3)).await;

    let (status, body) =
        post_generate(&base, "p1", json!({ "file_urls": [file_url(&upstream)] })).await;
    assert_eq!(status, 200);
    assert_eq!(body["description"], "A tiny app.");
    assert_eq!(body["technologies"], json!(["TypeScript"]));
    assert_eq!(body["model"], "m1");
    assert_eq!(body["remaining"], 2);

    let quota: Value = reqwest::get(format!("{}/projects/p1/quota", base))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(quota["used"], 1);
    assert_eq!(quota["limit"], 3);
    assert_eq!(quota["remaining"], 2);
}

#[tokio::test]
async fn test_quota_exceeded() {
    let upstream = MockServer::start().await;
    mount_upstream(&upstream, ok_completion()).await;
    let base = spawn_app(test_config(&upstream, 1)).await;
    let body = json!({ "file_urls": [file_url(&upstream)] });

    let (status, _) = post_generate(&base, "p1", body.clone()).await;
    assert_eq!(status, 200);

    let (status, err) = post_generate(&base, "p1", body.clone()).await;
    assert_eq!(status, 429);
    assert_eq!(err["error"]["code"], "quota_exceeded");

    // Other projects are unaffected.
    let (status, _) = post_generate(&base, "p2", body).await;
    assert_eq!(status, 200);
}

#[tokio::test]
async fn test_file_count_limits() {
    let upstream = MockServer::start().await;
    let base = spawn_app(test_config(&upstream, 3)).await;

    let (status, err) = post_generate(&base, "p1", json!({ "file_urls": [] })).await;
    assert_eq!(status, 400);
    assert_eq!(err["error"]["code"], "bad_request");

    let url = file_url(&upstream);
    let (status, err) =
        post_generate(&base, "p1", json!({ "file_urls": [url, url, url] })).await;
    assert_eq!(status, 400);
    assert_eq!(err["error"]["code"], "bad_request");
}

#[tokio::test]
async fn test_untrusted_host_rejected() {
    let upstream = MockServer::start().await;
    let base = spawn_app(test_config(&upstream, 3)).await;

    let (status, err) = post_generate(
        &base,
        "p1",
        json!({ "file_urls": ["https://evil.example.com/a.ts"] }),
    )
    .await;
    assert_eq!(status, 400);
    assert_eq!(err["error"]["code"], "bad_request");
}

#[tokio::test]
async fn test_provider_error_text_not_exposed() {
    let upstream = MockServer::start().await;
    mount_upstream(
        &upstream,
        ResponseTemplate::new(401).set_body_json(json!({
            "error": { "message": "Incorrect API key provided: sk-secret" }
        })),
    )
    .await;
    let base = spawn_app(test_config(&upstream, 3)).await;

    let (status, err) =
        post_generate(&base, "p1", json!({ "file_urls": [file_url(&upstream)] })).await;
    assert_eq!(status, 422);
    assert_eq!(err["error"]["code"], "generation_rejected");
    assert!(!err.to_string().contains("sk-secret"));

    // Failed generations do not consume quota.
    let quota: Value = reqwest::get(format!("{}/projects/p1/quota", base))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(quota["used"], 0);
}

#[tokio::test]
async fn test_exhausted_models_map_to_unavailable() {
    let upstream = MockServer::start().await;
    mount_upstream(&upstream, ResponseTemplate::new(503)).await;
    let base = spawn_app(test_config(&upstream, 3)).await;

    let (status, err) =
        post_generate(&base, "p1", json!({ "file_urls": [file_url(&upstream)] })).await;
    assert_eq!(status, 503);
    assert_eq!(err["error"]["code"], "unavailable");
}

#[tokio::test]
async fn test_concurrent_requests_respect_quota() {
    let upstream = MockServer::start().await;
    mount_upstream(
        &upstream,
        ok_completion().set_delay(std::time::Duration::from_millis(300)),
    )
    .await;
    let base = spawn_app(test_config(&upstream, 1)).await;
    let body = json!({ "file_urls": [file_url(&upstream)] });

    let (first, second) = tokio::join!(
        post_generate(&base, "p1", body.clone()),
        post_generate(&base, "p1", body.clone()),
    );
    let mut statuses = vec![first.0, second.0];
    statuses.sort();
    assert_eq!(statuses, vec![200, 429]);

    let quota: Value = reqwest::get(format!("{}/projects/p1/quota", base))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(quota["used"], 1);
}

#[tokio::test]
async fn test_failed_generation_releases_reservation() {
    let upstream = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/raw/u/r/main/a.ts"))
        .respond_with(ResponseTemplate::new(200).set_body_string("const x=1;"))
        .mount(&upstream)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(400))
        .up_to_n_times(1)
        .mount(&upstream)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ok_completion())
        .mount(&upstream)
        .await;
    let base = spawn_app(test_config(&upstream, 1)).await;
    let body = json!({ "file_urls": [file_url(&upstream)] });

    let (status, _) = post_generate(&base, "p1", body.clone()).await;
    assert_eq!(status, 422);

    let (status, resp) = post_generate(&base, "p1", body).await;
    assert_eq!(status, 200);
    assert_eq!(resp["remaining"], 0);
}

#[tokio::test]
async fn test_malformed_body_uses_error_contract() {
    let upstream = MockServer::start().await;
    let base = spawn_app(test_config(&upstream, 3)).await;

    for body in [json!({}), json!({ "file_urls": "a.ts" })] {
        let (status, err) = post_generate(&base, "p1", body).await;
        assert_eq!(status, 400);
        assert_eq!(err["error"]["code"], "bad_request");
        assert!(err["error"]["message"].is_string());
    }

    let resp = reqwest::Client::new()
        .post(format!("{}/projects/p1/generate", base))
        .header("content-type", "application/json")
        .body("{not json")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 400);
    let err: Value = resp.json().await.unwrap();
    assert_eq!(err["error"]["code"], "bad_request");
}
