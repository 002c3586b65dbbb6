//! End-to-end tests of the request pipeline against a mock ZDX API.
//!
//! Run with: `cargo test --test pipeline`
//! Set `RUST_LOG=debug` to see the pipeline's tracing output.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Deserialize;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, Request, ResponseTemplate};
use zscaler_sdk::zdx::{
    unescape_html_twice, Configuration, Context, ErrorKind, PostDecode, QueryBuilder,
    RateLimitConfig, ZdxClient,
};

#[derive(Debug, Deserialize, PartialEq)]
struct App {
    id: u64,
    name: String,
}

impl PostDecode for App {
    fn post_decode(&mut self) {
        unescape_html_twice(&mut self.name);
    }
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn token_response(token: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(serde_json::json!({
        "token_type": "Bearer",
        "token": token,
        "expires_in": 3600
    }))
}

fn config(server: &MockServer) -> Configuration {
    Configuration::builder()
        .with_credentials("key-1", "secret")
        .with_base_url(server.uri())
        .with_max_retries(3)
        .with_min_wait(Duration::from_millis(20))
        .with_max_wait(Duration::from_millis(100))
        .build()
        .unwrap()
}

// ============================================================================
// Rate limiting and retry
// ============================================================================

#[tokio::test]
async fn test_rate_limited_request_waits_for_reset() {
    init_tracing();
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/oauth/token"))
        .respond_with(token_response("abc"))
        .expect(1)
        .mount(&server)
        .await;

    let calls = Arc::new(AtomicU32::new(0));
    let counter = calls.clone();
    Mock::given(method("GET"))
        .and(path("/v1/apps/1"))
        .and(header("Authorization", "Bearer abc"))
        .respond_with(move |_: &Request| {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                let reset = chrono::Utc::now().timestamp() + 1;
                ResponseTemplate::new(429)
                    .insert_header("RateLimit-Remaining", "0")
                    .insert_header("RateLimit-Reset", reset.to_string())
            } else {
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"id": 1, "name": "x"}))
            }
        })
        .expect(2)
        .mount(&server)
        .await;

    let client = ZdxClient::new(config(&server)).unwrap();
    let started = Instant::now();
    let app: App = client
        .get(&Context::new(), "/v1/apps/1", &())
        .await
        .unwrap();

    // The reset header outranks the 100ms backoff ceiling.
    assert!(started.elapsed() >= Duration::from_millis(900));
    assert_eq!(
        app,
        App {
            id: 1,
            name: "x".to_string()
        }
    );
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(client.authenticator().fetch_count(), 1);
}

#[tokio::test]
async fn test_decode_hook_unescapes_names() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/oauth/token"))
        .respond_with(token_response("abc"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/apps"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
            {"id": 1, "name": "Office&amp;amp;365"},
            {"id": 2, "name": "Teams"}
        ])))
        .mount(&server)
        .await;

    let client = ZdxClient::new(config(&server)).unwrap();
    let apps: Vec<App> = client.get(&Context::new(), "/v1/apps", &()).await.unwrap();
    assert_eq!(apps[0].name, "Office&365");
    assert_eq!(apps[1].name, "Teams");
}

#[tokio::test]
async fn test_persistent_rate_limit_exhausts_budget() {
    init_tracing();
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/oauth/token"))
        .respond_with(token_response("tok-1"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/apps"))
        .respond_with(ResponseTemplate::new(429).set_body_json(serde_json::json!({
            "message": "Too many requests"
        })))
        .expect(4)
        .mount(&server)
        .await;

    let mut config = Configuration::builder()
        .with_credentials("key-1", "secret")
        .with_base_url(server.uri())
        .with_max_retries(3)
        .build()
        .unwrap();
    if let Some(retry) = config.client.retry.as_mut() {
        retry.max_retry_after = Duration::from_millis(10);
    }

    let client = ZdxClient::new(config).unwrap();
    let err = client
        .get::<Vec<App>, _>(&Context::new(), "/v1/apps", &())
        .await
        .unwrap_err();

    assert!(err.is_rate_limited());
    assert!(matches!(err.kind, ErrorKind::RateLimitExceeded { attempts: 4 }));
    assert_eq!(err.status(), Some(429));
}

#[tokio::test]
async fn test_server_error_then_success() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/oauth/token"))
        .respond_with(token_response("tok-1"))
        .expect(1)
        .mount(&server)
        .await;

    let calls = Arc::new(AtomicU32::new(0));
    let counter = calls.clone();
    Mock::given(method("GET"))
        .and(path("/v1/apps"))
        .respond_with(move |_: &Request| match counter.fetch_add(1, Ordering::SeqCst) {
            0 => ResponseTemplate::new(500),
            1 => ResponseTemplate::new(503),
            _ => ResponseTemplate::new(200).set_body_json(serde_json::json!([])),
        })
        .expect(3)
        .mount(&server)
        .await;

    let client = ZdxClient::new(config(&server)).unwrap();
    let query = QueryBuilder::new().push("from", 1).push("to", 2);
    let apps: Vec<App> = client
        .get(&Context::new(), "/v1/apps", &query)
        .await
        .unwrap();
    assert!(apps.is_empty());
}

#[tokio::test]
async fn test_client_side_throttle_spaces_requests() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/oauth/token"))
        .respond_with(token_response("tok-1"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/apps"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([])))
        .expect(3)
        .mount(&server)
        .await;

    let config = Configuration::builder()
        .with_credentials("key-1", "secret")
        .with_base_url(server.uri())
        .with_rate_limit(
            RateLimitConfig::default()
                .with_limit(2)
                .with_window(Duration::from_millis(500))
                .with_additional_delay(Duration::ZERO),
        )
        .build()
        .unwrap();
    let client = ZdxClient::new(config).unwrap();
    let ctx = Context::new();

    let started = Instant::now();
    for _ in 0..3 {
        let _: Vec<App> = client.get(&ctx, "/v1/apps", &()).await.unwrap();
    }

    // Third GET had to wait for the first to leave the window.
    assert!(started.elapsed() >= Duration::from_millis(400));
}

// ============================================================================
// Authentication
// ============================================================================

#[tokio::test]
async fn test_concurrent_requests_share_one_token_fetch() {
    init_tracing();
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/oauth/token"))
        .respond_with(token_response("tok-1").set_delay(Duration::from_millis(100)))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/users"))
        .and(header("Authorization", "Bearer tok-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([])))
        .expect(8)
        .mount(&server)
        .await;

    let client = ZdxClient::new(config(&server)).unwrap();
    let ctx = Context::new();

    let results = futures::future::join_all((0..8).map(|_| {
        let client = client.clone();
        let ctx = ctx.clone();
        tokio::spawn(async move { client.get::<Vec<App>, _>(&ctx, "/v1/users", &()).await })
    }))
    .await;

    for result in results {
        assert!(result.unwrap().is_ok());
    }
    assert_eq!(client.authenticator().fetch_count(), 1);
}

#[tokio::test]
async fn test_rejected_token_is_refreshed_once() {
    let server = MockServer::start().await;

    let fetches = Arc::new(AtomicU32::new(0));
    let counter = fetches.clone();
    Mock::given(method("POST"))
        .and(path("/v1/oauth/token"))
        .respond_with(move |_: &Request| {
            let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
            token_response(&format!("tok-{n}"))
        })
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/devices"))
        .and(header("Authorization", "Bearer tok-1"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/devices"))
        .and(header("Authorization", "Bearer tok-2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([])))
        .expect(1)
        .mount(&server)
        .await;

    let client = ZdxClient::new(config(&server)).unwrap();
    let devices: Vec<App> = client
        .get(&Context::new(), "/v1/devices", &())
        .await
        .unwrap();
    assert!(devices.is_empty());
}

#[tokio::test]
async fn test_second_rejection_is_final() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/oauth/token"))
        .respond_with(token_response("tok-1"))
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/devices"))
        .respond_with(ResponseTemplate::new(401).set_body_json(serde_json::json!({
            "message": "token revoked"
        })))
        .expect(2)
        .mount(&server)
        .await;

    let client = ZdxClient::new(config(&server)).unwrap();
    let err = client
        .get::<Vec<App>, _>(&Context::new(), "/v1/devices", &())
        .await
        .unwrap_err();

    assert!(err.is_auth_error());
    assert!(matches!(err.kind, ErrorKind::Authentication(ref m) if m.contains("token revoked")));
}

// ============================================================================
// Cancellation
// ============================================================================

#[tokio::test]
async fn test_deadline_interrupts_slow_request() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/oauth/token"))
        .respond_with(token_response("tok-1"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/slow"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(serde_json::json!([]))
                .set_delay(Duration::from_secs(5)),
        )
        .mount(&server)
        .await;

    let client = ZdxClient::new(config(&server)).unwrap();
    let ctx = Context::new().with_timeout(Duration::from_millis(200));

    let started = Instant::now();
    let err = client
        .get::<Vec<App>, _>(&ctx, "/v1/slow", &())
        .await
        .unwrap_err();

    assert!(matches!(err.kind, ErrorKind::DeadlineExceeded));
    assert!(started.elapsed() < Duration::from_secs(2));
}

#[tokio::test]
async fn test_cancel_stops_retry_wait() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/oauth/token"))
        .respond_with(token_response("tok-1"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/apps"))
        .respond_with(
            ResponseTemplate::new(429)
                .insert_header("RateLimit-Remaining", "0")
                .insert_header("RateLimit-Reset", "30"),
        )
        .mount(&server)
        .await;

    let client = ZdxClient::new(config(&server)).unwrap();
    let ctx = Context::new();

    let canceller = ctx.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        canceller.cancel();
    });

    let started = Instant::now();
    let err = client
        .get::<Vec<App>, _>(&ctx, "/v1/apps", &())
        .await
        .unwrap_err();

    assert!(matches!(err.kind, ErrorKind::Cancelled));
    assert!(started.elapsed() < Duration::from_secs(5));
}
