// Integration test for the HTTP front end over a real upstream.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
    routing::get,
    Router,
};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use offline_cache_engine::api::bootstrap;
use offline_cache_engine::{CacheConfig, CacheRequest, WorkerState};

/// Fake upstream counting how often `/missing` is fetched.
async fn start_upstream() -> (String, Arc<AtomicUsize>, JoinHandle<()>) {
    let missing_hits = Arc::new(AtomicUsize::new(0));
    let app = Router::new()
        .route(
            "/index.html",
            get(|| async { ([(header::CONTENT_TYPE, "text/html")], "<h1>app</h1>") }),
        )
        .route("/app.js", get(|| async { "console.log(1)" }))
        .route(
            "/missing",
            get(|State(hits): State<Arc<AtomicUsize>>| async move {
                hits.fetch_add(1, Ordering::SeqCst);
                "fresh"
            }),
        )
        .route(
            "/broken",
            get(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "boom").into_response() }),
        )
        .with_state(missing_hits.clone());

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let handle = tokio::spawn(async move {
        axum::serve(listener, app).await.ok();
    });
    (format!("http://127.0.0.1:{}/", port), missing_hits, handle)
}

fn config(scope: &str, cache_dir: &std::path::Path) -> CacheConfig {
    CacheConfig::from_json_str(&format!(
        r#"{{
            "version": "v1",
            "scope": "{}",
            "cache_dir": "{}",
            "manifest": {{ "trusted": ["/index.html", "/app.js"] }}
        }}"#,
        scope,
        cache_dir.display()
    ))
    .unwrap()
}

#[tokio::test]
async fn test_cache_server() {
    bootstrap::init_tracing();
    let (scope, missing_hits, _upstream) = start_upstream().await;
    let tmp_dir = tempfile::tempdir().unwrap();

    let running = bootstrap::start(config(&scope, tmp_dir.path())).await.unwrap();
    assert_eq!(running.controller().state(), WorkerState::Activated);
    let client = reqwest::Client::new();

    // Warmed asset is a cache hit with its original headers.
    let resp = client.get(running.url_for("/index.html")).send().await.unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(resp.headers()["x-cache"], "HIT");
    assert_eq!(resp.headers()["content-type"], "text/html");
    assert_eq!(resp.text().await.unwrap(), "<h1>app</h1>");

    // First request for an unwarmed asset goes to the network.
    let resp = client.get(running.url_for("/missing")).send().await.unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(resp.headers()["x-cache"], "MISS");
    assert_eq!(resp.text().await.unwrap(), "fresh");

    // Wait for the background write, then the same request is a hit.
    let key = CacheRequest::parse(&format!("{}missing", scope)).unwrap().key();
    let store = running.controller().handler().store().clone();
    let mut stored = None;
    for _ in 0..100 {
        stored = store.match_in("v1", &key).await.unwrap();
        if stored.is_some() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(&stored.unwrap().body[..], b"fresh");

    let resp = client.get(running.url_for("/missing")).send().await.unwrap();
    assert_eq!(resp.headers()["x-cache"], "HIT");
    assert_eq!(resp.text().await.unwrap(), "fresh");
    assert_eq!(missing_hits.load(Ordering::SeqCst), 1);

    // Same-origin errors exhaust both attempts and surface as a gateway error.
    let resp = client.get(running.url_for("/broken")).send().await.unwrap();
    assert_eq!(resp.status(), 502);

    // Only GET and HEAD are intercepted.
    let resp = client.post(running.url_for("/index.html")).send().await.unwrap();
    assert_eq!(resp.status(), 405);

    let stats = running.stats();
    assert!(stats.cache_hits >= 2);
    assert!(stats.cache_misses >= 2);

    running.shutdown();
}

#[tokio::test]
async fn test_start_fails_when_manifest_asset_is_unavailable() {
    let (scope, _, _upstream) = start_upstream().await;
    let tmp_dir = tempfile::tempdir().unwrap();
    let mut config = config(&scope, tmp_dir.path());
    config.manifest.trusted.push("/does-not-exist".to_string());

    assert!(bootstrap::start(config).await.is_err());
}

#[tokio::test]
async fn test_restart_without_network_serves_warmed_generation() {
    let (scope, _, upstream) = start_upstream().await;
    let tmp_dir = tempfile::tempdir().unwrap();

    let first = bootstrap::start(config(&scope, tmp_dir.path())).await.unwrap();
    first.shutdown();

    // Take the upstream down, then restart on the same cache dir.
    upstream.abort();
    let _ = upstream.await;

    let running = bootstrap::start(config(&scope, tmp_dir.path())).await.unwrap();
    assert_eq!(running.controller().state(), WorkerState::Activated);

    let client = reqwest::Client::new();
    let resp = client.get(running.url_for("/index.html")).send().await.unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(resp.headers()["x-cache"], "HIT");
    assert_eq!(resp.text().await.unwrap(), "<h1>app</h1>");

    // Anything not cached still fails at the gateway.
    let resp = client.get(running.url_for("/missing")).send().await.unwrap();
    assert_eq!(resp.status(), 502);

    running.shutdown();
}
