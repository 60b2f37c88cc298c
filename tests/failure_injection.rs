//! Backend failures: failover, pass-through errors and timeouts.

use std::time::{Duration, Instant};

use serde_json::Value;
use tokio::net::TcpListener;
use topology_gateway::config::AuthMode;

mod common;

use common::{start_gateway, start_mock_backend, test_config, Canned};

const SERVICE: &str = "role = \"ECHO\"\nversion = \"1\"\npath = \"/echo\"\n";

const LINKED_SERVICE: &str = r#"
role = "ECHO"
version = "1"
path = "/echo"

[[rules]]
name = "ECHO/links"
direction = "outbound"
pattern = "*://*:*/{**}?{**}"
template = "{$frontend[url]}/echo/{**}?{**}"

[[dispatch.content]]
direction = "outbound"
types = ["application/json"]
paths = ["$..href"]
rule = "ECHO/links"
"#;

struct Stores {
    topologies: tempfile::TempDir,
    services: tempfile::TempDir,
}

fn stores(urls: &[String]) -> Stores {
    stores_with(SERVICE, urls)
}

fn stores_with(service: &str, urls: &[String]) -> Stores {
    let stores = Stores {
        topologies: tempfile::tempdir().unwrap(),
        services: tempfile::tempdir().unwrap(),
    };
    let dir = stores.services.path().join("echo/1");
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(dir.join("service.toml"), service).unwrap();

    let list = urls
        .iter()
        .map(|u| format!("\"{}\"", u))
        .collect::<Vec<_>>()
        .join(", ");
    std::fs::write(
        stores.topologies.path().join("t.toml"),
        format!("[[service]]\nrole = \"ECHO\"\nurls = [{}]\n", list),
    )
    .unwrap();
    stores
}

fn closed_port() -> String {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("http://{}", addr)
}

#[tokio::test]
async fn idempotent_requests_fail_over_to_a_live_target() {
    let live = start_mock_backend(vec![Canned::ok("/ping", "text/plain", "pong")]).await;
    let stores = stores(&[closed_port(), live.url()]);
    let mut config = test_config(stores.topologies.path(), stores.services.path());
    config.auth.mode = AuthMode::Anonymous;
    config.retries.max_attempts = 3;
    let gateway = start_gateway(config).await;

    // Round-robin start means either target may be tried first.
    for _ in 0..4 {
        let response = reqwest::get(format!("{}/echo/ping", gateway.topology_url("t")))
            .await
            .unwrap();
        assert_eq!(response.status(), 200);
        assert_eq!(response.text().await.unwrap(), "pong");
    }
}

#[tokio::test]
async fn backend_errors_pass_through_without_retry() {
    let backend = start_mock_backend(vec![Canned {
        path: "/boom".into(),
        status: 500,
        content_type: "text/plain",
        body: "exploded".into(),
    }])
    .await;
    let stores = stores(&[backend.url()]);
    let mut config = test_config(stores.topologies.path(), stores.services.path());
    config.auth.mode = AuthMode::Anonymous;
    let gateway = start_gateway(config).await;

    let response = reqwest::get(format!("{}/echo/boom", gateway.topology_url("t")))
        .await
        .unwrap();
    assert_eq!(response.status(), 500);
    assert_eq!(response.text().await.unwrap(), "exploded");
    assert_eq!(backend.requests().len(), 1);
}

#[tokio::test]
async fn silent_backend_times_out_as_gateway_timeout() {
    // Accepts connections and never answers.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((socket, _)) = listener.accept().await {
            held.push(socket);
        }
    });

    let stores = stores(&[format!("http://{}", addr)]);
    let mut config = test_config(stores.topologies.path(), stores.services.path());
    config.auth.mode = AuthMode::Anonymous;
    config.dispatch.request_timeout_secs = 1;
    let gateway = start_gateway(config).await;

    let start = Instant::now();
    let response = reqwest::get(format!("{}/echo/slow", gateway.topology_url("t")))
        .await
        .unwrap();
    assert_eq!(response.status(), 504);
    assert!(start.elapsed() < Duration::from_secs(5));
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"]["code"], "BACKEND_TIMEOUT");
}

#[tokio::test]
async fn oversized_request_body_is_rejected() {
    let backend = start_mock_backend(vec![Canned::ok("/upload", "text/plain", "ok")]).await;
    let stores = stores(&[backend.url()]);
    let mut config = test_config(stores.topologies.path(), stores.services.path());
    config.auth.mode = AuthMode::Anonymous;
    config.dispatch.max_request_body_bytes = 16;
    let gateway = start_gateway(config).await;

    let response = reqwest::Client::new()
        .post(format!("{}/echo/upload", gateway.topology_url("t")))
        .body(vec![b'x'; 1024])
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 413);
    assert!(backend.requests().is_empty());
}

#[tokio::test]
async fn oversized_rewritable_response_is_a_bad_gateway() {
    let items: Vec<Value> = (0..64)
        .map(|i| serde_json::json!({ "href": format!("http://backend:8080/items/{}", i) }))
        .collect();
    let body = serde_json::json!({ "items": items }).to_string();
    assert!(body.len() > 2048);

    let backend = start_mock_backend(vec![Canned::ok("/items", "application/json", body)]).await;
    let stores = stores_with(LINKED_SERVICE, &[backend.url()]);
    let mut config = test_config(stores.topologies.path(), stores.services.path());
    config.auth.mode = AuthMode::Anonymous;
    config.dispatch.max_buffered_response_bytes = 1024;
    let gateway = start_gateway(config).await;

    let response = reqwest::get(format!("{}/echo/items", gateway.topology_url("t")))
        .await
        .unwrap();
    assert_eq!(response.status(), 502);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"]["code"], "RESPONSE_TOO_LARGE");
    assert_eq!(backend.requests().len(), 1);
}
