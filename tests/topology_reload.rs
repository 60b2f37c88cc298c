//! Topology lifecycle through the running gateway: prefix routing, failed
//! redeploys, removal and concurrent redeploys.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde_json::Value;
use topology_gateway::config::AuthMode;
use topology_gateway::services::ServiceRegistry;
use topology_gateway::topology::TopologyState;
use topology_gateway::TopologyService;

mod common;

use common::{start_gateway, start_mock_backend, test_config, Canned};

fn write_service(services: &Path, role: &str, path: &str, methods: &str) {
    let dir = services.join(role.to_lowercase()).join("1.0");
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(
        dir.join("service.toml"),
        format!(
            "role = \"{}\"\nversion = \"1.0\"\npath = \"{}\"\n\n[dispatch]\nmethods = [{}]\n",
            role, path, methods
        ),
    )
    .unwrap();
}

fn binding(role: &str, url: &str) -> String {
    format!("[[service]]\nrole = \"{}\"\nurls = [\"{}\"]\n\n", role, url)
}

struct Stores {
    topologies: tempfile::TempDir,
    services: tempfile::TempDir,
}

impl Stores {
    fn new() -> Self {
        let stores = Self {
            topologies: tempfile::tempdir().unwrap(),
            services: tempfile::tempdir().unwrap(),
        };
        write_service(stores.services.path(), "OUTER", "/a", "\"GET\", \"POST\"");
        write_service(stores.services.path(), "INNER", "/a/b", "\"GET\"");
        stores
    }

    fn write_topology(&self, name: &str, body: &str) {
        std::fs::write(self.topologies.path().join(format!("{}.toml", name)), body).unwrap();
    }

    fn config(&self) -> topology_gateway::GatewayConfig {
        let mut config = test_config(self.topologies.path(), self.services.path());
        config.auth.mode = AuthMode::Anonymous;
        config
    }
}

#[tokio::test]
async fn longest_prefix_selects_the_service() {
    let outer = start_mock_backend(vec![Canned::ok("/x", "text/plain", "outer")]).await;
    let inner = start_mock_backend(vec![Canned::ok("/c", "text/plain", "inner")]).await;
    let stores = Stores::new();
    stores.write_topology(
        "t",
        &format!("{}{}", binding("OUTER", &outer.url()), binding("INNER", &inner.url())),
    );
    let gateway = start_gateway(stores.config()).await;
    let client = reqwest::Client::new();

    let body = client
        .get(format!("{}/a/b/c", gateway.topology_url("t")))
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert_eq!(body, "inner");

    let body = client
        .get(format!("{}/a/x", gateway.topology_url("t")))
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert_eq!(body, "outer");

    assert_eq!(inner.requests()[0].target, "/c");
    assert_eq!(outer.requests()[0].target, "/x");
}

#[tokio::test]
async fn invalid_redeploy_keeps_the_old_topology_serving() {
    let backend = start_mock_backend(vec![Canned::ok("/x", "text/plain", "ok")]).await;
    let stores = Stores::new();
    stores.write_topology("t", &binding("OUTER", &backend.url()));
    let gateway = start_gateway(stores.config()).await;
    let url = format!("{}/a/x", gateway.topology_url("t"));
    let before = gateway.topologies.active("t").unwrap().generation;

    stores.write_topology("t", &binding("NO_SUCH_ROLE", "http://localhost:1"));
    let summary = gateway.topologies.reload_topologies().await.unwrap();
    assert!(summary.failed.contains_key("t"));

    let response = reqwest::get(&url).await.unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(response.text().await.unwrap(), "ok");

    let status = gateway.topologies.status("t").unwrap();
    assert_eq!(status.state, TopologyState::Active);
    assert_eq!(status.generation, Some(before));
    assert!(status.last_error.unwrap().contains("NO_SUCH_ROLE"));
}

#[tokio::test]
async fn deleted_topology_is_not_found_after_reload() {
    let backend = start_mock_backend(vec![Canned::ok("/x", "text/plain", "ok")]).await;
    let stores = Stores::new();
    stores.write_topology("t", &binding("OUTER", &backend.url()));
    let gateway = start_gateway(stores.config()).await;
    let url = format!("{}/a/x", gateway.topology_url("t"));
    assert_eq!(reqwest::get(&url).await.unwrap().status(), 200);

    std::fs::remove_file(stores.topologies.path().join("t.toml")).unwrap();
    let summary = gateway.topologies.reload_topologies().await.unwrap();
    assert_eq!(summary.removed, vec!["t"]);

    let response = reqwest::get(&url).await.unwrap();
    assert_eq!(response.status(), 404);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"]["code"], "TOPOLOGY_NOT_FOUND");
}

#[tokio::test]
async fn disallowed_method_is_rejected_with_allow_header() {
    let backend = start_mock_backend(vec![Canned::ok("/c", "text/plain", "inner")]).await;
    let stores = Stores::new();
    stores.write_topology("t", &binding("INNER", &backend.url()));
    let gateway = start_gateway(stores.config()).await;

    let response = reqwest::Client::new()
        .post(format!("{}/a/b/c", gateway.topology_url("t")))
        .body("{}")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 405);
    assert_eq!(response.headers()["allow"], "GET");
    assert!(backend.requests().is_empty());
}

#[tokio::test]
async fn unreachable_backend_is_a_bad_gateway() {
    let closed = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        format!("http://{}", addr)
    };
    let stores = Stores::new();
    stores.write_topology("t", &binding("OUTER", &closed));
    let gateway = start_gateway(stores.config()).await;

    let response = reqwest::get(format!("{}/a/x", gateway.topology_url("t")))
        .await
        .unwrap();
    assert_eq!(response.status(), 502);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"]["code"], "BACKEND_UNREACHABLE");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_readers_never_see_a_mixed_context() {
    let stores = Stores::new();
    let registry = ServiceRegistry::load(stores.services.path()).unwrap();
    let service = Arc::new(TopologyService::new(
        stores.topologies.path(),
        stores.services.path(),
        registry,
    ));
    let path = stores.topologies.path().join("t.toml");
    let both = |url: &str| format!("{}{}", binding("OUTER", url), binding("INNER", url));
    std::fs::write(&path, both("http://left:1")).unwrap();
    service.deploy_file(&path).await.unwrap();

    let done = Arc::new(AtomicBool::new(false));
    let mut readers = Vec::new();
    for _ in 0..4 {
        let service = Arc::clone(&service);
        let done = Arc::clone(&done);
        readers.push(tokio::spawn(async move {
            let mut observed = 0u64;
            loop {
                let finished = done.load(Ordering::Relaxed);
                let context = service.active("t").unwrap();
                let urls: Vec<String> = context
                    .services()
                    .iter()
                    .map(|s| s.targets[0].base_url.to_string())
                    .collect();
                assert_eq!(urls.len(), 2);
                assert_eq!(urls[0], urls[1], "generation {} is mixed", context.generation);
                observed += 1;
                if finished {
                    break;
                }
                tokio::task::yield_now().await;
            }
            observed
        }));
    }

    for i in 0..40 {
        let url = if i % 2 == 0 { "http://right:2" } else { "http://left:1" };
        std::fs::write(&path, both(url)).unwrap();
        service.deploy_file(&path).await.unwrap();
    }
    done.store(true, Ordering::Relaxed);

    for reader in readers {
        assert!(reader.await.unwrap() > 0);
    }
}
