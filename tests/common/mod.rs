//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use topology_gateway::config::{AuthMode, GatewayConfig, UserCredential};
use topology_gateway::lifecycle::Shutdown;
use topology_gateway::{HttpServer, TopologyService};

/// One canned answer of a mock backend.
#[derive(Clone)]
pub struct Canned {
    pub path: String,
    pub status: u16,
    pub content_type: &'static str,
    pub body: String,
}

impl Canned {
    pub fn ok(path: &str, content_type: &'static str, body: impl Into<String>) -> Self {
        Self {
            path: path.to_string(),
            status: 200,
            content_type,
            body: body.into(),
        }
    }
}

/// The request line and headers a mock backend received.
#[derive(Debug, Clone)]
pub struct Recorded {
    pub method: String,
    pub target: String,
    pub headers: Vec<(String, String)>,
}

impl Recorded {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

pub struct MockBackend {
    pub addr: SocketAddr,
    requests: Arc<Mutex<Vec<Recorded>>>,
}

impl MockBackend {
    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn requests(&self) -> Vec<Recorded> {
        self.requests.lock().unwrap().clone()
    }
}

/// Start a backend that answers by request path (query ignored) and 404s otherwise.
pub async fn start_mock_backend(routes: Vec<Canned>) -> MockBackend {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let requests = Arc::new(Mutex::new(Vec::new()));
    let recorded = Arc::clone(&requests);
    let routes = Arc::new(routes);

    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((mut socket, _)) => {
                    let routes = Arc::clone(&routes);
                    let recorded = Arc::clone(&recorded);
                    tokio::spawn(async move {
                        let Some(request) = read_head(&mut socket).await else {
                            return;
                        };
                        let path = request.target.split('?').next().unwrap_or("").to_string();
                        recorded.lock().unwrap().push(request);

                        let canned = routes.iter().find(|c| c.path == path).cloned();
                        let (status, content_type, body) = match canned {
                            Some(c) => (c.status, c.content_type, c.body),
                            None => (404, "text/plain", "not found".to_string()),
                        };
                        let response = format!(
                            "HTTP/1.1 {} {}\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                            status,
                            reason(status),
                            content_type,
                            body.len(),
                            body
                        );
                        let _ = socket.write_all(response.as_bytes()).await;
                        let _ = socket.shutdown().await;
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    });
                }
                Err(_) => break,
            }
        }
    });

    MockBackend { addr, requests }
}

async fn read_head(socket: &mut tokio::net::TcpStream) -> Option<Recorded> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    while !buf.windows(4).any(|w| w == b"\r\n\r\n") {
        let n = socket.read(&mut chunk).await.ok()?;
        if n == 0 {
            return None;
        }
        buf.extend_from_slice(&chunk[..n]);
    }

    let text = String::from_utf8_lossy(&buf).to_string();
    let mut lines = text.split("\r\n");
    let mut request_line = lines.next()?.split(' ');
    let method = request_line.next()?.to_string();
    let target = request_line.next()?.to_string();
    let headers = lines
        .take_while(|l| !l.is_empty())
        .filter_map(|l| l.split_once(':'))
        .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        .collect();
    Some(Recorded {
        method,
        target,
        headers,
    })
}

fn reason(status: u16) -> &'static str {
    match status {
        200 => "OK",
        302 => "Found",
        404 => "Not Found",
        500 => "Internal Server Error",
        _ => "Unknown",
    }
}

/// Path of a file under `tests/fixtures`.
pub fn fixture(relative: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests/fixtures")
        .join(relative)
}

pub fn read_fixture(relative: &str) -> String {
    std::fs::read_to_string(fixture(relative)).unwrap()
}

/// Gateway configuration for tests: static Basic auth with guest/guest-password,
/// no file watching, short timeouts.
pub fn test_config(topology_dir: &Path, services_dir: &Path) -> GatewayConfig {
    let mut config = GatewayConfig::default();
    config.listener.bind_address = "127.0.0.1:0".to_string();
    config.gateway.topology_dir = topology_dir.display().to_string();
    config.gateway.services_dir = services_dir.display().to_string();
    config.gateway.watch_topologies = false;
    config.dispatch.connect_timeout_secs = 1;
    config.dispatch.request_timeout_secs = 5;
    config.retries.base_delay_ms = 1;
    config.retries.max_delay_ms = 5;
    config.auth.mode = AuthMode::Basic;
    config.auth.users = vec![UserCredential {
        username: "guest".to_string(),
        password: "guest-password".to_string(),
    }];
    config
}

pub struct RunningGateway {
    pub addr: SocketAddr,
    pub topologies: Arc<TopologyService>,
    shutdown: Shutdown,
}

impl RunningGateway {
    /// `http://<addr>/gateway/<topology>`
    pub fn topology_url(&self, topology: &str) -> String {
        format!("http://{}/gateway/{}", self.addr, topology)
    }
}

impl Drop for RunningGateway {
    fn drop(&mut self) {
        self.shutdown.trigger();
    }
}

/// Load the stores, deploy every topology and serve on an ephemeral port.
pub async fn start_gateway(config: GatewayConfig) -> RunningGateway {
    let topologies = Arc::new(TopologyService::open(&config.gateway).unwrap());
    topologies.reload_topologies().await.unwrap();

    let listener = TcpListener::bind(&config.listener.bind_address).await.unwrap();
    let addr = listener.local_addr().unwrap();
    let shutdown = Shutdown::new();
    let server = HttpServer::new(&config, Arc::clone(&topologies));
    let stop = shutdown.subscribe();
    tokio::spawn(async move {
        let _ = server.run(listener, stop).await;
    });

    RunningGateway {
        addr,
        topologies,
        shutdown,
    }
}
