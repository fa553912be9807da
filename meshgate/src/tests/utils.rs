//! Shared test fixtures: a scripted in-process HTTP upstream, a
//! call-counting store wrapper, and server construction helpers.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use uuid::Uuid;

use meshgate_types::{AuthClaims, Scope, ToolConfigRecord, ToolStatus};

use crate::config::GatewayConfig;
use crate::dispatch::Connection;
use crate::server::GatewayServer;
use crate::stores::{
    InMemoryDiscoveryStore, InMemoryExecutionStore, InMemoryToolConfigStore, InitializedStores,
    ToolConfigStore,
};

#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: String,
    pub target: String,
    pub headers: HashMap<String, String>,
    pub body: String,
}

/// Minimal scripted HTTP/1.1 upstream. Responses are consumed from a queue,
/// falling back to the default; every request is recorded.
pub struct TestUpstream {
    addr: SocketAddr,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
    responses: Arc<Mutex<VecDeque<(u16, String)>>>,
}

impl TestUpstream {
    pub async fn start(default_status: u16, default_body: &str) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("local addr");
        let requests: Arc<Mutex<Vec<RecordedRequest>>> = Arc::new(Mutex::new(Vec::new()));
        let responses: Arc<Mutex<VecDeque<(u16, String)>>> = Arc::new(Mutex::new(VecDeque::new()));

        let requests_task = requests.clone();
        let responses_task = responses.clone();
        let default = (default_status, default_body.to_string());
        tokio::spawn(async move {
            loop {
                let Ok((mut stream, _)) = listener.accept().await else {
                    break;
                };
                let requests = requests_task.clone();
                let responses = responses_task.clone();
                let default = default.clone();
                tokio::spawn(async move {
                    let mut buffer = Vec::new();
                    let mut chunk = [0u8; 4096];
                    let header_end = loop {
                        let Ok(n) = stream.read(&mut chunk).await else {
                            return;
                        };
                        if n == 0 {
                            return;
                        }
                        buffer.extend_from_slice(&chunk[..n]);
                        if let Some(pos) =
                            buffer.windows(4).position(|w| w == b"\r\n\r\n")
                        {
                            break pos + 4;
                        }
                        if buffer.len() > 1 << 20 {
                            return;
                        }
                    };

                    let head = String::from_utf8_lossy(&buffer[..header_end]).to_string();
                    let mut lines = head.split("\r\n");
                    let request_line = lines.next().unwrap_or_default();
                    let mut parts = request_line.split(' ');
                    let method = parts.next().unwrap_or_default().to_string();
                    let target = parts.next().unwrap_or_default().to_string();

                    let mut headers = HashMap::new();
                    let mut content_length = 0usize;
                    for line in lines {
                        if let Some((name, value)) = line.split_once(':') {
                            let name = name.trim().to_lowercase();
                            let value = value.trim().to_string();
                            if name == "content-length" {
                                content_length = value.parse().unwrap_or(0);
                            }
                            headers.insert(name, value);
                        }
                    }

                    let mut body_bytes = buffer[header_end..].to_vec();
                    while body_bytes.len() < content_length {
                        let Ok(n) = stream.read(&mut chunk).await else {
                            return;
                        };
                        if n == 0 {
                            break;
                        }
                        body_bytes.extend_from_slice(&chunk[..n]);
                    }

                    requests.lock().expect("requests lock").push(RecordedRequest {
                        method,
                        target,
                        headers,
                        body: String::from_utf8_lossy(&body_bytes).to_string(),
                    });

                    let (status, body) = responses
                        .lock()
                        .expect("responses lock")
                        .pop_front()
                        .unwrap_or(default);
                    let response = format!(
                        "HTTP/1.1 {status} X\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                        body.len()
                    );
                    let _ = stream.write_all(response.as_bytes()).await;
                    let _ = stream.shutdown().await;
                });
            }
        });

        Self {
            addr,
            requests,
            responses,
        }
    }

    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn queue_response(&self, status: u16, body: &str) {
        self.responses
            .lock()
            .expect("responses lock")
            .push_back((status, body.to_string()));
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().expect("requests lock").clone()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().expect("requests lock").len()
    }
}

/// Store wrapper counting list calls, for cache-behaviour assertions.
pub struct CountingToolStore {
    inner: InMemoryToolConfigStore,
    pub list_calls: AtomicUsize,
}

impl CountingToolStore {
    pub fn new() -> Self {
        Self {
            inner: InMemoryToolConfigStore::new(),
            list_calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl ToolConfigStore for CountingToolStore {
    async fn insert(&self, record: ToolConfigRecord) -> anyhow::Result<()> {
        self.inner.insert(record).await
    }

    async fn update(
        &self,
        record: ToolConfigRecord,
        expected_updated_at: DateTime<Utc>,
    ) -> anyhow::Result<bool> {
        self.inner.update(record, expected_updated_at).await
    }

    async fn get(&self, tenant_id: &str, id: Uuid) -> anyhow::Result<Option<ToolConfigRecord>> {
        self.inner.get(tenant_id, id).await
    }

    async fn get_by_name(
        &self,
        tenant_id: &str,
        name: &str,
    ) -> anyhow::Result<Option<ToolConfigRecord>> {
        self.inner.get_by_name(tenant_id, name).await
    }

    async fn list(
        &self,
        tenant_id: &str,
        status: Option<ToolStatus>,
    ) -> anyhow::Result<Vec<ToolConfigRecord>> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        self.inner.list(tenant_id, status).await
    }

    async fn list_active(&self) -> anyhow::Result<Vec<ToolConfigRecord>> {
        self.inner.list_active().await
    }
}

pub fn test_config() -> GatewayConfig {
    let mut config = GatewayConfig::default();
    config.encryption.master_key = Some("meshgate-test-master-key".to_string());
    config.http.request_timeout_secs = 5;
    config.discovery.probe_timeout_secs = 2;
    config.discovery.total_timeout_secs = 10;
    config
}

pub fn test_server() -> Arc<GatewayServer> {
    GatewayServer::new(test_config()).expect("server")
}

pub fn test_server_with_tools(
    tools: Arc<dyn ToolConfigStore>,
) -> Arc<GatewayServer> {
    let stores = InitializedStores {
        tools,
        discovery: Arc::new(InMemoryDiscoveryStore::new()),
        executions: Arc::new(InMemoryExecutionStore::new()),
    };
    GatewayServer::with_stores(test_config(), Arc::new(stores)).expect("server")
}

pub fn writer_conn(id: &str, tenant: &str) -> Arc<Connection> {
    Arc::new(Connection::new(
        id,
        Some(AuthClaims::new(tenant, [Scope::Read, Scope::Write])),
    ))
}

pub fn reader_conn(id: &str, tenant: &str) -> Arc<Connection> {
    Arc::new(Connection::new(
        id,
        Some(AuthClaims::new(tenant, [Scope::Read])),
    ))
}
