//! Shared utilities for integration tests.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;

use security_proxy::config::ProxyConfig;
use security_proxy::http::HttpServer;
use security_proxy::lifecycle::Shutdown;
use security_proxy::rules::HookRegistry;

/// How the mock upstream frames the response body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framing {
    ContentLength,
    /// `Transfer-Encoding: chunked`, 512-byte chunks.
    Chunked,
    /// Chunked, but the connection closes before the final chunk.
    ChunkedTruncated,
}

/// What the mock upstream answers for one request.
#[derive(Debug, Clone)]
pub struct MockResponse {
    pub status: u16,
    pub content_type: &'static str,
    pub headers: Vec<(&'static str, &'static str)>,
    pub body: String,
    pub framing: Framing,
}

impl MockResponse {
    pub fn html(body: impl Into<String>) -> Self {
        Self {
            status: 200,
            content_type: "text/html; charset=utf-8",
            headers: vec![("X-Powered-By", "Nuxt")],
            body: body.into(),
            framing: Framing::ContentLength,
        }
    }

    #[allow(dead_code)]
    pub fn framed(mut self, framing: Framing) -> Self {
        self.framing = framing;
        self
    }

    #[allow(dead_code)]
    pub fn json(body: impl Into<String>) -> Self {
        Self {
            status: 200,
            content_type: "application/json",
            headers: Vec::new(),
            body: body.into(),
            framing: Framing::ContentLength,
        }
    }
}

/// Start a mock upstream on an ephemeral port. `respond` gets the request path.
pub async fn start_mock_upstream<F>(respond: F) -> SocketAddr
where
    F: Fn(&str) -> MockResponse + Send + Sync + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let respond = Arc::new(respond);

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            let respond = respond.clone();
            tokio::spawn(async move {
                let mut head = Vec::new();
                let mut buf = [0u8; 1024];
                while !head.windows(4).any(|w| w == b"\r\n\r\n") {
                    match socket.read(&mut buf).await {
                        Ok(0) | Err(_) => return,
                        Ok(n) => head.extend_from_slice(&buf[..n]),
                    }
                }
                let head = String::from_utf8_lossy(&head);
                let path = head.split_whitespace().nth(1).unwrap_or("/").to_string();

                let response = respond(&path);
                let reason = match response.status {
                    200 => "OK",
                    404 => "Not Found",
                    500 => "Internal Server Error",
                    _ => "Unknown",
                };
                let mut raw = format!(
                    "HTTP/1.1 {} {}\r\nContent-Type: {}\r\nConnection: close\r\n",
                    response.status, reason, response.content_type
                );
                if response.framing == Framing::ContentLength {
                    raw.push_str(&format!("Content-Length: {}\r\n", response.body.len()));
                } else {
                    raw.push_str("Transfer-Encoding: chunked\r\n");
                }
                for (name, value) in &response.headers {
                    raw.push_str(&format!("{name}: {value}\r\n"));
                }
                raw.push_str("\r\n");
                if socket.write_all(raw.as_bytes()).await.is_err() {
                    return;
                }

                match response.framing {
                    Framing::ContentLength => {
                        let _ = socket.write_all(response.body.as_bytes()).await;
                    }
                    Framing::Chunked | Framing::ChunkedTruncated => {
                        for chunk in response.body.as_bytes().chunks(512) {
                            let mut frame = format!("{:x}\r\n", chunk.len()).into_bytes();
                            frame.extend_from_slice(chunk);
                            frame.extend_from_slice(b"\r\n");
                            if socket.write_all(&frame).await.is_err() {
                                return;
                            }
                            let _ = socket.flush().await;
                            tokio::time::sleep(Duration::from_millis(5)).await;
                        }
                        if response.framing == Framing::Chunked {
                            let _ = socket.write_all(b"0\r\n\r\n").await;
                        }
                    }
                }
                let _ = socket.shutdown().await;
                tokio::time::sleep(Duration::from_millis(10)).await;
            });
        }
    });

    addr
}

/// Running proxy under test.
pub struct TestProxy {
    pub addr: SocketAddr,
    pub shutdown: Shutdown,
    pub config_updates: mpsc::UnboundedSender<ProxyConfig>,
}

impl TestProxy {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }
}

/// Start the proxy in front of `upstream` with the given config and hooks.
pub async fn start_proxy(mut config: ProxyConfig, upstream: SocketAddr, hooks: HookRegistry) -> TestProxy {
    config.upstream.address = upstream.to_string();
    config.observability.metrics_enabled = false;

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let shutdown = Shutdown::new();
    let server_shutdown = shutdown.subscribe();
    let (config_updates, updates_rx) = mpsc::unbounded_channel();

    let server = HttpServer::with_hooks(config, Arc::new(hooks)).unwrap();
    tokio::spawn(async move {
        let _ = server.run(listener, updates_rx, server_shutdown).await;
    });
    tokio::time::sleep(Duration::from_millis(50)).await;

    TestProxy {
        addr,
        shutdown,
        config_updates,
    }
}

/// Parse a config snippet, panicking on invalid test input.
#[allow(dead_code)]
pub fn config(src: &str) -> ProxyConfig {
    security_proxy::config::parse_config(src).unwrap()
}
