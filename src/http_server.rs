// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (c) 2026 nervosys

//! HTTP server for the JSON-RPC endpoint
//!
//! A small HTTP/1.1 server built on tokio. Every connection carries one
//! request and is closed after the response.
//!
//! # Routes
//!
//! - `POST <rpc_path>`: JSON-RPC 2.0 request body, JSON-RPC response body
//! - `GET /health`: liveness plus the upstream connection state
//!
//! # Examples
//!
//! ```no_run
//! use std::sync::Arc;
//! use fgwlib::http_server::{HttpServer, HttpServerConfig};
//! use fgwlib::{CapabilityRegistry, Dispatcher, RpcServer};
//! use fgwlib::upstream::stub::StubClient;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let dispatcher = Dispatcher::new(Arc::new(StubClient::new()), CapabilityRegistry::flespi());
//!     let rpc = Arc::new(RpcServer::new(Arc::new(dispatcher)));
//!     let server = HttpServer::new(HttpServerConfig::default(), rpc).bind().await?;
//!     println!("Listening on http://{}", server.local_addr());
//!     server.serve().await?;
//!     Ok(())
//! }
//! ```

use std::collections::HashMap;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};

use crate::error::{GatewayError, Result};
use crate::rpc::{RpcError, RpcResponse, RpcServer, INTERNAL_ERROR};
use crate::upstream::Lifecycle;

/// Health check route
pub const HEALTH_PATH: &str = "/health";

/// Longest accepted request line or header line
const MAX_LINE: usize = 8192;

/// HTTP server configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpServerConfig {
    /// Bind address (default: "127.0.0.1")
    pub bind_address: String,
    /// Port (default: 8080, 0 picks a free port)
    pub port: u16,
    /// Path of the JSON-RPC endpoint (default: "/")
    pub rpc_path: String,
    /// Maximum request body size in bytes (default: 1MB)
    pub max_body_size: usize,
    /// Whether to log each request (default: true)
    pub request_logging: bool,
    /// Time allowed to receive a full request (default: 30)
    pub request_timeout_secs: u64,
}

impl Default for HttpServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1".into(),
            port: 8080,
            rpc_path: "/".into(),
            max_body_size: 1_048_576,
            request_logging: true,
            request_timeout_secs: 30,
        }
    }
}

/// Parsed HTTP request
#[derive(Debug, Clone, Default)]
pub struct HttpRequest {
    /// HTTP method, upper case
    pub method: String,
    /// Request path without query string
    pub path: String,
    /// Headers, lower-cased names
    pub headers: HashMap<String, String>,
    /// Raw body, decoded from chunked framing if needed
    pub body: Vec<u8>,
}

impl HttpRequest {
    /// Get a header value
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_lowercase()).map(|s| s.as_str())
    }
}

/// HTTP response
#[derive(Debug, Clone)]
pub struct HttpResponse {
    /// Status code
    pub status: u16,
    /// Headers
    pub headers: HashMap<String, String>,
    /// Body
    pub body: String,
}

impl HttpResponse {
    /// Create a JSON response
    pub fn json<T: Serialize>(status: u16, data: &T) -> Self {
        match serde_json::to_string(data) {
            Ok(body) => {
                let mut headers = HashMap::new();
                headers.insert("content-type".to_string(), "application/json".to_string());
                Self { status, headers, body }
            }
            Err(e) => Self::error(500, &format!("cannot serialize response: {}", e)),
        }
    }

    /// Create an error response
    pub fn error(status: u16, message: &str) -> Self {
        let mut headers = HashMap::new();
        headers.insert("content-type".to_string(), "application/json".to_string());
        let body = serde_json::json!({ "error": message, "status": status }).to_string();
        Self { status, headers, body }
    }

    /// 200 OK
    pub fn ok<T: Serialize>(data: &T) -> Self {
        Self::json(200, data)
    }

    /// 204 No Content
    pub fn no_content() -> Self {
        Self {
            status: 204,
            headers: HashMap::new(),
            body: String::new(),
        }
    }

    /// 400 Bad Request
    pub fn bad_request(message: &str) -> Self {
        Self::error(400, message)
    }

    /// 404 Not Found
    pub fn not_found(message: &str) -> Self {
        Self::error(404, message)
    }

    /// 405 Method Not Allowed
    pub fn method_not_allowed(allow: &str) -> Self {
        let mut response = Self::error(405, "Method not allowed");
        response.headers.insert("allow".to_string(), allow.to_string());
        response
    }

    /// 413 Payload Too Large
    pub fn payload_too_large(limit: usize) -> Self {
        Self::error(413, &format!("Request body exceeds {} bytes", limit))
    }

    /// Serialize status line, headers and body
    pub fn to_http(&self) -> String {
        let mut resp = format!("HTTP/1.1 {} {}\r\n", self.status, status_text(self.status));
        for (key, value) in &self.headers {
            resp.push_str(&format!("{}: {}\r\n", key, value));
        }
        resp.push_str(&format!("Content-Length: {}\r\n", self.body.len()));
        resp.push_str("Connection: close\r\n");
        resp.push_str("\r\n");
        resp.push_str(&self.body);
        resp
    }
}

/// Why a request could not be read off the wire
#[derive(Debug)]
enum ReadError {
    /// Peer closed before sending a request line
    Closed,
    Malformed(String),
    TooLarge,
    /// Transfer coding other than `chunked`
    Unsupported(String),
    Io(std::io::Error),
}

impl From<std::io::Error> for ReadError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

/// HTTP server that fronts an [`RpcServer`]
pub struct HttpServer {
    config: HttpServerConfig,
    rpc: Arc<RpcServer>,
    lifecycle: Option<Lifecycle>,
}

impl HttpServer {
    pub fn new(config: HttpServerConfig, rpc: Arc<RpcServer>) -> Self {
        Self {
            config,
            rpc,
            lifecycle: None,
        }
    }

    /// Report this lifecycle's state on the health route
    pub fn with_lifecycle(mut self, lifecycle: Lifecycle) -> Self {
        self.lifecycle = Some(lifecycle);
        self
    }

    pub fn config(&self) -> &HttpServerConfig {
        &self.config
    }

    /// Bind the listener without accepting yet
    pub async fn bind(self) -> Result<BoundServer> {
        let addr = format!("{}:{}", self.config.bind_address, self.config.port);
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| GatewayError::Network(format!("Failed to bind to {}: {}", addr, e)))?;
        let local_addr = listener.local_addr()?;
        Ok(BoundServer {
            server: Arc::new(self),
            listener,
            local_addr,
        })
    }

    /// Route one request
    pub async fn handle(&self, request: HttpRequest) -> HttpResponse {
        let path = request.path.as_str();
        let method = request.method.as_str();

        if path == self.config.rpc_path {
            return match method {
                "POST" => self.handle_rpc(&request.body).await,
                _ => HttpResponse::method_not_allowed("POST"),
            };
        }

        if path == HEALTH_PATH {
            return match method {
                "GET" => {
                    let upstream = self
                        .lifecycle
                        .as_ref()
                        .map(|l| l.state().to_string())
                        .unwrap_or_else(|| "unknown".into());
                    HttpResponse::ok(&serde_json::json!({
                        "status": "ok",
                        "upstream": upstream,
                        "methods": self.rpc.methods().count(),
                    }))
                }
                _ => HttpResponse::method_not_allowed("GET"),
            };
        }

        HttpResponse::not_found("Unknown route")
    }

    async fn handle_rpc(&self, body: &[u8]) -> HttpResponse {
        match self.rpc.receive_bytes(body).await {
            Some(response) => rpc_http_response(&response),
            None => HttpResponse::no_content(),
        }
    }

    async fn handle_connection(&self, stream: TcpStream, peer: SocketAddr) {
        let start = Instant::now();
        let mut reader = BufReader::new(stream);
        let limit = Duration::from_secs(self.config.request_timeout_secs);
        let read = read_request(&mut reader, self.config.max_body_size);

        let response = match tokio::time::timeout(limit, read).await {
            Err(_) => {
                log::debug!("request from {} timed out after {:?}", peer, limit);
                HttpResponse::error(408, "Request not received in time")
            }
            Ok(Ok(request)) => {
                let line = format!("{} {}", request.method, request.path);
                let response = self.handle(request).await;
                if self.config.request_logging {
                    log::info!(
                        "{} {} from {} {}ms",
                        line,
                        response.status,
                        peer,
                        start.elapsed().as_millis()
                    );
                }
                response
            }
            Ok(Err(ReadError::Closed)) => return,
            Ok(Err(ReadError::TooLarge)) => {
                HttpResponse::payload_too_large(self.config.max_body_size)
            }
            Ok(Err(ReadError::Unsupported(coding))) => HttpResponse::error(
                501,
                &format!("Transfer-Encoding '{}' is not supported", coding),
            ),
            Ok(Err(ReadError::Malformed(detail))) => {
                log::debug!("malformed request from {}: {}", peer, detail);
                HttpResponse::bad_request(&detail)
            }
            Ok(Err(ReadError::Io(e))) => {
                log::debug!("read error from {}: {}", peer, e);
                return;
            }
        };

        let mut stream = reader.into_inner();
        if let Err(e) = stream.write_all(response.to_http().as_bytes()).await {
            log::debug!("write error to {}: {}", peer, e);
        }
        let _ = stream.shutdown().await;
    }
}

/// A listening server
pub struct BoundServer {
    server: Arc<HttpServer>,
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl BoundServer {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Accept connections forever
    pub async fn serve(self) -> Result<()> {
        self.serve_with_shutdown(std::future::pending()).await
    }

    /// Accept connections until `shutdown` resolves. In-flight requests keep running.
    pub async fn serve_with_shutdown<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        log::info!(
            "JSON-RPC endpoint listening on http://{}{}",
            self.local_addr,
            self.server.config.rpc_path
        );
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    log::info!("HTTP server shutting down");
                    return Ok(());
                }
                accepted = self.listener.accept() => {
                    let (stream, peer) = match accepted {
                        Ok(conn) => conn,
                        Err(e) => {
                            log::warn!("accept error: {}", e);
                            continue;
                        }
                    };
                    let server = self.server.clone();
                    tokio::spawn(async move {
                        server.handle_connection(stream, peer).await;
                    });
                }
            }
        }
    }
}

fn rpc_http_response(response: &RpcResponse) -> HttpResponse {
    match serde_json::to_string(response) {
        Ok(body) => {
            let mut headers = HashMap::new();
            headers.insert("content-type".to_string(), "application/json".to_string());
            HttpResponse {
                status: 200,
                headers,
                body,
            }
        }
        Err(e) => HttpResponse::json(
            200,
            &RpcResponse::failure(
                response.id.clone(),
                RpcError::new(INTERNAL_ERROR, format!("cannot serialize result: {}", e)),
            ),
        ),
    }
}

/// Read one line, bounded by `MAX_LINE`, without the trailing CRLF
async fn read_line<R>(reader: &mut R) -> std::result::Result<Option<String>, ReadError>
where
    R: AsyncBufRead + Unpin,
{
    let mut buf = Vec::new();
    let n = (&mut *reader)
        .take(MAX_LINE as u64 + 1)
        .read_until(b'\n', &mut buf)
        .await?;
    if n == 0 {
        return Ok(None);
    }
    if n > MAX_LINE {
        return Err(ReadError::Malformed("header line too long".into()));
    }
    let line = String::from_utf8(buf)
        .map_err(|_| ReadError::Malformed("header is not valid UTF-8".into()))?;
    Ok(Some(line.trim_end_matches(&['\r', '\n'][..]).to_string()))
}

/// Read request line, headers and a `Content-Length` or chunked body
async fn read_request<R>(
    reader: &mut R,
    max_body: usize,
) -> std::result::Result<HttpRequest, ReadError>
where
    R: AsyncBufRead + Unpin,
{
    let request_line = read_line(reader).await?.ok_or(ReadError::Closed)?;
    let mut request = parse_request_line(&request_line)
        .ok_or_else(|| ReadError::Malformed(format!("bad request line '{}'", request_line)))?;

    loop {
        let line = read_line(reader)
            .await?
            .ok_or_else(|| ReadError::Malformed("connection closed inside headers".into()))?;
        if line.is_empty() {
            break;
        }
        if let Some(colon) = line.find(':') {
            let key = line[..colon].trim().to_lowercase();
            let value = line[colon + 1..].trim().to_string();
            request.headers.insert(key, value);
        }
    }

    // Transfer-Encoding takes precedence over Content-Length
    if let Some(coding) = request.header("transfer-encoding") {
        if !coding.eq_ignore_ascii_case("chunked") {
            return Err(ReadError::Unsupported(coding.to_string()));
        }
        request.body = read_chunked(reader, max_body).await?;
        return Ok(request);
    }

    let length = match request.header("content-length") {
        Some(v) => v
            .parse::<usize>()
            .map_err(|_| ReadError::Malformed(format!("bad content-length '{}'", v)))?,
        None => 0,
    };
    if length > max_body {
        return Err(ReadError::TooLarge);
    }

    let mut body = vec![0u8; length];
    reader.read_exact(&mut body).await?;
    request.body = body;
    Ok(request)
}

/// Decode a chunked body, enforcing `max_body` on the decoded size
async fn read_chunked<R>(reader: &mut R, max_body: usize) -> std::result::Result<Vec<u8>, ReadError>
where
    R: AsyncBufRead + Unpin,
{
    let mut body = Vec::new();
    loop {
        let line = read_line(reader)
            .await?
            .ok_or_else(|| ReadError::Malformed("connection closed inside chunked body".into()))?;
        let field = line.split(';').next().unwrap_or_default().trim();
        let size = usize::from_str_radix(field, 16)
            .map_err(|_| ReadError::Malformed(format!("bad chunk size '{}'", field)))?;
        if size == 0 {
            break;
        }
        if size > max_body - body.len() {
            return Err(ReadError::TooLarge);
        }

        let start = body.len();
        body.resize(start + size, 0);
        reader.read_exact(&mut body[start..]).await?;
        match read_line(reader).await? {
            Some(end) if end.is_empty() => {}
            _ => return Err(ReadError::Malformed("chunk not terminated by CRLF".into())),
        }
    }

    // Trailer section, ignored
    while let Some(line) = read_line(reader).await? {
        if line.is_empty() {
            break;
        }
    }
    Ok(body)
}

/// Parse `METHOD /path?query HTTP/1.1`
fn parse_request_line(line: &str) -> Option<HttpRequest> {
    let parts: Vec<&str> = line.split_whitespace().collect();
    if parts.len() < 2 {
        return None;
    }

    let method = parts[0].to_uppercase();
    let full_path = parts[1];

    // Routing ignores the query string
    let path = match full_path.split_once('?') {
        Some((path, _)) => path,
        None => full_path,
    };

    Some(HttpRequest {
        method,
        path: path.to_string(),
        ..Default::default()
    })
}

fn status_text(code: u16) -> &'static str {
    match code {
        200 => "OK",
        204 => "No Content",
        400 => "Bad Request",
        404 => "Not Found",
        405 => "Method Not Allowed",
        408 => "Request Timeout",
        413 => "Payload Too Large",
        500 => "Internal Server Error",
        501 => "Not Implemented",
        _ => "Unknown",
    }
}
