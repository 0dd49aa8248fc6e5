//! Shared helpers: a recording relay sink, mock backends and a proxy
//! bound to an ephemeral port.

#![allow(dead_code)]

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

use waypoint::http::parser::DEFAULT_MAX_BODY_SIZE;
use waypoint::http::response::StatusCode;
use waypoint::proxy::{MatchPolicy, ProxyEngine, RelaySink, Route, RouteTable, UpstreamSettings};
use waypoint::server::listener::serve;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayEvent {
    Status(u16),
    Header(Vec<u8>, Vec<u8>),
    EndHeaders,
    Chunk(Vec<u8>),
    Finish,
}

/// Records every call made by the relay, in order.
#[derive(Debug, Default)]
pub struct RecordingSink {
    pub events: Vec<RelayEvent>,
}

impl RecordingSink {
    pub fn status(&self) -> Option<u16> {
        self.events.iter().find_map(|e| match e {
            RelayEvent::Status(code) => Some(*code),
            _ => None,
        })
    }

    /// Relayed headers, lossily decoded for easy comparison.
    pub fn headers(&self) -> Vec<(String, String)> {
        self.events
            .iter()
            .filter_map(|e| match e {
                RelayEvent::Header(n, v) => Some((
                    String::from_utf8_lossy(n).into_owned(),
                    String::from_utf8_lossy(v).into_owned(),
                )),
                _ => None,
            })
            .collect()
    }

    pub fn body(&self) -> Vec<u8> {
        self.events
            .iter()
            .filter_map(|e| match e {
                RelayEvent::Chunk(c) => Some(c.as_slice()),
                _ => None,
            })
            .flatten()
            .copied()
            .collect()
    }
}

impl RelaySink for RecordingSink {
    async fn send_status(&mut self, status: StatusCode) -> io::Result<()> {
        self.events.push(RelayEvent::Status(status.as_u16()));
        Ok(())
    }

    async fn send_header(&mut self, name: &[u8], value: &[u8]) -> io::Result<()> {
        self.events
            .push(RelayEvent::Header(name.to_vec(), value.to_vec()));
        Ok(())
    }

    async fn end_headers(&mut self) -> io::Result<()> {
        self.events.push(RelayEvent::EndHeaders);
        Ok(())
    }

    async fn send_chunk(&mut self, chunk: &[u8]) -> io::Result<()> {
        self.events.push(RelayEvent::Chunk(chunk.to_vec()));
        Ok(())
    }

    async fn finish(&mut self) -> io::Result<()> {
        self.events.push(RelayEvent::Finish);
        Ok(())
    }

    fn status_sent(&self) -> bool {
        self.status().is_some()
    }
}

/// Asserts status → headers → end of headers → body → finish ordering.
pub fn assert_phase_order(events: &[RelayEvent]) {
    fn rank(event: &RelayEvent) -> u8 {
        match event {
            RelayEvent::Status(_) => 0,
            RelayEvent::Header(..) => 1,
            RelayEvent::EndHeaders => 2,
            RelayEvent::Chunk(_) => 3,
            RelayEvent::Finish => 4,
        }
    }
    let statuses = events
        .iter()
        .filter(|e| matches!(e, RelayEvent::Status(_)))
        .count();
    assert!(statuses <= 1, "status emitted {statuses} times");
    assert!(
        events.windows(2).all(|w| rank(&w[0]) <= rank(&w[1])),
        "out of order: {events:?}"
    );
}

pub fn route_table(pairs: &[(&str, u16)]) -> RouteTable {
    RouteTable::from_routes(
        pairs
            .iter()
            .map(|(prefix, port)| Route::new(*prefix, port.to_string())),
        MatchPolicy::LongestPrefix,
    )
}

pub fn loopback_settings() -> UpstreamSettings {
    UpstreamSettings {
        host: "127.0.0.1".to_string(),
        connect_timeout: Duration::from_secs(1),
        read_timeout: Some(Duration::from_secs(5)),
    }
}

pub struct MockBackend {
    pub addr: SocketAddr,
    pub requests: mpsc::UnboundedReceiver<Vec<u8>>,
    pub hits: Arc<AtomicUsize>,
}

impl MockBackend {
    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }

    /// The next request the backend received, exactly as sent.
    pub async fn next_raw_request(&mut self) -> Vec<u8> {
        tokio::time::timeout(Duration::from_secs(5), self.requests.recv())
            .await
            .expect("backend saw no request")
            .expect("backend channel closed")
    }

    /// The next request the backend received, lossily decoded.
    pub async fn next_request(&mut self) -> String {
        let raw = self.next_raw_request().await;
        String::from_utf8_lossy(&raw).into_owned()
    }
}

/// Backend that answers every request with `response` and then closes.
pub async fn spawn_backend(response: impl Into<Vec<u8>>) -> MockBackend {
    let response: Arc<Vec<u8>> = Arc::new(response.into());
    spawn_backend_with(move |mut socket, _request| {
        let response = response.clone();
        async move {
            let _ = socket.write_all(&response).await;
            let _ = socket.shutdown().await;
        }
    })
    .await
}

/// Backend that reads the request and then never answers.
pub async fn spawn_silent_backend() -> MockBackend {
    spawn_backend_with(|socket, _request| async move {
        tokio::time::sleep(Duration::from_secs(30)).await;
        drop(socket);
    })
    .await
}

pub async fn spawn_backend_with<F, Fut>(respond: F) -> MockBackend
where
    F: Fn(TcpStream, Vec<u8>) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = ()> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = mpsc::unbounded_channel();
    let hits = Arc::new(AtomicUsize::new(0));
    let respond = Arc::new(respond);

    let counter = hits.clone();
    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            counter.fetch_add(1, Ordering::SeqCst);
            let tx = tx.clone();
            let respond = respond.clone();
            tokio::spawn(async move {
                let request = read_full_request(&mut socket).await;
                let _ = tx.send(request.clone());
                respond(socket, request).await;
            });
        }
    });

    MockBackend {
        addr,
        requests: rx,
        hits,
    }
}

/// Reads one request: head plus a Content-Length body.
async fn read_full_request(socket: &mut TcpStream) -> Vec<u8> {
    let mut buf = Vec::new();
    let mut tmp = [0u8; 4096];
    loop {
        if let Some(end) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            let head = String::from_utf8_lossy(&buf[..end]).to_ascii_lowercase();
            let length = head
                .lines()
                .find_map(|l| l.strip_prefix("content-length:"))
                .and_then(|v| v.trim().parse::<usize>().ok())
                .unwrap_or(0);
            if buf.len() >= end + 4 + length {
                return buf;
            }
        }
        match socket.read(&mut tmp).await {
            Ok(0) | Err(_) => return buf,
            Ok(n) => buf.extend_from_slice(&tmp[..n]),
        }
    }
}

pub async fn spawn_proxy(routes: RouteTable, settings: UpstreamSettings) -> SocketAddr {
    spawn_proxy_with_body_limit(routes, settings, DEFAULT_MAX_BODY_SIZE).await
}

pub async fn spawn_proxy_with_body_limit(
    routes: RouteTable,
    settings: UpstreamSettings,
    max_body: usize,
) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let engine = Arc::new(ProxyEngine::new(routes, &settings));
    tokio::spawn(async move {
        let _ = serve(listener, engine, max_body).await;
    });
    addr
}

/// Whether `needle` occurs anywhere in `haystack`.
pub fn contains_bytes(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|w| w == needle)
}

/// Sends raw bytes and reads until the proxy closes the connection.
pub async fn send_raw(addr: SocketAddr, request: &[u8]) -> Vec<u8> {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(request).await.unwrap();
    let mut response = Vec::new();
    tokio::time::timeout(Duration::from_secs(10), stream.read_to_end(&mut response))
        .await
        .expect("proxy did not close the connection")
        .unwrap();
    response
}

/// A response as seen by the client: head text and de-chunked body.
pub struct ClientResponse {
    pub head: String,
    pub body: Vec<u8>,
    /// Chunked body ended with the zero-size chunk.
    pub complete: bool,
}

impl ClientResponse {
    pub fn status(&self) -> u16 {
        self.head
            .split_whitespace()
            .nth(1)
            .and_then(|c| c.parse().ok())
            .unwrap_or(0)
    }

    pub fn has_header(&self, name: &str) -> bool {
        let needle = format!("\r\n{}:", name.to_ascii_lowercase());
        self.head.to_ascii_lowercase().contains(&needle)
    }
}

pub fn parse_client_response(raw: &[u8]) -> ClientResponse {
    let end = raw
        .windows(4)
        .position(|w| w == b"\r\n\r\n")
        .expect("no header terminator in response");
    let head = String::from_utf8_lossy(&raw[..end + 2]).into_owned();
    let rest = &raw[end + 4..];

    if !head
        .to_ascii_lowercase()
        .contains("transfer-encoding: chunked")
    {
        return ClientResponse {
            head,
            body: rest.to_vec(),
            complete: true,
        };
    }

    let mut body = Vec::new();
    let mut pos = 0;
    loop {
        if pos > rest.len() {
            return ClientResponse { head, body, complete: false };
        }
        let Some(line_end) = rest[pos..].windows(2).position(|w| w == b"\r\n") else {
            return ClientResponse { head, body, complete: false };
        };
        let size_text = String::from_utf8_lossy(&rest[pos..pos + line_end]).into_owned();
        let size = usize::from_str_radix(size_text.trim(), 16).unwrap();
        pos += line_end + 2;
        if size == 0 {
            return ClientResponse { head, body, complete: true };
        }
        let available = rest.len().saturating_sub(pos).min(size);
        body.extend_from_slice(&rest[pos..pos + available]);
        if available < size {
            return ClientResponse { head, body, complete: false };
        }
        pos += size + 2;
    }
}
