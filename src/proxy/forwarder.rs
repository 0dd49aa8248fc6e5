//! Outbound request construction and dispatch to a loopback backend.

use std::time::Duration;

use bytes::Bytes;
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, percent_encode};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::time::timeout;

use crate::http::request::{Method, Request};
use crate::proxy::error::ForwardError;
use crate::proxy::relay::{RelaySink, relay_response};
use crate::proxy::routes::Route;
use crate::proxy::upstream::UpstreamResponse;

/// Everything but RFC 3986 unreserved characters is escaped in a segment.
const SEGMENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

/// Percent-encodes a residual path one segment at a time.
///
/// Empty segments are dropped, a trailing slash survives, and an empty
/// result becomes `/`. Bytes are encoded as they are, so decoding the
/// result gives back the original bytes even when they are not UTF-8.
///
/// ```
/// # use waypoint::proxy::forwarder::encode_path;
/// assert_eq!(encode_path("users/john doe/"), "/users/john%20doe/");
/// assert_eq!(encode_path(b"caf\xe9"), "/caf%E9");
/// assert_eq!(encode_path(""), "/");
/// ```
pub fn encode_path(residual: impl AsRef<[u8]>) -> String {
    let residual = residual.as_ref();
    let mut encoded = String::with_capacity(residual.len() + 1);
    for segment in residual.split(|&b| b == b'/').filter(|s| !s.is_empty()) {
        encoded.push('/');
        encoded.extend(percent_encode(segment, SEGMENT));
    }

    if residual.ends_with(b"/") {
        encoded.push('/');
    }
    if encoded.is_empty() {
        encoded.push('/');
    }
    encoded
}

/// The request sent to a backend on behalf of a client.
#[derive(Debug, Clone)]
pub struct OutboundRequest {
    pub method: Method,
    /// `host:port` of the backend
    pub authority: String,
    /// Encoded path plus the client's raw query string
    pub path_and_query: String,
    /// Copied verbatim from the inbound request
    pub headers: Vec<(String, Bytes)>,
    pub body: Option<Bytes>,
}

impl OutboundRequest {
    pub fn build(host: &str, route: &Route, residual: &[u8], request: &Request) -> Self {
        let mut path_and_query = encode_path(residual);
        if let Some(query) = request.query.as_deref().filter(|q| !q.is_empty()) {
            path_and_query.push('?');
            path_and_query.push_str(query);
        }

        let body = (request.content_length() > 0).then(|| request.body.clone());

        Self {
            method: request.method.clone(),
            authority: format!("{}:{}", host, route.target_port),
            path_and_query,
            headers: request.headers.clone(),
            body,
        }
    }

    /// `host:port/path?query`
    pub fn target_uri(&self) -> String {
        format!("{}{}", self.authority, self.path_and_query)
    }

    /// Request line and headers, terminated by the blank line.
    pub fn head_bytes(&self) -> Vec<u8> {
        let mut buffer = Vec::with_capacity(256);
        buffer.extend_from_slice(
            format!("{} {} HTTP/1.1\r\n", self.method, self.path_and_query).as_bytes(),
        );
        for (key, value) in &self.headers {
            buffer.extend_from_slice(key.as_bytes());
            buffer.extend_from_slice(b": ");
            buffer.extend_from_slice(value);
            buffer.extend_from_slice(b"\r\n");
        }
        buffer.extend_from_slice(b"\r\n");
        buffer
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buffer = self.head_bytes();
        if let Some(body) = &self.body {
            buffer.extend_from_slice(body);
        }
        buffer
    }
}

/// Settings for reaching backends.
#[derive(Debug, Clone)]
pub struct UpstreamSettings {
    /// Loopback host the route ports live on
    pub host: String,
    pub connect_timeout: Duration,
    /// Per-read idle limit on backend responses; `None` waits forever.
    pub read_timeout: Option<Duration>,
}

impl Default for UpstreamSettings {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            connect_timeout: Duration::from_secs(5),
            read_timeout: Some(Duration::from_secs(60)),
        }
    }
}

/// Long-lived, immutable client state shared by all forwards. Every
/// forward opens its own connection, so no per-request state lives here.
#[derive(Debug, Clone)]
pub struct UpstreamClient {
    host: String,
    connect_timeout: Duration,
    read_timeout: Option<Duration>,
}

impl UpstreamClient {
    pub fn new(settings: &UpstreamSettings) -> Result<Self, ForwardError> {
        let unavailable = |reason: String| {
            ForwardError::ClientUnavailable(format!(
                "invalid upstream host {:?}: {}",
                settings.host, reason
            ))
        };

        let url = url::Url::parse(&format!("http://{}/", settings.host))
            .map_err(|e| unavailable(e.to_string()))?;
        if url.port().is_some() || url.path() != "/" || !url.username().is_empty() {
            return Err(unavailable("expected a bare host name or address".to_string()));
        }
        let host = url
            .host_str()
            .ok_or_else(|| unavailable("missing host".to_string()))?;

        Ok(Self {
            host: host.to_string(),
            connect_timeout: settings.connect_timeout,
            read_timeout: settings.read_timeout,
        })
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    async fn connect(&self, port: &str) -> Result<TcpStream, ForwardError> {
        let target = format!("{}:{}", self.host, port);
        timeout(self.connect_timeout, TcpStream::connect(&target))
            .await
            .map_err(|_| ForwardError::Timeout("connect"))?
            .map_err(|source| ForwardError::Connect { target, source })
    }
}

/// Issues outbound requests and relays their responses.
#[derive(Debug)]
pub struct RequestForwarder {
    client: Result<UpstreamClient, String>,
}

impl RequestForwarder {
    /// Acquires the upstream client. A failure here is logged and kept:
    /// every later forward fails fast without touching the network.
    pub fn new(settings: &UpstreamSettings) -> Self {
        let client = UpstreamClient::new(settings).map_err(|e| {
            tracing::error!(error = %e, "Upstream client initialisation failed");
            e.to_string()
        });
        Self { client }
    }

    pub fn is_available(&self) -> bool {
        self.client.is_ok()
    }

    pub async fn forward<S: RelaySink>(
        &self,
        route: &Route,
        residual: &[u8],
        request: &Request,
        sink: &mut S,
    ) -> Result<(), ForwardError> {
        let client = self
            .client
            .as_ref()
            .map_err(|reason| ForwardError::ClientUnavailable(reason.clone()))?;

        let outbound = OutboundRequest::build(client.host(), route, residual, request);

        tracing::debug!(
            method = %outbound.method,
            target = %outbound.target_uri(),
            body = outbound.body.as_ref().map_or(0, |b| b.len()),
            "Forwarding request to backend"
        );

        let mut stream = client.connect(&route.target_port).await?;
        stream.write_all(&outbound.head_bytes()).await?;
        if let Some(body) = &outbound.body {
            stream.write_all(body).await?;
        }
        stream.flush().await?;

        let mut response = UpstreamResponse::new(stream, request.method == Method::HEAD)
            .with_read_timeout(client.read_timeout);
        relay_response(&mut response, sink).await
    }
}
