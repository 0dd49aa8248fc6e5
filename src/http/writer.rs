use std::io;

use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::http::request::{Method, Request};
use crate::http::response::{Response, StatusCode};
use crate::proxy::relay::RelaySink;

const HTTP_VERSION: &str = "HTTP/1.1";

fn status_line(status: StatusCode) -> String {
    format!(
        "{} {} {}\r\n",
        HTTP_VERSION,
        status.as_u16(),
        status.reason_phrase()
    )
}

fn serialize_response(resp: &Response, include_body: bool) -> Vec<u8> {
    let mut buf = Vec::new();

    buf.extend_from_slice(status_line(resp.status).as_bytes());

    for (k, v) in &resp.headers {
        buf.extend_from_slice(k.as_bytes());
        buf.extend_from_slice(b": ");
        buf.extend_from_slice(v.as_bytes());
        buf.extend_from_slice(b"\r\n");
    }

    // Header/body separator
    buf.extend_from_slice(b"\r\n");

    if include_body {
        buf.extend_from_slice(&resp.body);
    }

    buf
}

/// Writes a fully built response generated by the server itself.
pub struct ResponseWriter {
    buffer: Vec<u8>,
    written: usize,
}

impl ResponseWriter {
    pub fn new(response: &Response) -> Self {
        Self {
            buffer: serialize_response(response, true),
            written: 0,
        }
    }

    /// Same headers, no body (answers to `HEAD`).
    pub fn head_only(response: &Response) -> Self {
        Self {
            buffer: serialize_response(response, false),
            written: 0,
        }
    }

    pub fn for_request(response: &Response, request: &Request) -> Self {
        if request.method == Method::HEAD {
            Self::head_only(response)
        } else {
            Self::new(response)
        }
    }

    pub async fn write_to_stream<W: AsyncWrite + Unpin>(
        &mut self,
        stream: &mut W,
    ) -> anyhow::Result<()> {
        while self.written < self.buffer.len() {
            let n = stream.write(&self.buffer[self.written..]).await?;

            if n == 0 {
                return Err(anyhow::anyhow!("connection closed while writing"));
            }

            self.written += n;
        }
        stream.flush().await?;

        Ok(())
    }
}

/// Backend connection options that would contradict our own framing.
fn is_connection_option(name: &[u8]) -> bool {
    name.eq_ignore_ascii_case(b"Connection") || name.eq_ignore_ascii_case(b"Keep-Alive")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Status,
    Headers,
    Body,
    Done,
}

/// A response streamed to the client as the backend produces it.
///
/// HTTP/1.1 clients get chunked framing; HTTP/1.0 clients get a body
/// delimited by closing the connection. No body is framed for `HEAD`
/// requests or for statuses that cannot carry one.
pub struct StreamingResponse<'a, W> {
    out: &'a mut W,
    head: Vec<u8>,
    phase: Phase,
    chunked: bool,
    head_request: bool,
    body_allowed: bool,
}

impl<'a, W: AsyncWrite + Unpin + Send> StreamingResponse<'a, W> {
    pub fn new(out: &'a mut W, request: &Request) -> Self {
        Self {
            out,
            head: Vec::with_capacity(512),
            phase: Phase::Status,
            chunked: request.is_http11(),
            head_request: request.method == Method::HEAD,
            body_allowed: true,
        }
    }

    /// The close-delimited framing writes its own `Connection: close`.
    fn closes_connection(&self) -> bool {
        self.body_allowed && !self.chunked
    }

    /// Whether the connection may carry another request after this response.
    pub fn reusable(&self) -> bool {
        self.phase == Phase::Done && (self.chunked || !self.body_allowed)
    }

    fn expect(&self, phase: Phase, call: &str) -> io::Result<()> {
        if self.phase == phase {
            Ok(())
        } else {
            Err(io::Error::other(format!(
                "{call} called during {:?} phase",
                self.phase
            )))
        }
    }
}

impl<W: AsyncWrite + Unpin + Send> RelaySink for StreamingResponse<'_, W> {
    async fn send_status(&mut self, status: StatusCode) -> io::Result<()> {
        self.expect(Phase::Status, "send_status")?;
        self.body_allowed = !self.head_request && status.allows_body();
        self.head.extend_from_slice(status_line(status).as_bytes());
        self.phase = Phase::Headers;
        Ok(())
    }

    async fn send_header(&mut self, name: &[u8], value: &[u8]) -> io::Result<()> {
        self.expect(Phase::Headers, "send_header")?;
        if self.closes_connection() && is_connection_option(name) {
            return Ok(());
        }
        self.head.extend_from_slice(name);
        self.head.extend_from_slice(b": ");
        self.head.extend_from_slice(value);
        self.head.extend_from_slice(b"\r\n");
        Ok(())
    }

    async fn end_headers(&mut self) -> io::Result<()> {
        self.expect(Phase::Headers, "end_headers")?;
        if self.body_allowed {
            if self.chunked {
                self.head.extend_from_slice(b"Transfer-Encoding: chunked\r\n");
            } else {
                self.head.extend_from_slice(b"Connection: close\r\n");
            }
        }
        self.head.extend_from_slice(b"\r\n");

        self.out.write_all(&self.head).await?;
        self.out.flush().await?;
        self.head.clear();
        self.phase = Phase::Body;
        Ok(())
    }

    async fn send_chunk(&mut self, chunk: &[u8]) -> io::Result<()> {
        self.expect(Phase::Body, "send_chunk")?;
        if chunk.is_empty() || !self.body_allowed {
            return Ok(());
        }

        if self.chunked {
            self.out
                .write_all(format!("{:x}\r\n", chunk.len()).as_bytes())
                .await?;
            self.out.write_all(chunk).await?;
            self.out.write_all(b"\r\n").await?;
        } else {
            self.out.write_all(chunk).await?;
        }
        self.out.flush().await
    }

    async fn finish(&mut self) -> io::Result<()> {
        self.expect(Phase::Body, "finish")?;
        if self.body_allowed && self.chunked {
            self.out.write_all(b"0\r\n\r\n").await?;
        }
        self.out.flush().await?;
        self.phase = Phase::Done;
        Ok(())
    }

    fn status_sent(&self) -> bool {
        self.phase != Phase::Status
    }
}
