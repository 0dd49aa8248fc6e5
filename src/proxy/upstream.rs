//! Incremental HTTP/1.1 response reader for backend connections.
//!
//! The head is read first; the body is then pulled one chunk at a time so
//! nothing larger than the read buffer is ever held in memory. Chunked
//! transfer coding is decoded here, which is why the relay can drop the
//! backend's framing headers.

use std::time::Duration;

use bytes::{Buf, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::time::timeout;

use crate::http::parser::{find_headers_end, head_lines};
use crate::http::response::StatusCode;
use crate::proxy::error::ForwardError;

/// Default buffer size for streaming
const BUFFER_SIZE: usize = 8192;

/// Largest status line plus headers accepted from a backend.
const MAX_HEAD_SIZE: usize = 64 * 1024;

/// Largest chunk-size or trailer line accepted.
const MAX_LINE_SIZE: usize = 4096;

/// Status line and headers of a backend response, exactly as received.
/// Header names and values are raw bytes; HTTP does not promise UTF-8.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseHead {
    pub status: StatusCode,
    pub headers: Vec<(Bytes, Bytes)>,
}

impl ResponseHead {
    pub fn header(&self, key: &str) -> Option<&[u8]> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key.as_bytes()))
            .map(|(_, v)| v.as_ref())
    }
}

/// How the body following a response head is delimited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyFraming {
    Empty,
    Length(u64),
    Chunked,
    UntilClose,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChunkState {
    Size,
    Data(u64),
    DataEnd,
    Trailers,
    Done,
}

pub struct UpstreamResponse<R> {
    reader: R,
    buffer: BytesMut,
    read_timeout: Option<Duration>,
    head_request: bool,
    framing: BodyFraming,
    chunk_state: ChunkState,
}

impl<R: AsyncRead + Unpin> UpstreamResponse<R> {
    /// `head_request` must be true when the request was `HEAD`; such
    /// responses never carry a body whatever their headers say.
    pub fn new(reader: R, head_request: bool) -> Self {
        Self {
            reader,
            buffer: BytesMut::with_capacity(BUFFER_SIZE),
            read_timeout: None,
            head_request,
            framing: BodyFraming::Empty,
            chunk_state: ChunkState::Size,
        }
    }

    /// Bounds every individual read from the backend.
    pub fn with_read_timeout(mut self, read_timeout: Option<Duration>) -> Self {
        self.read_timeout = read_timeout;
        self
    }

    /// Reads the final response head.
    ///
    /// Interim 1xx heads (`100 Continue` and friends) are consumed and
    /// skipped. `101 Switching Protocols` is final.
    pub async fn read_head(&mut self) -> Result<ResponseHead, ForwardError> {
        loop {
            let head = self.read_one_head().await?;
            if head.status.is_informational() && head.status.as_u16() != 101 {
                tracing::debug!(status = head.status.as_u16(), "Skipping interim response");
                continue;
            }

            self.framing = framing_for(&head, self.head_request)?;
            self.chunk_state = ChunkState::Size;
            return Ok(head);
        }
    }

    /// Returns the next decoded body chunk, or `None` once the body is done.
    pub async fn next_chunk(&mut self) -> Result<Option<Bytes>, ForwardError> {
        match self.framing {
            BodyFraming::Empty => Ok(None),
            BodyFraming::Length(0) => Ok(None),
            BodyFraming::Length(remaining) => {
                if self.buffer.is_empty() && self.fill().await? == 0 {
                    return Err(ForwardError::UnexpectedEof);
                }
                let chunk = self.take(remaining);
                self.framing = BodyFraming::Length(remaining - chunk.len() as u64);
                Ok(Some(chunk))
            }
            BodyFraming::UntilClose => {
                if self.buffer.is_empty() && self.fill().await? == 0 {
                    return Ok(None);
                }
                Ok(Some(self.buffer.split().freeze()))
            }
            BodyFraming::Chunked => self.next_chunked().await,
        }
    }

    async fn next_chunked(&mut self) -> Result<Option<Bytes>, ForwardError> {
        loop {
            match self.chunk_state {
                ChunkState::Size => {
                    let line = self.read_line().await?;
                    let size = parse_chunk_size(&line)?;
                    self.chunk_state = if size == 0 {
                        ChunkState::Trailers
                    } else {
                        ChunkState::Data(size)
                    };
                }
                ChunkState::Data(remaining) => {
                    if self.buffer.is_empty() && self.fill().await? == 0 {
                        return Err(ForwardError::UnexpectedEof);
                    }
                    let chunk = self.take(remaining);
                    let left = remaining - chunk.len() as u64;
                    self.chunk_state = if left == 0 {
                        ChunkState::DataEnd
                    } else {
                        ChunkState::Data(left)
                    };
                    return Ok(Some(chunk));
                }
                ChunkState::DataEnd => {
                    let line = self.read_line().await?;
                    if !line.is_empty() {
                        return Err(ForwardError::MalformedResponse(
                            "missing CRLF after chunk data".to_string(),
                        ));
                    }
                    self.chunk_state = ChunkState::Size;
                }
                ChunkState::Trailers => {
                    // Trailer fields are not relayed.
                    let line = self.read_line().await?;
                    if line.is_empty() {
                        self.chunk_state = ChunkState::Done;
                    }
                }
                ChunkState::Done => return Ok(None),
            }
        }
    }

    async fn read_one_head(&mut self) -> Result<ResponseHead, ForwardError> {
        loop {
            if let Some(end) = find_headers_end(&self.buffer) {
                let head = self.buffer.split_to(end + 4).freeze();
                return parse_response_head(&head.slice(..end));
            }

            if self.buffer.len() > MAX_HEAD_SIZE {
                return Err(ForwardError::MalformedResponse(
                    "response headers too large".to_string(),
                ));
            }

            if self.fill().await? == 0 {
                return Err(ForwardError::UnexpectedEof);
            }
        }
    }

    /// Reads one CRLF-terminated line, without the terminator.
    async fn read_line(&mut self) -> Result<Vec<u8>, ForwardError> {
        loop {
            if let Some(pos) = self.buffer.windows(2).position(|w| w == b"\r\n") {
                let line = self.buffer.split_to(pos).to_vec();
                self.buffer.advance(2);
                return Ok(line);
            }

            if self.buffer.len() > MAX_LINE_SIZE {
                return Err(ForwardError::MalformedResponse(
                    "chunk line too long".to_string(),
                ));
            }

            if self.fill().await? == 0 {
                return Err(ForwardError::UnexpectedEof);
            }
        }
    }

    fn take(&mut self, limit: u64) -> Bytes {
        let n = usize::try_from(limit)
            .unwrap_or(usize::MAX)
            .min(self.buffer.len());
        self.buffer.split_to(n).freeze()
    }

    async fn fill(&mut self) -> Result<usize, ForwardError> {
        self.buffer.reserve(BUFFER_SIZE);
        let read = self.reader.read_buf(&mut self.buffer);
        let n = match self.read_timeout {
            Some(limit) => timeout(limit, read)
                .await
                .map_err(|_| ForwardError::Timeout("response read"))??,
            None => read.await?,
        };
        Ok(n)
    }
}

/// Parses a status line and header block (without the trailing blank line).
///
/// Only the status line is read as text. Each header line is split at its
/// first `:` and the parts are sliced out of `head` without copying.
pub fn parse_response_head(head: &Bytes) -> Result<ResponseHead, ForwardError> {
    let mut lines = head_lines(head);
    let status_line = lines
        .next()
        .ok_or_else(|| ForwardError::MalformedResponse("empty response".to_string()))?;
    let status = parse_status_line(&String::from_utf8_lossy(status_line))?;

    let headers = lines
        .filter_map(|line| {
            let colon = line.iter().position(|&b| b == b':')?;
            let name = line[..colon].trim_ascii_end();
            let value = line[colon + 1..].trim_ascii();
            Some((head.slice_ref(name), head.slice_ref(value)))
        })
        .collect();

    Ok(ResponseHead { status, headers })
}

fn parse_status_line(line: &str) -> Result<StatusCode, ForwardError> {
    let invalid = || ForwardError::MalformedResponse(format!("invalid status line: {line}"));

    let mut parts = line.split_whitespace();
    let version = parts.next().ok_or_else(invalid)?;
    if !version.starts_with("HTTP/1.") {
        return Err(invalid());
    }

    let code: u16 = parts
        .next()
        .and_then(|code| code.parse().ok())
        .ok_or_else(invalid)?;
    if !(100..=999).contains(&code) {
        return Err(invalid());
    }

    Ok(StatusCode::from_u16(code))
}

fn framing_for(head: &ResponseHead, head_request: bool) -> Result<BodyFraming, ForwardError> {
    if head_request || !head.status.allows_body() {
        return Ok(BodyFraming::Empty);
    }

    if let Some(codings) = head.header("Transfer-Encoding") {
        let chunked = codings
            .rsplit(|&b| b == b',')
            .next()
            .is_some_and(|last| last.trim_ascii().eq_ignore_ascii_case(b"chunked"));
        return Ok(if chunked {
            BodyFraming::Chunked
        } else {
            BodyFraming::UntilClose
        });
    }

    match head.header("Content-Length") {
        Some(value) => std::str::from_utf8(value)
            .ok()
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map(BodyFraming::Length)
            .ok_or_else(|| {
                ForwardError::MalformedResponse(format!(
                    "invalid Content-Length: {}",
                    String::from_utf8_lossy(value)
                ))
            }),
        None => Ok(BodyFraming::UntilClose),
    }
}

fn parse_chunk_size(line: &[u8]) -> Result<u64, ForwardError> {
    let invalid = || ForwardError::MalformedResponse("invalid chunk size".to_string());

    let text = std::str::from_utf8(line).map_err(|_| invalid())?;
    let size = text.split(';').next().unwrap_or_default().trim();
    u64::from_str_radix(size, 16).map_err(|_| invalid())
}
