use crate::http::request::{Method, Request, is_token};
use bytes::Bytes;
use percent_encoding::percent_decode_str;

/// Upper bound on the request line plus headers.
pub const MAX_HEAD_SIZE: usize = 64 * 1024;

/// Default upper bound on a request body.
pub const DEFAULT_MAX_BODY_SIZE: usize = 10 * 1024 * 1024;

#[derive(Debug, PartialEq, Eq)]
pub enum ParseError {
    InvalidRequest,
    InvalidMethod,
    InvalidHeader,
    InvalidContentLength,
    /// Request bodies framed with Transfer-Encoding are not accepted.
    UnsupportedTransferEncoding,
    HeadTooLarge,
    /// Declared Content-Length exceeds the configured body limit.
    BodyTooLarge,
    Incomplete,
}

/// Request line and headers, parsed before the body is available.
struct RequestHead {
    method: Method,
    path: Bytes,
    query: Option<String>,
    version: String,
    headers: Vec<(String, Bytes)>,
    content_length: usize,
    /// Bytes up to and including the blank line.
    len: usize,
}

pub fn parse_http_request(buf: &[u8]) -> Result<(Request, usize), ParseError> {
    parse_http_request_with_limit(buf, DEFAULT_MAX_BODY_SIZE)
}

/// Like [`parse_http_request`], rejecting any request whose declared body
/// is larger than `max_body` before the body is buffered.
pub fn parse_http_request_with_limit(
    buf: &[u8],
    max_body: usize,
) -> Result<(Request, usize), ParseError> {
    let head = parse_head(buf)?;
    if head.content_length > max_body {
        return Err(ParseError::BodyTooLarge);
    }

    let body_bytes = &buf[head.len..];
    if body_bytes.len() < head.content_length {
        return Err(ParseError::Incomplete);
    }

    let body = Bytes::copy_from_slice(&body_bytes[..head.content_length]);
    let total_consumed = head.len + head.content_length;

    let request = Request {
        method: head.method,
        path: head.path,
        query: head.query,
        version: head.version,
        headers: head.headers,
        body,
    };

    Ok((request, total_consumed))
}

/// True once the buffered head is complete, announces a body, asks for
/// `Expect: 100-continue`, and the body has not started arriving yet.
pub fn awaiting_continue(buf: &[u8]) -> bool {
    let Ok(head) = parse_head(buf) else {
        return false;
    };
    head.content_length > 0
        && buf.len() == head.len
        && head.headers.iter().any(|(name, value)| {
            name.eq_ignore_ascii_case("Expect")
                && value.eq_ignore_ascii_case(b"100-continue")
        })
}

fn parse_head(buf: &[u8]) -> Result<RequestHead, ParseError> {
    // Look for header/body separator
    let headers_end = match find_headers_end(buf) {
        Some(pos) => pos,
        None if buf.len() > MAX_HEAD_SIZE => return Err(ParseError::HeadTooLarge),
        None => return Err(ParseError::Incomplete),
    };
    if headers_end > MAX_HEAD_SIZE {
        return Err(ParseError::HeadTooLarge);
    }

    let mut lines = head_lines(&buf[..headers_end]);

    // Request line; only this part has to be text
    let request_line = lines
        .next()
        .and_then(|line| std::str::from_utf8(line).ok())
        .ok_or(ParseError::InvalidRequest)?;
    let mut parts = request_line.split(' ');

    let method_str = parts.next().ok_or(ParseError::InvalidRequest)?;
    let target = parts.next().ok_or(ParseError::InvalidRequest)?;
    let version = parts.next().ok_or(ParseError::InvalidRequest)?;
    if parts.next().is_some() || target.is_empty() {
        return Err(ParseError::InvalidRequest);
    }
    if version != "HTTP/1.1" && version != "HTTP/1.0" {
        return Err(ParseError::InvalidRequest);
    }

    let method = Method::parse(method_str).ok_or(ParseError::InvalidMethod)?;

    let (raw_path, query) = match target.split_once('?') {
        Some((path, query)) => (path, Some(query.to_string())),
        None => (target, None),
    };
    let path = Bytes::from(percent_decode_str(raw_path).collect::<Vec<u8>>());

    // Headers
    let mut headers = Vec::new();
    let mut content_length: Option<usize> = None;

    for line in lines {
        if line.is_empty() {
            continue;
        }

        let colon = line
            .iter()
            .position(|&b| b == b':')
            .ok_or(ParseError::InvalidHeader)?;
        let key = std::str::from_utf8(line[..colon].trim_ascii())
            .ok()
            .filter(|key| is_token(key))
            .ok_or(ParseError::InvalidHeader)?;
        let value = line[colon + 1..].trim_ascii();

        if key.eq_ignore_ascii_case("Transfer-Encoding") {
            return Err(ParseError::UnsupportedTransferEncoding);
        }
        if key.eq_ignore_ascii_case("Content-Length") {
            let parsed = std::str::from_utf8(value)
                .ok()
                .and_then(|v| v.parse::<usize>().ok())
                .ok_or(ParseError::InvalidContentLength)?;
            if content_length.is_some_and(|seen| seen != parsed) {
                return Err(ParseError::InvalidContentLength);
            }
            content_length = Some(parsed);
        }

        headers.push((key.to_string(), Bytes::copy_from_slice(value)));
    }

    Ok(RequestHead {
        method,
        path,
        query,
        version: version.to_string(),
        headers,
        content_length: content_length.unwrap_or(0),
        len: headers_end + 4,
    })
}

/// Splits a head into lines, dropping the `\r` of each CRLF.
pub(crate) fn head_lines(head: &[u8]) -> impl Iterator<Item = &[u8]> {
    head.split(|&b| b == b'\n')
        .map(|line| line.strip_suffix(b"\r").unwrap_or(line))
}

pub(crate) fn find_headers_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n")
}
