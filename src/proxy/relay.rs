//! Streams a backend response to the original client.
//!
//! The relay is a two-phase pipeline: the head phase emits the status and
//! the filtered headers, then the body phase pushes decoded chunks as they
//! are pulled from the backend. Each `send_*` call is awaited before the
//! next read, so a slow client slows the backend read down with it.

use std::future::Future;
use std::io;

use tokio::io::AsyncRead;

use crate::http::response::StatusCode;
use crate::proxy::error::ForwardError;
use crate::proxy::upstream::UpstreamResponse;

/// Headers describing the backend leg's framing. The body is re-framed
/// for the client, so these never cross the proxy.
const FRAMING_HEADERS: [&str; 2] = ["Transfer-Encoding", "Content-Length"];

/// Destination of a relayed response.
///
/// Calls arrive strictly in the order `send_status`, `send_header`*,
/// `end_headers`, `send_chunk`*, `finish`. Implementations are free to
/// reject anything else.
pub trait RelaySink: Send {
    fn send_status(&mut self, status: StatusCode) -> impl Future<Output = io::Result<()>> + Send;

    /// Header fields are raw bytes, passed through exactly as received.
    fn send_header(
        &mut self,
        name: &[u8],
        value: &[u8],
    ) -> impl Future<Output = io::Result<()>> + Send;

    fn end_headers(&mut self) -> impl Future<Output = io::Result<()>> + Send;

    fn send_chunk(&mut self, chunk: &[u8]) -> impl Future<Output = io::Result<()>> + Send;

    fn finish(&mut self) -> impl Future<Output = io::Result<()>> + Send;

    /// Whether a status has already gone out on this sink.
    fn status_sent(&self) -> bool;
}

pub fn is_hop_by_hop(name: &[u8]) -> bool {
    FRAMING_HEADERS
        .iter()
        .any(|framing| framing.as_bytes().eq_ignore_ascii_case(name))
}

/// Relays one backend response into `sink`.
pub async fn relay_response<R, S>(
    upstream: &mut UpstreamResponse<R>,
    sink: &mut S,
) -> Result<(), ForwardError>
where
    R: AsyncRead + Unpin + Send,
    S: RelaySink,
{
    let head = upstream.read_head().await?;

    sink.send_status(head.status)
        .await
        .map_err(ForwardError::Downstream)?;

    for (name, value) in head.headers.iter().filter(|(name, _)| !is_hop_by_hop(name)) {
        sink.send_header(name, value)
            .await
            .map_err(ForwardError::Downstream)?;
    }
    sink.end_headers().await.map_err(ForwardError::Downstream)?;

    let mut relayed = 0u64;
    while let Some(chunk) = upstream.next_chunk().await? {
        relayed += chunk.len() as u64;
        sink.send_chunk(&chunk)
            .await
            .map_err(ForwardError::Downstream)?;
    }

    sink.finish().await.map_err(ForwardError::Downstream)?;

    tracing::trace!(
        status = head.status.as_u16(),
        bytes = relayed,
        "Response relayed"
    );
    Ok(())
}

/// Sends the generic failure response used when forwarding fails before
/// anything reached the client.
pub async fn send_failure<S: RelaySink>(sink: &mut S) -> io::Result<()> {
    sink.send_status(StatusCode::INTERNAL_SERVER_ERROR).await?;
    sink.end_headers().await?;
    sink.finish().await
}
