use std::sync::Arc;

use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::http::parser::{ParseError, awaiting_continue, parse_http_request_with_limit};
use crate::http::request::Request;
use crate::http::response::{Response, StatusCode};
use crate::http::writer::{ResponseWriter, StreamingResponse};
use crate::proxy::{Dispatch, ProxyEngine, RelayOutcome};

const CONTINUE: &[u8] = b"HTTP/1.1 100 Continue\r\n\r\n";

pub struct Connection {
    stream: TcpStream,
    buffer: BytesMut,
    engine: Arc<ProxyEngine>,
    state: ConnectionState,
    continue_sent: bool,
    /// Largest request body this connection will buffer.
    max_body: usize,
}

pub enum ConnectionState {
    Reading,
    Processing(Request),
    Writing(ResponseWriter, bool), // bool = keep_alive?
    Closed,
}

enum ReadOutcome {
    Request(Request),
    Rejected(Response),
    Eof,
}

impl Connection {
    pub fn new(stream: TcpStream, engine: Arc<ProxyEngine>, max_body: usize) -> Self {
        Self {
            stream,
            buffer: BytesMut::with_capacity(4096),
            engine,
            state: ConnectionState::Reading,
            continue_sent: false,
            max_body,
        }
    }

    pub async fn run(&mut self) -> anyhow::Result<()> {
        loop {
            let state = std::mem::replace(&mut self.state, ConnectionState::Closed);
            self.state = match state {
                ConnectionState::Reading => match self.read_request().await? {
                    ReadOutcome::Request(req) => ConnectionState::Processing(req),
                    ReadOutcome::Rejected(response) => {
                        ConnectionState::Writing(ResponseWriter::new(&response), false)
                    }
                    ReadOutcome::Eof => ConnectionState::Closed,
                },

                ConnectionState::Processing(req) => self.process(req).await,

                ConnectionState::Writing(mut writer, keep_alive) => {
                    writer.write_to_stream(&mut self.stream).await?;

                    if keep_alive {
                        ConnectionState::Reading // go back for next request
                    } else {
                        ConnectionState::Closed
                    }
                }

                ConnectionState::Closed => {
                    let _ = self.stream.shutdown().await;
                    break;
                }
            };
        }

        Ok(())
    }

    async fn process(&mut self, req: Request) -> ConnectionState {
        let keep_alive = req.keep_alive();
        let mut sink = StreamingResponse::new(&mut self.stream, &req);

        match self.engine.dispatch(&req, &mut sink).await {
            Dispatch::Unhandled => {
                let writer = ResponseWriter::for_request(&Response::not_found(), &req);
                ConnectionState::Writing(writer, keep_alive)
            }
            Dispatch::Forwarded(RelayOutcome::Complete | RelayOutcome::Failed)
                if keep_alive && sink.reusable() =>
            {
                ConnectionState::Reading
            }
            Dispatch::Forwarded(_) => ConnectionState::Closed,
        }
    }

    async fn read_request(&mut self) -> anyhow::Result<ReadOutcome> {
        loop {
            // Try parsing whatever we already have
            match parse_http_request_with_limit(&self.buffer, self.max_body) {
                Ok((request, consumed)) => {
                    // Remove consumed bytes
                    let _ = self.buffer.split_to(consumed);
                    self.continue_sent = false;
                    return Ok(ReadOutcome::Request(request));
                }

                Err(ParseError::Incomplete) => {
                    if !self.continue_sent && awaiting_continue(&self.buffer) {
                        self.stream.write_all(CONTINUE).await?;
                        self.continue_sent = true;
                    }
                }

                Err(e) => {
                    tracing::warn!(error = ?e, "Rejecting malformed request");
                    return Ok(ReadOutcome::Rejected(rejection(e)));
                }
            }

            let n = self.stream.read_buf(&mut self.buffer).await?;

            if n == 0 {
                // Client closed connection
                if !self.buffer.is_empty() {
                    tracing::debug!(buffered = self.buffer.len(), "Client closed mid-request");
                }
                return Ok(ReadOutcome::Eof);
            }
        }
    }
}

fn rejection(error: ParseError) -> Response {
    let status = match error {
        ParseError::UnsupportedTransferEncoding => StatusCode::NOT_IMPLEMENTED,
        ParseError::HeadTooLarge => StatusCode::HEADER_FIELDS_TOO_LARGE,
        ParseError::BodyTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
        _ => StatusCode::BAD_REQUEST,
    };
    let mut response = Response::plain(status);
    response
        .headers
        .push(("Connection".to_string(), "close".to_string()));
    response
}
