use std::io;

use thiserror::Error;

/// Why a forwarded request did not complete.
#[derive(Debug, Error)]
pub enum ForwardError {
    /// The upstream client could not be set up at startup; no network I/O
    /// is attempted for any request.
    #[error("upstream client unavailable: {0}")]
    ClientUnavailable(String),

    #[error("failed to connect to backend {target}: {source}")]
    Connect {
        target: String,
        #[source]
        source: io::Error,
    },

    #[error("backend timed out during {0}")]
    Timeout(&'static str),

    #[error("malformed backend response: {0}")]
    MalformedResponse(String),

    #[error("backend closed the connection mid-response")]
    UnexpectedEof,

    #[error("backend i/o error: {0}")]
    Upstream(#[from] io::Error),

    /// Writing to the original client failed.
    #[error("client connection error: {0}")]
    Downstream(#[source] io::Error),
}
