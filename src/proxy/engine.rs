//! Per-request entry point: route, forward, relay.

use crate::http::request::Request;
use crate::proxy::error::ForwardError;
use crate::proxy::forwarder::{RequestForwarder, UpstreamSettings};
use crate::proxy::relay::{RelaySink, send_failure};
use crate::proxy::router::RequestRouter;
use crate::proxy::routes::RouteTable;

/// Result of handing a request to the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// No route matched; nothing was forwarded or written.
    Unhandled,
    Forwarded(RelayOutcome),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayOutcome {
    /// The backend response was relayed in full.
    Complete,
    /// Forwarding failed before any output; a 500 was sent instead.
    Failed,
    /// Forwarding failed after the response had started. The client got a
    /// truncated response and the connection must not be reused.
    Truncated,
}

pub struct ProxyEngine {
    router: RequestRouter,
    forwarder: RequestForwarder,
}

impl ProxyEngine {
    pub fn new(routes: RouteTable, upstream: &UpstreamSettings) -> Self {
        Self {
            router: RequestRouter::new(routes),
            forwarder: RequestForwarder::new(upstream),
        }
    }

    pub fn forwarder(&self) -> &RequestForwarder {
        &self.forwarder
    }

    pub async fn dispatch<S: RelaySink>(&self, request: &Request, sink: &mut S) -> Dispatch {
        let Some(matched) = self.router.route(request) else {
            tracing::debug!(
                method = %request.method,
                path = %request.path_lossy(),
                "No route matched"
            );
            return Dispatch::Unhandled;
        };

        let result = self
            .forwarder
            .forward(matched.route, matched.residual, request, sink)
            .await;

        match result {
            Ok(()) => {
                tracing::info!(
                    method = %request.method,
                    path = %request.path_lossy(),
                    prefix = %matched.route.prefix,
                    port = %matched.route.target_port,
                    "Request forwarded"
                );
                Dispatch::Forwarded(RelayOutcome::Complete)
            }
            Err(e) if !sink.status_sent() => {
                log_failure(request, &e, false);
                if let Err(write_err) = send_failure(sink).await {
                    tracing::debug!(error = %write_err, "Failed to send error status to client");
                }
                Dispatch::Forwarded(RelayOutcome::Failed)
            }
            Err(e) => {
                log_failure(request, &e, true);
                Dispatch::Forwarded(RelayOutcome::Truncated)
            }
        }
    }
}

fn log_failure(request: &Request, error: &ForwardError, started: bool) {
    tracing::warn!(
        method = %request.method,
        path = %request.path_lossy(),
        error = %error,
        response_started = started,
        "Forwarding failed"
    );
}
