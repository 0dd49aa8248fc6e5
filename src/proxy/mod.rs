//! Reverse proxy functionality
//!
//! Route lookup, outbound request construction and the streaming response
//! relay. [`ProxyEngine::dispatch`] runs the whole pipeline for one request.

pub mod engine;
pub mod error;
pub mod forwarder;
pub mod relay;
pub mod router;
pub mod routes;
pub mod upstream;

pub use engine::{Dispatch, ProxyEngine, RelayOutcome};
pub use error::ForwardError;
pub use forwarder::{OutboundRequest, RequestForwarder, UpstreamSettings};
pub use relay::RelaySink;
pub use router::{RequestRouter, RouteMatch};
pub use routes::{MatchPolicy, Route, RouteTable};
