//! Inbound HTTP/1.x server side.
//!
//! Just enough HTTP to accept requests for the proxy engine and to frame
//! the responses it relays.
//!
//! - **`connection`**: per-connection request/response state machine
//! - **`parser`**: parses incoming requests from byte buffers
//! - **`request`**: request representation
//! - **`response`**: status codes and server-generated responses
//! - **`writer`**: buffered and streaming response writers
//!
//! # Connection State Machine
//!
//! ```text
//!        ┌─────────────┐
//!        │   Reading   │ ← Wait for incoming request data
//!        └──────┬──────┘
//!               │ Request received (or 4xx/501 → Writing)
//!               ▼
//!        ┌──────────────────┐
//!        │   Processing     │ ← Route; relay backend response directly
//!        └──────┬───────────┘
//!               │ Unrouted → 404
//!               ▼
//!        ┌──────────────────┐
//!        │    Writing       │ ← Send server-generated response
//!        └──────┬───────────┘
//!               ├─ Keep-Alive → Reading (same connection)
//!               └─ Close → Closed
//! ```
//!
//! A relayed response goes from Processing straight back to Reading when
//! the connection can be reused, or to Closed when it cannot (truncated
//! response, close-delimited body).

pub mod connection;
pub mod parser;
pub mod request;
pub mod response;
pub mod writer;
