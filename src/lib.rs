//! Server-side socket layer for WebSocket servers.
//!
//! ```text
//!   config ──▶ server (accept loop, limits, shutdown)
//!                 │
//!                 ▼
//!   net::Connection ── bind / listen / accept / authenticate / close
//!       │      │
//!       │      └─▶ ConnectionStream: plain TCP or TLS behind a write queue
//!       └────────▶ ConnectionInfo: id, handshake values, client endpoint
//!
//!   observability (tracing, metrics) and lifecycle (signals) cut across both
//! ```

pub mod config;
pub mod lifecycle;
pub mod net;
pub mod observability;
pub mod server;

pub use config::WsConnConfig;
pub use lifecycle::Shutdown;
pub use net::{
    AuthenticationError, Connection, ConnectionError, ConnectionInfo, ConnectionStream,
    HandshakeDetails, PeerDetails, ServerIdentity, TlsProtocols, Transport,
};
pub use server::{Server, ServerOptions};
