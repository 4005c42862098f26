//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Connection::for_address → bind → listen
//!     → accept (spawned task, cancellable by close)
//!     → child Connection (keepalive tuned, plain stream open)
//!     → authenticate (optional TLS upgrade)
//!     → stream replaced by QueuedStream<TlsStream> (serialized writes)
//!     → close (cancel pending work, release stream and socket)
//!
//! Connection States:
//!     Unbound → Bound → Listening
//!     Connected → Secured
//!     any → Closed
//! ```
//!
//! # Design Decisions
//! - Async outcomes are `Result<Option<T>, _>`: value, cancelled, or error
//! - Closing a connection resolves its pending operations as cancelled
//! - TLS writes go through one drain task so records never interleave

pub mod cancel;
pub mod error;
pub mod info;
pub mod keepalive;
pub mod queued;
pub mod socket;
pub mod stream;
pub mod tls;
pub mod transport;

#[cfg(test)]
pub(crate) mod mock;

pub use cancel::{CancellationScope, CancellationToken};
pub use error::{AuthenticationError, ConnectionError, Operation};
pub use info::{ConnectionInfo, HandshakeDetails, PeerDetails};
pub use queued::{QueuedStream, QueuedWriter};
pub use socket::Connection;
pub use stream::ConnectionStream;
pub use tls::{ServerIdentity, TlsProtocols, TlsSession, TlsVersion};
pub use transport::{AcceptResult, Accepting, Transport};
