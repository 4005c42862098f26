//! Immutable per-connection metadata.

use std::fmt;
use std::net::{IpAddr, SocketAddr};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::net::transport::Transport;

/// Values read from the client's WebSocket opening handshake.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct HandshakeDetails {
    /// Negotiated subprotocol, empty if none.
    pub sub_protocol: String,
    /// `Origin` header value.
    pub origin: String,
    /// `Host` header value.
    pub host: String,
    /// Request path.
    pub path: String,
}

/// Snapshot of who is on the other end of a connection.
///
/// Built once per accepted client; the id is a fresh v4 UUID, never reused.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionInfo {
    id: Uuid,
    sub_protocol: String,
    origin: String,
    host: String,
    path: String,
    client_ip_address: Option<IpAddr>,
    client_port: Option<u16>,
}

/// Read-only view of an accepted client.
///
/// [`ConnectionInfo`] is the production implementation; consumers that only
/// log or route on these values take `&impl PeerDetails`.
pub trait PeerDetails {
    fn id(&self) -> Uuid;
    fn sub_protocol(&self) -> &str;
    fn origin(&self) -> &str;
    fn host(&self) -> &str;
    fn path(&self) -> &str;
    fn client_ip_address(&self) -> Option<IpAddr>;
    fn client_port(&self) -> Option<u16>;

    /// Client address, when both halves are known.
    fn client_endpoint(&self) -> Option<SocketAddr> {
        Some(SocketAddr::new(self.client_ip_address()?, self.client_port()?))
    }
}

impl ConnectionInfo {
    /// Capture the peer endpoint of `connection` together with its handshake values.
    pub fn new(connection: &impl Transport, handshake: HandshakeDetails) -> Self {
        Self::from_endpoint(connection.remote_endpoint(), handshake)
    }

    pub fn from_endpoint(peer: Option<SocketAddr>, handshake: HandshakeDetails) -> Self {
        let HandshakeDetails {
            sub_protocol,
            origin,
            host,
            path,
        } = handshake;
        Self {
            id: Uuid::new_v4(),
            sub_protocol,
            origin,
            host,
            path,
            client_ip_address: peer.map(|addr| addr.ip()),
            client_port: peer.map(|addr| addr.port()),
        }
    }
}

impl PeerDetails for ConnectionInfo {
    fn id(&self) -> Uuid {
        self.id
    }

    fn sub_protocol(&self) -> &str {
        &self.sub_protocol
    }

    fn origin(&self) -> &str {
        &self.origin
    }

    fn host(&self) -> &str {
        &self.host
    }

    fn path(&self) -> &str {
        &self.path
    }

    fn client_ip_address(&self) -> Option<IpAddr> {
        self.client_ip_address
    }

    fn client_port(&self) -> Option<u16> {
        self.client_port
    }
}

impl fmt::Display for ConnectionInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.client_endpoint() {
            Some(peer) => write!(f, "{} from {}", self.id, peer),
            None => write!(f, "{} from unknown peer", self.id),
        }
    }
}
