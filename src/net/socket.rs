//! Server-side TCP connection.
//!
//! # Responsibilities
//! - Own one OS socket, either a listener or an accepted/connected peer
//! - Open the byte stream as soon as the socket is connected
//! - Run accepts and TLS upgrades asynchronously, cancellable by `close`
//! - Expose endpoint and socket-option state for diagnostics
//!
//! # Design Decisions
//! - The connection keeps a duplicate of the socket handle next to the stream,
//!   so peer address and options stay readable after a TLS upgrade
//! - Accepts run on a spawned task; the returned [`Accepting`] never blocks
//! - Every outcome of an async operation is reported once, through its result

use std::io;
use std::net::{IpAddr, Shutdown, SocketAddr};
use std::sync::Arc;

use socket2::{Domain, Protocol, SockRef, Socket, Type};
use tokio::net::{TcpListener, TcpStream};
use tokio::runtime::Handle;
use tokio_rustls::TlsAcceptor;

use crate::net::cancel::{CancellationScope, CancellationToken};
use crate::net::error::{AuthenticationError, ConnectionError, Operation};
use crate::net::keepalive;
use crate::net::queued::{QueuedStream, DEFAULT_QUEUE_DEPTH};
use crate::net::stream::ConnectionStream;
use crate::net::tls::{ServerIdentity, TlsProtocols, TlsSession};
use crate::net::transport::{AcceptResult, Accepting, Transport};
use crate::observability::metrics;

/// A TCP socket plus its stream.
///
/// Owned exclusively. Dropping a connection closes it.
#[derive(Debug)]
pub struct Connection {
    socket: Option<Socket>,
    stream: Option<ConnectionStream>,
    listener: Option<Arc<TcpListener>>,
    runtime: Option<Handle>,
    scope: CancellationScope,
    secured: bool,
    write_queue_depth: usize,
}

impl Connection {
    /// Wrap an existing socket.
    ///
    /// Keepalive is tuned first. If the socket is already connected the stream
    /// is opened immediately, which requires a Tokio runtime.
    pub fn new(socket: Socket) -> Result<Self, ConnectionError> {
        keepalive::apply(&socket);
        let stream = if socket.peer_addr().is_ok() {
            Some(ConnectionStream::Plain(open_stream(&socket)?))
        } else {
            None
        };
        Ok(Self {
            socket: Some(socket),
            stream,
            listener: None,
            runtime: Handle::try_current().ok(),
            scope: CancellationScope::new(),
            secured: false,
            write_queue_depth: DEFAULT_QUEUE_DEPTH,
        })
    }

    /// Create a fresh, unbound TCP socket for the address family of `addr`.
    pub fn for_address(addr: &SocketAddr) -> Result<Self, ConnectionError> {
        let socket = Socket::new(Domain::for_address(*addr), Type::STREAM, Some(Protocol::TCP))
            .map_err(|e| ConnectionError::transport(Operation::Create, e))?;
        Self::new(socket)
    }

    fn from_accepted(stream: TcpStream, write_queue_depth: usize) -> Result<Self, ConnectionError> {
        let socket = SockRef::from(&stream)
            .try_clone()
            .map_err(|e| ConnectionError::transport(Operation::Open, e))?;
        keepalive::apply(&socket);
        Ok(Self {
            socket: Some(socket),
            stream: Some(ConnectionStream::Plain(stream)),
            listener: None,
            runtime: Handle::try_current().ok(),
            scope: CancellationScope::new(),
            secured: false,
            write_queue_depth,
        })
    }

    /// Set the queue depth of the TLS write decorator.
    ///
    /// Connections accepted from this one inherit the value.
    pub fn with_write_queue_depth(mut self, depth: usize) -> Self {
        self.write_queue_depth = depth.max(1);
        self
    }

    /// Bind the socket to a local address.
    pub fn bind(&mut self, addr: SocketAddr) -> Result<(), ConnectionError> {
        let socket = self.socket_for(Operation::Bind)?;
        socket
            .bind(&addr.into())
            .map_err(|e| ConnectionError::transport(Operation::Bind, e))?;
        tracing::debug!(address = %addr, "Socket bound");
        Ok(())
    }

    /// Start listening with a pending-connection queue of `backlog`.
    ///
    /// The socket must be bound and not connected. Calling this again on a
    /// listening socket only adjusts the backlog.
    pub fn listen(&mut self, backlog: u32) -> Result<(), ConnectionError> {
        let socket = self.socket_for(Operation::Listen)?;
        let backlog = i32::try_from(backlog).unwrap_or(i32::MAX);
        if self.listener.is_some() {
            return socket
                .listen(backlog)
                .map_err(|e| ConnectionError::transport(Operation::Listen, e));
        }
        if self.stream.is_some() {
            return Err(ConnectionError::invalid(
                Operation::Listen,
                "socket is already connected",
            ));
        }
        let Some(local) = socket
            .local_addr()
            .ok()
            .and_then(|addr| addr.as_socket())
            .filter(|addr| addr.port() != 0)
        else {
            return Err(ConnectionError::invalid(Operation::Listen, "socket is not bound"));
        };
        let runtime = Handle::try_current()
            .map_err(|e| ConnectionError::transport(Operation::Listen, io::Error::other(e)))?;

        socket
            .listen(backlog)
            .map_err(|e| ConnectionError::transport(Operation::Listen, e))?;
        let listener = socket
            .try_clone()
            .and_then(|dup| {
                dup.set_nonblocking(true)?;
                let _entered = runtime.enter();
                TcpListener::from_std(dup.into())
            })
            .map_err(|e| ConnectionError::transport(Operation::Listen, e))?;

        tracing::info!(address = %local, backlog, "Listening for connections");
        self.listener = Some(Arc::new(listener));
        self.runtime = Some(runtime);
        Ok(())
    }

    /// Start accepting one inbound peer.
    ///
    /// Resolves to `Ok(Some(child))` with a connected child connection,
    /// `Ok(None)` if this connection was closed first, or an error. A peer
    /// that arrives after `close` is dropped, never delivered.
    pub fn accept(&self) -> Accepting<Connection> {
        if self.scope.is_cancelled() {
            return Accepting::ready(Ok(None));
        }
        let (Some(listener), Some(runtime)) = (&self.listener, &self.runtime) else {
            return Accepting::ready(Err(ConnectionError::invalid(
                Operation::Accept,
                "socket is not listening",
            )));
        };

        let listener = Arc::clone(listener);
        let token = self.scope.token();
        Accepting::spawned(runtime.spawn(accept_one(listener, token, self.write_queue_depth)))
    }

    /// Upgrade the stream to server-side TLS.
    ///
    /// Runs at most once per connection; a second call fails with
    /// [`AuthenticationError::AlreadySecured`]. On success the stream is
    /// replaced by a TLS stream whose writes are serialized. On a failed
    /// handshake the stream is gone and the connection should be closed.
    pub async fn authenticate(
        &mut self,
        identity: &ServerIdentity,
        protocols: TlsProtocols,
    ) -> Result<Option<TlsSession>, ConnectionError> {
        if self.secured {
            return Err(AuthenticationError::AlreadySecured.into());
        }
        if self.scope.is_cancelled() {
            return Ok(None);
        }
        let config = identity.server_config(protocols).inspect_err(|e| {
            tracing::warn!(error = %e, "TLS configuration rejected");
            metrics::tls_handshake("rejected");
        })?;
        let tcp = match self.stream.take() {
            Some(ConnectionStream::Plain(tcp)) => tcp,
            Some(secure) => {
                self.stream = Some(secure);
                return Err(AuthenticationError::AlreadySecured.into());
            }
            None => return Err(AuthenticationError::NotConnected.into()),
        };
        self.secured = true;

        let mut token = self.scope.token();
        let handshake = TlsAcceptor::from(config).accept(tcp);
        let result = tokio::select! {
            biased;
            _ = token.cancelled() => {
                tracing::trace!("TLS upgrade cancelled");
                return Ok(None);
            }
            result = handshake => result,
        };
        let tls = result.map_err(|e| {
            tracing::debug!(error = %e, "TLS handshake failed");
            metrics::tls_handshake("failure");
            AuthenticationError::Handshake(e)
        })?;
        if token.is_cancelled() {
            return Ok(None);
        }

        let session = TlsSession::from_connection(tls.get_ref().1);
        self.stream = Some(ConnectionStream::Secure(QueuedStream::new(
            tls,
            self.write_queue_depth,
        )));
        tracing::debug!(
            version = ?session.version,
            server_name = ?session.server_name,
            "TLS upgrade complete"
        );
        metrics::tls_handshake("success");
        Ok(Some(session))
    }

    /// Cancel pending operations, then release the stream and the socket.
    ///
    /// Safe to call any number of times.
    pub fn close(&mut self) {
        self.scope.cancel();
        let had_stream = self.stream.take().is_some();
        self.listener = None;
        if let Some(socket) = self.socket.take() {
            if had_stream {
                // Closes the peer side even while a TLS drain task still holds its half.
                let _ = socket.shutdown(Shutdown::Both);
            }
            tracing::trace!("Connection closed");
        }
    }

    /// Whether `close` was called or the cancel handle fired.
    pub fn is_closed(&self) -> bool {
        self.scope.is_cancelled()
    }

    /// Handle that cancels this connection's pending operations without
    /// releasing the socket.
    pub fn cancel_handle(&self) -> CancellationScope {
        self.scope.clone()
    }

    /// Whether the OS socket currently has a connected peer.
    pub fn is_connected(&self) -> bool {
        self.socket
            .as_ref()
            .is_some_and(|socket| socket.peer_addr().is_ok())
    }

    pub fn is_listening(&self) -> bool {
        self.listener.is_some()
    }

    pub fn is_secure(&self) -> bool {
        self.stream.as_ref().is_some_and(ConnectionStream::is_secure)
    }

    pub fn remote_endpoint(&self) -> Option<SocketAddr> {
        self.socket.as_ref()?.peer_addr().ok()?.as_socket()
    }

    pub fn remote_ip_address(&self) -> Option<IpAddr> {
        self.remote_endpoint().map(|addr| addr.ip())
    }

    /// Remote port, `None` when no remote endpoint is bound.
    pub fn remote_port(&self) -> Option<u16> {
        self.remote_endpoint().map(|addr| addr.port())
    }

    pub fn local_endpoint(&self) -> Option<SocketAddr> {
        self.socket.as_ref()?.local_addr().ok()?.as_socket()
    }

    /// Nagle's algorithm disabled. `false` once closed.
    pub fn no_delay(&self) -> bool {
        self.socket
            .as_ref()
            .and_then(|socket| socket.tcp_nodelay().ok())
            .unwrap_or(false)
    }

    pub fn set_no_delay(&self, no_delay: bool) -> Result<(), ConnectionError> {
        self.socket_for(Operation::Configure)?
            .set_tcp_nodelay(no_delay)
            .map_err(|e| ConnectionError::transport(Operation::Configure, e))
    }

    /// The active stream, if connected and not closed.
    pub fn stream(&self) -> Option<&ConnectionStream> {
        self.stream.as_ref()
    }

    pub fn stream_mut(&mut self) -> Option<&mut ConnectionStream> {
        self.stream.as_mut()
    }

    fn socket_for(&self, op: Operation) -> Result<&Socket, ConnectionError> {
        self.socket.as_ref().ok_or_else(|| {
            ConnectionError::transport(
                op,
                io::Error::new(io::ErrorKind::NotConnected, "connection is closed"),
            )
        })
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.close();
    }
}

async fn accept_one(
    listener: Arc<TcpListener>,
    mut token: CancellationToken,
    write_queue_depth: usize,
) -> AcceptResult<Connection> {
    let accepted = tokio::select! {
        biased;
        _ = token.cancelled() => None,
        accepted = listener.accept() => Some(accepted),
    };
    let Some(accepted) = accepted else {
        metrics::accept_cancelled();
        return Ok(None);
    };
    let (stream, peer) = accepted.map_err(|e| {
        metrics::accept_failed();
        ConnectionError::transport(Operation::Accept, e)
    })?;
    if token.is_cancelled() {
        tracing::trace!(peer_addr = %peer, "Dropping peer accepted after close");
        metrics::accept_cancelled();
        return Ok(None);
    }

    let child = Connection::from_accepted(stream, write_queue_depth)?;
    tracing::debug!(peer_addr = %peer, "Connection accepted");
    metrics::connection_accepted();
    Ok(Some(child))
}

/// Register a duplicate of a connected socket with the current runtime.
fn open_stream(socket: &Socket) -> Result<TcpStream, ConnectionError> {
    let open = |e| ConnectionError::transport(Operation::Open, e);
    Handle::try_current().map_err(|e| open(io::Error::other(e)))?;
    let dup = socket.try_clone().map_err(open)?;
    dup.set_nonblocking(true).map_err(open)?;
    TcpStream::from_std(dup.into()).map_err(open)
}

impl Transport for Connection {
    fn bind(&mut self, addr: SocketAddr) -> Result<(), ConnectionError> {
        Connection::bind(self, addr)
    }

    fn listen(&mut self, backlog: u32) -> Result<(), ConnectionError> {
        Connection::listen(self, backlog)
    }

    fn accept(&self) -> Accepting<Self> {
        Connection::accept(self)
    }

    async fn authenticate(
        &mut self,
        identity: &ServerIdentity,
        protocols: TlsProtocols,
    ) -> Result<Option<TlsSession>, ConnectionError> {
        Connection::authenticate(self, identity, protocols).await
    }

    fn close(&mut self) {
        Connection::close(self)
    }

    fn is_closed(&self) -> bool {
        Connection::is_closed(self)
    }

    fn is_connected(&self) -> bool {
        Connection::is_connected(self)
    }

    fn remote_endpoint(&self) -> Option<SocketAddr> {
        Connection::remote_endpoint(self)
    }

    fn local_endpoint(&self) -> Option<SocketAddr> {
        Connection::local_endpoint(self)
    }

    fn no_delay(&self) -> bool {
        Connection::no_delay(self)
    }

    fn set_no_delay(&self, no_delay: bool) -> Result<(), ConnectionError> {
        Connection::set_no_delay(self, no_delay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    fn loopback() -> SocketAddr {
        "127.0.0.1:0".parse().unwrap()
    }

    async fn listening() -> (Connection, SocketAddr) {
        let mut conn = Connection::for_address(&loopback()).unwrap();
        conn.bind(loopback()).unwrap();
        conn.listen(16).unwrap();
        let addr = conn.local_endpoint().unwrap();
        (conn, addr)
    }

    #[tokio::test]
    async fn unconnected_socket_has_no_stream_or_peer() {
        let conn = Connection::for_address(&loopback()).unwrap();
        assert!(conn.stream().is_none());
        assert!(!conn.is_connected());
        assert_eq!(conn.remote_port(), None);
        assert_eq!(conn.remote_ip_address(), None);
    }

    #[tokio::test]
    async fn listen_requires_bind() {
        let mut conn = Connection::for_address(&loopback()).unwrap();
        let err = conn.listen(5).unwrap_err();
        assert!(matches!(err, ConnectionError::Transport { op: Operation::Listen, .. }));
        assert_eq!(err.io_kind(), Some(io::ErrorKind::InvalidInput));
    }

    #[tokio::test]
    async fn bind_to_taken_port_fails() {
        let (_listener, addr) = listening().await;
        let mut second = Connection::for_address(&addr).unwrap();
        let err = second.bind(addr).unwrap_err();
        assert!(matches!(err, ConnectionError::Transport { op: Operation::Bind, .. }));
    }

    #[tokio::test]
    async fn accept_delivers_connected_child() {
        let (listener, addr) = listening().await;
        let pending = listener.accept();
        let mut client = tokio::net::TcpStream::connect(addr).await.unwrap();

        let mut child = pending.await.unwrap().expect("peer should be delivered");
        assert!(child.is_connected());
        assert_eq!(child.remote_ip_address(), Some(addr.ip()));
        assert_eq!(child.remote_port(), Some(client.local_addr().unwrap().port()));

        let stream = child.stream_mut().expect("accepted child has a stream");
        stream.write_all(b"hi").await.unwrap();
        let mut buf = [0u8; 2];
        client.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"hi");
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn accepted_child_gets_keepalive() {
        let (listener, addr) = listening().await;
        let pending = listener.accept();
        let _client = tokio::net::TcpStream::connect(addr).await.unwrap();
        let child = pending.await.unwrap().unwrap();

        let socket = child.socket.as_ref().unwrap();
        assert!(socket.keepalive().unwrap());
        assert_eq!(socket.tcp_keepalive_time().unwrap(), keepalive::KEEPALIVE_IDLE);
    }

    #[tokio::test]
    async fn close_resolves_pending_accept_as_cancelled() {
        let (mut listener, _addr) = listening().await;
        let pending = listener.accept();
        listener.close();

        let outcome = tokio::time::timeout(Duration::from_secs(2), pending)
            .await
            .expect("close should resolve the accept promptly");
        assert!(matches!(outcome, Ok(None)));
    }

    #[tokio::test]
    async fn accept_after_close_is_cancelled() {
        let (mut listener, _addr) = listening().await;
        listener.close();
        listener.close();
        assert!(matches!(listener.accept().await, Ok(None)));
        assert!(listener.local_endpoint().is_none());
    }

    #[tokio::test]
    async fn accept_without_listen_fails() {
        let conn = Connection::for_address(&loopback()).unwrap();
        let err = conn.accept().await.unwrap_err();
        assert!(matches!(err, ConnectionError::Transport { op: Operation::Accept, .. }));
    }

    #[tokio::test]
    async fn connected_socket_opens_stream_on_construction() {
        let (listener, addr) = listening().await;
        let pending = listener.accept();

        let socket = Socket::new(Domain::IPV4, Type::STREAM, Some(Protocol::TCP)).unwrap();
        socket.connect(&addr.into()).unwrap();
        let conn = Connection::new(socket).unwrap();
        assert!(conn.stream().is_some());
        assert_eq!(conn.remote_endpoint(), Some(addr));

        assert!(pending.await.unwrap().is_some());
    }

    #[tokio::test]
    async fn no_delay_round_trips() {
        let (listener, addr) = listening().await;
        let pending = listener.accept();
        let _client = tokio::net::TcpStream::connect(addr).await.unwrap();
        let child = pending.await.unwrap().unwrap();

        child.set_no_delay(true).unwrap();
        assert!(child.no_delay());
        child.set_no_delay(false).unwrap();
        assert!(!child.no_delay());
    }

    #[tokio::test]
    async fn closed_connection_reports_defaults() {
        let (listener, addr) = listening().await;
        let pending = listener.accept();
        let _client = tokio::net::TcpStream::connect(addr).await.unwrap();
        let mut child = pending.await.unwrap().unwrap();

        child.close();
        assert!(child.is_closed());
        assert!(!child.is_connected());
        assert!(child.stream().is_none());
        assert_eq!(child.remote_port(), None);
        assert!(!child.no_delay());
        assert!(child.set_no_delay(true).is_err());
    }

    #[tokio::test]
    async fn authenticate_without_stream_is_rejected() {
        let cert = rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
        let identity = ServerIdentity::from_der(
            vec![cert.cert.der().clone()],
            rustls::pki_types::PrivateKeyDer::Pkcs8(cert.key_pair.serialize_der().into()),
        );
        let mut conn = Connection::for_address(&loopback()).unwrap();
        let err = conn.authenticate(&identity, TlsProtocols::ALL).await.unwrap_err();
        assert!(matches!(
            err,
            ConnectionError::Authentication(AuthenticationError::NotConnected)
        ));
    }
}
