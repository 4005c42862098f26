//! Capability trait for connections, and the pending-accept future.
//!
//! [`Connection`](crate::net::Connection) is the production implementation.
//! Code that only drives the connection lifecycle (the server loop) is written
//! against [`Transport`] so accept failures and cancellation races can be
//! injected in tests.

use std::future::Future;
use std::net::{IpAddr, SocketAddr};
use std::pin::Pin;
use std::task::{ready, Context, Poll};

use tokio::task::JoinHandle;

use crate::net::error::ConnectionError;
use crate::net::tls::{ServerIdentity, TlsProtocols, TlsSession};

/// Outcome of one accept: a usable connection, a cancelled result, or an error.
pub type AcceptResult<T> = Result<Option<T>, ConnectionError>;

/// Surface of a connection as seen by the layers above it.
pub trait Transport: Send + Sized + 'static {
    /// Bind to a local address.
    fn bind(&mut self, addr: SocketAddr) -> Result<(), ConnectionError>;

    /// Mark a bound socket passive with a pending-connection queue of `backlog`.
    fn listen(&mut self, backlog: u32) -> Result<(), ConnectionError>;

    /// Start accepting one inbound peer. Returns without waiting.
    fn accept(&self) -> Accepting<Self>;

    /// Upgrade the stream to server-side TLS.
    ///
    /// `Ok(None)` means the connection was closed before the upgrade finished.
    fn authenticate(
        &mut self,
        identity: &ServerIdentity,
        protocols: TlsProtocols,
    ) -> impl Future<Output = Result<Option<TlsSession>, ConnectionError>> + Send;

    /// Cancel pending operations and release the stream and socket. Idempotent.
    fn close(&mut self);

    /// Whether `close` has been called.
    fn is_closed(&self) -> bool;

    /// Live connection state of the OS socket.
    fn is_connected(&self) -> bool;

    fn remote_endpoint(&self) -> Option<SocketAddr>;

    fn local_endpoint(&self) -> Option<SocketAddr>;

    fn remote_ip_address(&self) -> Option<IpAddr> {
        self.remote_endpoint().map(|addr| addr.ip())
    }

    /// Remote port, or `None` when no remote endpoint is bound.
    fn remote_port(&self) -> Option<u16> {
        self.remote_endpoint().map(|addr| addr.port())
    }

    fn no_delay(&self) -> bool;

    fn set_no_delay(&self, no_delay: bool) -> Result<(), ConnectionError>;
}

/// A pending accept.
///
/// Resolves exactly once. Dropping it abandons the accept.
#[must_use = "an accept does nothing useful unless its result is awaited"]
pub struct Accepting<T> {
    state: State<T>,
}

enum State<T> {
    Spawned(JoinHandle<AcceptResult<T>>),
    Ready(Option<AcceptResult<T>>),
}

impl<T> Accepting<T> {
    pub(crate) fn spawned(handle: JoinHandle<AcceptResult<T>>) -> Self {
        Self {
            state: State::Spawned(handle),
        }
    }

    pub(crate) fn ready(result: AcceptResult<T>) -> Self {
        Self {
            state: State::Ready(Some(result)),
        }
    }
}

impl<T> Unpin for Accepting<T> {}

impl<T> Future for Accepting<T> {
    type Output = AcceptResult<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        let result = match &mut this.state {
            State::Spawned(handle) => match ready!(Pin::new(handle).poll(cx)) {
                Ok(result) => result,
                Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
                // Aborted: only happens while the runtime shuts down.
                Err(_) => Ok(None),
            },
            State::Ready(result) => result.take().unwrap_or(Ok(None)),
        };
        this.state = State::Ready(None);
        Poll::Ready(result)
    }
}

impl<T> Drop for Accepting<T> {
    fn drop(&mut self) {
        if let State::Spawned(handle) = &self.state {
            handle.abort();
        }
    }
}

impl<T> std::fmt::Debug for Accepting<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = match &self.state {
            State::Spawned(handle) if handle.is_finished() => "finished",
            State::Spawned(_) => "pending",
            State::Ready(Some(_)) => "ready",
            State::Ready(None) => "taken",
        };
        f.debug_struct("Accepting").field("state", &state).finish()
    }
}
