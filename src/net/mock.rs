//! Scripted [`Transport`] for exercising the layers above a connection.

use std::collections::VecDeque;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::net::cancel::CancellationScope;
use crate::net::error::{AuthenticationError, ConnectionError, Operation};
use crate::net::tls::{ServerIdentity, TlsProtocols, TlsSession, TlsVersion};
use crate::net::transport::{Accepting, Transport};

/// One scripted accept outcome.
#[derive(Debug, Clone)]
pub(crate) enum MockAccept {
    /// A peer arrives from this address.
    Peer(SocketAddr),
    /// The accept fails with this error kind.
    Fail(io::ErrorKind),
    /// A peer arrives just after the listener was cancelled.
    CancelRace,
}

#[derive(Debug)]
pub(crate) struct MockTransport {
    script: Arc<Mutex<VecDeque<MockAccept>>>,
    scope: CancellationScope,
    peer: Option<SocketAddr>,
    local: Option<SocketAddr>,
    listening: bool,
    secured: bool,
    fail_handshake: bool,
    no_delay: AtomicBool,
}

impl MockTransport {
    pub(crate) fn listener(script: impl IntoIterator<Item = MockAccept>) -> Self {
        Self {
            script: Arc::new(Mutex::new(script.into_iter().collect())),
            scope: CancellationScope::new(),
            peer: None,
            local: None,
            listening: false,
            secured: false,
            fail_handshake: false,
            no_delay: AtomicBool::new(false),
        }
    }

    fn peer(addr: SocketAddr, local: Option<SocketAddr>) -> Self {
        Self {
            peer: Some(addr),
            local,
            ..Self::listener([])
        }
    }

    /// Make every TLS upgrade of accepted peers fail.
    pub(crate) fn failing_handshakes(mut self) -> Self {
        self.fail_handshake = true;
        self
    }
}

impl Transport for MockTransport {
    fn bind(&mut self, addr: SocketAddr) -> Result<(), ConnectionError> {
        self.local = Some(addr);
        Ok(())
    }

    fn listen(&mut self, _backlog: u32) -> Result<(), ConnectionError> {
        if self.local.is_none() {
            return Err(ConnectionError::invalid(Operation::Listen, "socket is not bound"));
        }
        self.listening = true;
        Ok(())
    }

    fn accept(&self) -> Accepting<Self> {
        if self.scope.is_cancelled() {
            return Accepting::ready(Ok(None));
        }
        if !self.listening {
            return Accepting::ready(Err(ConnectionError::invalid(
                Operation::Accept,
                "socket is not listening",
            )));
        }
        let next = self.script.lock().ok().and_then(|mut script| script.pop_front());
        match next {
            Some(MockAccept::Peer(addr)) => {
                let mut child = MockTransport::peer(addr, self.local);
                child.fail_handshake = self.fail_handshake;
                Accepting::ready(Ok(Some(child)))
            }
            Some(MockAccept::Fail(kind)) => Accepting::ready(Err(ConnectionError::transport(
                Operation::Accept,
                io::Error::new(kind, "scripted accept failure"),
            ))),
            Some(MockAccept::CancelRace) => Accepting::ready(Ok(None)),
            // Script exhausted: park until closed.
            None => {
                let mut token = self.scope.token();
                Accepting::spawned(tokio::spawn(async move {
                    token.cancelled().await;
                    Ok(None)
                }))
            }
        }
    }

    async fn authenticate(
        &mut self,
        _identity: &ServerIdentity,
        _protocols: TlsProtocols,
    ) -> Result<Option<TlsSession>, ConnectionError> {
        if self.secured {
            return Err(AuthenticationError::AlreadySecured.into());
        }
        if self.scope.is_cancelled() {
            return Ok(None);
        }
        self.secured = true;
        if self.fail_handshake {
            return Err(AuthenticationError::Handshake(io::Error::new(
                io::ErrorKind::InvalidData,
                "scripted handshake failure",
            ))
            .into());
        }
        Ok(Some(TlsSession {
            version: Some(TlsVersion::Tls13),
            server_name: None,
        }))
    }

    fn close(&mut self) {
        self.scope.cancel();
        self.peer = None;
        self.listening = false;
    }

    fn is_closed(&self) -> bool {
        self.scope.is_cancelled()
    }

    fn is_connected(&self) -> bool {
        self.peer.is_some()
    }

    fn remote_endpoint(&self) -> Option<SocketAddr> {
        self.peer
    }

    fn local_endpoint(&self) -> Option<SocketAddr> {
        self.local
    }

    fn no_delay(&self) -> bool {
        self.no_delay.load(Ordering::Relaxed)
    }

    fn set_no_delay(&self, no_delay: bool) -> Result<(), ConnectionError> {
        self.no_delay.store(no_delay, Ordering::Relaxed);
        Ok(())
    }
}
