//! Error types for connection operations.
//!
//! Synchronous setup calls (`bind`, `listen`) return these directly. The
//! asynchronous operations (`accept`, `authenticate`) report them exactly once
//! through their result. A cancelled operation is not an error: it resolves to
//! `Ok(None)`.

use std::fmt;
use std::io;

use thiserror::Error;

/// The socket operation that produced a transport error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    /// Creating the OS socket.
    Create,
    /// Binding to a local address.
    Bind,
    /// Marking the socket passive.
    Listen,
    /// Accepting an inbound peer.
    Accept,
    /// Opening the byte stream over a connected socket.
    Open,
    /// Reading or changing a socket option.
    Configure,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Operation::Create => "create",
            Operation::Bind => "bind",
            Operation::Listen => "listen",
            Operation::Accept => "accept",
            Operation::Open => "open",
            Operation::Configure => "configure",
        };
        f.write_str(name)
    }
}

/// Error type for [`Connection`](crate::net::Connection) operations.
#[derive(Debug, Error)]
pub enum ConnectionError {
    /// Bind, listen, accept or socket option failure.
    #[error("transport error during {op}: {source}")]
    Transport {
        op: Operation,
        #[source]
        source: io::Error,
    },

    /// TLS upgrade failure.
    #[error(transparent)]
    Authentication(#[from] AuthenticationError),
}

impl ConnectionError {
    pub(crate) fn transport(op: Operation, source: io::Error) -> Self {
        ConnectionError::Transport { op, source }
    }

    pub(crate) fn invalid(op: Operation, msg: &'static str) -> Self {
        ConnectionError::Transport {
            op,
            source: io::Error::new(io::ErrorKind::InvalidInput, msg),
        }
    }

    /// The I/O error kind for transport errors.
    pub fn io_kind(&self) -> Option<io::ErrorKind> {
        match self {
            ConnectionError::Transport { source, .. } => Some(source.kind()),
            ConnectionError::Authentication(_) => None,
        }
    }

    /// True if this is a TLS upgrade failure.
    pub fn is_authentication(&self) -> bool {
        matches!(self, ConnectionError::Authentication(_))
    }
}

/// Certificate or protocol negotiation failure during a TLS upgrade.
#[derive(Debug, Error)]
pub enum AuthenticationError {
    #[error("failed to read certificate material: {0}")]
    Io(#[from] io::Error),

    #[error("no certificate found in {0}")]
    MissingCertificate(String),

    #[error("no private key found in {0}")]
    MissingPrivateKey(String),

    #[error("allowed TLS protocol set is empty")]
    NoProtocols,

    #[error("invalid certificate or key: {0}")]
    Certificate(#[source] rustls::Error),

    #[error("TLS handshake failed: {0}")]
    Handshake(#[source] io::Error),

    #[error("connection has no open stream to upgrade")]
    NotConnected,

    #[error("connection is already secured")]
    AlreadySecured,
}
