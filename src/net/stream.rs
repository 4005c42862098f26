//! The active byte channel of a connection.

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tokio_rustls::server::TlsStream;

use crate::net::queued::{QueuedStream, QueuedWriter};

/// Raw transport stream, or a TLS stream behind the write-serializing decorator.
///
/// Switching from `Plain` to `Secure` happens once, during
/// [`Connection::authenticate`](crate::net::Connection::authenticate).
#[derive(Debug)]
pub enum ConnectionStream {
    Plain(TcpStream),
    Secure(QueuedStream<TlsStream<TcpStream>>),
}

impl ConnectionStream {
    /// Whether the stream is TLS-secured.
    pub fn is_secure(&self) -> bool {
        matches!(self, ConnectionStream::Secure(_))
    }

    /// Handle for concurrent writers. Only secure streams serialize writes.
    pub fn queued_writer(&self) -> Option<QueuedWriter> {
        match self {
            ConnectionStream::Plain(_) => None,
            ConnectionStream::Secure(stream) => Some(stream.writer()),
        }
    }
}

impl AsyncRead for ConnectionStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            ConnectionStream::Plain(s) => Pin::new(s).poll_read(cx, buf),
            ConnectionStream::Secure(s) => Pin::new(s).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for ConnectionStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            ConnectionStream::Plain(s) => Pin::new(s).poll_write(cx, buf),
            ConnectionStream::Secure(s) => Pin::new(s).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            ConnectionStream::Plain(s) => Pin::new(s).poll_flush(cx),
            ConnectionStream::Secure(s) => Pin::new(s).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            ConnectionStream::Plain(s) => Pin::new(s).poll_shutdown(cx),
            ConnectionStream::Secure(s) => Pin::new(s).poll_shutdown(cx),
        }
    }
}
