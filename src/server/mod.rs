//! Accept loop with backpressure.
//!
//! # Responsibilities
//! - Keep exactly one accept outstanding on the listening connection
//! - Enforce max_connections via semaphore before accepting
//! - Apply per-connection setup (TCP_NODELAY, optional TLS upgrade)
//! - Hand each ready connection to the caller's handler on its own task
//! - On shutdown: close the listener, then drain open connections
//!
//! # Design Decisions
//! - Generic over [`Transport`] so failure paths can be scripted in tests
//! - Accept errors are logged and the loop keeps going
//! - A cancelled accept means "try again" unless the listener itself is closed

pub mod tracker;

use std::future::Future;
use std::net::{AddrParseError, SocketAddr};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{broadcast, OwnedSemaphorePermit, Semaphore};

use crate::config::{TlsConfig, WsConnConfig};
use crate::net::{
    AuthenticationError, Connection, ConnectionError, ServerIdentity, TlsProtocols, Transport,
};

pub use tracker::{ConnectionGuard, ConnectionTracker};

/// Pause after a failed accept so persistent errors (e.g. EMFILE) do not spin.
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(10);

/// Error type for server setup.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("invalid bind address {address:?}: {source}")]
    InvalidAddress {
        address: String,
        #[source]
        source: AddrParseError,
    },

    #[error(transparent)]
    Connection(#[from] ConnectionError),

    #[error("failed to load TLS identity: {0}")]
    Tls(#[from] AuthenticationError),
}

/// Certificate and protocol versions used to upgrade accepted connections.
#[derive(Debug, Clone)]
pub struct TlsSettings {
    pub identity: Arc<ServerIdentity>,
    pub protocols: TlsProtocols,
}

impl TlsSettings {
    pub fn new(identity: ServerIdentity, protocols: TlsProtocols) -> Self {
        Self {
            identity: Arc::new(identity),
            protocols,
        }
    }

    /// Load the PEM files named by `config`.
    pub fn load(config: &TlsConfig) -> Result<Self, AuthenticationError> {
        let identity = ServerIdentity::from_pem_files(
            Path::new(&config.cert_path),
            Path::new(&config.key_path),
        )?;
        tracing::info!(
            cert_path = %config.cert_path,
            certificates = identity.cert_chain().len(),
            "TLS identity loaded"
        );
        Ok(Self::new(identity, config.protocol_set()))
    }
}

/// Per-server settings.
#[derive(Debug, Clone)]
pub struct ServerOptions {
    pub no_delay: bool,
    pub max_connections: usize,
    pub shutdown_timeout: Duration,
    pub tls: Option<TlsSettings>,
}

impl ServerOptions {
    pub fn from_config(config: &WsConnConfig) -> Result<Self, ServerError> {
        let tls = config.tls.as_ref().map(TlsSettings::load).transpose()?;
        Ok(Self {
            no_delay: config.listener.no_delay,
            max_connections: config.listener.max_connections,
            shutdown_timeout: Duration::from_secs(config.listener.shutdown_timeout_secs),
            tls,
        })
    }
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            no_delay: true,
            max_connections: 10_000,
            shutdown_timeout: Duration::from_secs(10),
            tls: None,
        }
    }
}

/// Accept-loop counters returned when the server stops.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ServeSummary {
    /// Connections handed off for serving.
    pub accepted: u64,
    /// Accepts that reported an error.
    pub accept_errors: u64,
    /// Accepts that resolved as cancelled while the listener stayed open.
    pub cancelled: u64,
}

/// A listening connection plus the loop that serves it.
pub struct Server<T: Transport> {
    listener: T,
    options: ServerOptions,
    connection_limit: Arc<Semaphore>,
    tracker: ConnectionTracker,
}

impl Server<Connection> {
    /// Bind and listen according to `config`. TLS material is loaded first.
    pub fn bind(config: &WsConnConfig) -> Result<Self, ServerError> {
        let options = ServerOptions::from_config(config)?;
        let address = &config.listener.bind_address;
        let addr: SocketAddr = address.parse().map_err(|source| ServerError::InvalidAddress {
            address: address.clone(),
            source,
        })?;

        let mut listener = Connection::for_address(&addr)?
            .with_write_queue_depth(config.streams.write_queue_depth);
        listener.bind(addr)?;
        listener.listen(config.listener.backlog)?;
        Ok(Self::new(listener, options))
    }
}

impl<T: Transport> Server<T> {
    /// Serve an already listening `listener`.
    pub fn new(listener: T, options: ServerOptions) -> Self {
        Self {
            listener,
            connection_limit: Arc::new(Semaphore::new(options.max_connections.max(1))),
            options,
            tracker: ConnectionTracker::new(),
        }
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.listener.local_endpoint()
    }

    pub fn tracker(&self) -> ConnectionTracker {
        self.tracker.clone()
    }

    /// Run the accept loop until `shutdown` fires or the listener closes.
    ///
    /// Each connection is passed to `handler` on its own task; the connection
    /// slot is released when that task ends.
    pub async fn run<H, Fut>(mut self, mut shutdown: broadcast::Receiver<()>, handler: H) -> ServeSummary
    where
        H: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let handler = Arc::new(handler);
        let mut summary = ServeSummary::default();

        tracing::info!(
            address = ?self.listener.local_endpoint(),
            max_connections = self.options.max_connections,
            tls = self.options.tls.is_some(),
            "Accept loop started"
        );

        loop {
            let permit = tokio::select! {
                _ = shutdown.recv() => break,
                permit = Arc::clone(&self.connection_limit).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let outcome = tokio::select! {
                _ = shutdown.recv() => break,
                outcome = self.listener.accept() => outcome,
            };

            match outcome {
                Ok(Some(conn)) => {
                    summary.accepted += 1;
                    self.spawn_connection(conn, permit, Arc::clone(&handler));
                }
                Ok(None) if self.listener.is_closed() => {
                    tracing::info!("Listener closed, stopping accept loop");
                    break;
                }
                Ok(None) => {
                    summary.cancelled += 1;
                    tracing::trace!("Accept cancelled, retrying");
                }
                Err(e) => {
                    summary.accept_errors += 1;
                    tracing::warn!(error = %e, "Accept failed");
                    tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
                }
            }
        }

        self.listener.close();
        drain(self.tracker.clone(), self.options.shutdown_timeout).await;
        tracing::info!(
            accepted = summary.accepted,
            accept_errors = summary.accept_errors,
            "Accept loop stopped"
        );
        summary
    }

    fn spawn_connection<H, Fut>(&self, mut conn: T, permit: OwnedSemaphorePermit, handler: Arc<H>)
    where
        H: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let guard = self.tracker.track();
        let tls = self.options.tls.clone();
        let no_delay = self.options.no_delay;

        tokio::spawn(async move {
            let _guard = guard;
            let _permit = permit;
            let peer = conn.remote_endpoint();

            if let Err(e) = conn.set_no_delay(no_delay) {
                tracing::debug!(peer = ?peer, error = %e, "Could not set TCP_NODELAY");
            }

            if let Some(tls) = tls {
                match conn.authenticate(&tls.identity, tls.protocols).await {
                    Ok(Some(session)) => {
                        tracing::debug!(peer = ?peer, version = ?session.version, "Connection secured");
                    }
                    Ok(None) => {
                        conn.close();
                        return;
                    }
                    Err(e) => {
                        tracing::warn!(peer = ?peer, error = %e, "TLS upgrade failed");
                        conn.close();
                        return;
                    }
                }
            }

            handler(conn).await;
        });
    }
}

/// Wait up to `timeout` for every tracked connection to finish.
async fn drain(tracker: ConnectionTracker, timeout: Duration) {
    let active = tracker.active_count();
    if active == 0 {
        return;
    }
    tracing::info!(active, "Waiting for open connections to finish");
    if tokio::time::timeout(timeout, tracker.wait_idle()).await.is_err() {
        tracing::warn!(
            remaining = tracker.active_count(),
            "Shutdown timeout elapsed with connections still open"
        );
    }
}
