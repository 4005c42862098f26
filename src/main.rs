//! `wsconn`: TCP/TLS echo server on top of the connection layer.

use std::path::PathBuf;

use clap::Parser;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use wsconn::config::{load_config, validate_config, TlsConfig, WsConnConfig};
use wsconn::lifecycle::{signals, Shutdown};
use wsconn::net::{Connection, ConnectionInfo, HandshakeDetails, PeerDetails};
use wsconn::observability::{logging, metrics};
use wsconn::server::Server;

#[derive(Debug, Parser)]
#[command(name = "wsconn", version, about = "Echo server over the wsconn connection layer")]
struct Cli {
    /// TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override `listener.bind_address`.
    #[arg(short, long)]
    bind: Option<String>,

    /// PEM certificate chain; enables TLS together with --tls-key.
    #[arg(long, requires = "tls_key")]
    tls_cert: Option<String>,

    /// PEM private key.
    #[arg(long, requires = "tls_cert")]
    tls_key: Option<String>,
}

impl Cli {
    fn into_config(self) -> Result<WsConnConfig, Box<dyn std::error::Error>> {
        let mut config = match &self.config {
            Some(path) => load_config(path)?,
            None => WsConnConfig::default(),
        };
        if let Some(bind) = self.bind {
            config.listener.bind_address = bind;
        }
        if let (Some(cert_path), Some(key_path)) = (self.tls_cert, self.tls_key) {
            let mut tls = TlsConfig::new(cert_path, key_path);
            if let Some(existing) = config.tls.take() {
                tls.protocols = existing.protocols;
            }
            config.tls = Some(tls);
        }
        validate_config(&config).map_err(|errors| {
            errors
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(", ")
        })?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Cli::parse().into_config()?;
    logging::init(&config.observability.log_level)?;

    tracing::info!("wsconn v{} starting", env!("CARGO_PKG_VERSION"));
    tracing::info!(
        bind_address = %config.listener.bind_address,
        max_connections = config.listener.max_connections,
        tls = config.tls.is_some(),
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr)?,
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let server = Server::bind(&config)?;
    let shutdown = Shutdown::new();
    tokio::spawn(signals::shutdown_on_signal(shutdown.clone()));

    let summary = server.run(shutdown.subscribe(), echo).await;
    tracing::info!(
        accepted = summary.accepted,
        accept_errors = summary.accept_errors,
        "Shutdown complete"
    );
    Ok(())
}

async fn echo(mut conn: Connection) {
    let info = ConnectionInfo::new(&conn, HandshakeDetails::default());
    tracing::info!(
        connection_id = %info.id(),
        client = ?info.client_endpoint(),
        secure = conn.is_secure(),
        "Client connected"
    );

    let Some(stream) = conn.stream_mut() else {
        return;
    };
    let mut buf = vec![0u8; 8 * 1024];
    loop {
        let n = match stream.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => {
                tracing::debug!(connection_id = %info.id(), error = %e, "Read failed");
                break;
            }
        };
        if let Err(e) = stream.write_all(&buf[..n]).await {
            tracing::debug!(connection_id = %info.id(), error = %e, "Write failed");
            break;
        }
    }

    conn.close();
    tracing::info!(connection_id = %info.id(), "Client disconnected");
}
