//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName};
use rustls::{ClientConfig, RootCertStore};
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;

use wsconn::net::{Connection, ServerIdentity};

/// A freshly generated self-signed certificate for `localhost`.
pub struct TestCert {
    pub cert_der: CertificateDer<'static>,
    pub key_der: Vec<u8>,
    pub cert_pem: String,
    pub key_pem: String,
}

impl TestCert {
    pub fn generate() -> Self {
        let generated = rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
        Self {
            cert_der: generated.cert.der().clone(),
            key_der: generated.key_pair.serialize_der(),
            cert_pem: generated.cert.pem(),
            key_pem: generated.key_pair.serialize_pem(),
        }
    }

    pub fn identity(&self) -> ServerIdentity {
        ServerIdentity::from_der(
            vec![self.cert_der.clone()],
            PrivateKeyDer::Pkcs8(self.key_der.clone().into()),
        )
    }

    /// Write the PEM files to a unique temp directory and return their paths.
    pub fn write_pem_files(&self) -> (PathBuf, PathBuf) {
        let dir = std::env::temp_dir().join(format!("wsconn-test-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let cert_path = dir.join("cert.pem");
        let key_path = dir.join("key.pem");
        std::fs::write(&cert_path, &self.cert_pem).unwrap();
        std::fs::write(&key_path, &self.key_pem).unwrap();
        (cert_path, key_path)
    }
}

/// A listening connection on an ephemeral loopback port.
pub fn listening() -> (Connection, SocketAddr) {
    let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
    let mut listener = Connection::for_address(&addr).unwrap();
    listener.bind(addr).unwrap();
    listener.listen(5).unwrap();
    let local = listener.local_endpoint().unwrap();
    (listener, local)
}

/// Connect a raw TCP client and return it with the accepted server-side child.
pub async fn accept_pair(listener: &Connection, addr: SocketAddr) -> (Connection, TcpStream) {
    let pending = listener.accept();
    let client = TcpStream::connect(addr).await.unwrap();
    let child = pending.await.unwrap().expect("accept should deliver the client");
    (child, client)
}

/// Client configuration trusting only `trusted`, or nothing at all.
pub fn client_config(trusted: Option<&CertificateDer<'static>>) -> Arc<ClientConfig> {
    let mut roots = RootCertStore::empty();
    if let Some(cert) = trusted {
        roots.add(cert.clone()).unwrap();
    }
    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let config = ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .unwrap()
        .with_root_certificates(roots)
        .with_no_client_auth();
    Arc::new(config)
}

/// Run a client TLS handshake for `localhost` over `tcp`.
pub async fn tls_connect(
    tcp: TcpStream,
    config: Arc<ClientConfig>,
) -> std::io::Result<TlsStream<TcpStream>> {
    let name = ServerName::try_from("localhost").unwrap();
    TlsConnector::from(config).connect(name, tcp).await
}
