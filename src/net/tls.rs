//! TLS material: server certificate, allowed protocol versions, negotiated session.

use std::fmt;
use std::fs::File;
use std::io::{self, BufReader};
use std::path::Path;
use std::sync::Arc;

use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::server::ServerConnection;
use rustls::{ProtocolVersion, ServerConfig, SupportedProtocolVersion};
use serde::{Deserialize, Serialize};

use crate::net::error::AuthenticationError;

/// A TLS protocol version a server may negotiate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TlsVersion {
    Tls12,
    Tls13,
}

impl TlsVersion {
    fn supported(self) -> &'static SupportedProtocolVersion {
        match self {
            TlsVersion::Tls12 => &rustls::version::TLS12,
            TlsVersion::Tls13 => &rustls::version::TLS13,
        }
    }

    fn from_protocol(version: ProtocolVersion) -> Option<Self> {
        match version {
            ProtocolVersion::TLSv1_2 => Some(TlsVersion::Tls12),
            ProtocolVersion::TLSv1_3 => Some(TlsVersion::Tls13),
            _ => None,
        }
    }
}

impl fmt::Display for TlsVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TlsVersion::Tls12 => f.write_str("TLSv1.2"),
            TlsVersion::Tls13 => f.write_str("TLSv1.3"),
        }
    }
}

/// The set of protocol versions allowed during an upgrade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TlsProtocols {
    tls12: bool,
    tls13: bool,
}

impl TlsProtocols {
    /// TLS 1.2 and 1.3.
    pub const ALL: TlsProtocols = TlsProtocols {
        tls12: true,
        tls13: true,
    };

    /// TLS 1.3 only.
    pub const TLS13_ONLY: TlsProtocols = TlsProtocols {
        tls12: false,
        tls13: true,
    };

    /// The empty set. Upgrading with it always fails.
    pub const NONE: TlsProtocols = TlsProtocols {
        tls12: false,
        tls13: false,
    };

    /// Add `version` to the set.
    pub fn with(mut self, version: TlsVersion) -> Self {
        match version {
            TlsVersion::Tls12 => self.tls12 = true,
            TlsVersion::Tls13 => self.tls13 = true,
        }
        self
    }

    pub fn contains(&self, version: TlsVersion) -> bool {
        match version {
            TlsVersion::Tls12 => self.tls12,
            TlsVersion::Tls13 => self.tls13,
        }
    }

    pub fn is_empty(&self) -> bool {
        !self.tls12 && !self.tls13
    }

    fn supported(&self) -> Vec<&'static SupportedProtocolVersion> {
        [TlsVersion::Tls13, TlsVersion::Tls12]
            .into_iter()
            .filter(|v| self.contains(*v))
            .map(TlsVersion::supported)
            .collect()
    }
}

impl FromIterator<TlsVersion> for TlsProtocols {
    fn from_iter<I: IntoIterator<Item = TlsVersion>>(iter: I) -> Self {
        iter.into_iter().fold(TlsProtocols::NONE, TlsProtocols::with)
    }
}

/// Certificate chain and private key presented by the server.
pub struct ServerIdentity {
    cert_chain: Vec<CertificateDer<'static>>,
    key: PrivateKeyDer<'static>,
}

impl ServerIdentity {
    /// Build from DER-encoded material.
    pub fn from_der(cert_chain: Vec<CertificateDer<'static>>, key: PrivateKeyDer<'static>) -> Self {
        Self { cert_chain, key }
    }

    /// Load a PEM certificate chain and a PEM private key.
    pub fn from_pem_files(cert_path: &Path, key_path: &Path) -> Result<Self, AuthenticationError> {
        if !cert_path.exists() {
            return Err(AuthenticationError::Io(io::Error::new(
                io::ErrorKind::NotFound,
                format!("Certificate file not found: {:?}", cert_path),
            )));
        }
        if !key_path.exists() {
            return Err(AuthenticationError::Io(io::Error::new(
                io::ErrorKind::NotFound,
                format!("Private key file not found: {:?}", key_path),
            )));
        }

        let mut reader = BufReader::new(File::open(cert_path)?);
        let cert_chain = rustls_pemfile::certs(&mut reader).collect::<Result<Vec<_>, _>>()?;
        if cert_chain.is_empty() {
            return Err(AuthenticationError::MissingCertificate(
                cert_path.display().to_string(),
            ));
        }

        let mut reader = BufReader::new(File::open(key_path)?);
        let key = rustls_pemfile::private_key(&mut reader)?
            .ok_or_else(|| AuthenticationError::MissingPrivateKey(key_path.display().to_string()))?;

        Ok(Self { cert_chain, key })
    }

    /// The certificate chain, leaf first.
    pub fn cert_chain(&self) -> &[CertificateDer<'static>] {
        &self.cert_chain
    }

    /// Server-side rustls configuration restricted to `protocols`.
    pub(crate) fn server_config(
        &self,
        protocols: TlsProtocols,
    ) -> Result<Arc<ServerConfig>, AuthenticationError> {
        if protocols.is_empty() {
            return Err(AuthenticationError::NoProtocols);
        }
        let provider = Arc::new(rustls::crypto::ring::default_provider());
        let config = ServerConfig::builder_with_provider(provider)
            .with_protocol_versions(&protocols.supported())
            .map_err(AuthenticationError::Certificate)?
            .with_no_client_auth()
            .with_single_cert(self.cert_chain.clone(), self.key.clone_key())
            .map_err(AuthenticationError::Certificate)?;
        Ok(Arc::new(config))
    }
}

impl Clone for ServerIdentity {
    fn clone(&self) -> Self {
        Self {
            cert_chain: self.cert_chain.clone(),
            key: self.key.clone_key(),
        }
    }
}

impl fmt::Debug for ServerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerIdentity")
            .field("certificates", &self.cert_chain.len())
            .finish_non_exhaustive()
    }
}

/// Parameters negotiated by a completed TLS upgrade.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsSession {
    /// Negotiated protocol version.
    pub version: Option<TlsVersion>,
    /// SNI host name sent by the client.
    pub server_name: Option<String>,
}

impl TlsSession {
    pub(crate) fn from_connection(conn: &ServerConnection) -> Self {
        Self {
            version: conn.protocol_version().and_then(TlsVersion::from_protocol),
            server_name: conn.server_name().map(str::to_string),
        }
    }
}
