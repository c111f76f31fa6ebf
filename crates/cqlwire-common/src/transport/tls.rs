//! TLS material loading and client/server configuration.

use std::fmt;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName};
use rustls::{ClientConfig, RootCertStore, ServerConfig};
use serde::{Deserialize, Serialize};
use tokio_rustls::{TlsAcceptor, TlsConnector};

use crate::protocol::error::{CqlError, Result};

/// How the server's certificate is checked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerifyMode {
    /// Accept any certificate.
    None,
    /// Require a chain to the configured CA and a matching server name.
    #[default]
    Peer,
}

impl FromStr for VerifyMode {
    type Err = CqlError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "none" => Ok(VerifyMode::None),
            "peer" => Ok(VerifyMode::Peer),
            other => Err(CqlError::InvalidConfig(format!(
                "unknown verify mode '{}' (expected none or peer)",
                other
            ))),
        }
    }
}

/// TLS settings for connections to cluster nodes.
///
/// # Example
///
/// ```
/// use cqlwire_common::transport::{TlsConfig, VerifyMode};
///
/// let tls = TlsConfig::peer("/etc/cassandra/ca.pem")
///     .with_client_identity("/etc/cassandra/client.pem", "/etc/cassandra/client.key")
///     .with_server_name("db.internal");
/// assert!(tls.enabled);
/// assert_eq!(tls.verify_mode, VerifyMode::Peer);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TlsConfig {
    pub enabled: bool,
    /// Client certificate chain (PEM), for mutual TLS.
    pub certificate_path: Option<PathBuf>,
    /// Client private key (PEM), for mutual TLS.
    pub private_key_path: Option<PathBuf>,
    /// Trusted CA certificates (PEM). Required when `verify_mode` is `Peer`.
    pub ca_path: Option<PathBuf>,
    pub verify_mode: VerifyMode,
    /// Name checked against the server certificate; defaults to the node host.
    pub server_name: Option<String>,
}

impl TlsConfig {
    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn peer(ca_path: impl Into<PathBuf>) -> Self {
        Self {
            enabled: true,
            ca_path: Some(ca_path.into()),
            verify_mode: VerifyMode::Peer,
            ..Default::default()
        }
    }

    /// TLS without certificate verification.
    pub fn insecure() -> Self {
        Self {
            enabled: true,
            verify_mode: VerifyMode::None,
            ..Default::default()
        }
    }

    pub fn with_client_identity(
        mut self,
        certificate_path: impl Into<PathBuf>,
        private_key_path: impl Into<PathBuf>,
    ) -> Self {
        self.certificate_path = Some(certificate_path.into());
        self.private_key_path = Some(private_key_path.into());
        self
    }

    pub fn with_server_name(mut self, server_name: impl Into<String>) -> Self {
        self.server_name = Some(server_name.into());
        self
    }

    /// Builds the connector, or `None` when TLS is disabled.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` if:
    /// - `Peer` verification is requested without a CA file
    /// - Only one of certificate and private key is set
    /// - A PEM file cannot be read or contains no usable material
    pub fn build_context(&self) -> Result<Option<TlsContext>> {
        if !self.enabled {
            return Ok(None);
        }

        rustls::crypto::ring::default_provider().install_default().ok();

        let builder = match self.verify_mode {
            VerifyMode::Peer => {
                let ca_path = self.ca_path.as_ref().ok_or_else(|| {
                    CqlError::InvalidConfig("verify mode 'peer' requires a CA path".to_string())
                })?;
                let mut roots = RootCertStore::empty();
                for cert in load_certs(ca_path)? {
                    roots.add(cert).map_err(|e| {
                        CqlError::InvalidConfig(format!(
                            "invalid CA certificate in {}: {}",
                            ca_path.display(),
                            e
                        ))
                    })?;
                }
                ClientConfig::builder().with_root_certificates(roots)
            }
            VerifyMode::None => ClientConfig::builder()
                .dangerous()
                .with_custom_certificate_verifier(SkipServerVerification::new()),
        };

        let (config, has_client_identity) =
            match (&self.certificate_path, &self.private_key_path) {
                (Some(cert_path), Some(key_path)) => {
                    let certs = load_certs(cert_path)?;
                    let key = load_private_key(key_path)?;
                    let config = builder.with_client_auth_cert(certs, key).map_err(|e| {
                        CqlError::InvalidConfig(format!("invalid client certificate: {}", e))
                    })?;
                    (config, true)
                }
                (None, None) => (builder.with_no_client_auth(), false),
                _ => {
                    return Err(CqlError::InvalidConfig(
                        "client certificate and private key must be set together".to_string(),
                    ))
                }
            };

        Ok(Some(TlsContext {
            connector: TlsConnector::from(Arc::new(config)),
            server_name: self.server_name.clone(),
            has_client_identity,
        }))
    }
}

/// A ready-to-use TLS connector shared by every connection of a cluster.
#[derive(Clone)]
pub struct TlsContext {
    connector: TlsConnector,
    server_name: Option<String>,
    has_client_identity: bool,
}

impl TlsContext {
    pub fn connector(&self) -> &TlsConnector {
        &self.connector
    }

    /// Whether a client certificate is presented during the handshake.
    pub fn has_client_identity(&self) -> bool {
        self.has_client_identity
    }

    /// Resolves the name to verify for a node; the configured override wins.
    pub fn server_name_for(&self, host: &str) -> Result<ServerName<'static>> {
        let name = self.server_name.as_deref().unwrap_or(host);
        ServerName::try_from(name.to_string())
            .map_err(|e| CqlError::InvalidConfig(format!("invalid server name '{}': {}", name, e)))
    }
}

impl fmt::Debug for TlsContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TlsContext")
            .field("server_name", &self.server_name)
            .field("has_client_identity", &self.has_client_identity)
            .finish()
    }
}

fn open(path: &Path) -> Result<BufReader<File>> {
    File::open(path).map(BufReader::new).map_err(|e| {
        CqlError::InvalidConfig(format!("failed to open {}: {}", path.display(), e))
    })
}

/// Reads every certificate from a PEM file.
pub fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>> {
    let certs = rustls_pemfile::certs(&mut open(path)?)
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| {
            CqlError::InvalidConfig(format!("invalid PEM in {}: {}", path.display(), e))
        })?;
    if certs.is_empty() {
        return Err(CqlError::InvalidConfig(format!(
            "no certificates found in {}",
            path.display()
        )));
    }
    Ok(certs)
}

/// Reads the first private key (PKCS#1, PKCS#8 or SEC1) from a PEM file.
pub fn load_private_key(path: &Path) -> Result<PrivateKeyDer<'static>> {
    rustls_pemfile::private_key(&mut open(path)?)
        .map_err(|e| CqlError::InvalidConfig(format!("invalid PEM in {}: {}", path.display(), e)))?
        .ok_or_else(|| {
            CqlError::InvalidConfig(format!("no private key found in {}", path.display()))
        })
}

/// Builds a server-side acceptor, used by [`FrameServer`](crate::transport::FrameServer).
pub fn server_acceptor(certificate_path: &Path, private_key_path: &Path) -> Result<TlsAcceptor> {
    rustls::crypto::ring::default_provider().install_default().ok();

    let certs = load_certs(certificate_path)?;
    let key = load_private_key(private_key_path)?;
    let config = ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| CqlError::InvalidConfig(format!("invalid server certificate: {}", e)))?;
    Ok(TlsAcceptor::from(Arc::new(config)))
}

/// Certificate verifier used for [`VerifyMode::None`].
#[derive(Debug)]
struct SkipServerVerification;

impl SkipServerVerification {
    fn new() -> Arc<Self> {
        Arc::new(Self)
    }
}

impl rustls::client::danger::ServerCertVerifier for SkipServerVerification {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls::pki_types::UnixTime,
    ) -> std::result::Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> std::result::Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        rustls::crypto::ring::default_provider()
            .signature_verification_algorithms
            .supported_schemes()
    }
}
