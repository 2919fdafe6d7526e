//! Discovery of the certificate a station must trust for a server.
//!
//! The server is dialed over TLS and its chain verified against the
//! configured roots. The terminal certificate of the verified chain is the
//! trust anchor handed to the station.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rustls::pki_types::{CertificateDer, ServerName};
use rustls::{ClientConfig, RootCertStore};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_rustls::TlsConnector;
use tracing::{debug, instrument, warn};
use x509_parser::pem::Pem;
use x509_parser::prelude::{FromDer, X509Certificate};

use lorastack_core::Result;
use lorastack_core::errors::canonical;

use crate::address::Address;
use crate::errors::{ERR_DIAL, ERR_INVALID_ADDRESS, ERR_NO_TRUST};

/// Resolves the trust anchor of a server address.
#[async_trait]
pub trait TrustResolver: Send + Sync {
    /// DER of the certificate to trust for `address`. An empty address
    /// resolves to the statically configured certificate, if any.
    async fn resolve(&self, address: &str) -> Result<Vec<u8>>;
}

/// Failures while loading certificates at startup.
#[derive(Debug, thiserror::Error)]
pub enum TrustError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error("Invalid PEM in {path}: {reason}")]
    Pem { path: String, reason: String },

    #[error("No certificate in {0}")]
    Empty(String),

    #[error("TLS configuration error: {0}")]
    Tls(#[from] rustls::Error),
}

/// Root certificates trusted when dialing servers.
#[derive(Debug, Clone, Default)]
pub struct TrustPool {
    roots: Vec<CertificateDer<'static>>,
}

impl TrustPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// The roots of the operating system. Unreadable system certificates
    /// are skipped.
    pub fn native() -> Self {
        let loaded = rustls_native_certs::load_native_certs();
        for err in &loaded.errors {
            warn!(error = %err, "Skipping native certificate");
        }
        debug!(count = loaded.certs.len(), "Loaded native root certificates");
        Self { roots: loaded.certs }
    }

    pub fn add_der(&mut self, der: impl Into<Vec<u8>>) {
        self.roots.push(CertificateDer::from(der.into()));
    }

    /// Add every certificate of a PEM file.
    pub fn add_pem_file(&mut self, path: &Path) -> std::result::Result<usize, TrustError> {
        let certs = read_pem_certificates(path)?;
        let count = certs.len();
        self.roots.extend(certs.into_iter().map(CertificateDer::from));
        Ok(count)
    }

    pub fn len(&self) -> usize {
        self.roots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.roots.is_empty()
    }

    fn root_store(&self) -> RootCertStore {
        let mut store = RootCertStore::empty();
        let (added, ignored) = store.add_parsable_certificates(self.roots.iter().cloned());
        if ignored > 0 {
            warn!(added, ignored, "Ignored unparsable root certificates");
        }
        store
    }
}

/// DER of every `CERTIFICATE` block of a PEM file.
pub fn read_pem_certificates(path: &Path) -> std::result::Result<Vec<Vec<u8>>, TrustError> {
    let display = path.display().to_string();
    let data = std::fs::read(path).map_err(|source| TrustError::Read {
        path: display.clone(),
        source,
    })?;
    let mut certs = Vec::new();
    for pem in Pem::iter_from_buffer(&data) {
        let pem = pem.map_err(|e| TrustError::Pem {
            path: display.clone(),
            reason: e.to_string(),
        })?;
        if pem.label == "CERTIFICATE" {
            certs.push(pem.contents);
        }
    }
    if certs.is_empty() {
        return Err(TrustError::Empty(display));
    }
    Ok(certs)
}

/// Resolves trust by dialing the server with TLS.
pub struct TlsTrustResolver {
    connector: TlsConnector,
    // Raw subject of each root, to find the anchor of a verified chain.
    anchors: Vec<(Vec<u8>, Vec<u8>)>,
    static_trust: Option<Vec<u8>>,
    dial_timeout: Duration,
}

impl std::fmt::Debug for TlsTrustResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsTrustResolver")
            .field("anchors", &self.anchors.len())
            .field("static_trust", &self.static_trust.is_some())
            .field("dial_timeout", &self.dial_timeout)
            .finish()
    }
}

impl TlsTrustResolver {
    pub fn new(
        pool: &TrustPool,
        static_trust: Option<Vec<u8>>,
        dial_timeout: Duration,
    ) -> std::result::Result<Self, TrustError> {
        let config = ClientConfig::builder_with_provider(Arc::new(
            rustls::crypto::ring::default_provider(),
        ))
        .with_safe_default_protocol_versions()?
        .with_root_certificates(pool.root_store())
        .with_no_client_auth();
        let anchors = pool
            .roots
            .iter()
            .filter_map(|der| {
                X509Certificate::from_der(der.as_ref())
                    .ok()
                    .map(|(_, cert)| (cert.subject().as_raw().to_vec(), der.to_vec()))
            })
            .collect();
        Ok(Self {
            connector: TlsConnector::from(Arc::new(config)),
            anchors,
            static_trust,
            dial_timeout,
        })
    }

    /// The root that issued the last certificate the server presented, or
    /// that certificate itself when it is a trusted root.
    fn anchor_of(&self, chain: &[CertificateDer<'static>]) -> Option<Vec<u8>> {
        let last = chain.last()?;
        if self.anchors.iter().any(|(_, der)| der.as_slice() == last.as_ref()) {
            return Some(last.to_vec());
        }
        let (_, cert) = X509Certificate::from_der(last.as_ref()).ok()?;
        let issuer = cert.issuer().as_raw();
        self.anchors
            .iter()
            .find(|(subject, _)| subject.as_slice() == issuer)
            .map(|(_, der)| der.clone())
            .or_else(|| Some(last.to_vec()))
    }

    async fn dial(&self, address: &Address) -> Result<Vec<CertificateDer<'static>>> {
        let target = address.to_string();
        let authority = address.authority(443);
        let server_name = ServerName::try_from(address.host.clone())
            .map_err(|_| ERR_INVALID_ADDRESS.with_attribute("address", target.as_str()))?;

        // One budget covers connect and handshake.
        let handshake = async {
            let stream = TcpStream::connect(&authority).await?;
            self.connector.connect(server_name, stream).await
        };
        let tls = timeout(self.dial_timeout, handshake)
            .await
            .map_err(|_| canonical::deadline_exceeded().with_attribute("address", target.as_str()))?
            .map_err(|e| ERR_DIAL.with_attribute("address", target.as_str()).with_cause(e))?;

        let (_, conn) = tls.get_ref();
        Ok(conn.peer_certificates().map(<[_]>::to_vec).unwrap_or_default())
    }
}

#[async_trait]
impl TrustResolver for TlsTrustResolver {
    #[instrument(skip(self))]
    async fn resolve(&self, address: &str) -> Result<Vec<u8>> {
        if address.trim().is_empty() {
            return self
                .static_trust
                .clone()
                .ok_or_else(|| ERR_NO_TRUST.with_attribute("address", address));
        }
        let parsed = Address::parse(address, "https")?;
        let chain = self.dial(&parsed).await?;
        let anchor = self
            .anchor_of(&chain)
            .ok_or_else(|| ERR_NO_TRUST.with_attribute("address", address))?;
        debug!(address, chain_len = chain.len(), "Resolved trust");
        Ok(anchor)
    }
}

/// Always resolves to the same certificate, or to `no_trust`.
#[derive(Debug, Clone, Default)]
pub struct StaticTrust(pub Option<Vec<u8>>);

#[async_trait]
impl TrustResolver for StaticTrust {
    async fn resolve(&self, address: &str) -> Result<Vec<u8>> {
        self.0
            .clone()
            .ok_or_else(|| ERR_NO_TRUST.with_attribute("address", address))
    }
}
