//! TLS credential resolution.
//!
//! Turns a [`TlsConfig`] into a [`TlsContext`]: a rustls client configuration
//! trusting the system roots plus an optional CA bundle, optionally carrying
//! a client identity, and optionally overriding the server name used for
//! verification.
//!
//! # How It Works
//!
//! 1. Loads the client certificate chain and key when both paths are set
//! 2. Seeds the trust store from the platform's native certificates
//! 3. Adds every certificate in `ca_file` to the trust store
//! 4. Installs a verifier that accepts any certificate if
//!    `insecure_skip_verify` is set
//! 5. Advertises `h2` through ALPN, as gRPC requires
//!
//! Material is read from disk on every call; nothing is cached.

use std::fs;
use std::io;
use std::path::Path;
use std::sync::Arc;

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{CryptoProvider, verify_tls12_signature, verify_tls13_signature};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};

use crate::config::TlsConfig;
use crate::error::TlsError;

/// ALPN protocol identifier for HTTP/2.
const ALPN_H2: &[u8] = b"h2";

type Identity = (Vec<CertificateDer<'static>>, PrivateKeyDer<'static>);

/// Resolved TLS client credentials for a single dial attempt.
#[derive(Clone, Debug)]
pub struct TlsContext {
    config: Arc<ClientConfig>,
    roots: Arc<RootCertStore>,
    server_name: Option<ServerName<'static>>,
    verify_server: bool,
    client_identity: bool,
}

impl TlsContext {
    /// The rustls client configuration used for the handshake.
    #[must_use]
    pub fn client_config(&self) -> Arc<ClientConfig> {
        Arc::clone(&self.config)
    }

    /// The trust store: system roots plus the configured CA bundle.
    ///
    /// Still populated when verification is disabled, though it is not consulted.
    #[must_use]
    pub fn roots(&self) -> &RootCertStore {
        &self.roots
    }

    /// The server name override, if one was configured.
    #[must_use]
    pub fn server_name(&self) -> Option<&ServerName<'static>> {
        self.server_name.as_ref()
    }

    /// Whether the server certificate is verified.
    #[must_use]
    pub fn verifies_server(&self) -> bool {
        self.verify_server
    }

    /// Whether a client certificate is presented to the server.
    #[must_use]
    pub fn has_client_identity(&self) -> bool {
        self.client_identity
    }
}

impl TlsConfig {
    /// Builds TLS client credentials from these settings.
    ///
    /// # Errors
    ///
    /// Returns [`TlsError::NotEnabled`] if `enabled` is false. Callers should
    /// check `enabled` themselves; this is a precondition, not a negative
    /// result. Otherwise fails if the key pair or CA bundle cannot be loaded,
    /// if only one of `cert_file` and `key_file` is set, or if the server
    /// name override is invalid.
    pub fn generate(&self) -> Result<TlsContext, TlsError> {
        if !self.enabled {
            return Err(TlsError::NotEnabled);
        }

        self.resolve()
    }

    /// Builds the credentials without checking `enabled`.
    pub(crate) fn resolve(&self) -> Result<TlsContext, TlsError> {
        let identity = self.load_identity()?;
        let server_name = self.server_name_override()?;

        let mut roots = system_roots();
        if !self.ca_file.is_empty() {
            add_ca_file(&mut roots, Path::new(&self.ca_file))?;
        }

        let roots = Arc::new(roots);
        let provider = Arc::new(rustls::crypto::ring::default_provider());
        let builder = ClientConfig::builder_with_provider(Arc::clone(&provider))
            .with_safe_default_protocol_versions()
            .map_err(TlsError::ClientConfig)?;

        let builder = if self.insecure_skip_verify {
            tracing::warn!("TLS server certificate verification is disabled");
            builder
                .dangerous()
                .with_custom_certificate_verifier(Arc::new(SkipServerVerification(provider)))
        } else {
            builder.with_root_certificates(Arc::clone(&roots))
        };

        let client_identity = identity.is_some();
        let mut config = match identity {
            Some((chain, key)) => builder
                .with_client_auth_cert(chain, key)
                .map_err(TlsError::ClientConfig)?,
            None => builder.with_no_client_auth(),
        };

        config.alpn_protocols = vec![ALPN_H2.to_vec()];

        tracing::debug!(
            "resolved TLS config: {} trusted roots, client identity: {client_identity}, server name: {server_name:?}",
            roots.len()
        );

        Ok(TlsContext {
            config: Arc::new(config),
            roots,
            server_name,
            verify_server: !self.insecure_skip_verify,
            client_identity,
        })
    }

    fn load_identity(&self) -> Result<Option<Identity>, TlsError> {
        match (self.cert_file.is_empty(), self.key_file.is_empty()) {
            (true, true) => Ok(None),
            (false, false) => {
                let cert_path = Path::new(&self.cert_file);
                let chain = read_certificates(cert_path).map_err(|source| TlsError::KeyPair {
                    path: cert_path.to_path_buf(),
                    source,
                })?;

                let key_path = Path::new(&self.key_file);
                let key = read_private_key(key_path).map_err(|source| TlsError::KeyPair {
                    path: key_path.to_path_buf(),
                    source,
                })?;

                Ok(Some((chain, key)))
            }

            _ => Err(TlsError::IncompleteKeyPair {
                cert_file: self.cert_file.clone(),
                key_file: self.key_file.clone(),
            }),
        }
    }

    fn server_name_override(&self) -> Result<Option<ServerName<'static>>, TlsError> {
        if self.server_name.is_empty() {
            return Ok(None);
        }

        ServerName::try_from(self.server_name.clone())
            .map(Some)
            .map_err(|source| TlsError::ServerName {
                name: self.server_name.clone(),
                source,
            })
    }
}

/// Loads the platform's trusted roots, skipping anything that fails to load.
fn system_roots() -> RootCertStore {
    let native = rustls_native_certs::load_native_certs();
    for e in &native.errors {
        tracing::warn!("failed to load system certificates: {e}");
    }

    let mut roots = RootCertStore::empty();
    let (added, ignored) = roots.add_parsable_certificates(native.certs);
    tracing::debug!("loaded {added} system root certificates ({ignored} ignored)");

    roots
}

fn add_ca_file(roots: &mut RootCertStore, path: &Path) -> Result<(), TlsError> {
    let certs = read_certificates(path).map_err(|source| TlsError::CaFile {
        path: path.to_path_buf(),
        source,
    })?;

    for cert in certs {
        roots.add(cert).map_err(|source| TlsError::CaCertificate {
            path: path.to_path_buf(),
            source,
        })?;
    }

    Ok(())
}

fn read_certificates(path: &Path) -> io::Result<Vec<CertificateDer<'static>>> {
    let pem = fs::read(path)?;
    let certs = rustls_pemfile::certs(&mut pem.as_slice()).collect::<io::Result<Vec<_>>>()?;

    if certs.is_empty() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "no PEM certificates found",
        ));
    }

    Ok(certs)
}

fn read_private_key(path: &Path) -> io::Result<PrivateKeyDer<'static>> {
    let pem = fs::read(path)?;
    rustls_pemfile::private_key(&mut pem.as_slice())?
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "no PEM private key found"))
}

/// Accepts any server certificate while still checking handshake signatures.
#[derive(Debug)]
struct SkipServerVerification(Arc<CryptoProvider>);

impl ServerCertVerifier for SkipServerVerification {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls12_signature(
            message,
            cert,
            dss,
            &self.0.signature_verification_algorithms,
        )
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(
            message,
            cert,
            dss,
            &self.0.signature_verification_algorithms,
        )
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.0.signature_verification_algorithms.supported_schemes()
    }
}
