//! Error types for configuration, TLS resolution and dialing.

use std::io;
use std::path::PathBuf;
use std::time::Duration;

use rustls::pki_types::InvalidDnsNameError;

/// Errors produced while resolving TLS material.
///
/// Every variant names the stage that failed so a single message is enough
/// to tell a bad key pair from a bad CA bundle.
#[derive(Debug, thiserror::Error)]
pub enum TlsError {
    /// [`TlsConfig::generate`](crate::TlsConfig::generate) was called with TLS disabled.
    #[error("TLS is not enabled")]
    NotEnabled,

    /// Only one of `cert_file` and `key_file` was supplied.
    #[error(
        "client certificate and key must be set together (cert_file: {cert_file:?}, key_file: {key_file:?})"
    )]
    IncompleteKeyPair {
        /// The configured certificate path, possibly empty.
        cert_file: String,
        /// The configured key path, possibly empty.
        key_file: String,
    },

    /// The client certificate chain or private key could not be loaded.
    #[error("failed to load client key pair from {path}: {source}")]
    KeyPair {
        /// The file that failed to load.
        path: PathBuf,
        /// The underlying read or parse failure.
        #[source]
        source: io::Error,
    },

    /// The CA bundle could not be read or parsed.
    #[error("failed to load CA certificates from {path}: {source}")]
    CaFile {
        /// The CA bundle path.
        path: PathBuf,
        /// The underlying read or parse failure.
        #[source]
        source: io::Error,
    },

    /// A certificate from the CA bundle was rejected by the trust store.
    #[error("invalid CA certificate in {path}: {source}")]
    CaCertificate {
        /// The CA bundle path.
        path: PathBuf,
        /// The rejection reason.
        #[source]
        source: rustls::Error,
    },

    /// The rustls client configuration could not be assembled.
    #[error("failed to build TLS client config: {0}")]
    ClientConfig(#[source] rustls::Error),

    /// The server name override is neither a DNS name nor an IP address.
    #[error("invalid TLS server name {name:?}: {source}")]
    ServerName {
        /// The configured override.
        name: String,
        /// The parse failure.
        #[source]
        source: InvalidDnsNameError,
    },
}

/// Crate-level error returned by option assembly and [`dial`](crate::ConnectionConfig::dial).
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The configuration could not be loaded or deserialized.
    #[error("failed to load connection config: {0}")]
    Config(#[from] config::ConfigError),

    /// TLS was requested but the credentials could not be generated.
    #[error("failed to generate TLS config: {0}")]
    Tls(#[from] TlsError),

    /// The dial target is not a valid URI.
    #[error("invalid dial target {target:?}: {source}")]
    InvalidTarget {
        /// The configured target.
        target: String,
        /// The parse failure.
        #[source]
        source: http::uri::InvalidUri,
    },

    /// The target carries a scheme that contradicts the transport credentials.
    #[error("dial target {target:?} uses scheme {scheme:?} but credentials require {expected:?}")]
    SchemeMismatch {
        /// The configured target.
        target: String,
        /// The scheme found in the target.
        scheme: String,
        /// The scheme implied by the credentials.
        expected: &'static str,
    },

    /// The authority override is not a valid URI authority.
    #[error("invalid authority {authority:?}: {source}")]
    InvalidAuthority {
        /// The configured authority.
        authority: String,
        /// The parse failure.
        #[source]
        source: http::uri::InvalidUri,
    },

    /// The user agent is not a valid header value.
    #[error("invalid user agent {user_agent:?}: {source}")]
    InvalidUserAgent {
        /// The configured user agent.
        user_agent: String,
        /// The rejection from the transport.
        #[source]
        source: tonic::transport::Error,
    },

    /// The connection was not established within the dial timeout.
    #[error("dial to {target} timed out after {timeout:?}")]
    Timeout {
        /// The endpoint being dialed.
        target: String,
        /// The configured dial timeout.
        timeout: Duration,
    },

    /// The caller cancelled the dial before it completed.
    #[error("dial to {target} was cancelled")]
    Cancelled {
        /// The endpoint being dialed.
        target: String,
    },

    /// The transport failed to connect.
    #[error("failed to connect to {target}: {source}")]
    Connect {
        /// The endpoint being dialed.
        target: String,
        /// The transport error.
        #[source]
        source: tonic::transport::Error,
    },
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;
