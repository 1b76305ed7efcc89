//! Declarative connection configuration.
//!
//! [`ConnectionConfig`] is the single input to option assembly and dialing.
//! It is usually deserialized once at startup, either directly through serde
//! or with [`ConnectionConfig::load`], which layers environment variables over
//! an optional configuration file.
//!
//! # Example
//!
//! ```toml
//! target = "localhost:50051"
//! authority = "greeter.internal"
//! block = true
//! dial_timeout = "5s"
//!
//! [tls]
//! enabled = true
//! ca_file = "/etc/ssl/internal-ca.pem"
//! server_name = "greeter.internal"
//! ```

use std::path::Path;
use std::time::Duration;

use config::{Environment, File};
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Dial timeout applied when none is configured.
pub const DEFAULT_DIAL_TIMEOUT: Duration = Duration::from_secs(5);

/// Connection settings for a single gRPC target.
///
/// Missing fields take the values of [`ConnectionConfig::default`], which is
/// the only place defaults are defined.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConnectionConfig {
    /// Address of the gRPC server, such as `localhost:50051`.
    ///
    /// A scheme may be given explicitly; otherwise it follows the transport
    /// credentials (`http` for plaintext, `https` for TLS).
    pub target: String,

    /// Authority presented to the server instead of the target address.
    /// Empty means no override.
    pub authority: String,

    /// TLS settings for the connection.
    pub tls: TlsConfig,

    /// Wait for the connection to be established before `dial` returns.
    pub block: bool,

    /// Upper bound on connection establishment. Zero disables the bound.
    #[serde(with = "humantime_serde")]
    pub dial_timeout: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            target: String::new(),
            authority: String::new(),
            tls: TlsConfig::default(),
            block: true,
            dial_timeout: DEFAULT_DIAL_TIMEOUT,
        }
    }
}

impl ConnectionConfig {
    /// Creates a configuration for `target` with default settings.
    #[must_use]
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            ..Self::default()
        }
    }

    /// Sets the authority override.
    #[must_use]
    pub fn authority(mut self, authority: impl Into<String>) -> Self {
        self.authority = authority.into();
        self
    }

    /// Sets the TLS settings.
    #[must_use]
    pub fn tls(mut self, tls: TlsConfig) -> Self {
        self.tls = tls;
        self
    }

    /// Sets whether `dial` waits for the connection to be established.
    #[must_use]
    pub fn block(mut self, block: bool) -> Self {
        self.block = block;
        self
    }

    /// Sets the dial timeout. [`Duration::ZERO`] disables it.
    #[must_use]
    pub fn dial_timeout(mut self, timeout: Duration) -> Self {
        self.dial_timeout = timeout;
        self
    }

    /// Loads a configuration from an optional file and the environment.
    ///
    /// The file format is inferred from its extension (TOML or JSON).
    /// Environment variables named `{env_prefix}_{KEY}` override file values;
    /// nested keys use `__`, e.g. `GRPC_TLS__CA_FILE`. Other variables that
    /// share the prefix, such as `GRPC_TRACE`, are ignored.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`](crate::Error::Config) if the file cannot be
    /// read or a value has the wrong type.
    pub fn load(path: Option<&Path>, env_prefix: &str) -> Result<Self> {
        Self::load_from(path, env_prefix, std::env::vars())
    }

    fn load_from(
        path: Option<&Path>,
        env_prefix: &str,
        vars: impl IntoIterator<Item = (String, String)>,
    ) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::from(path));
        }

        let prefix = format!("{env_prefix}_").to_lowercase();
        let vars: config::Map<String, String> = vars
            .into_iter()
            .filter(|(key, _)| {
                let Some(name) = key.to_lowercase().strip_prefix(&prefix).map(str::to_owned)
                else {
                    return false;
                };

                let known = ENV_KEYS.contains(&name.as_str());
                if !known {
                    tracing::debug!("ignoring environment variable {key}");
                }
                known
            })
            .collect();

        let config: Self = builder
            .add_source(
                Environment::with_prefix(env_prefix)
                    .prefix_separator("_")
                    .separator("__")
                    .source(Some(vars)),
            )
            .build()?
            .try_deserialize()?;

        tracing::debug!("loaded connection config: {config:?}");
        Ok(config)
    }
}

// Keys accepted from the environment, lowercased, with `__` for nesting.
const ENV_KEYS: &[&str] = &[
    "target",
    "authority",
    "block",
    "dial_timeout",
    "tls__enabled",
    "tls__insecure_skip_verify",
    "tls__cert_file",
    "tls__key_file",
    "tls__ca_file",
    "tls__server_name",
];

/// TLS settings for a connection.
///
/// Paths and names are plain strings; an empty string means "not set".
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TlsConfig {
    /// Use TLS for the connection.
    pub enabled: bool,

    /// Accept any server certificate. Only for testing.
    pub insecure_skip_verify: bool,

    /// Path to the client certificate chain (PEM). Requires `key_file`.
    pub cert_file: String,

    /// Path to the client private key (PEM). Requires `cert_file`.
    pub key_file: String,

    /// Path to additional trusted CA certificates (PEM).
    /// These are added to the system roots, not used instead of them.
    pub ca_file: String,

    /// Name used to verify the server certificate, in place of the target host.
    pub server_name: String,
}

impl TlsConfig {
    /// Returns TLS settings with TLS enabled and everything else unset.
    #[must_use]
    pub fn enabled() -> Self {
        Self {
            enabled: true,
            ..Self::default()
        }
    }

    /// Sets whether server certificate verification is skipped.
    #[must_use]
    pub fn insecure_skip_verify(mut self, skip: bool) -> Self {
        self.insecure_skip_verify = skip;
        self
    }

    /// Sets the client certificate and key paths.
    #[must_use]
    pub fn client_identity(
        mut self,
        cert_file: impl Into<String>,
        key_file: impl Into<String>,
    ) -> Self {
        self.cert_file = cert_file.into();
        self.key_file = key_file.into();
        self
    }

    /// Sets the CA bundle path.
    #[must_use]
    pub fn ca_file(mut self, ca_file: impl Into<String>) -> Self {
        self.ca_file = ca_file.into();
        self
    }

    /// Sets the server name override.
    #[must_use]
    pub fn server_name(mut self, server_name: impl Into<String>) -> Self {
        self.server_name = server_name.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn defaults_block_with_five_second_timeout() {
        let config = ConnectionConfig::default();

        assert!(config.target.is_empty());
        assert!(config.authority.is_empty());
        assert!(config.block);
        assert_eq!(config.dial_timeout, Duration::from_secs(5));
        assert_eq!(config.tls, TlsConfig::default());
        assert!(!config.tls.enabled);
    }

    #[test]
    fn new_keeps_defaults() {
        let config = ConnectionConfig::new("localhost:50051");

        assert_eq!(config.target, "localhost:50051");
        assert!(config.block);
        assert_eq!(config.dial_timeout, DEFAULT_DIAL_TIMEOUT);
    }

    #[test]
    fn builder_setters() {
        let config = ConnectionConfig::new("10.0.0.1:443")
            .authority("api.internal")
            .block(false)
            .dial_timeout(Duration::ZERO)
            .tls(
                TlsConfig::enabled()
                    .insecure_skip_verify(true)
                    .client_identity("client.pem", "client.key")
                    .ca_file("ca.pem")
                    .server_name("api.internal"),
            );

        assert_eq!(config.authority, "api.internal");
        assert!(!config.block);
        assert_eq!(config.dial_timeout, Duration::ZERO);
        assert!(config.tls.enabled);
        assert!(config.tls.insecure_skip_verify);
        assert_eq!(config.tls.cert_file, "client.pem");
        assert_eq!(config.tls.key_file, "client.key");
        assert_eq!(config.tls.ca_file, "ca.pem");
        assert_eq!(config.tls.server_name, "api.internal");
    }

    #[test]
    fn deserialize_fills_missing_fields_with_defaults() {
        let config: ConnectionConfig =
            serde_json::from_str(r#"{"target": "localhost:50051"}"#).unwrap();

        assert_eq!(config, ConnectionConfig::new("localhost:50051"));
    }

    #[test]
    fn deserialize_full_document() {
        let config: ConnectionConfig = serde_json::from_str(
            r#"{
                "target": "localhost:50051",
                "authority": "greeter",
                "block": false,
                "dial_timeout": "250ms",
                "tls": {
                    "enabled": true,
                    "insecure_skip_verify": true,
                    "cert_file": "c.pem",
                    "key_file": "k.pem",
                    "ca_file": "ca.pem",
                    "server_name": "greeter.local"
                }
            }"#,
        )
        .unwrap();

        assert_eq!(config.authority, "greeter");
        assert!(!config.block);
        assert_eq!(config.dial_timeout, Duration::from_millis(250));
        assert!(config.tls.enabled);
        assert!(config.tls.insecure_skip_verify);
        assert_eq!(config.tls.server_name, "greeter.local");
    }

    #[test]
    fn deserialize_rejects_unknown_fields() {
        let result: std::result::Result<ConnectionConfig, _> =
            serde_json::from_str(r#"{"target": "x", "retries": 3}"#);

        assert!(result.is_err());
    }

    #[test]
    fn serialize_uses_humantime_durations() {
        let json = serde_json::to_value(ConnectionConfig::default()).unwrap();
        assert_eq!(json["dial_timeout"], "5s");
        assert_eq!(json["block"], true);
    }

    #[test]
    fn load_from_toml_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
target = "localhost:50051"
dial_timeout = "2s"

[tls]
enabled = true
server_name = "greeter.local"
"#
        )
        .unwrap();

        let config = ConnectionConfig::load(Some(file.path()), "TONIC_DIAL_FILE_TEST").unwrap();

        assert_eq!(config.target, "localhost:50051");
        assert_eq!(config.dial_timeout, Duration::from_secs(2));
        assert!(config.block);
        assert!(config.tls.enabled);
        assert_eq!(config.tls.server_name, "greeter.local");
    }

    #[test]
    fn load_missing_file_fails() {
        let err = ConnectionConfig::load(
            Some(Path::new("/nonexistent/tonic-dial.toml")),
            "TONIC_DIAL_MISSING_TEST",
        )
        .unwrap_err();

        assert!(matches!(err, crate::Error::Config(_)));
    }

    #[test]
    fn load_without_sources_yields_defaults() {
        let config = ConnectionConfig::load(None, "TONIC_DIAL_EMPTY_TEST").unwrap();
        assert_eq!(config, ConnectionConfig::default());
    }

    fn env(vars: &[(&str, &str)]) -> Vec<(String, String)> {
        vars.iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    #[test]
    fn load_applies_environment_overrides() {
        let vars = env(&[
            ("APP_TARGET", "10.0.0.1:443"),
            ("APP_BLOCK", "false"),
            ("APP_DIAL_TIMEOUT", "2s"),
            ("APP_TLS__ENABLED", "true"),
            ("APP_TLS__SERVER_NAME", "greeter.local"),
        ]);

        let config = ConnectionConfig::load_from(None, "APP", vars).unwrap();

        assert_eq!(config.target, "10.0.0.1:443");
        assert!(!config.block);
        assert_eq!(config.dial_timeout, Duration::from_secs(2));
        assert!(config.tls.enabled);
        assert_eq!(config.tls.server_name, "greeter.local");
    }

    #[test]
    fn load_ignores_unrelated_prefixed_variables() {
        let vars = env(&[
            ("APP_TRACE", "all"),
            ("APP_VERBOSITY", "DEBUG"),
            ("APP_TLS__CIPHERS", "x"),
            ("OTHER_TARGET", "ignored:1"),
            ("APP_TARGET", "localhost:50051"),
        ]);

        let config = ConnectionConfig::load_from(None, "APP", vars).unwrap();

        assert_eq!(config, ConnectionConfig::new("localhost:50051"));
    }

    #[test]
    fn load_environment_overrides_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
target = "localhost:50051"
block = true

[tls]
ca_file = "/etc/ca.pem"
"#
        )
        .unwrap();

        let vars = env(&[("APP_BLOCK", "false"), ("APP_TLS__CA_FILE", "/tmp/ca.pem")]);
        let config = ConnectionConfig::load_from(Some(file.path()), "APP", vars).unwrap();

        assert_eq!(config.target, "localhost:50051");
        assert!(!config.block);
        assert_eq!(config.tls.ca_file, "/tmp/ca.pem");
    }

    #[test]
    fn load_still_rejects_unknown_file_keys() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "target = \"x\"\nretries = 3").unwrap();

        let err = ConnectionConfig::load_from(Some(file.path()), "APP", Vec::new()).unwrap_err();
        assert!(matches!(err, crate::Error::Config(_)));
    }
}
