//! Dial option assembly and connection establishment.
//!
//! [`ConnectionConfig::options`] translates a configuration into an ordered
//! list of [`DialOption`]s. [`ConnectionConfig::dial`] appends caller options,
//! folds the list (later options win), builds a tonic [`Endpoint`] and
//! connects, bounded by the dial timeout and an optional cancellation token.
//!
//! # Example
//!
//! ```ignore
//! use std::time::Duration;
//! use tonic_dial::{ConnectionConfig, DialOption, TlsConfig};
//!
//! let config = ConnectionConfig::new("greeter.internal:50051")
//!     .tls(TlsConfig::enabled().ca_file("/etc/ssl/internal-ca.pem"));
//!
//! let channel = config
//!     .dial([DialOption::RequestTimeout(Duration::from_secs(10))])
//!     .await?;
//!
//! // let client = GreeterClient::new(channel);
//! ```

use std::future::Future;
use std::time::Duration;

use http::Uri;
use tokio_util::sync::CancellationToken;
use tonic::transport::{Channel, Endpoint};

use crate::config::ConnectionConfig;
use crate::connector::TlsTransport;
use crate::error::{Error, Result};
use crate::tls::TlsContext;

/// How a connection authenticates and encrypts itself.
#[derive(Clone, Debug)]
pub enum TransportCredentials {
    /// Plaintext HTTP/2 with no authentication.
    Insecure,
    /// TLS with the resolved credentials.
    Tls(TlsContext),
}

impl TransportCredentials {
    /// Returns `true` for TLS credentials.
    #[must_use]
    pub fn is_tls(&self) -> bool {
        matches!(self, Self::Tls(_))
    }

    /// The URI scheme these credentials require.
    #[must_use]
    pub fn scheme(&self) -> &'static str {
        match self {
            Self::Insecure => "http",
            Self::Tls(_) => "https",
        }
    }
}

/// A single connection option.
///
/// Options are independent; when one kind appears more than once the last
/// occurrence wins.
#[derive(Clone, Debug)]
pub enum DialOption {
    /// Authority sent to the server in place of the target address.
    Authority(String),
    /// Transport credentials for the connection.
    Credentials(TransportCredentials),
    /// Wait for the connection to be established before returning.
    Block,
    /// Return immediately and connect on first use.
    NonBlocking,
    /// `User-Agent` header sent with every request.
    UserAgent(String),
    /// Timeout for opening the TCP connection.
    ConnectTimeout(Duration),
    /// Set `TCP_NODELAY` on the connection (enabled by default).
    TcpNodelay(bool),
    /// TCP keep-alive interval; `None` disables keep-alive.
    TcpKeepalive(Option<Duration>),
    /// Timeout applied to each request on the channel.
    RequestTimeout(Duration),
    /// Interval between HTTP/2 keep-alive pings.
    Http2KeepAliveInterval(Duration),
    /// Time to wait for a keep-alive ping acknowledgement.
    KeepAliveTimeout(Duration),
    /// Send keep-alive pings even when no requests are in flight.
    KeepAliveWhileIdle(bool),
}

/// The folded result of an option list.
#[derive(Clone, Debug, Default)]
struct DialPlan {
    authority: Option<String>,
    credentials: Option<TransportCredentials>,
    block: bool,
    user_agent: Option<String>,
    connect_timeout: Option<Duration>,
    tcp_nodelay: Option<bool>,
    tcp_keepalive: Option<Duration>,
    request_timeout: Option<Duration>,
    http2_keep_alive_interval: Option<Duration>,
    keep_alive_timeout: Option<Duration>,
    keep_alive_while_idle: Option<bool>,
}

impl DialPlan {
    fn from_options(options: impl IntoIterator<Item = DialOption>) -> Self {
        let mut plan = Self::default();
        for option in options {
            match option {
                DialOption::Authority(authority) => plan.authority = Some(authority),
                DialOption::Credentials(credentials) => plan.credentials = Some(credentials),
                DialOption::Block => plan.block = true,
                DialOption::NonBlocking => plan.block = false,
                DialOption::UserAgent(user_agent) => plan.user_agent = Some(user_agent),
                DialOption::ConnectTimeout(timeout) => plan.connect_timeout = Some(timeout),
                DialOption::TcpNodelay(enabled) => plan.tcp_nodelay = Some(enabled),
                DialOption::TcpKeepalive(interval) => plan.tcp_keepalive = interval,
                DialOption::RequestTimeout(timeout) => plan.request_timeout = Some(timeout),
                DialOption::Http2KeepAliveInterval(interval) => {
                    plan.http2_keep_alive_interval = Some(interval);
                }
                DialOption::KeepAliveTimeout(timeout) => plan.keep_alive_timeout = Some(timeout),
                DialOption::KeepAliveWhileIdle(enabled) => {
                    plan.keep_alive_while_idle = Some(enabled);
                }
            }
        }

        plan
    }

    fn scheme(&self) -> &'static str {
        self.credentials
            .as_ref()
            .map_or("http", TransportCredentials::scheme)
    }

    /// Builds the tonic endpoint for `target`.
    fn endpoint(&self, target: &str) -> Result<Endpoint> {
        let scheme = self.scheme();
        let mut endpoint = Endpoint::from(target_uri(target, scheme)?);

        if let Some(authority) = &self.authority {
            let origin = format!("{scheme}://{authority}")
                .parse::<Uri>()
                .map_err(|source| Error::InvalidAuthority {
                    authority: authority.clone(),
                    source,
                })?;

            endpoint = endpoint.origin(origin);
        }

        if let Some(user_agent) = &self.user_agent {
            endpoint = endpoint.user_agent(user_agent.clone()).map_err(|source| {
                Error::InvalidUserAgent {
                    user_agent: user_agent.clone(),
                    source,
                }
            })?;
        }

        if let Some(timeout) = self.connect_timeout {
            endpoint = endpoint.connect_timeout(timeout);
        }

        if let Some(enabled) = self.tcp_nodelay {
            endpoint = endpoint.tcp_nodelay(enabled);
        }

        endpoint = endpoint.tcp_keepalive(self.tcp_keepalive);

        if let Some(timeout) = self.request_timeout {
            endpoint = endpoint.timeout(timeout);
        }

        if let Some(interval) = self.http2_keep_alive_interval {
            endpoint = endpoint.http2_keep_alive_interval(interval);
        }

        if let Some(timeout) = self.keep_alive_timeout {
            endpoint = endpoint.keep_alive_timeout(timeout);
        }

        if let Some(enabled) = self.keep_alive_while_idle {
            endpoint = endpoint.keep_alive_while_idle(enabled);
        }

        Ok(endpoint)
    }

    /// Opens the channel, eagerly when blocking and lazily otherwise.
    ///
    /// The TLS transport opens its own sockets, so the TCP settings are
    /// handed to it as well as to the endpoint.
    async fn connect(
        &self,
        endpoint: Endpoint,
    ) -> std::result::Result<Channel, tonic::transport::Error> {
        match &self.credentials {
            Some(TransportCredentials::Tls(ctx)) => {
                let transport = TlsTransport::new(ctx)
                    .connect_timeout(self.connect_timeout)
                    .nodelay(self.tcp_nodelay.unwrap_or(true))
                    .keepalive(self.tcp_keepalive);

                if self.block {
                    endpoint.connect_with_connector(transport).await
                } else {
                    Ok(endpoint.connect_with_connector_lazy(transport))
                }
            }

            _ if self.block => endpoint.connect().await,
            _ => Ok(endpoint.connect_lazy()),
        }
    }
}

/// Parses `target`, adding `scheme` when it has none.
fn target_uri(target: &str, scheme: &'static str) -> Result<Uri> {
    let uri = if target.contains("://") {
        target.parse::<Uri>()
    } else {
        format!("{scheme}://{target}").parse::<Uri>()
    }
    .map_err(|source| Error::InvalidTarget {
        target: target.to_string(),
        source,
    })?;

    let found = uri.scheme_str().unwrap_or_default();
    if !found.eq_ignore_ascii_case(scheme) {
        return Err(Error::SchemeMismatch {
            target: target.to_string(),
            scheme: found.to_string(),
            expected: scheme,
        });
    }

    Ok(uri)
}

/// Runs `connect` until it completes, `timeout` elapses or `cancel` fires.
///
/// A zero `timeout` imposes no deadline.
async fn bounded<T, F>(
    connect: F,
    timeout: Duration,
    cancel: &CancellationToken,
    target: &str,
) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    let deadline = async {
        if timeout.is_zero() {
            std::future::pending::<()>().await;
        } else {
            tokio::time::sleep(timeout).await;
        }
    };

    tokio::select! {
        biased;

        () = cancel.cancelled() => Err(Error::Cancelled {
            target: target.to_string(),
        }),

        () = deadline => Err(Error::Timeout {
            target: target.to_string(),
            timeout,
        }),

        result = connect => result,
    }
}

impl ConnectionConfig {
    /// Returns the dial options described by this configuration.
    ///
    /// In order: the authority override (if set), the transport credentials
    /// (TLS if enabled, explicitly insecure otherwise) and the blocking flag
    /// (if `block`). TLS material is loaded from disk on every call.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Tls`] if TLS is enabled and the credentials cannot be
    /// generated. No partial option list is returned.
    pub fn options(&self) -> Result<Vec<DialOption>> {
        let mut options = Vec::new();

        if !self.authority.is_empty() {
            options.push(DialOption::Authority(self.authority.clone()));
        }

        let credentials = if self.tls.enabled {
            TransportCredentials::Tls(self.tls.resolve()?)
        } else {
            TransportCredentials::Insecure
        };

        options.push(DialOption::Credentials(credentials));

        if self.block {
            options.push(DialOption::Block);
        }

        tracing::debug!("assembled {} dial options for {}", options.len(), self.target);
        Ok(options)
    }

    /// Connects to the target.
    ///
    /// `extra` options are applied after the configured ones and override
    /// them. See [`ConnectionConfig::dial_with_cancellation`].
    ///
    /// # Errors
    ///
    /// Returns an error if the options cannot be assembled, the target is
    /// invalid, the dial timeout elapses or the transport fails to connect.
    pub async fn dial(&self, extra: impl IntoIterator<Item = DialOption>) -> Result<Channel> {
        self.dial_with_cancellation(&CancellationToken::new(), extra)
            .await
    }

    /// Connects to the target, aborting promptly when `cancel` fires.
    ///
    /// The dial timeout bounds connection establishment only, not the
    /// lifetime of the returned channel. Non-blocking dials return without
    /// waiting for the connection. There are no retries.
    ///
    /// # Errors
    ///
    /// As for [`ConnectionConfig::dial`], plus [`Error::Cancelled`] when the
    /// token fires first.
    pub async fn dial_with_cancellation(
        &self,
        cancel: &CancellationToken,
        extra: impl IntoIterator<Item = DialOption>,
    ) -> Result<Channel> {
        let mut options = self.options()?;
        options.extend(extra);

        let plan = DialPlan::from_options(options);
        let endpoint = plan.endpoint(&self.target)?;
        let target = self.target.clone();

        tracing::debug!(
            "dialing {target} (block: {}, timeout: {:?})",
            plan.block,
            self.dial_timeout
        );

        let connect = async {
            plan.connect(endpoint)
                .await
                .map_err(|source| Error::Connect {
                    target: target.clone(),
                    source,
                })
        };

        match bounded(connect, self.dial_timeout, cancel, &target).await {
            Ok(channel) => {
                tracing::info!("connected to {target}");
                Ok(channel)
            }

            Err(e) => {
                tracing::warn!("dial failed: {e}");
                Err(e)
            }
        }
    }
}
