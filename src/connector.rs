//! TLS transport for tonic channels.
//!
//! tonic is built without its own TLS support; this connector opens the TCP
//! connection and performs the rustls handshake with a resolved
//! [`TlsContext`], so the server-name override and custom verifiers apply.

use std::task::{Context, Poll};
use std::time::Duration;

use futures::future::BoxFuture;
use http::Uri;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::TokioIo;
use rustls::pki_types::ServerName;
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;
use tokio_rustls::client::TlsStream;
use tower::Service;

use crate::tls::TlsContext;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Connects over TCP, then wraps the stream in TLS.
#[derive(Clone)]
pub(crate) struct TlsTransport {
    http: HttpConnector,
    tls: TlsConnector,
    server_name: Option<ServerName<'static>>,
}

impl TlsTransport {
    pub(crate) fn new(context: &TlsContext) -> Self {
        let mut http = HttpConnector::new();
        http.enforce_http(false);
        http.set_nodelay(true);

        Self {
            http,
            tls: TlsConnector::from(context.client_config()),
            server_name: context.server_name().cloned(),
        }
    }

    pub(crate) fn connect_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.http.set_connect_timeout(timeout);
        self
    }

    pub(crate) fn nodelay(mut self, enabled: bool) -> Self {
        self.http.set_nodelay(enabled);
        self
    }

    pub(crate) fn keepalive(mut self, interval: Option<Duration>) -> Self {
        self.http.set_keepalive(interval);
        self
    }
}

impl Service<Uri> for TlsTransport {
    type Response = TokioIo<TlsStream<TcpStream>>;
    type Error = BoxError;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.http.poll_ready(cx).map_err(Into::into)
    }

    fn call(&mut self, uri: Uri) -> Self::Future {
        let server_name = match &self.server_name {
            Some(name) => Ok(name.clone()),
            None => server_name_from(&uri),
        };

        let connect = self.http.call(uri);
        let tls = self.tls.clone();

        Box::pin(async move {
            let server_name = server_name?;
            let tcp = connect.await?.into_inner();
            let stream = tls.connect(server_name, tcp).await?;
            Ok(TokioIo::new(stream))
        })
    }
}

/// Derives the TLS server name from the host of `uri`.
fn server_name_from(uri: &Uri) -> Result<ServerName<'static>, BoxError> {
    let host = uri.host().ok_or("dial target has no host")?;

    // IPv6 literals keep their brackets in URIs.
    let host = host.trim_start_matches('[').trim_end_matches(']');
    Ok(ServerName::try_from(host.to_string())?)
}
