#![deny(missing_docs)]
#![deny(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

//! Declarative connection configuration for [Tonic](https://docs.rs/tonic) gRPC clients.
//!
//! A [`ConnectionConfig`] is read once at startup and turned into a
//! connected [`Channel`](tonic::transport::Channel) on demand. It covers the
//! handful of settings most services need: the target, an authority
//! override, TLS, blocking vs. lazy connect and a dial timeout.
//!
//! # Features
//!
//! - **Explicit transport security**: TLS is opt-in and the plaintext choice
//!   is an explicit credential, never a silent fallback
//! - **System roots plus private CAs**: extra CA bundles extend the platform
//!   trust store instead of replacing it
//! - **Client certificates and server name overrides** for mutual TLS and for
//!   dialing by IP address
//! - **Bounded, cancellable dials**: the dial timeout covers connection
//!   establishment only
//!
//! # Usage
//!
//! ```ignore
//! use std::time::Duration;
//! use tonic_dial::{ConnectionConfig, TlsConfig};
//!
//! let config = ConnectionConfig::new("localhost:50051")
//!     .tls(TlsConfig::enabled().ca_file("/etc/ssl/internal-ca.pem"))
//!     .dial_timeout(Duration::from_secs(5));
//!
//! let channel = config.dial([]).await?;
//!
//! // Use with your generated gRPC client
//! // let client = MyServiceClient::new(channel);
//! ```

mod config;
mod connector;
mod dial;
mod error;
mod tls;

#[cfg(test)]
mod test_support;

pub use crate::config::{ConnectionConfig, DEFAULT_DIAL_TIMEOUT, TlsConfig};
pub use dial::{DialOption, TransportCredentials};
pub use error::{Error, Result, TlsError};
pub use tls::TlsContext;
pub use tokio_util::sync::CancellationToken;
