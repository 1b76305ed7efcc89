//! Dial example demonstrating tonic-dial configuration loading.
//!
//! Loads a [`ConnectionConfig`] from an optional file and the environment,
//! dials the target and reports whether the connection was established.
//!
//! # Running
//!
//! ```bash
//! GRPC_TARGET=localhost:50051 cargo run --example dial
//! cargo run --example dial -- client.toml
//! ```
//!
//! # Environment Variables
//!
//! - `GRPC_TARGET`: Address of the gRPC server
//! - `GRPC_AUTHORITY`: Authority override
//! - `GRPC_BLOCK`: Wait for the connection (default: true)
//! - `GRPC_DIAL_TIMEOUT`: Dial timeout, e.g. `5s` (default: 5s)
//! - `GRPC_TLS__ENABLED`, `GRPC_TLS__CA_FILE`, `GRPC_TLS__CERT_FILE`,
//!   `GRPC_TLS__KEY_FILE`, `GRPC_TLS__SERVER_NAME`,
//!   `GRPC_TLS__INSECURE_SKIP_VERIFY`: TLS settings

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use tonic_dial::{CancellationToken, ConnectionConfig, DialOption};
use tracing::{Level, error, info};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(Level::INFO.into()),
        )
        .init();

    let path = env::args().nth(1).map(PathBuf::from);
    let config = ConnectionConfig::load(path.as_deref(), "GRPC")?;

    info!("Target: {}", config.target);
    if !config.authority.is_empty() {
        info!("Authority: {}", config.authority);
    }

    info!("TLS: {}", config.tls.enabled);
    info!("Block: {}", config.block);
    info!("Dial timeout: {:?}", config.dial_timeout);

    // Ctrl-C aborts a blocking dial
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            trigger.cancel();
        }
    });

    let extra = [DialOption::RequestTimeout(Duration::from_secs(10))];
    match config.dial_with_cancellation(&cancel, extra).await {
        Ok(_channel) => {
            // Use with your generated gRPC client
            // let client = MyServiceClient::new(channel);
            info!("Connected to {}", config.target);
        }

        Err(e) => {
            error!("Dial failed: {e}");
            return Err(e.into());
        }
    }

    Ok(())
}
