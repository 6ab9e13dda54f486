//! Network scanning: the `NetworkScanner` capability trait and the rustls
//! based TLS prober behind it.

pub mod tls;

use async_trait::async_trait;
use thiserror::Error;

use crate::db::models::CertificateObservation;

#[derive(Error, Debug)]
pub enum ScanError {
    #[error("invalid target address: {0}")]
    InvalidAddress(String),
    #[error("dial failed: {0}")]
    Dial(String),
    #[error("tls handshake failed: {0}")]
    Handshake(String),
    #[error("no certificates presented by peer")]
    NoCertificates,
    #[error("failed to parse peer certificate: {0}")]
    Parse(String),
}

/// Capability to probe a remote endpoint for its certificate chain.
/// `target` is expected in `host:port` form; implementations must be safe
/// for concurrent use.
#[async_trait]
pub trait NetworkScanner: Send + Sync {
    async fn scan(&self, target: &str) -> Result<Vec<CertificateObservation>, ScanError>;
}
