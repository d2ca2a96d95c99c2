use thiserror::Error;

/// Result type alias for gateway operations
pub type Result<T, E = GatewayError> = std::result::Result<T, E>;

/// Errors that can occur while accepting and relaying ingestion traffic.
///
/// Handlers convert every failure into a terminal response for the caller;
/// this type mostly travels through service signatures and logs.
#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("hyper error: {0}")]
    Hyper(#[from] hyper::Error),

    #[error("failed to build proxied request: {0}")]
    Http(#[from] http::Error),

    #[error("internal error: {0}")]
    Internal(String),
}
