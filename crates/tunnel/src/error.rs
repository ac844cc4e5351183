//! Tunnel error types.

use thiserror::Error;

/// Errors from tunnel creation. Any of these aborts the authentication
/// attempt before browser interaction starts.
#[derive(Debug, Error)]
pub enum TunnelError {
    #[error("tunnel backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("tunnel creation failed: {0}")]
    CreationFailed(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
