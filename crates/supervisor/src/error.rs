//! Supervisor error types.

use std::path::PathBuf;

use thiserror::Error;

/// Errors surfaced to callers of the gateway lifecycle operations.
///
/// Everything except `GatewayNotFound` is retryable: the supervisor
/// resets its state so a subsequent `start()` attempts a clean run.
#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error(
        "gateway artifact not found at {path} (check gateway.root_dir and gateway.jar_path)",
        path = .path.display()
    )]
    GatewayNotFound { path: PathBuf },

    #[error("no free port in {start}..{end}", end = .start + .attempts)]
    PortExhausted { start: u16, attempts: u16 },

    #[error("failed to spawn gateway process: {0}")]
    SpawnFailed(String),

    #[error("gateway did not become ready within {waited_secs}s")]
    StartupTimeout { waited_secs: u64 },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl SupervisorError {
    /// Whether a later `start()` may succeed without operator action.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::GatewayNotFound { .. })
    }
}
