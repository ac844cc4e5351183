//! Time-limited, credentialed reverse tunnels for remote-browser
//! authentication.
//!
//! Only used when the authentication target is a loopback address and the
//! browser runs remotely. Every tunnel gets a random per-session basic
//! auth credential and an auto-expiry timer that fires even if the caller
//! never cleans up.

pub mod backend;
pub mod error;

use std::{
    collections::HashMap,
    sync::{
        Arc, Weak,
        atomic::{AtomicBool, Ordering},
    },
    time::{Duration, Instant},
};

use {
    tokio::{process::Child, sync::Mutex},
    tracing::{debug, info, warn},
    url::Url,
    uuid::Uuid,
};

pub use {
    backend::{BasicAuth, NgrokBackend, OpenedTunnel, TunnelBackend},
    error::TunnelError,
};

type Registry = Mutex<HashMap<Uuid, Arc<Tunnel>>>;

/// An active tunnel. Cleanup is idempotent and also runs automatically at
/// expiry.
pub struct Tunnel {
    id: Uuid,
    public_url: String,
    original_url: String,
    basic_auth: BasicAuth,
    expires_at: Instant,
    cleaned: AtomicBool,
    child: Mutex<Option<Child>>,
    registry: Weak<Registry>,
}

impl Tunnel {
    #[must_use]
    pub fn public_url(&self) -> &str {
        &self.public_url
    }

    #[must_use]
    pub fn original_url(&self) -> &str {
        &self.original_url
    }

    #[must_use]
    pub fn basic_auth(&self) -> &BasicAuth {
        &self.basic_auth
    }

    #[must_use]
    pub fn expires_at(&self) -> Instant {
        self.expires_at
    }

    #[must_use]
    pub fn is_cleaned(&self) -> bool {
        self.cleaned.load(Ordering::SeqCst)
    }

    /// Tear the tunnel down and deregister it. Safe to call any number of
    /// times; every call after the first is a no-op.
    pub async fn cleanup(&self) {
        if self.cleaned.swap(true, Ordering::SeqCst) {
            debug!(id = %self.id, "tunnel already cleaned up");
            return;
        }
        if let Some(mut child) = self.child.lock().await.take() {
            let _ = child.kill().await;
        }
        if let Some(registry) = self.registry.upgrade() {
            registry.lock().await.remove(&self.id);
        }
        info!(id = %self.id, public_url = %self.public_url, "tunnel closed");
    }
}

/// Owns the active-tunnel registry and the expiry timers.
pub struct TunnelManager {
    backend: Arc<dyn TunnelBackend>,
    active: Arc<Registry>,
}

impl TunnelManager {
    #[must_use]
    pub fn new(backend: Arc<dyn TunnelBackend>) -> Self {
        Self {
            backend,
            active: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Open a credentialed tunnel to `local_url` that auto-expires after
    /// `expiry`, whether or not the caller ever calls `cleanup()`.
    pub async fn create_secure_auth_tunnel(
        &self,
        local_url: &Url,
        expiry: Duration,
    ) -> Result<Arc<Tunnel>, TunnelError> {
        let auth = BasicAuth::generate();
        let opened = self.backend.open(local_url, &auth).await?;

        let tunnel = Arc::new(Tunnel {
            id: Uuid::new_v4(),
            public_url: opened.public_url,
            original_url: local_url.to_string(),
            basic_auth: auth,
            expires_at: Instant::now() + expiry,
            cleaned: AtomicBool::new(false),
            child: Mutex::new(opened.child),
            registry: Arc::downgrade(&self.active),
        });
        self.active
            .lock()
            .await
            .insert(tunnel.id, Arc::clone(&tunnel));

        // The registry holds a strong reference, so the timer fires even
        // after the caller drops its handle.
        let timed = Arc::clone(&tunnel);
        tokio::spawn(async move {
            tokio::time::sleep(expiry).await;
            if !timed.is_cleaned() {
                warn!(id = %timed.id, "tunnel expired, cleaning up");
                timed.cleanup().await;
            }
        });

        info!(
            id = %tunnel.id,
            public_url = %tunnel.public_url,
            expiry_secs = expiry.as_secs(),
            "secure auth tunnel created"
        );
        Ok(tunnel)
    }

    pub async fn active_count(&self) -> usize {
        self.active.lock().await.len()
    }

    /// Close every active tunnel. Part of the shared shutdown funnel.
    pub async fn cleanup_all(&self) {
        let tunnels: Vec<_> = self.active.lock().await.values().cloned().collect();
        for tunnel in tunnels {
            tunnel.cleanup().await;
        }
    }
}
