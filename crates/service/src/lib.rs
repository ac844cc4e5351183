//! Composition root for the gateway automation layer.
//!
//! `GatewayService` is constructed once at application start and passed
//! by reference to every consumer (tool handlers, the CLI). It exposes
//! the two contracts the rest of the world calls, and nothing of its
//! internals:
//!
//! - `ensure_gateway_ready()` brings the gateway subprocess to `Ready`,
//!   surfacing infrastructure failures as typed errors.
//! - `ensure_authenticated()` drives the headless login, returning an
//!   `AuthOutcome` value so callers can fall back to manual login.
//!
//! Every shutdown entry point (signals, errors, normal exit) funnels
//! through the idempotent `shutdown()`.

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use {
    async_trait::async_trait,
    tracing::{debug, info},
    url::Url,
};

use {
    portside_auth::{
        AuthDriver, AuthErrorKind, AuthOutcome, AuthSettings, BrowserProvider, Credentials,
        StatusProbe,
    },
    portside_config::PortsideConfig,
    portside_supervisor::{GatewaySettings, GatewayState, GatewaySupervisor, SupervisorError},
    portside_tunnel::{NgrokBackend, TunnelManager},
};

pub struct GatewayService {
    config: PortsideConfig,
    supervisor: Arc<GatewaySupervisor>,
    tunnels: Arc<TunnelManager>,
    shutdown_done: AtomicBool,
}

impl GatewayService {
    #[must_use]
    pub fn new(config: PortsideConfig) -> Self {
        let supervisor = Arc::new(GatewaySupervisor::new(GatewaySettings::from(&config)));
        let backend = NgrokBackend::new(
            config.tunnel.binary.clone(),
            Duration::from_secs(config.tunnel.wait_timeout_secs),
        );
        Self {
            config,
            supervisor,
            tunnels: Arc::new(TunnelManager::new(Arc::new(backend))),
            shutdown_done: AtomicBool::new(false),
        }
    }

    /// Bring the gateway to `Ready` and return its port. Concurrent
    /// callers converge on the same in-flight startup.
    pub async fn ensure_gateway_ready(&self) -> Result<u16, SupervisorError> {
        self.supervisor.ensure_ready().await
    }

    /// Kick the gateway startup onto a background task without blocking;
    /// a later `ensure_gateway_ready()` joins or re-triggers it.
    pub fn start_gateway_background(&self) {
        self.supervisor.start_background();
    }

    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.supervisor.is_ready()
    }

    pub async fn state(&self) -> GatewayState {
        self.supervisor.state().await
    }

    pub async fn current_port(&self) -> Option<u16> {
        self.supervisor.current_port().await
    }

    /// Drive the headless login until the gateway reports authenticated.
    ///
    /// Always returns an outcome value. The gateway's own auth-status
    /// endpoint is both the fast path (already authenticated) and the
    /// driver's authoritative per-tick probe; page scraping is only the
    /// degraded fallback inside the driver.
    pub async fn ensure_authenticated(&self) -> AuthOutcome {
        let port = match self.ensure_gateway_ready().await {
            Ok(port) => port,
            Err(e) => {
                return AuthOutcome::failure(
                    AuthErrorKind::AuthenticationFailed,
                    format!("gateway is not ready: {e}"),
                );
            },
        };

        let target = match self.login_url(port) {
            Ok(url) => url,
            Err(e) => {
                return AuthOutcome::failure(
                    AuthErrorKind::AuthenticationFailed,
                    format!("invalid login url: {e}"),
                );
            },
        };

        let probe = match GatewayStatusProbe::for_gateway(
            port,
            &self.config.auth.status_path,
            Duration::from_millis(self.config.health.request_timeout_ms),
        ) {
            Ok(probe) => probe,
            Err(e) => {
                return AuthOutcome::failure(
                    AuthErrorKind::AuthenticationFailed,
                    format!("could not build status probe: {e}"),
                );
            },
        };

        if probe.authenticated().await.unwrap_or(false) {
            debug!("gateway already authenticated");
            return AuthOutcome::success("already authenticated");
        }

        let Some(credentials) = self.credentials() else {
            return AuthOutcome::failure(
                AuthErrorKind::AuthenticationFailed,
                format!(
                    "no credentials configured (set auth.username and PORTSIDE_PASSWORD); {}",
                    manual_login_instructions(&target)
                ),
            );
        };

        let provider = match BrowserProvider::from_config(&self.config.browser) {
            Ok(provider) => provider,
            Err(e) => {
                return AuthOutcome::failure(
                    AuthErrorKind::BrowserUnavailable,
                    format!("{e}; {}", manual_login_instructions(&target)),
                );
            },
        };

        let mut driver = AuthDriver::new(provider, AuthSettings::from(&self.config.auth));
        if self.config.tunnel.enabled {
            driver = driver.with_tunnels(
                Arc::clone(&self.tunnels),
                Duration::from_secs(self.config.tunnel.expiry_minutes * 60),
            );
        }

        info!(url = %target, "starting headless authentication");
        let mut outcome = driver
            .authenticate(&target, &credentials, Some(&probe))
            .await;
        if !outcome.success {
            outcome.message = format!("{}; {}", outcome.message, manual_login_instructions(&target));
        }
        outcome
    }

    /// Idempotent shutdown funnel shared by signal handlers, error paths,
    /// and normal exit. The second call is a no-op.
    pub async fn shutdown(&self) {
        if self.shutdown_done.swap(true, Ordering::SeqCst) {
            debug!("shutdown already performed");
            return;
        }
        info!("shutting down gateway service");
        self.tunnels.cleanup_all().await;
        self.supervisor.stop().await;
    }

    fn login_url(&self, port: u16) -> anyhow::Result<Url> {
        Ok(Url::parse(&format!(
            "https://{}:{port}/",
            self.config.auth.host
        ))?)
    }

    fn credentials(&self) -> Option<Credentials> {
        let username = self.config.auth.username.clone()?;
        let password = self.config.auth.password.clone()?;
        Some(Credentials::new(username, password))
    }
}

/// Asks the gateway's own auth-status endpoint; the authoritative answer
/// the driver prefers over page scraping.
pub struct GatewayStatusProbe {
    client: reqwest::Client,
    url: String,
}

impl GatewayStatusProbe {
    /// Probe for the local gateway on `port` (self-signed TLS).
    pub fn for_gateway(
        port: u16,
        status_path: &str,
        request_timeout: Duration,
    ) -> anyhow::Result<Self> {
        let path = status_path.trim_start_matches('/');
        Self::with_url(format!("https://localhost:{port}/{path}"), request_timeout)
    }

    /// Probe against an explicit URL. Tests point this at a mock server.
    pub fn with_url(url: String, request_timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .danger_accept_invalid_certs(true)
            .timeout(request_timeout)
            .build()
            .map_err(|e| anyhow::anyhow!("failed to build status client: {e}"))?;
        Ok(Self { client, url })
    }
}

#[async_trait]
impl StatusProbe for GatewayStatusProbe {
    async fn authenticated(&self) -> anyhow::Result<bool> {
        let resp = self.client.get(&self.url).send().await?;
        if !resp.status().is_success() {
            // Pre-login the endpoint answers 401; that's a definitive "no".
            return Ok(false);
        }
        let body: serde_json::Value = resp.json().await?;
        Ok(body
            .get("authenticated")
            .and_then(serde_json::Value::as_bool)
            .unwrap_or(false))
    }
}

fn manual_login_instructions(url: &Url) -> String {
    format!("to authenticate manually, open {url} in a browser and complete the login")
}

// Re-exports so tool handlers only need this crate.
pub use {
    portside_auth::AuthOutcome as Outcome,
    portside_supervisor::SupervisorError as GatewayError,
};

#[cfg(test)]
mod tests {
    use secrecy::Secret;

    use super::*;

    fn service_with_missing_gateway() -> (tempfile::TempDir, GatewayService) {
        let dir = tempfile::tempdir().unwrap();
        let mut config = PortsideConfig::default();
        config.gateway.root_dir = dir.path().to_path_buf();
        config.gateway.adopt_existing = false;
        config.auth.username = Some("u".into());
        config.auth.password = Some(Secret::new("p".into()));
        (dir, GatewayService::new(config))
    }

    #[tokio::test]
    async fn missing_gateway_surfaces_as_typed_error() {
        let (_dir, service) = service_with_missing_gateway();
        match service.ensure_gateway_ready().await {
            Err(SupervisorError::GatewayNotFound { .. }) => {},
            other => panic!("expected GatewayNotFound, got {other:?}"),
        }
        assert!(!service.is_ready());
    }

    #[tokio::test]
    async fn authentication_reports_unready_gateway_as_value() {
        let (_dir, service) = service_with_missing_gateway();
        let outcome = service.ensure_authenticated().await;
        assert!(!outcome.success);
        assert_eq!(outcome.error_kind, Some(AuthErrorKind::AuthenticationFailed));
        assert!(outcome.message.contains("gateway is not ready"));
    }

    #[tokio::test]
    async fn shutdown_is_idempotent() {
        let (_dir, service) = service_with_missing_gateway();
        service.shutdown().await;
        service.shutdown().await;
    }

    #[tokio::test]
    async fn status_probe_reads_authenticated_flag() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("GET", "/api/auth/status")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"authenticated": true, "connected": true}"#)
            .create_async()
            .await;

        let probe = GatewayStatusProbe::with_url(
            format!("{}/api/auth/status", server.url()),
            Duration::from_secs(1),
        )
        .unwrap();
        assert!(probe.authenticated().await.unwrap());
    }

    #[tokio::test]
    async fn status_probe_unauthorized_is_a_definitive_no() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("GET", "/api/auth/status")
            .with_status(401)
            .create_async()
            .await;

        let probe = GatewayStatusProbe::with_url(
            format!("{}/api/auth/status", server.url()),
            Duration::from_secs(1),
        )
        .unwrap();
        assert!(!probe.authenticated().await.unwrap());
    }

    #[tokio::test]
    async fn status_probe_malformed_body_is_an_error() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("GET", "/api/auth/status")
            .with_status(200)
            .with_body("not json")
            .create_async()
            .await;

        let probe = GatewayStatusProbe::with_url(
            format!("{}/api/auth/status", server.url()),
            Duration::from_secs(1),
        )
        .unwrap();
        assert!(probe.authenticated().await.is_err());
    }

    #[tokio::test]
    async fn status_probe_missing_flag_is_not_authenticated() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("GET", "/api/auth/status")
            .with_status(200)
            .with_body(r#"{"connected": true}"#)
            .create_async()
            .await;

        let probe = GatewayStatusProbe::with_url(
            format!("{}/api/auth/status", server.url()),
            Duration::from_secs(1),
        )
        .unwrap();
        assert!(!probe.authenticated().await.unwrap());
    }

    #[test]
    fn manual_instructions_name_the_url() {
        let url = Url::parse("https://localhost:5001/").unwrap();
        let text = manual_login_instructions(&url);
        assert!(text.contains("https://localhost:5001/"));
    }
}
