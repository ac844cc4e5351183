//! Active liveness probing of the gateway's local HTTPS endpoint.
//!
//! The gateway answers unauthenticated requests with a redirect or a 401
//! before login, so any of {200, 401, 302} counts as alive. The endpoint
//! uses a self-signed certificate, hence certificate verification is off.

use std::time::Duration;

use {
    reqwest::{StatusCode, redirect},
    tracing::{debug, trace},
};

/// Statuses that count as "the gateway answered".
const ALIVE_STATUSES: &[StatusCode] = &[
    StatusCode::OK,
    StatusCode::UNAUTHORIZED,
    StatusCode::FOUND,
];

pub struct HealthChecker {
    client: reqwest::Client,
    base_url: String,
}

impl HealthChecker {
    /// Checker for the gateway's root endpoint on the given local port.
    pub fn new(port: u16, request_timeout: Duration) -> anyhow::Result<Self> {
        Self::with_base_url(format!("https://localhost:{port}/"), request_timeout)
    }

    /// Checker against an explicit base URL. Tests point this at a plain
    /// HTTP mock server.
    pub fn with_base_url(base_url: String, request_timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .danger_accept_invalid_certs(true)
            .redirect(redirect::Policy::none())
            .timeout(request_timeout)
            .build()
            .map_err(|e| anyhow::anyhow!("failed to build health client: {e}"))?;
        Ok(Self { client, base_url })
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Single probe. Connection errors and unexpected statuses are both
    /// "not alive"; neither is fatal.
    pub async fn check(&self) -> bool {
        match self.client.get(&self.base_url).send().await {
            Ok(resp) => {
                let alive = ALIVE_STATUSES.contains(&resp.status());
                trace!(url = %self.base_url, status = %resp.status(), alive, "health probe");
                alive
            },
            Err(e) => {
                trace!(url = %self.base_url, error = %e, "health probe failed");
                false
            },
        }
    }

    /// Poll until alive or `max_attempts` is exhausted. Cooperative: each
    /// failed attempt awaits `interval` before the next probe.
    pub async fn poll(&self, max_attempts: u32, interval: Duration) -> bool {
        for attempt in 1..=max_attempts {
            if self.check().await {
                debug!(url = %self.base_url, attempt, "gateway endpoint is alive");
                return true;
            }
            if attempt < max_attempts {
                tokio::time::sleep(interval).await;
            }
        }
        debug!(
            url = %self.base_url,
            max_attempts,
            "gateway endpoint never answered"
        );
        false
    }
}
