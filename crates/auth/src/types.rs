//! Authentication outcome and settings types.
//!
//! A failed automated login has a meaningful non-exceptional fallback
//! (manual browser authentication), so outcomes are values the caller
//! inspects, never errors.

use std::time::Duration;

use {
    secrecy::Secret,
    serde::Serialize,
};

/// What went wrong, when something did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthErrorKind {
    /// The overall deadline elapsed without the gateway reporting
    /// authenticated.
    AuthenticationTimeout,
    /// Setup or navigation failed before or during the login flow.
    AuthenticationFailed,
    /// The tunnel could not be established; no browser interaction
    /// happened.
    TunnelCreationFailed,
    /// No usable browser could be acquired.
    BrowserUnavailable,
}

/// Result of one authentication attempt.
#[derive(Debug, Clone, Serialize)]
pub struct AuthOutcome {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<AuthErrorKind>,
}

impl AuthOutcome {
    #[must_use]
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            error_kind: None,
        }
    }

    #[must_use]
    pub fn failure(kind: AuthErrorKind, message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            error_kind: Some(kind),
        }
    }
}

/// Login credentials for the gateway's web form.
pub struct Credentials {
    pub username: String,
    pub password: Secret<String>,
}

impl Credentials {
    #[must_use]
    pub fn new(username: impl Into<String>, password: Secret<String>) -> Self {
        Self {
            username: username.into(),
            password,
        }
    }
}

/// Detection and timing knobs for the login flow.
#[derive(Debug, Clone)]
pub struct AuthSettings {
    /// Literal expected in page content on successful login.
    pub success_marker: String,
    /// Substrings indicating a pending second factor.
    pub twofa_markers: Vec<String>,
    /// Overall authentication deadline.
    pub deadline: Duration,
    /// Interval between authentication polls.
    pub poll_interval: Duration,
    /// Bounded wait for the login form, separate from the deadline.
    pub form_wait: Duration,
}

impl From<&portside_config::AuthConfig> for AuthSettings {
    fn from(cfg: &portside_config::AuthConfig) -> Self {
        Self {
            success_marker: cfg.success_marker.clone(),
            twofa_markers: cfg.twofa_markers.clone(),
            deadline: Duration::from_millis(cfg.timeout_ms),
            poll_interval: Duration::from_millis(cfg.poll_interval_ms),
            form_wait: Duration::from_millis(cfg.form_wait_ms),
        }
    }
}
