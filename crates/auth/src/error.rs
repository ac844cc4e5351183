//! Internal errors of the login flow's setup phases.
//!
//! These never escape the driver: `authenticate` converts them into the
//! `AuthOutcome` value the caller sees.

use std::time::Duration;

use thiserror::Error;

use crate::types::AuthErrorKind;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("browser unavailable: {0}")]
    BrowserUnavailable(String),

    #[error("navigation failed: {0}")]
    Navigation(String),

    #[error("login form did not render within {0:?}")]
    FormTimeout(Duration),

    #[error("JavaScript evaluation failed: {0}")]
    Js(String),

    #[error("CDP error: {0}")]
    Cdp(String),
}

impl AuthError {
    /// The outcome kind this setup error maps to.
    #[must_use]
    pub fn kind(&self) -> AuthErrorKind {
        match self {
            Self::BrowserUnavailable(_) => AuthErrorKind::BrowserUnavailable,
            _ => AuthErrorKind::AuthenticationFailed,
        }
    }
}
