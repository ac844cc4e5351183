//! Headless authentication against the gateway's login page.
//!
//! Acquires a browser (local headless launch or remote CDP attach,
//! tunneled when the target is loopback and the browser is not), fills
//! and submits the vendor login form, and polls until the gateway reports
//! authenticated or the deadline elapses. Results are `AuthOutcome`
//! values so callers can fall back to manual authentication.

pub mod driver;
pub mod error;
pub mod session;
pub mod types;

pub use {
    driver::{AuthDriver, StatusProbe},
    error::AuthError,
    session::{BrowserProvider, BrowserSession},
    types::{AuthErrorKind, AuthOutcome, AuthSettings, Credentials},
};
