//! The headless authentication driver.
//!
//! Owns a browser session for the duration of one attempt: navigate to
//! the login page (through a tunnel when the browser is remote), fill and
//! submit the form, then poll until the gateway reports authenticated or
//! the deadline elapses. Outcomes are values; only the polling loop's
//! setup can fail, and those failures are folded into the outcome too.

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use {
    async_trait::async_trait,
    chromiumoxide::{
        Page,
        cdp::browser_protocol::network::{Headers, SetExtraHttpHeadersParams},
    },
    portside_tunnel::{Tunnel, TunnelManager},
    secrecy::ExposeSecret,
    tracing::{debug, info, warn},
    url::Url,
};

use crate::{
    error::AuthError,
    session::{BrowserProvider, BrowserSession},
    types::{AuthErrorKind, AuthOutcome, AuthSettings, Credentials},
};

/// Authoritative authentication check, preferred over content scraping.
/// Typically backed by the gateway's own auth-status endpoint.
#[async_trait]
pub trait StatusProbe: Send + Sync {
    async fn authenticated(&self) -> anyhow::Result<bool>;
}

/// Permissive selectors for the vendor login form. Matched in order.
const USER_SELECTORS: &[&str] = &[
    "input[name*=\"user\" i]",
    "input[id*=\"user\" i]",
    "input[type=\"text\"]",
    "input[type=\"email\"]",
];
const PASSWORD_SELECTORS: &[&str] = &[
    "input[type=\"password\"]",
    "input[name*=\"pass\" i]",
    "input[id*=\"pass\" i]",
];
const SUBMIT_SELECTORS: &[&str] = &[
    "button[type=\"submit\"]",
    "input[type=\"submit\"]",
    "button[id*=\"submit\" i]",
    "button[id*=\"login\" i]",
    "button",
];

/// How often the form-render wait re-checks the page.
const FORM_POLL_INTERVAL: Duration = Duration::from_millis(500);

pub struct AuthDriver {
    provider: BrowserProvider,
    settings: AuthSettings,
    tunnels: Option<(Arc<TunnelManager>, Duration)>,
}

impl AuthDriver {
    #[must_use]
    pub fn new(provider: BrowserProvider, settings: AuthSettings) -> Self {
        Self {
            provider,
            settings,
            tunnels: None,
        }
    }

    /// Enable tunneling for loopback targets driven by a remote browser.
    #[must_use]
    pub fn with_tunnels(mut self, manager: Arc<TunnelManager>, expiry: Duration) -> Self {
        self.tunnels = Some((manager, expiry));
        self
    }

    /// Run one authentication attempt against `target`.
    ///
    /// The session (browser, page, tunnel) never outlives this call:
    /// teardown runs on success, failure, and timeout alike.
    pub async fn authenticate(
        &self,
        target: &Url,
        credentials: &Credentials,
        probe: Option<&dyn StatusProbe>,
    ) -> AuthOutcome {
        let tunnel = if self.needs_tunnel(target) {
            let Some((manager, expiry)) = &self.tunnels else {
                // needs_tunnel checked this
                return AuthOutcome::failure(AuthErrorKind::TunnelCreationFailed, "no tunnel manager");
            };
            match manager.create_secure_auth_tunnel(target, *expiry).await {
                Ok(tunnel) => Some(tunnel),
                Err(e) => {
                    return AuthOutcome::failure(
                        AuthErrorKind::TunnelCreationFailed,
                        format!("could not tunnel {target} to the remote browser: {e}"),
                    );
                },
            }
        } else {
            None
        };

        let outcome = self
            .drive(target, credentials, probe, tunnel.as_deref())
            .await;

        if let Some(tunnel) = tunnel {
            tunnel.cleanup().await;
        }
        outcome
    }

    /// A loopback target is unreachable from a remote browser.
    fn needs_tunnel(&self, target: &Url) -> bool {
        self.provider.is_remote() && self.tunnels.is_some() && is_loopback_host(target)
    }

    async fn drive(
        &self,
        target: &Url,
        credentials: &Credentials,
        probe: Option<&dyn StatusProbe>,
        tunnel: Option<&Tunnel>,
    ) -> AuthOutcome {
        let session = match BrowserSession::acquire(&self.provider).await {
            Ok(session) => session,
            Err(e) => {
                warn!(error = %e, "could not acquire login browser");
                return AuthOutcome::failure(e.kind(), e.to_string());
            },
        };

        let outcome = self
            .run_login(&session, target, credentials, probe, tunnel)
            .await;
        session.close().await;

        match outcome {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(error = %e, "authentication setup failed");
                AuthOutcome::failure(e.kind(), e.to_string())
            },
        }
    }

    async fn run_login(
        &self,
        session: &BrowserSession,
        target: &Url,
        credentials: &Credentials,
        probe: Option<&dyn StatusProbe>,
        tunnel: Option<&Tunnel>,
    ) -> Result<AuthOutcome, AuthError> {
        let page = session.new_page().await?;

        // Through a tunnel, every request needs the tunnel's credential
        // and the navigation target is the public URL.
        let nav_url = match tunnel {
            Some(tunnel) => {
                let headers = Headers::new(serde_json::json!({
                    "Authorization": tunnel.basic_auth().header_value(),
                }));
                let cmd = SetExtraHttpHeadersParams::builder()
                    .headers(headers)
                    .build()
                    .map_err(AuthError::Cdp)?;
                page.execute(cmd)
                    .await
                    .map_err(|e| AuthError::Cdp(e.to_string()))?;
                tunnel.public_url().to_string()
            },
            None => target.to_string(),
        };

        info!(url = %nav_url, tunneled = tunnel.is_some(), "navigating to login page");
        page.goto(nav_url.as_str())
            .await
            .map_err(|e| AuthError::Navigation(e.to_string()))?;
        let _ = page.wait_for_navigation().await;

        self.wait_for_login_form(&page).await?;
        self.submit_credentials(&page, credentials).await?;
        info!("credentials submitted, polling authentication status");

        let deadline = Instant::now() + self.settings.deadline;
        let result = poll_until_authenticated(
            deadline,
            self.settings.poll_interval,
            probe,
            || page_text(&page),
            &self.settings.success_marker,
            &self.settings.twofa_markers,
        )
        .await;

        Ok(match result {
            PollResult::Succeeded => AuthOutcome::success("gateway authenticated"),
            PollResult::TimedOut => AuthOutcome::failure(
                AuthErrorKind::AuthenticationTimeout,
                format!(
                    "gateway did not authenticate within {}s",
                    self.settings.deadline.as_secs()
                ),
            ),
        })
    }

    /// Bounded wait for the login form, distinct from the overall
    /// deadline.
    async fn wait_for_login_form(&self, page: &Page) -> Result<(), AuthError> {
        let check = format!(
            "!!document.querySelector({})",
            js_string(PASSWORD_SELECTORS[0])
        );
        let deadline = Instant::now() + self.settings.form_wait;

        while Instant::now() < deadline {
            let found: bool = page
                .evaluate(check.as_str())
                .await
                .map_err(|e| AuthError::Js(e.to_string()))?
                .into_value()
                .unwrap_or(false);
            if found {
                debug!("login form rendered");
                return Ok(());
            }
            tokio::time::sleep(FORM_POLL_INTERVAL).await;
        }
        Err(AuthError::FormTimeout(self.settings.form_wait))
    }

    async fn submit_credentials(
        &self,
        page: &Page,
        credentials: &Credentials,
    ) -> Result<(), AuthError> {
        let js = fill_login_form_js(
            &credentials.username,
            credentials.password.expose_secret(),
        );
        let submitted: bool = page
            .evaluate(js.as_str())
            .await
            .map_err(|e| AuthError::Js(e.to_string()))?
            .into_value()
            .unwrap_or(false);
        if !submitted {
            return Err(AuthError::Js(
                "could not locate login form fields on the page".into(),
            ));
        }
        Ok(())
    }
}

fn is_loopback_host(url: &Url) -> bool {
    match url.host_str() {
        Some("localhost") => true,
        Some(host) => host
            .parse::<std::net::IpAddr>()
            .is_ok_and(|ip| ip.is_loopback()),
        None => false,
    }
}

async fn page_text(page: &Page) -> anyhow::Result<String> {
    let text: String = page
        .evaluate("document.body ? document.body.innerText : ''")
        .await?
        .into_value()?;
    Ok(text)
}

/// JS that fills and submits the login form with permissive selectors.
/// Returns true when both fields were found and a submit happened.
fn fill_login_form_js(username: &str, password: &str) -> String {
    format!(
        r#"(() => {{
            const find = (sels) => {{
                for (const s of sels) {{
                    const el = document.querySelector(s);
                    if (el) return el;
                }}
                return null;
            }};
            const user = find({user_sels});
            const pass = find({pass_sels});
            if (!user || !pass) return false;
            const set = (el, value) => {{
                el.focus();
                el.value = value;
                el.dispatchEvent(new Event('input', {{bubbles: true}}));
                el.dispatchEvent(new Event('change', {{bubbles: true}}));
            }};
            set(user, {username});
            set(pass, {password});
            const submit = find({submit_sels});
            if (submit) {{
                submit.click();
            }} else if (pass.form) {{
                pass.form.submit();
            }} else {{
                return false;
            }}
            return true;
        }})()"#,
        user_sels = js_string_array(USER_SELECTORS),
        pass_sels = js_string_array(PASSWORD_SELECTORS),
        submit_sels = js_string_array(SUBMIT_SELECTORS),
        username = js_string(username),
        password = js_string(password),
    )
}

fn js_string(s: &str) -> String {
    serde_json::to_string(s).unwrap_or_else(|_| "\"\"".into())
}

fn js_string_array(items: &[&str]) -> String {
    let quoted: Vec<String> = items.iter().map(|s| js_string(s)).collect();
    format!("[{}]", quoted.join(", "))
}

enum PollResult {
    Succeeded,
    TimedOut,
}

/// Poll until authenticated or the deadline elapses.
///
/// Each tick prefers the authoritative status probe; without one it falls
/// back to scraping page text for the success marker, separately noting
/// 2FA indicators so "second factor pending" is distinguishable from
/// "stuck" in the logs. Per-tick errors never abort the loop.
async fn poll_until_authenticated<F, Fut>(
    deadline: Instant,
    interval: Duration,
    probe: Option<&dyn StatusProbe>,
    page_text: F,
    success_marker: &str,
    twofa_markers: &[String],
) -> PollResult
where
    F: Fn() -> Fut,
    Fut: Future<Output = anyhow::Result<String>>,
{
    loop {
        if let Some(probe) = probe {
            match probe.authenticated().await {
                Ok(true) => return PollResult::Succeeded,
                Ok(false) => debug!("status probe: not authenticated yet"),
                Err(e) => warn!(error = %e, "status probe failed, will retry"),
            }
        } else {
            match page_text().await {
                Ok(text) => {
                    if text.contains(success_marker) {
                        return PollResult::Succeeded;
                    }
                    if twofa_markers.iter().any(|m| text.contains(m.as_str())) {
                        info!("two-factor prompt detected, waiting for completion");
                    } else {
                        debug!("success marker not present (degraded content-scrape mode)");
                    }
                },
                Err(e) => warn!(error = %e, "page inspection failed, will retry"),
            }
        }

        let now = Instant::now();
        if now >= deadline {
            return PollResult::TimedOut;
        }
        tokio::time::sleep(interval.min(deadline - now)).await;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    struct CountingProbe {
        calls: AtomicUsize,
        succeed_on: usize,
    }

    #[async_trait]
    impl StatusProbe for CountingProbe {
        async fn authenticated(&self) -> anyhow::Result<bool> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(n >= self.succeed_on)
        }
    }

    struct ErroringProbe;

    #[async_trait]
    impl StatusProbe for ErroringProbe {
        async fn authenticated(&self) -> anyhow::Result<bool> {
            anyhow::bail!("status endpoint unreachable")
        }
    }

    fn far_deadline() -> Instant {
        Instant::now() + Duration::from_secs(10)
    }

    #[tokio::test]
    async fn content_scrape_succeeds_on_the_marker_tick() {
        let ticks = AtomicUsize::new(0);
        let result = poll_until_authenticated(
            far_deadline(),
            Duration::from_millis(10),
            None,
            || async {
                let n = ticks.fetch_add(1, Ordering::SeqCst) + 1;
                Ok(if n >= 3 {
                    "Client login succeeds".to_string()
                } else {
                    "please wait".to_string()
                })
            },
            "Client login succeeds",
            &[],
        )
        .await;

        assert!(matches!(result, PollResult::Succeeded));
        assert_eq!(ticks.load(Ordering::SeqCst), 3, "success on tick 3, not before");
    }

    #[tokio::test]
    async fn status_probe_is_preferred_over_scraping() {
        let probe = CountingProbe {
            calls: AtomicUsize::new(0),
            succeed_on: 2,
        };
        let scraped = AtomicUsize::new(0);

        let result = poll_until_authenticated(
            far_deadline(),
            Duration::from_millis(10),
            Some(&probe),
            || async {
                scraped.fetch_add(1, Ordering::SeqCst);
                Ok(String::new())
            },
            "marker",
            &[],
        )
        .await;

        assert!(matches!(result, PollResult::Succeeded));
        assert_eq!(probe.calls.load(Ordering::SeqCst), 2);
        assert_eq!(scraped.load(Ordering::SeqCst), 0, "no scraping with a probe wired in");
    }

    #[tokio::test]
    async fn deadline_elapses_into_timeout() {
        let begun = Instant::now();
        let result = poll_until_authenticated(
            Instant::now() + Duration::from_millis(150),
            Duration::from_millis(50),
            None,
            || async { Ok("still logging in".to_string()) },
            "never appears",
            &[],
        )
        .await;

        assert!(matches!(result, PollResult::TimedOut));
        let elapsed = begun.elapsed();
        assert!(elapsed >= Duration::from_millis(150), "at or after the deadline");
        assert!(elapsed < Duration::from_secs(2), "shortly after the deadline");
    }

    #[tokio::test]
    async fn probe_errors_do_not_abort_the_loop() {
        let result = poll_until_authenticated(
            Instant::now() + Duration::from_millis(100),
            Duration::from_millis(20),
            Some(&ErroringProbe),
            || async { Ok(String::new()) },
            "marker",
            &[],
        )
        .await;
        assert!(matches!(result, PollResult::TimedOut));
    }

    #[tokio::test]
    async fn twofa_marker_alone_is_not_success() {
        let result = poll_until_authenticated(
            Instant::now() + Duration::from_millis(80),
            Duration::from_millis(20),
            None,
            || async { Ok("Second Factor required".to_string()) },
            "Client login succeeds",
            &["Second Factor".to_string()],
        )
        .await;
        assert!(matches!(result, PollResult::TimedOut));
    }

    #[test]
    fn form_js_escapes_credentials() {
        let js = fill_login_form_js("us\"er", "pa'ss\\word");
        assert!(js.contains(r#""us\"er""#));
        assert!(js.contains(r#""pa'ss\\word""#));
        assert!(js.contains("input[type=\\\"password\\\"]") || js.contains("input[type=\"password\"]"));
    }

    #[test]
    fn loopback_detection() {
        let loopback = Url::parse("https://localhost:5000/").unwrap();
        let loopback_ip = Url::parse("https://127.0.0.1:5000/").unwrap();
        let remote = Url::parse("https://gateway.example.com/").unwrap();
        assert!(is_loopback_host(&loopback));
        assert!(is_loopback_host(&loopback_ip));
        assert!(!is_loopback_host(&remote));
    }

    #[tokio::test]
    async fn tunnel_failure_aborts_before_browser_interaction() {
        use portside_tunnel::{BasicAuth, OpenedTunnel, TunnelBackend, TunnelError};

        struct NoBackend;

        #[async_trait]
        impl TunnelBackend for NoBackend {
            async fn open(
                &self,
                _local_url: &Url,
                _auth: &BasicAuth,
            ) -> Result<OpenedTunnel, TunnelError> {
                Err(TunnelError::BackendUnavailable("ngrok not on PATH".into()))
            }
        }

        let driver = AuthDriver::new(
            BrowserProvider::Connect {
                cdp_url: "ws://build-host:9222".into(),
                navigation_timeout: Duration::from_secs(5),
            },
            AuthSettings::from(&portside_config::AuthConfig::default()),
        )
        .with_tunnels(Arc::new(TunnelManager::new(Arc::new(NoBackend))), Duration::from_secs(60));

        let creds = Credentials::new("u", secrecy::Secret::new("p".to_string()));
        let target = Url::parse("https://localhost:5000/").unwrap();
        let outcome = driver.authenticate(&target, &creds, None).await;

        assert!(!outcome.success);
        assert_eq!(outcome.error_kind, Some(AuthErrorKind::TunnelCreationFailed));
    }
}
