//! Browser session acquisition.
//!
//! One polymorphic seam with two providers: launch a local headless
//! Chrome/Chromium, or attach to a remote CDP websocket endpoint. Whether
//! the remote case is additionally tunneled is the driver's decision; the
//! session does not care where its pages navigate.

use std::{path::PathBuf, time::Duration};

use {
    chromiumoxide::{
        Browser, BrowserConfig as CdpBrowserConfig, Page, handler::HandlerConfig,
    },
    futures::StreamExt,
    tracing::{debug, info},
};

use crate::error::AuthError;

/// Known Chromium-based executable names, searched on PATH.
const CHROMIUM_EXECUTABLES: &[&str] = &[
    "google-chrome",
    "google-chrome-stable",
    "chromium",
    "chromium-browser",
    "chrome",
    "msedge",
];

/// How the login browser is obtained.
#[derive(Debug, Clone)]
pub enum BrowserProvider {
    /// Launch a local headless instance.
    Launch {
        chrome_path: Option<String>,
        headless: bool,
        chrome_args: Vec<String>,
        navigation_timeout: Duration,
    },
    /// Attach to a remote browser-automation backend over CDP.
    Connect {
        cdp_url: String,
        navigation_timeout: Duration,
    },
}

impl BrowserProvider {
    /// Build a provider from config. `connect` mode requires a CDP URL.
    pub fn from_config(cfg: &portside_config::BrowserConfig) -> anyhow::Result<Self> {
        let navigation_timeout = Duration::from_millis(cfg.navigation_timeout_ms);
        match cfg.mode {
            portside_config::BrowserMode::Launch => Ok(Self::Launch {
                chrome_path: cfg.chrome_path.clone(),
                headless: cfg.headless,
                chrome_args: cfg.chrome_args.clone(),
                navigation_timeout,
            }),
            portside_config::BrowserMode::Connect => {
                let cdp_url = cfg.cdp_url.clone().ok_or_else(|| {
                    anyhow::anyhow!("browser.mode = \"connect\" requires browser.cdp_url")
                })?;
                Ok(Self::Connect {
                    cdp_url,
                    navigation_timeout,
                })
            },
        }
    }

    /// Whether the browser runs somewhere other than this host. A remote
    /// browser cannot reach our loopback addresses directly.
    #[must_use]
    pub fn is_remote(&self) -> bool {
        matches!(self, Self::Connect { .. })
    }
}

/// A live browser owned for the duration of one authentication attempt.
pub struct BrowserSession {
    browser: Browser,
    handler_task: tokio::task::JoinHandle<()>,
}

impl BrowserSession {
    /// Acquire a browser according to the provider.
    pub async fn acquire(provider: &BrowserProvider) -> Result<Self, AuthError> {
        match provider {
            BrowserProvider::Launch {
                chrome_path,
                headless,
                chrome_args,
                navigation_timeout,
            } => {
                Self::launch(
                    chrome_path.as_deref(),
                    *headless,
                    chrome_args,
                    *navigation_timeout,
                )
                .await
            },
            BrowserProvider::Connect {
                cdp_url,
                navigation_timeout,
            } => Self::connect(cdp_url, *navigation_timeout).await,
        }
    }

    async fn launch(
        chrome_path: Option<&str>,
        headless: bool,
        chrome_args: &[String],
        navigation_timeout: Duration,
    ) -> Result<Self, AuthError> {
        let Some(executable) = detect_chrome(chrome_path) else {
            return Err(AuthError::BrowserUnavailable(format!(
                "Chrome/Chromium not found; install one or set browser.chrome_path. \
                 Searched: {CHROMIUM_EXECUTABLES:?}"
            )));
        };

        let mut builder = CdpBrowserConfig::builder()
            .chrome_executable(&executable)
            .request_timeout(navigation_timeout);
        // chromiumoxide is headless by default; with_head() shows a window.
        if !headless {
            builder = builder.with_head();
        }
        for arg in chrome_args {
            builder = builder.arg(arg);
        }
        builder = builder
            .arg("--disable-gpu")
            .arg("--disable-dev-shm-usage")
            .arg("--no-sandbox");

        let config = builder
            .build()
            .map_err(|e| AuthError::BrowserUnavailable(format!("browser config: {e}")))?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| AuthError::BrowserUnavailable(format!("browser launch failed: {e}")))?;

        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                debug!(?event, "browser event");
            }
        });

        info!(executable = %executable.display(), headless, "launched login browser");
        Ok(Self {
            browser,
            handler_task,
        })
    }

    async fn connect(cdp_url: &str, navigation_timeout: Duration) -> Result<Self, AuthError> {
        let handler_config = HandlerConfig {
            request_timeout: navigation_timeout,
            ..Default::default()
        };

        let (browser, mut handler) = Browser::connect_with_config(cdp_url, handler_config)
            .await
            .map_err(|e| {
                AuthError::BrowserUnavailable(format!(
                    "failed to connect to remote browser at {cdp_url}: {e}"
                ))
            })?;

        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                debug!(?event, "browser event");
            }
        });

        info!(cdp_url, "connected to remote login browser");
        Ok(Self {
            browser,
            handler_task,
        })
    }

    pub async fn new_page(&self) -> Result<Page, AuthError> {
        self.browser
            .new_page("about:blank")
            .await
            .map_err(|e| AuthError::Cdp(e.to_string()))
    }

    /// Close the browser. Best effort: a dead connection is already
    /// closed.
    pub async fn close(mut self) {
        if let Err(e) = self.browser.close().await {
            debug!(error = %e, "browser close failed (already gone?)");
        }
        self.handler_task.abort();
    }
}

/// Find a Chromium-based executable: custom path, CHROME env var, PATH.
fn detect_chrome(custom_path: Option<&str>) -> Option<PathBuf> {
    if let Some(path) = custom_path {
        let p = PathBuf::from(path);
        if p.exists() {
            return Some(p);
        }
    }
    if let Ok(path) = std::env::var("CHROME") {
        let p = PathBuf::from(&path);
        if p.exists() {
            return Some(p);
        }
    }
    CHROMIUM_EXECUTABLES
        .iter()
        .find_map(|name| which::which(name).ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connect_mode_requires_cdp_url() {
        let cfg = portside_config::BrowserConfig {
            mode: portside_config::BrowserMode::Connect,
            cdp_url: None,
            ..Default::default()
        };
        assert!(BrowserProvider::from_config(&cfg).is_err());
    }

    #[test]
    fn launch_mode_is_local() {
        let provider = BrowserProvider::from_config(&portside_config::BrowserConfig::default())
            .unwrap();
        assert!(!provider.is_remote());
    }

    #[test]
    fn connect_mode_is_remote() {
        let cfg = portside_config::BrowserConfig {
            mode: portside_config::BrowserMode::Connect,
            cdp_url: Some("ws://build-host:9222".into()),
            ..Default::default()
        };
        let provider = BrowserProvider::from_config(&cfg).unwrap();
        assert!(provider.is_remote());
    }

    #[test]
    fn custom_chrome_path_takes_precedence() {
        let dir = std::env::temp_dir();
        let fake = dir.join("portside-fake-chrome-for-test");
        std::fs::write(&fake, "fake").unwrap();

        let found = detect_chrome(fake.to_str());
        assert_eq!(found.as_ref(), Some(&fake));

        std::fs::remove_file(&fake).unwrap();
    }

    #[test]
    fn missing_custom_path_falls_through() {
        // Should not panic; result depends on what's installed here.
        let _ = detect_chrome(Some("/nonexistent/chrome"));
    }
}
