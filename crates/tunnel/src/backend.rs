//! Tunnel backends.
//!
//! The default backend shells out to the `ngrok` CLI and reads its JSON
//! stdout logs until the started-tunnel record reports the public URL.
//! The trait keeps the backend swappable for other tunnel CLIs and for
//! tests.

use std::{process::Stdio, time::Duration};

use {
    async_trait::async_trait,
    base64::{Engine, engine::general_purpose::STANDARD as BASE64},
    rand::{Rng, distr::Alphanumeric},
    tokio::{
        io::{AsyncBufReadExt, BufReader},
        process::{Child, Command},
    },
    tracing::debug,
    url::Url,
};

use crate::error::TunnelError;

/// Per-session credential protecting the tunnel's public URL.
#[derive(Debug, Clone)]
pub struct BasicAuth {
    pub username: String,
    pub password: String,
}

impl BasicAuth {
    /// Random throwaway credential, regenerated for every tunnel.
    #[must_use]
    pub fn generate() -> Self {
        Self {
            username: random_token(12),
            password: random_token(24),
        }
    }

    /// `Authorization` header value for requests through the tunnel.
    #[must_use]
    pub fn header_value(&self) -> String {
        let raw = format!("{}:{}", self.username, self.password);
        format!("Basic {}", BASE64.encode(raw))
    }
}

fn random_token(len: usize) -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

/// A freshly opened tunnel, before registration.
#[derive(Debug)]
pub struct OpenedTunnel {
    pub public_url: String,
    /// The backend subprocess keeping the tunnel alive, when there is one.
    pub child: Option<Child>,
}

#[async_trait]
pub trait TunnelBackend: Send + Sync {
    /// Open a tunnel mapping a public URL to `local_url`, protected by
    /// `auth`.
    async fn open(&self, local_url: &Url, auth: &BasicAuth) -> Result<OpenedTunnel, TunnelError>;
}

/// Backend shelling out to the `ngrok` CLI.
pub struct NgrokBackend {
    binary: String,
    wait_timeout: Duration,
}

impl NgrokBackend {
    #[must_use]
    pub fn new(binary: impl Into<String>, wait_timeout: Duration) -> Self {
        Self {
            binary: binary.into(),
            wait_timeout,
        }
    }
}

#[async_trait]
impl TunnelBackend for NgrokBackend {
    async fn open(&self, local_url: &Url, auth: &BasicAuth) -> Result<OpenedTunnel, TunnelError> {
        which::which(&self.binary)
            .map_err(|_| TunnelError::BackendUnavailable(format!("{} not on PATH", self.binary)))?;

        let port = local_url
            .port_or_known_default()
            .ok_or_else(|| TunnelError::CreationFailed("local url has no port".into()))?;

        let mut child = Command::new(&self.binary)
            .args([
                "http",
                &port.to_string(),
                "--basic-auth",
                &format!("{}:{}", auth.username, auth.password),
                "--log",
                "stdout",
                "--log-format",
                "json",
            ])
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| TunnelError::CreationFailed("failed to capture backend stdout".into()))?;

        let mut lines = BufReader::new(stdout).lines();
        let found = tokio::time::timeout(self.wait_timeout, async {
            while let Ok(Some(line)) = lines.next_line().await {
                debug!(line = %line.trim(), "tunnel backend output");
                if let Some(url) = parse_started_tunnel(&line) {
                    return Some(url);
                }
            }
            None
        })
        .await;

        match found {
            Ok(Some(public_url)) => Ok(OpenedTunnel {
                public_url,
                child: Some(child),
            }),
            Ok(None) => {
                let _ = child.kill().await;
                Err(TunnelError::CreationFailed(
                    "backend exited before reporting a public url".into(),
                ))
            },
            Err(_) => {
                let _ = child.kill().await;
                Err(TunnelError::CreationFailed(format!(
                    "no public url within {}s",
                    self.wait_timeout.as_secs()
                )))
            },
        }
    }
}

/// Extract the public URL from an ngrok started-tunnel log record.
fn parse_started_tunnel(line: &str) -> Option<String> {
    let v: serde_json::Value = serde_json::from_str(line.trim()).ok()?;
    if v.get("msg")?.as_str()? != "started tunnel" {
        return None;
    }
    Some(v.get("url")?.as_str()?.to_owned())
}
