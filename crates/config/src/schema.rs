//! Config schema types (gateway install, health budget, authentication,
//! browser, tunnel). Every section has serde defaults so a missing or
//! partial `portside.toml` still yields a runnable configuration.

use std::path::PathBuf;

use {
    secrecy::{ExposeSecret, Secret},
    serde::{Deserialize, Serialize},
};

/// Top-level portside configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PortsideConfig {
    pub gateway: GatewayConfig,
    pub health: HealthConfig,
    pub auth: AuthConfig,
    pub browser: BrowserConfig,
    pub tunnel: TunnelConfig,
}

/// Where the vendor gateway lives on disk and how to run it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Gateway install root (working directory for the subprocess).
    pub root_dir: PathBuf,
    /// Startup config file, relative to `root_dir`. The gateway reads its
    /// listen port from the `listenPort:` field of this YAML file.
    pub conf_path: PathBuf,
    /// Runnable jar, relative to `root_dir`. Its absence is fatal.
    pub jar_path: PathBuf,
    /// Config directory put on the classpath, relative to `root_dir`.
    pub config_dir: PathBuf,
    /// Runtime lib glob appended to the classpath, relative to `root_dir`.
    pub lib_glob: String,
    /// Entry class handed to the JVM.
    pub main_class: String,
    /// Fixed JVM flags, passed before the classpath.
    pub jvm_flags: Vec<String>,
    /// Bundled Java runtime home. When unset, `java` is resolved from PATH.
    pub java_home: Option<PathBuf>,
    /// Port the gateway listens on by default.
    pub default_port: u16,
    /// How many ports above the default to try when it is occupied.
    pub port_scan_attempts: u16,
    /// Ports probed for an already-running gateway before spawning one.
    pub known_ports: Vec<u16>,
    /// Adopt an already-running gateway instead of spawning a second one.
    pub adopt_existing: bool,
    /// stdout/stderr substrings that flip readiness.
    pub readiness_markers: Vec<String>,
    /// Substrings identifying gateway processes in a process listing.
    pub process_identifiers: Vec<String>,
    /// Seconds to wait after a graceful termination signal before SIGKILL.
    pub stop_grace_secs: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            root_dir: PathBuf::from("./gateway"),
            conf_path: PathBuf::from("root/conf.yaml"),
            jar_path: PathBuf::from("dist/gateway.jar"),
            config_dir: PathBuf::from("root"),
            lib_glob: "build/lib/runtime/*".into(),
            main_class: "gateway.web.Launcher".into(),
            jvm_flags: vec![
                "-server".into(),
                "-Dvertx.disableDnsResolver=true".into(),
                "-Djava.net.preferIPv4Stack=true".into(),
            ],
            java_home: None,
            default_port: 5000,
            port_scan_attempts: 9,
            known_ports: vec![5000, 5001, 5002, 5003, 5004],
            adopt_existing: true,
            readiness_markers: vec!["Server ready".into(), "started on port".into()],
            process_identifiers: vec!["gateway.web.Launcher".into(), "dist/gateway.jar".into()],
            stop_grace_secs: 10,
        }
    }
}

/// Liveness-poll budget for the gateway's local HTTPS endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    pub max_attempts: u32,
    pub interval_ms: u64,
    /// Per-request timeout, independent of the overall budget.
    pub request_timeout_ms: u64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            max_attempts: 30,
            interval_ms: 1000,
            request_timeout_ms: 2000,
        }
    }
}

/// Credentials and detection knobs for the automated login.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    pub username: Option<String>,
    #[serde(
        default,
        serialize_with = "serialize_option_secret",
        skip_serializing_if = "Option::is_none"
    )]
    pub password: Option<Secret<String>>,
    /// Host part of the login URL (the port comes from the supervisor).
    pub host: String,
    /// Gateway endpoint answering `{"authenticated": bool}`.
    pub status_path: String,
    /// Overall authentication deadline.
    pub timeout_ms: u64,
    /// Interval between authentication-status polls.
    pub poll_interval_ms: u64,
    /// Bounded wait for the login form to render, distinct from the
    /// overall deadline.
    pub form_wait_ms: u64,
    /// Literal expected in page content on successful login.
    pub success_marker: String,
    /// Substrings indicating a pending second factor.
    pub twofa_markers: Vec<String>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            username: None,
            password: None,
            host: "localhost".into(),
            status_path: "/api/auth/status".into(),
            timeout_ms: 300_000,
            poll_interval_ms: 3000,
            form_wait_ms: 30_000,
            success_marker: "Client login succeeds".into(),
            twofa_markers: vec![
                "Second Factor".into(),
                "Two Factor".into(),
                "Security Code".into(),
                "2FA".into(),
            ],
        }
    }
}

/// How the login browser is acquired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BrowserMode {
    /// Launch a local headless Chrome/Chromium.
    Launch,
    /// Attach to a remote CDP websocket endpoint.
    Connect,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrowserConfig {
    pub mode: BrowserMode,
    /// CDP websocket URL, required for `mode = "connect"`.
    pub cdp_url: Option<String>,
    /// Path to Chrome/Chromium (auto-detected if not set).
    pub chrome_path: Option<String>,
    pub headless: bool,
    /// Additional Chrome arguments.
    pub chrome_args: Vec<String>,
    pub navigation_timeout_ms: u64,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            mode: BrowserMode::Launch,
            cdp_url: None,
            chrome_path: None,
            headless: true,
            chrome_args: Vec::new(),
            navigation_timeout_ms: 30_000,
        }
    }
}

/// Reverse-tunnel settings for remote-browser authentication.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TunnelConfig {
    pub enabled: bool,
    /// Tunnel CLI binary.
    pub binary: String,
    /// Minutes before the tunnel auto-expires.
    pub expiry_minutes: u64,
    /// Seconds to wait for the tunnel to report its public URL.
    pub wait_timeout_secs: u64,
}

impl Default for TunnelConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            binary: "ngrok".into(),
            expiry_minutes: 10,
            wait_timeout_secs: 15,
        }
    }
}

// ── Serde helpers for Secret<String> ────────────────────────────────────────

fn serialize_option_secret<S: serde::Serializer>(
    secret: &Option<Secret<String>>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    match secret {
        Some(s) => serializer.serialize_some(s.expose_secret()),
        None => serializer.serialize_none(),
    }
}
