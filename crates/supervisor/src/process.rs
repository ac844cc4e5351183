//! Gateway subprocess lifecycle: spawn, readiness, adoption, shutdown.
//!
//! One live gateway per supervisor. State moves
//! `Idle -> Starting -> Ready | Failed` and `Ready -> Stopped`; a failed
//! or stopped supervisor can be started again. Concurrent `start()` calls
//! serialize on a gate and converge on the in-flight attempt, so two
//! parallel starts never spawn two subprocesses.

use std::{
    path::{Path, PathBuf},
    process::Stdio,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::{Duration, Instant},
};

use {
    tokio::{
        io::{AsyncBufReadExt, AsyncRead, BufReader},
        process::{Child, Command},
        sync::Mutex,
    },
    tracing::{debug, info, warn},
};

use crate::{conf, error::SupervisorError, health::HealthChecker, port, zombie};

/// Lifecycle state of the supervised gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatewayState {
    Idle,
    Starting,
    Ready,
    Failed,
    Stopped,
}

/// Everything the supervisor needs to run one gateway install.
#[derive(Debug, Clone)]
pub struct GatewaySettings {
    /// Install root; working directory for the subprocess.
    pub root_dir: PathBuf,
    /// Startup config, relative to `root_dir`.
    pub conf_path: PathBuf,
    /// Runnable jar, relative to `root_dir`.
    pub jar_path: PathBuf,
    /// Classpath config directory, relative to `root_dir`.
    pub config_dir: PathBuf,
    /// Runtime lib glob appended to the classpath.
    pub lib_glob: String,
    pub main_class: String,
    pub jvm_flags: Vec<String>,
    /// Bundled runtime home; `java` from PATH when unset.
    pub java_home: Option<PathBuf>,
    pub default_port: u16,
    pub port_scan_attempts: u16,
    /// Ports probed for an already-running gateway before spawning.
    pub known_ports: Vec<u16>,
    pub adopt_existing: bool,
    pub readiness_markers: Vec<String>,
    pub process_identifiers: Vec<String>,
    pub stop_grace: Duration,
    pub health_max_attempts: u32,
    pub health_interval: Duration,
    pub health_request_timeout: Duration,
}

impl From<&portside_config::PortsideConfig> for GatewaySettings {
    fn from(cfg: &portside_config::PortsideConfig) -> Self {
        Self {
            root_dir: cfg.gateway.root_dir.clone(),
            conf_path: cfg.gateway.conf_path.clone(),
            jar_path: cfg.gateway.jar_path.clone(),
            config_dir: cfg.gateway.config_dir.clone(),
            lib_glob: cfg.gateway.lib_glob.clone(),
            main_class: cfg.gateway.main_class.clone(),
            jvm_flags: cfg.gateway.jvm_flags.clone(),
            java_home: cfg.gateway.java_home.clone(),
            default_port: cfg.gateway.default_port,
            port_scan_attempts: cfg.gateway.port_scan_attempts,
            known_ports: cfg.gateway.known_ports.clone(),
            adopt_existing: cfg.gateway.adopt_existing,
            readiness_markers: cfg.gateway.readiness_markers.clone(),
            process_identifiers: cfg.gateway.process_identifiers.clone(),
            stop_grace: Duration::from_secs(cfg.gateway.stop_grace_secs),
            health_max_attempts: cfg.health.max_attempts,
            health_interval: Duration::from_millis(cfg.health.interval_ms),
            health_request_timeout: Duration::from_millis(cfg.health.request_timeout_ms),
        }
    }
}

/// A spawned gateway subprocess. At most one per supervisor.
struct GatewayProcess {
    child: Child,
    pid: u32,
    listen_port: u16,
    started_at: Instant,
}

struct Inner {
    state: GatewayState,
    process: Option<GatewayProcess>,
    current_port: Option<u16>,
}

/// Supervises one vendor gateway subprocess.
///
/// Construct once at application start and share by reference; external
/// callers only read the derived accessors and never touch the process
/// handle directly.
pub struct GatewaySupervisor {
    settings: GatewaySettings,
    inner: Mutex<Inner>,
    /// Serializes startup attempts so concurrent starts converge.
    start_gate: Mutex<()>,
    /// Flipped by the output scanners when a readiness marker is seen.
    marker_seen: Arc<AtomicBool>,
    ready: AtomicBool,
}

impl GatewaySupervisor {
    #[must_use]
    pub fn new(settings: GatewaySettings) -> Self {
        Self {
            settings,
            inner: Mutex::new(Inner {
                state: GatewayState::Idle,
                process: None,
                current_port: None,
            }),
            start_gate: Mutex::new(()),
            marker_seen: Arc::new(AtomicBool::new(false)),
            ready: AtomicBool::new(false),
        }
    }

    /// Whether the gateway is currently considered ready.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    pub async fn state(&self) -> GatewayState {
        self.inner.lock().await.state
    }

    /// Port the gateway listens on, once ready.
    pub async fn current_port(&self) -> Option<u16> {
        self.inner.lock().await.current_port
    }

    /// Bring the gateway to `Ready` and return its port.
    ///
    /// Idempotent: when an attempt is already in flight the call blocks
    /// on the same attempt instead of racing its own; when already ready
    /// it returns immediately without spawning.
    pub async fn start(&self) -> Result<u16, SupervisorError> {
        if let Some(port) = self.ready_port().await {
            return Ok(port);
        }
        let _gate = self.start_gate.lock().await;
        // Re-check after the gate: another caller may have finished the
        // startup while we were waiting for it.
        if let Some(port) = self.ready_port().await {
            return Ok(port);
        }
        self.start_locked().await
    }

    /// Fast, non-blocking variant: quick existing-gateway scan, then kick
    /// the full startup onto a background task and return immediately.
    /// `ensure_ready()` later blocks on (or re-triggers) the attempt.
    pub fn start_background(self: &Arc<Self>) {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(e) = this.start().await {
                warn!(error = %e, "background gateway startup failed");
            }
        });
    }

    /// Block until the gateway is ready, re-triggering startup if the
    /// previous attempt failed or the process died in the meantime.
    pub async fn ensure_ready(&self) -> Result<u16, SupervisorError> {
        self.start().await
    }

    /// Stop the gateway: graceful termination signal, bounded grace
    /// window, forced kill. Temp-config removal and the leftover-process
    /// sweep run regardless of which path got us here.
    pub async fn stop(&self) {
        let process = {
            let mut inner = self.inner.lock().await;
            inner.state = GatewayState::Stopped;
            inner.current_port = None;
            inner.process.take()
        };
        self.ready.store(false, Ordering::SeqCst);
        self.marker_seen.store(false, Ordering::SeqCst);

        if let Some(mut p) = process {
            info!(
                pid = p.pid,
                port = p.listen_port,
                uptime_secs = p.started_at.elapsed().as_secs(),
                "stopping gateway"
            );
            send_graceful_term(p.pid).await;
            match tokio::time::timeout(self.settings.stop_grace, p.child.wait()).await {
                Ok(Ok(status)) => debug!(%status, "gateway exited"),
                Ok(Err(e)) => {
                    warn!(error = %e, "waiting for gateway exit failed, force-killing");
                    let _ = p.child.kill().await;
                },
                Err(_) => {
                    warn!(
                        grace_secs = self.settings.stop_grace.as_secs(),
                        "gateway ignored termination signal, force-killing"
                    );
                    let _ = p.child.kill().await;
                },
            }
        }

        self.cleanup().await;
    }

    /// Best-effort cleanup shared by every termination path. Failures are
    /// logged, never propagated.
    async fn cleanup(&self) {
        conf::remove_temp_configs(&self.settings.root_dir.join(&self.settings.conf_path));
        let owned = self.inner.lock().await.process.as_ref().map(|p| p.pid);
        zombie::log_leftover_gateways(&self.settings.process_identifiers, owned);
    }

    /// Current port when ready, reaping a silently-exited child first.
    async fn ready_port(&self) -> Option<u16> {
        let mut inner = self.inner.lock().await;
        if inner.state != GatewayState::Ready {
            return None;
        }
        if let Some(p) = &mut inner.process
            && let Ok(Some(status)) = p.child.try_wait()
        {
            warn!(pid = p.pid, %status, "gateway exited unexpectedly");
            inner.process = None;
            inner.current_port = None;
            inner.state = GatewayState::Failed;
            self.ready.store(false, Ordering::SeqCst);
            return None;
        }
        inner.current_port
    }

    async fn start_locked(&self) -> Result<u16, SupervisorError> {
        {
            let mut inner = self.inner.lock().await;
            inner.state = GatewayState::Starting;
        }
        zombie::log_leftover_gateways(&self.settings.process_identifiers, None);

        let jar = self.settings.root_dir.join(&self.settings.jar_path);
        if !jar.exists() {
            self.fail().await;
            return Err(SupervisorError::GatewayNotFound { path: jar });
        }

        if self.settings.adopt_existing
            && let Some(port) = self.scan_existing().await
        {
            info!(port, "adopted already-running gateway");
            self.mark_ready(port, None).await;
            return Ok(port);
        }

        let (listen_port, temp_config) = self.resolve_port_and_config().await?;

        self.marker_seen.store(false, Ordering::SeqCst);
        let mut child = match self.spawn_child(temp_config.as_deref()) {
            Ok(child) => child,
            Err(e) => {
                self.fail().await;
                return Err(e);
            },
        };
        let pid = child.id().unwrap_or_default();
        info!(pid, listen_port, "gateway process spawned");
        self.attach_output_scanners(&mut child);

        let health = HealthChecker::new(listen_port, self.settings.health_request_timeout)?;
        match self.await_readiness(&mut child, &health).await {
            Ok(()) => {
                info!(pid, listen_port, "gateway is ready");
                self.mark_ready(
                    listen_port,
                    Some(GatewayProcess {
                        child,
                        pid,
                        listen_port,
                        started_at: Instant::now(),
                    }),
                )
                .await;
                Ok(listen_port)
            },
            Err(e) => {
                warn!(pid, listen_port, error = %e, "gateway startup failed, killing subprocess");
                let _ = child.kill().await;
                self.fail().await;
                self.cleanup().await;
                Err(e)
            },
        }
    }

    async fn fail(&self) {
        let mut inner = self.inner.lock().await;
        inner.state = GatewayState::Failed;
        inner.current_port = None;
        self.ready.store(false, Ordering::SeqCst);
    }

    async fn mark_ready(&self, port: u16, process: Option<GatewayProcess>) {
        let mut inner = self.inner.lock().await;
        inner.state = GatewayState::Ready;
        inner.current_port = Some(port);
        inner.process = process;
        self.ready.store(true, Ordering::SeqCst);
    }

    /// Probe the likely ports for a gateway left running by a previous
    /// invocation (plugin hosts restart us without restarting it).
    async fn scan_existing(&self) -> Option<u16> {
        for &p in &self.settings.known_ports {
            let Ok(checker) = HealthChecker::new(p, self.settings.health_request_timeout) else {
                continue;
            };
            if checker.check().await {
                return Some(p);
            }
        }
        None
    }

    /// Pick the listen port, deriving a port-specific config when the
    /// default is occupied. Port exhaustion degrades to the default port
    /// rather than failing the startup outright.
    async fn resolve_port_and_config(&self) -> Result<(u16, Option<PathBuf>), SupervisorError> {
        let default_port = self.settings.default_port;
        let scan = port::scan_port(default_port, &self.settings.process_identifiers).await;
        if scan.available {
            return Ok((default_port, None));
        }

        info!(
            port = default_port,
            occupant_looks_like_gateway = scan.occupant_looks_like_gateway,
            "default port occupied, resolving an alternate"
        );
        match port::find_available_port(default_port + 1, self.settings.port_scan_attempts) {
            Ok(alt) => {
                let original = self.settings.root_dir.join(&self.settings.conf_path);
                let derived = conf::with_port(&original, alt)?;
                // The subprocess gets the config path relative to its
                // working directory, like the original.
                let rel = match (self.settings.conf_path.parent(), derived.file_name()) {
                    (Some(parent), Some(name)) => parent.join(name),
                    _ => derived.clone(),
                };
                info!(port = alt, config = %rel.display(), "using alternate port");
                Ok((alt, Some(rel)))
            },
            Err(e) => {
                warn!(
                    error = %e,
                    port = default_port,
                    "port scan exhausted, degrading to the default port anyway"
                );
                Ok((default_port, None))
            },
        }
    }

    fn spawn_child(&self, temp_config: Option<&Path>) -> Result<Child, SupervisorError> {
        let java = self.resolve_java()?;
        let classpath = self.build_classpath();
        let conf_arg = temp_config.unwrap_or(&self.settings.conf_path);

        let mut cmd = Command::new(&java);
        cmd.current_dir(&self.settings.root_dir)
            .args(&self.settings.jvm_flags)
            .arg("-cp")
            .arg(&classpath)
            .arg(&self.settings.main_class)
            .arg("--conf")
            .arg(conf_arg)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(home) = &self.settings.java_home {
            cmd.env("JAVA_HOME", home);
        }

        debug!(
            java = %java.display(),
            classpath,
            conf = %conf_arg.display(),
            "spawning gateway"
        );
        cmd.spawn()
            .map_err(|e| SupervisorError::SpawnFailed(format!("{}: {e}", java.display())))
    }

    fn resolve_java(&self) -> Result<PathBuf, SupervisorError> {
        if let Some(home) = &self.settings.java_home {
            let bin = if cfg!(windows) { "java.exe" } else { "java" };
            let java = home.join("bin").join(bin);
            if java.exists() {
                return Ok(java);
            }
            return Err(SupervisorError::SpawnFailed(format!(
                "no java runtime under {}",
                home.display()
            )));
        }
        which::which("java").map_err(|_| {
            SupervisorError::SpawnFailed(
                "java not found on PATH; set gateway.java_home to a bundled runtime".into(),
            )
        })
    }

    fn build_classpath(&self) -> String {
        let sep = if cfg!(windows) { ";" } else { ":" };
        [
            self.settings.config_dir.to_string_lossy().into_owned(),
            self.settings.jar_path.to_string_lossy().into_owned(),
            self.settings.lib_glob.clone(),
        ]
        .join(sep)
    }

    /// Scan both output streams for readiness markers. The scanners also
    /// forward gateway output into our logs at debug level.
    fn attach_output_scanners(&self, child: &mut Child) {
        if let Some(stdout) = child.stdout.take() {
            spawn_line_scanner(
                stdout,
                "stdout",
                self.settings.readiness_markers.clone(),
                Arc::clone(&self.marker_seen),
            );
        }
        if let Some(stderr) = child.stderr.take() {
            spawn_line_scanner(
                stderr,
                "stderr",
                self.settings.readiness_markers.clone(),
                Arc::clone(&self.marker_seen),
            );
        }
    }

    /// Wait until either readiness signal fires: the stdout marker or the
    /// health endpoint. Exhausting the budget is a `StartupTimeout`; the
    /// child dying first is a `SpawnFailed`.
    async fn await_readiness(
        &self,
        child: &mut Child,
        health: &HealthChecker,
    ) -> Result<(), SupervisorError> {
        let started = Instant::now();
        for _attempt in 1..=self.settings.health_max_attempts {
            if self.marker_seen.load(Ordering::SeqCst) {
                debug!("readiness marker observed");
                return Ok(());
            }
            if let Some(status) = child.try_wait()? {
                return Err(SupervisorError::SpawnFailed(format!(
                    "gateway exited during startup: {status}"
                )));
            }
            if health.check().await {
                return Ok(());
            }
            tokio::time::sleep(self.settings.health_interval).await;
        }
        Err(SupervisorError::StartupTimeout {
            waited_secs: started.elapsed().as_secs(),
        })
    }
}

fn spawn_line_scanner(
    stream: impl AsyncRead + Unpin + Send + 'static,
    name: &'static str,
    markers: Vec<String>,
    seen: Arc<AtomicBool>,
) {
    tokio::spawn(async move {
        let mut reader = BufReader::new(stream);
        let mut line = String::new();
        loop {
            line.clear();
            match reader.read_line(&mut line).await {
                Ok(0) => break,
                Ok(_) => {
                    let trimmed = line.trim();
                    if trimmed.is_empty() {
                        continue;
                    }
                    debug!(stream = name, line = %trimmed, "gateway output");
                    if markers.iter().any(|m| trimmed.contains(m.as_str())) {
                        info!(stream = name, line = %trimmed, "readiness marker observed");
                        seen.store(true, Ordering::SeqCst);
                    }
                },
                Err(e) => {
                    debug!(stream = name, error = %e, "gateway output stream closed");
                    break;
                },
            }
        }
    });
}

/// Ask the child to terminate gracefully. SIGKILL comes later if it
/// ignores this.
async fn send_graceful_term(pid: u32) {
    #[cfg(unix)]
    let result = Command::new("kill")
        .args(["-TERM", &pid.to_string()])
        .output()
        .await;
    #[cfg(windows)]
    let result = Command::new("taskkill")
        .args(["/PID", &pid.to_string()])
        .output()
        .await;

    if let Err(e) = result {
        warn!(pid, error = %e, "failed to send graceful termination signal");
    }
}

#[cfg(all(test, unix))]
mod tests {
    use std::os::unix::fs::PermissionsExt;

    use super::*;

    /// A fake gateway install whose "java" is a shell script.
    fn fake_install(script_body: &str) -> (tempfile::TempDir, GatewaySettings) {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();

        std::fs::create_dir_all(root.join("root")).unwrap();
        std::fs::write(root.join("root/conf.yaml"), "listenPort: 5000\n").unwrap();
        std::fs::create_dir_all(root.join("dist")).unwrap();
        std::fs::write(root.join("dist/gateway.jar"), b"jar").unwrap();

        std::fs::create_dir_all(root.join("jre/bin")).unwrap();
        let java = root.join("jre/bin/java");
        std::fs::write(&java, format!("#!/bin/sh\n{script_body}\n")).unwrap();
        std::fs::set_permissions(&java, std::fs::Permissions::from_mode(0o755)).unwrap();

        let default_port = {
            let l = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            l.local_addr().unwrap().port()
        };

        let settings = GatewaySettings {
            root_dir: root.to_path_buf(),
            conf_path: PathBuf::from("root/conf.yaml"),
            jar_path: PathBuf::from("dist/gateway.jar"),
            config_dir: PathBuf::from("root"),
            lib_glob: "build/lib/runtime/*".into(),
            main_class: "gateway.web.Launcher".into(),
            jvm_flags: vec!["-server".into()],
            java_home: Some(root.join("jre")),
            default_port,
            port_scan_attempts: 5,
            known_ports: Vec::new(),
            adopt_existing: false,
            readiness_markers: vec!["GATEWAY READY".into()],
            process_identifiers: vec!["portside-test-no-such-process".into()],
            stop_grace: Duration::from_millis(500),
            health_max_attempts: 50,
            health_interval: Duration::from_millis(50),
            health_request_timeout: Duration::from_millis(200),
        };

        (dir, settings)
    }

    #[tokio::test]
    async fn missing_jar_is_gateway_not_found() {
        let (dir, mut settings) = fake_install("true");
        settings.jar_path = PathBuf::from("dist/missing.jar");
        let supervisor = GatewaySupervisor::new(settings);

        match supervisor.start().await {
            Err(SupervisorError::GatewayNotFound { path }) => {
                assert!(path.starts_with(dir.path()));
            },
            other => panic!("expected GatewayNotFound, got {other:?}"),
        }
        assert_eq!(supervisor.state().await, GatewayState::Failed);
        assert!(!supervisor.is_ready());
    }

    #[tokio::test]
    async fn readiness_marker_flips_ready_until_stop() {
        let (_dir, settings) = fake_install(r#"echo "GATEWAY READY"; sleep 30"#);
        let expected_port = settings.default_port;
        let supervisor = GatewaySupervisor::new(settings);

        let port = supervisor.start().await.unwrap();
        assert_eq!(port, expected_port);
        assert!(supervisor.is_ready());
        assert_eq!(supervisor.state().await, GatewayState::Ready);
        assert_eq!(supervisor.current_port().await, Some(port));

        supervisor.stop().await;
        assert!(!supervisor.is_ready());
        assert_eq!(supervisor.state().await, GatewayState::Stopped);
        assert_eq!(supervisor.current_port().await, None);
    }

    #[tokio::test]
    async fn concurrent_starts_spawn_one_subprocess() {
        let (dir, settings) = fake_install(
            r#"echo run >> "$0.spawns"; echo "GATEWAY READY"; sleep 30"#,
        );
        let supervisor = Arc::new(GatewaySupervisor::new(settings));

        let a = {
            let s = Arc::clone(&supervisor);
            tokio::spawn(async move { s.start().await })
        };
        let b = {
            let s = Arc::clone(&supervisor);
            tokio::spawn(async move { s.start().await })
        };
        let (ra, rb) = (a.await.unwrap(), b.await.unwrap());
        assert_eq!(ra.unwrap(), rb.unwrap());

        let spawns = std::fs::read_to_string(dir.path().join("jre/bin/java.spawns")).unwrap();
        assert_eq!(spawns.lines().count(), 1, "exactly one subprocess spawn");

        supervisor.stop().await;
    }

    #[tokio::test]
    async fn background_start_converges_with_ensure_ready() {
        let (_dir, settings) = fake_install(r#"echo "GATEWAY READY"; sleep 30"#);
        let supervisor = Arc::new(GatewaySupervisor::new(settings));

        supervisor.start_background();
        let port = supervisor.ensure_ready().await.unwrap();
        assert_eq!(supervisor.current_port().await, Some(port));
        assert!(supervisor.is_ready());
        supervisor.stop().await;
    }

    #[tokio::test]
    async fn stop_force_kills_a_term_ignoring_child() {
        let (_dir, settings) = fake_install(
            "trap '' TERM\necho \"GATEWAY READY\"\nwhile true; do sleep 1; done",
        );
        let grace = settings.stop_grace;
        let supervisor = GatewaySupervisor::new(settings);
        supervisor.start().await.unwrap();

        let begun = Instant::now();
        supervisor.stop().await;
        assert!(begun.elapsed() < grace + Duration::from_secs(3));
        assert_eq!(supervisor.state().await, GatewayState::Stopped);
    }

    #[tokio::test]
    async fn no_readiness_signal_times_out() {
        let (_dir, mut settings) = fake_install("sleep 30");
        settings.health_max_attempts = 3;
        let supervisor = GatewaySupervisor::new(settings);

        match supervisor.start().await {
            Err(SupervisorError::StartupTimeout { .. }) => {},
            other => panic!("expected StartupTimeout, got {other:?}"),
        }
        assert_eq!(supervisor.state().await, GatewayState::Failed);
        assert!(!supervisor.is_ready());
    }

    #[tokio::test]
    async fn early_exit_is_a_spawn_failure() {
        let (_dir, settings) = fake_install("exit 3");
        let supervisor = GatewaySupervisor::new(settings);

        match supervisor.start().await {
            Err(SupervisorError::SpawnFailed(msg)) => {
                assert!(msg.contains("exited during startup"), "{msg}");
            },
            other => panic!("expected SpawnFailed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn broken_runtime_home_is_a_spawn_failure() {
        let (dir, mut settings) = fake_install("true");
        settings.java_home = Some(dir.path().join("no-such-jre"));
        let supervisor = GatewaySupervisor::new(settings);

        match supervisor.start().await {
            Err(SupervisorError::SpawnFailed(msg)) => assert!(msg.contains("no java runtime")),
            other => panic!("expected SpawnFailed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn occupied_default_port_gets_a_derived_config() {
        let (dir, settings) = fake_install(r#"echo "GATEWAY READY"; sleep 30"#);
        let default_port = settings.default_port;
        let _occupant = std::net::TcpListener::bind(("127.0.0.1", default_port)).unwrap();
        let supervisor = GatewaySupervisor::new(settings);

        let port = supervisor.start().await.unwrap();
        assert_ne!(port, default_port);

        let derived = dir.path().join(format!("root/conf-{port}.yaml"));
        assert!(derived.exists());
        let out = std::fs::read_to_string(&derived).unwrap();
        assert!(out.contains(&format!("listenPort: {port}")));

        supervisor.stop().await;
        assert!(!derived.exists(), "derived config removed on shutdown");
    }

    #[tokio::test]
    async fn failed_start_can_be_retried() {
        let (dir, mut settings) = fake_install("sleep 30");
        settings.health_max_attempts = 2;
        let supervisor = GatewaySupervisor::new(settings);

        assert!(supervisor.start().await.is_err());
        assert_eq!(supervisor.state().await, GatewayState::Failed);

        // Swap in a script that reaches readiness, then retry.
        let java = dir.path().join("jre/bin/java");
        std::fs::write(&java, "#!/bin/sh\necho \"GATEWAY READY\"; sleep 30\n").unwrap();
        std::fs::set_permissions(&java, std::fs::Permissions::from_mode(0o755)).unwrap();

        assert!(supervisor.start().await.is_ok());
        assert!(supervisor.is_ready());
        supervisor.stop().await;
    }

    #[tokio::test]
    async fn ensure_ready_restarts_a_dead_gateway() {
        let (_dir, settings) = fake_install(r#"echo "GATEWAY READY"; sleep 30"#);
        let supervisor = GatewaySupervisor::new(settings);
        let port = supervisor.start().await.unwrap();

        // Kill the child behind the supervisor's back.
        let pid = {
            let inner = supervisor.inner.lock().await;
            inner.process.as_ref().map(|p| p.pid).unwrap()
        };
        Command::new("kill")
            .args(["-KILL", &pid.to_string()])
            .output()
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        let again = supervisor.ensure_ready().await.unwrap();
        assert_eq!(again, port);
        assert!(supervisor.is_ready());
        supervisor.stop().await;
    }
}
