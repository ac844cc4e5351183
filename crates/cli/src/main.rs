use std::{sync::Arc, time::Duration};

use {
    clap::{Parser, Subcommand},
    tracing::{info, warn},
    tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt},
};

use {
    portside_auth::StatusProbe,
    portside_config::PortsideConfig,
    portside_service::{GatewayService, GatewayStatusProbe},
    portside_supervisor::HealthChecker,
};

#[derive(Parser)]
#[command(
    name = "portside",
    about = "Portside supervises the local trading gateway and keeps it logged in"
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Output logs as JSON instead of human-readable.
    #[arg(long, global = true, default_value_t = false)]
    json_logs: bool,

    /// Config file path (overrides discovery).
    #[arg(long, global = true, env = "PORTSIDE_CONFIG")]
    config: Option<std::path::PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the gateway, authenticate, and supervise until interrupted
    /// (default when no subcommand is provided).
    Run,
    /// Run one authentication attempt and print the outcome.
    Auth,
    /// Report gateway liveness and authentication state.
    Status,
    /// Check the local install: gateway artifact, Java runtime, browser,
    /// tunnel CLI.
    Doctor,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_telemetry(&cli);

    let config = portside_config::discover_and_load(cli.config.as_deref())?;

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run(config).await,
        Commands::Auth => auth_once(config).await,
        Commands::Status => status(config).await,
        Commands::Doctor => doctor(&config),
    }
}

fn init_telemetry(cli: &Cli) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "{},hyper=warn,reqwest=warn,chromiumoxide=warn",
            cli.log_level
        ))
    });

    let registry = tracing_subscriber::registry().with(filter);

    if cli.json_logs {
        registry
            .with(fmt::layer().json().with_target(true).with_thread_ids(false))
            .init();
    } else {
        registry
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_ansi(true),
            )
            .init();
    }
}

/// Supervise until interrupted. Every exit path, including signals during
/// startup, funnels through the service's idempotent shutdown.
async fn run(config: PortsideConfig) -> anyhow::Result<()> {
    let service = Arc::new(GatewayService::new(config));

    let work = async {
        let port = service.ensure_gateway_ready().await?;
        info!(port, "gateway is ready");

        let outcome = service.ensure_authenticated().await;
        if outcome.success {
            info!(message = %outcome.message, "gateway authenticated");
        } else {
            warn!(
                message = %outcome.message,
                error_kind = ?outcome.error_kind,
                "automated authentication failed"
            );
        }
        anyhow::Ok(())
    };

    let interrupted;
    let result = tokio::select! {
        result = work => {
            interrupted = false;
            result
        },
        () = shutdown_signal() => {
            interrupted = true;
            info!("interrupted, shutting down");
            Ok(())
        },
    };

    if result.is_ok() && !interrupted {
        // Keep supervising until the user stops us.
        shutdown_signal().await;
        info!("shutdown requested");
    }

    service.shutdown().await;
    result
}

async fn auth_once(config: PortsideConfig) -> anyhow::Result<()> {
    let service = GatewayService::new(config);
    let outcome = service.ensure_authenticated().await;
    println!("{}", serde_json::to_string_pretty(&outcome)?);
    service.shutdown().await;
    if !outcome.success {
        anyhow::bail!("authentication failed: {}", outcome.message);
    }
    Ok(())
}

/// Read-only: probes the likely ports without touching any process.
async fn status(config: PortsideConfig) -> anyhow::Result<()> {
    let request_timeout = Duration::from_millis(config.health.request_timeout_ms);
    let mut ports = config.gateway.known_ports.clone();
    if !ports.contains(&config.gateway.default_port) {
        ports.insert(0, config.gateway.default_port);
    }

    for port in ports {
        let checker = HealthChecker::new(port, request_timeout)?;
        if !checker.check().await {
            continue;
        }
        let authenticated = GatewayStatusProbe::for_gateway(
            port,
            &config.auth.status_path,
            request_timeout,
        )?
        .authenticated()
        .await
        .unwrap_or(false);
        println!("gateway: running on port {port}, authenticated: {authenticated}");
        return Ok(());
    }

    println!("gateway: not running");
    Ok(())
}

fn doctor(config: &PortsideConfig) -> anyhow::Result<()> {
    let mut all_ok = true;

    let jar = config.gateway.root_dir.join(&config.gateway.jar_path);
    all_ok &= report("gateway artifact", jar.exists(), &jar.display().to_string());

    let (java_ok, java_detail) = match &config.gateway.java_home {
        Some(home) => {
            let bin = if cfg!(windows) { "java.exe" } else { "java" };
            let java = home.join("bin").join(bin);
            (java.exists(), java.display().to_string())
        },
        None => match which::which("java") {
            Ok(path) => (true, path.display().to_string()),
            Err(_) => (false, "java not on PATH (set gateway.java_home)".into()),
        },
    };
    all_ok &= report("java runtime", java_ok, &java_detail);

    let chrome = ["google-chrome", "google-chrome-stable", "chromium", "chromium-browser", "chrome"]
        .iter()
        .find_map(|name| which::which(name).ok());
    // Only needed for launch mode; connect mode uses a remote browser.
    let chrome_required = matches!(config.browser.mode, portside_config::BrowserMode::Launch);
    match (&chrome, chrome_required) {
        (Some(path), _) => {
            report("browser", true, &path.display().to_string());
        },
        (None, true) => {
            all_ok &= report("browser", false, "no Chrome/Chromium on PATH");
        },
        (None, false) => {
            report("browser", true, "remote (browser.cdp_url)");
        },
    }

    let tunnel_detail = match which::which(&config.tunnel.binary) {
        Ok(path) => (true, path.display().to_string()),
        Err(_) => (
            false,
            format!("{} not on PATH (only needed for remote-browser auth)", config.tunnel.binary),
        ),
    };
    // Informational: the tunnel is optional unless the browser is remote.
    report("tunnel cli", tunnel_detail.0, &tunnel_detail.1);

    if !all_ok {
        anyhow::bail!("doctor found problems");
    }
    println!("all checks passed");
    Ok(())
}

fn report(what: &str, ok: bool, detail: &str) -> bool {
    let mark = if ok { "ok" } else { "MISSING" };
    println!("{what:18} {mark:8} {detail}");
    ok
}

/// Resolves when the process is asked to stop (Ctrl-C, or SIGTERM on
/// unix).
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        let mut term = match signal(SignalKind::terminate()) {
            Ok(term) => term,
            Err(e) => {
                warn!(error = %e, "failed to install SIGTERM handler");
                let _ = tokio::signal::ctrl_c().await;
                return;
            },
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {},
            _ = term.recv() => {},
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
