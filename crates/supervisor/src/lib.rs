//! Supervision of the vendor trading gateway subprocess.
//!
//! Brings the gateway from nothing to a `Ready` local HTTPS endpoint:
//! artifact verification, adoption of already-running instances, dynamic
//! port conflict resolution with derived startup configs, stdout/stderr
//! readiness scanning, active health polling, and graceful-then-forced
//! shutdown with best-effort cleanup on every path.

pub mod conf;
pub mod error;
pub mod health;
pub mod port;
pub mod process;
pub mod zombie;

pub use {
    error::SupervisorError,
    health::HealthChecker,
    port::{PortScanResult, find_available_port, is_port_available, scan_port},
    process::{GatewaySettings, GatewayState, GatewaySupervisor},
};
