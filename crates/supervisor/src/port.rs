//! TCP port probing and occupant identification.
//!
//! Availability is a plain bind probe. Occupant identification asks the
//! occupant itself first: if the port answers like the gateway's HTTPS
//! endpoint, it is one. The process-table heuristic is only a fallback
//! and cannot tie a process to the port, so it stays best-effort.

use std::{net::TcpListener, time::Duration};

use tracing::debug;

use crate::{error::SupervisorError, health::HealthChecker, zombie};

/// Outcome of probing a single port. Ephemeral, produced per probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortScanResult {
    pub port: u16,
    pub available: bool,
    pub occupant_looks_like_gateway: bool,
}

/// Whether the port can currently be bound on the loopback interface.
#[must_use]
pub fn is_port_available(port: u16) -> bool {
    TcpListener::bind(("127.0.0.1", port)).is_ok()
}

/// First free port in `[start, start + max_attempts)`.
///
/// Never returns an occupied port; `PortExhausted` only when the entire
/// range is occupied.
pub fn find_available_port(start: u16, max_attempts: u16) -> Result<u16, SupervisorError> {
    for port in start..start.saturating_add(max_attempts) {
        if is_port_available(port) {
            debug!(port, "found available port");
            return Ok(port);
        }
        debug!(port, "port occupied, trying next");
    }
    Err(SupervisorError::PortExhausted {
        start,
        attempts: max_attempts,
    })
}

/// Probe one port and, when occupied, try to identify the occupant.
///
/// `identifiers` are the gateway-identifying substrings used by the
/// process-table fallback when the endpoint probe is inconclusive.
pub async fn scan_port(port: u16, identifiers: &[String]) -> PortScanResult {
    if is_port_available(port) {
        return PortScanResult {
            port,
            available: true,
            occupant_looks_like_gateway: false,
        };
    }

    let looks_like_gateway = match endpoint_answers_like_gateway(port).await {
        true => true,
        false => {
            // Inconclusive: the occupant may be a gateway still booting.
            // Fall back to scanning the process table for its signature.
            let leftovers = zombie::find_gateway_processes(identifiers);
            !leftovers.is_empty()
        },
    };

    debug!(
        port,
        looks_like_gateway, "port occupied, occupant identification is best-effort"
    );

    PortScanResult {
        port,
        available: false,
        occupant_looks_like_gateway: looks_like_gateway,
    }
}

/// Does the occupant answer like the gateway's local HTTPS endpoint?
async fn endpoint_answers_like_gateway(port: u16) -> bool {
    match HealthChecker::new(port, Duration::from_secs(2)) {
        Ok(checker) => checker.check().await,
        Err(_) => false,
    }
}
