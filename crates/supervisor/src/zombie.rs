//! Leftover-gateway detection.
//!
//! A gateway spawned by a previous supervisor that exited uncleanly keeps
//! running and holds its port. The sweep matches gateway-identifying
//! substrings (entry class, jar path) against process command lines and
//! logs what it finds at startup and shutdown.

use sysinfo::{ProcessesToUpdate, System};
use tracing::{debug, warn};

/// A process whose command line carries the gateway signature.
#[derive(Debug, Clone)]
pub struct GatewayProcessInfo {
    pub pid: u32,
    pub command: String,
}

/// Scan the process table for gateway-looking processes other than our own.
#[must_use]
pub fn find_gateway_processes(identifiers: &[String]) -> Vec<GatewayProcessInfo> {
    if identifiers.is_empty() {
        return Vec::new();
    }

    let mut sys = System::new();
    sys.refresh_processes(ProcessesToUpdate::All, true);

    let own_pid = std::process::id();
    let mut found = Vec::new();

    for (pid, process) in sys.processes() {
        if pid.as_u32() == own_pid {
            continue;
        }
        let command = process
            .cmd()
            .iter()
            .map(|part| part.to_string_lossy())
            .collect::<Vec<_>>()
            .join(" ");
        if identifiers.iter().any(|id| command.contains(id.as_str())) {
            found.push(GatewayProcessInfo {
                pid: pid.as_u32(),
                command,
            });
        }
    }

    found
}

/// Log gateway processes this supervisor does not own.
///
/// `owned_pid` is the pid of the child we spawned ourselves, if any, so
/// the legitimate instance is not reported as a zombie.
pub fn log_leftover_gateways(identifiers: &[String], owned_pid: Option<u32>) {
    let leftovers: Vec<_> = find_gateway_processes(identifiers)
        .into_iter()
        .filter(|p| Some(p.pid) != owned_pid)
        .collect();

    if leftovers.is_empty() {
        debug!("no leftover gateway processes");
        return;
    }

    for p in &leftovers {
        warn!(
            pid = p.pid,
            command = %p.command,
            "leftover gateway process from a previous run"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_identifiers_find_nothing() {
        assert!(find_gateway_processes(&[]).is_empty());
    }

    #[test]
    fn absurd_identifier_finds_nothing() {
        let found = find_gateway_processes(&["portside-zombie-test-no-such-cmd".into()]);
        assert!(found.is_empty());
    }

    #[test]
    fn own_process_is_excluded() {
        // Our own test binary name appears in our own command line, but
        // the sweep must skip the current pid.
        let exe = std::env::current_exe().unwrap();
        let name = exe.file_name().unwrap().to_string_lossy().into_owned();
        let found = find_gateway_processes(&[name]);
        assert!(found.iter().all(|p| p.pid != std::process::id()));
    }

    #[test]
    fn log_leftovers_does_not_panic() {
        log_leftover_gateways(&["portside-zombie-test-no-such-cmd".into()], Some(1));
    }
}
