//! Port-to-process discovery
//!
//! Maps each configured TCP port to the PID that owns the listening socket,
//! by looking the socket inode up in `/proc/net/tcp` (and `tcp6`) and then
//! scanning `/proc/<pid>/fd` for the process holding it. Discovery runs once
//! at startup; the resulting process set is fixed for the run.

use std::path::Path;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, warn};

use crate::MonitoredProcess;

/// TCP socket state code for LISTEN in the proc net tables
const TCP_LISTEN: &str = "0A";

/// Resolve the owning PID for every configured port. Ports that cannot be
/// resolved are logged and skipped, so one dead port never prevents the
/// agent from monitoring the rest.
pub fn resolve_monitored_processes(ports: &[u16]) -> Vec<MonitoredProcess> {
    let mut processes = Vec::with_capacity(ports.len());

    for &port in ports {
        match resolve_pid_from_port(port) {
            Ok(pid) => {
                debug!("resolved port {port} to pid {pid}");
                processes.push(MonitoredProcess { port, pid });
            }
            Err(e) => {
                warn!("could not resolve a process for port {port}: {e:#}");
            }
        }
    }

    processes
}

/// Resolve the PID of the process listening on the given TCP port.
pub fn resolve_pid_from_port(port: u16) -> Result<i32> {
    let inode = ["/proc/net/tcp", "/proc/net/tcp6"]
        .iter()
        .find_map(|table| {
            let content = std::fs::read_to_string(table).ok()?;
            find_listening_inode(&content, port)
        })
        .ok_or_else(|| anyhow!("no process is listening on port {port}"))?;

    find_pid_by_socket_inode(Path::new("/proc"), inode)
        .with_context(|| format!("no readable process owns the socket for port {port}"))
}

/// Find the socket inode of the LISTEN entry for `port` in the content of a
/// proc net table (`/proc/net/tcp` format: the local address is field 1 as
/// `hexip:hexport`, the state is field 3, the inode field 9).
pub fn find_listening_inode(table: &str, port: u16) -> Option<u64> {
    for line in table.lines().skip(1) {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 10 {
            continue;
        }

        let local_port = fields[1]
            .rsplit_once(':')
            .and_then(|(_, hex_port)| u16::from_str_radix(hex_port, 16).ok());

        if local_port == Some(port) && fields[3] == TCP_LISTEN {
            return fields[9].parse::<u64>().ok();
        }
    }

    None
}

/// Scan the fd tables of every process under `proc_root` for a link to
/// `socket:[inode]`. Processes we may not inspect are skipped.
fn find_pid_by_socket_inode(proc_root: &Path, inode: u64) -> Result<i32> {
    let needle = format!("socket:[{inode}]");

    let entries = std::fs::read_dir(proc_root).context("could not read the proc filesystem")?;

    for entry in entries.flatten() {
        let name = entry.file_name();
        let Some(pid) = name.to_str().and_then(|n| n.parse::<i32>().ok()) else {
            continue;
        };

        let fd_dir = entry.path().join("fd");
        let Ok(fds) = std::fs::read_dir(&fd_dir) else {
            continue;
        };

        for fd in fds.flatten() {
            if let Ok(target) = std::fs::read_link(fd.path()) {
                if target.as_os_str() == needle.as_str() {
                    return Ok(pid);
                }
            }
        }
    }

    Err(anyhow!("socket inode {inode} not found in any fd table"))
}
