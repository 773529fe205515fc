use std::net::TcpListener;

use tracing::warn;

/// A TCP port held by some other process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortConflict {
    pub port: u16,
    pub pid: u32,
    pub command: String,
}

impl std::fmt::Display for PortConflict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.command.is_empty() {
            write!(f, "port {} is already in use by pid {}", self.port, self.pid)
        } else {
            write!(
                f,
                "port {} is already in use by pid {} ({})",
                self.port, self.pid, self.command
            )
        }
    }
}

pub fn check_port_available(port: u16) -> bool {
    TcpListener::bind(("127.0.0.1", port)).is_ok()
}

/// Who holds `port`, if anyone. A free port is the common case and yields
/// `None`; so does a bound port whose owner cannot be resolved.
pub fn check_port(port: u16) -> Option<PortConflict> {
    if check_port_available(port) {
        return None;
    }
    match crate::platform::port_owner(port) {
        Some((pid, command)) => Some(PortConflict { port, pid, command }),
        None => {
            warn!(port, "port is bound but its owner could not be identified");
            None
        }
    }
}
