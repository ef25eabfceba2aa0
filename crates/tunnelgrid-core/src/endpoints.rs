//! Endpoint resolution
//!
//! Turns a (host, service-port) pair into the three TCP endpoints a tunnel
//! operates on. Pure; no I/O.

use std::net::SocketAddr;

use tunnelgrid_db::entities::{host, service_port};

use crate::error::TunnelError;

/// The three resolved endpoints of one tunnel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Endpoints {
    /// Listener bound on the remote host by the SSH session.
    pub local: SocketAddr,
    /// SSH endpoint dialed from the manager.
    pub server: SocketAddr,
    /// Service dialed from the manager for each forwarded connection.
    pub remote: SocketAddr,
}

/// Resolve the endpoints for a (host, service-port) pair.
pub fn resolve_endpoints(
    host: &host::Model,
    sp: &service_port::Model,
) -> Result<Endpoints, TunnelError> {
    Ok(Endpoints {
        local: parse_addr("local", format!("0.0.0.0:{}", sp.local_port))?,
        server: parse_addr("server", format!("{}:{}", host.ip, host.port))?,
        remote: parse_addr("remote", format!("{}:{}", sp.service_ip, sp.service_port))?,
    })
}

fn parse_addr(role: &'static str, addr: String) -> Result<SocketAddr, TunnelError> {
    addr.parse()
        .map_err(|source| TunnelError::Address { role, addr, source })
}
