//! Error types for the tunnel engine

use std::net::{AddrParseError, SocketAddr};

use thiserror::Error;

/// Failures of a single tunnel's lifecycle.
#[derive(Debug, Error)]
pub enum TunnelError {
    /// A configuration string does not parse as a TCP address.
    #[error("invalid {role} address `{addr}`: {source}")]
    Address {
        role: &'static str,
        addr: String,
        source: AddrParseError,
    },

    /// The SSH endpoint could not be reached.
    #[error("SSH dial to {server} failed: {source}")]
    Dial {
        server: SocketAddr,
        source: russh::Error,
    },

    #[error("SSH dial to {server} timed out after {timeout_secs}s")]
    DialTimeout {
        server: SocketAddr,
        timeout_secs: u64,
    },

    /// The host rejected the configured credentials. Not retried: the host
    /// is misconfigured and further attempts would busy-loop.
    #[error("unable to authenticate with {server}: password rejected for user {user}")]
    Auth { server: SocketAddr, user: String },

    /// The keepalive global request failed or timed out.
    #[error("SSH keepalive to {server} failed: {reason}")]
    Keepalive { server: SocketAddr, reason: String },

    /// The remote listener could not be established.
    #[error("remote listen on {local} via {server} failed: {source}")]
    Listen {
        server: SocketAddr,
        local: SocketAddr,
        source: russh::Error,
    },

    /// The runtime was stopped while an attempt was in flight.
    #[error("tunnel is stopped")]
    Stopped,
}

impl TunnelError {
    /// Whether the retry loop should keep driving attempts.
    pub fn is_retriable(&self) -> bool {
        !matches!(
            self,
            TunnelError::Address { .. } | TunnelError::Auth { .. } | TunnelError::Stopped
        )
    }
}

/// Failures of registry-level operations.
#[derive(Debug, Error)]
pub enum ManagerError {
    #[error("tunnel for host {host_id} / service-port {sp_id} already exists")]
    AlreadyExists { host_id: i32, sp_id: i32 },

    #[error("no tunnel registered for host {host_id} / service-port {sp_id}")]
    NotFound { host_id: i32, sp_id: i32 },

    #[error(transparent)]
    Tunnel(#[from] TunnelError),

    #[error("database error: {0}")]
    Database(#[from] sea_orm::DbErr),
}
