//! Tunnel lifecycle engine.
//!
//! One [`TunnelRuntime`] exists per active (host, service-port) pair. It
//! dials the host over SSH, asks it to listen on the configured local port
//! and bridges every forwarded connection to the service address. A
//! supervisor task probes liveness at the monitoring interval and triggers
//! reconnection; the [`TunnelManager`] owns the registry of runtimes and
//! fans operations out over the hosts × service-ports product.

pub mod endpoints;
pub mod error;
pub mod manager;
pub mod persist;
pub mod runtime;
mod supervisor;

pub use endpoints::{resolve_endpoints, Endpoints};
pub use error::{ManagerError, TunnelError};
pub use manager::TunnelManager;
pub use persist::TunnelStatusStore;
pub use runtime::{SshAuth, TunnelKey, TunnelRuntime};
