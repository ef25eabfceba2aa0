//! Tunnel manager - the process-wide registry of running tunnels
//!
//! Keeps one [`TunnelRuntime`] per (host, service-port) pair, serializes
//! create/stop/restore operations behind a registry lock and fans teardown
//! and recovery out over the hosts × service-ports product.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use tunnelgrid_db::entities::{host, service_port, tunnel};
use tunnelgrid_db::Store;

use crate::endpoints::resolve_endpoints;
use crate::error::ManagerError;
use crate::persist::TunnelStatusStore;
use crate::runtime::{SshAuth, TunnelKey, TunnelRuntime};

struct RegisteredTunnel {
    runtime: Arc<TunnelRuntime>,
    // The start task exits on the runtime's stop signal.
    _task: Option<JoinHandle<()>>,
}

/// Registry of running tunnels.
pub struct TunnelManager {
    store: Arc<Store>,
    monitoring_interval: Duration,
    registry: RwLock<HashMap<TunnelKey, RegisteredTunnel>>,
}

impl TunnelManager {
    pub fn new(store: Arc<Store>, monitoring_interval: Duration) -> Self {
        Self {
            store,
            monitoring_interval,
            registry: RwLock::new(HashMap::new()),
        }
    }

    /// Register and launch the tunnel for (host, sp).
    ///
    /// The registry entry is inserted before the record upsert so a
    /// concurrent duplicate start is rejected before any durable write.
    pub async fn start_tunnel(
        &self,
        host: &host::Model,
        sp: &service_port::Model,
    ) -> Result<(), ManagerError> {
        let key = TunnelKey::new(host.id, sp.id);

        let mut registry = self.registry.write().await;
        if registry.contains_key(&key) {
            return Err(ManagerError::AlreadyExists {
                host_id: key.host_id,
                sp_id: key.sp_id,
            });
        }

        let endpoints = resolve_endpoints(host, sp)?;
        let auth = SshAuth {
            user: host.user.clone(),
            password: host.password.clone(),
        };
        let persist: Arc<dyn TunnelStatusStore> = self.store.clone();
        let runtime = Arc::new(TunnelRuntime::new(key, endpoints, auth, persist));

        registry.insert(
            key,
            RegisteredTunnel {
                runtime: Arc::clone(&runtime),
                _task: None,
            },
        );

        // The initial record goes through the runtime's injected persistence
        // handle; the manager never writes tunnel records itself.
        if let Err(err) = runtime.upsert_starting().await {
            registry.remove(&key);
            return Err(err.into());
        }

        let monitoring_interval = self.monitoring_interval;
        let task = tokio::spawn(async move {
            runtime.start(monitoring_interval).await;
        });
        if let Some(entry) = registry.get_mut(&key) {
            entry._task = Some(task);
        }

        info!(tunnel = %key, server = %endpoints.server, "tunnel registered");
        Ok(())
    }

    /// Stop the tunnel for (host_id, sp_id) and remove it from the registry.
    pub async fn stop_tunnel(&self, host_id: i32, sp_id: i32) -> Result<(), ManagerError> {
        let key = TunnelKey::new(host_id, sp_id);

        let mut registry = self.registry.write().await;
        let Some(entry) = registry.remove(&key) else {
            return Err(ManagerError::NotFound { host_id, sp_id });
        };

        entry.runtime.stop().await;

        info!(tunnel = %key, "tunnel unregistered");
        Ok(())
    }

    /// Snapshot of every tunnel record.
    pub async fn get_all_tunnels(&self) -> Result<Vec<tunnel::Model>, ManagerError> {
        Ok(self.store.list_tunnels().await?)
    }

    /// Snapshot of one host's tunnel records.
    pub async fn get_host_tunnels(&self, host_id: i32) -> Result<Vec<tunnel::Model>, ManagerError> {
        Ok(self.store.list_host_tunnels(host_id).await?)
    }

    /// Crash-restart recovery: purge stale tunnel records and relaunch the
    /// fleet from the host and service-port tables.
    ///
    /// Intended for startup only; pairs that are already registered are
    /// skipped with a warning.
    pub async fn restore_all_tunnels(&self) -> Result<(), ManagerError> {
        let (hosts, service_ports) = {
            let _registry = self.registry.write().await;
            (
                self.store.list_hosts().await?,
                self.store.list_service_ports().await?,
            )
        };

        if hosts.is_empty() || service_ports.is_empty() {
            info!("no hosts or service-ports configured, nothing to restore");
            return Ok(());
        }

        for host in &hosts {
            if let Err(err) = self.store.delete_host_tunnels(host.id).await {
                warn!(host_id = host.id, error = %err, "failed to purge stale tunnel records");
            }
            if !host.enabled {
                continue;
            }
            for sp in &service_ports {
                if let Err(err) = self.start_tunnel(host, sp).await {
                    error!(
                        host_ip = %host.ip,
                        service_port = sp.service_port,
                        error = %err,
                        "failed to restore tunnel"
                    );
                }
            }
        }

        Ok(())
    }

    /// Tear the whole fleet down, deleting every tunnel record.
    pub async fn stop_all_tunnels(&self) {
        let hosts = match self.store.list_hosts().await {
            Ok(hosts) => hosts,
            Err(err) => {
                error!(error = %err, "failed to fetch hosts");
                return;
            }
        };
        let service_ports = match self.store.list_service_ports().await {
            Ok(sps) => sps,
            Err(err) => {
                error!(error = %err, "failed to fetch service-ports");
                return;
            }
        };

        for host in &hosts {
            for sp in &service_ports {
                if let Err(err) = self.store.delete_tunnel(host.id, sp.id).await {
                    warn!(host_id = host.id, sp_id = sp.id, error = %err,
                        "failed to delete tunnel record");
                }
                match self.stop_tunnel(host.id, sp.id).await {
                    Ok(()) | Err(ManagerError::NotFound { .. }) => {}
                    Err(err) => {
                        warn!(host_id = host.id, sp_id = sp.id, error = %err,
                            "failed to stop tunnel");
                    }
                }
            }
        }
    }

    /// Number of registered runtimes.
    pub async fn registered_count(&self) -> usize {
        self.registry.read().await.len()
    }

    /// Whether a runtime is registered for (host_id, sp_id).
    pub async fn is_registered(&self, host_id: i32, sp_id: i32) -> bool {
        self.registry
            .read()
            .await
            .contains_key(&TunnelKey::new(host_id, sp_id))
    }
}
