//! Integration tests for the tunnel manager and runtime
//!
//! Uses an in-memory SQLite store; SSH endpoints point at closed local
//! ports, so connect attempts fail fast and the lifecycle paths around
//! failure, retry and stop can be observed without a real host.

use std::sync::Arc;
use std::time::Duration;

use tunnelgrid_core::{
    resolve_endpoints, ManagerError, SshAuth, TunnelKey, TunnelRuntime, TunnelStatusStore,
    TunnelManager,
};
use tunnelgrid_db::entities::tunnel::TunnelStatus;
use tunnelgrid_db::entities::{host, service_port};
use tunnelgrid_db::{connect, migrate, NewHost, NewServicePort, Store};

async fn setup_store() -> Arc<Store> {
    let db = connect("sqlite::memory:")
        .await
        .expect("Failed to connect to in-memory database");
    migrate(&db).await.expect("Failed to run migrations");
    Arc::new(Store::new(db))
}

async fn seed_host(store: &Store, ip: &str, enabled: bool) -> host::Model {
    store
        .create_host(NewHost {
            ip: ip.to_string(),
            // Nothing listens on port 1, so dials are refused immediately.
            port: 1,
            user: "root".to_string(),
            password: "secret".to_string(),
            description: None,
            enabled,
        })
        .await
        .expect("Failed to create host")
}

async fn seed_service_port(store: &Store, service_port: i32, local_port: i32) -> service_port::Model {
    store
        .create_service_port(NewServicePort {
            service_ip: "127.0.0.1".to_string(),
            service_port,
            local_port,
            description: None,
        })
        .await
        .expect("Failed to create service port")
}

/// Poll until `predicate` holds for the (host, sp) tunnel record.
async fn wait_for_record(
    store: &Store,
    host_id: i32,
    sp_id: i32,
    predicate: impl Fn(&tunnelgrid_db::entities::tunnel::Model) -> bool,
) {
    for _ in 0..100 {
        if let Some(record) = store.get_tunnel(host_id, sp_id).await.unwrap() {
            if predicate(&record) {
                return;
            }
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("tunnel record never reached the expected state");
}

#[tokio::test]
async fn start_tunnel_registers_and_writes_starting_record() {
    let store = setup_store().await;
    let manager = TunnelManager::new(Arc::clone(&store), Duration::from_secs(1));

    let host = seed_host(&store, "127.0.0.1", true).await;
    let sp = seed_service_port(&store, 8080, 18080).await;

    manager.start_tunnel(&host, &sp).await.unwrap();

    assert_eq!(manager.registered_count().await, 1);
    assert!(manager.is_registered(host.id, sp.id).await);

    let record = store.get_tunnel(host.id, sp.id).await.unwrap().unwrap();
    assert_eq!(record.server, "127.0.0.1:1");
    assert_eq!(record.local, "0.0.0.0:18080");
    assert_eq!(record.remote, "127.0.0.1:8080");
}

#[tokio::test]
async fn duplicate_start_is_rejected() {
    let store = setup_store().await;
    let manager = TunnelManager::new(Arc::clone(&store), Duration::from_secs(1));

    let host = seed_host(&store, "127.0.0.1", true).await;
    let sp = seed_service_port(&store, 8080, 18080).await;

    manager.start_tunnel(&host, &sp).await.unwrap();
    let err = manager.start_tunnel(&host, &sp).await.unwrap_err();

    assert!(matches!(err, ManagerError::AlreadyExists { .. }));
    assert_eq!(manager.registered_count().await, 1);
}

#[tokio::test]
async fn stop_tunnel_removes_registration_and_record() {
    let store = setup_store().await;
    let manager = TunnelManager::new(Arc::clone(&store), Duration::from_secs(1));

    let host = seed_host(&store, "127.0.0.1", true).await;
    let sp = seed_service_port(&store, 8080, 18080).await;

    manager.start_tunnel(&host, &sp).await.unwrap();
    manager.stop_tunnel(host.id, sp.id).await.unwrap();

    assert_eq!(manager.registered_count().await, 0);
    assert!(store.get_tunnel(host.id, sp.id).await.unwrap().is_none());

    let err = manager.stop_tunnel(host.id, sp.id).await.unwrap_err();
    assert!(matches!(err, ManagerError::NotFound { .. }));
}

#[tokio::test]
async fn stop_unknown_tunnel_is_not_found() {
    let store = setup_store().await;
    let manager = TunnelManager::new(Arc::clone(&store), Duration::from_secs(1));

    let err = manager.stop_tunnel(42, 7).await.unwrap_err();
    assert!(matches!(
        err,
        ManagerError::NotFound {
            host_id: 42,
            sp_id: 7
        }
    ));
}

#[tokio::test]
async fn restore_fans_out_over_enabled_hosts_and_purges_stale_records() {
    let store = setup_store().await;
    let manager = TunnelManager::new(Arc::clone(&store), Duration::from_secs(1));

    let enabled = seed_host(&store, "127.0.0.1", true).await;
    let disabled = seed_host(&store, "127.0.0.2", false).await;
    let sp_a = seed_service_port(&store, 8080, 18080).await;
    let sp_b = seed_service_port(&store, 8081, 18081).await;
    let sp_c = seed_service_port(&store, 8082, 18082).await;

    // Stale record left behind by a previous run of the process.
    store
        .upsert_tunnel(disabled.id, sp_a.id, "stale", "stale", "stale")
        .await
        .unwrap();

    manager.restore_all_tunnels().await.unwrap();

    assert_eq!(manager.registered_count().await, 3);
    for sp in [&sp_a, &sp_b, &sp_c] {
        assert!(manager.is_registered(enabled.id, sp.id).await);
        assert!(!manager.is_registered(disabled.id, sp.id).await);
    }

    // The disabled host's stale record is gone; the enabled host has fresh
    // records for every service-port.
    assert!(store.list_host_tunnels(disabled.id).await.unwrap().is_empty());
    assert_eq!(store.list_host_tunnels(enabled.id).await.unwrap().len(), 3);
}

#[tokio::test]
async fn restore_with_no_hosts_is_a_noop() {
    let store = setup_store().await;
    let manager = TunnelManager::new(Arc::clone(&store), Duration::from_secs(1));

    seed_service_port(&store, 8080, 18080).await;

    manager.restore_all_tunnels().await.unwrap();
    assert_eq!(manager.registered_count().await, 0);
}

#[tokio::test]
async fn restore_with_no_service_ports_is_a_noop() {
    let store = setup_store().await;
    let manager = TunnelManager::new(Arc::clone(&store), Duration::from_secs(1));

    seed_host(&store, "127.0.0.1", true).await;

    manager.restore_all_tunnels().await.unwrap();
    assert_eq!(manager.registered_count().await, 0);
}

#[tokio::test]
async fn stop_all_drains_registry_and_records() {
    let store = setup_store().await;
    let manager = TunnelManager::new(Arc::clone(&store), Duration::from_secs(1));

    let host_a = seed_host(&store, "127.0.0.1", true).await;
    let host_b = seed_host(&store, "127.0.0.2", true).await;
    let sp_a = seed_service_port(&store, 8080, 18080).await;
    let sp_b = seed_service_port(&store, 8081, 18081).await;

    for host in [&host_a, &host_b] {
        for sp in [&sp_a, &sp_b] {
            manager.start_tunnel(host, sp).await.unwrap();
        }
    }
    assert_eq!(manager.registered_count().await, 4);

    manager.stop_all_tunnels().await;

    assert_eq!(manager.registered_count().await, 0);
    assert!(store.list_tunnels().await.unwrap().is_empty());
}

#[tokio::test]
async fn runtime_records_failure_and_retries_until_stopped() {
    let store = setup_store().await;

    let host = seed_host(&store, "127.0.0.1", true).await;
    let sp = seed_service_port(&store, 8080, 18080).await;
    let key = TunnelKey::new(host.id, sp.id);

    let endpoints = resolve_endpoints(&host, &sp).unwrap();
    store
        .upsert_tunnel(
            key.host_id,
            key.sp_id,
            &endpoints.server.to_string(),
            &endpoints.local.to_string(),
            &endpoints.remote.to_string(),
        )
        .await
        .unwrap();

    let persist: Arc<dyn TunnelStatusStore> = Arc::clone(&store) as Arc<dyn TunnelStatusStore>;
    let runtime = Arc::new(TunnelRuntime::new(
        key,
        endpoints,
        SshAuth {
            user: "root".to_string(),
            password: "secret".to_string(),
        },
        persist,
    ));

    let task = tokio::spawn(Arc::clone(&runtime).start(Duration::from_millis(200)));

    // The dial is refused immediately, so the record picks up the failure.
    wait_for_record(&store, key.host_id, key.sp_id, |record| {
        record.last_error.contains("SSH dial")
    })
    .await;

    // The constant-interval retry loop keeps counting attempts.
    wait_for_record(&store, key.host_id, key.sp_id, |record| {
        record.retry_count >= 1 && record.status == TunnelStatus::Reconnecting.as_str()
            || record.retry_count >= 1 && record.status == TunnelStatus::Error.as_str()
    })
    .await;

    runtime.stop().await;
    assert!(store
        .get_tunnel(key.host_id, key.sp_id)
        .await
        .unwrap()
        .is_none());

    // Terminal and idempotent: a second stop succeeds and in-flight retry
    // writes are suppressed after the record deletion.
    runtime.stop().await;
    tokio::time::sleep(Duration::from_millis(600)).await;
    assert!(store
        .get_tunnel(key.host_id, key.sp_id)
        .await
        .unwrap()
        .is_none());

    task.await.unwrap();
}

#[tokio::test]
async fn runtime_fails_handshake_against_non_ssh_server() {
    let store = setup_store().await;

    // A TCP listener that accepts and immediately drops connections: the
    // dial succeeds but the SSH handshake cannot.
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((stream, _)) => drop(stream),
                Err(_) => break,
            }
        }
    });

    let mut host = seed_host(&store, "127.0.0.1", true).await;
    host.port = i32::from(addr.port());
    let host = store.update_host(host).await.unwrap();
    let sp = seed_service_port(&store, 8080, 18080).await;
    let key = TunnelKey::new(host.id, sp.id);

    let endpoints = resolve_endpoints(&host, &sp).unwrap();
    store
        .upsert_tunnel(
            key.host_id,
            key.sp_id,
            &endpoints.server.to_string(),
            &endpoints.local.to_string(),
            &endpoints.remote.to_string(),
        )
        .await
        .unwrap();

    let persist: Arc<dyn TunnelStatusStore> = Arc::clone(&store) as Arc<dyn TunnelStatusStore>;
    let runtime = Arc::new(TunnelRuntime::new(
        key,
        endpoints,
        SshAuth {
            user: "root".to_string(),
            password: "secret".to_string(),
        },
        persist,
    ));

    let task = tokio::spawn(Arc::clone(&runtime).start(Duration::from_millis(200)));

    wait_for_record(&store, key.host_id, key.sp_id, |record| {
        !record.last_error.is_empty() && record.status != TunnelStatus::Starting.as_str()
    })
    .await;

    runtime.stop().await;
    task.await.unwrap();
}
