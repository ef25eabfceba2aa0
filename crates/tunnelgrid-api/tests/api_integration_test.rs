//! Integration tests for the REST surface
//!
//! Builds the router over an in-memory SQLite store. Hosts point at closed
//! local ports, so fanned-out tunnels spin in the background without a real
//! SSH server while the handlers and the persisted state are exercised.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use tower::ServiceExt; // For `oneshot`

use tunnelgrid_api::{ApiServer, ApiServerConfig};
use tunnelgrid_core::TunnelManager;
use tunnelgrid_db::Store;

struct TestApp {
    app: Router,
    manager: Arc<TunnelManager>,
    store: Arc<Store>,
}

async fn create_test_app() -> TestApp {
    let db = sea_orm::Database::connect("sqlite::memory:")
        .await
        .expect("Failed to create in-memory database");
    tunnelgrid_db::migrate(&db)
        .await
        .expect("Failed to run migrations");

    let store = Arc::new(Store::new(db));
    let manager = Arc::new(TunnelManager::new(Arc::clone(&store), Duration::from_secs(1)));

    let server = ApiServer::new(
        ApiServerConfig {
            bind_addr: "127.0.0.1:0".parse().unwrap(),
            enable_cors: true,
        },
        Arc::clone(&manager),
        Arc::clone(&store),
    );

    TestApp {
        app: server.build_router(),
        manager,
        store,
    }
}

async fn send_json(
    app: &Router,
    method: &str,
    uri: &str,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().uri(uri).method(method);
    let request = match body {
        Some(body) => {
            builder = builder.header("content-type", "application/json");
            builder.body(Body::from(body.to_string())).unwrap()
        }
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

fn host_body(ip: &str) -> Value {
    json!({
        "ip": ip,
        "port": 1,
        "user": "root",
        "password": "secret",
        "description": "test host"
    })
}

fn service_port_body(service_port: u16, local_port: u16) -> Value {
    json!({
        "service_ip": "127.0.0.1",
        "service_port": service_port,
        "local_port": local_port
    })
}

#[tokio::test]
async fn create_host_returns_envelope_without_password() {
    let test = create_test_app().await;

    let (status, body) = send_json(&test.app, "POST", "/api/host", Some(host_body("127.0.0.1"))).await;

    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["ip"], "127.0.0.1");
    assert_eq!(body["data"]["enabled"], true);
    assert!(body["data"].get("password").is_none());
}

#[tokio::test]
async fn create_host_with_invalid_ip_is_rejected() {
    let test = create_test_app().await;

    let (status, body) =
        send_json(&test.app, "POST", "/api/host", Some(host_body("not-an-ip"))).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);
    assert!(body["error"].as_str().unwrap().contains("ip"));
    assert_eq!(test.manager.registered_count().await, 0);
}

#[tokio::test]
async fn get_missing_host_is_not_found() {
    let test = create_test_app().await;

    let (status, body) = send_json(&test.app, "GET", "/api/host/99", None).await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["success"], false);
}

#[tokio::test]
async fn creating_service_port_fans_out_tunnels() {
    let test = create_test_app().await;

    send_json(&test.app, "POST", "/api/host", Some(host_body("127.0.0.1"))).await;
    send_json(&test.app, "POST", "/api/host", Some(host_body("127.0.0.2"))).await;

    let (status, body) = send_json(
        &test.app,
        "POST",
        "/api/service-port",
        Some(service_port_body(8080, 18080)),
    )
    .await;

    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["success"], true);

    // One tunnel per host × service-port.
    assert_eq!(test.manager.registered_count().await, 2);
    assert_eq!(test.store.list_tunnels().await.unwrap().len(), 2);
}

#[tokio::test]
async fn duplicate_service_port_pair_is_an_internal_error() {
    let test = create_test_app().await;

    send_json(&test.app, "POST", "/api/host", Some(host_body("127.0.0.1"))).await;
    send_json(
        &test.app,
        "POST",
        "/api/service-port",
        Some(service_port_body(8080, 18080)),
    )
    .await;

    let (status, body) = send_json(
        &test.app,
        "POST",
        "/api/service-port",
        Some(service_port_body(8080, 28080)),
    )
    .await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["success"], false);

    // The conflicting rule started nothing and left no record behind.
    assert_eq!(test.manager.registered_count().await, 1);
    assert_eq!(test.store.list_tunnels().await.unwrap().len(), 1);
}

#[tokio::test]
async fn status_reports_fleet_rollup() {
    let test = create_test_app().await;

    send_json(&test.app, "POST", "/api/host", Some(host_body("127.0.0.1"))).await;
    send_json(
        &test.app,
        "POST",
        "/api/service-port",
        Some(service_port_body(8080, 18080)),
    )
    .await;

    let (status, body) = send_json(&test.app, "GET", "/api/status", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["total_tunnels"], 1);
    // The host's SSH port is closed, so nothing can be connected.
    assert_eq!(body["data"]["connected_tunnels"], 0);
    assert_eq!(body["data"]["tunnels"].as_array().unwrap().len(), 1);
    assert_eq!(body["data"]["tunnels"][0]["local"], "0.0.0.0:18080");
}

#[tokio::test]
async fn host_status_includes_host_and_is_scoped() {
    let test = create_test_app().await;

    let (_, created) =
        send_json(&test.app, "POST", "/api/host", Some(host_body("127.0.0.1"))).await;
    let host_id = created["data"]["id"].as_i64().unwrap();
    send_json(&test.app, "POST", "/api/host", Some(host_body("127.0.0.2"))).await;
    send_json(
        &test.app,
        "POST",
        "/api/service-port",
        Some(service_port_body(8080, 18080)),
    )
    .await;

    let (status, body) =
        send_json(&test.app, "GET", &format!("/api/status/{host_id}"), None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["host"]["id"], host_id);
    assert_eq!(body["data"]["total_tunnels"], 1);

    let (status, _) = send_json(&test.app, "GET", "/api/status/999", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn deleting_host_tears_down_its_tunnels() {
    let test = create_test_app().await;

    let (_, created) =
        send_json(&test.app, "POST", "/api/host", Some(host_body("127.0.0.1"))).await;
    let host_id = created["data"]["id"].as_i64().unwrap() as i32;
    send_json(
        &test.app,
        "POST",
        "/api/service-port",
        Some(service_port_body(8080, 18080)),
    )
    .await;
    assert_eq!(test.manager.registered_count().await, 1);

    let (status, body) =
        send_json(&test.app, "DELETE", &format!("/api/host/{host_id}"), None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(test.manager.registered_count().await, 0);
    assert!(test.store.list_host_tunnels(host_id).await.unwrap().is_empty());
    assert!(test.store.get_host(host_id).await.unwrap().is_none());
}

#[tokio::test]
async fn disabling_host_stops_its_tunnels() {
    let test = create_test_app().await;

    let (_, created) =
        send_json(&test.app, "POST", "/api/host", Some(host_body("127.0.0.1"))).await;
    let host_id = created["data"]["id"].as_i64().unwrap() as i32;
    send_json(
        &test.app,
        "POST",
        "/api/service-port",
        Some(service_port_body(8080, 18080)),
    )
    .await;
    assert_eq!(test.manager.registered_count().await, 1);

    let (status, body) = send_json(
        &test.app,
        "PUT",
        &format!("/api/host/{host_id}"),
        Some(json!({"enabled": false})),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["enabled"], false);
    assert_eq!(test.manager.registered_count().await, 0);
    assert!(test.store.list_host_tunnels(host_id).await.unwrap().is_empty());

    // Re-enabling brings the fan back.
    let (_, body) = send_json(
        &test.app,
        "PUT",
        &format!("/api/host/{host_id}"),
        Some(json!({"enabled": true})),
    )
    .await;
    assert_eq!(body["data"]["enabled"], true);
    assert_eq!(test.manager.registered_count().await, 1);
}

#[tokio::test]
async fn updating_host_identity_recreates_tunnels() {
    let test = create_test_app().await;

    let (_, created) =
        send_json(&test.app, "POST", "/api/host", Some(host_body("127.0.0.1"))).await;
    let host_id = created["data"]["id"].as_i64().unwrap() as i32;
    send_json(
        &test.app,
        "POST",
        "/api/service-port",
        Some(service_port_body(8080, 18080)),
    )
    .await;

    let (status, body) = send_json(
        &test.app,
        "PUT",
        &format!("/api/host/{host_id}"),
        Some(json!({"ip": "127.0.0.2"})),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["ip"], "127.0.0.2");
    assert_eq!(test.manager.registered_count().await, 1);

    // The re-created tunnel record carries the new SSH endpoint.
    let tunnels = test.store.list_host_tunnels(host_id).await.unwrap();
    assert_eq!(tunnels.len(), 1);
    assert_eq!(tunnels[0].server, "127.0.0.2:1");
}

#[tokio::test]
async fn deleting_service_port_tears_down_tunnels_on_every_host() {
    let test = create_test_app().await;

    send_json(&test.app, "POST", "/api/host", Some(host_body("127.0.0.1"))).await;
    send_json(&test.app, "POST", "/api/host", Some(host_body("127.0.0.2"))).await;
    let (_, created) = send_json(
        &test.app,
        "POST",
        "/api/service-port",
        Some(service_port_body(8080, 18080)),
    )
    .await;
    let sp_id = created["data"]["id"].as_i64().unwrap();
    assert_eq!(test.manager.registered_count().await, 2);

    let (status, body) = send_json(
        &test.app,
        "DELETE",
        &format!("/api/service-port/{sp_id}"),
        None,
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(test.manager.registered_count().await, 0);
    assert!(test.store.list_tunnels().await.unwrap().is_empty());
}
