//! REST handlers for hosts, service-ports and tunnel status

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use tracing::{debug, error, info, warn};

use tunnelgrid_core::ManagerError;
use tunnelgrid_db::entities::{host, service_port, tunnel::TunnelStatus};
use tunnelgrid_db::{NewHost, NewServicePort};

use crate::models::*;
use crate::AppState;

/// Error response carrying the envelope and a status code.
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(Envelope::failure(self.message))).into_response()
    }
}

// ============================================================
// Hosts
// ============================================================

/// Create a host and start tunnels for every service-port
#[utoipa::path(
    post,
    path = "/api/host",
    request_body = CreateHostRequest,
    responses(
        (status = 201, description = "Host created"),
        (status = 400, description = "Validation failed"),
        (status = 500, description = "Internal server error")
    ),
    tag = "hosts"
)]
pub async fn create_host(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateHostRequest>,
) -> Result<(StatusCode, Json<Envelope<host::Model>>), ApiError> {
    req.validate().map_err(ApiError::bad_request)?;

    let host = state
        .store
        .create_host(NewHost {
            ip: req.ip,
            port: i32::from(req.port),
            user: req.user,
            password: req.password,
            description: req.description,
            enabled: req.enabled,
        })
        .await
        .map_err(|err| ApiError::internal(format!("failed to create host: {err}")))?;

    info!(host_id = host.id, host_ip = %host.ip, "host created");

    let service_ports = state
        .store
        .list_service_ports()
        .await
        .map_err(|err| ApiError::internal(format!("failed to fetch service-ports: {err}")))?;

    if host.enabled {
        for sp in &service_ports {
            if let Err(err) = state.manager.start_tunnel(&host, sp).await {
                error!(host_ip = %host.ip, service_port = sp.service_port, error = %err,
                    "failed to start tunnel");
            }
        }
    }

    Ok((StatusCode::CREATED, Json(Envelope::ok(host))))
}

/// List hosts
#[utoipa::path(
    get,
    path = "/api/host",
    responses((status = 200, description = "List of hosts")),
    tag = "hosts"
)]
pub async fn list_hosts(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Envelope<Vec<host::Model>>>, ApiError> {
    let hosts = state
        .store
        .list_hosts()
        .await
        .map_err(|err| ApiError::internal(format!("failed to fetch hosts: {err}")))?;
    Ok(Json(Envelope::ok(hosts)))
}

/// Get one host
#[utoipa::path(
    get,
    path = "/api/host/{id}",
    params(("id" = i32, Path, description = "Host ID")),
    responses(
        (status = 200, description = "Host"),
        (status = 404, description = "Host not found")
    ),
    tag = "hosts"
)]
pub async fn get_host(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i32>,
) -> Result<Json<Envelope<host::Model>>, ApiError> {
    let host = fetch_host(&state, id).await?;
    Ok(Json(Envelope::ok(host)))
}

/// Partially update a host, restarting or stopping its tunnels as needed
#[utoipa::path(
    put,
    path = "/api/host/{id}",
    params(("id" = i32, Path, description = "Host ID")),
    request_body = UpdateHostRequest,
    responses(
        (status = 200, description = "Host updated"),
        (status = 400, description = "Validation failed"),
        (status = 404, description = "Host not found")
    ),
    tag = "hosts"
)]
pub async fn update_host(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i32>,
    Json(req): Json<UpdateHostRequest>,
) -> Result<Json<Envelope<host::Model>>, ApiError> {
    req.validate().map_err(ApiError::bad_request)?;

    let mut host = fetch_host(&state, id).await?;
    let was_enabled = host.enabled;

    let identity_changed = req.ip.as_ref().is_some_and(|ip| *ip != host.ip)
        || req.port.is_some_and(|p| i32::from(p) != host.port)
        || req.user.as_ref().is_some_and(|u| *u != host.user)
        || req
            .password
            .as_ref()
            .is_some_and(|p| *p != host.password);

    if let Some(ip) = req.ip {
        host.ip = ip;
    }
    if let Some(port) = req.port {
        host.port = i32::from(port);
    }
    if let Some(user) = req.user {
        host.user = user;
    }
    if let Some(password) = req.password {
        host.password = password;
    }
    if let Some(description) = req.description {
        host.description = Some(description);
    }
    if let Some(enabled) = req.enabled {
        host.enabled = enabled;
    }

    let host = state
        .store
        .update_host(host)
        .await
        .map_err(|err| ApiError::internal(format!("failed to update host: {err}")))?;

    let service_ports = state
        .store
        .list_service_ports()
        .await
        .map_err(|err| ApiError::internal(format!("failed to fetch service-ports: {err}")))?;

    // Identity changes tear down and re-create; toggling enabled starts or
    // stops the host's whole fan.
    if was_enabled && (!host.enabled || identity_changed) {
        for sp in &service_ports {
            match state.manager.stop_tunnel(host.id, sp.id).await {
                Ok(()) | Err(ManagerError::NotFound { .. }) => {}
                Err(err) => warn!(host_id = host.id, sp_id = sp.id, error = %err,
                    "failed to stop tunnel"),
            }
        }
    }
    if host.enabled && (!was_enabled || identity_changed) {
        for sp in &service_ports {
            if let Err(err) = state.manager.start_tunnel(&host, sp).await {
                error!(host_ip = %host.ip, service_port = sp.service_port, error = %err,
                    "failed to restart tunnel");
            }
        }
    }

    Ok(Json(Envelope::ok(host)))
}

/// Delete a host, stopping all of its tunnels first
#[utoipa::path(
    delete,
    path = "/api/host/{id}",
    params(("id" = i32, Path, description = "Host ID")),
    responses(
        (status = 200, description = "Host deleted"),
        (status = 404, description = "Host not found")
    ),
    tag = "hosts"
)]
pub async fn delete_host(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i32>,
) -> Result<Json<Envelope<String>>, ApiError> {
    let host = fetch_host(&state, id).await?;

    let service_ports = state
        .store
        .list_service_ports()
        .await
        .map_err(|err| ApiError::internal(format!("failed to fetch service-ports: {err}")))?;

    for sp in &service_ports {
        match state.manager.stop_tunnel(host.id, sp.id).await {
            Ok(()) | Err(ManagerError::NotFound { .. }) => {}
            Err(err) => warn!(host_id = host.id, sp_id = sp.id, error = %err,
                "failed to stop tunnel"),
        }
    }
    // Disabled hosts may still have leftover records.
    if let Err(err) = state.store.delete_host_tunnels(host.id).await {
        warn!(host_id = host.id, error = %err, "failed to purge tunnel records");
    }

    state
        .store
        .delete_host(host.id)
        .await
        .map_err(|err| ApiError::internal(format!("failed to delete host: {err}")))?;

    info!(host_id = host.id, host_ip = %host.ip, "host deleted");
    Ok(Json(Envelope::ok("host deleted successfully".to_string())))
}

// ============================================================
// Service-ports
// ============================================================

/// Create a service-port and start tunnels for every enabled host
#[utoipa::path(
    post,
    path = "/api/service-port",
    request_body = CreateServicePortRequest,
    responses(
        (status = 201, description = "Service-port created"),
        (status = 400, description = "Validation failed"),
        (status = 500, description = "Internal server error")
    ),
    tag = "service-ports"
)]
pub async fn create_service_port(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateServicePortRequest>,
) -> Result<(StatusCode, Json<Envelope<service_port::Model>>), ApiError> {
    req.validate().map_err(ApiError::bad_request)?;

    let sp = state
        .store
        .create_service_port(NewServicePort {
            service_ip: req.service_ip,
            service_port: i32::from(req.service_port),
            local_port: i32::from(req.local_port),
            description: req.description,
        })
        .await
        .map_err(|err| ApiError::internal(format!("failed to create service-port: {err}")))?;

    info!(sp_id = sp.id, service_ip = %sp.service_ip, service_port = sp.service_port,
        "service-port created");

    let hosts = state
        .store
        .list_hosts()
        .await
        .map_err(|err| ApiError::internal(format!("failed to fetch hosts: {err}")))?;

    for host in hosts.iter().filter(|h| h.enabled) {
        if let Err(err) = state.manager.start_tunnel(host, &sp).await {
            error!(host_ip = %host.ip, service_port = sp.service_port, error = %err,
                "failed to start tunnel");
        }
    }

    Ok((StatusCode::CREATED, Json(Envelope::ok(sp))))
}

/// List service-ports
#[utoipa::path(
    get,
    path = "/api/service-port",
    responses((status = 200, description = "List of service-ports")),
    tag = "service-ports"
)]
pub async fn list_service_ports(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Envelope<Vec<service_port::Model>>>, ApiError> {
    let sps = state
        .store
        .list_service_ports()
        .await
        .map_err(|err| ApiError::internal(format!("failed to fetch service-ports: {err}")))?;
    Ok(Json(Envelope::ok(sps)))
}

/// Get one service-port
#[utoipa::path(
    get,
    path = "/api/service-port/{id}",
    params(("id" = i32, Path, description = "Service-port ID")),
    responses(
        (status = 200, description = "Service-port"),
        (status = 404, description = "Service-port not found")
    ),
    tag = "service-ports"
)]
pub async fn get_service_port(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i32>,
) -> Result<Json<Envelope<service_port::Model>>, ApiError> {
    let sp = fetch_service_port(&state, id).await?;
    Ok(Json(Envelope::ok(sp)))
}

/// Replace a service-port, restarting its tunnels on every host
#[utoipa::path(
    put,
    path = "/api/service-port/{id}",
    params(("id" = i32, Path, description = "Service-port ID")),
    request_body = CreateServicePortRequest,
    responses(
        (status = 200, description = "Service-port updated"),
        (status = 400, description = "Validation failed"),
        (status = 404, description = "Service-port not found")
    ),
    tag = "service-ports"
)]
pub async fn update_service_port(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i32>,
    Json(req): Json<CreateServicePortRequest>,
) -> Result<Json<Envelope<service_port::Model>>, ApiError> {
    req.validate().map_err(ApiError::bad_request)?;

    let mut sp = fetch_service_port(&state, id).await?;

    let hosts = state
        .store
        .list_hosts()
        .await
        .map_err(|err| ApiError::internal(format!("failed to fetch hosts: {err}")))?;

    for host in &hosts {
        match state.manager.stop_tunnel(host.id, sp.id).await {
            Ok(()) | Err(ManagerError::NotFound { .. }) => {}
            Err(err) => warn!(host_id = host.id, sp_id = sp.id, error = %err,
                "failed to stop tunnel"),
        }
    }

    sp.service_ip = req.service_ip;
    sp.service_port = i32::from(req.service_port);
    sp.local_port = i32::from(req.local_port);
    sp.description = req.description;

    let sp = state
        .store
        .update_service_port(sp)
        .await
        .map_err(|err| ApiError::internal(format!("failed to update service-port: {err}")))?;

    for host in hosts.iter().filter(|h| h.enabled) {
        if let Err(err) = state.manager.start_tunnel(host, &sp).await {
            error!(host_ip = %host.ip, service_port = sp.service_port, error = %err,
                "failed to restart tunnel");
        }
    }

    Ok(Json(Envelope::ok(sp)))
}

/// Delete a service-port, stopping its tunnels on every host first
#[utoipa::path(
    delete,
    path = "/api/service-port/{id}",
    params(("id" = i32, Path, description = "Service-port ID")),
    responses(
        (status = 200, description = "Service-port deleted"),
        (status = 404, description = "Service-port not found")
    ),
    tag = "service-ports"
)]
pub async fn delete_service_port(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i32>,
) -> Result<Json<Envelope<String>>, ApiError> {
    let sp = fetch_service_port(&state, id).await?;

    let hosts = state
        .store
        .list_hosts()
        .await
        .map_err(|err| ApiError::internal(format!("failed to fetch hosts: {err}")))?;

    for host in &hosts {
        match state.manager.stop_tunnel(host.id, sp.id).await {
            Ok(()) | Err(ManagerError::NotFound { .. }) => {}
            Err(err) => warn!(host_id = host.id, sp_id = sp.id, error = %err,
                "failed to stop tunnel"),
        }
    }

    state
        .store
        .delete_service_port(sp.id)
        .await
        .map_err(|err| ApiError::internal(format!("failed to delete service-port: {err}")))?;

    info!(sp_id = sp.id, "service-port deleted");
    Ok(Json(Envelope::ok(
        "service-port deleted successfully".to_string(),
    )))
}

// ============================================================
// Status
// ============================================================

/// Fleet-wide tunnel status
#[utoipa::path(
    get,
    path = "/api/status",
    responses((status = 200, description = "Tunnel status roll-up", body = StatusSummary)),
    tag = "status"
)]
pub async fn get_status(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Envelope<StatusSummary>>, ApiError> {
    debug!("fetching tunnel status");

    let tunnels = state
        .manager
        .get_all_tunnels()
        .await
        .map_err(|err| ApiError::internal(format!("failed to fetch tunnel status: {err}")))?;

    let connected_tunnels = tunnels
        .iter()
        .filter(|t| t.status == TunnelStatus::Connected.as_str())
        .count();

    Ok(Json(Envelope::ok(StatusSummary {
        total_tunnels: tunnels.len(),
        connected_tunnels,
        tunnels,
    })))
}

/// Tunnel status for one host
#[utoipa::path(
    get,
    path = "/api/status/{host_id}",
    params(("host_id" = i32, Path, description = "Host ID")),
    responses(
        (status = 200, description = "Host tunnel status", body = HostStatusSummary),
        (status = 404, description = "Host not found")
    ),
    tag = "status"
)]
pub async fn get_host_status(
    State(state): State<Arc<AppState>>,
    Path(host_id): Path<i32>,
) -> Result<Json<Envelope<HostStatusSummary>>, ApiError> {
    let host = fetch_host(&state, host_id).await?;

    let tunnels = state
        .manager
        .get_host_tunnels(host.id)
        .await
        .map_err(|err| ApiError::internal(format!("failed to fetch tunnel status: {err}")))?;

    let connected_tunnels = tunnels
        .iter()
        .filter(|t| t.status == TunnelStatus::Connected.as_str())
        .count();

    Ok(Json(Envelope::ok(HostStatusSummary {
        host,
        total_tunnels: tunnels.len(),
        connected_tunnels,
        tunnels,
    })))
}

// ============================================================
// Helpers
// ============================================================

async fn fetch_host(state: &AppState, id: i32) -> Result<host::Model, ApiError> {
    state
        .store
        .get_host(id)
        .await
        .map_err(|err| ApiError::internal(format!("failed to fetch host: {err}")))?
        .ok_or_else(|| ApiError::not_found("host not found"))
}

async fn fetch_service_port(state: &AppState, id: i32) -> Result<service_port::Model, ApiError> {
    state
        .store
        .get_service_port(id)
        .await
        .map_err(|err| ApiError::internal(format!("failed to fetch service-port: {err}")))?
        .ok_or_else(|| ApiError::not_found("service-port not found"))
}
