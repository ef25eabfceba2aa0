//! REST control surface for tunnelgrid.
//!
//! Validated mutations of hosts and service-ports fan tunnel operations out
//! through the [`TunnelManager`]; the status endpoints expose the persisted
//! per-tunnel state.

pub mod handlers;
pub mod models;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use tunnelgrid_core::TunnelManager;
use tunnelgrid_db::Store;

/// Application state shared across handlers.
pub struct AppState {
    pub manager: Arc<TunnelManager>,
    pub store: Arc<Store>,
}

/// OpenAPI documentation
#[derive(OpenApi)]
#[openapi(
    info(
        title = "tunnelgrid API",
        version = "0.1.0",
        description = "REST API for managing a fleet of reverse SSH tunnels"
    ),
    paths(
        handlers::create_host,
        handlers::list_hosts,
        handlers::get_host,
        handlers::update_host,
        handlers::delete_host,
        handlers::create_service_port,
        handlers::list_service_ports,
        handlers::get_service_port,
        handlers::update_service_port,
        handlers::delete_service_port,
        handlers::get_status,
        handlers::get_host_status,
    ),
    components(schemas(
        models::CreateHostRequest,
        models::UpdateHostRequest,
        models::CreateServicePortRequest,
        models::StatusSummary,
        models::HostStatusSummary,
    )),
    tags(
        (name = "hosts", description = "Host management endpoints"),
        (name = "service-ports", description = "Service-port management endpoints"),
        (name = "status", description = "Tunnel status endpoints")
    )
)]
struct ApiDoc;

/// API server configuration.
pub struct ApiServerConfig {
    /// Address to bind the API server.
    pub bind_addr: SocketAddr,
    /// Enable permissive CORS.
    pub enable_cors: bool,
}

/// API server.
pub struct ApiServer {
    config: ApiServerConfig,
    state: Arc<AppState>,
}

impl ApiServer {
    pub fn new(config: ApiServerConfig, manager: Arc<TunnelManager>, store: Arc<Store>) -> Self {
        let state = Arc::new(AppState { manager, store });
        Self { config, state }
    }

    /// Build the router with all routes.
    pub fn build_router(&self) -> Router {
        let api_router = Router::new()
            .route(
                "/api/host",
                post(handlers::create_host).get(handlers::list_hosts),
            )
            .route(
                "/api/host/{id}",
                get(handlers::get_host)
                    .put(handlers::update_host)
                    .delete(handlers::delete_host),
            )
            .route(
                "/api/service-port",
                post(handlers::create_service_port).get(handlers::list_service_ports),
            )
            .route(
                "/api/service-port/{id}",
                get(handlers::get_service_port)
                    .put(handlers::update_service_port)
                    .delete(handlers::delete_service_port),
            )
            .route("/api/status", get(handlers::get_status))
            .route("/api/status/{host_id}", get(handlers::get_host_status))
            .with_state(self.state.clone());

        let mut router = Router::new()
            .merge(SwaggerUi::new("/swagger-ui").url("/api/openapi.json", ApiDoc::openapi()))
            .merge(api_router)
            .layer(TraceLayer::new_for_http());

        if self.config.enable_cors {
            router = router.layer(CorsLayer::permissive());
        }

        router
    }

    /// Start the API server.
    pub async fn start(self) -> Result<(), anyhow::Error> {
        let router = self.build_router();

        info!("starting API server on http://{}", self.config.bind_addr);
        info!(
            "OpenAPI spec: http://{}/api/openapi.json",
            self.config.bind_addr
        );

        let listener = tokio::net::TcpListener::bind(self.config.bind_addr).await?;
        axum::serve(listener, router)
            .await
            .map_err(|err| anyhow::anyhow!("API server error: {err}"))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn openapi_spec_generates() {
        let _doc = ApiDoc::openapi();
    }
}
