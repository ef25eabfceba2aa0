//! Request and response models for the REST surface

use std::net::IpAddr;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use tunnelgrid_db::entities::{host, tunnel};

/// Uniform response envelope: `{success, data?, error?}`.
#[derive(Debug, Serialize, Deserialize)]
pub struct Envelope<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> Envelope<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }
}

impl Envelope<()> {
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message.into()),
        }
    }
}

/// Request to create a host.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct CreateHostRequest {
    pub ip: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

impl CreateHostRequest {
    pub fn validate(&self) -> Result<(), String> {
        validate_ip("ip", &self.ip)?;
        validate_port("port", self.port)?;
        validate_required("user", &self.user)?;
        validate_required("password", &self.password)?;
        Ok(())
    }
}

/// Partial update of a host. Only present fields change.
#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
pub struct UpdateHostRequest {
    pub ip: Option<String>,
    pub port: Option<u16>,
    pub user: Option<String>,
    pub password: Option<String>,
    pub description: Option<String>,
    pub enabled: Option<bool>,
}

impl UpdateHostRequest {
    pub fn validate(&self) -> Result<(), String> {
        if let Some(ip) = &self.ip {
            validate_ip("ip", ip)?;
        }
        if let Some(port) = self.port {
            validate_port("port", port)?;
        }
        if let Some(user) = &self.user {
            validate_required("user", user)?;
        }
        if let Some(password) = &self.password {
            validate_required("password", password)?;
        }
        Ok(())
    }
}

/// Request to create or replace a service-port.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct CreateServicePortRequest {
    pub service_ip: String,
    pub service_port: u16,
    pub local_port: u16,
    #[serde(default)]
    pub description: Option<String>,
}

impl CreateServicePortRequest {
    pub fn validate(&self) -> Result<(), String> {
        validate_ip("service_ip", &self.service_ip)?;
        validate_port("service_port", self.service_port)?;
        validate_port("local_port", self.local_port)?;
        Ok(())
    }
}

/// Fleet-wide tunnel roll-up.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct StatusSummary {
    pub total_tunnels: usize,
    pub connected_tunnels: usize,
    #[schema(value_type = Vec<Object>)]
    pub tunnels: Vec<tunnel::Model>,
}

/// Tunnel roll-up scoped to one host.
#[derive(Debug, Serialize, ToSchema)]
pub struct HostStatusSummary {
    #[schema(value_type = Object)]
    pub host: host::Model,
    pub total_tunnels: usize,
    pub connected_tunnels: usize,
    #[schema(value_type = Vec<Object>)]
    pub tunnels: Vec<tunnel::Model>,
}

fn validate_ip(field: &str, value: &str) -> Result<(), String> {
    value
        .parse::<IpAddr>()
        .map(|_| ())
        .map_err(|_| format!("{field} must be a valid IP address"))
}

fn validate_port(field: &str, value: u16) -> Result<(), String> {
    if value == 0 {
        return Err(format!("{field} must be between 1 and 65535"));
    }
    Ok(())
}

fn validate_required(field: &str, value: &str) -> Result<(), String> {
    if value.trim().is_empty() {
        return Err(format!("{field} is required"));
    }
    Ok(())
}
