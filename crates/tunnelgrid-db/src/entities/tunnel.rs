//! Tunnel status entity

use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Durable status of one (host, service-port) tunnel.
///
/// Keyed by the composite (host_id, sp_id). Written only by the runtime
/// layer; deleted when the tunnel is stopped or its host/service-port is
/// removed.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "tunnels")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub host_id: i32,

    #[sea_orm(primary_key, auto_increment = false)]
    pub sp_id: i32,

    /// starting, connected, reconnecting, error
    pub status: String,

    /// Empty while the tunnel is healthy.
    pub last_error: String,

    /// Reset to 0 on every successful connect.
    pub retry_count: i32,

    #[sea_orm(nullable)]
    pub last_connected_at: Option<DateTime<Utc>>,

    /// Resolved SSH endpoint, for observability.
    pub server: String,

    /// Resolved remote listener address.
    pub local: String,

    /// Resolved service address dialed for each forwarded connection.
    pub remote: String,

    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::host::Entity",
        from = "Column::HostId",
        to = "super::host::Column::Id",
        on_update = "Cascade",
        on_delete = "Cascade"
    )]
    Host,
    #[sea_orm(
        belongs_to = "super::service_port::Entity",
        from = "Column::SpId",
        to = "super::service_port::Column::Id",
        on_update = "Cascade",
        on_delete = "Cascade"
    )]
    ServicePort,
}

impl Related<super::host::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Host.def()
    }
}

impl Related<super::service_port::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::ServicePort.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

/// Lifecycle states recorded in [`Model::status`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TunnelStatus {
    Starting,
    Connected,
    Reconnecting,
    Error,
}

impl TunnelStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TunnelStatus::Starting => "starting",
            TunnelStatus::Connected => "connected",
            TunnelStatus::Reconnecting => "reconnecting",
            TunnelStatus::Error => "error",
        }
    }
}

impl std::fmt::Display for TunnelStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
