//! Service-port entity - one forwarding rule

use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// A forwarding rule: the remote host listens on `local_port` and every
/// accepted connection is bridged to `service_ip:service_port` from the
/// manager's network. The pair (service_ip, service_port) is unique among
/// live rules.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "service_ports")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,

    pub service_ip: String,

    pub service_port: i32,

    /// Port bound on the remote host by the SSH session.
    pub local_port: i32,

    #[sea_orm(nullable)]
    pub description: Option<String>,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::tunnel::Entity")]
    Tunnels,
}

impl Related<super::tunnel::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Tunnels.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
