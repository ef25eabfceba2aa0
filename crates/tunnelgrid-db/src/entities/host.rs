//! Host entity - a remote machine reachable over SSH

use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// A machine the manager dials over SSH to host reverse listeners.
///
/// The password is write-only at the API surface and never serialized back
/// out.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "hosts")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,

    /// SSH address, unique among live hosts.
    #[sea_orm(unique)]
    pub ip: String,

    /// SSH port.
    pub port: i32,

    pub user: String,

    #[serde(skip_serializing, default)]
    pub password: String,

    #[sea_orm(nullable)]
    pub description: Option<String>,

    /// Disabled hosts keep their configuration but run no tunnels.
    pub enabled: bool,

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
