//! Store - the CRUD surface over hosts, service-ports and tunnel records

use chrono::Utc;
use sea_orm::sea_query::{Expr, OnConflict};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, DbErr, EntityTrait, QueryFilter, QueryOrder,
    Set,
};

use crate::entities::{host, service_port, tunnel, tunnel::TunnelStatus};

/// Fields required to create a host.
#[derive(Debug, Clone)]
pub struct NewHost {
    pub ip: String,
    pub port: i32,
    pub user: String,
    pub password: String,
    pub description: Option<String>,
    pub enabled: bool,
}

/// Fields required to create a service-port.
#[derive(Debug, Clone)]
pub struct NewServicePort {
    pub service_ip: String,
    pub service_port: i32,
    pub local_port: i32,
    pub description: Option<String>,
}

/// Database-backed store for the control plane.
///
/// The tunnel operations are each a single statement so concurrent writers
/// for different (host_id, sp_id) pairs never interfere.
pub struct Store {
    db: DatabaseConnection,
}

impl Store {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    pub fn connection(&self) -> &DatabaseConnection {
        &self.db
    }

    // ========== Host CRUD ==========

    pub async fn create_host(&self, new: NewHost) -> Result<host::Model, DbErr> {
        let now = Utc::now();
        let record = host::ActiveModel {
            ip: Set(new.ip),
            port: Set(new.port),
            user: Set(new.user),
            password: Set(new.password),
            description: Set(new.description),
            enabled: Set(new.enabled),
            created_at: Set(now),
            updated_at: Set(now),
            ..Default::default()
        };
        record.insert(&self.db).await
    }

    pub async fn get_host(&self, id: i32) -> Result<Option<host::Model>, DbErr> {
        host::Entity::find_by_id(id).one(&self.db).await
    }

    pub async fn list_hosts(&self) -> Result<Vec<host::Model>, DbErr> {
        host::Entity::find()
            .order_by_asc(host::Column::Id)
            .all(&self.db)
            .await
    }

    pub async fn update_host(&self, updated: host::Model) -> Result<host::Model, DbErr> {
        let record = host::ActiveModel {
            id: Set(updated.id),
            ip: Set(updated.ip),
            port: Set(updated.port),
            user: Set(updated.user),
            password: Set(updated.password),
            description: Set(updated.description),
            enabled: Set(updated.enabled),
            created_at: Set(updated.created_at),
            updated_at: Set(Utc::now()),
        };
        record.update(&self.db).await
    }

    pub async fn delete_host(&self, id: i32) -> Result<(), DbErr> {
        host::Entity::delete_by_id(id).exec(&self.db).await?;
        Ok(())
    }

    // ========== Service-port CRUD ==========

    pub async fn create_service_port(
        &self,
        new: NewServicePort,
    ) -> Result<service_port::Model, DbErr> {
        let now = Utc::now();
        let record = service_port::ActiveModel {
            service_ip: Set(new.service_ip),
            service_port: Set(new.service_port),
            local_port: Set(new.local_port),
            description: Set(new.description),
            created_at: Set(now),
            updated_at: Set(now),
            ..Default::default()
        };
        record.insert(&self.db).await
    }

    pub async fn get_service_port(&self, id: i32) -> Result<Option<service_port::Model>, DbErr> {
        service_port::Entity::find_by_id(id).one(&self.db).await
    }

    pub async fn list_service_ports(&self) -> Result<Vec<service_port::Model>, DbErr> {
        service_port::Entity::find()
            .order_by_asc(service_port::Column::Id)
            .all(&self.db)
            .await
    }

    pub async fn update_service_port(
        &self,
        updated: service_port::Model,
    ) -> Result<service_port::Model, DbErr> {
        let record = service_port::ActiveModel {
            id: Set(updated.id),
            service_ip: Set(updated.service_ip),
            service_port: Set(updated.service_port),
            local_port: Set(updated.local_port),
            description: Set(updated.description),
            created_at: Set(updated.created_at),
            updated_at: Set(Utc::now()),
        };
        record.update(&self.db).await
    }

    pub async fn delete_service_port(&self, id: i32) -> Result<(), DbErr> {
        service_port::Entity::delete_by_id(id).exec(&self.db).await?;
        Ok(())
    }

    // ========== Tunnel status operations ==========

    /// Create or reset the record for (host_id, sp_id) with status `starting`
    /// and the resolved endpoint strings.
    pub async fn upsert_tunnel(
        &self,
        host_id: i32,
        sp_id: i32,
        server: &str,
        local: &str,
        remote: &str,
    ) -> Result<(), DbErr> {
        let record = tunnel::ActiveModel {
            host_id: Set(host_id),
            sp_id: Set(sp_id),
            status: Set(TunnelStatus::Starting.as_str().to_owned()),
            last_error: Set(String::new()),
            retry_count: Set(0),
            last_connected_at: Set(None),
            server: Set(server.to_owned()),
            local: Set(local.to_owned()),
            remote: Set(remote.to_owned()),
            updated_at: Set(Utc::now()),
        };
        tunnel::Entity::insert(record)
            .on_conflict(
                OnConflict::columns([tunnel::Column::HostId, tunnel::Column::SpId])
                    .update_columns([
                        tunnel::Column::Status,
                        tunnel::Column::LastError,
                        tunnel::Column::RetryCount,
                        tunnel::Column::LastConnectedAt,
                        tunnel::Column::Server,
                        tunnel::Column::Local,
                        tunnel::Column::Remote,
                        tunnel::Column::UpdatedAt,
                    ])
                    .to_owned(),
            )
            .exec(&self.db)
            .await?;
        Ok(())
    }

    /// Record a successful connect: status `connected`, retry count reset,
    /// last error cleared, connect timestamp set.
    pub async fn mark_tunnel_connected(&self, host_id: i32, sp_id: i32) -> Result<(), DbErr> {
        let now = Utc::now();
        tunnel::Entity::update_many()
            .col_expr(
                tunnel::Column::Status,
                Expr::value(TunnelStatus::Connected.as_str()),
            )
            .col_expr(tunnel::Column::LastError, Expr::value(""))
            .col_expr(tunnel::Column::RetryCount, Expr::value(0))
            .col_expr(tunnel::Column::LastConnectedAt, Expr::value(now))
            .col_expr(tunnel::Column::UpdatedAt, Expr::value(now))
            .filter(tunnel::Column::HostId.eq(host_id))
            .filter(tunnel::Column::SpId.eq(sp_id))
            .exec(&self.db)
            .await?;
        Ok(())
    }

    /// Record the start of a reconnection attempt, incrementing the retry
    /// counter in place.
    pub async fn mark_tunnel_reconnecting(&self, host_id: i32, sp_id: i32) -> Result<(), DbErr> {
        tunnel::Entity::update_many()
            .col_expr(
                tunnel::Column::Status,
                Expr::value(TunnelStatus::Reconnecting.as_str()),
            )
            .col_expr(
                tunnel::Column::RetryCount,
                Expr::col(tunnel::Column::RetryCount).add(1),
            )
            .col_expr(tunnel::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(tunnel::Column::HostId.eq(host_id))
            .filter(tunnel::Column::SpId.eq(sp_id))
            .exec(&self.db)
            .await?;
        Ok(())
    }

    /// Record a failed attempt with its error message.
    pub async fn mark_tunnel_error(
        &self,
        host_id: i32,
        sp_id: i32,
        message: &str,
    ) -> Result<(), DbErr> {
        tunnel::Entity::update_many()
            .col_expr(
                tunnel::Column::Status,
                Expr::value(TunnelStatus::Error.as_str()),
            )
            .col_expr(tunnel::Column::LastError, Expr::value(message))
            .col_expr(tunnel::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(tunnel::Column::HostId.eq(host_id))
            .filter(tunnel::Column::SpId.eq(sp_id))
            .exec(&self.db)
            .await?;
        Ok(())
    }

    pub async fn delete_tunnel(&self, host_id: i32, sp_id: i32) -> Result<(), DbErr> {
        tunnel::Entity::delete_many()
            .filter(tunnel::Column::HostId.eq(host_id))
            .filter(tunnel::Column::SpId.eq(sp_id))
            .exec(&self.db)
            .await?;
        Ok(())
    }

    pub async fn delete_host_tunnels(&self, host_id: i32) -> Result<(), DbErr> {
        tunnel::Entity::delete_many()
            .filter(tunnel::Column::HostId.eq(host_id))
            .exec(&self.db)
            .await?;
        Ok(())
    }

    pub async fn list_tunnels(&self) -> Result<Vec<tunnel::Model>, DbErr> {
        tunnel::Entity::find()
            .order_by_asc(tunnel::Column::HostId)
            .order_by_asc(tunnel::Column::SpId)
            .all(&self.db)
            .await
    }

    pub async fn list_host_tunnels(&self, host_id: i32) -> Result<Vec<tunnel::Model>, DbErr> {
        tunnel::Entity::find()
            .filter(tunnel::Column::HostId.eq(host_id))
            .order_by_asc(tunnel::Column::SpId)
            .all(&self.db)
            .await
    }

    pub async fn get_tunnel(
        &self,
        host_id: i32,
        sp_id: i32,
    ) -> Result<Option<tunnel::Model>, DbErr> {
        tunnel::Entity::find()
            .filter(tunnel::Column::HostId.eq(host_id))
            .filter(tunnel::Column::SpId.eq(sp_id))
            .one(&self.db)
            .await
    }
}
