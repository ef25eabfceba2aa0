//! Initial schema: hosts, service_ports and tunnels

use sea_orm_migration::{prelude::*, schema::*};

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        // ============================================================
        // 1. Create hosts table
        // ============================================================
        manager
            .create_table(
                Table::create()
                    .table(Host::Table)
                    .if_not_exists()
                    .col(pk_auto(Host::Id))
                    .col(string_len(Host::Ip, 255).not_null().unique_key())
                    .col(integer(Host::Port).not_null())
                    .col(string_len(Host::User, 255).not_null())
                    .col(string_len(Host::Password, 255).not_null())
                    .col(text_null(Host::Description))
                    .col(boolean(Host::Enabled).not_null().default(true))
                    .col(
                        timestamp_with_time_zone(Host::CreatedAt)
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        timestamp_with_time_zone(Host::UpdatedAt)
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        // ============================================================
        // 2. Create service_ports table
        // ============================================================
        manager
            .create_table(
                Table::create()
                    .table(ServicePort::Table)
                    .if_not_exists()
                    .col(pk_auto(ServicePort::Id))
                    .col(string_len(ServicePort::ServiceIp, 255).not_null())
                    .col(integer(ServicePort::ServicePort).not_null())
                    .col(integer(ServicePort::LocalPort).not_null())
                    .col(text_null(ServicePort::Description))
                    .col(
                        timestamp_with_time_zone(ServicePort::CreatedAt)
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        timestamp_with_time_zone(ServicePort::UpdatedAt)
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_service_ports_service_ip_port")
                    .table(ServicePort::Table)
                    .col(ServicePort::ServiceIp)
                    .col(ServicePort::ServicePort)
                    .unique()
                    .to_owned(),
            )
            .await?;

        // ============================================================
        // 3. Create tunnels table, keyed by (host_id, sp_id)
        // ============================================================
        manager
            .create_table(
                Table::create()
                    .table(Tunnel::Table)
                    .if_not_exists()
                    .col(integer(Tunnel::HostId).not_null())
                    .col(integer(Tunnel::SpId).not_null())
                    .col(string_len(Tunnel::Status, 32).not_null())
                    .col(text(Tunnel::LastError).not_null())
                    .col(integer(Tunnel::RetryCount).not_null().default(0))
                    .col(timestamp_with_time_zone_null(Tunnel::LastConnectedAt))
                    .col(string_len(Tunnel::Server, 255).not_null())
                    .col(string_len(Tunnel::Local, 255).not_null())
                    .col(string_len(Tunnel::Remote, 255).not_null())
                    .col(
                        timestamp_with_time_zone(Tunnel::UpdatedAt)
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .primary_key(
                        Index::create()
                            .name("pk_tunnels")
                            .col(Tunnel::HostId)
                            .col(Tunnel::SpId),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_tunnels_host_id")
                            .from(Tunnel::Table, Tunnel::HostId)
                            .to(Host::Table, Host::Id)
                            .on_delete(ForeignKeyAction::Cascade)
                            .on_update(ForeignKeyAction::Cascade),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_tunnels_sp_id")
                            .from(Tunnel::Table, Tunnel::SpId)
                            .to(ServicePort::Table, ServicePort::Id)
                            .on_delete(ForeignKeyAction::Cascade)
                            .on_update(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_tunnels_host_id")
                    .table(Tunnel::Table)
                    .col(Tunnel::HostId)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Tunnel::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(ServicePort::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(Host::Table).to_owned())
            .await?;
        Ok(())
    }
}

#[derive(DeriveIden)]
enum Host {
    #[sea_orm(iden = "hosts")]
    Table,
    Id,
    Ip,
    Port,
    User,
    Password,
    Description,
    Enabled,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum ServicePort {
    #[sea_orm(iden = "service_ports")]
    Table,
    Id,
    ServiceIp,
    ServicePort,
    LocalPort,
    Description,
    CreatedAt,
    UpdatedAt,
}

#[derive(DeriveIden)]
enum Tunnel {
    #[sea_orm(iden = "tunnels")]
    Table,
    HostId,
    SpId,
    Status,
    LastError,
    RetryCount,
    LastConnectedAt,
    Server,
    Local,
    Remote,
    UpdatedAt,
}
