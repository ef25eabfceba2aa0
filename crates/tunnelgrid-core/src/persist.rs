//! Narrow persistence surface for running tunnels
//!
//! A runtime only ever touches its own tunnel record; it gets this trait
//! injected at construction and never sees the manager or the wider store.

use async_trait::async_trait;
use sea_orm::DbErr;
use tunnelgrid_db::Store;

use crate::runtime::TunnelKey;

/// Status writes a [`crate::TunnelRuntime`] and its supervisor perform.
#[async_trait]
pub trait TunnelStatusStore: Send + Sync {
    /// Create or reset the record with status `starting` and the resolved
    /// endpoint strings.
    async fn upsert_starting(
        &self,
        key: TunnelKey,
        server: &str,
        local: &str,
        remote: &str,
    ) -> Result<(), DbErr>;

    /// status `connected`, retry count 0, last error cleared.
    async fn mark_connected(&self, key: TunnelKey) -> Result<(), DbErr>;

    /// status `reconnecting`, retry count incremented.
    async fn mark_reconnecting(&self, key: TunnelKey) -> Result<(), DbErr>;

    /// status `error` with the failure message.
    async fn mark_error(&self, key: TunnelKey, message: &str) -> Result<(), DbErr>;

    /// Remove the record entirely.
    async fn delete(&self, key: TunnelKey) -> Result<(), DbErr>;
}

#[async_trait]
impl TunnelStatusStore for Store {
    async fn upsert_starting(
        &self,
        key: TunnelKey,
        server: &str,
        local: &str,
        remote: &str,
    ) -> Result<(), DbErr> {
        self.upsert_tunnel(key.host_id, key.sp_id, server, local, remote)
            .await
    }

    async fn mark_connected(&self, key: TunnelKey) -> Result<(), DbErr> {
        self.mark_tunnel_connected(key.host_id, key.sp_id).await
    }

    async fn mark_reconnecting(&self, key: TunnelKey) -> Result<(), DbErr> {
        self.mark_tunnel_reconnecting(key.host_id, key.sp_id).await
    }

    async fn mark_error(&self, key: TunnelKey, message: &str) -> Result<(), DbErr> {
        self.mark_tunnel_error(key.host_id, key.sp_id, message).await
    }

    async fn delete(&self, key: TunnelKey) -> Result<(), DbErr> {
        self.delete_tunnel(key.host_id, key.sp_id).await
    }
}
