//! Outbound seams of the orchestrator: authorization, plan limits, and
//! user-facing notifications. Each trait ships with a default implementation.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::core::error::Result;
use crate::core::store::DatasourceStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    ViewDatasource,
    CreateDatasource,
    EditDatasource,
    SyncDatasource,
    DeleteDatasource,
}

impl Capability {
    pub fn as_str(&self) -> &'static str {
        match self {
            Capability::ViewDatasource => "VIEW_DATASOURCE",
            Capability::CreateDatasource => "CREATE_DATASOURCE",
            Capability::EditDatasource => "EDIT_DATASOURCE",
            Capability::SyncDatasource => "SYNC_DATASOURCE",
            Capability::DeleteDatasource => "DELETE_DATASOURCE",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Principal {
    Account(String),
    /// Scheduler, queue worker and admin commands.
    System,
}

impl std::fmt::Display for Principal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Principal::Account(id) => write!(f, "account:{}", id),
            Principal::System => write!(f, "system"),
        }
    }
}

#[async_trait]
pub trait Authorizer: Send + Sync {
    async fn has_capability(
        &self,
        principal: &Principal,
        team_id: Uuid,
        capability: Capability,
    ) -> Result<bool>;
}

/// Grants everything. Team membership lives outside this service.
pub struct AllowAllAuthorizer;

#[async_trait]
impl Authorizer for AllowAllAuthorizer {
    async fn has_capability(
        &self,
        _principal: &Principal,
        _team_id: Uuid,
        _capability: Capability,
    ) -> Result<bool> {
        Ok(true)
    }
}

#[async_trait]
pub trait UsageLimits: Send + Sync {
    async fn may_add_datasource(&self, team_id: Uuid) -> Result<bool>;
}

/// Caps live datasources per team. `max = None` disables the cap.
pub struct TeamQuota {
    store: Arc<dyn DatasourceStore>,
    max: Option<usize>,
}

impl TeamQuota {
    pub fn new(store: Arc<dyn DatasourceStore>, max: Option<usize>) -> Self {
        Self { store, max }
    }
}

#[async_trait]
impl UsageLimits for TeamQuota {
    async fn may_add_datasource(&self, team_id: Uuid) -> Result<bool> {
        match self.max {
            None => Ok(true),
            Some(max) => Ok(self.store.count_for_team(team_id).await? < max),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationKind {
    SyncSucceeded,
    SyncFailed,
}

#[derive(Debug, Clone)]
pub struct Notification {
    pub team_id: Uuid,
    pub datasource_id: Uuid,
    pub kind: NotificationKind,
    pub message: String,
}

/// Fire-and-forget delivery; implementations must not fail the caller.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, notification: Notification);
}

pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, notification: Notification) {
        match notification.kind {
            NotificationKind::SyncSucceeded => info!(
                team_id = %notification.team_id,
                datasource_id = %notification.datasource_id,
                "{}",
                notification.message
            ),
            NotificationKind::SyncFailed => warn!(
                team_id = %notification.team_id,
                datasource_id = %notification.datasource_id,
                "{}",
                notification.message
            ),
        }
    }
}
