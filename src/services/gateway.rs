use crate::core::{ItemId, ScopeInfo};
use crate::services::archive::{ArchiveError, FsArchive};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("Unknown scope: {scope_id}")]
    UnknownScope { scope_id: u64 },

    #[error("Archive error: {0}")]
    Archive(#[from] ArchiveError),

    #[error("Gateway task failed: {message}")]
    Task { message: String },

    #[error("Delivery failed: {message}")]
    Delivery { message: String },
}

/// A message that still exists on the chat side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageRef {
    pub container_id: u64,
    pub scope_id: u64,
    pub message_id: u64,
    link_base: String,
}

impl MessageRef {
    pub fn new(link_base: &str, container_id: u64, scope_id: u64, message_id: u64) -> Self {
        Self {
            container_id,
            scope_id,
            message_id,
            link_base: link_base.trim_end_matches('/').to_string(),
        }
    }

    pub fn jump_link(&self) -> String {
        format!(
            "{}/{}/{}/{}",
            self.link_base, self.container_id, self.scope_id, self.message_id
        )
    }
}

/// The chat connection, as seen by the dispatcher and the admission gate.
#[async_trait]
pub trait Gateway: Send + Sync {
    /// Every scope across every container the connection can see.
    async fn scopes(&self) -> Result<Vec<ScopeInfo>, GatewayError>;

    async fn resolve_message(
        &self,
        scope_id: u64,
        message_id: u64,
    ) -> Result<Option<MessageRef>, GatewayError>;

    async fn send_message(&self, scope_id: u64, text: &str) -> Result<(), GatewayError>;
}

/// Gateway backed by the archive on disk and a configured scope layout.
///
/// A message resolves while the archive still holds a file for it.
/// Notifications are written to the log and stdout.
pub struct LocalGateway {
    scopes: HashMap<u64, ScopeInfo>,
    archive: Arc<FsArchive>,
    link_base: String,
}

impl LocalGateway {
    pub fn new(scopes: Vec<ScopeInfo>, archive: Arc<FsArchive>, link_base: &str) -> Self {
        Self {
            scopes: scopes.into_iter().map(|s| (s.scope_id, s)).collect(),
            archive,
            link_base: link_base.to_string(),
        }
    }
}

#[async_trait]
impl Gateway for LocalGateway {
    async fn scopes(&self) -> Result<Vec<ScopeInfo>, GatewayError> {
        Ok(self.scopes.values().cloned().collect())
    }

    async fn resolve_message(
        &self,
        scope_id: u64,
        message_id: u64,
    ) -> Result<Option<MessageRef>, GatewayError> {
        let container_id = self
            .scopes
            .get(&scope_id)
            .map(|s| s.container_id)
            .ok_or(GatewayError::UnknownScope { scope_id })?;

        let archive = self.archive.clone();
        let id = ItemId::new(scope_id, message_id);
        let held = tokio::task::spawn_blocking(move || archive.holds(id))
            .await
            .map_err(|e| GatewayError::Task {
                message: e.to_string(),
            })??;

        Ok(held.then(|| MessageRef::new(&self.link_base, container_id, scope_id, message_id)))
    }

    async fn send_message(&self, scope_id: u64, text: &str) -> Result<(), GatewayError> {
        let scope = self
            .scopes
            .get(&scope_id)
            .ok_or(GatewayError::UnknownScope { scope_id })?;
        log::info!("Notification to #{} ({}): {}", scope.name, scope_id, text);
        println!("[#{}] {}", scope.name, text);
        Ok(())
    }
}
