pub mod json;
pub mod memory;

use std::collections::HashMap;

use async_trait::async_trait;
use fleetops_core::{HealthSample, ScheduledUpdate};

/// Persisted uptime document: device name to ordered samples.
pub type UptimeSnapshot = HashMap<String, Vec<HealthSample>>;

/// Storage abstraction for the two documents the engine owns.
///
/// Both documents are rewritten in full on every save. A document that was
/// never written loads as `None`.
#[async_trait]
pub trait DocumentStore: Send + Sync + 'static {
    /// Load the scheduled-updates ledger.
    async fn load_updates(&self) -> Result<Option<Vec<ScheduledUpdate>>, StorageError>;

    /// Overwrite the scheduled-updates ledger.
    async fn save_updates(&self, updates: &[ScheduledUpdate]) -> Result<(), StorageError>;

    /// Load the uptime history.
    async fn load_uptime(&self) -> Result<Option<UptimeSnapshot>, StorageError>;

    /// Overwrite the uptime history.
    async fn save_uptime(&self, snapshot: &UptimeSnapshot) -> Result<(), StorageError>;
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
