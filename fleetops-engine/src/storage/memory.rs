use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use fleetops_core::ScheduledUpdate;

use crate::storage::{DocumentStore, StorageError, UptimeSnapshot};

/// In-memory document store.
/// This is primarily intended for testing and as a reference
/// implementation of the DocumentStore trait. Cloning shares the documents,
/// which lets tests simulate a restart by building a second engine on the
/// same store.
#[derive(Clone, Default)]
pub struct MemoryStore {
    updates: Arc<Mutex<Option<Vec<ScheduledUpdate>>>>,
    uptime: Arc<Mutex<Option<UptimeSnapshot>>>,
    update_writes: Arc<Mutex<usize>>,
}

impl MemoryStore {
    /// Number of times the scheduled-updates document was written.
    pub fn update_writes(&self) -> usize {
        *self.update_writes.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Current scheduled-updates document, if any.
    pub fn updates(&self) -> Option<Vec<ScheduledUpdate>> {
        self.updates
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Current uptime document, if any.
    pub fn uptime(&self) -> Option<UptimeSnapshot> {
        self.uptime
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn load_updates(&self) -> Result<Option<Vec<ScheduledUpdate>>, StorageError> {
        Ok(self.updates())
    }

    async fn save_updates(&self, updates: &[ScheduledUpdate]) -> Result<(), StorageError> {
        *self.updates.lock().unwrap_or_else(PoisonError::into_inner) = Some(updates.to_vec());
        *self
            .update_writes
            .lock()
            .unwrap_or_else(PoisonError::into_inner) += 1;
        Ok(())
    }

    async fn load_uptime(&self) -> Result<Option<UptimeSnapshot>, StorageError> {
        Ok(self.uptime())
    }

    async fn save_uptime(&self, snapshot: &UptimeSnapshot) -> Result<(), StorageError> {
        *self.uptime.lock().unwrap_or_else(PoisonError::into_inner) = Some(snapshot.clone());
        Ok(())
    }
}
