use std::sync::Arc;

use fleetops_core::{ClientId, ScheduledUpdate, UpdateHistoryEntry, UpdateId, UpdateStatus};
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::{error, info};

use crate::storage::DocumentStore;

/// A request to run `command` on some of a client's servers at a given time.
#[derive(Debug, Clone, Deserialize)]
pub struct UpdateRequest {
    pub client_id: ClientId,
    pub servers: Vec<String>,
    pub scheduled_time: String,
    pub update_type: String,
    pub command: String,
}

/// Result of trying to move an update into `in_progress`.
#[derive(Debug, Clone, PartialEq)]
pub enum Claim {
    Started(ScheduledUpdate),
    Missing,
    NotScheduled(UpdateStatus),
}

/// Result of trying to remove a pending update.
#[derive(Debug, Clone, PartialEq)]
pub enum Removal {
    Removed(ScheduledUpdate),
    Missing,
    AlreadyStarted(UpdateStatus),
}

/// Durable registry of scheduled updates plus the in-memory history log.
///
/// Every mutation rewrites the scheduled-updates document while the lock is
/// held, so the file always reflects a prefix of the mutation order. Write
/// failures are logged and the in-memory state stays authoritative.
#[derive(Clone)]
pub struct UpdateLedger {
    inner: Arc<Mutex<Inner>>,
    store: Arc<dyn DocumentStore>,
}

struct Inner {
    updates: Vec<ScheduledUpdate>,
    history: Vec<UpdateHistoryEntry>,
    next_id: u64,
}

impl UpdateLedger {
    /// Load the ledger from the store. An unreadable document is logged and
    /// treated as empty.
    pub async fn load(store: Arc<dyn DocumentStore>) -> Self {
        let updates = match store.load_updates().await {
            Ok(updates) => updates.unwrap_or_default(),
            Err(e) => {
                error!(error = %e, "Failed to load scheduled updates, starting empty");
                Vec::new()
            }
        };
        let next_id = updates.iter().map(|u| u.id.0).max().unwrap_or(0) + 1;
        info!(count = updates.len(), next_id, "Loaded scheduled updates");

        Self {
            inner: Arc::new(Mutex::new(Inner {
                updates,
                history: Vec::new(),
                next_id,
            })),
            store,
        }
    }

    async fn persist(&self, updates: &[ScheduledUpdate]) {
        if let Err(e) = self.store.save_updates(updates).await {
            error!(error = %e, "Failed to persist scheduled updates");
        }
    }

    /// Record a new `scheduled` update and assign it the next id.
    /// Duplicate server names are dropped, keeping the first occurrence.
    pub async fn create(&self, request: UpdateRequest) -> ScheduledUpdate {
        let mut servers: Vec<String> = Vec::with_capacity(request.servers.len());
        for server in request.servers {
            if !servers.contains(&server) {
                servers.push(server);
            }
        }

        let mut inner = self.inner.lock().await;
        let update = ScheduledUpdate {
            id: UpdateId(inner.next_id),
            client_id: request.client_id,
            servers,
            scheduled_time: request.scheduled_time,
            update_type: request.update_type,
            command: request.command,
            status: UpdateStatus::Scheduled,
            created_at: jiff::Timestamp::now(),
            completed_at: None,
            results: None,
            error: None,
        };
        inner.next_id += 1;
        inner.updates.push(update.clone());
        self.persist(&inner.updates).await;

        update
    }

    pub async fn get(&self, id: UpdateId) -> Option<ScheduledUpdate> {
        let inner = self.inner.lock().await;
        inner.updates.iter().find(|u| u.id == id).cloned()
    }

    pub async fn list(&self) -> Vec<ScheduledUpdate> {
        self.inner.lock().await.updates.clone()
    }

    /// Updates still waiting for their timer.
    pub async fn scheduled(&self) -> Vec<ScheduledUpdate> {
        let inner = self.inner.lock().await;
        inner
            .updates
            .iter()
            .filter(|u| u.status == UpdateStatus::Scheduled)
            .cloned()
            .collect()
    }

    /// Atomically move a `scheduled` update to `in_progress` and persist it.
    pub async fn begin(&self, id: UpdateId) -> Claim {
        let mut inner = self.inner.lock().await;
        let Some(update) = inner.updates.iter_mut().find(|u| u.id == id) else {
            return Claim::Missing;
        };
        if update.status != UpdateStatus::Scheduled {
            return Claim::NotScheduled(update.status);
        }

        update.status = UpdateStatus::InProgress;
        let started = update.clone();
        self.persist(&inner.updates).await;

        Claim::Started(started)
    }

    /// Atomically remove an update that has not started yet.
    pub async fn remove_if_scheduled(&self, id: UpdateId) -> Removal {
        let mut inner = self.inner.lock().await;
        let Some(pos) = inner.updates.iter().position(|u| u.id == id) else {
            return Removal::Missing;
        };
        let status = inner.updates[pos].status;
        if status != UpdateStatus::Scheduled {
            return Removal::AlreadyStarted(status);
        }

        let removed = inner.updates.remove(pos);
        self.persist(&inner.updates).await;

        Removal::Removed(removed)
    }

    /// Move an `in_progress` update to a terminal status and persist it.
    /// Returns the finished update, or `None` when the update is not in
    /// progress.
    pub async fn finish(
        &self,
        id: UpdateId,
        status: UpdateStatus,
        results: Option<Vec<String>>,
        error: Option<String>,
    ) -> Option<ScheduledUpdate> {
        debug_assert!(status.is_terminal());

        let mut inner = self.inner.lock().await;
        let update = inner
            .updates
            .iter_mut()
            .find(|u| u.id == id && u.status == UpdateStatus::InProgress)?;

        update.status = status;
        update.results = results;
        update.error = error;
        update.completed_at = Some(jiff::Timestamp::now());
        let finished = update.clone();
        self.persist(&inner.updates).await;

        Some(finished)
    }

    /// Fail a `scheduled` update whose stored time cannot be used.
    pub async fn mark_unschedulable(&self, id: UpdateId, reason: String) -> bool {
        let mut inner = self.inner.lock().await;
        let Some(update) = inner
            .updates
            .iter_mut()
            .find(|u| u.id == id && u.status == UpdateStatus::Scheduled)
        else {
            return false;
        };

        update.status = UpdateStatus::Failed;
        update.error = Some(reason);
        self.persist(&inner.updates).await;

        true
    }

    /// Fail every update left `in_progress`, recording `reason` as its error.
    /// Only valid before anything can begin, i.e. at startup. Returns the
    /// ids that changed.
    pub async fn fail_interrupted(&self, reason: &str) -> Vec<UpdateId> {
        let mut inner = self.inner.lock().await;
        let now = jiff::Timestamp::now();
        let mut failed = Vec::new();

        for update in inner
            .updates
            .iter_mut()
            .filter(|u| u.status == UpdateStatus::InProgress)
        {
            update.status = UpdateStatus::Failed;
            update.error = Some(reason.to_string());
            update.completed_at = Some(now);
            failed.push(update.id);
        }

        if !failed.is_empty() {
            self.persist(&inner.updates).await;
        }
        failed
    }

    /// Append an immutable copy of a finished update to the history log.
    pub async fn append_history(&self, update: ScheduledUpdate) {
        let mut inner = self.inner.lock().await;
        inner.history.push(UpdateHistoryEntry {
            recorded_at: jiff::Timestamp::now(),
            update,
        });
    }

    pub async fn history(&self) -> Vec<UpdateHistoryEntry> {
        self.inner.lock().await.history.clone()
    }
}
