use std::sync::Arc;

use fleetops_core::{DeviceStatus, ScheduledUpdate, UpdateId, UpdateStatus};
use tracing::{error, info, instrument, warn};

use crate::error::EngineError;
use crate::executor::RemoteExecutor;
use crate::ledger::{Claim, UpdateLedger};
use crate::notify::Notifier;
use crate::registry::{Client, DeviceRegistry};
use crate::ticketing::TicketingService;

/// What happened on one target server.
#[derive(Debug, Clone, PartialEq)]
pub struct TargetOutcome {
    pub server: String,
    pub success: bool,
    /// Human readable result line stored on the update.
    pub line: String,
}

impl TargetOutcome {
    fn ok(server: &str, output: &str) -> Self {
        Self {
            server: server.to_string(),
            success: true,
            line: format!("ok on {server}: {}", output.trim_end()),
        }
    }

    fn failed(server: &str, reason: &str) -> Self {
        Self {
            server: server.to_string(),
            success: false,
            line: format!("failed on {server}: {}", reason.trim_end()),
        }
    }
}

/// Terminal status for a finished batch.
///
/// Every target succeeding (or no targets at all) is `Completed`, no target
/// succeeding is `Failed`, anything in between is `Partial`.
pub fn decide_status(outcomes: &[TargetOutcome]) -> UpdateStatus {
    let succeeded = outcomes.iter().filter(|o| o.success).count();
    if succeeded == outcomes.len() {
        UpdateStatus::Completed
    } else if succeeded == 0 {
        UpdateStatus::Failed
    } else {
        UpdateStatus::Partial
    }
}

/// Runs one scheduled update end to end.
#[derive(Clone)]
pub struct UpdateOrchestrator {
    ledger: UpdateLedger,
    registry: DeviceRegistry,
    executor: Arc<dyn RemoteExecutor>,
    tickets: TicketingService,
    notifier: Arc<dyn Notifier>,
}

impl UpdateOrchestrator {
    pub fn new(
        ledger: UpdateLedger,
        registry: DeviceRegistry,
        executor: Arc<dyn RemoteExecutor>,
        tickets: TicketingService,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            ledger,
            registry,
            executor,
            tickets,
            notifier,
        }
    }

    /// Claim the update, run its command on every target in order, and
    /// record the outcome.
    ///
    /// Only an update in `scheduled` can be claimed; any other state is
    /// rejected without side effects. After the terminal status is persisted
    /// a ticket is opened, the client is notified and the update is appended
    /// to the history. Those follow-ups are best-effort.
    #[instrument(name = "execute_update", skip(self), fields(update_id = %id))]
    pub async fn execute(&self, id: UpdateId) -> Result<ScheduledUpdate, EngineError> {
        let update = match self.ledger.begin(id).await {
            Claim::Started(update) => update,
            Claim::Missing => return Err(EngineError::UpdateNotFound(id)),
            Claim::NotScheduled(status) => return Err(EngineError::NotRunnable { id, status }),
        };
        info!(client_id = %update.client_id, servers = update.servers.len(), "Update started");

        let Some(client) = self.registry.client(update.client_id).await else {
            warn!(client_id = %update.client_id, "Client not found, failing update");
            let failed = self
                .finish(id, UpdateStatus::Failed, None, Some("Client not found".to_string()))
                .await?;
            self.follow_up(&failed, None).await;
            return Ok(failed);
        };

        let mut outcomes = Vec::with_capacity(update.servers.len());
        for server in &update.servers {
            let Some(device) = client.device(server) else {
                warn!(server = %server, "Target server not found");
                outcomes.push(TargetOutcome::failed(server, "server not found"));
                continue;
            };

            let outcome = self.executor.run(&device.target, &update.command).await;
            let status = if outcome.success {
                outcomes.push(TargetOutcome::ok(server, &outcome.output));
                DeviceStatus::Healthy
            } else {
                warn!(server = %server, reason = %outcome.output.trim(), "Update failed on target");
                outcomes.push(TargetOutcome::failed(server, &outcome.output));
                DeviceStatus::Critical
            };
            self.registry
                .mark_status(client.id, server, status, Some(outcome.latency_ms))
                .await;
        }

        let status = decide_status(&outcomes);
        let results = outcomes.into_iter().map(|o| o.line).collect();
        let finished = self.finish(id, status, Some(results), None).await?;
        info!(status = %finished.status, "Update finished");

        self.follow_up(&finished, Some(&client)).await;
        Ok(finished)
    }

    async fn finish(
        &self,
        id: UpdateId,
        status: UpdateStatus,
        results: Option<Vec<String>>,
        error: Option<String>,
    ) -> Result<ScheduledUpdate, EngineError> {
        // The claim above makes this update ours until it is terminal, so
        // only a vanished entry can make this fail.
        self.ledger
            .finish(id, status, results, error)
            .await
            .ok_or(EngineError::UpdateNotFound(id))
    }

    async fn follow_up(&self, update: &ScheduledUpdate, client: Option<&Client>) {
        if let Err(e) = self.tickets.create_ticket(update).await {
            error!(error = %e, "Failed to create ticket");
        }

        if let Some(client) = client {
            self.notify_completion(update, client).await;
        }

        self.ledger.append_history(update.clone()).await;
    }

    async fn notify_completion(&self, update: &ScheduledUpdate, client: &Client) {
        let Some(to) = client.contact_email.as_deref() else {
            return;
        };

        let completed_at = update
            .completed_at
            .map(|t| t.to_string())
            .unwrap_or_default();
        let results = update.results.as_deref().unwrap_or_default().join("\n");
        let body = format!(
            "Update completed for {name}.\n\n\
             Update Details:\n\
             - Type: {kind}\n\
             - Scheduled Time: {scheduled}\n\
             - Completed At: {completed_at}\n\
             - Status: {status}\n\n\
             Results:\n{results}\n",
            name = client.name,
            kind = update.update_type,
            scheduled = update.scheduled_time,
            status = update.status,
        );

        let subject = format!("Update Completed - {}", client.name);
        if !self.notifier.send(to, &subject, &body).await {
            warn!(to, "Completion notification was not delivered");
        }
    }
}
