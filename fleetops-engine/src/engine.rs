use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use fleetops_core::{
    ClientId, ScheduledUpdate, Ticket, UpdateHistoryEntry, UpdateId, UpdateStatus, UptimeReport,
};
use jiff::Timestamp;
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::config::{ActionsConfig, Config};
use crate::error::EngineError;
use crate::executor::{CommandOutcome, RemoteExecutor};
use crate::ledger::{Removal, UpdateLedger, UpdateRequest};
use crate::monitor::HealthMonitor;
use crate::notify::Notifier;
use crate::orchestrator::UpdateOrchestrator;
use crate::registry::{Client, DeviceRegistry};
use crate::report::{self, UpdateReport};
use crate::scheduler::{RecoverySummary, UpdateScheduler, parse_schedule_time};
use crate::storage::DocumentStore;
use crate::ticketing::TicketingService;
use crate::uptime::{DEFAULT_CAPACITY, UptimeStore};

/// Lookback used for uptime queries when the caller has no preference.
pub const DEFAULT_UPTIME_HOURS: u32 = 24;

/// Tunables that do not come from collaborators.
#[derive(Debug, Clone)]
pub struct EngineOptions {
    pub probe_command: String,
    pub max_concurrent_probes: usize,
    pub history_capacity: usize,
    pub actions: ActionsConfig,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            probe_command: "hostname".to_string(),
            max_concurrent_probes: 16,
            history_capacity: DEFAULT_CAPACITY,
            actions: ActionsConfig::default(),
        }
    }
}

impl From<&Config> for EngineOptions {
    fn from(config: &Config) -> Self {
        Self {
            probe_command: config.monitor.probe_command.clone(),
            max_concurrent_probes: config.monitor.max_concurrent_probes,
            history_capacity: config.monitor.history_capacity,
            actions: config.actions.clone(),
        }
    }
}

/// Result of a cancel request. None of these is an error.
#[derive(Debug, Clone, PartialEq)]
pub enum CancelOutcome {
    /// The update was still pending and has been removed.
    Cancelled(ScheduledUpdate),
    /// The update already started or finished; nothing changed.
    AlreadyStarted(UpdateStatus),
    NotFound,
}

/// Remote operations that can be run against a single device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceAction {
    Restart,
    Shutdown,
    Fix,
    Alert,
}

impl DeviceAction {
    fn command(self, actions: &ActionsConfig, stamp: &str) -> String {
        match self {
            DeviceAction::Restart => actions.restart.clone(),
            DeviceAction::Shutdown => actions.shutdown.clone(),
            DeviceAction::Fix => actions.fix.replace("{stamp}", stamp),
            DeviceAction::Alert => actions.alert.replace("{stamp}", stamp),
        }
    }

    fn notification(self, device: &str, now: Timestamp, output: &str) -> Option<(String, String)> {
        match self {
            DeviceAction::Restart => Some((
                format!("Service Restart - {device}"),
                format!("Service restarted successfully on {device} at {now}"),
            )),
            DeviceAction::Shutdown => Some((
                format!("Device Shutdown - {device}"),
                format!("Device shutdown initiated on {device} at {now}"),
            )),
            DeviceAction::Fix => Some((
                format!("Common Fix Applied - {device}"),
                format!("Common fix applied to {device} at {now}. {}", output.trim()),
            )),
            DeviceAction::Alert => None,
        }
    }
}

/// The update scheduling and execution engine.
///
/// Owns the shared collections and exposes the operations a request layer
/// calls. Background work (firing timers, periodic health sweeps) starts
/// only through [`FleetEngine::spawn_dispatcher`] and
/// [`FleetEngine::spawn_monitor`].
#[derive(Clone)]
pub struct FleetEngine {
    registry: DeviceRegistry,
    uptime: UptimeStore,
    ledger: UpdateLedger,
    scheduler: UpdateScheduler,
    tickets: TicketingService,
    orchestrator: UpdateOrchestrator,
    monitor: HealthMonitor,
    executor: Arc<dyn RemoteExecutor>,
    notifier: Arc<dyn Notifier>,
    actions: Arc<ActionsConfig>,
    fired: Arc<Mutex<Option<mpsc::UnboundedReceiver<UpdateId>>>>,
}

impl FleetEngine {
    /// Load both persisted documents and re-arm every pending update.
    ///
    /// Updates that are already due fire as soon as the dispatcher starts.
    pub async fn open(
        registry: DeviceRegistry,
        executor: Arc<dyn RemoteExecutor>,
        store: Arc<dyn DocumentStore>,
        notifier: Arc<dyn Notifier>,
        options: EngineOptions,
    ) -> Self {
        let uptime = UptimeStore::new(registry.device_names().await, options.history_capacity);
        match store.load_uptime().await {
            Ok(Some(snapshot)) => {
                let restored = uptime.restore(snapshot).await;
                info!(restored, "Restored uptime history");
            }
            Ok(None) => debug!("No uptime history to restore"),
            Err(e) => error!(error = %e, "Failed to load uptime history, starting empty"),
        }

        let ledger = UpdateLedger::load(Arc::clone(&store)).await;
        let (scheduler, fired) = UpdateScheduler::new();
        let tickets = TicketingService::new(registry.clone());
        let orchestrator = UpdateOrchestrator::new(
            ledger.clone(),
            registry.clone(),
            Arc::clone(&executor),
            tickets.clone(),
            Arc::clone(&notifier),
        );
        let monitor = HealthMonitor::new(
            registry.clone(),
            uptime.clone(),
            Arc::clone(&executor),
            store,
            &options.probe_command,
            options.max_concurrent_probes,
        );

        let engine = Self {
            registry,
            uptime,
            ledger,
            scheduler,
            tickets,
            orchestrator,
            monitor,
            executor,
            notifier,
            actions: Arc::new(options.actions),
            fired: Arc::new(Mutex::new(Some(fired))),
        };
        engine.recover().await;
        engine
    }

    async fn recover(&self) -> RecoverySummary {
        self.scheduler.recover_on_startup(&self.ledger).await
    }

    /// Start executing updates whose timers fire. Each update runs in its own
    /// task; on cancellation pending timers are dropped and running updates
    /// are awaited.
    pub fn spawn_dispatcher(&self, cancel: CancellationToken) -> Result<JoinHandle<()>, EngineError> {
        let mut fired = self
            .fired
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or(EngineError::DispatcherRunning)?;

        let engine = self.clone();
        Ok(tokio::spawn(async move {
            info!("Update dispatcher started");
            let mut running = JoinSet::new();

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        info!("Update dispatcher shutting down");
                        break;
                    }
                    Some(id) = fired.recv() => {
                        let orchestrator = engine.orchestrator.clone();
                        running.spawn(async move {
                            match orchestrator.execute(id).await {
                                Ok(update) => debug!(update_id = %id, status = %update.status, "Timer run finished"),
                                Err(e) => debug!(update_id = %id, reason = %e, "Timer fired for update that cannot run"),
                            }
                        });
                    }
                    Some(joined) = running.join_next(), if !running.is_empty() => {
                        if let Err(e) = joined {
                            error!(error = %e, "Update task aborted");
                        }
                    }
                }
            }

            engine.scheduler.shutdown();
            while let Some(joined) = running.join_next().await {
                if let Err(e) = joined {
                    error!(error = %e, "Update task aborted");
                }
            }
        }))
    }

    /// Run an initial sweep, then sweep every `interval` until cancelled.
    pub fn spawn_monitor(&self, interval: Duration, cancel: CancellationToken) -> JoinHandle<()> {
        let monitor = self.monitor.clone();
        tokio::spawn(monitor.run(interval, cancel))
    }

    /// Every client with its devices and their last known status.
    pub async fn list_devices(&self) -> Vec<Client> {
        self.registry.clients().await
    }

    /// Probe every device now and return the refreshed view.
    pub async fn refresh_devices(&self) -> Vec<Client> {
        self.monitor.sweep().await;
        self.registry.clients().await
    }

    pub async fn device_uptime(&self, device: &str, hours: u32) -> Result<UptimeReport, EngineError> {
        self.uptime
            .device_uptime(device, hours, Timestamp::now())
            .await
            .ok_or_else(|| EngineError::UnknownDevice(device.to_string()))
    }

    pub async fn all_uptime(&self, hours: u32) -> BTreeMap<String, UptimeReport> {
        self.uptime.all_uptime(hours, Timestamp::now()).await
    }

    /// Record a new update and arm its timer.
    ///
    /// The time is validated before anything is recorded, so a rejected
    /// request leaves no trace.
    #[instrument(skip_all, fields(client_id = %request.client_id))]
    pub async fn schedule_update(&self, request: UpdateRequest) -> Result<ScheduledUpdate, EngineError> {
        let due = parse_schedule_time(&request.scheduled_time)?;
        let client = self
            .registry
            .client(request.client_id)
            .await
            .ok_or(EngineError::ClientNotFound(request.client_id))?;

        let update = self.ledger.create(request).await;
        self.scheduler.schedule_at(update.id, due);
        info!(update_id = %update.id, due = %due, "Update scheduled");

        if let Some(to) = client.contact_email.as_deref() {
            let subject = format!("Scheduled Update Notification - {}", client.name);
            let body = format!(
                "A system update has been scheduled for your servers.\n\n\
                 Update Details:\n\
                 - Scheduled Time: {}\n\
                 - Servers: {}\n\
                 - Update Type: {}\n",
                update.scheduled_time,
                update.servers.join(", "),
                update.update_type,
            );
            if !self.notifier.send(to, &subject, &body).await {
                warn!(to, "Scheduling notification was not delivered");
            }
        }

        Ok(update)
    }

    /// Remove a pending update and its timer.
    ///
    /// Races against the timer firing are decided by the ledger: whichever
    /// of the two claims the `scheduled` entry first takes effect.
    pub async fn cancel_update(&self, id: UpdateId) -> CancelOutcome {
        match self.ledger.remove_if_scheduled(id).await {
            Removal::Removed(update) => {
                self.scheduler.cancel(id);
                info!(update_id = %id, "Update cancelled");
                CancelOutcome::Cancelled(update)
            }
            Removal::AlreadyStarted(status) => {
                debug!(update_id = %id, %status, "Cancel ignored, update already started");
                CancelOutcome::AlreadyStarted(status)
            }
            Removal::Missing => CancelOutcome::NotFound,
        }
    }

    /// Run a pending update immediately instead of waiting for its timer.
    pub async fn run_update_now(&self, id: UpdateId) -> Result<ScheduledUpdate, EngineError> {
        self.scheduler.cancel(id);
        self.orchestrator.execute(id).await
    }

    pub async fn scheduled_updates(&self) -> Vec<ScheduledUpdate> {
        self.ledger.list().await
    }

    pub async fn update_history(&self) -> Vec<UpdateHistoryEntry> {
        self.ledger.history().await
    }

    pub async fn tickets(&self) -> Vec<Ticket> {
        self.tickets.tickets().await
    }

    /// Aggregate over history entries completed within `range` (`"<n>d"`).
    pub async fn update_report(&self, range: Option<&str>) -> Result<UpdateReport, EngineError> {
        let days = report::parse_range(range)?;
        let history = self.ledger.history().await;
        let clients = self.registry.clients().await;
        Ok(report::build_report(&history, &clients, days, Timestamp::now()))
    }

    /// Run one of the configured device commands and notify the client when
    /// it succeeds.
    #[instrument(skip(self))]
    pub async fn device_action(
        &self,
        client_id: ClientId,
        device: &str,
        action: DeviceAction,
    ) -> Result<CommandOutcome, EngineError> {
        let target = self.registry.resolve(client_id, device).await?;
        let now = Timestamp::now();
        let stamp = now.strftime("%Y%m%d_%H%M%S").to_string();
        let command = action.command(&self.actions, &stamp);

        let outcome = self.executor.run(&target.target, &command).await;
        if !outcome.success {
            warn!(reason = %outcome.output.trim(), "Device action failed");
            return Ok(outcome);
        }
        info!("Device action succeeded");

        let contact = self
            .registry
            .client(client_id)
            .await
            .and_then(|c| c.contact_email);
        if let (Some(to), Some((subject, body))) =
            (contact, action.notification(device, now, &outcome.output))
        {
            if !self.notifier.send(&to, &subject, &body).await {
                warn!(to = %to, "Device action notification was not delivered");
            }
        }

        Ok(outcome)
    }

    /// Pending timers, for inspection.
    pub fn pending_timers(&self) -> Vec<(UpdateId, Timestamp)> {
        self.scheduler.pending()
    }
}
