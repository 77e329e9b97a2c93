use std::sync::Arc;
use std::time::Duration;

use fleetops_core::{HealthSample, HealthStatus};
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::executor::RemoteExecutor;
use crate::registry::DeviceRegistry;
use crate::storage::DocumentStore;
use crate::uptime::UptimeStore;

/// Outcome counts of one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepSummary {
    pub probed: usize,
    pub healthy: usize,
    pub critical: usize,
    /// Probe tasks that panicked or were cancelled.
    pub aborted: usize,
}

/// Periodically probes every registered device.
#[derive(Clone)]
pub struct HealthMonitor {
    registry: DeviceRegistry,
    uptime: UptimeStore,
    executor: Arc<dyn RemoteExecutor>,
    store: Arc<dyn DocumentStore>,
    probe_command: Arc<str>,
    max_concurrent_probes: usize,
    /// Held from snapshot to save, so saves land in snapshot order.
    persist_lock: Arc<Mutex<()>>,
}

impl HealthMonitor {
    pub fn new(
        registry: DeviceRegistry,
        uptime: UptimeStore,
        executor: Arc<dyn RemoteExecutor>,
        store: Arc<dyn DocumentStore>,
        probe_command: &str,
        max_concurrent_probes: usize,
    ) -> Self {
        Self {
            registry,
            uptime,
            executor,
            store,
            probe_command: Arc::from(probe_command),
            max_concurrent_probes: max_concurrent_probes.max(1),
            persist_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Probe every device once, record the results and persist the uptime
    /// document.
    ///
    /// Probes run concurrently, at most `max_concurrent_probes` at a time.
    /// A probe that fails or panics only affects its own device.
    #[instrument(name = "sweep", skip_all)]
    pub async fn sweep(&self) -> SweepSummary {
        let targets = self.registry.probe_targets().await;
        let permits = Arc::new(Semaphore::new(self.max_concurrent_probes));
        let mut probes = JoinSet::new();

        for probe in targets {
            let executor = Arc::clone(&self.executor);
            let command = Arc::clone(&self.probe_command);
            let permits = Arc::clone(&permits);

            probes.spawn(async move {
                let _permit = permits.acquire_owned().await.ok();
                let outcome = executor.run(&probe.target, &command).await;
                (probe, outcome)
            });
        }

        let mut summary = SweepSummary::default();
        while let Some(joined) = probes.join_next().await {
            let (probe, outcome) = match joined {
                Ok(result) => result,
                Err(e) => {
                    error!(error = %e, "Probe task aborted");
                    summary.aborted += 1;
                    continue;
                }
            };

            let status = HealthStatus::from_success(outcome.success);
            summary.probed += 1;
            match status {
                HealthStatus::Healthy => summary.healthy += 1,
                HealthStatus::Critical => {
                    summary.critical += 1;
                    warn!(device = %probe.name, reason = %outcome.output.trim(), "Device probe failed");
                }
            }

            self.registry
                .mark_status(
                    probe.client_id,
                    &probe.name,
                    status.into(),
                    Some(outcome.latency_ms),
                )
                .await;

            let sample = HealthSample {
                timestamp: jiff::Timestamp::now(),
                status,
                response_time_ms: outcome.latency_ms,
            };
            if !self.uptime.record(&probe.name, sample).await {
                debug!(device = %probe.name, "No uptime series for device");
            }
        }

        self.persist().await;

        info!(
            probed = summary.probed,
            healthy = summary.healthy,
            critical = summary.critical,
            aborted = summary.aborted,
            "Sweep complete"
        );
        summary
    }

    async fn persist(&self) {
        let _guard = self.persist_lock.lock().await;
        let snapshot = self.uptime.snapshot().await;
        if let Err(e) = self.store.save_uptime(&snapshot).await {
            error!(error = %e, "Failed to persist uptime history");
        }
    }

    /// Sweep every `interval` until cancelled. The first sweep runs
    /// immediately.
    #[instrument(name = "health_monitor", skip_all, fields(interval_secs = interval.as_secs()))]
    pub async fn run(self, interval: Duration, cancel: CancellationToken) {
        info!("Health monitor started");

        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Health monitor shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    self.sweep().await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Instant;

    use fleetops_core::{ClientId, DeviceStatus, ScheduledUpdate};

    use crate::config::{ClientConfig, DeviceConfig};
    use crate::executor::mock::MockExecutor;
    use crate::storage::memory::MemoryStore;
    use crate::storage::{StorageError, UptimeSnapshot};

    use super::*;

    fn device(name: &str, address: &str) -> DeviceConfig {
        DeviceConfig {
            name: name.to_string(),
            address: address.to_string(),
            port: 22,
            username: "root".to_string(),
            password: None,
            identity_file: None,
        }
    }

    fn registry(devices: Vec<DeviceConfig>) -> DeviceRegistry {
        DeviceRegistry::from_config(&[ClientConfig {
            id: ClientId(1),
            name: "Client A".to_string(),
            contact_email: None,
            devices,
        }])
    }

    async fn monitor(
        registry: &DeviceRegistry,
        executor: MockExecutor,
        store: &MemoryStore,
        capacity: usize,
        parallelism: usize,
    ) -> (HealthMonitor, UptimeStore) {
        let uptime = UptimeStore::new(registry.device_names().await, capacity);
        let monitor = HealthMonitor::new(
            registry.clone(),
            uptime.clone(),
            Arc::new(executor),
            Arc::new(store.clone()),
            "hostname",
            parallelism,
        );
        (monitor, uptime)
    }

    #[tokio::test]
    async fn failures_are_isolated_per_device() {
        let registry = registry(vec![
            device("Firewall", "10.0.0.1"),
            device("Sensor", "10.0.0.2"),
            device("Database", "10.0.0.3"),
        ]);
        let executor = MockExecutor::new(["10.0.0.2"]);
        let store = MemoryStore::default();
        let (monitor, uptime) = monitor(&registry, executor.clone(), &store, 10, 4).await;

        let summary = monitor.sweep().await;

        assert_eq!(summary.probed, 3);
        assert_eq!(summary.healthy, 2);
        assert_eq!(summary.critical, 1);
        assert!(executor.calls().iter().all(|c| c.command == "hostname"));

        let client = registry.client(ClientId(1)).await.unwrap();
        assert_eq!(client.device("Firewall").unwrap().status, DeviceStatus::Healthy);
        assert_eq!(client.device("Sensor").unwrap().status, DeviceStatus::Critical);
        assert_eq!(client.device("Sensor").unwrap().response_time_ms, Some(0.0));
        assert_eq!(uptime.len("Database").await, Some(1));

        let persisted = store.uptime().unwrap();
        assert_eq!(persisted["Sensor"][0].status, HealthStatus::Critical);
    }

    #[tokio::test]
    async fn repeated_sweeps_stay_bounded() {
        let registry = registry(vec![device("Firewall", "10.0.0.1")]);
        let store = MemoryStore::default();
        let (monitor, uptime) = monitor(&registry, MockExecutor::default(), &store, 5, 1).await;

        for _ in 0..12 {
            monitor.sweep().await;
        }

        assert_eq!(uptime.len("Firewall").await, Some(5));
        assert_eq!(store.uptime().unwrap()["Firewall"].len(), 5);
    }

    #[tokio::test]
    async fn probes_run_concurrently() {
        let devices = (0..8)
            .map(|i| device(&format!("host-{i}"), &format!("10.0.1.{i}")))
            .collect();
        let registry = registry(devices);
        let executor = MockExecutor::default().with_delay(Duration::from_millis(200));
        let store = MemoryStore::default();
        let (monitor, _) = monitor(&registry, executor, &store, 10, 8).await;

        let started = Instant::now();
        let summary = monitor.sweep().await;

        assert_eq!(summary.probed, 8);
        // Sequential probing would take at least 1.6s.
        assert!(started.elapsed() < Duration::from_millis(1200));
    }

    /// Slow uptime writes that track how many are in flight.
    #[derive(Default)]
    struct SlowDisk {
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
        saved: std::sync::Mutex<Vec<usize>>,
    }

    #[async_trait::async_trait]
    impl DocumentStore for SlowDisk {
        async fn load_updates(&self) -> Result<Option<Vec<ScheduledUpdate>>, StorageError> {
            Ok(None)
        }

        async fn save_updates(&self, _updates: &[ScheduledUpdate]) -> Result<(), StorageError> {
            Ok(())
        }

        async fn load_uptime(&self) -> Result<Option<UptimeSnapshot>, StorageError> {
            Ok(None)
        }

        async fn save_uptime(&self, snapshot: &UptimeSnapshot) -> Result<(), StorageError> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(50)).await;

            let samples = snapshot.values().map(Vec::len).sum();
            self.saved.lock().unwrap().push(samples);
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn overlapping_sweeps_save_in_order() {
        let registry = registry(vec![
            device("Firewall", "10.0.0.1"),
            device("Sensor", "10.0.0.2"),
        ]);
        let disk = Arc::new(SlowDisk::default());
        let uptime = UptimeStore::new(registry.device_names().await, 10);
        let monitor = HealthMonitor::new(
            registry.clone(),
            uptime.clone(),
            Arc::new(MockExecutor::default()),
            disk.clone(),
            "hostname",
            2,
        );

        let sweeps: Vec<_> = (0..4)
            .map(|_| {
                let monitor = monitor.clone();
                tokio::spawn(async move { monitor.sweep().await })
            })
            .collect();
        for sweep in sweeps {
            sweep.await.unwrap();
        }

        assert_eq!(disk.max_in_flight.load(Ordering::SeqCst), 1);
        let saved = disk.saved.lock().unwrap().clone();
        assert_eq!(saved.len(), 4);
        assert!(saved.windows(2).all(|w| w[0] <= w[1]), "older snapshot saved last: {saved:?}");
        assert_eq!(saved.last(), Some(&8));
        assert_eq!(uptime.len("Firewall").await, Some(4));
    }

    #[tokio::test]
    async fn run_stops_on_cancel() {
        let registry = registry(vec![device("Firewall", "10.0.0.1")]);
        let store = MemoryStore::default();
        let (monitor, uptime) = monitor(&registry, MockExecutor::default(), &store, 10, 1).await;

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(monitor.run(Duration::from_secs(3600), cancel.clone()));

        tokio::time::timeout(Duration::from_secs(5), async {
            while uptime.len("Firewall").await != Some(1) {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
