use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

use fleetops_core::{HealthSample, UptimeReport, UptimeStats};
use jiff::{SignedDuration, Timestamp};
use tokio::sync::Mutex;

use crate::storage::UptimeSnapshot;

/// Samples kept per device unless configured otherwise.
pub const DEFAULT_CAPACITY: usize = 1000;

/// Bounded per-device series of health samples.
///
/// One FIFO ring per registered device; once a ring holds `capacity`
/// samples the oldest one is evicted for every new one.
#[derive(Clone)]
pub struct UptimeStore {
    inner: Arc<Mutex<Inner>>,
}

struct Inner {
    capacity: usize,
    series: BTreeMap<String, VecDeque<HealthSample>>,
}

impl UptimeStore {
    /// Create an empty series for every device name.
    pub fn new<I>(devices: I, capacity: usize) -> Self
    where
        I: IntoIterator<Item = String>,
    {
        let capacity = capacity.max(1);
        let series = devices
            .into_iter()
            .map(|name| (name, VecDeque::with_capacity(capacity.min(64))))
            .collect();

        Self {
            inner: Arc::new(Mutex::new(Inner { capacity, series })),
        }
    }

    /// Merge a persisted snapshot into the in-memory series.
    ///
    /// Series longer than the capacity keep their newest samples. Devices
    /// that are no longer registered are dropped. Returns how many series
    /// were restored.
    pub async fn restore(&self, snapshot: UptimeSnapshot) -> usize {
        let mut inner = self.inner.lock().await;
        let capacity = inner.capacity;
        let mut restored = 0;

        for (name, samples) in snapshot {
            let Some(series) = inner.series.get_mut(&name) else {
                continue;
            };
            let skip = samples.len().saturating_sub(capacity);
            *series = samples.into_iter().skip(skip).collect();
            restored += 1;
        }

        restored
    }

    /// Append a sample. Returns `false` for devices without a series.
    pub async fn record(&self, device: &str, sample: HealthSample) -> bool {
        let mut inner = self.inner.lock().await;
        let capacity = inner.capacity;
        let Some(series) = inner.series.get_mut(device) else {
            return false;
        };

        while series.len() >= capacity {
            series.pop_front();
        }
        series.push_back(sample);
        true
    }

    /// Number of samples held for a device.
    pub async fn len(&self, device: &str) -> Option<usize> {
        self.inner.lock().await.series.get(device).map(VecDeque::len)
    }

    pub async fn snapshot(&self) -> UptimeSnapshot {
        self.inner
            .lock()
            .await
            .series
            .iter()
            .map(|(name, series)| (name.clone(), series.iter().cloned().collect()))
            .collect()
    }

    /// Samples of one device from the last `hours` hours with statistics.
    /// `None` when the device is unknown.
    pub async fn device_uptime(&self, device: &str, hours: u32, now: Timestamp) -> Option<UptimeReport> {
        let since = window_start(now, hours);
        let inner = self.inner.lock().await;
        inner.series.get(device).map(|series| report(series, since))
    }

    /// Same as [`UptimeStore::device_uptime`] for every device.
    pub async fn all_uptime(&self, hours: u32, now: Timestamp) -> BTreeMap<String, UptimeReport> {
        let since = window_start(now, hours);
        let inner = self.inner.lock().await;
        inner
            .series
            .iter()
            .map(|(name, series)| (name.clone(), report(series, since)))
            .collect()
    }
}

fn window_start(now: Timestamp, hours: u32) -> Timestamp {
    now.checked_sub(SignedDuration::from_hours(i64::from(hours)))
        .unwrap_or(Timestamp::MIN)
}

fn report(series: &VecDeque<HealthSample>, since: Timestamp) -> UptimeReport {
    let data: Vec<HealthSample> = series
        .iter()
        .filter(|s| s.timestamp >= since)
        .cloned()
        .collect();
    let stats = UptimeStats::from_samples(&data);
    UptimeReport { data, stats }
}

#[cfg(test)]
mod tests {
    use fleetops_core::HealthStatus;

    use super::*;

    fn sample_at(timestamp: Timestamp, status: HealthStatus) -> HealthSample {
        HealthSample {
            timestamp,
            status,
            response_time_ms: 2.0,
        }
    }

    fn store(capacity: usize) -> UptimeStore {
        UptimeStore::new(["Firewall".to_string(), "Sensor".to_string()], capacity)
    }

    #[tokio::test]
    async fn series_never_exceeds_capacity() {
        let store = store(DEFAULT_CAPACITY);
        let now = Timestamp::now();

        for i in 0..DEFAULT_CAPACITY + 250 {
            let status = if i % 2 == 0 {
                HealthStatus::Healthy
            } else {
                HealthStatus::Critical
            };
            assert!(store.record("Firewall", sample_at(now, status)).await);
        }

        assert_eq!(store.len("Firewall").await, Some(DEFAULT_CAPACITY));
        assert_eq!(store.len("Sensor").await, Some(0));
    }

    #[tokio::test]
    async fn oldest_samples_are_evicted_first() {
        let store = store(3);
        let base = Timestamp::now();
        for minutes in 0..5 {
            let at = base - SignedDuration::from_mins(50 - minutes);
            store.record("Firewall", sample_at(at, HealthStatus::Healthy)).await;
        }

        let snapshot = store.snapshot().await;
        let kept: Vec<_> = snapshot["Firewall"].iter().map(|s| s.timestamp).collect();
        assert_eq!(kept.len(), 3);
        assert_eq!(kept[0], base - SignedDuration::from_mins(48));
        assert_eq!(kept[2], base - SignedDuration::from_mins(46));
    }

    #[tokio::test]
    async fn unknown_device_is_not_recorded() {
        let store = store(10);
        assert!(!store.record("Ghost", sample_at(Timestamp::now(), HealthStatus::Healthy)).await);
        assert!(store.len("Ghost").await.is_none());
    }

    #[tokio::test]
    async fn restore_truncates_and_drops_unknown_devices() {
        let store = store(2);
        let now = Timestamp::now();

        let mut snapshot = UptimeSnapshot::new();
        snapshot.insert(
            "Firewall".to_string(),
            (0..5)
                .map(|i| sample_at(now - SignedDuration::from_mins(10 - i), HealthStatus::Healthy))
                .collect(),
        );
        snapshot.insert(
            "Retired".to_string(),
            vec![sample_at(now, HealthStatus::Critical)],
        );

        assert_eq!(store.restore(snapshot).await, 1);
        assert_eq!(store.len("Firewall").await, Some(2));

        let all = store.all_uptime(24, now).await;
        assert!(!all.contains_key("Retired"));
        assert_eq!(all["Firewall"].data[1].timestamp, now - SignedDuration::from_mins(6));
    }

    #[tokio::test]
    async fn window_filters_old_samples() {
        let store = store(10);
        let now = Timestamp::now();

        store
            .record("Firewall", sample_at(now - SignedDuration::from_hours(30), HealthStatus::Critical))
            .await;
        store
            .record("Firewall", sample_at(now - SignedDuration::from_hours(2), HealthStatus::Healthy))
            .await;
        store
            .record("Firewall", sample_at(now - SignedDuration::from_mins(5), HealthStatus::Critical))
            .await;

        let day = store.device_uptime("Firewall", 24, now).await.unwrap();
        assert_eq!(day.stats.total_checks, 2);
        assert_eq!(day.stats.uptime_percentage, 50.0);
        assert_eq!(day.stats.downtime_percentage, 50.0);

        let week = store.device_uptime("Firewall", 24 * 7, now).await.unwrap();
        assert_eq!(week.stats.total_checks, 3);
        assert_eq!(week.stats.uptime_percentage, 33.33);

        assert!(store.device_uptime("Ghost", 24, now).await.is_none());
    }

    #[tokio::test]
    async fn empty_window_has_zero_uptime() {
        let store = store(10);
        let report = store.device_uptime("Sensor", 24, Timestamp::now()).await.unwrap();

        assert!(report.data.is_empty());
        assert_eq!(report.stats.uptime_percentage, 0.0);
        assert_eq!(report.stats.downtime_percentage, 0.0);
    }
}
