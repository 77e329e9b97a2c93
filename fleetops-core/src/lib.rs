use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifier of a client (a customer owning a group of devices).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClientId(pub u64);

/// Identifier of a scheduled update. Unique and monotonic within a process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UpdateId(pub u64);

/// Identifier of a ticket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TicketId(pub u64);

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for UpdateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for TicketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Last known state of a device as seen by probes and updates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceStatus {
    #[default]
    Unknown,
    Healthy,
    Critical,
}

/// Result of a single health probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Critical,
}

impl HealthStatus {
    pub fn from_success(success: bool) -> Self {
        if success {
            HealthStatus::Healthy
        } else {
            HealthStatus::Critical
        }
    }
}

impl From<HealthStatus> for DeviceStatus {
    fn from(status: HealthStatus) -> Self {
        match status {
            HealthStatus::Healthy => DeviceStatus::Healthy,
            HealthStatus::Critical => DeviceStatus::Critical,
        }
    }
}

/// One recorded health check. Immutable once recorded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthSample {
    /// When the probe completed.
    pub timestamp: jiff::Timestamp,
    /// Probe verdict.
    pub status: HealthStatus,
    /// Round-trip time of the probe in milliseconds, `0` on failure.
    #[serde(rename = "response_time")]
    pub response_time_ms: f64,
}

/// Derived statistics over a window of health samples.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct UptimeStats {
    pub uptime_percentage: f64,
    pub downtime_percentage: f64,
    pub total_checks: usize,
    pub healthy_checks: usize,
    pub critical_checks: usize,
}

impl UptimeStats {
    /// Computes statistics over the given samples.
    ///
    /// An empty window reports both percentages as `0`.
    pub fn from_samples<'a, I>(samples: I) -> Self
    where
        I: IntoIterator<Item = &'a HealthSample>,
    {
        let mut total_checks = 0;
        let mut healthy_checks = 0;
        for sample in samples {
            total_checks += 1;
            if sample.status == HealthStatus::Healthy {
                healthy_checks += 1;
            }
        }

        if total_checks == 0 {
            return Self {
                uptime_percentage: 0.0,
                downtime_percentage: 0.0,
                total_checks: 0,
                healthy_checks: 0,
                critical_checks: 0,
            };
        }

        let uptime = healthy_checks as f64 / total_checks as f64 * 100.0;
        Self {
            uptime_percentage: round_hundredths(uptime),
            downtime_percentage: round_hundredths(100.0 - uptime),
            total_checks,
            healthy_checks,
            critical_checks: total_checks - healthy_checks,
        }
    }
}

/// Samples inside a lookback window together with their statistics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UptimeReport {
    pub data: Vec<HealthSample>,
    pub stats: UptimeStats,
}

/// Rounds to two decimal places.
pub fn round_hundredths(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Lifecycle of a scheduled update.
///
/// `Scheduled -> InProgress -> {Completed, Partial, Failed}`. The last three
/// are terminal. `Scheduled -> Failed` also happens when a stored schedule
/// time cannot be parsed during recovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateStatus {
    Scheduled,
    InProgress,
    Completed,
    Partial,
    Failed,
}

impl UpdateStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            UpdateStatus::Completed | UpdateStatus::Partial | UpdateStatus::Failed
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            UpdateStatus::Scheduled => "scheduled",
            UpdateStatus::InProgress => "in_progress",
            UpdateStatus::Completed => "completed",
            UpdateStatus::Partial => "partial",
            UpdateStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for UpdateStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A maintenance command scheduled to run on a set of a client's servers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduledUpdate {
    pub id: UpdateId,
    pub client_id: ClientId,
    /// Target server names, unique, in request order.
    pub servers: Vec<String>,
    /// Firing time exactly as requested. Kept verbatim so that recovery
    /// can detect entries whose time no longer parses.
    pub scheduled_time: String,
    pub update_type: String,
    pub command: String,
    pub status: UpdateStatus,
    pub created_at: jiff::Timestamp,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<jiff::Timestamp>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub results: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Snapshot of an update taken when it left `in_progress`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateHistoryEntry {
    pub recorded_at: jiff::Timestamp,
    #[serde(flatten)]
    pub update: ScheduledUpdate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TicketStatus {
    Open,
    Closed,
}

/// A ticket raised from a finished update. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ticket {
    pub id: TicketId,
    pub client_id: ClientId,
    pub update_id: UpdateId,
    pub title: String,
    pub description: String,
    pub status: TicketStatus,
    pub created_at: jiff::Timestamp,
    pub results: Vec<String>,
}
