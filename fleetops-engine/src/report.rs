use std::collections::BTreeMap;

use fleetops_core::{UpdateHistoryEntry, UpdateStatus};
use jiff::{SignedDuration, Timestamp};
use serde::Serialize;

use crate::error::EngineError;
use crate::registry::Client;

/// Lookback used when no usable range is given.
pub const DEFAULT_RANGE_DAYS: u32 = 7;

/// Aggregate over updates that finished inside a window.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct UpdateReport {
    pub total_updates: usize,
    /// Updates that ended `completed`.
    pub successful_updates: usize,
    /// Updates that ended `failed` or `partial`.
    pub failed_updates: usize,
    pub updates_by_client: BTreeMap<String, usize>,
    pub updates_by_type: BTreeMap<String, usize>,
}

/// Parse a range such as `"30d"` into days.
///
/// Anything without the `d` suffix falls back to the default.
pub fn parse_range(range: Option<&str>) -> Result<u32, EngineError> {
    let Some(days) = range.map(str::trim).and_then(|r| r.strip_suffix('d')) else {
        return Ok(DEFAULT_RANGE_DAYS);
    };

    days.parse()
        .map_err(|_| EngineError::InvalidRange(range.unwrap_or_default().to_string()))
}

pub fn build_report(
    history: &[UpdateHistoryEntry],
    clients: &[Client],
    days: u32,
    now: Timestamp,
) -> UpdateReport {
    let since = now
        .checked_sub(SignedDuration::from_hours(i64::from(days) * 24))
        .unwrap_or(Timestamp::MIN);

    let mut report = UpdateReport::default();
    for entry in history {
        let update = &entry.update;
        let Some(completed_at) = update.completed_at else {
            continue;
        };
        if completed_at < since {
            continue;
        }

        report.total_updates += 1;
        match update.status {
            UpdateStatus::Completed => report.successful_updates += 1,
            UpdateStatus::Failed | UpdateStatus::Partial => report.failed_updates += 1,
            UpdateStatus::Scheduled | UpdateStatus::InProgress => {}
        }

        let client = clients
            .iter()
            .find(|c| c.id == update.client_id)
            .map_or("Unknown", |c| c.name.as_str());
        *report
            .updates_by_client
            .entry(client.to_string())
            .or_default() += 1;
        *report
            .updates_by_type
            .entry(update.update_type.clone())
            .or_default() += 1;
    }

    report
}
