use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use fleetops_core::UpdateId;
use jiff::Timestamp;
use jiff::civil::DateTime;
use jiff::tz::TimeZone;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::EngineError;
use crate::ledger::UpdateLedger;

/// Parse a requested firing time.
///
/// Accepts RFC 3339 timestamps (`Z` or a numeric offset) and naive ISO 8601
/// date-times, which are taken as UTC.
pub fn parse_schedule_time(value: &str) -> Result<Timestamp, EngineError> {
    let trimmed = value.trim();

    let offset_err = match trimmed.parse::<Timestamp>() {
        Ok(ts) => return Ok(ts),
        Err(e) => e,
    };

    trimmed
        .parse::<DateTime>()
        .and_then(|dt| dt.to_zoned(TimeZone::UTC))
        .map(|zoned| zoned.timestamp())
        .map_err(|_| EngineError::InvalidScheduleTime {
            value: value.to_string(),
            reason: offset_err.to_string(),
        })
}

/// Error recorded on updates a previous process left `in_progress`.
pub const INTERRUPTED_BY_RESTART: &str = "interrupted by restart";

/// What a recovery pass did with the persisted ledger.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecoverySummary {
    pub rearmed: usize,
    /// Scheduled entries whose stored time no longer parses.
    pub failed: usize,
    /// Entries that were mid-execution when the previous process stopped.
    pub interrupted: usize,
}

/// One-shot timers keyed by update id.
///
/// When a timer elapses its id is sent on the channel returned by
/// [`UpdateScheduler::new`]. A timer fires only if it is still the live
/// timer for its id at that moment; removing it from the map is the point
/// where firing and [`UpdateScheduler::cancel`] are ordered, so exactly one
/// of them wins.
#[derive(Clone)]
pub struct UpdateScheduler {
    timers: Arc<Mutex<Timers>>,
    fired: mpsc::UnboundedSender<UpdateId>,
}

#[derive(Default)]
struct Timers {
    next_generation: u64,
    pending: HashMap<UpdateId, Timer>,
}

struct Timer {
    generation: u64,
    due: Timestamp,
    handle: JoinHandle<()>,
}

impl UpdateScheduler {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<UpdateId>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let scheduler = Self {
            timers: Arc::new(Mutex::new(Timers::default())),
            fired: tx,
        };
        (scheduler, rx)
    }

    fn timers(&self) -> MutexGuard<'_, Timers> {
        self.timers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Parse `when` and arm a timer for `id`. Nothing changes if the time
    /// does not parse.
    pub fn schedule(&self, id: UpdateId, when: &str) -> Result<Timestamp, EngineError> {
        let due = parse_schedule_time(when)?;
        self.schedule_at(id, due);
        Ok(due)
    }

    /// Arm a timer for `id`, replacing any existing one. A time in the past
    /// fires immediately.
    pub fn schedule_at(&self, id: UpdateId, due: Timestamp) {
        let delay = Duration::try_from(due.duration_since(Timestamp::now())).unwrap_or(Duration::ZERO);

        // The lock is held until the timer is in the map, so even a zero
        // delay timer finds its own entry when it wakes.
        let mut timers = self.timers();
        let generation = timers.next_generation;
        timers.next_generation += 1;

        let shared = Arc::clone(&self.timers);
        let fired = self.fired.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;

            let claimed = {
                let mut timers = shared.lock().unwrap_or_else(PoisonError::into_inner);
                match timers.pending.get(&id) {
                    Some(timer) if timer.generation == generation => {
                        timers.pending.remove(&id);
                        true
                    }
                    _ => false,
                }
            };

            if claimed && fired.send(id).is_err() {
                warn!(update_id = %id, "Timer fired with no dispatcher listening");
            }
        });

        if let Some(previous) = timers.pending.insert(
            id,
            Timer {
                generation,
                due,
                handle,
            },
        ) {
            previous.handle.abort();
            debug!(update_id = %id, "Replaced pending timer");
        }
        debug!(update_id = %id, due = %due, delay_secs = delay.as_secs(), "Timer armed");
    }

    /// Remove the pending timer for `id`. Returns `false` when there is none,
    /// including when it already fired.
    pub fn cancel(&self, id: UpdateId) -> bool {
        match self.timers().pending.remove(&id) {
            Some(timer) => {
                timer.handle.abort();
                debug!(update_id = %id, "Timer cancelled");
                true
            }
            None => false,
        }
    }

    pub fn is_pending(&self, id: UpdateId) -> bool {
        self.timers().pending.contains_key(&id)
    }

    /// Pending timers and their due times, ordered by id.
    pub fn pending(&self) -> Vec<(UpdateId, Timestamp)> {
        let mut pending: Vec<_> = self
            .timers()
            .pending
            .iter()
            .map(|(id, timer)| (*id, timer.due))
            .collect();
        pending.sort_by_key(|(id, _)| *id);
        pending
    }

    /// Abort every pending timer.
    pub fn shutdown(&self) {
        for (_, timer) in self.timers().pending.drain() {
            timer.handle.abort();
        }
    }

    /// Re-arm a timer for every `scheduled` entry of the ledger.
    ///
    /// Entries whose stored time no longer parses are marked `failed`
    /// instead. Entries still `in_progress` cannot resume, so they are failed
    /// as interrupted. Every change is persisted.
    pub async fn recover_on_startup(&self, ledger: &UpdateLedger) -> RecoverySummary {
        let mut summary = RecoverySummary::default();

        for id in ledger.fail_interrupted(INTERRUPTED_BY_RESTART).await {
            warn!(update_id = %id, "Update was interrupted by restart, marking failed");
            summary.interrupted += 1;
        }

        for update in ledger.scheduled().await {
            match parse_schedule_time(&update.scheduled_time) {
                Ok(due) => {
                    self.schedule_at(update.id, due);
                    summary.rearmed += 1;
                }
                Err(e) => {
                    warn!(update_id = %update.id, error = %e, "Cannot re-arm update, marking failed");
                    ledger.mark_unschedulable(update.id, e.to_string()).await;
                    summary.failed += 1;
                }
            }
        }

        info!(
            rearmed = summary.rearmed,
            failed = summary.failed,
            interrupted = summary.interrupted,
            "Scheduler recovery complete"
        );
        summary
    }
}
