//! Duration cap enforcement for connected calls

use crate::config::CallsConfig;
use crate::domain::shared::value_objects::SessionId;
use crate::infrastructure::sync::lock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Timer output delivered to the session that started it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DurationEvent {
    Warning { remaining_secs: u64 },
    Expired,
}

pub type DurationSink = Arc<dyn Fn(DurationEvent) + Send + Sync>;

/// When warnings fire, as seconds remaining before the cap
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WarningSchedule {
    pub lead_secs: u64,
    pub final_countdown_secs: u64,
    pub step_secs: u64,
}

impl Default for WarningSchedule {
    fn default() -> Self {
        Self {
            lead_secs: 60,
            final_countdown_secs: 30,
            step_secs: 10,
        }
    }
}

impl From<&CallsConfig> for WarningSchedule {
    fn from(config: &CallsConfig) -> Self {
        Self {
            lead_secs: config.warning_lead_secs,
            final_countdown_secs: config.final_countdown_secs,
            step_secs: config.countdown_step_secs,
        }
    }
}

impl WarningSchedule {
    /// Remaining-seconds marks in firing order, e.g. `[60, 30, 20, 10]`
    pub fn marks(&self, cap_secs: u64) -> Vec<u64> {
        let mut marks = vec![self.lead_secs];
        if self.step_secs > 0 {
            let mut remaining = self.final_countdown_secs;
            while remaining > 0 {
                marks.push(remaining);
                remaining = remaining.saturating_sub(self.step_secs);
            }
        } else {
            marks.push(self.final_countdown_secs);
        }

        marks.retain(|m| *m > 0 && *m < cap_secs);
        marks.sort_unstable_by(|a, b| b.cmp(a));
        marks.dedup();
        marks
    }
}

struct Timer {
    id: u64,
    cancel: CancellationToken,
}

/// Per-session countdown timers
///
/// Shared by every session and provider. Expiry is delivered exactly at
/// `start + cap`; a cancelled timer never delivers anything further.
pub struct DurationEnforcer {
    schedule: WarningSchedule,
    timers: Arc<Mutex<HashMap<SessionId, Timer>>>,
    next_id: AtomicU64,
}

impl DurationEnforcer {
    pub fn new(schedule: WarningSchedule) -> Self {
        Self {
            schedule,
            timers: Arc::new(Mutex::new(HashMap::new())),
            next_id: AtomicU64::new(1),
        }
    }

    /// Start (or restart) the countdown for `session_id`
    pub fn start(&self, session_id: SessionId, cap_secs: u64, sink: DurationSink) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let cancel = CancellationToken::new();

        if let Some(previous) = lock(&self.timers).insert(
            session_id,
            Timer {
                id,
                cancel: cancel.clone(),
            },
        ) {
            previous.cancel.cancel();
        }

        let deadline = Instant::now() + Duration::from_secs(cap_secs);
        let marks = self.schedule.marks(cap_secs);
        let timers = self.timers.clone();
        info!(%session_id, cap_secs, "Duration timer started");

        tokio::spawn(async move {
            for remaining_secs in marks {
                let at = deadline - Duration::from_secs(remaining_secs);
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return,
                    _ = sleep_until(at) => sink(DurationEvent::Warning { remaining_secs }),
                }
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return,
                _ = sleep_until(deadline) => {}
            }

            {
                let mut timers = lock(&timers);
                if timers.get(&session_id).is_some_and(|t| t.id == id) {
                    timers.remove(&session_id);
                }
            }
            info!(%session_id, "Duration cap reached");
            sink(DurationEvent::Expired);
        });
    }

    /// Stop the countdown; returns whether a timer was running
    pub fn cancel(&self, session_id: &SessionId) -> bool {
        match lock(&self.timers).remove(session_id) {
            Some(timer) => {
                timer.cancel.cancel();
                debug!(%session_id, "Duration timer cancelled");
                true
            }
            None => false,
        }
    }

    pub fn is_running(&self, session_id: &SessionId) -> bool {
        lock(&self.timers).contains_key(session_id)
    }

    pub fn active_count(&self) -> usize {
        lock(&self.timers).len()
    }
}

impl Default for DurationEnforcer {
    fn default() -> Self {
        Self::new(WarningSchedule::default())
    }
}
