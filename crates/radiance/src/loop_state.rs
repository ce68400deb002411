//! Loop phase tracker: last completion time of Sense, Reason, Act, Learn.
//!
//! The tracker lives in memory for the lifetime of the process and starts
//! empty. Whichever phase finishes records its timestamp; there is no
//! ordering between phases and concurrent writers to the same slot resolve
//! last-writer-wins.

use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::types::Phase;

/// Default age after which the loop is reported as stale.
pub const DEFAULT_STALE_AFTER_MINS: i64 = 24 * 60;

/// Point-in-time copy of all four slots.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoopSnapshot {
    pub last_sense: Option<DateTime<Utc>>,
    pub last_reason: Option<DateTime<Utc>>,
    pub last_act: Option<DateTime<Utc>>,
    pub last_learn: Option<DateTime<Utc>>,
}

impl LoopSnapshot {
    pub fn get(&self, phase: Phase) -> Option<DateTime<Utc>> {
        match phase {
            Phase::Sense => self.last_sense,
            Phase::Reason => self.last_reason,
            Phase::Act => self.last_act,
            Phase::Learn => self.last_learn,
        }
    }

    fn slot_mut(&mut self, phase: Phase) -> &mut Option<DateTime<Utc>> {
        match phase {
            Phase::Sense => &mut self.last_sense,
            Phase::Reason => &mut self.last_reason,
            Phase::Act => &mut self.last_act,
            Phase::Learn => &mut self.last_learn,
        }
    }

    /// Sense-to-act latency in whole minutes (rounded), never negative.
    /// Zero when either slot is unset.
    pub fn latency_minutes(&self) -> i64 {
        match (self.last_sense, self.last_act) {
            (Some(sense), Some(act)) => {
                let secs = (act - sense).num_seconds().max(0);
                (secs as f64 / 60.0).round() as i64
            }
            _ => 0,
        }
    }

    /// Most recent completion across all phases.
    pub fn latest(&self) -> Option<DateTime<Utc>> {
        Phase::ALL.iter().filter_map(|p| self.get(*p)).max()
    }

    /// Coarse health derived from how recently anything completed.
    pub fn status(&self, now: DateTime<Utc>, stale_after: Duration) -> LoopStatus {
        match self.latest() {
            None => LoopStatus::Idle,
            Some(latest) if now - latest > stale_after => LoopStatus::Stale,
            Some(_) => LoopStatus::Active,
        }
    }
}

/// Dashboard-level loop health.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoopStatus {
    /// No phase has completed since the process started.
    Idle,
    /// Something completed within the staleness window.
    Active,
    /// The latest completion is older than the staleness window.
    Stale,
}

/// Shared, process-wide tracker. Wrap in an `Arc` and hand to whoever runs
/// or reports on phases.
#[derive(Debug, Default)]
pub struct LoopTracker {
    state: RwLock<LoopSnapshot>,
}

impl LoopTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `phase` completed now.
    pub fn mark(&self, phase: Phase) -> DateTime<Utc> {
        let now = Utc::now();
        self.mark_at(phase, now);
        now
    }

    /// Record that `phase` completed at `at`.
    pub fn mark_at(&self, phase: Phase, at: DateTime<Utc>) {
        *self.state.write().slot_mut(phase) = Some(at);
        tracing::debug!(phase = phase.as_str(), at = %at, "loop phase completed");
    }

    pub fn snapshot(&self) -> LoopSnapshot {
        *self.state.read()
    }
}
